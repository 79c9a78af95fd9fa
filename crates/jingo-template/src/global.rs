//! The process-wide environment.
//!
//! Most hosts build exactly one [`Environment`]. The first call to
//! [`get_env`] or [`try_get_env`] builds it from the global
//! [`SETTINGS`](jingo_core::SETTINGS), unless one was installed earlier with
//! [`install`]. Concurrent first calls build it once.

use std::sync::{Mutex, OnceLock};

use jingo_core::apps::AppRegistry;
use jingo_core::{JingoError, JingoResult, SETTINGS};

use crate::context::RenderContext;
use crate::environment::{Environment, TemplateSource};
use crate::request::HttpRequest;

static ENV: OnceLock<Environment> = OnceLock::new();
static INIT: Mutex<()> = Mutex::new(());

/// Installs `env` as the process-wide environment.
///
/// # Errors
///
/// Returns `env` back if an environment is already in place.
pub fn install(env: Environment) -> Result<(), Environment> {
    let _guard = INIT.lock().expect("environment init lock poisoned");
    ENV.set(env)
}

/// Returns the process-wide environment, building it on first use.
///
/// # Errors
///
/// Returns [`JingoError::ImproperlyConfigured`] if settings are not
/// configured or the environment cannot be built.
pub fn try_get_env() -> JingoResult<&'static Environment> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let _guard = INIT.lock().expect("environment init lock poisoned");
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let settings = SETTINGS.try_get().ok_or_else(|| {
        JingoError::ImproperlyConfigured(
            "Settings are not configured; call SETTINGS.configure() first".to_string(),
        )
    })?;
    let apps = AppRegistry::from_settings(settings)?;
    let env = Environment::from_settings(settings, &apps)?;
    tracing::debug!("built process-wide environment");
    Ok(ENV.get_or_init(|| env))
}

/// Returns the process-wide environment, building it on first use.
///
/// # Panics
///
/// Panics if [`try_get_env`] fails.
pub fn get_env() -> &'static Environment {
    match try_get_env() {
        Ok(env) => env,
        Err(err) => panic!("cannot build the template environment: {err}"),
    }
}

/// Renders a template with the process-wide environment.
///
/// # Errors
///
/// Propagates build, lookup and render failures.
pub fn render_to_string<'t>(
    request: Option<&HttpRequest>,
    template: impl Into<TemplateSource<'t, 'static>>,
    context: impl Into<RenderContext>,
) -> JingoResult<String> {
    try_get_env()?.render_to_string(request, template, context)
}
