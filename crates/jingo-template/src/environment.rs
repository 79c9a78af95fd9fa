//! The template environment.
//!
//! An [`Environment`] owns the loader chain, the inclusion filter, the
//! engine options and the wrapped engine with its filters and globals. It is
//! built once at start-up, usually with [`Environment::from_settings`], and
//! then shared by reference.
//!
//! Template names resolve through [`ChoiceLoader`]: `template_dirs` first,
//! then each installed application's `templates/` directory in registration
//! order. Helpers are installed once, on the first call to
//! [`get_template`](Environment::get_template) or
//! [`from_string`](Environment::from_string): application helper modules in
//! application order, with the built-in helpers at the position of an
//! installed `jingo` application, or ahead of all others when there is none.
//!
//! # Examples
//!
//! ```
//! use jingo_template::context::ContextValue;
//! use jingo_template::environment::Environment;
//! use jingo_template::loaders::StringLoader;
//!
//! let loader = StringLoader::new();
//! loader.add("hello.html", "Hello {{ name }}!");
//!
//! let env = Environment::builder().loader(Box::new(loader)).build().unwrap();
//! let html = env
//!     .get_template("hello.html")
//!     .unwrap()
//!     .render([("name", ContextValue::from("<World>"))])
//!     .unwrap();
//! assert_eq!(html, "Hello &lt;World&gt;!");
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once, RwLock};

use jingo_core::apps::AppRegistry;
use jingo_core::checks::CheckRegistry;
use jingo_core::logging::render_span;
use jingo_core::settings::EXCLUDE_APPS;
use jingo_core::settings_loader::merge_json;
use jingo_core::{JingoError, JingoResult, Settings};
use minijinja::value::Rest;
use minijinja::{AutoEscape, ErrorKind, State, Value};
use serde::{Deserialize, Serialize};

use crate::context::{ContextValue, RenderContext};
use crate::context_processors::{self, ContextProcessor};
use crate::i18n::{CatalogTranslations, NullTranslations, Translations};
use crate::library::{arg, Helper, HelperModule, Register};
use crate::loaders::{
    AppDirectoriesLoader, ChoiceLoader, FileSystemLoader, InclusionFilter, Origin, ResolveError,
    TemplateLoader,
};
use crate::markup::{context_to_value, escape_filter, html_formatter, string_filter};
use crate::request::HttpRequest;
use crate::signals::{TemplateRendered, TEMPLATE_RENDERED};
use crate::urls::UrlReverser;
use crate::{helpers, i18n};

/// Extensions an environment can enable.
pub const KNOWN_EXTENSIONS: &[&str] = &["i18n", "jingo"];

/// Name reported for templates created with [`Environment::from_string`].
pub const INLINE_TEMPLATE_NAME: &str = "<string>";

/// Label of the application whose position orders the built-in helpers.
pub const BUILTIN_HELPERS_LABEL: &str = "jingo";

// ============================================================
// Engine options
// ============================================================

/// Options applied to the wrapped engine.
///
/// Overrides are JSON mappings merged over [`EngineOptions::defaults`]; later
/// overrides win. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineOptions {
    /// Remove the first newline after a block tag.
    pub trim_blocks: bool,
    /// Strip whitespace before a block tag at the start of a line.
    pub lstrip_blocks: bool,
    /// Keep the final newline of a template.
    pub keep_trailing_newline: bool,
    /// Escape interpolated values that are not markup.
    pub autoescape: bool,
    /// Re-check template files on every lookup.
    pub auto_reload: bool,
    /// Enabled extensions. Dotted names select by their last segment.
    pub extensions: Vec<String>,
}

impl EngineOptions {
    /// The default options. Auto-reload follows `debug`.
    pub fn defaults(debug: bool) -> Self {
        Self {
            trim_blocks: true,
            lstrip_blocks: false,
            keep_trailing_newline: false,
            autoescape: true,
            auto_reload: debug,
            extensions: KNOWN_EXTENSIONS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Merges `overrides` over the defaults, in order.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::ImproperlyConfigured`] if an override is not a
    /// mapping, has an unknown key or a wrongly typed value, or names an
    /// unknown extension.
    pub fn resolve(debug: bool, overrides: Vec<serde_json::Value>) -> JingoResult<Self> {
        let mut merged = serde_json::to_value(Self::defaults(debug)).map_err(|e| {
            JingoError::ImproperlyConfigured(format!("Cannot serialize engine options: {e}"))
        })?;

        for value in overrides {
            if !value.is_object() {
                return Err(JingoError::ImproperlyConfigured(format!(
                    "Engine options must be a mapping, got {value}"
                )));
            }
            merged = merge_json(merged, value);
        }

        let options: Self = serde_json::from_value(merged)
            .map_err(|e| JingoError::ImproperlyConfigured(format!("Invalid engine options: {e}")))?;

        if let Some(unknown) = options
            .extensions
            .iter()
            .find(|ext| !KNOWN_EXTENSIONS.contains(&extension_name(ext)))
        {
            return Err(JingoError::ImproperlyConfigured(format!(
                "Unknown extension '{unknown}'"
            )));
        }
        Ok(options)
    }

    /// Returns `true` if the extension `name` is enabled.
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| extension_name(ext) == name)
    }
}

fn extension_name(ext: &str) -> &str {
    ext.rsplit('.').next().unwrap_or(ext)
}

// ============================================================
// Builder
// ============================================================

type OptionsFn = Box<dyn FnOnce() -> serde_json::Value>;

/// Builder for [`Environment`].
pub struct EnvironmentBuilder {
    dirs: Vec<PathBuf>,
    apps: AppRegistry,
    loaders: Vec<Box<dyn TemplateLoader>>,
    include_pattern: Option<String>,
    exclude_apps: Vec<String>,
    debug: bool,
    template_debug: bool,
    jinja_config: Option<serde_json::Value>,
    options_fn: Option<OptionsFn>,
    helper_modules: Vec<(String, Box<dyn HelperModule>)>,
    processors: Vec<Box<dyn ContextProcessor>>,
    url_reverser: Option<Arc<dyn UrlReverser>>,
    translations: Option<Arc<dyn Translations>>,
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            apps: AppRegistry::new(),
            loaders: Vec::new(),
            include_pattern: None,
            exclude_apps: EXCLUDE_APPS.iter().map(ToString::to_string).collect(),
            debug: false,
            template_debug: false,
            jinja_config: None,
            options_fn: None,
            helper_modules: Vec::new(),
            processors: Vec::new(),
            url_reverser: None,
            translations: None,
        }
    }
}

impl fmt::Debug for EnvironmentBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentBuilder")
            .field("dirs", &self.dirs)
            .field("apps", &self.apps)
            .field("include_pattern", &self.include_pattern)
            .field("exclude_apps", &self.exclude_apps)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl EnvironmentBuilder {
    /// Starts a builder from settings and the installed applications.
    ///
    /// Runs the system checks first; any error-level message aborts.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::ImproperlyConfigured`] if a check fails or a
    /// context processor name is unknown.
    pub fn from_settings(settings: &Settings, apps: &AppRegistry) -> JingoResult<Self> {
        let messages = CheckRegistry::with_builtins().run_checks(None, settings);
        for message in &messages {
            if message.is_serious() {
                tracing::warn!(%message, "system check");
            } else {
                tracing::debug!(%message, "system check");
            }
        }
        let fatal: Vec<String> = messages
            .iter()
            .filter(|m| m.is_fatal())
            .map(ToString::to_string)
            .collect();
        if !fatal.is_empty() {
            return Err(JingoError::ImproperlyConfigured(fatal.join("; ")));
        }

        let translations: Option<Arc<dyn Translations>> = if settings.use_i18n {
            Some(Arc::new(CatalogTranslations))
        } else {
            None
        };

        Ok(Self {
            dirs: settings.template_dirs.clone(),
            apps: apps.clone(),
            include_pattern: settings.jingo_include_pattern.clone(),
            exclude_apps: settings.jingo_exclude_apps.clone(),
            debug: settings.debug,
            template_debug: settings.template_debug,
            jinja_config: settings.jinja_config.clone(),
            processors: context_processors::from_settings(settings)?,
            translations,
            ..Self::default()
        })
    }

    /// Adds a template directory, searched before application directories.
    #[must_use]
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dirs.push(dir.into());
        self
    }

    /// Sets the installed applications.
    #[must_use]
    pub fn apps(mut self, apps: AppRegistry) -> Self {
        self.apps = apps;
        self
    }

    /// Adds a loader searched after directories and applications.
    #[must_use]
    pub fn loader(mut self, loader: Box<dyn TemplateLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    /// Only names matching `pattern` are handled by [`JingoLoader`](crate::loaders::JingoLoader).
    #[must_use]
    pub fn include_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.include_pattern = Some(pattern.into());
        self
    }

    /// Replaces the excluded top-level namespaces.
    #[must_use]
    pub fn exclude_apps<I, S>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_apps = apps.into_iter().map(Into::into).collect();
        self
    }

    /// Sets debug mode, the default for auto-reload.
    #[must_use]
    pub const fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Dispatches [`TEMPLATE_RENDERED`] after every render.
    #[must_use]
    pub const fn template_debug(mut self, enabled: bool) -> Self {
        self.template_debug = enabled;
        self
    }

    /// Sets a static engine-options override.
    #[must_use]
    pub fn jinja_config(mut self, config: serde_json::Value) -> Self {
        self.jinja_config = Some(config);
        self
    }

    /// Sets a callable producing engine-options overrides, applied after
    /// the static override.
    #[must_use]
    pub fn options<F>(mut self, func: F) -> Self
    where
        F: FnOnce() -> serde_json::Value + 'static,
    {
        self.options_fn = Some(Box::new(func));
        self
    }

    /// Attaches a helper module to the application `label`.
    ///
    /// The module runs once on first template resolution, and only if an
    /// application with that label is installed. Modules run in application
    /// order; several modules for one label run in the order attached.
    #[must_use]
    pub fn helpers(mut self, label: impl Into<String>, module: impl HelperModule + 'static) -> Self {
        self.helper_modules.push((label.into(), Box::new(module)));
        self
    }

    /// Adds a context processor applied by [`Environment::render_to_string`].
    #[must_use]
    pub fn context_processor(mut self, processor: Box<dyn ContextProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Sets the reverser behind the `url()` helper.
    #[must_use]
    pub fn url_reverser(mut self, reverser: Arc<dyn UrlReverser>) -> Self {
        self.url_reverser = Some(reverser);
        self
    }

    /// Sets the translation backend.
    #[must_use]
    pub fn translations(mut self, translations: Arc<dyn Translations>) -> Self {
        self.translations = Some(translations);
        self
    }

    /// Builds the environment.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::ImproperlyConfigured`] for invalid engine options
    /// or an include pattern that does not compile.
    pub fn build(self) -> JingoResult<Environment> {
        let mut overrides: Vec<serde_json::Value> = self.jinja_config.into_iter().collect();
        if let Some(options_fn) = self.options_fn {
            overrides.push(options_fn());
        }
        let options = EngineOptions::resolve(self.debug, overrides)?;
        let filter = InclusionFilter::new(self.include_pattern.as_deref(), self.exclude_apps)?;

        let mut chain: Vec<Box<dyn TemplateLoader>> = Vec::new();
        for dir in self.dirs {
            chain.push(Box::new(FileSystemLoader::new(dir)));
        }
        for app in self.apps.get_app_configs() {
            if let Some(loader) = AppDirectoriesLoader::for_app(app.as_ref()) {
                chain.push(Box::new(loader));
            }
        }
        chain.extend(self.loaders);

        let mut loader = ChoiceLoader::new(chain);
        if !options.auto_reload {
            loader = loader.with_negative_cache();
        }
        let loader = Arc::new(loader);

        let loaded = Arc::new(Mutex::new(HashMap::new()));
        let engine = new_engine(
            &options,
            Arc::clone(&loader),
            options.auto_reload.then(|| Arc::clone(&loaded)),
        );
        let app_labels = self
            .apps
            .get_app_configs()
            .iter()
            .map(|app| app.label().to_string())
            .collect();

        let env = Environment {
            template_debug: self.template_debug,
            loader,
            filter,
            state: RwLock::new(EngineState {
                engine: Arc::new(engine),
                filters: BUILTIN_FILTERS.iter().map(ToString::to_string).collect(),
                globals: BUILTIN_GLOBALS.iter().map(ToString::to_string).collect(),
            }),
            helper_modules: self.helper_modules,
            app_labels,
            helpers_once: Once::new(),
            url_reverser: self.url_reverser,
            translations: self.translations.unwrap_or_else(|| Arc::new(NullTranslations)),
            loaded,
            processors: self.processors,
            options,
        };

        // Markup must survive explicit escaping and string conversion.
        env.register()
            .register_filter("escape", |_, args| Ok(escape_filter(arg("escape", args, 0)?)))
            .register_filter("e", |_, args| Ok(escape_filter(arg("e", args, 0)?)))
            .register_filter("string", |_, args| Ok(string_filter(arg("string", args, 0)?)));

        tracing::info!(
            loaders = env.loader.len(),
            auto_reload = env.options.auto_reload,
            extensions = ?env.options.extensions,
            "jingo environment ready"
        );
        Ok(env)
    }
}

/// Origins of every template the engine has read, by name.
type LoadedOrigins = Arc<Mutex<HashMap<String, Origin>>>;

fn new_engine(
    options: &EngineOptions,
    loader: Arc<ChoiceLoader>,
    loaded: Option<LoadedOrigins>,
) -> minijinja::Environment<'static> {
    let mut engine = minijinja::Environment::new();
    engine.set_trim_blocks(options.trim_blocks);
    engine.set_lstrip_blocks(options.lstrip_blocks);
    engine.set_keep_trailing_newline(options.keep_trailing_newline);

    let autoescape = options.autoescape;
    engine.set_auto_escape_callback(move |_name| {
        if autoescape {
            AutoEscape::Html
        } else {
            AutoEscape::None
        }
    });
    engine.set_formatter(html_formatter);

    // Extends and includes resolve through the chain without the inclusion filter.
    engine.set_loader(move |name| match loader.load(name) {
        Ok((source, origin)) => {
            if let Some(loaded) = &loaded {
                loaded
                    .lock()
                    .expect("loaded origins lock poisoned")
                    .insert(name.to_string(), origin);
            }
            Ok(Some(source))
        }
        Err(ResolveError::NotFound { .. } | ResolveError::NotEligible { .. }) => Ok(None),
        Err(err) => Err(minijinja::Error::new(
            ErrorKind::InvalidOperation,
            "template could not be read",
        )
        .with_source(err)),
    });
    engine
}

/// Filters the wrapped engine provides out of the box.
const BUILTIN_FILTERS: &[&str] = &[
    "abs", "attr", "capitalize", "default", "d", "dictsort", "e", "escape", "first", "float",
    "indent", "int", "items", "join", "last", "length", "list", "lower", "map", "max", "min",
    "reject", "rejectattr", "replace", "reverse", "round", "safe", "select", "selectattr",
    "slice", "sort", "string", "title", "tojson", "trim", "unique", "upper", "urlencode",
];

/// Globals the wrapped engine provides out of the box.
const BUILTIN_GLOBALS: &[&str] = &["range", "dict", "debug", "namespace"];

// ============================================================
// Environment
// ============================================================

struct EngineState {
    engine: Arc<minijinja::Environment<'static>>,
    filters: BTreeSet<String>,
    globals: BTreeSet<String>,
}

/// A configured template environment.
///
/// Registration (filters, globals) takes a write lock and copies the engine
/// if a render currently holds it; renders work on a snapshot and never
/// block registration.
pub struct Environment {
    options: EngineOptions,
    template_debug: bool,
    loader: Arc<ChoiceLoader>,
    filter: InclusionFilter,
    state: RwLock<EngineState>,
    helper_modules: Vec<(String, Box<dyn HelperModule>)>,
    app_labels: Vec<String>,
    helpers_once: Once,
    url_reverser: Option<Arc<dyn UrlReverser>>,
    translations: Arc<dyn Translations>,
    loaded: LoadedOrigins,
    processors: Vec<Box<dyn ContextProcessor>>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("options", &self.options)
            .field("loader", &self.loader)
            .field("filter", &self.filter)
            .field("helpers_loaded", &self.helpers_loaded())
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Returns a new [`EnvironmentBuilder`].
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    /// Builds an environment from settings and the installed applications.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::ImproperlyConfigured`] for failing system
    /// checks or invalid engine options.
    pub fn from_settings(settings: &Settings, apps: &AppRegistry) -> JingoResult<Self> {
        EnvironmentBuilder::from_settings(settings, apps)?.build()
    }

    /// Returns the resolved engine options.
    pub const fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Returns the loader chain.
    pub fn loader(&self) -> &ChoiceLoader {
        &self.loader
    }

    /// Returns the inclusion filter used by [`JingoLoader`](crate::loaders::JingoLoader).
    pub const fn inclusion_filter(&self) -> &InclusionFilter {
        &self.filter
    }

    /// Returns the registration handle for this environment.
    pub const fn register(&self) -> Register<'_> {
        Register::new(self)
    }

    /// Returns `true` if a filter named `name` is registered.
    pub fn has_filter(&self, name: &str) -> bool {
        self.state.read().expect("engine lock poisoned").filters.contains(name)
    }

    /// Returns `true` if a global function or value named `name` is registered.
    pub fn has_global(&self, name: &str) -> bool {
        self.state.read().expect("engine lock poisoned").globals.contains(name)
    }

    /// Returns `true` once the built-in and application helpers are installed.
    pub fn helpers_loaded(&self) -> bool {
        self.helpers_once.is_completed()
    }

    /// Resolves `name` and compiles it.
    ///
    /// The inclusion filter is not consulted here; use
    /// [`JingoLoader`](crate::loaders::JingoLoader) for host-facing lookups.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::TemplateDoesNotExist`] if no loader has the
    /// name, or [`JingoError::TemplateSyntaxError`] if it does not compile.
    pub fn get_template(&self, name: &str) -> JingoResult<Template<'_>> {
        self.ensure_helpers();
        let (origin, _) = self.loader.resolve(name)?;

        if self.options.auto_reload {
            self.refresh_if_changed();
        }

        self.engine().get_template(name).map_err(engine_error)?;
        Ok(Template {
            env: self,
            name: name.to_string(),
            kind: TemplateKind::File(origin),
        })
    }

    /// Compiles `source` as an unnamed template.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::TemplateSyntaxError`] if it does not compile.
    pub fn from_string(&self, source: &str) -> JingoResult<Template<'_>> {
        self.ensure_helpers();
        if self.options.auto_reload {
            self.refresh_if_changed();
        }
        minijinja::Environment::new()
            .template_from_str(source)
            .map(|_| ())
            .map_err(engine_error)?;
        Ok(Template {
            env: self,
            name: INLINE_TEMPLATE_NAME.to_string(),
            kind: TemplateKind::Inline(source.to_string()),
        })
    }

    /// Renders a template with the request's context processors applied.
    ///
    /// The flat context starts empty; each context processor's output is
    /// merged in order, then `context` is merged last so caller values win.
    /// Without a request no processors run.
    ///
    /// # Errors
    ///
    /// Propagates lookup, syntax and render failures.
    pub fn render_to_string<'t, 'env: 't>(
        &self,
        request: Option<&HttpRequest>,
        template: impl Into<TemplateSource<'t, 'env>>,
        context: impl Into<RenderContext>,
    ) -> JingoResult<String> {
        let mut flat = HashMap::new();
        if let Some(request) = request {
            for processor in &self.processors {
                flat.extend(processor.process(request));
            }
        }
        flat.extend(context.into().flatten());

        match template.into() {
            TemplateSource::Name(name) => self.get_template(name)?.render(flat),
            TemplateSource::Template(template) => template.render(flat),
        }
    }

    fn ensure_helpers(&self) {
        self.helpers_once.call_once(|| {
            let register = self.register();
            let builtins_at = self
                .app_labels
                .iter()
                .position(|label| label == BUILTIN_HELPERS_LABEL);
            if builtins_at.is_none() {
                self.install_builtins(&register);
            }

            for (index, label) in self.app_labels.iter().enumerate() {
                if builtins_at == Some(index) {
                    self.install_builtins(&register);
                }
                for (_, module) in self.helper_modules.iter().filter(|(l, _)| l == label) {
                    tracing::debug!(app = %label, "loading helpers");
                    module.register(&register);
                }
            }

            for (label, _) in &self.helper_modules {
                if !self.app_labels.contains(label) {
                    tracing::debug!(app = %label, "skipping helpers of an app that is not installed");
                }
            }
        });
    }

    fn install_builtins(&self, register: &Register<'_>) {
        if self.options.has_extension("jingo") {
            helpers::install(register, self.url_reverser.clone());
        }
        if self.options.has_extension("i18n") {
            i18n::install(register, Arc::clone(&self.translations));
        }
    }

    /// Drops every compiled template if any source the engine has read
    /// (including parents and includes) has changed, moved or gone.
    fn refresh_if_changed(&self) {
        let stale = {
            let mut loaded = self.loaded.lock().expect("loaded origins lock poisoned");
            let stale = loaded
                .iter()
                .find(|(name, origin)| self.loader.find(name).as_ref() != Some(*origin))
                .map(|(name, _)| name.clone());
            if stale.is_some() {
                loaded.clear();
            }
            stale
        };

        if let Some(name) = stale {
            tracing::debug!(template = %name, "template changed on disk; clearing cache");
            let mut state = self.state.write().expect("engine lock poisoned");
            Arc::make_mut(&mut state.engine).clear_templates();
        }
    }

    pub(crate) fn engine(&self) -> Arc<minijinja::Environment<'static>> {
        Arc::clone(&self.state.read().expect("engine lock poisoned").engine)
    }

    pub(crate) fn install_filter(&self, name: &str, helper: Helper, replace: bool) -> bool {
        let mut state = self.state.write().expect("engine lock poisoned");
        if !replace && state.filters.contains(name) {
            tracing::debug!(filter = name, "keeping existing filter");
            return false;
        }
        Arc::make_mut(&mut state.engine).add_filter(
            name.to_string(),
            move |state: &State<'_, '_>, args: Rest<Value>| helper(state, &args.0),
        );
        state.filters.insert(name.to_string());
        true
    }

    pub(crate) fn install_function(&self, name: &str, helper: Helper, replace: bool) -> bool {
        let mut state = self.state.write().expect("engine lock poisoned");
        if !replace && state.globals.contains(name) {
            tracing::debug!(function = name, "keeping existing global");
            return false;
        }
        Arc::make_mut(&mut state.engine).add_function(
            name.to_string(),
            move |state: &State<'_, '_>, args: Rest<Value>| helper(state, &args.0),
        );
        state.globals.insert(name.to_string());
        true
    }

    pub(crate) fn install_global(&self, name: &str, value: Value, replace: bool) -> bool {
        let mut state = self.state.write().expect("engine lock poisoned");
        if !replace && state.globals.contains(name) {
            tracing::debug!(global = name, "keeping existing global");
            return false;
        }
        Arc::make_mut(&mut state.engine).add_global(name.to_string(), value);
        state.globals.insert(name.to_string());
        true
    }
}

fn engine_error(err: minijinja::Error) -> JingoError {
    match err.kind() {
        ErrorKind::TemplateNotFound => JingoError::TemplateDoesNotExist(err.to_string()),
        ErrorKind::SyntaxError => JingoError::TemplateSyntaxError(err.to_string()),
        _ => JingoError::RenderError(err.to_string()),
    }
}

// ============================================================
// Templates
// ============================================================

/// What a [`Template`] renders from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateKind {
    /// A template resolved through the loader chain.
    File(Origin),
    /// Source given directly to [`Environment::from_string`].
    Inline(String),
}

/// A compiled template bound to its environment.
#[derive(Clone)]
pub struct Template<'env> {
    env: &'env Environment,
    name: String,
    kind: TemplateKind,
}

impl fmt::Debug for Template<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Two handles are equal when they come from the same environment and
/// name the same source with the same modification time.
impl PartialEq for Template<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.env, other.env) && self.name == other.name && self.kind == other.kind
    }
}

impl<'env> Template<'env> {
    /// Returns the template name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns where the source came from, for loaded templates.
    pub const fn origin(&self) -> Option<&Origin> {
        match &self.kind {
            TemplateKind::File(origin) => Some(origin),
            TemplateKind::Inline(_) => None,
        }
    }

    /// Returns the source file path, for file-backed templates.
    pub fn filename(&self) -> Option<&Path> {
        self.origin().and_then(Origin::path)
    }

    /// Returns the environment this template belongs to.
    pub const fn environment(&self) -> &'env Environment {
        self.env
    }

    /// Renders the template. A layered context is flattened first.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::RenderError`] if rendering fails.
    pub fn render(&self, context: impl Into<RenderContext>) -> JingoResult<String> {
        let flat = context.into().flatten();
        let span = render_span(&self.name);
        let _guard = span.enter();

        let value = context_to_value(&flat);
        let engine = self.env.engine();
        let output = match &self.kind {
            TemplateKind::File(_) => engine
                .get_template(&self.name)
                .and_then(|template| template.render(value)),
            TemplateKind::Inline(source) => engine.render_named_str(&self.name, source, value),
        }
        .map_err(|err| {
            tracing::warn!(error = %err, "render failed");
            engine_error(err)
        })?;

        tracing::debug!(bytes = output.len(), "rendered");
        if self.env.template_debug {
            let mut context_keys: Vec<String> = flat.into_keys().collect();
            context_keys.sort();
            TEMPLATE_RENDERED.send(&TemplateRendered {
                name: self.name.clone(),
                origin: self.origin().map(ToString::to_string),
                context_keys,
            });
        }
        Ok(output)
    }

    /// Renders the template and returns the output as markup.
    ///
    /// # Errors
    ///
    /// Same as [`render`](Self::render).
    pub fn render_markup(&self, context: impl Into<RenderContext>) -> JingoResult<ContextValue> {
        self.render(context).map(ContextValue::SafeString)
    }
}

/// A template given by name or as an already loaded handle.
#[derive(Debug, Clone, Copy)]
pub enum TemplateSource<'t, 'env> {
    /// Resolve this name first.
    Name(&'t str),
    /// Render this handle.
    Template(&'t Template<'env>),
}

impl<'t, 'env> From<&'t str> for TemplateSource<'t, 'env> {
    fn from(name: &'t str) -> Self {
        Self::Name(name)
    }
}

impl<'t, 'env> From<&'t String> for TemplateSource<'t, 'env> {
    fn from(name: &'t String) -> Self {
        Self::Name(name)
    }
}

impl<'t, 'env> From<&'t Template<'env>> for TemplateSource<'t, 'env> {
    fn from(template: &'t Template<'env>) -> Self {
        Self::Template(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loaders::StringLoader;

    fn env_with(templates: &[(&str, &str)]) -> Environment {
        let loader = StringLoader::new();
        for (name, source) in templates {
            loader.add(*name, *source);
        }
        Environment::builder().loader(Box::new(loader)).build().unwrap()
    }

    #[test]
    fn test_default_options() {
        let options = EngineOptions::defaults(true);
        assert!(options.trim_blocks);
        assert!(!options.lstrip_blocks);
        assert!(options.autoescape);
        assert!(options.auto_reload);
        assert!(options.has_extension("i18n"));
        assert!(options.has_extension("jingo"));
    }

    #[test]
    fn test_options_overrides_merge_in_order() {
        let options = EngineOptions::resolve(
            false,
            vec![
                serde_json::json!({"trim_blocks": false, "autoescape": false}),
                serde_json::json!({"autoescape": true}),
            ],
        )
        .unwrap();
        assert!(!options.trim_blocks);
        assert!(options.autoescape);
        assert!(!options.auto_reload);
    }

    #[test]
    fn test_options_reject_bad_overrides() {
        for bad in [
            serde_json::json!({"no_such_option": 1}),
            serde_json::json!({"trim_blocks": "yes"}),
            serde_json::json!({"extensions": ["jinja2.ext.cache"]}),
            serde_json::json!(["trim_blocks"]),
        ] {
            let err = EngineOptions::resolve(false, vec![bad]).unwrap_err();
            assert!(err.is_configuration(), "{err}");
        }
    }

    #[test]
    fn test_options_accept_dotted_extension_names() {
        let options =
            EngineOptions::resolve(false, vec![serde_json::json!({"extensions": ["jinja2.ext.i18n"]})])
                .unwrap();
        assert!(options.has_extension("i18n"));
        assert!(!options.has_extension("jingo"));
    }

    #[test]
    fn test_options_callable_wins_over_static_config() {
        let env = Environment::builder()
            .jinja_config(serde_json::json!({"autoescape": false}))
            .options(|| serde_json::json!({"autoescape": true}))
            .build()
            .unwrap();
        assert!(env.options().autoescape);
    }

    #[test]
    fn test_get_template_and_render() {
        let env = env_with(&[("a.html", "{{ x }}")]);
        let template = env.get_template("a.html").unwrap();
        assert_eq!(template.name(), "a.html");
        assert!(template.filename().is_none());
        assert_eq!(template.render([("x", ContextValue::from("<b>"))]).unwrap(), "&lt;b&gt;");
    }

    #[test]
    fn test_get_template_missing() {
        let env = env_with(&[]);
        let err = env.get_template("missing.html").unwrap_err();
        assert!(err.is_does_not_exist());
    }

    #[test]
    fn test_syntax_errors_surface_at_load() {
        let env = env_with(&[("bad.html", "{% if %}")]);
        assert!(matches!(
            env.get_template("bad.html"),
            Err(JingoError::TemplateSyntaxError(_))
        ));
        assert!(matches!(
            env.from_string("{{ unclosed"),
            Err(JingoError::TemplateSyntaxError(_))
        ));
    }

    #[test]
    fn test_render_errors() {
        let env = env_with(&[]);
        let template = env.from_string("{{ nope() }}").unwrap();
        assert!(matches!(template.render(()), Err(JingoError::RenderError(_))));
    }

    #[test]
    fn test_autoescape_and_safe_values() {
        let env = env_with(&[]);
        let template = env.from_string("{{ a }}|{{ b }}").unwrap();
        let out = template
            .render([
                ("a", ContextValue::from("<i>")),
                ("b", ContextValue::SafeString("<i>".into())),
            ])
            .unwrap();
        assert_eq!(out, "&lt;i&gt;|<i>");
    }

    #[test]
    fn test_autoescape_off() {
        let env = Environment::builder()
            .jinja_config(serde_json::json!({"autoescape": false}))
            .build()
            .unwrap();
        let out = env.from_string("{{ a }}").unwrap().render([("a", ContextValue::from("<i>"))]);
        assert_eq!(out.unwrap(), "<i>");
    }

    #[test]
    fn test_trim_blocks() {
        let env = env_with(&[]);
        let out = env.from_string("{% if true %}\nyes\n{% endif %}\n").unwrap().render(()).unwrap();
        assert_eq!(out, "yes\n");
    }

    #[test]
    fn test_extends_and_include_use_loader_chain() {
        let env = env_with(&[
            ("base.html", "<{% block body %}{% endblock %}>"),
            ("part.html", "part"),
            ("child.html", "{% extends 'base.html' %}{% block body %}{% include 'part.html' %}{% endblock %}"),
        ]);
        let out = env.get_template("child.html").unwrap().render(()).unwrap();
        assert_eq!(out, "<part>");
    }

    #[test]
    fn test_render_markup_is_safe() {
        let env = env_with(&[]);
        let value = env.from_string("<p>hi</p>").unwrap().render_markup(()).unwrap();
        assert!(value.is_safe());
    }

    #[test]
    fn test_template_equality() {
        let env = env_with(&[("a.html", "a"), ("b.html", "b")]);
        assert_eq!(env.get_template("a.html").unwrap(), env.get_template("a.html").unwrap());
        assert_ne!(env.get_template("a.html").unwrap(), env.get_template("b.html").unwrap());
    }

    #[test]
    fn test_render_to_string_context_wins_over_processors() {
        let env = Environment::builder()
            .context_processor(Box::new(context_processors::StaticContextProcessor::new("/s/")))
            .context_processor(Box::new(context_processors::CsrfContextProcessor))
            .build()
            .unwrap();
        let template = env.from_string("{{ STATIC_URL }}{{ csrf_token }}").unwrap();
        let request = HttpRequest::builder().cookie("csrftoken", "tok").build();

        let out = env
            .render_to_string(Some(&request), &template, [("STATIC_URL", ContextValue::from("cdn"))])
            .unwrap();
        assert_eq!(out, "cdntok");

        let out = env.render_to_string(None, &template, ()).unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn test_has_filter_and_global() {
        let env = env_with(&[]);
        assert!(env.has_filter("upper"));
        assert!(!env.has_filter("fe"));

        env.from_string("").unwrap();
        assert!(env.has_filter("fe"));
        assert!(env.has_global("csrf"));
        assert!(env.has_global("_"));
        assert!(!env.has_filter("nope"));
    }

    #[test]
    fn test_extensions_can_be_disabled() {
        let env = Environment::builder()
            .jinja_config(serde_json::json!({"extensions": []}))
            .build()
            .unwrap();
        env.from_string("").unwrap();
        assert!(!env.has_filter("fe"));
        assert!(!env.has_global("gettext"));
        assert!(env.has_filter("escape"));
    }

    #[test]
    fn test_escape_filters_keep_markup() {
        let env = env_with(&[]);
        let template = env
            .from_string("{{ s|e }}|{{ s|escape }}|{{ s|string }}|{{ u|e }}|{{ u|string }}")
            .unwrap();
        let out = template
            .render([
                ("s", ContextValue::SafeString("<b>".into())),
                ("u", ContextValue::from("<i>")),
            ])
            .unwrap();
        assert_eq!(out, "<b>|<b>|<b>|&lt;i&gt;|&lt;i&gt;");
    }

    #[test]
    fn test_mixed_concatenation_goes_through_fe() {
        let env = env_with(&[]);
        let out = env
            .from_string("{{ '{0}{1}'|fe(s, u) }}")
            .unwrap()
            .render([
                ("s", ContextValue::SafeString("<b>".into())),
                ("u", ContextValue::from("<i>")),
            ])
            .unwrap();
        assert_eq!(out, "<b>&lt;i&gt;");
    }

    #[test]
    fn test_app_helpers_run_in_app_order_around_builtins() {
        let mut apps = AppRegistry::new();
        apps.register(Arc::new(jingo_core::apps::SimpleAppConfig::new("shop"))).unwrap();
        apps.register(Arc::new(jingo_core::apps::SimpleAppConfig::new("jingo"))).unwrap();
        let env = Environment::builder()
            .apps(apps)
            .helpers("shop", |register: &Register<'_>| {
                register
                    .register_function("url", |_, _| Ok(Value::from("/shop-url/")))
                    .register_filter("nl2br", |_, _| Ok(Value::from("shop")));
            })
            .build()
            .unwrap();

        // The built-in `url` keeps an earlier registration; other built-ins replace.
        let out = env.from_string("{{ url('x') }}|{{ 'a'|nl2br }}").unwrap().render(()).unwrap();
        assert_eq!(out, "/shop-url/|a");
    }

    #[test]
    fn test_app_helpers_override_builtins_without_jingo_app() {
        let mut apps = AppRegistry::new();
        apps.register(Arc::new(jingo_core::apps::SimpleAppConfig::new("shop"))).unwrap();
        let env = Environment::builder()
            .apps(apps)
            .helpers("shop", |register: &Register<'_>| {
                register.register_filter("nl2br", |_, _| Ok(Value::from("shop")));
            })
            .build()
            .unwrap();
        let out = env.from_string("{{ 'a'|nl2br }}").unwrap().render(()).unwrap();
        assert_eq!(out, "shop");
    }

    #[test]
    fn test_from_settings_rejects_bad_pattern() {
        let mut settings = Settings::default();
        settings.jingo_include_pattern = Some("(".to_string());
        let err = Environment::from_settings(&settings, &AppRegistry::new()).unwrap_err();
        assert!(err.is_configuration());
    }
}
