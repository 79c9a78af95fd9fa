//! Settings for jingo.
//!
//! This module provides the [`Settings`] struct, which holds everything the
//! bridge reads from the host project, and [`LazySettings`], a globally
//! accessible, lazily-initialized settings instance.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Top-level namespaces that keep using the host's native templates unless
/// the project overrides `jingo_exclude_apps`.
pub const EXCLUDE_APPS: &[&str] = &["admin", "admindocs", "registration", "context_processors"];

/// Context processors enabled when a project does not list its own.
pub const DEFAULT_CONTEXT_PROCESSORS: &[&str] = &["debug", "static", "media", "csrf", "request"];

/// The complete set of settings consumed by the bridge.
///
/// # Examples
///
/// ```
/// use jingo_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(settings.debug);
/// assert!(settings.jingo_exclude_apps.contains(&"admin".to_string()));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // ── Core ─────────────────────────────────────────────────────────

    /// Whether debug mode is enabled. Also the default for auto-reload.
    pub debug: bool,
    /// Whether renders are reported through the template-rendered signal.
    pub template_debug: bool,
    /// Project root; installed apps are located relative to it.
    pub base_dir: PathBuf,
    /// Installed application dotted paths, in registration order.
    pub installed_apps: Vec<String>,

    // ── Templates ────────────────────────────────────────────────────

    /// Directories searched before any application directory.
    pub template_dirs: Vec<PathBuf>,
    /// Only template names matching this pattern are handled by jingo.
    pub jingo_include_pattern: Option<String>,
    /// Top-level namespaces that jingo refuses to handle.
    pub jingo_exclude_apps: Vec<String>,
    /// Engine option overrides merged over the defaults.
    pub jinja_config: Option<serde_json::Value>,
    /// Names of the context processors applied by `render_to_string`.
    pub template_context_processors: Vec<String>,

    // ── Static files / media ─────────────────────────────────────────

    /// URL prefix for static files.
    pub static_url: String,
    /// URL prefix for user-uploaded media files.
    pub media_url: String,

    // ── Internationalization ─────────────────────────────────────────

    /// Whether the translation catalog backs the i18n helpers.
    pub use_i18n: bool,
    /// The default language code (e.g. "en-us").
    pub language_code: String,

    // ── Logging ──────────────────────────────────────────────────────

    /// The log level (e.g. "info", "debug", "warn").
    pub log_level: String,

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Custom settings that don't fit into the above categories.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Core
            debug: true,
            template_debug: false,
            base_dir: PathBuf::from("."),
            installed_apps: Vec::new(),

            // Templates
            template_dirs: Vec::new(),
            jingo_include_pattern: None,
            jingo_exclude_apps: EXCLUDE_APPS.iter().map(ToString::to_string).collect(),
            jinja_config: None,
            template_context_processors: DEFAULT_CONTEXT_PROCESSORS
                .iter()
                .map(ToString::to_string)
                .collect(),

            // Static files / media
            static_url: "/static/".to_string(),
            media_url: "/media/".to_string(),

            // Internationalization
            use_i18n: true,
            language_code: "en-us".to_string(),

            // Logging
            log_level: "info".to_string(),

            // Extra
            extra: HashMap::new(),
        }
    }
}

/// A lazily-initialized, globally-accessible settings container.
///
/// Call [`configure`](LazySettings::configure) once at startup to set the
/// settings, then use [`get`](LazySettings::get) to access them.
///
/// # Panics
///
/// [`get`](LazySettings::get) panics if settings have not been configured.
/// [`configure`](LazySettings::configure) panics if called more than once.
pub struct LazySettings {
    inner: OnceLock<Settings>,
}

impl Default for LazySettings {
    fn default() -> Self {
        Self::new()
    }
}

impl LazySettings {
    /// Creates a new, unconfigured `LazySettings`.
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    /// Configures the global settings. Must be called exactly once.
    ///
    /// # Panics
    ///
    /// Panics if settings have already been configured.
    pub fn configure(&self, settings: Settings) {
        self.inner
            .set(settings)
            .expect("Settings have already been configured");
    }

    /// Returns a reference to the configured settings.
    ///
    /// # Panics
    ///
    /// Panics if settings have not been configured.
    pub fn get(&self) -> &Settings {
        self.inner
            .get()
            .expect("Settings have not been configured. Call SETTINGS.configure() first.")
    }

    /// Returns the settings if they have been configured.
    pub fn try_get(&self) -> Option<&Settings> {
        self.inner.get()
    }

    /// Returns `true` if settings have been configured.
    pub fn is_configured(&self) -> bool {
        self.inner.get().is_some()
    }
}

/// The global settings instance.
///
/// Call `SETTINGS.configure(settings)` once at application startup, then
/// access settings via `SETTINGS.get()` anywhere.
pub static SETTINGS: LazySettings = LazySettings::new();
