//! Application registry.
//!
//! This module provides the [`AppConfig`] trait and [`AppRegistry`]. The
//! registry's order is significant: application template directories are
//! searched, and application helper modules are loaded, in registration order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{JingoError, JingoResult};
use crate::settings::Settings;

/// Name of the subdirectory inside an application package that holds its
/// templates.
pub const TEMPLATES_SUBDIR: &str = "templates";

/// Configuration for an installed application.
///
/// # Examples
///
/// ```
/// use jingo_core::apps::AppConfig;
///
/// struct Shop;
///
/// impl AppConfig for Shop {
///     fn name(&self) -> &str { "project.shop" }
/// }
///
/// assert_eq!(Shop.label(), "shop");
/// assert!(Shop.templates_dir().is_none());
/// ```
pub trait AppConfig: Send + Sync {
    /// Returns the full dotted path of the application.
    fn name(&self) -> &str;

    /// Returns a short label derived from the name (the last component).
    fn label(&self) -> &str {
        self.name().rsplit('.').next().unwrap_or_else(|| self.name())
    }

    /// Returns the application's package directory, if it has one on disk.
    fn path(&self) -> Option<&Path> {
        None
    }

    /// Returns the directory searched for this application's templates.
    fn templates_dir(&self) -> Option<PathBuf> {
        self.path().map(|p| p.join(TEMPLATES_SUBDIR))
    }
}

/// An [`AppConfig`] built from a dotted name and an optional directory.
#[derive(Debug, Clone)]
pub struct SimpleAppConfig {
    name: String,
    path: Option<PathBuf>,
}

impl SimpleAppConfig {
    /// Creates an application with no package directory.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }

    /// Sets the application's package directory.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl AppConfig for SimpleAppConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// The central registry of installed applications.
///
/// Labels are unique; the order of registration is the search order.
#[derive(Clone, Default)]
pub struct AppRegistry {
    apps: Vec<Arc<dyn AppConfig>>,
    app_labels: HashMap<String, usize>,
}

impl std::fmt::Debug for AppRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRegistry")
            .field("apps", &self.apps.iter().map(|a| a.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl AppRegistry {
    /// Creates a new, empty `AppRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from `settings.installed_apps`.
    ///
    /// Each dotted name is located at `base_dir/<name with dots as path
    /// separators>`. Missing directories are allowed; such apps simply
    /// contribute no templates.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::ImproperlyConfigured`] if two installed apps
    /// share a label.
    pub fn from_settings(settings: &Settings) -> JingoResult<Self> {
        let mut registry = Self::new();
        for name in &settings.installed_apps {
            let relative: PathBuf = name.split('.').collect();
            let app = SimpleAppConfig::new(name.clone()).with_path(settings.base_dir.join(relative));
            registry.register(Arc::new(app))?;
        }
        Ok(registry)
    }

    /// Registers an application.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::ImproperlyConfigured`] if an application with
    /// the same label is already registered.
    pub fn register(&mut self, app: Arc<dyn AppConfig>) -> JingoResult<()> {
        let label = app.label().to_string();
        if let Some(&existing) = self.app_labels.get(&label) {
            return Err(JingoError::ImproperlyConfigured(format!(
                "Application labels aren't unique, duplicates: {label} ({} and {})",
                self.apps[existing].name(),
                app.name()
            )));
        }

        let index = self.apps.len();
        self.app_labels.insert(label, index);
        self.apps.push(app);
        Ok(())
    }

    /// Returns the configuration for the app with the given label, if registered.
    pub fn get_app_config(&self, label: &str) -> Option<&dyn AppConfig> {
        self.app_labels
            .get(label)
            .map(|&idx| self.apps[idx].as_ref())
    }

    /// Returns all registered app configurations in registration order.
    pub fn get_app_configs(&self) -> &[Arc<dyn AppConfig>] {
        &self.apps
    }

    /// Returns `true` if an app with the given label is registered.
    pub fn is_installed(&self, label: &str) -> bool {
        self.app_labels.contains_key(label)
    }
}
