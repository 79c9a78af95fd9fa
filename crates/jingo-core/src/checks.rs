//! System checks for jingo configuration.
//!
//! Checks run against [`Settings`] before an environment is built. Messages
//! at [`CheckLevel::Error`] or above abort environment construction.
//!
//! ## Built-in checks
//!
//! | Id | Level | Condition |
//! |---|---|---|
//! | `jingo.E001` | Error | `jingo_include_pattern` does not compile |
//! | `jingo.E002` | Error | `jinja_config` is not a mapping of known engine options |
//! | `jingo.W001` | Warning | a `template_dirs` entry does not exist |
//! | `jingo.I001` | Info | an excluded namespace is not an installed app label |
//!
//! ## Examples
//!
//! ```
//! use jingo_core::checks::{CheckMessage, CheckRegistry};
//!
//! let mut registry = CheckRegistry::new();
//! registry.register(
//!     |_settings| {
//!         vec![CheckMessage::warning(
//!             "Custom check warning",
//!             Some("Consider fixing this."),
//!             None,
//!             Some("myapp.W001"),
//!         )]
//!     },
//!     &["myapp"],
//! );
//!
//! let settings = jingo_core::settings::Settings::default();
//! let messages = registry.run_checks(None, &settings);
//! assert!(!messages.is_empty());
//! ```

use crate::settings::Settings;

/// Keys accepted in the `jinja_config` override mapping.
pub const ENGINE_OPTION_KEYS: &[&str] = &[
    "trim_blocks",
    "lstrip_blocks",
    "keep_trailing_newline",
    "autoescape",
    "auto_reload",
    "extensions",
];

/// Severity level for a check message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckLevel {
    /// Debugging information.
    Debug = 0,
    /// Informational message.
    Info = 1,
    /// A potential problem.
    Warning = 2,
    /// A definite problem that should be fixed.
    Error = 3,
    /// A critical error that prevents the bridge from running.
    Critical = 4,
}

impl std::fmt::Display for CheckLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A diagnostic message produced by a system check.
#[derive(Debug, Clone)]
pub struct CheckMessage {
    /// The severity level.
    pub level: CheckLevel,
    /// The human-readable message describing the issue.
    pub msg: String,
    /// An optional hint on how to fix the issue.
    pub hint: Option<String>,
    /// The setting that has the issue.
    pub obj: Option<String>,
    /// A unique identifier for this check message (e.g. "jingo.E001").
    pub id: Option<String>,
}

impl CheckMessage {
    /// Creates a new `CheckMessage` with the given level and details.
    pub fn new(
        level: CheckLevel,
        msg: impl Into<String>,
        hint: Option<&str>,
        obj: Option<&str>,
        id: Option<&str>,
    ) -> Self {
        Self {
            level,
            msg: msg.into(),
            hint: hint.map(String::from),
            obj: obj.map(String::from),
            id: id.map(String::from),
        }
    }

    /// Creates an info-level message.
    pub fn info(msg: impl Into<String>, hint: Option<&str>, obj: Option<&str>, id: Option<&str>) -> Self {
        Self::new(CheckLevel::Info, msg, hint, obj, id)
    }

    /// Creates a warning-level message.
    pub fn warning(msg: impl Into<String>, hint: Option<&str>, obj: Option<&str>, id: Option<&str>) -> Self {
        Self::new(CheckLevel::Warning, msg, hint, obj, id)
    }

    /// Creates an error-level message.
    pub fn error(msg: impl Into<String>, hint: Option<&str>, obj: Option<&str>, id: Option<&str>) -> Self {
        Self::new(CheckLevel::Error, msg, hint, obj, id)
    }

    /// Creates a critical-level message.
    pub fn critical(msg: impl Into<String>, hint: Option<&str>, obj: Option<&str>, id: Option<&str>) -> Self {
        Self::new(CheckLevel::Critical, msg, hint, obj, id)
    }

    /// Returns `true` if this is a warning or higher severity.
    pub fn is_serious(&self) -> bool {
        self.level >= CheckLevel::Warning
    }

    /// Returns `true` if this message must stop environment construction.
    pub fn is_fatal(&self) -> bool {
        self.level >= CheckLevel::Error
    }
}

impl std::fmt::Display for CheckMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.id {
            write!(f, "({id}) ")?;
        }
        write!(f, "{}: {}", self.level, self.msg)?;
        if let Some(ref hint) = self.hint {
            write!(f, "\n\tHINT: {hint}")?;
        }
        if let Some(ref obj) = self.obj {
            write!(f, "\n\tObject: {obj}")?;
        }
        Ok(())
    }
}

/// A check function that receives settings and returns diagnostic messages.
pub type CheckFn = fn(&Settings) -> Vec<CheckMessage>;

struct RegisteredCheck {
    func: CheckFn,
    tags: Vec<String>,
}

/// Registry for system check functions.
pub struct CheckRegistry {
    checks: Vec<RegisteredCheck>,
}

impl CheckRegistry {
    /// Creates a new empty check registry.
    pub const fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// Creates a new check registry pre-loaded with the jingo checks.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(check_include_pattern, &["templates"]);
        registry.register(check_jinja_config, &["templates"]);
        registry.register(check_template_dirs, &["templates"]);
        registry.register(check_exclude_apps, &["templates", "apps"]);
        registry
    }

    /// Registers a check function with the given tags.
    pub fn register(&mut self, func: CheckFn, tags: &[&str]) {
        self.checks.push(RegisteredCheck {
            func,
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
        });
    }

    /// Runs all registered checks (or only those matching the given tags)
    /// and collects all resulting messages.
    pub fn run_checks(&self, tags: Option<&[&str]>, settings: &Settings) -> Vec<CheckMessage> {
        let mut messages = Vec::new();

        for check in &self.checks {
            let should_run = tags.map_or(true, |filter_tags| {
                filter_tags.iter().any(|t| check.tags.iter().any(|c| c.as_str() == *t))
            });

            if should_run {
                messages.extend((check.func)(settings));
            }
        }

        messages
    }

    /// Returns the number of registered checks.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Returns `true` if no checks are registered.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// Built-in checks
// ============================================================

fn check_include_pattern(settings: &Settings) -> Vec<CheckMessage> {
    let Some(pattern) = settings.jingo_include_pattern.as_deref() else {
        return Vec::new();
    };

    match regex::Regex::new(pattern) {
        Ok(_) => Vec::new(),
        Err(e) => vec![CheckMessage::error(
            format!("JINGO_INCLUDE_PATTERN '{pattern}' is not a valid regular expression: {e}"),
            Some("Fix the pattern or remove it to make every template eligible."),
            Some("settings.jingo_include_pattern"),
            Some("jingo.E001"),
        )],
    }
}

fn check_jinja_config(settings: &Settings) -> Vec<CheckMessage> {
    let Some(config) = settings.jinja_config.as_ref() else {
        return Vec::new();
    };

    let Some(map) = config.as_object() else {
        return vec![CheckMessage::error(
            "JINJA_CONFIG must be a mapping of engine options.",
            None,
            Some("settings.jinja_config"),
            Some("jingo.E002"),
        )];
    };

    map.keys()
        .filter(|key| !ENGINE_OPTION_KEYS.contains(&key.as_str()))
        .map(|key| {
            CheckMessage::error(
                format!("JINJA_CONFIG contains unknown engine option '{key}'."),
                Some(&format!("Known options: {}.", ENGINE_OPTION_KEYS.join(", "))),
                Some("settings.jinja_config"),
                Some("jingo.E002"),
            )
        })
        .collect()
}

fn check_template_dirs(settings: &Settings) -> Vec<CheckMessage> {
    settings
        .template_dirs
        .iter()
        .filter(|dir| !dir.is_dir())
        .map(|dir| {
            CheckMessage::warning(
                format!("Template directory '{}' does not exist.", dir.display()),
                None,
                Some("settings.template_dirs"),
                Some("jingo.W001"),
            )
        })
        .collect()
}

fn check_exclude_apps(settings: &Settings) -> Vec<CheckMessage> {
    let labels: Vec<&str> = settings
        .installed_apps
        .iter()
        .map(|name| name.rsplit('.').next().unwrap_or(name.as_str()))
        .collect();

    settings
        .jingo_exclude_apps
        .iter()
        .filter(|ns| !labels.contains(&ns.as_str()))
        .map(|ns| {
            CheckMessage::info(
                format!("Excluded namespace '{ns}' is not an installed app label."),
                Some("It still blocks template names that start with it."),
                Some("settings.jingo_exclude_apps"),
                Some("jingo.I001"),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(messages: &[CheckMessage]) -> Vec<&str> {
        messages.iter().filter_map(|m| m.id.as_deref()).collect()
    }

    #[test]
    fn test_check_level_ordering() {
        assert!(CheckLevel::Info < CheckLevel::Warning);
        assert!(CheckLevel::Warning < CheckLevel::Error);
        assert!(CheckLevel::Error < CheckLevel::Critical);
    }

    #[test]
    fn test_check_message_display() {
        let msg = CheckMessage::error(
            "Something is wrong",
            Some("Fix it"),
            Some("settings.foo"),
            Some("jingo.E999"),
        );
        let display = msg.to_string();
        assert!(display.contains("(jingo.E999)"));
        assert!(display.contains("ERROR: Something is wrong"));
        assert!(display.contains("HINT: Fix it"));
        assert!(display.contains("Object: settings.foo"));
    }

    #[test]
    fn test_is_serious_and_fatal() {
        let info = CheckMessage::info("i", None, None, None);
        let warning = CheckMessage::warning("w", None, None, None);
        let error = CheckMessage::error("e", None, None, None);
        assert!(!info.is_serious());
        assert!(warning.is_serious() && !warning.is_fatal());
        assert!(error.is_fatal());
        assert!(CheckMessage::critical("c", None, None, None).is_fatal());
    }

    #[test]
    fn test_invalid_include_pattern() {
        let mut settings = Settings::default();
        settings.jingo_include_pattern = Some("(unclosed".to_string());
        let messages = check_include_pattern(&settings);
        assert_eq!(ids(&messages), vec!["jingo.E001"]);
        assert!(messages[0].is_fatal());
    }

    #[test]
    fn test_valid_include_pattern() {
        let mut settings = Settings::default();
        settings.jingo_include_pattern = Some(r"\.jinja$".to_string());
        assert!(check_include_pattern(&settings).is_empty());
    }

    #[test]
    fn test_jinja_config_not_a_mapping() {
        let mut settings = Settings::default();
        settings.jinja_config = Some(serde_json::json!(["trim_blocks"]));
        assert_eq!(ids(&check_jinja_config(&settings)), vec!["jingo.E002"]);
    }

    #[test]
    fn test_jinja_config_unknown_key() {
        let mut settings = Settings::default();
        settings.jinja_config = Some(serde_json::json!({"trim_blocks": true, "bytecode_cache": 1}));
        let messages = check_jinja_config(&settings);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].msg.contains("bytecode_cache"));
    }

    #[test]
    fn test_jinja_config_known_keys() {
        let mut settings = Settings::default();
        settings.jinja_config = Some(serde_json::json!({"autoescape": false, "extensions": []}));
        assert!(check_jinja_config(&settings).is_empty());
    }

    #[test]
    fn test_missing_template_dir_warns() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.template_dirs = vec![dir.path().to_path_buf(), dir.path().join("missing")];
        let messages = check_template_dirs(&settings);
        assert_eq!(ids(&messages), vec!["jingo.W001"]);
        assert!(messages[0].msg.contains("missing"));
    }

    #[test]
    fn test_exclude_apps_not_installed() {
        let mut settings = Settings::default();
        settings.installed_apps = vec!["contrib.admin".to_string()];
        settings.jingo_exclude_apps = vec!["admin".to_string(), "legacy".to_string()];
        let messages = check_exclude_apps(&settings);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].msg.contains("legacy"));
        assert_eq!(messages[0].level, CheckLevel::Info);
    }

    #[test]
    fn test_builtins_default_settings_not_fatal() {
        let registry = CheckRegistry::with_builtins();
        assert_eq!(registry.len(), 4);
        let messages = registry.run_checks(None, &Settings::default());
        assert!(messages.iter().all(|m| !m.is_fatal()));
    }

    #[test]
    fn test_run_checks_with_tag_filter() {
        let mut registry = CheckRegistry::with_builtins();
        registry.register(
            |_| vec![CheckMessage::warning("custom", None, None, Some("myapp.W001"))],
            &["myapp"],
        );
        let messages = registry.run_checks(Some(&["myapp"]), &Settings::default());
        assert_eq!(ids(&messages), vec!["myapp.W001"]);
    }

    #[test]
    fn test_empty_registry() {
        let registry = CheckRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.run_checks(None, &Settings::default()).is_empty());
    }
}
