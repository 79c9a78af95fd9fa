//! # jingo-core
//!
//! Core types for jingo: settings, the application registry, system checks,
//! the translation catalog, logging, and error types. The template bridge in
//! `jingo-template` builds on these; this crate has no template engine
//! dependency.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Settings and global configuration
//! - [`settings_loader`] - Loading settings from TOML/JSON and the environment
//! - [`apps`] - Application registry
//! - [`checks`] - System checks run before an environment is built
//! - [`i18n`] - Active language and translation catalog
//! - [`logging`] - Tracing-based logging integration

pub mod apps;
pub mod checks;
pub mod error;
pub mod i18n;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{JingoError, JingoResult};
pub use settings::{Settings, SETTINGS};
