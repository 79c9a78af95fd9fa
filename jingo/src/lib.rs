//! # jingo
//!
//! Jinja-style templates for Django-shaped Rust applications.
//!
//! This is the meta-crate that re-exports the sub-crates. Depend on `jingo`
//! to get everything, or on the individual crates for finer-grained control.

/// Settings, app registry, checks, translation catalog and error types.
pub use jingo_core as core;

/// The template bridge: environment, loaders, helpers.
#[cfg(feature = "template")]
pub use jingo_template as template;

/// Third-party crates re-exported for convenience.
pub use serde_json;
pub use tracing;
pub use tracing_subscriber;

/// Commonly used items.
pub mod prelude {
    pub use jingo_core::apps::{AppConfig, AppRegistry, SimpleAppConfig};
    pub use jingo_core::{JingoError, JingoResult, Settings, SETTINGS};

    #[cfg(feature = "template")]
    pub use jingo_template::{
        get_env, mark_safe, render_to_string, ContextValue, Environment, JingoLoader, Template,
    };
}
