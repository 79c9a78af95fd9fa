//! Core error types for jingo.
//!
//! [`JingoError`] covers every failure the bridge can surface to a host:
//! missing templates, syntax and render failures, misconfiguration, and URL
//! reversal. Template lookups that fail for any reason (not eligible, not
//! found) surface as [`JingoError::TemplateDoesNotExist`] so a host loader
//! chain can fall through uniformly.

use thiserror::Error;

/// The primary error type for jingo.
#[derive(Error, Debug)]
pub enum JingoError {
    // ── Templates ────────────────────────────────────────────────────

    /// The requested template was rejected or could not be found.
    #[error("Template does not exist: {0}")]
    TemplateDoesNotExist(String),

    /// A template contains invalid syntax.
    #[error("Template syntax error: {0}")]
    TemplateSyntaxError(String),

    /// Rendering failed after the template was loaded.
    #[error("Render error: {0}")]
    RenderError(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The bridge is improperly configured and cannot start.
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    // ── URLs ─────────────────────────────────────────────────────────

    /// No named route matched a reverse lookup.
    #[error("No reverse match: {0}")]
    NoReverseMatch(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl JingoError {
    /// Returns `true` if this error means "try the next loader".
    pub const fn is_does_not_exist(&self) -> bool {
        matches!(self, Self::TemplateDoesNotExist(_))
    }

    /// Returns `true` if this error is a configuration failure.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationError(_) | Self::ImproperlyConfigured(_)
        )
    }
}

/// A convenience type alias for `Result<T, JingoError>`.
pub type JingoResult<T> = Result<T, JingoError>;
