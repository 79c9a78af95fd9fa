//! Context processors.
//!
//! A context processor inspects the request and contributes variables to
//! every context built by `render_to_string`. Processors are selected by
//! name from `Settings::template_context_processors`; a dotted path such as
//! `django.template.context_processors.debug` selects by its last segment.

use std::collections::HashMap;

use jingo_core::{JingoError, Settings};

use crate::context::ContextValue;
use crate::request::HttpRequest;

/// Placeholder Django uses when no CSRF token is available.
pub const CSRF_NOT_PROVIDED: &str = "NOTPROVIDED";

/// A context processor that adds variables to every template context.
pub trait ContextProcessor: Send + Sync {
    /// Processes the request and returns context variables.
    fn process(&self, request: &HttpRequest) -> HashMap<String, ContextValue>;
}

/// Adds `debug = true` when the project runs in debug mode.
pub struct DebugContextProcessor {
    debug: bool,
}

impl DebugContextProcessor {
    /// Creates the processor for the given debug flag.
    pub const fn new(debug: bool) -> Self {
        Self { debug }
    }
}

impl ContextProcessor for DebugContextProcessor {
    fn process(&self, _request: &HttpRequest) -> HashMap<String, ContextValue> {
        let mut ctx = HashMap::new();
        if self.debug {
            ctx.insert("debug".to_string(), ContextValue::Bool(true));
        }
        ctx
    }
}

/// Adds `STATIC_URL` to the context.
pub struct StaticContextProcessor {
    static_url: String,
}

impl StaticContextProcessor {
    /// Creates a new `StaticContextProcessor` with the given URL prefix.
    pub fn new(static_url: impl Into<String>) -> Self {
        Self {
            static_url: static_url.into(),
        }
    }
}

impl ContextProcessor for StaticContextProcessor {
    fn process(&self, _request: &HttpRequest) -> HashMap<String, ContextValue> {
        HashMap::from([(
            "STATIC_URL".to_string(),
            ContextValue::String(self.static_url.clone()),
        )])
    }
}

/// Adds `MEDIA_URL` to the context.
pub struct MediaContextProcessor {
    media_url: String,
}

impl MediaContextProcessor {
    /// Creates a new `MediaContextProcessor` with the given URL prefix.
    pub fn new(media_url: impl Into<String>) -> Self {
        Self {
            media_url: media_url.into(),
        }
    }
}

impl ContextProcessor for MediaContextProcessor {
    fn process(&self, _request: &HttpRequest) -> HashMap<String, ContextValue> {
        HashMap::from([(
            "MEDIA_URL".to_string(),
            ContextValue::String(self.media_url.clone()),
        )])
    }
}

/// Adds `csrf_token` to the context.
///
/// The token comes from META `CSRF_COOKIE` (set by CSRF middleware), then the
/// `csrftoken` cookie. Without either a fresh 64-character token is generated.
pub struct CsrfContextProcessor;

impl ContextProcessor for CsrfContextProcessor {
    fn process(&self, request: &HttpRequest) -> HashMap<String, ContextValue> {
        let token = request
            .meta()
            .get("CSRF_COOKIE")
            .map(String::as_str)
            .or_else(|| request.cookie("csrftoken"))
            .map_or_else(generate_token, ToString::to_string);

        HashMap::from([("csrf_token".to_string(), ContextValue::String(token))])
    }
}

fn generate_token() -> String {
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// Adds `request` as a dict with `path`, `full_path`, `method` and `is_secure`.
pub struct RequestContextProcessor;

impl ContextProcessor for RequestContextProcessor {
    fn process(&self, request: &HttpRequest) -> HashMap<String, ContextValue> {
        let req_dict = HashMap::from([
            ("path".to_string(), ContextValue::from(request.path())),
            ("full_path".to_string(), ContextValue::from(request.get_full_path())),
            ("method".to_string(), ContextValue::from(request.method().as_str())),
            ("is_secure".to_string(), ContextValue::Bool(request.is_secure())),
        ]);

        HashMap::from([("request".to_string(), ContextValue::Dict(req_dict))])
    }
}

/// Adds `LANGUAGE_CODE` (the active language) and `LANGUAGE_BIDI`.
pub struct I18nContextProcessor;

const BIDI_LANGUAGES: &[&str] = &["ar", "fa", "he", "ur"];

impl ContextProcessor for I18nContextProcessor {
    fn process(&self, _request: &HttpRequest) -> HashMap<String, ContextValue> {
        let language = jingo_core::i18n::get_language();
        let base = language.split(['-', '_']).next().unwrap_or_default();
        let bidi = BIDI_LANGUAGES.contains(&base);

        HashMap::from([
            ("LANGUAGE_CODE".to_string(), ContextValue::String(language.clone())),
            ("LANGUAGE_BIDI".to_string(), ContextValue::Bool(bidi)),
        ])
    }
}

/// Builds the processors named in `settings.template_context_processors`, in order.
///
/// # Errors
///
/// Returns [`JingoError::ImproperlyConfigured`] for an unknown processor name.
pub fn from_settings(settings: &Settings) -> Result<Vec<Box<dyn ContextProcessor>>, JingoError> {
    settings
        .template_context_processors
        .iter()
        .map(|name| by_name(name, settings))
        .collect()
}

fn by_name(name: &str, settings: &Settings) -> Result<Box<dyn ContextProcessor>, JingoError> {
    let short = name.rsplit('.').next().unwrap_or(name);
    let processor: Box<dyn ContextProcessor> = match short {
        "debug" => Box::new(DebugContextProcessor::new(settings.debug)),
        "static" => Box::new(StaticContextProcessor::new(settings.static_url.clone())),
        "media" => Box::new(MediaContextProcessor::new(settings.media_url.clone())),
        "csrf" => Box::new(CsrfContextProcessor),
        "request" => Box::new(RequestContextProcessor),
        "i18n" => Box::new(I18nContextProcessor),
        _ => {
            return Err(JingoError::ImproperlyConfigured(format!(
                "Unknown context processor '{name}'"
            )))
        }
    };
    Ok(processor)
}
