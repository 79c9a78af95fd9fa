//! Translation globals for templates.
//!
//! With the `i18n` extension enabled the environment exposes `gettext`, its
//! alias `_`, `ngettext` and `pgettext`. Each translates its message, then
//! fills `%(name)s` placeholders from the keyword arguments. Arguments are
//! escaped unless already markup and the result is returned as markup, so
//! translators may put HTML in messages but callers cannot inject it.
//!
//! A placeholder with no matching argument renders as an empty string and is
//! logged; translations are edited independently of code and a stale
//! placeholder must not break the page.

use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::{Error, ErrorKind, State, Value};

use crate::library::{arg, split_kwargs, Register};
use crate::markup::{escape_value, percent_format};

/// A message translation backend.
pub trait Translations: Send + Sync {
    /// Translates `message`.
    fn gettext(&self, message: &str) -> String;

    /// Translates a message with singular and plural forms.
    fn ngettext(&self, singular: &str, plural: &str, n: u64) -> String;

    /// Translates `message` within a disambiguating context.
    fn pgettext(&self, context: &str, message: &str) -> String;
}

/// A backend that returns every message untranslated.
///
/// Installed when `i18n` is enabled and no backend was configured, so that
/// rendering never depends on translation machinery being set up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTranslations;

impl Translations for NullTranslations {
    fn gettext(&self, message: &str) -> String {
        message.to_string()
    }

    fn ngettext(&self, singular: &str, plural: &str, n: u64) -> String {
        let form = if n == 1 { singular } else { plural };
        form.to_string()
    }

    fn pgettext(&self, _context: &str, message: &str) -> String {
        message.to_string()
    }
}

/// A backend reading the process-wide catalog in the thread's active language.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogTranslations;

impl Translations for CatalogTranslations {
    fn gettext(&self, message: &str) -> String {
        jingo_core::i18n::gettext(message)
    }

    fn ngettext(&self, singular: &str, plural: &str, n: u64) -> String {
        jingo_core::i18n::ngettext(singular, plural, n)
    }

    fn pgettext(&self, context: &str, message: &str) -> String {
        jingo_core::i18n::pgettext(context, message)
    }
}

fn text(helper: &str, args: &[Value], index: usize) -> Result<String, Error> {
    let value = arg(helper, args, index)?;
    value.as_str().map(ToString::to_string).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("{helper}() expects a string message, got {}", value.kind()),
        )
    })
}

fn count(value: &Value) -> Result<u64, Error> {
    i64::try_from(value.clone())
        .map(i64::unsigned_abs)
        .map_err(|_| Error::new(ErrorKind::InvalidOperation, "ngettext() count must be an integer"))
}

fn interpolate(message: &str, kwargs: &[(String, Value)], extra: Option<(&str, &Value)>) -> Value {
    let mut mapping: BTreeMap<String, String> = kwargs
        .iter()
        .map(|(k, v)| (k.clone(), escape_value(v)))
        .collect();
    if let Some((key, value)) = extra {
        mapping.entry(key.to_string()).or_insert_with(|| escape_value(value));
    }
    Value::from_safe_string(percent_format(message, &mapping))
}

/// Installs the translation globals backed by `translations`.
pub fn install(register: &Register<'_>, translations: Arc<dyn Translations>) {
    let backend = Arc::clone(&translations);
    let gettext = move |_: &State<'_, '_>, args: &[Value]| -> Result<Value, Error> {
        let (args, kwargs) = split_kwargs(args)?;
        let message = backend.gettext(&text("gettext", args, 0)?);
        Ok(interpolate(&message, &kwargs, None))
    };
    let gettext = Arc::new(gettext);
    register.register_function_with("gettext", gettext.clone(), true);
    register.register_function_with("_", gettext, true);

    let backend = Arc::clone(&translations);
    register.register_function("ngettext", move |_, args| {
        let (args, kwargs) = split_kwargs(args)?;
        let singular = text("ngettext", args, 0)?;
        let plural = text("ngettext", args, 1)?;
        let n = arg("ngettext", args, 2)?;
        let message = backend.ngettext(&singular, &plural, count(n)?);
        Ok(interpolate(&message, &kwargs, Some(("num", n))))
    });

    let backend = translations;
    register.register_function("pgettext", move |_, args| {
        let (args, kwargs) = split_kwargs(args)?;
        let message = backend.pgettext(&text("pgettext", args, 0)?, &text("pgettext", args, 1)?);
        Ok(interpolate(&message, &kwargs, None))
    });
}
