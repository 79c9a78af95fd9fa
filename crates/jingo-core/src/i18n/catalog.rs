//! Process-wide translation catalog.
//!
//! Catalogs are keyed by language code and may be filled programmatically or
//! from JSON documents of the form:
//!
//! ```json
//! {
//!   "messages": { "Hello": "Hola" },
//!   "plurals": { "item": { "singular": "elemento", "plural": "elementos" } },
//!   "contexts": { "month\u0004May": "Mayo" }
//! }
//! ```
//!
//! Every top-level key is optional. Context entries join the context and the
//! message id with `\x04`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{OnceLock, RwLock};

use crate::error::JingoError;

const CONTEXT_SEPARATOR: char = '\x04';

/// Translations for a single language.
#[derive(Debug, Clone, Default)]
pub struct TranslationCatalog {
    messages: HashMap<String, String>,
    /// Keyed by singular msgid.
    plurals: HashMap<String, (String, String)>,
    contexts: HashMap<String, String>,
}

impl TranslationCatalog {
    /// Returns the number of entries across all three tables.
    pub fn len(&self) -> usize {
        self.messages.len() + self.plurals.len() + self.contexts.len()
    }

    /// Returns `true` if the catalog holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn catalogs() -> &'static RwLock<HashMap<String, TranslationCatalog>> {
    static CATALOGS: OnceLock<RwLock<HashMap<String, TranslationCatalog>>> = OnceLock::new();
    CATALOGS.get_or_init(|| RwLock::new(HashMap::new()))
}

fn context_key(context: &str, msgid: &str) -> String {
    format!("{context}{CONTEXT_SEPARATOR}{msgid}")
}

fn read<R>(language: &str, f: impl FnOnce(&TranslationCatalog) -> Option<R>) -> Option<R> {
    let guard = catalogs().read().expect("catalog lock poisoned");
    guard.get(language).and_then(f)
}

#[allow(clippy::significant_drop_tightening)]
fn write(language: &str, f: impl FnOnce(&mut TranslationCatalog)) {
    let mut guard = catalogs().write().expect("catalog lock poisoned");
    f(guard.entry(language.to_string()).or_default());
}

/// Adds `(msgid, translated)` pairs for `language`, replacing existing ids.
pub fn register_translations(language: &str, entries: Vec<(&str, &str)>) {
    write(language, |catalog| {
        for (msgid, translated) in entries {
            catalog.messages.insert(msgid.to_string(), translated.to_string());
        }
    });
}

/// Adds `(singular, plural, translated_singular, translated_plural)` entries.
pub fn register_plural_translations(language: &str, entries: Vec<(&str, &str, &str, &str)>) {
    write(language, |catalog| {
        for (singular, _plural, one, many) in entries {
            catalog
                .plurals
                .insert(singular.to_string(), (one.to_string(), many.to_string()));
        }
    });
}

/// Adds `(context, msgid, translated)` entries.
pub fn register_context_translations(language: &str, entries: Vec<(&str, &str, &str)>) {
    write(language, |catalog| {
        for (context, msgid, translated) in entries {
            catalog
                .contexts
                .insert(context_key(context, msgid), translated.to_string());
        }
    });
}

/// Merges a JSON catalog document into `language`.
///
/// Entries whose values have the wrong shape are skipped.
///
/// # Errors
///
/// Returns [`JingoError::ConfigurationError`] if the document is not valid JSON.
pub fn load_from_json(language: &str, json_str: &str) -> Result<(), JingoError> {
    let doc: serde_json::Value = serde_json::from_str(json_str).map_err(|e| {
        JingoError::ConfigurationError(format!("Invalid catalog for '{language}': {e}"))
    })?;

    write(language, |catalog| {
        if let Some(messages) = doc.get("messages").and_then(|v| v.as_object()) {
            catalog.messages.extend(
                messages
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|t| (k.clone(), t.to_string()))),
            );
        }

        if let Some(plurals) = doc.get("plurals").and_then(|v| v.as_object()) {
            for (msgid, forms) in plurals {
                let one = forms.get("singular").and_then(|v| v.as_str());
                let many = forms.get("plural").and_then(|v| v.as_str());
                if let (Some(one), Some(many)) = (one, many) {
                    catalog
                        .plurals
                        .insert(msgid.clone(), (one.to_string(), many.to_string()));
                }
            }
        }

        if let Some(contexts) = doc.get("contexts").and_then(|v| v.as_object()) {
            catalog.contexts.extend(
                contexts
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|t| (k.clone(), t.to_string()))),
            );
        }
    });

    tracing::debug!(language, "translation catalog loaded");
    Ok(())
}

/// Reads a JSON catalog file and merges it into `language`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid JSON.
pub fn load_from_file(language: &str, path: impl AsRef<Path>) -> Result<(), JingoError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    load_from_json(language, &content)
}

/// Looks up a plain message.
pub fn translate(language: &str, msgid: &str) -> Option<String> {
    read(language, |catalog| catalog.messages.get(msgid).cloned())
}

/// Looks up a plural message, choosing the singular form when `count == 1`.
pub fn translate_plural(language: &str, singular: &str, count: u64) -> Option<String> {
    read(language, |catalog| {
        catalog
            .plurals
            .get(singular)
            .map(|(one, many)| if count == 1 { one.clone() } else { many.clone() })
    })
}

/// Looks up a message under a context.
pub fn translate_context(language: &str, context: &str, msgid: &str) -> Option<String> {
    let key = context_key(context, msgid);
    read(language, |catalog| catalog.contexts.get(&key).cloned())
}

/// Returns `true` if a catalog exists for `language`.
pub fn has_language(language: &str) -> bool {
    catalogs()
        .read()
        .expect("catalog lock poisoned")
        .contains_key(language)
}

/// Drops the catalog for `language`.
pub fn clear_language(language: &str) {
    catalogs()
        .write()
        .expect("catalog lock poisoned")
        .remove(language);
}
