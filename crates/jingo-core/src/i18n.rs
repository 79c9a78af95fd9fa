//! Active language and message translation.
//!
//! The active language is tracked per thread so each request handler can
//! render in its own locale. Lookups go through the process-wide
//! [`catalog`]; a message with no entry for the active language is returned
//! untranslated.
//!
//! ```
//! use jingo_core::i18n;
//!
//! i18n::catalog::register_translations("nl", vec![("Cart", "Winkelwagen")]);
//!
//! i18n::activate("nl");
//! assert_eq!(i18n::gettext("Cart"), "Winkelwagen");
//! i18n::deactivate();
//! assert_eq!(i18n::gettext("Cart"), "Cart");
//! ```

pub mod catalog;

use std::cell::RefCell;

/// Language reported when none has been activated on the current thread.
pub const DEFAULT_LANGUAGE: &str = "en-us";

thread_local! {
    static CURRENT_LANGUAGE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Activates `language_code` for the current thread.
pub fn activate(language_code: &str) {
    CURRENT_LANGUAGE.with(|cell| {
        *cell.borrow_mut() = Some(language_code.to_string());
    });
}

/// Clears the current thread's language, reverting to [`DEFAULT_LANGUAGE`].
pub fn deactivate() {
    CURRENT_LANGUAGE.with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// Returns the language code active on the current thread.
pub fn get_language() -> String {
    CURRENT_LANGUAGE.with(|cell| {
        cell.borrow()
            .clone()
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
    })
}

/// Returns `true` if a language has been activated on the current thread.
pub fn is_active() -> bool {
    CURRENT_LANGUAGE.with(|cell| cell.borrow().is_some())
}

/// Translates `msgid` into the active language.
pub fn gettext(msgid: &str) -> String {
    catalog::translate(&get_language(), msgid).unwrap_or_else(|| msgid.to_string())
}

/// Translates a message with plural support.
///
/// Untranslated messages fall back to `singular` when `count == 1` and to
/// `plural` otherwise.
///
/// ```
/// use jingo_core::i18n;
///
/// assert_eq!(i18n::ngettext("one box", "many boxes", 1), "one box");
/// assert_eq!(i18n::ngettext("one box", "many boxes", 0), "many boxes");
/// ```
pub fn ngettext(singular: &str, plural: &str, count: u64) -> String {
    catalog::translate_plural(&get_language(), singular, count).unwrap_or_else(|| {
        if count == 1 {
            singular.to_string()
        } else {
            plural.to_string()
        }
    })
}

/// Translates `msgid` under a disambiguating context (e.g. "May" the month
/// versus "May" the verb).
pub fn pgettext(context: &str, msgid: &str) -> String {
    catalog::translate_context(&get_language(), context, msgid)
        .unwrap_or_else(|| msgid.to_string())
}
