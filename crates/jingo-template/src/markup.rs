//! Safe-string interop between host values and engine values.
//!
//! Two conventions meet here. Host code marks pre-escaped text with
//! [`ContextValue::SafeString`] or implements [`Html`] for objects that render
//! themselves as markup; the engine tracks safety on its own [`Value`]s. The
//! conversions in this module carry the marker across in both directions, and
//! [`html_formatter`] makes the engine's autoescaping honor [`Html`] objects.
//!
//! The interpolation helpers ([`brace_format`], [`percent_format`]) never fail
//! on a missing placeholder: they log it and substitute an empty string.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use minijinja::value::{Object, ObjectRepr, ValueKind};
use minijinja::{AutoEscape, Error, ErrorKind, Output, State, Value};

use crate::context::{escape_html, ContextValue};

/// A host object that can render itself as pre-escaped markup.
///
/// This is the capability the bridge tests for instead of retrofitting a
/// method onto host types: implement it for form fields, widgets, or any
/// other value whose `to_html` output must reach the page unescaped.
pub trait Html: fmt::Debug + Send + Sync {
    /// Returns the markup for this object.
    fn to_html(&self) -> String;

    /// Looks up a child value for `{{ obj.name }}` access.
    fn attr(&self, _name: &str) -> Option<ContextValue> {
        None
    }

    /// Returns a copy with HTML attributes set (`Some`) or removed (`None`),
    /// or `None` if this object has no attributes to change.
    fn with_attrs(&self, _attrs: &[(String, Option<String>)]) -> Option<Arc<dyn Html>> {
        None
    }
}

/// Engine-side wrapper that exposes an [`Html`] object to templates.
#[derive(Debug, Clone)]
pub struct HtmlValue(pub Arc<dyn Html>);

impl Object for HtmlValue {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        self.0.attr(key.as_str()?).map(|v| to_value(&v))
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        _args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "__html__" => Ok(Value::from_safe_string(self.0.to_html())),
            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("object has no method named {method}"),
            )),
        }
    }

    fn is_true(self: &Arc<Self>) -> bool {
        true
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_html())
    }
}

/// Output formatter installed on every environment.
///
/// [`Html`] objects are written verbatim. Plain strings under HTML
/// autoescaping use [`escape_html`], which leaves `/` alone so URLs read
/// the same as in Jinja; everything else goes through the engine's own
/// escaping, which already honors safe strings.
pub fn html_formatter(out: &mut Output<'_>, state: &State<'_, '_>, value: &Value) -> Result<(), Error> {
    if let Some(html) = value.downcast_object_ref::<HtmlValue>() {
        return write_markup(out, &html.0.to_html());
    }
    if matches!(state.auto_escape(), AutoEscape::Html) && !value.is_safe() {
        if let Some(text) = value.as_str() {
            return write_markup(out, &escape_html(text));
        }
    }
    minijinja::escape_formatter(out, state, value)
}

fn write_markup(out: &mut Output<'_>, markup: &str) -> Result<(), Error> {
    fmt::Write::write_str(out, markup)
        .map_err(|_| Error::new(ErrorKind::WriteFailure, "failed to write markup"))
}

// ============================================================
// Conversions
// ============================================================

/// Converts a host value into an engine value, keeping the safe marker.
pub fn to_value(value: &ContextValue) -> Value {
    match value {
        ContextValue::String(s) => Value::from(s.as_str()),
        ContextValue::SafeString(s) => Value::from_safe_string(s.clone()),
        ContextValue::Integer(i) => Value::from(*i),
        ContextValue::Float(f) => Value::from(*f),
        ContextValue::Bool(b) => Value::from(*b),
        ContextValue::None => Value::from(()),
        ContextValue::List(items) => Value::from(items.iter().map(to_value).collect::<Vec<_>>()),
        ContextValue::Dict(map) => Value::from(
            map.iter()
                .map(|(k, v)| (k.clone(), to_value(v)))
                .collect::<BTreeMap<String, Value>>(),
        ),
        ContextValue::Html(html) => Value::from_object(HtmlValue(Arc::clone(html))),
    }
}

/// Converts a flattened host mapping into the engine's render context.
pub fn context_to_value(map: &HashMap<String, ContextValue>) -> Value {
    Value::from(
        map.iter()
            .map(|(k, v)| (k.clone(), to_value(v)))
            .collect::<BTreeMap<String, Value>>(),
    )
}

/// Converts an engine value back into a host value.
///
/// Safe engine strings become [`ContextValue::SafeString`] so host-side
/// rendering does not escape them a second time.
pub fn from_value(value: &Value) -> ContextValue {
    if let Some(html) = value.downcast_object_ref::<HtmlValue>() {
        return ContextValue::Html(Arc::clone(&html.0));
    }

    match value.kind() {
        ValueKind::Undefined | ValueKind::None => ContextValue::None,
        ValueKind::Bool => ContextValue::Bool(value.is_true()),
        ValueKind::Number => i64::try_from(value.clone()).map_or_else(
            |_| ContextValue::Float(f64::try_from(value.clone()).unwrap_or(0.0)),
            ContextValue::Integer,
        ),
        ValueKind::String if value.is_safe() => ContextValue::SafeString(value.to_string()),
        ValueKind::Seq => ContextValue::List(
            value
                .try_iter()
                .map(|iter| iter.map(|v| from_value(&v)).collect())
                .unwrap_or_default(),
        ),
        ValueKind::Map => {
            let mut map = HashMap::new();
            if let Ok(keys) = value.try_iter() {
                for key in keys {
                    let item = value.get_item(&key).unwrap_or_default();
                    map.insert(key.to_string(), from_value(&item));
                }
            }
            ContextValue::Dict(map)
        }
        _ if value.is_safe() => ContextValue::SafeString(value.to_string()),
        _ => ContextValue::String(value.to_string()),
    }
}

/// Returns `true` if `value` must not be escaped again.
pub fn is_markup(value: &Value) -> bool {
    value.is_safe() || value.downcast_object_ref::<HtmlValue>().is_some()
}

/// Returns the text of `value` without escaping. None and undefined are empty.
pub fn plain_text(value: &Value) -> String {
    if let Some(html) = value.downcast_object_ref::<HtmlValue>() {
        return html.0.to_html();
    }
    if value.is_undefined() || value.is_none() {
        return String::new();
    }
    value.to_string()
}

/// Returns the text of `value`, escaped unless it is already markup.
pub fn escape_value(value: &Value) -> String {
    if is_markup(value) {
        plain_text(value)
    } else {
        escape_html(&plain_text(value))
    }
}

/// The `escape` (`e`) filter: markup passes through, anything else is
/// escaped. The result is always markup.
///
/// The engine's `~` operator joins values into a plain string, so a markup
/// operand gets escaped once the result is printed. Join mixed values with
/// `fe` instead: `{{ '{0}{1}'|fe(a, b) }}`.
pub fn escape_filter(value: &Value) -> Value {
    Value::from_safe_string(escape_value(value))
}

/// The `string` filter. Markup stays markup.
pub fn string_filter(value: &Value) -> Value {
    if is_markup(value) {
        Value::from_safe_string(plain_text(value))
    } else if value.as_str().is_some() {
        value.clone()
    } else {
        Value::from(value.to_string())
    }
}

// ============================================================
// Interpolation
// ============================================================

fn log_missing(key: &str, mapping: &BTreeMap<String, String>) {
    tracing::warn!(
        locale = %jingo_core::i18n::get_language(),
        key,
        mapping = ?mapping,
        "interpolation key missing; substituting an empty string"
    );
}

/// `str.format`-style interpolation.
///
/// Supports `{}` (automatic numbering), `{0}`, `{name}`, and the `{{` / `}}`
/// escapes. A format spec after `:` or a conversion after `!` is ignored.
/// Placeholders with no matching argument are logged and replaced with an
/// empty string; an unterminated `{` is kept literally.
///
/// ```
/// use std::collections::BTreeMap;
/// use jingo_template::markup::brace_format;
///
/// let mut kwargs = BTreeMap::new();
/// kwargs.insert("z".to_string(), "b".to_string());
/// assert_eq!(brace_format("{0} : {z} {{x}}", &["a".to_string()], &kwargs), "a : b {x}");
/// ```
pub fn brace_format(template: &str, args: &[String], kwargs: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut auto_index = 0usize;
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
        } else if let Some(end) = tail.find('}') {
            let field = &tail[1..end];
            let key = field.split([':', '!']).next().unwrap_or_default().trim();

            let value = if key.is_empty() {
                let v = args.get(auto_index);
                auto_index += 1;
                v
            } else if let Ok(index) = key.parse::<usize>() {
                args.get(index)
            } else {
                kwargs.get(key)
            };

            match value {
                Some(v) => out.push_str(v),
                None => log_missing(if key.is_empty() { "{}" } else { key }, kwargs),
            }
            rest = &tail[end + 1..];
        } else {
            out.push_str(tail);
            rest = "";
        }
    }
    out.push_str(rest);
    out
}

/// `%(name)s`-style interpolation as used by translation catalogs.
///
/// `%%` yields a literal `%`. The conversion letter after `)` is consumed
/// and ignored. Missing names are logged and replaced with an empty string.
///
/// ```
/// use std::collections::BTreeMap;
/// use jingo_template::markup::percent_format;
///
/// let mut kwargs = BTreeMap::new();
/// kwargs.insert("num".to_string(), "3".to_string());
/// assert_eq!(percent_format("%(num)d items, 100%%", &kwargs), "3 items, 100%");
/// ```
pub fn percent_format(template: &str, kwargs: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("%%") {
            out.push('%');
            rest = &tail[2..];
        } else if let Some(close) = tail.strip_prefix("%(").and_then(|t| t.find(')')) {
            let key = &tail[2..2 + close];
            let mut after = &tail[3 + close..];
            if let Some(c) = after.chars().next().filter(char::is_ascii_alphabetic) {
                after = &after[c.len_utf8()..];
            }
            match kwargs.get(key) {
                Some(v) => out.push_str(v),
                None => log_missing(key, kwargs),
            }
            rest = after;
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Escapes every argument that is not already markup, interpolates them
/// into `template` with [`brace_format`], and returns the result as a safe
/// value. The format string itself is trusted and passed through as-is.
pub fn format_escaped(template: &str, args: &[Value], kwargs: &[(String, Value)]) -> Value {
    let args: Vec<String> = args.iter().map(escape_value).collect();
    let kwargs: BTreeMap<String, String> = kwargs
        .iter()
        .map(|(k, v)| (k.clone(), escape_value(v)))
        .collect();
    Value::from_safe_string(brace_format(template, &args, &kwargs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Badge(&'static str);

    impl Html for Badge {
        fn to_html(&self) -> String {
            format!("<span class=\"badge\">{}</span>", self.0)
        }

        fn attr(&self, name: &str) -> Option<ContextValue> {
            (name == "label").then(|| ContextValue::from(self.0))
        }
    }

    fn kw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_safe_string_round_trip_keeps_marker() {
        let value = to_value(&ContextValue::SafeString("<b>x</b>".into()));
        assert!(value.is_safe());
        assert!(from_value(&value).is_safe());

        let plain = to_value(&ContextValue::from("<b>x</b>"));
        assert!(!plain.is_safe());
        assert!(!from_value(&plain).is_safe());
    }

    #[test]
    fn test_html_object_round_trip() {
        let html: Arc<dyn Html> = Arc::new(Badge("new"));
        let value = to_value(&ContextValue::Html(html));
        assert!(is_markup(&value));
        assert_eq!(plain_text(&value), "<span class=\"badge\">new</span>");

        match from_value(&value) {
            ContextValue::Html(h) => assert_eq!(h.to_html(), "<span class=\"badge\">new</span>"),
            other => panic!("expected Html, got {other:?}"),
        }
    }

    #[test]
    fn test_from_value_collections() {
        let mut map = HashMap::new();
        map.insert("n".to_string(), ContextValue::from(3));
        map.insert("l".to_string(), ContextValue::from(vec![true, false]));
        let value = to_value(&ContextValue::Dict(map.clone()));
        assert_eq!(from_value(&value), ContextValue::Dict(map));
        assert_eq!(from_value(&Value::UNDEFINED), ContextValue::None);
    }

    #[test]
    fn test_escape_filter_keeps_html_objects() {
        let field = Value::from_object(HtmlValue(Arc::new(Badge("new"))));
        let out = escape_filter(&field);
        assert!(out.is_safe());
        assert_eq!(out.to_string(), "<span class=\"badge\">new</span>");

        let out = escape_filter(&Value::from("<i>"));
        assert!(out.is_safe());
        assert_eq!(out.to_string(), "&lt;i&gt;");
    }

    #[test]
    fn test_string_filter() {
        let field = Value::from_object(HtmlValue(Arc::new(Badge("new"))));
        assert!(string_filter(&field).is_safe());
        assert!(string_filter(&Value::from_safe_string("<b>".into())).is_safe());
        assert!(!string_filter(&Value::from("<i>")).is_safe());
        assert_eq!(string_filter(&Value::from(42)).to_string(), "42");
    }

    #[test]
    fn test_escape_value() {
        assert_eq!(escape_value(&Value::from("<em>")), "&lt;em&gt;");
        assert_eq!(escape_value(&Value::from_safe_string("<em>".into())), "<em>");
        assert_eq!(escape_value(&Value::from(())), "");
        assert_eq!(escape_value(&Value::from(7)), "7");
    }

    #[test]
    fn test_brace_format_positional_and_named() {
        let out = brace_format("{0} : {z}", &["a".to_string()], &kw(&[("z", "b")]));
        assert_eq!(out, "a : b");
    }

    #[test]
    fn test_brace_format_auto_numbering_and_escapes() {
        let args = vec!["x".to_string(), "y".to_string()];
        assert_eq!(brace_format("{}-{} {{}}", &args, &BTreeMap::new()), "x-y {}");
        assert_eq!(brace_format("{1:>4}{0!r}", &args, &BTreeMap::new()), "yx");
    }

    #[test]
    fn test_brace_format_missing_key_is_empty() {
        assert_eq!(brace_format("Broken {x}", &[], &BTreeMap::new()), "Broken ");
        assert_eq!(brace_format("{3}!", &["a".into()], &BTreeMap::new()), "!");
    }

    #[test]
    fn test_brace_format_unterminated() {
        assert_eq!(brace_format("a {b", &[], &BTreeMap::new()), "a {b");
        assert_eq!(brace_format("a } b", &[], &BTreeMap::new()), "a } b");
    }

    #[test]
    fn test_percent_format() {
        let kwargs = kw(&[("name", "Ann"), ("num", "2")]);
        assert_eq!(percent_format("Hi %(name)s", &kwargs), "Hi Ann");
        assert_eq!(percent_format("%(num)d%% off", &kwargs), "2% off");
        assert_eq!(percent_format("Broken %(x)s", &kwargs), "Broken ");
        assert_eq!(percent_format("50% and %s", &kwargs), "50% and %s");
        assert_eq!(percent_format("%(unclosed", &kwargs), "%(unclosed");
    }

    #[test]
    fn test_format_escaped_escapes_only_arguments() {
        let out = format_escaped("Hello <b>{0}</b>", &[Value::from("<em>Steve</em>")], &[]);
        assert!(out.is_safe());
        assert_eq!(out.to_string(), "Hello <b>&lt;em&gt;Steve&lt;/em&gt;</b>");
    }

    #[test]
    fn test_format_escaped_keeps_safe_arguments() {
        let arg = Value::from_safe_string("<em>Steve</em>".into());
        let out = format_escaped("Hello <b>{0}</b>", &[arg], &[]);
        assert_eq!(out.to_string(), "Hello <b><em>Steve</em></b>");
    }

    #[test]
    fn test_format_escaped_kwargs() {
        let out = format_escaped("<em>{t}</em>", &[], &[("t".into(), Value::from("<bad>"))]);
        assert_eq!(out.to_string(), "<em>&lt;bad&gt;</em>");
    }
}
