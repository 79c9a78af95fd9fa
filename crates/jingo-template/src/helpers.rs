//! Built-in helpers installed by the `jingo` extension.
//!
//! | Name | Kind | Result |
//! |---|---|---|
//! | `csrf()` | function | hidden CSRF input (markup) |
//! | `url(name, *args, **kwargs)` | function | reversed path |
//! | `f(*args, **kwargs)` | filter | `str.format` interpolation |
//! | `fe(*args, **kwargs)` | filter | interpolation with escaped arguments (markup) |
//! | `nl2br` | filter | lines joined with `<br>` (markup) |
//! | `datetime(fmt=None)` | filter | `strftime` formatting |
//! | `ifeq(b, text)` | filter | `text` when equal (markup) |
//! | `class_selected(b)` | filter | `class="selected"` when equal (markup) |
//! | `field_attrs(**attrs)` | filter | `Html` value with attributes changed |
//! | `urlparams(hash=None, **query)` | filter | URL with query and fragment changed |

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use minijinja::{Error, ErrorKind, State, Value};

use crate::context::escape_html;
use crate::context_processors::CSRF_NOT_PROVIDED;
use crate::library::{arg, split_kwargs, Helper, Register};
use crate::markup::{brace_format, escape_value, format_escaped, is_markup, plain_text, HtmlValue};
use crate::urls::UrlReverser;

/// Default `datetime` format, itself run through translation.
pub const DEFAULT_DATETIME_FORMAT: &str = "%B %e, %Y";

/// Installs the built-in helpers.
///
/// `url` is registered without replacing, so a `url` from an application
/// whose helpers ran earlier stays in effect.
pub fn install(register: &Register<'_>, reverser: Option<Arc<dyn UrlReverser>>) {
    register
        .register_function("csrf", |state, _| Ok(csrf(state)))
        .register_filter("f", |_, args| {
            let (args, kwargs) = split_kwargs(args)?;
            let template = arg("f", args, 0)?;
            Ok(f(template, &args[1..], &kwargs))
        })
        .register_filter("fe", |_, args| {
            let (args, kwargs) = split_kwargs(args)?;
            let template = arg("fe", args, 0)?;
            Ok(format_escaped(&plain_text(template), &args[1..], &kwargs))
        })
        .register_filter("nl2br", |_, args| Ok(nl2br(arg("nl2br", args, 0)?)))
        .register_filter("datetime", |_, args| {
            let format = args.get(1).filter(|v| !v.is_none() && !v.is_undefined());
            datetime(arg("datetime", args, 0)?, format.map(plain_text).as_deref())
        })
        .register_filter("ifeq", |_, args| {
            Ok(ifeq(arg("ifeq", args, 0)?, arg("ifeq", args, 1)?, arg("ifeq", args, 2)?))
        })
        .register_filter("class_selected", |_, args| {
            Ok(class_selected(
                arg("class_selected", args, 0)?,
                arg("class_selected", args, 1)?,
            ))
        })
        .register_filter("field_attrs", |_, args| {
            let (args, kwargs) = split_kwargs(args)?;
            Ok(field_attrs(arg("field_attrs", args, 0)?, &kwargs))
        })
        .register_filter("urlparams", |_, args| {
            let (args, kwargs) = split_kwargs(args)?;
            let url = plain_text(arg("urlparams", args, 0)?);
            let mut fragment = args.get(1).cloned();
            let mut query = Vec::with_capacity(kwargs.len());
            for (key, value) in kwargs {
                if key == "hash" {
                    fragment = Some(value);
                } else {
                    query.push((key, value));
                }
            }
            let fragment = fragment.filter(|v| !v.is_none() && !v.is_undefined());
            Ok(Value::from(urlparams(&url, fragment.map(|v| plain_text(&v)).as_deref(), &query)))
        });

    let url: Helper = Arc::new(move |_: &State<'_, '_>, args: &[Value]| -> Result<Value, Error> {
        let (args, kwargs) = split_kwargs(args)?;
        let name = plain_text(arg("url", args, 0)?);
        let Some(reverser) = reverser.as_deref() else {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("cannot reverse '{name}': no URL reverser configured"),
            ));
        };
        let positional: Vec<String> = args[1..].iter().map(plain_text).collect();
        let named: BTreeMap<String, String> = kwargs.iter().map(|(k, v)| (k.clone(), plain_text(v))).collect();
        reverser
            .reverse(&name, &positional, &named)
            .map(Value::from)
            .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
    });
    register.register_function_with("url", url, false);
}

/// The hidden CSRF input for the `csrf_token` in the render context.
///
/// Empty when there is no token or it is the "not provided" placeholder.
pub fn csrf(state: &State<'_, '_>) -> Value {
    let token = state
        .lookup("csrf_token")
        .filter(|v| !v.is_none() && !v.is_undefined())
        .map(|v| plain_text(&v))
        .unwrap_or_default();
    Value::from_safe_string(csrf_input(&token))
}

/// Renders the hidden CSRF input for `token`.
pub fn csrf_input(token: &str) -> String {
    if token.is_empty() || token == CSRF_NOT_PROVIDED {
        return String::new();
    }
    format!(
        "<input type='hidden' name='csrfmiddlewaretoken' value='{}' />",
        escape_html(token)
    )
}

/// `str.format` on `template`.
///
/// A plain template gives a plain result that autoescaping will escape. A
/// markup template escapes the arguments instead and stays markup.
pub fn f(template: &Value, args: &[Value], kwargs: &[(String, Value)]) -> Value {
    if is_markup(template) {
        return format_escaped(&plain_text(template), args, kwargs);
    }
    let args: Vec<String> = args.iter().map(plain_text).collect();
    let kwargs: BTreeMap<String, String> = kwargs.iter().map(|(k, v)| (k.clone(), plain_text(v))).collect();
    Value::from(brace_format(&plain_text(template), &args, &kwargs))
}

/// Escapes `value` and joins its lines with `<br>`.
///
/// `\r\n`, `\n` and a lone `\r` all end a line; a trailing line ending
/// adds nothing.
pub fn nl2br(value: &Value) -> Value {
    if !value.is_true() {
        return Value::from("");
    }
    let escaped = escape_value(value);
    Value::from_safe_string(split_lines(&escaped).join("<br>"))
}

fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = text;
    while let Some(end) = rest.find(['\n', '\r']) {
        lines.push(&rest[..end]);
        let skip = if rest[end..].starts_with("\r\n") { 2 } else { 1 };
        rest = &rest[end + skip..];
    }
    if !rest.is_empty() {
        lines.push(rest);
    }
    lines
}

/// Converts a unix timestamp with a fractional part, or `None` out of range.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn from_fractional_timestamp(seconds: f64) -> Option<NaiveDateTime> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    if whole < i64::MIN as f64 || whole >= i64::MAX as f64 {
        return None;
    }
    let (secs, nanos) = (whole as i64, ((seconds - whole) * 1e9).round() as u32);
    // Rounding can carry a whole second.
    let (secs, nanos) = if nanos >= 1_000_000_000 {
        (secs.checked_add(1)?, 0)
    } else {
        (secs, nanos)
    };
    DateTime::from_timestamp(secs, nanos).map(|dt| dt.naive_utc())
}

/// Interprets `value` as a date-time.
///
/// Accepts ISO-8601 date-times (with or without an offset), plain dates, and
/// unix timestamps.
fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    if let Some(text) = value.as_str() {
        let text = text.trim();
        return NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.naive_local()))
            .or_else(|| {
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            });
    }
    if let Ok(seconds) = i64::try_from(value.clone()) {
        return DateTime::from_timestamp(seconds, 0).map(|dt| dt.naive_utc());
    }
    f64::try_from(value.clone()).ok().and_then(from_fractional_timestamp)
}

/// Formats `value` with `strftime`-style `format`.
///
/// The default format is translated first. Falsy values give `""`.
///
/// # Errors
///
/// Fails if `value` is not a recognizable date-time or `format` is invalid.
pub fn datetime(value: &Value, format: Option<&str>) -> Result<Value, Error> {
    if !value.is_true() {
        return Ok(Value::from(""));
    }
    let dt = parse_datetime(value).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("datetime: cannot interpret {value} as a date"),
        )
    })?;

    let format = format.map_or_else(|| jingo_core::i18n::gettext(DEFAULT_DATETIME_FORMAT), ToString::to_string);
    let mut out = String::new();
    write!(out, "{}", dt.format(&format)).map_err(|_| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("datetime: invalid format '{format}'"),
        )
    })?;
    Ok(Value::from(out))
}

/// Returns `text` as markup when `a == b`, otherwise an empty string.
pub fn ifeq(a: &Value, b: &Value, text: &Value) -> Value {
    if a == b {
        Value::from_safe_string(plain_text(text))
    } else {
        Value::from_safe_string(String::new())
    }
}

/// Returns `class="selected"` as markup when `a == b`.
pub fn class_selected(a: &Value, b: &Value) -> Value {
    ifeq(a, b, &Value::from(r#"class="selected""#))
}

/// Sets (or with `none`, removes) HTML attributes on an `Html` value.
///
/// Values that do not support attributes are returned unchanged.
pub fn field_attrs(value: &Value, attrs: &[(String, Value)]) -> Value {
    let Some(html) = value.downcast_object_ref::<HtmlValue>() else {
        return value.clone();
    };
    let attrs: Vec<(String, Option<String>)> = attrs
        .iter()
        .map(|(k, v)| {
            let v = (!v.is_none() && !v.is_undefined()).then(|| plain_text(v));
            (k.clone(), v)
        })
        .collect();
    html.0
        .with_attrs(&attrs)
        .map_or_else(|| value.clone(), |updated| Value::from_object(HtmlValue(updated)))
}

/// Adds, replaces or removes query parameters and the fragment of `url`.
///
/// A `none` value removes the parameter; a sequence gives one pair per item.
/// `fragment` replaces the fragment (an empty string removes it); `None`
/// keeps the existing one.
///
/// ```
/// use jingo_template::helpers::urlparams;
/// use minijinja::Value;
///
/// let url = urlparams("/shop?page=1&q=x#top", None, &[("page".into(), Value::from(2))]);
/// assert_eq!(url, "/shop?page=2&q=x#top");
/// ```
pub fn urlparams(url: &str, fragment: Option<&str>, query: &[(String, Value)]) -> String {
    let (rest, old_fragment) = url.split_once('#').unwrap_or((url, ""));
    let (path, old_query) = rest.split_once('?').unwrap_or((rest, ""));

    // Existing pairs keep their position; a repeated key keeps its last value.
    let mut pairs: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in url::form_urlencoded::parse(old_query.as_bytes()) {
        match pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = vec![value.into_owned()],
            None => pairs.push((key.into_owned(), vec![value.into_owned()])),
        }
    }

    for (key, value) in query {
        let values: Vec<String> = if value.is_none() || value.is_undefined() {
            Vec::new()
        } else if let (false, Ok(items)) = (value.as_str().is_some(), value.try_iter()) {
            items.map(|v| plain_text(&v)).collect()
        } else {
            vec![plain_text(value)]
        };
        match pairs.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = values,
            None => pairs.push((key.clone(), values)),
        }
    }

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, values) in &pairs {
        for value in values {
            serializer.append_pair(key, value);
        }
    }
    let query_string = serializer.finish();
    let fragment = fragment.unwrap_or(old_fragment);

    let mut out = path.to_string();
    if !query_string.is_empty() {
        out.push('?');
        out.push_str(&query_string);
    }
    if !fragment.is_empty() {
        out.push('#');
        out.push_str(fragment);
    }
    out
}
