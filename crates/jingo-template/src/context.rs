//! Host-side template context.
//!
//! [`ContextValue`] is the value model host code hands to templates, with
//! [`ContextValue::SafeString`] and [`ContextValue::Html`] carrying the
//! "already escaped" capability. [`Context`] is the layered context (an
//! ordered stack of mappings, most specific last) and [`RenderContext`]
//! accepts either a layered or a flat mapping as render input.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::markup::Html;

/// A dynamic value in a template context.
#[derive(Debug, Clone)]
pub enum ContextValue {
    /// A plain string; escaped on output.
    String(String),
    /// A 64-bit integer.
    Integer(i64),
    /// A 64-bit floating point number.
    Float(f64),
    /// A boolean value.
    Bool(bool),
    /// An ordered list of values.
    List(Vec<ContextValue>),
    /// A key-value mapping.
    Dict(HashMap<String, ContextValue>),
    /// The absence of a value.
    None,
    /// A string that is already valid markup and must not be escaped again.
    SafeString(String),
    /// A host object that renders itself as markup (form fields, widgets).
    Html(Arc<dyn Html>),
}

impl ContextValue {
    /// Returns `true` if this value is truthy in template logic.
    ///
    /// `None`, `false`, zero, and empty strings and collections are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) | Self::SafeString(s) => !s.is_empty(),
            Self::List(l) => !l.is_empty(),
            Self::Dict(d) => !d.is_empty(),
            Self::Html(_) => true,
        }
    }

    /// Converts this value to a display string (without HTML escaping).
    pub fn to_display_string(&self) -> String {
        match self {
            Self::String(s) | Self::SafeString(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(Self::to_display_string).collect();
                format!("[{}]", inner.join(", "))
            }
            Self::Dict(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let inner: Vec<String> = keys
                    .into_iter()
                    .map(|k| format!("{k}: {}", map[k].to_display_string()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Self::None => String::new(),
            Self::Html(html) => html.to_html(),
        }
    }

    /// Returns `true` if this value is exempt from autoescaping.
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::SafeString(_) | Self::Html(_))
    }

    /// Marks a string value as safe. Other values are returned unchanged.
    #[must_use]
    pub fn mark_safe(self) -> Self {
        match self {
            Self::String(s) => Self::SafeString(s),
            other => other,
        }
    }

    /// Resolves one path segment on this value (a dict key or list index).
    pub fn resolve_path(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Dict(map) => map.get(key),
            Self::List(list) => key.parse::<usize>().ok().and_then(|idx| list.get(idx)),
            _ => None,
        }
    }

    /// Returns the string contents if this is a `String` or `SafeString`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::SafeString(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl PartialEq for ContextValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a) | Self::SafeString(a), Self::String(b) | Self::SafeString(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            #[allow(clippy::cast_precision_loss)]
            (Self::Integer(a), Self::Float(b)) | (Self::Float(b), Self::Integer(a)) => {
                (*a as f64) == *b
            }
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::None, Self::None) => true,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Dict(a), Self::Dict(b)) => a == b,
            (Self::Html(a), Self::Html(b)) => a.to_html() == b.to_html(),
            _ => false,
        }
    }
}

// -- From implementations --

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i32> for ContextValue {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<i64> for ContextValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<u32> for ContextValue {
    fn from(i: u32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<usize> for ContextValue {
    fn from(i: usize) -> Self {
        Self::Integer(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for ContextValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for ContextValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Datetimes travel as ISO-8601 strings, which the `datetime` filter parses.
impl From<chrono::NaiveDateTime> for ContextValue {
    fn from(dt: chrono::NaiveDateTime) -> Self {
        Self::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string())
    }
}

impl From<chrono::NaiveDate> for ContextValue {
    fn from(d: chrono::NaiveDate) -> Self {
        Self::String(d.format("%Y-%m-%d").to_string())
    }
}

impl<T: Into<Self>> From<Vec<T>> for ContextValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Self>> From<HashMap<String, T>> for ContextValue {
    fn from(m: HashMap<String, T>) -> Self {
        Self::Dict(m.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Self>> From<Option<T>> for ContextValue {
    fn from(o: Option<T>) -> Self {
        o.map_or(Self::None, Into::into)
    }
}

impl From<Arc<dyn Html>> for ContextValue {
    fn from(html: Arc<dyn Html>) -> Self {
        Self::Html(html)
    }
}

impl From<serde_json::Value> for ContextValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::None,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::None),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(arr) => Self::List(arr.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => {
                Self::Dict(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

/// A layered template context: an ordered stack of mappings where later
/// layers shadow earlier ones.
///
/// # Examples
///
/// ```
/// use jingo_template::context::{Context, ContextValue};
///
/// let mut ctx = Context::new();
/// ctx.set("name", ContextValue::from("outer"));
///
/// ctx.push();
/// ctx.set("name", ContextValue::from("inner"));
/// assert_eq!(ctx.get("name").unwrap().to_display_string(), "inner");
///
/// ctx.pop();
/// assert_eq!(ctx.get("name").unwrap().to_display_string(), "outer");
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    stack: Vec<HashMap<String, ContextValue>>,
}

impl Context {
    /// Creates a new empty context with a single layer.
    pub fn new() -> Self {
        Self {
            stack: vec![HashMap::new()],
        }
    }

    /// Creates a context from layers ordered outermost first.
    pub fn from_layers(layers: Vec<HashMap<String, ContextValue>>) -> Self {
        if layers.is_empty() {
            return Self::new();
        }
        Self { stack: layers }
    }

    /// Returns the layers, outermost first.
    pub fn layers(&self) -> &[HashMap<String, ContextValue>] {
        &self.stack
    }

    /// Pushes a new empty layer.
    pub fn push(&mut self) {
        self.stack.push(HashMap::new());
    }

    /// Pushes `layer` on top of the stack.
    pub fn update(&mut self, layer: HashMap<String, ContextValue>) {
        self.stack.push(layer);
    }

    /// Pops the top layer. The last remaining layer is never removed.
    pub fn pop(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    /// Sets a variable in the top layer.
    pub fn set(&mut self, key: impl Into<String>, value: ContextValue) {
        if let Some(top) = self.stack.last_mut() {
            top.insert(key.into(), value);
        }
    }

    /// Looks up a variable, searching from the top layer downward.
    ///
    /// Dotted paths such as `user.name` or `items.0` descend into dicts and lists.
    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        let mut parts = key.split('.');
        let root = parts.next()?;

        let mut current = self.stack.iter().rev().find_map(|layer| layer.get(root))?;
        for part in parts {
            current = current.resolve_path(part)?;
        }
        Some(current)
    }

    /// Collapses the layers into one mapping. Layers are applied outermost
    /// first, so a later layer's value wins on key conflicts.
    pub fn flatten(&self) -> HashMap<String, ContextValue> {
        let mut result = HashMap::new();
        for layer in &self.stack {
            for (k, v) in layer {
                result.insert(k.clone(), v.clone());
            }
        }
        result
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Render input: either a layered host context or an already flat mapping.
#[derive(Debug, Clone)]
pub enum RenderContext {
    /// A layered context, flattened just before rendering.
    Layered(Context),
    /// A single mapping used as-is.
    Flat(HashMap<String, ContextValue>),
}

impl RenderContext {
    /// Returns an empty flat context.
    pub fn empty() -> Self {
        Self::Flat(HashMap::new())
    }

    /// Converts the input into the single mapping handed to the engine.
    pub fn flatten(self) -> HashMap<String, ContextValue> {
        match self {
            Self::Layered(ctx) => ctx.flatten(),
            Self::Flat(map) => map,
        }
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<()> for RenderContext {
    fn from((): ()) -> Self {
        Self::empty()
    }
}

impl From<Context> for RenderContext {
    fn from(ctx: Context) -> Self {
        Self::Layered(ctx)
    }
}

impl From<HashMap<String, ContextValue>> for RenderContext {
    fn from(map: HashMap<String, ContextValue>) -> Self {
        Self::Flat(map)
    }
}

/// A JSON object becomes a flat context; any other JSON value is empty.
impl From<serde_json::Value> for RenderContext {
    fn from(value: serde_json::Value) -> Self {
        match ContextValue::from(value) {
            ContextValue::Dict(map) => Self::Flat(map),
            _ => Self::empty(),
        }
    }
}

impl<const N: usize> From<[(&str, ContextValue); N]> for RenderContext {
    fn from(pairs: [(&str, ContextValue); N]) -> Self {
        Self::Flat(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }
}

/// Marks a string value as safe, bypassing HTML auto-escaping.
pub fn mark_safe(value: impl Into<ContextValue>) -> ContextValue {
    value.into().mark_safe()
}

/// Escapes HTML special characters in a string.
///
/// Replaces `&`, `<`, `>`, `"`, and `'` with their HTML entity equivalents.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
