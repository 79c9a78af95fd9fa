//! URL reversal for the `url()` helper.
//!
//! The bridge does not route requests; it only needs to turn a route name and
//! arguments into a path. Hosts plug their router in by implementing
//! [`UrlReverser`]; [`RouteTable`] is a small standalone implementation.

use std::collections::BTreeMap;

use jingo_core::{JingoError, JingoResult};

/// Turns a named route plus arguments into a URL path.
pub trait UrlReverser: Send + Sync {
    /// Reverses `name` using positional `args` and keyword `kwargs`.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::NoReverseMatch`] if the name is unknown or the
    /// arguments do not fill the route.
    fn reverse(&self, name: &str, args: &[String], kwargs: &BTreeMap<String, String>) -> JingoResult<String>;
}

/// Named routes with `<name>` or `<converter:name>` placeholders.
///
/// Placeholders are filled from keyword arguments first, then from
/// positional arguments in order.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use jingo_template::urls::{RouteTable, UrlReverser};
///
/// let mut routes = RouteTable::new();
/// routes.add("article", "articles/<int:year>/<slug>/").unwrap();
///
/// let url = routes
///     .reverse("article", &["2024".into(), "hello".into()], &BTreeMap::new())
///     .unwrap();
/// assert_eq!(url, "/articles/2024/hello/");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: BTreeMap<String, String>,
}

impl RouteTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a named route.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::ImproperlyConfigured`] for an unclosed `<`.
    pub fn add(&mut self, name: impl Into<String>, route: impl Into<String>) -> JingoResult<&mut Self> {
        let route = route.into();
        let mut rest = route.as_str();
        while let Some(start) = rest.find('<') {
            let Some(end) = rest[start..].find('>') else {
                return Err(JingoError::ImproperlyConfigured(format!(
                    "Unclosed angle bracket in route: {route}"
                )));
            };
            rest = &rest[start + end + 1..];
        }
        self.routes.insert(name.into(), route);
        Ok(self)
    }

    /// Returns `true` if a route with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }
}

impl UrlReverser for RouteTable {
    fn reverse(&self, name: &str, args: &[String], kwargs: &BTreeMap<String, String>) -> JingoResult<String> {
        let route = self
            .routes
            .get(name)
            .ok_or_else(|| JingoError::NoReverseMatch(format!("Reverse for '{name}' not found")))?;

        let mut result = String::new();
        let mut remaining = route.as_str();
        let mut positional = args.iter();

        while let Some(start) = remaining.find('<') {
            result.push_str(&remaining[..start]);
            // Routes are validated in `add`, so the bracket is closed.
            let end = remaining[start..].find('>').map_or(remaining.len(), |e| e + start);
            let inner = &remaining[start + 1..end];
            let param = inner.rsplit(':').next().unwrap_or(inner);

            let value = kwargs
                .get(param)
                .or_else(|| positional.next())
                .ok_or_else(|| {
                    JingoError::NoReverseMatch(format!(
                        "Reverse for '{name}' is missing a value for '{param}'"
                    ))
                })?;
            result.push_str(value);
            remaining = remaining.get(end + 1..).unwrap_or_default();
        }
        result.push_str(remaining);

        if result.starts_with('/') {
            Ok(result)
        } else {
            Ok(format!("/{result}"))
        }
    }
}
