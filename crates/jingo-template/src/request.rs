//! The request handed to context processors.
//!
//! [`HttpRequest`] carries just what template rendering consumes: method,
//! path, query string, scheme, server metadata, and cookies.

use std::collections::HashMap;

use http::Method;

/// An incoming request as seen by the template layer.
///
/// # Examples
///
/// ```
/// use jingo_template::request::HttpRequest;
///
/// let request = HttpRequest::builder()
///     .path("/shop/cart/")
///     .query_string("page=2")
///     .cookie("csrftoken", "abc")
///     .build();
///
/// assert_eq!(request.get_full_path(), "/shop/cart/?page=2");
/// assert_eq!(request.cookie("csrftoken"), Some("abc"));
/// ```
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    path: String,
    query_string: String,
    scheme: String,
    meta: HashMap<String, String>,
    cookies: HashMap<String, String>,
}

impl HttpRequest {
    /// Creates a new [`HttpRequestBuilder`].
    pub fn builder() -> HttpRequestBuilder {
        HttpRequestBuilder::default()
    }

    /// Returns the HTTP method.
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the raw query string (without the leading `?`).
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    /// Returns the URL scheme (`"http"` or `"https"`).
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns `true` if the request uses HTTPS.
    pub fn is_secure(&self) -> bool {
        self.scheme == "https"
    }

    /// Returns the server metadata (`REQUEST_METHOD`, `HTTP_*` headers, ...).
    pub const fn meta(&self) -> &HashMap<String, String> {
        &self.meta
    }

    /// Returns all cookies.
    pub const fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// Gets a cookie value by name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Returns the host from the `Host` header or `SERVER_NAME`.
    pub fn get_host(&self) -> &str {
        self.meta
            .get("HTTP_HOST")
            .or_else(|| self.meta.get("SERVER_NAME"))
            .map_or("localhost", String::as_str)
    }

    /// Returns the path including the query string.
    pub fn get_full_path(&self) -> String {
        if self.query_string.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string)
        }
    }
}

/// Builder for [`HttpRequest`].
#[derive(Debug)]
pub struct HttpRequestBuilder {
    method: Method,
    path: String,
    query_string: String,
    scheme: String,
    meta: HashMap<String, String>,
    cookies: HashMap<String, String>,
}

impl Default for HttpRequestBuilder {
    fn default() -> Self {
        Self {
            method: Method::GET,
            path: "/".to_string(),
            query_string: String::new(),
            scheme: "http".to_string(),
            meta: HashMap::new(),
            cookies: HashMap::new(),
        }
    }
}

impl HttpRequestBuilder {
    /// Sets the HTTP method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets the request path.
    #[must_use]
    pub fn path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    /// Sets the query string (without leading `?`).
    #[must_use]
    pub fn query_string(mut self, qs: &str) -> Self {
        self.query_string = qs.to_string();
        self
    }

    /// Sets the scheme (http or https).
    #[must_use]
    pub fn scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    /// Adds a header, stored in META as `HTTP_<NAME>`.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let key = format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"));
        self.meta.insert(key, value.to_string());
        self
    }

    /// Adds a META entry.
    #[must_use]
    pub fn meta(mut self, key: &str, value: &str) -> Self {
        self.meta.insert(key.to_string(), value.to_string());
        self
    }

    /// Adds a cookie.
    #[must_use]
    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    /// Builds the [`HttpRequest`].
    pub fn build(self) -> HttpRequest {
        let mut meta = self.meta;
        meta.entry("REQUEST_METHOD".to_string())
            .or_insert_with(|| self.method.to_string());
        meta.entry("PATH_INFO".to_string())
            .or_insert_with(|| self.path.clone());
        meta.entry("QUERY_STRING".to_string())
            .or_insert_with(|| self.query_string.clone());

        HttpRequest {
            method: self.method,
            path: self.path,
            query_string: self.query_string,
            scheme: self.scheme,
            meta,
            cookies: self.cookies,
        }
    }
}
