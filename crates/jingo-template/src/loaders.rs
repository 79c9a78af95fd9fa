//! Template loaders.
//!
//! A [`TemplateLoader`] finds and reads template source by name. The
//! environment searches an ordered [`ChoiceLoader`]: explicit directories
//! first, then one [`AppDirectoriesLoader`] per installed application in
//! registration order. The first loader that has the name wins, which is how
//! a project directory overrides an application's template of the same name.
//!
//! [`JingoLoader`] is the host-facing entry point. It consults the
//! [`InclusionFilter`] before anything else, so names this bridge does not
//! handle are rejected without touching any loader. Both rejection and a
//! genuine miss surface as [`JingoError::TemplateDoesNotExist`], letting the
//! host fall through to its next loader.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use jingo_core::apps::AppConfig;
use jingo_core::{JingoError, Settings};
use regex::Regex;

use crate::environment::{Environment, Template};

// ============================================================
// Errors and origins
// ============================================================

/// Why a name did not resolve to template source.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The inclusion filter rejected the name before any lookup.
    #[error("template '{name}' is not handled by jingo")]
    NotEligible {
        /// The requested name.
        name: String,
    },

    /// No loader had the name.
    #[error("template '{name}' not found (tried: {})", .tried.join(", "))]
    NotFound {
        /// The requested name.
        name: String,
        /// Descriptions of the loaders that were searched.
        tried: Vec<String>,
    },

    /// The template exists but could not be read.
    #[error("template '{name}' could not be read: {source}")]
    Unreadable {
        /// The requested name.
        name: String,
        /// The underlying I/O failure.
        source: std::io::Error,
    },
}

impl ResolveError {
    fn not_found(name: &str, tried: Vec<String>) -> Self {
        Self::NotFound {
            name: name.to_string(),
            tried,
        }
    }
}

impl From<ResolveError> for JingoError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotEligible { name } | ResolveError::NotFound { name, .. } => {
                Self::TemplateDoesNotExist(name)
            }
            ResolveError::Unreadable { source, .. } => Self::IoError(source),
        }
    }
}

/// Where a template's source was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A file on disk, with its modification time when it was resolved.
    File {
        /// Absolute or root-relative path of the file.
        path: PathBuf,
        /// Modification time, if the filesystem reports one.
        modified: Option<SystemTime>,
    },
    /// An in-memory template.
    Memory {
        /// The name the template was registered under.
        name: String,
    },
}

impl Origin {
    fn file(path: PathBuf) -> Self {
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        Self::File { path, modified }
    }

    /// Returns the file path for file-backed templates.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File { path, .. } => Some(path),
            Self::Memory { .. } => None,
        }
    }

    /// Returns the modification time recorded at resolution.
    pub const fn modified(&self) -> Option<SystemTime> {
        match self {
            Self::File { modified, .. } => *modified,
            Self::Memory { .. } => None,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { path, .. } => write!(f, "{}", path.display()),
            Self::Memory { name } => write!(f, "<memory:{name}>"),
        }
    }
}

// ============================================================
// Loader trait and implementations
// ============================================================

/// Finds and reads template source by name.
pub trait TemplateLoader: Send + Sync {
    /// Returns where `name` would be loaded from, without reading it.
    fn find(&self, name: &str) -> Option<Origin>;

    /// Reads the source for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::NotFound`] if this loader does not have the
    /// name, or [`ResolveError::Unreadable`] if reading it failed.
    fn load(&self, name: &str) -> Result<(String, Origin), ResolveError>;

    /// A short description used in diagnostics.
    fn describe(&self) -> String;
}

/// Joins a slash-separated template name onto `root`.
///
/// Empty and `.` segments are ignored; any `..` segment rejects the name so
/// lookups never escape the root.
fn safe_join(root: &Path, name: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    let mut pushed = false;
    for segment in name.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return None,
            s => {
                path.push(s);
                pushed = true;
            }
        }
    }
    pushed.then_some(path)
}

/// Loads templates from a single directory.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    root: PathBuf,
}

impl FileSystemLoader {
    /// Creates a loader rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the search root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TemplateLoader for FileSystemLoader {
    fn find(&self, name: &str) -> Option<Origin> {
        let path = safe_join(&self.root, name)?;
        path.is_file().then(|| Origin::file(path))
    }

    fn load(&self, name: &str) -> Result<(String, Origin), ResolveError> {
        let origin = self
            .find(name)
            .ok_or_else(|| ResolveError::not_found(name, vec![self.describe()]))?;
        let path = origin.path().unwrap_or(&self.root);
        let source = std::fs::read_to_string(path).map_err(|source| ResolveError::Unreadable {
            name: name.to_string(),
            source,
        })?;
        Ok((source, origin))
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

/// Loads templates from one application's `templates/` directory.
#[derive(Debug, Clone)]
pub struct AppDirectoriesLoader {
    label: String,
    inner: FileSystemLoader,
}

impl AppDirectoriesLoader {
    /// Creates a loader for the application `label` searching `templates_dir`.
    pub fn new(label: impl Into<String>, templates_dir: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            inner: FileSystemLoader::new(templates_dir),
        }
    }

    /// Creates a loader for `app`, or `None` if it has no package directory.
    pub fn for_app(app: &dyn AppConfig) -> Option<Self> {
        app.templates_dir().map(|dir| Self::new(app.label(), dir))
    }

    /// Returns the application label.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl TemplateLoader for AppDirectoriesLoader {
    fn find(&self, name: &str) -> Option<Origin> {
        self.inner.find(name)
    }

    fn load(&self, name: &str) -> Result<(String, Origin), ResolveError> {
        self.inner.load(name).map_err(|err| match err {
            ResolveError::NotFound { name, .. } => ResolveError::NotFound {
                name,
                tried: vec![self.describe()],
            },
            other => other,
        })
    }

    fn describe(&self) -> String {
        format!("app '{}' ({})", self.label, self.inner.root().display())
    }
}

/// Loads templates from an in-memory map of names to sources.
///
/// Useful for tests and for templates stored outside the filesystem.
#[derive(Debug, Default)]
pub struct StringLoader {
    templates: RwLock<HashMap<String, String>>,
}

impl StringLoader {
    /// Creates an empty `StringLoader`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `StringLoader` from a map of names to sources.
    pub fn from_map(templates: HashMap<String, String>) -> Self {
        Self {
            templates: RwLock::new(templates),
        }
    }

    /// Adds or replaces a template.
    pub fn add(&self, name: impl Into<String>, source: impl Into<String>) {
        self.templates
            .write()
            .expect("string loader lock poisoned")
            .insert(name.into(), source.into());
    }
}

impl TemplateLoader for StringLoader {
    fn find(&self, name: &str) -> Option<Origin> {
        self.templates
            .read()
            .expect("string loader lock poisoned")
            .contains_key(name)
            .then(|| Origin::Memory {
                name: name.to_string(),
            })
    }

    fn load(&self, name: &str) -> Result<(String, Origin), ResolveError> {
        self.templates
            .read()
            .expect("string loader lock poisoned")
            .get(name)
            .map(|source| {
                (
                    source.clone(),
                    Origin::Memory {
                        name: name.to_string(),
                    },
                )
            })
            .ok_or_else(|| ResolveError::not_found(name, vec![self.describe()]))
    }

    fn describe(&self) -> String {
        "in-memory templates".to_string()
    }
}

/// Searches loaders in order; the first that has the name wins.
///
/// With the negative cache enabled, names found in no loader are remembered
/// and later lookups fail without searching. The environment only enables
/// it when auto-reload is off, since a remembered miss would hide a template
/// created after start-up.
pub struct ChoiceLoader {
    loaders: Vec<Box<dyn TemplateLoader>>,
    misses: Option<RwLock<HashSet<String>>>,
}

impl fmt::Debug for ChoiceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChoiceLoader")
            .field(
                "loaders",
                &self.loaders.iter().map(|l| l.describe()).collect::<Vec<_>>(),
            )
            .field("negative_cache", &self.misses.is_some())
            .finish()
    }
}

impl ChoiceLoader {
    /// Creates a loader chain searched in the given order.
    pub fn new(loaders: Vec<Box<dyn TemplateLoader>>) -> Self {
        Self {
            loaders,
            misses: None,
        }
    }

    /// Enables remembering names that no loader has.
    #[must_use]
    pub fn with_negative_cache(mut self) -> Self {
        self.misses = Some(RwLock::new(HashSet::new()));
        self
    }

    /// Returns the number of loaders in the chain.
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    /// Returns `true` if the chain has no loaders.
    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    /// Returns the loader descriptions in search order.
    pub fn describe_all(&self) -> Vec<String> {
        self.loaders.iter().map(|l| l.describe()).collect()
    }

    /// Forgets all remembered misses.
    pub fn clear_cache(&self) {
        if let Some(misses) = &self.misses {
            misses.write().expect("negative cache lock poisoned").clear();
        }
    }

    fn is_known_miss(&self, name: &str) -> bool {
        self.misses.as_ref().is_some_and(|misses| {
            misses
                .read()
                .expect("negative cache lock poisoned")
                .contains(name)
        })
    }

    fn remember_miss(&self, name: &str) {
        if let Some(misses) = &self.misses {
            misses
                .write()
                .expect("negative cache lock poisoned")
                .insert(name.to_string());
        }
    }

    /// Finds the first loader that has `name`.
    ///
    /// Returns the origin and the index of the winning loader.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::NotFound`] listing every loader searched.
    pub fn resolve(&self, name: &str) -> Result<(Origin, usize), ResolveError> {
        if self.is_known_miss(name) {
            tracing::trace!(template = name, "negative cache hit");
            return Err(ResolveError::not_found(name, Vec::new()));
        }

        for (index, loader) in self.loaders.iter().enumerate() {
            if let Some(origin) = loader.find(name) {
                tracing::debug!(template = name, %origin, loader = index, "template resolved");
                return Ok((origin, index));
            }
            tracing::trace!(template = name, loader = %loader.describe(), "not in loader");
        }

        self.remember_miss(name);
        Err(ResolveError::not_found(name, self.describe_all()))
    }
}

impl TemplateLoader for ChoiceLoader {
    fn find(&self, name: &str) -> Option<Origin> {
        self.resolve(name).ok().map(|(origin, _)| origin)
    }

    fn load(&self, name: &str) -> Result<(String, Origin), ResolveError> {
        let (_, index) = self.resolve(name)?;
        self.loaders[index].load(name)
    }

    fn describe(&self) -> String {
        format!("choice of [{}]", self.describe_all().join(", "))
    }
}

// ============================================================
// Inclusion filter
// ============================================================

/// Decides whether a template name is handled by this bridge at all.
///
/// A name is eligible when it matches the include pattern (if one is set;
/// the pattern may match anywhere in the name) and its first path segment
/// is not an excluded namespace.
#[derive(Debug, Clone, Default)]
pub struct InclusionFilter {
    pattern: Option<Regex>,
    exclude: BTreeSet<String>,
}

impl InclusionFilter {
    /// Creates a filter from an optional pattern and excluded namespaces.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::ImproperlyConfigured`] if the pattern does not compile.
    pub fn new<I, S>(pattern: Option<&str>, exclude: I) -> Result<Self, JingoError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pattern = pattern
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    JingoError::ImproperlyConfigured(format!("Invalid include pattern '{p}': {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            pattern,
            exclude: exclude.into_iter().map(Into::into).collect(),
        })
    }

    /// Builds the filter from `jingo_include_pattern` and `jingo_exclude_apps`.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::ImproperlyConfigured`] if the pattern does not compile.
    pub fn from_settings(settings: &Settings) -> Result<Self, JingoError> {
        Self::new(
            settings.jingo_include_pattern.as_deref(),
            settings.jingo_exclude_apps.iter().cloned(),
        )
    }

    /// Returns `true` if `name` may be resolved by this bridge.
    pub fn is_eligible(&self, name: &str) -> bool {
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(name) {
                return false;
            }
        }
        let namespace = name.split('/').next().unwrap_or_default();
        !self.exclude.contains(namespace)
    }

    /// Like [`is_eligible`](Self::is_eligible), but as a [`ResolveError`].
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::NotEligible`] for rejected names.
    pub fn check(&self, name: &str) -> Result<(), ResolveError> {
        if self.is_eligible(name) {
            Ok(())
        } else {
            tracing::debug!(template = name, "template not eligible for jingo");
            Err(ResolveError::NotEligible {
                name: name.to_string(),
            })
        }
    }

    /// Returns the excluded namespaces.
    pub const fn excluded(&self) -> &BTreeSet<String> {
        &self.exclude
    }
}

// ============================================================
// Host-facing loader
// ============================================================

/// The loader a host template pipeline calls into.
///
/// Every lookup passes the environment's [`InclusionFilter`] first; only
/// eligible names reach the environment's loader chain.
#[derive(Clone, Copy)]
pub struct JingoLoader<'env> {
    env: &'env Environment,
}

impl fmt::Debug for JingoLoader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JingoLoader")
            .field("filter", self.env.inclusion_filter())
            .finish_non_exhaustive()
    }
}

impl<'env> JingoLoader<'env> {
    /// Creates a loader backed by `env`.
    pub const fn new(env: &'env Environment) -> Self {
        Self { env }
    }

    /// Loads and compiles `name` into a template handle.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::TemplateDoesNotExist`] for ineligible or missing
    /// names, or a syntax error from compilation.
    pub fn load_template(&self, name: &str) -> Result<Template<'env>, JingoError> {
        self.env.inclusion_filter().check(name)?;
        self.env.get_template(name)
    }

    /// Reads the raw source for `name` and where it came from.
    ///
    /// # Errors
    ///
    /// Returns [`JingoError::TemplateDoesNotExist`] for ineligible or missing names.
    pub fn load_template_source(&self, name: &str) -> Result<(String, Origin), JingoError> {
        self.env.inclusion_filter().check(name)?;
        Ok(self.env.loader().load(name)?)
    }
}

impl TemplateLoader for JingoLoader<'_> {
    fn find(&self, name: &str) -> Option<Origin> {
        if !self.env.inclusion_filter().is_eligible(name) {
            return None;
        }
        self.env.loader().find(name)
    }

    fn load(&self, name: &str) -> Result<(String, Origin), ResolveError> {
        self.env.inclusion_filter().check(name)?;
        self.env.loader().load(name)
    }

    fn describe(&self) -> String {
        format!("jingo ({})", self.env.loader().describe())
    }
}
