//! # jingo-template
//!
//! A Jinja-style template bridge for Django-shaped applications, built on
//! `minijinja`. It resolves template names across configured directories and
//! installed applications, renders layered contexts, keeps safe strings and
//! host markup from being escaped twice, and ships the usual helper filters
//! and translation globals.
//!
//! ## Modules
//!
//! - [`environment`] - The environment, its builder and template handles
//! - [`loaders`] - Template loaders, the loader chain and the inclusion filter
//! - [`context`] - Context values and layered contexts
//! - [`markup`] - Safe-string interop and escaping-aware formatting
//! - [`library`] - Filter, function, global and inclusion-tag registration
//! - [`helpers`] - Built-in helper filters and functions
//! - [`i18n`] - Translation globals
//! - [`context_processors`] - Request-derived context
//! - [`urls`] - URL reversal for the `url()` helper
//! - [`signals`] - Render notifications for test tooling
//! - [`request`] - The request view context processors read
//! - [`global`] - The process-wide environment

pub mod context;
pub mod context_processors;
pub mod environment;
pub mod global;
pub mod helpers;
pub mod i18n;
pub mod library;
pub mod loaders;
pub mod markup;
pub mod request;
pub mod signals;
pub mod urls;

pub use context::{mark_safe, Context, ContextValue, RenderContext};
pub use environment::{EngineOptions, Environment, EnvironmentBuilder, Template, TemplateSource};
pub use global::{get_env, render_to_string};
pub use library::{HelperModule, Register};
pub use loaders::{ChoiceLoader, InclusionFilter, JingoLoader, Origin, TemplateLoader};
pub use markup::Html;
