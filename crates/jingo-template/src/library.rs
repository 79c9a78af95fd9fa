//! Helper registration.
//!
//! [`Register`] is the handle helper code uses to expose filters, global
//! functions, global values and inclusion tags to templates. Every
//! registration takes a `replace` flag: with `true` a later registration
//! replaces an existing helper of the same name, with `false` the first
//! registration is kept. The shorthand methods (`register_filter`,
//! `register_function`, ...) always replace.
//!
//! Applications contribute helpers through a [`HelperModule`] attached to the
//! environment builder. Modules run once, on first template resolution.
//!
//! ## Examples
//!
//! ```
//! use jingo_template::environment::Environment;
//! use jingo_template::library::Register;
//! use minijinja::Value;
//!
//! let env = Environment::builder().build().unwrap();
//! env.register().register_filter("shout", |_state, args| {
//!     let text = args.first().map(ToString::to_string).unwrap_or_default();
//!     Ok(Value::from(text.to_uppercase()))
//! });
//!
//! let html = env.from_string("{{ 'hi' | shout }}").unwrap().render(()).unwrap();
//! assert_eq!(html, "HI");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use minijinja::{Error, ErrorKind, State, Value};

use crate::context::ContextValue;
use crate::environment::Environment;
use crate::markup::context_to_value;

/// A filter or function callable from templates.
///
/// Filters receive the piped value as the first argument. Keyword arguments,
/// if any, arrive as a trailing kwargs value; see [`split_kwargs`].
pub type Helper = Arc<dyn Fn(&State<'_, '_>, &[Value]) -> Result<Value, Error> + Send + Sync>;

/// A function computing the context of an inclusion tag.
pub type InclusionFn =
    Arc<dyn Fn(&State<'_, '_>, &[Value]) -> Result<HashMap<String, ContextValue>, Error> + Send + Sync>;

/// A unit of helper registrations contributed by an application.
pub trait HelperModule: Send + Sync {
    /// Registers this module's helpers.
    fn register(&self, register: &Register<'_>);
}

impl<F> HelperModule for F
where
    F: Fn(&Register<'_>) + Send + Sync,
{
    fn register(&self, register: &Register<'_>) {
        self(register);
    }
}

/// Registration handle for an [`Environment`].
#[derive(Clone, Copy)]
pub struct Register<'env> {
    env: &'env Environment,
}

impl fmt::Debug for Register<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Register").finish_non_exhaustive()
    }
}

impl<'env> Register<'env> {
    pub(crate) const fn new(env: &'env Environment) -> Self {
        Self { env }
    }

    /// Registers a filter, replacing any existing filter of the same name.
    pub fn register_filter<F>(&self, name: &str, func: F) -> &Self
    where
        F: Fn(&State<'_, '_>, &[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.env.install_filter(name, Arc::new(func), true);
        self
    }

    /// Registers a filter. Returns `false` if `replace` is off and a filter
    /// of that name was already present.
    pub fn register_filter_with(&self, name: &str, func: Helper, replace: bool) -> bool {
        self.env.install_filter(name, func, replace)
    }

    /// Registers a global function, replacing any existing global of the same name.
    pub fn register_function<F>(&self, name: &str, func: F) -> &Self
    where
        F: Fn(&State<'_, '_>, &[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.env.install_function(name, Arc::new(func), true);
        self
    }

    /// Registers a global function. Returns `false` if `replace` is off and a
    /// global of that name was already present.
    pub fn register_function_with(&self, name: &str, func: Helper, replace: bool) -> bool {
        self.env.install_function(name, func, replace)
    }

    /// Registers a global value.
    pub fn register_global(&self, name: &str, value: impl Into<ContextValue>, replace: bool) -> bool {
        let value = crate::markup::to_value(&value.into());
        self.env.install_global(name, value, replace)
    }

    /// Registers an inclusion tag: a global function that renders `template`
    /// with the context `func` computes, returning the output as safe markup.
    pub fn register_inclusion_tag<F>(&self, name: &str, template: &str, func: F) -> &Self
    where
        F: Fn(&State<'_, '_>, &[Value]) -> Result<HashMap<String, ContextValue>, Error>
            + Send
            + Sync
            + 'static,
    {
        self.register_inclusion_tag_with(name, template, Arc::new(func), true);
        self
    }

    /// Registers an inclusion tag with an explicit `replace` flag.
    pub fn register_inclusion_tag_with(
        &self,
        name: &str,
        template: &str,
        func: InclusionFn,
        replace: bool,
    ) -> bool {
        let template = template.to_string();
        let helper: Helper = Arc::new(move |state: &State<'_, '_>, args: &[Value]| -> Result<Value, Error> {
            let ctx = func(state, args)?;
            tracing::debug!(template = %template, "rendering inclusion tag");
            let rendered = state
                .env()
                .get_template(&template)?
                .render(context_to_value(&ctx))?;
            Ok(Value::from_safe_string(rendered))
        });
        self.env.install_function(name, helper, replace)
    }
}

/// Splits a trailing keyword-argument value off `args`.
///
/// Returns the positional arguments and the keyword arguments sorted by name.
///
/// # Errors
///
/// Fails if a keyword value cannot be read.
pub fn split_kwargs(args: &[Value]) -> Result<(&[Value], Vec<(String, Value)>), Error> {
    let Some((last, rest)) = args.split_last().filter(|(last, _)| last.is_kwargs()) else {
        return Ok((args, Vec::new()));
    };

    let mut pairs = Vec::new();
    for key in last.try_iter()? {
        let value = last.get_item(&key)?;
        pairs.push((key.to_string(), value));
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok((rest, pairs))
}

/// Returns positional argument `index`, or an error naming the helper.
///
/// # Errors
///
/// Fails with [`ErrorKind::MissingArgument`] if there is no such argument.
pub fn arg<'a>(helper: &str, args: &'a [Value], index: usize) -> Result<&'a Value, Error> {
    args.get(index).ok_or_else(|| {
        Error::new(
            ErrorKind::MissingArgument,
            format!("{helper}() is missing argument {}", index + 1),
        )
    })
}
