//! Contains the `Object` trait and other types useful for exposing data, macros and filters
//! to a [`Template`][`crate::Template`].
//!
//! Every tag in a template is resolved against an [`Object`]. The receiver passed to
//! [`render`][`crate::render()`] is the object that `this` refers to, and the global scope
//! of the [`Engine`][`crate::Engine`] is the object that undotted commands are looked up on.
//!
//! Given this tag:
//!
//! ```text
//! <%= title | truncate length=10 | upper %>
//! ```
//!
//! The `title` value is read from the receiver, falling back to the global scope. It is
//! then passed through the `truncate` filter and the `upper` filter, in that order. Both
//! filters are undotted, so they are looked up on the global scope with
//! [`Object::call_filter`].
//!
//! A tag that is not a data tag (no leading `=`) is a macro call:
//!
//! ```text
//! <% this.link target="_blank" %>
//! ```
//!
//! The command is split at its last `.` into the lookup object (`this`, the receiver) and
//! the member name (`link`). The receiver is asked for a macro handler with
//! [`Object::call_macro`], and when it has none, for a plain value with [`Object::get`].
//!
//! # Examples
//!
//! [`Scope`] builds an [`Object`] from closures, which is usually all a caller needs:
//!
//! ```
//! use stencil::{object::serde::{json, Value}, Engine, Error, Scope, Store};
//!
//! let global = Scope::new()
//!     .with_filter("upper", |value: &Value, _: &stencil::Arguments| match value {
//!         Value::String(text) => Ok(json!(text.to_uppercase())),
//!         _ => Err(Error::build("filter `upper` requires string input")),
//!     });
//!
//! let engine = Engine::new().with_global(global);
//! let template = engine.compile("<%= name | upper %>").unwrap();
//! let output = engine.render(&template, &json!({ "name": "taylor" }), &Store::new());
//!
//! assert_eq!(output.unwrap(), "TAYLOR");
//! ```
//!
//! A filter or macro that returns an [`Error`] does not abort the render. The failure is
//! written inline instead, as `[Filter error in upper: filter `upper` requires string input]`.

pub mod serde {
    //! Contains types from `serde_json`.
    pub use serde_json::*;
}

pub use crate::log::Error;

use serde_json::{Map, Value};
use std::{collections::HashMap, fmt::Debug};

/// Describes a data object that tags are resolved against.
///
/// Every method has a default implementation that finds nothing, so an implementation
/// only needs to provide what it actually exposes.
pub trait Object: Send + Sync {
    /// Call the macro handler with the given name.
    ///
    /// Returns None when no handler exists.
    fn call_macro(&self, _name: &str, _args: &Arguments) -> Option<Result<Value, Error>> {
        None
    }

    /// Call the filter handler with the given name on the given value.
    ///
    /// Returns None when no handler exists.
    fn call_filter(
        &self,
        _name: &str,
        _value: &Value,
        _args: &Arguments,
    ) -> Option<Result<Value, Error>> {
        None
    }

    /// Return the plain member value with the given name.
    fn get(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Return the nested lookup object with the given name.
    fn object(&self, _name: &str) -> Option<&dyn Object> {
        None
    }

    /// Return the object as a single [`Value`], used when it is written or walked as data.
    fn to_value(&self) -> Value {
        Value::Null
    }

    /// Return true if the object stands in for an absent value.
    fn is_null(&self) -> bool {
        false
    }
}

impl Object for Value {
    fn get(&self, name: &str) -> Option<Value> {
        self.as_object().and_then(|map| map.get(name)).cloned()
    }

    fn object(&self, name: &str) -> Option<&dyn Object> {
        self.as_object()
            .and_then(|map| map.get(name))
            .filter(|value| value.is_object())
            .map(|value| value as &dyn Object)
    }

    fn to_value(&self) -> Value {
        self.clone()
    }

    fn is_null(&self) -> bool {
        Value::is_null(self)
    }
}

/// Describes a type which can be called as a macro.
pub trait Macro: Sync + Send {
    /// Execute the macro with the given arguments and return a new Value as output.
    fn call(&self, args: &Arguments) -> Result<Value, Error>;
}

/// Allows assignment of any function matching the signature of `call` as a `Macro`.
impl<F> Macro for F
where
    F: Fn(&Arguments) -> Result<Value, Error> + Sync + Send,
{
    fn call(&self, args: &Arguments) -> Result<Value, Error> {
        self(args)
    }
}

/// Describes a type which can be used to transform a value in a filter chain.
pub trait Filter: Sync + Send {
    /// Execute the filter with the given input and return a new Value as output.
    fn apply(&self, input: &Value, args: &Arguments) -> Result<Value, Error>;
}

/// Allows assignment of any function matching the signature of `apply` as a `Filter`.
impl<F> Filter for F
where
    F: Fn(&Value, &Arguments) -> Result<Value, Error> + Sync + Send,
{
    fn apply(&self, input: &Value, args: &Arguments) -> Result<Value, Error> {
        self(input, args)
    }
}

/// Describes a type which can encode text before it is written, selected with the
/// `encoding` option of a tag.
pub trait Encoder: Sync + Send {
    /// Encode the given text.
    fn encode(&self, input: &str) -> String;
}

/// Allows assignment of any function matching the signature of `encode` as an `Encoder`.
impl<F> Encoder for F
where
    F: Fn(&str) -> String + Sync + Send,
{
    fn encode(&self, input: &str) -> String {
        self(input)
    }
}

/// An [`Object`] assembled from plain values, closures and nested objects.
#[derive(Default)]
pub struct Scope {
    values: Map<String, Value>,
    macros: HashMap<String, Box<dyn Macro>>,
    filters: HashMap<String, Box<dyn Filter>>,
    objects: HashMap<String, Box<dyn Object>>,
}

impl Scope {
    /// Create a new, empty [`Scope`].
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain value, returned when the member is read.
    pub fn with_value<S, T>(mut self, name: S, value: T) -> Self
    where
        S: Into<String>,
        T: Into<Value>,
    {
        self.values.insert(name.into(), value.into());

        self
    }

    /// Add a macro handler.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::{object::serde::{json, Value}, Arguments, Engine, Error, Scope, Store};
    ///
    /// fn year(_: &Arguments) -> Result<Value, Error> {
    ///     Ok(json!(2024))
    /// }
    ///
    /// let global = Scope::new().with_macro("year", year);
    /// let engine = Engine::new().with_global(global);
    /// let template = engine.compile("(c) <% year %>").unwrap();
    ///
    /// assert_eq!(engine.render(&template, &json!(null), &Store::new()).unwrap(), "(c) 2024");
    /// ```
    pub fn with_macro<S, T>(mut self, name: S, handler: T) -> Self
    where
        S: Into<String>,
        T: Macro + 'static,
    {
        self.macros.insert(name.into(), Box::new(handler));

        self
    }

    /// Add a filter handler.
    pub fn with_filter<S, T>(mut self, name: S, handler: T) -> Self
    where
        S: Into<String>,
        T: Filter + 'static,
    {
        self.filters.insert(name.into(), Box::new(handler));

        self
    }

    /// Add a nested lookup object, reachable as `name.member` in a command.
    pub fn with_object<S, T>(mut self, name: S, object: T) -> Self
    where
        S: Into<String>,
        T: Object + 'static,
    {
        self.objects.insert(name.into(), Box::new(object));

        self
    }
}

impl Object for Scope {
    fn call_macro(&self, name: &str, args: &Arguments) -> Option<Result<Value, Error>> {
        self.macros.get(name).map(|handler| handler.call(args))
    }

    fn call_filter(&self, name: &str, value: &Value, args: &Arguments) -> Option<Result<Value, Error>> {
        self.filters.get(name).map(|handler| handler.apply(value, args))
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn object(&self, name: &str) -> Option<&dyn Object> {
        match self.objects.get(name) {
            Some(object) => Some(object.as_ref()),
            None => self
                .values
                .get(name)
                .filter(|value| value.is_object())
                .map(|value| value as &dyn Object),
        }
    }

    fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

impl Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("values", &self.values)
            .field("macros", &self.macros.keys().collect::<Vec<_>>())
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("objects", &self.objects.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The arguments passed to a macro or filter handler.
///
/// Named arguments come from `key=value` pairs in the tag, positional arguments
/// from bare values, in the order they appear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    named: Map<String, Value>,
    positional: Vec<Value>,
}

impl Arguments {
    /// Create a new, empty set of [`Arguments`].
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named argument.
    pub fn with_named<S>(mut self, name: S, value: Value) -> Self
    where
        S: Into<String>,
    {
        self.named.insert(name.into(), value);

        self
    }

    /// Add a positional argument.
    pub fn with_positional(mut self, value: Value) -> Self {
        self.positional.push(value);

        self
    }

    /// Return the named argument with the given name.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    /// Return the positional argument at the given index.
    #[inline]
    pub fn at(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Return all named arguments.
    #[inline]
    pub fn named(&self) -> &Map<String, Value> {
        &self.named
    }

    /// Return all positional arguments.
    #[inline]
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// Unwrap a nested `param` argument, so handlers see one flat set of named
    /// arguments.
    ///
    /// When `param` is the only named argument its fields replace the named arguments.
    /// Otherwise its fields are merged in, and arguments given directly on the tag win.
    pub(crate) fn process(mut self) -> Self {
        let Some(Value::Object(param)) = self.named.get("param").cloned() else {
            return self;
        };
        self.named.remove("param");

        if self.named.is_empty() {
            self.named = param;
        } else {
            for (key, value) in param {
                self.named.entry(key).or_insert(value);
            }
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Arguments, Object, Scope};
    use crate::log::Error;
    use serde_json::{json, Value};

    #[test]
    fn test_value_object() {
        let value = json!({ "user": { "name": "taylor" }, "count": 2 });

        assert_eq!(Object::get(&value, "count"), Some(json!(2)));
        assert!(value.object("user").is_some());
        assert!(value.object("count").is_none());
        assert_eq!(value.object("user").unwrap().get("name"), Some(json!("taylor")));
    }

    #[test]
    fn test_null_value() {
        assert!(Object::is_null(&Value::Null));
        assert!(Object::get(&Value::Null, "name").is_none());
    }

    #[test]
    fn test_scope_handlers() {
        let scope = Scope::new()
            .with_value("site", "docs")
            .with_macro("shout", |args: &Arguments| match args.at(0) {
                Some(Value::String(text)) => Ok(json!(text.to_uppercase())),
                _ => Err(Error::build("macro `shout` requires a string")),
            })
            .with_object("page", json!({ "title": "Home" }));
        let args = Arguments::new().with_positional(json!("hi"));

        assert_eq!(scope.get("site"), Some(json!("docs")));
        assert_eq!(scope.call_macro("shout", &args).unwrap().unwrap(), json!("HI"));
        assert!(scope.call_macro("shout", &Arguments::new()).unwrap().is_err());
        assert!(scope.call_macro("missing", &args).is_none());
        assert_eq!(scope.object("page").unwrap().get("title"), Some(json!("Home")));
    }

    #[test]
    fn test_process_param_only() {
        let args = Arguments::new()
            .with_named("param", json!({ "a": 1, "b": 2 }))
            .process();

        assert_eq!(args.get("a"), Some(&json!(1)));
        assert_eq!(args.get("param"), None);
    }

    #[test]
    fn test_process_param_merge() {
        let args = Arguments::new()
            .with_named("a", json!("direct"))
            .with_named("param", json!({ "a": "nested", "b": 2 }))
            .process();

        assert_eq!(args.get("a"), Some(&json!("direct")));
        assert_eq!(args.get("b"), Some(&json!(2)));
        assert_eq!(args.named().len(), 2);
    }
}
