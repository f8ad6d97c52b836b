use std::{borrow::Cow, collections::HashMap};

use crate::{log::Error, object::Object};

use serde::Serialize;
use serde_json::{to_value, Map, Value};

/// Provides storage for the parameters that a [`Template`][`crate::Template`] can be
/// rendered with.
///
/// Parameters are visible to expressions through the `param` root, as in
/// `<%= param.title %>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Store {
    data: HashMap<String, Value>,
}

impl Store {
    /// Create a new [`Store`].
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::Store;
    ///
    /// let store = Store::new();
    /// ```
    #[inline]
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Inserts a key-value pair into the [`Store`].
    ///
    /// # Errors
    ///
    /// Returns an error if the serialization fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::Store;
    ///
    /// let mut store = Store::new();
    /// let result = store.insert("name", "taylor");
    ///
    /// assert!(result.is_ok());
    /// ```
    pub fn insert<S, T>(&mut self, key: S, value: T) -> Result<(), Error>
    where
        S: Into<String>,
        T: Serialize,
    {
        let key = key.into();
        let value = to_value(value).map_err(|error| {
            Error::build(format!("value for `{key}` is unserializable"))
                .with_help(error.to_string())
        })?;
        self.data.insert(key, value);

        Ok(())
    }

    /// Inserts a key-value pair into the [`Store`].
    ///
    /// # Panics
    ///
    /// Panics if the serialization fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::Store;
    ///
    /// let mut store = Store::new();
    /// store.insert_must("name", "taylor");
    /// ```
    #[inline]
    pub fn insert_must<S, T>(&mut self, key: S, value: T)
    where
        S: Into<String>,
        T: Serialize,
    {
        self.data.insert(key.into(), to_value(value).unwrap());
    }

    /// Inserts a key-value pair into the [`Store`].
    ///
    /// Returns the `Store`, so additional methods may be chained.
    ///
    /// # Errors
    ///
    /// Returns an error if the serialization fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::Store;
    ///
    /// let store = Store::new().with("name", "taylor");
    ///
    /// assert!(store.is_ok());
    /// ```
    #[inline]
    pub fn with<S, T>(mut self, key: S, value: T) -> Result<Self, Error>
    where
        S: Into<String>,
        T: Serialize,
    {
        self.insert(key, value)?;

        Ok(self)
    }

    /// Inserts a key-value pair into the [`Store`].
    ///
    /// Returns the `Store`, so additional methods may be chained.
    ///
    /// # Panics
    ///
    /// Panics if the serialization fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::Store;
    ///
    /// let store = Store::new().with_must("name", "taylor");
    /// ```
    #[inline]
    pub fn with_must<S, T>(mut self, key: S, value: T) -> Self
    where
        S: Into<String>,
        T: Serialize,
    {
        self.insert_must(key, value);

        self
    }

    /// Returns a reference to the [`Value`] corresponding to the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::Store;
    ///
    /// let store = Store::new().with_must("name", "taylor");
    /// let result = store.get("name");
    ///
    /// assert_eq!(result.unwrap(), "taylor")
    /// ```
    #[inline]
    pub fn get(&self, index: &str) -> Option<&Value> {
        self.data.get(index)
    }

    /// Return the number of entries in the [`Store`].
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Return true if the [`Store`] has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Return an iterator over the entries of the [`Store`].
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }
}

impl From<Map<String, Value>> for Store {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            data: map.into_iter().collect(),
        }
    }
}

impl Object for Store {
    fn get(&self, name: &str) -> Option<Value> {
        self.data.get(name).cloned()
    }

    fn object(&self, name: &str) -> Option<&dyn Object> {
        self.data
            .get(name)
            .filter(|value| value.is_object())
            .map(|value| value as &dyn Object)
    }

    fn to_value(&self) -> Value {
        Value::Object(
            self.data
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }
}

/// A parameter bag layered over an inherited one.
///
/// Lookups try the own [`Store`] first and fall back to the inherited [`Params`].
/// Neither bag is ever modified.
///
/// # Examples
///
/// ```
/// use stencil::{object::serde::json, Params, Store};
///
/// let outer = Store::new().with_must("title", "Home").with_must("lang", "en");
/// let inner = Store::new().with_must("title", "Row");
///
/// let inherited = Params::new(&outer);
/// let params = Params::new(&inner).with_parent(&inherited);
///
/// assert_eq!(params.get("title"), Some(&json!("Row")));
/// assert_eq!(params.get("lang"), Some(&json!("en")));
/// assert_eq!(outer.get("title"), Some(&json!("Home")));
/// ```
#[derive(Debug, Clone)]
pub struct Params<'a> {
    data: Cow<'a, Store>,
    parent: Option<&'a Params<'a>>,
}

impl<'a> Params<'a> {
    /// Create a new [`Params`] over the given [`Store`], with nothing inherited.
    #[inline]
    pub fn new(store: &'a Store) -> Self {
        Self {
            data: Cow::Borrowed(store),
            parent: None,
        }
    }

    /// Create a new [`Params`] that owns its [`Store`].
    #[inline]
    pub fn owned(store: Store) -> Self {
        Self {
            data: Cow::Owned(store),
            parent: None,
        }
    }

    /// Set the inherited [`Params`], consulted when a key is missing.
    #[inline]
    pub fn with_parent(mut self, parent: &'a Params<'a>) -> Self {
        self.parent = Some(parent);

        self
    }

    /// Returns a reference to the [`Value`] corresponding to the key, searching the
    /// inherited bags when it is not found.
    pub fn get(&self, index: &str) -> Option<&Value> {
        match self.data.get(index) {
            Some(value) => Some(value),
            None => self.parent.and_then(|parent| parent.get(index)),
        }
    }

    /// Return the merged view as a single JSON object.
    fn merged(&self) -> Map<String, Value> {
        let mut map = self
            .parent
            .map(|parent| parent.merged())
            .unwrap_or_default();
        for (key, value) in self.data.iter() {
            map.insert(key.clone(), value.clone());
        }

        map
    }
}

impl Object for Params<'_> {
    fn get(&self, name: &str) -> Option<Value> {
        Params::get(self, name).cloned()
    }

    fn object(&self, name: &str) -> Option<&dyn Object> {
        Params::get(self, name)
            .filter(|value| value.is_object())
            .map(|value| value as &dyn Object)
    }

    fn to_value(&self) -> Value {
        Value::Object(self.merged())
    }
}

/// Mutable storage for the local references of one render: setters, loop variables
/// and bound sub-templates.
#[derive(Debug)]
pub struct Shadow {
    data: Vec<HashMap<String, Value>>,
}

impl Shadow {
    /// Create a new [`Shadow`] with a single base frame.
    #[inline]
    pub fn new() -> Self {
        Self {
            data: vec![HashMap::new()],
        }
    }

    /// Push a new frame onto the [`Shadow`].
    #[inline]
    pub fn push(&mut self) {
        self.data.push(HashMap::new());
    }

    /// Remove the top frame from the [`Shadow`].
    ///
    /// The base frame is never removed.
    #[inline]
    pub fn pop(&mut self) {
        if self.data.len() > 1 {
            self.data.pop();
        }
    }

    /// Insert the value into the top frame of the [`Shadow`].
    #[inline]
    pub fn insert<S>(&mut self, key: S, value: Value)
    where
        S: Into<String>,
    {
        if let Some(frame) = self.data.last_mut() {
            frame.insert(key.into(), value);
        }
    }

    /// Assign the value to the innermost frame that already holds the key, or to the
    /// base frame when none does.
    pub fn assign<S>(&mut self, key: S, value: Value)
    where
        S: Into<String>,
    {
        let key = key.into();
        let frame = self
            .data
            .iter()
            .rposition(|frame| frame.contains_key(&key))
            .unwrap_or(0);
        self.data[frame].insert(key, value);
    }

    /// Get the [`Value`] of the given key, searching from the top frame down.
    #[inline]
    pub fn get(&self, index: &str) -> Option<&Value> {
        self.data.iter().rev().find_map(|frame| frame.get(index))
    }
}

impl Default for Shadow {
    fn default() -> Self {
        Self::new()
    }
}
