use crate::{
    compile::{Parser, Template},
    log::{
        error_missing_template, error_unknown_sub_template, Error, INVALID_ENCODER,
        INVALID_TEMPLATE,
    },
    object::{Encoder, Object, Scope},
    render::{
        store::{Params, Store},
        writer::Writer,
        Lineage, Renderer,
    },
};

use parking_lot::Mutex;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, trace};

/// Cache entry of one template name.
///
/// Empty until the template is added or loaded.
type Slot = Arc<Mutex<Option<Arc<Template>>>>;

/// Facilitates compiling and rendering templates, and provides storage
/// for templates, encoders and the global scope.
///
/// An `Engine` can be shared between threads. Templates requested by name are
/// compiled at most once and shared as [`Arc<Template>`].
pub struct Engine {
    /// Object that undotted commands and bare names fall back to.
    global: Box<dyn Object>,
    /// Encoders that this engine is aware of.
    encoders: HashMap<String, Box<dyn Encoder>>,
    /// Directory that missing templates are loaded from.
    directory: Option<PathBuf>,
    extension: String,
    line_break: String,
    /// Templates that this engine is aware of.
    templates: Mutex<HashMap<String, Slot>>,
}

impl Engine {
    /// Create a new instance of [`Engine`].
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a new [`Template`], using the line break of the [`Engine`].
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when compilation fails, which most likely means the source
    /// contains invalid syntax.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::Engine;
    ///
    /// let engine = Engine::default();
    /// let template = engine.compile("hello, <%= name %>!");
    /// assert!(template.is_ok());
    /// ```
    #[inline]
    pub fn compile(&self, text: &str) -> Result<Template, Error> {
        Parser::new(text).with_line_break(&self.line_break).compile()
    }

    /// Compile a new [`Template`].
    ///
    /// # Panics
    ///
    /// Panics when compilation fails, which most likely means the source
    /// contains invalid syntax.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::Engine;
    ///
    /// let engine = Engine::default();
    /// let template = engine.compile_must("hello, <%= name %>!");
    /// ```
    #[inline]
    pub fn compile_must(&self, text: &str) -> Template {
        self.compile(text).unwrap()
    }

    /// Render a [`Template`] against a receiver, with the given [`Store`] as its
    /// parameters.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if rendering fails, which may happen when the template uses
    /// an unknown encoder or sub-template. Failing macros and filters write a marker
    /// instead.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::{object::serde::json, Engine, Store};
    ///
    /// let engine = Engine::default();
    /// let template = engine.compile_must("hello, <%= name %>!");
    /// let result = engine.render(&template, &json!({ "name": "taylor" }), &Store::new());
    ///
    /// assert_eq!(result.unwrap(), "hello, taylor!")
    /// ```
    #[inline]
    pub fn render(
        &self,
        template: &Template,
        receiver: &dyn Object,
        store: &Store,
    ) -> Result<String, Error> {
        template.render(self, receiver, store)
    }

    /// Render a [`Template`] into an existing [`Writer`].
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if rendering fails.
    #[inline]
    pub fn render_to(
        &self,
        template: &Template,
        receiver: &dyn Object,
        store: &Store,
        writer: &mut Writer,
    ) -> Result<(), Error> {
        template.render_to(self, receiver, store, writer)
    }

    /// Render the template with the given name, which may select a sub-template
    /// as in `page#row`.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the template cannot be found, or rendering fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::{object::serde::json, Engine, Store};
    ///
    /// let engine = Engine::default();
    /// engine.add_template("page", "<% #row %>[<%= this.n %>]<% end %>").unwrap();
    ///
    /// let output = engine.render_named("page#row", &json!({ "n": 1 }), &Store::new());
    /// assert_eq!(output.unwrap(), "[1]");
    /// ```
    pub fn render_named(
        &self,
        name: &str,
        receiver: &dyn Object,
        store: &Store,
    ) -> Result<String, Error> {
        self.resolve(name)?.render(self, receiver, store)
    }

    /// Compile and store a new [`Template`] with the given name.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when a `Template` with the given name already exists,
    /// or when compilation fails, which most likely means the source contains invalid
    /// syntax.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::Engine;
    ///
    /// let engine = Engine::default();
    /// let result = engine.add_template("template_name", "hello, <%= name %>!");
    /// assert!(result.is_ok());
    ///
    /// let second = engine.add_template("template_name", "hello again");
    /// assert!(second.is_err());
    /// ```
    pub fn add_template(&self, name: &str, text: &str) -> Result<(), Error> {
        let slot = self.slot(name);
        let mut template = slot.lock();
        if template.is_some() {
            return Err(Error::build(INVALID_TEMPLATE).with_help(format!(
                "template with name `{name}` already exists in engine, \
                overwrite it with `.add_template_must`"
            )));
        }

        *template = Some(Arc::new(self.compile_named(name, text)?));
        Ok(())
    }

    /// Compile and store a new [`Template`] with the given name.
    ///
    /// If a `Template` with the given name already exists in the [`Engine`],
    /// it is overwritten.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when compilation fails, which most likely means the source
    /// contains invalid syntax.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::Engine;
    ///
    /// let engine = Engine::default();
    /// engine.add_template_must("template_name", "hello, <%= name %>!").unwrap();
    /// ```
    pub fn add_template_must(&self, name: &str, text: &str) -> Result<(), Error> {
        let template = Arc::new(self.compile_named(name, text)?);
        *self.slot(name).lock() = Some(template);

        Ok(())
    }

    /// Return the named [`Template`].
    ///
    /// When the `Template` is not stored yet and a directory is set, it is loaded from
    /// `<directory>/<name>.<extension>` and stored. Concurrent requests for one name
    /// compile it once.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the `Template` is not stored and cannot be loaded.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::Engine;
    ///
    /// let engine = Engine::default();
    /// engine.add_template_must("template_name", "hello, <%= name %>!").unwrap();
    ///
    /// let template = engine.get_template("template_name");
    /// assert!(template.is_ok());
    /// assert!(engine.get_template("ghost").is_err());
    /// ```
    pub fn get_template(&self, name: &str) -> Result<Arc<Template>, Error> {
        let cached = self.templates.lock().get(name).cloned();
        if let Some(template) = cached.as_ref().and_then(|slot| slot.lock().clone()) {
            trace!(name, "template cache hit");
            return Ok(template);
        }

        let Some(directory) = &self.directory else {
            return Err(error_missing_template(name));
        };

        let slot = cached.unwrap_or_else(|| self.slot(name));
        let mut template = slot.lock();
        if let Some(template) = template.as_ref() {
            return Ok(Arc::clone(template));
        }

        let path = directory.join(format!("{name}.{}", self.extension));
        let loaded = Arc::new(self.load(name, &path)?);
        *template = Some(Arc::clone(&loaded));

        Ok(loaded)
    }

    /// Return the named [`Template`], or the sub-template selected by a `#name`
    /// suffix, as in `page#row`.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the `Template` cannot be found, or does not declare the
    /// sub-template.
    pub fn resolve(&self, name: &str) -> Result<Resolved, Error> {
        let (name, sub) = match name.find('#') {
            Some(index) if index > 0 => (&name[..index], Some(&name[index..])),
            _ => (name, None),
        };

        let root = self.get_template(name)?;
        if let Some(sub) = sub {
            if root.sub_template(sub).is_none() {
                return Err(root.locate(error_unknown_sub_template(sub), None));
            }
        }

        Ok(Resolved {
            root,
            sub: sub.map(str::to_owned),
        })
    }

    /// Add an [`Encoder`], selected with `encoding=<name>` on a tag.
    ///
    /// # Errors
    ///
    /// If an `Encoder` with the given name already exists in the engine, an [`Error`] is
    /// returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::Engine;
    ///
    /// fn upper(text: &str) -> String {
    ///     text.to_uppercase()
    /// }
    ///
    /// let mut engine = Engine::default();
    /// let result = engine.add_encoder("upper", upper);
    ///
    /// assert!(result.is_ok());
    /// ```
    pub fn add_encoder<T>(&mut self, name: &str, encoder: T) -> Result<(), Error>
    where
        T: Encoder + 'static,
    {
        if self.encoders.contains_key(name) {
            return Err(Error::build(INVALID_ENCODER).with_help(format!(
                "encoder with name `{name}` already exists in engine, \
                overwrite it with `.add_encoder_must`"
            )));
        }

        self.encoders.insert(name.to_owned(), Box::new(encoder));
        Ok(())
    }

    /// Add an [`Encoder`].
    ///
    /// If an `Encoder` with the given name already exists in the [`Engine`], it is
    /// overwritten.
    #[inline]
    pub fn add_encoder_must<T>(&mut self, name: &str, encoder: T)
    where
        T: Encoder + 'static,
    {
        self.encoders.insert(name.to_owned(), Box::new(encoder));
    }

    /// Add an [`Encoder`].
    ///
    /// Returns the [`Engine`], so additional methods may be chained.
    ///
    /// # Errors
    ///
    /// If an `Encoder` with the given name already exists in the engine, an [`Error`] is
    /// returned.
    #[inline]
    pub fn with_encoder<T>(mut self, name: &str, encoder: T) -> Result<Self, Error>
    where
        T: Encoder + 'static,
    {
        self.add_encoder(name, encoder)?;
        Ok(self)
    }

    /// Add an [`Encoder`].
    ///
    /// Returns the [`Engine`], so additional methods may be chained.
    ///
    /// If an `Encoder` with the given name already exists in the engine, it is overwritten.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::{object::serde::json, Engine, Store};
    ///
    /// let engine = Engine::default()
    ///     .with_encoder_must("html", |text: &str| text.replace('<', "&lt;"));
    /// let template = engine.compile_must(r#"<%= name encoding="html" %>"#);
    /// let output = engine.render(&template, &json!({ "name": "<b>" }), &Store::new());
    ///
    /// assert_eq!(output.unwrap(), "&lt;b>");
    /// ```
    #[inline]
    pub fn with_encoder_must<T>(mut self, name: &str, encoder: T) -> Self
    where
        T: Encoder + 'static,
    {
        self.add_encoder_must(name, encoder);
        self
    }

    /// Return the encoder with the given name, if it exists in the [`Engine`].
    #[inline]
    pub fn get_encoder(&self, name: &str) -> Option<&dyn Encoder> {
        self.encoders.get(name).map(|encoder| encoder.as_ref())
    }

    /// Return the global scope.
    #[inline]
    pub fn global(&self) -> &dyn Object {
        self.global.as_ref()
    }

    /// Set the global scope, which undotted commands are looked up on and bare names
    /// fall back to.
    ///
    /// Returns the [`Engine`], so additional methods may be chained.
    #[inline]
    pub fn with_global<T>(mut self, global: T) -> Self
    where
        T: Object + 'static,
    {
        self.set_global(global);
        self
    }

    /// Set the global scope.
    #[inline]
    pub fn set_global<T>(&mut self, global: T)
    where
        T: Object + 'static,
    {
        self.global = Box::new(global);
    }

    /// Set the directory that templates missing from the [`Engine`] are loaded from.
    ///
    /// Returns the `Engine`, so additional methods may be chained.
    #[inline]
    pub fn with_directory<P>(mut self, directory: P) -> Self
    where
        P: Into<PathBuf>,
    {
        self.set_directory(directory);
        self
    }

    /// Set the directory that templates missing from the [`Engine`] are loaded from.
    #[inline]
    pub fn set_directory<P>(&mut self, directory: P)
    where
        P: Into<PathBuf>,
    {
        self.directory = Some(directory.into());
    }

    /// Set the file extension of loaded templates, without the leading dot.
    #[inline]
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_owned();
        self
    }

    /// Set the text written for every line break of compiled templates.
    #[inline]
    pub fn with_line_break(mut self, line_break: &str) -> Self {
        self.line_break = line_break.to_owned();
        self
    }

    /// Return the cache entry of the name, creating it when missing.
    fn slot(&self, name: &str) -> Slot {
        let mut templates = self.templates.lock();
        Arc::clone(templates.entry(name.to_owned()).or_default())
    }

    fn compile_named(&self, name: &str, text: &str) -> Result<Template, Error> {
        Parser::new(text)
            .with_name(name)
            .with_line_break(&self.line_break)
            .compile()
    }

    fn load(&self, name: &str, path: &Path) -> Result<Template, Error> {
        let shown = path.display().to_string();
        debug!(name, path = %shown, "loading template");

        let source = std::fs::read_to_string(path).map_err(|error| {
            Error::build("unable to read template")
                .with_path(shown.as_str())
                .with_help(error.to_string())
        })?;

        Parser::new(&source)
            .with_name(name)
            .with_path(&shown)
            .with_line_break(&self.line_break)
            .compile()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            global: Box::new(Scope::new()),
            encoders: HashMap::new(),
            directory: None,
            extension: String::from("tpl"),
            line_break: String::from("\n"),
            templates: Mutex::new(HashMap::new()),
        }
    }
}

/// A template found by name, possibly selecting one of its sub-templates.
#[derive(Debug, Clone)]
pub struct Resolved {
    root: Arc<Template>,
    sub: Option<String>,
}

impl Resolved {
    /// Return the template that was found by name.
    #[inline]
    pub fn root(&self) -> &Template {
        &self.root
    }

    /// Return the selected template, which is the sub-template when one was named.
    pub fn template(&self) -> &Template {
        self.sub
            .as_deref()
            .and_then(|sub| self.root.sub_template(sub))
            .unwrap_or(&self.root)
    }

    /// Render the selected template.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if rendering fails.
    pub fn render(
        &self,
        engine: &Engine,
        receiver: &dyn Object,
        store: &Store,
    ) -> Result<String, Error> {
        let params = Params::new(store);
        let mut writer = Writer::new();
        self.render_params(engine, receiver, &params, &mut writer)?;

        Ok(writer.finish())
    }

    pub(crate) fn render_params(
        &self,
        engine: &Engine,
        receiver: &dyn Object,
        params: &Params,
        writer: &mut Writer,
    ) -> Result<(), Error> {
        let root = Lineage::root(&self.root);
        let lineage = match self.sub {
            Some(_) => Lineage {
                template: self.template(),
                parent: Some(&root),
            },
            None => root,
        };

        Renderer::new(engine, lineage, receiver, params).run(writer)
    }
}

#[cfg(test)]
mod tests {
    use crate::{engine::Engine, object::serde::json, Scope, Store};
    use std::{fs, sync::Arc, thread};

    fn upper(text: &str) -> String {
        text.to_uppercase()
    }

    fn lower(text: &str) -> String {
        text.to_lowercase()
    }

    #[test]
    fn test_add_template_duplicate() {
        let engine = Engine::default();

        assert!(engine.add_template("page", "a").is_ok());
        assert!(engine.add_template("page", "b").is_err());
        assert!(engine.add_template_must("page", "c").is_ok());

        let output = engine.render_named("page", &json!(null), &Store::new());
        assert_eq!(output.unwrap(), "c");
    }

    #[test]
    fn test_add_template_compile_error() {
        let engine = Engine::default();
        let error = engine.add_template("page", "<% if x %>").unwrap_err();

        assert_eq!(error.path(), Some("page"));
        assert!(engine.get_template("page").is_err());
    }

    #[test]
    fn test_get_template_cached() {
        let engine = Engine::default();
        engine.add_template_must("page", "<%= 1 %>").unwrap();

        let first = engine.get_template("page").unwrap();
        let second = engine.get_template("page").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_get_template_missing() {
        let error = Engine::default().get_template("ghost").unwrap_err();

        assert_eq!(error.reason(), "missing template");
        assert!(error.help().is_some_and(|help| help.contains("`ghost`")));
    }

    #[test]
    fn test_get_template_missing_keeps_cache_empty() {
        let engine = Engine::default();

        assert!(engine.get_template("ghost").is_err());
        assert!(engine.get_template("ghost").is_err());
        assert!(engine.templates.lock().is_empty());

        engine.add_template_must("page", "a").unwrap();
        assert!(engine.get_template("page").is_ok());
        assert_eq!(engine.templates.lock().len(), 1);
    }

    #[test]
    fn test_get_template_directory() {
        let directory = tempfile::tempdir().unwrap();
        fs::write(directory.path().join("page.html"), "Hello, <%= param.name %>!").unwrap();

        let engine = Engine::default()
            .with_directory(directory.path())
            .with_extension("html");
        let output = engine.render_named(
            "page",
            &json!(null),
            &Store::new().with_must("name", "taylor"),
        );

        assert_eq!(output.unwrap(), "Hello, taylor!");
        assert!(engine.get_template("other").is_err());
    }

    #[test]
    fn test_get_template_threads() {
        let directory = tempfile::tempdir().unwrap();
        fs::write(directory.path().join("page.tpl"), "<%= this.n %>").unwrap();
        let engine = Engine::default().with_directory(directory.path());

        let templates = thread::scope(|scope| {
            let handles = (0..4)
                .map(|_| scope.spawn(|| engine.get_template("page").unwrap()))
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect::<Vec<_>>()
        });

        assert!(templates
            .windows(2)
            .all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[test]
    fn test_load_error_path() {
        let directory = tempfile::tempdir().unwrap();
        fs::write(directory.path().join("page.tpl"), "a\n<% else %>").unwrap();

        let engine = Engine::default().with_directory(directory.path());
        let error = engine.get_template("page").unwrap_err();
        let path = directory.path().join("page.tpl").display().to_string();

        assert_eq!(error.path(), Some(path.as_str()));
        assert_eq!(error.line(), Some(2));
    }

    #[test]
    fn test_resolve() {
        let engine = Engine::default();
        engine
            .add_template("page", "<% #row %>[<%= this.n %>]<% end %>body")
            .unwrap();

        let resolved = engine.resolve("page#row").unwrap();
        assert_eq!(resolved.root().name(), "page");
        assert_eq!(resolved.template().name(), "#row");
        assert_eq!(resolved.template().path(), "page#row");

        let error = engine.resolve("page#none").unwrap_err();
        assert_eq!(
            error.to_string(),
            "template error in page: unknown sub-template: #none"
        );
    }

    #[test]
    fn test_template_macro_by_name() {
        let engine = Engine::default();
        engine
            .add_template("card", "<% #title %><%= this.name %>/<%= param.size %><% end %>")
            .unwrap();

        let template = engine
            .compile(r#"<% this.template "card#title" size=2 %>"#)
            .unwrap();
        let output = engine.render(&template, &json!({ "name": "a" }), &Store::new());

        assert_eq!(output.unwrap(), "a/2");
    }

    #[test]
    fn test_add_encoder_duplicate() {
        let mut engine = Engine::default();
        engine.add_encoder_must("upper", upper);

        assert!(engine.get_encoder("upper").is_some());
        assert!(engine.get_encoder("ghost").is_none());
        assert!(engine.add_encoder("upper", lower).is_err());
        assert!(Engine::default()
            .with_encoder_must("upper", upper)
            .with_encoder("upper", lower)
            .is_err());
    }

    #[test]
    fn test_add_encoder_overwrite() {
        let mut engine = Engine::default().with_encoder_must("case", upper);
        assert_eq!(engine.get_encoder("case").unwrap().encode("Ab"), "AB");

        engine.add_encoder_must("case", lower);
        assert_eq!(engine.get_encoder("case").unwrap().encode("Ab"), "ab");
    }

    #[test]
    fn test_global() {
        let engine = Engine::default().with_global(Scope::new().with_value("site", "docs"));
        let template = engine.compile("<%= site %>|<%= global.site %>").unwrap();

        let output = engine.render(&template, &json!({ "site": "local" }), &Store::new());
        assert_eq!(output.unwrap(), "local|docs");
    }

    #[test]
    fn test_line_break() {
        let engine = Engine::default().with_line_break("\r\n");
        let template = engine.compile("<% if true %>\r\na\r\n<% end %>").unwrap();

        let output = engine.render(&template, &json!(null), &Store::new());
        assert_eq!(output.unwrap(), "a\r\n");
    }
}
