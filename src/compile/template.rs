use crate::{
    compile::{parse::program::Program, Parser},
    log::{error_unknown_sub_template, Error},
    object::Object,
    region::Region,
    render::{Lineage, Renderer},
    Engine, Params, Store, Writer,
};

use std::path::Path;

/// The source line and text of one tag, kept so errors raised while the tag runs can
/// point back at it.
#[derive(Debug, Clone, PartialEq)]
pub struct TagRecord {
    /// Zero-based absolute source line that the tag begins on.
    pub line: usize,
    /// Raw text of the tag.
    pub text: String,
    /// Source line that the tag begins on.
    pub source: String,
    /// [`Region`] of the tag within `source`.
    pub region: Region,
}

/// Add the path of a template, and the line and text of a tag, to an [`Error`].
///
/// Errors that are already located are returned unchanged.
pub(crate) fn locate(error: Error, path: &str, record: Option<&TagRecord>) -> Error {
    if error.is_located() {
        return error;
    }

    let error = error.with_path(path);
    match record {
        Some(record) => error
            .with_line(record.line + 1)
            .with_tag(record.text.as_str())
            .with_pointer(&record.source, record.line, record.region),
        None => error,
    }
}

/// A compiled [`Template`], with the sub-templates it declares.
///
/// # Examples
///
/// ```
/// use stencil::{compile, object::serde::json, Engine, Store};
///
/// let template = compile("<% foreach $n in param.list %><%= $n %><% end %>").unwrap();
/// let store = Store::new().with_must("list", [1, 2, 3]);
/// let output = template.render(&Engine::default(), &json!(null), &store);
///
/// assert_eq!(output.unwrap(), "123");
/// ```
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    /// Diagnostic path reported by errors.
    path: String,
    pub(crate) program: Program,
    /// Declared and inline sub-templates, unique by name.
    pub(crate) children: Vec<Template>,
    /// Every tag of the source, indexed by origin.
    pub(crate) tags: Vec<TagRecord>,
}

impl Template {
    pub(crate) fn new(
        name: String,
        path: String,
        program: Program,
        children: Vec<Template>,
        tags: Vec<TagRecord>,
    ) -> Self {
        Self {
            name,
            path,
            program,
            children,
            tags,
        }
    }

    /// Compile the [`Template`] stored in the file at the given path.
    ///
    /// The path is used as the name of the `Template`, and is reported by errors.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the file cannot be read or does not compile.
    pub fn load<P>(path: P) -> Result<Template, Error>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let display = path.display().to_string();
        let source = std::fs::read_to_string(path).map_err(|error| {
            Error::build("unable to read template")
                .with_path(display.as_str())
                .with_help(error.to_string())
        })?;

        Parser::new(&source).with_name(&display).compile()
    }

    /// Return the name of the [`Template`].
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the diagnostic path of the [`Template`].
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Return the sub-template with the given name, including its sigil.
    pub fn sub_template(&self, name: &str) -> Option<&Template> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Render the [`Template`] against a receiver, with the given parameters.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] located at the offending tag if rendering fails.
    /// Failing macros and filters do not fail the render, they write a marker instead.
    pub fn render(
        &self,
        engine: &Engine,
        receiver: &dyn Object,
        store: &Store,
    ) -> Result<String, Error> {
        let mut writer = Writer::new();
        self.render_to(engine, receiver, store, &mut writer)?;

        Ok(writer.finish())
    }

    /// Render the [`Template`] into an existing [`Writer`].
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] located at the offending tag if rendering fails.
    pub fn render_to(
        &self,
        engine: &Engine,
        receiver: &dyn Object,
        store: &Store,
        writer: &mut Writer,
    ) -> Result<(), Error> {
        let params = Params::new(store);

        Renderer::new(engine, Lineage::root(self), receiver, &params).run(writer)
    }

    /// Render the sub-template with the given name.
    ///
    /// When `inherited` is given, the sub-template sees its keys wherever `store` does
    /// not define them. Neither bag is modified.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if no sub-template has the name, or if rendering fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::{compile, object::serde::json, Engine, Params, Store};
    ///
    /// let template = compile("<% #row %><%= param.a %>-<%= param.b %><% end %>").unwrap();
    /// let outer = Store::new().with_must("a", 1).with_must("b", 2);
    /// let inner = Store::new().with_must("a", 10);
    /// let inherited = Params::new(&outer);
    ///
    /// let output = template.render_sub_template(
    ///     &Engine::default(),
    ///     &json!(null),
    ///     "#row",
    ///     &inner,
    ///     Some(&inherited),
    /// );
    ///
    /// assert_eq!(output.unwrap(), "10-2");
    /// ```
    pub fn render_sub_template(
        &self,
        engine: &Engine,
        receiver: &dyn Object,
        name: &str,
        store: &Store,
        inherited: Option<&Params>,
    ) -> Result<String, Error> {
        let Some(child) = self.sub_template(name) else {
            return Err(self.locate(error_unknown_sub_template(name), None));
        };

        let params = match inherited {
            Some(inherited) => Params::new(store).with_parent(inherited),
            None => Params::new(store),
        };
        let root = Lineage::root(self);
        let lineage = Lineage {
            template: child,
            parent: Some(&root),
        };
        let mut writer = Writer::new();
        Renderer::new(engine, lineage, receiver, &params).run(&mut writer)?;

        Ok(writer.finish())
    }

    /// Add the path of the [`Template`], and the tag at `origin`, to the [`Error`].
    pub(crate) fn locate(&self, error: Error, origin: Option<usize>) -> Error {
        locate(
            error,
            &self.path,
            origin.and_then(|origin| self.tags.get(origin)),
        )
    }

    /// Return the tag at `origin`.
    pub(crate) fn tag(&self, origin: usize) -> Option<&TagRecord> {
        self.tags.get(origin)
    }
}

#[cfg(test)]
mod tests {
    use super::{locate, TagRecord, Template};
    use crate::{compile, log::Error, object::serde::json, Engine, Store};
    use std::io::Write;

    #[test]
    fn test_locate() {
        let record = TagRecord {
            line: 2,
            text: "<% x %>".into(),
            source: "a <% x %>".into(),
            region: (2..9).into(),
        };
        let located = locate(Error::build("boom"), "page.tpl", Some(&record));

        assert_eq!(
            located.to_string(),
            "template error in page.tpl, line 3, in <% x %>: boom"
        );
        assert_eq!(locate(located, "other.tpl", None).path(), Some("page.tpl"));
    }

    #[test]
    fn test_unknown_sub_template() {
        let template = compile("text").unwrap();
        let error = template
            .render_sub_template(&Engine::default(), &json!(null), "#row", &Store::new(), None)
            .unwrap_err();

        assert_eq!(
            error.to_string(),
            "template error in inline: unknown sub-template: #row"
        );
    }

    #[test]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Hello, <%= param.name %>!").unwrap();

        let template = Template::load(file.path()).unwrap();
        let store = Store::new().with_must("name", "taylor");

        assert_eq!(template.path(), file.path().display().to_string());
        assert_eq!(
            template
                .render(&Engine::default(), &json!(null), &store)
                .unwrap(),
            "Hello, taylor!"
        );
    }

    #[test]
    fn test_load_missing() {
        let error = Template::load("/nonexistent/page.tpl").unwrap_err();

        assert_eq!(error.reason(), "unable to read template");
        assert!(error.is_located());
    }
}
