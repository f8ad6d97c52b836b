mod dispatch;

pub mod store;
pub mod value;
pub mod writer;

use crate::{
    compile::{
        tree::{Expr, ForEach, Instruction, LoopField},
        Program,
    },
    log::{error_unknown_encoder, error_unknown_sub_template, Error},
    object::Object,
    Engine, Store, Template,
};

use self::{
    store::{Params, Shadow},
    value::{is_empty, is_truthy, to_list, to_text},
    writer::Writer,
};

use serde_json::{json, Value};

/// Render a [`Template`].
///
/// Provides a shortcut to quickly render a `Template` when no advanced features
/// are needed. The default [`Engine`] is used, so encoders and the global scope
/// are empty.
///
/// # Examples
///
/// ```
/// use stencil::{compile, render, object::serde::json, Store};
///
/// let template = compile("hello, <%= name %>!").unwrap();
/// let receiver = json!({ "name": "taylor" });
///
/// let output = render(&template, &receiver, &Store::new());
/// assert_eq!(output.unwrap(), "hello, taylor!");
/// ```
pub fn render(template: &Template, receiver: &dyn Object, store: &Store) -> Result<String, Error> {
    template.render(&Engine::default(), receiver, store)
}

/// A template being rendered, and the template it was declared in.
///
/// `#name` references are looked up on the parent, or on the template itself when it
/// has no parent.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Lineage<'a> {
    pub template: &'a Template,
    pub parent: Option<&'a Lineage<'a>>,
}

impl<'a> Lineage<'a> {
    /// Create a new [`Lineage`] for a template rendered on its own.
    #[inline]
    pub fn root(template: &'a Template) -> Self {
        Self {
            template,
            parent: None,
        }
    }

    /// Return the lineage that owns the sub-templates visible to `#name` references.
    #[inline]
    pub fn owner(&self) -> Lineage<'a> {
        self.parent.copied().unwrap_or(*self)
    }
}

/// Position of an active loop.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    slot: usize,
    index: usize,
    length: usize,
}

impl Cursor {
    fn field(&self, field: LoopField) -> Value {
        match field {
            LoopField::Index => json!(self.index),
            LoopField::Length => json!(self.length),
            LoopField::First => json!(self.index == 0),
            LoopField::Last => json!(self.index + 1 == self.length),
            LoopField::Even => json!(self.index % 2 == 0),
            LoopField::Odd => json!(self.index % 2 == 1),
        }
    }
}

/// Executes the [`Program`] of one template against a receiver and parameters.
pub(crate) struct Renderer<'a> {
    /// An engine containing the encoders and the global scope.
    engine: &'a Engine,
    lineage: Lineage<'a>,
    /// The data object that `this` and bare names refer to.
    receiver: &'a dyn Object,
    params: &'a Params<'a>,
    /// Local references of this render.
    locals: Shadow,
    loops: Vec<Cursor>,
    /// Index of the tag that is executing, used to locate errors.
    origin: Option<usize>,
}

impl<'a> Renderer<'a> {
    /// Create a new Renderer.
    pub fn new(
        engine: &'a Engine,
        lineage: Lineage<'a>,
        receiver: &'a dyn Object,
        params: &'a Params<'a>,
    ) -> Self {
        Self {
            engine,
            lineage,
            receiver,
            params,
            locals: Shadow::new(),
            loops: vec![],
            origin: None,
        }
    }

    /// Render the template into the [`Writer`].
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] located at the tag that was executing when rendering failed.
    pub fn run(&mut self, writer: &mut Writer) -> Result<(), Error> {
        let template = self.lineage.template;

        self.program(&template.program, writer)
            .map_err(|error| template.locate(error, self.origin))
    }

    fn program(&mut self, program: &Program, writer: &mut Writer) -> Result<(), Error> {
        for instruction in &program.data {
            self.instruction(instruction, writer)?;
        }

        Ok(())
    }

    fn instruction(&mut self, instruction: &Instruction, writer: &mut Writer) -> Result<(), Error> {
        match instruction {
            Instruction::Literal(text) => writer.write_str(text),
            Instruction::Output {
                expr,
                default,
                origin,
            } => {
                self.origin = Some(*origin);
                let value = self.eval(expr, writer)?;
                if !is_empty(&value) {
                    writer.write(&value);
                } else if let Some(default) = default {
                    let default = self.eval(default, writer)?;
                    writer.write(&default);
                }
            }
            Instruction::Filtered {
                expr,
                pipeline,
                origin,
            } => {
                self.origin = Some(*origin);
                let value = self.eval(expr, writer)?;
                self.write_filtered(value, pipeline, writer)?;
            }
            Instruction::Set { name, expr, origin } => {
                self.origin = Some(*origin);
                let value = self.eval(expr, writer)?;
                self.locals.assign(name.as_str(), value);
            }
            Instruction::If(node) => {
                self.origin = Some(node.origin);
                for (condition, body) in &node.branches {
                    if is_truthy(&self.eval(condition, writer)?) {
                        return self.program(body, writer);
                    }
                }
                if let Some(otherwise) = &node.otherwise {
                    self.program(otherwise, writer)?;
                }
            }
            Instruction::ForEach(node) => self.for_each(node, writer)?,
            Instruction::Begin(body) => self.program(body, writer)?,
            Instruction::Bind { name, trim, origin } => {
                self.origin = Some(*origin);
                let mut text = self.sub_template(name)?;
                if *trim {
                    text = text.trim().to_owned();
                }
                self.locals.assign(name.as_str(), Value::String(text));
            }
        }

        Ok(())
    }

    fn for_each(&mut self, node: &ForEach, writer: &mut Writer) -> Result<(), Error> {
        self.origin = Some(node.origin);
        let items = to_list(self.eval(&node.list, writer)?);
        let separator = match &node.separator {
            Some(separator) => Some(self.eval(separator, writer)?),
            None => None,
        };

        self.locals.push();
        let result = self.iterate(node, items, separator.as_ref(), writer);
        self.locals.pop();

        result
    }

    fn iterate(
        &mut self,
        node: &ForEach,
        items: Vec<Value>,
        separator: Option<&Value>,
        writer: &mut Writer,
    ) -> Result<(), Error> {
        let length = items.len();
        let mut first = true;

        for (index, item) in items.into_iter().enumerate() {
            self.locals.insert(node.variable.as_str(), item);
            self.loops.push(Cursor {
                slot: node.slot,
                index,
                length,
            });

            let result = match separator {
                None => self.program(&node.body, writer),
                Some(separator) => {
                    writer.push();
                    let result = self.program(&node.body, writer);
                    let text = writer.pop();
                    if result.is_ok() && !text.is_empty() {
                        if !first {
                            writer.write(separator);
                        }
                        first = false;
                        writer.write_str(&text);
                    }
                    result
                }
            };

            self.loops.pop();
            result?;
        }

        Ok(())
    }

    /// Evaluate the expression.
    ///
    /// Macro calls inside of the expression may write markers to the writer.
    fn eval(&mut self, expr: &Expr, writer: &mut Writer) -> Result<Value, Error> {
        let value = match expr {
            Expr::Literal(value) => value.clone(),
            Expr::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.eval(item, writer))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Expr::Path { root, keys } => self.walk(root, keys).into_value(),
            Expr::Loop { slot, field } => self
                .loops
                .iter()
                .rev()
                .find(|cursor| cursor.slot == *slot)
                .map_or(Value::Null, |cursor| cursor.field(*field)),
            Expr::Not(inner) => Value::Bool(!is_truthy(&self.eval(inner, writer)?)),
            Expr::Invoke(invocation) => self.invoke(invocation, writer)?,
            Expr::Capture(program) => {
                writer.push();
                let result = self.program(program, writer);
                let text = writer.pop();
                result?;

                Value::String(text)
            }
            Expr::Guard { cond, expr } => match is_truthy(&self.eval(cond, writer)?) {
                true => self.eval(expr, writer)?,
                false => Value::Null,
            },
            Expr::Encode(name, inner) => {
                let value = self.eval(inner, writer)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                let encoder = self
                    .engine
                    .get_encoder(name)
                    .ok_or_else(|| error_unknown_encoder(name))?;

                Value::String(encoder.encode(&to_text(&value)))
            }
            Expr::SubTemplate(name) => Value::String(self.sub_template(name)?),
        };

        Ok(value)
    }

    /// Render a sub-template of the current template, with the same receiver and
    /// parameters.
    fn sub_template(&self, name: &str) -> Result<String, Error> {
        let child = self
            .lineage
            .template
            .sub_template(name)
            .ok_or_else(|| error_unknown_sub_template(name))?;
        let lineage = Lineage {
            template: child,
            parent: Some(&self.lineage),
        };

        let mut writer = Writer::new();
        Renderer::new(self.engine, lineage, self.receiver, self.params).run(&mut writer)?;

        Ok(writer.finish())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        compile, compile_named,
        object::{serde::json, Arguments, Object, Scope},
        Engine, Error, Params, Store, Template, Writer,
    };
    use serde_json::Value;

    fn helper_render(source: &str, receiver: &dyn Object, store: &Store) -> String {
        compile(source)
            .unwrap()
            .render(&Engine::default(), receiver, store)
            .unwrap()
    }

    #[test]
    fn test_render_literal() {
        assert_eq!(helper_render("plain\ntext", &json!(null), &Store::new()), "plain\ntext");
    }

    #[test]
    fn test_render_receiver_and_params() {
        let receiver = json!({ "title": "Home", "user": { "name": "taylor" } });
        let store = Store::new().with_must("lang", "en");
        let source = "<%= title %>/<%= this.user.name %>/<%= param.lang %>/<%= missing %>";

        assert_eq!(helper_render(source, &receiver, &store), "Home/taylor/en/");
    }

    #[test]
    fn test_render_default() {
        let source = r#"<%= empty default="none" %>|<%= "" default="blank" %>"#;

        assert_eq!(
            helper_render(source, &json!({ "empty": "" }), &Store::new()),
            "none|blank"
        );
    }

    #[test]
    fn test_render_if() {
        let source = "<% if $a %>a<% elseif param.b %>b<% else %>c<% end %>";
        let none = Store::new();
        let some = Store::new().with_must("b", 1);

        assert_eq!(helper_render(source, &json!(null), &none), "c");
        assert_eq!(helper_render(source, &json!(null), &some), "b");
        assert_eq!(
            helper_render(&format!("<% $a = true %>{source}"), &json!(null), &none),
            "a"
        );
    }

    #[test]
    fn test_render_empty_foreach() {
        let source = "[<% foreach $x in items %><%= $x %><% end %>]";

        assert_eq!(helper_render(source, &json!({ "items": [] }), &Store::new()), "[]");
        assert_eq!(helper_render(source, &json!({ "items": 7 }), &Store::new()), "[]");
        assert_eq!(helper_render(source, &json!({}), &Store::new()), "[]");
    }

    #[test]
    fn test_render_loop_fields() {
        let source = "<% foreach $x in items %><%= $x#index %>:<%= $x#first %>-<% end %>";
        let receiver = json!({ "items": ["a", "b", "c"] });

        assert_eq!(
            helper_render(source, &receiver, &Store::new()),
            "0:true-1:false-2:false-"
        );
    }

    #[test]
    fn test_render_loop_position_fields() {
        let source = "<% foreach $x in items %><%= $x#length %><%= $x#last %><%= $x#even %>;<% end %>";
        let receiver = json!({ "items": ["a", "b", "c"] });

        assert_eq!(
            helper_render(source, &receiver, &Store::new()),
            "3falsetrue;3falsefalse;3truetrue;"
        );
    }

    #[test]
    fn test_render_error_restores_writer() {
        let receiver = json!({ "items": ["a", "b"], "name": "x" });
        for source in [
            r#"<% if name prefix="(" suffix=")" %><%= name encoding="nope" %><% end %>"#,
            r#"<% foreach $x in items separator="," %><%= $x encoding="nope" %><% end %>"#,
        ] {
            let template = compile(source).unwrap();
            let mut writer = Writer::new();
            let result = template.render_to(&Engine::default(), &receiver, &Store::new(), &mut writer);

            assert!(result.is_err());
            assert_eq!(writer.depth(), 0);
        }
    }

    #[test]
    fn test_render_skip_whitespace_once() {
        assert_eq!(
            helper_render("a<%-%>  <% if true %>  b<% end %>", &json!(null), &Store::new()),
            "a  b"
        );
        assert_eq!(helper_render("a<%-%>\n  b", &json!(null), &Store::new()), "ab");
    }

    #[test]
    fn test_render_object_values() {
        let source = "<% foreach $v in map %><%= $v %><% end %>";
        let receiver = json!({ "map": { "b": 2, "a": 1 } });

        assert_eq!(helper_render(source, &receiver, &Store::new()), "12");
    }

    #[test]
    fn test_render_separator() {
        let source = r#"<% foreach $x in items separator=", " %><%= $x %><% end %>"#;
        let receiver = json!({ "items": ["a", "", "b"] });

        assert_eq!(helper_render(source, &receiver, &Store::new()), "a, b");
    }

    #[test]
    fn test_render_sibling_separators() {
        let source = concat!(
            r#"<% foreach $x in items separator="," %><%= $x %><% end %>|"#,
            r#"<% foreach $y in items separator=";" %><%= $y %><% end %>"#
        );
        let receiver = json!({ "items": [1, 2] });

        assert_eq!(helper_render(source, &receiver, &Store::new()), "1,2|1;2");
    }

    #[test]
    fn test_render_loop_scope() {
        let source = "<% foreach $x in items %><% $last = $x %><% end %><%= $x %>|<%= $last %>";
        let receiver = json!({ "items": [1, 2] });

        assert_eq!(helper_render(source, &receiver, &Store::new()), "|2");
    }

    #[test]
    fn test_render_nested_loops() {
        let source = concat!(
            "<% foreach $row in rows %><% foreach $cell in $row %>",
            "<%= $row#index %><%= $cell#index %> <% end %><% end %>"
        );
        let receiver = json!({ "rows": [[1, 2], [3]] });

        assert_eq!(helper_render(source, &receiver, &Store::new()), "00 01 10 ");
    }

    #[test]
    fn test_render_encoder() {
        let engine = Engine::default().with_encoder_must("upper", |text: &str| text.to_uppercase());
        let template = compile(r#"<%= name encoding="upper" %>|<%= none default="x" encoding=upper %>"#)
            .unwrap();
        let output = template
            .render(&engine, &json!({ "name": "taylor" }), &Store::new())
            .unwrap();

        assert_eq!(output, "TAYLOR|X");
    }

    #[test]
    fn test_render_unknown_encoder() {
        let template = compile_named("page", "a\n<%= name encoding=html %>").unwrap();
        let error = template
            .render(&Engine::default(), &json!({ "name": "x" }), &Store::new())
            .unwrap_err();

        assert_eq!(error.reason(), "unknown encoder: html");
        assert_eq!(error.path(), Some("page"));
        assert_eq!(error.line(), Some(2));
    }

    #[test]
    fn test_render_sub_template_binding() {
        let source = "<% $greeting -%>\n  Hi, <%= name %>  \n<% end %>[<%= $greeting %>]";

        assert_eq!(
            helper_render(source, &json!({ "name": "taylor" }), &Store::new()),
            "[Hi, taylor]"
        );
    }

    #[test]
    fn test_render_inline_param() {
        let engine = Engine::default().with_global(
            Scope::new().with_macro("wrap", |args: &Arguments| -> Result<Value, Error> {
                let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
                Ok(json!(format!("<{text}>")))
            }),
        );
        let template = compile(r#"<% wrap text="hi <%= name %>" %>"#).unwrap();
        let output = template
            .render(&engine, &json!({ "name": "taylor" }), &Store::new())
            .unwrap();

        assert_eq!(output, "<hi taylor>");
    }

    #[test]
    fn test_render_capture_option() {
        let source = r#"<% foreach $x in items prefix="(" suffix=")" %><%= $x %><% end %>"#;

        assert_eq!(
            helper_render(source, &json!({ "items": [1, 2] }), &Store::new()),
            "(12)"
        );
        assert_eq!(
            helper_render(source, &json!({ "items": [] }), &Store::new()),
            ""
        );
    }

    #[test]
    fn test_render_whitespace() {
        let source = "<% if true %>\nline\n<% end %>\n<%= 1 -%>\nnext";

        assert_eq!(helper_render(source, &json!(null), &Store::new()), "line\n1next");
    }

    #[test]
    fn test_render_determinism() {
        let template = compile("<% foreach $x in items %><%= $x#odd %><% end %>").unwrap();
        let receiver = json!({ "items": [1, 2, 3] });
        let engine = Engine::default();
        let first = template.render(&engine, &receiver, &Store::new()).unwrap();
        let second = template.render(&engine, &receiver, &Store::new()).unwrap();

        assert_eq!(first, "falsetruefalse");
        assert_eq!(first, second);
    }

    #[test]
    fn test_render_inherited_params() {
        let template: Template = compile("<% #row %><%= param.a %><%= param.b %><% end %>").unwrap();
        let outer = Store::new().with_must("a", 1).with_must("b", 2);
        let inner = Store::new().with_must("a", 3);
        let inherited = Params::new(&outer);
        let output = template
            .render_sub_template(&Engine::default(), &json!(null), "#row", &inner, Some(&inherited))
            .unwrap();

        assert_eq!(output, "32");
        assert_eq!(outer.get("a"), Some(&json!(1)));
        assert_eq!(inner.len(), 1);
    }
}
