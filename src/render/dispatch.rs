use crate::{
    compile::tree::{Args, FilterCall, Invocation, Key, Pipeline, Root, Target},
    log::{error_unknown_sub_template, Error},
    object::{Arguments, Object},
    render::{
        store::{Params, Store},
        value::{is_empty, to_text},
        writer::Writer,
        Lineage, Renderer,
    },
};

use serde_json::Value;
use tracing::warn;

/// A step of a lookup: an object that may expose handlers, or plain data.
pub(crate) enum Walk<'a> {
    Object(&'a dyn Object),
    Value(Value),
    Missing,
}

impl<'a> Walk<'a> {
    /// Follow the key from the current step.
    fn step(self, key: &Key) -> Walk<'a> {
        match (self, key) {
            (Walk::Object(object), Key::Name(name)) => match object.object(name) {
                Some(child) => Walk::Object(child),
                None => object.get(name).map_or(Walk::Missing, Walk::Value),
            },
            (Walk::Object(object), Key::Index(_)) => Walk::Value(object.to_value()).step(key),
            (Walk::Value(Value::Object(mut map)), Key::Name(name)) => {
                map.remove(name).map_or(Walk::Missing, Walk::Value)
            }
            (Walk::Value(Value::Object(mut map)), Key::Index(index)) => map
                .remove(&index.to_string())
                .map_or(Walk::Missing, Walk::Value),
            (Walk::Value(Value::Array(mut array)), Key::Index(index)) if *index < array.len() => {
                Walk::Value(array.swap_remove(*index))
            }
            _ => Walk::Missing,
        }
    }

    /// Return the value reached, or null when nothing was found.
    pub fn into_value(self) -> Value {
        match self {
            Walk::Object(object) => object.to_value(),
            Walk::Value(value) => value,
            Walk::Missing => Value::Null,
        }
    }
}

impl<'a> Renderer<'a> {
    /// Resolve a path from its root.
    pub(crate) fn walk(&self, root: &Root, keys: &[Key]) -> Walk<'a> {
        let receiver = self.receiver;
        let global = self.engine.global();

        let start = match root {
            Root::Local(name) => self
                .locals
                .get(name)
                .cloned()
                .map_or(Walk::Missing, Walk::Value),
            Root::Receiver if receiver.is_null() => Walk::Missing,
            Root::Receiver => Walk::Object(receiver),
            Root::Params => Walk::Object(self.params as &dyn Object),
            Root::Global => Walk::Object(global),
            Root::Name(name) => [receiver, global]
                .into_iter()
                .find_map(|object| match object.object(name) {
                    Some(child) => Some(Walk::Object(child)),
                    None => object.get(name).map(Walk::Value),
                })
                .unwrap_or(Walk::Missing),
        };

        keys.iter().fold(start, Walk::step)
    }

    /// Resolve the object that a command is looked up on.
    fn target(&self, target: &Target) -> Walk<'a> {
        let Target::Path(segments) = target else {
            return Walk::Object(self.engine.global());
        };
        let Some((first, rest)) = segments.split_first() else {
            return Walk::Object(self.engine.global());
        };

        let root = match first.as_str() {
            "this" => Root::Receiver,
            "global" => Root::Global,
            "param" => Root::Params,
            local if local.starts_with('$') => Root::Local(local.to_owned()),
            name => Root::Name(name.to_owned()),
        };
        let keys = rest
            .iter()
            .map(|segment| Key::Name(segment.clone()))
            .collect::<Vec<_>>();

        self.walk(&root, &keys)
    }

    fn arguments(&mut self, args: &Args, writer: &mut Writer) -> Result<Arguments, Error> {
        let mut arguments = Arguments::new();
        for (name, expr) in &args.named {
            arguments = arguments.with_named(name.as_str(), self.eval(expr, writer)?);
        }
        for expr in &args.positional {
            arguments = arguments.with_positional(self.eval(expr, writer)?);
        }

        Ok(arguments.process())
    }

    /// Call a macro, returning its result.
    ///
    /// A macro that cannot be found or that fails writes a marker instead, and
    /// returns null.
    pub(crate) fn invoke(
        &mut self,
        invocation: &Invocation,
        writer: &mut Writer,
    ) -> Result<Value, Error> {
        self.origin = Some(invocation.origin);
        let arguments = self.arguments(&invocation.args, writer)?;
        let command = invocation.command.as_str();

        let walk = self.target(&invocation.object);
        let target: &dyn Object = match &walk {
            Walk::Object(object) => *object,
            Walk::Value(value) if !value.is_null() => value,
            _ => {
                unhandled_macro(command, writer);
                return Ok(Value::Null);
            }
        };

        let result = match invocation.name.as_str() {
            "template" => self.template_macro(target, &arguments),
            name => match target.call_macro(name, &arguments) {
                Some(result) => result,
                None => match target.get(name) {
                    Some(value) => Ok(value),
                    None => {
                        unhandled_macro(command, writer);
                        return Ok(Value::Null);
                    }
                },
            },
        };

        match result {
            Ok(value) if invocation.trim && !value.is_null() => {
                Ok(Value::String(to_text(&value).trim().to_owned()))
            }
            Ok(value) => Ok(value),
            Err(error) => {
                warn!(command, reason = error.reason(), "macro failed");
                let marker = self.macro_marker(command, &error);
                writer.write_str(&marker);

                Ok(Value::Null)
            }
        }
    }

    /// Render another template with the target as its receiver.
    ///
    /// The first positional argument names the template, and named arguments become
    /// its parameters. `#name` refers to a sub-template of the owner of the current
    /// template, which also inherits the current parameters.
    fn template_macro(&self, target: &dyn Object, arguments: &Arguments) -> Result<Value, Error> {
        let Some(name) = arguments.at(0).and_then(Value::as_str) else {
            return Err(Error::build("missing template name")
                .with_help("pass the name as the first argument, as in `template \"#row\"`"));
        };
        let store = Store::from(arguments.named().clone());
        let mut writer = Writer::new();

        if name.starts_with('#') {
            let owner = self.lineage.owner();
            let child = owner
                .template
                .sub_template(name)
                .ok_or_else(|| error_unknown_sub_template(name))?;
            let lineage = Lineage {
                template: child,
                parent: Some(&owner),
            };
            let params = Params::owned(store).with_parent(self.params);
            Renderer::new(self.engine, lineage, target, &params).run(&mut writer)?;
        } else {
            let resolved = self.engine.resolve(name)?;
            let params = Params::owned(store);
            resolved.render_params(self.engine, target, &params, &mut writer)?;
        }

        Ok(Value::String(writer.finish()))
    }

    /// Return the marker written in place of a failed macro.
    fn macro_marker(&self, command: &str, error: &Error) -> String {
        if error.is_located() {
            return format!("[Macro error in {command}: {error}]");
        }

        let template = self.lineage.template;
        match self.origin.and_then(|origin| template.tag(origin)) {
            Some(record) => format!(
                "[Macro error in {command}: {} ({}; line {}: {})]",
                error.reason(),
                template.path(),
                record.line + 1,
                record.text
            ),
            None => format!("[Macro error in {command}: {}]", error.reason()),
        }
    }

    /// Write a value through a [`Pipeline`].
    ///
    /// Filters, the prefix and the suffix apply to non-empty values only. An empty value
    /// writes the default, which never passes through the filters.
    pub(crate) fn write_filtered(
        &mut self,
        value: Value,
        pipeline: &Pipeline,
        writer: &mut Writer,
    ) -> Result<(), Error> {
        if is_empty(&value) {
            if let Some(default) = &pipeline.default {
                let default = self.eval(default, writer)?;
                writer.write(&default);
            }
            return Ok(());
        }

        let mut value = value;
        for filter in &pipeline.filters {
            value = self.apply_filter(filter, value, writer)?;
        }

        if let Some(prefix) = &pipeline.prefix {
            let prefix = self.eval(prefix, writer)?;
            writer.write(&prefix);
        }
        writer.write(&value);
        if let Some(suffix) = &pipeline.suffix {
            let suffix = self.eval(suffix, writer)?;
            writer.write(&suffix);
        }

        Ok(())
    }

    /// Apply one filter, returning the filtered value.
    ///
    /// A filter that cannot be found or that fails writes a marker, and the value passes
    /// through unchanged.
    fn apply_filter(
        &mut self,
        filter: &FilterCall,
        value: Value,
        writer: &mut Writer,
    ) -> Result<Value, Error> {
        let arguments = self.arguments(&filter.args, writer)?;
        let command = filter.command.as_str();

        let walk = self.target(&filter.object);
        let target: Option<&dyn Object> = match &walk {
            Walk::Object(object) => Some(*object),
            Walk::Value(value) if !value.is_null() => Some(value as &dyn Object),
            _ => None,
        };

        match target.and_then(|target| target.call_filter(&filter.name, &value, &arguments)) {
            Some(Ok(filtered)) => Ok(filtered),
            Some(Err(error)) => {
                warn!(command, reason = error.reason(), "filter failed");
                writer.write_str(&format!("[Filter error in {command}: {}]", error.reason()));

                Ok(value)
            }
            None => {
                warn!(command, "unhandled filter");
                writer.write_str(&format!("[Filter unhandled: {command}]"));

                Ok(value)
            }
        }
    }
}

fn unhandled_macro(command: &str, writer: &mut Writer) {
    warn!(command, "unhandled macro");
    writer.write_str(&format!("[Macro unhandled: {command}]"));
}

#[cfg(test)]
mod tests {
    use crate::{
        compile,
        object::{serde::json, Arguments, Object, Scope},
        Engine, Error, Store,
    };
    use serde_json::Value;

    /// A receiver that exposes one macro and one filter.
    struct Page;

    impl Object for Page {
        fn call_macro(&self, name: &str, args: &Arguments) -> Option<Result<Value, Error>> {
            match name {
                "link" => {
                    let href = args.at(0).and_then(Value::as_str).unwrap_or_default();
                    let class = args.get("class").and_then(Value::as_str).unwrap_or("plain");
                    Some(Ok(json!(format!("<a class={class}>{href}</a>"))))
                }
                "fail" => Some(Err(Error::build("no such page"))),
                _ => None,
            }
        }

        fn call_filter(
            &self,
            name: &str,
            value: &Value,
            _: &Arguments,
        ) -> Option<Result<Value, Error>> {
            match name {
                "shout" => Some(Ok(json!(format!("{}!", value.as_str().unwrap_or_default())))),
                _ => None,
            }
        }

        fn get(&self, name: &str) -> Option<Value> {
            (name == "title").then(|| json!("  Home  "))
        }
    }

    fn helper_engine() -> Engine {
        Engine::default().with_global(
            Scope::new()
                .with_filter("upper", |value: &Value, _: &Arguments| -> Result<Value, Error> {
                    Ok(json!(value.as_str().unwrap_or_default().to_uppercase()))
                })
                .with_filter("wrap", |value: &Value, args: &Arguments| -> Result<Value, Error> {
                    let with = args.get("with").and_then(Value::as_str).unwrap_or("*");
                    Ok(json!(format!("{with}{}{with}", value.as_str().unwrap_or_default())))
                })
                .with_filter("broken", |_: &Value, _: &Arguments| -> Result<Value, Error> {
                    Err(Error::build("cannot filter"))
                }),
        )
    }

    fn helper_render(source: &str, receiver: &dyn Object) -> String {
        compile(source)
            .unwrap()
            .render(&helper_engine(), receiver, &Store::new())
            .unwrap()
    }

    #[test]
    fn test_invoke_receiver_macro() {
        assert_eq!(
            helper_render(r#"<% this.link "/home" class="nav" %>"#, &Page),
            "<a class=nav>/home</a>"
        );
    }

    #[test]
    fn test_invoke_plain_value() {
        assert_eq!(helper_render("[<% this.title %>][<% this.title -%>]", &Page), "[  Home  ][Home]");
    }

    #[test]
    fn test_invoke_unhandled() {
        assert_eq!(helper_render("<% this.x %>", &json!(null)), "[Macro unhandled: this.x]");
        assert_eq!(helper_render("<% nothing %>", &Page), "[Macro unhandled: nothing]");
    }

    #[test]
    fn test_invoke_error_marker() {
        let output = compile("a\n<% this.fail %>")
            .unwrap()
            .render(&Engine::default(), &Page, &Store::new())
            .unwrap();

        assert_eq!(
            output,
            "a\n[Macro error in this.fail: no such page (inline; line 2: <% this.fail %>)]"
        );
    }

    #[test]
    fn test_filter_order() {
        let source = r#"<%= name prefix="(" suffix=")" | upper | wrap with="_" %>"#;

        assert_eq!(helper_render(source, &json!({ "name": "ab" })), "(_AB_)");
    }

    #[test]
    fn test_filter_on_receiver() {
        assert_eq!(helper_render("<%= this.title | this.shout %>", &Page), "  Home  !");
    }

    #[test]
    fn test_filter_unhandled_and_error() {
        let source = "<%= name | missing | broken | upper %>";

        assert_eq!(
            helper_render(source, &json!({ "name": "ab" })),
            "[Filter unhandled: missing][Filter error in broken: cannot filter]AB"
        );
    }

    #[test]
    fn test_filter_skips_empty() {
        let source = r#"<%= name prefix="(" default="none" | upper %>"#;

        assert_eq!(helper_render(source, &json!({ "name": "" })), "none");
    }

    #[test]
    fn test_template_macro() {
        let source = concat!(
            r##"<% #item %><%= this.name %>=<%= param.n %>,<%= param.lang %><% end %>"##,
            r##"<% foreach $x in items %><% $x.template "#item" n=$x#index %>;<% end %>"##
        );
        let receiver = json!({ "items": [{ "name": "a" }, { "name": "b" }] });
        let store = Store::new().with_must("lang", "en");
        let output = compile(source)
            .unwrap()
            .render(&Engine::default(), &receiver, &store)
            .unwrap();

        assert_eq!(output, "a=0,en;b=1,en;");
    }

    #[test]
    fn test_template_macro_unknown() {
        let output = helper_render(r##"<% this.template "#none" %>"##, &json!({ "a": 1 }));

        assert_eq!(
            output,
            r##"[Macro error in this.template: unknown sub-template: #none (inline; line 1: <% this.template "#none" %>)]"##
        );
    }
}
