//! Template parser.
//!
//! Utilizes a Lexer to receive instances of Segment, which it uses to construct
//! a new Template containing the compiled Program and its sub-templates.
//!
//! The Template can be rendered against a receiver and a Store to produce output.
pub mod expr;
pub mod macros;
pub mod program;
pub mod tree;

mod state;

use crate::{
    compile::{
        lex::{segment::Segment, segment::Tag, Lexer},
        parse::{
            expr::{parse_expr, unescape, Resolve},
            macros::{parse_macro, split_command, Kind, Link, Macro, Options, Parts, CONTROLS},
            program::Program,
            state::{Post, State},
            tree::{Args, Expr, FilterCall, ForEach, If, Instruction, Invocation, Pipeline},
        },
        template::{locate, TagRecord},
    },
    log::{
        unexpected, Error, CONTROL_NOT_CLOSED, INVALID_OPTION, INVALID_SYNTAX,
        UNEXPECTED_CONTROL,
    },
    render::value::to_text,
    Template,
};

use std::collections::HashMap;
use tracing::debug;

/// How the captured text of a sub-template declaration is trimmed.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Trim {
    /// No suffix, removes a blank first line and a blank last line.
    Edges,
    /// `-` suffix, removes all surrounding whitespace.
    All,
    /// `+` suffix, keeps the text as written.
    Keep,
}

/// A sub-template declaration that is still collecting its text.
struct Capture {
    name: String,
    trim: Trim,
    /// Control constructs opened inside of the captured text.
    depth: usize,
    text: String,
    /// Zero-based absolute line that the captured text begins on.
    line: usize,
    origin: usize,
}

/// Compiles template source into a [`Template`].
///
/// # Examples
///
/// ```
/// use stencil::Parser;
///
/// let template = Parser::new("Hello, <%= name %>!")
///     .with_name("greeting")
///     .compile();
///
/// assert!(template.is_ok());
/// ```
pub struct Parser<'source> {
    /// Lexer used to pull from source as segments instead of raw text.
    lexer: Lexer<'source>,
    name: String,
    /// Diagnostic path reported by errors.
    path: String,
    /// Text inserted for every line break of the source.
    line_break: String,
    /// Open control constructs, innermost last.
    states: Vec<State>,
    /// Programs being built, one for the template and one for each open construct.
    scopes: Vec<Program>,
    /// Every tag seen so far, indexed by origin.
    tags: Vec<TagRecord>,
    children: Vec<Template>,
    /// `$name` declarations, rendered and bound before the body runs.
    renders: Vec<(String, bool, usize)>,
    /// Slots of the active loops, by loop variable.
    loops: HashMap<String, Vec<usize>>,
    slots: usize,
    /// Counter for the names of inline `param_N` sub-templates.
    params: usize,
    /// Literal text waiting to be written.
    buffer: String,
    skip_whitespace: bool,
    skip_line_break: bool,
    capture: Option<Capture>,
    /// Index of the tag being compiled.
    origin: usize,
}

impl<'source> Parser<'source> {
    /// Create a new Parser from the given string.
    #[inline]
    pub fn new(source: &'source str) -> Self {
        Self {
            lexer: Lexer::new(source),
            name: String::from("inline"),
            path: String::from("inline"),
            line_break: String::from("\n"),
            states: vec![],
            scopes: vec![Program::new()],
            tags: vec![],
            children: vec![],
            renders: vec![],
            loops: HashMap::new(),
            slots: 0,
            params: 0,
            buffer: String::new(),
            skip_whitespace: false,
            skip_line_break: false,
            capture: None,
            origin: 0,
        }
    }

    /// Set the name of the compiled [`Template`].
    ///
    /// The diagnostic path is set to the same value, unless `with_path` is used
    /// afterwards.
    #[inline]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self.path = name.to_owned();

        self
    }

    /// Set the diagnostic path reported by errors.
    #[inline]
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_owned();

        self
    }

    /// Set the text written for every line break of the source.
    #[inline]
    pub fn with_line_break(mut self, line_break: &str) -> Self {
        self.line_break = line_break.to_owned();
        self.lexer = self.lexer.with_line_break(line_break);

        self
    }

    /// Set the offset added to every reported line number.
    #[inline]
    pub fn with_line_offset(mut self, offset: usize) -> Self {
        self.lexer = self.lexer.with_line_offset(offset);

        self
    }

    /// Compile the template.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] located at the offending tag when the source is malformed.
    pub fn compile(mut self) -> Result<Template, Error> {
        loop {
            let segment = match self.lexer.next() {
                Ok(Some(segment)) => segment,
                Ok(None) => break,
                Err(error) => return Err(error.with_path(self.path.clone())),
            };

            match segment {
                Segment::Literal(text) => self.literal(text),
                Segment::LineBreak => self.line_break(),
                Segment::Tag(tag) => {
                    let origin = self.record(&tag);
                    if let Err(error) = self.tag(&tag) {
                        return Err(self.locate(error, origin));
                    }
                }
            }
        }

        self.finish()
    }

    fn literal(&mut self, text: &str) {
        self.skip_line_break = false;
        match &mut self.capture {
            Some(capture) => capture.text.push_str(text),
            None => self.buffer.push_str(text),
        }
    }

    fn line_break(&mut self) {
        if std::mem::take(&mut self.skip_line_break) {
            return;
        }
        match &mut self.capture {
            Some(capture) => capture.text.push_str(&self.line_break),
            None => self.buffer.push_str(&self.line_break),
        }
    }

    /// Remember the tag, returning its origin.
    fn record(&mut self, tag: &Tag) -> usize {
        self.tags.push(TagRecord {
            line: tag.line,
            text: tag.text.clone(),
            source: tag.source.to_owned(),
            region: tag.region,
        });
        self.origin = self.tags.len() - 1;

        self.origin
    }

    fn locate(&self, error: Error, origin: usize) -> Error {
        locate(error, &self.path, self.tags.get(origin))
    }

    fn tag(&mut self, tag: &Tag) -> Result<(), Error> {
        self.skip_line_break = false;

        if let Some((name, trim)) = declaration(&tag.text) {
            self.finish_capture()?;
            self.flush();
            self.capture = Some(Capture {
                name,
                trim,
                depth: 0,
                text: String::new(),
                line: tag.line + tag.text.matches(self.line_break.as_str()).count(),
                origin: self.origin,
            });

            return Ok(());
        }

        if let Some(capture) = &mut self.capture {
            match control_word(&tag.text) {
                Some("if" | "foreach" | "begin") => capture.depth += 1,
                Some("end") if capture.depth == 0 => {
                    self.finish_capture()?;
                    self.skip_line_break = tag.ends_line;

                    return Ok(());
                }
                Some("end") => capture.depth -= 1,
                _ => {}
            }
            capture.text.push_str(&tag.text);

            return Ok(());
        }

        self.flush();

        if tag.text == "<%-%>" {
            self.skip_whitespace = true;
            return Ok(());
        }
        if tag.text.starts_with("<%--") {
            self.skip_line_break = tag.ends_line;
            return Ok(());
        }

        let parsed = parse_macro(&tag.text, true)?;
        let swallow = parsed.swallow;
        self.statement(parsed)?;
        self.skip_line_break = swallow && tag.ends_line;

        Ok(())
    }

    /// Write the buffered literal text.
    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let mut text = std::mem::take(&mut self.buffer);
        if std::mem::take(&mut self.skip_whitespace) {
            let trimmed = text.trim_start();
            if trimmed.is_empty() {
                return;
            }
            text = trimmed.to_owned();
        }

        self.emit(Instruction::Literal(text));
    }

    /// Append the instruction to the innermost program.
    ///
    /// Adjacent literals are joined.
    fn emit(&mut self, instruction: Instruction) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };

        if let Instruction::Literal(text) = &instruction {
            if let Some(Instruction::Literal(previous)) = scope.data.last_mut() {
                previous.push_str(text);
                return;
            }
        }

        scope.push(instruction);
    }

    /// Compile the text of a finished declaration into a sub-template.
    fn finish_capture(&mut self) -> Result<(), Error> {
        let Some(capture) = self.capture.take() else {
            return Ok(());
        };

        let text = capture.text.as_str();
        let (body, skipped) = match capture.trim {
            Trim::Keep => (text, 0),
            Trim::All => (text.trim(), text.len() - text.trim_start().len()),
            Trim::Edges => trim_edges(text, &self.line_break),
        };
        let removed = text[..skipped].matches(self.line_break.as_str()).count();

        let path = format!("{}{}", self.path, capture.name);
        let child = Parser::new(body)
            .with_name(&capture.name)
            .with_path(&path)
            .with_line_break(&self.line_break)
            .with_line_offset(capture.line + removed)
            .compile()
            .map_err(|error| self.locate(error, capture.origin))?;

        self.children.retain(|other| other.name() != capture.name);
        self.children.push(child);

        if capture.name.starts_with('$') {
            self.renders.retain(|(name, ..)| *name != capture.name);
            self.renders
                .push((capture.name, capture.trim == Trim::All, capture.origin));
        }

        Ok(())
    }

    fn finish(mut self) -> Result<Template, Error> {
        if let Some(state) = self.states.last() {
            let error = Error::build(CONTROL_NOT_CLOSED).with_help(format!(
                "did you close the `{}` construct with `<% end %>`?",
                state.command()
            ));
            return Err(self.locate(error, state.origin()));
        }

        self.flush();
        self.finish_capture()?;

        let mut program = self.scopes.pop().unwrap_or_default();
        let mut data = self
            .renders
            .iter()
            .map(|(name, trim, origin)| Instruction::Bind {
                name: name.clone(),
                trim: *trim,
                origin: *origin,
            })
            .collect::<Vec<_>>();
        data.append(&mut program.data);
        program.data = data;

        debug!(
            name = %self.name,
            path = %self.path,
            tags = self.tags.len(),
            children = self.children.len(),
            "compiled template"
        );

        Ok(Template::new(
            self.name,
            self.path,
            program,
            self.children,
            self.tags,
        ))
    }

    /// Compile a tag in statement position.
    fn statement(&mut self, parsed: Macro) -> Result<(), Error> {
        check_options(&parsed)?;

        match parsed.kind {
            Kind::Control => self.control(parsed),
            Kind::Setter => {
                if !parsed.filters.is_empty() {
                    return Err(Error::build(INVALID_OPTION)
                        .with_help("a setter does not take filters, apply them to the value"));
                }
                let expr = self.value(&parsed.opcode)?;
                let origin = self.origin;
                self.emit(Instruction::Set {
                    name: parsed.command,
                    expr,
                    origin,
                });

                Ok(())
            }
            Kind::Data | Kind::Call => {
                if let Some(instruction) = self.output(&parsed)? {
                    self.emit(instruction);
                }

                Ok(())
            }
        }
    }

    /// Compile a data or call tag into the instruction that writes it.
    ///
    /// Literal data with nothing to write compiles to nothing.
    fn output(&mut self, parsed: &Macro) -> Result<Option<Instruction>, Error> {
        let expr = self.main_expr(parsed)?;
        let pipeline = self.pipeline(parsed)?;
        let condition = self.optional(parsed.options.condition.as_deref())?;
        let origin = self.origin;

        let instruction = if pipeline.is_active() {
            Instruction::Filtered {
                expr,
                pipeline,
                origin,
            }
        } else {
            let literal = expr
                .as_literal()
                .filter(|_| parsed.kind == Kind::Data)
                .cloned();
            match literal {
                Some(value) if !value.is_null() => {
                    let text = to_text(&value);
                    match (text.is_empty(), pipeline.default) {
                        (false, _) => Instruction::Literal(text),
                        (true, Some(default)) => Instruction::Output {
                            expr: default,
                            default: None,
                            origin,
                        },
                        (true, None) => return Ok(None),
                    }
                }
                Some(_) if pipeline.default.is_none() => return Ok(None),
                _ => Instruction::Output {
                    expr,
                    default: pipeline.default,
                    origin,
                },
            }
        };

        Ok(Some(match condition {
            Some(condition) => Instruction::If(If {
                branches: vec![(condition, Program::from(vec![instruction]))],
                otherwise: None,
                origin,
            }),
            None => instruction,
        }))
    }

    /// Compile a tag found in value position, such as an argument or an option.
    fn value_macro(&mut self, parsed: Macro) -> Result<Expr, Error> {
        check_options(&parsed)?;
        if parsed.kind == Kind::Setter {
            return Err(Error::build(INVALID_SYNTAX)
                .with_help("a setter cannot be nested in a value, set it in its own tag"));
        }

        let expr = self.main_expr(&parsed)?;
        let pipeline = self.pipeline(&parsed)?;
        let condition = self.optional(parsed.options.condition.as_deref())?;
        let origin = self.origin;

        if !pipeline.is_active() && pipeline.default.is_none() {
            return Ok(match condition {
                Some(condition) => Expr::Guard {
                    cond: Box::new(condition),
                    expr: Box::new(expr),
                },
                None => expr,
            });
        }

        let output = match pipeline.is_active() {
            true => Instruction::Filtered {
                expr,
                pipeline,
                origin,
            },
            false => Instruction::Output {
                expr,
                default: pipeline.default,
                origin,
            },
        };
        let program = match condition {
            Some(condition) => Program::from(vec![Instruction::If(If {
                branches: vec![(condition, Program::from(vec![output]))],
                otherwise: None,
                origin,
            })]),
            None => Program::from(vec![output]),
        };

        Ok(Expr::Capture(program))
    }

    /// Compile the value a tag produces, before any post-processing.
    fn main_expr(&mut self, parsed: &Macro) -> Result<Expr, Error> {
        let expr = match parsed.kind {
            Kind::Data => self.value(&parsed.opcode)?,
            _ => {
                let (object, name) = split_command(&parsed.command);
                let args = self.args(&parsed.named, &parsed.positional)?;

                Expr::Invoke(Box::new(Invocation {
                    command: parsed.command.clone(),
                    object,
                    name,
                    args,
                    trim: parsed.trim,
                    origin: self.origin,
                }))
            }
        };

        Ok(encoded(expr, &parsed.options))
    }

    fn pipeline(&mut self, parsed: &Macro) -> Result<Pipeline, Error> {
        let filters = parsed
            .filters
            .iter()
            .map(|link| self.filter(link))
            .collect::<Result<Vec<_>, _>>()?;
        let prefix = self.optional(parsed.options.prefix.as_deref())?;
        let suffix = self.optional(parsed.options.suffix.as_deref())?;
        let default = self
            .optional(parsed.options.default.as_deref())?
            .map(|default| encoded(default, &parsed.options));

        Ok(Pipeline {
            filters,
            prefix,
            suffix,
            default,
        })
    }

    fn filter(&mut self, link: &Link) -> Result<FilterCall, Error> {
        let (object, name) = split_command(&link.command);

        Ok(FilterCall {
            command: link.command.clone(),
            object,
            name,
            args: self.args(&link.named, &link.positional)?,
        })
    }

    fn args(&mut self, named: &[(String, String)], positional: &[String]) -> Result<Args, Error> {
        let named = named
            .iter()
            .map(|(key, text)| Ok((key.clone(), self.value(text)?)))
            .collect::<Result<Vec<_>, Error>>()?;
        let positional = positional
            .iter()
            .map(|text| self.value(text))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Args { named, positional })
    }

    fn optional(&mut self, text: Option<&str>) -> Result<Option<Expr>, Error> {
        text.map(|text| self.value(text)).transpose()
    }

    /// Compile the text of a value.
    ///
    /// Quoted text containing a tag becomes an inline sub-template.
    fn value(&mut self, text: &str) -> Result<Expr, Error> {
        if text.contains("<%") && (text.starts_with('"') || text.starts_with('\'')) {
            return self.inline(text);
        }

        parse_expr(text, self)
    }

    /// Compile quoted text containing tags into a `param_N` sub-template.
    fn inline(&mut self, text: &str) -> Result<Expr, Error> {
        let quote = &text[..1];
        let Some(body) = text[1..].strip_suffix(quote) else {
            return Err(Error::build(INVALID_SYNTAX)
                .with_help(format!("string is not closed, expected `{quote}`")));
        };

        let name = format!("param_{}", self.params);
        self.params += 1;

        let line = self.tags.get(self.origin).map_or(0, |record| record.line);
        let child = Parser::new(&unescape(body))
            .with_name(&name)
            .with_path(&format!("{}#{name}", self.path))
            .with_line_break(&self.line_break)
            .with_line_offset(line)
            .compile()?;
        self.children.push(child);

        Ok(Expr::SubTemplate(name))
    }

    fn control(&mut self, parsed: Macro) -> Result<(), Error> {
        let origin = self.origin;

        match parsed.command.as_str() {
            "if" => {
                let condition = self.condition(&parsed)?;
                let post = self.post(&parsed)?;
                self.states.push(State::If {
                    branches: vec![],
                    pending: Some(condition),
                    origin,
                    post,
                });
                self.scopes.push(Program::new());
            }
            "elseif" => {
                let condition = self.condition(&parsed)?;
                let body = self.pop_branch("elseif")?;
                if let Some(State::If {
                    branches, pending, ..
                }) = self.states.last_mut()
                {
                    if let Some(previous) = pending.replace(condition) {
                        branches.push((previous, body));
                    }
                }
                self.scopes.push(Program::new());
            }
            "else" => {
                let body = self.pop_branch("else")?;
                if let Some(State::If {
                    branches, pending, ..
                }) = self.states.last_mut()
                {
                    if let Some(previous) = pending.take() {
                        branches.push((previous, body));
                    }
                }
                self.scopes.push(Program::new());
            }
            "foreach" => {
                let (variable, list) = parse_loop(&parsed.opcode)?;
                let list = self.value(list)?;
                let separator = self.optional(parsed.options.separator.as_deref())?;
                let post = self.post(&parsed)?;
                let slot = self.slots;
                self.slots += 1;

                self.loops.entry(variable.clone()).or_default().push(slot);
                self.states.push(State::ForEach {
                    variable,
                    slot,
                    list,
                    separator,
                    origin,
                    post,
                });
                self.scopes.push(Program::new());
            }
            "begin" => {
                if !parsed.opcode.is_empty() {
                    return Err(Error::build(INVALID_SYNTAX)
                        .with_reason(unexpected(&parsed.opcode))
                        .with_help("`begin` takes no expression"));
                }
                let post = self.post(&parsed)?;
                self.states.push(State::Begin { origin, post });
                self.scopes.push(Program::new());
            }
            _ => self.end()?,
        }

        Ok(())
    }

    fn condition(&mut self, parsed: &Macro) -> Result<Expr, Error> {
        if parsed.opcode.is_empty() {
            return Err(Error::build(INVALID_SYNTAX)
                .with_help(format!("`{}` needs a condition", parsed.command)));
        }

        self.value(&parsed.opcode)
    }

    fn post(&mut self, parsed: &Macro) -> Result<Post, Error> {
        Ok(Post {
            pipeline: self.pipeline(parsed)?,
            encoding: parsed.options.encoding.as_deref().map(encoding_name),
        })
    }

    /// Finish the current branch of the innermost `if`, returning its body.
    fn pop_branch(&mut self, command: &str) -> Result<Program, Error> {
        match self.states.last() {
            Some(State::If {
                pending: Some(_), ..
            }) => Ok(self.scopes.pop().unwrap_or_default()),
            Some(State::If { pending: None, .. }) => Err(Error::build(UNEXPECTED_CONTROL)
                .with_reason(unexpected(command))
                .with_help(format!("`{command}` cannot follow `else`"))),
            _ => Err(Error::build(UNEXPECTED_CONTROL)
                .with_reason(unexpected(command))
                .with_help(format!("`{command}` must follow `if` or `elseif`"))),
        }
    }

    fn end(&mut self) -> Result<(), Error> {
        let Some(state) = self.states.pop() else {
            return Err(Error::build(UNEXPECTED_CONTROL)
                .with_reason(unexpected("end"))
                .with_help("remove the tag, or open a construct with `if`, `foreach` or `begin`"));
        };
        let body = self.scopes.pop().unwrap_or_default();

        let (instruction, post, origin) = match state {
            State::If {
                mut branches,
                pending,
                origin,
                post,
            } => {
                let otherwise = match pending {
                    Some(condition) => {
                        branches.push((condition, body));
                        None
                    }
                    None => Some(body),
                };
                let instruction = Instruction::If(If {
                    branches,
                    otherwise,
                    origin,
                });

                (instruction, post, origin)
            }
            State::ForEach {
                variable,
                slot,
                list,
                separator,
                origin,
                post,
            } => {
                if let Some(slots) = self.loops.get_mut(&variable) {
                    slots.pop();
                }
                let instruction = Instruction::ForEach(ForEach {
                    variable,
                    slot,
                    list,
                    body,
                    separator,
                    origin,
                });

                (instruction, post, origin)
            }
            State::Begin { origin, post } => (Instruction::Begin(body), post, origin),
        };

        self.emit(post.apply(instruction, origin));

        Ok(())
    }
}

impl Resolve for Parser<'_> {
    fn loop_slot(&self, variable: &str) -> Option<usize> {
        self.loops
            .get(variable)
            .and_then(|slots| slots.last().copied())
    }

    fn nested(&mut self, tag: &str) -> Result<Expr, Error> {
        let parsed = parse_macro(tag, false)?;

        self.value_macro(parsed)
    }
}

/// Reject options that the kind of tag does not accept.
fn check_options(parsed: &Macro) -> Result<(), Error> {
    let is_control = parsed.kind == Kind::Control;
    let command = parsed.command.as_str();

    if matches!(parsed.kind, Kind::Data | Kind::Control) {
        if let Some((key, _)) = parsed.named.first() {
            return Err(Error::build(INVALID_OPTION).with_help(format!(
                "`{key}` is not an option, expected one of `prefix`, `suffix`, `default`, \
                `encoding`, `separator` or `if`"
            )));
        }
    }
    if parsed.options.separator.is_some() && !(is_control && command == "foreach") {
        return Err(
            Error::build(INVALID_OPTION).with_help("`separator` is only an option of `foreach`")
        );
    }
    if is_control && parsed.options.condition.is_some() {
        return Err(Error::build(INVALID_OPTION)
            .with_help(format!("`if` is not an option of `{command}`")));
    }
    if is_control && matches!(command, "elseif" | "else" | "end") {
        let has_options = !parsed.options.keys().is_empty() || !parsed.filters.is_empty();
        if has_options {
            return Err(Error::build(INVALID_OPTION).with_help(format!(
                "`{command}` takes no options, set them on the tag that opens the construct"
            )));
        }
        if command != "elseif" && !parsed.opcode.is_empty() {
            return Err(Error::build(INVALID_SYNTAX)
                .with_reason(unexpected(&parsed.opcode))
                .with_help(format!("`{command}` takes no expression")));
        }
    }

    Ok(())
}

/// Wrap the expression in the encoder named by the options.
fn encoded(expr: Expr, options: &Options) -> Expr {
    match options.encoding.as_deref() {
        Some(encoding) => Expr::Encode(encoding_name(encoding), Box::new(expr)),
        None => expr,
    }
}

/// Return the name of an encoder, given as a quoted string or as bare text.
fn encoding_name(text: &str) -> String {
    for quote in ['"', '\''] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|text| text.strip_suffix(quote))
        {
            return inner.to_owned();
        }
    }

    text.to_owned()
}

/// Split the expression of a `foreach` into its variable and the text of its list.
fn parse_loop(opcode: &str) -> Result<(String, &str), Error> {
    let malformed = || {
        Error::build(INVALID_SYNTAX)
            .with_help("expected a loop in the form `foreach $item in list`")
    };

    let (variable, rest) = opcode
        .trim()
        .split_once(char::is_whitespace)
        .ok_or_else(malformed)?;
    let list = rest
        .trim_start()
        .strip_prefix("in")
        .filter(|list| list.starts_with(char::is_whitespace))
        .map(str::trim)
        .filter(|list| !list.is_empty())
        .ok_or_else(malformed)?;

    let name = variable.strip_prefix('$').ok_or_else(malformed)?;
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(malformed());
    }

    Ok((variable.to_owned(), list))
}

/// Return the name and trimming of a sub-template declaration tag.
fn declaration(text: &str) -> Option<(String, Trim)> {
    let inner = text.strip_prefix("<%")?.strip_suffix("%>")?.trim_start();
    if !inner.starts_with(['#', '$']) {
        return None;
    }

    let rest = &inner[1..];
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    let trim = match rest[end..].trim() {
        "" => Trim::Edges,
        "-" => Trim::All,
        "+" => Trim::Keep,
        _ => return None,
    };

    Some((inner[..end + 1].to_owned(), trim))
}

/// Split off a whitespace-only first line and a whitespace-only last line.
///
/// Returns the remaining text and the number of bytes removed from its start.
fn trim_edges<'t>(text: &'t str, line_break: &str) -> (&'t str, usize) {
    let start = match text.find(line_break) {
        Some(index) if text[..index].trim().is_empty() => index + line_break.len(),
        _ => 0,
    };

    let body = &text[start..];
    let body = match body.rfind(line_break) {
        Some(index) if body[index + line_break.len()..].trim().is_empty() => &body[..index],
        _ => body,
    };

    (body, start)
}

/// Return the command of a tag if it is a control command.
///
/// The command is read as a whole part, so `end_date` is not `end`.
fn control_word(text: &str) -> Option<&'static str> {
    let inner = text.strip_prefix("<%")?.strip_suffix("%>")?;
    if inner.starts_with('=') {
        return None;
    }

    let inner = inner.strip_suffix('-').unwrap_or(inner);
    let command = Parts::new(inner.trim()).next()?;

    CONTROLS.into_iter().find(|word| *word == command)
}

#[cfg(test)]
mod tests {
    use super::{declaration, parse_loop, Parser, Trim};
    use crate::compile::tree::{Expr, Instruction, LoopField};
    use serde_json::json;

    #[test]
    fn test_literal_only() {
        let template = Parser::new("one\ntwo\r\nthree").compile().unwrap();

        assert_eq!(
            template.program.data,
            vec![Instruction::Literal("one\ntwo\nthree".into())]
        );
    }

    #[test]
    fn test_literal_folding() {
        let template = Parser::new(r#"a<%= "b" %><%= 1 %><%= null %>c"#)
            .compile()
            .unwrap();

        assert_eq!(
            template.program.data,
            vec![Instruction::Literal("ab1c".into())]
        );
    }

    #[test]
    fn test_swallow_line_break() {
        let template = Parser::new("<% $x = 1 %>\nA\n<% if $x %>\nB\n<% end %>\n")
            .compile()
            .unwrap();

        assert_eq!(template.program.data.len(), 3);
        assert_eq!(template.program.data[1], Instruction::Literal("A\n".into()));
    }

    #[test]
    fn test_skip_whitespace() {
        let template = Parser::new("a<%-%>\n   b").compile().unwrap();

        assert_eq!(template.program.data, vec![Instruction::Literal("ab".into())]);
    }

    #[test]
    fn test_comment() {
        let template = Parser::new("a\n<%-- note --%>\nb").compile().unwrap();

        assert_eq!(template.program.data, vec![Instruction::Literal("a\nb".into())]);
    }

    #[test]
    fn test_loop_reference() {
        let template = Parser::new("<% foreach $x in list %><%= $x#index %><% end %>")
            .compile()
            .unwrap();
        let Instruction::ForEach(each) = &template.program.data[0] else {
            panic!("expected a loop");
        };

        assert_eq!(
            each.body.data[0],
            Instruction::Output {
                expr: Expr::Loop {
                    slot: 0,
                    field: LoopField::Index,
                },
                default: None,
                origin: 1,
            }
        );
    }

    #[test]
    fn test_unmatched_else() {
        let error = Parser::new("a\nb\n<% else %>").compile().unwrap_err();

        assert_eq!(error.line(), Some(3));
        assert_eq!(error.tag(), Some("<% else %>"));
        assert_eq!(error.path(), Some("inline"));
    }

    #[test]
    fn test_unmatched_end() {
        let error = Parser::new("<% end %>").with_name("page").compile().unwrap_err();

        assert_eq!(
            error.to_string(),
            "template error in page, line 1, in <% end %>: unexpected `end`"
        );
    }

    #[test]
    fn test_unterminated_if() {
        let error = Parser::new("x\n<% if $a %>\ny").compile().unwrap_err();

        assert_eq!(error.reason(), "control tag is not closed");
        assert_eq!(error.line(), Some(2));
    }

    #[test]
    fn test_else_after_else() {
        assert!(Parser::new("<% if a %><% else %><% else %><% end %>")
            .compile()
            .is_err());
        assert!(Parser::new("<% if a %><% else %><% elseif b %><% end %>")
            .compile()
            .is_err());
    }

    #[test]
    fn test_operator_rejected() {
        let error = Parser::new("<%= 1 + 1 %>").compile().unwrap_err();

        assert_eq!(error.reason(), "invalid syntax");
        assert_eq!(error.line(), Some(1));
    }

    #[test]
    fn test_option_errors() {
        assert!(Parser::new(r#"<%= x class="a" %>"#).compile().is_err());
        assert!(Parser::new(r#"<%= x separator=", " %>"#).compile().is_err());
        assert!(Parser::new("<% if a if=b %><% end %>").compile().is_err());
        assert!(Parser::new("<% if a %><% end prefix=x %>").compile().is_err());
        assert!(Parser::new("<% if a %><% else b %><% end %>").compile().is_err());
        assert!(Parser::new("<% $x = a | upper %>").compile().is_err());
        assert!(Parser::new(r#"<% link title=<% $x = 1 %> %>"#).compile().is_err());
    }

    #[test]
    fn test_setter() {
        let template = Parser::new(r#"<% $name = "taylor" %>"#).compile().unwrap();

        assert_eq!(
            template.program.data,
            vec![Instruction::Set {
                name: "$name".into(),
                expr: Expr::Literal(json!("taylor")),
                origin: 0,
            }]
        );
    }

    #[test]
    fn test_sub_template_declaration() {
        let source = "head\n<% $row %>\n<%= name %>\n<% end %>\n<% #cell -%>  x  <% end %>";
        let template = Parser::new(source).with_name("list.tpl").compile().unwrap();

        assert_eq!(
            template.program.data[0],
            Instruction::Bind {
                name: "$row".into(),
                trim: false,
                origin: 0,
            }
        );
        assert_eq!(template.program.data[1], Instruction::Literal("head\n".into()));

        let row = template.sub_template("$row").unwrap();
        assert_eq!(row.path(), "list.tpl$row");
        assert_eq!(row.tags[0].line, 2);

        let cell = template.sub_template("#cell").unwrap();
        assert_eq!(cell.program.data, vec![Instruction::Literal("x".into())]);
    }

    #[test]
    fn test_sub_template_nested_end() {
        let source = "<% #row %><% if a %>x<% end %><% end %>y";
        let template = Parser::new(source).compile().unwrap();
        let row = template.sub_template("#row").unwrap();

        assert!(matches!(row.program.data[0], Instruction::If(_)));
        assert_eq!(template.program.data, vec![Instruction::Literal("y".into())]);
    }

    #[test]
    fn test_sub_template_control_prefix() {
        for source in [
            "<% #row %><% if_set %><% end %>tail",
            "<% #row %>[<% end_date %>]<% end %>tail",
            "<% #row %><% end.x %><% end2 %><% end %>tail",
        ] {
            let template = Parser::new(source).compile().unwrap();
            let row = template.sub_template("#row").unwrap();

            assert!(row
                .program
                .data
                .iter()
                .all(|instruction| !matches!(instruction, Instruction::If(_))));
            assert_eq!(template.program.data, vec![Instruction::Literal("tail".into())]);
        }
    }

    #[test]
    fn test_sub_template_blank_edges() {
        let template = Parser::new("<% #row %>  \nX\n  <% end %><% #cell %> Y<% end %>")
            .compile()
            .unwrap();

        let row = template.sub_template("#row").unwrap();
        assert_eq!(row.program.data, vec![Instruction::Literal("X".into())]);

        let cell = template.sub_template("#cell").unwrap();
        assert_eq!(cell.program.data, vec![Instruction::Literal(" Y".into())]);
    }

    #[test]
    fn test_compile_determinism() {
        let source = concat!(
            "<% $head %>[<%= title %>]<% end %>",
            r#"<% foreach $x in items separator=", " %><%= $x#index %><%= $x | upper %><% end %>"#,
            r#"<% if a %>a<% elseif !b %>b<% else %><% link href="<%= c %>" %><% end %>"#
        );
        let first = Parser::new(source).compile().unwrap();
        let second = Parser::new(source).compile().unwrap();

        assert_eq!(first.program.data, second.program.data);
        assert_eq!(
            first.sub_template("$head").unwrap().program.data,
            second.sub_template("$head").unwrap().program.data
        );
        assert_eq!(first.tags, second.tags);
    }

    #[test]
    fn test_sub_template_error_line() {
        let error = Parser::new("a\nb\n<% #row %>\nok\n<%= 1 + 1 %>\n<% end %>")
            .with_name("page")
            .compile()
            .unwrap_err();

        assert_eq!(error.path(), Some("page#row"));
        assert_eq!(error.line(), Some(5));
    }

    #[test]
    fn test_inline_param() {
        let template = Parser::new(r#"<% link title="<%= name %>!" %>"#)
            .compile()
            .unwrap();

        assert!(template.sub_template("param_0").is_some());
    }

    #[test]
    fn test_parse_loop() {
        assert_eq!(
            parse_loop(" $item in this.items ").unwrap(),
            ("$item".to_string(), "this.items")
        );
        assert!(parse_loop("item in list").is_err());
        assert!(parse_loop("$item of list").is_err());
        assert!(parse_loop("$item in").is_err());
    }

    #[test]
    fn test_declaration() {
        assert_eq!(declaration("<% #row %>"), Some(("#row".into(), Trim::Edges)));
        assert_eq!(declaration("<%$head-%>"), Some(("$head".into(), Trim::All)));
        assert_eq!(declaration("<% $head + %>"), Some(("$head".into(), Trim::Keep)));
        assert_eq!(declaration("<% $x = 1 %>"), None);
        assert_eq!(declaration("<%= $x %>"), None);
    }
}
