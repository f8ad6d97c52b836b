use crate::{
    compile::tree::Target,
    log::{unexpected, Error, INVALID_SYNTAX, INVALID_TAG},
};

/// Commands that open, continue or close a control construct.
pub const CONTROLS: [&str; 6] = ["foreach", "begin", "if", "elseif", "else", "end"];

/// Named arguments that configure how a tag is written, instead of being passed to a
/// handler.
pub const RESERVED: [&str; 6] = ["prefix", "suffix", "default", "encoding", "separator", "if"];

/// The role of a parsed tag.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Kind {
    /// `<%= expr %>`, writes a value.
    Data,
    /// `if`, `elseif`, `else`, `foreach`, `begin` or `end`.
    Control,
    /// `<% $name = value %>`, assigns a local reference.
    Setter,
    /// Any other tag, calls a macro.
    Call,
}

/// Reserved options of a tag, as raw value text.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Options {
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub default: Option<String>,
    pub encoding: Option<String>,
    pub separator: Option<String>,
    pub condition: Option<String>,
}

impl Options {
    /// Set the option with the given key.
    ///
    /// Returns false if the key is not reserved.
    fn set(&mut self, key: &str, value: String) -> bool {
        let slot = match key {
            "prefix" => &mut self.prefix,
            "suffix" => &mut self.suffix,
            "default" => &mut self.default,
            "encoding" => &mut self.encoding,
            "separator" => &mut self.separator,
            "if" => &mut self.condition,
            _ => return false,
        };
        *slot = Some(value);

        true
    }

    /// Return the keys of the options that are set.
    pub fn keys(&self) -> Vec<&'static str> {
        [
            ("prefix", &self.prefix),
            ("suffix", &self.suffix),
            ("default", &self.default),
            ("encoding", &self.encoding),
            ("separator", &self.separator),
            ("if", &self.condition),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_some())
        .map(|(key, _)| key)
        .collect()
    }
}

/// A parsed tag.
#[derive(Debug, PartialEq, Clone)]
pub struct Macro {
    /// The first token of the tag.
    pub command: String,
    pub kind: Kind,
    /// The expression of a data or control tag, or the value of a setter.
    pub opcode: String,
    /// Named arguments that are not reserved, as raw value text.
    pub named: Vec<(String, String)>,
    /// Bare arguments, as raw value text.
    pub positional: Vec<String>,
    pub options: Options,
    /// The filter chain following the first `|`.
    pub filters: Vec<Link>,
    /// True if the line break following the tag is swallowed.
    pub swallow: bool,
    /// True if the tag ended with `-%>`.
    pub trim: bool,
}

/// A filter of a chain, as written in a tag.
#[derive(Debug, PartialEq, Clone)]
pub struct Link {
    pub command: String,
    pub named: Vec<(String, String)>,
    pub positional: Vec<String>,
}

/// Intermediate state of a [`Macro`] or [`Link`] during assembly.
struct Draft {
    command: String,
    kind: Kind,
    opcode: Vec<String>,
    named: Vec<(String, String)>,
    positional: Vec<String>,
    options: Options,
    has_equals: bool,
}

impl Draft {
    fn new(command: &str, kind: Kind) -> Self {
        let mut draft = Self {
            command: command.to_owned(),
            kind,
            opcode: vec![],
            named: vec![],
            positional: vec![],
            options: Options::default(),
            has_equals: false,
        };
        if kind == Kind::Setter {
            if let Some(name) = command.strip_suffix('=') {
                draft.command = name.to_owned();
                draft.has_equals = true;
            }
        }

        draft
    }
}

/// Parse the text of a tag into a [`Macro`].
///
/// Control commands are only recognized when `allow_controls` is true.
///
/// # Errors
///
/// Returns an [`Error`] when the tag is malformed.
pub fn parse_macro(tag: &str, allow_controls: bool) -> Result<Macro, Error> {
    let inner = tag
        .strip_prefix("<%")
        .and_then(|inner| inner.strip_suffix("%>"))
        .ok_or_else(|| {
            Error::build(INVALID_TAG).with_help("a tag must begin with `<%` and end with `%>`")
        })?;
    let (is_data, inner) = match inner.strip_prefix('=') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    let (trim, inner) = match inner.strip_suffix('-') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };

    let mut parts = Parts::new(inner.trim());
    let mut drafts: Vec<Draft> = vec![];
    let mut expect_command = true;
    let mut append = true;

    while let Some(part) = parts.next() {
        if expect_command {
            if part == "|" || part == "=" {
                return Err(Error::build(INVALID_SYNTAX)
                    .with_help(format!("expected a command before `{part}`")));
            }
            let kind = if !drafts.is_empty() {
                Kind::Call
            } else if is_data {
                Kind::Data
            } else if allow_controls && CONTROLS.contains(&part) {
                Kind::Control
            } else if part.starts_with('$') {
                Kind::Setter
            } else {
                Kind::Call
            };
            let is_main = drafts.is_empty();
            let mut draft = Draft::new(part, kind);
            if !is_main {
                // Links never carry a kind of their own.
                draft.kind = Kind::Call;
            }
            drafts.push(draft);
            expect_command = false;
            append = true;
            continue;
        }

        let is_main = drafts.len() == 1;
        let Some(draft) = drafts.last_mut() else {
            break;
        };

        if is_named(part) {
            let key = &part[..part.len() - 1];
            let value = parts.next().ok_or_else(|| {
                Error::build(INVALID_SYNTAX)
                    .with_help(format!("expected a value after `{part}`"))
            })?;
            if draft.kind == Kind::Setter {
                draft.kind = Kind::Call;
            }
            if !(is_main && draft.options.set(key, value.to_owned())) {
                draft.named.push((key.to_owned(), value.to_owned()));
            }
            append = false;
        } else if part == "|" {
            expect_command = true;
        } else if is_main && matches!(draft.kind, Kind::Data | Kind::Control) {
            if !append {
                return Err(Error::build(INVALID_SYNTAX)
                    .with_reason(unexpected(part))
                    .with_help("bare values must come before named options"));
            }
            draft.opcode.push(part.to_owned());
        } else if draft.kind == Kind::Setter && part == "=" {
            draft.has_equals = true;
        } else {
            draft.positional.push(part.to_owned());
        }
    }

    if drafts.is_empty() {
        return Err(Error::build(INVALID_TAG).with_help("the tag is empty, add a command"));
    }
    if expect_command {
        return Err(Error::build(INVALID_SYNTAX).with_help("expected a filter after `|`"));
    }

    let mut drafts = drafts.into_iter();
    let Some(main) = drafts.next() else {
        return Err(Error::build(INVALID_TAG));
    };
    let filters = drafts
        .map(|draft| Link {
            command: draft.command,
            named: draft.named,
            positional: draft.positional,
        })
        .collect();

    let kind = match main.kind {
        Kind::Setter if main.has_equals && !main.positional.is_empty() => Kind::Setter,
        Kind::Setter => Kind::Call,
        kind => kind,
    };
    let opcode = match kind {
        Kind::Data => {
            let mut words = vec![main.command.clone()];
            words.extend(main.opcode);
            words.join(" ")
        }
        Kind::Control => {
            let opcode = main.opcode.join(" ");
            match opcode
                .strip_prefix('(')
                .and_then(|inner| inner.strip_suffix(')'))
            {
                Some(inner) => inner.trim().to_owned(),
                None => opcode,
            }
        }
        Kind::Setter => main.positional.concat(),
        Kind::Call => String::new(),
    };
    let positional = match kind {
        Kind::Setter => vec![],
        _ => main.positional,
    };

    Ok(Macro {
        command: main.command,
        kind,
        opcode,
        named: main.named,
        positional,
        options: main.options,
        filters,
        swallow: trim || matches!(kind, Kind::Control | Kind::Setter),
        trim,
    })
}

/// Split a command at its last `.` into the lookup object and the member name.
///
/// Undotted commands are looked up on the global scope.
pub fn split_command(command: &str) -> (Target, String) {
    match command.rsplit_once('.') {
        Some((object, name)) => (
            Target::Path(object.split('.').map(str::to_owned).collect()),
            name.to_owned(),
        ),
        None => (Target::Global, command.to_owned()),
    }
}

/// Return true if the part introduces a named argument, as in `key=`.
fn is_named(part: &str) -> bool {
    part.strip_suffix('=')
        .and_then(|key| key.chars().last())
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Iterates the parts of a tag's content.
///
/// Parts are separated by whitespace, and by a single `=` or `|`. Quotes, brackets and
/// nested tags are read as one part up to their balanced closer.
pub struct Parts<'a> {
    content: &'a str,
    start: usize,
    pos: usize,
    done: bool,
    pending: Option<&'a str>,
}

impl<'a> Parts<'a> {
    /// Create a new [`Parts`] over the given content.
    pub fn new(content: &'a str) -> Self {
        Self {
            content,
            start: 0,
            pos: 0,
            done: false,
            pending: None,
        }
    }

    /// Return the text between the previous boundary and the cursor.
    fn take(&mut self) -> Option<&'a str> {
        if self.pos > self.start {
            let previous = self.start;
            self.start = self.pos;

            return Some(&self.content[previous..self.pos]);
        }

        None
    }

    /// Return the next part, without separating a `|` glued to its end.
    fn next_raw(&mut self) -> Option<&'a str> {
        let content = self.content;

        while self.pos < content.len() {
            let rest = &content[self.pos..];
            let Some(ch) = rest.chars().next() else {
                break;
            };

            if ch.is_whitespace() {
                if let Some(part) = self.take() {
                    return Some(part);
                }
                self.pos = rest
                    .find(|c: char| !c.is_whitespace())
                    .map_or(content.len(), |index| self.pos + index);
                self.start = self.pos;
                continue;
            }

            if (ch == '=' || ch == '|') && rest[1..].chars().next() != Some(ch) {
                self.pos += 1;
                return self.take();
            }

            if let Some((open, close)) = opener(rest) {
                let from = self.pos + open.map_or(1, str::len);
                self.pos = find_closing(content, from, open, close).unwrap_or(content.len());
                return self.take();
            }

            let after = self.pos + ch.len_utf8();
            self.pos = content[after..]
                .find(is_boundary)
                .map_or(content.len(), |index| after + index);
        }

        if !self.done {
            self.done = true;
            return self.take();
        }

        None
    }
}

impl<'a> Iterator for Parts<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if let Some(pending) = self.pending.take() {
            return Some(pending);
        }

        let part = self.next_raw()?;
        match part.strip_suffix('|') {
            Some(head) if !head.is_empty() && !head.ends_with('|') => {
                self.pending = Some(&part[head.len()..]);
                Some(head)
            }
            _ => Some(part),
        }
    }
}

/// Return the opening and closing markers if the text begins with a quote, a bracket or
/// a nested tag.
///
/// Quotes have no opening marker, as they cannot nest.
fn opener(text: &str) -> Option<(Option<&'static str>, &'static str)> {
    match text.as_bytes().first()? {
        b'(' => Some((Some("("), ")")),
        b'[' => Some((Some("["), "]")),
        b'{' => Some((Some("{"), "}")),
        b'"' => Some((None, "\"")),
        b'\'' => Some((None, "'")),
        b'<' if text.starts_with("<%") => Some((Some("<%"), "%>")),
        _ => None,
    }
}

/// Return true if the character may start a new part.
fn is_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, '=' | '|' | '"' | '\'' | '(' | '[' | '{' | '<')
}

/// Return the position just past the marker that closes an opener, counting nested
/// openers from `from`.
///
/// Markers preceded by `\` are skipped. Returns None when the content ends first.
pub fn find_closing(content: &str, from: usize, open: Option<&str>, close: &str) -> Option<usize> {
    let mut count = 1_usize;
    let mut at = from;

    loop {
        let rest = content.get(at..)?;
        let close_at = rest.find(close)?;
        let (index, length, is_open) = match open.and_then(|open| rest.find(open)) {
            Some(open_at) if open_at < close_at => (open_at, open.map_or(0, str::len), true),
            _ => (close_at, close.len(), false),
        };
        let absolute = at + index;
        at = absolute + length;

        if absolute > 0 && content.as_bytes()[absolute - 1] == b'\\' {
            continue;
        }
        if is_open {
            count += 1;
        } else {
            count -= 1;
            if count == 0 {
                return Some(at);
            }
        }
    }
}
