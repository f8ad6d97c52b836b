pub mod segment;

mod state;

use crate::log::{Error, TAG_NOT_CLOSED};

use self::{
    segment::{Marker, Segment, Tag},
    state::CursorState,
};

use morel::{Finder, Syntax};

/// Provides methods to read source lines as [`Segment`] instances.
pub struct Lexer<'source> {
    /// Source text, split into lines.
    lines: Vec<&'source str>,
    /// Compiled [`Finder`] instance used to search for markers
    /// in the source text.
    finder: Finder,
    /// Index of the current line.
    line: usize,
    /// Position within the current line.
    cursor: usize,
    /// Tracks the [`Lexer`] state and determines the action taken
    /// when `.next` is called.
    state: CursorState,
    /// Text that joins the lines of a tag spanning more than one line.
    line_break: String,
    /// Added to every reported line number.
    line_offset: usize,
}

impl<'source> Lexer<'source> {
    /// Create a new [`Lexer`] from the given source.
    #[inline]
    pub fn new(source: &'source str) -> Self {
        Self {
            lines: split_lines(source),
            finder: Finder::new(markers()),
            line: 0,
            cursor: 0,
            state: CursorState::Default,
            line_break: String::from("\n"),
            line_offset: 0,
        }
    }

    /// Set the text that joins the lines of a multi-line tag.
    #[inline]
    pub fn with_line_break(mut self, line_break: &str) -> Self {
        self.line_break = line_break.to_owned();

        self
    }

    /// Set the offset added to every reported line number.
    #[inline]
    pub fn with_line_offset(mut self, offset: usize) -> Self {
        self.line_offset = offset;

        self
    }

    /// Return the next [`Segment`].
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the source ends inside of a tag.
    pub fn next(&mut self) -> Result<Option<Segment<'source>>, Error> {
        loop {
            let Some(&text) = self.lines.get(self.line) else {
                return match std::mem::replace(&mut self.state, CursorState::Default) {
                    CursorState::Inside {
                        line, begin, body, ..
                    } => Err(self.error_not_closed(line, begin, &body)),
                    _ => Ok(None),
                };
            };

            let next = match self.state {
                CursorState::Break => {
                    self.state = CursorState::Default;
                    self.line += 1;
                    self.cursor = 0;

                    (self.line < self.lines.len()).then_some(Segment::LineBreak)
                }
                CursorState::Default => self.lex_default(text),
                CursorState::Inside { .. } => self.lex_tag(text),
            };

            if next.is_some() {
                return Ok(next);
            }
        }
    }

    /// Read literal text up to the next `<%` on the current line.
    ///
    /// A stray `%>` outside of a tag is literal text.
    fn lex_default(&mut self, text: &'source str) -> Option<Segment<'source>> {
        let from = self.cursor;
        let mut search = from;

        loop {
            match self.finder.next(text, search) {
                Some((id, begin, end)) if Marker::from(id) == Marker::Open => {
                    self.state = CursorState::Inside {
                        depth: 1,
                        line: self.line,
                        begin,
                        body: String::new(),
                    };
                    self.cursor = end;

                    return (from < begin).then(|| Segment::Literal(&text[from..begin]));
                }
                Some((_, _, end)) => search = end,
                None => {
                    self.state = CursorState::Break;
                    self.cursor = text.len();

                    return (from < text.len()).then(|| Segment::Literal(&text[from..]));
                }
            }
        }
    }

    /// Read tag text up to the `%>` that brings the nesting depth back to zero.
    ///
    /// When the tag does not close on the current line, its text is kept and the
    /// lexer moves on to the next line.
    fn lex_tag(&mut self, text: &'source str) -> Option<Segment<'source>> {
        let CursorState::Inside {
            mut depth,
            line,
            begin,
            mut body,
        } = std::mem::replace(&mut self.state, CursorState::Default)
        else {
            return None;
        };

        let anchor = if line == self.line { begin } else { 0 };
        let mut search = self.cursor;
        let closed = loop {
            match self.finder.next(text, search) {
                Some((id, _, end)) => {
                    search = end;
                    match Marker::from(id) {
                        Marker::Open => depth += 1,
                        Marker::Close => depth -= 1,
                    }
                    if depth == 0 {
                        break Some(end);
                    }
                }
                None => break None,
            }
        };

        match closed {
            Some(end) => {
                body.push_str(&text[anchor..end]);
                let source = self.lines[line];
                let region_end = if line == self.line { end } else { source.len() };
                self.cursor = end;

                Some(Segment::Tag(Tag {
                    text: body,
                    line: line + self.line_offset,
                    source,
                    region: (begin..region_end).into(),
                    ends_line: end == text.len(),
                }))
            }
            None => {
                body.push_str(&text[anchor..]);
                body.push_str(&self.line_break);
                self.state = CursorState::Inside {
                    depth,
                    line,
                    begin,
                    body,
                };
                self.line += 1;
                self.cursor = 0;

                None
            }
        }
    }

    /// Return an [`Error`] explaining that the tag beginning at the given position
    /// was never closed.
    fn error_not_closed(&self, line: usize, begin: usize, body: &str) -> Error {
        let source = self.lines.get(line).copied().unwrap_or_default();
        let number = line + self.line_offset;

        Error::build(TAG_NOT_CLOSED)
            .with_pointer(source, number, begin..source.len())
            .with_line(number + 1)
            .with_tag(body.trim_end())
            .with_help(format!(
                "expected `{}` to close the tag, did you leave out a `%` or `>`?",
                Marker::Close.text()
            ))
    }
}

/// Return the [`Syntax`] of the two markers that delimit a tag.
fn markers() -> Syntax {
    let markers = [Marker::Open, Marker::Close]
        .into_iter()
        .map(|marker| (marker.into(), marker.text().to_owned()))
        .collect::<Vec<(usize, String)>>();

    Syntax::new(markers)
}

/// Split the source into lines at `\r\n`, `\n` or `\r`.
///
/// A trailing line break produces a final empty line.
pub fn split_lines(source: &str) -> Vec<&str> {
    let bytes = source.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut index = 0;

    while index < bytes.len() {
        match bytes[index] {
            b'\n' => {
                lines.push(&source[start..index]);
                index += 1;
                start = index;
            }
            b'\r' => {
                lines.push(&source[start..index]);
                index += if bytes.get(index + 1) == Some(&b'\n') { 2 } else { 1 };
                start = index;
            }
            _ => index += 1,
        }
    }
    lines.push(&source[start..]);

    lines
}
