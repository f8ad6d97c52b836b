use crate::region::Region;

/// Markers searched for by the [`Lexer`][`super::Lexer`].
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Marker {
    /// `<%`
    Open,
    /// `%>`
    Close,
}

impl Marker {
    /// Return the text of the [`Marker`].
    pub fn text(&self) -> &'static str {
        match self {
            Marker::Open => "<%",
            Marker::Close => "%>",
        }
    }
}

impl From<Marker> for usize {
    fn from(marker: Marker) -> Self {
        marker as usize
    }
}

impl From<usize> for Marker {
    fn from(id: usize) -> Self {
        match id {
            0 => Marker::Open,
            _ => Marker::Close,
        }
    }
}

/// Types emitted by the Lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Segment<'source> {
    /// A run of literal text within one line.
    Literal(&'source str),
    /// The boundary between two source lines.
    LineBreak,
    /// A complete tag, which may span several lines.
    Tag(Tag<'source>),
}

/// A closed tag, recorded with where it begins.
#[derive(Debug, PartialEq, Clone)]
pub struct Tag<'source> {
    /// Raw text of the tag, from `<%` to `%>`.
    ///
    /// Line breaks inside the tag are replaced by the configured line break.
    pub text: String,
    /// Zero-based source line that the tag begins on.
    pub line: usize,
    /// Source line that the tag begins on.
    pub source: &'source str,
    /// [`Region`] of the tag within `source`.
    pub region: Region,
    /// True if nothing follows the tag on the line where it closes.
    pub ends_line: bool,
}
