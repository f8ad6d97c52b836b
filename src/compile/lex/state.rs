/// Describes the internal state of a [`Lexer`][`super::Lexer`].
#[derive(Debug, PartialEq)]
pub enum CursorState {
    /// Indicates the [`Lexer`][`super::Lexer`] is reading literal text.
    Default,
    /// Indicates the [`Lexer`][`super::Lexer`] is inside of a tag.
    Inside {
        /// Count of `<%` markers not yet closed by `%>`.
        depth: usize,
        /// Line that the tag begins on.
        line: usize,
        /// Byte offset of the tag within its first line.
        begin: usize,
        /// Text of the tag read so far.
        body: String,
    },
    /// Indicates the current line has been read, and a line break is pending.
    Break,
}
