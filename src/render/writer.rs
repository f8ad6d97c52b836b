use super::value::write_value;
use serde_json::Value;

/// A stack of text buffers that rendered output is written to.
///
/// [`push`][`Writer::push`] opens a nested capture and [`pop`][`Writer::pop`] closes it,
/// returning what was written in between. Every `push` must be matched by exactly one
/// `pop`, including when rendering the captured content fails.
///
/// # Examples
///
/// ```
/// use stencil::{object::serde::json, Writer};
///
/// let mut writer = Writer::new();
/// writer.write_str("a");
/// writer.push();
/// writer.write(&json!([1, 2]));
/// let captured = writer.pop();
/// writer.write(&json!(null));
///
/// assert_eq!(captured, "[1, 2]");
/// assert_eq!(writer.finish(), "a");
/// ```
#[derive(Debug, Default)]
pub struct Writer {
    buffers: Vec<String>,
    current: String,
}

impl Writer {
    /// Create a new, empty [`Writer`].
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the text to the current buffer.
    #[inline]
    pub fn write_str(&mut self, text: &str) {
        self.current.push_str(text);
    }

    /// Append the formatted value to the current buffer.
    ///
    /// Null is a no-op.
    #[inline]
    pub fn write(&mut self, value: &Value) {
        write_value(&mut self.current, value);
    }

    /// Open a new buffer, preserving the current one beneath it.
    #[inline]
    pub fn push(&mut self) {
        let previous = std::mem::take(&mut self.current);
        self.buffers.push(previous);
    }

    /// Close the current buffer and return its contents, restoring the previous buffer.
    pub fn pop(&mut self) -> String {
        let previous = self.buffers.pop().unwrap_or_default();

        std::mem::replace(&mut self.current, previous)
    }

    /// Return the number of open captures.
    #[inline]
    pub fn depth(&self) -> usize {
        self.buffers.len()
    }

    /// Consume the [`Writer`] and return the text of the outermost buffer.
    pub fn finish(mut self) -> String {
        while !self.buffers.is_empty() {
            self.pop();
        }

        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::Writer;
    use serde_json::json;

    #[test]
    fn test_nested_captures() {
        let mut writer = Writer::new();
        writer.write_str("<");
        writer.push();
        writer.write_str("outer");
        writer.push();
        writer.write(&json!(42));

        assert_eq!(writer.depth(), 2);
        assert_eq!(writer.pop(), "42");
        assert_eq!(writer.pop(), "outer");
        assert_eq!(writer.depth(), 0);
        writer.write_str(">");
        assert_eq!(writer.finish(), "<>");
    }

    #[test]
    fn test_write_null() {
        let mut writer = Writer::new();
        writer.write(&json!(null));
        writer.write(&json!(""));

        assert_eq!(writer.finish(), "");
    }
}
