use std::ops::Range;

/// Represents an area within a line of source text.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Region {
    /// The beginning of the range, inclusive.
    pub begin: usize,
    /// The ending of the range, exclusive.
    pub end: usize,
}

impl Region {
    /// Create a new Region from the given range.
    pub fn new(position: Range<usize>) -> Self {
        Self {
            begin: position.start,
            end: position.end,
        }
    }

    /// Return the text that the [`Region`] covers in the given line, clamped to its end.
    ///
    /// Returns None if the `Region` begins past the end of the line, or does not fall
    /// on character boundaries.
    pub fn within<'source>(&self, line: &'source str) -> Option<&'source str> {
        line.get(self.begin..self.end.min(line.len()))
    }
}

impl From<Range<usize>> for Region {
    fn from(value: Range<usize>) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Region;

    #[test]
    fn test_from_range() {
        assert_eq!(Region::from(2..6), Region { begin: 2, end: 6 });
    }

    #[test]
    fn test_within() {
        let line = "<% if $x %>";

        assert_eq!(Region::new(3..5).within(line), Some("if"));
        assert_eq!(Region::new(6..40).within(line), Some("$x %>"));
        assert_eq!(Region::new(20..25).within(line), None);
    }
}
