use super::{Pointer, RED, RESET};
use crate::{log::Visual, region::Region};
use std::fmt::{Debug, Display, Formatter, Result};

/// Describes an error, and allows adding contextual help text, a visualization, and the
/// location within a template that the error comes from.
///
/// # Examples
///
/// Creating an [`Error`] that includes a [`Visual`] of type [`Pointer`]:
///
/// ```
/// use stencil::{Error, Region};
///
/// let error = Error::build("unmatched `end`")
///     .with_pointer("<% end %>", 0, Region::new(0..9))
///     .with_path("page.tpl")
///     .with_line(1)
///     .with_tag("<% end %>")
///     .with_help("remove the tag, or open a block with `if`, `foreach` or `begin`");
///
/// assert_eq!(
///     error.to_string(),
///     "template error in page.tpl, line 1, in <% end %>: unmatched `end`"
/// );
/// ```
///
/// When printed with `println!("{:#}", error)` the [`Error`] produces this output:
///
/// ```text
/// error: unmatched `end`
///  --> page.tpl:1:1
///   |
/// 1 | <% end %>
///   | ^^^^^^^^^
///   |
///  = help: remove the tag, or open a block with `if`, `foreach` or `begin`
/// ```
pub struct Error {
    /// Describes the cause of the [`Error`].
    reason: String,
    /// A visualization to help illustrate the [`Error`].
    visual: Option<Box<dyn Visual>>,
    /// Additional information to display with the [`Error`].
    help: Option<String>,
    /// The diagnostic path of the template that the [`Error`] comes from.
    path: Option<String>,
    /// The 1-based source line of the offending tag.
    line: Option<usize>,
    /// The raw text of the offending tag.
    tag: Option<String>,
}

impl Error {
    /// Create a new [`Error`] with the given reason text.
    ///
    /// The additional fields may be populated using the various methods
    /// defined on `Error`.
    ///
    /// # Examples
    ///
    /// ```
    /// use stencil::Error;
    ///
    /// Error::build("unexpected `else`")
    ///     .with_help("`else` must follow `if` or `elseif`");
    /// ```
    pub fn build<T>(reason: T) -> Self
    where
        T: Into<String>,
    {
        Error {
            reason: reason.into(),
            visual: None,
            help: None,
            path: None,
            line: None,
            tag: None,
        }
    }

    /// Set the reason text, which is a short summary of the [`Error`].
    pub fn with_reason<T>(mut self, text: T) -> Self
    where
        T: Into<String>,
    {
        self.reason = text.into();

        self
    }

    /// Set the diagnostic path of the [`Template`][`crate::Template`] that the
    /// [`Error`] is related to.
    ///
    /// An `Error` with a path is considered located, and is never wrapped again
    /// as it bubbles up through nested renders.
    pub fn with_path<T>(mut self, text: T) -> Self
    where
        T: Into<String>,
    {
        self.path = Some(text.into());

        self
    }

    /// Set the 1-based source line that the [`Error`] comes from.
    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);

        self
    }

    /// Set the raw text of the tag that the [`Error`] comes from.
    pub fn with_tag<T>(mut self, text: T) -> Self
    where
        T: Into<String>,
    {
        self.tag = Some(text.into());

        self
    }

    /// Set the [`Visual`], which is a visualization that helps illustrate the
    /// cause of the error.
    pub fn with_visual(mut self, visual: impl Visual + 'static) -> Self {
        self.visual = Some(Box::new(visual));

        self
    }

    /// Set the visualization to a new [`Pointer`] over the given line of text.
    ///
    /// This is a shortcut method for creating a `Pointer` yourself and then
    /// passing it to `with_visual`.
    pub fn with_pointer<T>(mut self, text: &str, line: usize, region: T) -> Self
    where
        T: Into<Region>,
    {
        self.visual = Some(Box::new(Pointer::new(text, line, region.into())));

        self
    }

    /// Set the help text, which is contextual information to accompany the
    /// reason text.
    pub fn with_help<T>(mut self, text: T) -> Self
    where
        T: Into<String>,
    {
        self.help = Some(text.into());

        self
    }

    /// Return the reason text.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Return the help text, if any.
    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    /// Return the diagnostic path of the template that the error is related to.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Return the 1-based source line that the error is related to.
    pub fn line(&self) -> Option<usize> {
        self.line
    }

    /// Return the raw tag text that the error is related to.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Return true if the [`Error`] already names the template it comes from.
    pub fn is_located(&self) -> bool {
        self.path.is_some()
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if !f.alternate() {
            writeln!(f, "{self:#}")?;
        }
        f.debug_struct("Error")
            .field("reason", &self.reason)
            .field("path", &self.path)
            .field("line", &self.line)
            .field("tag", &self.tag)
            .field("visual", &self.visual)
            .field("help", &self.help)
            .finish()?;

        Ok(())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if f.alternate() {
            write!(f, "{RED}error{RESET}: {}", self.reason)?;

            return match &self.visual {
                Some(visual) => visual.display(f, self.path.as_deref(), self.help.as_deref()),
                None => match &self.help {
                    Some(help) => write!(f, "\n = help: {help}"),
                    None => Ok(()),
                },
            };
        }

        if let Some(path) = &self.path {
            write!(f, "template error in {path}")?;
            if let Some(line) = self.line {
                write!(f, ", line {line}")?;
            }
            if let Some(tag) = &self.tag {
                write!(f, ", in {tag}")?;
            }
            write!(f, ": ")?;
        }

        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.reason == other.reason
            && self.help == other.help
            && self.path == other.path
            && self.line == other.line
            && self.tag == other.tag
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn test_display_unlocated() {
        let error = Error::build("tag is not closed");

        assert!(!error.is_located());
        assert_eq!(error.to_string(), "tag is not closed");
    }

    #[test]
    fn test_display_located() {
        let error = Error::build("unknown sub-template: #row")
            .with_path("list.tpl")
            .with_line(4)
            .with_tag("<% $rows %>");

        assert!(error.is_located());
        assert_eq!(
            error.to_string(),
            "template error in list.tpl, line 4, in <% $rows %>: unknown sub-template: #row"
        );
    }

    #[test]
    fn test_display_alternate_pointer() {
        let error = Error::build("invalid tag")
            .with_pointer("hello <% | %>", 0, 6..13)
            .with_path("inline")
            .with_help("a tag needs a command");
        let shown = format!("{error:#}");

        assert!(shown.contains("--> inline:1:7"));
        assert!(shown.contains("hello <% | %>"));
        assert!(shown.contains("^^^^^^^"));
        assert!(shown.contains("help: a tag needs a command"));
    }
}
