mod lex;
mod parse;
mod template;

pub use crate::compile::{
    parse::{program::Program, tree, Parser},
    template::{TagRecord, Template},
};

use crate::log::Error;

/// Compile a [`Template`] from the given text.
///
/// Provides a shortcut to quickly compile a `Template` without creating
/// an `Engine`. The `Template` is named `inline`.
///
/// # Examples
///
/// ```
/// use stencil::compile;
///
/// let template = compile("<%= name %>");
/// assert!(template.is_ok())
/// ```
pub fn compile(text: &str) -> Result<Template, Error> {
    Parser::new(text).compile()
}

/// Compile a [`Template`] with the given name from the given text.
///
/// The name is also the diagnostic path reported by errors.
///
/// # Examples
///
/// ```
/// use stencil::compile_named;
///
/// let error = compile_named("page.tpl", "<% if x %>").unwrap_err();
/// assert_eq!(error.path(), Some("page.tpl"));
/// ```
pub fn compile_named(name: &str, text: &str) -> Result<Template, Error> {
    Parser::new(text).with_name(name).compile()
}
