use super::Error;
use std::fmt::Display;

pub const INVALID_TAG: &str = "invalid tag";
pub const INVALID_SYNTAX: &str = "invalid syntax";
pub const INVALID_OPTION: &str = "invalid option";
pub const TAG_NOT_CLOSED: &str = "tag is not closed";
pub const CONTROL_NOT_CLOSED: &str = "control tag is not closed";
pub const UNEXPECTED_CONTROL: &str = "unexpected control tag";
pub const INVALID_TEMPLATE: &str = "invalid template";
pub const INVALID_ENCODER: &str = "invalid encoder";

/// Return an [`Error`] describing a missing template.
pub fn error_missing_template(name: &str) -> Error {
    Error::build("missing template").with_help(format!(
        "template `{name}` not found in engine, add it with `.add_template` \
        or set a directory with `.with_directory`"
    ))
}

/// Return an [`Error`] describing a sub-template that was never declared.
pub fn error_unknown_sub_template(name: &str) -> Error {
    Error::build(format!("unknown sub-template: {name}")).with_help(format!(
        "declare it with `<% {name} %>` in the owning template"
    ))
}

/// Return an [`Error`] describing an encoder that was never registered.
pub fn error_unknown_encoder(name: &str) -> Error {
    Error::build(format!("unknown encoder: {name}")).with_help(format!(
        "register the encoder on the engine with `.add_encoder(\"{name}\", ..)`"
    ))
}

/// Return a string describing an unexpected part of a tag.
pub fn unexpected<T>(received: T) -> String
where
    T: Display,
{
    format!("unexpected `{received}`")
}
