//! Stencil - Template Engine
//!
//! Compiles text templates marked up with `<% %>` tags into programs, and renders them
//! against a receiver object and a bag of parameters.
//!
//! ```
//! use stencil::{compile, object::serde::json, render, Store};
//!
//! let template = compile("<% foreach $n in names separator=\", \" %><%= $n %><% end %>").unwrap();
//! let receiver = json!({ "names": ["a", "b"] });
//!
//! assert_eq!(render(&template, &receiver, &Store::new()).unwrap(), "a, b");
//! ```
mod compile;
mod engine;
mod log;
pub mod object;
mod region;
mod render;

pub use compile::{compile, compile_named, Parser, TagRecord, Template};
pub use engine::{Engine, Resolved};
pub use log::{Error, Pointer, Visual};
pub use object::{Arguments, Encoder, Filter, Macro, Object, Scope};
pub use region::Region;
pub use render::{
    render,
    store::{Params, Store},
    writer::Writer,
};
