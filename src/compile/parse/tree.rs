use crate::compile::parse::program::Program;
use serde_json::Value;

/// A single step of a compiled [`Program`].
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Write literal text.
    Literal(String),
    /// Write the value of an expression, or the default when the value is empty.
    Output {
        expr: Expr,
        default: Option<Expr>,
        origin: usize,
    },
    /// Write the value of an expression through a [`Pipeline`].
    Filtered {
        expr: Expr,
        pipeline: Pipeline,
        origin: usize,
    },
    /// Assign the value of an expression to a local reference.
    Set {
        name: String,
        expr: Expr,
        origin: usize,
    },
    /// A conditional with any number of branches.
    If(If),
    /// A loop over the items of a list.
    ForEach(ForEach),
    /// A plain grouping of instructions.
    Begin(Program),
    /// Render a declared sub-template and bind the result to a local reference.
    Bind {
        name: String,
        trim: bool,
        origin: usize,
    },
}

/// An `if`, with its `elseif` branches and optional `else`.
#[derive(Debug, Clone, PartialEq)]
pub struct If {
    /// Conditions and bodies, tested in order.
    pub branches: Vec<(Expr, Program)>,
    /// Body rendered when no condition is truthy.
    pub otherwise: Option<Program>,
    pub origin: usize,
}

/// A `foreach` loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ForEach {
    /// Name of the loop variable, including its `$`.
    pub variable: String,
    /// Identifies the loop for `$var#suffix` references inside the body.
    pub slot: usize,
    /// Expression producing the items.
    pub list: Expr,
    pub body: Program,
    /// Written between non-empty iterations.
    pub separator: Option<Expr>,
    pub origin: usize,
}

/// Post-processing applied to a value before it is written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    /// Filters applied in order.
    pub filters: Vec<FilterCall>,
    /// Written before a non-empty value.
    pub prefix: Option<Expr>,
    /// Written after a non-empty value.
    pub suffix: Option<Expr>,
    /// Written instead of an empty value.
    pub default: Option<Expr>,
}

impl Pipeline {
    /// Return true if the value must be post-processed, rather than written directly.
    pub fn is_active(&self) -> bool {
        !self.filters.is_empty() || self.prefix.is_some() || self.suffix.is_some()
    }
}

/// A link of a filter chain.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCall {
    /// Command as written in the tag.
    pub command: String,
    /// Lookup object of the filter.
    pub object: Target,
    /// Member name of the filter.
    pub name: String,
    pub args: Args,
}

/// A macro call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Command as written in the tag.
    pub command: String,
    /// Lookup object of the macro.
    pub object: Target,
    /// Member name of the macro.
    pub name: String,
    pub args: Args,
    /// Trim surrounding whitespace from the result.
    pub trim: bool,
    pub origin: usize,
}

/// The lookup object of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// The global scope of the engine, used by undotted commands.
    Global,
    /// A dotted path, such as `this` or `site.nav` in `site.nav.link`.
    Path(Vec<String>),
}

/// Arguments of a macro or filter, still to be evaluated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub named: Vec<(String, Expr)>,
    pub positional: Vec<Expr>,
}

/// An expression, evaluated to a [`Value`] at render time.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value.
    Literal(Value),
    /// An array of expressions.
    Array(Vec<Expr>),
    /// A value reached from a root through a sequence of keys.
    Path { root: Root, keys: Vec<Key> },
    /// A value derived from an active loop.
    Loop { slot: usize, field: LoopField },
    /// Negated truthiness.
    Not(Box<Expr>),
    /// The result of a macro call.
    Invoke(Box<Invocation>),
    /// The text written by a program.
    Capture(Program),
    /// The expression when the condition is truthy, otherwise null.
    Guard { cond: Box<Expr>, expr: Box<Expr> },
    /// The expression passed through the named encoder.
    Encode(String, Box<Expr>),
    /// The text of the named sub-template of the current template.
    SubTemplate(String),
}

impl Expr {
    /// Return the literal value if the expression is statically known.
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Expr::Literal(value) => Some(value),
            _ => None,
        }
    }
}

/// The starting point of a path.
#[derive(Debug, Clone, PartialEq)]
pub enum Root {
    /// A local reference, including its `$`.
    Local(String),
    /// `this`, the receiver.
    Receiver,
    /// `param`, the parameter bag.
    Params,
    /// `global`, the global scope.
    Global,
    /// A bare name, read from the receiver and then the global scope.
    Name(String),
}

/// A step of a path.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Name(String),
    Index(usize),
}

/// Values derived from the position of a loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopField {
    Index,
    Length,
    First,
    Last,
    Even,
    Odd,
}

impl LoopField {
    /// Return the field for the given `#suffix`, if it is recognized.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "index" => Some(LoopField::Index),
            "length" => Some(LoopField::Length),
            "first" => Some(LoopField::First),
            "last" => Some(LoopField::Last),
            "even" => Some(LoopField::Even),
            "odd" => Some(LoopField::Odd),
            _ => None,
        }
    }
}
