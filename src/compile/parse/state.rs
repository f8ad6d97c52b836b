use crate::compile::{
    parse::program::Program,
    tree::{Expr, Instruction, Pipeline},
};

/// Describes an open control construct of a `Parser`.
#[derive(Debug)]
pub enum State {
    /// The `Parser` is evaluating an `if` construct.
    If {
        /// Branches that are complete.
        branches: Vec<(Expr, Program)>,
        /// Condition of the branch being read, or None once `else` is reached.
        pending: Option<Expr>,
        origin: usize,
        post: Post,
    },
    /// The `Parser` is evaluating a `foreach` construct.
    ForEach {
        variable: String,
        slot: usize,
        list: Expr,
        separator: Option<Expr>,
        origin: usize,
        post: Post,
    },
    /// The `Parser` is evaluating a `begin` construct.
    Begin { origin: usize, post: Post },
}

impl State {
    /// Return the index of the tag that opened the construct.
    pub fn origin(&self) -> usize {
        match self {
            State::If { origin, .. }
            | State::ForEach { origin, .. }
            | State::Begin { origin, .. } => *origin,
        }
    }

    /// Return the command that opened the construct.
    pub fn command(&self) -> &'static str {
        match self {
            State::If { .. } => "if",
            State::ForEach { .. } => "foreach",
            State::Begin { .. } => "begin",
        }
    }
}

/// Output processing set on the opening tag of a construct, applied to everything the
/// construct writes.
#[derive(Debug, Default)]
pub struct Post {
    pub pipeline: Pipeline,
    pub encoding: Option<String>,
}

impl Post {
    /// Wrap the finished construct so its output passes through the processing.
    pub fn apply(self, instruction: Instruction, origin: usize) -> Instruction {
        if !self.pipeline.is_active() && self.pipeline.default.is_none() && self.encoding.is_none()
        {
            return instruction;
        }

        let mut expr = Expr::Capture(Program::from(vec![instruction]));
        if let Some(encoding) = self.encoding {
            expr = Expr::Encode(encoding, Box::new(expr));
        }

        match self.pipeline.is_active() {
            true => Instruction::Filtered {
                expr,
                pipeline: self.pipeline,
                origin,
            },
            false => Instruction::Output {
                expr,
                default: self.pipeline.default,
                origin,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Post;
    use crate::compile::{
        parse::program::Program,
        tree::{Expr, Instruction, Pipeline},
    };
    use serde_json::json;

    #[test]
    fn test_apply_inactive() {
        let instruction = Instruction::Begin(Program::new());

        assert_eq!(Post::default().apply(instruction.clone(), 0), instruction);
    }

    #[test]
    fn test_apply_default() {
        let post = Post {
            pipeline: Pipeline {
                default: Some(Expr::Literal(json!("none"))),
                ..Default::default()
            },
            encoding: Some("html".into()),
        };
        let result = post.apply(Instruction::Begin(Program::new()), 4);

        assert_eq!(
            result,
            Instruction::Output {
                expr: Expr::Encode(
                    "html".into(),
                    Box::new(Expr::Capture(Program::from(vec![Instruction::Begin(
                        Program::new()
                    )])))
                ),
                default: Some(Expr::Literal(json!("none"))),
                origin: 4,
            }
        );
    }
}
