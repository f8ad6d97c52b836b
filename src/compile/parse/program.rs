use crate::compile::tree::Instruction;

/// An ordered sequence of [`Instruction`] instances, the body of one template or of one
/// branch of a control construct.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub data: Vec<Instruction>,
}

impl Program {
    /// Create a new Program.
    #[inline]
    pub fn new() -> Self {
        Self { data: vec![] }
    }

    /// Append the [`Instruction`] to the end of the Program.
    #[inline]
    pub fn push(&mut self, instruction: Instruction) {
        self.data.push(instruction);
    }

    /// Return true if the Program has no instructions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<Instruction>> for Program {
    fn from(data: Vec<Instruction>) -> Self {
        Self { data }
    }
}
