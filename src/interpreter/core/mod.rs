//! Program interpreter.
//!
//! The `CoreInterpreter` runs one global-index iteration of a program over
//! every lane of the warp at once. It owns no state; the iteration's tables
//! and memory live in an [`IterationContext`](crate::interpreter::state::IterationContext).
//!
//! # Execution Model
//!
//! 1. Fetch the uop at the instruction pointer
//! 2. Gather operand lanes, skipping void operands
//! 3. Dispatch on the uop kind
//! 4. Handle the result (advance, branch, or halt past the last uop)
//!
//! # Example
//!
//! ```ignore
//! use uop_emu::interpreter::{CoreInterpreter, IterationContext, MemoryPool, Warp};
//!
//! let warp = Warp::new([4, 1, 1]);
//! let mut ctx = IterationContext::new(program.len(), [0, 0, 0], &warp, MemoryPool::new(&mut bufs), &[]);
//! CoreInterpreter::new(&program).run(&mut ctx)?;
//! ```

mod interpreter;

pub use interpreter::{CoreInterpreter, StepResult};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Buffer;
    use crate::dtype::{DType, ScalarType};
    use crate::interpreter::execute::MemoryPool;
    use crate::interpreter::lanes::Warp;
    use crate::interpreter::program::{Literal, ProgramBuilder};
    use crate::interpreter::state::IterationContext;

    #[test]
    fn test_core_interpreter_basic() {
        let mut b = ProgramBuilder::new();
        b.constant(DType::Scalar(ScalarType::Int32), Literal::Int(3));
        let program = b.build();

        let warp = Warp::new([1, 1, 1]);
        let mut bufs: Vec<Buffer> = Vec::new();
        let mut ctx = IterationContext::new(program.len(), [0, 0, 0], &warp, MemoryPool::new(&mut bufs), &[]);
        let interpreter = CoreInterpreter::new(&program);

        let result = interpreter.step(&mut ctx);
        assert_eq!(result, Ok(StepResult::Continue));
        ctx.advance_pc();
        assert_eq!(interpreter.step(&mut ctx), Ok(StepResult::Halt));
        assert_eq!(ctx.instructions, 1);
    }
}
