//! Execution entry point.
//!
//! The `InterpreterEngine` launches a program over a global grid. Each grid
//! point runs the whole program for one warp, in order, with fresh tables
//! and local buffers.
//!
//! # Execution Model
//!
//! Grid points run sequentially with `z` outermost. Lanes within a warp run
//! in lock-step, so barriers are trivially satisfied and launches are
//! deterministic.
//!
//! # Example
//!
//! ```ignore
//! use uop_emu::interpreter::{InterpreterEngine, LaunchParams};
//!
//! let mut engine = InterpreterEngine::new(&program)?;
//! let elapsed = engine.launch(&mut bufs, &LaunchParams::new([4, 1, 1], [32, 1, 1]).with_wait(true))?;
//! ```

mod coordinator;

pub use coordinator::{EngineStatus, InterpreterEngine, LaunchParams};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Buffer;
    use crate::dtype::{DType, ScalarType};
    use crate::interpreter::error::EmuError;
    use crate::interpreter::program::{AluOp, Literal, ProgramBuilder};
    use crate::interpreter::value::Value;

    fn int() -> DType {
        DType::Scalar(ScalarType::Int32)
    }

    /// out[gidx0 * lanes + lidx0] = a[...] + b[...]
    fn add_program(lanes: i64) -> crate::interpreter::program::Program {
        let mut b = ProgramBuilder::new();
        let out = b.global(int(), "out");
        let x = b.global(int(), "a");
        let y = b.global(int(), "b");
        let gidx = b.special(0, "gidx0");
        let lidx = b.special(0, "lidx0");
        let width = b.constant(int(), Literal::Int(lanes));
        let base = b.alu(AluOp::Mul, int(), &[gidx, width]);
        let idx = b.alu(AluOp::Add, int(), &[base, lidx]);
        let xv = b.load(int(), &[x, idx]);
        let yv = b.load(int(), &[y, idx]);
        let sum = b.alu(AluOp::Add, int(), &[xv, yv]);
        b.store(&[out, idx, sum]);
        b.build()
    }

    fn ints(values: impl IntoIterator<Item = i32>) -> Buffer {
        let values: Vec<Value> = values.into_iter().map(Value::i32).collect();
        Buffer::from_values(ScalarType::Int32, &values).unwrap()
    }

    #[test]
    fn test_engine_creation() {
        let program = add_program(4);
        let engine = InterpreterEngine::new(&program).unwrap();

        assert_eq!(engine.status(), EngineStatus::Ready);
        assert_eq!(engine.iterations(), 0);
        assert_eq!(engine.instructions(), 0);
    }

    #[test]
    fn test_engine_rejects_malformed_program() {
        let mut b = ProgramBuilder::new();
        let x = b.constant(int(), Literal::Int(1));
        b.load(int(), &[x]);
        let program = b.build();

        assert!(matches!(
            InterpreterEngine::new(&program).err(),
            Some(EmuError::MalformedProgram { pc: 1, .. })
        ));
    }

    #[test]
    fn test_launch_covers_grid() {
        let program = add_program(4);
        let mut engine = InterpreterEngine::new(&program).unwrap();
        let mut bufs = vec![ints([0; 12]), ints(0..12), ints((0..12).map(|v| v * 10))];

        let elapsed = engine.launch(&mut bufs, &LaunchParams::new([3, 1, 1], [4, 1, 1])).unwrap();
        assert_eq!(elapsed, None);
        assert_eq!(engine.status(), EngineStatus::Completed);
        assert_eq!(engine.iterations(), 3);
        assert_eq!(engine.instructions(), 3 * program.len() as u64);

        let expected: Vec<Value> = (0..12).map(|v| Value::i32(v * 11)).collect();
        assert_eq!(bufs[0].to_values(), expected);
    }

    #[test]
    fn test_launch_is_deterministic() {
        let program = add_program(2);
        let run = || {
            let mut engine = InterpreterEngine::new(&program).unwrap();
            let mut bufs = vec![ints([0; 8]), ints(0..8), ints((0..8).rev())];
            engine.launch(&mut bufs, &LaunchParams::new([4, 1, 1], [2, 1, 1])).unwrap();
            bufs
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_launch_reports_time_when_waiting() {
        let program = add_program(1);
        let mut engine = InterpreterEngine::new(&program).unwrap();
        let mut bufs = vec![ints([0]), ints([2]), ints([3])];

        let params = LaunchParams::new([1, 1, 1], [1, 1, 1]).with_wait(true);
        assert!(engine.launch(&mut bufs, &params).unwrap().is_some());
        assert_eq!(bufs[0].read(0), Some(Value::i32(5)));
    }

    #[test]
    fn test_launch_error_sets_status() {
        let program = add_program(4);
        let mut engine = InterpreterEngine::new(&program).unwrap();
        // b is too short for the second grid point
        let mut bufs = vec![ints([0; 8]), ints(0..8), ints(0..4)];

        let err = engine.launch(&mut bufs, &LaunchParams::new([2, 1, 1], [4, 1, 1]));
        assert!(matches!(err, Err(EmuError::OutOfBounds { .. })));
        assert_eq!(engine.status(), EngineStatus::Error);
        assert_eq!(engine.iterations(), 2);
    }

    #[test]
    fn test_define_var_uses_launch_vals() {
        let mut b = ProgramBuilder::new();
        let out = b.global(int(), "out");
        let scale = b.var(int(), "scale");
        let lidx = b.special(0, "lidx0");
        let v = b.alu(AluOp::Mul, int(), &[lidx, scale]);
        b.store(&[out, lidx, v]);
        let program = b.build();

        let mut engine = InterpreterEngine::new(&program).unwrap();
        let mut bufs = vec![ints([0; 3])];
        let params = LaunchParams::new([1, 1, 1], [3, 1, 1]).with_vals(vec![Value::i32(7)]);
        engine.launch(&mut bufs, &params).unwrap();
        assert_eq!(bufs[0].to_values(), vec![Value::i32(0), Value::i32(7), Value::i32(14)]);
    }

    #[test]
    fn test_launch_keeps_caller_buffer_format() {
        let float = DType::Scalar(ScalarType::Float32);
        let mut b = ProgramBuilder::new();
        let out = b.global(float, "out");
        let lidx = b.special(0, "lidx0");
        let half = b.constant(float, Literal::Float(0.5));
        b.store(&[out, lidx, half]);
        let program = b.build();

        let mut engine = InterpreterEngine::new(&program).unwrap();
        let mut bufs = vec![Buffer::new(ScalarType::UInt8, 8)];
        engine.launch(&mut bufs, &LaunchParams::new([1, 1, 1], [2, 1, 1])).unwrap();
        engine.launch(&mut bufs, &LaunchParams::new([1, 1, 1], [2, 1, 1])).unwrap();

        assert_eq!(bufs[0].fmt(), ScalarType::UInt8);
        assert_eq!(bufs[0].len(), 8);
        assert_eq!(bufs[0].read_as(ScalarType::Float32, 1), Some(Value::f32(0.5)));
    }
}
