//! Micro-operation interpreter.
//!
//! Executes a decoded, typed program of micro-operations over a simulated
//! warp, one global-index iteration at a time, with every lane advancing in
//! lock-step.
//!
//! # Architecture
//!
//! - [`value`]: tagged scalar values and strict conversion
//! - [`lanes`]: per-lane arrays and warp coordinates
//! - [`program`]: instruction arena, builder and structural validation
//! - [`state`]: per-iteration value, type and loop-end tables
//! - [`execute`]: execution units (type promotion, ALU, memory, tensor core)
//! - [`core`]: fetch/execute loop for one iteration
//! - [`engine`]: launch entry point over the global grid
//! - [`error`]: error taxonomy
//!
//! # Example
//!
//! ```ignore
//! use uop_emu::interpreter::{InterpreterEngine, LaunchParams, ProgramBuilder};
//!
//! let program = builder.build();
//! let mut engine = InterpreterEngine::new(&program)?;
//! engine.launch(&mut bufs, &LaunchParams::new([16, 1, 1], [32, 1, 1]))?;
//! ```

pub mod core;
pub mod engine;
pub mod error;
pub mod execute;
pub mod lanes;
pub mod program;
pub mod state;
pub mod value;

pub use error::{Access, EmuError, EmuResult};
pub use value::{ConvertError, Payload, Value};

pub use lanes::{grid_points, LaneArray, LaneValues, Warp, INLINE_LANES};

pub use program::{AluOp, Arg, Literal, Program, ProgramBuilder, Uop, UopKind};

pub use state::{IterationContext, TypeTable, ValueTable};

pub use execute::{Alu, BufferId, BufferView, Gate, MemoryPool, MemoryUnit, TensorCore};

pub use core::{CoreInterpreter, StepResult};

pub use engine::{EngineStatus, InterpreterEngine, LaunchParams};
