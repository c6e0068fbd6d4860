//! uop-emu library
//!
//! Reference interpreter for tensor-kernel micro-operation programs.

pub mod config;
pub mod device;
pub mod dtype;
pub mod interpreter;
pub mod testing;
