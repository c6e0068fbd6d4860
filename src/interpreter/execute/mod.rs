//! Execution units for uop instructions.
//!
//! Each unit handles one category of operations:
//!
//! | Unit | Operations |
//! |------|------------|
//! | [`Alu`] | Arithmetic, logic, comparison, select |
//! | [`MemoryUnit`] | Linear, gated, vector and image load/store |
//! | [`TensorCore`] | Warp-level matrix multiply-accumulate |
//!
//! Type promotion for the ALU lives in [`promote`].

pub mod alu;
pub mod memory;
pub mod promote;
pub mod wmma;

pub use alu::Alu;
pub use memory::{BufferId, BufferView, Gate, MemoryPool, MemoryUnit};
pub use promote::{highest_order, promote, Promoted};
pub use wmma::{MetalLayout, RdnaLayout, TensorCore, WmmaLayout};
