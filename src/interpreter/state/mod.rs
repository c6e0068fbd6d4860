//! Interpreter state for one global-index iteration.
//!
//! | Table | Indexed by | Holds |
//! |-------|------------|-------|
//! | [`ValueTable`] | instruction position | per-lane values |
//! | [`TypeTable`] | instruction position | resolved dtype |
//! | loop ends | loop position | loop-end position |
//!
//! All of it is reset at the start of every iteration.

mod context;
mod tables;

pub use context::IterationContext;
pub use tables::{TypeTable, ValueTable};
