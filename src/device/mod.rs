//! Host-side collaborators of the interpreter.
//!
//! The interpreter never allocates global memory itself. Buffers are
//! produced by an [`Allocator`] and handed to a launch; the only memory the
//! interpreter owns is the per-iteration local (shared) storage.

pub mod host_memory;

pub use host_memory::{Allocator, Buffer, CopyError, HostAllocator};
