//! Test harness for running kernel manifests through the interpreter.
//!
//! This module provides infrastructure for:
//! - Describing a decoded program and its launch data in TOML
//! - Generating input buffers from patterns
//! - Validating output buffers against expected values
//!
//! # Usage
//!
//! ```bash
//! cargo run -- run manifests/vector_add.toml --time
//! cargo run -- suite manifests/
//! ```

pub mod manifest;
pub mod manifest_runner;

pub use manifest::{BufferDef, KernelInfo, KernelManifest, Pattern, UopDef};
pub use manifest_runner::{ManifestResult, ManifestRunner, MismatchInfo};
