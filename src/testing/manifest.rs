//! Kernel manifests: decoded programs with launch data, in TOML.
//!
//! A manifest describes one kernel launch end to end:
//! - The program, one `[[uops]]` table per instruction
//! - Buffers in binding order, each with an input pattern
//! - Launch dimensions and scalar `vals`
//! - Expected output values per buffer
//!
//! # Example Manifest
//!
//! ```toml
//! [kernel]
//! name = "add_one"
//! global_size = [1, 1, 1]
//! local_size = [4, 1, 1]
//!
//! [[buffers]]
//! name = "out"
//! dtype = "int32"
//! size = 4
//! expect = [1, 2, 3, 4]
//!
//! [[buffers]]
//! name = "in"
//! dtype = "int32"
//! size = 4
//! pattern = { type = "sequential", start = 0 }
//!
//! [[uops]]
//! kind = "define_global"
//! dtype = "int32"
//! name = "out"
//!
//! [[uops]]
//! kind = "define_global"
//! dtype = "int32"
//! name = "in"
//!
//! [[uops]]
//! kind = "special"
//! dtype = "int32"
//! dim = 0
//! name = "lidx0"
//!
//! [[uops]]
//! kind = "load"
//! dtype = "int32"
//! src = [1, 2]
//!
//! [[uops]]
//! kind = "const"
//! dtype = "int32"
//! value = 1
//!
//! [[uops]]
//! kind = "alu"
//! dtype = "int32"
//! op = "add"
//! src = [3, 4]
//!
//! [[uops]]
//! kind = "store"
//! src = [0, 2, 5]
//! ```

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::device::Buffer;
use crate::dtype::{DType, ScalarType};
use crate::interpreter::{AluOp, Arg, LaunchParams, Literal, Program, Uop, UopKind, Value};

/// Kernel manifest defining a single launch.
#[derive(Debug, Clone, Deserialize)]
pub struct KernelManifest {
    pub kernel: KernelInfo,
    #[serde(default)]
    pub buffers: Vec<BufferDef>,
    pub uops: Vec<UopDef>,
}

/// Kernel metadata and launch parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct KernelInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "unit_size")]
    pub global_size: [usize; 3],
    #[serde(default = "unit_size")]
    pub local_size: [usize; 3],
    #[serde(default)]
    pub vals: Vec<Literal>,
}

fn unit_size() -> [usize; 3] {
    [1, 1, 1]
}

/// Buffer definition, bound in listed order.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferDef {
    pub name: String,
    /// Element format, e.g. `"float32"`.
    pub dtype: String,
    pub size: usize,
    #[serde(default)]
    pub pattern: Pattern,
    /// Expected contents after the launch.
    #[serde(default)]
    pub expect: Option<Vec<Literal>>,
}

/// Pattern for generating input data.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Pattern {
    #[default]
    Zeros,
    Sequential {
        #[serde(default)]
        start: f64,
        #[serde(default = "default_step")]
        step: f64,
    },
    Constant {
        value: Literal,
    },
    Values {
        values: Vec<Literal>,
    },
}

fn default_step() -> f64 {
    1.0
}

/// One instruction. Which of the optional fields apply depends on `kind`.
#[derive(Debug, Clone, Deserialize)]
pub struct UopDef {
    pub kind: String,
    #[serde(default)]
    pub dtype: Option<String>,
    #[serde(default)]
    pub src: Vec<usize>,
    /// `define_global`, `define_local`, `define_var` and `special`.
    #[serde(default)]
    pub name: Option<String>,
    /// `define_local` element count.
    #[serde(default)]
    pub size: Option<usize>,
    /// `special` dimension.
    #[serde(default)]
    pub dim: Option<usize>,
    /// `const` and `define_acc`.
    #[serde(default)]
    pub value: Option<Literal>,
    /// `alu` operation.
    #[serde(default)]
    pub op: Option<String>,
    /// `gep` element index.
    #[serde(default)]
    pub index: Option<usize>,
    /// `wmma` variant tag.
    #[serde(default)]
    pub tag: Option<String>,
}

impl UopDef {
    /// Decode into an instruction.
    pub fn to_uop(&self) -> Result<Uop> {
        let kind: UopKind = self.kind.parse().map_err(|e: String| anyhow!(e))?;
        let dtype = self
            .dtype
            .as_deref()
            .map(str::parse::<DType>)
            .transpose()?;

        let name = || {
            self.name
                .clone()
                .ok_or_else(|| anyhow!("{} needs a name", kind.name()))
        };
        let arg = match kind {
            UopKind::DefineGlobal | UopKind::DefineVar => Arg::Name(name()?),
            UopKind::DefineLocal => Arg::Local {
                name: name()?,
                size: self.size.context("define_local needs a size")?,
            },
            UopKind::Special => Arg::Special {
                dim: self.dim.context("special needs a dim")?,
                name: name()?,
            },
            UopKind::Const | UopKind::DefineAcc => {
                Arg::Literal(self.value.with_context(|| format!("{} needs a value", kind.name()))?)
            }
            UopKind::Alu => {
                let op = self.op.as_deref().context("alu needs an op")?;
                Arg::Alu(op.parse::<AluOp>().map_err(|e| anyhow!(e))?)
            }
            UopKind::Gep => Arg::Index(self.index.context("gep needs an index")?),
            UopKind::Wmma => Arg::Tag(self.tag.clone().context("wmma needs a tag")?),
            _ => Arg::None,
        };

        Ok(Uop::new(kind, dtype, &self.src, arg))
    }
}

impl BufferDef {
    pub fn fmt(&self) -> Result<ScalarType> {
        self.dtype
            .parse()
            .with_context(|| format!("buffer '{}'", self.name))
    }

    /// Generate the initial contents from the pattern.
    pub fn generate_input(&self) -> Result<Buffer> {
        let fmt = self.fmt()?;
        let values: Vec<Value> = match &self.pattern {
            Pattern::Zeros => return Ok(Buffer::new(fmt, self.size)),
            Pattern::Sequential { start, step } => (0..self.size)
                .map(|i| Value::from_f64(start + i as f64 * step, fmt))
                .collect::<Result<_, _>>()?,
            Pattern::Constant { value } => vec![value.to_value(fmt)?; self.size],
            Pattern::Values { values } => {
                if values.len() != self.size {
                    bail!(
                        "buffer '{}' lists {} values for size {}",
                        self.name,
                        values.len(),
                        self.size
                    );
                }
                values
                    .iter()
                    .map(|v| v.to_value(fmt))
                    .collect::<Result<_, _>>()?
            }
        };
        Ok(Buffer::from_values(fmt, &values)?)
    }
}

impl KernelManifest {
    /// Load a manifest from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse manifest {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Decode the program.
    pub fn program(&self) -> Result<Program> {
        let uops = self
            .uops
            .iter()
            .enumerate()
            .map(|(pc, def)| def.to_uop().with_context(|| format!("uop {}", pc)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Program::new(uops))
    }

    pub fn launch_params(&self) -> LaunchParams {
        LaunchParams::new(self.kernel.global_size, self.kernel.local_size)
            .with_vals(self.kernel.vals.iter().map(|v| v.value()).collect())
    }
}
