//! Decoded kernel programs.
//!
//! A [`Program`] is an arena of [`Uop`] records. An instruction's position
//! in the arena is its identity: operands are positions of earlier
//! instructions, and the interpreter keeps every per-instruction value in
//! side tables indexed by that position.
//!
//! The one non-forward edge is control flow, not data: a loop-end names its
//! loop as operand and the interpreter jumps back to it.
//!
//! # Example
//!
//! ```
//! use uop_emu::dtype::{DType, ScalarType};
//! use uop_emu::interpreter::program::{AluOp, Literal, ProgramBuilder};
//!
//! let int = DType::Scalar(ScalarType::Int32);
//! let mut b = ProgramBuilder::new();
//! let out = b.global(int, "out");
//! let three = b.constant(int, Literal::Int(3));
//! let four = b.constant(int, Literal::Int(4));
//! let sum = b.alu(AluOp::Add, int, &[three, four]);
//! let zero = b.constant(int, Literal::Int(0));
//! b.store(&[out, zero, sum]);
//! let program = b.build();
//! assert_eq!(program.len(), 6);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use smallvec::SmallVec;

use crate::dtype::{DType, ScalarType};
use crate::interpreter::error::{EmuError, EmuResult};
use crate::interpreter::value::{ConvertError, Value};

/// Instruction kind (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UopKind {
    /// Bind the next externally supplied buffer.
    DefineGlobal,
    /// Allocate a zeroed buffer for the current iteration.
    DefineLocal,
    /// Bind the next launch-time scalar parameter.
    DefineVar,
    /// Initialize an accumulator register.
    DefineAcc,
    /// Global or local coordinate.
    Special,
    Const,
    Loop,
    EndLoop,
    Barrier,
    If,
    EndIf,
    Load,
    Store,
    Cast,
    /// Extract one sub-element of a vector.
    Gep,
    /// Merge a loop-carried value into its accumulator.
    Phi,
    Alu,
    /// Warp-level matrix multiply-accumulate.
    Wmma,
}

impl UopKind {
    /// Void instructions produce no value and cannot be read by others.
    pub fn is_void(self) -> bool {
        matches!(
            self,
            UopKind::Store | UopKind::EndLoop | UopKind::Barrier | UopKind::If | UopKind::EndIf
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            UopKind::DefineGlobal => "define_global",
            UopKind::DefineLocal => "define_local",
            UopKind::DefineVar => "define_var",
            UopKind::DefineAcc => "define_acc",
            UopKind::Special => "special",
            UopKind::Const => "const",
            UopKind::Loop => "loop",
            UopKind::EndLoop => "endloop",
            UopKind::Barrier => "barrier",
            UopKind::If => "if",
            UopKind::EndIf => "endif",
            UopKind::Load => "load",
            UopKind::Store => "store",
            UopKind::Cast => "cast",
            UopKind::Gep => "gep",
            UopKind::Phi => "phi",
            UopKind::Alu => "alu",
            UopKind::Wmma => "wmma",
        }
    }

    const ALL: [UopKind; 18] = [
        UopKind::DefineGlobal,
        UopKind::DefineLocal,
        UopKind::DefineVar,
        UopKind::DefineAcc,
        UopKind::Special,
        UopKind::Const,
        UopKind::Loop,
        UopKind::EndLoop,
        UopKind::Barrier,
        UopKind::If,
        UopKind::EndIf,
        UopKind::Load,
        UopKind::Store,
        UopKind::Cast,
        UopKind::Gep,
        UopKind::Phi,
        UopKind::Alu,
        UopKind::Wmma,
    ];
}

impl FromStr for UopKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        UopKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown uop kind '{}'", s))
    }
}

/// ALU operation code.
///
/// `Noop`, `Cast` and `Recip` are part of the operation catalog but have no
/// evaluator handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    MulAcc,
    Where,
    Log2,
    Exp2,
    Sqrt,
    Sin,
    Neg,
    Mul,
    Add,
    Sub,
    Xor,
    Max,
    CmpEq,
    CmpLt,
    Div,
    Mod,
    Noop,
    Cast,
    Recip,
}

impl AluOp {
    const ALL: [AluOp; 19] = [
        AluOp::MulAcc,
        AluOp::Where,
        AluOp::Log2,
        AluOp::Exp2,
        AluOp::Sqrt,
        AluOp::Sin,
        AluOp::Neg,
        AluOp::Mul,
        AluOp::Add,
        AluOp::Sub,
        AluOp::Xor,
        AluOp::Max,
        AluOp::CmpEq,
        AluOp::CmpLt,
        AluOp::Div,
        AluOp::Mod,
        AluOp::Noop,
        AluOp::Cast,
        AluOp::Recip,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AluOp::MulAcc => "mulacc",
            AluOp::Where => "where",
            AluOp::Log2 => "log2",
            AluOp::Exp2 => "exp2",
            AluOp::Sqrt => "sqrt",
            AluOp::Sin => "sin",
            AluOp::Neg => "neg",
            AluOp::Mul => "mul",
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::Xor => "xor",
            AluOp::Max => "max",
            AluOp::CmpEq => "cmpeq",
            AluOp::CmpLt => "cmplt",
            AluOp::Div => "div",
            AluOp::Mod => "mod",
            AluOp::Noop => "noop",
            AluOp::Cast => "cast",
            AluOp::Recip => "recip",
        }
    }

    /// Operations whose result dtype may differ from their operand dtypes.
    pub fn mixes_dtypes(self) -> bool {
        matches!(self, AluOp::CmpEq | AluOp::CmpLt | AluOp::Where)
    }
}

impl fmt::Display for AluOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AluOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        AluOp::ALL
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| format!("unknown alu op '{}'", s))
    }
}

/// Untyped literal carried by constants and accumulators.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Literal {
    /// Materialize the literal in the given type.
    pub fn to_value(self, dtype: ScalarType) -> Result<Value, ConvertError> {
        match self {
            Literal::Bool(b) => Value::bool(b).convert(dtype),
            Literal::Int(v) => Value::from_i128(v as i128, dtype),
            Literal::Float(v) => Value::from_f64(v, dtype),
        }
    }

    /// The literal in its natural type: bool, int64 or float64.
    pub fn value(self) -> Value {
        match self {
            Literal::Bool(b) => Value::bool(b),
            Literal::Int(v) => Value::i64(v),
            Literal::Float(v) => Value::f64(v),
        }
    }
}

/// Kind-specific instruction payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    None,
    /// `Const` / `DefineAcc` value.
    Literal(Literal),
    /// `DefineGlobal` / `DefineVar` name.
    Name(String),
    /// `DefineLocal` name and element count.
    Local { name: String, size: usize },
    /// `Special` dimension selector; the name prefix picks global (`g`)
    /// or local (`l`) coordinates.
    Special { dim: usize, name: String },
    Alu(AluOp),
    /// `Gep` sub-element index.
    Index(usize),
    /// `Wmma` hardware-variant tag.
    Tag(String),
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Uop {
    pub kind: UopKind,
    pub dtype: Option<DType>,
    pub src: SmallVec<[usize; 4]>,
    pub arg: Arg,
}

impl Uop {
    pub fn new(kind: UopKind, dtype: Option<DType>, src: &[usize], arg: Arg) -> Self {
        Self {
            kind,
            dtype,
            src: SmallVec::from_slice(src),
            arg,
        }
    }
}

/// Ordered instruction arena.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    uops: Vec<Uop>,
}

impl Program {
    pub fn new(uops: Vec<Uop>) -> Self {
        Self { uops }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.uops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.uops.is_empty()
    }

    #[inline]
    pub fn get(&self, pc: usize) -> Option<&Uop> {
        self.uops.get(pc)
    }

    pub fn uops(&self) -> &[Uop] {
        &self.uops
    }

    /// Operands of `pc` that produce values, in order.
    pub fn value_operands(&self, pc: usize) -> impl Iterator<Item = usize> + '_ {
        self.uops[pc]
            .src
            .iter()
            .copied()
            .filter(move |&s| self.uops.get(s).map_or(true, |u| !u.kind.is_void()))
    }

    /// Structural checks run before launch.
    ///
    /// Verifies that operands point backwards, that loop-ends name a loop,
    /// that value-producing instructions declare a dtype, and that operand
    /// counts match each kind.
    pub fn validate(&self) -> EmuResult<()> {
        for (pc, uop) in self.uops.iter().enumerate() {
            if let Some(&bad) = uop.src.iter().find(|&&s| s >= pc) {
                return Err(EmuError::malformed(
                    pc,
                    format!("operand {} does not precede its user", bad),
                ));
            }

            if !uop.kind.is_void() && uop.dtype.is_none() {
                return Err(EmuError::malformed(
                    pc,
                    format!("{} is missing a dtype", uop.kind.name()),
                ));
            }

            let arity = self.value_operands(pc).count();
            let ok = match uop.kind {
                UopKind::DefineGlobal
                | UopKind::DefineLocal
                | UopKind::DefineVar
                | UopKind::DefineAcc
                | UopKind::Special
                | UopKind::Const
                | UopKind::Barrier
                | UopKind::EndIf => true,
                UopKind::Loop | UopKind::Phi => arity == 2,
                UopKind::EndLoop => uop.src.len() == 1,
                UopKind::If | UopKind::Gep => arity >= 1,
                UopKind::Load => arity == 2 || arity == 4,
                UopKind::Store => arity == 3,
                UopKind::Cast | UopKind::Alu => arity >= 1,
                UopKind::Wmma => arity == 3,
            };
            if !ok {
                return Err(EmuError::malformed(
                    pc,
                    format!("{} has {} value operands", uop.kind.name(), arity),
                ));
            }

            if uop.kind == UopKind::EndLoop {
                let target = uop.src[0];
                if self.uops[target].kind != UopKind::Loop {
                    return Err(EmuError::malformed(
                        pc,
                        format!("endloop targets uop {} which is not a loop", target),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Incremental program construction.
///
/// Each method appends one instruction and returns its position.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    uops: Vec<Uop>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: UopKind, dtype: Option<DType>, src: &[usize], arg: Arg) -> usize {
        self.uops.push(Uop::new(kind, dtype, src, arg));
        self.uops.len() - 1
    }

    pub fn global(&mut self, dtype: DType, name: &str) -> usize {
        self.push(UopKind::DefineGlobal, Some(dtype), &[], Arg::Name(name.into()))
    }

    pub fn local(&mut self, dtype: DType, name: &str, size: usize) -> usize {
        let arg = Arg::Local {
            name: name.into(),
            size,
        };
        self.push(UopKind::DefineLocal, Some(dtype), &[], arg)
    }

    pub fn var(&mut self, dtype: DType, name: &str) -> usize {
        self.push(UopKind::DefineVar, Some(dtype), &[], Arg::Name(name.into()))
    }

    pub fn special(&mut self, dim: usize, name: &str) -> usize {
        let arg = Arg::Special {
            dim,
            name: name.into(),
        };
        self.push(
            UopKind::Special,
            Some(DType::Scalar(ScalarType::Int32)),
            &[],
            arg,
        )
    }

    pub fn constant(&mut self, dtype: DType, value: Literal) -> usize {
        self.push(UopKind::Const, Some(dtype), &[], Arg::Literal(value))
    }

    pub fn acc(&mut self, dtype: DType, value: Literal) -> usize {
        self.push(UopKind::DefineAcc, Some(dtype), &[], Arg::Literal(value))
    }

    pub fn range(&mut self, start: usize, end: usize) -> usize {
        self.push(
            UopKind::Loop,
            Some(DType::Scalar(ScalarType::Int32)),
            &[start, end],
            Arg::None,
        )
    }

    pub fn end_range(&mut self, range: usize) -> usize {
        self.push(UopKind::EndLoop, None, &[range], Arg::None)
    }

    pub fn barrier(&mut self) -> usize {
        self.push(UopKind::Barrier, None, &[], Arg::None)
    }

    pub fn if_(&mut self, cond: usize) -> usize {
        self.push(UopKind::If, None, &[cond], Arg::None)
    }

    pub fn end_if(&mut self, if_: usize) -> usize {
        self.push(UopKind::EndIf, None, &[if_], Arg::None)
    }

    pub fn load(&mut self, dtype: DType, src: &[usize]) -> usize {
        self.push(UopKind::Load, Some(dtype), src, Arg::None)
    }

    pub fn store(&mut self, src: &[usize]) -> usize {
        self.push(UopKind::Store, None, src, Arg::None)
    }

    pub fn cast(&mut self, dtype: DType, src: &[usize]) -> usize {
        self.push(UopKind::Cast, Some(dtype), src, Arg::None)
    }

    pub fn gep(&mut self, dtype: DType, src: usize, index: usize) -> usize {
        self.push(UopKind::Gep, Some(dtype), &[src], Arg::Index(index))
    }

    pub fn phi(&mut self, dtype: DType, acc: usize, value: usize) -> usize {
        self.push(UopKind::Phi, Some(dtype), &[acc, value], Arg::None)
    }

    pub fn alu(&mut self, op: AluOp, dtype: DType, src: &[usize]) -> usize {
        self.push(UopKind::Alu, Some(dtype), src, Arg::Alu(op))
    }

    pub fn wmma(&mut self, dtype: DType, tag: &str, a: usize, b: usize, c: usize) -> usize {
        self.push(UopKind::Wmma, Some(dtype), &[a, b, c], Arg::Tag(tag.into()))
    }

    pub fn build(self) -> Program {
        Program::new(self.uops)
    }
}
