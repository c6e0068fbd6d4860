//! ALU evaluator.
//!
//! Pure per-lane semantics for arithmetic, logic, comparison and select
//! operations. Operands are promoted to a common evaluation type, the
//! operation's handler computes a raw result in a wide domain (`i128` for
//! integers, `f64` for floats), and the raw result is represented back in
//! the evaluation type.
//!
//! # Overflow policy
//!
//! If the raw result does not fit the evaluation type, precision is
//! upgraded once (float -> float64, unsigned -> uint64, signed -> int64)
//! and the representation retried. A second failure is
//! [`EmuError::OverflowAfterUpgrade`].
//!
//! # Operations
//!
//! | Operation | Domain | Notes |
//! |-----------|--------|-------|
//! | mulacc | int, float | `a * b + c` |
//! | where | any | first operand is cast to bool by truthiness |
//! | log2, sqrt | float | non-positive / negative input gives NaN |
//! | exp2, sin | float | |
//! | neg, mul, add, sub, max | int, float | |
//! | xor, mod | signed int | `mod` is floored |
//! | cmpeq, cmplt | int, float | produce bool |
//! | div | int, float | floored for int; int by zero is invalid, float by zero is NaN |

use std::collections::HashMap;
use std::sync::OnceLock;

use smallvec::SmallVec;

use crate::dtype::{DType, ScalarType, TypeClass};
use crate::interpreter::error::{EmuError, EmuResult};
use crate::interpreter::execute::promote::{promote, Promoted};
use crate::interpreter::program::AluOp;
use crate::interpreter::value::{ConvertError, Payload, Value};

/// Operand or result in the evaluation domain.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Bool(bool),
    Int(i128),
    Float(f64),
}

impl Num {
    fn from_value(v: &Value, class: TypeClass) -> Self {
        match (v.payload(), class) {
            (Payload::Float(f), _) => Num::Float(f),
            (Payload::Bool(b), TypeClass::Bool) => Num::Bool(b),
            (_, TypeClass::Float) => Num::Float(v.as_f64()),
            _ => Num::Int(v.as_i128().unwrap_or_default()),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Bool(b) => b as u8 as f64,
            Num::Int(v) => v as f64,
            Num::Float(v) => v,
        }
    }
}

/// Why a handler produced no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// No defined result for these operands.
    Invalid,
    /// Exceeded even the wide evaluation domain.
    Overflow,
}

type Handler = fn(&[Num], ScalarType) -> Result<Num, Fault>;

static HANDLERS: OnceLock<HashMap<AluOp, Handler>> = OnceLock::new();

fn handlers() -> &'static HashMap<AluOp, Handler> {
    HANDLERS.get_or_init(|| {
        let mut table: HashMap<AluOp, Handler> = HashMap::new();
        table.insert(AluOp::MulAcc, mulacc);
        table.insert(AluOp::Where, select);
        table.insert(AluOp::Log2, log2);
        table.insert(AluOp::Exp2, exp2);
        table.insert(AluOp::Sqrt, sqrt);
        table.insert(AluOp::Sin, sin);
        table.insert(AluOp::Neg, neg);
        table.insert(AluOp::Mul, mul);
        table.insert(AluOp::Add, add);
        table.insert(AluOp::Sub, sub);
        table.insert(AluOp::Xor, xor);
        table.insert(AluOp::Max, max);
        table.insert(AluOp::CmpEq, cmpeq);
        table.insert(AluOp::CmpLt, cmplt);
        table.insert(AluOp::Div, div);
        table.insert(AluOp::Mod, modulo);
        table
    })
}

/// ALU execution unit.
pub struct Alu;

impl Alu {
    /// Whether the operation has a handler.
    pub fn is_supported(op: AluOp) -> bool {
        handlers().contains_key(&op)
    }

    /// Evaluate one lane of `op` with declared result type `dtype`.
    pub fn execute(op: AluOp, dtype: ScalarType, operands: &[Value]) -> EmuResult<Value> {
        let Promoted { dtype, operands } = if op == AluOp::Where {
            let (cond, rest) = operands.split_first().ok_or_else(|| {
                EmuError::invalid(op, "where needs a condition operand")
            })?;
            let mut promoted = promote(op, dtype, rest)?;
            promoted.operands.insert(0, Value::bool(cond.truthy()));
            promoted
        } else {
            promote(op, dtype, operands)?
        };

        let handler = handlers()
            .get(&op)
            .ok_or(EmuError::UnsupportedOperation(op))?;

        let class = dtype.class();
        let nums: SmallVec<[Num; 4]> = operands
            .iter()
            .enumerate()
            .map(|(i, v)| {
                if op == AluOp::Where && i == 0 {
                    Num::Bool(v.truthy())
                } else {
                    Num::from_value(v, class)
                }
            })
            .collect();

        match handler(&nums, dtype) {
            Ok(raw) => represent(op, raw, dtype),
            Err(Fault::Invalid) => Err(EmuError::invalid(
                op,
                format!(
                    "[{}] as {}",
                    operands
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                    dtype
                ),
            )),
            Err(Fault::Overflow) => Err(EmuError::OverflowAfterUpgrade {
                op,
                dtype: DType::Scalar(dtype.upgraded()),
                value: "out of evaluation range".to_string(),
            }),
        }
    }
}

/// Represent a raw result in `dtype`, upgrading precision once on overflow.
fn represent(op: AluOp, raw: Num, dtype: ScalarType) -> EmuResult<Value> {
    let attempt = |ty: ScalarType| match raw {
        Num::Bool(b) => Ok(Value::bool(b)),
        Num::Int(v) => Value::from_i128(v, ty),
        Num::Float(v) => Value::from_f64(v, ty),
    };

    match attempt(dtype) {
        Ok(v) => Ok(v),
        Err(ConvertError::Overflow { .. }) => {
            let upgraded = dtype.upgraded();
            log::debug!("{} result overflows {}, retrying as {}", op, dtype, upgraded);
            attempt(upgraded).map_err(|e| match e {
                ConvertError::Overflow { value, .. } => EmuError::OverflowAfterUpgrade {
                    op,
                    dtype: DType::Scalar(upgraded),
                    value,
                },
                ConvertError::Incompatible { .. } => EmuError::TypeConversion(format!(
                    "result of {} cannot be converted: {}",
                    op, e
                )),
            })
        }
        Err(e) => Err(EmuError::TypeConversion(format!(
            "result of {} cannot be converted: {}",
            op, e
        ))),
    }
}

#[inline]
fn numeric(dtype: ScalarType) -> bool {
    dtype.is_int() || dtype.is_float()
}

fn arith(
    a: Num,
    b: Num,
    int_op: fn(i128, i128) -> Option<i128>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Num, Fault> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => int_op(x, y).map(Num::Int).ok_or(Fault::Overflow),
        (Num::Bool(_), _) | (_, Num::Bool(_)) => Err(Fault::Invalid),
        _ => Ok(Num::Float(float_op(a.as_f64(), b.as_f64()))),
    }
}

fn unary_float(p: &[Num], dtype: ScalarType, f: impl Fn(f64) -> f64) -> Result<Num, Fault> {
    match p {
        [x] if dtype.is_float() => Ok(Num::Float(f(x.as_f64()))),
        _ => Err(Fault::Invalid),
    }
}

fn binary_numeric(
    p: &[Num],
    dtype: ScalarType,
    int_op: fn(i128, i128) -> Option<i128>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Num, Fault> {
    match p {
        [a, b] if numeric(dtype) => arith(*a, *b, int_op, float_op),
        _ => Err(Fault::Invalid),
    }
}

fn floor_div(a: i128, b: i128) -> Option<i128> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i128, b: i128) -> Option<i128> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn mulacc(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    match p {
        [a, b, c] if numeric(dtype) => {
            let prod = arith(*a, *b, i128::checked_mul, |x, y| x * y)?;
            arith(prod, *c, i128::checked_add, |x, y| x + y)
        }
        _ => Err(Fault::Invalid),
    }
}

fn select(p: &[Num], _dtype: ScalarType) -> Result<Num, Fault> {
    match p {
        [Num::Bool(cond), a, b] => Ok(if *cond { *a } else { *b }),
        _ => Err(Fault::Invalid),
    }
}

fn log2(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    unary_float(p, dtype, |x| if x > 0.0 { x.log2() } else { f64::NAN })
}

fn exp2(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    unary_float(p, dtype, f64::exp2)
}

fn sqrt(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    unary_float(p, dtype, |x| if x >= 0.0 { x.sqrt() } else { f64::NAN })
}

fn sin(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    unary_float(p, dtype, f64::sin)
}

fn neg(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    match p {
        [Num::Int(x)] if numeric(dtype) => x.checked_neg().map(Num::Int).ok_or(Fault::Overflow),
        [Num::Float(x)] if numeric(dtype) => Ok(Num::Float(-x)),
        _ => Err(Fault::Invalid),
    }
}

fn mul(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    binary_numeric(p, dtype, i128::checked_mul, |a, b| a * b)
}

fn add(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    binary_numeric(p, dtype, i128::checked_add, |a, b| a + b)
}

fn sub(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    binary_numeric(p, dtype, i128::checked_sub, |a, b| a - b)
}

fn xor(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    match p {
        [Num::Int(a), Num::Int(b)] if dtype.is_signed() => Ok(Num::Int(a ^ b)),
        _ => Err(Fault::Invalid),
    }
}

fn max(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    binary_numeric(
        p,
        dtype,
        |a, b| Some(a.max(b)),
        |a, b| if b > a { b } else { a },
    )
}

fn compare(p: &[Num], dtype: ScalarType, int_cmp: fn(&i128, &i128) -> bool, float_cmp: fn(&f64, &f64) -> bool) -> Result<Num, Fault> {
    match p {
        [Num::Int(a), Num::Int(b)] if numeric(dtype) => Ok(Num::Bool(int_cmp(a, b))),
        [a, b] if numeric(dtype) => Ok(Num::Bool(float_cmp(&a.as_f64(), &b.as_f64()))),
        _ => Err(Fault::Invalid),
    }
}

fn cmpeq(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    compare(p, dtype, i128::eq, f64::eq)
}

fn cmplt(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    compare(p, dtype, i128::lt, f64::lt)
}

fn div(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    match p {
        [Num::Int(a), Num::Int(b)] if dtype.is_int() => {
            if *b == 0 {
                return Err(Fault::Invalid);
            }
            floor_div(*a, *b).map(Num::Int).ok_or(Fault::Overflow)
        }
        [a, b] if dtype.is_float() => {
            let (a, b) = (a.as_f64(), b.as_f64());
            Ok(Num::Float(if b != 0.0 { a / b } else { f64::NAN }))
        }
        _ => Err(Fault::Invalid),
    }
}

fn modulo(p: &[Num], dtype: ScalarType) -> Result<Num, Fault> {
    match p {
        [Num::Int(a), Num::Int(b)] if dtype.is_signed() && *b != 0 => {
            floor_mod(*a, *b).map(Num::Int).ok_or(Fault::Overflow)
        }
        _ => Err(Fault::Invalid),
    }
}
