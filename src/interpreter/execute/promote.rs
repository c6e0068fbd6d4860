//! Type promotion engine.
//!
//! Resolves one evaluation type for an ALU operation from its operand tags
//! and declared result type:
//!
//! 1. Boolean operands are converted to the declared type first (0/1 is
//!    exact in every numeric type).
//! 2. The evaluation type is the highest-ranked type among the operand tags
//!    and the declared type.
//!
//! Booleans reconcile with everything. Signed and unsigned integers never
//! reconcile with each other. A float absorbs an integer only when the
//! float is at least as wide as the integer.

use smallvec::SmallVec;

use crate::dtype::{ScalarType, TypeClass};
use crate::interpreter::error::{EmuError, EmuResult};
use crate::interpreter::program::AluOp;
use crate::interpreter::value::Value;

/// Operands rewritten for evaluation, plus the evaluation type.
#[derive(Debug, Clone, PartialEq)]
pub struct Promoted {
    pub dtype: ScalarType,
    pub operands: SmallVec<[Value; 4]>,
}

/// Highest-order type of a set, or `None` if the set cannot be reconciled.
pub fn highest_order(types: &[ScalarType]) -> Option<ScalarType> {
    let mut signed = false;
    let mut unsigned = false;
    let mut widest_int = 0;
    let mut highest = ScalarType::Bool;

    for &ty in types {
        match ty.class() {
            TypeClass::Bool => continue,
            TypeClass::Signed => signed = true,
            TypeClass::Unsigned => unsigned = true,
            TypeClass::Float => {}
        }
        if ty.is_int() {
            widest_int = widest_int.max(ty.bits());
        }
        if ty.rank() > highest.rank() {
            highest = ty;
        }
    }

    if signed && unsigned {
        return None;
    }
    if highest.is_float() && widest_int > highest.bits() {
        return None;
    }
    Some(highest)
}

/// Promote `operands` against the `declared` result type.
pub fn promote(op: AluOp, declared: ScalarType, operands: &[Value]) -> EmuResult<Promoted> {
    let operands = operands
        .iter()
        .map(|v| {
            if v.dtype().is_bool() {
                v.convert(declared)
                    .map_err(|e| EmuError::TypeConversion(e.to_string()))
            } else {
                Ok(*v)
            }
        })
        .collect::<EmuResult<SmallVec<[Value; 4]>>>()?;

    let types: SmallVec<[ScalarType; 5]> = operands
        .iter()
        .map(Value::dtype)
        .chain(std::iter::once(declared))
        .collect();

    let dtype = highest_order(&types).ok_or_else(|| EmuError::TypeMismatch {
        op,
        detail: format!(
            "all elements must be of the same basic type, got [{}]",
            types
                .iter()
                .map(|t| t.name())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    })?;

    Ok(Promoted { dtype, operands })
}
