//! Tagged scalar values.
//!
//! A [`Value`] always carries its resolved [`ScalarType`] next to the
//! payload, so promotion and overflow logic work from the tag instead of
//! guessing a type from the number itself.
//!
//! Float payloads are kept at f64 precision regardless of the tag; they are
//! rounded only when written to a buffer. Integer payloads always lie in
//! the range of their tag.

use std::fmt;

use thiserror::Error;

use crate::dtype::{ScalarType, TypeClass};

/// Raw payload of a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

/// Conversion failure.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConvertError {
    /// Value is valid for the target class but out of its range.
    #[error("{value} overflows {to}")]
    Overflow { value: String, to: ScalarType },

    /// Value can never be represented in the target class.
    #[error("{value} cannot be converted to {to}")]
    Incompatible { value: String, to: ScalarType },
}

/// A scalar with an explicit dtype tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Value {
    dtype: ScalarType,
    payload: Payload,
}

impl Value {
    pub const TRUE: Value = Value {
        dtype: ScalarType::Bool,
        payload: Payload::Bool(true),
    };

    pub const FALSE: Value = Value {
        dtype: ScalarType::Bool,
        payload: Payload::Bool(false),
    };

    pub fn bool(b: bool) -> Self {
        if b {
            Self::TRUE
        } else {
            Self::FALSE
        }
    }

    pub fn i32(v: i32) -> Self {
        Self {
            dtype: ScalarType::Int32,
            payload: Payload::Int(v as i64),
        }
    }

    pub fn i64(v: i64) -> Self {
        Self {
            dtype: ScalarType::Int64,
            payload: Payload::Int(v),
        }
    }

    pub fn u32(v: u32) -> Self {
        Self {
            dtype: ScalarType::UInt32,
            payload: Payload::UInt(v as u64),
        }
    }

    pub fn u64(v: u64) -> Self {
        Self {
            dtype: ScalarType::UInt64,
            payload: Payload::UInt(v),
        }
    }

    pub fn f32(v: f32) -> Self {
        Self {
            dtype: ScalarType::Float32,
            payload: Payload::Float(v as f64),
        }
    }

    pub fn f64(v: f64) -> Self {
        Self {
            dtype: ScalarType::Float64,
            payload: Payload::Float(v),
        }
    }

    /// Float payload tagged with any float type.
    pub fn float(v: f64, dtype: ScalarType) -> Self {
        debug_assert!(dtype.is_float());
        Self {
            dtype,
            payload: Payload::Float(v),
        }
    }

    /// Zero of the given type.
    pub fn zero(dtype: ScalarType) -> Self {
        let payload = match dtype.class() {
            TypeClass::Bool => Payload::Bool(false),
            TypeClass::Signed => Payload::Int(0),
            TypeClass::Unsigned => Payload::UInt(0),
            TypeClass::Float => Payload::Float(0.0),
        };
        Self { dtype, payload }
    }

    /// Integer of the given type, range checked.
    pub fn from_i128(v: i128, to: ScalarType) -> Result<Self, ConvertError> {
        match to.class() {
            TypeClass::Bool => match v {
                0 | 1 => Ok(Self::bool(v == 1)),
                _ => Err(ConvertError::Incompatible {
                    value: v.to_string(),
                    to,
                }),
            },
            TypeClass::Float => Self::from_f64(v as f64, to),
            TypeClass::Signed | TypeClass::Unsigned => {
                // int_range is Some for every integer class
                let (lo, hi) = to.int_range().unwrap_or((0, 0));
                if v < lo || v > hi {
                    return Err(ConvertError::Overflow {
                        value: v.to_string(),
                        to,
                    });
                }
                let payload = if to.is_unsigned() {
                    Payload::UInt(v as u64)
                } else {
                    Payload::Int(v as i64)
                };
                Ok(Self { dtype: to, payload })
            }
        }
    }

    /// Float converted to the given type, range checked.
    ///
    /// NaN and infinities are representable in every float type. Integer
    /// targets truncate toward zero and reject non-finite input.
    pub fn from_f64(v: f64, to: ScalarType) -> Result<Self, ConvertError> {
        match to.class() {
            TypeClass::Float => {
                let max = to.float_max().unwrap_or(f64::MAX);
                if v.is_finite() && v.abs() > max {
                    return Err(ConvertError::Overflow {
                        value: v.to_string(),
                        to,
                    });
                }
                Ok(Self::float(v, to))
            }
            TypeClass::Bool => {
                if v == 0.0 || v == 1.0 {
                    Ok(Self::bool(v == 1.0))
                } else {
                    Err(ConvertError::Incompatible {
                        value: v.to_string(),
                        to,
                    })
                }
            }
            TypeClass::Signed | TypeClass::Unsigned => {
                if !v.is_finite() {
                    return Err(ConvertError::Incompatible {
                        value: v.to_string(),
                        to,
                    });
                }
                Self::from_i128(v.trunc() as i128, to)
            }
        }
    }

    #[inline]
    pub fn dtype(&self) -> ScalarType {
        self.dtype
    }

    #[inline]
    pub fn payload(&self) -> Payload {
        self.payload
    }

    /// Integer view; bools read as 0/1, floats have none.
    pub fn as_i128(&self) -> Option<i128> {
        match self.payload {
            Payload::Bool(b) => Some(b as i128),
            Payload::Int(v) => Some(v as i128),
            Payload::UInt(v) => Some(v as i128),
            Payload::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self.payload {
            Payload::Bool(b) => b as u8 as f64,
            Payload::Int(v) => v as f64,
            Payload::UInt(v) => v as f64,
            Payload::Float(v) => v,
        }
    }

    /// Non-zero test.
    pub fn truthy(&self) -> bool {
        match self.payload {
            Payload::Bool(b) => b,
            Payload::Int(v) => v != 0,
            Payload::UInt(v) => v != 0,
            Payload::Float(v) => v != 0.0,
        }
    }

    /// Strict conversion to another type.
    pub fn convert(&self, to: ScalarType) -> Result<Value, ConvertError> {
        if to == self.dtype {
            return Ok(*self);
        }
        match self.payload {
            Payload::Float(v) => Self::from_f64(v, to),
            _ => {
                let v = self.as_i128().unwrap_or_default();
                Self::from_i128(v, to)
            }
        }
    }

    /// Numeric equality across tags (`3i32 == 3i64`).
    pub fn numeric_eq(&self, other: &Value) -> bool {
        match (self.as_i128(), other.as_i128()) {
            (Some(a), Some(b)) => a == b,
            _ => self.as_f64() == other.as_f64(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload {
            Payload::Bool(b) => write!(f, "{}", b),
            Payload::Int(v) => write!(f, "{}", v),
            Payload::UInt(v) => write!(f, "{}", v),
            Payload::Float(v) => write!(f, "{}", v),
        }
    }
}
