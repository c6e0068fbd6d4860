//! Error taxonomy for program execution.
//!
//! Every failure is immediate: no instruction is retried or downgraded,
//! and a failing instruction aborts the whole global-index iteration.
//! The single automatic recovery path (one precision upgrade on
//! arithmetic overflow) lives in the ALU and never surfaces here unless
//! the upgraded representation also fails.

use thiserror::Error;

use crate::dtype::DType;
use crate::interpreter::program::{AluOp, UopKind};

/// Which side of the memory layer reported a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Load,
    Store,
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::Load => f.write_str("load"),
            Access::Store => f.write_str("store"),
        }
    }
}

/// Errors raised while interpreting a program.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EmuError {
    /// Operand types cannot be reconciled into one evaluation type.
    #[error("type mismatch on {op}: {detail}")]
    TypeMismatch { op: AluOp, detail: String },

    /// Operation has no handler.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(AluOp),

    /// Operation is known but has no defined result for these operands.
    #[error("invalid operands for {op}: {detail}")]
    InvalidOperands { op: String, detail: String },

    /// Linear buffer access outside `[0, len)`.
    #[error("{access} out of bounds, size is {len} and access is {index}")]
    OutOfBounds {
        access: Access,
        index: i128,
        len: usize,
    },

    /// Result does not fit even after the one-shot precision upgrade.
    #[error("result {value} of {op} overflows {dtype} (upcast failed)")]
    OverflowAfterUpgrade {
        op: AluOp,
        dtype: DType,
        value: String,
    },

    /// Structurally impossible conversion.
    #[error("type conversion error: {0}")]
    TypeConversion(String),

    /// Tensor-core variant tag with no known layout.
    #[error("unimplemented tensor core {0}")]
    UnimplementedHardwareTarget(String),

    /// A non-void instruction left no value behind.
    #[error("internal consistency fault at uop {pc} ({kind:?}): no value produced")]
    InternalConsistencyFault { pc: usize, kind: UopKind },

    /// The program itself is not well formed.
    #[error("malformed program at uop {pc}: {reason}")]
    MalformedProgram { pc: usize, reason: String },
}

impl EmuError {
    pub(crate) fn malformed(pc: usize, reason: impl Into<String>) -> Self {
        EmuError::MalformedProgram {
            pc,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(op: impl std::fmt::Display, detail: impl Into<String>) -> Self {
        EmuError::InvalidOperands {
            op: op.to_string(),
            detail: detail.into(),
        }
    }
}

/// Convenience alias used across the interpreter.
pub type EmuResult<T> = Result<T, EmuError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::ScalarType;

    #[test]
    fn test_error_display() {
        let e = EmuError::OutOfBounds {
            access: Access::Load,
            index: 10,
            len: 5,
        };
        assert_eq!(e.to_string(), "load out of bounds, size is 5 and access is 10");

        let e = EmuError::UnimplementedHardwareTarget("__cuda_mma".into());
        assert!(e.to_string().contains("__cuda_mma"));

        let e = EmuError::OverflowAfterUpgrade {
            op: AluOp::Mul,
            dtype: DType::Scalar(ScalarType::Int64),
            value: "1e40".into(),
        };
        assert!(e.to_string().contains("int64"));
    }

    #[test]
    fn test_malformed_helper() {
        let e = EmuError::malformed(3, "missing dtype");
        assert!(matches!(e, EmuError::MalformedProgram { pc: 3, .. }));
        assert!(e.to_string().contains("uop 3"));
    }
}
