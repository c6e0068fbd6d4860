//! Tensor-core (WMMA) execution.
//!
//! A warp-level matrix multiply-accumulate. Operands A and B (multiplicands)
//! and C (accumulator) are vector values: each sub-element is one lane
//! array, so an operand with `NUM_A` elements per lane covers
//! `NUM_A * WARP_THREADS` matrix entries per lane group.
//!
//! For every group of `WARP_THREADS` lanes, every lane and every output
//! element, the result is
//!
//! ```text
//! D[row, col] = C[row, col] + sum_k A(k, col) * B(row, k)
//! ```
//!
//! where `(row, col) = c_map(lane, elem)` and `A(.)`, `B(.)` are the
//! layout's addressing functions. Each supported hardware variant is one
//! [`WmmaLayout`] implementation.

use crate::dtype::ScalarType;
use crate::interpreter::error::{EmuError, EmuResult};
use crate::interpreter::lanes::LaneArray;
use crate::interpreter::value::Value;

/// Addressing tables for one tensor-core variant.
pub trait WmmaLayout {
    /// Lanes that cooperate on one matrix.
    const WARP_THREADS: usize;
    /// Reduction depth.
    const K: usize;
    /// Elements of A per lane.
    const NUM_A: usize;
    /// Elements of B per lane.
    const NUM_B: usize;
    /// Elements of C (and D) per lane.
    const NUM_C: usize;

    fn a_elem(x: &[LaneArray<Value>], i: usize, j: usize, goff: usize) -> EmuResult<Value>;
    fn b_elem(x: &[LaneArray<Value>], i: usize, j: usize, goff: usize) -> EmuResult<Value>;
    /// Output `(row, col)` held by `elem` of `lane`.
    fn c_map(lane: usize, elem: usize) -> (usize, usize);
}

/// Apple `simdgroup_matrix` 8x8x8: two row-major elements per lane.
pub struct MetalLayout;

impl MetalLayout {
    fn a_b_elem(x: &[LaneArray<Value>], i: usize, j: usize, goff: usize) -> Value {
        x[i % 2][goff + (i / 2) % 2 + (j % 4) * 2 + (i / 4) * 8 + (j / 4) * 16]
    }
}

impl WmmaLayout for MetalLayout {
    const WARP_THREADS: usize = 32;
    const K: usize = 8;
    const NUM_A: usize = 2;
    const NUM_B: usize = 2;
    const NUM_C: usize = 2;

    fn a_elem(x: &[LaneArray<Value>], i: usize, j: usize, goff: usize) -> EmuResult<Value> {
        Ok(Self::a_b_elem(x, i, j, goff))
    }

    fn b_elem(x: &[LaneArray<Value>], i: usize, j: usize, goff: usize) -> EmuResult<Value> {
        Ok(Self::a_b_elem(x, i, j, goff))
    }

    fn c_map(lane: usize, elem: usize) -> (usize, usize) {
        (
            elem + (lane % 2) * 2 + ((lane / 8) % 2) * 4,
            (lane / 2) % 4 + (lane / 16) * 4,
        )
    }
}

/// AMD RDNA3 16x16x16 wave32.
///
/// A is column-major with lanes 16..32 duplicating lanes 0..16; B is A's
/// addressing transposed. C holds 8 row-major elements per lane.
pub struct RdnaLayout;

impl WmmaLayout for RdnaLayout {
    const WARP_THREADS: usize = 32;
    const K: usize = 16;
    const NUM_A: usize = 16;
    const NUM_B: usize = 16;
    const NUM_C: usize = 8;

    fn a_elem(x: &[LaneArray<Value>], i: usize, j: usize, goff: usize) -> EmuResult<Value> {
        let lo = x[i][goff + j];
        let hi = x[i][goff + j + 16];
        if !lo.numeric_eq(&hi) {
            return Err(EmuError::invalid(
                "wmma",
                format!(
                    "warp elements not duplicated across lanes: element {} lane {} is {}, lane {} is {}",
                    i,
                    goff + j,
                    lo,
                    goff + j + 16,
                    hi
                ),
            ));
        }
        Ok(lo)
    }

    fn b_elem(x: &[LaneArray<Value>], i: usize, j: usize, goff: usize) -> EmuResult<Value> {
        Self::a_elem(x, j, i, goff)
    }

    fn c_map(lane: usize, elem: usize) -> (usize, usize) {
        (lane % 16, lane / 16 + elem * 2)
    }
}

/// Known tensor-core variants, selected by the instruction's tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorCore {
    Metal,
    Rdna,
}

impl TensorCore {
    pub fn from_tag(tag: &str) -> EmuResult<Self> {
        if tag.starts_with("__metal_wmma") {
            Ok(TensorCore::Metal)
        } else if tag == "__builtin_amdgcn_wmma_f32_16x16x16_f16_w32" || tag == "__hip_wmma_f16_f16" {
            Ok(TensorCore::Rdna)
        } else {
            Err(EmuError::UnimplementedHardwareTarget(tag.to_string()))
        }
    }

    /// Run the multiply-accumulate, producing values of type `out`.
    pub fn execute(
        self,
        a: &[LaneArray<Value>],
        b: &[LaneArray<Value>],
        c: &[LaneArray<Value>],
        out: ScalarType,
    ) -> EmuResult<Vec<LaneArray<Value>>> {
        match self {
            TensorCore::Metal => mma::<MetalLayout>(a, b, c, out),
            TensorCore::Rdna => mma::<RdnaLayout>(a, b, c, out),
        }
    }
}

fn check_operand(name: &str, x: &[LaneArray<Value>], elems: usize, warp_size: usize) -> EmuResult<()> {
    if x.len() != elems {
        return Err(EmuError::invalid(
            "wmma",
            format!("{} must have {} elements per thread, got {}", name, elems, x.len()),
        ));
    }
    if x.iter().any(|e| e.len() != warp_size) {
        return Err(EmuError::invalid(
            "wmma",
            format!("{} must have {} total elements", name, elems * warp_size),
        ));
    }
    Ok(())
}

fn mma<L: WmmaLayout>(
    a: &[LaneArray<Value>],
    b: &[LaneArray<Value>],
    c: &[LaneArray<Value>],
    out: ScalarType,
) -> EmuResult<Vec<LaneArray<Value>>> {
    let warp_size = c.first().map_or(0, |e| e.len());
    check_operand("A", a, L::NUM_A, warp_size)?;
    check_operand("B", b, L::NUM_B, warp_size)?;
    check_operand("C", c, L::NUM_C, warp_size)?;
    if warp_size == 0 || warp_size % L::WARP_THREADS != 0 {
        return Err(EmuError::invalid(
            "wmma",
            format!(
                "must have multiples of {} warp threads, got {}",
                L::WARP_THREADS,
                warp_size
            ),
        ));
    }

    let mut d: Vec<LaneArray<Value>> = c.to_vec();
    for goff in (0..warp_size).step_by(L::WARP_THREADS) {
        for lane in 0..L::WARP_THREADS {
            for elem in 0..L::NUM_C {
                let (row, col) = L::c_map(lane, elem);
                let mut acc = c[elem][goff + lane].as_f64();
                for k in 0..L::K {
                    acc += L::a_elem(a, k, col, goff)?.as_f64() * L::b_elem(b, row, k, goff)?.as_f64();
                }
                d[elem][goff + lane] = Value::from_f64(acc, out)
                    .map_err(|e| EmuError::TypeConversion(format!("wmma result: {}", e)))?;
            }
        }
    }
    Ok(d)
}
