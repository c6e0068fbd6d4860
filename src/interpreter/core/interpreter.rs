//! Core interpreter implementation.
//!
//! The interpreter runs the fetch-execute loop of one global-index
//! iteration: fetch the uop at the instruction pointer, gather its operand
//! lanes, execute, then advance or branch.

use smallvec::SmallVec;

use crate::dtype::DType;
use crate::interpreter::error::{EmuError, EmuResult};
use crate::interpreter::execute::{Alu, Gate, MemoryUnit, TensorCore};
use crate::interpreter::lanes::{LaneArray, LaneValues};
use crate::interpreter::program::{AluOp, Arg, Program, Uop, UopKind};
use crate::interpreter::state::IterationContext;
use crate::interpreter::value::Value;

/// Result of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// Fall through to the next instruction.
    Continue,
    /// Jump to `target`.
    Branch { target: usize },
    /// Instruction pointer is past the end of the program.
    Halt,
}

/// Operand lanes of one instruction, with their resolved dtypes.
struct Operands {
    values: SmallVec<[LaneValues; 4]>,
    dtypes: SmallVec<[DType; 4]>,
}

impl Operands {
    fn len(&self) -> usize {
        self.values.len()
    }
}

/// Interpreter for one program.
///
/// Holds no per-iteration state; everything mutable lives in the
/// [`IterationContext`], so one interpreter serves every grid point.
pub struct CoreInterpreter<'p> {
    program: &'p Program,
}

impl<'p> CoreInterpreter<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self { program }
    }

    pub fn program(&self) -> &Program {
        self.program
    }

    /// Run until the instruction pointer leaves the program.
    pub fn run(&self, ctx: &mut IterationContext<'_>) -> EmuResult<()> {
        loop {
            match self.step(ctx)? {
                StepResult::Continue => ctx.advance_pc(),
                StepResult::Branch { target } => ctx.set_pc(target),
                StepResult::Halt => return Ok(()),
            }
        }
    }

    /// Execute the instruction at the current instruction pointer.
    pub fn step(&self, ctx: &mut IterationContext<'_>) -> EmuResult<StepResult> {
        let pc = ctx.pc();
        let uop = match self.program.get(pc) {
            Some(uop) => uop,
            None => return Ok(StepResult::Halt),
        };
        log::trace!(
            "{:>4} {:<13} {:<16} {:?}",
            pc,
            uop.kind.name(),
            uop.dtype.map(|d| d.to_string()).unwrap_or_default(),
            uop.arg
        );
        ctx.instructions += 1;

        match uop.kind {
            UopKind::EndLoop => {
                let target = uop
                    .src
                    .first()
                    .copied()
                    .ok_or_else(|| EmuError::malformed(pc, "endloop has no loop operand"))?;
                ctx.loop_ends.insert(target, pc);
                return Ok(StepResult::Branch { target });
            }
            // lanes never diverge, so these are synchronization points only
            UopKind::Barrier | UopKind::If | UopKind::EndIf => return Ok(StepResult::Continue),
            _ => {}
        }

        let inp = self.gather(pc, ctx)?;

        if uop.kind == UopKind::Store {
            self.exec_store(pc, &inp, ctx)?;
            return Ok(StepResult::Continue);
        }

        let dtype = uop.dtype.ok_or_else(|| {
            EmuError::malformed(pc, format!("{} is missing a dtype", uop.kind.name()))
        })?;
        ctx.types.insert(pc, dtype);
        let lanes = ctx.lanes();

        match uop.kind {
            UopKind::DefineGlobal => {
                let fmt = buffer_fmt(pc, dtype)?;
                let view = ctx
                    .memory
                    .bind_global(fmt)
                    .ok_or_else(|| EmuError::malformed(pc, "no buffer argument left to bind"))??;
                log::debug!("uop {}: bound {:?} as {}", pc, view.id, dtype);
                ctx.values.insert(pc, LaneValues::Buffer(LaneArray::splat(lanes, view)));
            }
            UopKind::DefineLocal => {
                let fmt = buffer_fmt(pc, dtype)?;
                let size = match uop.arg {
                    Arg::Local { size, .. } => size,
                    _ => return Err(EmuError::malformed(pc, "local buffer needs a size")),
                };
                let view = ctx.memory.alloc_local(fmt, size);
                log::debug!("uop {}: local {:?} of {} x {}", pc, view.id, size, fmt);
                ctx.values.insert(pc, LaneValues::Buffer(LaneArray::splat(lanes, view)));
            }
            UopKind::DefineVar => {
                let v = ctx
                    .next_var()
                    .ok_or_else(|| EmuError::malformed(pc, "no launch value left to bind"))?
                    .convert(dtype.scalar())
                    .map_err(|e| EmuError::TypeConversion(e.to_string()))?;
                ctx.values.insert(pc, LaneValues::Scalar(LaneArray::splat(lanes, v)));
            }
            UopKind::Special => self.exec_special(pc, uop, dtype, ctx)?,
            UopKind::Const | UopKind::DefineAcc => {
                let literal = match uop.arg {
                    Arg::Literal(lit) => lit,
                    _ => return Err(EmuError::malformed(pc, "constant needs a literal")),
                };
                let v = literal
                    .to_value(dtype.scalar())
                    .map_err(|e| EmuError::TypeConversion(e.to_string()))?;
                let lane = LaneArray::splat(lanes, v);
                let values = if dtype.is_vector() {
                    LaneValues::Vector(vec![lane; dtype.count()])
                } else {
                    LaneValues::Scalar(lane)
                };
                ctx.values.insert(pc, values);
            }
            UopKind::Loop => {
                if let Some(exit) = self.exec_loop(pc, dtype, &inp, ctx)? {
                    return Ok(exit);
                }
            }
            UopKind::Cast => {
                let values = exec_cast(pc, dtype, inp)?;
                ctx.values.insert(pc, values);
            }
            UopKind::Load => {
                let values = exec_load(dtype, &inp, ctx)?;
                ctx.values.insert(pc, values);
            }
            UopKind::Phi => {
                // the accumulator is the first value operand
                let acc = self
                    .program
                    .value_operands(pc)
                    .next()
                    .ok_or_else(|| EmuError::malformed(pc, "phi needs an accumulator"))?;
                let merged = operand(pc, &inp, 1)?.clone();
                ctx.values.insert(acc, merged.clone());
                ctx.values.insert(pc, merged);
            }
            UopKind::Gep => {
                let index = match uop.arg {
                    Arg::Index(i) => i,
                    _ => return Err(EmuError::malformed(pc, "gep needs an element index")),
                };
                let elem = operand(pc, &inp, 0)?
                    .as_vector()
                    .and_then(|v| v.get(index))
                    .cloned()
                    .ok_or_else(|| {
                        EmuError::invalid("gep", format!("no element {} in operand", index))
                    })?;
                ctx.values.insert(pc, LaneValues::Scalar(elem));
            }
            UopKind::Wmma => {
                let tag = match &uop.arg {
                    Arg::Tag(tag) => tag,
                    _ => return Err(EmuError::malformed(pc, "wmma needs a variant tag")),
                };
                let core = TensorCore::from_tag(tag)?;
                let d = core.execute(
                    vector(&inp, 0, "wmma")?,
                    vector(&inp, 1, "wmma")?,
                    vector(&inp, 2, "wmma")?,
                    dtype.scalar(),
                )?;
                ctx.values.insert(pc, LaneValues::Vector(d));
            }
            UopKind::Alu => {
                let op = match uop.arg {
                    Arg::Alu(op) => op,
                    _ => return Err(EmuError::malformed(pc, "alu needs an operation")),
                };
                let values = exec_alu(op, dtype, &inp)?;
                ctx.values.insert(pc, values);
            }
            UopKind::Store
            | UopKind::EndLoop
            | UopKind::Barrier
            | UopKind::If
            | UopKind::EndIf => {}
        }

        if !ctx.values.contains(pc) {
            return Err(EmuError::InternalConsistencyFault { pc, kind: uop.kind });
        }
        Ok(StepResult::Continue)
    }

    fn gather(&self, pc: usize, ctx: &IterationContext<'_>) -> EmuResult<Operands> {
        let mut values = SmallVec::new();
        let mut dtypes = SmallVec::new();
        for src in self.program.value_operands(pc) {
            let v = ctx
                .values
                .get(src)
                .ok_or_else(|| EmuError::malformed(pc, format!("operand {} has no value", src)))?;
            let t = ctx
                .types
                .get(src)
                .ok_or_else(|| EmuError::malformed(pc, format!("operand {} has no dtype", src)))?;
            values.push(v.clone());
            dtypes.push(t);
        }
        Ok(Operands { values, dtypes })
    }

    fn exec_special(
        &self,
        pc: usize,
        uop: &Uop,
        dtype: DType,
        ctx: &mut IterationContext<'_>,
    ) -> EmuResult<()> {
        let (dim, name) = match &uop.arg {
            Arg::Special { dim, name } if *dim < 3 => (*dim, name.as_str()),
            _ => return Err(EmuError::malformed(pc, "special needs a dimension below 3")),
        };
        let lanes = ctx.lanes();
        let coords = if name.starts_with('g') {
            LaneArray::splat(lanes, ctx.global_idx[dim])
        } else if name.starts_with('l') {
            LaneArray::from_fn(lanes, |lane| ctx.warp.coord(lane)[dim])
        } else {
            // unknown prefix binds nothing
            return Ok(());
        };
        let values = coords
            .try_map(|&c| Value::from_i128(c as i128, dtype.scalar()))
            .map_err(|e| EmuError::TypeConversion(e.to_string()))?;
        ctx.values.insert(pc, LaneValues::Scalar(values));
        Ok(())
    }

    /// Enter or iterate a loop. Returns the exit branch once the counter
    /// reaches its end bound.
    fn exec_loop(
        &self,
        pc: usize,
        dtype: DType,
        inp: &Operands,
        ctx: &mut IterationContext<'_>,
    ) -> EmuResult<Option<StepResult>> {
        let lanes = ctx.lanes();
        let done = match ctx.values.get_mut(pc) {
            None => {
                let start = first_lane(pc, inp, 0)?
                    .convert(dtype.scalar())
                    .map_err(|e| EmuError::TypeConversion(e.to_string()))?;
                log::debug!("uop {}: loop entered at {}", pc, start);
                ctx.values.insert(pc, LaneValues::Scalar(LaneArray::splat(lanes, start)));
                false
            }
            Some(LaneValues::Scalar(counter)) => {
                for v in counter.iter_mut() {
                    let one = Value::from_i128(1, v.dtype())
                        .map_err(|e| EmuError::TypeConversion(e.to_string()))?;
                    *v = Alu::execute(AluOp::Add, v.dtype(), &[*v, one])?;
                }
                let end = first_lane(pc, inp, 1)?;
                counter.get(0).map_or(true, |c| c.numeric_eq(&end))
            }
            Some(_) => return Err(EmuError::malformed(pc, "loop counter is not scalar")),
        };

        if !done {
            return Ok(None);
        }
        ctx.values.remove(pc);
        let end_pc = ctx
            .loop_ends
            .get(&pc)
            .copied()
            .ok_or_else(|| EmuError::malformed(pc, "loop has no recorded end"))?;
        log::debug!("uop {}: loop exited to {}", pc, end_pc + 1);
        Ok(Some(StepResult::Branch { target: end_pc + 1 }))
    }

    fn exec_store(&self, pc: usize, inp: &Operands, ctx: &mut IterationContext<'_>) -> EmuResult<()> {
        if inp.len() > 3 {
            return Err(EmuError::malformed(pc, "gated stores are not supported"));
        }
        if inp.len() != 3 {
            return Err(EmuError::malformed(pc, format!("store has {} value operands", inp.len())));
        }
        let bufs = operand(pc, inp, 0)?
            .as_buffers()
            .ok_or_else(|| EmuError::invalid("store", "first operand is not a buffer"))?;
        let value_dtype = inp.dtypes[2];

        if let Some(shape) = inp.dtypes[0].image_shape() {
            if value_dtype.count() != 4 {
                return Err(EmuError::invalid(
                    "store",
                    format!("image store needs a 4-channel value, got {}", value_dtype),
                ));
            }
            let (xs, ys) = image_coords(inp, "store")?;
            let channels = vector(inp, 2, "store")?;
            return MemoryUnit::store_image(&mut ctx.memory, bufs, shape, xs, ys, channels);
        }

        let offsets = scalar(inp, 1, "store")?;
        if value_dtype.count() > 1 {
            for (j, values) in vector(inp, 2, "store")?.iter().enumerate() {
                MemoryUnit::store(&mut ctx.memory, bufs, offsets, values, j as i64)?;
            }
            Ok(())
        } else {
            MemoryUnit::store(&mut ctx.memory, bufs, offsets, scalar(inp, 2, "store")?, 0)
        }
    }
}

fn buffer_fmt(pc: usize, dtype: DType) -> EmuResult<crate::dtype::ScalarType> {
    dtype
        .fmt()
        .ok_or_else(|| EmuError::malformed(pc, format!("{} has no buffer format", dtype)))
}

fn operand<'i>(pc: usize, inp: &'i Operands, index: usize) -> EmuResult<&'i LaneValues> {
    inp.values
        .get(index)
        .ok_or_else(|| EmuError::malformed(pc, format!("missing operand {}", index)))
}

fn scalar<'i>(inp: &'i Operands, index: usize, op: &str) -> EmuResult<&'i LaneArray<Value>> {
    inp.values
        .get(index)
        .and_then(LaneValues::as_scalar)
        .ok_or_else(|| EmuError::invalid(op, format!("operand {} is not a scalar", index)))
}

fn vector<'i>(inp: &'i Operands, index: usize, op: &str) -> EmuResult<&'i [LaneArray<Value>]> {
    inp.values
        .get(index)
        .and_then(LaneValues::as_vector)
        .ok_or_else(|| EmuError::invalid(op, format!("operand {} is not a vector", index)))
}

/// Sub-element `j` of an operand; scalars broadcast to every sub-element.
fn element<'i>(inp: &'i Operands, index: usize, j: usize, op: &str) -> EmuResult<&'i LaneArray<Value>> {
    inp.values
        .get(index)
        .and_then(|v| v.element(j))
        .ok_or_else(|| EmuError::invalid(op, format!("operand {} has no element {}", index, j)))
}

fn first_lane(pc: usize, inp: &Operands, index: usize) -> EmuResult<Value> {
    operand(pc, inp, index)?
        .as_scalar()
        .and_then(|lanes| lanes.get(0))
        .copied()
        .ok_or_else(|| EmuError::malformed(pc, format!("loop bound {} is not a scalar", index)))
}

fn image_coords<'i>(
    inp: &'i Operands,
    op: &str,
) -> EmuResult<(&'i LaneArray<Value>, &'i LaneArray<Value>)> {
    match inp.values.get(1).and_then(LaneValues::as_vector) {
        Some([xs, ys, ..]) => Ok((xs, ys)),
        _ => Err(EmuError::invalid(op, "image access needs (x, y) coordinates")),
    }
}

fn exec_cast(pc: usize, dtype: DType, inp: Operands) -> EmuResult<LaneValues> {
    if dtype.is_vector() {
        let count = dtype.count();
        if let [single @ LaneValues::Vector(elems)] = inp.values.as_slice() {
            if elems.len() != count {
                return Err(EmuError::malformed(
                    pc,
                    format!("cast of a {}-element vector to {}", elems.len(), dtype),
                ));
            }
            return Ok(single.clone());
        }
        if inp.values.len() != count {
            return Err(EmuError::malformed(
                pc,
                format!("cast packs {} operands into {}", inp.values.len(), dtype),
            ));
        }
        let packed = inp
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_scalar()
                    .cloned()
                    .ok_or_else(|| EmuError::invalid("cast", format!("operand {} is not a scalar", i)))
            })
            .collect::<EmuResult<Vec<_>>>()?;
        return Ok(LaneValues::Vector(packed));
    }

    let src = scalar(&inp, 0, "cast")?;
    let to = dtype.scalar();
    match src.try_map(|v| v.convert(to)) {
        Ok(converted) => Ok(LaneValues::Scalar(converted)),
        Err(e) => {
            log::warn!("uop {}: cast to {} failed ({}), keeping original values", pc, to, e);
            Ok(LaneValues::Scalar(src.clone()))
        }
    }
}

fn exec_load(dtype: DType, inp: &Operands, ctx: &IterationContext<'_>) -> EmuResult<LaneValues> {
    let bufs = inp
        .values
        .first()
        .and_then(LaneValues::as_buffers)
        .ok_or_else(|| EmuError::invalid("load", "first operand is not a buffer"))?;

    if let Some(shape) = inp.dtypes[0].image_shape() {
        if dtype.count() != 4 {
            return Err(EmuError::invalid(
                "load",
                format!("image load produces 4 channels, declared {}", dtype),
            ));
        }
        let (xs, ys) = image_coords(inp, "load")?;
        return MemoryUnit::load_image(&ctx.memory, bufs, shape, xs, ys).map(LaneValues::Vector);
    }

    let gated = inp.len() == 4;
    let load_element = |j: usize| -> EmuResult<LaneArray<Value>> {
        let offsets = element(inp, 1, j, "load")?;
        let gate = if gated {
            Some(Gate {
                gate: element(inp, 2, j, "load")?,
                default: element(inp, 3, j, "load")?,
            })
        } else {
            None
        };
        MemoryUnit::load(&ctx.memory, bufs, offsets, gate, j as i64)
    };

    if dtype.is_vector() {
        (0..dtype.count())
            .map(load_element)
            .collect::<EmuResult<Vec<_>>>()
            .map(LaneValues::Vector)
    } else {
        load_element(0).map(LaneValues::Scalar)
    }
}

fn exec_alu(op: AluOp, dtype: DType, inp: &Operands) -> EmuResult<LaneValues> {
    let operands = (0..inp.len())
        .map(|i| scalar(inp, i, op.name()))
        .collect::<EmuResult<SmallVec<[&LaneArray<Value>; 4]>>>()?;

    let lanes = operands.first().map_or(0, |o| o.len());
    if operands.iter().any(|o| o.len() != lanes) {
        return Err(EmuError::invalid(
            op,
            format!(
                "lane counts {:?} do not match",
                operands.iter().map(|o| o.len()).collect::<Vec<_>>()
            ),
        ));
    }
    if !op.mixes_dtypes() && inp.dtypes.iter().any(|d| *d != dtype) {
        return Err(EmuError::TypeMismatch {
            op,
            detail: format!(
                "dtype mismatch: declared {}, operands [{}]",
                dtype,
                inp.dtypes
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        });
    }

    let result = LaneArray::try_from_fn(lanes, |lane| {
        let args: SmallVec<[Value; 4]> = operands.iter().map(|o| o[lane]).collect();
        Alu::execute(op, dtype.scalar(), &args)
    })?;
    Ok(LaneValues::Scalar(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Buffer;
    use crate::dtype::ScalarType;
    use crate::interpreter::execute::MemoryPool;
    use crate::interpreter::lanes::Warp;
    use crate::interpreter::program::{Literal, ProgramBuilder};

    fn int() -> DType {
        DType::Scalar(ScalarType::Int32)
    }

    /// Run `program` for one grid point and hand back the context.
    fn run_once<'a>(
        program: &Program,
        warp: &'a Warp,
        bufs: &'a mut [Buffer],
        vals: &'a [Value],
    ) -> EmuResult<IterationContext<'a>> {
        let mut ctx = IterationContext::new(program.len(), [0, 0, 0], warp, MemoryPool::new(bufs), vals);
        CoreInterpreter::new(program).run(&mut ctx)?;
        Ok(ctx)
    }

    #[test]
    fn test_loop_visits_each_value() {
        // out[i] = i for i in 0..4, written from inside the loop body
        let mut b = ProgramBuilder::new();
        let out = b.global(int(), "out");
        let start = b.constant(int(), Literal::Int(0));
        let end = b.constant(int(), Literal::Int(4));
        let i = b.range(start, end);
        b.store(&[out, i, i]);
        b.end_range(i);
        let program = b.build();

        let warp = Warp::new([1, 1, 1]);
        let mut bufs = vec![Buffer::new(ScalarType::Int32, 4)];
        let ctx = run_once(&program, &warp, &mut bufs, &[]).unwrap();
        assert!(!ctx.values.contains(i));
        drop(ctx);

        let got: Vec<i128> = bufs[0].to_values().iter().filter_map(Value::as_i128).collect();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_empty_range_runs_once() {
        let mut b = ProgramBuilder::new();
        let out = b.global(int(), "out");
        let acc = b.acc(int(), Literal::Int(0));
        let start = b.constant(int(), Literal::Int(3));
        let end = b.constant(int(), Literal::Int(3));
        let one = b.constant(int(), Literal::Int(1));
        let i = b.range(start, end);
        let next = b.alu(AluOp::Add, int(), &[acc, one]);
        b.phi(int(), acc, next);
        b.end_range(i);
        let zero = b.constant(int(), Literal::Int(0));
        b.store(&[out, zero, acc]);
        let program = b.build();

        let warp = Warp::new([1, 1, 1]);
        let mut bufs = vec![Buffer::new(ScalarType::Int32, 1)];
        let mut ctx = IterationContext::new(program.len(), [0, 0, 0], &warp, MemoryPool::new(&mut bufs), &[]);
        let core = CoreInterpreter::new(&program);
        // stop at the first back-edge; the counter has already moved past end
        while !ctx.loop_ends.contains_key(&i) {
            match core.step(&mut ctx).unwrap() {
                StepResult::Continue => ctx.advance_pc(),
                StepResult::Branch { target } => ctx.set_pc(target),
                StepResult::Halt => break,
            }
        }
        assert_eq!(ctx.pc(), i);
        let acc_value = ctx.values.get(acc).and_then(|v| v.as_scalar()).map(|l| l[0]);
        assert_eq!(acc_value, Some(Value::i32(1)));
    }

    #[test]
    fn test_phi_accumulates() {
        // sum of 0..5 into an accumulator
        let mut b = ProgramBuilder::new();
        let out = b.global(int(), "out");
        let acc = b.acc(int(), Literal::Int(0));
        let start = b.constant(int(), Literal::Int(0));
        let end = b.constant(int(), Literal::Int(5));
        let i = b.range(start, end);
        let next = b.alu(AluOp::Add, int(), &[acc, i]);
        let merged = b.phi(int(), acc, next);
        b.end_range(i);
        let zero = b.constant(int(), Literal::Int(0));
        b.store(&[out, zero, merged]);
        let program = b.build();

        let warp = Warp::new([1, 1, 1]);
        let mut bufs = vec![Buffer::new(ScalarType::Int32, 1)];
        run_once(&program, &warp, &mut bufs, &[]).unwrap();
        assert_eq!(bufs[0].read(0), Some(Value::i32(10)));
    }

    #[test]
    fn test_special_coordinates() {
        let mut b = ProgramBuilder::new();
        let out = b.global(int(), "out");
        let lidx = b.special(0, "lidx0");
        let gidx = b.special(1, "gidx1");
        let ten = b.constant(int(), Literal::Int(10));
        let scaled = b.alu(AluOp::Mul, int(), &[gidx, ten]);
        let v = b.alu(AluOp::Add, int(), &[scaled, lidx]);
        b.store(&[out, lidx, v]);
        let program = b.build();

        let warp = Warp::new([3, 1, 1]);
        let mut bufs = vec![Buffer::new(ScalarType::Int32, 3)];
        let mut ctx = IterationContext::new(program.len(), [0, 2, 0], &warp, MemoryPool::new(&mut bufs), &[]);
        CoreInterpreter::new(&program).run(&mut ctx).unwrap();
        drop(ctx);

        let got: Vec<i128> = bufs[0].to_values().iter().filter_map(Value::as_i128).collect();
        assert_eq!(got, vec![20, 21, 22]);
    }

    #[test]
    fn test_unknown_special_is_consistency_fault() {
        let mut b = ProgramBuilder::new();
        let s = b.special(0, "widx0");
        let program = b.build();

        let warp = Warp::new([1, 1, 1]);
        let err = run_once(&program, &warp, &mut [], &[]).err();
        assert_eq!(
            err,
            Some(EmuError::InternalConsistencyFault {
                pc: s,
                kind: UopKind::Special
            })
        );
    }

    #[test]
    fn test_define_var_binds_vals() {
        let mut b = ProgramBuilder::new();
        let out = b.global(int(), "out");
        let n = b.var(int(), "n");
        let zero = b.constant(int(), Literal::Int(0));
        b.store(&[out, zero, n]);
        let program = b.build();

        let warp = Warp::new([1, 1, 1]);
        let mut bufs = vec![Buffer::new(ScalarType::Int32, 1)];
        let vals = [Value::i64(17)];
        run_once(&program, &warp, &mut bufs, &vals).unwrap();
        assert_eq!(bufs[0].read(0), Some(Value::i32(17)));

        let err = run_once(&program, &warp, &mut bufs, &[]).err();
        assert!(matches!(err, Some(EmuError::MalformedProgram { .. })));
    }

    #[test]
    fn test_vector_const_gep_and_cast() {
        let f4 = DType::vec(ScalarType::Float32, 4);
        let float = DType::Scalar(ScalarType::Float32);
        let mut b = ProgramBuilder::new();
        let out = b.global(float, "out");
        let a = b.constant(float, Literal::Float(1.5));
        let c = b.constant(float, Literal::Float(2.5));
        let packed = b.cast(DType::vec(ScalarType::Float32, 2), &[a, c]);
        let hi = b.gep(float, packed, 1);
        let splat = b.constant(f4, Literal::Float(4.0));
        let third = b.gep(float, splat, 2);
        let zero = b.constant(int(), Literal::Int(0));
        let one = b.constant(int(), Literal::Int(1));
        b.store(&[out, zero, hi]);
        b.store(&[out, one, third]);
        let program = b.build();

        let warp = Warp::new([2, 1, 1]);
        let mut bufs = vec![Buffer::new(ScalarType::Float32, 2)];
        run_once(&program, &warp, &mut bufs, &[]).unwrap();
        assert_eq!(bufs[0].read(0), Some(Value::f32(2.5)));
        assert_eq!(bufs[0].read(1), Some(Value::f32(4.0)));
    }

    #[test]
    fn test_vector_cast_count_must_match() {
        let float = DType::Scalar(ScalarType::Float32);
        let f2 = DType::vec(ScalarType::Float32, 2);
        let f4 = DType::vec(ScalarType::Float32, 4);
        let warp = Warp::new([1, 1, 1]);

        let mut b = ProgramBuilder::new();
        let a = b.constant(float, Literal::Float(1.0));
        let c = b.constant(float, Literal::Float(2.0));
        b.cast(f4, &[a, c]);
        let program = b.build();
        let err = run_once(&program, &warp, &mut [], &[]).err();
        assert!(matches!(err, Some(EmuError::MalformedProgram { pc: 2, .. })));

        let mut b = ProgramBuilder::new();
        let pair = b.constant(f2, Literal::Float(1.0));
        b.cast(f4, &[pair]);
        let program = b.build();
        let err = run_once(&program, &warp, &mut [], &[]).err();
        assert!(matches!(err, Some(EmuError::MalformedProgram { pc: 1, .. })));
    }

    #[test]
    fn test_scalar_cast_falls_back() {
        let mut b = ProgramBuilder::new();
        let seven = b.constant(int(), Literal::Int(7));
        let as_bool = b.cast(DType::Scalar(ScalarType::Bool), &[seven]);
        let as_float = b.cast(DType::Scalar(ScalarType::Float32), &[seven]);
        let program = b.build();

        let warp = Warp::new([1, 1, 1]);
        let ctx = run_once(&program, &warp, &mut [], &[]).unwrap();
        let lane0 = |pc: usize| ctx.values.get(pc).and_then(|v| v.as_scalar()).map(|l| l[0]);
        assert_eq!(lane0(as_bool), Some(Value::i32(7)));
        assert_eq!(lane0(as_float), Some(Value::f32(7.0)));
    }

    #[test]
    fn test_vector_load_and_store() {
        let f4 = DType::vec(ScalarType::Float32, 4);
        let float = DType::Scalar(ScalarType::Float32);
        let mut b = ProgramBuilder::new();
        let dst = b.global(float, "dst");
        let src = b.global(float, "src");
        let lidx = b.special(0, "lidx0");
        let four = b.constant(int(), Literal::Int(4));
        let base = b.alu(AluOp::Mul, int(), &[lidx, four]);
        let v = b.load(f4, &[src, base]);
        b.store(&[dst, base, v]);
        let program = b.build();

        let warp = Warp::new([2, 1, 1]);
        let values: Vec<Value> = (0..8).map(|i| Value::f32(i as f32 * 0.5)).collect();
        let mut bufs = vec![
            Buffer::new(ScalarType::Float32, 8),
            Buffer::from_values(ScalarType::Float32, &values).unwrap(),
        ];
        run_once(&program, &warp, &mut bufs, &[]).unwrap();
        assert_eq!(bufs[0], bufs[1]);
    }

    #[test]
    fn test_gated_load_with_barrier_dependency() {
        let mut b = ProgramBuilder::new();
        let out = b.global(int(), "out");
        let src = b.global(int(), "src");
        let lidx = b.special(0, "lidx0");
        let two = b.constant(int(), Literal::Int(2));
        let gate = b.alu(AluOp::CmpLt, DType::Scalar(ScalarType::Bool), &[lidx, two]);
        let dflt = b.constant(int(), Literal::Int(-1));
        let bar = b.barrier();
        let v = b.load(int(), &[src, lidx, gate, dflt, bar]);
        b.store(&[out, lidx, v]);
        let program = b.build();
        program.validate().unwrap();

        let warp = Warp::new([4, 1, 1]);
        let src_vals = [Value::i32(5), Value::i32(6)];
        let mut bufs = vec![
            Buffer::new(ScalarType::Int32, 4),
            Buffer::from_values(ScalarType::Int32, &src_vals).unwrap(),
        ];
        run_once(&program, &warp, &mut bufs, &[]).unwrap();
        let got: Vec<i128> = bufs[0].to_values().iter().filter_map(Value::as_i128).collect();
        assert_eq!(got, vec![5, 6, -1, -1]);
    }

    #[test]
    fn test_local_buffer_shared_across_lanes() {
        let mut b = ProgramBuilder::new();
        let out = b.global(int(), "out");
        let smem = b.local(int(), "temp", 4);
        let lidx = b.special(0, "lidx0");
        b.store(&[smem, lidx, lidx]);
        b.barrier();
        let three = b.constant(int(), Literal::Int(3));
        let rev = b.alu(AluOp::Sub, int(), &[three, lidx]);
        let v = b.load(int(), &[smem, rev]);
        b.store(&[out, lidx, v]);
        let program = b.build();

        let warp = Warp::new([4, 1, 1]);
        let mut bufs = vec![Buffer::new(ScalarType::Int32, 4)];
        run_once(&program, &warp, &mut bufs, &[]).unwrap();
        let got: Vec<i128> = bufs[0].to_values().iter().filter_map(Value::as_i128).collect();
        assert_eq!(got, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_alu_dtype_mismatch() {
        let mut b = ProgramBuilder::new();
        let x = b.constant(int(), Literal::Int(1));
        let y = b.constant(DType::Scalar(ScalarType::Int64), Literal::Int(1));
        b.alu(AluOp::Add, int(), &[x, y]);
        let program = b.build();

        let warp = Warp::new([1, 1, 1]);
        let err = run_once(&program, &warp, &mut [], &[]).err();
        assert!(matches!(err, Some(EmuError::TypeMismatch { op: AluOp::Add, .. })));
    }

    #[test]
    fn test_image_store_out_of_range() {
        let img = DType::image(ScalarType::Float32, 4, 4);
        let f4 = DType::vec(ScalarType::Float32, 4);
        let i2 = DType::vec(ScalarType::Int32, 2);
        let mut b = ProgramBuilder::new();
        let out = b.global(img, "img");
        let x = b.constant(int(), Literal::Int(-1));
        let y = b.constant(int(), Literal::Int(0));
        let coord = b.cast(i2, &[x, y]);
        let texel = b.load(f4, &[out, coord]);
        b.store(&[out, coord, texel]);
        let program = b.build();

        let warp = Warp::new([1, 1, 1]);
        let mut bufs = vec![Buffer::new(ScalarType::Float32, 64)];
        let mut ctx = IterationContext::new(program.len(), [0, 0, 0], &warp, MemoryPool::new(&mut bufs), &[]);
        let err = CoreInterpreter::new(&program).run(&mut ctx).err();
        assert!(matches!(err, Some(EmuError::InvalidOperands { .. })));

        let loaded = ctx.values.get(texel).and_then(|v| v.as_vector()).map(|v| v.len());
        assert_eq!(loaded, Some(4));
    }

    #[test]
    fn test_wmma_dispatch() {
        let f2 = DType::vec(ScalarType::Float32, 2);
        let build = |tag: &str| {
            let mut b = ProgramBuilder::new();
            let ones = b.constant(f2, Literal::Float(1.0));
            let zeros = b.constant(f2, Literal::Float(0.0));
            let d = b.wmma(f2, tag, ones, ones, zeros);
            (b.build(), d)
        };

        // all-ones 8x8 operands: every output is the reduction depth
        let (program, d) = build("__metal_wmma<float2,float2,float2>");
        let warp = Warp::new([32, 1, 1]);
        let ctx = run_once(&program, &warp, &mut [], &[]).unwrap();
        let out = ctx.values.get(d).and_then(|v| v.as_vector()).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|lanes| lanes.iter().all(|v| v.as_f64() == 8.0)));

        let (program, _) = build("__cuda_mma_m16n8k16");
        let err = run_once(&program, &warp, &mut [], &[]).err();
        assert!(matches!(err, Some(EmuError::UnimplementedHardwareTarget(_))));
    }
}
