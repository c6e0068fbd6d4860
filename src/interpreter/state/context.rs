//! State of one global-index iteration.
//!
//! An `IterationContext` is created fresh for every point of the global
//! grid: value and type tables start empty, local buffers are allocated on
//! demand and dropped with the context, and the loop-end table is rebuilt
//! as loop-ends are reached. Only the caller's global buffers outlive it.

use std::collections::HashMap;

use crate::interpreter::execute::MemoryPool;
use crate::interpreter::lanes::Warp;
use crate::interpreter::value::Value;

use super::tables::{TypeTable, ValueTable};

pub struct IterationContext<'a> {
    /// Instruction pointer.
    pc: usize,
    /// Global coordinate `[x, y, z]` of this iteration.
    pub global_idx: [usize; 3],
    pub warp: &'a Warp,
    pub values: ValueTable,
    pub types: TypeTable,
    /// Loop position -> position of its loop-end.
    pub loop_ends: HashMap<usize, usize>,
    pub memory: MemoryPool<'a>,
    vals: &'a [Value],
    next_var: usize,
    /// Instructions executed so far.
    pub instructions: u64,
}

impl<'a> IterationContext<'a> {
    pub fn new(
        program_len: usize,
        global_idx: [usize; 3],
        warp: &'a Warp,
        memory: MemoryPool<'a>,
        vals: &'a [Value],
    ) -> Self {
        Self {
            pc: 0,
            global_idx,
            warp,
            values: ValueTable::new(program_len),
            types: TypeTable::new(program_len),
            loop_ends: HashMap::new(),
            memory,
            vals,
            next_var: 0,
            instructions: 0,
        }
    }

    #[inline]
    pub fn pc(&self) -> usize {
        self.pc
    }

    #[inline]
    pub fn set_pc(&mut self, pc: usize) {
        self.pc = pc;
    }

    #[inline]
    pub fn advance_pc(&mut self) {
        self.pc += 1;
    }

    /// Lanes in the warp.
    #[inline]
    pub fn lanes(&self) -> usize {
        self.warp.size()
    }

    /// Next launch-time scalar parameter, in program order.
    pub fn next_var(&mut self) -> Option<Value> {
        let v = self.vals.get(self.next_var).copied()?;
        self.next_var += 1;
        Some(v)
    }
}
