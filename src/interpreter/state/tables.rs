//! Side tables indexed by instruction position.

use crate::dtype::DType;
use crate::interpreter::lanes::LaneValues;

/// Per-instruction lane values for one global-index iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueTable {
    slots: Vec<Option<LaneValues>>,
}

impl ValueTable {
    pub fn new(program_len: usize) -> Self {
        Self {
            slots: vec![None; program_len],
        }
    }

    #[inline]
    pub fn get(&self, pc: usize) -> Option<&LaneValues> {
        self.slots.get(pc).and_then(Option::as_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, pc: usize) -> Option<&mut LaneValues> {
        self.slots.get_mut(pc).and_then(Option::as_mut)
    }

    #[inline]
    pub fn contains(&self, pc: usize) -> bool {
        self.get(pc).is_some()
    }

    pub fn insert(&mut self, pc: usize, values: LaneValues) {
        if pc >= self.slots.len() {
            self.slots.resize(pc + 1, None);
        }
        self.slots[pc] = Some(values);
    }

    pub fn remove(&mut self, pc: usize) -> Option<LaneValues> {
        self.slots.get_mut(pc).and_then(Option::take)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolved dtype of every executed value-producing instruction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeTable {
    slots: Vec<Option<DType>>,
}

impl TypeTable {
    pub fn new(program_len: usize) -> Self {
        Self {
            slots: vec![None; program_len],
        }
    }

    #[inline]
    pub fn get(&self, pc: usize) -> Option<DType> {
        self.slots.get(pc).copied().flatten()
    }

    pub fn insert(&mut self, pc: usize, dtype: DType) {
        if pc >= self.slots.len() {
            self.slots.resize(pc + 1, None);
        }
        self.slots[pc] = Some(dtype);
    }
}
