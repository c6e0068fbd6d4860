//! Per-lane storage for lock-step warp execution.
//!
//! Every value in the interpreter exists once per lane. A [`LaneArray`] is
//! a fixed-length array whose length is the warp size, established once per
//! global-index iteration; constructors take the length explicitly, so a
//! lane array can only be built with the warp's own lane count.
//!
//! Vector-typed values hold one lane array per sub-element
//! (`count x warp_size`), mirroring how a SIMT register file lays out a
//! `float4` across lanes.

use std::ops::{Index, IndexMut};

use smallvec::SmallVec;

use crate::interpreter::execute::memory::BufferView;
use crate::interpreter::value::Value;

/// Lanes stored inline before spilling to the heap (one hardware warp).
pub const INLINE_LANES: usize = 32;

/// One element per lane.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneArray<T>(SmallVec<[T; INLINE_LANES]>);

impl<T: Clone> LaneArray<T> {
    /// The same element on every lane.
    pub fn splat(lanes: usize, value: T) -> Self {
        Self(SmallVec::from_elem(value, lanes))
    }
}

impl<T> LaneArray<T> {
    pub fn from_fn(lanes: usize, f: impl FnMut(usize) -> T) -> Self {
        Self((0..lanes).map(f).collect())
    }

    pub fn try_from_fn<E>(
        lanes: usize,
        f: impl FnMut(usize) -> Result<T, E>,
    ) -> Result<Self, E> {
        (0..lanes)
            .map(f)
            .collect::<Result<SmallVec<[T; INLINE_LANES]>, E>>()
            .map(Self)
    }

    pub fn from_vec(values: Vec<T>) -> Self {
        Self(SmallVec::from_vec(values))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, lane: usize) -> Option<&T> {
        self.0.get(lane)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.0.iter_mut()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> LaneArray<U> {
        LaneArray(self.0.iter().map(f).collect())
    }

    pub fn try_map<U, E>(&self, f: impl FnMut(&T) -> Result<U, E>) -> Result<LaneArray<U>, E> {
        self.0
            .iter()
            .map(f)
            .collect::<Result<SmallVec<[U; INLINE_LANES]>, E>>()
            .map(LaneArray)
    }
}

impl<T> Index<usize> for LaneArray<T> {
    type Output = T;

    fn index(&self, lane: usize) -> &T {
        &self.0[lane]
    }
}

impl<T> IndexMut<usize> for LaneArray<T> {
    fn index_mut(&mut self, lane: usize) -> &mut T {
        &mut self.0[lane]
    }
}

impl<'a, T> IntoIterator for &'a LaneArray<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Value Table entry for one instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum LaneValues {
    /// One scalar per lane.
    Scalar(LaneArray<Value>),
    /// `count` sub-elements, each one scalar per lane.
    Vector(Vec<LaneArray<Value>>),
    /// Buffer bound on every lane.
    Buffer(LaneArray<BufferView>),
}

impl LaneValues {
    pub fn as_scalar(&self) -> Option<&LaneArray<Value>> {
        match self {
            LaneValues::Scalar(lanes) => Some(lanes),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[LaneArray<Value>]> {
        match self {
            LaneValues::Vector(elems) => Some(elems),
            _ => None,
        }
    }

    pub fn as_buffers(&self) -> Option<&LaneArray<BufferView>> {
        match self {
            LaneValues::Buffer(lanes) => Some(lanes),
            _ => None,
        }
    }

    /// Sub-element `j` of a vector, or the scalar lanes themselves.
    pub fn element(&self, j: usize) -> Option<&LaneArray<Value>> {
        match self {
            LaneValues::Scalar(lanes) => Some(lanes),
            LaneValues::Vector(elems) => elems.get(j),
            LaneValues::Buffer(_) => None,
        }
    }

    /// Number of lanes held.
    pub fn lane_count(&self) -> usize {
        match self {
            LaneValues::Scalar(lanes) => lanes.len(),
            LaneValues::Vector(elems) => elems.first().map_or(0, |e| e.len()),
            LaneValues::Buffer(lanes) => lanes.len(),
        }
    }
}

/// Enumerate every point of a 3-D iteration space.
///
/// The last dimension is the outermost axis: points are produced with
/// `z` slowest and `x` fastest. Each point is returned as `[x, y, z]`.
pub fn grid_points(dims: [usize; 3]) -> impl Iterator<Item = [usize; 3]> {
    let [dx, dy, dz] = dims;
    (0..dz).flat_map(move |z| (0..dy).flat_map(move |y| (0..dx).map(move |x| [x, y, z])))
}

/// The lanes of one global-index iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warp {
    local_size: [usize; 3],
    lanes: Vec<[usize; 3]>,
}

impl Warp {
    pub fn new(local_size: [usize; 3]) -> Self {
        Self {
            local_size,
            lanes: grid_points(local_size).collect(),
        }
    }

    /// Number of lanes (product of local dimensions).
    #[inline]
    pub fn size(&self) -> usize {
        self.lanes.len()
    }

    pub fn local_size(&self) -> [usize; 3] {
        self.local_size
    }

    /// Local coordinate `[x, y, z]` of a lane.
    pub fn coord(&self, lane: usize) -> [usize; 3] {
        self.lanes[lane]
    }
}
