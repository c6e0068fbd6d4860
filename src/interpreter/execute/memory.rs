//! Memory unit execution.
//!
//! Handles load/store between lane values and buffers.
//!
//! # Addressing
//!
//! - **Linear**: one element at an integer offset. Offsets outside
//!   `[0, len)` fail with [`EmuError::OutOfBounds`], for loads and stores.
//!   Offsets are resolved as `i128`, so every integer type (including
//!   `uint64` above `i64::MAX`) maps to a bounds check. Float offsets are
//!   invalid operands.
//! - **Vector**: sub-element `j` of a vector access lives at `offset + j`.
//! - **Gated**: a lane whose gate is false takes the supplied default and
//!   never touches memory, so its offset is not bounds-checked.
//! - **Image**: a 2-D texture of 4-channel texels. Channel `c` of texel
//!   `(x, y)` is at `x*4 + y*width*4 + c`. Out-of-range image loads read
//!   zero; out-of-range image stores are invalid.
//!
//! # Buffers
//!
//! Lanes hold [`BufferView`]s, small handles into a per-iteration
//! [`MemoryPool`]. Every lane of a register-define holds the same view, so
//! all lanes share one underlying buffer. A view reads and writes the
//! bytes in its own format; the caller's [`Buffer`] keeps its format.

use crate::device::Buffer;
use crate::dtype::ScalarType;
use crate::interpreter::error::{Access, EmuError, EmuResult};
use crate::interpreter::lanes::LaneArray;
use crate::interpreter::value::Value;

/// Which pool slot a view refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferId {
    /// Caller-owned buffer, by binding order.
    Global(usize),
    /// Interpreter-owned buffer for the current iteration.
    Local(usize),
}

/// Handle to a buffer, typed by its element format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferView {
    pub id: BufferId,
    pub fmt: ScalarType,
}

/// Global and local buffers visible to one global-index iteration.
pub struct MemoryPool<'a> {
    global: &'a mut [Buffer],
    next_global: usize,
    local: Vec<Buffer>,
}

impl<'a> MemoryPool<'a> {
    pub fn new(global: &'a mut [Buffer]) -> Self {
        Self {
            global,
            next_global: 0,
            local: Vec::new(),
        }
    }

    /// Bind the next caller buffer as a view of `fmt` elements.
    ///
    /// Returns `None` once every buffer has been bound.
    pub fn bind_global(&mut self, fmt: ScalarType) -> Option<EmuResult<BufferView>> {
        let index = self.next_global;
        let buffer = self.global.get(index)?;
        self.next_global += 1;
        if buffer.fmt() != fmt {
            log::debug!("global buffer {} viewed as {} (stored as {})", index, fmt, buffer.fmt());
        }
        Some(
            buffer
                .check_view(fmt)
                .map(|()| BufferView {
                    id: BufferId::Global(index),
                    fmt,
                })
                .map_err(|e| EmuError::TypeConversion(e.to_string())),
        )
    }

    /// Allocate a zeroed local buffer of `len` elements.
    pub fn alloc_local(&mut self, fmt: ScalarType, len: usize) -> BufferView {
        self.local.push(Buffer::new(fmt, len));
        BufferView {
            id: BufferId::Local(self.local.len() - 1),
            fmt,
        }
    }

    pub fn buffer(&self, id: BufferId) -> Option<&Buffer> {
        match id {
            BufferId::Global(i) => self.global.get(i),
            BufferId::Local(i) => self.local.get(i),
        }
    }

    fn buffer_mut(&mut self, id: BufferId) -> Option<&mut Buffer> {
        match id {
            BufferId::Global(i) => self.global.get_mut(i),
            BufferId::Local(i) => self.local.get_mut(i),
        }
    }

    /// Number of local buffers allocated so far.
    pub fn local_count(&self) -> usize {
        self.local.len()
    }
}

/// Gate and default lanes of a gated load.
#[derive(Debug, Clone, Copy)]
pub struct Gate<'a> {
    pub gate: &'a LaneArray<Value>,
    pub default: &'a LaneArray<Value>,
}

/// Memory unit for load/store operations.
pub struct MemoryUnit;

impl MemoryUnit {
    /// Bounds-checked linear read.
    pub fn read(pool: &MemoryPool<'_>, view: BufferView, index: i128) -> EmuResult<Value> {
        let buffer = Self::resolve(pool, view, Access::Load)?;
        let slot = Self::slot(buffer, view, index, Access::Load)?;
        buffer.read_as(view.fmt, slot).ok_or(EmuError::OutOfBounds {
            access: Access::Load,
            index,
            len: buffer.len_as(view.fmt),
        })
    }

    /// Bounds-checked linear write.
    pub fn write(pool: &mut MemoryPool<'_>, view: BufferView, index: i128, value: Value) -> EmuResult<()> {
        let buffer = pool
            .buffer_mut(view.id)
            .ok_or_else(|| EmuError::invalid(Access::Store, format!("unbound buffer {:?}", view.id)))?;
        let slot = Self::slot(buffer, view, index, Access::Store)?;
        buffer.write_as(view.fmt, slot, value).map_err(|e| {
            EmuError::TypeConversion(format!("store of {} into {} buffer: {}", value, view.fmt, e))
        })
    }

    /// Load one element per lane at `offset + delta`.
    ///
    /// With a gate, lanes whose gate is false take the default instead.
    pub fn load(
        pool: &MemoryPool<'_>,
        bufs: &LaneArray<BufferView>,
        offsets: &LaneArray<Value>,
        gate: Option<Gate<'_>>,
        delta: i64,
    ) -> EmuResult<LaneArray<Value>> {
        LaneArray::try_from_fn(bufs.len(), |lane| {
            if let Some(g) = gate {
                if !g.gate[lane].truthy() {
                    return Ok(g.default[lane]);
                }
            }
            let index = Self::offset(&offsets[lane], Access::Load)? + i128::from(delta);
            Self::read(pool, bufs[lane], index)
        })
    }

    /// Store one element per lane at `offset + delta`.
    pub fn store(
        pool: &mut MemoryPool<'_>,
        bufs: &LaneArray<BufferView>,
        offsets: &LaneArray<Value>,
        values: &LaneArray<Value>,
        delta: i64,
    ) -> EmuResult<()> {
        for lane in 0..bufs.len() {
            let index = Self::offset(&offsets[lane], Access::Store)? + i128::from(delta);
            Self::write(pool, bufs[lane], index, values[lane])?;
        }
        Ok(())
    }

    /// Load all 4 channels of the texel at `(x, y)` per lane.
    ///
    /// `shape` is `(height, width)`. Texels outside the image read as zero.
    pub fn load_image(
        pool: &MemoryPool<'_>,
        bufs: &LaneArray<BufferView>,
        shape: (usize, usize),
        xs: &LaneArray<Value>,
        ys: &LaneArray<Value>,
    ) -> EmuResult<Vec<LaneArray<Value>>> {
        (0..4)
            .map(|channel| {
                LaneArray::try_from_fn(bufs.len(), |lane| {
                    let x = Self::offset(&xs[lane], Access::Load)?;
                    let y = Self::offset(&ys[lane], Access::Load)?;
                    match texel_offset(shape, x, y, channel) {
                        Some(index) => Self::read(pool, bufs[lane], index),
                        None => Ok(Value::zero(bufs[lane].fmt)),
                    }
                })
            })
            .collect()
    }

    /// Store 4 channels per lane into the texel at `(x, y)`.
    pub fn store_image(
        pool: &mut MemoryPool<'_>,
        bufs: &LaneArray<BufferView>,
        shape: (usize, usize),
        xs: &LaneArray<Value>,
        ys: &LaneArray<Value>,
        channels: &[LaneArray<Value>],
    ) -> EmuResult<()> {
        if channels.len() != 4 {
            return Err(EmuError::invalid(
                Access::Store,
                format!("image store needs 4 channels, got {}", channels.len()),
            ));
        }
        for (channel, values) in channels.iter().enumerate() {
            for lane in 0..bufs.len() {
                let x = Self::offset(&xs[lane], Access::Store)?;
                let y = Self::offset(&ys[lane], Access::Store)?;
                let index = texel_offset(shape, x, y, channel).ok_or_else(|| {
                    EmuError::invalid(
                        Access::Store,
                        format!("image coordinate ({}, {}) outside {}x{}", x, y, shape.0, shape.1),
                    )
                })?;
                Self::write(pool, bufs[lane], index, values[lane])?;
            }
        }
        Ok(())
    }

    fn resolve<'p>(pool: &'p MemoryPool<'_>, view: BufferView, access: Access) -> EmuResult<&'p Buffer> {
        pool.buffer(view.id)
            .ok_or_else(|| EmuError::invalid(access, format!("unbound buffer {:?}", view.id)))
    }

    /// Element slot of `index` within the view, or `OutOfBounds`.
    fn slot(buffer: &Buffer, view: BufferView, index: i128, access: Access) -> EmuResult<usize> {
        let len = buffer.len_as(view.fmt);
        usize::try_from(index)
            .ok()
            .filter(|&slot| slot < len)
            .ok_or(EmuError::OutOfBounds { access, index, len })
    }

    fn offset(value: &Value, access: Access) -> EmuResult<i128> {
        value
            .as_i128()
            .ok_or_else(|| EmuError::invalid(access, format!("offset {} is not an integer", value)))
    }
}

/// Linear index of a texel channel, or `None` outside the image.
fn texel_offset(shape: (usize, usize), x: i128, y: i128, channel: usize) -> Option<i128> {
    let (height, width) = shape;
    let (height, width) = (height as i128, width as i128);
    if x < 0 || x >= width || y < 0 || y >= height {
        return None;
    }
    Some(x * 4 + y * width * 4 + channel as i128)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequential(fmt: ScalarType, len: usize) -> Buffer {
        let values: Vec<Value> = (0..len as i32).map(Value::i32).collect();
        Buffer::from_values(fmt, &values).unwrap()
    }

    fn ints(values: &[i32]) -> LaneArray<Value> {
        LaneArray::from_vec(values.iter().map(|&v| Value::i32(v)).collect())
    }

    #[test]
    fn test_linear_load_out_of_bounds() {
        let mut global = vec![sequential(ScalarType::Int32, 5)];
        let mut pool = MemoryPool::new(&mut global);
        let view = pool.bind_global(ScalarType::Int32).unwrap().unwrap();

        assert_eq!(MemoryUnit::read(&pool, view, 4), Ok(Value::i32(4)));
        assert_eq!(
            MemoryUnit::read(&pool, view, 10),
            Err(EmuError::OutOfBounds {
                access: Access::Load,
                index: 10,
                len: 5
            })
        );
        assert!(matches!(
            MemoryUnit::read(&pool, view, -1),
            Err(EmuError::OutOfBounds { .. })
        ));
        assert!(matches!(
            MemoryUnit::write(&mut pool, view, 5, Value::i32(0)),
            Err(EmuError::OutOfBounds {
                access: Access::Store,
                ..
            })
        ));
    }

    #[test]
    fn test_uint64_offset_past_i64_max() {
        let mut global = vec![sequential(ScalarType::Int32, 5)];
        let mut pool = MemoryPool::new(&mut global);
        let view = pool.bind_global(ScalarType::Int32).unwrap().unwrap();
        let bufs = LaneArray::splat(1, view);
        let big = 1u64 << 63;
        let offsets = LaneArray::splat(1, Value::u64(big));

        assert_eq!(
            MemoryUnit::load(&pool, &bufs, &offsets, None, 0),
            Err(EmuError::OutOfBounds {
                access: Access::Load,
                index: big as i128,
                len: 5
            })
        );
        // delta past the end of i64 still lands on a bounds check
        let max = LaneArray::splat(1, Value::u64(u64::MAX));
        let values = ints(&[1]);
        assert!(matches!(
            MemoryUnit::store(&mut pool, &bufs, &max, &values, i64::MAX),
            Err(EmuError::OutOfBounds {
                access: Access::Store,
                ..
            })
        ));
        let floats = LaneArray::splat(1, Value::f32(1.0));
        assert!(matches!(
            MemoryUnit::load(&pool, &bufs, &floats, None, 0),
            Err(EmuError::InvalidOperands { .. })
        ));
    }

    #[test]
    fn test_view_does_not_retype_buffer() {
        let mut global = vec![Buffer::new(ScalarType::UInt8, 8)];
        let mut pool = MemoryPool::new(&mut global);
        let view = pool.bind_global(ScalarType::Float32).unwrap().unwrap();
        assert_eq!(view.fmt, ScalarType::Float32);
        MemoryUnit::write(&mut pool, view, 1, Value::f32(1.0)).unwrap();
        assert_eq!(MemoryUnit::read(&pool, view, 1), Ok(Value::f32(1.0)));
        assert!(matches!(
            MemoryUnit::read(&pool, view, 2),
            Err(EmuError::OutOfBounds { len: 2, .. })
        ));
        drop(pool);

        assert_eq!(global[0].fmt(), ScalarType::UInt8);
        assert_eq!(global[0].len(), 8);
        assert_eq!(&global[0].as_bytes()[4..], &1.0f32.to_le_bytes());

        let mut global = vec![Buffer::new(ScalarType::UInt8, 6)];
        let mut pool = MemoryPool::new(&mut global);
        assert!(matches!(
            pool.bind_global(ScalarType::Float32),
            Some(Err(EmuError::TypeConversion(_)))
        ));
    }

    #[test]
    fn test_bind_global_in_order() {
        let mut global = vec![Buffer::new(ScalarType::Int32, 1), Buffer::new(ScalarType::Float32, 1)];
        let mut pool = MemoryPool::new(&mut global);
        let a = pool.bind_global(ScalarType::Int32).unwrap().unwrap();
        let b = pool.bind_global(ScalarType::Float32).unwrap().unwrap();
        assert_eq!(a.id, BufferId::Global(0));
        assert_eq!(b.id, BufferId::Global(1));
        assert!(pool.bind_global(ScalarType::Int32).is_none());
    }

    #[test]
    fn test_gated_load_uses_default() {
        let mut global = vec![sequential(ScalarType::Int32, 4)];
        let mut pool = MemoryPool::new(&mut global);
        let view = pool.bind_global(ScalarType::Int32).unwrap().unwrap();
        let bufs = LaneArray::splat(3, view);

        // lane 2 is out of range but gated off
        let offsets = ints(&[1, 3, 99]);
        let gate = LaneArray::from_vec(vec![Value::TRUE, Value::TRUE, Value::FALSE]);
        let default = ints(&[-1, -1, -7]);
        let out = MemoryUnit::load(
            &pool,
            &bufs,
            &offsets,
            Some(Gate {
                gate: &gate,
                default: &default,
            }),
            0,
        )
        .unwrap();
        assert_eq!(out.as_slice(), ints(&[1, 3, -7]).as_slice());

        assert!(MemoryUnit::load(&pool, &bufs, &offsets, None, 0).is_err());
    }

    #[test]
    fn test_vector_store_strides() {
        let mut global = vec![Buffer::new(ScalarType::Int32, 8)];
        let mut pool = MemoryPool::new(&mut global);
        let view = pool.bind_global(ScalarType::Int32).unwrap().unwrap();
        let bufs = LaneArray::splat(2, view);
        let offsets = ints(&[0, 4]);
        for j in 0..4 {
            let values = ints(&[10 + j, 20 + j]);
            MemoryUnit::store(&mut pool, &bufs, &offsets, &values, j as i64).unwrap();
        }
        drop(pool);
        let got: Vec<i128> = global[0].to_values().iter().filter_map(|v| v.as_i128()).collect();
        assert_eq!(got, vec![10, 11, 12, 13, 20, 21, 22, 23]);
    }

    #[test]
    fn test_image_load_and_store_bounds() {
        // 4x4 image, 4 channels per texel
        let mut global = vec![sequential(ScalarType::Float32, 64)];
        let mut pool = MemoryPool::new(&mut global);
        let view = pool.bind_global(ScalarType::Float32).unwrap().unwrap();
        let bufs = LaneArray::splat(1, view);

        let texel = MemoryUnit::load_image(&pool, &bufs, (4, 4), &ints(&[-1]), &ints(&[0])).unwrap();
        assert_eq!(texel.len(), 4);
        assert!(texel.iter().all(|c| c[0].as_f64() == 0.0));

        let texel = MemoryUnit::load_image(&pool, &bufs, (4, 4), &ints(&[1]), &ints(&[2])).unwrap();
        let got: Vec<f64> = texel.iter().map(|c| c[0].as_f64()).collect();
        assert_eq!(got, vec![36.0, 37.0, 38.0, 39.0]);

        let channels = vec![LaneArray::splat(1, Value::f32(1.0)); 4];
        let err = MemoryUnit::store_image(&mut pool, &bufs, (4, 4), &ints(&[-1]), &ints(&[0]), &channels);
        assert!(matches!(err, Err(EmuError::InvalidOperands { .. })));

        MemoryUnit::store_image(&mut pool, &bufs, (4, 4), &ints(&[3]), &ints(&[3]), &channels).unwrap();
        assert_eq!(MemoryUnit::read(&pool, view, 63), Ok(Value::f32(1.0)));
    }

    #[test]
    fn test_local_buffers_are_zeroed() {
        let mut global: Vec<Buffer> = Vec::new();
        let mut pool = MemoryPool::new(&mut global);
        let view = pool.alloc_local(ScalarType::Float32, 16);
        assert_eq!(view.id, BufferId::Local(0));
        assert_eq!(MemoryUnit::read(&pool, view, 15), Ok(Value::f32(0.0)));
        MemoryUnit::write(&mut pool, view, 15, Value::f32(2.0)).unwrap();
        assert_eq!(MemoryUnit::read(&pool, view, 15), Ok(Value::f32(2.0)));
        assert_eq!(pool.local_count(), 1);
    }

    #[test]
    fn test_store_conversion_error() {
        let mut global = vec![Buffer::new(ScalarType::UInt8, 1)];
        let mut pool = MemoryPool::new(&mut global);
        let view = pool.bind_global(ScalarType::UInt8).unwrap().unwrap();
        let err = MemoryUnit::write(&mut pool, view, 0, Value::i32(-3));
        assert!(matches!(err, Err(EmuError::TypeConversion(_))));
    }
}
