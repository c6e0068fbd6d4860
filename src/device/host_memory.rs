//! Host memory: typed byte buffers and the allocator contract.
//!
//! Global buffers live outside the interpreter. A caller allocates them
//! through an [`Allocator`], fills them with `copyin`, binds them to a
//! launch, and reads results back with `copyout`. The interpreter itself
//! only ever sees [`Buffer`]s.
//!
//! # Element codec
//!
//! Elements are stored little-endian in the buffer's format. Floats are
//! rounded to the element width on write (`float16` via `half`).
//!
//! # Usage
//!
//! ```
//! use uop_emu::device::{Allocator, HostAllocator};
//! use uop_emu::dtype::ScalarType;
//!
//! let mut alloc = HostAllocator::new();
//! let mut buf = alloc.alloc(ScalarType::Int32, 2);
//! alloc.copyin(&mut buf, &[7, 0, 0, 0, 9, 0, 0, 0]).unwrap();
//!
//! let mut out = vec![0u8; 8];
//! alloc.copyout(&mut out, &buf).unwrap();
//! assert_eq!(out[4], 9);
//! ```

use byteorder::{ByteOrder, LittleEndian};
use half::f16;
use thiserror::Error;

use crate::dtype::ScalarType;
use crate::interpreter::value::{ConvertError, Value};

/// Error type for host copies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CopyError {
    /// Source and destination byte sizes differ.
    #[error("copy size mismatch: buffer holds {buffer} bytes, host side has {host}")]
    SizeMismatch { buffer: usize, host: usize },

    /// Raw bytes do not divide into whole elements.
    #[error("{bytes} bytes is not a whole number of {fmt} elements")]
    Ragged { bytes: usize, fmt: ScalarType },
}

/// A raw byte region viewed as elements of one scalar format.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    fmt: ScalarType,
    data: Vec<u8>,
}

impl Buffer {
    /// Zero-filled buffer of `len` elements.
    pub fn new(fmt: ScalarType, len: usize) -> Self {
        Self {
            fmt,
            data: vec![0u8; len * fmt.itemsize()],
        }
    }

    pub fn from_bytes(fmt: ScalarType, data: Vec<u8>) -> Result<Self, CopyError> {
        if data.len() % fmt.itemsize() != 0 {
            return Err(CopyError::Ragged {
                bytes: data.len(),
                fmt,
            });
        }
        Ok(Self { fmt, data })
    }

    /// Buffer holding `values`, each converted to `fmt`.
    pub fn from_values(fmt: ScalarType, values: &[Value]) -> Result<Self, ConvertError> {
        let mut buf = Self::new(fmt, values.len());
        for (i, v) in values.iter().enumerate() {
            buf.write(i, *v)?;
        }
        Ok(buf)
    }

    /// Element format.
    #[inline]
    pub fn fmt(&self) -> ScalarType {
        self.fmt
    }

    /// Check that the bytes split evenly into `fmt` elements.
    pub fn check_view(&self, fmt: ScalarType) -> Result<(), CopyError> {
        if self.data.len() % fmt.itemsize() != 0 {
            return Err(CopyError::Ragged {
                bytes: self.data.len(),
                fmt,
            });
        }
        Ok(())
    }

    /// Length in elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len_as(self.fmt)
    }

    /// Length in elements when the bytes are viewed as `fmt`.
    #[inline]
    pub fn len_as(&self, fmt: ScalarType) -> usize {
        self.data.len() / fmt.itemsize()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Element at `index`, or `None` past the end.
    pub fn read(&self, index: usize) -> Option<Value> {
        self.read_as(self.fmt, index)
    }

    /// Element at `index` with the bytes viewed as `fmt`.
    pub fn read_as(&self, fmt: ScalarType, index: usize) -> Option<Value> {
        let size = fmt.itemsize();
        let start = index.checked_mul(size)?;
        let bytes = self.data.get(start..start.checked_add(size)?)?;
        Some(decode(fmt, bytes))
    }

    /// Write `value` at `index`, converting it to the buffer format.
    ///
    /// Writes past the end are dropped; callers bounds-check first.
    pub fn write(&mut self, index: usize, value: Value) -> Result<(), ConvertError> {
        self.write_as(self.fmt, index, value)
    }

    /// Write `value` at `index` with the bytes viewed as `fmt`.
    ///
    /// The buffer keeps its own format.
    pub fn write_as(&mut self, fmt: ScalarType, index: usize, value: Value) -> Result<(), ConvertError> {
        let size = fmt.itemsize();
        let Some(start) = index.checked_mul(size) else {
            return Ok(());
        };
        match self.data.get_mut(start..start.saturating_add(size)) {
            Some(slot) => encode(fmt, value, slot),
            None => Ok(()),
        }
    }

    /// Every element, in order.
    pub fn to_values(&self) -> Vec<Value> {
        self.data
            .chunks_exact(self.fmt.itemsize())
            .map(|bytes| decode(self.fmt, bytes))
            .collect()
    }

    /// Hexdump for debugging, 16 bytes per line.
    pub fn hexdump(&self) -> String {
        let mut result = String::new();
        for (i, chunk) in self.data.chunks(16).enumerate() {
            result.push_str(&format!("{:08x}:", i * 16));
            for byte in chunk {
                result.push_str(&format!(" {:02x}", byte));
            }
            result.push('\n');
        }
        result
    }
}

fn decode(fmt: ScalarType, bytes: &[u8]) -> Value {
    let int = |v: i128| Value::from_i128(v, fmt).unwrap_or(Value::zero(fmt));
    match fmt {
        ScalarType::Bool => Value::bool(bytes[0] != 0),
        ScalarType::Int8 => int(bytes[0] as i8 as i128),
        ScalarType::Int16 => int(LittleEndian::read_i16(bytes) as i128),
        ScalarType::Int32 => int(LittleEndian::read_i32(bytes) as i128),
        ScalarType::Int64 => int(LittleEndian::read_i64(bytes) as i128),
        ScalarType::UInt8 => int(bytes[0] as i128),
        ScalarType::UInt16 => int(LittleEndian::read_u16(bytes) as i128),
        ScalarType::UInt32 => int(LittleEndian::read_u32(bytes) as i128),
        ScalarType::UInt64 => int(LittleEndian::read_u64(bytes) as i128),
        ScalarType::Float16 => Value::float(f16::from_bits(LittleEndian::read_u16(bytes)).to_f64(), fmt),
        ScalarType::Float32 => Value::float(LittleEndian::read_f32(bytes) as f64, fmt),
        ScalarType::Float64 => Value::float(LittleEndian::read_f64(bytes), fmt),
    }
}

fn encode(fmt: ScalarType, value: Value, out: &mut [u8]) -> Result<(), ConvertError> {
    // An integer slot never silently truncates a float.
    if fmt.is_int() && value.dtype().is_float() {
        return Err(ConvertError::Incompatible {
            value: value.to_string(),
            to: fmt,
        });
    }
    let v = value.convert(fmt)?;
    let int = v.as_i128().unwrap_or_default();
    match fmt {
        ScalarType::Bool => out[0] = v.truthy() as u8,
        ScalarType::Int8 => out[0] = int as i8 as u8,
        ScalarType::Int16 => LittleEndian::write_i16(out, int as i16),
        ScalarType::Int32 => LittleEndian::write_i32(out, int as i32),
        ScalarType::Int64 => LittleEndian::write_i64(out, int as i64),
        ScalarType::UInt8 => out[0] = int as u8,
        ScalarType::UInt16 => LittleEndian::write_u16(out, int as u16),
        ScalarType::UInt32 => LittleEndian::write_u32(out, int as u32),
        ScalarType::UInt64 => LittleEndian::write_u64(out, int as u64),
        ScalarType::Float16 => LittleEndian::write_u16(out, f16::from_f64(v.as_f64()).to_bits()),
        ScalarType::Float32 => LittleEndian::write_f32(out, v.as_f64() as f32),
        ScalarType::Float64 => LittleEndian::write_f64(out, v.as_f64()),
    }
    Ok(())
}

/// Buffer allocation and host copies.
pub trait Allocator {
    /// Allocate a zeroed buffer of `len` elements.
    fn alloc(&mut self, fmt: ScalarType, len: usize) -> Buffer;

    /// Copy host bytes into a buffer. Sizes must match exactly.
    fn copyin(&mut self, dest: &mut Buffer, src: &[u8]) -> Result<(), CopyError>;

    /// Copy a buffer out to host bytes. Sizes must match exactly.
    fn copyout(&mut self, dest: &mut [u8], src: &Buffer) -> Result<(), CopyError>;
}

/// Allocator backed by ordinary host memory.
#[derive(Debug, Default)]
pub struct HostAllocator {
    allocations: u64,
    total_bytes_written: u64,
    total_bytes_read: u64,
}

impl HostAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffers handed out.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Get total bytes copied in.
    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    /// Get total bytes copied out.
    pub fn total_bytes_read(&self) -> u64 {
        self.total_bytes_read
    }
}

impl Allocator for HostAllocator {
    fn alloc(&mut self, fmt: ScalarType, len: usize) -> Buffer {
        self.allocations += 1;
        log::debug!("alloc {} x {} ({} bytes)", len, fmt, len * fmt.itemsize());
        Buffer::new(fmt, len)
    }

    fn copyin(&mut self, dest: &mut Buffer, src: &[u8]) -> Result<(), CopyError> {
        if dest.size() != src.len() {
            return Err(CopyError::SizeMismatch {
                buffer: dest.size(),
                host: src.len(),
            });
        }
        dest.as_bytes_mut().copy_from_slice(src);
        self.total_bytes_written += src.len() as u64;
        Ok(())
    }

    fn copyout(&mut self, dest: &mut [u8], src: &Buffer) -> Result<(), CopyError> {
        if dest.len() != src.size() {
            return Err(CopyError::SizeMismatch {
                buffer: src.size(),
                host: dest.len(),
            });
        }
        dest.copy_from_slice(src.as_bytes());
        self.total_bytes_read += dest.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_zeroed() {
        let buf = Buffer::new(ScalarType::Float32, 4);
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.size(), 16);
        assert!(buf.to_values().iter().all(|v| v.as_f64() == 0.0));
    }

    #[test]
    fn test_element_codec() {
        let mut buf = Buffer::new(ScalarType::Int16, 2);
        buf.write(1, Value::i32(-2)).unwrap();
        assert_eq!(buf.as_bytes(), &[0, 0, 0xfe, 0xff]);
        assert_eq!(buf.read(1).unwrap().as_i128(), Some(-2));
        assert_eq!(buf.read(1).unwrap().dtype(), ScalarType::Int16);
        assert!(buf.read(2).is_none());
    }

    #[test]
    fn test_float_rounding_on_write() {
        let mut buf = Buffer::new(ScalarType::Float16, 1);
        buf.write(0, Value::f64(1.0 / 3.0)).unwrap();
        let v = buf.read(0).unwrap().as_f64();
        assert_eq!(v, f16::from_f64(1.0 / 3.0).to_f64());

        let mut buf = Buffer::new(ScalarType::Float32, 1);
        buf.write(0, Value::i32(3)).unwrap();
        assert_eq!(buf.read(0), Some(Value::f32(3.0)));
    }

    #[test]
    fn test_write_rejects_bad_values() {
        let mut buf = Buffer::new(ScalarType::UInt8, 1);
        assert!(matches!(
            buf.write(0, Value::i32(300)),
            Err(ConvertError::Overflow { .. })
        ));
        let mut buf = Buffer::new(ScalarType::Int32, 1);
        assert!(matches!(
            buf.write(0, Value::f32(1.5)),
            Err(ConvertError::Incompatible { .. })
        ));
    }

    #[test]
    fn test_copy_size_mismatch() {
        let mut alloc = HostAllocator::new();
        let mut buf = alloc.alloc(ScalarType::Int32, 2);
        assert_eq!(
            alloc.copyin(&mut buf, &[1, 2, 3]),
            Err(CopyError::SizeMismatch { buffer: 8, host: 3 })
        );
        let mut out = [0u8; 4];
        assert!(alloc.copyout(&mut out, &buf).is_err());
        assert_eq!(alloc.allocations(), 1);
        assert_eq!(alloc.total_bytes_written(), 0);
    }

    #[test]
    fn test_round_trip_through_allocator() {
        let mut alloc = HostAllocator::new();
        let src = Buffer::from_values(
            ScalarType::Float32,
            &[Value::f32(1.5), Value::f32(-2.0)],
        )
        .unwrap();
        let mut dst = alloc.alloc(ScalarType::Float32, 2);
        alloc.copyin(&mut dst, src.as_bytes()).unwrap();
        assert_eq!(dst, src);
        assert_eq!(alloc.total_bytes_written(), 8);
    }

    #[test]
    fn test_typed_view_leaves_format_alone() {
        let mut buf = Buffer::from_values(ScalarType::UInt8, &[Value::u32(1), Value::u32(0)]).unwrap();
        assert_eq!(buf.len_as(ScalarType::Int16), 1);
        assert_eq!(buf.read_as(ScalarType::Int16, 0).unwrap().as_i128(), Some(1));
        assert!(buf.read_as(ScalarType::Int16, 1).is_none());

        buf.write_as(ScalarType::Int16, 0, Value::i32(-2)).unwrap();
        assert_eq!(buf.as_bytes(), &[0xfe, 0xff]);
        assert_eq!(buf.fmt(), ScalarType::UInt8);
        assert_eq!(buf.len(), 2);

        assert!(buf.check_view(ScalarType::Int16).is_ok());
        assert!(matches!(
            buf.check_view(ScalarType::Int32),
            Err(CopyError::Ragged { bytes: 2, .. })
        ));
    }

    #[test]
    fn test_ragged_bytes() {
        assert!(matches!(
            Buffer::from_bytes(ScalarType::Int32, vec![0; 6]),
            Err(CopyError::Ragged { .. })
        ));
    }

    #[test]
    fn test_hexdump() {
        let buf = Buffer::from_bytes(ScalarType::UInt8, (0u8..18).collect()).unwrap();
        let dump = buf.hexdump();
        assert!(dump.starts_with("00000000: 00 01 02"));
        assert!(dump.contains("00000010: 10 11"));
    }
}
