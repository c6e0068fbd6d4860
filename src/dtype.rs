//! DType catalog.
//!
//! Scalar and vector numeric type descriptors used by kernel programs:
//!
//! | Class | Types |
//! |-------|-------|
//! | Boolean | `bool` |
//! | Signed | `int8`, `int16`, `int32`, `int64` |
//! | Unsigned | `uint8`, `uint16`, `uint32`, `uint64` |
//! | Float | `float16`, `float32`, `float64` |
//!
//! A [`DType`] is either a scalar, a short vector of one scalar type
//! (`float32x4`), or a 2-D image of 4-channel texels (`image:float32:HxW`).
//!
//! # Promotion rank
//!
//! Every scalar type has a rank used by the promotion engine:
//! `bool < 8-bit < 16-bit < 32-bit < 64-bit ints < float16 < float32 < float64`.
//! Signed and unsigned integers of the same width share a rank but belong
//! to different classes.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Basic class of a scalar type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
    Bool,
    Signed,
    Unsigned,
    Float,
}

/// Scalar element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
}

impl ScalarType {
    /// All scalar types, in declaration order.
    pub const ALL: [ScalarType; 12] = [
        ScalarType::Bool,
        ScalarType::Int8,
        ScalarType::Int16,
        ScalarType::Int32,
        ScalarType::Int64,
        ScalarType::UInt8,
        ScalarType::UInt16,
        ScalarType::UInt32,
        ScalarType::UInt64,
        ScalarType::Float16,
        ScalarType::Float32,
        ScalarType::Float64,
    ];

    /// Size of one element in bytes.
    pub fn itemsize(self) -> usize {
        match self {
            ScalarType::Bool | ScalarType::Int8 | ScalarType::UInt8 => 1,
            ScalarType::Int16 | ScalarType::UInt16 | ScalarType::Float16 => 2,
            ScalarType::Int32 | ScalarType::UInt32 | ScalarType::Float32 => 4,
            ScalarType::Int64 | ScalarType::UInt64 | ScalarType::Float64 => 8,
        }
    }

    /// Width in bits.
    #[inline]
    pub fn bits(self) -> usize {
        self.itemsize() * 8
    }

    pub fn class(self) -> TypeClass {
        match self {
            ScalarType::Bool => TypeClass::Bool,
            ScalarType::Int8 | ScalarType::Int16 | ScalarType::Int32 | ScalarType::Int64 => {
                TypeClass::Signed
            }
            ScalarType::UInt8 | ScalarType::UInt16 | ScalarType::UInt32 | ScalarType::UInt64 => {
                TypeClass::Unsigned
            }
            ScalarType::Float16 | ScalarType::Float32 | ScalarType::Float64 => TypeClass::Float,
        }
    }

    #[inline]
    pub fn is_bool(self) -> bool {
        self.class() == TypeClass::Bool
    }

    /// Signed or unsigned integer (bool excluded).
    #[inline]
    pub fn is_int(self) -> bool {
        matches!(self.class(), TypeClass::Signed | TypeClass::Unsigned)
    }

    #[inline]
    pub fn is_unsigned(self) -> bool {
        self.class() == TypeClass::Unsigned
    }

    #[inline]
    pub fn is_signed(self) -> bool {
        self.class() == TypeClass::Signed
    }

    #[inline]
    pub fn is_float(self) -> bool {
        self.class() == TypeClass::Float
    }

    /// Promotion rank (see module docs).
    pub fn rank(self) -> u8 {
        match self {
            ScalarType::Bool => 0,
            ScalarType::Int8 | ScalarType::UInt8 => 1,
            ScalarType::Int16 | ScalarType::UInt16 => 2,
            ScalarType::Int32 | ScalarType::UInt32 => 3,
            ScalarType::Int64 | ScalarType::UInt64 => 4,
            ScalarType::Float16 => 5,
            ScalarType::Float32 => 6,
            ScalarType::Float64 => 7,
        }
    }

    /// Widest type of the same class, used as the one-shot overflow upgrade.
    pub fn upgraded(self) -> ScalarType {
        match self.class() {
            TypeClass::Bool => ScalarType::Bool,
            TypeClass::Signed => ScalarType::Int64,
            TypeClass::Unsigned => ScalarType::UInt64,
            TypeClass::Float => ScalarType::Float64,
        }
    }

    /// Inclusive value range for integer types.
    pub fn int_range(self) -> Option<(i128, i128)> {
        let range = match self {
            ScalarType::Int8 => (i8::MIN as i128, i8::MAX as i128),
            ScalarType::Int16 => (i16::MIN as i128, i16::MAX as i128),
            ScalarType::Int32 => (i32::MIN as i128, i32::MAX as i128),
            ScalarType::Int64 => (i64::MIN as i128, i64::MAX as i128),
            ScalarType::UInt8 => (0, u8::MAX as i128),
            ScalarType::UInt16 => (0, u16::MAX as i128),
            ScalarType::UInt32 => (0, u32::MAX as i128),
            ScalarType::UInt64 => (0, u64::MAX as i128),
            _ => return None,
        };
        Some(range)
    }

    /// Largest finite magnitude for float types.
    pub fn float_max(self) -> Option<f64> {
        match self {
            ScalarType::Float16 => Some(half::f16::MAX.to_f64()),
            ScalarType::Float32 => Some(f32::MAX as f64),
            ScalarType::Float64 => Some(f64::MAX),
            _ => None,
        }
    }

    /// Single-character element format code.
    pub fn fmt_char(self) -> char {
        match self {
            ScalarType::Bool => '?',
            ScalarType::Int8 => 'b',
            ScalarType::Int16 => 'h',
            ScalarType::Int32 => 'i',
            ScalarType::Int64 => 'q',
            ScalarType::UInt8 => 'B',
            ScalarType::UInt16 => 'H',
            ScalarType::UInt32 => 'I',
            ScalarType::UInt64 => 'Q',
            ScalarType::Float16 => 'e',
            ScalarType::Float32 => 'f',
            ScalarType::Float64 => 'd',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int8 => "int8",
            ScalarType::Int16 => "int16",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::UInt8 => "uint8",
            ScalarType::UInt16 => "uint16",
            ScalarType::UInt32 => "uint32",
            ScalarType::UInt64 => "uint64",
            ScalarType::Float16 => "float16",
            ScalarType::Float32 => "float32",
            ScalarType::Float64 => "float64",
        }
    }

    fn from_name(s: &str) -> Option<Self> {
        let ty = match s {
            "bool" => ScalarType::Bool,
            "int8" | "char" | "i8" => ScalarType::Int8,
            "int16" | "short" | "i16" => ScalarType::Int16,
            "int32" | "int" | "i32" => ScalarType::Int32,
            "int64" | "long" | "i64" => ScalarType::Int64,
            "uint8" | "uchar" | "u8" => ScalarType::UInt8,
            "uint16" | "ushort" | "u16" => ScalarType::UInt16,
            "uint32" | "uint" | "u32" => ScalarType::UInt32,
            "uint64" | "ulong" | "u64" => ScalarType::UInt64,
            "float16" | "half" | "f16" => ScalarType::Float16,
            "float32" | "float" | "f32" => ScalarType::Float32,
            "float64" | "double" | "f64" => ScalarType::Float64,
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared type of a program value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// A single scalar per lane.
    Scalar(ScalarType),
    /// `count` scalars per lane.
    Vector { scalar: ScalarType, count: usize },
    /// 2-D texture of 4-channel texels, `height` rows of `width` texels.
    Image {
        scalar: ScalarType,
        height: usize,
        width: usize,
    },
}

impl DType {
    /// Build a vector type; a count of 1 yields the scalar type.
    pub fn vec(scalar: ScalarType, count: usize) -> Self {
        if count <= 1 {
            DType::Scalar(scalar)
        } else {
            DType::Vector { scalar, count }
        }
    }

    pub fn image(scalar: ScalarType, height: usize, width: usize) -> Self {
        DType::Image {
            scalar,
            height,
            width,
        }
    }

    /// Element scalar type.
    pub fn scalar(&self) -> ScalarType {
        match *self {
            DType::Scalar(s) => s,
            DType::Vector { scalar, .. } | DType::Image { scalar, .. } => scalar,
        }
    }

    /// Number of scalars per lane (images count as one buffer element).
    pub fn count(&self) -> usize {
        match *self {
            DType::Vector { count, .. } => count,
            _ => 1,
        }
    }

    #[inline]
    pub fn is_vector(&self) -> bool {
        self.count() > 1
    }

    #[inline]
    pub fn is_image(&self) -> bool {
        matches!(self, DType::Image { .. })
    }

    /// `(height, width)` of an image type.
    pub fn image_shape(&self) -> Option<(usize, usize)> {
        match *self {
            DType::Image { height, width, .. } => Some((height, width)),
            _ => None,
        }
    }

    /// Element format used to view a buffer of this type.
    ///
    /// Vector types have no buffer format.
    pub fn fmt(&self) -> Option<ScalarType> {
        match *self {
            DType::Scalar(s) => Some(s),
            DType::Image { scalar, .. } => Some(scalar),
            DType::Vector { .. } => None,
        }
    }

    /// Size in bytes of one value of this type.
    pub fn itemsize(&self) -> usize {
        self.scalar().itemsize() * self.count()
    }
}

impl From<ScalarType> for DType {
    fn from(s: ScalarType) -> Self {
        DType::Scalar(s)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DType::Scalar(s) => write!(f, "{}", s),
            DType::Vector { scalar, count } => write!(f, "{}x{}", scalar, count),
            DType::Image {
                scalar,
                height,
                width,
            } => write!(f, "image:{}:{}x{}", scalar, height, width),
        }
    }
}

/// Error parsing a dtype name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown dtype '{0}'")]
pub struct ParseDTypeError(pub String);

impl FromStr for ScalarType {
    type Err = ParseDTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScalarType::from_name(s.trim()).ok_or_else(|| ParseDTypeError(s.to_string()))
    }
}

impl FromStr for DType {
    type Err = ParseDTypeError;

    /// Accepts `float32`, `int32x4` and `image:float32:4x8` (height x width).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || ParseDTypeError(s.to_string());

        if let Some(rest) = s.strip_prefix("image:") {
            let (scalar, shape) = rest.split_once(':').ok_or_else(err)?;
            let (h, w) = shape.split_once('x').ok_or_else(err)?;
            let scalar = ScalarType::from_name(scalar).ok_or_else(err)?;
            let height = h.parse().map_err(|_| err())?;
            let width = w.parse().map_err(|_| err())?;
            return Ok(DType::image(scalar, height, width));
        }

        if let Some(scalar) = ScalarType::from_name(s) {
            return Ok(DType::Scalar(scalar));
        }

        let (scalar, count) = s.rsplit_once('x').ok_or_else(err)?;
        let scalar = ScalarType::from_name(scalar).ok_or_else(err)?;
        let count: usize = count.parse().map_err(|_| err())?;
        if count == 0 {
            return Err(err());
        }
        Ok(DType::vec(scalar, count))
    }
}
