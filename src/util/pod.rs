//! Storable data kinds and the typed encode/decode trait.
//!
//! Every File entry in a container stores one of a small closed set of
//! kinds: a scalar or an array of a numeric type, or a string. The
//! [`DataKind`] byte is part of the on-disk node record, so the
//! discriminant values are frozen.

use half::f16;
use std::fmt;

use super::{Error, Result};

/// Kind of data held by a File entry, scalar and array variants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DataKind {
    /// Directories and unwritten entries
    #[default]
    Invalid = 0,
    Float = 1,
    FloatArray = 2,
    Double = 3,
    DoubleArray = 4,
    Half = 5,
    HalfArray = 6,
    Int = 7,
    IntArray = 8,
    Int64 = 9,
    Int64Array = 10,
    UInt64 = 11,
    UInt64Array = 12,
    Char = 13,
    CharArray = 14,
    String = 15,
    StringArray = 16,
}

impl DataKind {
    /// Returns true for the array variants.
    #[inline]
    pub const fn is_array(self) -> bool {
        matches!(
            self,
            Self::FloatArray
                | Self::DoubleArray
                | Self::HalfArray
                | Self::IntArray
                | Self::Int64Array
                | Self::UInt64Array
                | Self::CharArray
                | Self::StringArray
        )
    }

    /// The scalar kind underlying an array kind (identity for scalars).
    pub const fn element_kind(self) -> Self {
        match self {
            Self::FloatArray => Self::Float,
            Self::DoubleArray => Self::Double,
            Self::HalfArray => Self::Half,
            Self::IntArray => Self::Int,
            Self::Int64Array => Self::Int64,
            Self::UInt64Array => Self::UInt64,
            Self::CharArray => Self::Char,
            Self::StringArray => Self::String,
            other => other,
        }
    }

    /// The array kind for a scalar kind (identity for arrays).
    pub const fn array_kind(self) -> Self {
        match self {
            Self::Float => Self::FloatArray,
            Self::Double => Self::DoubleArray,
            Self::Half => Self::HalfArray,
            Self::Int => Self::IntArray,
            Self::Int64 => Self::Int64Array,
            Self::UInt64 => Self::UInt64Array,
            Self::Char => Self::CharArray,
            Self::String => Self::StringArray,
            other => other,
        }
    }

    /// Returns the name of this kind as a string.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Float => "float",
            Self::FloatArray => "float[]",
            Self::Double => "double",
            Self::DoubleArray => "double[]",
            Self::Half => "half",
            Self::HalfArray => "half[]",
            Self::Int => "int",
            Self::IntArray => "int[]",
            Self::Int64 => "int64",
            Self::Int64Array => "int64[]",
            Self::UInt64 => "uint64",
            Self::UInt64Array => "uint64[]",
            Self::Char => "char",
            Self::CharArray => "char[]",
            Self::String => "string",
            Self::StringArray => "string[]",
        }
    }

    /// Convert from the on-disk byte value.
    pub const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Float,
            2 => Self::FloatArray,
            3 => Self::Double,
            4 => Self::DoubleArray,
            5 => Self::Half,
            6 => Self::HalfArray,
            7 => Self::Int,
            8 => Self::IntArray,
            9 => Self::Int64,
            10 => Self::Int64Array,
            11 => Self::UInt64,
            12 => Self::UInt64Array,
            13 => Self::Char,
            14 => Self::CharArray,
            15 => Self::String,
            16 => Self::StringArray,
            _ => Self::Invalid,
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Trait for values that can be stored in a container entry.
///
/// Encoding is little-endian on every host. Numeric kinds take a bulk
/// memcpy path on little-endian targets and a per-element conversion on
/// big-endian ones; strings are stored length-prefixed.
pub trait IoData: Sized {
    /// Kind recorded for a scalar entry of this type.
    const SCALAR_KIND: DataKind;
    /// Kind recorded for an array entry of this type.
    const ARRAY_KIND: DataKind;

    /// Append the little-endian encoding of `vals` to `out`.
    fn encode(vals: &[Self], out: &mut Vec<u8>);

    /// Decode exactly `count` values from `bytes`.
    fn decode(bytes: &[u8], count: usize) -> Result<Vec<Self>>;
}

macro_rules! numeric_io_data {
    ($t:ty, $scalar:ident, $array:ident) => {
        impl IoData for $t {
            const SCALAR_KIND: DataKind = DataKind::$scalar;
            const ARRAY_KIND: DataKind = DataKind::$array;

            fn encode(vals: &[Self], out: &mut Vec<u8>) {
                #[cfg(target_endian = "little")]
                {
                    out.extend_from_slice(bytemuck::cast_slice(vals));
                }
                #[cfg(target_endian = "big")]
                {
                    for v in vals {
                        out.extend_from_slice(&v.to_le_bytes());
                    }
                }
            }

            fn decode(bytes: &[u8], count: usize) -> Result<Vec<Self>> {
                let elem = std::mem::size_of::<Self>();
                if bytes.len() < count * elem {
                    return Err(Error::UnexpectedEof(bytes.len() as u64));
                }
                #[cfg(target_endian = "little")]
                {
                    Ok(bytemuck::pod_collect_to_vec(&bytes[..count * elem]))
                }
                #[cfg(target_endian = "big")]
                {
                    let mut out = Vec::with_capacity(count);
                    for chunk in bytes[..count * elem].chunks_exact(elem) {
                        out.push(<$t>::from_le_bytes(chunk.try_into().expect("chunk size")));
                    }
                    Ok(out)
                }
            }
        }
    };
}

numeric_io_data!(f32, Float, FloatArray);
numeric_io_data!(f64, Double, DoubleArray);
numeric_io_data!(f16, Half, HalfArray);
numeric_io_data!(i32, Int, IntArray);
numeric_io_data!(i64, Int64, Int64Array);
numeric_io_data!(u64, UInt64, UInt64Array);
numeric_io_data!(u8, Char, CharArray);

impl IoData for String {
    const SCALAR_KIND: DataKind = DataKind::String;
    const ARRAY_KIND: DataKind = DataKind::StringArray;

    fn encode(vals: &[Self], out: &mut Vec<u8>) {
        for s in vals {
            out.extend_from_slice(&(s.len() as i64).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
    }

    fn decode(bytes: &[u8], count: usize) -> Result<Vec<Self>> {
        let mut out = Vec::with_capacity(count);
        let mut pos = 0usize;
        for _ in 0..count {
            if pos + 8 > bytes.len() {
                return Err(Error::UnexpectedEof(pos as u64));
            }
            let len = i64::from_le_bytes(bytes[pos..pos + 8].try_into().expect("8 bytes")) as usize;
            pos += 8;
            if pos + len > bytes.len() {
                return Err(Error::UnexpectedEof(pos as u64));
            }
            out.push(String::from_utf8(bytes[pos..pos + len].to_vec())?);
            pos += len;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for v in 0..=16u8 {
            let kind = DataKind::from_u8(v);
            assert_eq!(kind as u8, v);
        }
        assert_eq!(DataKind::from_u8(200), DataKind::Invalid);
    }

    #[test]
    fn test_kind_array_mapping() {
        assert_eq!(DataKind::Double.array_kind(), DataKind::DoubleArray);
        assert_eq!(DataKind::DoubleArray.element_kind(), DataKind::Double);
        assert!(DataKind::DoubleArray.is_array());
        assert!(!DataKind::Double.is_array());
        assert_eq!(DataKind::StringArray.element_kind(), DataKind::String);
    }

    #[test]
    fn test_numeric_encode_decode() {
        let vals = vec![1.0f64, -2.5, 3.25];
        let mut buf = Vec::new();
        f64::encode(&vals, &mut buf);
        assert_eq!(buf.len(), 24);
        let back = f64::decode(&buf, 3).unwrap();
        assert_eq!(back, vals);
    }

    #[test]
    fn test_string_encode_decode() {
        let vals = vec!["abc".to_string(), "".to_string(), "défg".to_string()];
        let mut buf = Vec::new();
        String::encode(&vals, &mut buf);
        let back = String::decode(&buf, 3).unwrap();
        assert_eq!(back, vals);
    }

    #[test]
    fn test_decode_truncated() {
        let vals = vec![7i64];
        let mut buf = Vec::new();
        i64::encode(&vals, &mut buf);
        assert!(i64::decode(&buf[..4], 1).is_err());
    }
}
