//! Typed value arrays carried by attributes, fill values and variable data,
//! plus the little-endian byte codec for fixed-size atomic types.

use crate::consts::*;
use crate::errors::{CatalogError, Result};
use crate::types::AtomicType;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum NcValues {
    Byte(Vec<i8>),
    Char(Vec<u8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    UByte(Vec<u8>),
    UShort(Vec<u16>),
    UInt(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    /// NC_STRING elements.
    Text(Vec<String>),
    /// One byte run per vlen element, in the base type's encoding.
    Vlen(Vec<Vec<u8>>),
    /// Raw bytes of opaque or compound elements.
    Raw(Vec<u8>),
}

macro_rules! le_encode {
    ($v:expr) => {
        $v.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<u8>>()
    };
}

macro_rules! le_decode {
    ($bytes:expr, $t:ty) => {
        $bytes
            .chunks_exact(std::mem::size_of::<$t>())
            .map(|c| {
                let mut b = [0u8; std::mem::size_of::<$t>()];
                b.copy_from_slice(c);
                <$t>::from_le_bytes(b)
            })
            .collect::<Vec<$t>>()
    };
}

impl NcValues {
    /// Number of elements; for `Raw` this is the byte count.
    pub fn len(&self) -> usize {
        match self {
            NcValues::Byte(v) => v.len(),
            NcValues::Char(v) => v.len(),
            NcValues::Short(v) => v.len(),
            NcValues::Int(v) => v.len(),
            NcValues::Float(v) => v.len(),
            NcValues::Double(v) => v.len(),
            NcValues::UByte(v) => v.len(),
            NcValues::UShort(v) => v.len(),
            NcValues::UInt(v) => v.len(),
            NcValues::Int64(v) => v.len(),
            NcValues::UInt64(v) => v.len(),
            NcValues::Text(v) => v.len(),
            NcValues::Vlen(v) => v.len(),
            NcValues::Raw(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The atomic type of the elements, if they are atomic.
    pub fn atomic_type(&self) -> Option<AtomicType> {
        Some(match self {
            NcValues::Byte(_) => AtomicType::Byte,
            NcValues::Char(_) => AtomicType::Char,
            NcValues::Short(_) => AtomicType::Short,
            NcValues::Int(_) => AtomicType::Int,
            NcValues::Float(_) => AtomicType::Float,
            NcValues::Double(_) => AtomicType::Double,
            NcValues::UByte(_) => AtomicType::UByte,
            NcValues::UShort(_) => AtomicType::UShort,
            NcValues::UInt(_) => AtomicType::UInt,
            NcValues::Int64(_) => AtomicType::Int64,
            NcValues::UInt64(_) => AtomicType::UInt64,
            NcValues::Text(_) => AtomicType::String,
            NcValues::Vlen(_) | NcValues::Raw(_) => return None,
        })
    }

    pub fn text(s: &str) -> Self {
        NcValues::Char(s.as_bytes().to_vec())
    }

    /// Char data as a string, trailing NULs dropped.
    pub fn as_text(&self) -> Option<String> {
        match self {
            NcValues::Char(bytes) => {
                let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            _ => None,
        }
    }

    /// Little-endian bytes of fixed-size data; `None` for strings and vlens.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        Some(match self {
            NcValues::Byte(v) => v.iter().map(|x| *x as u8).collect(),
            NcValues::Char(v) | NcValues::UByte(v) | NcValues::Raw(v) => v.clone(),
            NcValues::Short(v) => le_encode!(v),
            NcValues::Int(v) => le_encode!(v),
            NcValues::Float(v) => le_encode!(v),
            NcValues::Double(v) => le_encode!(v),
            NcValues::UShort(v) => le_encode!(v),
            NcValues::UInt(v) => le_encode!(v),
            NcValues::Int64(v) => le_encode!(v),
            NcValues::UInt64(v) => le_encode!(v),
            NcValues::Text(_) | NcValues::Vlen(_) => return None,
        })
    }

    /// Decodes little-endian bytes as elements of `t`.
    pub fn from_bytes(bytes: &[u8], t: AtomicType) -> Result<Self> {
        let size = t.size().ok_or(CatalogError::VariableSize(t.id()))?;
        if bytes.len() % size != 0 {
            return Err(CatalogError::Invalid(format!(
                "{} bytes is not a whole number of {} elements",
                bytes.len(),
                t.name()
            )));
        }
        Ok(match t {
            AtomicType::Byte => NcValues::Byte(bytes.iter().map(|b| *b as i8).collect()),
            AtomicType::Char => NcValues::Char(bytes.to_vec()),
            AtomicType::UByte => NcValues::UByte(bytes.to_vec()),
            AtomicType::Short => NcValues::Short(le_decode!(bytes, i16)),
            AtomicType::Int => NcValues::Int(le_decode!(bytes, i32)),
            AtomicType::Float => NcValues::Float(le_decode!(bytes, f32)),
            AtomicType::Double => NcValues::Double(le_decode!(bytes, f64)),
            AtomicType::UShort => NcValues::UShort(le_decode!(bytes, u16)),
            AtomicType::UInt => NcValues::UInt(le_decode!(bytes, u32)),
            AtomicType::Int64 => NcValues::Int64(le_decode!(bytes, i64)),
            AtomicType::UInt64 => NcValues::UInt64(le_decode!(bytes, u64)),
            AtomicType::String => return Err(CatalogError::VariableSize(t.id())),
        })
    }

    /// `n` copies of the default fill value of `t`.
    pub fn fill(t: AtomicType, n: usize) -> Self {
        match t {
            AtomicType::Byte => NcValues::Byte(vec![FILL_BYTE; n]),
            AtomicType::Char => NcValues::Char(vec![FILL_CHAR; n]),
            AtomicType::Short => NcValues::Short(vec![FILL_SHORT; n]),
            AtomicType::Int => NcValues::Int(vec![FILL_INT; n]),
            AtomicType::Float => NcValues::Float(vec![FILL_FLOAT; n]),
            AtomicType::Double => NcValues::Double(vec![FILL_DOUBLE; n]),
            AtomicType::UByte => NcValues::UByte(vec![FILL_UBYTE; n]),
            AtomicType::UShort => NcValues::UShort(vec![FILL_USHORT; n]),
            AtomicType::UInt => NcValues::UInt(vec![FILL_UINT; n]),
            AtomicType::Int64 => NcValues::Int64(vec![FILL_INT64; n]),
            AtomicType::UInt64 => NcValues::UInt64(vec![FILL_UINT64; n]),
            AtomicType::String => NcValues::Text(vec![FILL_STRING.to_string(); n]),
        }
    }

    /// Short human-readable rendering, used by dumps and logs.
    pub fn render(&self) -> String {
        fn join<T: ToString>(v: &[T]) -> String {
            v.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(", ")
        }
        match self {
            NcValues::Byte(v) => join(v),
            NcValues::Char(_) => format!("{:?}", self.as_text().unwrap_or_default()),
            NcValues::Short(v) => join(v),
            NcValues::Int(v) => join(v),
            NcValues::Float(v) => join(v),
            NcValues::Double(v) => join(v),
            NcValues::UByte(v) => join(v),
            NcValues::UShort(v) => join(v),
            NcValues::UInt(v) => join(v),
            NcValues::Int64(v) => join(v),
            NcValues::UInt64(v) => join(v),
            NcValues::Text(v) => v
                .iter()
                .map(|s| format!("{:?}", s))
                .collect::<Vec<_>>()
                .join(", "),
            NcValues::Vlen(v) => format!("<{} vlen elements>", v.len()),
            NcValues::Raw(v) => format!("<{} bytes>", v.len()),
        }
    }
}
