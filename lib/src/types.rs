//! Atomic and user-defined type descriptors.
//!
//! Atomic types have fixed ids 1..=12 and need no group context. User types
//! (compound, enum, vlen, opaque) live in the file's type arena, are owned by
//! the group that defined them, and are shared by reference count.

use crate::consts::{FIRST_USER_TYPE_ID, MAX_ATOMIC_TYPE};
use crate::errors::{CatalogError, Result};
use crate::index::{Entity, NcIndex, ObjHeader};
use crate::model::{BackendHandle, GroupId};
use serde::{Deserialize, Serialize};

pub type TypeId = usize;

/// "Not a type".
pub const NAT: TypeId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomicType {
    Byte,
    Char,
    Short,
    Int,
    Float,
    Double,
    UByte,
    UShort,
    UInt,
    Int64,
    UInt64,
    String,
}

impl AtomicType {
    pub const ALL: [AtomicType; 12] = [
        AtomicType::Byte,
        AtomicType::Char,
        AtomicType::Short,
        AtomicType::Int,
        AtomicType::Float,
        AtomicType::Double,
        AtomicType::UByte,
        AtomicType::UShort,
        AtomicType::UInt,
        AtomicType::Int64,
        AtomicType::UInt64,
        AtomicType::String,
    ];

    pub fn from_id(id: TypeId) -> Option<Self> {
        if id == NAT || id > MAX_ATOMIC_TYPE {
            return None;
        }
        Some(Self::ALL[id - 1])
    }

    pub fn id(self) -> TypeId {
        self as usize + 1
    }

    pub fn name(self) -> &'static str {
        match self {
            AtomicType::Byte => "byte",
            AtomicType::Char => "char",
            AtomicType::Short => "short",
            AtomicType::Int => "int",
            AtomicType::Float => "float",
            AtomicType::Double => "double",
            AtomicType::UByte => "ubyte",
            AtomicType::UShort => "ushort",
            AtomicType::UInt => "uint",
            AtomicType::Int64 => "int64",
            AtomicType::UInt64 => "uint64",
            AtomicType::String => "string",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    /// In-memory size; `None` for strings.
    pub fn size(self) -> Option<usize> {
        match self {
            AtomicType::Byte | AtomicType::Char | AtomicType::UByte => Some(1),
            AtomicType::Short | AtomicType::UShort => Some(2),
            AtomicType::Int | AtomicType::UInt | AtomicType::Float => Some(4),
            AtomicType::Double | AtomicType::Int64 | AtomicType::UInt64 => Some(8),
            AtomicType::String => None,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            AtomicType::Byte
                | AtomicType::Short
                | AtomicType::Int
                | AtomicType::Int64
                | AtomicType::UByte
                | AtomicType::UShort
                | AtomicType::UInt
                | AtomicType::UInt64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, AtomicType::Float | AtomicType::Double)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Inclusive integer range, for integer types.
    pub fn int_range(self) -> Option<(i128, i128)> {
        Some(match self {
            AtomicType::Byte => (i8::MIN as i128, i8::MAX as i128),
            AtomicType::Short => (i16::MIN as i128, i16::MAX as i128),
            AtomicType::Int => (i32::MIN as i128, i32::MAX as i128),
            AtomicType::Int64 => (i64::MIN as i128, i64::MAX as i128),
            AtomicType::UByte => (0, u8::MAX as i128),
            AtomicType::UShort => (0, u16::MAX as i128),
            AtomicType::UInt => (0, u32::MAX as i128),
            AtomicType::UInt64 => (0, u64::MAX as i128),
            _ => return None,
        })
    }
}

pub fn is_atomic(id: TypeId) -> bool {
    AtomicType::from_id(id).is_some()
}

pub fn is_user_type_id(id: TypeId) -> bool {
    id >= FIRST_USER_TYPE_ID
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    #[default]
    Native,
    Little,
    Big,
}

impl Endianness {
    pub fn to_u8(self) -> u8 {
        match self {
            Endianness::Native => 0,
            Endianness::Little => 1,
            Endianness::Big => 2,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Endianness::Little,
            2 => Endianness::Big,
            _ => Endianness::Native,
        }
    }
}

/// One member of a compound type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub hdr: ObjHeader,
    pub type_id: TypeId,
    pub offset: usize,
    /// Array shape of the field; empty for scalars.
    pub dims: Vec<usize>,
}

impl Entity for Field {
    fn hdr(&self) -> &ObjHeader {
        &self.hdr
    }

    fn hdr_mut(&mut self) -> &mut ObjHeader {
        &mut self.hdr
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeClass {
    Compound { fields: NcIndex<Field> },
    Enum { base: AtomicType, members: Vec<EnumMember> },
    Vlen { base: TypeId },
    Opaque,
}

/// Coarse classification returned by `type_class`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClassTag {
    Atomic(AtomicType),
    Compound,
    Enum,
    Vlen,
    Opaque,
}

impl TypeClass {
    pub fn tag(&self) -> TypeClassTag {
        match self {
            TypeClass::Compound { .. } => TypeClassTag::Compound,
            TypeClass::Enum { .. } => TypeClassTag::Enum,
            TypeClass::Vlen { .. } => TypeClassTag::Vlen,
            TypeClass::Opaque => TypeClassTag::Opaque,
        }
    }

    /// Types this class references (field types or the vlen base).
    pub fn referenced_types(&self) -> Vec<TypeId> {
        match self {
            TypeClass::Compound { fields } => fields.iter().map(|f| f.type_id).collect(),
            TypeClass::Vlen { base } => vec![*base],
            TypeClass::Enum { .. } | TypeClass::Opaque => Vec::new(),
        }
    }
}

/// A user-defined type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    pub hdr: ObjHeader,
    pub container: GroupId,
    /// One reference is held by the defining group; the rest are users.
    pub rc: usize,
    pub endianness: Endianness,
    /// Fixed in-memory size; 0 for vlen.
    pub size: usize,
    /// True once the type has been pushed to the backend.
    pub committed: bool,
    pub dirty: bool,
    pub class: TypeClass,
    pub backend: Option<BackendHandle>,
}

impl Entity for TypeInfo {
    fn hdr(&self) -> &ObjHeader {
        &self.hdr
    }

    fn hdr_mut(&mut self) -> &mut ObjHeader {
        &mut self.hdr
    }
}

impl TypeInfo {
    pub fn users(&self) -> usize {
        self.rc.saturating_sub(1)
    }
}

/// Field description used when defining a compound type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub type_id: TypeId,
    pub offset: usize,
    pub dims: Vec<usize>,
}

impl FieldSpec {
    pub fn scalar(name: impl Into<String>, type_id: TypeId, offset: usize) -> Self {
        FieldSpec {
            name: name.into(),
            type_id,
            offset,
            dims: Vec::new(),
        }
    }
}

/// What to build in `define_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpec {
    Compound { size: usize, fields: Vec<FieldSpec> },
    Enum { base: AtomicType, members: Vec<(String, i64)> },
    Vlen { base: TypeId },
    Opaque { size: usize },
}

/// Resolved view of any type id.
#[derive(Debug, Clone, Copy)]
pub enum TypeDesc<'a> {
    Atomic(AtomicType),
    User(&'a TypeInfo),
}

impl TypeDesc<'_> {
    pub fn id(&self) -> TypeId {
        match self {
            TypeDesc::Atomic(t) => t.id(),
            TypeDesc::User(info) => info.hdr.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TypeDesc::Atomic(t) => t.name(),
            TypeDesc::User(info) => &info.hdr.name,
        }
    }

    pub fn class(&self) -> TypeClassTag {
        match self {
            TypeDesc::Atomic(t) => TypeClassTag::Atomic(*t),
            TypeDesc::User(info) => info.class.tag(),
        }
    }

    /// Byte size for fixed-size types.
    pub fn size(&self) -> Result<usize> {
        match self {
            TypeDesc::Atomic(t) => t.size().ok_or(CatalogError::VariableSize(t.id())),
            TypeDesc::User(info) => match info.class {
                TypeClass::Vlen { .. } => Err(CatalogError::VariableSize(info.hdr.id)),
                _ => Ok(info.size),
            },
        }
    }

    pub fn is_fixed_size(&self) -> bool {
        self.size().is_ok()
    }

    /// The atomic type values of this type are stored as, if any.
    /// Enums store their base type.
    pub fn storage_atomic(&self) -> Option<AtomicType> {
        match self {
            TypeDesc::Atomic(t) => Some(*t),
            TypeDesc::User(info) => match &info.class {
                TypeClass::Enum { base, .. } => Some(*base),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_ids_roundtrip() {
        for t in AtomicType::ALL {
            assert_eq!(AtomicType::from_id(t.id()), Some(t));
            assert_eq!(AtomicType::from_name(t.name()), Some(t));
        }
        assert_eq!(AtomicType::Byte.id(), 1);
        assert_eq!(AtomicType::String.id(), 12);
        assert!(AtomicType::from_id(NAT).is_none());
        assert!(AtomicType::from_id(13).is_none());
        assert!(!is_atomic(FIRST_USER_TYPE_ID));
    }

    #[test]
    fn string_has_no_fixed_size() {
        assert!(matches!(
            TypeDesc::Atomic(AtomicType::String).size(),
            Err(CatalogError::VariableSize(12))
        ));
        assert_eq!(TypeDesc::Atomic(AtomicType::Int64).size().unwrap(), 8);
    }

    #[test]
    fn integer_ranges() {
        assert_eq!(AtomicType::Short.int_range(), Some((-32768, 32767)));
        assert_eq!(AtomicType::UInt64.int_range().unwrap().1, u64::MAX as i128);
        assert!(AtomicType::Double.int_range().is_none());
        assert!(AtomicType::Char.int_range().is_none());
    }
}
