//! User-defined types and their reference counts.
//!
//! A type's count starts at one for its defining group. Every variable,
//! attribute, compound field and vlen that names the type adds one. A type
//! can only be edited while nothing else uses it and it has not been
//! committed, and it is freed when its count drops to zero.

use super::{NcFile, PendingDelete};
use crate::errors::{CatalogError, EntityKey, Result};
use crate::index::{NcIndex, ObjHeader, Sort};
use crate::model::GroupId;
use crate::names::check_name;
use crate::types::*;
use log::debug;

impl NcFile {
    fn build_field(&self, spec: &FieldSpec, compound_size: usize) -> Result<Field> {
        let name = check_name(&spec.name)?;
        let fsize = self.resolve_type(spec.type_id)?.size()?;
        if spec.dims.iter().any(|d| *d == 0) {
            return Err(CatalogError::Invalid(format!(
                "field {} has a zero-length dimension",
                name
            )));
        }
        let end = spec
            .dims
            .iter()
            .try_fold(fsize, |acc, d| acc.checked_mul(*d))
            .and_then(|bytes| bytes.checked_add(spec.offset));
        if !end.is_some_and(|end| end <= compound_size) {
            return Err(CatalogError::Invalid(format!(
                "field {} does not fit in a {} byte compound",
                name, compound_size
            )));
        }
        Ok(Field {
            hdr: ObjHeader::new(Sort::Field, name, 0),
            type_id: spec.type_id,
            offset: spec.offset,
            dims: spec.dims.clone(),
        })
    }

    fn check_member(base: AtomicType, name: &str, value: i64) -> Result<String> {
        let name = check_name(name)?;
        let (min, max) = base.int_range().ok_or(CatalogError::BadType(base.id()))?;
        if !(min..=max).contains(&(value as i128)) {
            return Err(CatalogError::Range);
        }
        Ok(name)
    }

    fn build_class(&self, spec: TypeSpec) -> Result<(usize, TypeClass)> {
        match spec {
            TypeSpec::Compound { size, fields } => {
                if size == 0 {
                    return Err(CatalogError::Invalid("compound size must be nonzero".into()));
                }
                let mut index = NcIndex::new();
                for f in &fields {
                    index.add(self.build_field(f, size)?, None)?;
                }
                Ok((size, TypeClass::Compound { fields: index }))
            }
            TypeSpec::Enum { base, members } => {
                if !base.is_integer() {
                    return Err(CatalogError::BadType(base.id()));
                }
                let mut out: Vec<EnumMember> = Vec::with_capacity(members.len());
                for (name, value) in members {
                    let name = Self::check_member(base, &name, value)?;
                    if out.iter().any(|m| m.name == name) {
                        return Err(CatalogError::DuplicateName(name));
                    }
                    out.push(EnumMember { name, value });
                }
                let size = base.size().ok_or(CatalogError::BadType(base.id()))?;
                Ok((size, TypeClass::Enum { base, members: out }))
            }
            TypeSpec::Vlen { base } => {
                self.resolve_type(base)?;
                Ok((0, TypeClass::Vlen { base }))
            }
            TypeSpec::Opaque { size } => {
                if size == 0 {
                    return Err(CatalogError::Invalid("opaque size must be nonzero".into()));
                }
                Ok((size, TypeClass::Opaque))
            }
        }
    }

    /// Defines a user type in `gid` and returns its file-global id.
    pub fn define_type(&mut self, gid: GroupId, name: &str, spec: TypeSpec) -> Result<TypeId> {
        self.check_define()?;
        let name = check_name(name)?;
        self.check_dup_name(gid, &name)?;
        let (size, class) = self.build_class(spec)?;
        let id = self.graph.next_typeid();
        for r in class.referenced_types() {
            self.acquire(r)?;
        }
        self.group_mut(gid)?
            .types
            .add(ObjHeader::new(Sort::Type, name.clone(), id), Some(id))?;
        self.graph.types.push(Some(TypeInfo {
            hdr: ObjHeader::new(Sort::Type, name.clone(), id),
            container: gid,
            rc: 1,
            endianness: Endianness::Native,
            size,
            committed: false,
            dirty: true,
            class,
            backend: None,
        }));
        self.touch();
        debug!("Defined type {} ({}) in group {}", name, id, gid);
        Ok(id)
    }

    fn editable_type(&self, type_id: TypeId) -> Result<&TypeInfo> {
        self.check_define()?;
        let info = self
            .graph
            .type_info(type_id)
            .ok_or(CatalogError::BadType(type_id))?;
        if info.committed {
            return Err(CatalogError::TypeDefined(type_id));
        }
        if info.users() > 0 {
            return Err(CatalogError::TypeInUse(type_id));
        }
        Ok(info)
    }

    /// Adds a field to an uncommitted, unused compound type.
    pub fn insert_compound_field(&mut self, type_id: TypeId, spec: FieldSpec) -> Result<()> {
        let info = self.editable_type(type_id)?;
        let TypeClass::Compound { fields } = &info.class else {
            return Err(CatalogError::BadType(type_id));
        };
        if fields.contains(&spec.name) {
            return Err(CatalogError::DuplicateName(spec.name));
        }
        let field = self.build_field(&spec, info.size)?;
        self.acquire(field.type_id)?;
        let info = self
            .graph
            .type_info_mut(type_id)
            .ok_or(CatalogError::BadType(type_id))?;
        if let TypeClass::Compound { fields } = &mut info.class {
            fields.add(field, None)?;
        }
        info.dirty = true;
        self.touch();
        Ok(())
    }

    /// Adds a member to an uncommitted, unused enum type.
    pub fn insert_enum_member(&mut self, type_id: TypeId, name: &str, value: i64) -> Result<()> {
        let info = self.editable_type(type_id)?;
        let TypeClass::Enum { base, members } = &info.class else {
            return Err(CatalogError::BadType(type_id));
        };
        let name = Self::check_member(*base, name, value)?;
        if members.iter().any(|m| m.name == name) {
            return Err(CatalogError::DuplicateName(name));
        }
        let info = self
            .graph
            .type_info_mut(type_id)
            .ok_or(CatalogError::BadType(type_id))?;
        if let TypeClass::Enum { members, .. } = &mut info.class {
            members.push(EnumMember { name, value });
        }
        info.dirty = true;
        self.touch();
        Ok(())
    }

    /// Takes a reference to a type. Atomic types are not counted.
    pub(crate) fn acquire(&mut self, type_id: TypeId) -> Result<()> {
        if is_atomic(type_id) {
            return Ok(());
        }
        self.graph
            .type_info_mut(type_id)
            .ok_or(CatalogError::BadType(type_id))?
            .rc += 1;
        Ok(())
    }

    /// Drops a reference to a type, freeing it when none remain.
    pub(crate) fn release(&mut self, type_id: TypeId) -> Result<()> {
        if is_atomic(type_id) {
            return Ok(());
        }
        let info = self
            .graph
            .type_info_mut(type_id)
            .ok_or(CatalogError::BadType(type_id))?;
        info.rc = info.rc.saturating_sub(1);
        if info.rc == 0 {
            self.free_type(type_id)?;
        }
        Ok(())
    }

    /// Removes a type from its group and the type arena, then releases the
    /// types it referenced.
    pub(crate) fn free_type(&mut self, type_id: TypeId) -> Result<()> {
        let info = self
            .graph
            .types
            .get_mut(type_id)
            .and_then(Option::take)
            .ok_or(CatalogError::BadType(type_id))?;
        if let Some(group) = self.graph.group_mut(info.container) {
            if let Some(pos) = group.types.find_id(type_id) {
                group.types.remove(pos);
            }
        }
        if info.committed {
            self.pending_deletes.push(PendingDelete {
                key: EntityKey::Type(type_id),
                handle: info.backend,
            });
        }
        debug!("Freed type {} ({})", info.hdr.name, type_id);
        for r in info.class.referenced_types() {
            self.release(r)?;
        }
        Ok(())
    }

    /// Deletes a user type nothing else references.
    pub fn delete_type(&mut self, type_id: TypeId) -> Result<()> {
        self.check_define()?;
        if is_atomic(type_id) {
            return Err(CatalogError::Invalid(format!(
                "atomic type {} cannot be deleted",
                type_id
            )));
        }
        let info = self
            .graph
            .type_info(type_id)
            .ok_or(CatalogError::BadType(type_id))?;
        if info.users() > 0 {
            return Err(CatalogError::TypeInUse(type_id));
        }
        self.free_type(type_id)?;
        self.touch();
        Ok(())
    }
}
