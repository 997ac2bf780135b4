use super::{NcFile, PutOutcome};
use crate::consts::*;
use crate::convert::{convert, Converted};
use crate::errors::{CatalogError, Result};
use crate::index::{ObjHeader, Sort};
use crate::model::*;
use crate::names::{check_att_name, check_name};
use crate::types::*;
use crate::values::NcValues;
use log::{debug, warn};

impl NcFile {
    pub fn add_group(&mut self, parent: GroupId, name: &str) -> Result<GroupId> {
        self.check_define()?;
        let name = check_name(name)?;
        self.check_dup_name(parent, &name)?;
        let gid = self.graph.next_grpid();
        if gid > MAX_GROUP_ID {
            return Err(CatalogError::Invalid(format!(
                "too many groups (limit {})",
                MAX_GROUP_ID
            )));
        }
        self.group_mut(parent)?
            .children
            .add(ObjHeader::new(Sort::Group, name.clone(), gid), Some(gid))?;
        self.graph
            .groups
            .push(Some(Group::new(name.clone(), gid, Some(parent))));
        self.touch();
        debug!("Defined group {} ({})", self.graph.full_name(gid), gid);
        Ok(gid)
    }

    /// Defines a dimension in `gid`. `None` makes it unlimited.
    pub fn add_dimension(&mut self, gid: GroupId, name: &str, len: Option<usize>) -> Result<DimId> {
        self.check_define()?;
        let name = check_name(name)?;
        if self.find_group(gid)?.dims.contains(&name) {
            return Err(CatalogError::DuplicateName(name));
        }
        if len == Some(0) {
            return Err(CatalogError::Invalid(format!(
                "fixed dimension {} needs a nonzero length",
                name
            )));
        }
        let dimid = self.graph.next_dimid();
        self.group_mut(gid)?
            .dims
            .add(ObjHeader::new(Sort::Dimension, name.clone(), dimid), Some(dimid))?;
        let len_value = len.unwrap_or(0);
        self.graph.dims.push(Some(Dimension {
            hdr: ObjHeader::new(Sort::Dimension, name.clone(), dimid),
            container: gid,
            len: len_value,
            unlimited: len.is_none(),
            extended: false,
            too_long: len_value as u64 > u32::MAX as u64,
            dirty: true,
            created: false,
            backend: None,
        }));
        self.touch();
        debug!("Defined dimension {} ({}) len {:?}", name, dimid, len);
        Ok(dimid)
    }

    pub fn add_variable(
        &mut self,
        gid: GroupId,
        name: &str,
        type_id: TypeId,
        dimids: &[DimId],
    ) -> Result<VarId> {
        self.check_define()?;
        let name = check_name(name)?;
        self.check_dup_name(gid, &name)?;
        self.resolve_type(type_id)?;
        if dimids.len() > MAX_VAR_DIMS {
            return Err(CatalogError::Invalid(format!(
                "{} dimensions exceeds the limit of {}",
                dimids.len(),
                MAX_VAR_DIMS
            )));
        }
        let mut has_unlimited = false;
        for d in dimids {
            has_unlimited |= self.find_dim(gid, *d)?.0.unlimited;
        }
        let var = Variable {
            hdr: ObjHeader::new(Sort::Variable, name.clone(), 0),
            container: gid,
            dimids: dimids.to_vec(),
            type_id,
            atts: Default::default(),
            flags: VarFlags {
                is_new: true,
                dirty: true,
                meta_read: true,
                atts_read: true,
                coords_read: true,
                ..Default::default()
            },
            storage: StorageHints {
                contiguous: !has_unlimited,
                chunk_cache: self.default_chunk_cache,
                ..Default::default()
            },
            fill: FillPolicy {
                no_fill: !self.fill_mode.is_fill(),
                value: None,
            },
            parallel_access: ParallelAccess::default(),
            endianness: Endianness::Native,
            data: Vec::new(),
            backend: None,
        };
        let varid = self.group_mut(gid)?.vars.add(var, None)?;
        self.acquire(type_id)?;
        if !self.coord_dims_of(gid, varid).is_empty() {
            self.var_mut(gid, varid)?.flags.dimscale = true;
        }
        self.touch();
        debug!("Defined variable {} ({}/{})", name, gid, varid);
        Ok(varid)
    }

    /// Converts `values` for storage as `type_id`, returning the element count.
    fn prepare_values(&self, type_id: TypeId, values: NcValues) -> Result<(Converted, usize)> {
        let desc = self.resolve_type(type_id)?;
        match desc.class() {
            TypeClassTag::Atomic(AtomicType::String) => match values {
                NcValues::Text(v) => {
                    let n = v.len();
                    Ok((
                        Converted {
                            values: NcValues::Text(v),
                            range_error: false,
                        },
                        n,
                    ))
                }
                _ => Err(CatalogError::BadType(type_id)),
            },
            TypeClassTag::Atomic(t) => {
                let c = convert(&values, t, self.range_mode)?;
                let n = c.values.len();
                Ok((c, n))
            }
            TypeClassTag::Enum => {
                let base = desc.storage_atomic().ok_or(CatalogError::BadType(type_id))?;
                let c = convert(&values, base, self.range_mode)?;
                let n = c.values.len();
                Ok((c, n))
            }
            TypeClassTag::Vlen => match values {
                NcValues::Vlen(v) => {
                    let n = v.len();
                    Ok((
                        Converted {
                            values: NcValues::Vlen(v),
                            range_error: false,
                        },
                        n,
                    ))
                }
                _ => Err(CatalogError::BadType(type_id)),
            },
            TypeClassTag::Compound | TypeClassTag::Opaque => match values {
                NcValues::Raw(bytes) => {
                    let size = desc.size()?;
                    if size == 0 || bytes.len() % size != 0 {
                        return Err(CatalogError::Invalid(format!(
                            "{} bytes is not a whole number of {} elements",
                            bytes.len(),
                            desc.name()
                        )));
                    }
                    let n = bytes.len() / size;
                    Ok((
                        Converted {
                            values: NcValues::Raw(bytes),
                            range_error: false,
                        },
                        n,
                    ))
                }
                _ => Err(CatalogError::BadType(type_id)),
            },
        }
    }

    /// Creates or replaces an attribute of a group (`varid == None`) or
    /// variable. Values are converted to `type_id` under the session's range
    /// mode. Writing `_FillValue` on a variable also sets its fill value.
    pub fn put_att(
        &mut self,
        gid: GroupId,
        varid: Option<VarId>,
        name: &str,
        type_id: TypeId,
        values: NcValues,
    ) -> Result<PutOutcome> {
        self.check_define()?;
        let name = check_att_name(name)?;
        self.att_index(gid, varid)?;
        let is_fill = varid.is_some() && name == FILL_VALUE_ATT;
        if let (true, Some(v)) = (is_fill, varid) {
            let var = self.var(gid, v)?;
            if var.type_id != type_id {
                return Err(CatalogError::BadType(type_id));
            }
            if var.flags.created {
                return Err(CatalogError::LateDefinition);
            }
        }
        let (converted, len) = self.prepare_values(type_id, values)?;
        if is_fill && len != 1 {
            return Err(CatalogError::Invalid(format!(
                "{} must hold exactly one value",
                FILL_VALUE_ATT
            )));
        }
        if converted.range_error {
            warn!("Attribute {} had out-of-range values replaced by fill", name);
        }

        let container = AttContainer::new(gid, varid);
        let old_type = self.att_index(gid, varid)?.lookup(&name).map(|a| a.type_id);
        self.acquire(type_id)?;
        let index = self.att_index_mut(gid, varid)?;
        let id = match index.position(&name) {
            Some(pos) => {
                let att = index
                    .get_mut(pos)
                    .ok_or_else(|| CatalogError::AttNotFound(name.clone()))?;
                att.type_id = type_id;
                att.len = len;
                att.data = converted.values.clone();
                att.dirty = true;
                pos
            }
            None => index.add(
                Attribute::new(name.clone(), container, type_id, len, converted.values.clone()),
                None,
            )?,
        };
        if let Some(t) = old_type {
            self.release(t)?;
        }
        if let Some(v) = varid {
            let var = self.var_mut(gid, v)?;
            var.flags.attr_dirty = true;
            if is_fill {
                var.fill.value = Some(converted.values);
                var.flags.fill_val_changed = true;
                var.flags.dirty = true;
            }
        }
        self.touch();
        Ok(PutOutcome {
            id,
            range_error: converted.range_error,
        })
    }

    /// Writes a text attribute of type char.
    pub fn put_att_text(
        &mut self,
        gid: GroupId,
        varid: Option<VarId>,
        name: &str,
        text: &str,
    ) -> Result<PutOutcome> {
        self.put_att(gid, varid, name, AtomicType::Char.id(), NcValues::text(text))
    }

    /// Reads an attribute converted to `t` under the session's range mode.
    pub fn get_att_as(
        &self,
        gid: GroupId,
        varid: Option<VarId>,
        name: &str,
        t: AtomicType,
    ) -> Result<Converted> {
        convert(&self.find_att(gid, varid, name)?.data, t, self.range_mode)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::errors::{CatalogError, ModeViolation};
    use crate::file::NcFile;
    use crate::options::RangeMode;
    use crate::types::AtomicType;
    use crate::values::NcValues;

    fn session() -> NcFile {
        NcFile::create(Config::memory()).unwrap()
    }

    #[test]
    fn ids_are_dense_and_names_unique() {
        let mut f = session();
        let x = f.add_dimension(0, "x", Some(4)).unwrap();
        let t = f.add_dimension(0, "time", None).unwrap();
        assert_eq!((x, t), (0, 1));
        assert!(matches!(
            f.add_dimension(0, "x", Some(2)),
            Err(CatalogError::DuplicateName(_))
        ));
        let a = f.add_variable(0, "a", AtomicType::Int.id(), &[t, x]).unwrap();
        let b = f.add_variable(0, "b", AtomicType::Float.id(), &[x]).unwrap();
        assert_eq!((a, b), (0, 1));
        assert!(f.add_group(0, "a").is_err());
        let g = f.add_group(0, "sub").unwrap();
        assert!(matches!(
            f.add_variable(0, "sub", AtomicType::Int.id(), &[]),
            Err(CatalogError::DuplicateName(_))
        ));
        // the same name is fine in a different group
        assert_eq!(f.add_variable(g, "a", AtomicType::Int.id(), &[x]).unwrap(), 0);
        assert!(f.var(0, 0).unwrap().flags.is_new);
        assert!(!f.var(0, 0).unwrap().storage.contiguous);
        assert!(f.var(0, 1).unwrap().storage.contiguous);
    }

    #[test]
    fn dimensions_are_not_visible_laterally() {
        let mut f = session();
        let a = f.add_group(0, "a").unwrap();
        let b = f.add_group(0, "b").unwrap();
        let d = f.add_dimension(a, "n", Some(2)).unwrap();
        assert!(f.find_dim(a, d).is_ok());
        assert!(matches!(f.find_dim(b, d), Err(CatalogError::BadDim(_))));
        assert!(matches!(
            f.add_variable(b, "v", AtomicType::Int.id(), &[d]),
            Err(CatalogError::BadDim(_))
        ));
        let inner = f.add_group(a, "inner").unwrap();
        assert_eq!(f.find_dim_by_name(inner, "n").unwrap(), d);
        assert!(f.find_dim_by_name(b, "n").unwrap_err().is_not_found());
    }

    #[test]
    fn rejected_names() {
        let mut f = session();
        assert!(matches!(
            f.add_dimension(0, "a/b", Some(1)),
            Err(CatalogError::BadName { .. })
        ));
        assert!(matches!(
            f.put_att_text(0, None, "_NCProperties", "x"),
            Err(CatalogError::BadName { .. })
        ));
        assert!(f.add_variable(0, "v", 999, &[]).unwrap_err().is_not_found());
    }

    #[test]
    fn canonically_equal_names_collide() {
        let mut f = session();
        let d = f.add_dimension(0, "\u{e9}t\u{e9}", Some(1)).unwrap();
        assert!(matches!(
            f.add_dimension(0, "e\u{301}te\u{301}", Some(2)),
            Err(CatalogError::DuplicateName(_))
        ));
        assert_eq!(f.find_dim_by_name(0, "e\u{301}te\u{301}").unwrap(), d);
        f.add_variable(0, "caf\u{e9}", AtomicType::Int.id(), &[]).unwrap();
        assert!(matches!(
            f.add_variable(0, "cafe\u{301}", AtomicType::Int.id(), &[]),
            Err(CatalogError::DuplicateName(_))
        ));
        f.put_att_text(0, None, "n\u{303}", "x").unwrap();
        assert_eq!(f.find_att(0, None, "\u{f1}").unwrap().data.as_text().unwrap(), "x");
    }

    #[test]
    fn attributes_convert_and_replace() {
        let mut f = session();
        let out = f
            .put_att(0, None, "scale", AtomicType::Short.id(), NcValues::Int64(vec![100]))
            .unwrap();
        assert_eq!(out.id, 0);
        assert_eq!(f.find_att(0, None, "scale").unwrap().data, NcValues::Short(vec![100]));
        assert!(matches!(
            f.put_att(0, None, "big", AtomicType::Short.id(), NcValues::Int64(vec![i64::MAX])),
            Err(CatalogError::Range)
        ));
        assert!(f.find_att(0, None, "big").is_err());

        f.set_range_mode(RangeMode::Lenient);
        let out = f
            .put_att(0, None, "big", AtomicType::Short.id(), NcValues::Int64(vec![i64::MAX, 1]))
            .unwrap();
        assert!(out.range_error);
        assert_eq!(
            f.find_att(0, None, "big").unwrap().data,
            NcValues::Short(vec![-32767, 1])
        );

        f.put_att_text(0, None, "scale", "replaced").unwrap();
        assert_eq!(f.att_count(0, None).unwrap(), 2);
        let att = f.find_att(0, None, "scale").unwrap();
        assert_eq!(att.hdr.id, 0);
        assert_eq!(att.data.as_text().unwrap(), "replaced");
        assert_eq!(att.len, 8);
        assert!(matches!(
            f.put_att(0, None, "c", AtomicType::Int.id(), NcValues::text("x")),
            Err(CatalogError::CharConversion)
        ));
    }

    #[test]
    fn fill_value_attribute_sets_variable_fill() {
        let mut f = session();
        let v = f.add_variable(0, "v", AtomicType::Int.id(), &[]).unwrap();
        assert!(matches!(
            f.put_att(0, Some(v), "_FillValue", AtomicType::Short.id(), NcValues::Short(vec![1])),
            Err(CatalogError::BadType(_))
        ));
        f.put_att(0, Some(v), "_FillValue", AtomicType::Int.id(), NcValues::Int(vec![-1]))
            .unwrap();
        let var = f.var(0, v).unwrap();
        assert_eq!(var.fill.value, Some(NcValues::Int(vec![-1])));
        assert!(var.flags.fill_val_changed);
    }

    #[test]
    fn provenance_is_readable_but_not_counted() {
        let f = session();
        assert_eq!(f.att_count(0, None).unwrap(), 0);
        assert!(f.find_att(0, None, "_NCProperties").is_ok());
    }

    #[test]
    fn adds_outside_define_mode_fail() {
        let mut f = session();
        f.enddef().unwrap();
        assert!(matches!(
            f.add_group(0, "g"),
            Err(CatalogError::WrongMode(ModeViolation::NotInDefine))
        ));
    }
}
