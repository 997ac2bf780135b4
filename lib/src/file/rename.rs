//! Renames. Coordinate-variable status is derived from names, so renaming a
//! dimension or variable recomputes it and records the transition on the
//! affected variables for the backend.

use super::NcFile;
use crate::errors::{CatalogError, Result};
use crate::model::*;
use crate::names::{check_att_name, check_name, find_reserved};
use log::debug;

impl NcFile {
    /// Applies coordinate status changes: `before` lost it, `after` gained it.
    fn mark_coord_change(
        &mut self,
        before: Option<(GroupId, VarId)>,
        after: Option<(GroupId, VarId)>,
    ) -> Result<()> {
        if before == after {
            return Ok(());
        }
        if let Some((g, v)) = before {
            let var = self.var_mut(g, v)?;
            var.flags.was_coord_var = true;
            var.flags.dimscale = false;
            var.flags.dirty = true;
        }
        if let Some((g, v)) = after {
            let var = self.var_mut(g, v)?;
            var.flags.became_coord_var = true;
            var.flags.dimscale = true;
            var.flags.dirty = true;
        }
        Ok(())
    }

    pub fn rename_group(&mut self, gid: GroupId, new_name: &str) -> Result<()> {
        self.check_define()?;
        let group = self.find_group(gid)?;
        let parent = group
            .parent
            .ok_or_else(|| CatalogError::Invalid("the root group cannot be renamed".into()))?;
        if group.hdr.name == new_name {
            return Ok(());
        }
        let name = check_name(new_name)?;
        self.check_dup_name(parent, &name)?;
        let p = self.group_mut(parent)?;
        let pos = p
            .children
            .find_id(gid)
            .ok_or(CatalogError::BadGroupId(gid))?;
        p.children.rename(pos, &name)?;
        let group = self.group_mut(gid)?;
        group.hdr.set_name(name);
        group.dirty = true;
        self.touch();
        Ok(())
    }

    pub fn rename_dim(&mut self, dimid: DimId, new_name: &str) -> Result<()> {
        self.check_define()?;
        let name = check_name(new_name)?;
        let gid = self
            .graph
            .dim(dimid)
            .ok_or(CatalogError::BadDim(dimid))?
            .container;
        let group = self.find_group(gid)?;
        let pos = group
            .dims
            .find_id(dimid)
            .ok_or(CatalogError::BadDim(dimid))?;
        if group.dims.position(&name).is_some_and(|p| p != pos) {
            return Err(CatalogError::DuplicateName(name));
        }
        let before = self.coord_var(dimid);

        self.group_mut(gid)?.dims.rename(pos, &name)?;
        let dim = self
            .graph
            .dim_mut(dimid)
            .ok_or(CatalogError::BadDim(dimid))?;
        dim.hdr.set_name(name.clone());
        dim.dirty = true;

        let after = self.coord_var(dimid);
        self.mark_coord_change(before, after)?;
        self.touch();
        debug!("Renamed dimension {} to {}", dimid, name);
        Ok(())
    }

    pub fn rename_var(&mut self, gid: GroupId, varid: VarId, new_name: &str) -> Result<()> {
        self.check_define()?;
        let name = check_name(new_name)?;
        let var = self.var(gid, varid)?;
        if var.hdr.name == name {
            return Ok(());
        }
        self.check_dup_name(gid, &name)?;
        let first_dim = var.dimids.first().copied();
        let before = first_dim.and_then(|d| self.coord_var(d));

        let group = self.group_mut(gid)?;
        group.vars.rename(varid, &name)?;
        if let Some(v) = group.vars.get_mut(varid) {
            v.flags.dirty = true;
        }

        let after = first_dim.and_then(|d| self.coord_var(d));
        let was = before.filter(|c| *c == (gid, varid));
        let now = after.filter(|c| *c == (gid, varid));
        self.mark_coord_change(was, now)?;
        self.touch();
        debug!("Renamed variable {}/{} to {}", gid, varid, name);
        Ok(())
    }

    pub fn rename_att(
        &mut self,
        gid: GroupId,
        varid: Option<VarId>,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        self.check_define()?;
        if find_reserved(old_name).is_some() {
            return Err(CatalogError::bad_name(old_name, "reserved attribute"));
        }
        let name = check_att_name(new_name)?;
        let index = self.att_index_mut(gid, varid)?;
        let pos = index
            .position(old_name)
            .ok_or_else(|| CatalogError::AttNotFound(old_name.to_string()))?;
        index.rename(pos, &name)?;
        if let Some(att) = index.get_mut(pos) {
            att.dirty = true;
        }
        if let Some(v) = varid {
            self.var_mut(gid, v)?.flags.attr_dirty = true;
        }
        self.touch();
        Ok(())
    }
}
