use super::{NcFile, PendingDelete};
use crate::consts::FILL_VALUE_ATT;
use crate::errors::{CatalogError, EntityKey, Result};
use crate::model::*;
use crate::names::find_reserved;
use crate::types::TypeId;
use log::debug;
use std::collections::HashSet;

impl NcFile {
    fn defer_delete(&mut self, created: bool, key: EntityKey, handle: Option<BackendHandle>) {
        if created {
            self.pending_deletes.push(PendingDelete { key, handle });
        }
    }

    /// Deletes a variable. Later variables in the group move down one id.
    pub fn delete_var(&mut self, gid: GroupId, varid: VarId) -> Result<()> {
        self.check_define()?;
        let var = self.var(gid, varid)?;
        let mut released: Vec<TypeId> = vec![var.type_id];
        released.extend(var.atts.iter().map(|a| a.type_id));
        let (created, handle) = (var.flags.created, var.backend);

        let group = self.group_mut(gid)?;
        group.vars.remove(varid);
        group.vars.renumber();
        for (pos, v) in group.vars.iter_mut().enumerate().skip(varid) {
            for a in v.atts.iter_mut() {
                a.container = AttContainer::Variable(gid, pos);
            }
        }
        for t in released {
            self.release(t)?;
        }
        self.defer_delete(created, EntityKey::Var { group: gid, var: varid }, handle);
        self.touch();
        debug!("Deleted variable {}/{}", gid, varid);
        Ok(())
    }

    /// Deletes an attribute. Later attributes move down one id.
    pub fn delete_att(&mut self, gid: GroupId, varid: Option<VarId>, name: &str) -> Result<()> {
        self.check_define()?;
        if find_reserved(name).is_some() {
            return Err(CatalogError::bad_name(name, "reserved attribute"));
        }
        let index = self.att_index_mut(gid, varid)?;
        let pos = index
            .position(name)
            .ok_or_else(|| CatalogError::AttNotFound(name.to_string()))?;
        let att = index
            .remove(pos)
            .ok_or_else(|| CatalogError::AttNotFound(name.to_string()))?;
        index.renumber();
        if let Some(v) = varid {
            let var = self.var_mut(gid, v)?;
            var.flags.attr_dirty = true;
            if name == FILL_VALUE_ATT {
                var.fill.value = None;
                var.flags.fill_val_changed = true;
                var.flags.dirty = true;
            }
        }
        self.release(att.type_id)?;
        self.defer_delete(
            att.created,
            EntityKey::Att {
                container: att.container,
                name: att.hdr.name.clone(),
            },
            att.backend,
        );
        self.touch();
        Ok(())
    }

    /// Deletes a dimension no variable uses. Its id is never reused.
    pub fn delete_dim(&mut self, dimid: DimId) -> Result<()> {
        self.check_define()?;
        let dim = self.graph.dim(dimid).ok_or(CatalogError::BadDim(dimid))?;
        let in_use = self
            .graph
            .live_groups()
            .any(|g| g.vars.iter().any(|v| v.dimids.contains(&dimid)));
        if in_use {
            return Err(CatalogError::InUse(dimid));
        }
        let (gid, created, handle) = (dim.container, dim.created, dim.backend);
        let group = self.group_mut(gid)?;
        if let Some(pos) = group.dims.find_id(dimid) {
            group.dims.remove(pos);
        }
        self.graph.dims[dimid] = None;
        self.defer_delete(created, EntityKey::Dim(dimid), handle);
        self.touch();
        debug!("Deleted dimension {}", dimid);
        Ok(())
    }

    /// Deletes a group and everything below it, children first. Fails without
    /// changing anything if a type defined inside is used from outside.
    pub fn delete_group(&mut self, gid: GroupId) -> Result<()> {
        self.check_define()?;
        self.find_group(gid)?;
        if gid == self.root() {
            return Err(CatalogError::Invalid("the root group cannot be deleted".into()));
        }
        let subtree = self.graph.subtree(gid);
        let inside: HashSet<GroupId> = subtree.iter().copied().collect();
        let owned: HashSet<TypeId> = self
            .graph
            .live_types()
            .filter(|t| inside.contains(&t.container))
            .map(|t| t.hdr.id)
            .collect();
        for (g, t) in self.graph.type_refs() {
            if !inside.contains(&g) && owned.contains(&t) {
                return Err(CatalogError::TypeInUse(t));
            }
        }
        for t in self.graph.live_types() {
            if inside.contains(&t.container) {
                continue;
            }
            if let Some(r) = t.class.referenced_types().into_iter().find(|r| owned.contains(r)) {
                return Err(CatalogError::TypeInUse(r));
            }
        }

        for g in subtree.iter().rev() {
            let group = self.group_mut(*g)?;
            let vars = std::mem::take(&mut group.vars);
            let atts = std::mem::take(&mut group.atts);
            let dims: Vec<DimId> = group.dims.iter().map(|h| h.id).collect();
            let mut released: Vec<TypeId> = atts.iter().map(|a| a.type_id).collect();
            for v in &vars {
                released.push(v.type_id);
                released.extend(v.atts.iter().map(|a| a.type_id));
            }
            for t in released {
                self.release(t)?;
            }
            for d in dims {
                self.graph.dims[d] = None;
            }
        }
        // what is left of the owned types is only referenced from inside
        loop {
            let next = owned
                .iter()
                .copied()
                .filter(|t| self.graph.type_info(*t).map_or(false, |i| i.users() == 0))
                .min();
            match next {
                Some(t) => self.free_type(t)?,
                None => break,
            }
        }
        for g in subtree.iter().rev() {
            if let Some(group) = self.graph.groups.get_mut(*g).and_then(Option::take) {
                self.defer_delete(group.created, EntityKey::Group(*g), group.backend);
            }
        }
        let parent = self
            .graph
            .groups
            .iter()
            .flatten()
            .find(|p| p.children.find_id(gid).is_some())
            .map(|p| p.hdr.id);
        if let Some(p) = parent {
            let group = self.group_mut(p)?;
            if let Some(pos) = group.children.find_id(gid) {
                group.children.remove(pos);
            }
        }
        self.touch();
        debug!("Deleted group {} and {} descendants", gid, subtree.len() - 1);
        Ok(())
    }
}
