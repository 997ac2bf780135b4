use super::NcFile;
use crate::consts::NCPROPS_ATT;
use crate::errors::{CatalogError, Result};
use crate::index::NcIndex;
use crate::model::*;
use crate::types::*;

fn matches_spec(info: &TypeInfo, spec: &TypeSpec) -> bool {
    match (&info.class, spec) {
        (TypeClass::Compound { fields }, TypeSpec::Compound { size, fields: want }) => {
            info.size == *size
                && fields.len() == want.len()
                && fields.iter().zip(want).all(|(f, w)| {
                    f.hdr.name == w.name
                        && f.type_id == w.type_id
                        && f.offset == w.offset
                        && f.dims == w.dims
                })
        }
        (TypeClass::Enum { base, members }, TypeSpec::Enum { base: b, members: want }) => {
            base == b
                && members.len() == want.len()
                && members
                    .iter()
                    .zip(want)
                    .all(|(m, (name, value))| &m.name == name && m.value == *value)
        }
        (TypeClass::Vlen { base }, TypeSpec::Vlen { base: b }) => base == b,
        (TypeClass::Opaque, TypeSpec::Opaque { size }) => info.size == *size,
        _ => false,
    }
}

impl NcFile {
    pub fn find_group(&self, gid: GroupId) -> Result<&Group> {
        self.check_open()?;
        self.graph.group(gid).ok_or(CatalogError::BadGroupId(gid))
    }

    pub(crate) fn group_mut(&mut self, gid: GroupId) -> Result<&mut Group> {
        self.graph
            .group_mut(gid)
            .ok_or(CatalogError::BadGroupId(gid))
    }

    /// Child group of `parent` called `name`.
    pub fn find_group_by_name(&self, parent: GroupId, name: &str) -> Result<GroupId> {
        self.find_group(parent)?
            .children
            .lookup(name)
            .map(|h| h.id)
            .ok_or_else(|| CatalogError::NotFound(format!("group {}", name)))
    }

    /// Group at an absolute path such as `/forecast/surface`.
    pub fn find_group_by_path(&self, path: &str) -> Result<GroupId> {
        let mut gid = self.root();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            gid = self.find_group_by_name(gid, part)?;
        }
        Ok(gid)
    }

    pub fn child_groups(&self, gid: GroupId) -> Result<Vec<GroupId>> {
        Ok(self.find_group(gid)?.children.iter().map(|h| h.id).collect())
    }

    pub fn full_name(&self, gid: GroupId) -> Result<String> {
        self.find_group(gid)?;
        Ok(self.graph.full_name(gid))
    }

    /// The dimension `dimid` as seen from `gid`, with its owning group.
    /// Dimensions are visible in their defining group and everything below it.
    pub fn find_dim(&self, gid: GroupId, dimid: DimId) -> Result<(&Dimension, GroupId)> {
        self.find_group(gid)?;
        let dim = self.graph.dim(dimid).ok_or(CatalogError::BadDim(dimid))?;
        if !self.graph.is_within(gid, dim.container) {
            return Err(CatalogError::BadDim(dimid));
        }
        Ok((dim, dim.container))
    }

    /// Searches `gid` and then its ancestors for a dimension called `name`.
    pub fn find_dim_by_name(&self, gid: GroupId, name: &str) -> Result<DimId> {
        self.find_group(gid)?;
        self.graph
            .ancestry(gid)
            .into_iter()
            .filter_map(|g| self.graph.group(g))
            .find_map(|g| g.dims.lookup(name).map(|h| h.id))
            .ok_or_else(|| CatalogError::NotFound(format!("dimension {}", name)))
    }

    /// Every dimension visible from `gid`, nearest group first.
    pub fn visible_dims(&self, gid: GroupId) -> Result<Vec<DimId>> {
        self.find_group(gid)?;
        Ok(self
            .graph
            .ancestry(gid)
            .into_iter()
            .filter_map(|g| self.graph.group(g))
            .flat_map(|g| g.dims.iter().map(|h| h.id))
            .collect())
    }

    pub fn dim_len(&self, gid: GroupId, dimid: DimId) -> Result<usize> {
        Ok(self.find_dim(gid, dimid)?.0.len)
    }

    pub fn find_var(&self, gid: GroupId, name: &str) -> Result<VarId> {
        self.find_group(gid)?
            .vars
            .position(name)
            .ok_or_else(|| CatalogError::NotFound(format!("variable {}", name)))
    }

    pub fn var(&self, gid: GroupId, varid: VarId) -> Result<&Variable> {
        self.find_group(gid)?
            .vars
            .get(varid)
            .ok_or(CatalogError::BadVar(varid))
    }

    pub(crate) fn var_mut(&mut self, gid: GroupId, varid: VarId) -> Result<&mut Variable> {
        self.group_mut(gid)?
            .vars
            .get_mut(varid)
            .ok_or(CatalogError::BadVar(varid))
    }

    pub(crate) fn att_index(
        &self,
        gid: GroupId,
        varid: Option<VarId>,
    ) -> Result<&NcIndex<Attribute>> {
        match varid {
            None => Ok(&self.find_group(gid)?.atts),
            Some(v) => Ok(&self.var(gid, v)?.atts),
        }
    }

    pub(crate) fn att_index_mut(
        &mut self,
        gid: GroupId,
        varid: Option<VarId>,
    ) -> Result<&mut NcIndex<Attribute>> {
        match varid {
            None => Ok(&mut self.group_mut(gid)?.atts),
            Some(v) => Ok(&mut self.var_mut(gid, v)?.atts),
        }
    }

    /// Attribute `name` of a group (`varid == None`) or variable. The root's
    /// provenance attribute is found here too, though it is not counted.
    pub fn find_att(&self, gid: GroupId, varid: Option<VarId>, name: &str) -> Result<&Attribute> {
        let index = self.att_index(gid, varid)?;
        if let Some(att) = index.lookup(name) {
            return Ok(att);
        }
        if gid == self.root() && varid.is_none() && name == NCPROPS_ATT {
            if let Some(p) = &self.graph.provenance {
                return Ok(p);
            }
        }
        Err(CatalogError::AttNotFound(name.to_string()))
    }

    pub fn att_by_num(&self, gid: GroupId, varid: Option<VarId>, attnum: AttId) -> Result<&Attribute> {
        self.att_index(gid, varid)?
            .get(attnum)
            .ok_or_else(|| CatalogError::AttNotFound(format!("#{}", attnum)))
    }

    pub fn att_count(&self, gid: GroupId, varid: Option<VarId>) -> Result<usize> {
        Ok(self.att_index(gid, varid)?.len())
    }

    /// The coordinate variable of `dimid`: the variable in the dimension's
    /// group that has the dimension's name and uses it as its first dimension.
    pub fn coord_var(&self, dimid: DimId) -> Option<(GroupId, VarId)> {
        let dim = self.graph.dim(dimid)?;
        let group = self.graph.group(dim.container)?;
        let pos = group.vars.position(&dim.hdr.name)?;
        let var = group.vars.get(pos)?;
        (var.dimids.first() == Some(&dimid)).then_some((dim.container, pos))
    }

    /// Dimensions for which `(gid, varid)` is currently the coordinate variable.
    pub(crate) fn coord_dims_of(&self, gid: GroupId, varid: VarId) -> Vec<DimId> {
        match self.var(gid, varid) {
            Ok(v) => v
                .dimids
                .first()
                .filter(|d| self.coord_var(**d) == Some((gid, varid)))
                .map(|d| vec![*d])
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    pub fn resolve_type(&self, type_id: TypeId) -> Result<TypeDesc<'_>> {
        if let Some(t) = AtomicType::from_id(type_id) {
            return Ok(TypeDesc::Atomic(t));
        }
        self.graph
            .type_info(type_id)
            .map(TypeDesc::User)
            .ok_or(CatalogError::BadType(type_id))
    }

    pub fn type_class(&self, type_id: TypeId) -> Result<TypeClassTag> {
        Ok(self.resolve_type(type_id)?.class())
    }

    /// Looks up a type by name: atomic names first, then `gid` and its
    /// ancestors.
    pub fn find_named_type(&self, gid: GroupId, name: &str) -> Result<TypeId> {
        if let Some(t) = AtomicType::from_name(name) {
            return Ok(t.id());
        }
        self.find_group(gid)?;
        self.graph
            .ancestry(gid)
            .into_iter()
            .filter_map(|g| self.graph.group(g))
            .find_map(|g| g.types.lookup(name).map(|h| h.id))
            .ok_or_else(|| CatalogError::NotFound(format!("type {}", name)))
    }

    /// A user type in `gid` or below it whose definition matches `spec`.
    pub fn find_equal_type(&self, gid: GroupId, spec: &TypeSpec) -> Option<TypeId> {
        self.graph
            .subtree(gid)
            .into_iter()
            .filter_map(|g| self.graph.group(g))
            .flat_map(|g| g.types.iter().map(|h| h.id))
            .find(|id| {
                self.graph
                    .type_info(*id)
                    .map_or(false, |info| matches_spec(info, spec))
            })
    }

    /// Types, child groups and variables share one namespace per group.
    pub(crate) fn check_dup_name(&self, gid: GroupId, name: &str) -> Result<()> {
        let group = self.find_group(gid)?;
        if group.types.contains(name) || group.children.contains(name) || group.vars.contains(name)
        {
            return Err(CatalogError::DuplicateName(name.to_string()));
        }
        Ok(())
    }
}
