//! Mapping between the catalog graph and the record image backends store.
//!
//! [`to_image`] flattens a [`Graph`] into `ncimage` records; [`from_image`]
//! rebuilds a graph bottom-up (groups, then dimensions and types, then
//! variables, then attributes), validating every name the same way caller
//! names are validated.

use crate::consts::{FIRST_USER_TYPE_ID, MAX_GROUP_ID, NCPROPS_ATT};
use crate::errors::{CatalogError, Result};
use crate::index::{Entity, NcIndex, ObjHeader, Sort};
use crate::model::*;
use crate::names::check_name;
use crate::types::*;
use crate::values::NcValues;
use anyhow::anyhow;
use log::debug;
use ncimage::{
    ArenaExtents, AttRec, DimRec, FieldRec, FilterRec, GroupRec, Image, MemberRec, Payload, StorageRec,
    TypeClassRec, TypeRec, VarDataRec, VarRec,
};

// upper bound on restored arena lengths
const MAX_ARENA_SLOTS: usize = 1 << 24;

/// What backends receive and return as the schema of a session.
pub type SchemaFragment = Image;

pub(crate) fn values_to_payload(v: &NcValues) -> Payload {
    match v {
        NcValues::Text(strs) => Payload::Strings(strs.clone()),
        NcValues::Vlen(runs) => Payload::Vlen(runs.clone()),
        other => Payload::Fixed(other.to_bytes().unwrap_or_default()),
    }
}

fn payload_to_values(p: &Payload, desc: TypeDesc<'_>) -> Result<NcValues> {
    match p {
        Payload::Strings(strs) => Ok(NcValues::Text(strs.clone())),
        Payload::Vlen(runs) => Ok(NcValues::Vlen(runs.clone())),
        Payload::Fixed(bytes) => match desc.storage_atomic() {
            Some(t) => NcValues::from_bytes(bytes, t),
            None => Ok(NcValues::Raw(bytes.clone())),
        },
    }
}

fn u32_id(id: usize) -> u32 {
    id as u32
}

fn class_to_rec(class: &TypeClass) -> TypeClassRec {
    match class {
        TypeClass::Compound { fields } => TypeClassRec::Compound {
            fields: fields
                .iter()
                .map(|f| FieldRec {
                    name: f.hdr.name.clone(),
                    type_id: u32_id(f.type_id),
                    offset: f.offset as u64,
                    dims: f.dims.iter().map(|d| *d as u32).collect(),
                })
                .collect(),
        },
        TypeClass::Enum { base, members } => TypeClassRec::Enum {
            base: u32_id(base.id()),
            members: members
                .iter()
                .map(|m| MemberRec {
                    name: m.name.clone(),
                    value: m.value,
                })
                .collect(),
        },
        TypeClass::Vlen { base } => TypeClassRec::Vlen { base: u32_id(*base) },
        TypeClass::Opaque => TypeClassRec::Opaque,
    }
}

fn storage_to_rec(v: &Variable) -> StorageRec {
    StorageRec {
        contiguous: v.storage.contiguous,
        chunksizes: v.storage.chunksizes.iter().map(|c| *c as u64).collect(),
        deflate_level: v.storage.deflate,
        shuffle: v.storage.shuffle,
        fletcher32: v.storage.fletcher32,
        filters: v
            .storage
            .filters
            .iter()
            .map(|f| FilterRec {
                id: f.id,
                params: f.params.clone(),
            })
            .collect(),
        endianness: v.endianness.to_u8(),
    }
}

fn att_to_rec(a: &Attribute) -> AttRec {
    AttRec {
        group: u32_id(a.container.group()),
        var: a.container.var().map(u32_id),
        id: u32_id(a.hdr.id),
        name: a.hdr.name.clone(),
        type_id: u32_id(a.type_id),
        len: a.len as u64,
        value: values_to_payload(&a.data),
    }
}

/// Flattens `graph` into image records, including held variable data.
pub fn to_image(graph: &Graph) -> Image {
    let mut image = Image::default();
    for g in graph.live_groups() {
        image.groups.push(GroupRec {
            id: u32_id(g.hdr.id),
            parent: g.parent.map(u32_id),
            name: g.hdr.name.clone(),
        });
        for a in &g.atts {
            image.atts.push(att_to_rec(a));
        }
        for v in &g.vars {
            image.vars.push(VarRec {
                group: u32_id(g.hdr.id),
                id: u32_id(v.hdr.id),
                name: v.hdr.name.clone(),
                type_id: u32_id(v.type_id),
                dimids: v.dimids.iter().map(|d| u32_id(*d)).collect(),
                storage: storage_to_rec(v),
                no_fill: v.fill.no_fill,
                fill: v.fill.value.as_ref().map(values_to_payload),
            });
            for a in &v.atts {
                image.atts.push(att_to_rec(a));
            }
            if !v.data.is_empty() {
                image.data.push(VarDataRec {
                    group: u32_id(g.hdr.id),
                    var: u32_id(v.hdr.id),
                    bytes: v.data.clone(),
                });
            }
        }
    }
    if let Some(p) = &graph.provenance {
        image.atts.push(att_to_rec(p));
    }
    for d in graph.live_dims() {
        image.dims.push(DimRec {
            id: u32_id(d.hdr.id),
            group: u32_id(d.container),
            name: d.hdr.name.clone(),
            len: d.len as u64,
            unlimited: d.unlimited,
        });
    }
    for t in graph.live_types() {
        image.types.push(TypeRec {
            id: u32_id(t.hdr.id),
            group: u32_id(t.container),
            name: t.hdr.name.clone(),
            size: t.size as u64,
            endianness: t.endianness.to_u8(),
            class: class_to_rec(&t.class),
        });
    }
    // freed slots at the end of an arena are otherwise lost on reload
    image.extents = Some(ArenaExtents {
        groups: u32_id(graph.groups.len()),
        dims: u32_id(graph.dims.len()),
        types: u32_id(graph.types.len()),
    });
    image
}

fn corrupt(msg: String) -> CatalogError {
    CatalogError::Backend(anyhow!("invalid schema: {}", msg))
}

fn resolve<'a>(graph: &'a Graph, id: TypeId) -> Result<TypeDesc<'a>> {
    if let Some(t) = AtomicType::from_id(id) {
        return Ok(TypeDesc::Atomic(t));
    }
    graph
        .type_info(id)
        .map(TypeDesc::User)
        .ok_or(CatalogError::BadType(id))
}

fn class_from_rec(rec: &TypeClassRec) -> Result<TypeClass> {
    Ok(match rec {
        TypeClassRec::Compound { fields } => {
            let mut idx = NcIndex::new();
            for f in fields {
                let name = check_name(&f.name)?;
                idx.add(
                    Field {
                        hdr: ObjHeader::new(Sort::Field, name, 0),
                        type_id: f.type_id as TypeId,
                        offset: f.offset as usize,
                        dims: f.dims.iter().map(|d| *d as usize).collect(),
                    },
                    None,
                )?;
            }
            TypeClass::Compound { fields: idx }
        }
        TypeClassRec::Enum { base, members } => TypeClass::Enum {
            base: AtomicType::from_id(*base as TypeId)
                .ok_or_else(|| corrupt(format!("enum base {} is not atomic", base)))?,
            members: members
                .iter()
                .map(|m| {
                    Ok(EnumMember {
                        name: check_name(&m.name)?,
                        value: m.value,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        },
        TypeClassRec::Vlen { base } => TypeClass::Vlen {
            base: *base as TypeId,
        },
        TypeClassRec::Opaque => TypeClass::Opaque,
    })
}

fn loaded_att(rec: &AttRec, graph: &Graph) -> Result<Attribute> {
    let name = check_name(&rec.name)?;
    let type_id = rec.type_id as TypeId;
    let data = payload_to_values(&rec.value, resolve(graph, type_id)?)?;
    let container = AttContainer::new(rec.group as GroupId, rec.var.map(|v| v as VarId));
    let mut att = Attribute::new(name, container, type_id, rec.len as usize, data);
    att.dirty = false;
    att.created = true;
    att.hdr.id = rec.id as usize;
    Ok(att)
}

/// Rebuilds a graph from image records. Every entity comes back clean and
/// marked as existing in the backend; type reference counts are recomputed.
pub fn from_image(image: &Image) -> Result<Graph> {
    let mut graph = Graph::empty();

    // groups: parents always carry smaller ids than their children
    let mut groups: Vec<&GroupRec> = image.groups.iter().collect();
    groups.sort_by_key(|g| g.id);
    for rec in groups {
        let gid = rec.id as GroupId;
        let parent = rec.parent.map(|p| p as GroupId);
        let name = match parent {
            None => rec.name.clone(),
            Some(_) => check_name(&rec.name)?,
        };
        if let Some(p) = parent {
            let pg = graph
                .group_mut(p)
                .ok_or_else(|| corrupt(format!("group {} has unknown parent {}", gid, p)))?;
            pg.children
                .add(ObjHeader::new(Sort::Group, name.clone(), gid), Some(gid))?;
        } else if gid != 0 {
            return Err(corrupt(format!("root group has id {}", gid)));
        }
        if graph.groups.len() <= gid {
            graph.groups.resize(gid + 1, None);
        }
        let mut g = Group::new(name, gid, parent);
        g.dirty = false;
        g.created = true;
        graph.groups[gid] = Some(g);
    }
    if graph.group(0).is_none() {
        return Err(corrupt("no root group".into()));
    }

    for rec in &image.dims {
        let id = rec.id as DimId;
        let gid = rec.group as GroupId;
        let name = check_name(&rec.name)?;
        graph
            .group_mut(gid)
            .ok_or(CatalogError::BadGroupId(gid))?
            .dims
            .add(ObjHeader::new(Sort::Dimension, name.clone(), id), Some(id))?;
        if graph.dims.len() <= id {
            graph.dims.resize(id + 1, None);
        }
        graph.dims[id] = Some(Dimension {
            hdr: ObjHeader::new(Sort::Dimension, name, id),
            container: gid,
            len: rec.len as usize,
            unlimited: rec.unlimited,
            extended: false,
            too_long: rec.len > u32::MAX as u64,
            dirty: false,
            created: true,
            backend: None,
        });
    }

    for rec in &image.types {
        let id = rec.id as TypeId;
        if id < FIRST_USER_TYPE_ID {
            return Err(corrupt(format!("user type with reserved id {}", id)));
        }
        let gid = rec.group as GroupId;
        let name = check_name(&rec.name)?;
        graph
            .group_mut(gid)
            .ok_or(CatalogError::BadGroupId(gid))?
            .types
            .add(ObjHeader::new(Sort::Type, name.clone(), id), Some(id))?;
        if graph.types.len() <= id {
            graph.types.resize(id + 1, None);
        }
        graph.types[id] = Some(TypeInfo {
            hdr: ObjHeader::new(Sort::Type, name, id),
            container: gid,
            rc: 1,
            endianness: Endianness::from_u8(rec.endianness),
            size: rec.size as usize,
            committed: true,
            dirty: false,
            class: class_from_rec(&rec.class)?,
            backend: None,
        });
    }

    let mut vars: Vec<&VarRec> = image.vars.iter().collect();
    vars.sort_by_key(|v| (v.group, v.id));
    for rec in vars {
        let gid = rec.group as GroupId;
        let name = check_name(&rec.name)?;
        let type_id = rec.type_id as TypeId;
        let desc = resolve(&graph, type_id)?;
        let fill = match &rec.fill {
            Some(p) => Some(payload_to_values(p, desc)?),
            None => None,
        };
        let var = Variable {
            hdr: ObjHeader::new(Sort::Variable, name, 0),
            container: gid,
            dimids: rec.dimids.iter().map(|d| *d as DimId).collect(),
            type_id,
            atts: NcIndex::new(),
            flags: VarFlags {
                created: true,
                meta_read: true,
                atts_read: true,
                coords_read: true,
                ..Default::default()
            },
            storage: StorageHints {
                contiguous: rec.storage.contiguous,
                chunksizes: rec.storage.chunksizes.iter().map(|c| *c as usize).collect(),
                deflate: rec.storage.deflate_level,
                shuffle: rec.storage.shuffle,
                fletcher32: rec.storage.fletcher32,
                chunk_cache: ChunkCache::default(),
                filters: rec
                    .storage
                    .filters
                    .iter()
                    .map(|f| FilterSpec {
                        id: f.id,
                        params: f.params.clone(),
                    })
                    .collect(),
            },
            fill: FillPolicy {
                no_fill: rec.no_fill,
                value: fill,
            },
            parallel_access: ParallelAccess::default(),
            endianness: Endianness::from_u8(rec.storage.endianness),
            data: image
                .data_of(rec.group, rec.id)
                .map(|b| b.to_vec())
                .unwrap_or_default(),
            backend: None,
        };
        for d in &var.dimids {
            if graph.dim(*d).is_none() {
                return Err(CatalogError::BadDim(*d));
            }
        }
        let group = graph.group_mut(gid).ok_or(CatalogError::BadGroupId(gid))?;
        let id = group.vars.add(var, None)?;
        if id != rec.id as usize {
            return Err(corrupt(format!(
                "variable ids in group {} are not dense ({} stored at {})",
                gid, rec.id, id
            )));
        }
    }

    let mut atts: Vec<&AttRec> = image.atts.iter().collect();
    atts.sort_by_key(|a| (a.group, a.var, a.id));
    for rec in atts {
        if rec.name == NCPROPS_ATT && rec.group == 0 && rec.var.is_none() {
            graph.provenance = Some(loaded_att(rec, &graph)?);
            continue;
        }
        let att = loaded_att(rec, &graph)?;
        let gid = rec.group as GroupId;
        let group = graph.group_mut(gid).ok_or(CatalogError::BadGroupId(gid))?;
        let index = match rec.var {
            None => &mut group.atts,
            Some(v) => {
                &mut group
                    .vars
                    .get_mut(v as usize)
                    .ok_or(CatalogError::BadVar(v as usize))?
                    .atts
            }
        };
        index.add(att, None)?;
    }

    if let Some(e) = &image.extents {
        let (groups, dims, types) = (e.groups as usize, e.dims as usize, e.types as usize);
        if groups > MAX_GROUP_ID + 1 || dims > MAX_ARENA_SLOTS || types > MAX_ARENA_SLOTS {
            return Err(corrupt(format!("arena extents {:?} out of range", e)));
        }
        if graph.groups.len() < groups {
            graph.groups.resize(groups, None);
        }
        if graph.dims.len() < dims {
            graph.dims.resize(dims, None);
        }
        if graph.types.len() < types {
            graph.types.resize(types, None);
        }
    }

    recount_refs(&mut graph)?;
    mark_coord_vars(&mut graph);
    debug!(
        "Rebuilt graph: {} groups, {} dims, {} types",
        graph.live_groups().count(),
        graph.live_dims().count(),
        graph.live_types().count()
    );
    Ok(graph)
}

/// Sets every user type's count to one (its group) plus its users.
fn recount_refs(graph: &mut Graph) -> Result<()> {
    let mut refs: Vec<TypeId> = graph.type_refs().into_iter().map(|(_, t)| t).collect();
    for t in graph.live_types() {
        refs.extend(t.class.referenced_types());
    }
    for id in refs {
        if is_atomic(id) {
            continue;
        }
        graph
            .type_info_mut(id)
            .ok_or(CatalogError::BadType(id))?
            .rc += 1;
    }
    Ok(())
}

fn mark_coord_vars(graph: &mut Graph) {
    let dims: Vec<(DimId, GroupId, String)> = graph
        .live_dims()
        .map(|d| (d.hdr.id, d.container, d.hdr.name.clone()))
        .collect();
    for (dimid, gid, name) in dims {
        if let Some(g) = graph.group_mut(gid) {
            if let Some(v) = g.vars.lookup_mut(&name) {
                if v.dimids.first() == Some(&dimid) {
                    v.flags.dimscale = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_keeps_enum_base_encoding() {
        let p = values_to_payload(&NcValues::Short(vec![1, -1]));
        assert_eq!(p, Payload::Fixed(vec![1, 0, 0xff, 0xff]));
        let back = payload_to_values(&p, TypeDesc::Atomic(AtomicType::Short)).unwrap();
        assert_eq!(back, NcValues::Short(vec![1, -1]));
    }

    #[test]
    fn graph_without_root_is_rejected() {
        let image = Image {
            groups: vec![GroupRec {
                id: 1,
                parent: Some(0),
                name: "orphan".into(),
            }],
            ..Default::default()
        };
        assert!(from_image(&image).is_err());
    }

    #[test]
    fn bad_names_from_backend_are_rejected() {
        let image = Image {
            groups: vec![GroupRec {
                id: 0,
                parent: None,
                name: "/".into(),
            }],
            dims: vec![DimRec {
                id: 0,
                group: 0,
                name: "bad/name".into(),
                len: 1,
                unlimited: false,
            }],
            ..Default::default()
        };
        assert!(matches!(
            from_image(&image),
            Err(CatalogError::BadName { .. })
        ));
    }

    #[test]
    fn freed_trailing_ids_stay_reserved() {
        let mut g = Graph::new();
        g.dims.resize(3, None);
        g.types.resize(FIRST_USER_TYPE_ID + 2, None);
        g.groups.resize(2, None);
        let back = from_image(&to_image(&g)).unwrap();
        assert_eq!(back.next_dimid(), 3);
        assert_eq!(back.next_typeid(), FIRST_USER_TYPE_ID + 2);
        assert_eq!(back.next_grpid(), 2);

        // images without extents fall back to the stored ids
        let mut image = to_image(&g);
        image.extents = None;
        assert_eq!(from_image(&image).unwrap().next_dimid(), 0);
    }

    #[test]
    fn empty_graph_roundtrips() {
        let g = Graph::new();
        let mut back = from_image(&to_image(&g)).unwrap();
        // loaded entities are clean and created
        let root = back.group_mut(0).unwrap();
        assert!(root.created && !root.dirty);
        root.created = false;
        root.dirty = true;
        assert_eq!(back, g);
    }
}
