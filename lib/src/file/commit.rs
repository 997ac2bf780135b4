//! Reconciling the catalog with its backend.
//!
//! Dirty entities are ordered so that every entity is created after the
//! entities it depends on: parent groups before children, dimensions and
//! types before the variables that use them, owners before attributes.
//! Pending deletes run before any create. An entity whose dependency failed
//! is not attempted. Nothing is flushed unless every step succeeds.

use super::NcFile;
use crate::consts::NCPROPS_ATT;
use crate::errors::{CatalogError, CommitReport, EntityKey, Result};
use crate::io::{CatalogIO, EntitySpec};
use crate::model::{AttContainer, Attribute, Graph, GroupId, VarId};
use crate::schema::to_image;
use crate::types::is_atomic;
use log::{debug, info, warn};
use petgraph::graph::{Graph as DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

fn is_provenance(container: &AttContainer, name: &str) -> bool {
    *container == AttContainer::Group(0) && name == NCPROPS_ATT
}

fn find_att<'a>(graph: &'a Graph, container: &AttContainer, name: &str) -> Option<&'a Attribute> {
    if is_provenance(container, name) {
        return graph.provenance.as_ref();
    }
    match container {
        AttContainer::Group(g) => graph.group(*g)?.atts.lookup(name),
        AttContainer::Variable(g, v) => graph.group(*g)?.vars.get(*v)?.atts.lookup(name),
    }
}

fn find_att_mut<'a>(
    graph: &'a mut Graph,
    container: &AttContainer,
    name: &str,
) -> Option<&'a mut Attribute> {
    if is_provenance(container, name) {
        return graph.provenance.as_mut();
    }
    match container {
        AttContainer::Group(g) => graph.group_mut(*g)?.atts.lookup_mut(name),
        AttContainer::Variable(g, v) => graph
            .group_mut(*g)?
            .vars
            .get_mut(*v)?
            .atts
            .lookup_mut(name),
    }
}

fn att_key(att: &Attribute) -> EntityKey {
    EntityKey::Att {
        container: att.container,
        name: att.hdr.name.clone(),
    }
}

/// Edges from an attribute's owner and type to the attribute.
fn att_edges(owner: EntityKey, att: &Attribute, out: &mut Vec<(EntityKey, EntityKey)>) {
    let key = att_key(att);
    out.push((owner, key.clone()));
    if !is_atomic(att.type_id) {
        out.push((EntityKey::Type(att.type_id), key));
    }
}

fn missing(key: &EntityKey) -> CatalogError {
    CatalogError::NotFound(key.to_string())
}

/// Dirty entities and the dirty entities each one depends on.
fn dependency_graph(graph: &Graph) -> DiGraph<EntityKey, (), petgraph::Directed> {
    let mut dag: DiGraph<EntityKey, (), petgraph::Directed> = DiGraph::new();
    let mut indexes: HashMap<EntityKey, NodeIndex> = HashMap::new();
    let mut edges: Vec<(EntityKey, EntityKey)> = Vec::new();

    let mut node = |key: EntityKey, dag: &mut DiGraph<EntityKey, (), petgraph::Directed>| {
        indexes
            .entry(key.clone())
            .or_insert_with(|| dag.add_node(key));
    };

    let mut dirty_atts: Vec<EntityKey> = Vec::new();
    for g in graph.live_groups() {
        let gkey = EntityKey::Group(g.hdr.id);
        if g.dirty || !g.created {
            node(gkey.clone(), &mut dag);
        }
        if let Some(p) = g.parent {
            edges.push((EntityKey::Group(p), gkey.clone()));
        }
        for a in g.atts.iter().filter(|a| a.dirty || !a.created) {
            dirty_atts.push(att_key(a));
            att_edges(gkey.clone(), a, &mut edges);
        }
        for v in g.vars.iter() {
            let vkey = EntityKey::Var {
                group: g.hdr.id,
                var: v.hdr.id,
            };
            if v.flags.dirty || !v.flags.created {
                node(vkey.clone(), &mut dag);
            }
            edges.push((gkey.clone(), vkey.clone()));
            if !is_atomic(v.type_id) {
                edges.push((EntityKey::Type(v.type_id), vkey.clone()));
            }
            for d in &v.dimids {
                edges.push((EntityKey::Dim(*d), vkey.clone()));
            }
            for a in v.atts.iter().filter(|a| a.dirty || !a.created) {
                dirty_atts.push(att_key(a));
                att_edges(vkey.clone(), a, &mut edges);
            }
        }
    }
    if let Some(p) = graph.provenance.as_ref().filter(|p| p.dirty || !p.created) {
        dirty_atts.push(att_key(p));
        edges.push((EntityKey::Group(0), att_key(p)));
    }
    for d in graph.live_dims() {
        let key = EntityKey::Dim(d.hdr.id);
        if d.dirty || !d.created {
            node(key.clone(), &mut dag);
        }
        edges.push((EntityKey::Group(d.container), key));
    }
    for t in graph.live_types() {
        let key = EntityKey::Type(t.hdr.id);
        if t.dirty || !t.committed {
            node(key.clone(), &mut dag);
        }
        edges.push((EntityKey::Group(t.container), key.clone()));
        for r in t.class.referenced_types() {
            if !is_atomic(r) {
                edges.push((EntityKey::Type(r), key.clone()));
            }
        }
    }
    for key in dirty_atts {
        node(key, &mut dag);
    }

    // only edges between two dirty entities constrain the order
    let mut seen: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();
    for (from, to) in edges {
        if let (Some(a), Some(b)) = (indexes.get(&from), indexes.get(&to)) {
            if seen.insert((*a, *b)) {
                dag.add_edge(*a, *b, ());
            }
        }
    }
    dag
}

/// Creates `key` in the backend if needed, writes its attribute value, and
/// marks it clean.
fn commit_entity(graph: &mut Graph, io: &mut dyn CatalogIO, key: &EntityKey) -> Result<()> {
    match key {
        EntityKey::Group(g) => {
            let group = graph.group(*g).ok_or_else(|| missing(key))?;
            let handle = match group.created {
                false => Some(io.create_entity(&EntitySpec::Group(group))?),
                true => None,
            };
            let group = graph.group_mut(*g).ok_or_else(|| missing(key))?;
            if handle.is_some() {
                group.backend = handle;
                group.created = true;
            }
            group.dirty = false;
        }
        EntityKey::Dim(d) => {
            let dim = graph.dim(*d).ok_or_else(|| missing(key))?;
            let handle = match dim.created {
                false => Some(io.create_entity(&EntitySpec::Dim(dim))?),
                true => None,
            };
            let dim = graph.dim_mut(*d).ok_or_else(|| missing(key))?;
            if handle.is_some() {
                dim.backend = handle;
                dim.created = true;
            }
            dim.dirty = false;
        }
        EntityKey::Type(t) => {
            let info = graph.type_info(*t).ok_or_else(|| missing(key))?;
            let handle = match info.committed {
                false => Some(io.create_entity(&EntitySpec::Type(info))?),
                true => None,
            };
            let info = graph.type_info_mut(*t).ok_or_else(|| missing(key))?;
            if handle.is_some() {
                info.backend = handle;
                info.committed = true;
            }
            info.dirty = false;
        }
        EntityKey::Var { group, var } => {
            let v = graph
                .group(*group)
                .and_then(|g| g.vars.get(*var))
                .ok_or_else(|| missing(key))?;
            let handle = match v.flags.created {
                false => Some(io.create_entity(&EntitySpec::Var(v))?),
                true => None,
            };
            let v = graph
                .group_mut(*group)
                .and_then(|g| g.vars.get_mut(*var))
                .ok_or_else(|| missing(key))?;
            if handle.is_some() {
                v.backend = handle;
                v.flags.created = true;
            }
            v.flags.dirty = false;
        }
        EntityKey::Att { container, name } => {
            let att = find_att(graph, container, name).ok_or_else(|| missing(key))?;
            if !att.created {
                let handle = io.create_entity(&EntitySpec::Att(att))?;
                let att = find_att_mut(graph, container, name).ok_or_else(|| missing(key))?;
                att.backend = Some(handle);
                att.created = true;
            }
            // created but still dirty if the value write fails
            let att = find_att(graph, container, name).ok_or_else(|| missing(key))?;
            io.write_attribute_data(key, att)?;
            find_att_mut(graph, container, name)
                .ok_or_else(|| missing(key))?
                .dirty = false;
        }
    }
    Ok(())
}

impl NcFile {
    /// Pushes every pending change to the backend, then flushes the schema.
    ///
    /// Entities that fail stay dirty and are listed in the returned
    /// [`CommitReport`]; the rest are committed and clean.
    pub(crate) fn commit(&mut self) -> Result<()> {
        let dag = dependency_graph(&self.graph);
        let order = petgraph::algo::toposort(&dag, None)
            .map_err(|_| CatalogError::Invalid("cyclic entity dependencies".into()))?;

        let mut report = CommitReport::default();
        // deletes first, so a re-added name does not meet its old entity
        for pending in std::mem::take(&mut self.pending_deletes) {
            match self.io.delete_entity(&pending.key, pending.handle) {
                Ok(()) => report.committed += 1,
                Err(e) => {
                    let e = CatalogError::from(e);
                    warn!("Failed to delete {}: {}", pending.key, e);
                    report.failed.push((pending.key.clone(), e.to_string()));
                    self.pending_deletes.push(pending);
                }
            }
        }

        let mut failed: HashSet<NodeIndex> = HashSet::new();
        for idx in order {
            let key = &dag[idx];
            let blocked = dag
                .neighbors_directed(idx, petgraph::Direction::Incoming)
                .find(|dep| failed.contains(dep));
            if let Some(dep) = blocked {
                report
                    .failed
                    .push((key.clone(), format!("depends on failed {}", dag[dep])));
                failed.insert(idx);
                continue;
            }
            match commit_entity(&mut self.graph, self.io.as_mut(), key) {
                Ok(()) => report.committed += 1,
                Err(e) => {
                    warn!("Failed to commit {}: {}", key, e);
                    report.failed.push((key.clone(), e.to_string()));
                    failed.insert(idx);
                }
            }
        }

        let failed_keys: HashSet<&EntityKey> = failed.iter().map(|i| &dag[*i]).collect();
        let written: Vec<(GroupId, VarId)> = self
            .graph
            .live_groups()
            .flat_map(|g| {
                g.vars
                    .iter()
                    .filter(|v| v.flags.data_dirty)
                    .map(|v| (v.container, v.hdr.id))
            })
            .filter(|(group, var)| {
                !failed_keys.contains(&EntityKey::Var {
                    group: *group,
                    var: *var,
                })
            })
            .collect();
        for (group, var) in written {
            let key = EntityKey::Var { group, var };
            let bytes = self.var(group, var)?.data.clone();
            match self.io.write_variable_data(&key, &bytes) {
                Ok(()) => self.var_mut(group, var)?.flags.data_dirty = false,
                Err(e) => {
                    let e = CatalogError::from(e);
                    warn!("Failed to write data of {}: {}", key, e);
                    report.failed.push((key, e.to_string()));
                }
            }
        }

        if !report.is_clean() {
            warn!(
                "Commit left {} entities uncommitted ({} committed)",
                report.failed.len(),
                report.committed
            );
            return Err(CatalogError::Commit(report));
        }

        self.io.flush_header(&to_image(&self.graph))?;
        self.mark_committed();
        info!("Committed {} changes to {} backend", report.committed, self.io.io_type());
        Ok(())
    }

    /// Clears per-session change flags after a successful flush.
    fn mark_committed(&mut self) {
        self.cmode.hdirty = false;
        self.cmode.ndirty = false;
        for d in self.graph.dims.iter_mut().flatten() {
            d.extended = false;
        }
        for g in self.graph.groups.iter_mut().flatten() {
            for v in g.vars.iter_mut() {
                v.flags.is_new = false;
                v.flags.was_coord_var = false;
                v.flags.became_coord_var = false;
                v.flags.fill_val_changed = false;
                v.flags.attr_dirty = false;
            }
        }
        debug!("Cleared change flags");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::options::CloseAction;
    use crate::schema::SchemaFragment;
    use crate::types::{AtomicType, TypeSpec};
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    /// Records calls and refuses to create variables called `bad`.
    #[derive(Default, Clone)]
    struct Recorder {
        created: Arc<Mutex<Vec<EntityKey>>>,
        deleted: Arc<Mutex<Vec<EntityKey>>>,
        events: Arc<Mutex<Vec<String>>>,
        flushes: Arc<Mutex<usize>>,
        /// Attribute value writes to refuse before accepting them again.
        att_write_failures: Arc<Mutex<usize>>,
    }

    impl CatalogIO for Recorder {
        fn io_type(&self) -> String {
            "recorder".to_string()
        }

        fn location(&self) -> Option<&Path> {
            None
        }

        fn is_read_only(&self) -> bool {
            false
        }

        fn read_schema(&mut self) -> anyhow::Result<Option<SchemaFragment>> {
            Ok(None)
        }

        fn create_entity(&mut self, spec: &EntitySpec<'_>) -> anyhow::Result<u64> {
            if let EntitySpec::Var(v) = spec {
                if v.hdr.name == "bad" {
                    anyhow::bail!("disk full");
                }
            }
            self.events.lock().unwrap().push(format!("create {}", spec.key()));
            let mut created = self.created.lock().unwrap();
            created.push(spec.key());
            Ok(created.len() as u64)
        }

        fn delete_entity(&mut self, key: &EntityKey, _h: Option<u64>) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(format!("delete {}", key));
            self.deleted.lock().unwrap().push(key.clone());
            Ok(())
        }

        fn write_attribute_data(&mut self, key: &EntityKey, _att: &Attribute) -> anyhow::Result<()> {
            let mut left = self.att_write_failures.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                anyhow::bail!("short write on {}", key);
            }
            Ok(())
        }

        fn write_variable_data(&mut self, _key: &EntityKey, _bytes: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }

        fn flush_header(&mut self, _schema: &SchemaFragment) -> anyhow::Result<()> {
            *self.flushes.lock().unwrap() += 1;
            Ok(())
        }

        fn close(&mut self, _action: CloseAction) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    fn session(rec: &Recorder) -> NcFile {
        NcFile::create_with(Config::memory(), Box::new(rec.clone())).unwrap()
    }

    fn position(list: &[EntityKey], key: &EntityKey) -> usize {
        list.iter().position(|k| k == key).unwrap()
    }

    #[test]
    fn entities_are_created_after_their_dependencies() {
        let rec = Recorder::default();
        let mut f = session(&rec);
        let g = f.add_group(0, "g").unwrap();
        let x = f.add_dimension(0, "x", Some(2)).unwrap();
        let t = f.define_type(g, "pair", TypeSpec::Opaque { size: 2 }).unwrap();
        let v = f.add_variable(g, "v", t, &[x]).unwrap();
        f.put_att_text(g, Some(v), "units", "m").unwrap();
        f.enddef().unwrap();

        let created = rec.created.lock().unwrap().clone();
        let var = EntityKey::Var { group: g, var: v };
        let att = EntityKey::Att {
            container: AttContainer::Variable(g, v),
            name: "units".into(),
        };
        assert!(position(&created, &EntityKey::Group(0)) < position(&created, &EntityKey::Group(g)));
        assert!(position(&created, &EntityKey::Group(g)) < position(&created, &EntityKey::Type(t)));
        assert!(position(&created, &EntityKey::Type(t)) < position(&created, &var));
        assert!(position(&created, &EntityKey::Dim(x)) < position(&created, &var));
        assert!(position(&created, &var) < position(&created, &att));
        assert!(created.iter().any(|k| matches!(
            k,
            EntityKey::Att { name, .. } if name == "_NCProperties"
        )));
        assert_eq!(*rec.flushes.lock().unwrap(), 1);
        assert!(f.graph().type_info(t).unwrap().committed);
        assert!(!f.var(g, v).unwrap().flags.is_new);
    }

    #[test]
    fn failures_are_reported_and_stay_dirty() {
        let rec = Recorder::default();
        let mut f = session(&rec);
        let bad = f.add_variable(0, "bad", AtomicType::Int.id(), &[]).unwrap();
        f.put_att_text(0, Some(bad), "units", "m").unwrap();
        let good = f.add_variable(0, "good", AtomicType::Int.id(), &[]).unwrap();

        let err = f.enddef().unwrap_err();
        let CatalogError::Commit(report) = err else {
            panic!("expected a commit report, got {err}");
        };
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed[0].1.contains("disk full"));
        assert!(report.failed[1].1.starts_with("depends on failed"));
        assert!(f.is_define_mode());
        assert!(!f.var(0, bad).unwrap().flags.created);
        assert!(f.var(0, good).unwrap().flags.created);
        assert_eq!(*rec.flushes.lock().unwrap(), 0);

        f.delete_var(0, bad).unwrap();
        f.enddef().unwrap();
        assert_eq!(*rec.flushes.lock().unwrap(), 1);
        // never created, so nothing to delete in the backend
        assert!(rec.deleted.lock().unwrap().is_empty());
    }

    #[test]
    fn committed_deletes_reach_the_backend() {
        let rec = Recorder::default();
        let mut f = session(&rec);
        let x = f.add_dimension(0, "x", Some(1)).unwrap();
        f.enddef().unwrap();
        f.redef().unwrap();
        f.delete_dim(x).unwrap();
        f.enddef().unwrap();
        assert_eq!(*rec.deleted.lock().unwrap(), vec![EntityKey::Dim(x)]);
    }

    #[test]
    fn failed_attribute_write_does_not_create_twice() {
        let rec = Recorder::default();
        let mut f = session(&rec);
        f.enddef().unwrap();
        f.redef().unwrap();
        f.put_att_text(0, None, "title", "t").unwrap();
        *rec.att_write_failures.lock().unwrap() = 1;

        let err = f.enddef().unwrap_err();
        assert!(matches!(err, CatalogError::Commit(_)));
        let att = f.find_att(0, None, "title").unwrap();
        assert!(att.created && att.dirty);
        assert!(att.backend.is_some());

        f.enddef().unwrap();
        let key = EntityKey::Att {
            container: AttContainer::Group(0),
            name: "title".into(),
        };
        let creates = rec.created.lock().unwrap().iter().filter(|k| **k == key).count();
        assert_eq!(creates, 1);
        assert!(!f.find_att(0, None, "title").unwrap().dirty);
    }

    #[test]
    fn deletes_run_before_creates() {
        let rec = Recorder::default();
        let mut f = session(&rec);
        let old = f.add_dimension(0, "x", Some(1)).unwrap();
        f.enddef().unwrap();
        f.redef().unwrap();
        f.delete_dim(old).unwrap();
        let new = f.add_dimension(0, "x", Some(2)).unwrap();
        rec.events.lock().unwrap().clear();
        f.enddef().unwrap();

        let events = rec.events.lock().unwrap().clone();
        let delete = events
            .iter()
            .position(|e| *e == format!("delete {}", EntityKey::Dim(old)))
            .unwrap();
        let create = events
            .iter()
            .position(|e| *e == format!("create {}", EntityKey::Dim(new)))
            .unwrap();
        assert!(delete < create, "{events:?}");
    }
}
