use super::{NcFile, SessionState};
use chrono::{DateTime, Utc};
use pretty_bytes::converter::convert;
use std::fmt;
use std::path::PathBuf;

/// Counts and provenance of an open catalog, for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSummary {
    pub io_type: String,
    pub path: Option<PathBuf>,
    pub state: SessionState,
    pub read_only: bool,
    pub groups: usize,
    pub dims: usize,
    pub unlimited_dims: usize,
    pub vars: usize,
    pub atts: usize,
    pub user_types: usize,
    /// Bytes of variable data held by the session.
    pub data_bytes: u64,
    /// Size of the image on disk, when there is one.
    pub image_bytes: Option<u64>,
    pub provenance: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

/// Pulls `created=` out of a provenance string.
fn created_from(provenance: &str) -> Option<DateTime<Utc>> {
    provenance
        .split(',')
        .find_map(|kv| kv.strip_prefix("created="))
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

impl NcFile {
    pub fn summary(&self) -> CatalogSummary {
        let groups: Vec<_> = self.graph.live_groups().collect();
        let provenance = self
            .provenance()
            .and_then(|a| a.data.as_text());
        CatalogSummary {
            io_type: self.io.io_type(),
            path: self.path.clone(),
            state: self.state,
            read_only: self.mode.read_only,
            groups: groups.len(),
            dims: self.graph.live_dims().count(),
            unlimited_dims: self.graph.live_dims().filter(|d| d.unlimited).count(),
            vars: groups.iter().map(|g| g.vars.len()).sum(),
            atts: groups
                .iter()
                .map(|g| g.atts.len() + g.vars.iter().map(|v| v.atts.len()).sum::<usize>())
                .sum(),
            user_types: self.graph.live_types().count(),
            data_bytes: groups
                .iter()
                .flat_map(|g| g.vars.iter())
                .map(|v| v.data.len() as u64)
                .sum(),
            image_bytes: self
                .path
                .as_ref()
                .and_then(|p| std::fs::metadata(p).ok())
                .map(|m| m.len()),
            created: provenance.as_deref().and_then(created_from),
            provenance,
        }
    }
}

impl fmt::Display for CatalogSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.path {
            Some(p) => writeln!(f, "Catalog: {} ({})", p.display(), self.io_type)?,
            None => writeln!(f, "Catalog: <memory> ({})", self.io_type)?,
        }
        writeln!(
            f,
            "State: {:?}{}",
            self.state,
            if self.read_only { ", read-only" } else { "" }
        )?;
        writeln!(f, "Groups: {}", self.groups)?;
        writeln!(
            f,
            "Dimensions: {} ({} unlimited)",
            self.dims, self.unlimited_dims
        )?;
        writeln!(f, "Variables: {}", self.vars)?;
        writeln!(f, "Attributes: {}", self.atts)?;
        writeln!(f, "User types: {}", self.user_types)?;
        writeln!(f, "Data held: {}", convert(self.data_bytes as f64))?;
        if let Some(size) = self.image_bytes {
            writeln!(f, "Image size: {}", convert(size as f64))?;
        }
        if let Some(created) = self.created {
            writeln!(f, "Created: {}", created.format("%Y-%m-%d %H:%M:%S UTC"))?;
        }
        match &self.provenance {
            Some(p) => write!(f, "Provenance: {}", p),
            None => write!(f, "Provenance: <none>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::AtomicType;
    use crate::values::NcValues;

    #[test]
    fn summary_counts_the_graph() {
        let mut f = NcFile::create(Config::memory()).unwrap();
        let t = f.add_dimension(0, "time", None).unwrap();
        let g = f.add_group(0, "g").unwrap();
        let v = f.add_variable(g, "v", AtomicType::Int.id(), &[t]).unwrap();
        f.put_att_text(g, Some(v), "units", "s").unwrap();
        f.put_att_text(0, None, "title", "demo").unwrap();
        f.put_var(g, v, NcValues::Int(vec![1, 2, 3])).unwrap();

        let s = f.summary();
        assert_eq!((s.groups, s.dims, s.unlimited_dims), (2, 1, 1));
        assert_eq!((s.vars, s.atts, s.user_types), (1, 2, 0));
        assert_eq!(s.data_bytes, 12);
        assert!(s.created.is_some());
        let text = s.to_string();
        assert!(text.contains("Catalog: <memory>"));
        assert!(text.contains("Dimensions: 1 (1 unlimited)"));
    }

    #[test]
    fn created_timestamp_is_parsed() {
        let ts = created_from("version=2,ncmeta=0.3.0,created=2024-05-01T12:00:00Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T12:00:00+00:00");
        assert!(created_from("version=2").is_none());
    }
}
