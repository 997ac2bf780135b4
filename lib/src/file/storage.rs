//! Per-variable storage hints and file-wide defaults. Hints are recorded in
//! the catalog and handed to the backend; nothing here moves bytes.

use super::NcFile;
use crate::consts::{FILL_VALUE_ATT, MAX_DEFLATE_LEVEL};
use crate::errors::{CatalogError, Result};
use crate::model::*;
use crate::options::{Chunking, FillMode};
use crate::types::Endianness;
use crate::values::NcValues;
use log::debug;

impl NcFile {
    /// Variable whose storage may still change: not yet created in the backend.
    fn storage_target(&self, gid: GroupId, varid: VarId) -> Result<&Variable> {
        self.check_define()?;
        let var = self.var(gid, varid)?;
        if var.flags.created {
            return Err(CatalogError::LateDefinition);
        }
        Ok(var)
    }

    /// Lengths of a variable's dimensions; unlimited ones report `None`.
    fn dim_extents(&self, var: &Variable) -> Result<Vec<Option<usize>>> {
        var.dimids
            .iter()
            .map(|d| {
                let (dim, _) = self.find_dim(var.container, *d)?;
                Ok((!dim.unlimited).then_some(dim.len))
            })
            .collect()
    }

    fn default_chunks(extents: &[Option<usize>]) -> Vec<usize> {
        extents.iter().map(|e| e.unwrap_or(1).max(1)).collect()
    }

    pub fn set_chunking(&mut self, gid: GroupId, varid: VarId, chunking: Chunking) -> Result<()> {
        let var = self.storage_target(gid, varid)?;
        let extents = self.dim_extents(var)?;
        if extents.is_empty() {
            return Err(CatalogError::Invalid(
                "scalar variables have no storage layout".into(),
            ));
        }
        match &chunking {
            Chunking::Contiguous => {
                if extents.iter().any(Option::is_none) {
                    return Err(CatalogError::Invalid(
                        "variables with an unlimited dimension must be chunked".into(),
                    ));
                }
                if var.storage.deflate.is_some()
                    || var.storage.fletcher32
                    || !var.storage.filters.is_empty()
                {
                    return Err(CatalogError::Invalid(
                        "filtered variables must be chunked".into(),
                    ));
                }
            }
            Chunking::Chunked(sizes) => {
                if sizes.len() != extents.len() {
                    return Err(CatalogError::Invalid(format!(
                        "{} chunk sizes for {} dimensions",
                        sizes.len(),
                        extents.len()
                    )));
                }
                for (size, extent) in sizes.iter().zip(&extents) {
                    if *size == 0 {
                        return Err(CatalogError::Invalid("chunk sizes must be nonzero".into()));
                    }
                    if let Some(len) = extent {
                        if size > len {
                            return Err(CatalogError::Invalid(format!(
                                "chunk size {} exceeds dimension length {}",
                                size, len
                            )));
                        }
                    }
                }
            }
        }
        let var = self.var_mut(gid, varid)?;
        match chunking {
            Chunking::Contiguous => {
                var.storage.contiguous = true;
                var.storage.chunksizes.clear();
            }
            Chunking::Chunked(sizes) => {
                var.storage.contiguous = false;
                var.storage.chunksizes = sizes;
            }
        }
        var.flags.dirty = true;
        self.touch();
        Ok(())
    }

    /// Current layout of a variable.
    pub fn chunking(&self, gid: GroupId, varid: VarId) -> Result<Chunking> {
        let var = self.var(gid, varid)?;
        Ok(if var.storage.contiguous {
            Chunking::Contiguous
        } else {
            Chunking::Chunked(var.storage.chunksizes.clone())
        })
    }

    /// Switches a variable to chunked storage, filling in default chunk sizes
    /// if none were set.
    fn require_chunked(&mut self, gid: GroupId, varid: VarId) -> Result<()> {
        let var = self.var(gid, varid)?;
        let chunks = if var.storage.chunksizes.is_empty() {
            Self::default_chunks(&self.dim_extents(var)?)
        } else {
            var.storage.chunksizes.clone()
        };
        let var = self.var_mut(gid, varid)?;
        var.storage.contiguous = false;
        var.storage.chunksizes = chunks;
        Ok(())
    }

    pub fn set_deflate(
        &mut self,
        gid: GroupId,
        varid: VarId,
        shuffle: bool,
        level: Option<u32>,
    ) -> Result<()> {
        self.storage_target(gid, varid)?;
        if let Some(l) = level {
            if l > MAX_DEFLATE_LEVEL {
                return Err(CatalogError::Invalid(format!(
                    "deflate level {} is above {}",
                    l, MAX_DEFLATE_LEVEL
                )));
            }
        }
        if level.is_some() || shuffle {
            self.require_chunked(gid, varid)?;
        }
        let var = self.var_mut(gid, varid)?;
        var.storage.shuffle = shuffle;
        var.storage.deflate = level;
        var.flags.dirty = true;
        self.touch();
        debug!("Variable {}/{} deflate {:?} shuffle {}", gid, varid, level, shuffle);
        Ok(())
    }

    pub fn set_fletcher32(&mut self, gid: GroupId, varid: VarId, on: bool) -> Result<()> {
        self.storage_target(gid, varid)?;
        if on {
            self.require_chunked(gid, varid)?;
        }
        let var = self.var_mut(gid, varid)?;
        var.storage.fletcher32 = on;
        var.flags.dirty = true;
        self.touch();
        Ok(())
    }

    /// Appends a filter to the chain, or replaces the parameters of the
    /// filter with the same id.
    pub fn set_filter(&mut self, gid: GroupId, varid: VarId, filter: FilterSpec) -> Result<()> {
        self.storage_target(gid, varid)?;
        if filter.id == 0 {
            return Err(CatalogError::Invalid("filter id 0 is reserved".into()));
        }
        self.require_chunked(gid, varid)?;
        let var = self.var_mut(gid, varid)?;
        match var.storage.filters.iter_mut().find(|f| f.id == filter.id) {
            Some(existing) => existing.params = filter.params,
            None => var.storage.filters.push(filter),
        }
        var.flags.dirty = true;
        self.touch();
        Ok(())
    }

    /// Sets a variable's fill behaviour. A value is stored as its `_FillValue`
    /// attribute.
    pub fn set_fill(
        &mut self,
        gid: GroupId,
        varid: VarId,
        no_fill: bool,
        value: Option<NcValues>,
    ) -> Result<()> {
        let type_id = self.storage_target(gid, varid)?.type_id;
        if let Some(v) = value {
            self.put_att(gid, Some(varid), FILL_VALUE_ATT, type_id, v)?;
        }
        let var = self.var_mut(gid, varid)?;
        var.fill.no_fill = no_fill;
        var.flags.dirty = true;
        self.touch();
        Ok(())
    }

    pub fn set_endianness(&mut self, gid: GroupId, varid: VarId, order: Endianness) -> Result<()> {
        self.storage_target(gid, varid)?;
        let var = self.var_mut(gid, varid)?;
        var.endianness = order;
        var.flags.dirty = true;
        self.touch();
        Ok(())
    }

    /// Tunes a variable's chunk cache. Allowed in either mode.
    pub fn set_chunk_cache(&mut self, gid: GroupId, varid: VarId, cache: ChunkCache) -> Result<()> {
        self.check_writable()?;
        check_preemption(cache.preemption)?;
        self.var_mut(gid, varid)?.storage.chunk_cache = cache;
        Ok(())
    }

    /// Chunk cache given to variables defined from now on.
    pub fn set_default_chunk_cache(&mut self, cache: ChunkCache) -> Result<()> {
        check_preemption(cache.preemption)?;
        self.default_chunk_cache = cache;
        Ok(())
    }

    pub fn default_chunk_cache(&self) -> ChunkCache {
        self.default_chunk_cache
    }

    /// Chooses independent or collective access. Only meaningful for
    /// sessions opened for parallel access.
    pub fn set_parallel_access(
        &mut self,
        gid: GroupId,
        varid: VarId,
        access: ParallelAccess,
    ) -> Result<()> {
        self.check_open()?;
        if !self.mode.parallel {
            return Err(CatalogError::Invalid(
                "session was not opened for parallel access".into(),
            ));
        }
        self.var_mut(gid, varid)?.parallel_access = access;
        Ok(())
    }

    /// Sets the fill mode for variables defined from now on, returning the
    /// previous mode.
    pub fn set_fill_mode(&mut self, mode: FillMode) -> Result<FillMode> {
        self.check_writable()?;
        let old = self.fill_mode;
        self.fill_mode = mode;
        Ok(old)
    }
}

fn check_preemption(p: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&p) {
        return Err(CatalogError::Invalid(format!(
            "chunk cache preemption {} is outside [0, 1]",
            p
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::errors::CatalogError;
    use crate::file::NcFile;
    use crate::model::{ChunkCache, FilterSpec, ParallelAccess};
    use crate::options::{Chunking, FillMode};
    use crate::types::AtomicType;
    use crate::values::NcValues;

    fn with_var(unlimited: bool) -> NcFile {
        let mut f = NcFile::create(Config::memory()).unwrap();
        let t = f
            .add_dimension(0, "t", if unlimited { None } else { Some(10) })
            .unwrap();
        let x = f.add_dimension(0, "x", Some(4)).unwrap();
        f.add_variable(0, "v", AtomicType::Float.id(), &[t, x]).unwrap();
        f
    }

    #[test]
    fn chunk_sizes_are_validated() {
        let mut f = with_var(false);
        assert!(f.set_chunking(0, 0, Chunking::Chunked(vec![5])).is_err());
        assert!(f.set_chunking(0, 0, Chunking::Chunked(vec![5, 0])).is_err());
        assert!(f.set_chunking(0, 0, Chunking::Chunked(vec![5, 8])).is_err());
        f.set_chunking(0, 0, Chunking::Chunked(vec![5, 4])).unwrap();
        assert_eq!(f.chunking(0, 0).unwrap(), Chunking::Chunked(vec![5, 4]));
        f.set_chunking(0, 0, Chunking::Contiguous).unwrap();
        assert_eq!(f.chunking(0, 0).unwrap(), Chunking::Contiguous);

        let s = f.add_variable(0, "s", AtomicType::Int.id(), &[]).unwrap();
        assert!(matches!(
            f.set_chunking(0, s, Chunking::Contiguous),
            Err(CatalogError::Invalid(_))
        ));
    }

    #[test]
    fn unlimited_variables_cannot_be_contiguous() {
        let mut f = with_var(true);
        assert!(matches!(
            f.set_chunking(0, 0, Chunking::Contiguous),
            Err(CatalogError::Invalid(_))
        ));
        // record dimension has no upper bound on chunk size
        f.set_chunking(0, 0, Chunking::Chunked(vec![1000, 2])).unwrap();
    }

    #[test]
    fn deflate_forces_default_chunks() {
        let mut f = with_var(true);
        assert!(f.set_deflate(0, 0, false, Some(10)).is_err());
        f.set_deflate(0, 0, true, Some(5)).unwrap();
        let var = f.var(0, 0).unwrap();
        assert!(!var.storage.contiguous);
        assert_eq!(var.storage.chunksizes, vec![1, 4]);
        assert_eq!(var.storage.deflate, Some(5));
        assert!(f.set_chunking(0, 0, Chunking::Contiguous).is_err());
    }

    #[test]
    fn filters_replace_by_id() {
        let mut f = with_var(false);
        f.set_filter(0, 0, FilterSpec { id: 307, params: vec![9] }).unwrap();
        f.set_filter(0, 0, FilterSpec { id: 307, params: vec![1] }).unwrap();
        f.set_fletcher32(0, 0, true).unwrap();
        let var = f.var(0, 0).unwrap();
        assert_eq!(var.storage.filters, vec![FilterSpec { id: 307, params: vec![1] }]);
        assert!(var.storage.fletcher32);
        assert_eq!(var.storage.chunksizes, vec![10, 4]);
    }

    #[test]
    fn storage_is_fixed_once_committed() {
        let mut f = with_var(false);
        f.enddef().unwrap();
        f.redef().unwrap();
        assert!(matches!(
            f.set_deflate(0, 0, false, Some(1)),
            Err(CatalogError::LateDefinition)
        ));
        assert!(matches!(
            f.set_fill(0, 0, false, Some(NcValues::Float(vec![0.0]))),
            Err(CatalogError::LateDefinition)
        ));
    }

    #[test]
    fn fill_settings() {
        let mut f = with_var(false);
        f.set_fill(0, 0, false, Some(NcValues::Double(vec![-1.0]))).unwrap();
        let var = f.var(0, 0).unwrap();
        assert_eq!(var.fill.value, Some(NcValues::Float(vec![-1.0])));
        assert_eq!(f.find_att(0, Some(0), "_FillValue").unwrap().len, 1);
        assert_eq!(f.set_fill_mode(FillMode::NoFill).unwrap(), FillMode::Fill);
        let w = f.add_variable(0, "w", AtomicType::Int.id(), &[]).unwrap();
        assert!(f.var(0, w).unwrap().fill.no_fill);
    }

    #[test]
    fn caches_and_parallel_access() {
        let mut f = with_var(false);
        let bad = ChunkCache {
            preemption: 1.5,
            ..ChunkCache::default()
        };
        assert!(f.set_chunk_cache(0, 0, bad).is_err());
        assert!(f.set_default_chunk_cache(bad).is_err());
        let small = ChunkCache {
            size: 1024,
            ..ChunkCache::default()
        };
        f.set_default_chunk_cache(small).unwrap();
        let w = f.add_variable(0, "w", AtomicType::Int.id(), &[]).unwrap();
        assert_eq!(f.var(0, w).unwrap().storage.chunk_cache.size, 1024);
        f.enddef().unwrap();
        f.set_chunk_cache(0, 0, small).unwrap();
        assert!(f
            .set_parallel_access(0, 0, ParallelAccess::Collective)
            .is_err());
    }
}
