//! In-memory image buffer used by diskless and in-memory sessions.

use crate::errors::{CatalogError, Result};
use anyhow::anyhow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Backing bytes of an in-memory session.
///
/// The buffer may be shared with a caller. A locked buffer belongs to the
/// caller: the catalog writes into its existing capacity but never grows,
/// shrinks or frees it.
#[derive(Debug, Clone)]
pub struct MemImage {
    buffer: Arc<Mutex<Vec<u8>>>,
    owned: bool,
    persist: Option<PathBuf>,
    backed: bool,
    locked: bool,
    initial_size: usize,
}

impl MemImage {
    /// Empty session-owned buffer.
    pub fn new(initial_size: usize) -> Self {
        MemImage {
            buffer: Arc::new(Mutex::new(Vec::with_capacity(initial_size))),
            owned: true,
            persist: None,
            backed: false,
            locked: false,
            initial_size,
        }
    }

    /// Session-owned copy of existing image bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let initial_size = bytes.len();
        MemImage {
            buffer: Arc::new(Mutex::new(bytes)),
            owned: true,
            persist: None,
            backed: false,
            locked: false,
            initial_size,
        }
    }

    /// Loads a file into memory; the result is backed by that file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| anyhow!("failed to read image {}: {}", path.display(), e))?;
        let mut image = Self::from_bytes(bytes);
        image.backed = true;
        Ok(image)
    }

    /// Wraps a caller's buffer. With `locked`, the catalog never reallocates it.
    pub fn shared(buffer: Arc<Mutex<Vec<u8>>>, locked: bool) -> Self {
        let initial_size = buffer.lock().map(|b| b.len()).unwrap_or(0);
        MemImage {
            buffer,
            owned: false,
            persist: None,
            backed: false,
            locked,
            initial_size,
        }
    }

    /// Writes the buffer to `path` when the session closes.
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist = Some(path.into());
        self.backed = true;
        self
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_backed(&self) -> bool {
        self.backed
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist.as_deref()
    }

    pub fn initial_size(&self) -> usize {
        self.initial_size
    }

    pub fn buffer(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.buffer)
    }

    fn guard(&self) -> Result<MutexGuard<'_, Vec<u8>>> {
        self.buffer
            .lock()
            .map_err(|_| CatalogError::Backend(anyhow!("image buffer lock poisoned")))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.guard()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contents(&self) -> Result<Vec<u8>> {
        Ok(self.guard()?.clone())
    }

    /// Replaces the buffer contents with `bytes`.
    pub fn replace(&self, bytes: &[u8]) -> Result<()> {
        let mut buf = self.guard()?;
        if self.locked {
            if bytes.len() > buf.capacity() {
                return Err(CatalogError::ImageLocked);
            }
            buf.clear();
            buf.extend_from_slice(bytes);
        } else {
            *buf = bytes.to_vec();
        }
        Ok(())
    }

    /// Writes the buffer to the persist path, if one is set.
    pub fn persist(&self) -> Result<()> {
        if let Some(path) = &self.persist {
            let bytes = self.contents()?;
            std::fs::write(path, bytes)
                .map_err(|e| anyhow!("failed to persist image to {}: {}", path.display(), e))?;
        }
        Ok(())
    }

    /// Final bytes of the image. A shared or locked buffer is copied and stays
    /// with its owner.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if !self.owned || self.locked {
            return self.contents();
        }
        match Arc::try_unwrap(self.buffer) {
            Ok(m) => m
                .into_inner()
                .map_err(|_| CatalogError::Backend(anyhow!("image buffer lock poisoned"))),
            Err(shared) => shared
                .lock()
                .map(|b| b.clone())
                .map_err(|_| CatalogError::Backend(anyhow!("image buffer lock poisoned"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_buffer_grows() {
        let img = MemImage::new(4);
        img.replace(&[1; 64]).unwrap();
        assert_eq!(img.len().unwrap(), 64);
        assert!(img.is_owned());
        assert_eq!(img.into_bytes().unwrap(), vec![1; 64]);
    }

    #[test]
    fn locked_buffer_never_grows() {
        let shared = Arc::new(Mutex::new(Vec::with_capacity(8)));
        let img = MemImage::shared(Arc::clone(&shared), true);
        img.replace(&[7; 8]).unwrap();
        assert!(matches!(img.replace(&[7; 9]), Err(CatalogError::ImageLocked)));
        // caller still sees the last successful write
        assert_eq!(*shared.lock().unwrap(), vec![7; 8]);
        let copy = img.into_bytes().unwrap();
        assert_eq!(copy, vec![7; 8]);
        assert_eq!(shared.lock().unwrap().len(), 8);
    }

    #[test]
    fn persist_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mem.ncim");
        let img = MemImage::from_bytes(vec![1, 2, 3]).persist_to(&path);
        assert!(img.is_backed());
        img.persist().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
        let back = MemImage::from_file(&path).unwrap();
        assert_eq!(back.contents().unwrap(), vec![1, 2, 3]);
    }
}
