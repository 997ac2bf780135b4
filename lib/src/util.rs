use crate::consts::IMAGE_EXTENSION;
use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use log::{debug, warn};
use std::path::{Path, PathBuf};

/// Glob matching catalog images anywhere below a directory.
pub fn default_image_glob() -> String {
    format!("**/*.{}", IMAGE_EXTENSION)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Lists image files under `root` whose path relative to `root` matches one
/// of `patterns` (default: every `.ncim` file). Unreadable entries are
/// skipped with a warning.
pub fn find_images(root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let patterns = if patterns.is_empty() {
        vec![default_image_glob()]
    } else {
        patterns.to_vec()
    };
    let set = build_globset(&patterns)?;
    let mut found = Vec::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping entry under {}: {}", root.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if set.is_match(rel) {
            found.push(entry.path().to_path_buf());
        }
    }
    found.sort();
    debug!("Found {} images under {}", found.len(), root.display());
    Ok(found)
}

/// Total size in bytes of the given files; missing files count as zero.
pub fn total_size(paths: &[PathBuf]) -> u64 {
    paths
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_images_by_glob() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("top.ncim"), b"x").unwrap();
        std::fs::write(nested.join("deep.ncim"), b"xyz").unwrap();
        std::fs::write(nested.join("notes.txt"), b"").unwrap();

        let all = find_images(dir.path(), &[]).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(total_size(&all), 4);

        let only_nested = find_images(dir.path(), &["a/**/*.ncim".to_string()]).unwrap();
        assert_eq!(only_nested, vec![nested.join("deep.ncim")]);

        assert!(find_images(dir.path(), &["[".to_string()]).is_err());
    }
}
