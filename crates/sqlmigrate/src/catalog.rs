//! Discovery and ordering of migration files.
//!
//! The catalogue is frozen at engine construction: a recursive walk of the
//! migrations directory records the relative path of every `.sql` leaf.
//! Ordering is purely lexicographic over those paths, ascending for up
//! and descending for down. File contents are read lazily, one file at a
//! time.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MigrateError, Result};
use crate::versions::VersionSet;

/// Which way a migration file runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Canonical filename suffix, leading dot included.
    pub fn suffix(self) -> &'static str {
        match self {
            Direction::Up => ".up.sql",
            Direction::Down => ".down.sql",
        }
    }
}

/// The version token of a migration file: the part of its file name before
/// the first `_`. Opaque bytes, compared and sorted lexicographically.
pub fn version_of(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.split('_').next().unwrap_or(base)
}

/// The frozen, ordered set of migration files under one directory.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
    files: Vec<String>,
}

impl Catalog {
    /// Walk `root` recursively and record every `.sql` leaf, sorted
    /// ascending. Non-`.sql` entries are ignored. `.sql` files without the
    /// canonical `.up.sql`/`.down.sql` suffix are rejected, as are two
    /// files resolving to the same version and direction.
    pub fn discover(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let mut files = Vec::new();
        walk(&root, Path::new(""), &mut files).map_err(|e| {
            MigrateError::Config(format!(
                "unable to read migrations directory {}: {e}",
                root.display()
            ))
        })?;
        files.sort();

        let mut seen: HashMap<(String, &'static str), &String> = HashMap::new();
        for file in &files {
            let direction = if file.ends_with(Direction::Down.suffix()) {
                Direction::Down
            } else if file.ends_with(Direction::Up.suffix()) {
                Direction::Up
            } else {
                return Err(MigrateError::BadFilename(file.clone()));
            };
            let key = (version_of(file).to_string(), direction.suffix());
            if let Some(first) = seen.insert(key, file) {
                return Err(MigrateError::DuplicateVersion {
                    version: version_of(file).to_string(),
                    first: first.clone(),
                    second: file.clone(),
                });
            }
        }

        Ok(Self { root, files })
    }

    /// Every discovered file, relative to the root, ascending.
    pub fn file_names(&self) -> &[String] {
        &self.files
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Up-migrations whose version is not yet recorded, ascending.
    pub fn pending_up(&self, applied: &VersionSet) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| f.ends_with(Direction::Up.suffix()))
            .filter(|f| !applied.contains(version_of(f)))
            .cloned()
            .collect()
    }

    /// The most recent `step` down-migrations whose version is recorded,
    /// descending. `step = 0` selects nothing; a `step` past the applied
    /// count selects everything applicable.
    pub fn applicable_down(&self, applied: &VersionSet, step: usize) -> Vec<String> {
        self.files
            .iter()
            .rev()
            .filter(|f| f.ends_with(Direction::Down.suffix()))
            .filter(|f| applied.contains(version_of(f)))
            .take(step)
            .cloned()
            .collect()
    }

    /// Read one migration file. Contents are opaque bytes.
    pub fn content(&self, name: &str) -> Result<Vec<u8>> {
        fs::read(self.root.join(name)).map_err(|e| MigrateError::Migration {
            file: name.to_string(),
            message: e.to_string(),
            progress: None,
        })
    }
}

fn walk(base: &Path, rel: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(base.join(rel))? {
        let entry = entry?;
        let child = rel.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            walk(base, &child, out)?;
        } else {
            let name = rel_path_string(&child);
            if name.ends_with(".sql") {
                out.push(name);
            }
        }
    }
    Ok(())
}

/// Relative path with `/` separators on every platform, so catalogue order
/// is stable.
fn rel_path_string(path: &Path) -> String {
    path.iter()
        .map(|c| c.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn dir_with(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            let path = dir.path().join(file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, b"SELECT 1;").unwrap();
        }
        dir
    }

    #[test]
    fn test_version_of() {
        assert_eq!(version_of("20240101120000_create_users.up.sql"), "20240101120000");
        assert_eq!(version_of("v1_a_b_c.down.sql"), "v1");
        assert_eq!(version_of("sub/dir/20240101_x.up.sql"), "20240101");
        // No underscore: the whole file name is the token.
        assert_eq!(version_of("20240101.up.sql"), "20240101.up.sql");
    }

    #[test]
    fn test_discover_sorts_and_recurses() {
        let dir = dir_with(&[
            "20240102_b.up.sql",
            "20240101_a.up.sql",
            "20240101_a.down.sql",
            "sub/20240103_c.up.sql",
            "README.md",
        ]);
        let catalog = Catalog::discover(dir.path()).unwrap();
        assert_eq!(
            catalog.file_names(),
            &[
                "20240101_a.down.sql",
                "20240101_a.up.sql",
                "20240102_b.up.sql",
                "sub/20240103_c.up.sql",
            ]
        );
    }

    #[test]
    fn test_discover_rejects_duplicate_version_direction() {
        let dir = dir_with(&["20240101_a.up.sql", "sub/20240101_b.up.sql"]);
        let err = Catalog::discover(dir.path()).unwrap_err();
        assert!(matches!(err, MigrateError::DuplicateVersion { version, .. } if version == "20240101"));
    }

    #[test]
    fn test_discover_allows_same_version_both_directions() {
        let dir = dir_with(&["20240101_a.up.sql", "20240101_a.down.sql"]);
        assert!(Catalog::discover(dir.path()).is_ok());
    }

    #[test]
    fn test_discover_rejects_suffix_without_leading_dot() {
        // `setup.sql` ends in `up.sql` but not `.up.sql`.
        let dir = dir_with(&["setup.sql"]);
        let err = Catalog::discover(dir.path()).unwrap_err();
        assert!(matches!(err, MigrateError::BadFilename(name) if name == "setup.sql"));
    }

    #[test]
    fn test_pending_up_is_gap_tolerant() {
        let dir = dir_with(&[
            "20240101_a.up.sql",
            "20240102_b.up.sql",
            "20240103_c.up.sql",
        ]);
        let catalog = Catalog::discover(dir.path()).unwrap();
        // Only the middle version is applied; the older file that appeared
        // later must still be picked up.
        let applied: VersionSet = ["20240102"].into_iter().collect();
        assert_eq!(
            catalog.pending_up(&applied),
            vec!["20240101_a.up.sql", "20240103_c.up.sql"]
        );
    }

    #[test]
    fn test_applicable_down_counts_and_order() {
        let dir = dir_with(&[
            "20240101_a.down.sql",
            "20240102_b.down.sql",
            "20240103_c.down.sql",
            "20240104_d.down.sql",
        ]);
        let catalog = Catalog::discover(dir.path()).unwrap();
        let applied: VersionSet = ["20240101", "20240102", "20240103"].into_iter().collect();

        assert!(catalog.applicable_down(&applied, 0).is_empty());
        assert_eq!(
            catalog.applicable_down(&applied, 2),
            vec!["20240103_c.down.sql", "20240102_b.down.sql"]
        );
        // A step past the applied count selects everything applicable;
        // unapplied 20240104 is skipped.
        assert_eq!(
            catalog.applicable_down(&applied, 10),
            vec![
                "20240103_c.down.sql",
                "20240102_b.down.sql",
                "20240101_a.down.sql"
            ]
        );
    }

    #[test]
    fn test_content_reads_file() {
        let dir = dir_with(&["20240101_a.up.sql"]);
        let catalog = Catalog::discover(dir.path()).unwrap();
        assert_eq!(catalog.content("20240101_a.up.sql").unwrap(), b"SELECT 1;");
    }

    #[test]
    fn test_content_missing_file_names_the_file() {
        let dir = dir_with(&["20240101_a.up.sql"]);
        let catalog = Catalog::discover(dir.path()).unwrap();
        let err = catalog.content("20240999_gone.up.sql").unwrap_err();
        assert!(err.to_string().contains("20240999_gone.up.sql"));
    }
}
