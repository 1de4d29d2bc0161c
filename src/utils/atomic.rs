//! Atomic file operations
//!
//! Snapshot files are replaced, never edited in place:
//!
//! 1. Write to a sibling `.tmp` file
//! 2. `sync_all()` to flush to disk
//! 3. Copy the current file to its backup path (optional)
//! 4. Rename the temp file over the final path
//!
//! The final path is never missing: a crash leaves the old file or the new
//! one, plus possibly a stray `.tmp` that [`cleanup_temp_files`] removes on
//! the next open.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use crate::error::StoreResult;

/// Atomically replace `path` with whatever `write_fn` writes
pub fn atomic_write_with<P, F>(path: P, write_fn: F) -> StoreResult<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut File) -> io::Result<()>,
{
    replace_with_backup(path, None::<&Path>, write_fn)
}

/// Atomically replace `path` with `content`
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &str) -> StoreResult<()> {
    atomic_write_with(path, |file| file.write_all(content.as_bytes()))
}

/// Atomically replace `path`, keeping its previous content at `backup`
///
/// An older backup is overwritten. When `path` does not exist yet no backup
/// is produced. The current file stays in place until the rename.
pub fn replace_with_backup<P, B, F>(path: P, backup: Option<B>, write_fn: F) -> StoreResult<()>
where
    P: AsRef<Path>,
    B: AsRef<Path>,
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let path = path.as_ref();
    let temp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    {
        let mut file = File::create(&temp_path)?;
        write_fn(&mut file)?;
        file.sync_all()?;
    }

    if let Some(backup) = backup {
        if path.exists() {
            fs::copy(path, backup.as_ref())?;
        }
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Remove leftover `.tmp` files from interrupted writes
pub fn cleanup_temp_files<P: AsRef<Path>>(dir: P) -> StoreResult<usize> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(0);
    }

    let mut cleaned = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "tmp") {
            fs::remove_file(&path)?;
            cleaned += 1;
        }
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snapshots").join("nested").join("a.json");

        atomic_write(&path, "{}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_replace_keeps_previous_as_backup() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("latest.json");
        let backup = temp_dir.path().join("previous.json");

        replace_with_backup(&path, Some(&backup), |f| f.write_all(b"v1")).unwrap();
        assert!(!backup.exists());

        replace_with_backup(&path, Some(&backup), |f| f.write_all(b"v2")).unwrap();
        replace_with_backup(&path, Some(&backup), |f| f.write_all(b"v3")).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "v3");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "v2");
    }

    #[test]
    fn test_interrupted_replace_keeps_current_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("latest.json");
        let backup = temp_dir.path().join("previous.json");
        replace_with_backup(&path, Some(&backup), |f| f.write_all(b"v1")).unwrap();

        // Fails after the temp file is written, before anything is swapped
        let result = replace_with_backup(&path, Some(temp_dir.path().join("no-such-dir").join("b.json")), |f| {
            f.write_all(b"v2")
        });
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "v1");
        assert!(path.with_extension("tmp").exists());

        assert_eq!(cleanup_temp_files(temp_dir.path()).unwrap(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "v1");
    }

    #[test]
    fn test_failed_write_leaves_original() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("latest.json");
        atomic_write(&path, "good").unwrap();

        let result = atomic_write_with(&path, |_| Err(io::Error::new(io::ErrorKind::Other, "boom")));
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "good");
    }

    #[test]
    fn test_cleanup_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.tmp"), "x").unwrap();
        fs::write(temp_dir.path().join("b.tmp"), "y").unwrap();
        fs::write(temp_dir.path().join("keep.json"), "z").unwrap();

        assert_eq!(cleanup_temp_files(temp_dir.path()).unwrap(), 2);
        assert!(temp_dir.path().join("keep.json").exists());
        assert_eq!(cleanup_temp_files(temp_dir.path().join("missing")).unwrap(), 0);
    }
}
