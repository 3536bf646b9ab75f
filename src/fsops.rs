//! Recursive tree copy with mode preservation.
//!
//! Used verbatim by the backup producer (live tree into staging) and with an
//! exclusion set by the restore orchestrator (extracted tree over the live
//! tree, minus the network-identity file).

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Copy `src` into `dst` recursively, preserving unix file modes.
///
/// `exclude` holds paths relative to `src`; an excluded path and everything
/// below it is skipped. Existing files in `dst` are overwritten. Returns the
/// number of regular files copied.
pub fn copy_tree(src: &Path, dst: &Path, exclude: &HashSet<PathBuf>) -> io::Result<u64> {
    if !src.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source directory missing: {}", src.display()),
        ));
    }

    let mut copied = 0u64;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        if rel.as_os_str().is_empty() {
            std::fs::create_dir_all(dst)?;
            continue;
        }
        if is_excluded(&rel, exclude) {
            continue;
        }

        let target = dst.join(&rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if target.symlink_metadata().is_ok() {
                std::fs::remove_file(&target)?;
            }
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

fn is_excluded(rel: &Path, exclude: &HashSet<PathBuf>) -> bool {
    exclude.iter().any(|e| rel == e || rel.starts_with(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_copy_preserves_structure_and_modes() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();

        fs::create_dir(src.path().join("sub")).unwrap();
        fs::write(src.path().join("a.txt"), b"alpha").unwrap();
        fs::write(src.path().join("sub/b.sh"), b"#!/bin/sh\n").unwrap();
        fs::set_permissions(
            src.path().join("sub/b.sh"),
            fs::Permissions::from_mode(0o755),
        )
        .unwrap();

        let copied = copy_tree(src.path(), dst.path(), &HashSet::new()).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"alpha");

        let mode = fs::metadata(dst.path().join("sub/b.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_excluded_path_is_not_copied() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();

        fs::write(src.path().join("keep.yml"), b"keep").unwrap();
        fs::write(src.path().join("network.yml"), b"identity").unwrap();

        let exclude: HashSet<PathBuf> = [PathBuf::from("network.yml")].into();
        copy_tree(src.path(), dst.path(), &exclude).unwrap();

        assert!(dst.path().join("keep.yml").exists());
        assert!(!dst.path().join("network.yml").exists());
    }

    #[test]
    fn test_existing_files_are_overwritten() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();

        fs::write(src.path().join("c.txt"), b"new").unwrap();
        fs::write(dst.path().join("c.txt"), b"old").unwrap();

        copy_tree(src.path(), dst.path(), &HashSet::new()).unwrap();
        assert_eq!(fs::read(dst.path().join("c.txt")).unwrap(), b"new");
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let dst = TempDir::new().unwrap();
        let result = copy_tree(Path::new("/nonexistent-tree"), dst.path(), &HashSet::new());
        assert!(result.is_err());
    }
}
