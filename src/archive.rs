//! Archive codec: tar + zstd pack/unpack of directory trees.
//!
//! A packed tree round-trips byte-identically, with relative paths and unix
//! modes preserved. Unpacking rejects entries that would escape the
//! destination directory.

use std::collections::HashSet;
use std::fmt::Display;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder as TarBuilder};
use tracing::debug;
use walkdir::WalkDir;

use crate::utils::errors::{EngineError, Result};

/// Extension of every stored artifact.
pub const ARCHIVE_EXTENSION: &str = "tar.zst";

const ZSTD_LEVEL: i32 = 3;

fn archive_err(e: impl Display) -> EngineError {
    EngineError::Archive(e.to_string())
}

/// Archive `source_dir` into `dest_file`, preserving relative paths, modes,
/// and directory structure.
pub fn pack(source_dir: &Path, dest_file: &Path) -> Result<()> {
    if !source_dir.is_dir() {
        return Err(EngineError::Archive(format!(
            "source directory does not exist: {}",
            source_dir.display()
        )));
    }

    let file = File::create(dest_file)
        .map_err(|e| archive_err(format!("cannot create {}: {e}", dest_file.display())))?;
    let encoder = zstd::Encoder::new(file, ZSTD_LEVEL).map_err(archive_err)?;
    let mut tar = TarBuilder::new(encoder);
    tar.follow_symlinks(false);

    let mut entries = 0u64;
    for entry in WalkDir::new(source_dir).follow_links(false) {
        let entry = entry.map_err(archive_err)?;
        let rel = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(archive_err)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        if entry.file_type().is_dir() {
            tar.append_dir(rel, entry.path()).map_err(archive_err)?;
        } else {
            tar.append_path_with_name(entry.path(), rel)
                .map_err(archive_err)?;
        }
        entries += 1;
    }

    let encoder = tar.into_inner().map_err(archive_err)?;
    encoder.finish().map_err(archive_err)?;
    debug!(entries, archive = %dest_file.display(), "Packed directory tree");
    Ok(())
}

/// Extract `archive_file` into `dest_dir`, creating it if absent.
///
/// Entries whose relative path matches an `exclude` entry exactly are
/// skipped. Entries with an absolute path or a `..` component are rejected
/// before anything is written for them.
pub fn unpack(archive_file: &Path, dest_dir: &Path, exclude: &HashSet<PathBuf>) -> Result<()> {
    let file = File::open(archive_file)
        .map_err(|e| archive_err(format!("cannot open {}: {e}", archive_file.display())))?;
    let decoder = zstd::Decoder::new(file).map_err(archive_err)?;
    let mut archive = Archive::new(decoder);
    archive.set_preserve_permissions(true);

    std::fs::create_dir_all(dest_dir)?;

    let mut extracted = 0u64;
    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let rel = entry.path().map_err(archive_err)?.into_owned();
        reject_traversal(&rel)?;
        if exclude.contains(&rel) {
            debug!(path = %rel.display(), "Skipping excluded archive entry");
            continue;
        }
        let unpacked = entry.unpack_in(dest_dir).map_err(archive_err)?;
        if !unpacked {
            return Err(EngineError::Archive(format!(
                "entry escapes destination: {}",
                rel.display()
            )));
        }
        extracted += 1;
    }

    debug!(extracted, dest = %dest_dir.display(), "Unpacked archive");
    Ok(())
}

fn reject_traversal(rel: &Path) -> Result<()> {
    if rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(EngineError::Archive(format!(
            "path traversal entry rejected: {}",
            rel.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn build_tree(base: &Path) {
        fs::create_dir_all(base.join("conf/deep")).unwrap();
        fs::write(base.join("conf/a.yml"), b"alpha: 1\n").unwrap();
        fs::write(base.join("conf/deep/b.bin"), [0u8, 1, 2, 255]).unwrap();
        fs::write(base.join("run.sh"), b"#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(base.join("run.sh"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let src = TempDir::new().unwrap();
        build_tree(src.path());

        let work = TempDir::new().unwrap();
        let archive = work.path().join("snap.tar.zst");
        pack(src.path(), &archive).unwrap();

        let out = TempDir::new().unwrap();
        unpack(&archive, out.path(), &HashSet::new()).unwrap();

        assert_eq!(
            fs::read(out.path().join("conf/a.yml")).unwrap(),
            fs::read(src.path().join("conf/a.yml")).unwrap()
        );
        assert_eq!(
            fs::read(out.path().join("conf/deep/b.bin")).unwrap(),
            [0u8, 1, 2, 255]
        );
        let mode = fs::metadata(out.path().join("run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_pack_missing_source_fails() {
        let work = TempDir::new().unwrap();
        let result = pack(Path::new("/no/such/tree"), &work.path().join("x.tar.zst"));
        assert!(matches!(result, Err(EngineError::Archive(_))));
    }

    #[test]
    fn test_pack_unwritable_destination_fails() {
        let src = TempDir::new().unwrap();
        build_tree(src.path());
        let result = pack(src.path(), Path::new("/no/such/parent/x.tar.zst"));
        assert!(matches!(result, Err(EngineError::Archive(_))));
    }

    #[test]
    fn test_unpack_rejects_path_traversal() {
        let work = TempDir::new().unwrap();
        let archive_path = work.path().join("evil.tar.zst");

        // Hand-build an archive containing a `../escape` entry. The builder
        // API refuses such paths, so the name bytes go straight into the
        // header, the way a hostile archive would carry them.
        let file = File::create(&archive_path).unwrap();
        let encoder = zstd::Encoder::new(file, ZSTD_LEVEL).unwrap();
        let mut tar = TarBuilder::new(encoder);
        let data = b"owned";
        let mut header = tar::Header::new_old();
        let name = b"../escape.txt";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        tar.append(&header, data.as_slice()).unwrap();
        tar.into_inner().unwrap().finish().unwrap();

        let out = TempDir::new().unwrap();
        let result = unpack(&archive_path, out.path().join("inner").as_path(), &HashSet::new());
        assert!(matches!(result, Err(EngineError::Archive(_))));
        assert!(!out.path().join("escape.txt").exists());
    }

    #[test]
    fn test_unpack_skips_excluded_entries() {
        let src = TempDir::new().unwrap();
        build_tree(src.path());

        let work = TempDir::new().unwrap();
        let archive = work.path().join("snap.tar.zst");
        pack(src.path(), &archive).unwrap();

        let out = TempDir::new().unwrap();
        let exclude: HashSet<PathBuf> = [PathBuf::from("conf/a.yml")].into();
        unpack(&archive, out.path(), &exclude).unwrap();

        assert!(!out.path().join("conf/a.yml").exists());
        assert!(out.path().join("conf/deep/b.bin").exists());
    }

    #[test]
    fn test_unpack_corrupt_archive_fails() {
        let work = TempDir::new().unwrap();
        let bogus = work.path().join("corrupt.tar.zst");
        fs::write(&bogus, b"this is not a zstd stream").unwrap();

        let out = TempDir::new().unwrap();
        let result = unpack(&bogus, out.path(), &HashSet::new());
        assert!(matches!(result, Err(EngineError::Archive(_))));
    }
}
