// src/archive.rs

//! Narrow tar primitives: extract a stream, archive a directory tree.
//!
//! Extraction accepts plain or gzip-compressed tar input, detected by magic
//! bytes. Creation walks the tree in sorted order so that two runs over an
//! unchanged tree produce byte-identical archives.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Extract a tar stream (optionally gzip-compressed) into `dest`.
///
/// File modes are preserved; ownership is not. Entry paths are confined to
/// `dest`: entries that would escape it are skipped, not written.
pub fn extract<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut reader = BufReader::new(reader);
    let magic = reader
        .fill_buf()
        .map_err(|e| Error::Archive(format!("failed to read archive stream: {e}")))?;
    let gzipped = magic.len() >= 2 && magic[0] == 0x1f && magic[1] == 0x8b;
    if gzipped {
        unpack_entries(tar::Archive::new(GzDecoder::new(reader)), dest)
    } else {
        unpack_entries(tar::Archive::new(reader), dest)
    }
}

fn unpack_entries<R: Read>(mut archive: tar::Archive<R>, dest: &Path) -> Result<()> {
    archive.set_preserve_permissions(true);
    archive.set_preserve_ownerships(false);
    let entries = archive
        .entries()
        .map_err(|e| Error::Archive(format!("unreadable archive: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| Error::Archive(format!("truncated archive: {e}")))?;
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| Error::Archive(format!("failed to extract entry: {e}")))?;
        if !unpacked {
            debug!("skipped archive entry escaping {}", dest.display());
        }
    }
    Ok(())
}

/// Archive the tree under `dir` into an anonymous temp file and return it
/// rewound to the start.
///
/// Entries are `./`-prefixed and sorted by file name; symlinks are kept as
/// links. Spooling through a file keeps memory use flat no matter how large
/// the tree is.
pub fn create(dir: &Path) -> Result<File> {
    let spool = tempfile::tempfile()?;
    let mut builder = tar::Builder::new(spool);
    builder.follow_symlinks(false);
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Archive(format!("failed to walk {}: {e}", dir.display())))?;
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::Archive(e.to_string()))?;
        let name = Path::new(".").join(rel);
        if entry.file_type().is_dir() {
            builder
                .append_dir(&name, entry.path())
                .map_err(|e| Error::Archive(format!("failed to archive {}: {e}", rel.display())))?;
        } else {
            builder
                .append_path_with_name(entry.path(), &name)
                .map_err(|e| Error::Archive(format!("failed to archive {}: {e}", rel.display())))?;
        }
    }
    let mut spool = builder
        .into_inner()
        .map_err(|e| Error::Archive(format!("failed to finish archive: {e}")))?;
    spool.seek(SeekFrom::Start(0))?;
    Ok(spool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn read_entries<R: Read>(reader: R) -> BTreeMap<String, (Vec<u8>, u32)> {
        let mut archive = tar::Archive::new(reader);
        let mut out = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry
                .path()
                .unwrap()
                .to_string_lossy()
                .trim_start_matches("./")
                .trim_end_matches('/')
                .to_string();
            let mode = entry.header().mode().unwrap();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            out.insert(name, (content, mode));
        }
        out
    }

    #[test]
    fn round_trips_content_and_modes() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir(src.path().join("bin")).unwrap();
        let script = src.path().join("bin/run");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(src.path().join("README"), "hello\n").unwrap();

        let archive = create(src.path()).unwrap();
        let dest = tempfile::tempdir().unwrap();
        extract(archive, dest.path()).unwrap();

        assert_eq!(fs::read(dest.path().join("bin/run")).unwrap(), b"#!/bin/sh\n");
        assert_eq!(fs::read(dest.path().join("README")).unwrap(), b"hello\n");
        let mode = fs::metadata(dest.path().join("bin/run")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn creation_is_deterministic() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub/b"), "b").unwrap();
        fs::write(src.path().join("a"), "a").unwrap();

        let mut first = Vec::new();
        create(src.path()).unwrap().read_to_end(&mut first).unwrap();
        let mut second = Vec::new();
        create(src.path()).unwrap().read_to_end(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn entries_are_dot_prefixed_and_sorted() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("zz"), "z").unwrap();
        fs::write(src.path().join("aa"), "a").unwrap();

        let mut archive = tar::Archive::new(create(src.path()).unwrap());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["./aa", "./zz"]);
    }

    #[test]
    fn extracts_gzip_compressed_input() {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(6);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "greeting", &b"Hello\n"[..]).unwrap();
        let data = builder.into_inner().unwrap().finish().unwrap();

        let dest = tempfile::tempdir().unwrap();
        extract(std::io::Cursor::new(data), dest.path()).unwrap();
        assert_eq!(fs::read(dest.path().join("greeting")).unwrap(), b"Hello\n");
    }

    #[test]
    fn preserves_symlinks_as_links() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("target"), "data").unwrap();
        std::os::unix::fs::symlink("target", src.path().join("link")).unwrap();

        let archive = create(src.path()).unwrap();
        let dest = tempfile::tempdir().unwrap();
        extract(archive, dest.path()).unwrap();

        let link = dest.path().join("link");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("target"));
    }

    #[test]
    fn truncated_stream_is_an_archive_error() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("file"), vec![0u8; 4096]).unwrap();
        let mut bytes = Vec::new();
        create(src.path()).unwrap().read_to_end(&mut bytes).unwrap();
        bytes.truncate(bytes.len() / 2);

        let dest = tempfile::tempdir().unwrap();
        let result = extract(std::io::Cursor::new(bytes), dest.path());
        assert!(matches!(result, Err(Error::Archive(_))));
    }

    #[test]
    fn created_archive_reports_file_modes() {
        let src = tempfile::tempdir().unwrap();
        let script = src.path().join("run");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let entries = read_entries(create(src.path()).unwrap());
        let (content, mode) = &entries["run"];
        assert_eq!(content, b"#!/bin/sh\n");
        assert_eq!(mode & 0o777, 0o755);
    }
}
