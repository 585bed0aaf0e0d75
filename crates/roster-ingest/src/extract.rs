//! Archive extractor
//!
//! Unpacks a gzip-compressed tar archive in one streaming pass: the file is
//! read through a gzip decoder straight into the tar reader, and no
//! intermediate `.tar` is written to disk.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::{debug, info, instrument};

use crate::error::ExtractError;
use crate::records::RecordKind;

/// Directory tree produced by a successful extraction
#[derive(Debug, Clone)]
pub struct ExtractedTree {
    pub root: PathBuf,
    /// Number of archive entries unpacked (files and directories)
    pub entries: usize,
}

impl ExtractedTree {
    /// Expected location of a record type's source file
    pub fn path_of(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.file_name())
    }
}

/// Unpack `archive` into the existing directory `target`
///
/// Runs on the blocking pool. Entries whose path would land outside
/// `target` abort the extraction.
#[instrument(skip_all, fields(archive = %archive.display(), target = %target.display()))]
pub async fn extract_archive(archive: &Path, target: &Path) -> Result<ExtractedTree, ExtractError> {
    let archive = archive.to_path_buf();
    let target = target.to_path_buf();

    tokio::task::spawn_blocking(move || extract_archive_blocking(&archive, &target))
        .await
        .map_err(|e| ExtractError::Task(e.to_string()))?
}

fn extract_archive_blocking(archive: &Path, target: &Path) -> Result<ExtractedTree, ExtractError> {
    if !target.is_dir() {
        return Err(ExtractError::MissingTarget {
            path: target.to_path_buf(),
        });
    }

    let file = File::open(archive).map_err(|source| ExtractError::Open {
        path: archive.to_path_buf(),
        source,
    })?;

    let unpack = |source| ExtractError::Unpack {
        archive: archive.to_path_buf(),
        source,
    };

    let decoder = GzDecoder::new(BufReader::new(file));
    let mut tar = Archive::new(decoder);
    tar.set_preserve_permissions(false);

    let mut entries = 0usize;
    for entry in tar.entries().map_err(unpack)? {
        let mut entry = entry.map_err(unpack)?;
        let name = entry.path().map_err(unpack)?.display().to_string();

        if !entry.unpack_in(target).map_err(unpack)? {
            return Err(ExtractError::UnsafeEntry {
                entry: name,
                target: target.to_path_buf(),
            });
        }

        debug!(entry = %name, "Unpacked");
        entries += 1;
    }

    if entries == 0 {
        return Err(ExtractError::EmptyArchive {
            path: archive.to_path_buf(),
        });
    }

    info!(entries, "Archive extracted");

    Ok(ExtractedTree {
        root: target.to_path_buf(),
        entries,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn write_archive(path: &Path, files: &[(&str, &[u8])]) {
        let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[tokio::test]
    async fn test_extracts_nested_tree() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("dataset.tar.gz");
        write_archive(
            &archive,
            &[
                ("individuals.csv", b"Index\n1\n"),
                ("organizations.csv", b"Index\n2\n"),
                ("docs/readme.txt", b"hello"),
            ],
        );
        let target = dir.path().join("extracted");
        std::fs::create_dir(&target).unwrap();

        let tree = extract_archive(&archive, &target).await.unwrap();

        assert_eq!(tree.entries, 3);
        assert_eq!(
            std::fs::read(tree.path_of(RecordKind::Individual)).unwrap(),
            b"Index\n1\n"
        );
        assert!(tree.path_of(RecordKind::Organization).is_file());
        assert_eq!(std::fs::read(target.join("docs/readme.txt")).unwrap(), b"hello");
        // no intermediate tar left behind
        assert!(!dir.path().join("dataset.tar").exists());
    }

    #[tokio::test]
    async fn test_corrupt_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("dataset.tar.gz");
        std::fs::write(&archive, b"this is not gzip data at all").unwrap();

        let err = extract_archive(&archive, dir.path()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Unpack { .. }));
    }

    #[tokio::test]
    async fn test_missing_target_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("dataset.tar.gz");
        write_archive(&archive, &[("individuals.csv", b"Index\n")]);

        let err = extract_archive(&archive, &dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, ExtractError::MissingTarget { .. }));
    }

    #[tokio::test]
    async fn test_missing_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_archive(&dir.path().join("absent.tar.gz"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Open { .. }));
    }

    #[tokio::test]
    async fn test_empty_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("dataset.tar.gz");
        write_archive(&archive, &[]);

        let err = extract_archive(&archive, dir.path()).await.unwrap_err();
        assert!(matches!(err, ExtractError::EmptyArchive { .. }));
    }

    #[tokio::test]
    async fn test_entry_escaping_target_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("dataset.tar.gz");

        let encoder = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let data = b"escaped";
        let mut header = tar::Header::new_old();
        let name = b"../escaped.txt";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, &data[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let target = dir.path().join("extracted");
        std::fs::create_dir(&target).unwrap();

        let err = extract_archive(&archive, &target).await.unwrap_err();
        assert!(matches!(err, ExtractError::UnsafeEntry { .. }));
        assert!(!dir.path().join("escaped.txt").exists());
    }
}
