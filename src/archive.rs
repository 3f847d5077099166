//! Chapter archive handling.
//!
//! Chapters arrive as zip archives that are unpacked into the chapter
//! directory, and per-page downloads can be packed back into an archive when
//! the configured output format asks for one. The work is blocking file IO,
//! so [`ZipCodec`] runs it on the blocking pool.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Errors raised while unpacking or packing chapter archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Filesystem failure on `path`.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The archive is corrupt or could not be written.
    #[error("zip error on {path}: {source}")]
    Zip {
        /// The archive path.
        path: PathBuf,
        /// The underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },

    /// An entry would land outside the destination directory.
    #[error("archive {archive} has unsafe entry {entry}")]
    UnsafeEntry {
        /// The archive path.
        archive: PathBuf,
        /// The raw entry name.
        entry: String,
    },

    /// The blocking worker panicked or was cancelled.
    #[error("archive worker failed: {0}")]
    Worker(String),
}

impl ArchiveError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    fn zip(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.into(),
            source,
        }
    }
}

/// Unpacks and packs chapter archives.
#[async_trait]
pub trait ArchiveCodec: Send + Sync {
    /// Extracts every entry of `archive` into `dest`, creating it if needed.
    ///
    /// Returns the number of files written.
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<usize, ArchiveError>;

    /// Packs every file below `src_dir` into a new archive at `archive`.
    ///
    /// Returns the number of files packed.
    async fn compress(&self, src_dir: &Path, archive: &Path) -> Result<usize, ArchiveError>;
}

/// [`ArchiveCodec`] for zip archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipCodec;

#[async_trait]
impl ArchiveCodec for ZipCodec {
    #[instrument(level = "debug", skip(self), fields(archive = %archive.display()))]
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<usize, ArchiveError> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || extract_zip(&archive, &dest))
            .await
            .map_err(|e| ArchiveError::Worker(e.to_string()))?
    }

    #[instrument(level = "debug", skip(self), fields(archive = %archive.display()))]
    async fn compress(&self, src_dir: &Path, archive: &Path) -> Result<usize, ArchiveError> {
        let src_dir = src_dir.to_path_buf();
        let archive = archive.to_path_buf();
        tokio::task::spawn_blocking(move || compress_dir(&src_dir, &archive))
            .await
            .map_err(|e| ArchiveError::Worker(e.to_string()))?
    }
}

fn extract_zip(source: &Path, target: &Path) -> Result<usize, ArchiveError> {
    let file = File::open(source).map_err(|e| ArchiveError::io(source, e))?;
    let mut archive =
        ZipArchive::new(BufReader::new(file)).map_err(|e| ArchiveError::zip(source, e))?;
    fs::create_dir_all(target).map_err(|e| ArchiveError::io(target, e))?;

    let mut written = 0;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ArchiveError::zip(source, e))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(ArchiveError::UnsafeEntry {
                archive: source.to_path_buf(),
                entry: entry.name().to_string(),
            });
        };
        let destination = target.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&destination).map_err(|e| ArchiveError::io(&destination, e))?;
            continue;
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
        }
        let mut output = File::create(&destination).map_err(|e| ArchiveError::io(&destination, e))?;
        io::copy(&mut entry, &mut output).map_err(|e| ArchiveError::io(&destination, e))?;
        written += 1;
    }

    debug!(files = written, target = %target.display(), "archive extracted");
    Ok(written)
}

fn compress_dir(src_dir: &Path, archive_path: &Path) -> Result<usize, ArchiveError> {
    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
    }
    let file = File::create(archive_path).map_err(|e| ArchiveError::io(archive_path, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut packed = 0;
    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src_dir).to_path_buf();
            ArchiveError::io(path, io::Error::other(e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(src_dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        zip.start_file(name, options)
            .map_err(|e| ArchiveError::zip(archive_path, e))?;
        let mut input = File::open(entry.path()).map_err(|e| ArchiveError::io(entry.path(), e))?;
        io::copy(&mut input, &mut zip).map_err(|e| ArchiveError::io(archive_path, e))?;
        packed += 1;
    }

    zip.finish().map_err(|e| ArchiveError::zip(archive_path, e))?;
    debug!(files = packed, archive = %archive_path.display(), "directory packed");
    Ok(packed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        for (name, body) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn test_zip_codec_extracts_entries() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("Naruto 1.zip");
        write_zip(&archive, &[("01.jpg", b"one"), ("02.jpg", b"two")]);

        let dest = dir.path().join("Naruto 1");
        let written = ZipCodec.extract(&archive, &dest).await.unwrap();

        assert_eq!(written, 2);
        assert_eq!(fs::read(dest.join("01.jpg")).unwrap(), b"one");
        assert_eq!(fs::read(dest.join("02.jpg")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_zip_codec_rejects_traversal_entry() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../escape.jpg", b"x")]);

        let result = ZipCodec.extract(&archive, &dir.path().join("out")).await;

        assert!(matches!(result, Err(ArchiveError::UnsafeEntry { .. })));
        assert!(!dir.path().join("escape.jpg").exists());
    }

    #[tokio::test]
    async fn test_zip_codec_corrupt_archive_is_zip_error() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"this is not a zip").unwrap();

        let result = ZipCodec.extract(&archive, &dir.path().join("out")).await;
        assert!(matches!(result, Err(ArchiveError::Zip { .. })));
    }

    #[tokio::test]
    async fn test_zip_codec_compress_then_extract_preserves_files() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("Bleach 3");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("001.png"), b"first").unwrap();
        fs::write(src.join("002.png"), b"second").unwrap();

        let archive = dir.path().join("Bleach 3.zip");
        assert_eq!(ZipCodec.compress(&src, &archive).await.unwrap(), 2);

        let out = dir.path().join("check");
        ZipCodec.extract(&archive, &out).await.unwrap();
        assert_eq!(fs::read(out.join("002.png")).unwrap(), b"second");
    }
}
