//! Removal of filler pages and duplicated files.
//!
//! Every file of a cleaning pass is hashed fresh. Files matching the
//! reference sample (the catalog's credits page) are removed outright, and
//! every member of a group of byte-identical files is removed too: a
//! duplicated page is presumed to be filler, so no canonical copy is kept.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Default number of files read at once while hashing.
pub const DEFAULT_READ_CONCURRENCY: usize = 50;

/// Reference digests already computed by this process, by sample path.
static REFERENCE_DIGESTS: LazyLock<Mutex<HashMap<PathBuf, ContentDigest>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Errors from a cleaning pass.
///
/// Unreadable files during hashing are not errors; they are skipped.
#[derive(Debug, Error)]
pub enum DedupError {
    /// The reference sample could not be read.
    #[error("cannot read reference sample {path}: {source}")]
    Reference {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A folder could not be listed.
    #[error("cannot list {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// A file marked for removal could not be deleted.
    #[error("cannot remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// SHA-256 digest of a file's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Digest of `bytes`.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Reads `path` and digests its content.
    ///
    /// # Errors
    ///
    /// Returns the IO error if the file cannot be read.
    pub async fn of_file(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::of_bytes(&bytes))
    }

    /// Digest of the reference sample at `path`, computed once per process.
    ///
    /// # Errors
    ///
    /// Returns [`DedupError::Reference`] if the sample cannot be read.
    pub async fn of_reference_sample(path: &Path) -> Result<Self, DedupError> {
        let cached = REFERENCE_DIGESTS
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(path)
            .copied();
        if let Some(digest) = cached {
            return Ok(digest);
        }

        let digest = Self::of_file(path)
            .await
            .map_err(|source| DedupError::Reference {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), %digest, "reference digest computed");
        REFERENCE_DIGESTS
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(path.to_path_buf(), digest);
        Ok(digest)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({self})")
    }
}

/// Which concerns a pass removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanOptions {
    pub remove_credits: bool,
    pub remove_duplicates: bool,
    /// Files hashed at once.
    pub read_concurrency: usize,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            remove_credits: true,
            remove_duplicates: true,
            read_concurrency: DEFAULT_READ_CONCURRENCY,
        }
    }
}

/// Files selected for removal by one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanPlan {
    /// Files identical to the reference sample, sorted by path.
    pub credits: Vec<PathBuf>,
    /// Members of duplicate groups, grouped and sorted by path within each group.
    pub duplicates: Vec<PathBuf>,
}

impl CleanPlan {
    /// All files to remove, credits first.
    #[must_use]
    pub fn into_paths(self) -> Vec<PathBuf> {
        let mut paths = self.credits;
        paths.extend(self.duplicates);
        paths
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credits.is_empty() && self.duplicates.is_empty()
    }
}

/// Counts of removed files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanReport {
    pub credits_removed: usize,
    pub duplicates_removed: usize,
}

impl CleanReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.credits_removed + self.duplicates_removed
    }
}

/// Finds and removes filler and duplicate files.
#[derive(Debug, Clone, Default)]
pub struct DedupEngine {
    reference: Option<ContentDigest>,
    options: CleanOptions,
}

impl DedupEngine {
    /// Creates an engine without a reference sample; credits are never matched.
    #[must_use]
    pub fn new(options: CleanOptions) -> Self {
        Self {
            reference: None,
            options,
        }
    }

    /// Sets the reference digest matched as credits.
    #[must_use]
    pub fn with_reference(mut self, digest: ContentDigest) -> Self {
        self.reference = Some(digest);
        self
    }

    /// Creates an engine whose reference digest comes from the sample at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DedupError::Reference`] if the sample cannot be read.
    pub async fn from_sample(path: &Path, options: CleanOptions) -> Result<Self, DedupError> {
        let digest = ContentDigest::of_reference_sample(path).await?;
        Ok(Self::new(options).with_reference(digest))
    }

    /// Returns the pass options.
    #[must_use]
    pub fn options(&self) -> &CleanOptions {
        &self.options
    }

    /// Hashes `files` and selects the ones to remove, split by reason.
    #[instrument(level = "debug", skip(self, files), fields(files = files.len()))]
    pub async fn scan(&self, files: &[PathBuf]) -> CleanPlan {
        let match_credits = self.options.remove_credits && self.reference.is_some();
        if !match_credits && !self.options.remove_duplicates {
            return CleanPlan::default();
        }

        let hashed: Vec<(PathBuf, ContentDigest)> = stream::iter(files)
            .map(|path| async move {
                match ContentDigest::of_file(path).await {
                    Ok(digest) => Some((path.clone(), digest)),
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "skipping unreadable file");
                        None
                    }
                }
            })
            .buffer_unordered(self.options.read_concurrency.max(1))
            .filter_map(std::future::ready)
            .collect()
            .await;

        let mut plan = CleanPlan::default();
        let mut groups: BTreeMap<ContentDigest, Vec<PathBuf>> = BTreeMap::new();
        for (path, digest) in hashed {
            if match_credits && self.reference == Some(digest) {
                plan.credits.push(path);
            } else if self.options.remove_duplicates {
                groups.entry(digest).or_default().push(path);
            }
        }

        plan.credits.sort();
        let mut duplicate_groups: Vec<Vec<PathBuf>> = groups
            .into_values()
            .filter(|group| group.len() > 1)
            .map(|mut group| {
                group.sort();
                group
            })
            .collect();
        duplicate_groups.sort();
        plan.duplicates = duplicate_groups.into_iter().flatten().collect();

        debug!(
            credits = plan.credits.len(),
            duplicates = plan.duplicates.len(),
            "scan complete"
        );
        plan
    }

    /// Returns the files of `files` to remove, credits first.
    ///
    /// Nothing is deleted; see [`clean_folders`](Self::clean_folders).
    pub async fn clean(&self, files: &[PathBuf]) -> Vec<PathBuf> {
        self.scan(files).await.into_paths()
    }

    /// Cleans every file below `folders` and deletes the selected files.
    ///
    /// # Errors
    ///
    /// Returns [`DedupError::List`] if a folder cannot be walked and
    /// [`DedupError::Remove`] if a selected file cannot be deleted.
    #[instrument(skip(self, folders), fields(folders = folders.len()))]
    pub async fn clean_folders(&self, folders: &[PathBuf]) -> Result<CleanReport, DedupError> {
        let mut files = Vec::new();
        for folder in folders {
            files.extend(list_files(folder)?);
        }

        let plan = self.scan(&files).await;
        let report = CleanReport {
            credits_removed: plan.credits.len(),
            duplicates_removed: plan.duplicates.len(),
        };

        for path in plan.into_paths() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "file vanished before removal");
                }
                Err(source) => return Err(DedupError::Remove { path, source }),
            }
        }

        info!(
            files = files.len(),
            credits_removed = report.credits_removed,
            duplicates_removed = report.duplicates_removed,
            "folders cleaned"
        );
        Ok(report)
    }
}

/// Every regular file below `folder`, recursively.
fn list_files(folder: &Path) -> Result<Vec<PathBuf>, DedupError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(folder) {
        let entry = entry.map_err(|source| DedupError::List {
            path: folder.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
