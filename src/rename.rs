//! Page renaming into a gap-free numbered sequence.
//!
//! Files of a directory are sorted naturally (`2` before `10`) and renamed to
//! `<directory name> - <index><ext>`, with the index zero-padded to three
//! digits. New names can collide with current names of other files in the
//! same batch, so renames are applied in an order where every target has
//! already been vacated.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Default zero-padding width of the page index.
pub const DEFAULT_INDEX_WIDTH: usize = 3;

/// Errors from renaming a directory.
#[derive(Debug, Error)]
pub enum RenameError {
    /// The directory could not be listed.
    #[error("cannot read directory {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A rename failed; entries before it were applied and stay applied.
    #[error("cannot rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The target path is held by something outside the plan.
    #[error("refusing to overwrite {path}")]
    TargetExists { path: PathBuf },
}

/// One planned rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameEntry {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
}

impl RenameEntry {
    #[must_use]
    pub fn new(old_path: impl Into<PathBuf>, new_path: impl Into<PathBuf>) -> Self {
        Self {
            old_path: old_path.into(),
            new_path: new_path.into(),
        }
    }
}

/// A directory whose renames were aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameFailure {
    pub directory: PathBuf,
    pub error: String,
}

/// Summary of a tree rename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenameReport {
    /// Directories visited.
    pub directories: usize,
    /// Files renamed.
    pub renamed: usize,
    pub failures: Vec<RenameFailure>,
}

impl RenameReport {
    fn merge(&mut self, other: Self) {
        self.directories += other.directories;
        self.renamed += other.renamed;
        self.failures.extend(other.failures);
    }
}

/// Plans and applies page renames.
#[derive(Debug, Clone, Copy)]
pub struct RenameNormalizer {
    width: usize,
}

impl Default for RenameNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RenameNormalizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            width: DEFAULT_INDEX_WIDTH,
        }
    }

    /// Uses `width` digits of zero-padding instead of three.
    #[must_use]
    pub fn with_width(width: usize) -> Self {
        Self { width }
    }

    /// Plans the renames of `files`, all living in `dir`, in a safe application order.
    ///
    /// The target name is the last component of `dir`. Files already carrying
    /// their target name are left out, but their names are never used as
    /// temporary names.
    #[must_use]
    pub fn plan(&self, dir: &Path, files: &[PathBuf]) -> Vec<RenameEntry> {
        let target_name = dir
            .file_name()
            .map(OsStr::to_string_lossy)
            .unwrap_or_default();

        let mut sorted: Vec<&PathBuf> = files.iter().collect();
        sorted.sort_by(|a, b| natord::compare(&sort_key(a), &sort_key(b)));

        let entries: Vec<RenameEntry> = sorted
            .into_iter()
            .enumerate()
            .map(|(index, old_path)| {
                let extension = old_path
                    .extension()
                    .map(|ext| format!(".{}", ext.to_string_lossy()))
                    .unwrap_or_default();
                let new_name = format!(
                    "{target_name} - {:0width$}{extension}",
                    index + 1,
                    width = self.width
                );
                RenameEntry::new(old_path.clone(), dir.join(new_name))
            })
            .filter(|entry| entry.old_path != entry.new_path)
            .collect();

        order_renames_reserving(entries, files.iter().cloned())
    }

    /// Applies `entries` one after another.
    ///
    /// Returns the number of renames performed.
    ///
    /// # Errors
    ///
    /// Returns [`RenameError::Rename`] on the first failing rename. Earlier
    /// renames are not rolled back.
    pub async fn apply(&self, entries: &[RenameEntry]) -> Result<usize, RenameError> {
        for entry in entries {
            let occupied = tokio::fs::try_exists(&entry.new_path)
                .await
                .map_err(|source| RenameError::Rename {
                    from: entry.old_path.clone(),
                    to: entry.new_path.clone(),
                    source,
                })?;
            if occupied {
                return Err(RenameError::TargetExists {
                    path: entry.new_path.clone(),
                });
            }
            tokio::fs::rename(&entry.old_path, &entry.new_path)
                .await
                .map_err(|source| RenameError::Rename {
                    from: entry.old_path.clone(),
                    to: entry.new_path.clone(),
                    source,
                })?;
        }
        Ok(entries.len())
    }

    /// Renames the files directly inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`RenameError::Read`] if `dir` cannot be listed, otherwise see
    /// [`apply`](Self::apply).
    #[instrument(level = "debug", skip(self), fields(dir = %dir.display()))]
    pub async fn rename_dir(&self, dir: &Path) -> Result<usize, RenameError> {
        let (files, _) = split_entries(dir).await?;
        self.rename_files(dir, &files).await
    }

    /// Renames every directory below each of `roots`, including the roots.
    ///
    /// With `only_node_dirs`, directories that contain subdirectories keep
    /// their own files as they are. A failing directory is recorded in the
    /// report and does not stop its siblings.
    #[instrument(skip(self, roots), fields(roots = roots.len()))]
    pub async fn rename_tree(&self, roots: &[PathBuf], only_node_dirs: bool) -> RenameReport {
        let mut report = RenameReport::default();
        for root in roots {
            report.merge(self.visit(root, only_node_dirs).await);
        }
        info!(
            directories = report.directories,
            renamed = report.renamed,
            failures = report.failures.len(),
            "rename complete"
        );
        report
    }

    fn visit<'a>(&'a self, dir: &'a Path, only_node_dirs: bool) -> BoxFuture<'a, RenameReport> {
        Box::pin(async move {
            let mut report = RenameReport::default();
            let (files, dirs) = match split_entries(dir).await {
                Ok(split) => split,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                    report.failures.push(RenameFailure {
                        directory: dir.to_path_buf(),
                        error: e.to_string(),
                    });
                    return report;
                }
            };
            report.directories += 1;

            if !only_node_dirs || dirs.is_empty() {
                match self.rename_files(dir, &files).await {
                    Ok(renamed) => report.renamed += renamed,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "rename aborted");
                        report.failures.push(RenameFailure {
                            directory: dir.to_path_buf(),
                            error: e.to_string(),
                        });
                    }
                }
            }

            for child in &dirs {
                report.merge(self.visit(child, only_node_dirs).await);
            }
            report
        })
    }

    async fn rename_files(&self, dir: &Path, files: &[PathBuf]) -> Result<usize, RenameError> {
        let plan = self.plan(dir, files);
        debug!(dir = %dir.display(), files = files.len(), renames = plan.len(), "renaming files");
        self.apply(&plan).await
    }
}

/// Orders `entries` so no rename targets a path another pending entry still reads from.
///
/// Entries whose target is free are emitted first. When every remaining
/// entry waits on another one (a cycle), the first of them is moved to a
/// temporary name in its directory, which frees its old path.
#[must_use]
pub fn order_renames(entries: Vec<RenameEntry>) -> Vec<RenameEntry> {
    order_renames_reserving(entries, std::iter::empty())
}

/// Like [`order_renames`], never picking a temporary name from `reserved`.
fn order_renames_reserving(
    entries: Vec<RenameEntry>,
    reserved: impl IntoIterator<Item = PathBuf>,
) -> Vec<RenameEntry> {
    let mut taken: HashSet<PathBuf> = entries
        .iter()
        .flat_map(|e| [e.old_path.clone(), e.new_path.clone()])
        .chain(reserved)
        .collect();
    let mut remaining = entries;
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let sources: HashSet<&Path> = remaining.iter().map(|e| e.old_path.as_path()).collect();
        let ready: Vec<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, e)| !sources.contains(e.new_path.as_path()))
            .map(|(index, _)| index)
            .collect();

        if ready.is_empty() {
            let detour = temporary_path(&remaining[0].old_path, &mut taken);
            debug!(
                from = %remaining[0].old_path.display(),
                via = %detour.display(),
                "breaking rename cycle"
            );
            let old = std::mem::replace(&mut remaining[0].old_path, detour.clone());
            ordered.push(RenameEntry::new(old, detour));
            continue;
        }

        // Emit a single ready entry per scan so later sources stay accurate.
        let index = ready[0];
        ordered.push(remaining.remove(index));
    }
    ordered
}

fn temporary_path(path: &Path, taken: &mut HashSet<PathBuf>) -> PathBuf {
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let mut counter = 0usize;
    loop {
        let candidate = dir.join(format!(".renaming-{counter}{extension}"));
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

fn sort_key(path: &Path) -> String {
    path.file_name()
        .map(OsStr::to_string_lossy)
        .unwrap_or_default()
        .into_owned()
}

/// Splits the entries of `dir` into files and subdirectories, each sorted.
async fn split_entries(dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>), RenameError> {
    let read_err = |source| RenameError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut reader = tokio::fs::read_dir(dir).await.map_err(read_err)?;
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(read_err)? {
        let file_type = entry.file_type().await.map_err(read_err)?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        } else {
            files.push(entry.path());
        }
    }
    files.sort();
    dirs.sort();
    Ok((files, dirs))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use tempfile::TempDir;

    use super::*;

    fn names(dir: &Path) -> BTreeSet<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    /// Replays `ordered` over the sources of `planned`: every target must be
    /// free when written, and the final names must be exactly the planned targets.
    fn assert_no_overwrite(planned: &[RenameEntry], ordered: &[RenameEntry]) {
        let mut present: BTreeSet<PathBuf> = planned.iter().map(|e| e.old_path.clone()).collect();
        for entry in ordered {
            assert!(
                !present.contains(&entry.new_path),
                "{entry:?} overwrites an existing file"
            );
            assert!(present.remove(&entry.old_path), "{entry:?} reads a missing file");
            present.insert(entry.new_path.clone());
        }
        let targets: BTreeSet<PathBuf> = planned.iter().map(|e| e.new_path.clone()).collect();
        assert_eq!(present, targets);
    }

    #[test]
    fn test_plan_natural_sort_and_padding() {
        let dir = Path::new("/library/Series/Series 7");
        let files = vec![
            dir.join("page3.png"),
            dir.join("page1.png"),
            dir.join("page10.png"),
        ];

        let plan = RenameNormalizer::new().plan(dir, &files);

        let pairs: Vec<(String, String)> = plan
            .iter()
            .map(|e| (sort_key(&e.old_path), sort_key(&e.new_path)))
            .collect();
        let mut pairs_sorted = pairs.clone();
        pairs_sorted.sort();
        assert_eq!(
            pairs_sorted,
            vec![
                ("page1.png".to_string(), "Series 7 - 001.png".to_string()),
                ("page10.png".to_string(), "Series 7 - 003.png".to_string()),
                ("page3.png".to_string(), "Series 7 - 002.png".to_string()),
            ]
        );
    }

    #[test]
    fn test_plan_drops_noop_renames() {
        let dir = Path::new("/x/S");
        let files = vec![dir.join("S - 001.jpg"), dir.join("S - 002.jpg")];
        assert!(RenameNormalizer::new().plan(dir, &files).is_empty());
    }

    #[test]
    fn test_plan_index_overflows_width_unpadded() {
        let dir = Path::new("/x/S");
        let files: Vec<PathBuf> = (1..=1000).map(|i| dir.join(format!("p{i}.jpg"))).collect();
        let plan = RenameNormalizer::new().plan(dir, &files);
        assert!(plan.iter().any(|e| e.new_path == dir.join("S - 1000.jpg")));
        assert!(plan.iter().any(|e| e.new_path == dir.join("S - 999.jpg")));
    }

    #[test]
    fn test_order_renames_never_targets_pending_source() {
        let dir = Path::new("/x/S");
        let entries = vec![
            RenameEntry::new(dir.join("a"), dir.join("b")),
            RenameEntry::new(dir.join("b"), dir.join("c")),
            RenameEntry::new(dir.join("c"), dir.join("d")),
        ];

        let ordered = order_renames(entries.clone());

        assert_no_overwrite(&entries, &ordered);
        assert_eq!(ordered[0].old_path, dir.join("c"));
    }

    #[test]
    fn test_order_renames_breaks_swap_cycle() {
        let dir = Path::new("/nonexistent-rename-test/S");
        let entries = vec![
            RenameEntry::new(dir.join("a.jpg"), dir.join("b.jpg")),
            RenameEntry::new(dir.join("b.jpg"), dir.join("a.jpg")),
        ];

        let ordered = order_renames(entries.clone());

        assert_eq!(ordered.len(), 3);
        assert_eq!(ordered[0].old_path, dir.join("a.jpg"));
        assert_eq!(ordered[0].new_path, dir.join(".renaming-0.jpg"));
        assert_eq!(ordered[2].new_path, dir.join("b.jpg"));
        assert_no_overwrite(&entries, &ordered);
    }

    #[test]
    fn test_order_renames_skips_reserved_temporary_names() {
        let dir = Path::new("/nonexistent-rename-test/S");
        let entries = vec![
            RenameEntry::new(dir.join("a.jpg"), dir.join("b.jpg")),
            RenameEntry::new(dir.join("b.jpg"), dir.join("a.jpg")),
        ];

        let ordered = order_renames_reserving(entries.clone(), [dir.join(".renaming-0.jpg")]);

        assert_eq!(ordered[0].new_path, dir.join(".renaming-1.jpg"));
        assert_no_overwrite(&entries, &ordered);
    }

    #[tokio::test]
    async fn test_apply_refuses_to_overwrite_unplanned_file() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("S");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.jpg"), b"a").unwrap();
        std::fs::write(dir.join("S - 001.jpg"), b"keep").unwrap();

        let err = RenameNormalizer::new()
            .apply(&[RenameEntry::new(dir.join("a.jpg"), dir.join("S - 001.jpg"))])
            .await
            .unwrap_err();

        assert!(matches!(err, RenameError::TargetExists { .. }));
        assert_eq!(std::fs::read(dir.join("S - 001.jpg")).unwrap(), b"keep");
        assert_eq!(std::fs::read(dir.join("a.jpg")).unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_rename_tree_recurses_into_nested_directories() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("Bleach");
        let volume = root.join("Vol 1");
        let chapter = volume.join("Bleach 1");
        std::fs::create_dir_all(&chapter).unwrap();
        std::fs::write(volume.join("z.png"), b"z").unwrap();
        std::fs::write(chapter.join("2.png"), b"2").unwrap();
        std::fs::write(chapter.join("10.png"), b"10").unwrap();

        let report = RenameNormalizer::new()
            .rename_tree(&[root.clone()], false)
            .await;

        assert_eq!(report.directories, 3);
        assert_eq!(report.renamed, 3);
        assert!(report.failures.is_empty());
        assert_eq!(std::fs::read(volume.join("Vol 1 - 001.png")).unwrap(), b"z");
        assert_eq!(std::fs::read(chapter.join("Bleach 1 - 001.png")).unwrap(), b"2");
        assert_eq!(std::fs::read(chapter.join("Bleach 1 - 002.png")).unwrap(), b"10");
    }

    #[tokio::test]
    async fn test_rename_dir_is_bijection_with_colliding_names() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("S");
        std::fs::create_dir_all(&dir).unwrap();
        // "S - 002.jpg" sorts first and moves to 001; "a.jpg" then takes 002.
        std::fs::write(dir.join("S - 002.jpg"), b"first").unwrap();
        std::fs::write(dir.join("a.jpg"), b"second").unwrap();
        std::fs::write(dir.join("b.jpg"), b"third").unwrap();

        let renamed = RenameNormalizer::new().rename_dir(&dir).await.unwrap();

        assert_eq!(renamed, 3);
        assert_eq!(
            names(&dir),
            ["S - 001.jpg", "S - 002.jpg", "S - 003.jpg"]
                .into_iter()
                .map(String::from)
                .collect()
        );
        assert_eq!(std::fs::read(dir.join("S - 001.jpg")).unwrap(), b"first");
        assert_eq!(std::fs::read(dir.join("S - 002.jpg")).unwrap(), b"second");
        assert_eq!(std::fs::read(dir.join("S - 003.jpg")).unwrap(), b"third");
    }

    #[tokio::test]
    async fn test_rename_tree_only_node_dirs_skips_parent_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("Naruto");
        let chapter = root.join("Naruto 1");
        std::fs::create_dir_all(&chapter).unwrap();
        std::fs::write(root.join("cover.jpg"), b"c").unwrap();
        std::fs::write(chapter.join("x.jpg"), b"x").unwrap();

        let report = RenameNormalizer::new()
            .rename_tree(&[root.clone()], true)
            .await;

        assert_eq!(report.directories, 2);
        assert_eq!(report.renamed, 1);
        assert!(report.failures.is_empty());
        assert!(root.join("cover.jpg").exists());
        assert!(chapter.join("Naruto 1 - 001.jpg").exists());
    }

    #[tokio::test]
    async fn test_rename_tree_records_unreadable_root() {
        let tmp = TempDir::new().unwrap();
        let report = RenameNormalizer::new()
            .rename_tree(&[tmp.path().join("missing")], false)
            .await;
        assert_eq!(report.directories, 0);
        assert_eq!(report.failures.len(), 1);
    }
}
