//! Followed collections and update planning.
//!
//! The store is persisted inside the JSON config file by the binary; this
//! module only works on the in-memory value.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::chapter::{ChapterNumber, parse_leading_number};
use crate::fetch::ChapterResult;
use crate::plan::FetchRequest;

/// Errors raised while editing subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// A source ref was given together with several collection names.
    #[error("cannot tell which of {count} collections the source ref {source_ref} belongs to")]
    AmbiguousSourceRef { source_ref: String, count: usize },

    /// No collection name was given.
    #[error("no collection given")]
    Empty,
}

/// A followed collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub name: String,
    /// Catalog path override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Subscription {
    #[must_use]
    pub fn new(name: impl Into<String>, url: Option<String>) -> Self {
        Self {
            name: name.into(),
            url,
        }
    }
}

/// Subscriptions and the last chapter fetched per collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStore {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    /// Last chapter fetched per collection, by collection id.
    #[serde(default)]
    pub cache_data: BTreeMap<String, ChapterNumber>,
}

impl SubscriptionStore {
    /// Follows `names`, optionally pinning a catalog source ref.
    ///
    /// Names already followed are left as they are. Returns the number of
    /// subscriptions added.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::AmbiguousSourceRef`] when a source ref
    /// comes with more than one name, and [`SubscriptionError::Empty`] when
    /// no name is given.
    pub fn subscribe(
        &mut self,
        names: &[String],
        source_ref: Option<&str>,
    ) -> Result<usize, SubscriptionError> {
        if names.is_empty() {
            return Err(SubscriptionError::Empty);
        }
        if let Some(source_ref) = source_ref
            && names.len() > 1
        {
            return Err(SubscriptionError::AmbiguousSourceRef {
                source_ref: source_ref.to_string(),
                count: names.len(),
            });
        }

        let mut added = 0;
        for name in names {
            if self.is_subscribed(name) {
                debug!(collection = %name, "already subscribed");
                continue;
            }
            self.subscriptions
                .push(Subscription::new(name.clone(), source_ref.map(str::to_string)));
            added += 1;
        }
        Ok(added)
    }

    /// Stops following `names`. Returns the number of subscriptions removed.
    pub fn unsubscribe(&mut self, names: &[String]) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| !names.contains(&s.name));
        before - self.subscriptions.len()
    }

    #[must_use]
    pub fn is_subscribed(&self, name: &str) -> bool {
        self.subscriptions.iter().any(|s| s.name == name)
    }

    /// Collections an update covers.
    ///
    /// An empty selection means every subscription. Otherwise the selected
    /// subscriptions come first, followed by selected names that are not
    /// subscribed.
    #[must_use]
    pub fn select(&self, selected: &[String]) -> Vec<Subscription> {
        if selected.is_empty() {
            return self.subscriptions.clone();
        }
        let mut chosen: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| selected.contains(&s.name))
            .cloned()
            .collect();
        for name in selected {
            if !self.is_subscribed(name) && !chosen.iter().any(|s| &s.name == name) {
                chosen.push(Subscription::new(name.clone(), None));
            }
        }
        chosen
    }

    /// Highest chapter known for `collection_id` across `folders` and the cache.
    ///
    /// Returns `None` when nothing is known.
    #[must_use]
    pub fn current_chapter(&self, collection_id: &str, folders: &[PathBuf]) -> Option<ChapterNumber> {
        folders
            .iter()
            .filter_map(|folder| latest_local_chapter(folder, collection_id))
            .chain(self.cache_data.get(collection_id).copied())
            .max()
    }

    /// Resume requests for an update of `selected`.
    ///
    /// Collections without any known progress are skipped unless `force`
    /// is set, in which case they resume from nothing (every listed chapter).
    #[must_use]
    pub fn plan_updates(&self, selected: &[String], folders: &[PathBuf], force: bool) -> Vec<FetchRequest> {
        self.select(selected)
            .into_iter()
            .filter_map(|subscription| {
                let current = self.current_chapter(&subscription.name, folders);
                let last_known = match current {
                    Some(chapter) => chapter,
                    None if force => ChapterNumber::BEFORE_FIRST,
                    None => {
                        debug!(collection = %subscription.name, "no known progress, skipping");
                        return None;
                    }
                };
                Some(
                    FetchRequest::resume(subscription.name, last_known)
                        .with_source_ref(subscription.url),
                )
            })
            .collect()
    }

    /// Records the highest successfully fetched chapter of each collection.
    pub fn record_progress(&mut self, results: &[ChapterResult]) {
        for result in results.iter().filter(|r| r.is_ok()) {
            let entry = self
                .cache_data
                .entry(result.collection_id.clone())
                .or_insert(result.chapter);
            if result.chapter > *entry {
                *entry = result.chapter;
            }
        }
    }
}

/// Highest chapter stored under `<folder>/<collection_id>`.
///
/// Entries are named `<collection_id> <n>` with an optional suffix such as
/// `.zip`. Returns `None` if the directory is unreadable or holds no chapter.
#[must_use]
pub fn latest_local_chapter(folder: &Path, collection_id: &str) -> Option<ChapterNumber> {
    let entries = std::fs::read_dir(folder.join(collection_id)).ok()?;
    let prefix = format!("{collection_id} ");
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.strip_prefix(&prefix).and_then(parse_leading_number)
        })
        .max()
}
