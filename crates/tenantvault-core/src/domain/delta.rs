//! Incremental-sync bookkeeping
//!
//! Every container synchronized with a delta query keeps two facts between
//! runs: the opaque delta token returned by the service, and the path the
//! container had when that token was issued. A container with no entry (or
//! no token) must be fully re-enumerated.
//!
//! The model is passive. Token validity is decided by the service; when a
//! token is rejected the resource connector clears it here and falls back to
//! a full enumeration.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Metadata file holding `container ID -> delta token`
pub const DELTA_URLS_FILE_NAME: &str = "delta";

/// Metadata file holding `container ID -> previous path`
pub const PREVIOUS_PATH_FILE_NAME: &str = "previouspath";

// ============================================================================
// Category
// ============================================================================

/// Resource category a set of delta paths belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Mail folders
    Email,
    /// Contact folders
    Contacts,
    /// Calendars
    Events,
    /// Drive folders
    Files,
    /// Site lists
    Lists,
}

impl Category {
    /// Lowercase name used in metadata and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Email => "email",
            Category::Contacts => "contacts",
            Category::Events => "events",
            Category::Files => "files",
            Category::Lists => "lists",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Category::Email),
            "contacts" => Ok(Category::Contacts),
            "events" => Ok(Category::Events),
            "files" => Ok(Category::Files),
            "lists" => Ok(Category::Lists),
            other => Err(DomainError::InvalidCategory(other.to_string())),
        }
    }
}

/// Metadata files persisted for a category.
///
/// Mail and contacts keep delta tokens; the other categories only persist
/// previous paths.
pub fn metadata_file_names(category: Category) -> &'static [&'static str] {
    match category {
        Category::Email | Category::Contacts => &[DELTA_URLS_FILE_NAME, PREVIOUS_PATH_FILE_NAME],
        _ => &[PREVIOUS_PATH_FILE_NAME],
    }
}

// ============================================================================
// DeltaPath / DeltaPaths
// ============================================================================

/// Incremental-sync state for one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaPath {
    /// Opaque delta token (empty when unknown)
    pub delta: String,
    /// Path of the container when the token was issued
    pub path: String,
}

/// Incremental-sync state keyed by container ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeltaPaths(HashMap<String, DeltaPath>);

impl DeltaPaths {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delta token for `container_id`, keeping any stored path.
    pub fn add_delta(&mut self, container_id: impl Into<String>, token: impl Into<String>) {
        self.0.entry(container_id.into()).or_default().delta = token.into();
    }

    /// Sets the path for `container_id`, keeping any stored delta token.
    pub fn add_path(&mut self, container_id: impl Into<String>, path: impl Into<String>) {
        self.0.entry(container_id.into()).or_default().path = path.into();
    }

    /// Returns the entry for `container_id`.
    pub fn get(&self, container_id: &str) -> Option<&DeltaPath> {
        self.0.get(container_id)
    }

    /// Removes and returns the entry for `container_id`.
    pub fn remove(&mut self, container_id: &str) -> Option<DeltaPath> {
        self.0.remove(container_id)
    }

    /// Forgets the delta token of `container_id`, keeping its path.
    ///
    /// Used after the service rejected the token.
    pub fn clear_delta(&mut self, container_id: &str) {
        if let Some(dp) = self.0.get_mut(container_id) {
            dp.delta.clear();
        }
    }

    /// Returns `true` when no usable token exists for `container_id`.
    pub fn needs_full_enumeration(&self, container_id: &str) -> bool {
        self.0
            .get(container_id)
            .map_or(true, |dp| dp.delta.is_empty())
    }

    /// Iterates over `(container ID, state)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DeltaPath)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drops entries without a path.
    ///
    /// Such entries come from partially written metadata and force a full
    /// enumeration of the container on the next run.
    pub fn prune_incomplete(&mut self) {
        self.0.retain(|_, dp| !dp.path.is_empty());
    }

    /// Splits the state back into the `(delta tokens, previous paths)`
    /// metadata maps. Empty values are omitted.
    pub fn to_metadata(&self) -> (HashMap<String, String>, HashMap<String, String>) {
        let mut deltas = HashMap::new();
        let mut paths = HashMap::new();

        for (id, dp) in &self.0 {
            if !dp.delta.is_empty() {
                deltas.insert(id.clone(), dp.delta.clone());
            }
            if !dp.path.is_empty() {
                paths.insert(id.clone(), dp.path.clone());
            }
        }

        (deltas, paths)
    }
}

// ============================================================================
// CatDeltaPaths
// ============================================================================

/// Incremental-sync state for every category of a protected resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatDeltaPaths {
    categories: HashMap<Category, DeltaPaths>,
    #[serde(skip)]
    loaded: HashMap<Category, Vec<String>>,
}

impl CatDeltaPaths {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state for `category`.
    pub fn get(&self, category: Category) -> Option<&DeltaPaths> {
        self.categories.get(&category)
    }

    /// Returns the state for `category`, creating it if absent.
    pub fn get_mut(&mut self, category: Category) -> &mut DeltaPaths {
        self.categories.entry(category).or_default()
    }

    /// Replaces the state for `category`.
    pub fn insert(&mut self, category: Category, paths: DeltaPaths) {
        self.categories.insert(category, paths);
    }

    /// Iterates over `(category, state)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Category, &DeltaPaths)> {
        self.categories.iter()
    }

    /// Merges one persisted metadata file into the state of `category`.
    ///
    /// `bytes` must be a JSON object mapping container IDs to strings.
    /// Unknown file names are ignored. Loading the same file twice for one
    /// category is an error, since overlapping copies cannot be reconciled.
    pub fn load_metadata(
        &mut self,
        category: Category,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<(), DomainError> {
        if file_name != DELTA_URLS_FILE_NAME && file_name != PREVIOUS_PATH_FILE_NAME {
            tracing::debug!(%category, file_name, "Ignoring unknown metadata file");
            return Ok(());
        }

        let seen = self.loaded.entry(category).or_default();
        if seen.iter().any(|f| f == file_name) {
            return Err(DomainError::DuplicateMetadata {
                category: category.to_string(),
                file: file_name.to_string(),
            });
        }

        let entries: HashMap<String, String> =
            serde_json::from_slice(bytes).map_err(|e| DomainError::InvalidMetadata {
                file: file_name.to_string(),
                reason: e.to_string(),
            })?;

        seen.push(file_name.to_string());

        let paths = self.categories.entry(category).or_default();
        for (id, value) in entries {
            if file_name == DELTA_URLS_FILE_NAME {
                paths.add_delta(id, value);
            } else {
                paths.add_path(id, value);
            }
        }

        Ok(())
    }

    /// Drops incomplete entries in every category.
    pub fn prune_incomplete(&mut self) {
        for paths in self.categories.values_mut() {
            paths.prune_incomplete();
        }
    }
}
