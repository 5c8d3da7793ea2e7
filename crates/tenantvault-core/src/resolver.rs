//! Container path resolution
//!
//! The [`ContainerResolver`] caches every container of one resource hierarchy
//! and turns parent links into full paths. Two paths are kept per container:
//! the display path (display names, used to recreate folders on restore) and
//! the ID path (container IDs, used to key backup data).
//!
//! ## Consistency
//!
//! The cache sits behind a `RwLock`. Readers (`id_to_path`, `path_in_cache`)
//! may run concurrently with each other; writers (`add_folder`, `populate`)
//! are serialized. Resolving while another task is still adding containers
//! may miss containers that have not been added yet. Lock guards are never
//! held across an `.await`, so a missing container can be fetched from the
//! refresher without blocking other readers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::domain::{Container, ContainerPath, DomainError, ResolvedContainer};
use crate::ports::IContainerEnumerator;

/// Default bound on parent-chain length
pub const DEFAULT_MAX_DEPTH: usize = 300;

// ============================================================================
// Errors
// ============================================================================

/// Resolution failures, each attributable to one container
#[derive(Debug, Error)]
pub enum ResolverError {
    /// A container in the chain is not cached and could not be fetched
    #[error("Container {id} not cached (resolving {target})")]
    NotCached {
        /// The missing container
        id: String,
        /// The container whose path was requested
        target: String,
    },

    /// A cached container has no computed path
    #[error("Cached container {id} has no path")]
    MissingPath {
        /// The container
        id: String,
    },

    /// The parent chain is longer than the configured maximum
    #[error("Path of container {id} contains a cycle or exceeds {max_depth} levels")]
    DepthExceeded {
        /// The container whose path was requested
        id: String,
        /// Configured bound
        max_depth: usize,
    },

    /// The container was deleted while resolving its path
    #[error("Container {id} was deleted")]
    Deleted {
        /// The deleted container (or the descendant being resolved)
        id: String,
    },

    /// The container failed validation
    #[error("Invalid container {id}: {source}")]
    InvalidContainer {
        /// The container
        id: String,
        /// Validation failure
        #[source]
        source: DomainError,
    },

    /// The enumerator failed while fetching a container or its children
    #[error("Enumerating container {id} failed: {source}")]
    Enumeration {
        /// The container being fetched or listed
        id: String,
        /// Adapter error
        #[source]
        source: anyhow::Error,
    },
}

impl ResolverError {
    /// Returns the ID of the container the failure is attributed to.
    pub fn container_id(&self) -> &str {
        match self {
            ResolverError::NotCached { id, .. }
            | ResolverError::MissingPath { id }
            | ResolverError::DepthExceeded { id, .. }
            | ResolverError::Deleted { id }
            | ResolverError::InvalidContainer { id, .. }
            | ResolverError::Enumeration { id, .. } => id,
        }
    }
}

// ============================================================================
// ContainerResolver
// ============================================================================

/// An unresolved container met while walking up from a resolution target
struct Link {
    id: String,
    /// Cached copy as seen by the walk; `None` if it was just fetched
    cached: Option<Container>,
    parent_recovered: bool,
}

/// Memoizing resolver from container IDs to paths.
pub struct ContainerResolver {
    cache: RwLock<HashMap<String, ResolvedContainer>>,
    refresher: Option<Arc<dyn IContainerEnumerator>>,
    max_depth: usize,
}

impl Default for ContainerResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ContainerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerResolver")
            .field("cached", &self.len())
            .field("has_refresher", &self.refresher.is_some())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

impl ContainerResolver {
    /// Creates an empty resolver without a refresher.
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            refresher: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Creates an empty resolver bounded by the configured chain length.
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::new().with_max_depth(config.max_depth)
    }

    /// Sets the enumerator used to fetch containers missing from the cache.
    #[must_use]
    pub fn with_refresher(mut self, refresher: Arc<dyn IContainerEnumerator>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Sets the maximum parent-chain length.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Configured maximum parent-chain length.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ResolvedContainer>> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ResolvedContainer>> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Population
    // ------------------------------------------------------------------------

    /// Seeds the cache from `enumerator` and resolves every container's path.
    ///
    /// The root is fetched with `get_root` when `root_id` is `None`. Its
    /// display path is set to `base_path` and its ID path to its own ID.
    /// Children are enumerated breadth-first. Resolution keeps going after a
    /// failure; the last error is returned once every container was tried.
    pub async fn populate(
        &self,
        enumerator: &dyn IContainerEnumerator,
        root_id: Option<&str>,
        base_path: ContainerPath,
    ) -> Result<(), ResolverError> {
        let root = match root_id {
            None => enumerator
                .get_root()
                .await
                .map_err(|source| ResolverError::Enumeration {
                    id: "root".to_string(),
                    source,
                })?,
            Some(id) => enumerator
                .get_container(id)
                .await
                .map_err(|source| ResolverError::Enumeration {
                    id: id.to_string(),
                    source,
                })?
                .ok_or_else(|| ResolverError::Deleted { id: id.to_string() })?,
        };

        let root_id = root.id.clone();
        self.add_root(root, base_path)?;

        let mut last_err = None;
        let mut queue = VecDeque::from([root_id.clone()]);

        while let Some(parent_id) = queue.pop_front() {
            let mut page_token: Option<String> = None;
            loop {
                let page = enumerator
                    .list_children(&parent_id, page_token.as_deref())
                    .await
                    .map_err(|source| ResolverError::Enumeration {
                        id: parent_id.clone(),
                        source,
                    })?;

                for mut child in page.containers {
                    if child.parent().is_none() {
                        child.parent_id = Some(parent_id.clone());
                    }
                    let child_id = child.id.clone();
                    let known = self.read().contains_key(&child_id);

                    match self.add_folder(child, None) {
                        Ok(()) if !known => queue.push_back(child_id),
                        Ok(()) => {}
                        Err(e) => {
                            warn!(container_id = %child_id, error = %e, "Skipping invalid container");
                            last_err = Some(e);
                        }
                    }
                }

                match page.next_page {
                    Some(token) if !token.is_empty() => page_token = Some(token),
                    _ => break,
                }
            }
        }

        if let Err(e) = self.populate_paths().await {
            last_err = Some(e);
        }

        info!(root_id = %root_id, containers = self.len(), "Container cache populated");

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Resolves every cached container, returning the last failure.
    ///
    /// Containers found deleted along the way are dropped, not reported.
    async fn populate_paths(&self) -> Result<(), ResolverError> {
        let pending: Vec<String> = self
            .read()
            .values()
            .filter(|rc| !rc.is_resolved())
            .map(|rc| rc.id().to_string())
            .collect();

        let mut last_err = None;
        for id in pending {
            match self.id_to_path(&id).await {
                Ok(_) => {}
                Err(ResolverError::Deleted { .. }) => {
                    debug!(container_id = %id, "Container deleted during populate, skipping");
                }
                Err(e) => {
                    warn!(container_id = %id, error = %e, "Failed to resolve container path");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Adds a container to the cache.
    ///
    /// Adding an ID that is already cached is a no-op. Without `known_path`
    /// the container must have a parent ID; with it the path must be
    /// non-empty and becomes the container's display path.
    pub fn add_folder(
        &self,
        container: Container,
        known_path: Option<ContainerPath>,
    ) -> Result<(), ResolverError> {
        let invalid = |source| ResolverError::InvalidContainer {
            id: container.id.clone(),
            source,
        };

        match &known_path {
            Some(path) => {
                container.check_id_and_name().map_err(invalid)?;
                if path.is_empty() {
                    return Err(invalid(DomainError::EmptyPath(container.id.clone())));
                }
            }
            None => container.check_required_values().map_err(invalid)?,
        }

        let mut cache = self.write();
        if cache.contains_key(&container.id) {
            debug!(container_id = %container.id, "Container already cached");
            return Ok(());
        }

        let id = container.id.clone();
        let mut entry = ResolvedContainer::unresolved(container);
        if let Some(path) = known_path {
            entry.id_path = Some(ContainerPath::from_elements([id.clone()]));
            entry.path = Some(path);
        }
        cache.insert(id, entry);
        Ok(())
    }

    /// Adds the root of the hierarchy with `base_path` as its display path.
    ///
    /// Only the ID is required; the base path may be empty.
    pub fn add_root(&self, root: Container, base_path: ContainerPath) -> Result<(), ResolverError> {
        if root.id.is_empty() {
            return Err(ResolverError::InvalidContainer {
                id: String::new(),
                source: DomainError::MissingContainerId,
            });
        }

        let mut cache = self.write();
        if cache.contains_key(&root.id) {
            return Ok(());
        }

        let id = root.id.clone();
        cache.insert(
            id.clone(),
            ResolvedContainer {
                container: root,
                path: Some(base_path),
                id_path: Some(ContainerPath::from_elements([id.clone()])),
            },
        );
        debug!(container_id = %id, "Root container cached");
        Ok(())
    }

    /// Adds a container and resolves its path immediately.
    pub async fn add_to_cache(&self, container: Container) -> Result<(), ResolverError> {
        let id = container.id.clone();
        self.add_folder(container, None)?;
        self.id_to_path(&id).await.map(|_| ())
    }

    /// Removes a container from the cache.
    pub fn remove(&self, id: &str) -> Option<ResolvedContainer> {
        self.write().remove(id)
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    /// Returns the display path of `id`, resolving and memoizing the chain.
    pub async fn id_to_path(&self, id: &str) -> Result<ContainerPath, ResolverError> {
        self.resolve(id).await.map(|rc| rc.0)
    }

    /// Returns the ID path of `id`, resolving and memoizing the chain.
    pub async fn id_to_id_path(&self, id: &str) -> Result<ContainerPath, ResolverError> {
        self.resolve(id).await.map(|rc| rc.1)
    }

    /// Walks from `target` towards the first resolved ancestor, then fills in
    /// paths on the way back down.
    ///
    /// A cached container whose parent had to be fetched is fetched again
    /// itself. If it moved or was renamed meanwhile the cached copy is
    /// replaced and the walk starts over.
    async fn resolve(&self, target: &str) -> Result<(ContainerPath, ContainerPath), ResolverError> {
        let mut restarts = 0;
        loop {
            if let Some(resolved) = self.walk(target).await? {
                return Ok(resolved);
            }
            restarts += 1;
            if restarts > self.max_depth {
                return Err(ResolverError::DepthExceeded {
                    id: target.to_string(),
                    max_depth: self.max_depth,
                });
            }
        }
    }

    /// One pass of [`Self::resolve`]; `None` means the cache changed under the
    /// walk and it has to be repeated.
    async fn walk(
        &self,
        target: &str,
    ) -> Result<Option<(ContainerPath, ContainerPath)>, ResolverError> {
        // Unresolved containers from `target` upwards
        let mut chain: Vec<Link> = Vec::new();
        let mut current = target.to_string();
        let mut recovered: Option<String> = None;

        let (base_path, base_id_path) = loop {
            if chain.len() >= self.max_depth {
                return Err(ResolverError::DepthExceeded {
                    id: target.to_string(),
                    max_depth: self.max_depth,
                });
            }

            let step = {
                let cache = self.read();
                cache.get(&current).map(|rc| match (&rc.path, &rc.id_path) {
                    (Some(p), Some(ip)) => Ok((p.clone(), ip.clone())),
                    _ => Err(rc.container.clone()),
                })
            };

            match step {
                Some(Ok(resolved)) => break resolved,
                Some(Err(container)) => {
                    let Some(parent) = container.parent().map(str::to_string) else {
                        return Err(ResolverError::MissingPath { id: current });
                    };
                    let fresh = recovered.as_deref() == Some(current.as_str());
                    chain.push(Link {
                        cached: (!fresh).then_some(container),
                        id: current,
                        parent_recovered: false,
                    });
                    current = parent;
                }
                None => {
                    self.recover(&current, target, &chain).await?;
                    if let Some(child) = chain.last_mut() {
                        child.parent_recovered = true;
                    }
                    recovered = Some(current.clone());
                }
            }
        };

        // Top-down, so a moved ancestor is noticed before its descendants
        for (depth, link) in chain.iter().enumerate().rev() {
            let Some(cached) = link.cached.as_ref().filter(|_| link.parent_recovered) else {
                continue;
            };
            if !self.refresh(cached, target, &chain[..depth]).await? {
                return Ok(None);
            }
        }

        let mut cache = self.write();
        let mut path = base_path;
        let mut id_path = base_id_path;

        for link in chain.into_iter().rev() {
            let Some(entry) = cache.get_mut(&link.id) else {
                return Err(ResolverError::NotCached {
                    id: link.id,
                    target: target.to_string(),
                });
            };

            if let (Some(p), Some(ip)) = (&entry.path, &entry.id_path) {
                // Resolved concurrently; keep the first result
                path = p.clone();
                id_path = ip.clone();
                continue;
            }

            path = path.append(entry.container.display_name.clone());
            id_path = id_path.append(link.id);
            entry.path = Some(path.clone());
            entry.id_path = Some(id_path.clone());
        }

        Ok(Some((path, id_path)))
    }

    /// Fetches a container missing from the cache through the refresher.
    async fn recover(&self, id: &str, target: &str, chain: &[Link]) -> Result<(), ResolverError> {
        let Some(refresher) = &self.refresher else {
            return Err(ResolverError::NotCached {
                id: id.to_string(),
                target: target.to_string(),
            });
        };

        debug!(container_id = %id, "Refreshing uncached container");
        let fetched = refresher
            .get_container(id)
            .await
            .map_err(|source| ResolverError::Enumeration {
                id: id.to_string(),
                source,
            })?;

        match fetched {
            Some(container) => {
                if container.id != id {
                    return Err(ResolverError::NotCached {
                        id: id.to_string(),
                        target: target.to_string(),
                    });
                }
                self.add_folder(container, None)
            }
            None => {
                debug!(container_id = %id, "Container was deleted, dropping descendants");
                Err(self.drop_deleted(chain, target))
            }
        }
    }

    /// Re-fetches a cached container whose parent was just recovered.
    ///
    /// Returns `false` when the cached copy was replaced because the
    /// container moved or was renamed. `below` holds the descendants of
    /// `cached` on the walk, dropped along with it if it was deleted.
    async fn refresh(
        &self,
        cached: &Container,
        target: &str,
        below: &[Link],
    ) -> Result<bool, ResolverError> {
        let Some(refresher) = &self.refresher else {
            return Ok(true);
        };

        debug!(container_id = %cached.id, "Parent was refreshed, refreshing container");
        let fetched = refresher
            .get_container(&cached.id)
            .await
            .map_err(|source| ResolverError::Enumeration {
                id: cached.id.clone(),
                source,
            })?;

        let Some(latest) = fetched else {
            debug!(container_id = %cached.id, "Refreshing container showed it was deleted");
            self.remove(&cached.id);
            return Err(self.drop_deleted(below, target));
        };

        if latest.parent() == cached.parent() && latest.display_name == cached.display_name {
            return Ok(true);
        }

        debug!(
            container_id = %cached.id,
            old_parent = ?cached.parent(),
            new_parent = ?latest.parent(),
            "Container moved or renamed, replacing cached copy"
        );
        self.remove(&cached.id);
        self.add_folder(latest, None)?;
        Ok(false)
    }

    /// Drops the unresolved descendants of a deleted container.
    fn drop_deleted(&self, descendants: &[Link], target: &str) -> ResolverError {
        let mut cache = self.write();
        for link in descendants {
            cache.remove(&link.id);
        }
        ResolverError::Deleted {
            id: target.to_string(),
        }
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    /// Finds the container whose display path renders exactly as `path`.
    pub fn path_in_cache(&self, path: &str) -> Option<String> {
        if path.is_empty() {
            return None;
        }
        self.read()
            .values()
            .find(|rc| rc.path.as_ref().is_some_and(|p| p.to_string() == path))
            .map(|rc| rc.id().to_string())
    }

    /// Finds the container whose ID path renders exactly as `path`.
    pub fn id_path_in_cache(&self, path: &str) -> Option<String> {
        if path.is_empty() {
            return None;
        }
        self.read()
            .values()
            .find(|rc| rc.id_path.as_ref().is_some_and(|p| p.to_string() == path))
            .map(|rc| rc.id().to_string())
    }

    /// Returns a snapshot of one cached container.
    pub fn item_by_id(&self, id: &str) -> Option<ResolvedContainer> {
        self.read().get(id).cloned()
    }

    /// Returns a snapshot of the whole cache.
    pub fn items(&self) -> Vec<ResolvedContainer> {
        self.read().values().cloned().collect()
    }

    /// Returns cached containers with `include` first, in the given order,
    /// followed by the rest sorted by ID, minus `exclude`.
    ///
    /// An ID in both lists is included.
    pub fn ranked_items(&self, include: &[&str], exclude: &[&str]) -> Vec<ResolvedContainer> {
        let cache = self.read();
        let included: HashSet<&str> = include.iter().copied().collect();
        let excluded: HashSet<&str> = exclude.iter().copied().collect();

        let mut seen = HashSet::new();
        let mut ranked: Vec<ResolvedContainer> = include
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| cache.get(*id).cloned())
            .collect();

        let mut rest: Vec<&ResolvedContainer> = cache
            .values()
            .filter(|rc| !included.contains(rc.id()) && !excluded.contains(rc.id()))
            .collect();
        rest.sort_by(|a, b| a.id().cmp(b.id()));

        ranked.extend(rest.into_iter().cloned());
        ranked
    }

    /// Number of cached containers.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
