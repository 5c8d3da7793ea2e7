//! Container enumerator port (driven/secondary port)
//!
//! Resource connectors (mail, calendars, contacts, drives, lists) implement
//! this trait so the [`ContainerResolver`](crate::resolver::ContainerResolver)
//! can walk their hierarchy without knowing the resource type.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are adapter-specific.
//!   The resolver wraps them in `ResolverError::Enumeration` together with the
//!   container ID being fetched.
//! - A deleted container is reported as `Ok(None)` by `get_container`, not as
//!   an error.

use crate::domain::{Container, ContainerPage};

/// Port trait for enumerating the containers of one resource category
#[async_trait::async_trait]
pub trait IContainerEnumerator: Send + Sync {
    /// Fetches the root container of the hierarchy
    async fn get_root(&self) -> anyhow::Result<Container>;

    /// Lists one page of direct children of `parent_id`
    ///
    /// # Arguments
    /// * `parent_id` - The container whose children are listed
    /// * `page_token` - Token from the previous page, `None` for the first page
    ///
    /// # Returns
    /// The containers on this page and the token for the next one
    async fn list_children(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
    ) -> anyhow::Result<ContainerPage>;

    /// Fetches a single container by ID
    ///
    /// Returns `Ok(None)` when the container no longer exists.
    async fn get_container(&self, id: &str) -> anyhow::Result<Option<Container>>;
}
