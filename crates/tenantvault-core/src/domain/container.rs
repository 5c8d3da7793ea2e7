//! Container domain types
//!
//! A container is any hierarchical grouping entity exposed by the remote
//! service: a mail folder, a calendar, a contact folder, a list, or a drive
//! folder. Containers only know their immediate parent; the full path is
//! computed by the [`ContainerResolver`](crate::resolver::ContainerResolver).

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// Container
// ============================================================================

/// A container as reported by the remote service.
///
/// Read-only from the resolver's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Provider-assigned identifier
    pub id: String,
    /// Human-readable name shown to the user
    pub display_name: String,
    /// Identifier of the parent container (`None` for roots)
    pub parent_id: Option<String>,
}

impl Container {
    /// Creates a container with a parent reference.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            parent_id: Some(parent_id.into()),
        }
    }

    /// Creates a parentless container.
    pub fn root(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            parent_id: None,
        }
    }

    /// Returns the parent ID, treating an empty string as absent.
    pub fn parent(&self) -> Option<&str> {
        self.parent_id.as_deref().filter(|p| !p.is_empty())
    }

    /// Checks that the container has a non-empty ID and display name.
    pub fn check_id_and_name(&self) -> Result<(), DomainError> {
        if self.id.is_empty() {
            return Err(DomainError::MissingContainerId);
        }
        if self.display_name.is_empty() {
            return Err(DomainError::MissingDisplayName(self.id.clone()));
        }
        Ok(())
    }

    /// Checks ID, display name, and parent reference.
    ///
    /// Required for containers whose path has to be computed from the parent.
    pub fn check_required_values(&self) -> Result<(), DomainError> {
        self.check_id_and_name()?;
        if self.parent().is_none() {
            return Err(DomainError::MissingParentId(self.id.clone()));
        }
        Ok(())
    }
}

/// One page of containers returned by an enumerator.
#[derive(Debug, Clone, Default)]
pub struct ContainerPage {
    /// Containers on this page
    pub containers: Vec<Container>,
    /// Token for the next page, `None` on the last page
    pub next_page: Option<String>,
}

// ============================================================================
// ContainerPath
// ============================================================================

/// Ordered list of path elements, rendered joined by `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerPath(Vec<String>);

impl ContainerPath {
    /// Separator used when rendering a path as a string
    pub const SEPARATOR: char = '/';

    /// Creates an empty path.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Builds a path from the given elements.
    pub fn from_elements<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(elements.into_iter().map(Into::into).collect())
    }

    /// Returns a new path with `element` appended.
    #[must_use]
    pub fn append(&self, element: impl Into<String>) -> Self {
        let mut elements = self.0.clone();
        elements.push(element.into());
        Self(elements)
    }

    /// Returns the path elements.
    pub fn elements(&self) -> &[String] {
        &self.0
    }

    /// Number of elements in the path.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the path has no elements.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for ContainerPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", Self::SEPARATOR)?;
            }
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

impl From<Vec<String>> for ContainerPath {
    fn from(elements: Vec<String>) -> Self {
        Self(elements)
    }
}

// ============================================================================
// ResolvedContainer
// ============================================================================

/// A cached container together with its computed paths.
///
/// `path` is built from display names, `id_path` from container IDs. Both are
/// `None` until resolution succeeds, and are never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedContainer {
    /// The container facts as reported by the service
    pub container: Container,
    /// Display-name path
    pub path: Option<ContainerPath>,
    /// Container-ID path
    pub id_path: Option<ContainerPath>,
}

impl ResolvedContainer {
    /// Wraps a container whose paths are not yet known.
    pub fn unresolved(container: Container) -> Self {
        Self {
            container,
            path: None,
            id_path: None,
        }
    }

    /// Returns the container ID.
    pub fn id(&self) -> &str {
        &self.container.id
    }

    /// Returns `true` once both paths are populated.
    pub fn is_resolved(&self) -> bool {
        self.path.is_some() && self.id_path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_display_joins_elements() {
        let path = ContainerPath::from_elements(["folderA", "folderB", "folderC"]);
        assert_eq!(path.to_string(), "folderA/folderB/folderC");
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn test_empty_path_renders_empty_string() {
        assert_eq!(ContainerPath::new().to_string(), "");
        assert!(ContainerPath::new().is_empty());
    }

    #[test]
    fn test_append_does_not_mutate_original() {
        let base = ContainerPath::from_elements(["a"]);
        let child = base.append("b");
        assert_eq!(base.to_string(), "a");
        assert_eq!(child.to_string(), "a/b");
    }

    #[test]
    fn test_empty_parent_treated_as_absent() {
        let c = Container::new("id", "name", "");
        assert!(c.parent().is_none());
        assert_eq!(
            c.check_required_values(),
            Err(DomainError::MissingParentId("id".to_string()))
        );
    }

    #[test]
    fn test_check_id_and_name() {
        assert_eq!(
            Container::root("", "name").check_id_and_name(),
            Err(DomainError::MissingContainerId)
        );
        assert_eq!(
            Container::root("id", "").check_id_and_name(),
            Err(DomainError::MissingDisplayName("id".to_string()))
        );
        assert!(Container::new("id", "name", "parent")
            .check_required_values()
            .is_ok());
    }

    #[test]
    fn test_container_serde_camel_case() {
        let c = Container::new("c1", "Inbox", "root");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["displayName"], "Inbox");
        assert_eq!(json["parentId"], "root");
    }
}
