//! Domain entities
//!
//! This module contains the core domain types for TenantVault:
//! - Containers and their resolved paths
//! - Incremental-sync bookkeeping (delta tokens and previous paths)
//! - Traffic classes used to partition outbound API calls
//! - Domain-specific error types

pub mod container;
pub mod delta;
pub mod errors;
pub mod traffic;

// Re-export commonly used types
pub use container::{Container, ContainerPage, ContainerPath, ResolvedContainer};
pub use delta::{
    metadata_file_names, CatDeltaPaths, Category, DeltaPath, DeltaPaths, DELTA_URLS_FILE_NAME,
    PREVIOUS_PATH_FILE_NAME,
};
pub use errors::DomainError;
pub use traffic::TrafficClass;
