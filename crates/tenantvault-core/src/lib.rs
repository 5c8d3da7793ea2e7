//! TenantVault Core - Domain types, ports, and container resolution
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Container`, `ContainerPath`, `DeltaPaths`, `CatDeltaPaths`, `TrafficClass`
//! - **Port definitions** - Traits for adapters: `IContainerEnumerator`, `ICallMetricsSink`
//! - **Container resolver** - Memoizing, cycle-safe path resolution
//! - **Configuration** - YAML-backed settings for limiters, retries and logging
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module holds plain data with no I/O. Ports define trait
//! interfaces that adapter crates implement; the resolver only talks to the
//! remote service through [`ports::IContainerEnumerator`].

pub mod config;
pub mod domain;
pub mod ports;
pub mod resolver;

pub use resolver::{ContainerResolver, ResolverError};
