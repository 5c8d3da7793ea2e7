//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are interfaces that the core depends on, but whose implementations
//! live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IContainerEnumerator`] - Lists containers of one resource category
//! - [`ICallMetricsSink`] - Receives one record per outbound API call

pub mod container_enumerator;
pub mod metrics_sink;

pub use container_enumerator::IContainerEnumerator;
pub use metrics_sink::{CallOutcome, CallRecord, ICallMetricsSink, NoopMetricsSink};
