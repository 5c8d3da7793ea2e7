//! Integration tests for tenantvault-graph
//!
//! Uses wiremock to simulate the Microsoft Graph API and in-memory
//! transports to observe admission control, retries and classification
//! end to end.

mod common;

mod test_client;
mod test_concurrency;
mod test_retry;
