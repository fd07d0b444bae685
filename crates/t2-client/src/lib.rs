//! HTTP client for the T2 cluster management API
//!
//! Thin request/response wrapper: one HTTP call per operation, the API token
//! on every request, non-success statuses surfaced as
//! [`Error::ControlPlane`](t2_common::Error::ControlPlane). Retry policy
//! belongs to the caller.

#![deny(missing_docs)]

pub mod client;

pub use client::{ClusterApi, ClusterResource, T2Client};
#[cfg(any(test, feature = "mock"))]
pub use client::MockClusterApi;
