//! Common types for the T2 test driver: cluster records, lifecycle states and errors

#![deny(missing_docs)]

pub mod cluster;
pub mod error;

pub use cluster::{ClusterRecord, ClusterState};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code for any unrecoverable lifecycle failure
///
/// Covers failed or timed-out create/delete, invalid input and malformed
/// access descriptors. Distinct from any exit code a test script is expected
/// to produce on its own.
pub const EXIT_CODE_CLUSTER_FAILED: i32 = 255;

/// Header carrying the T2 API token on every request
pub const TOKEN_HEADER: &str = "t2-token";
