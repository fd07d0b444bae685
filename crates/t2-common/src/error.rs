//! Error types for the T2 test driver
//!
//! Errors are grouped by how the caller has to react to them: control-plane
//! and transport errors may be transient, lifecycle failures and timeouts are
//! always fatal, and configuration errors abort before any cluster exists.

use std::time::Duration;

use thiserror::Error;

use crate::cluster::ClusterState;

/// Main error type for test driver operations
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed input (environment, files, endpoints)
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's missing or invalid
        message: String,
    },

    /// The control plane answered with a non-success HTTP status
    #[error("control plane returned {status} for {operation}: {message}")]
    ControlPlane {
        /// API operation that failed (e.g. "create cluster")
        operation: String,
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// The request never produced an HTTP response
    #[error("transport error during {operation}: {message}")]
    Transport {
        /// API operation that failed
        operation: String,
        /// Underlying cause
        message: String,
    },

    /// The control plane flagged the cluster as failed
    #[error("cluster {cluster_id} failed while converging to {target}")]
    LifecycleFailed {
        /// Cluster identifier
        cluster_id: String,
        /// State the cluster was supposed to reach
        target: ClusterState,
    },

    /// The cluster did not reach its target state within the budget
    #[error("timeout after {elapsed:?} waiting for cluster {cluster_id} to reach {target}")]
    Timeout {
        /// Cluster identifier
        cluster_id: String,
        /// State the cluster was supposed to reach
        target: ClusterState,
        /// Wall-clock time spent polling
        elapsed: Duration,
    },

    /// The downloaded or supplied access descriptor can't be used
    #[error("invalid cluster access descriptor: {message}")]
    AccessDescriptor {
        /// Description of what's wrong with the descriptor
        message: String,
    },

    /// Tunnel setup or teardown failed
    #[error("tunnel error: {message}")]
    Tunnel {
        /// Description of what failed
        message: String,
    },

    /// An external helper process could not be run or failed
    #[error("{command} failed: {message}")]
    Process {
        /// Program that was executed
        command: String,
        /// Description of what failed
        message: String,
    },

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a control-plane error for a non-success HTTP status
    pub fn control_plane(
        operation: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::ControlPlane {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a transport error for a request that got no response
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an access descriptor error with the given message
    pub fn access_descriptor(message: impl Into<String>) -> Self {
        Self::AccessDescriptor {
            message: message.into(),
        }
    }

    /// Create a tunnel error with the given message
    pub fn tunnel(message: impl Into<String>) -> Self {
        Self::Tunnel {
            message: message.into(),
        }
    }

    /// Create a process error for the given program
    pub fn process(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Process {
            command: command.into(),
            message: message.into(),
        }
    }

    /// HTTP status code, if the control plane produced one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ControlPlane { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether asking again may plausibly succeed
    ///
    /// Server-side statuses (5xx, 408, 429), lost connections and garbled
    /// bodies qualify. Any other 4xx means the request itself is wrong; a
    /// remote failure flag or an exhausted budget never qualifies.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ControlPlane { status, .. } => *status >= 500 || matches!(status, 408 | 429),
            Self::Transport { .. } | Self::Json(_) => true,
            _ => false,
        }
    }
}
