//! Cluster record as reported by the T2 control plane
//!
//! The API answers with `{id, status: {state, failed}, ipV4Address}`. Newer
//! control planes send `status` as a flat string with the failure folded into
//! the state name (`LAUNCH_FAILED`, `TERMINATION_FAILED`); both shapes map onto
//! the same [`ClusterRecord`].

use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    /// Infrastructure is being created
    Launching,
    /// Cluster is up and reachable
    Running,
    /// Teardown has been requested and is in progress
    Terminating,
    /// All resources are gone
    Terminated,
    /// The control plane gave up on the cluster
    Failed,
}

impl ClusterState {
    /// Map a control-plane state name onto a state and an implied failure flag.
    ///
    /// Returns `None` for names this driver does not know.
    pub fn from_wire(name: &str) -> Option<(Self, bool)> {
        let mapped = match name.trim().to_ascii_uppercase().as_str() {
            "NEW" | "LAUNCHING" | "STARTING" => (Self::Launching, false),
            "RUNNING" => (Self::Running, false),
            "TERMINATING" | "STOPPING" => (Self::Terminating, false),
            "TERMINATED" | "TERMINATED_MANUALLY" => (Self::Terminated, false),
            "FAILED" | "LAUNCH_FAILED" | "TERMINATION_FAILED" | "BROKEN" => (Self::Failed, true),
            _ => return None,
        };
        Some(mapped)
    }

    /// Whether no further transition can leave this state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Launching => 0,
            Self::Running => 1,
            Self::Terminating => 2,
            Self::Terminated => 3,
            Self::Failed => 4,
        }
    }

    /// Whether a snapshot in `next` may follow a snapshot in `self`.
    ///
    /// Staying put is always allowed. FAILED is reachable from every
    /// non-terminal state; otherwise states only move forward along
    /// LAUNCHING → RUNNING → TERMINATING → TERMINATED.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || next.rank() > self.rank()
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Launching => write!(f, "LAUNCHING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Terminating => write!(f, "TERMINATING"),
            Self::Terminated => write!(f, "TERMINATED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Snapshot of a cluster's identity and lifecycle state
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "WireCluster")]
pub struct ClusterRecord {
    /// Identifier assigned by the control plane
    pub id: String,
    /// Lifecycle state
    pub state: ClusterState,
    /// Failure flag reported by the control plane
    pub failed: bool,
    /// Creation time as reported by the control plane (local time, no zone)
    pub created: Option<NaiveDateTime>,
    /// Public IPv4 address, available once the cluster runs
    pub ipv4_address: Option<String>,
}

impl ClusterRecord {
    /// Build a record without timestamp or address (mostly for fixtures)
    pub fn new(id: impl Into<String>, state: ClusterState, failed: bool) -> Self {
        Self {
            id: id.into(),
            state,
            failed,
            created: None,
            ipv4_address: None,
        }
    }

    /// Whether the control plane considers the cluster failed
    pub fn is_failed(&self) -> bool {
        self.failed || self.state == ClusterState::Failed
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCluster {
    id: String,
    status: WireStatus,
    #[serde(default)]
    date_time_created: Option<String>,
    #[serde(default, rename = "ipV4Address")]
    ip_v4_address: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireStatus {
    Detailed {
        state: String,
        #[serde(default)]
        failed: bool,
    },
    Flat(String),
}

impl TryFrom<WireCluster> for ClusterRecord {
    type Error = String;

    fn try_from(wire: WireCluster) -> Result<Self, Self::Error> {
        let (name, reported_failed) = match wire.status {
            WireStatus::Detailed { state, failed } => (state, failed),
            WireStatus::Flat(state) => (state, false),
        };
        let (state, implied_failed) = ClusterState::from_wire(&name)
            .ok_or_else(|| format!("unknown cluster state '{}'", name))?;

        Ok(Self {
            id: wire.id,
            state,
            failed: reported_failed || implied_failed,
            created: wire.date_time_created.as_deref().and_then(parse_timestamp),
            ipv4_address: wire.ip_v4_address.filter(|ip| !ip.trim().is_empty()),
        })
    }
}

/// Parse `dateTimeCreated`, which is a zone-less local timestamp on the
/// control plane but may also arrive as RFC 3339.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_local())
        })
}
