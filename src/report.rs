//! Report of clusters that need attention
//!
//! Lists failed clusters and clusters stuck in running, launching or
//! terminating for more than a day. Meant for a daily cron job against the
//! control plane to catch orphaned clusters.

use std::fmt;

use chrono::{Duration, NaiveDateTime};

use t2_client::ClusterApi;
use t2_common::{ClusterRecord, ClusterState, Result};

/// Age after which a non-terminal cluster is reported
pub fn stale_after() -> Duration {
    Duration::days(1)
}

/// Clusters grouped by what is wrong with them
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterReport {
    /// Control plane the report was built for
    pub source: String,
    /// Clusters flagged as failed
    pub failed: Vec<ClusterRecord>,
    /// Running for more than a day
    pub long_running: Vec<ClusterRecord>,
    /// Launching for more than a day
    pub long_launching: Vec<ClusterRecord>,
    /// Terminating for more than a day
    pub long_terminating: Vec<ClusterRecord>,
}

impl ClusterReport {
    /// Whether nothing needs attention
    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
            && self.long_running.is_empty()
            && self.long_launching.is_empty()
            && self.long_terminating.is_empty()
    }
}

/// Sort `clusters` into the report sections as of `now`.
///
/// Clusters without a creation time are never considered stale.
pub fn build_report(
    source: impl Into<String>,
    clusters: Vec<ClusterRecord>,
    now: NaiveDateTime,
) -> ClusterReport {
    let older_than_a_day = |c: &ClusterRecord| c.created.is_some_and(|t| now - t > stale_after());
    let mut report = ClusterReport {
        source: source.into(),
        ..Default::default()
    };

    for cluster in clusters {
        if cluster.is_failed() {
            report.failed.push(cluster);
            continue;
        }
        if !older_than_a_day(&cluster) {
            continue;
        }
        match cluster.state {
            ClusterState::Running => report.long_running.push(cluster),
            ClusterState::Launching => report.long_launching.push(cluster),
            ClusterState::Terminating => report.long_terminating.push(cluster),
            ClusterState::Terminated | ClusterState::Failed => {}
        }
    }
    report
}

/// Fetch all clusters and build the report as of now (local time)
pub async fn fetch_report(api: &dyn ClusterApi, source: &str) -> Result<ClusterReport> {
    let clusters = api.list().await?;
    Ok(build_report(source, clusters, chrono::Local::now().naive_local()))
}

fn write_section(f: &mut fmt::Formatter<'_>, header: &str, clusters: &[ClusterRecord]) -> fmt::Result {
    if clusters.is_empty() {
        return Ok(());
    }
    writeln!(f)?;
    writeln!(f, "{}", header)?;
    for cluster in clusters {
        match cluster.created {
            Some(created) => writeln!(
                f,
                "{}: {}, started at {}",
                cluster.id,
                cluster.state,
                created.format("%Y-%m-%dT%H:%M:%S")
            )?,
            None => writeln!(f, "{}: {}, start time unknown", cluster.id, cluster.state)?,
        }
    }
    Ok(())
}

impl fmt::Display for ClusterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Report for {}", self.source)?;
        write_section(f, "These clusters failed:", &self.failed)?;
        write_section(f, "These clusters are running for more than a day:", &self.long_running)?;
        write_section(f, "These clusters are starting for more than a day:", &self.long_launching)?;
        write_section(
            f,
            "These clusters are terminating for more than a day:",
            &self.long_terminating,
        )
    }
}
