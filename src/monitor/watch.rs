//! Watch processes and post-test snapshots
//!
//! Watches tail pod and event changes into the output folder while tests
//! run. Snapshots are one-shot dumps taken after the watches stopped, each
//! bounded by a timeout and never fatal.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::output::OutputFiles;
use crate::process::GroupChild;
use crate::Result;

/// Upper bound for a single snapshot command
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(120);

/// Column layout used for the short event logs
const EVENT_COLUMNS: &str = "NAMESPACE:metadata.namespace,EVENT_TIME:eventTime,\
FIRST_TIMESTAMP:firstTimestamp,LAST_TIMESTAMP:lastTimestamp,TYPE:type,REASON:reason,\
OBJECT_KIND:involvedObject.kind,OBJECT_NAME:involvedObject.name,MESSAGE:message";

/// One external command whose stdout goes into a file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchSpec {
    /// Name used in logs
    pub name: String,
    /// Program to execute
    pub program: PathBuf,
    /// Arguments
    pub args: Vec<String>,
    /// File receiving stdout
    pub output: PathBuf,
}

impl WatchSpec {
    fn command(&self, stdout: File) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::null());
        command
    }
}

/// Decides what to watch and what to dump around the test window
pub trait ClusterFileWatcher: Send + Sync {
    /// Long-running watches started with the monitor
    fn watches(&self, files: &OutputFiles) -> Vec<WatchSpec>;

    /// One-shot dumps taken after the monitor stopped
    fn snapshots(&self, files: &OutputFiles) -> Vec<WatchSpec>;
}

/// kubectl watches plus node journals through the Stackable client script
#[derive(Clone, Debug)]
pub struct KubectlWatcher {
    kubeconfig: PathBuf,
    client_script: PathBuf,
    ssh_config: PathBuf,
}

impl KubectlWatcher {
    /// Watch the cluster in `kubeconfig`; node journals are collected when
    /// `client_script` is installed and `ssh_config` lists the nodes.
    pub fn new(
        kubeconfig: impl Into<PathBuf>,
        client_script: impl Into<PathBuf>,
        ssh_config: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            client_script: client_script.into(),
            ssh_config: ssh_config.into(),
        }
    }

    fn kubectl(&self, name: &str, args: &[&str], output: &Path) -> WatchSpec {
        let mut all = vec![
            "--kubeconfig".to_string(),
            self.kubeconfig.display().to_string(),
        ];
        all.extend(args.iter().map(|a| a.to_string()));
        WatchSpec {
            name: name.to_string(),
            program: PathBuf::from("kubectl"),
            args: all,
            output: output.to_path_buf(),
        }
    }
}

impl ClusterFileWatcher for KubectlWatcher {
    fn watches(&self, files: &OutputFiles) -> Vec<WatchSpec> {
        let columns = format!("-o=custom-columns={}", EVENT_COLUMNS);
        vec![
            self.kubectl(
                "pod-watch",
                &["get", "pods", "--all-namespaces", "-o", "yaml", "--watch"],
                &files.pod_changes,
            ),
            self.kubectl(
                "pod-watch-short",
                &["get", "pods", "--all-namespaces", "--watch"],
                &files.pod_changes_short,
            ),
            self.kubectl(
                "event-watch",
                &["get", "events", "--all-namespaces", "-o", "yaml", "--watch"],
                &files.event_watch,
            ),
            self.kubectl(
                "event-watch-short",
                &["get", "events", "--all-namespaces", "--watch", &columns],
                &files.event_watch_short,
            ),
        ]
    }

    fn snapshots(&self, files: &OutputFiles) -> Vec<WatchSpec> {
        let columns = format!("-o=custom-columns={}", EVENT_COLUMNS);
        let mut specs = vec![
            self.kubectl(
                "event-list",
                &["get", "events", "--all-namespaces", "-o", "yaml"],
                &files.event_list,
            ),
            self.kubectl(
                "event-list-short",
                &["get", "events", "--all-namespaces", &columns],
                &files.event_list_short,
            ),
        ];

        if !self.client_script.is_file() {
            return specs;
        }
        let ssh_config = match std::fs::read_to_string(&self.ssh_config) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %self.ssh_config.display(), error = %e, "no SSH config, skipping node journals");
                return specs;
            }
        };
        for host in node_hosts(&ssh_config) {
            specs.push(WatchSpec {
                name: format!("{}-journal", host),
                program: self.client_script.clone(),
                args: vec![host.clone(), "journalctl -u k3s-agent".to_string()],
                output: files.dir.join(format!("{}-k3s-agent.log", host)),
            });
        }
        specs
    }
}

/// Node names from the `Host main...` entries of an SSH config.
///
/// Only the part before a `/` is kept, mirroring how the cluster's SSH
/// config names its hosts.
pub fn node_hosts(ssh_config: &str) -> Vec<String> {
    ssh_config
        .lines()
        .filter(|line| line.starts_with("Host main"))
        .filter_map(|line| line.split(' ').nth(1))
        .filter_map(|host| host.split('/').next())
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .collect()
}

/// Start a watch with stdout appended to its output file
pub(crate) fn spawn_watch(spec: &WatchSpec) -> Result<GroupChild> {
    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&spec.output)?;
    GroupChild::spawn(&spec.name, spec.command(stdout))
}

/// Run one snapshot to completion or until `timeout`, logging failures
pub async fn run_snapshot(spec: &WatchSpec, timeout: Duration) {
    let stdout = match File::create(&spec.output) {
        Ok(file) => file,
        Err(e) => {
            warn!(snapshot = %spec.name, path = %spec.output.display(), error = %e, "cannot open snapshot file");
            return;
        }
    };
    let mut child = match GroupChild::spawn(&spec.name, spec.command(stdout)) {
        Ok(child) => child,
        Err(e) => {
            warn!(snapshot = %spec.name, error = %e, "snapshot not taken");
            return;
        }
    };

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_exit() {
            if status.success() {
                info!(snapshot = %spec.name, "snapshot written");
            } else {
                warn!(snapshot = %spec.name, %status, "snapshot command failed");
            }
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(snapshot = %spec.name, ?timeout, "snapshot timed out");
            child.stop(Duration::from_secs(1)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
