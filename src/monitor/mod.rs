//! Background monitoring around the test window
//!
//! The supervisor owns every background activity of a run: the external
//! watch processes and the cooperative ping loop. It is started once after
//! the cluster is reachable and stopped once before teardown; `&mut self` on
//! both keeps start and stop from overlapping.
//!
//! Stop order:
//! 1. SIGTERM every watch process group, wait for the exits (bounded)
//! 2. raise the stop flag and wake the ping loop
//! 3. await the ping loop, which writes its summary before returning

pub mod ping;
pub mod watch;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::output::OutputFiles;
use crate::process::{GroupChild, TaskState, STOP_GRACE_PERIOD};
use crate::Result;

pub use ping::{HealthProbe, KubectlProbe, PingOutcome, PingSettings, PingSummary};
pub use watch::{run_snapshot, ClusterFileWatcher, KubectlWatcher, WatchSpec, SNAPSHOT_TIMEOUT};

use ping::StopSignal;

struct PingTask {
    stop: StopSignal,
    handle: Option<JoinHandle<PingSummary>>,
    state: TaskState,
}

/// Owner of the background observation tasks of one run
pub struct MonitorSupervisor {
    files: OutputFiles,
    settings: PingSettings,
    watches: Vec<GroupChild>,
    ping: Option<PingTask>,
    summary: Option<PingSummary>,
}

impl MonitorSupervisor {
    /// Supervisor writing into `files`
    pub fn new(files: OutputFiles, settings: PingSettings) -> Self {
        Self {
            files,
            settings,
            watches: Vec::new(),
            ping: None,
            summary: None,
        }
    }

    /// Start the watches of `watcher` and the ping loop.
    ///
    /// Output files are created before anything is spawned. A watch that
    /// fails to spawn is logged and skipped; observation gaps do not stop a
    /// test run.
    pub fn start(&mut self, watcher: &dyn ClusterFileWatcher, probe: Arc<dyn HealthProbe>) -> Result<()> {
        if self.is_started() {
            warn!("monitoring already started");
            return Ok(());
        }
        self.files.ensure_exist()?;
        self.watches.clear();

        for spec in watcher.watches(&self.files) {
            match watch::spawn_watch(&spec) {
                Ok(child) => {
                    info!(task = %spec.name, output = %spec.output.display(), "watch started");
                    self.watches.push(child);
                }
                Err(e) => warn!(task = %spec.name, error = %e, "watch not started"),
            }
        }

        let stop = StopSignal::default();
        let handle = tokio::spawn(ping::run_ping_loop(
            probe,
            self.files.ping_log.clone(),
            self.files.ping_summary.clone(),
            self.settings,
            stop.clone(),
        ));
        self.ping = Some(PingTask {
            stop,
            handle: Some(handle),
            state: TaskState::Running,
        });
        info!(watches = self.watches.len(), "monitoring started");
        Ok(())
    }

    /// Whether any task is running or stopping
    pub fn is_started(&self) -> bool {
        self.task_states()
            .iter()
            .any(|(_, state)| *state != TaskState::Stopped)
    }

    /// States of all tasks, watches first
    pub fn task_states(&self) -> Vec<(String, TaskState)> {
        let mut states: Vec<_> = self
            .watches
            .iter()
            .map(|w| (w.name().to_string(), w.state()))
            .collect();
        if let Some(ping) = &self.ping {
            states.push(("ping".to_string(), ping.state));
        }
        states
    }

    /// Stop everything and return the ping summary.
    ///
    /// Safe to call when nothing was started and safe to call twice; later
    /// calls return the summary of the first one.
    pub async fn stop(&mut self) -> Option<PingSummary> {
        for watch in &mut self.watches {
            watch.request_stop();
        }
        for watch in &mut self.watches {
            watch.wait_stopped(STOP_GRACE_PERIOD).await;
        }

        if let Some(ping) = &mut self.ping {
            if let Some(handle) = ping.handle.take() {
                ping.stop.raise();
                ping.state = TaskState::StopRequested;
                match handle.await {
                    Ok(summary) => self.summary = Some(summary),
                    Err(e) => warn!(error = %e, "ping loop did not finish cleanly"),
                }
            }
            ping.state = TaskState::Stopped;
        }
        self.summary.clone()
    }

    /// Take the one-shot dumps of `watcher`, each capped at
    /// [`SNAPSHOT_TIMEOUT`]. Failures are logged only.
    pub async fn snapshot(&self, watcher: &dyn ClusterFileWatcher) {
        for spec in watcher.snapshots(&self.files) {
            run_snapshot(&spec, SNAPSHOT_TIMEOUT).await;
        }
    }
}

impl Drop for MonitorSupervisor {
    fn drop(&mut self) {
        // watch children are killed on drop; the ping loop only needs the flag
        if let Some(ping) = &self.ping {
            ping.stop.raise();
        }
    }
}
