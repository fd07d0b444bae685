//! Liveness ping loop
//!
//! One cooperative task: probe the cluster, append the outcome to the ping
//! log, sleep, repeat until the stop flag is raised. The probe is bounded by
//! a per-attempt timeout so a hung kubectl never hides the stop flag for
//! longer than one attempt.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::process::exit_code;

/// Default pause between two pings
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Default upper bound for a single ping
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one ping
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PingOutcome {
    /// The cluster answered
    Success {
        /// Size of the answer
        bytes: usize,
    },
    /// No answer within the per-attempt timeout
    Timeout,
    /// The probe failed with an exit code
    Error {
        /// Exit code of the probe
        code: i32,
        /// Error output of the probe
        stderr: String,
    },
}

/// Lightweight health check against the cluster
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Run one check. The caller bounds the duration and drops the future on
    /// timeout, so implementations must clean up on drop.
    async fn probe(&self) -> PingOutcome;
}

/// Lists running pods with kubectl
#[derive(Clone, Debug)]
pub struct KubectlProbe {
    kubeconfig: PathBuf,
}

impl KubectlProbe {
    /// Probe the cluster configured in `kubeconfig`
    pub fn new(kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for KubectlProbe {
    async fn probe(&self) -> PingOutcome {
        let output = Command::new("kubectl")
            .arg("--kubeconfig")
            .arg(&self.kubeconfig)
            .args([
                "get",
                "pods",
                "--no-headers",
                "--all-namespaces",
                "--field-selector",
                "status.phase=Running",
            ])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => PingOutcome::Success {
                bytes: output.stdout.len(),
            },
            // killed from outside, counted like a timeout
            Ok(output) if output.status.code().is_none() => PingOutcome::Timeout,
            Ok(output) => PingOutcome::Error {
                code: exit_code(output.status),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Err(e) => PingOutcome::Error {
                code: 127,
                stderr: format!("failed to run kubectl: {}\n", e),
            },
        }
    }
}

/// Aggregated ping outcomes
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PingSummary {
    /// Successful pings
    pub successes: u64,
    /// Pings that ran into the per-attempt timeout
    pub timeouts: u64,
    /// Failed pings per exit code
    pub errors: BTreeMap<i32, u64>,
}

impl PingSummary {
    /// Count one outcome
    pub fn record(&mut self, outcome: &PingOutcome) {
        match outcome {
            PingOutcome::Success { .. } => self.successes += 1,
            PingOutcome::Timeout => self.timeouts += 1,
            PingOutcome::Error { code, .. } => *self.errors.entry(*code).or_default() += 1,
        }
    }

    /// Number of failed pings over all exit codes
    pub fn error_count(&self) -> u64 {
        self.errors.values().sum()
    }

    /// Number of pings
    pub fn total(&self) -> u64 {
        self.successes + self.timeouts + self.error_count()
    }
}

impl fmt::Display for PingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ping statistics (kubectl get pods)")?;
        writeln!(f)?;
        writeln!(f, "total # of pings:       {:>8}", self.total())?;
        writeln!(f, "# of successful pings:  {:>8}", self.successes)?;
        writeln!(f, "# of timed out pings:   {:>8}", self.timeouts)?;
        writeln!(f, "# of errors:            {:>8}", self.error_count())?;
        for (code, count) in &self.errors {
            writeln!(f, "  exit code {:<4}        {:>8}", code, count)?;
        }
        Ok(())
    }
}

/// Log line for one outcome
pub fn format_outcome(timestamp: &str, outcome: &PingOutcome, attempt_timeout: Duration) -> String {
    match outcome {
        PingOutcome::Success { bytes } => format!("{} OK ({} bytes).\n", timestamp, bytes),
        PingOutcome::Timeout => format!(
            "{} Timeout after {} seconds.\n",
            timestamp,
            attempt_timeout.as_secs()
        ),
        PingOutcome::Error { code, stderr } => {
            format!("{} Error. exit code={}.\n{}", timestamp, code, stderr)
        }
    }
}

/// Timing of the ping loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PingSettings {
    /// Pause between two attempts
    pub interval: Duration,
    /// Upper bound for one attempt
    pub attempt_timeout: Duration,
}

impl Default for PingSettings {
    fn default() -> Self {
        Self {
            interval: PING_INTERVAL,
            attempt_timeout: PING_TIMEOUT,
        }
    }
}

/// Signals shared between the supervisor and the ping task
#[derive(Clone, Debug, Default)]
pub(crate) struct StopSignal {
    flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl StopSignal {
    pub(crate) fn raise(&self) {
        self.flag.store(true, Ordering::Release);
        // stores a permit if the loop is not sleeping right now
        self.wake.notify_one();
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wake.notified() => {}
        }
    }
}

/// Ping until `stop` is raised, then write the summary and return it
pub(crate) async fn run_ping_loop(
    probe: Arc<dyn HealthProbe>,
    log_file: PathBuf,
    summary_file: PathBuf,
    settings: PingSettings,
    stop: StopSignal,
) -> PingSummary {
    let mut summary = PingSummary::default();

    while !stop.is_raised() {
        let outcome = match tokio::time::timeout(settings.attempt_timeout, probe.probe()).await {
            Ok(outcome) => outcome,
            Err(_) => PingOutcome::Timeout,
        };
        summary.record(&outcome);

        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        append(
            &log_file,
            &format_outcome(&timestamp, &outcome, settings.attempt_timeout),
        )
        .await;

        stop.sleep(settings.interval).await;
    }

    if let Err(e) = tokio::fs::write(&summary_file, summary.to_string()).await {
        warn!(path = %summary_file.display(), error = %e, "failed to write ping summary");
    }
    info!(
        total = summary.total(),
        successes = summary.successes,
        timeouts = summary.timeouts,
        errors = summary.error_count(),
        "ping loop stopped"
    );
    summary
}

async fn append(path: &Path, line: &str) {
    let result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
    .await;
    if let Err(e) = result {
        debug!(path = %path.display(), error = %e, "failed to append ping result");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays outcomes, then keeps succeeding
    struct ReplayProbe {
        outcomes: Mutex<Vec<PingOutcome>>,
    }

    #[async_trait]
    impl HealthProbe for ReplayProbe {
        async fn probe(&self) -> PingOutcome {
            let next = self.outcomes.lock().unwrap().pop();
            next.unwrap_or(PingOutcome::Success { bytes: 1 })
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl HealthProbe for HangingProbe {
        async fn probe(&self) -> PingOutcome {
            std::future::pending::<()>().await;
            PingOutcome::Success { bytes: 0 }
        }
    }

    #[test]
    fn summary_counts_add_up_to_the_total() {
        let mut summary = PingSummary::default();
        for outcome in [
            PingOutcome::Success { bytes: 10 },
            PingOutcome::Timeout,
            PingOutcome::Error { code: 1, stderr: String::new() },
            PingOutcome::Error { code: 1, stderr: String::new() },
            PingOutcome::Error { code: 2, stderr: String::new() },
        ] {
            summary.record(&outcome);
        }

        assert_eq!(summary.total(), 5);
        assert_eq!(summary.error_count(), 3);
        assert_eq!(summary.errors.get(&1), Some(&2));
    }

    #[test]
    fn summary_renders_right_aligned_counts() {
        let summary = PingSummary {
            successes: 120,
            timeouts: 1,
            errors: BTreeMap::new(),
        };

        let text = summary.to_string();

        assert!(text.starts_with("Ping statistics (kubectl get pods)\n\n"));
        assert!(text.contains("total # of pings:            121\n"));
        assert!(text.contains("# of successful pings:       120\n"));
        assert!(text.contains("# of timed out pings:          1\n"));
        assert!(text.contains("# of errors:                   0\n"));
    }

    #[test]
    fn log_lines_per_outcome() {
        let t = Duration::from_secs(10);
        assert_eq!(
            format_outcome("2021-06-01 12:00:00", &PingOutcome::Success { bytes: 42 }, t),
            "2021-06-01 12:00:00 OK (42 bytes).\n"
        );
        assert_eq!(
            format_outcome("ts", &PingOutcome::Timeout, t),
            "ts Timeout after 10 seconds.\n"
        );
        assert_eq!(
            format_outcome(
                "ts",
                &PingOutcome::Error {
                    code: 1,
                    stderr: "connection refused\n".to_string()
                },
                t
            ),
            "ts Error. exit code=1.\nconnection refused\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn loop_writes_one_line_per_attempt_and_a_summary() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("k8s-ping.log");
        let summary_file = dir.path().join("k8s-summary.txt");
        let probe = Arc::new(ReplayProbe {
            outcomes: Mutex::new(vec![
                PingOutcome::Error {
                    code: 1,
                    stderr: "refused\n".to_string(),
                },
                PingOutcome::Timeout,
            ]),
        });
        let stop = StopSignal::default();

        let task = tokio::spawn(run_ping_loop(
            probe,
            log.clone(),
            summary_file.clone(),
            PingSettings::default(),
            stop.clone(),
        ));
        // attempts at 0s, 5s, 10s, 15s
        tokio::time::sleep(Duration::from_secs(17)).await;
        stop.raise();
        let summary = task.await.unwrap();

        assert_eq!(summary.total(), 4);
        assert_eq!(summary.timeouts, 1);
        assert_eq!(summary.error_count(), 1);
        let lines = std::fs::read_to_string(&log).unwrap();
        assert_eq!(lines.matches(" OK (").count(), 2);
        assert!(lines.contains("refused"));
        let written = std::fs::read_to_string(&summary_file).unwrap();
        assert!(written.contains("total # of pings:              4"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_is_cut_off_by_the_attempt_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let stop = StopSignal::default();
        let task = tokio::spawn(run_ping_loop(
            Arc::new(HangingProbe),
            dir.path().join("ping.log"),
            dir.path().join("summary.txt"),
            PingSettings::default(),
            stop.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.raise();
        let summary = task.await.unwrap();

        assert_eq!(summary.total(), 1);
        assert_eq!(summary.timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn raised_flag_skips_the_remaining_interval() {
        let dir = tempfile::tempdir().unwrap();
        let stop = StopSignal::default();
        let settings = PingSettings {
            interval: Duration::from_secs(3600),
            attempt_timeout: PING_TIMEOUT,
        };
        let task = tokio::spawn(run_ping_loop(
            Arc::new(ReplayProbe {
                outcomes: Mutex::new(Vec::new()),
            }),
            dir.path().join("ping.log"),
            dir.path().join("summary.txt"),
            settings,
            stop.clone(),
        ));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = tokio::time::Instant::now();

        stop.raise();
        let summary = task.await.unwrap();

        assert_eq!(summary.total(), 1);
        assert!(before.elapsed() < Duration::from_secs(1));
    }
}
