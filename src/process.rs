//! Long-running helper processes
//!
//! Watchers and the tunnel helper run in their own process group so a single
//! signal reaches everything they spawn (kubectl under a shell, ssh
//! multiplexers).

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// How long a signalled process group gets before it is killed
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Lifecycle of one background activity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Started and not yet asked to stop
    Running,
    /// Asked to stop, exit not yet observed
    StopRequested,
    /// Exit observed
    Stopped,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::StopRequested => write!(f, "stop requested"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// A child process leading its own process group
#[derive(Debug)]
pub struct GroupChild {
    name: String,
    child: Child,
    state: TaskState,
}

impl GroupChild {
    /// Spawn `command` as the leader of a new process group.
    ///
    /// The child is killed if the handle is dropped without [`stop`](Self::stop).
    pub fn spawn(name: impl Into<String>, mut command: Command) -> Result<Self> {
        let name = name.into();
        let child = command
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::process(&name, format!("failed to spawn: {}", e)))?;
        debug!(task = %name, pid = ?child.id(), "spawned");
        Ok(Self {
            name,
            child,
            state: TaskState::Running,
        })
    }

    /// Task name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Exit status if the process has already exited
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!(task = %self.name, error = %e, "failed to query process state");
                None
            }
        }
    }

    /// Send SIGTERM to the whole process group
    pub fn request_stop(&mut self) {
        if self.state != TaskState::Running {
            return;
        }
        if let Some(pid) = self.child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(task = %self.name, error = %e, "SIGTERM to process group failed");
            }
        }
        self.state = TaskState::StopRequested;
    }

    /// Wait up to `grace` for the exit, then kill.
    ///
    /// Calling it again after the exit was observed is a no-op.
    pub async fn wait_stopped(&mut self, grace: Duration) {
        if self.state == TaskState::Stopped {
            return;
        }
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!(task = %self.name, %status, "exited"),
            Ok(Err(e)) => warn!(task = %self.name, error = %e, "failed to wait for process"),
            Err(_) => {
                warn!(task = %self.name, ?grace, "did not exit after SIGTERM, killing");
                if let Some(pid) = self.child.id() {
                    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
                }
                if let Err(e) = self.child.kill().await {
                    debug!(task = %self.name, error = %e, "kill failed");
                }
            }
        }
        self.state = TaskState::Stopped;
    }

    /// Request a stop and wait for it
    pub async fn stop(&mut self, grace: Duration) {
        self.request_stop();
        self.wait_stopped(grace).await;
        info!(task = %self.name, "stopped");
    }
}

/// Exit code of a finished process, 128 + signal number if it was killed
pub fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}
