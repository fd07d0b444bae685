//! Test script execution and interactive sessions

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{info, warn};

use crate::process::exit_code;
use crate::{Error, Result};

/// How often the stop marker of an interactive session is checked
pub const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Runs shell scripts on behalf of the driver
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run `script` with `sh` and return its exit code.
    ///
    /// Output goes to stdout and, when `tee` is set, is appended to that
    /// file as well. A script killed by a signal reports 128 + signal.
    async fn run<'a>(&self, script: &Path, tee: Option<&'a Path>) -> Result<i32>;
}

/// Runs scripts with `sh`, stderr folded into stdout
#[derive(Clone, Debug, Default)]
pub struct ShellScriptRunner;

#[async_trait]
impl ScriptRunner for ShellScriptRunner {
    async fn run<'a>(&self, script: &Path, tee: Option<&'a Path>) -> Result<i32> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("exec sh \"$0\" 2>&1")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::process("sh", format!("failed to start {}: {}", script.display(), e)))?;

        let mut tee_file = match tee {
            Some(path) => Some(
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?,
            ),
            None => None,
        };

        if let Some(mut output) = child.stdout.take() {
            let mut stdout = tokio::io::stdout();
            let mut buf = vec![0u8; 8192];
            loop {
                let n = output.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                stdout.write_all(&buf[..n]).await?;
                if let Some(file) = tee_file.as_mut() {
                    file.write_all(&buf[..n]).await?;
                }
            }
            stdout.flush().await?;
            if let Some(file) = tee_file.as_mut() {
                file.flush().await?;
            }
        }

        let status = child.wait().await?;
        Ok(exit_code(status))
    }
}

/// Block until `marker` exists
pub async fn wait_for_session_stop(marker: &Path, poll: Duration) {
    info!(marker = %marker.display(), "interactive session running, waiting for the stop marker");
    while !marker.exists() {
        tokio::time::sleep(poll).await;
    }
    info!("interactive session terminated");
}

/// Log the script before it runs, so the log shows what was executed
pub fn log_script(script: &Path) {
    match std::fs::read_to_string(script) {
        Ok(text) => info!("{}:\n\n{}\n", script.display(), text),
        Err(e) => warn!(path = %script.display(), error = %e, "cannot read script"),
    }
}
