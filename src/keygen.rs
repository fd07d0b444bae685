//! SSH key generation for cluster access

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Creates the key pair authorized on a launched cluster
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Generate a fresh key pair at `private_key` and return the public key
    /// line
    async fn generate(&self, private_key: &Path) -> Result<String>;
}

/// Path of the public half of `private_key`
pub fn public_key_path(private_key: &Path) -> PathBuf {
    let mut name = private_key.as_os_str().to_os_string();
    name.push(".pub");
    PathBuf::from(name)
}

/// `ssh-keygen` without passphrase or comment
#[derive(Clone, Debug, Default)]
pub struct SshKeygen;

#[async_trait]
impl KeyGenerator for SshKeygen {
    async fn generate(&self, private_key: &Path) -> Result<String> {
        let public_key = public_key_path(private_key);
        // ssh-keygen asks before overwriting
        for path in [private_key, public_key.as_path()] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "removed old key"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let output = Command::new("ssh-keygen")
            .arg("-f")
            .arg(private_key)
            .args(["-q", "-N", "", "-C", ""])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::process("ssh-keygen", e.to_string()))?;
        if !output.status.success() {
            return Err(Error::process(
                "ssh-keygen",
                format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        let key = tokio::fs::read_to_string(&public_key).await?;
        Ok(key.trim().to_string())
    }
}
