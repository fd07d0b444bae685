//! SSH tunnel to the cluster API
//!
//! When the cluster's API endpoint is not routable from the driver, the
//! kubeconfig is rewritten to `127.0.0.1` on the same port and an SSH helper
//! forwards that local port to the original endpoint through the cluster's
//! public address.
//!
//! Rewriting is pure and happens before anything is spawned, so a malformed
//! kubeconfig never leaves a helper process behind.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_yaml::Value;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::process::{GroupChild, STOP_GRACE_PERIOD};
use crate::{Error, Result};

/// Local address the tunnel binds to
pub const LOCAL_HOST: &str = "127.0.0.1";

/// How long a fresh tunnel gets to accept connections
pub const TUNNEL_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// How often a starting tunnel is probed
const STARTUP_PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// An endpoint of the form `scheme://host:port`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteEndpoint {
    /// URL scheme, e.g. `https`
    pub scheme: String,
    /// Host name or IPv4 address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl RemoteEndpoint {
    /// The same endpoint on the local tunnel address
    pub fn local(&self) -> Self {
        Self {
            scheme: self.scheme.clone(),
            host: LOCAL_HOST.to_string(),
            port: self.port,
        }
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Parse a strict `scheme://host:port` endpoint.
///
/// No path, no user info, no IPv6 literals, no default ports.
pub fn parse_endpoint(url: &str) -> Result<RemoteEndpoint> {
    let invalid = |reason: &str| {
        Error::config(format!(
            "endpoint '{}' does not match scheme://host:port: {}",
            url, reason
        ))
    };

    let (scheme, rest) = url.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
    let scheme_ok = scheme
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !scheme_ok {
        return Err(invalid("invalid scheme"));
    }

    let (host, port) = rest.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if !host_ok {
        return Err(invalid("invalid host"));
    }

    if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("invalid port"));
    }
    let port: u16 = port.parse().map_err(|_| invalid("port out of range"))?;
    if port == 0 {
        return Err(invalid("port out of range"));
    }

    Ok(RemoteEndpoint {
        scheme: scheme.to_string(),
        host: host.to_string(),
        port,
    })
}

/// Point `url` at the local tunnel end, keeping scheme and port
pub fn rewrite_endpoint(url: &str) -> Result<String> {
    Ok(parse_endpoint(url)?.local().to_string())
}

/// Rewrite every `clusters[].cluster.server` of a kubeconfig.
///
/// All servers must point at the same endpoint, which is returned alongside
/// the rewritten document.
pub fn rewrite_kubeconfig(kubeconfig: &str) -> Result<(String, RemoteEndpoint)> {
    let mut doc: Value = serde_yaml::from_str(kubeconfig)?;
    let clusters = doc
        .get_mut("clusters")
        .and_then(Value::as_sequence_mut)
        .ok_or_else(|| Error::config("kubeconfig has no clusters"))?;

    let mut endpoint: Option<RemoteEndpoint> = None;
    for entry in clusters.iter_mut() {
        let server = entry
            .get_mut("cluster")
            .and_then(|c| c.get_mut("server"))
            .ok_or_else(|| Error::config("kubeconfig cluster without server"))?;
        let url = server
            .as_str()
            .ok_or_else(|| Error::config("kubeconfig server is not a string"))?;
        let parsed = parse_endpoint(url)?;
        match &endpoint {
            Some(known) if *known != parsed => {
                return Err(Error::config(format!(
                    "kubeconfig points at more than one endpoint ({} and {})",
                    known, parsed
                )))
            }
            _ => {}
        }
        *server = Value::String(parsed.local().to_string());
        endpoint = Some(parsed);
    }

    let endpoint = endpoint.ok_or_else(|| Error::config("kubeconfig has no clusters"))?;
    Ok((serde_yaml::to_string(&doc)?, endpoint))
}

/// Everything a helper needs to forward one endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelRequest {
    /// Endpoint to reach through the jump host
    pub endpoint: RemoteEndpoint,
    /// Key authorized on the cluster nodes
    pub private_key: PathBuf,
    /// Publicly reachable host to tunnel through
    pub jump_host: String,
    /// SSH user on the jump host
    pub user: String,
}

/// Spawns the process that carries the tunnel
pub trait TunnelHelper: Send + Sync {
    /// Build the command forwarding `LOCAL_HOST:port` to the endpoint
    fn command(&self, request: &TunnelRequest) -> Command;
}

/// `ssh -N -L` port forwarding
#[derive(Clone, Debug, Default)]
pub struct SshTunnel;

impl SshTunnel {
    /// Arguments passed to ssh
    pub fn args(request: &TunnelRequest) -> Vec<String> {
        let port = request.endpoint.port;
        vec![
            "-i".to_string(),
            request.private_key.display().to_string(),
            "-N".to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-L".to_string(),
            format!(
                "{}:{}:{}:{}",
                LOCAL_HOST, port, request.endpoint.host, port
            ),
            format!("{}@{}", request.user, request.jump_host),
        ]
    }
}

impl TunnelHelper for SshTunnel {
    fn command(&self, request: &TunnelRequest) -> Command {
        let mut command = Command::new("ssh");
        command
            .args(Self::args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        command
    }
}

/// Result of a successful [`TunnelManager::open`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenedTunnel {
    /// Kubeconfig pointing at the local end
    pub kubeconfig: String,
    /// Endpoint the tunnel forwards to
    pub remote: RemoteEndpoint,
}

impl OpenedTunnel {
    /// The original host and port
    pub fn remote_address(&self) -> (&str, u16) {
        (&self.remote.host, self.remote.port)
    }
}

struct TunnelSession {
    remote: RemoteEndpoint,
    helper: GroupChild,
}

/// Opens and closes the single tunnel of a run
pub struct TunnelManager {
    helper: Arc<dyn TunnelHelper>,
    startup_timeout: Duration,
    session: Option<TunnelSession>,
}

impl TunnelManager {
    /// Manager using `helper` to carry the tunnel
    pub fn new(helper: Arc<dyn TunnelHelper>) -> Self {
        Self {
            helper,
            startup_timeout: TUNNEL_STARTUP_TIMEOUT,
            session: None,
        }
    }

    /// Override how long a fresh tunnel gets to accept connections
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Whether a tunnel is currently open
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Rewrite `kubeconfig` and start forwarding its endpoint through
    /// `jump_host`. Returns once the local end accepts connections.
    pub async fn open(
        &mut self,
        kubeconfig: &str,
        private_key: &Path,
        jump_host: &str,
        user: &str,
    ) -> Result<OpenedTunnel> {
        if self.session.is_some() {
            return Err(Error::tunnel("a tunnel is already open"));
        }
        let (rewritten, remote) = rewrite_kubeconfig(kubeconfig)?;

        let request = TunnelRequest {
            endpoint: remote.clone(),
            private_key: private_key.to_path_buf(),
            jump_host: jump_host.to_string(),
            user: user.to_string(),
        };
        let mut helper = GroupChild::spawn("tunnel", self.helper.command(&request))
            .map_err(|e| Error::tunnel(e.to_string()))?;

        if let Err(e) = wait_until_ready(&mut helper, remote.port, self.startup_timeout).await {
            helper.stop(STOP_GRACE_PERIOD).await;
            return Err(e);
        }

        info!(remote = %remote, local = %remote.local(), via = %jump_host, "tunnel open");
        self.session = Some(TunnelSession {
            remote: remote.clone(),
            helper,
        });
        Ok(OpenedTunnel {
            kubeconfig: rewritten,
            remote,
        })
    }

    /// Stop the helper. No-op when no tunnel is open.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.helper.stop(STOP_GRACE_PERIOD).await;
            info!(remote = %session.remote, "tunnel closed");
        }
    }
}

impl Drop for TunnelManager {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("tunnel dropped without close, killing helper");
        }
    }
}

async fn wait_until_ready(helper: &mut GroupChild, port: u16, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(status) = helper.try_exit() {
            return Err(Error::tunnel(format!("helper exited early with {}", status)));
        }
        match TcpStream::connect((LOCAL_HOST, port)).await {
            // ssh gives up on a port someone else holds, but only after the
            // connect to that other listener has already succeeded
            Ok(_) => {
                tokio::time::sleep(STARTUP_PROBE_INTERVAL).await;
                return match helper.try_exit() {
                    Some(status) => Err(Error::tunnel(format!(
                        "helper exited with {} after port {} answered, is the port taken?",
                        status, port
                    ))),
                    None => Ok(()),
                };
            }
            Err(e) => debug!(port, error = %e, "tunnel not ready yet"),
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::tunnel(format!(
                "local port {} not reachable after {:?}",
                port, timeout
            )));
        }
        tokio::time::sleep(STARTUP_PROBE_INTERVAL).await;
    }
}
