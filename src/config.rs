//! Driver configuration
//!
//! The driver is the entrypoint of a container, so its input is the
//! environment plus a handful of mounted files. [`RunArgs`] collects the raw
//! values (flags or env vars), [`DriverConfig::from_args`] checks that they
//! form a usable combination for the selected [`OperatingMode`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{ArgAction, Args};

use crate::definition::KeyPath;
use crate::paths::DriverPaths;
use crate::{Error, Result};

/// Default wall-clock budget for launching and terminating a cluster
pub const DEFAULT_LIFECYCLE_TIMEOUT_SECS: u64 = 3600;

/// Default interval between two cluster status polls
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// What the driver does with a cluster during this run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatingMode {
    /// No cluster at all, just run the tests
    None,
    /// Use a cluster supplied via kubeconfig or access descriptor
    Existing,
    /// Launch a cluster, test against it, tear it down
    Managed,
    /// Launch a cluster and hand it off
    Create,
    /// Tear down a cluster launched by an earlier run
    Delete,
}

impl OperatingMode {
    /// Whether this mode talks to the control plane
    pub fn needs_control_plane(self) -> bool {
        matches!(self, Self::Managed | Self::Create | Self::Delete)
    }

    /// Whether this mode renders and submits a cluster definition
    pub fn launches_cluster(self) -> bool {
        matches!(self, Self::Managed | Self::Create)
    }

    /// Whether this mode executes the test script
    pub fn runs_tests(self) -> bool {
        matches!(self, Self::None | Self::Existing | Self::Managed)
    }
}

impl FromStr for OperatingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NONE" => Ok(Self::None),
            "EXISTING" => Ok(Self::Existing),
            "MANAGED" => Ok(Self::Managed),
            "CREATE" => Ok(Self::Create),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::config(format!(
                "unknown CLUSTER mode '{}' (values: NONE, EXISTING, MANAGED, CREATE, DELETE)",
                other
            ))),
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::Existing => "EXISTING",
            Self::Managed => "MANAGED",
            Self::Create => "CREATE",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Owner applied to everything in the output folder
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ownership {
    /// Numeric user id
    pub uid: u32,
    /// Numeric group id
    pub gid: u32,
}

impl FromStr for Ownership {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (uid, gid) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| Error::config(format!("UID_GID must look like 'uid:gid', got '{}'", s)))?;
        let parse = |v: &str| {
            v.parse::<u32>()
                .map_err(|_| Error::config(format!("invalid id '{}' in UID_GID '{}'", v, s)))
        };
        Ok(Self {
            uid: parse(uid)?,
            gid: parse(gid)?,
        })
    }
}

/// Control-plane coordinates
#[derive(Clone, Debug)]
pub struct ControlPlaneConfig {
    /// Base URL of the T2 API
    pub url: String,
    /// API token
    pub token: String,
}

/// Raw driver input, from flags or the container environment
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Cluster mode: NONE, EXISTING, MANAGED, CREATE or DELETE
    #[arg(long = "cluster", env = "CLUSTER")]
    pub cluster: Option<String>,

    /// Wait for the session to be stopped instead of running the test script
    #[arg(
        long,
        env = "INTERACTIVE_MODE",
        default_value = "false",
        action = ArgAction::Set,
        value_parser = parse_flag
    )]
    pub interactive_mode: bool,

    /// Owner of the output files as uid:gid
    #[arg(long, env = "UID_GID", default_value = "0:0")]
    pub uid_gid: String,

    /// Base URL of the T2 API
    #[arg(long, env = "T2_URL")]
    pub t2_url: Option<String>,

    /// Token for the T2 API
    #[arg(long, env = "T2_TOKEN", hide_env_values = true)]
    pub t2_token: Option<String>,

    /// ID of the cluster to delete (DELETE mode)
    #[arg(long, env = "CLUSTER_ID")]
    pub cluster_id: Option<String>,

    /// Seconds to wait for a launched cluster to be running
    #[arg(long, env = "T2_LAUNCH_TIMEOUT", default_value_t = DEFAULT_LIFECYCLE_TIMEOUT_SECS)]
    pub launch_timeout_secs: u64,

    /// Seconds to wait for a cluster to be terminated
    #[arg(long, env = "T2_TERMINATE_TIMEOUT", default_value_t = DEFAULT_LIFECYCLE_TIMEOUT_SECS)]
    pub terminate_timeout_secs: u64,

    /// Seconds between two cluster status polls
    #[arg(long, env = "T2_POLL_INTERVAL", default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval_secs: u64,

    /// Dotted path of the public key list in the cluster definition
    #[arg(long, env = "T2_PUBLIC_KEYS_PATH", default_value = "publicKeys")]
    pub public_keys_path: String,

    /// Reach the cluster API through an SSH tunnel instead of directly
    #[arg(
        long,
        env = "T2_TUNNEL",
        default_value = "false",
        action = ArgAction::Set,
        value_parser = parse_flag
    )]
    pub tunnel: bool,

    /// SSH user on the tunnel jump host
    #[arg(long, env = "T2_TUNNEL_USER", default_value = "root")]
    pub tunnel_user: String,

    /// Filesystem root under which the container paths are resolved
    #[arg(long, env = "T2_ROOT", default_value = "/")]
    pub root: PathBuf,

    /// Working directory for cluster metadata (keys, definition, id)
    #[arg(long, env = "T2_WORK_DIR", default_value = ".cluster")]
    pub work_dir: PathBuf,
}

/// Accepts `true`/`false` in any capitalization, plus `1`/`0`
fn parse_flag(s: &str) -> std::result::Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(format!("expected true or false, got '{}'", other)),
    }
}

/// Timeouts and interval for the lifecycle pollers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleTimeouts {
    /// Budget for create → RUNNING
    pub launch: Duration,
    /// Budget for delete → TERMINATED
    pub terminate: Duration,
    /// Interval between two polls
    pub poll_interval: Duration,
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self {
            launch: Duration::from_secs(DEFAULT_LIFECYCLE_TIMEOUT_SECS),
            terminate: Duration::from_secs(DEFAULT_LIFECYCLE_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

/// Tunnel settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelConfig {
    /// SSH user on the jump host
    pub user: String,
}

/// Validated driver configuration
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Selected mode, fixed for the whole run
    pub mode: OperatingMode,
    /// Wait for a stop marker instead of running tests
    pub interactive: bool,
    /// Owner for output files; `None` leaves ownership untouched
    pub ownership: Option<Ownership>,
    /// T2 coordinates (MANAGED, CREATE, DELETE)
    pub control_plane: Option<ControlPlaneConfig>,
    /// Explicitly supplied cluster to delete (DELETE)
    pub delete_cluster_id: Option<String>,
    /// Lifecycle budgets
    pub timeouts: LifecycleTimeouts,
    /// Where the generated public key goes in the definition
    pub public_keys_path: KeyPath,
    /// Tunnel settings, `None` when the API is reached directly
    pub tunnel: Option<TunnelConfig>,
    /// All filesystem locations
    pub paths: DriverPaths,
}

impl DriverConfig {
    /// Validate raw input for the selected mode.
    ///
    /// Fails before any cluster is touched, naming the missing piece.
    pub fn from_args(args: &RunArgs) -> Result<Self> {
        let mode: OperatingMode = args
            .cluster
            .as_deref()
            .ok_or_else(|| {
                Error::config(
                    "please supply CLUSTER (values: NONE, EXISTING, MANAGED, CREATE, DELETE)",
                )
            })?
            .parse()?;

        let paths = DriverPaths::new(&args.root, &args.work_dir);
        let ownership: Ownership = args.uid_gid.parse()?;

        let control_plane = if mode.needs_control_plane() {
            match (&args.t2_url, &args.t2_token) {
                (Some(url), Some(token)) if !url.is_empty() && !token.is_empty() => {
                    Some(ControlPlaneConfig {
                        url: url.clone(),
                        token: token.clone(),
                    })
                }
                _ => {
                    return Err(Error::config(format!(
                        "cluster mode {} needs T2_URL and T2_TOKEN",
                        mode
                    )))
                }
            }
        } else {
            None
        };

        if !paths.target_dir.is_dir() {
            return Err(Error::config(format!(
                "a target folder volume has to be supplied as {}",
                paths.target_dir.display()
            )));
        }

        if mode.launches_cluster() && !paths.definition_template.is_file() {
            return Err(Error::config(format!(
                "cluster mode {} needs a cluster definition at {}",
                mode,
                paths.definition_template.display()
            )));
        }

        if mode == OperatingMode::Existing
            && !(paths.kubeconfig.is_file() || paths.access_file.is_file())
        {
            return Err(Error::config(format!(
                "cluster mode EXISTING needs a T2 cluster access file at {} or a kubeconfig at {}",
                paths.access_file.display(),
                paths.kubeconfig.display()
            )));
        }

        let delete_cluster_id = args.cluster_id.clone().filter(|id| !id.trim().is_empty());
        if mode == OperatingMode::Delete
            && delete_cluster_id.is_none()
            && !paths.cluster_id_file().is_file()
        {
            return Err(Error::config(
                "cluster mode DELETE needs the ID of the cluster to delete as CLUSTER_ID",
            ));
        }

        if !args.interactive_mode && mode.runs_tests() && !paths.test_script.is_file() {
            return Err(Error::config(format!(
                "please supply a test script as {}",
                paths.test_script.display()
            )));
        }

        if args.poll_interval_secs == 0 {
            return Err(Error::config("T2_POLL_INTERVAL must be at least one second"));
        }

        Ok(Self {
            mode,
            interactive: args.interactive_mode,
            ownership: Some(ownership),
            control_plane,
            delete_cluster_id,
            timeouts: LifecycleTimeouts {
                launch: Duration::from_secs(args.launch_timeout_secs),
                terminate: Duration::from_secs(args.terminate_timeout_secs),
                poll_interval: Duration::from_secs(args.poll_interval_secs),
            },
            public_keys_path: args.public_keys_path.parse()?,
            tunnel: args.tunnel.then(|| TunnelConfig {
                user: args.tunnel_user.clone(),
            }),
            paths,
        })
    }
}
