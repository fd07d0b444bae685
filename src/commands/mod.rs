//! Standalone subcommands
//!
//! These talk to the control plane directly, without the container layout
//! the driver run expects.

use std::time::Duration;

use clap::Args;

use t2_client::T2Client;

use crate::config::LifecycleTimeouts;
use crate::Result;

pub mod cluster;
pub mod report;

/// Control plane coordinates shared by all subcommands
#[derive(Args, Debug, Clone)]
pub struct ControlPlaneArgs {
    /// Base URL of the T2 control plane
    #[arg(long = "t2-url", env = "T2_URL")]
    pub t2_url: String,

    /// API token for the T2 control plane
    #[arg(long = "t2-token", env = "T2_TOKEN", hide_env_values = true)]
    pub t2_token: String,
}

impl ControlPlaneArgs {
    /// HTTP client for the configured control plane
    pub fn client(&self) -> Result<T2Client> {
        T2Client::new(&self.t2_url, &self.t2_token)
    }
}

/// Lifecycle budgets of the standalone commands
#[derive(Args, Debug, Clone)]
pub struct PollArgs {
    /// Seconds to wait for the cluster to reach its target state
    #[arg(long, env = "T2_TIMEOUT", default_value_t = 1800)]
    pub timeout_secs: u64,

    /// Seconds between two status polls
    #[arg(long, env = "T2_POLL_INTERVAL", default_value_t = 5)]
    pub poll_interval_secs: u64,
}

impl PollArgs {
    fn timeouts(&self) -> LifecycleTimeouts {
        let timeout = Duration::from_secs(self.timeout_secs);
        LifecycleTimeouts {
            launch: timeout,
            terminate: timeout,
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
        }
    }
}
