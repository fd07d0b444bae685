//! T2 test driver
//!
//! Runs a test script against an ephemeral cluster: provisions it through
//! the T2 control plane, connects to it, monitors it while the tests run
//! and tears it down afterwards. The selected [`config::OperatingMode`]
//! decides which of these steps happen.

pub mod access;
pub mod commands;
pub mod config;
pub mod definition;
pub mod keygen;
pub mod lifecycle;
pub mod logging;
pub mod monitor;
pub mod orchestrator;
pub mod output;
pub mod paths;
pub mod process;
pub mod report;
pub mod script;
pub mod template;
pub mod tunnel;

pub use t2_common::{Error, Result, EXIT_CODE_CLUSTER_FAILED};

use clap::{Parser, Subcommand};
use tracing::error;

use config::{DriverConfig, RunArgs};
use orchestrator::{Orchestrator, Toolbox};

/// T2 test driver - run tests against ephemeral clusters
#[derive(Parser, Debug)]
#[command(name = "t2-testdriver")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch a cluster from a definition file and wait until it runs
    Launch(commands::cluster::LaunchArgs),
    /// Terminate the cluster recorded by `launch`
    Terminate(commands::cluster::TerminateArgs),
    /// List failed and long-lived clusters
    Report(commands::report::ReportArgs),
}

impl Commands {
    /// Run the standalone subcommand
    pub async fn run(self) -> Result<()> {
        match self {
            Commands::Launch(args) => commands::cluster::launch(args).await,
            Commands::Terminate(args) => commands::cluster::terminate(args).await,
            Commands::Report(args) => commands::report::run(args).await,
        }
    }
}

/// Validate `args` and execute a driver run; returns the exit code
pub async fn run_driver(args: &RunArgs) -> i32 {
    let config = match DriverConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid driver configuration");
            return EXIT_CODE_CLUSTER_FAILED;
        }
    };
    let tools = match Toolbox::system(&config) {
        Ok(tools) => tools,
        Err(e) => {
            error!(error = %e, "cannot set up the control plane client");
            return EXIT_CODE_CLUSTER_FAILED;
        }
    };
    Orchestrator::new(config, tools).run().await
}
