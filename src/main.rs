//! T2 test driver
//!
//! Container entrypoint. Without a subcommand the driver run is configured
//! from the environment and its exit code becomes the process exit code.

use clap::Parser;

use t2_testdriver::paths::DriverPaths;
use t2_testdriver::{logging, run_driver, Cli, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(command) => {
            logging::init(None);
            command.run().await
        }
        None => {
            let paths = DriverPaths::new(&cli.run.root, &cli.run.work_dir);
            let log_file = paths.target_dir.is_dir().then(|| paths.driver_log());
            logging::init(log_file);
            let code = run_driver(&cli.run).await;
            std::process::exit(code)
        }
    }
}
