//! `launch` and `terminate` - drive a cluster from a shell session
//!
//! Cluster metadata (key pair, submitted definition, `uuid`, `ip`) lives in
//! a working directory so a later `terminate` finds the cluster again.

use std::fs;
use std::path::PathBuf;

use clap::Args;
use tracing::info;

use t2_client::ClusterApi;

use super::{ControlPlaneArgs, PollArgs};
use crate::definition::{inject_public_key, KeyPath};
use crate::keygen::{KeyGenerator, SshKeygen};
use crate::lifecycle::{self, PollConfig};
use crate::{Error, Result};

/// Launch command arguments
#[derive(Args, Debug)]
pub struct LaunchArgs {
    #[command(flatten)]
    pub control_plane: ControlPlaneArgs,

    #[command(flatten)]
    pub poll: PollArgs,

    /// Cluster definition to submit
    pub definition: PathBuf,

    /// Directory for the cluster metadata; must not exist yet
    #[arg(long, default_value = ".cluster")]
    pub work_dir: PathBuf,

    /// Dotted location of the public key list in the definition
    #[arg(long, env = "T2_PUBLIC_KEYS_PATH", default_value = "publicKeys")]
    pub public_keys_path: KeyPath,
}

/// Terminate command arguments
#[derive(Args, Debug)]
pub struct TerminateArgs {
    #[command(flatten)]
    pub control_plane: ControlPlaneArgs,

    #[command(flatten)]
    pub poll: PollArgs,

    /// Directory holding the metadata written by `launch`
    #[arg(long, default_value = ".cluster")]
    pub work_dir: PathBuf,
}

/// Run the launch command
pub async fn launch(args: LaunchArgs) -> Result<()> {
    let client = args.control_plane.client()?;
    launch_with(&client, &SshKeygen, &args).await
}

/// Run the terminate command
pub async fn terminate(args: TerminateArgs) -> Result<()> {
    let client = args.control_plane.client()?;
    terminate_with(&client, &args).await
}

async fn launch_with(api: &dyn ClusterApi, keygen: &dyn KeyGenerator, args: &LaunchArgs) -> Result<()> {
    if args.work_dir.exists() {
        return Err(Error::config(format!(
            "{} already exists, terminate the previous cluster first",
            args.work_dir.display()
        )));
    }
    let template = fs::read_to_string(&args.definition)?;
    fs::create_dir_all(&args.work_dir)?;

    let public_key = keygen.generate(&args.work_dir.join("id")).await?;
    let definition = inject_public_key(&template, &args.public_keys_path, &public_key)?;
    fs::write(args.work_dir.join("cluster.yaml"), &definition)?;

    let uuid_file = args.work_dir.join("uuid");
    let mut persisted = Ok(());
    let config = PollConfig::launch(&args.poll.timeouts());
    let cluster = lifecycle::launch(api, &definition, &config, |created| {
        persisted = fs::write(&uuid_file, format!("{}\n", created.id));
    })
    .await?;
    persisted?;

    if let Some(ip) = &cluster.ipv4_address {
        fs::write(args.work_dir.join("ip"), format!("{}\n", ip))?;
    }
    info!(cluster_id = %cluster.id, address = ?cluster.ipv4_address, "cluster is up and running");
    println!("{}", cluster.id);
    Ok(())
}

async fn terminate_with(api: &dyn ClusterApi, args: &TerminateArgs) -> Result<()> {
    let uuid_file = args.work_dir.join("uuid");
    let id = fs::read_to_string(&uuid_file)
        .map_err(|e| Error::config(format!("cannot read {}: {}", uuid_file.display(), e)))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(Error::config(format!("{} is empty", uuid_file.display())));
    }

    let config = PollConfig::terminate(&args.poll.timeouts());
    let cluster = lifecycle::terminate(api, id, &config).await?;
    info!(cluster_id = %cluster.id, "cluster is terminated");
    Ok(())
}
