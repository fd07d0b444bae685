//! `report` - print clusters that need attention

use clap::Args;

use super::ControlPlaneArgs;
use crate::report::fetch_report;
use crate::Result;

/// Report command arguments
#[derive(Args, Debug)]
pub struct ReportArgs {
    #[command(flatten)]
    pub control_plane: ControlPlaneArgs,
}

/// Run the report command
pub async fn run(args: ReportArgs) -> Result<()> {
    let client = args.control_plane.client()?;
    let report = fetch_report(&client, &args.control_plane.t2_url).await?;
    print!("{}", report);
    Ok(())
}
