//! The `limits` subcommand.

use clap::Args;

use crate::{prelude::*, upload::UploadLimits};

use super::OutputOpts;

/// Limits command line arguments.
#[derive(Args, Clone, Debug)]
pub struct LimitsOpts {
    #[clap(flatten)]
    pub limits: UploadLimits,

    #[clap(flatten)]
    pub output: OutputOpts,
}

/// The `limits` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_limits(opts: &LimitsOpts) -> Result<()> {
    let report = opts.limits.report();
    // Limits are JSON either way.
    let json = serde_json::to_string_pretty(&report).context("failed to serialize limits")?;
    opts.output.write(&report, || json).await
}
