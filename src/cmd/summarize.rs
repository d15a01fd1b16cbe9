//! The `summarize` subcommand.

use clap::Args;

use crate::{
    prelude::*,
    session::{SessionOpts, SessionUpdate},
    ui::Ui,
};

use super::{OutputOpts, ProviderOpts, TextSourceOpts, open_store, with_spinner};

/// Summarize command line arguments.
#[derive(Args, Clone, Debug)]
pub struct SummarizeOpts {
    #[clap(flatten)]
    pub source: TextSourceOpts,

    /// The student's grade, used to pick vocabulary.
    #[clap(long, default_value = "7")]
    pub class_level: String,

    #[clap(flatten)]
    pub providers: ProviderOpts,

    #[clap(flatten)]
    pub sessions: SessionOpts,

    #[clap(flatten)]
    pub output: OutputOpts,
}

/// The `summarize` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_summarize(ui: Ui, opts: &SummarizeOpts) -> Result<()> {
    let service = opts.providers.text_service()?;
    let store = open_store(&opts.sessions).await?;
    let (text, session) = opts.source.load(store.as_ref()).await?;

    let summary = with_spinner(
        &ui,
        "Writing a summary",
        service.summarize(&text, &opts.class_level),
    )
    .await?;

    if let Some(session) = session {
        store
            .update_session_result(session.id, SessionUpdate::Summary(summary.clone()))
            .await?;
    }
    opts.output.write(&summary, || summary.summary.clone()).await
}
