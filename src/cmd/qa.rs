//! The `qa` subcommand.

use clap::Args;

use crate::{
    prelude::*,
    session::{QaEntry, SessionOpts},
    ui::Ui,
};

use super::{OutputOpts, ProviderOpts, TextSourceOpts, open_store, with_spinner};

/// QA command line arguments.
#[derive(Args, Clone, Debug)]
pub struct QaOpts {
    /// The question to answer.
    pub question: String,

    #[clap(flatten)]
    pub source: TextSourceOpts,

    #[clap(flatten)]
    pub providers: ProviderOpts,

    #[clap(flatten)]
    pub sessions: SessionOpts,

    #[clap(flatten)]
    pub output: OutputOpts,
}

/// The `qa` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_qa(ui: Ui, opts: &QaOpts) -> Result<()> {
    let service = opts.providers.text_service()?;
    let store = open_store(&opts.sessions).await?;
    let (context, session) = opts.source.load(store.as_ref()).await?;

    let answer = with_spinner(
        &ui,
        "Looking for the answer",
        service.answer(&context, &opts.question),
    )
    .await?;

    let entry = QaEntry::new(opts.question.trim(), answer);
    if let Some(session) = session {
        store.append_qa(session.id, entry.clone()).await?;
    }
    opts.output.write(&entry, || entry.answer.clone()).await
}
