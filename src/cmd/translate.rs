//! The `translate` subcommand.

use clap::Args;

use crate::{
    prelude::*,
    session::{SessionOpts, SessionUpdate},
    transcript::split_lines,
    ui::Ui,
};

use super::{OutputOpts, ProviderOpts, TextSourceOpts, open_store, with_spinner};

/// Translate command line arguments.
#[derive(Args, Clone, Debug)]
pub struct TranslateOpts {
    #[clap(flatten)]
    pub source: TextSourceOpts,

    /// The language to translate into, like `Spanish`.
    #[clap(long = "to")]
    pub target_lang: String,

    /// The language of the text, if known.
    #[clap(long = "from")]
    pub source_lang: Option<String>,

    #[clap(flatten)]
    pub providers: ProviderOpts,

    #[clap(flatten)]
    pub sessions: SessionOpts,

    #[clap(flatten)]
    pub output: OutputOpts,
}

/// The `translate` subcommand.
#[instrument(level = "debug", skip_all, fields(to = %opts.target_lang))]
pub async fn cmd_translate(ui: Ui, opts: &TranslateOpts) -> Result<()> {
    let service = opts.providers.text_service()?;
    let store = open_store(&opts.sessions).await?;
    let (text, session) = opts.source.load(store.as_ref()).await?;

    // Session transcripts are already lines. Anything else gets split the
    // same way transcripts are.
    let lines = match session.as_ref().and_then(|session| session.transcript.as_ref()) {
        Some(transcript) => transcript.lines.clone(),
        None => split_lines(&text),
    };
    let translation = with_spinner(
        &ui,
        "Translating",
        service.translate(&lines, opts.source_lang.as_deref(), &opts.target_lang),
    )
    .await?;

    if let Some(session) = session {
        store
            .update_session_result(session.id, SessionUpdate::Translation(translation.clone()))
            .await?;
    }
    opts.output
        .write(&translation, || translation.lines.join("\n"))
        .await
}
