use std::{process::ExitCode, str::FromStr};

use clap::{Parser, Subcommand};
use study_lens::{cmd, prelude::*, ui::Ui};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

/// Read photos and PDFs of homework, then summarize, translate and answer
/// questions about them.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - OPENAI_API_KEY: Key for `llm` providers.
  - OPENAI_API_BASE (optional): Override the chat API server URL.
  - STUDY_LENS_API_BASE: Base URL of the backend, for `http` providers.

  Every option with an [env: ...] note can also be set that way. These
  variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Read text from images and PDFs, saving it in a session.
    Ocr(cmd::ocr::OcrOpts),
    /// Summarize text for a grade level.
    Summarize(cmd::summarize::SummarizeOpts),
    /// Translate text line by line.
    Translate(cmd::translate::TranslateOpts),
    /// Answer a question about some text.
    Qa(cmd::qa::QaOpts),
    /// Show or list saved sessions.
    Session(cmd::session::SessionCmdOpts),
    /// Print upload limits and supported file types as JSON.
    Limits(cmd::limits::LimitsOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        let output = match self {
            Cmd::Ocr(opts) => &opts.output,
            Cmd::Summarize(opts) => &opts.output,
            Cmd::Translate(opts) => &opts.output,
            Cmd::Qa(opts) => &opts.output,
            Cmd::Session(opts) => opts.output(),
            Cmd::Limits(opts) => &opts.output,
        };
        output.output_path.is_none()
    }
}

/// Our entry point. Errors are printed along with any suggestions for the
/// student.
#[tokio::main]
async fn main() -> ExitCode {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    match real_main(ui.clone()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&ui, &err);
            ExitCode::FAILURE
        }
    }
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Hide the progress bar if we're using stdout for output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Ocr(opts) => cmd::ocr::cmd_ocr(ui, opts).await,
        Cmd::Summarize(opts) => cmd::summarize::cmd_summarize(ui, opts).await,
        Cmd::Translate(opts) => cmd::translate::cmd_translate(ui, opts).await,
        Cmd::Qa(opts) => cmd::qa::cmd_qa(ui, opts).await,
        Cmd::Session(opts) => cmd::session::cmd_session(opts).await,
        Cmd::Limits(opts) => cmd::limits::cmd_limits(opts).await,
    }
}

/// Print an error, plus suggestions if it has any.
fn report_error(ui: &Ui, err: &anyhow::Error) {
    ui.display_message("😔", &format!("Error: {err:#}"));
    if let Some(err) = err.downcast_ref::<study_lens::Error>() {
        for suggestion in err.suggestions() {
            ui.display_message("  💡", suggestion);
        }
    }
}
