//! The `ocr` subcommand.

use std::sync::Arc;

use clap::Args;
use indicatif::ProgressBar;
use uuid::Uuid;

use crate::{
    async_utils::CancelFlag,
    error::Error,
    input::InputFile,
    orchestrator::{OcrOrchestrator, OcrRun, OrchestratorOpts, RecognitionMode, UnitReport},
    pdf::PopplerPdfRenderer,
    prelude::*,
    recognizers::{Recognizer, UnconfiguredRecognizer, tesseract::TesseractRecognizer},
    session::{Session, SessionOpts, SessionStore, SessionUpdate},
    ui::{ProgressConfig, Ui},
    upload::{UploadLimits, validate_batch},
};

use super::{OutputOpts, ProviderOpts, load_session, open_store};

/// OCR command line arguments.
#[derive(Args, Clone, Debug)]
pub struct OcrOpts {
    /// Images and PDFs to read, in order.
    #[clap(value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// Replace the transcript in this session, instead of starting a new
    /// one.
    #[clap(long)]
    pub session: Option<Uuid>,

    /// Tesseract language(s) for local recognition, like `eng` or `eng+spa`.
    #[clap(long, env = "TESSERACT_LANG", default_value = "eng")]
    pub language: String,

    #[clap(flatten)]
    pub orchestrator: OrchestratorOpts,

    #[clap(flatten)]
    pub limits: UploadLimits,

    #[clap(flatten)]
    pub providers: ProviderOpts,

    #[clap(flatten)]
    pub sessions: SessionOpts,

    #[clap(flatten)]
    pub output: OutputOpts,
}

/// What `ocr --json` prints.
#[derive(Debug, Serialize)]
struct OcrOutput<'a> {
    session_id: Uuid,
    lines: &'a [String],
    units: &'a [UnitReport],
}

/// The `ocr` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_ocr(ui: Ui, opts: &OcrOpts) -> Result<()> {
    let config = opts.orchestrator.config();

    // Check our configuration before we do any real work.
    let remote: Arc<dyn Recognizer> = match opts.providers.remote_recognizer() {
        Ok(remote) => remote,
        Err(Error::Configuration(missing)) if config.mode == RecognitionMode::LocalOnly => {
            debug!("no remote recognizer ({missing}), PDF pages will fail");
            Arc::new(UnconfiguredRecognizer::new(missing))
        }
        Err(err) => return Err(err.into()),
    };
    let local = Arc::new(TesseractRecognizer::new(&opts.language));
    let renderer = Arc::new(PopplerPdfRenderer);

    // Read and check our uploads.
    let mut files = Vec::with_capacity(opts.files.len());
    for path in &opts.files {
        files.push(InputFile::from_path(path).await?);
    }
    let unit_count = validate_batch(&files, &opts.limits, renderer.as_ref()).await?;

    let store = open_store(&opts.sessions).await?;
    let session_id = match opts.session {
        Some(id) => Some(load_session(store.as_ref(), id).await?.id),
        None => None,
    };

    // Stop between units on Ctrl-C.
    let cancel = CancelFlag::new();
    let ctrl_c_cancel = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("stopping after the current page");
            ctrl_c_cancel.cancel();
        }
    });

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "📷",
            msg: "Reading pages",
            done_msg: "Read pages",
        },
        unit_count as u64,
    );
    let orchestrator = OcrOrchestrator::new(local, remote, renderer, config);
    let result =
        run_ocr_batch(&orchestrator, store.as_ref(), session_id, &files, &cancel, &pb).await;
    ctrl_c.abort();
    let (session, run) = result?;
    pb.finish_using_style();

    ui.display_message("📚", &format!("Saved to session {}", session.id));
    let fallbacks = run.units.iter().filter(|unit| unit.fell_back).count();
    if fallbacks > 0 {
        info!(fallbacks, "some pages needed the remote recognizer");
    }
    let output = OcrOutput {
        session_id: session.id,
        lines: &run.transcript.lines,
        units: &run.units,
    };
    opts.output.write(&output, || run.transcript.text()).await
}

/// Run one batch, replacing the transcript of an existing session or
/// saving to a new one.
///
/// Results derived from an existing session's transcript are cleared before
/// we start. Nothing is saved unless every unit succeeds, so a failed first
/// run leaves no session behind.
pub async fn run_ocr_batch(
    orchestrator: &OcrOrchestrator,
    store: &dyn SessionStore,
    session_id: Option<Uuid>,
    files: &[InputFile],
    cancel: &CancelFlag,
    progress: &ProgressBar,
) -> Result<(Session, OcrRun)> {
    let input_files = files.iter().map(InputFile::meta).collect::<Vec<_>>();
    if let Some(id) = session_id {
        store
            .update_session_result(id, SessionUpdate::ClearDerived)
            .await?;
    }
    let run = orchestrator.run(files, cancel, progress).await?;
    let session_id = match session_id {
        Some(id) => id,
        None => store.create_session(input_files.clone()).await?.id,
    };
    let session = store
        .update_session_result(
            session_id,
            SessionUpdate::Transcript {
                input_files,
                transcript: run.transcript.clone(),
                units: run.units.clone(),
            },
        )
        .await?;
    Ok((session, run))
}

#[cfg(test)]
mod tests {
    use crate::{
        error::ErrorKind,
        orchestrator::{
            OrchestratorConfig,
            test_doubles::{FakeRecognizer, FakeRenderer, image},
        },
        session::{MemorySessionStore, QaEntry},
        transcript::CombinedTranscript,
    };

    use super::*;

    async fn session_with_history(store: &MemorySessionStore) -> Uuid {
        let session = store.create_session(vec![]).await.unwrap();
        store
            .update_session_result(
                session.id,
                SessionUpdate::Transcript {
                    input_files: vec![],
                    transcript: CombinedTranscript::from_text("old text"),
                    units: vec![],
                },
            )
            .await
            .unwrap();
        store
            .append_qa(session.id, QaEntry::new("Why?", "Because."))
            .await
            .unwrap();
        session.id
    }

    fn orchestrator(local: Arc<FakeRecognizer>) -> OcrOrchestrator {
        OcrOrchestrator::new(
            local,
            FakeRecognizer::remote(),
            FakeRenderer::new(1),
            OrchestratorConfig {
                mode: RecognitionMode::LocalOnly,
                ..OrchestratorConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn successful_runs_replace_the_transcript() {
        let store = MemorySessionStore::new();
        let id = session_with_history(&store).await;
        let orchestrator = orchestrator(FakeRecognizer::local("new text", 99.0));
        let (session, run) = run_ocr_batch(
            &orchestrator,
            &store,
            Some(id),
            &[image("a.png")],
            &CancelFlag::new(),
            &ProgressBar::hidden(),
        )
        .await
        .unwrap();
        assert_eq!(run.transcript.lines, ["new text"]);
        assert_eq!(session.transcript.unwrap().lines, ["new text"]);
        assert_eq!(session.input_files[0].name, "a.png");
        assert!(session.qa_history.is_empty());
    }

    #[tokio::test]
    async fn failed_runs_keep_the_old_transcript_but_clear_answers() {
        let store = MemorySessionStore::new();
        let id = session_with_history(&store).await;
        let orchestrator = orchestrator(FakeRecognizer::local("new text", 99.0));
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = run_ocr_batch(
            &orchestrator,
            &store,
            Some(id),
            &[image("a.png")],
            &cancel,
            &ProgressBar::hidden(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.downcast_ref::<Error>().unwrap().kind(), ErrorKind::Cancelled);

        let session = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(session.transcript.unwrap().lines, ["old text"]);
        assert!(session.qa_history.is_empty());
    }

    #[tokio::test]
    async fn first_runs_create_a_session_with_file_details() {
        let store = MemorySessionStore::new();
        let orchestrator = orchestrator(FakeRecognizer::local("page text", 99.0));
        let (session, _) = run_ocr_batch(
            &orchestrator,
            &store,
            None,
            &[image("a.png")],
            &CancelFlag::new(),
            &ProgressBar::hidden(),
        )
        .await
        .unwrap();
        let saved = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(saved.input_files[0].name, "a.png");
        assert_eq!(saved.transcript.unwrap().lines, ["page text"]);
    }

    #[tokio::test]
    async fn failed_first_runs_leave_no_session() {
        let store = MemorySessionStore::new();
        let orchestrator = orchestrator(FakeRecognizer::local("page text", 99.0));
        let cancel = CancelFlag::new();
        cancel.cancel();
        run_ocr_batch(
            &orchestrator,
            &store,
            None,
            &[image("a.png")],
            &cancel,
            &ProgressBar::hidden(),
        )
        .await
        .unwrap_err();
        assert!(store.list_sessions().await.unwrap().is_empty());
    }
}
