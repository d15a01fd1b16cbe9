//! Command-line entry points.

use std::sync::Arc;

use clap::Args;
use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt as _, BufWriter},
};
use uuid::Uuid;

use crate::{
    error::Error,
    http::{API_BASE_ENV, BackendClient},
    llm_client::{LlmClient, LlmOpts},
    prelude::*,
    recognizers::{
        RemoteOcrEngine, Recognizer, http::HttpRemoteRecognizer, llm::LlmRemoteRecognizer,
    },
    session::{Session, SessionOpts, SessionStore},
    text_service::{
        TextProvider, TextProviderKind, TextServiceClient, TextServiceOpts,
        http::HttpTextProvider, llm::LlmTextProvider,
    },
    ui::{ProgressConfig, Ui},
};

pub mod limits;
pub mod ocr;
pub mod qa;
pub mod session;
pub mod summarize;
pub mod translate;

/// Where remote OCR and text processing happen.
#[derive(Args, Clone, Debug)]
pub struct ProviderOpts {
    /// Which remote recognizer to use for PDF pages and fallbacks.
    #[clap(long, env = "REMOTE_OCR", value_enum, default_value_t = RemoteOcrEngine::default())]
    pub remote_ocr: RemoteOcrEngine,

    /// Base URL of the study backend, for `http` providers.
    #[clap(long, env = API_BASE_ENV)]
    pub api_base: Option<String>,

    #[clap(flatten)]
    pub llm: LlmOpts,

    #[clap(flatten)]
    pub text: TextServiceOpts,
}

impl ProviderOpts {
    fn backend(&self) -> Result<BackendClient, Error> {
        BackendClient::new(self.api_base.as_deref(), self.llm.timeout)
    }

    /// Build the remote recognizer. Fails before any network call if we're
    /// missing credentials or a base URL.
    pub fn remote_recognizer(&self) -> Result<Arc<dyn Recognizer>, Error> {
        Ok(match self.remote_ocr {
            RemoteOcrEngine::Llm => {
                let client = LlmClient::from_env(&self.llm.ocr_model, self.llm.timeout)?;
                Arc::new(LlmRemoteRecognizer::new(client))
            }
            RemoteOcrEngine::Http => Arc::new(HttpRemoteRecognizer::new(self.backend()?)),
        })
    }

    /// Build the text service.
    pub fn text_service(&self) -> Result<TextServiceClient, Error> {
        let provider: Arc<dyn TextProvider> = match self.text.text_provider {
            TextProviderKind::Llm => {
                let client = LlmClient::from_env(&self.llm.text_model, self.llm.timeout)?;
                Arc::new(LlmTextProvider::new(client))
            }
            TextProviderKind::Http => Arc::new(HttpTextProvider::new(self.backend()?)),
        };
        Ok(TextServiceClient::new(provider, self.text.qa_context_budget))
    }
}

/// Where the text for `summarize`, `translate` and `qa` comes from.
#[derive(Args, Clone, Debug)]
#[group(required = true, multiple = false)]
pub struct TextSourceOpts {
    /// Use the transcript stored in this session, and save results there.
    #[clap(long)]
    pub session: Option<Uuid>,

    /// Use this text.
    #[clap(long)]
    pub text: Option<String>,

    /// Read text from this file.
    #[clap(long)]
    pub input: Option<PathBuf>,
}

impl TextSourceOpts {
    /// Load the text, and the session it came from, if any.
    pub async fn load(
        &self,
        store: &dyn SessionStore,
    ) -> Result<(String, Option<Session>)> {
        if let Some(id) = self.session {
            let session = load_session(store, id).await?;
            let text = session
                .transcript
                .as_ref()
                .map(|transcript| transcript.text())
                .unwrap_or_default();
            Ok((text, Some(session)))
        } else if let Some(text) = &self.text {
            Ok((text.clone(), None))
        } else if let Some(path) = &self.input {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {:?}", path.display()))?;
            Ok((text, None))
        } else {
            Err(anyhow!("no text source given"))
        }
    }
}

/// Open the session store, deleting expired sessions first.
pub async fn open_store(opts: &SessionOpts) -> Result<Arc<dyn SessionStore>> {
    let store = opts.store();
    store
        .cleanup_expired(opts.ttl())
        .await
        .context("failed to clean up expired sessions")?;
    Ok(Arc::new(store))
}

/// Output options.
#[derive(Args, Clone, Debug)]
pub struct OutputOpts {
    /// Write output here instead of to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    /// Print JSON instead of plain text.
    #[clap(long)]
    pub json: bool,
}

impl OutputOpts {
    /// Write `value` as pretty JSON, or `text()` as plain text, depending
    /// on `--json`.
    pub async fn write<T>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()>
    where
        T: Serialize,
    {
        let mut output = if self.json {
            serde_json::to_string_pretty(value).context("failed to serialize output")?
        } else {
            text()
        };
        if !output.ends_with('\n') {
            output.push('\n');
        }
        let mut wtr = BufWriter::new(create_writer(self.output_path.as_deref()).await?);
        wtr.write_all(output.as_bytes())
            .await
            .context("failed to write output")?;
        wtr.flush().await.context("failed to flush output")?;
        Ok(())
    }
}

/// Open a file for writing, or use standard output.
async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("failed to create {:?}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Look up a session, treating a missing one as the student's mistake.
pub async fn load_session(store: &dyn SessionStore, id: Uuid) -> Result<Session> {
    match store.get_session(id).await? {
        Some(session) => Ok(session),
        None => Err(Error::validation_with_suggestions(
            format!("I can't find session {id}. It may have expired."),
            [
                "Run `study-lens ocr` again to start a new session",
                "Run `study-lens session list` to see saved sessions",
            ],
        )
        .into()),
    }
}

/// Run `request` with a spinner showing.
pub async fn with_spinner<T, F>(ui: &Ui, msg: &str, request: F) -> T
where
    F: Future<Output = T>,
{
    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "✏️",
        msg,
        done_msg: "",
    });
    let result = request.await;
    spinner.finish_and_clear();
    result
}
