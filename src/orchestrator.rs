//! The OCR orchestrator.
//!
//! A batch of uploads is flattened into units (each image, then each page of
//! each PDF, in upload order). Every unit is recognized in turn, either by
//! the local recognizer, the remote one, or the local one with a fallback to
//! remote, and the results are stitched into one [`CombinedTranscript`].
//!
//! Units run strictly one at a time. Boundary markers depend on the order,
//! and it keeps the progress bar honest.

use std::sync::Arc;

use clap::{Args, ValueEnum};
use futures::StreamExt as _;
use indicatif::ProgressBar;

use crate::{
    async_utils::CancelFlag,
    error::Error,
    input::{InputFile, InputKind, PageImage},
    pdf::{DEFAULT_DPI, PdfPageRenderer},
    prelude::*,
    recognizers::{RecognitionResult, RecognitionSource, Recognizer},
    transcript::{CombinedTranscript, TranscriptBuilder, UnitIdentity},
};

/// How should we pick a recognizer for each image?
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Deserialize, Serialize)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RecognitionMode {
    /// Try the local recognizer first, and fall back to the remote one when
    /// the local result looks unreliable.
    #[default]
    Auto,
    /// Only use the local recognizer.
    LocalOnly,
    /// Only use the remote recognizer.
    RemoteOnly,
}

/// When is a local result too poor to keep?
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FallbackThresholds {
    /// Local results below this confidence (0 to 100) are replaced.
    pub confidence_threshold: u8,
    /// Local results with fewer non-whitespace characters are replaced.
    pub minimum_alphanumeric_length: usize,
}

impl Default for FallbackThresholds {
    fn default() -> Self {
        Self {
            confidence_threshold: 75,
            minimum_alphanumeric_length: 40,
        }
    }
}

/// Should we replace a local result with a remote one?
///
/// A missing confidence counts as 0. The length check catches `tesseract`
/// reporting high confidence for an almost empty page.
pub fn should_fallback(
    confidence: Option<f32>,
    text: &str,
    thresholds: &FallbackThresholds,
) -> bool {
    let confidence = confidence.unwrap_or(0.0);
    let visible_chars = text.chars().filter(|c| !c.is_whitespace()).count();
    confidence < f32::from(thresholds.confidence_threshold)
        || visible_chars < thresholds.minimum_alphanumeric_length
}

/// Command-line options for the orchestrator.
#[derive(Args, Clone, Debug)]
pub struct OrchestratorOpts {
    /// How to choose between the local and remote recognizers.
    #[clap(long, env = "OCR_MODE", value_enum, default_value_t = RecognitionMode::default())]
    pub mode: RecognitionMode,

    /// In `auto` mode, local results below this confidence (0 to 100) are
    /// sent to the remote recognizer instead.
    #[clap(
        long,
        env = "OCR_CONFIDENCE_THRESHOLD",
        default_value = "75",
        value_parser = clap::value_parser!(u8).range(0..=100),
    )]
    pub confidence_threshold: u8,

    /// In `auto` mode, local results with fewer non-whitespace characters
    /// than this are sent to the remote recognizer instead.
    #[clap(long, env = "OCR_MIN_TEXT_LENGTH", default_value = "40")]
    pub min_text_length: usize,

    /// Resolution used when rendering PDF pages.
    #[clap(long, env = "PDF_DPI", default_value_t = DEFAULT_DPI)]
    pub pdf_dpi: u32,
}

impl OrchestratorOpts {
    pub fn config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            mode: self.mode,
            thresholds: FallbackThresholds {
                confidence_threshold: self.confidence_threshold,
                minimum_alphanumeric_length: self.min_text_length,
            },
            pdf_dpi: self.pdf_dpi,
        }
    }
}

/// Orchestrator settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub mode: RecognitionMode,
    pub thresholds: FallbackThresholds,
    pub pdf_dpi: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: RecognitionMode::default(),
            thresholds: FallbackThresholds::default(),
            pdf_dpi: DEFAULT_DPI,
        }
    }
}

/// What happened to one unit.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct UnitReport {
    pub source_file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    /// Which recognizer produced the text we kept.
    pub source: RecognitionSource,
    /// The kept result's confidence, if it has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Did we try the local recognizer and then replace its result?
    pub fell_back: bool,
}

/// The output of a successful batch.
#[derive(Clone, Debug)]
pub struct OcrRun {
    pub transcript: CombinedTranscript,
    pub units: Vec<UnitReport>,
}

/// Turns a batch of uploads into a [`CombinedTranscript`].
pub struct OcrOrchestrator {
    local: Arc<dyn Recognizer>,
    remote: Arc<dyn Recognizer>,
    renderer: Arc<dyn PdfPageRenderer>,
    config: OrchestratorConfig,
}

impl OcrOrchestrator {
    pub fn new(
        local: Arc<dyn Recognizer>,
        remote: Arc<dyn Recognizer>,
        renderer: Arc<dyn PdfPageRenderer>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            local,
            remote,
            renderer,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Recognize every unit in `files`, in order.
    ///
    /// Any unit failure fails the whole batch. `cancel` is checked before
    /// each unit, and `progress` is ticked after each one.
    #[instrument(level = "debug", skip_all, fields(files = files.len(), mode = ?self.config.mode))]
    pub async fn run(
        &self,
        files: &[InputFile],
        cancel: &CancelFlag,
        progress: &ProgressBar,
    ) -> Result<OcrRun, Error> {
        let mut batch = BatchState::default();
        for file in files {
            match file.kind {
                InputKind::Image => {
                    check_cancelled(cancel)?;
                    let page = PageImage::from_image_file(file);
                    self.process_unit(&page, &mut batch).await?;
                    progress.inc(1);
                }
                InputKind::Pdf => {
                    check_cancelled(cancel)?;
                    let mut pages = self
                        .renderer
                        .render(&file.name, &file.data, self.config.pdf_dpi)
                        .await
                        .map_err(|err| Error::batch(&file.name, Error::render(&file.name, &err)))?;
                    while let Some(page) = pages.next().await {
                        let page = page.map_err(|err| {
                            Error::batch(&file.name, Error::render(&file.name, &err))
                        })?;
                        check_cancelled(cancel)?;
                        self.process_unit(&page, &mut batch).await?;
                        progress.inc(1);
                    }
                }
            }
        }
        info!(units = batch.units.len(), "OCR batch finished");
        Ok(OcrRun {
            transcript: batch.transcript.finish(),
            units: batch.units,
        })
    }

    /// Recognize one unit and append it to the batch.
    #[instrument(level = "debug", skip_all, fields(unit = %page.label(), index = batch.units.len()))]
    async fn process_unit(&self, page: &PageImage, batch: &mut BatchState) -> Result<(), Error> {
        let identity = match page.page_number {
            Some(page_number) => UnitIdentity::PdfPage { page_number },
            None => UnitIdentity::Image {
                index: batch.units.len(),
            },
        };
        let (result, fell_back) = self
            .recognize_unit(page)
            .await
            .map_err(|err| Error::batch(page.label(), err))?;
        batch.transcript.push_unit(identity, &result.text);
        batch.units.push(UnitReport {
            source_file_name: page.source_file_name.clone(),
            page_number: page.page_number,
            source: result.source,
            confidence: result.confidence,
            fell_back,
        });
        Ok(())
    }

    /// Pick a recognizer for one unit, returning the result we keep and
    /// whether we fell back from local to remote.
    async fn recognize_unit(
        &self,
        page: &PageImage,
    ) -> Result<(RecognitionResult, bool), Error> {
        // PDF pages always go to the remote recognizer.
        if page.is_pdf_page() {
            return Ok((self.remote.recognize(page).await?, false));
        }
        match self.config.mode {
            RecognitionMode::RemoteOnly => Ok((self.remote.recognize(page).await?, false)),
            RecognitionMode::LocalOnly => Ok((self.local.recognize(page).await?, false)),
            RecognitionMode::Auto => match self.local.recognize(page).await {
                Ok(local)
                    if !should_fallback(
                        local.confidence,
                        &local.text,
                        &self.config.thresholds,
                    ) =>
                {
                    Ok((local, false))
                }
                Ok(local) => {
                    info!(
                        confidence = ?local.confidence,
                        chars = local.text.len(),
                        "local result too weak, trying {}",
                        self.remote.name(),
                    );
                    Ok((self.remote.recognize(page).await?, true))
                }
                Err(err) => {
                    warn!("{}, trying {}", err, self.remote.name());
                    Ok((self.remote.recognize(page).await?, true))
                }
            },
        }
    }
}

/// Everything we've accumulated so far in one batch.
#[derive(Default)]
struct BatchState {
    transcript: TranscriptBuilder,
    units: Vec<UnitReport>,
}

fn check_cancelled(cancel: &CancelFlag) -> Result<(), Error> {
    if cancel.is_cancelled() {
        warn!("OCR batch cancelled");
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_doubles {
    //! Recording recognizers and renderers for tests.

    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use futures::{StreamExt as _, stream};

    use crate::async_utils::BoxedStream;

    use super::*;

    type Respond = dyn Fn(&PageImage) -> Result<RecognitionResult, Error> + Send + Sync;

    /// A recognizer which records the units it sees.
    pub struct FakeRecognizer {
        name: &'static str,
        respond: Box<Respond>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl FakeRecognizer {
        pub fn new(
            name: &'static str,
            respond: impl Fn(&PageImage) -> Result<RecognitionResult, Error>
            + Send
            + Sync
            + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                respond: Box::new(respond),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(vec![]),
            })
        }

        /// A local recognizer that always returns `text` at `confidence`.
        pub fn local(text: &str, confidence: f32) -> Arc<Self> {
            let text = text.to_owned();
            Self::new("fake local", move |_| {
                Ok(RecognitionResult::local(&text, confidence))
            })
        }

        /// A remote recognizer that echoes the unit label.
        pub fn remote() -> Arc<Self> {
            Self::new("fake remote", |page| {
                Ok(RecognitionResult::remote_from_lines(&[format!(
                    "remote {}",
                    page.label()
                )]))
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Recognizer for FakeRecognizer {
        fn name(&self) -> &str {
            self.name
        }

        async fn recognize(&self, image: &PageImage) -> Result<RecognitionResult, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(image.label());
            (self.respond)(image)
        }
    }

    /// A renderer that produces `pages` blank pages for every PDF, or fails
    /// on `fail_on_page`.
    pub struct FakeRenderer {
        pub pages: usize,
        pub fail_on_page: Option<u32>,
        pub renders: AtomicUsize,
    }

    impl FakeRenderer {
        pub fn new(pages: usize) -> Arc<Self> {
            Arc::new(Self {
                pages,
                fail_on_page: None,
                renders: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PdfPageRenderer for FakeRenderer {
        async fn page_count(&self, _pdf: &[u8]) -> Result<usize> {
            Ok(self.pages)
        }

        async fn render(
            &self,
            file_name: &str,
            _pdf: &[u8],
            _dpi: u32,
        ) -> Result<BoxedStream<Result<PageImage>>> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            let file_name = file_name.to_owned();
            let fail_on_page = self.fail_on_page;
            let pages = (1..=self.pages as u32)
                .map(move |page_number| {
                    if Some(page_number) == fail_on_page {
                        return Err(anyhow!("page {page_number} is damaged"));
                    }
                    Ok(PageImage {
                        source_file_name: file_name.clone(),
                        page_number: Some(page_number),
                        mime_type: "image/png".to_owned(),
                        pixel_data: vec![],
                    })
                })
                .collect::<Vec<_>>();
            Ok(stream::iter(pages).boxed())
        }
    }

    pub fn image(name: &str) -> InputFile {
        InputFile {
            name: name.to_owned(),
            mime_type: "image/png".to_owned(),
            byte_size: 0,
            kind: InputKind::Image,
            data: vec![],
        }
    }

    pub fn pdf(name: &str) -> InputFile {
        InputFile {
            name: name.to_owned(),
            mime_type: "application/pdf".to_owned(),
            byte_size: 0,
            kind: InputKind::Pdf,
            data: vec![],
        }
    }
}
