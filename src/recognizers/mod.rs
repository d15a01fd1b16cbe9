//! Text recognizers.
//!
//! There's one local recognizer (`tesseract`, which reports a confidence)
//! and two interchangeable remote ones (our backend's `/ocr` endpoint, or a
//! vision-capable chat model). The orchestrator only sees [`Recognizer`].

use clap::ValueEnum;

use crate::{
    error::Error, input::PageImage, prelude::*, transcript::normalize_newlines,
};

pub mod http;
pub mod llm;
pub mod tesseract;

/// Which recognizer produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionSource {
    Local,
    Remote,
}

/// The output of one recognizer on one [`PageImage`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecognitionResult {
    /// Recognized text, using `\n` as the only line separator.
    pub text: String,
    /// Confidence in `[0, 100]`. Remote recognizers don't report one.
    pub confidence: Option<f32>,
    pub source: RecognitionSource,
}

impl RecognitionResult {
    /// A local result with a confidence score.
    pub fn local(text: &str, confidence: f32) -> Self {
        Self {
            text: normalize_newlines(text),
            confidence: Some(confidence.clamp(0.0, 100.0)),
            source: RecognitionSource::Local,
        }
    }

    /// A remote result, built from the lines the service returned.
    pub fn remote_from_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        let text = lines.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("\n");
        Self {
            text: normalize_newlines(&text),
            confidence: None,
            source: RecognitionSource::Remote,
        }
    }
}

/// Something which can read text from an image.
#[async_trait]
pub trait Recognizer: Send + Sync + 'static {
    /// A short name for logs and errors.
    fn name(&self) -> &str;

    /// Recognize the text in `image`.
    async fn recognize(&self, image: &PageImage) -> Result<RecognitionResult, Error>;
}

/// Which remote recognizer should we use?
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum RemoteOcrEngine {
    /// A vision-capable model behind an OpenAI-compatible API.
    #[default]
    Llm,
    /// The backend's `POST /ocr` endpoint.
    Http,
}

/// Stands in for a remote recognizer we couldn't configure, so that
/// `local-only` runs work without remote credentials. Fails every unit it
/// is asked to read.
#[derive(Clone, Debug)]
pub struct UnconfiguredRecognizer {
    missing: String,
}

impl UnconfiguredRecognizer {
    /// `missing` names the setting we need, like `OPENAI_API_KEY`.
    pub fn new(missing: impl Into<String>) -> Self {
        Self {
            missing: missing.into(),
        }
    }
}

#[async_trait]
impl Recognizer for UnconfiguredRecognizer {
    fn name(&self) -> &str {
        "unconfigured remote OCR"
    }

    async fn recognize(&self, _image: &PageImage) -> Result<RecognitionResult, Error> {
        Err(Error::Configuration(self.missing.clone()))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;

    use super::*;

    #[tokio::test]
    async fn unconfigured_recognizer_reports_missing_setting() {
        let page = PageImage {
            source_file_name: "scan.pdf".to_owned(),
            page_number: Some(1),
            mime_type: "image/png".to_owned(),
            pixel_data: vec![],
        };
        let err = UnconfiguredRecognizer::new("OPENAI_API_KEY")
            .recognize(&page)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), "OPENAI_API_KEY is not configured");
    }

    #[test]
    fn results_normalize_newlines() {
        let local = RecognitionResult::local("a\r\nb", 120.0);
        assert_eq!(local.text, "a\nb");
        assert_eq!(local.confidence, Some(100.0));

        let remote = RecognitionResult::remote_from_lines(&["x\ry", "z"]);
        assert_eq!(remote.text, "x\ny\nz");
        assert_eq!(remote.confidence, None);
        assert_eq!(remote.source, RecognitionSource::Remote);
    }
}
