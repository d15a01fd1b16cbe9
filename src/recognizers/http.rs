//! Remote recognizer using the backend's `POST /ocr` endpoint.

use reqwest::multipart::{Form, Part};

use crate::{error::Error, http::BackendClient, input::PageImage, prelude::*};

use super::{RecognitionResult, Recognizer};

/// Response from `POST /ocr`.
#[derive(Debug, Deserialize)]
struct OcrResponse {
    lines: Vec<String>,
}

/// Sends one image per request, as the multipart field `images`.
#[derive(Clone, Debug)]
pub struct HttpRemoteRecognizer {
    backend: BackendClient,
}

impl HttpRemoteRecognizer {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

/// The file name to send for an image. Rendered PDF pages get their own
/// name so the backend can tell them apart.
fn upload_file_name(image: &PageImage) -> String {
    match image.page_number {
        Some(page) => {
            let stem = image
                .source_file_name
                .rsplit_once('.')
                .map_or(image.source_file_name.as_str(), |(stem, _)| stem);
            format!("{stem}-page-{page}.png")
        }
        None => image.source_file_name.clone(),
    }
}

#[async_trait]
impl Recognizer for HttpRemoteRecognizer {
    fn name(&self) -> &str {
        "remote OCR"
    }

    #[instrument(level = "debug", skip_all, fields(unit = %image.label()))]
    async fn recognize(&self, image: &PageImage) -> Result<RecognitionResult, Error> {
        let part = Part::bytes(image.pixel_data.clone())
            .file_name(upload_file_name(image))
            .mime_str(&image.mime_type)
            .map_err(|err| {
                Error::recognition(self.name(), &image.label(), &anyhow::Error::new(err))
            })?;
        let form = Form::new().part("images", part);
        let response: OcrResponse =
            self.backend.post_multipart("ocr", "/ocr", form).await?;
        debug!(lines = response.lines.len(), "remote OCR finished");
        Ok(RecognitionResult::remote_from_lines(&response.lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_pages_get_distinct_upload_names() {
        let mut image = PageImage {
            source_file_name: "unit3.quiz.pdf".to_owned(),
            page_number: Some(4),
            mime_type: "image/png".to_owned(),
            pixel_data: vec![],
        };
        assert_eq!(upload_file_name(&image), "unit3.quiz-page-4.png");
        image.page_number = None;
        image.source_file_name = "photo.jpg".to_owned();
        assert_eq!(upload_file_name(&image), "photo.jpg");
    }
}
