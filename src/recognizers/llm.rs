//! Remote recognizer using a vision-capable chat model.

use std::io::Cursor;

use image::{ImageFormat, imageops::FilterType};
use schemars::JsonSchema;

use crate::{
    async_utils::blocking_iter_streams::spawn_blocking_propagating_panics,
    error::Error,
    input::PageImage,
    llm_client::LlmClient,
    prelude::*,
    prompt::{ChatPrompt, bindings},
};

use super::{RecognitionResult, Recognizer};

/// The built-in OCR prompt.
const OCR_PROMPT: &str = include_str!("../prompts/ocr.toml");

/// Image types chat models accept directly.
const MODEL_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp", "image/gif"];

/// Longest side we send to the model, in pixels.
const MAX_IMAGE_SIDE: u32 = 2000;

/// Get our built-in OCR prompt.
pub fn ocr_prompt() -> ChatPrompt {
    ChatPrompt::from_toml(OCR_PROMPT).expect("failed to parse built-in OCR prompt")
}

/// What we ask the model to return for each image.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct OcrChatResponse {
    /// Each line of text in the image, top to bottom.
    lines: Vec<String>,
}

/// Sends each image to a chat model and asks for its lines.
#[derive(Clone, Debug)]
pub struct LlmRemoteRecognizer {
    client: LlmClient,
    prompt: ChatPrompt,
}

impl LlmRemoteRecognizer {
    pub fn new(client: LlmClient) -> Self {
        Self {
            client,
            prompt: ocr_prompt(),
        }
    }
}

#[async_trait]
impl Recognizer for LlmRemoteRecognizer {
    fn name(&self) -> &str {
        "vision model"
    }

    #[instrument(level = "debug", skip_all, fields(unit = %image.label(), model = %self.client.model()))]
    async fn recognize(&self, image: &PageImage) -> Result<RecognitionResult, Error> {
        let prepared = prepare_for_model(image.clone())
            .await
            .map_err(|err| Error::recognition(self.name(), &image.label(), &err))?;
        let messages = self
            .prompt
            .render_prompt(&bindings([(
                "page_data_url",
                Value::String(prepared.to_data_url()),
            )]))
            .map_err(|err| Error::recognition(self.name(), &image.label(), &err))?;
        drop(prepared);

        let response: OcrChatResponse = self.client.complete_json("ocr", messages).await?;
        debug!(lines = response.lines.len(), "vision model finished");
        Ok(RecognitionResult::remote_from_lines(&response.lines))
    }
}

/// Transcode images the model can't take, and shrink huge ones.
///
/// Images that are already acceptable are passed through untouched, without
/// decoding them.
pub async fn prepare_for_model(page: PageImage) -> Result<PageImage> {
    let needs_transcode = !MODEL_IMAGE_TYPES.contains(&page.mime_type.as_str());
    let too_big = match image::ImageReader::new(Cursor::new(&page.pixel_data))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok())
    {
        Some((width, height)) => width.max(height) > MAX_IMAGE_SIDE,
        // Let the model tell us if it can't read it.
        None => false,
    };
    if !needs_transcode && !too_big {
        return Ok(page);
    }

    spawn_blocking_propagating_panics(move || -> Result<PageImage> {
        let decoded = image::load_from_memory(&page.pixel_data)
            .with_context(|| format!("cannot decode {}", page.label()))?;
        let decoded = if too_big {
            decoded.resize(MAX_IMAGE_SIDE, MAX_IMAGE_SIDE, FilterType::Triangle)
        } else {
            decoded
        };
        let mut png = Vec::new();
        decoded
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .with_context(|| format!("cannot encode {} as PNG", page.label()))?;
        Ok(PageImage {
            mime_type: "image/png".to_owned(),
            pixel_data: png,
            ..page
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, RgbImage};

    use super::*;

    fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    fn page(mime_type: &str, pixel_data: Vec<u8>) -> PageImage {
        PageImage {
            source_file_name: "scan".to_owned(),
            page_number: None,
            mime_type: mime_type.to_owned(),
            pixel_data,
        }
    }

    #[test]
    fn built_in_prompt_parses() {
        let prompt = ocr_prompt();
        assert_eq!(prompt.messages[0].images.len(), 1);
    }

    #[tokio::test]
    async fn small_supported_images_pass_through() {
        let data = encode(10, 10, ImageFormat::Png);
        let prepared = prepare_for_model(page("image/png", data.clone())).await.unwrap();
        assert_eq!(prepared.pixel_data, data);
    }

    #[tokio::test]
    async fn bmp_is_transcoded_to_png() {
        let prepared = prepare_for_model(page("image/bmp", encode(8, 8, ImageFormat::Bmp)))
            .await
            .unwrap();
        assert_eq!(prepared.mime_type, "image/png");
        assert_eq!(image::guess_format(&prepared.pixel_data).unwrap(), ImageFormat::Png);
    }

    #[tokio::test]
    async fn huge_images_are_downscaled() {
        let prepared = prepare_for_model(page("image/png", encode(4000, 100, ImageFormat::Png)))
            .await
            .unwrap();
        let decoded = image::load_from_memory(&prepared.pixel_data).unwrap();
        assert_eq!(decoded.width(), MAX_IMAGE_SIDE);
    }
}
