//! Local recognizer wrapping the `tesseract` CLI tool.

use std::collections::BTreeMap;

use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore,
    error::Error, input::PageImage, prelude::*,
};

use super::{RecognitionResult, Recognizer};

/// Runs `tesseract <image> stdout tsv` and averages the word confidences.
#[derive(Clone, Debug)]
pub struct TesseractRecognizer {
    /// The `tesseract` language code(s), like `eng` or `eng+spa`.
    language: String,
}

impl TesseractRecognizer {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    async fn run(&self, image: &PageImage) -> Result<RecognitionResult> {
        let extension = mime_guess::get_mime_extensions_str(&image.mime_type)
            .and_then(|exts| exts.first())
            .ok_or_else(|| anyhow!("cannot determine extension for {}", image.mime_type))?;

        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join(format!("input.{extension}"));
        tokio::fs::write(&input_path, &image.pixel_data)
            .await
            .context("cannot write tesseract input file")?;

        let output = with_cpu_semaphore(|| async {
            Command::new("tesseract")
                .arg(&input_path)
                .arg("stdout")
                .arg("-l")
                .arg(&self.language)
                .arg("tsv")
                .output()
                .await
                .context("cannot run tesseract (is it installed?)")
        })
        .await?;
        check_for_command_failure("tesseract", &output, None)?;

        let tsv =
            String::from_utf8(output.stdout).context("tesseract output was not UTF-8")?;
        let (text, confidence) = parse_tsv(&tsv);
        debug!(confidence, chars = text.len(), "tesseract finished");
        Ok(RecognitionResult::local(&text, confidence))
    }
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self::new("eng")
    }
}

#[async_trait]
impl Recognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    #[instrument(level = "debug", skip_all, fields(unit = %image.label()))]
    async fn recognize(&self, image: &PageImage) -> Result<RecognitionResult, Error> {
        self.run(image)
            .await
            .map_err(|err| Error::recognition(self.name(), &image.label(), &err))
    }
}

/// Key identifying one text line in `tesseract`'s TSV output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct LineKey {
    page: u32,
    block: u32,
    paragraph: u32,
    line: u32,
}

/// Parse `tesseract` TSV output into text and a mean word confidence.
///
/// Only word rows (level 5) with a non-negative confidence and non-empty
/// text count. Words are grouped into lines, and a blank line separates
/// paragraphs. With no words at all, the confidence is 0.
pub fn parse_tsv(tsv: &str) -> (String, f32) {
    let mut lines: BTreeMap<LineKey, Vec<(u32, String)>> = BTreeMap::new();
    let mut confidence_sum = 0.0f64;
    let mut word_count = 0usize;

    // Skip the header row.
    for row in tsv.lines().skip(1) {
        let cols = row.split('\t').collect::<Vec<_>>();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let num = |idx: usize| cols[idx].trim().parse::<u32>().unwrap_or(0);
        let conf = cols[10].trim().parse::<f32>().unwrap_or(-1.0);
        let text = cols[11].trim();
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = LineKey {
            page: num(1),
            block: num(2),
            paragraph: num(3),
            line: num(4),
        };
        lines.entry(key).or_default().push((num(6), text.to_owned()));
        confidence_sum += f64::from(conf);
        word_count += 1;
    }

    let mut output = Vec::new();
    let mut previous: Option<LineKey> = None;
    for (key, mut words) in lines {
        if let Some(prev) = previous
            && (prev.page, prev.block, prev.paragraph)
                != (key.page, key.block, key.paragraph)
        {
            output.push(String::new());
        }
        words.sort_by_key(|(left, _)| *left);
        output.push(
            words
                .into_iter()
                .map(|(_, word)| word)
                .collect::<Vec<_>>()
                .join(" "),
        );
        previous = Some(key);
    }

    let confidence = if word_count == 0 {
        0.0
    } else {
        (confidence_sum / word_count as f64) as f32
    };
    (output.join("\n"), confidence)
}
