//! Limits on what a student may upload in one batch.

use clap::Args;

use crate::{
    error::Error,
    input::{InputFile, InputKind},
    pdf::PdfPageRenderer,
    prelude::*,
};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Upload limits.
#[derive(Args, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadLimits {
    /// Most images plus PDF pages in one batch.
    #[clap(long = "max-files", env = "MAX_IMAGES", default_value_t = 5)]
    pub max_files: usize,

    /// Most pages in one PDF.
    #[clap(long, env = "MAX_PDF_PAGES", default_value_t = 5)]
    pub max_pdf_pages: usize,

    /// Largest image, in megabytes.
    #[clap(long, env = "MAX_FILE_SIZE_MB", default_value_t = 10)]
    pub max_file_size_mb: u64,

    /// Largest PDF, in megabytes.
    #[clap(long, env = "MAX_PDF_SIZE_MB", default_value_t = 10)]
    pub max_pdf_size_mb: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_pdf_pages: 5,
            max_file_size_mb: 10,
            max_pdf_size_mb: 10,
        }
    }
}

impl UploadLimits {
    /// Describe these limits for `study-lens limits`.
    pub fn report(&self) -> LimitsReport {
        LimitsReport {
            limits: self.clone(),
            supported_image_types: vec!["JPG", "PNG", "GIF", "BMP", "WEBP", "TIFF"],
            supported_document_types: vec!["PDF"],
            student_message: format!(
                "I can read up to {} images or PDF pages at a time to help with your homework!",
                self.max_files
            ),
        }
    }
}

/// The effective limits, as printed by `study-lens limits`.
#[derive(Clone, Debug, Serialize)]
pub struct LimitsReport {
    #[serde(flatten)]
    pub limits: UploadLimits,
    pub supported_image_types: Vec<&'static str>,
    pub supported_document_types: Vec<&'static str>,
    pub student_message: String,
}

fn size_in_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB as f64
}

/// Check a batch against `limits`, returning the number of units (images
/// plus PDF pages) it contains.
///
/// File types are checked when each [`InputFile`] is created. PDF page
/// counts come from `renderer`, without rendering anything.
#[instrument(level = "debug", skip_all, fields(files = files.len()))]
pub async fn validate_batch(
    files: &[InputFile],
    limits: &UploadLimits,
    renderer: &dyn PdfPageRenderer,
) -> Result<usize, Error> {
    if files.is_empty() {
        return Err(Error::validation_with_suggestions(
            "You didn't upload any files. I need something to read!",
            [
                "Pass one or more image or PDF files",
                "Check that the file paths are spelled correctly",
            ],
        ));
    }

    let mut unit_count = 0;
    for file in files {
        let (limit_mb, what) = match file.kind {
            InputKind::Image => (limits.max_file_size_mb, "files"),
            InputKind::Pdf => (limits.max_pdf_size_mb, "PDFs"),
        };
        if file.byte_size > limit_mb.saturating_mul(BYTES_PER_MB) {
            return Err(Error::validation_with_suggestions(
                format!(
                    "The file '{}' is {:.1}MB, but I can only handle {what} up to {limit_mb}MB.",
                    file.name,
                    size_in_mb(file.byte_size),
                ),
                [
                    "Try taking a clearer photo instead of scanning",
                    "Reduce the PDF file size using a PDF compressor",
                    "Split large PDFs into smaller parts",
                ],
            ));
        }

        match file.kind {
            InputKind::Image => unit_count += 1,
            InputKind::Pdf => {
                let pages = renderer.page_count(&file.data).await.map_err(|err| {
                    debug!("cannot count pages: {err:#}");
                    Error::validation_with_suggestions(
                        format!(
                            "I'm having trouble reading '{}'. It might be damaged or corrupted.",
                            file.name
                        ),
                        [
                            "Try saving the PDF again",
                            "Check if the file opens correctly on your device",
                        ],
                    )
                })?;
                if pages > limits.max_pdf_pages {
                    return Err(Error::validation_with_suggestions(
                        format!(
                            "Your PDF '{}' has {pages} pages, but I can only read {} pages at a time.",
                            file.name, limits.max_pdf_pages
                        ),
                        [
                            format!(
                                "Split your PDF to show only the first {} pages",
                                limits.max_pdf_pages
                            ),
                            "Choose the most important pages for your homework".to_owned(),
                            "Upload the pages as separate images instead".to_owned(),
                        ],
                    ));
                }
                unit_count += pages;
            }
        }
    }

    if unit_count > limits.max_files {
        return Err(Error::validation_with_suggestions(
            format!(
                "I can only read {} images or PDF pages at a time. You uploaded {unit_count} items.",
                limits.max_files
            ),
            [
                format!(
                    "Try uploading only your {} most important pages",
                    limits.max_files
                ),
                "Split your PDF into smaller parts".to_owned(),
            ],
        ));
    }
    debug!(unit_count, "batch is within limits");
    Ok(unit_count)
}
