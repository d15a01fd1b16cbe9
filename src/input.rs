//! Uploaded files, and the page images we derive from them.

use crate::{data_url::data_url, error::Error, prelude::*};

/// Image types we accept for upload.
pub const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/webp",
    "image/tiff",
];

/// The MIME type of PDF uploads.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// What kind of file was uploaded?
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Image,
    Pdf,
}

/// One uploaded file. Immutable once created.
#[derive(Clone)]
pub struct InputFile {
    /// The original file name, without any directory.
    pub name: String,
    /// Detected MIME type.
    pub mime_type: String,
    /// Size of `data` in bytes.
    pub byte_size: u64,
    /// Image or PDF.
    pub kind: InputKind,
    /// The raw file contents.
    pub data: Vec<u8>,
}

impl std::fmt::Debug for InputFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("byte_size", &self.byte_size)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl InputFile {
    /// Build an [`InputFile`] from bytes, detecting the type from the content
    /// and falling back to the file extension.
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Result<Self, Error> {
        let name = name.into();
        let mime_type = detect_mime_type(&name, &data);
        let kind = match mime_type.as_deref() {
            Some(PDF_MIME_TYPE) => InputKind::Pdf,
            Some(mime) if SUPPORTED_IMAGE_TYPES.contains(&mime) => InputKind::Image,
            other => {
                return Err(Error::validation_with_suggestions(
                    format!(
                        "{name} is not a supported file type ({})",
                        other.unwrap_or("unknown type")
                    ),
                    [
                        "Upload a photo (JPEG, PNG, GIF, BMP, WebP or TIFF) or a PDF",
                        "If you took a screenshot, save it as PNG",
                    ],
                ));
            }
        };
        let mime_type = mime_type.unwrap_or_default();
        Ok(Self {
            name,
            mime_type,
            byte_size: data.len() as u64,
            kind,
            data,
        })
    }

    /// Read an [`InputFile`] from disk.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn from_path(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {:?}", path.display()))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_bytes(name, data)?)
    }

    /// Metadata suitable for storing in a session.
    pub fn meta(&self) -> InputFileMeta {
        InputFileMeta {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            byte_size: self.byte_size,
            kind: self.kind,
        }
    }
}

/// Everything about an [`InputFile`] except its contents.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct InputFileMeta {
    pub name: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub kind: InputKind,
}

/// Detect a MIME type from magic bytes, then from the file extension.
fn detect_mime_type(name: &str, data: &[u8]) -> Option<String> {
    if let Some(kind) = infer::get(data) {
        return Some(kind.mime_type().to_owned());
    }
    mime_guess::from_path(name)
        .first()
        .map(|mime| mime.essence_str().to_owned())
}

/// One image ready for recognition: either an uploaded image, or one rendered
/// page of a PDF.
#[derive(Clone)]
pub struct PageImage {
    /// The name of the file this came from.
    pub source_file_name: String,
    /// 1-based page number, only for pages rendered from a PDF.
    pub page_number: Option<u32>,
    /// The MIME type of `pixel_data`.
    pub mime_type: String,
    /// Encoded image data.
    pub pixel_data: Vec<u8>,
}

impl std::fmt::Debug for PageImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageImage")
            .field("source_file_name", &self.source_file_name)
            .field("page_number", &self.page_number)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.pixel_data.len())
            .finish()
    }
}

impl PageImage {
    /// Wrap an uploaded image.
    pub fn from_image_file(file: &InputFile) -> Self {
        Self {
            source_file_name: file.name.clone(),
            page_number: None,
            mime_type: file.mime_type.clone(),
            pixel_data: file.data.clone(),
        }
    }

    /// Was this rendered from a PDF?
    pub fn is_pdf_page(&self) -> bool {
        self.page_number.is_some()
    }

    /// A short human-readable name, for logs and errors.
    pub fn label(&self) -> String {
        match self.page_number {
            Some(page) => format!("{} page {}", self.source_file_name, page),
            None => self.source_file_name.clone(),
        }
    }

    /// Convert to a data URL.
    pub fn to_data_url(&self) -> String {
        data_url(&self.mime_type, &self.pixel_data)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;

    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[test]
    fn detects_type_from_content_before_extension() {
        let file = InputFile::from_bytes("homework.jpg", PNG_MAGIC.to_vec()).unwrap();
        assert_eq!(file.mime_type, "image/png");
        assert_eq!(file.kind, InputKind::Image);
        assert_eq!(file.byte_size, PNG_MAGIC.len() as u64);
    }

    #[test]
    fn falls_back_to_extension() {
        let file = InputFile::from_bytes("notes.pdf", b"not really".to_vec()).unwrap();
        assert_eq!(file.kind, InputKind::Pdf);
    }

    #[test]
    fn rejects_unsupported_types_with_suggestions() {
        let err = InputFile::from_bytes("essay.docx", b"PK".to_vec()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.suggestions().is_empty());
    }

    #[test]
    fn labels_pdf_pages() {
        let page = PageImage {
            source_file_name: "worksheet.pdf".to_owned(),
            page_number: Some(2),
            mime_type: "image/png".to_owned(),
            pixel_data: vec![],
        };
        assert!(page.is_pdf_page());
        assert_eq!(page.label(), "worksheet.pdf page 2");
    }
}
