//! Rendering PDF pages to images, using Poppler's CLI tools.

use std::{collections::BTreeMap, fs, sync::LazyLock, vec};

use futures::StreamExt as _;
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::{
        BoxedStream, blocking_iter_streams::BlockingIterStream, check_for_command_failure,
    },
    cpu_limit::with_cpu_semaphore,
    input::PageImage,
    prelude::*,
};

/// Default rasterization DPI.
pub const DEFAULT_DPI: u32 = 200;

static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Poppler complains about damaged cross-reference tables that it then
/// repairs without trouble.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line of Poppler output report a real error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// Something which can turn a PDF into page images.
#[async_trait]
pub trait PdfPageRenderer: Send + Sync + 'static {
    /// Count the pages in a PDF, without rendering it.
    async fn page_count(&self, pdf: &[u8]) -> Result<usize>;

    /// Render every page of a PDF at `dpi`.
    ///
    /// Pages are yielded lazily, in ascending order, numbered from 1. Each
    /// call renders the document again.
    async fn render(
        &self,
        file_name: &str,
        pdf: &[u8],
        dpi: u32,
    ) -> Result<BoxedStream<Result<PageImage>>>;
}

/// Renders PDFs with `pdfinfo` and `pdftocairo`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PopplerPdfRenderer;

impl PopplerPdfRenderer {
    /// Write the PDF somewhere Poppler can see it.
    async fn write_input(pdf: &[u8]) -> Result<(tempfile::TempDir, PathBuf)> {
        let tmpdir = tempfile::TempDir::with_prefix("pages")?;
        let input_path = tmpdir.path().join("input.pdf");
        tokio::fs::write(&input_path, pdf)
            .await
            .with_context(|| format!("failed to write {:?}", input_path.display()))?;
        Ok((tmpdir, input_path))
    }
}

#[async_trait]
impl PdfPageRenderer for PopplerPdfRenderer {
    #[instrument(level = "debug", skip_all, fields(bytes = pdf.len()))]
    async fn page_count(&self, pdf: &[u8]) -> Result<usize> {
        let (_tmpdir, input_path) = Self::write_input(pdf).await?;
        get_pdf_page_count(&input_path).await
    }

    #[instrument(level = "debug", skip_all, fields(file = %file_name, dpi = dpi))]
    async fn render(
        &self,
        file_name: &str,
        pdf: &[u8],
        dpi: u32,
    ) -> Result<BoxedStream<Result<PageImage>>> {
        let (tmpdir, input_path) = Self::write_input(pdf).await?;
        let total_pages = get_pdf_page_count(&input_path).await?;

        // pdftocairo adds a zero-padded page number to this prefix.
        let pages_dir = tmpdir.path().join("pages");
        fs::create_dir(&pages_dir).with_context(|| {
            format!("failed to create {:?}", pages_dir.display())
        })?;
        let out_prefix = pages_dir.join("page");

        // pdftocairo will use at least a whole CPU.
        let output = with_cpu_semaphore(|| async {
            Command::new("pdftocairo")
                .arg("-png")
                .arg("-r")
                .arg(dpi.to_string())
                .arg(&input_path)
                .arg(&out_prefix)
                .output()
                .await
                .context("failed to run pdftocairo (is Poppler installed?)")
        })
        .await?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

        let iter = RenderedPages::from_tempdir(file_name, tmpdir, &pages_dir, total_pages)?;
        Ok(BlockingIterStream::new(iter).boxed())
    }
}

/// Rendered page files in a temporary directory, read one at a time.
struct RenderedPages {
    /// Released (and deleted) by [`Drop`].
    tmpdir: Option<tempfile::TempDir>,
    file_name: String,
    paths: vec::IntoIter<PathBuf>,
    next_page: u32,
}

impl RenderedPages {
    /// Collect the page files in `pages_dir`, in page order.
    fn from_tempdir(
        file_name: &str,
        tmpdir: tempfile::TempDir,
        pages_dir: &Path,
        total_pages: usize,
    ) -> Result<Self> {
        let mut paths = pages_dir
            .read_dir()
            .with_context(|| format!("failed to read {:?}", pages_dir.display()))?
            .map(|entry| {
                entry.map(|entry| entry.path()).with_context(|| {
                    format!("failed to read entry in {:?}", pages_dir.display())
                })
            })
            .collect::<Result<Vec<_>>>()?;
        // Page numbers are zero-padded, so this is page order.
        paths.sort();
        if paths.len() != total_pages {
            return Err(anyhow!(
                "pdftocairo produced {} pages, but the PDF has {}",
                paths.len(),
                total_pages
            ));
        }
        Ok(Self {
            tmpdir: Some(tmpdir),
            file_name: file_name.to_owned(),
            paths: paths.into_iter(),
            next_page: 1,
        })
    }
}

impl Drop for RenderedPages {
    fn drop(&mut self) {
        if let Some(tmpdir) = self.tmpdir.take() {
            let tmpdir_path = tmpdir.path().to_owned();
            if let Err(err) = tmpdir.close() {
                error!(
                    directory = ?tmpdir_path.display(),
                    "failed to delete temporary directory: {}",
                    err
                );
            }
        }
    }
}

impl Iterator for RenderedPages {
    type Item = Result<PageImage>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        let result = fs::read(&path)
            .with_context(|| format!("failed to read page {:?}", path.display()))
            .and_then(|bytes| {
                // Recover disk space as we go.
                fs::remove_file(&path)
                    .with_context(|| format!("failed to delete {:?}", path.display()))?;
                Ok(bytes)
            });
        let page_number = self.next_page;
        self.next_page += 1;
        Some(result.map(|pixel_data| PageImage {
            source_file_name: self.file_name.clone(),
            page_number: Some(page_number),
            mime_type: "image/png".to_owned(),
            pixel_data,
        }))
    }
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .await
        .context("failed to run pdfinfo (is Poppler installed?)")?;
    check_for_command_failure("pdfinfo", &output, None)?;
    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    parse_pdfinfo_page_count(&output)
}

/// Find the `Pages:` property in `pdfinfo` output.
fn parse_pdfinfo_page_count(output: &str) -> Result<usize> {
    let properties = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect::<BTreeMap<_, _>>();
    let pages = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    pages
        .parse::<usize>()
        .with_context(|| format!("failed to parse page count {pages:?}"))
}
