//! Combining per-unit text into one transcript, with boundary markers.

use crate::prelude::*;

/// Normalize `\r\n` and lone `\r` to `\n`.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Split text into lines after normalizing newlines.
///
/// Trailing newlines and form feeds (which `tesseract` likes to emit) are
/// dropped, but blank lines inside the text are kept, because they often
/// separate questions on a worksheet.
pub fn split_lines(text: &str) -> Vec<String> {
    let text = normalize_newlines(text);
    let trimmed = text.trim_end_matches(['\n', '\x0c']);
    if trimmed.is_empty() {
        return vec![];
    }
    trimmed.split('\n').map(str::to_owned).collect()
}

/// The ordered lines recognized from one batch, including boundary markers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CombinedTranscript {
    pub lines: Vec<String>,
}

impl CombinedTranscript {
    /// Wrap text which did not come from an OCR run.
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: split_lines(text),
        }
    }

    /// The transcript as a single `\n`-separated string.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Where a unit came from, for labelling the marker that follows it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitIdentity {
    /// A standalone image, with its zero-based index in the flattened batch.
    Image { index: usize },
    /// A page rendered from a PDF, with its 1-based page number.
    PdfPage { page_number: u32 },
}

impl UnitIdentity {
    /// The marker placed after this unit, when another unit follows it.
    pub fn end_marker(&self) -> String {
        match self {
            UnitIdentity::Image { index } => format!("=== Image {index} End ==="),
            UnitIdentity::PdfPage { page_number } => {
                format!("=== PDF Page {page_number} End ===")
            }
        }
    }
}

/// Builds a [`CombinedTranscript`] one unit at a time.
///
/// Markers are labelled with the *previous* unit's identity, and only appear
/// between units.
#[derive(Debug, Default)]
pub struct TranscriptBuilder {
    lines: Vec<String>,
    previous: Option<UnitIdentity>,
}

impl TranscriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one unit's recognized text.
    pub fn push_unit(&mut self, identity: UnitIdentity, text: &str) {
        if let Some(previous) = self.previous {
            self.lines.push(previous.end_marker());
        }
        self.lines.extend(split_lines(text));
        self.previous = Some(identity);
    }

    pub fn finish(self) -> CombinedTranscript {
        CombinedTranscript { lines: self.lines }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_all_newline_styles() {
        assert_eq!(normalize_newlines("a\r\nb\rc\nd"), "a\nb\nc\nd");
    }

    #[test]
    fn split_keeps_interior_blank_lines() {
        assert_eq!(split_lines("1. Add\n\n2. Subtract\n\x0c"), [
            "1. Add",
            "",
            "2. Subtract"
        ]);
        assert!(split_lines("\n\n").is_empty());
    }

    #[test]
    fn single_unit_has_no_markers() {
        let mut builder = TranscriptBuilder::new();
        builder.push_unit(UnitIdentity::Image { index: 0 }, "only\nunit\n");
        assert_eq!(builder.finish().lines, ["only", "unit"]);
    }

    #[test]
    fn marker_is_inserted_even_when_a_unit_is_blank() {
        let mut builder = TranscriptBuilder::new();
        builder.push_unit(UnitIdentity::Image { index: 0 }, "");
        builder.push_unit(UnitIdentity::Image { index: 1 }, "second");
        assert_eq!(builder.finish().lines, ["=== Image 0 End ===", "second"]);
    }

    #[test]
    fn transcript_round_trips_through_text() {
        let transcript = CombinedTranscript::from_text("one\r\ntwo");
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.text(), "one\ntwo");
    }
}
