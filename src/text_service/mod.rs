//! Summaries, translations and answers, built on a transcript.
//!
//! [`TextServiceClient`] validates input before any provider is called, and
//! guarantees that a translation has exactly one line per source line, no
//! matter what the provider sends back.

use std::sync::Arc;

use clap::{Args, ValueEnum};

use crate::{error::Error, prelude::*, transcript::split_lines};

pub mod http;
pub mod llm;

/// The answer a provider gives when the context doesn't contain one.
pub const ANSWER_NOT_FOUND: &str = "I couldn't find the answer in your content.";

/// Separator placed where we cut the middle out of a long context.
pub const TRUNCATION_SEPARATOR: &str = "...";

/// Default QA context budget, in characters.
pub const DEFAULT_QA_CONTEXT_BUDGET: usize = 24_000;

/// Which text provider should we use?
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TextProviderKind {
    /// A chat model behind an OpenAI-compatible API.
    #[default]
    Llm,
    /// The backend's `/summarize`, `/translate` and `/qa` endpoints.
    Http,
}

/// Options for the text service.
#[derive(Args, Clone, Debug)]
pub struct TextServiceOpts {
    /// Where summaries, translations and answers come from.
    #[clap(long, env = "TEXT_PROVIDER", value_enum, default_value_t = TextProviderKind::default())]
    pub text_provider: TextProviderKind,

    /// Longest question context to send, in characters. Longer contexts
    /// keep their beginning and end, and lose their middle.
    #[clap(long, env = "QA_CONTEXT_BUDGET", default_value_t = DEFAULT_QA_CONTEXT_BUDGET)]
    pub qa_context_budget: usize,
}

/// `POST /summarize` request body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeRequest {
    pub text: String,
    /// The student's grade, usually a number like `"7"`.
    pub class_level: String,
}

/// `POST /translate` request body. We always send lines, so that the
/// provider sees the same line structure we'll hold it to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    pub lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_lang: Option<String>,
    pub target_lang: String,
}

/// `POST /qa` request body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QaRequest {
    /// The (possibly truncated) context.
    pub text: String,
    pub question: String,
}

/// Something which can summarize, translate and answer questions.
#[async_trait]
pub trait TextProvider: Send + Sync + 'static {
    /// Summarize text for a grade level.
    async fn summarize(&self, request: &SummarizeRequest) -> Result<String, Error>;

    /// Translate lines. The result may have any number of entries, and
    /// entries may contain newlines.
    async fn translate(&self, request: &TranslateRequest) -> Result<Vec<String>, Error>;

    /// Answer a question from the context.
    async fn answer(&self, request: &QaRequest) -> Result<String, Error>;
}

/// A summary, plus a little metadata.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Summary {
    pub summary: String,
    pub grade_level: String,
    /// Length of the summarized text, in characters.
    pub original_length: usize,
    /// Length of the summary, in characters.
    pub summary_length: usize,
}

/// A line-aligned translation.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Translation {
    pub target_language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    /// Exactly one entry per source line.
    pub lines: Vec<String>,
}

/// Force `lines` to have exactly `expected` entries.
///
/// Short results are padded with empty strings. In long results, everything
/// from index `expected - 1` onwards is joined with single spaces into the
/// last line, so earlier lines stay aligned with their sources.
pub fn repair_line_count(expected: usize, mut lines: Vec<String>) -> Vec<String> {
    if lines.len() < expected {
        lines.resize(expected, String::new());
    } else if lines.len() > expected {
        if expected == 0 {
            return vec![];
        }
        let tail = lines.split_off(expected - 1);
        lines.push(tail.join(" "));
    }
    lines
}

/// Keep the first 60% and last 40% of `budget` characters of `context`,
/// joined by [`TRUNCATION_SEPARATOR`]. Contexts within budget are returned
/// unchanged.
pub fn truncate_context(context: &str, budget: usize) -> String {
    let char_count = context.chars().count();
    if char_count <= budget {
        return context.to_owned();
    }
    let head_len = budget * 6 / 10;
    let tail_len = budget * 4 / 10;
    let head = context.chars().take(head_len).collect::<String>();
    let tail = context.chars().skip(char_count - tail_len).collect::<String>();
    format!("{head}{TRUNCATION_SEPARATOR}{tail}")
}

/// Validates requests and repairs responses around a [`TextProvider`].
#[derive(Clone)]
pub struct TextServiceClient {
    provider: Arc<dyn TextProvider>,
    qa_context_budget: usize,
}

impl TextServiceClient {
    pub fn new(provider: Arc<dyn TextProvider>, qa_context_budget: usize) -> Self {
        Self {
            provider,
            qa_context_budget,
        }
    }

    /// Summarize `text` for a student in `class_level`.
    #[instrument(level = "debug", skip_all, fields(class_level = %class_level, chars = text.len()))]
    pub async fn summarize(&self, text: &str, class_level: &str) -> Result<Summary, Error> {
        if text.trim().is_empty() {
            return Err(Error::validation_with_suggestions(
                "There's no text to summarize.",
                [
                    "Run OCR on your homework first",
                    "Or pass the text directly with --text",
                ],
            ));
        }
        let class_level = class_level.trim();
        let request = SummarizeRequest {
            text: text.to_owned(),
            class_level: class_level.to_owned(),
        };
        let summary = self.provider.summarize(&request).await?;
        let summary = summary.trim().to_owned();
        if summary.is_empty() {
            return Err(Error::RemoteService {
                service: "summarize".to_owned(),
                status: None,
                detail: "the summary came back empty".to_owned(),
            });
        }
        Ok(Summary {
            summary_length: summary.chars().count(),
            original_length: text.chars().count(),
            grade_level: class_level.to_owned(),
            summary,
        })
    }

    /// Translate `lines`, returning exactly one translated line per input
    /// line.
    #[instrument(level = "debug", skip_all, fields(lines = lines.len(), target = %target_lang))]
    pub async fn translate(
        &self,
        lines: &[String],
        source_lang: Option<&str>,
        target_lang: &str,
    ) -> Result<Translation, Error> {
        if lines.iter().all(|line| line.trim().is_empty()) {
            return Err(Error::validation_with_suggestions(
                "There's no text to translate.",
                [
                    "Run OCR on your homework first",
                    "Or pass the text directly with --text",
                ],
            ));
        }
        let target_lang = target_lang.trim();
        if target_lang.is_empty() {
            return Err(Error::validation_with_suggestions(
                "Please choose a language to translate into.",
                ["Pass a language with --to, like --to Spanish"],
            ));
        }
        let source_lang = source_lang
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .map(str::to_owned);

        let request = TranslateRequest {
            lines: lines.to_vec(),
            source_lang: source_lang.clone(),
            target_lang: target_lang.to_owned(),
        };
        let returned = self.provider.translate(&request).await?;
        let returned = split_lines(&returned.join("\n"));
        if returned.len() != lines.len() {
            debug!(
                expected = lines.len(),
                got = returned.len(),
                "repairing translation line count"
            );
        }
        Ok(Translation {
            target_language: target_lang.to_owned(),
            source_language: source_lang,
            lines: repair_line_count(lines.len(), returned),
        })
    }

    /// Answer `question` using `context`, which is truncated to our budget.
    #[instrument(level = "debug", skip_all, fields(chars = context.len()))]
    pub async fn answer(&self, context: &str, question: &str) -> Result<String, Error> {
        if context.trim().is_empty() {
            return Err(Error::validation_with_suggestions(
                "There's no content to answer questions about.",
                [
                    "Run OCR on your homework first",
                    "Then ask your question about that session",
                ],
            ));
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::validation_with_suggestions(
                "There's no question to answer.",
                ["Try something like \"What is the main idea?\""],
            ));
        }
        let request = QaRequest {
            text: truncate_context(context, self.qa_context_budget),
            question: question.to_owned(),
        };
        let answer = self.provider.answer(&request).await?;
        Ok(answer.trim().to_owned())
    }
}

#[cfg(test)]
pub(crate) mod test_doubles {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    /// A provider which returns canned responses and counts calls.
    #[derive(Default)]
    pub struct FakeTextProvider {
        pub summary: String,
        pub translation: Vec<String>,
        pub answer: String,
        pub calls: AtomicUsize,
        pub last_qa: Mutex<Option<QaRequest>>,
    }

    impl FakeTextProvider {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextProvider for FakeTextProvider {
        async fn summarize(&self, _request: &SummarizeRequest) -> Result<String, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.summary.clone())
        }

        async fn translate(&self, _request: &TranslateRequest) -> Result<Vec<String>, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.translation.clone())
        }

        async fn answer(&self, request: &QaRequest) -> Result<String, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_qa.lock().unwrap() = Some(request.clone());
            Ok(self.answer.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;

    use super::{test_doubles::FakeTextProvider, *};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn client(provider: Arc<FakeTextProvider>) -> TextServiceClient {
        TextServiceClient::new(provider, 100)
    }

    #[test]
    fn repair_pads_short_results() {
        assert_eq!(repair_line_count(3, strings(&["uno"])), ["uno", "", ""]);
    }

    #[test]
    fn repair_merges_excess_into_last_line() {
        assert_eq!(
            repair_line_count(3, strings(&["a", "b", "c", "d", "e"])),
            ["a", "b", "c d e"]
        );
        assert_eq!(repair_line_count(3, strings(&["a", "b", "c"])), ["a", "b", "c"]);
        assert!(repair_line_count(0, strings(&["stray"])).is_empty());
    }

    #[test]
    fn truncation_keeps_head_and_tail() {
        let context = format!("{}{}{}", "h".repeat(60), "m".repeat(100), "t".repeat(40));
        let truncated = truncate_context(&context, 100);
        assert_eq!(truncated, format!("{}...{}", "h".repeat(60), "t".repeat(40)));
        assert!(truncated.chars().count() <= 100 + TRUNCATION_SEPARATOR.len());
        assert_eq!(truncate_context("short", 100), "short");
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let context = "é".repeat(30);
        let truncated = truncate_context(&context, 10);
        assert_eq!(truncated, format!("{}...{}", "é".repeat(6), "é".repeat(4)));
    }

    #[tokio::test]
    async fn translation_always_matches_input_line_count() {
        let input = strings(&["one", "two", "three"]);
        for (returned, expected) in [
            (strings(&["uno"]), strings(&["uno", "", ""])),
            (strings(&["uno", "dos", "tres"]), strings(&["uno", "dos", "tres"])),
            (
                strings(&["uno", "dos", "tres", "cuatro", "cinco"]),
                strings(&["uno", "dos", "tres cuatro cinco"]),
            ),
            // A single block of text is split back into lines.
            (strings(&["uno\r\ndos\ntres\n"]), strings(&["uno", "dos", "tres"])),
            (vec![], strings(&["", "", ""])),
        ] {
            let provider = Arc::new(FakeTextProvider {
                translation: returned,
                ..Default::default()
            });
            let translation = client(provider)
                .translate(&input, None, "Spanish")
                .await
                .unwrap();
            assert_eq!(translation.lines, expected);
        }
    }

    #[tokio::test]
    async fn empty_input_never_reaches_the_provider() {
        let provider = Arc::new(FakeTextProvider::default());
        let client = client(provider.clone());

        let err = client.summarize("  \n", "7").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = client
            .translate(&strings(&["", " "]), None, "French")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = client
            .translate(&strings(&["hello"]), None, " ")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = client.answer("", "Why?").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = client.answer("Plants need light.", "  ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn long_contexts_are_truncated_before_sending() {
        let provider = Arc::new(FakeTextProvider {
            answer: format!("  {ANSWER_NOT_FOUND}\n"),
            ..Default::default()
        });
        let answer = client(provider.clone())
            .answer(&"x".repeat(500), "What is x?")
            .await
            .unwrap();
        assert_eq!(answer, ANSWER_NOT_FOUND);
        let sent = provider.last_qa.lock().unwrap().clone().unwrap();
        assert_eq!(sent.text.chars().count(), 100 + TRUNCATION_SEPARATOR.len());
        assert_eq!(sent.question, "What is x?");
    }

    #[tokio::test]
    async fn summaries_carry_lengths() {
        let provider = Arc::new(FakeTextProvider {
            summary: " Plants make food from light. ".to_owned(),
            ..Default::default()
        });
        let summary = client(provider)
            .summarize("Photosynthesis is how plants...", "4")
            .await
            .unwrap();
        assert_eq!(summary.summary, "Plants make food from light.");
        assert_eq!(summary.grade_level, "4");
        assert_eq!(summary.summary_length, 28);
        assert_eq!(summary.original_length, 31);
    }

    #[tokio::test]
    async fn empty_summaries_are_errors() {
        let provider = Arc::new(FakeTextProvider::default());
        let err = client(provider).summarize("Some text", "4").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteService);
    }

    #[test]
    fn requests_use_camel_case() {
        let request = TranslateRequest {
            lines: strings(&["hi"]),
            source_lang: None,
            target_lang: "German".to_owned(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "lines": ["hi"], "targetLang": "German" })
        );
        let request = SummarizeRequest {
            text: "t".to_owned(),
            class_level: "3".to_owned(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "text": "t", "classLevel": "3" })
        );
    }
}
