//! Text provider using a chat model.

use schemars::JsonSchema;

use crate::{
    error::Error,
    llm_client::LlmClient,
    prelude::*,
    prompt::{ChatPrompt, JsonObject, bindings},
};

use super::{ANSWER_NOT_FOUND, QaRequest, SummarizeRequest, TextProvider, TranslateRequest};

const SUMMARIZE_PROMPT: &str = include_str!("../prompts/summarize.toml");
const TRANSLATE_PROMPT: &str = include_str!("../prompts/translate.toml");
const QA_PROMPT: &str = include_str!("../prompts/qa.toml");

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct SummaryResponse {
    /// The summary, written for the student's grade.
    summary: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct TranslationResponse {
    /// One translated line per input line, in order.
    lines: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct AnswerResponse {
    answer: String,
}

/// The typical age range for a numeric grade, like `"12-13"` for grade 7.
fn age_range(class_level: &str) -> Option<String> {
    let grade = class_level.trim().parse::<u32>().ok()?;
    Some(format!("{}-{}", grade.checked_add(5)?, grade.checked_add(6)?))
}

/// Summarizes, translates and answers using built-in prompts.
#[derive(Clone, Debug)]
pub struct LlmTextProvider {
    client: LlmClient,
    summarize_prompt: ChatPrompt,
    translate_prompt: ChatPrompt,
    qa_prompt: ChatPrompt,
}

impl LlmTextProvider {
    pub fn new(client: LlmClient) -> Self {
        Self {
            client,
            summarize_prompt: ChatPrompt::from_toml(SUMMARIZE_PROMPT)
                .expect("failed to parse built-in summarize prompt"),
            translate_prompt: ChatPrompt::from_toml(TRANSLATE_PROMPT)
                .expect("failed to parse built-in translate prompt"),
            qa_prompt: ChatPrompt::from_toml(QA_PROMPT)
                .expect("failed to parse built-in QA prompt"),
        }
    }
}

/// Prompt rendering only fails on a broken built-in template.
fn render(service: &str, prompt: &ChatPrompt, bindings: &JsonObject) -> Result<Value, Error> {
    prompt
        .render_prompt(bindings)
        .map_err(|err| Error::remote(service, &err))
}

#[async_trait]
impl TextProvider for LlmTextProvider {
    #[instrument(level = "debug", skip_all, fields(model = %self.client.model()))]
    async fn summarize(&self, request: &SummarizeRequest) -> Result<String, Error> {
        let messages = render(
            "summarize",
            &self.summarize_prompt,
            &bindings([
                ("grade_level", Value::String(request.class_level.clone())),
                (
                    "age_range",
                    age_range(&request.class_level).map_or(Value::Null, Value::String),
                ),
                ("text", Value::String(request.text.clone())),
            ]),
        )?;
        let response: SummaryResponse = self.client.complete_json("summarize", messages).await?;
        Ok(response.summary)
    }

    #[instrument(level = "debug", skip_all, fields(model = %self.client.model()))]
    async fn translate(&self, request: &TranslateRequest) -> Result<Vec<String>, Error> {
        let lines_json = serde_json::to_string_pretty(&request.lines)
            .map_err(|err| Error::remote("translate", &anyhow::Error::new(err)))?;
        let messages = render(
            "translate",
            &self.translate_prompt,
            &bindings([
                ("line_count", json!(request.lines.len())),
                (
                    "source_language",
                    request.source_lang.clone().map_or(Value::Null, Value::String),
                ),
                ("target_language", Value::String(request.target_lang.clone())),
                ("lines_json", Value::String(lines_json)),
            ]),
        )?;
        let response: TranslationResponse =
            self.client.complete_json("translate", messages).await?;
        Ok(response.lines)
    }

    #[instrument(level = "debug", skip_all, fields(model = %self.client.model()))]
    async fn answer(&self, request: &QaRequest) -> Result<String, Error> {
        let messages = render(
            "qa",
            &self.qa_prompt,
            &bindings([
                ("not_found", Value::String(ANSWER_NOT_FOUND.to_owned())),
                ("context", Value::String(request.text.clone())),
                ("question", Value::String(request.question.clone())),
            ]),
        )?;
        let response: AnswerResponse = self.client.complete_json("qa", messages).await?;
        Ok(response.answer)
    }
}
