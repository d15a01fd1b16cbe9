//! Client for OpenAI-compatible chat APIs (OpenAI itself, LiteLLM, Ollama).
//!
//! We always ask for structured output. Each caller supplies a Rust type,
//! we send its JSON Schema as the `response_format`, and we validate the
//! reply against the same schema before deserializing it.

use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateChatCompletionResponse, FinishReason},
};
use clap::Args;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tokio::time;

use crate::{error::Error, prelude::*};

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable which overrides the server URL.
pub const API_BASE_ENV: &str = "OPENAI_API_BASE";

/// Options for talking to an LLM.
#[derive(Args, Clone, Debug)]
pub struct LlmOpts {
    /// The model used to read images when `--remote-ocr llm` is selected.
    #[clap(long, env = "MODEL_OCR", default_value = "gpt-4o-mini")]
    pub ocr_model: String,

    /// The model used to summarize, translate and answer questions when
    /// `--text-provider llm` is selected.
    #[clap(long, env = "MODEL_TEXT", default_value = "gpt-4o-mini")]
    pub text_model: String,

    /// A timeout, in seconds, for each request. Note that even if a request
    /// times out, you'll probably still be charged.
    #[clap(long, env = "LLM_TIMEOUT")]
    pub timeout: Option<u64>,
}

/// A chat client bound to one model.
#[derive(Clone, Debug)]
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Option<u64>,
}

impl LlmClient {
    /// Create a client from `OPENAI_API_KEY` and (optionally)
    /// `OPENAI_API_BASE`.
    pub fn from_env(model: &str, timeout: Option<u64>) -> Result<Self, Error> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Error::Configuration(API_KEY_ENV.to_owned()))?;
        let mut client_config = OpenAIConfig::new().with_api_key(api_key);
        if let Ok(api_base) = std::env::var(API_BASE_ENV) {
            client_config = client_config.with_api_base(api_base);
        }
        Ok(Self {
            client: Client::with_config(client_config),
            model: model.to_owned(),
            timeout,
        })
    }

    /// The model we talk to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `messages` and parse the reply as `T`.
    #[instrument(level = "debug", skip(self, messages), fields(model = %self.model))]
    pub async fn complete_json<T>(&self, service: &str, messages: Value) -> Result<T, Error>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let remote_err = |detail: String| Error::RemoteService {
            service: service.to_owned(),
            status: None,
            detail,
        };

        let (name, schema) = response_schema::<T>();
        let validator = jsonschema::validator_for(&schema)
            .map_err(|err| remote_err(format!("invalid response schema: {err}")))?;
        let request = json!({
            "model": self.model,
            "messages": messages,
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": name, "schema": schema, "strict": true },
            },
            "store": false,
        });

        // Call the API.
        let chat = self.client.chat();
        let future = chat.create_byot::<Value, Value>(request);
        let chat_result = match self.timeout {
            Some(timeout) => time::timeout(Duration::from_secs(timeout), future)
                .await
                .map_err(|_| remote_err(format!("no response after {timeout}s")))?,
            None => future.await,
        }
        .map_err(|err| remote_err(err.to_string()))?;
        trace!(%chat_result, "chat response");

        let response = serde_json::from_value::<CreateChatCompletionResponse>(chat_result)
            .map_err(|err| remote_err(format!("unexpected response: {err}")))?;
        let choice = response
            .choices
            .first()
            .ok_or_else(|| remote_err("no choices in response".to_owned()))?;
        if choice.finish_reason == Some(FinishReason::ContentFilter) {
            return Err(remote_err("content filter triggered".to_owned()));
        }
        let content = choice.message.content.as_deref().unwrap_or_default();
        let value = serde_json::from_str::<Value>(content)
            .map_err(|err| remote_err(format!("reply was not JSON ({err}): {content:?}")))?;
        validator
            .validate(&value)
            .map_err(|err| remote_err(format!("reply did not match schema: {err}")))?;
        serde_json::from_value::<T>(value)
            .map_err(|err| remote_err(format!("reply did not match schema: {err}")))
    }
}

/// The name and JSON Schema we send as `response_format` for `T`.
pub fn response_schema<T: JsonSchema>() -> (String, Value) {
    let root = schemars::schema_for!(T);
    let mut schema = serde_json::to_value(root).unwrap_or_else(|_| json!({}));
    if let Some(obj) = schema.as_object_mut() {
        // Several providers reject the `$schema` keyword.
        obj.remove("$schema");
    }
    let name = schema
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Response")
        .to_owned();
    (name, schema)
}
