//! Text provider using the backend's JSON endpoints.

use crate::{error::Error, http::BackendClient, prelude::*};

use super::{QaRequest, SummarizeRequest, TextProvider, TranslateRequest};

#[derive(Debug, Deserialize)]
struct SummarizeResponse {
    summary: String,
}

/// Older backends return the whole translation as one string in a
/// single-element array. Either shape works, because we re-split lines.
#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QaResponse {
    answer: String,
}

/// Calls `/summarize`, `/translate` and `/qa`.
#[derive(Clone, Debug)]
pub struct HttpTextProvider {
    backend: BackendClient,
}

impl HttpTextProvider {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TextProvider for HttpTextProvider {
    async fn summarize(&self, request: &SummarizeRequest) -> Result<String, Error> {
        let response: SummarizeResponse = self
            .backend
            .post_json("summarize", "/summarize", request)
            .await?;
        Ok(response.summary)
    }

    async fn translate(&self, request: &TranslateRequest) -> Result<Vec<String>, Error> {
        let response: TranslateResponse = self
            .backend
            .post_json("translate", "/translate", request)
            .await?;
        Ok(response.translations)
    }

    async fn answer(&self, request: &QaRequest) -> Result<String, Error> {
        let response: QaResponse = self.backend.post_json("qa", "/qa", request).await?;
        Ok(response.answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_extra_response_fields() {
        let response: TranslateResponse = serde_json::from_value(json!({
            "translations": ["hola\nmundo"],
            "target_language": "Spanish",
            "original_length": 11,
            "translation_length": 10,
        }))
        .unwrap();
        assert_eq!(response.translations, ["hola\nmundo"]);
    }
}
