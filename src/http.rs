//! A small JSON client for the study backend's HTTP endpoints.
//!
//! Every endpoint answers with JSON on success. On failure it answers with a
//! non-2xx status and either `{ "error": "..." }` or a plain text body. Some
//! deployments instead answer `200 OK` with
//! `{ "success": false, "message": "...", "suggestions": [...] }`, which we
//! also treat as a failure.

use std::time::Duration;

use reqwest::{Response, StatusCode, multipart::Form};
use serde::de::DeserializeOwned;

use crate::{error::Error, prelude::*};

/// Environment variable naming the backend base URL.
pub const API_BASE_ENV: &str = "STUDY_LENS_API_BASE";

/// A client for one backend.
#[derive(Clone, Debug)]
pub struct BackendClient {
    client: reqwest::Client,
    api_base: String,
}

impl BackendClient {
    /// Create a client. Fails fast if we have no base URL.
    pub fn new(api_base: Option<&str>, timeout: Option<u64>) -> Result<Self, Error> {
        let api_base = api_base
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .ok_or_else(|| Error::Configuration(API_BASE_ENV.to_owned()))?;
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        let client = builder.build().map_err(|err| {
            Error::remote("backend", &anyhow::Error::new(err).context("cannot build HTTP client"))
        })?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_owned(),
        })
    }

    /// The full URL for an endpoint path like `/ocr`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// POST a JSON body and decode a JSON response.
    #[instrument(level = "debug", skip(self, body))]
    pub async fn post_json<Req, Resp>(
        &self,
        service: &str,
        path: &str,
        body: &Req,
    ) -> Result<Resp, Error>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|err| send_error(service, err))?;
        decode_json_response(service, response).await
    }

    /// POST a multipart form and decode a JSON response.
    #[instrument(level = "debug", skip(self, form))]
    pub async fn post_multipart<Resp>(
        &self,
        service: &str,
        path: &str,
        form: Form,
    ) -> Result<Resp, Error>
    where
        Resp: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .multipart(form)
            .send()
            .await
            .map_err(|err| send_error(service, err))?;
        decode_json_response(service, response).await
    }
}

fn send_error(service: &str, err: reqwest::Error) -> Error {
    Error::RemoteService {
        service: service.to_owned(),
        status: err.status().map(|status| status.as_u16()),
        detail: if err.is_timeout() {
            "request timed out".to_owned()
        } else {
            format!("could not reach the server: {err}")
        },
    }
}

/// The body of an error response.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn detail(self) -> Option<String> {
        self.error.or(self.message)
    }
}

/// Pull the most useful message out of an error response body.
pub fn error_detail(body: &str) -> String {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok().and_then(ErrorBody::detail);
    match parsed {
        Some(detail) => detail,
        None if body.trim().is_empty() => "no details from server".to_owned(),
        None => body.trim().to_owned(),
    }
}

/// Check the status of a response, then decode it as JSON.
pub async fn decode_json_response<T>(service: &str, response: Response) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let body = response.text().await.map_err(|err| Error::RemoteService {
        service: service.to_owned(),
        status: Some(status.as_u16()),
        detail: format!("could not read response body: {err}"),
    })?;
    decode_json_body(service, status, &body)
}

/// Decode a response body we've already read, treating error statuses and
/// `"success": false` bodies as failures.
fn decode_json_body<T>(service: &str, status: StatusCode, body: &str) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    let remote_err = |detail: String| Error::RemoteService {
        service: service.to_owned(),
        status: Some(status.as_u16()),
        detail,
    };
    if !status.is_success() {
        return Err(remote_err(error_detail(body)));
    }
    trace!(%body, "response body");
    if let Ok(error_body) = serde_json::from_str::<ErrorBody>(body)
        && error_body.success == Some(false)
    {
        return Err(remote_err(
            error_body
                .detail()
                .unwrap_or_else(|| "server reported failure".to_owned()),
        ));
    }
    serde_json::from_str::<T>(body).map_err(|err| remote_err(format!("unexpected response: {err}")))
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;

    use super::*;

    #[test]
    fn missing_base_is_a_configuration_error() {
        let err = BackendClient::new(None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let err = BackendClient::new(Some("  "), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn joins_paths_without_double_slashes() {
        let client = BackendClient::new(Some("http://localhost:8000/api/"), None).unwrap();
        assert_eq!(client.url("/ocr"), "http://localhost:8000/api/ocr");
    }

    #[test]
    fn prefers_json_error_field() {
        assert_eq!(error_detail(r#"{"error":"No text provided"}"#), "No text provided");
        assert_eq!(
            error_detail(r#"{"success":false,"message":"Try again later"}"#),
            "Try again later"
        );
        assert_eq!(error_detail("Bad Gateway\n"), "Bad Gateway");
        assert_eq!(error_detail(""), "no details from server");
    }

    #[derive(Debug, Deserialize)]
    struct AnswerBody {
        answer: String,
    }

    fn decode(status: u16, body: &str) -> Result<AnswerBody, Error> {
        let status = StatusCode::from_u16(status).unwrap();
        decode_json_body("qa", status, body)
    }

    fn remote_failure(err: Error) -> (Option<u16>, String) {
        assert_eq!(err.kind(), ErrorKind::RemoteService);
        match err {
            Error::RemoteService { service, status, detail } => {
                assert_eq!(service, "qa");
                (status, detail)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn decodes_successful_bodies() {
        let body = decode(200, r#"{"answer":"Green."}"#).unwrap();
        assert_eq!(body.answer, "Green.");
    }

    #[test]
    fn error_statuses_carry_the_server_message() {
        let err = decode(400, r#"{"error":"No question provided"}"#).unwrap_err();
        assert_eq!(remote_failure(err), (Some(400), "No question provided".to_owned()));

        let err = decode(502, "Bad Gateway").unwrap_err();
        assert_eq!(remote_failure(err), (Some(502), "Bad Gateway".to_owned()));
    }

    #[test]
    fn success_false_is_a_failure_even_with_200() {
        let err = decode(200, r#"{"success":false,"message":"Try again later"}"#).unwrap_err();
        assert_eq!(remote_failure(err), (Some(200), "Try again later".to_owned()));

        let err = decode(200, r#"{"success":false}"#).unwrap_err();
        assert_eq!(remote_failure(err).1, "server reported failure");
    }

    #[test]
    fn undecodable_success_bodies_are_failures() {
        let err = decode(200, r#"{"summary":"wrong endpoint"}"#).unwrap_err();
        let (status, detail) = remote_failure(err);
        assert_eq!(status, Some(200));
        assert!(detail.starts_with("unexpected response:"), "{detail}");
    }
}
