//! Errors returned by the OCR and text pipelines.
//!
//! The command-line layer mostly works with [`anyhow::Error`], but the core
//! returns [`Error`] so that callers can tell a bad upload from a broken
//! backend without parsing messages.

use std::fmt;

/// An error from the recognition or text pipelines.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller gave us something we can't use. Never retried.
    #[error("{message}")]
    Validation {
        message: String,
        /// Short hints for the student, printed after the message.
        suggestions: Vec<String>,
    },

    /// A recognizer failed on one unit.
    #[error("{engine} could not read {unit}: {detail}")]
    Recognition {
        engine: String,
        unit: String,
        detail: String,
    },

    /// A network call failed, or the backend returned an error.
    #[error("{service} request failed{}: {detail}", status_suffix(.status))]
    RemoteService {
        service: String,
        status: Option<u16>,
        detail: String,
    },

    /// Credentials or endpoints are missing.
    #[error("{0} is not configured")]
    Configuration(String),

    /// A PDF could not be rasterized.
    #[error("could not render pages of {file}: {detail}")]
    Render { file: String, detail: String },

    /// One unit failed, so the whole batch failed.
    #[error("OCR batch failed at {unit}")]
    BatchProcessing {
        unit: String,
        #[source]
        source: Box<Error>,
    },

    /// The caller asked us to stop.
    #[error("OCR batch was cancelled")]
    Cancelled,
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(status) => format!(" with HTTP status {status}"),
        None => String::new(),
    }
}

/// The coarse category of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Recognition,
    RemoteService,
    Configuration,
    Render,
    BatchProcessing,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Recognition => "recognition",
            ErrorKind::RemoteService => "remote service",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Render => "render",
            ErrorKind::BatchProcessing => "batch processing",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl Error {
    /// What kind of error is this?
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Recognition { .. } => ErrorKind::Recognition,
            Error::RemoteService { .. } => ErrorKind::RemoteService,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Render { .. } => ErrorKind::Render,
            Error::BatchProcessing { .. } => ErrorKind::BatchProcessing,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// The kind of the innermost error, looking through batch wrappers.
    pub fn root_kind(&self) -> ErrorKind {
        match self {
            Error::BatchProcessing { source, .. } => source.root_kind(),
            other => other.kind(),
        }
    }

    /// Suggestions to show the user, if any.
    pub fn suggestions(&self) -> &[String] {
        match self {
            Error::Validation { suggestions, .. } => suggestions,
            Error::BatchProcessing { source, .. } => source.suggestions(),
            _ => &[],
        }
    }

    /// A validation error with suggestions for the student.
    pub fn validation_with_suggestions<S>(
        message: impl Into<String>,
        suggestions: impl IntoIterator<Item = S>,
    ) -> Self
    where
        S: Into<String>,
    {
        Error::Validation {
            message: message.into(),
            suggestions: suggestions.into_iter().map(Into::into).collect(),
        }
    }

    /// A recognition error, keeping the whole `anyhow` context chain.
    pub fn recognition(engine: &str, unit: &str, err: &anyhow::Error) -> Self {
        Error::Recognition {
            engine: engine.to_owned(),
            unit: unit.to_owned(),
            detail: format!("{err:#}"),
        }
    }

    /// A remote service error with no HTTP status.
    pub fn remote(service: &str, err: &anyhow::Error) -> Self {
        Error::RemoteService {
            service: service.to_owned(),
            status: None,
            detail: format!("{err:#}"),
        }
    }

    /// A render error, keeping the whole `anyhow` context chain.
    pub fn render(file: &str, err: &anyhow::Error) -> Self {
        Error::Render {
            file: file.to_owned(),
            detail: format!("{err:#}"),
        }
    }

    /// Wrap a unit failure as a batch failure.
    pub fn batch(unit: impl Into<String>, source: Error) -> Self {
        Error::BatchProcessing {
            unit: unit.into(),
            source: Box::new(source),
        }
    }
}
