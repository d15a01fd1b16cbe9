//! Read photos and PDFs of homework with OCR, then summarize, translate or
//! answer questions about the text.
//!
//! The interesting parts live in [`orchestrator`], which decides how each
//! page gets recognized, and [`text_service`], which keeps translated lines
//! aligned with the transcript they came from.

pub mod async_utils;
pub mod cmd;
pub mod cpu_limit;
pub mod data_url;
pub mod error;
pub mod http;
pub mod input;
pub mod llm_client;
pub mod orchestrator;
pub mod pdf;
pub mod prelude;
pub mod prompt;
pub mod recognizers;
pub mod session;
pub mod text_service;
pub mod transcript;
pub mod ui;
pub mod upload;

pub use self::error::{Error, ErrorKind};
