//! Asynchronous utilities for use with Tokio.
//!
//! Most of the pipeline is plain sequential `async` code. The pieces here let
//! us run blocking work (reading rendered pages, decoding images) without
//! stalling the executor, and let a caller stop a batch between units.

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::Stream;

use crate::prelude::*;

pub mod blocking_iter_streams;

/// A type alias for a boxed future. This is used to make it easier to work with
/// with complex futures.
pub type BoxedFuture<Output> = Pin<Box<dyn Future<Output = Output> + Send>>;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// A cooperative cancellation flag, shared between a batch and whoever may
/// want to stop it.
///
/// Cancelling never interrupts a unit that is already being recognized. The
/// batch checks the flag before starting each unit.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Create a new flag which has not been raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the batch to stop before its next unit.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Has anyone asked us to stop?
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Report any command failures, and include any error output.
///
/// The output of standard error and standard output will be logged at
/// appropriate levels. If `is_error_line` is supplied, a successful command
/// that printed a matching line on standard error is still treated as a
/// failure.
pub fn check_for_command_failure(
    command_name: &str,
    output: &std::process::Output,
    is_error_line: Option<&dyn Fn(&str) -> bool>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    trace!(
        command_name = command_name,
        output = %stdout,
        "Standard output from command"
    );
    if !stderr.trim().is_empty() {
        debug!(
            command_name = command_name,
            output = %stderr,
            "Standard error from command",
        );
    }

    if output.status.success() {
        if let Some(is_error_line) = is_error_line
            && stderr.lines().any(is_error_line)
        {
            return Err(anyhow!(
                "{} printed error output:\n{}",
                command_name,
                stderr,
            ));
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::{os::unix::process::ExitStatusExt as _, process::Output};

    use super::*;

    fn output(code: i32, stderr: &str) -> Output {
        Output {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: vec![],
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn command_failure_reports_exit_code() {
        let err = check_for_command_failure("pdfinfo", &output(1, "boom"), None)
            .unwrap_err();
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn successful_command_with_error_line_fails() {
        let is_error = |line: &str| line.contains("Error");
        let result = check_for_command_failure(
            "pdftocairo",
            &output(0, "Syntax Error: bad xref"),
            Some(&is_error),
        );
        assert!(result.is_err());
        assert!(
            check_for_command_failure("pdftocairo", &output(0, "fine"), Some(&is_error))
                .is_ok()
        );
    }
}
