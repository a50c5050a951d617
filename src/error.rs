//! Pipeline error taxonomy.
//!
//! Everything fallible returns `anyhow::Result`. The variants here ride
//! inside the `anyhow::Error` so `main` can map a failure back to its
//! category (and exit code) no matter how much context was layered on top.

use thiserror::Error;

/// Categorized pipeline failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required input or intermediate result is missing.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// An external program exited non-zero.
    #[error("{program} failed (exit code {code}){}", format_stderr(.stderr))]
    ExternalTool {
        program: String,
        code: i32,
        stderr: String,
    },

    /// Malformed command-line input.
    #[error("usage: {0}")]
    Usage(String),
}

fn format_stderr(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(":\n{}", stderr)
    }
}

/// Broad category of a failure, used for exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    ExternalTool,
    Usage,
    Other,
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Usage => 2,
            ErrorKind::Precondition => 3,
            ErrorKind::ExternalTool | ErrorKind::Other => 1,
        }
    }
}

impl PipelineError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        PipelineError::Precondition(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        PipelineError::Usage(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Precondition(_) => ErrorKind::Precondition,
            PipelineError::ExternalTool { .. } => ErrorKind::ExternalTool,
            PipelineError::Usage(_) => ErrorKind::Usage,
        }
    }

    /// Find the innermost-first categorized error anywhere in the chain.
    pub fn classify(err: &anyhow::Error) -> ErrorKind {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<PipelineError>())
            .map(PipelineError::kind)
            .unwrap_or(ErrorKind::Other)
    }
}
