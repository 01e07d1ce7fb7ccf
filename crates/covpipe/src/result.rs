//! Result and error types for covpipe.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for covpipe operations
pub type CovpipeResult<T> = Result<T, CovpipeError>;

/// Errors that can occur while preparing or running a coverage pipeline
#[derive(Debug, Error)]
pub enum CovpipeError {
    /// Missing or malformed setting, caught before any tool is launched
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Listing target binaries failed
    #[error("Discovery of '{pattern}' failed: {message}")]
    Discovery {
        /// Glob that was being expanded
        pattern: String,
        /// Error message
        message: String,
    },

    /// The coverage tool could not be started
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The coverage tool exited with a non-zero exit code
    #[error("The coverage tool exited with a non-zero exit code. Exit code: {code}")]
    ToolExit {
        /// Exit code reported by the process (-1 when killed by a signal)
        code: i32,
    },

    /// The run was cancelled while a tool invocation was in flight
    #[error("Run cancelled")]
    Cancelled,

    /// A tool invocation exceeded its time budget
    #[error("Tool invocation timed out after {limit:?}")]
    Timeout {
        /// Configured timeout
        limit: Duration,
    },

    /// A worker thread panicked while covering a target
    #[error("Worker for {target} panicked")]
    WorkerPanicked {
        /// Target the worker was covering
        target: String,
    },

    /// The HTML report could not be read or rewritten
    #[error("Failed to post-process {}: {source}", path.display())]
    PostProcess {
        /// Report path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Malformed analysis document
    #[error("Invalid analysis document: {message}")]
    Document {
        /// Error message
        message: String,
    },

    /// Settings file could not be parsed or written
    #[error("Settings error in {}: {message}", path.display())]
    Settings {
        /// Settings file path
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Environment variable referenced without a default is unset
    #[error("Environment variable '{name}' is not set and has no default")]
    EnvVar {
        /// Variable name
        name: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl CovpipeError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a document error
    #[must_use]
    pub fn document(message: impl Into<String>) -> Self {
        Self::Document {
            message: message.into(),
        }
    }

    /// Create a discovery error
    #[must_use]
    pub fn discovery(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Discovery {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Exit code carried by a tool failure, if any
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ToolExit { code } => Some(*code),
            _ => None,
        }
    }

    /// Whether this error came from cancellation rather than a real failure
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
