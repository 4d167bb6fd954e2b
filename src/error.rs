//! Error types for setup, recommendation and uninstall operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::backend::Backend;
use crate::pull_error::PullErrorKind;
use crate::tier::HardwareTier;

/// Result type alias using [`SetupError`].
pub type Result<T> = std::result::Result<T, SetupError>;

/// Errors that can occur while setting up or tearing down a local backend.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Machine is below the hard minimum for running local models.
    #[error("{found_gb:.0} GB RAM detected, at least {required_gb:.0} GB is required to run local models")]
    InsufficientRam { found_gb: f64, required_gb: f64 },

    /// A required CLI tool is not on PATH.
    #[error("'{0}' not found on PATH. Install it and re-run setup")]
    CommandNotFound(String),

    /// The backend CLI exists but its server/daemon is not answering.
    #[error("{backend} is installed but not running (no answer from {url})")]
    DaemonNotRunning { backend: String, url: String },

    /// A subprocess exceeded its time limit and was terminated.
    #[error("'{command}' timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// A subprocess exited non-zero.
    #[error("'{command}' failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A model pull failed after all attempts.
    #[error("Failed to pull '{model}' ({kind}): {message}")]
    PullFailed {
        model: String,
        kind: PullErrorKind,
        message: String,
    },

    /// No chat/edit model is eligible for the detected tier.
    #[error("No chat model in the catalog is eligible for tier {0}")]
    NoChatModel(HardwareTier),

    /// Unknown backend name.
    #[error("Unknown backend '{0}' (expected docker, ollama or llamacpp)")]
    UnknownBackend(String),

    /// A repeat setup asked for a different backend than the one that pulled the recorded models.
    #[error(
        "Models installed through {recorded} are still recorded; run `llmsetup uninstall` before switching to {requested}"
    )]
    BackendMismatch { recorded: Backend, requested: Backend },

    /// Home directory could not be resolved.
    #[error("Could not determine home directory")]
    NoHomeDir,

    /// Manifest missing when an uninstall was requested.
    #[error("No setup manifest at {0}; nothing was installed by llmsetup")]
    ManifestNotFound(PathBuf),

    /// File write failed; the previous file was restored from backup if one existed.
    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SetupError {
    /// Environment errors are the ones the user fixes outside the tool.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            SetupError::InsufficientRam { .. }
                | SetupError::CommandNotFound(_)
                | SetupError::DaemonNotRunning { .. }
        )
    }
}
