//! Runtime configuration for llmsetup.

use std::path::PathBuf;
use std::time::Duration;

use crate::backend::Backend;
use crate::error::{Result, SetupError};

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PULL_TIMEOUT_SECS: u64 = 60 * 60;
const DEFAULT_PULL_ATTEMPTS: u32 = 3;
const DEFAULT_PULL_BACKOFF_SECS: u64 = 2;

#[derive(Debug, Clone)]
pub struct SetupConfig {
    /// Backend used when none is given on the command line.
    pub backend: Backend,
    /// Continue.dev home, normally `~/.continue`.
    pub continue_dir: PathBuf,
    /// Limit for short CLI calls (`ls`, `rm`, version checks).
    pub command_timeout: Duration,
    /// Limit for a single model pull.
    pub pull_timeout: Duration,
    pub pull_attempts: u32,
    /// First retry delay; doubled on each further attempt.
    pub pull_backoff: Duration,
}

impl SetupConfig {
    /// Defaults overridden by `LLMSETUP_*` and `CONTINUE_HOME` environment variables.
    pub fn from_env() -> Result<Self> {
        let backend = match std::env::var("LLMSETUP_BACKEND") {
            Ok(name) => name.parse()?,
            Err(_) => Backend::Docker,
        };

        let continue_dir = match std::env::var("CONTINUE_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => default_continue_dir()?,
        };

        let secs = |key: &str, default: u64| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        };

        let pull_attempts = std::env::var("LLMSETUP_PULL_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PULL_ATTEMPTS);

        Ok(SetupConfig {
            backend,
            continue_dir,
            command_timeout: Duration::from_secs(secs(
                "LLMSETUP_COMMAND_TIMEOUT_SECS",
                DEFAULT_COMMAND_TIMEOUT_SECS,
            )),
            pull_timeout: Duration::from_secs(secs(
                "LLMSETUP_PULL_TIMEOUT_SECS",
                DEFAULT_PULL_TIMEOUT_SECS,
            )),
            pull_attempts,
            pull_backoff: Duration::from_secs(DEFAULT_PULL_BACKOFF_SECS),
        })
    }

    pub fn builder() -> SetupConfigBuilder {
        SetupConfigBuilder::default()
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.continue_dir.join("setup-manifest.json")
    }

    /// Pid of the llama-server started by `restart`.
    pub fn server_pid_path(&self) -> PathBuf {
        self.continue_dir.join("llama-server.pid")
    }

    pub fn server_log_path(&self) -> PathBuf {
        self.continue_dir.join("llama-server.log")
    }
}

fn default_continue_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".continue"))
        .ok_or(SetupError::NoHomeDir)
}

#[derive(Debug)]
pub struct SetupConfigBuilder {
    config: SetupConfig,
}

impl Default for SetupConfigBuilder {
    fn default() -> Self {
        Self {
            config: SetupConfig {
                backend: Backend::Docker,
                continue_dir: PathBuf::from(".continue"),
                command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
                pull_timeout: Duration::from_secs(DEFAULT_PULL_TIMEOUT_SECS),
                pull_attempts: DEFAULT_PULL_ATTEMPTS,
                pull_backoff: Duration::from_secs(DEFAULT_PULL_BACKOFF_SECS),
            },
        }
    }
}

impl SetupConfigBuilder {
    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn continue_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.continue_dir = dir.into();
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    pub fn pull_timeout(mut self, timeout: Duration) -> Self {
        self.config.pull_timeout = timeout;
        self
    }

    pub fn pull_attempts(mut self, attempts: u32) -> Self {
        self.config.pull_attempts = attempts.max(1);
        self
    }

    pub fn pull_backoff(mut self, backoff: Duration) -> Self {
        self.config.pull_backoff = backoff;
        self
    }

    pub fn build(self) -> SetupConfig {
        self.config
    }
}
