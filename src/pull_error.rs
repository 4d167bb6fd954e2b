//! Classification of model-pull failures from CLI stderr text.

use std::fmt;

use serde::Serialize;

use crate::backend::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PullErrorKind {
    Network,
    DiskFull,
    ModelNotFound,
    Auth,
    SshKey,
    Unknown,
}

// Checked in this order: the more specific causes often also mention
// connection or registry words.
const SSH_KEY: &[&str] = &[
    "ssh key",
    "ssh-key",
    "id_ed25519",
    "public key",
    "host key verification failed",
];
const AUTH: &[&str] = &[
    "unauthorized",
    "authentication required",
    "status 401",
    "status code 401",
    "401 unauthorized",
    "status 403",
    "status code 403",
    "403 forbidden",
    "forbidden",
    "denied: requested access",
    "login required",
];
const DISK_FULL: &[&str] = &[
    "no space left on device",
    "disk full",
    "insufficient disk space",
    "not enough space",
    "enospc",
];
const NOT_FOUND: &[&str] = &[
    "file does not exist",
    "manifest unknown",
    "not found",
    "status 404",
    "status code 404",
    "pull access denied",
    "repository does not exist",
];
const NETWORK: &[&str] = &[
    "connection refused",
    "connection reset",
    "timed out",
    "timeout",
    "no such host",
    "temporary failure in name resolution",
    "network is unreachable",
    "tls handshake",
    "eof",
    "dial tcp",
];

impl PullErrorKind {
    pub fn classify(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        let table: [(PullErrorKind, &[&str]); 5] = [
            (PullErrorKind::SshKey, SSH_KEY),
            (PullErrorKind::Auth, AUTH),
            (PullErrorKind::DiskFull, DISK_FULL),
            (PullErrorKind::ModelNotFound, NOT_FOUND),
            (PullErrorKind::Network, NETWORK),
        ];

        table
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
            .map(|(kind, _)| *kind)
            .unwrap_or(PullErrorKind::Unknown)
    }

    /// Whether another attempt has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PullErrorKind::Network | PullErrorKind::Unknown)
    }

    pub fn troubleshooting(&self, backend: Backend) -> Vec<String> {
        match self {
            PullErrorKind::Network => vec![
                "Check your internet connection and any proxy/VPN settings".to_string(),
                format!("Retry later with: llmsetup setup --backend {}", backend_arg(backend)),
            ],
            PullErrorKind::DiskFull => vec![
                "Free up disk space; models need several GB each".to_string(),
                match backend {
                    Backend::Docker => "Remove unused models with: docker model rm <model>".to_string(),
                    Backend::Ollama => "Remove unused models with: ollama rm <model>".to_string(),
                    Backend::LlamaCpp => {
                        "Clear old GGUF files from ~/.cache/huggingface/hub".to_string()
                    }
                },
            ],
            PullErrorKind::ModelNotFound => vec![
                format!("The model is not published for {}", backend),
                "Pick another model or update llmsetup for a newer catalog".to_string(),
            ],
            PullErrorKind::Auth => vec![match backend {
                Backend::Docker => "Sign in with: docker login".to_string(),
                Backend::Ollama => "Check the model is public or sign in with: ollama signin".to_string(),
                Backend::LlamaCpp => "Set HF_TOKEN or run: hf auth login".to_string(),
            }],
            PullErrorKind::SshKey => vec![
                "The registry rejected your SSH key".to_string(),
                "Check ~/.ssh permissions or re-add the key to the registry account".to_string(),
            ],
            PullErrorKind::Unknown => vec![
                format!("Run '{} --help' and retry the pull manually", backend.cli()),
                "Re-run with --verbose for the full command output".to_string(),
            ],
        }
    }
}

fn backend_arg(backend: Backend) -> &'static str {
    match backend {
        Backend::Docker => "docker",
        Backend::Ollama => "ollama",
        Backend::LlamaCpp => "llamacpp",
    }
}

impl fmt::Display for PullErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PullErrorKind::Network => "network",
            PullErrorKind::DiskFull => "disk full",
            PullErrorKind::ModelNotFound => "model not found",
            PullErrorKind::Auth => "authentication",
            PullErrorKind::SshKey => "ssh key",
            PullErrorKind::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_full_beats_network() {
        let stderr = "error: write /var/lib/docker/models/blob: no space left on device\n\
                      failed to pull after connection reset";
        assert_eq!(PullErrorKind::classify(stderr), PullErrorKind::DiskFull);
    }

    #[test]
    fn test_digest_digits_are_not_status_codes() {
        let stderr = "Error: write /root/.ollama/models/blobs/sha256-9a401c2e: no space left on device";
        assert_eq!(PullErrorKind::classify(stderr), PullErrorKind::DiskFull);

        let stderr = "pulling 4034f1c0a9b2... connection reset by peer";
        assert_eq!(PullErrorKind::classify(stderr), PullErrorKind::Network);

        assert_eq!(
            PullErrorKind::classify("response status 401 from registry"),
            PullErrorKind::Auth
        );
        assert_eq!(
            PullErrorKind::classify("GET https://huggingface.co/x: status code 404"),
            PullErrorKind::ModelNotFound
        );
    }

    #[test]
    fn test_classify_categories() {
        assert_eq!(
            PullErrorKind::classify("dial tcp: lookup registry.ollama.ai: no such host"),
            PullErrorKind::Network
        );
        assert_eq!(
            PullErrorKind::classify("Error: pull model manifest: file does not exist"),
            PullErrorKind::ModelNotFound
        );
        assert_eq!(
            PullErrorKind::classify("unauthorized: authentication required"),
            PullErrorKind::Auth
        );
        assert_eq!(
            PullErrorKind::classify("Host key verification failed."),
            PullErrorKind::SshKey
        );
        assert_eq!(PullErrorKind::classify("segfault"), PullErrorKind::Unknown);
        assert_eq!(PullErrorKind::classify(""), PullErrorKind::Unknown);
    }

    #[test]
    fn test_retryable() {
        assert!(PullErrorKind::Network.is_retryable());
        assert!(!PullErrorKind::DiskFull.is_retryable());
        assert!(!PullErrorKind::ModelNotFound.is_retryable());
    }

    #[test]
    fn test_troubleshooting_is_backend_specific() {
        let docker = PullErrorKind::DiskFull.troubleshooting(Backend::Docker);
        let ollama = PullErrorKind::DiskFull.troubleshooting(Backend::Ollama);
        assert!(docker.iter().any(|l| l.contains("docker model rm")));
        assert!(ollama.iter().any(|l| l.contains("ollama rm")));
    }
}
