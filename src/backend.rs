//! Local model-serving backends and their per-backend conventions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SetupError;
use crate::models::ModelCatalogEntry;
use crate::tier::TierPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Docker Model Runner (Docker Desktop)
    Docker,
    /// Ollama
    Ollama,
    /// llama.cpp `llama-server`
    #[value(name = "llamacpp", alias = "llama.cpp")]
    LlamaCpp,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Docker, Backend::Ollama, Backend::LlamaCpp];

    pub fn label(&self) -> &'static str {
        match self {
            Backend::Docker => "Docker Model Runner",
            Backend::Ollama => "Ollama",
            Backend::LlamaCpp => "llama.cpp",
        }
    }

    /// The CLI binary that must be on PATH.
    pub fn cli(&self) -> &'static str {
        match self {
            Backend::Docker => "docker",
            Backend::Ollama => "ollama",
            Backend::LlamaCpp => "llama-server",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Backend::Docker => 12434,
            Backend::Ollama => 11434,
            Backend::LlamaCpp => 8080,
        }
    }

    /// Base URL written into IDE configs as `apiBase`.
    pub fn api_base(&self) -> String {
        let port = self.default_port();
        match self {
            Backend::Docker => format!("http://localhost:{port}/engines/v1"),
            Backend::Ollama => format!("http://localhost:{port}"),
            Backend::LlamaCpp => format!("http://localhost:{port}/v1"),
        }
    }

    /// OpenAI-compatible model listing endpoint.
    pub fn models_url(&self) -> String {
        let port = self.default_port();
        match self {
            Backend::Docker => format!("http://localhost:{port}/engines/v1/models"),
            Backend::Ollama | Backend::LlamaCpp => format!("http://localhost:{port}/v1/models"),
        }
    }

    /// Continue.dev `provider` value.
    pub fn continue_provider(&self) -> &'static str {
        match self {
            Backend::Ollama => "ollama",
            Backend::Docker | Backend::LlamaCpp => "openai",
        }
    }

    /// Identifier the backend uses to pull/serve `entry`.
    pub fn model_id(&self, entry: &ModelCatalogEntry) -> String {
        match self {
            Backend::Docker => format!("ai/{}:{}", entry.family, entry.tag),
            Backend::Ollama => format!("{}:{}", entry.family, entry.tag),
            Backend::LlamaCpp => format!("{}:{}", entry.hf_repo, entry.quant),
        }
    }

    pub fn tier_policy(&self) -> TierPolicy {
        match self {
            Backend::Docker => TierPolicy::DOCKER,
            Backend::Ollama => TierPolicy::OLLAMA,
            Backend::LlamaCpp => TierPolicy::LLAMACPP,
        }
    }

    /// Name fragments of models known to be missing from this backend's registry.
    pub fn deny_list(&self) -> &'static [&'static str] {
        match self {
            Backend::Docker => &["starcoder2"],
            Backend::Ollama | Backend::LlamaCpp => &[],
        }
    }

    pub fn is_denied(&self, entry: &ModelCatalogEntry) -> bool {
        let family = entry.family.to_lowercase();
        self.deny_list().iter().any(|needle| family.contains(needle))
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Backend {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "docker" | "dmr" => Ok(Backend::Docker),
            "ollama" => Ok(Backend::Ollama),
            "llamacpp" | "llama.cpp" | "llama-cpp" => Ok(Backend::LlamaCpp),
            other => Err(SetupError::UnknownBackend(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelCatalog;

    #[test]
    fn test_model_id_formats() {
        let catalog = ModelCatalog::builtin();
        let entry = catalog
            .entries()
            .iter()
            .find(|e| e.family == "qwen2.5-coder" && e.tag == "7b")
            .copied()
            .expect("qwen2.5-coder 7b in catalog");

        assert_eq!(Backend::Ollama.model_id(entry), "qwen2.5-coder:7b");
        assert_eq!(Backend::Docker.model_id(entry), "ai/qwen2.5-coder:7b");
        assert!(Backend::LlamaCpp.model_id(entry).ends_with(":Q4_K_M"));
    }

    #[test]
    fn test_from_str() {
        assert_eq!("Docker".parse::<Backend>().unwrap(), Backend::Docker);
        assert_eq!("llama.cpp".parse::<Backend>().unwrap(), Backend::LlamaCpp);
        assert!("vllm".parse::<Backend>().is_err());
    }

    #[test]
    fn test_api_bases() {
        assert_eq!(Backend::Docker.api_base(), "http://localhost:12434/engines/v1");
        assert_eq!(Backend::Ollama.api_base(), "http://localhost:11434");
        assert_eq!(Backend::LlamaCpp.api_base(), "http://localhost:8080/v1");
    }
}
