//! Built-in catalog of coding models.

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::tier::HardwareTier;
use crate::tier::HardwareTier::{A, B, C, S};

/// What a model is used for inside the IDE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Chat,
    Edit,
    Autocomplete,
    Embed,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Chat => "chat",
            Role::Edit => "edit",
            Role::Autocomplete => "autocomplete",
            Role::Embed => "embed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCatalogEntry {
    pub name: &'static str,
    /// Registry name shared by Docker (`ai/<family>`) and Ollama.
    pub family: &'static str,
    pub tag: &'static str,
    /// Hugging Face GGUF repo used by llama.cpp.
    pub hf_repo: &'static str,
    pub quant: &'static str,
    /// Resident memory estimate at `quant`, including KV cache at default context.
    pub ram_gb: f64,
    pub context_length: u32,
    pub roles: &'static [Role],
    pub tiers: &'static [HardwareTier],
}

impl ModelCatalogEntry {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn eligible_for(&self, tier: HardwareTier) -> bool {
        self.tiers.contains(&tier)
    }

    pub fn is_chat(&self) -> bool {
        self.has_role(Role::Chat) || self.has_role(Role::Edit)
    }
}

const CHAT_EDIT: &[Role] = &[Role::Chat, Role::Edit];
const AUTOCOMPLETE: &[Role] = &[Role::Autocomplete];
const EMBED: &[Role] = &[Role::Embed];

static BUILTIN: &[ModelCatalogEntry] = &[
    ModelCatalogEntry {
        name: "Qwen3 Coder 30B A3B",
        family: "qwen3-coder",
        tag: "30b",
        hf_repo: "unsloth/Qwen3-Coder-30B-A3B-Instruct-GGUF",
        quant: "Q4_K_M",
        ram_gb: 18.0,
        context_length: 262_144,
        roles: CHAT_EDIT,
        tiers: &[S],
    },
    ModelCatalogEntry {
        name: "Devstral Small 24B",
        family: "devstral",
        tag: "24b",
        hf_repo: "unsloth/Devstral-Small-2507-GGUF",
        quant: "Q4_K_M",
        ram_gb: 14.0,
        context_length: 131_072,
        roles: CHAT_EDIT,
        tiers: &[S, A],
    },
    ModelCatalogEntry {
        name: "Qwen2.5 Coder 14B",
        family: "qwen2.5-coder",
        tag: "14b",
        hf_repo: "Qwen/Qwen2.5-Coder-14B-Instruct-GGUF",
        quant: "Q4_K_M",
        ram_gb: 9.0,
        context_length: 32_768,
        roles: CHAT_EDIT,
        tiers: &[S, A, B],
    },
    ModelCatalogEntry {
        name: "Qwen2.5 Coder 7B",
        family: "qwen2.5-coder",
        tag: "7b",
        hf_repo: "Qwen/Qwen2.5-Coder-7B-Instruct-GGUF",
        quant: "Q4_K_M",
        ram_gb: 4.7,
        context_length: 32_768,
        roles: CHAT_EDIT,
        tiers: &[A, B, C],
    },
    ModelCatalogEntry {
        name: "Qwen2.5 Coder 1.5B",
        family: "qwen2.5-coder",
        tag: "1.5b",
        hf_repo: "Qwen/Qwen2.5-Coder-1.5B-Instruct-GGUF",
        quant: "Q4_K_M",
        ram_gb: 1.0,
        context_length: 32_768,
        roles: AUTOCOMPLETE,
        tiers: &[S, A, B, C],
    },
    ModelCatalogEntry {
        name: "StarCoder2 3B",
        family: "starcoder2",
        tag: "3b",
        hf_repo: "second-state/StarCoder2-3B-GGUF",
        quant: "Q4_K_M",
        ram_gb: 1.7,
        context_length: 16_384,
        roles: AUTOCOMPLETE,
        tiers: &[S, A, B],
    },
    ModelCatalogEntry {
        name: "Qwen2.5 Coder 3B",
        family: "qwen2.5-coder",
        tag: "3b",
        hf_repo: "Qwen/Qwen2.5-Coder-3B-Instruct-GGUF",
        quant: "Q4_K_M",
        ram_gb: 1.9,
        context_length: 32_768,
        roles: AUTOCOMPLETE,
        tiers: &[S, A],
    },
    ModelCatalogEntry {
        name: "Nomic Embed Text v1.5",
        family: "nomic-embed-text",
        tag: "v1.5",
        hf_repo: "nomic-ai/nomic-embed-text-v1.5-GGUF",
        quant: "Q8_0",
        ram_gb: 0.3,
        context_length: 8_192,
        roles: EMBED,
        tiers: &[S, A, B, C],
    },
    ModelCatalogEntry {
        name: "mxbai Embed Large",
        family: "mxbai-embed-large",
        tag: "335m",
        hf_repo: "mixedbread-ai/mxbai-embed-large-v1",
        quant: "Q8_0",
        ram_gb: 0.7,
        context_length: 512,
        roles: EMBED,
        tiers: &[S, A],
    },
];

/// Read-only model table. The builtin table is process-wide constant data;
/// other instances exist only to exercise the selector against custom tables.
pub struct ModelCatalog {
    models: Vec<&'static ModelCatalogEntry>,
}

impl ModelCatalog {
    pub fn builtin() -> Self {
        Self::from_entries(BUILTIN)
    }

    pub fn from_entries(entries: &'static [ModelCatalogEntry]) -> Self {
        ModelCatalog {
            models: entries.iter().collect(),
        }
    }

    pub fn entries(&self) -> &[&'static ModelCatalogEntry] {
        &self.models
    }

    pub fn models_for_tier(&self, tier: HardwareTier) -> Vec<&'static ModelCatalogEntry> {
        self.models
            .iter()
            .copied()
            .filter(|m| m.eligible_for(tier))
            .collect()
    }

    pub fn models_for_role(&self, role: Role) -> Vec<&'static ModelCatalogEntry> {
        self.models
            .iter()
            .copied()
            .filter(|m| m.has_role(role))
            .collect()
    }

    /// Entries usable for `role` at `tier` on `backend`, in catalog order.
    /// Chat and edit are interchangeable for lookup purposes.
    pub fn candidates(
        &self,
        role: Role,
        tier: HardwareTier,
        backend: Backend,
    ) -> Vec<&'static ModelCatalogEntry> {
        self.models
            .iter()
            .copied()
            .filter(|m| match role {
                Role::Chat | Role::Edit => m.is_chat(),
                _ => m.has_role(role),
            })
            .filter(|m| m.eligible_for(tier))
            .filter(|m| !backend.is_denied(m))
            .collect()
    }

    pub fn find(&self, query: &str) -> Vec<&'static ModelCatalogEntry> {
        let query_lower = query.to_lowercase();
        self.models
            .iter()
            .copied()
            .filter(|m| {
                m.name.to_lowercase().contains(&query_lower)
                    || m.family.contains(&query_lower)
                    || m.hf_repo.to_lowercase().contains(&query_lower)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tier_has_chat_and_embed() {
        let catalog = ModelCatalog::builtin();
        for tier in HardwareTier::ALL {
            for backend in Backend::ALL {
                assert!(
                    !catalog.candidates(Role::Chat, tier, backend).is_empty(),
                    "no chat model for tier {tier} on {backend}"
                );
                assert!(!catalog.candidates(Role::Embed, tier, backend).is_empty());
                assert!(!catalog.candidates(Role::Autocomplete, tier, backend).is_empty());
            }
        }
    }

    #[test]
    fn test_models_for_tier() {
        let catalog = ModelCatalog::builtin();
        let c_tier = catalog.models_for_tier(HardwareTier::C);
        assert!(c_tier.iter().all(|m| m.eligible_for(HardwareTier::C)));
        assert!(c_tier.iter().any(|m| m.family == "nomic-embed-text"));
        assert!(!c_tier.iter().any(|m| m.family == "qwen3-coder"));
    }

    #[test]
    fn test_models_for_role() {
        let catalog = ModelCatalog::builtin();
        let embed = catalog.models_for_role(Role::Embed);
        assert_eq!(embed.len(), 2);
        assert!(embed.iter().all(|m| m.roles == EMBED));
    }

    #[test]
    fn test_deny_list_filters_after_lookup() {
        let catalog = ModelCatalog::builtin();
        let docker = catalog.candidates(Role::Autocomplete, HardwareTier::A, Backend::Docker);
        let ollama = catalog.candidates(Role::Autocomplete, HardwareTier::A, Backend::Ollama);
        assert!(!docker.iter().any(|m| m.family == "starcoder2"));
        assert!(ollama.iter().any(|m| m.family == "starcoder2"));
        assert_eq!(ollama.len(), docker.len() + 1);
    }

    #[test]
    fn test_find() {
        let catalog = ModelCatalog::builtin();
        assert_eq!(catalog.find("devstral").len(), 1);
        assert_eq!(catalog.find("QWEN2.5").len(), 4);
        assert!(catalog.find("gpt-oss").is_empty());
    }
}
