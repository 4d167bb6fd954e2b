//! Chat, autocomplete and embedding picks for a tier and RAM budget.

use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::{Result, SetupError};
use crate::hardware::HardwareInfo;
use crate::models::{ModelCatalog, ModelCatalogEntry, Role};
use crate::tier::HardwareTier;

/// One selected model, with the identifier the backend knows it by.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendedModel {
    pub entry: &'static ModelCatalogEntry,
    pub model_id: String,
    pub role: Role,
}

impl RecommendedModel {
    fn new(entry: &'static ModelCatalogEntry, role: Role, backend: Backend) -> Self {
        RecommendedModel {
            entry,
            model_id: backend.model_id(entry),
            role,
        }
    }

    pub fn ram_gb(&self) -> f64 {
        self.entry.ram_gb
    }

    /// Context length to configure: the model limit capped by the tier.
    pub fn context_length(&self, tier: HardwareTier) -> u32 {
        self.entry.context_length.min(tier.context_cap())
    }
}

/// The portfolio chosen for one machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRecommendation {
    pub backend: Backend,
    pub tier: HardwareTier,
    pub budget_gb: f64,
    pub primary: Option<RecommendedModel>,
    pub autocomplete: Option<RecommendedModel>,
    pub embeddings: Option<RecommendedModel>,
    /// Set when the largest chat model did not fit and the smallest was used.
    pub conservative: bool,
}

impl ModelRecommendation {
    pub fn models(&self) -> impl Iterator<Item = &RecommendedModel> {
        [&self.primary, &self.autocomplete, &self.embeddings]
            .into_iter()
            .flatten()
    }

    pub fn total_ram(&self) -> f64 {
        self.models().map(RecommendedModel::ram_gb).sum()
    }

    pub fn fits_budget(&self) -> bool {
        self.total_ram() <= self.budget_gb
    }

    /// Chat is the one role callers cannot do without.
    pub fn require_primary(&self) -> Result<&RecommendedModel> {
        self.primary
            .as_ref()
            .ok_or(SetupError::NoChatModel(self.tier))
    }
}

pub struct Recommender<'a> {
    catalog: &'a ModelCatalog,
    backend: Backend,
}

impl<'a> Recommender<'a> {
    pub fn new(catalog: &'a ModelCatalog, backend: Backend) -> Self {
        Recommender { catalog, backend }
    }

    pub fn recommend(&self, hw: &HardwareInfo) -> ModelRecommendation {
        let policy = self.backend.tier_policy();
        let tier = policy.classify(hw.ram_gb, hw.apple_chip.as_ref());
        let budget_gb = policy.usable_ram(hw.ram_gb, tier);
        self.recommend_for_tier(tier, budget_gb)
    }

    pub fn recommend_for_tier(&self, tier: HardwareTier, budget_gb: f64) -> ModelRecommendation {
        let backend = self.backend;

        // Bigger chat model first; smallest autocomplete for keystroke latency.
        let mut chat = self.catalog.candidates(Role::Chat, tier, backend);
        chat.sort_by(|a, b| b.ram_gb.total_cmp(&a.ram_gb).then(a.name.cmp(b.name)));

        let mut autocomplete = self.catalog.candidates(Role::Autocomplete, tier, backend);
        autocomplete.sort_by(|a, b| a.ram_gb.total_cmp(&b.ram_gb).then(a.name.cmp(b.name)));

        let embed = self.catalog.candidates(Role::Embed, tier, backend);

        let mut rec = ModelRecommendation {
            backend,
            tier,
            budget_gb,
            primary: chat
                .first()
                .copied()
                .map(|e| RecommendedModel::new(e, Role::Chat, backend)),
            autocomplete: autocomplete
                .first()
                .copied()
                .map(|e| RecommendedModel::new(e, Role::Autocomplete, backend)),
            embeddings: embed
                .first()
                .copied()
                .map(|e| RecommendedModel::new(e, Role::Embed, backend)),
            conservative: false,
        };

        if !rec.fits_budget() {
            if let Some(&smallest) = chat.last() {
                debug!(
                    total_gb = rec.total_ram(),
                    budget_gb,
                    fallback = smallest.name,
                    "portfolio over budget, using conservative chat model"
                );
                rec.primary = Some(RecommendedModel::new(smallest, Role::Chat, backend));
                rec.conservative = true;
            }
            if !rec.fits_budget() {
                warn!(
                    total_gb = rec.total_ram(),
                    budget_gb, "conservative portfolio still exceeds the RAM budget"
                );
            }
        }

        rec
    }
}

/// Recommend from the builtin catalog.
pub fn recommend(hw: &HardwareInfo, backend: Backend) -> ModelRecommendation {
    let catalog = ModelCatalog::builtin();
    Recommender::new(&catalog, backend).recommend(hw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{AppleChip, ChipVariant};
    use crate::tier::HardwareTier::{A, B, C, S};

    fn test_hw(ram_gb: f64, apple_chip: Option<AppleChip>) -> HardwareInfo {
        HardwareInfo {
            ram_gb,
            cpu_brand: "Test CPU".to_string(),
            arch: "x86_64".to_string(),
            os: "linux".to_string(),
            physical_cores: 8,
            logical_cores: 16,
            apple_chip,
        }
    }

    #[test]
    fn test_linux_16gb_gets_entry_portfolio() {
        let rec = recommend(&test_hw(16.0, None), Backend::Docker);
        assert_eq!(rec.tier, C);
        assert!((rec.budget_gb - 9.6).abs() < 1e-9);
        assert_eq!(rec.primary.as_ref().unwrap().entry.name, "Qwen2.5 Coder 7B");
        assert_eq!(
            rec.autocomplete.as_ref().unwrap().entry.name,
            "Qwen2.5 Coder 1.5B"
        );
        assert!(rec.fits_budget());
        assert!(!rec.conservative);
    }

    #[test]
    fn test_m3_max_64gb_gets_largest_chat() {
        let chip = AppleChip {
            generation: 3,
            variant: ChipVariant::Max,
        };
        let rec = recommend(&test_hw(64.0, Some(chip)), Backend::Docker);
        assert_eq!(rec.tier, S);
        assert!((rec.budget_gb - 44.8).abs() < 1e-9);
        let primary = rec.primary.as_ref().unwrap();
        assert_eq!(primary.entry.name, "Qwen3 Coder 30B A3B");
        assert_eq!(primary.model_id, "ai/qwen3-coder:30b");
        assert_eq!(primary.context_length(rec.tier), 32_768);
    }

    #[test]
    fn test_fits_budget_at_every_tier_minimum() {
        for backend in Backend::ALL {
            let policy = backend.tier_policy();
            for ram in [16.0, policy.b_min_gb, policy.a_min_gb, policy.s_min_gb] {
                let rec = recommend(&test_hw(ram, None), backend);
                assert!(
                    rec.fits_budget(),
                    "{backend} at {ram} GB: {:.1} GB > {:.1} GB",
                    rec.total_ram(),
                    rec.budget_gb
                );
                assert!(rec.require_primary().is_ok());
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let hw = test_hw(36.0, None);
        for backend in Backend::ALL {
            assert_eq!(recommend(&hw, backend), recommend(&hw, backend));
        }
    }

    #[test]
    fn test_docker_never_recommends_denied_models() {
        for ram in [16.0, 24.0, 40.0, 96.0] {
            let rec = recommend(&test_hw(ram, None), Backend::Docker);
            assert!(rec.models().all(|m| m.entry.family != "starcoder2"));
        }
    }

    static TIGHT: &[ModelCatalogEntry] = &[
        ModelCatalogEntry {
            name: "Big",
            family: "big",
            tag: "70b",
            hf_repo: "test/big",
            quant: "Q4_K_M",
            ram_gb: 40.0,
            context_length: 8192,
            roles: &[Role::Chat, Role::Edit],
            tiers: &[S, A, B, C],
        },
        ModelCatalogEntry {
            name: "Small",
            family: "small",
            tag: "3b",
            hf_repo: "test/small",
            quant: "Q4_K_M",
            ram_gb: 2.0,
            context_length: 8192,
            roles: &[Role::Chat],
            tiers: &[S, A, B, C],
        },
        ModelCatalogEntry {
            name: "Embed",
            family: "embed",
            tag: "v1",
            hf_repo: "test/embed",
            quant: "Q8_0",
            ram_gb: 0.5,
            context_length: 512,
            roles: &[Role::Embed],
            tiers: &[S, A, B, C],
        },
    ];

    #[test]
    fn test_conservative_fallback_on_overflow() {
        let catalog = ModelCatalog::from_entries(TIGHT);
        let rec = Recommender::new(&catalog, Backend::Ollama).recommend_for_tier(B, 10.0);
        assert!(rec.conservative);
        assert_eq!(rec.primary.as_ref().unwrap().entry.name, "Small");
        assert!(rec.autocomplete.is_none());
        assert!((rec.total_ram() - 2.5).abs() < 1e-9);
        assert!(rec.fits_budget());
    }

    #[test]
    fn test_conservative_still_over_budget_is_reported() {
        let catalog = ModelCatalog::from_entries(TIGHT);
        let rec = Recommender::new(&catalog, Backend::Ollama).recommend_for_tier(C, 1.0);
        assert!(rec.conservative);
        assert!(!rec.fits_budget());
        assert!(rec.primary.is_some());
    }

    #[test]
    fn test_missing_chat_is_an_error() {
        static EMBED_ONLY: &[ModelCatalogEntry] = &[ModelCatalogEntry {
            name: "Embed",
            family: "embed",
            tag: "v1",
            hf_repo: "test/embed",
            quant: "Q8_0",
            ram_gb: 0.5,
            context_length: 512,
            roles: &[Role::Embed],
            tiers: &[S, A, B, C],
        }];
        let catalog = ModelCatalog::from_entries(EMBED_ONLY);
        let rec = Recommender::new(&catalog, Backend::Docker).recommend_for_tier(A, 20.0);
        assert!(rec.primary.is_none());
        assert!(rec.embeddings.is_some());
        assert!(matches!(rec.require_primary(), Err(SetupError::NoChatModel(A))));
    }
}
