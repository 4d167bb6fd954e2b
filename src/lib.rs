//! Size local LLM backends to the machine and wire them into Continue.dev.

pub mod backend;
pub mod config;
pub mod continue_config;
pub mod display;
pub mod error;
pub mod hardware;
pub mod manifest;
pub mod models;
pub mod pull_error;
pub mod recommend;
pub mod runtime;
pub mod server;
pub mod setup;
pub mod tier;
pub mod uninstall;

pub use backend::Backend;
pub use config::SetupConfig;
pub use error::{Result, SetupError};
pub use hardware::{AppleChip, ChipVariant, HardwareInfo, detect_hardware};
pub use models::{ModelCatalog, ModelCatalogEntry, Role};
pub use pull_error::PullErrorKind;
pub use recommend::{ModelRecommendation, RecommendedModel, Recommender, recommend};
pub use runtime::{CliRuntime, ModelRuntime};
pub use server::LlamaServer;
pub use tier::{HardwareTier, TierPolicy, classify_tier, get_usable_ram};
