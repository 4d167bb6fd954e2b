//! Continue.dev configuration files generated from a recommendation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::{Result, SetupError};
use crate::hardware::HardwareInfo;
use crate::models::Role;
use crate::recommend::{ModelRecommendation, RecommendedModel};
use crate::tier::HardwareTier;

pub const CONFIG_YAML: &str = "config.yaml";
pub const CONFIG_JSON: &str = "config.json";
pub const GLOBAL_RULE: &str = "rules/global-rule.md";
pub const IGNORE_FILE: &str = ".continueignore";
pub const SUMMARY_FILE: &str = "setup-summary.json";

/// `config.yaml` (Continue.dev schema v1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinueConfig {
    pub name: String,
    pub version: String,
    pub schema: String,
    pub models: Vec<ModelConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ContextProvider>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub name: String,
    pub provider: String,
    pub model: String,
    pub api_base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextProvider {
    pub provider: String,
}

fn roles_for(role: Role) -> Vec<String> {
    let roles: &[&str] = match role {
        Role::Chat | Role::Edit => &["chat", "edit", "apply"],
        Role::Autocomplete => &["autocomplete"],
        Role::Embed => &["embed"],
    };
    roles.iter().map(|r| r.to_string()).collect()
}

impl ModelConfig {
    fn from_model(model: &RecommendedModel, backend: Backend, tier: HardwareTier) -> Self {
        ModelConfig {
            name: model.entry.name.to_string(),
            provider: backend.continue_provider().to_string(),
            model: model.model_id.clone(),
            api_base: backend.api_base(),
            context_length: match model.role {
                Role::Embed => None,
                _ => Some(model.context_length(tier)),
            },
            roles: roles_for(model.role),
        }
    }
}

impl ContinueConfig {
    pub fn from_recommendation(rec: &ModelRecommendation) -> Self {
        let models = rec
            .models()
            .map(|m| ModelConfig::from_model(m, rec.backend, rec.tier))
            .collect();

        let context = ["code", "docs", "diff", "terminal", "problems", "folder", "codebase"]
            .iter()
            .map(|p| ContextProvider {
                provider: p.to_string(),
            })
            .collect();

        ContinueConfig {
            name: format!("Local Assistant ({})", rec.backend),
            version: "1.0.0".to_string(),
            schema: "v1".to_string(),
            models,
            context,
        }
    }
}

/// Legacy `config.json` for Continue versions that predate `config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyConfig {
    pub models: Vec<LegacyModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_autocomplete_model: Option<LegacyModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings_provider: Option<LegacyModel>,
    pub allow_anonymous_telemetry: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyModel {
    pub title: String,
    pub provider: String,
    pub model: String,
    pub api_base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,
}

impl From<ModelConfig> for LegacyModel {
    fn from(m: ModelConfig) -> Self {
        LegacyModel {
            title: m.name,
            provider: m.provider,
            model: m.model,
            api_base: m.api_base,
            context_length: m.context_length,
        }
    }
}

impl LegacyConfig {
    pub fn from_recommendation(rec: &ModelRecommendation) -> Self {
        let convert = |m: &Option<RecommendedModel>| {
            m.as_ref()
                .map(|m| LegacyModel::from(ModelConfig::from_model(m, rec.backend, rec.tier)))
        };

        LegacyConfig {
            models: convert(&rec.primary).into_iter().collect(),
            tab_autocomplete_model: convert(&rec.autocomplete),
            embeddings_provider: convert(&rec.embeddings),
            allow_anonymous_telemetry: false,
        }
    }
}

/// `setup-summary.json`: what was chosen and why.
#[derive(Debug, Clone, Serialize)]
pub struct SetupSummary<'a> {
    pub backend: Backend,
    pub tier: HardwareTier,
    pub hardware: &'a HardwareInfo,
    pub budget_gb: f64,
    pub total_ram_gb: f64,
    pub conservative: bool,
    pub models: Vec<&'a str>,
}

fn global_rule(rec: &ModelRecommendation) -> String {
    let primary = rec
        .primary
        .as_ref()
        .map(|m| m.entry.name)
        .unwrap_or("a local model");
    format!(
        "---\n\
         name: Local model guidance\n\
         alwaysApply: true\n\
         ---\n\
         \n\
         You are running locally as {primary} on {backend} (hardware tier {tier}).\n\
         \n\
         - Keep answers focused on the code in context; the context window is {ctx} tokens.\n\
         - Prefer small, reviewable edits over whole-file rewrites.\n\
         - Say so when a task needs more context than is available instead of guessing.\n",
        backend = rec.backend,
        tier = rec.tier,
        ctx = rec.tier.context_cap(),
    )
}

const CONTINUE_IGNORE: &str = "\
# Generated by llmsetup
node_modules/
target/
dist/
build/
.venv/
__pycache__/
*.lock
*.min.js
*.map
*.log
.env
.env.*
*.pem
*.key
";

/// Path of the backup written before `path` is overwritten.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

/// Copy any existing file aside, write, and restore the copy if the write fails.
///
/// An existing `.bak` is never replaced: it holds the user's file from before
/// the first setup run, and a later run would otherwise back up its own output.
pub fn write_with_backup(path: &Path, contents: &str) -> Result<()> {
    write_file(path, contents, true)
}

fn write_file(path: &Path, contents: &str, backup_existing: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let backup = backup_path(path);
    let fresh_backup = if backup_existing && path.exists() && !backup.exists() {
        fs::copy(path, &backup)?;
        debug!(path = %path.display(), backup = %backup.display(), "backed up existing file");
        true
    } else {
        false
    };

    if let Err(source) = fs::write(path, contents) {
        if fresh_backup {
            if let Err(e) = fs::copy(&backup, path) {
                warn!(path = %path.display(), error = %e, "could not restore backup");
            }
        }
        return Err(SetupError::WriteFailed {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Write every Continue.dev file for `rec` under `dir`. Returns the paths written.
///
/// Files listed in `owned` were written by an earlier run and are overwritten
/// without a backup.
pub fn write_all(
    dir: &Path,
    rec: &ModelRecommendation,
    hw: &HardwareInfo,
    owned: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    let yaml = serde_yaml::to_string(&ContinueConfig::from_recommendation(rec))?;
    let json = serde_json::to_string_pretty(&LegacyConfig::from_recommendation(rec))?;
    let summary = serde_json::to_string_pretty(&SetupSummary {
        backend: rec.backend,
        tier: rec.tier,
        hardware: hw,
        budget_gb: rec.budget_gb,
        total_ram_gb: rec.total_ram(),
        conservative: rec.conservative,
        models: rec.models().map(|m| m.model_id.as_str()).collect(),
    })?;

    let files = [
        (CONFIG_YAML, yaml),
        (CONFIG_JSON, json),
        (GLOBAL_RULE, global_rule(rec)),
        (IGNORE_FILE, CONTINUE_IGNORE.to_string()),
        (SUMMARY_FILE, summary),
    ];

    let mut written = Vec::with_capacity(files.len());
    for (name, contents) in files {
        let path = dir.join(name);
        write_file(&path, &contents, !owned.contains(&path))?;
        written.push(path);
    }
    Ok(written)
}

pub fn load_yaml(path: &Path) -> Result<ContinueConfig> {
    let text = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommend::recommend;

    fn test_hw(ram_gb: f64) -> HardwareInfo {
        HardwareInfo {
            ram_gb,
            cpu_brand: "Test CPU".to_string(),
            arch: "x86_64".to_string(),
            os: "linux".to_string(),
            physical_cores: 8,
            logical_cores: 16,
            apple_chip: None,
        }
    }

    #[test]
    fn test_yaml_round_trip_matches_recommendation() {
        let dir = tempfile::tempdir().unwrap();
        let hw = test_hw(32.0);

        for backend in Backend::ALL {
            let rec = recommend(&hw, backend);
            write_all(dir.path(), &rec, &hw, &[]).unwrap();

            let config = load_yaml(&dir.path().join(CONFIG_YAML)).unwrap();
            let expected: Vec<&RecommendedModel> = rec.models().collect();
            assert_eq!(config.models.len(), expected.len());
            for (written, model) in config.models.iter().zip(expected) {
                assert_eq!(written.model, model.model_id);
                assert_eq!(written.api_base, backend.api_base());
                assert_eq!(written.provider, backend.continue_provider());
            }
        }
    }

    #[test]
    fn test_yaml_uses_camel_case_keys() {
        let rec = recommend(&test_hw(16.0), Backend::Docker);
        let yaml = serde_yaml::to_string(&ContinueConfig::from_recommendation(&rec)).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        let first = &value["models"][0];
        assert_eq!(first["apiBase"].as_str(), Some("http://localhost:12434/engines/v1"));
        assert_eq!(first["contextLength"].as_u64(), Some(4096));
        assert!(first.get("api_base").is_none());
        assert_eq!(value["schema"].as_str(), Some("v1"));
    }

    #[test]
    fn test_legacy_config_slots() {
        let rec = recommend(&test_hw(64.0), Backend::Ollama);
        let legacy = LegacyConfig::from_recommendation(&rec);
        assert_eq!(legacy.models.len(), 1);
        assert_eq!(legacy.models[0].api_base, "http://localhost:11434");
        assert!(legacy.tab_autocomplete_model.is_some());
        assert!(legacy.embeddings_provider.as_ref().unwrap().context_length.is_none());

        let json = serde_json::to_value(&legacy).unwrap();
        assert!(json.get("tabAutocompleteModel").is_some());
    }

    #[test]
    fn test_overwrite_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_YAML);
        fs::write(&path, "old: true\n").unwrap();

        write_with_backup(&path, "new: true\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new: true\n");
        assert_eq!(
            fs::read_to_string(dir.path().join("config.yaml.bak")).unwrap(),
            "old: true\n"
        );
    }

    #[test]
    fn test_existing_backup_is_never_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_YAML);
        fs::write(&path, "user: original\n").unwrap();

        write_with_backup(&path, "first: run\n").unwrap();
        write_with_backup(&path, "second: run\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second: run\n");
        assert_eq!(
            fs::read_to_string(backup_path(&path)).unwrap(),
            "user: original\n"
        );
    }

    #[test]
    fn test_owned_files_are_not_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let hw = test_hw(16.0);
        let rec = recommend(&hw, Backend::Ollama);

        let first = write_all(dir.path(), &rec, &hw, &[]).unwrap();
        let second = write_all(dir.path(), &rec, &hw, &first).unwrap();

        assert_eq!(first, second);
        assert!(second.iter().all(|p| !backup_path(p).exists()));
    }

    #[test]
    fn test_write_all_creates_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let hw = test_hw(24.0);
        let rec = recommend(&hw, Backend::LlamaCpp);
        let written = write_all(dir.path(), &rec, &hw, &[]).unwrap();

        assert_eq!(written.len(), 5);
        assert!(written.iter().all(|p| p.exists()));
        let rule = fs::read_to_string(dir.path().join(GLOBAL_RULE)).unwrap();
        assert!(rule.contains("llama.cpp"));
    }
}
