//! Record of what setup created, used to drive a safe uninstall.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::Backend;
use crate::error::{Result, SetupError};

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupManifest {
    pub version: u32,
    pub backend: Backend,
    /// Unix seconds of the last setup run.
    pub created_at: u64,
    /// Models pulled by setup.
    #[serde(default)]
    pub installed_models: Vec<String>,
    /// Models that were already present before setup ran.
    #[serde(default)]
    pub pre_existing_models: Vec<String>,
    #[serde(default)]
    pub created_files: Vec<PathBuf>,
}

impl SetupManifest {
    pub fn new(backend: Backend) -> Self {
        SetupManifest {
            version: MANIFEST_VERSION,
            backend,
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            installed_models: Vec::new(),
            pre_existing_models: Vec::new(),
            created_files: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SetupError::ManifestNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Load the manifest if one exists, for merging into a repeat setup run.
    ///
    /// Switching backends is refused while models pulled through the old one
    /// are still recorded, since uninstall removes them through a single runtime.
    pub fn load_or_new(path: &Path, backend: Backend) -> Result<Self> {
        let mut manifest = match Self::load(path) {
            Ok(manifest) => manifest,
            Err(SetupError::ManifestNotFound(_)) => return Ok(Self::new(backend)),
            Err(e) => return Err(e),
        };

        if manifest.backend != backend {
            if !manifest.installed_models.is_empty() {
                return Err(SetupError::BackendMismatch {
                    recorded: manifest.backend,
                    requested: backend,
                });
            }
            debug!(from = %manifest.backend, to = %backend, "switching manifest backend");
            manifest.backend = backend;
            manifest.pre_existing_models.clear();
        }
        Ok(manifest)
    }

    /// Replace the manifest on disk in one step (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "saved manifest");
        Ok(())
    }

    /// Record a model found before pulling. Models an earlier run pulled stay ours.
    pub fn record_pre_existing(&mut self, model_id: &str) {
        if self.owns_model(model_id) {
            return;
        }
        push_unique(&mut self.pre_existing_models, model_id.to_string());
    }

    pub fn record_installed(&mut self, model_id: &str) {
        // A model that was already there stays owned by the user.
        if self.pre_existing_models.iter().any(|m| m == model_id) {
            return;
        }
        push_unique(&mut self.installed_models, model_id.to_string());
    }

    pub fn owns_model(&self, model_id: &str) -> bool {
        self.installed_models.iter().any(|m| m == model_id)
    }

    pub fn record_file(&mut self, path: &Path) {
        push_unique(&mut self.created_files, path.to_path_buf());
    }

    /// Installed models that do not overlap any pre-existing model.
    pub fn safe_to_remove(&self) -> Vec<String> {
        let protected: BTreeSet<BaseModelKey> = self
            .pre_existing_models
            .iter()
            .map(|m| base_model_key(m))
            .collect();

        self.installed_models
            .iter()
            .filter(|m| {
                let key = base_model_key(m);
                !protected.iter().any(|p| p.overlaps(&key))
            })
            .cloned()
            .collect()
    }
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

/// Model identity with registry prefix and tag decorations stripped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BaseModelKey {
    pub name: String,
    /// Size/variant part of the tag, `latest` when absent.
    pub core_tag: String,
}

impl BaseModelKey {
    pub fn overlaps(&self, other: &BaseModelKey) -> bool {
        self.name == other.name
            && (self.core_tag == other.core_tag
                || self.core_tag == "latest"
                || other.core_tag == "latest")
    }
}

/// `ai/CodeLlama:7b-instruct-q4` → `codellama` / `7b`.
pub fn base_model_key(model_id: &str) -> BaseModelKey {
    let lower = model_id.trim().to_lowercase();
    let stripped = ["ai/", "hf.co/", "docker.io/"]
        .iter()
        .find_map(|prefix| lower.strip_prefix(prefix))
        .unwrap_or(&lower);

    let (name, tag) = stripped.rsplit_once(':').unwrap_or((stripped, ""));
    let core = tag.split('-').next().unwrap_or("");
    let core_tag = if core.is_empty() { "latest" } else { core };

    BaseModelKey {
        name: name.to_string(),
        core_tag: core_tag.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_protects_retagged_model() {
        let mut manifest = SetupManifest::new(Backend::Ollama);
        manifest.record_pre_existing("codellama:7b");
        manifest.record_installed("codellama:7b-latest");
        manifest.record_installed("qwen2.5-coder:7b");

        assert_eq!(manifest.safe_to_remove(), vec!["qwen2.5-coder:7b".to_string()]);
    }

    #[test]
    fn test_different_size_is_not_protected() {
        let mut manifest = SetupManifest::new(Backend::Ollama);
        manifest.record_pre_existing("qwen2.5-coder:14b");
        manifest.record_installed("qwen2.5-coder:7b");
        assert_eq!(manifest.safe_to_remove(), vec!["qwen2.5-coder:7b".to_string()]);
    }

    #[test]
    fn test_latest_matches_any_tag() {
        let mut manifest = SetupManifest::new(Backend::Docker);
        manifest.record_pre_existing("ai/nomic-embed-text");
        manifest.record_installed("ai/nomic-embed-text:v1.5");
        assert!(manifest.safe_to_remove().is_empty());
    }

    #[test]
    fn test_pre_existing_never_recorded_as_installed() {
        let mut manifest = SetupManifest::new(Backend::Ollama);
        manifest.record_pre_existing("devstral:24b");
        manifest.record_installed("devstral:24b");
        manifest.record_installed("devstral:24b");
        assert!(manifest.installed_models.is_empty());
    }

    #[test]
    fn test_model_pulled_earlier_is_not_pre_existing() {
        let mut manifest = SetupManifest::new(Backend::Ollama);
        manifest.record_installed("qwen2.5-coder:7b");
        manifest.record_pre_existing("qwen2.5-coder:7b");
        manifest.record_pre_existing("codellama:7b");

        assert_eq!(manifest.pre_existing_models, vec!["codellama:7b"]);
        assert_eq!(manifest.safe_to_remove(), vec!["qwen2.5-coder:7b".to_string()]);
    }

    #[test]
    fn test_backend_switch_refused_while_models_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup-manifest.json");

        let mut manifest = SetupManifest::new(Backend::Ollama);
        manifest.record_installed("qwen2.5-coder:7b");
        manifest.save(&path).unwrap();

        let err = SetupManifest::load_or_new(&path, Backend::Docker).unwrap_err();
        assert!(matches!(
            err,
            SetupError::BackendMismatch {
                recorded: Backend::Ollama,
                requested: Backend::Docker
            }
        ));
        assert_eq!(
            SetupManifest::load_or_new(&path, Backend::Ollama).unwrap(),
            manifest
        );
    }

    #[test]
    fn test_backend_switch_allowed_without_models() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup-manifest.json");

        let mut manifest = SetupManifest::new(Backend::Ollama);
        manifest.record_pre_existing("codellama:7b");
        manifest.record_file(&dir.path().join("config.yaml"));
        manifest.save(&path).unwrap();

        let switched = SetupManifest::load_or_new(&path, Backend::LlamaCpp).unwrap();
        assert_eq!(switched.backend, Backend::LlamaCpp);
        assert!(switched.pre_existing_models.is_empty());
        assert_eq!(switched.created_files, manifest.created_files);
    }

    #[test]
    fn test_base_model_key() {
        assert_eq!(
            base_model_key("ai/CodeLlama:7b-instruct-q4"),
            BaseModelKey {
                name: "codellama".to_string(),
                core_tag: "7b".to_string()
            }
        );
        assert_eq!(base_model_key("nomic-embed-text").core_tag, "latest");
        assert_eq!(
            base_model_key("hf.co/Qwen/Qwen2.5-Coder-7B-Instruct-GGUF:Q4_K_M").name,
            "qwen/qwen2.5-coder-7b-instruct-gguf"
        );
    }

    #[test]
    fn test_save_and_load_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup-manifest.json");

        let mut manifest = SetupManifest::new(Backend::LlamaCpp);
        manifest.record_installed("Qwen/Qwen2.5-Coder-7B-Instruct-GGUF:Q4_K_M");
        manifest.record_file(&dir.path().join("config.yaml"));
        manifest.save(&path).unwrap();

        let loaded = SetupManifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);
        assert!(!path.with_extension("json.tmp").exists());

        let missing = SetupManifest::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, SetupError::ManifestNotFound(_)));
    }
}
