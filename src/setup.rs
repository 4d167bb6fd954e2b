//! One non-interactive setup run: detect, recommend, pull, configure, record.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::config::SetupConfig;
use crate::continue_config;
use crate::error::{Result, SetupError};
use crate::hardware::HardwareInfo;
use crate::manifest::SetupManifest;
use crate::models::Role;
use crate::pull_error::PullErrorKind;
use crate::recommend::{ModelRecommendation, recommend};
use crate::runtime::{ModelRuntime, pull_with_retry};

#[derive(Debug, Clone, Copy)]
pub struct SetupOptions {
    pub backend: Backend,
    pub skip_models: bool,
    pub skip_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SetupOutcome {
    Complete,
    Partial,
    Failed,
}

impl fmt::Display for SetupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SetupOutcome::Complete => "complete",
            SetupOutcome::Partial => "partial success",
            SetupOutcome::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedPull {
    pub model: String,
    pub role: Role,
    pub kind: PullErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupReport {
    pub recommendation: ModelRecommendation,
    pub pulled: Vec<String>,
    pub already_present: Vec<String>,
    pub failed: Vec<FailedPull>,
    pub files: Vec<PathBuf>,
    pub models_skipped: bool,
}

impl SetupReport {
    fn role_ok(&self, role: Role) -> bool {
        let Some(model) = self
            .recommendation
            .models()
            .find(|m| m.role == role)
        else {
            return false;
        };
        !self.failed.iter().any(|f| f.model == model.model_id)
    }

    /// Features that work after this run, as `(feature, usable)` pairs.
    pub fn usable_features(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("chat / edit", self.role_ok(Role::Chat)),
            ("autocomplete", self.role_ok(Role::Autocomplete)),
            ("codebase embeddings", self.role_ok(Role::Embed)),
        ]
    }

    pub fn outcome(&self) -> SetupOutcome {
        if !self.role_ok(Role::Chat) {
            SetupOutcome::Failed
        } else if self.failed.is_empty() {
            SetupOutcome::Complete
        } else {
            SetupOutcome::Partial
        }
    }
}

/// Make sure the backend CLI exists and its server answers.
pub fn check_runtime(runtime: &dyn ModelRuntime) -> Result<()> {
    let backend = runtime.backend();
    if !runtime.is_installed() {
        return Err(SetupError::CommandNotFound(backend.cli().to_string()));
    }
    if !runtime.is_running() {
        return Err(SetupError::DaemonNotRunning {
            backend: backend.to_string(),
            url: backend.models_url(),
        });
    }
    Ok(())
}

pub fn run_setup(
    config: &SetupConfig,
    options: SetupOptions,
    hw: &HardwareInfo,
    runtime: &dyn ModelRuntime,
) -> Result<SetupReport> {
    let rec = recommend(hw, options.backend);
    rec.require_primary()?;
    if !rec.fits_budget() {
        warn!(
            total_gb = rec.total_ram(),
            budget_gb = rec.budget_gb,
            "recommended models exceed the RAM budget"
        );
    }

    let manifest_path = config.manifest_path();
    let mut manifest = SetupManifest::load_or_new(&manifest_path, options.backend)?;

    let mut report = SetupReport {
        recommendation: rec.clone(),
        pulled: Vec::new(),
        already_present: Vec::new(),
        failed: Vec::new(),
        files: Vec::new(),
        models_skipped: options.skip_models,
    };

    if !options.skip_models {
        check_runtime(runtime)?;
        let installed = runtime.installed_models()?;

        for model in rec.models() {
            if installed.iter().any(|m| m == &model.model_id) {
                manifest.record_pre_existing(&model.model_id);
                report.already_present.push(model.model_id.clone());
                continue;
            }

            match pull_with_retry(
                runtime,
                &model.model_id,
                config.pull_attempts,
                config.pull_backoff,
            ) {
                Ok(_) => {
                    manifest.record_installed(&model.model_id);
                    manifest.save(&manifest_path)?;
                    report.pulled.push(model.model_id.clone());
                }
                Err(SetupError::PullFailed {
                    model: id,
                    kind,
                    message,
                }) => report.failed.push(FailedPull {
                    model: id,
                    role: model.role,
                    kind,
                    message,
                }),
                Err(e) => return Err(e),
            }
        }
    }

    if !options.skip_config {
        let files = continue_config::write_all(
            &config.continue_dir,
            &rec,
            hw,
            &manifest.created_files,
        )?;
        for path in &files {
            manifest.record_file(path);
        }
        report.files = files;
    }

    manifest.save(&manifest_path)?;
    info!(outcome = %report.outcome(), "setup finished");
    Ok(report)
}
