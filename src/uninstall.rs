//! Manifest-driven removal of what setup installed.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::continue_config::backup_path;
use crate::manifest::SetupManifest;
use crate::runtime::ModelRuntime;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeptModel {
    pub model: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UninstallPlan {
    pub models_to_remove: Vec<String>,
    pub models_kept: Vec<KeptModel>,
    pub files_to_remove: Vec<PathBuf>,
    /// Files that will be put back from their `.bak` copy instead of deleted.
    pub files_to_restore: Vec<PathBuf>,
}

impl UninstallPlan {
    pub fn from_manifest(manifest: &SetupManifest, keep_models: bool) -> Self {
        let safe = manifest.safe_to_remove();
        let mut models_to_remove = Vec::new();
        let mut models_kept = Vec::new();

        for model in &manifest.installed_models {
            if keep_models {
                models_kept.push(KeptModel {
                    model: model.clone(),
                    reason: "--keep-models".to_string(),
                });
            } else if safe.contains(model) {
                models_to_remove.push(model.clone());
            } else {
                models_kept.push(KeptModel {
                    model: model.clone(),
                    reason: "same base model was installed before setup".to_string(),
                });
            }
        }

        let mut files_to_remove = Vec::new();
        let mut files_to_restore = Vec::new();
        for path in manifest.created_files.iter().filter(|p| p.exists()) {
            if backup_path(path).exists() {
                files_to_restore.push(path.clone());
            } else {
                files_to_remove.push(path.clone());
            }
        }

        UninstallPlan {
            models_to_remove,
            models_kept,
            files_to_remove,
            files_to_restore,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.models_to_remove.is_empty()
            && self.files_to_remove.is_empty()
            && self.files_to_restore.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UninstallReport {
    pub removed_models: Vec<String>,
    pub removed_files: Vec<PathBuf>,
    pub restored_files: Vec<PathBuf>,
    /// `(item, error)` for every step that failed.
    pub errors: Vec<(String, String)>,
    pub dry_run: bool,
}

/// Carry out `plan`. Every step is best-effort; the manifest goes last and only
/// when nothing failed, so a failed run can be retried.
pub fn execute(
    plan: &UninstallPlan,
    runtime: &dyn ModelRuntime,
    manifest_path: &Path,
    dry_run: bool,
) -> UninstallReport {
    let mut report = UninstallReport {
        dry_run,
        ..Default::default()
    };

    for model in &plan.models_to_remove {
        if dry_run {
            report.removed_models.push(model.clone());
            continue;
        }
        match runtime.remove(model) {
            Ok(()) => report.removed_models.push(model.clone()),
            Err(e) => {
                warn!(model = %model, error = %e, "could not remove model");
                report.errors.push((model.clone(), e.to_string()));
            }
        }
    }

    for path in &plan.files_to_restore {
        if dry_run {
            report.restored_files.push(path.clone());
            continue;
        }
        let backup = backup_path(path);
        match fs::rename(&backup, path) {
            Ok(()) => report.restored_files.push(path.clone()),
            Err(e) => report
                .errors
                .push((path.display().to_string(), e.to_string())),
        }
    }

    for path in &plan.files_to_remove {
        if dry_run {
            report.removed_files.push(path.clone());
            continue;
        }
        match fs::remove_file(path) {
            Ok(()) => report.removed_files.push(path.clone()),
            Err(e) => report
                .errors
                .push((path.display().to_string(), e.to_string())),
        }
    }

    if !dry_run && report.errors.is_empty() {
        if let Err(e) = fs::remove_file(manifest_path) {
            report
                .errors
                .push((manifest_path.display().to_string(), e.to_string()));
        }
    }

    info!(
        models = report.removed_models.len(),
        files = report.removed_files.len() + report.restored_files.len(),
        errors = report.errors.len(),
        dry_run,
        "uninstall finished"
    );
    report
}
