//! Backend runtimes driven through their CLIs.
//!
//! Every external call goes through [`run_command`], which enforces a timeout
//! and escalates from SIGTERM to SIGKILL when a process overstays it.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::SetupConfig;
use crate::error::{Result, SetupError};
use crate::pull_error::PullErrorKind;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const TERM_GRACE: Duration = Duration::from_secs(2);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run `program` with `args`, killing it if it runs longer than `timeout`.
pub fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    let command_line = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    debug!(command = %command_line, ?timeout, "running");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Own process group, so a timeout also reaches helpers the CLI spawned.
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut command, 0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SetupError::CommandNotFound(program.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if start.elapsed() >= timeout {
            terminate(&mut child);
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    // After a kill, a surviving grandchild may still hold the pipes open.
    let drain_limit = if status.is_some() { None } else { Some(TERM_GRACE) };
    let stdout = collect(stdout, drain_limit);
    let stderr = collect(stderr, drain_limit);

    match status {
        Some(status) => {
            debug!(command = %command_line, code = ?status.code(), "finished");
            Ok(CommandOutput {
                code: status.code(),
                stdout,
                stderr,
            })
        }
        None => Err(SetupError::Timeout {
            command: command_line,
            timeout,
        }),
    }
}

/// Like [`run_command`] but maps a non-zero exit to [`SetupError::CommandFailed`].
pub fn run_checked(program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    let output = run_command(program, args, timeout)?;
    if output.success() {
        Ok(output)
    } else {
        Err(SetupError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>, limit: Option<Duration>) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    if let Some(limit) = limit {
        let deadline = Instant::now() + limit;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                debug!("output pipe still open, leaving reader behind");
                return String::new();
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
    handle.join().unwrap_or_default()
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        debug!(pid = child.id(), "sending SIGTERM to process group");
        unsafe {
            libc::kill(-(child.id() as i32), libc::SIGTERM);
        }
        let deadline = Instant::now() + TERM_GRACE;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    warn!(pid = child.id(), "process did not exit, killing");
    #[cfg(unix)]
    unsafe {
        libc::kill(-(child.id() as i32), libc::SIGKILL);
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// A local model-serving backend that can list, pull and remove models.
pub trait ModelRuntime {
    fn backend(&self) -> Backend;

    /// Whether the backend CLI is present.
    fn is_installed(&self) -> bool;

    /// Whether the OpenAI-compatible server answers.
    fn is_running(&self) -> bool;

    /// Identifiers of models already present locally.
    fn installed_models(&self) -> Result<Vec<String>>;

    fn pull(&self, model_id: &str) -> Result<()>;

    fn remove(&self, model_id: &str) -> Result<()>;
}

/// [`ModelRuntime`] backed by the `docker`, `ollama` or llama.cpp/`hf` CLIs.
pub struct CliRuntime {
    backend: Backend,
    command_timeout: Duration,
    pull_timeout: Duration,
}

impl CliRuntime {
    pub fn new(backend: Backend, config: &SetupConfig) -> Self {
        CliRuntime {
            backend,
            command_timeout: config.command_timeout,
            pull_timeout: config.pull_timeout,
        }
    }
}

impl ModelRuntime for CliRuntime {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn is_installed(&self) -> bool {
        let args: &[&str] = match self.backend {
            Backend::Docker => &["model", "version"],
            Backend::Ollama | Backend::LlamaCpp => &["--version"],
        };
        match run_command(self.backend.cli(), args, self.command_timeout) {
            Ok(output) => output.success(),
            Err(e) => {
                debug!(backend = %self.backend, error = %e, "install check failed");
                false
            }
        }
    }

    fn is_running(&self) -> bool {
        let agent = ureq::AgentBuilder::new().timeout(PROBE_TIMEOUT).build();
        agent.get(&self.backend.models_url()).call().is_ok()
    }

    fn installed_models(&self) -> Result<Vec<String>> {
        let text = match self.backend {
            Backend::Docker => {
                run_checked("docker", &["model", "ls"], self.command_timeout)?.stdout
            }
            Backend::Ollama => run_checked("ollama", &["list"], self.command_timeout)?.stdout,
            Backend::LlamaCpp => return scan_hf_cache(&hf_cache_dir()?),
        };
        Ok(parse_model_table(&text))
    }

    fn pull(&self, model_id: &str) -> Result<()> {
        info!(backend = %self.backend, model = model_id, "pulling model");
        match self.backend {
            Backend::Docker => {
                run_checked("docker", &["model", "pull", model_id], self.pull_timeout)?;
            }
            Backend::Ollama => {
                run_checked("ollama", &["pull", model_id], self.pull_timeout)?;
            }
            Backend::LlamaCpp => {
                let (repo, quant) = model_id.split_once(':').unwrap_or((model_id, "Q4_K_M"));
                // Repos differ in the case of the quant in file names.
                let upper = format!("*{}*.gguf", quant.to_uppercase());
                let lower = format!("*{}*.gguf", quant.to_lowercase());
                run_checked(
                    "hf",
                    &["download", repo, "--include", &upper, &lower],
                    self.pull_timeout,
                )?;
            }
        }
        Ok(())
    }

    fn remove(&self, model_id: &str) -> Result<()> {
        info!(backend = %self.backend, model = model_id, "removing model");
        match self.backend {
            Backend::Docker => {
                run_checked("docker", &["model", "rm", model_id], self.command_timeout)?;
            }
            Backend::Ollama => {
                run_checked("ollama", &["rm", model_id], self.command_timeout)?;
            }
            Backend::LlamaCpp => remove_cached_quant(&hf_cache_dir()?, model_id)?,
        }
        Ok(())
    }
}

fn hf_cache_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("HF_HOME") {
        return Ok(PathBuf::from(home).join("hub"));
    }
    dirs::home_dir()
        .map(|home| home.join(".cache").join("huggingface").join("hub"))
        .ok_or(SetupError::NoHomeDir)
}

/// `<repo>:<QUANT>` for every GGUF file in the Hugging Face hub cache, the same
/// form [`Backend::model_id`] produces for llama.cpp.
pub fn scan_hf_cache(hub: &Path) -> Result<Vec<String>> {
    if !hub.is_dir() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::new();
    for entry in fs::read_dir(hub)? {
        let entry = entry?;
        let Some(repo) = entry.file_name().to_str().and_then(repo_from_cache_dir) else {
            continue;
        };
        for file in snapshot_ggufs(&entry.path())? {
            if let Some(quant) = file.file_name().and_then(|n| n.to_str()).and_then(gguf_quant) {
                let id = format!("{repo}:{quant}");
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
    ids.sort();
    debug!(hub = %hub.display(), count = ids.len(), "scanned hf cache");
    Ok(ids)
}

/// Delete the files of one quantization. The repo directory goes only when no
/// other GGUF is left in it.
pub fn remove_cached_quant(hub: &Path, model_id: &str) -> Result<()> {
    let (repo, quant) = model_id.split_once(':').unwrap_or((model_id, ""));
    let repo_dir = hub.join(format!("models--{}", repo.replace('/', "--")));
    let quant = quant.to_uppercase();

    let mut remaining = 0;
    for file in snapshot_ggufs(&repo_dir)? {
        let file_quant = file.file_name().and_then(|n| n.to_str()).and_then(gguf_quant);
        if !quant.is_empty() && file_quant.as_deref() != Some(quant.as_str()) {
            remaining += 1;
            continue;
        }
        // Snapshot entries are symlinks into blobs/.
        let target = fs::canonicalize(&file).ok();
        fs::remove_file(&file)?;
        if let Some(target) = target.filter(|t| t.exists()) {
            fs::remove_file(&target)?;
        }
        debug!(file = %file.display(), "removed cached gguf");
    }

    if remaining == 0 && repo_dir.exists() {
        fs::remove_dir_all(&repo_dir)?;
    }
    Ok(())
}

/// `models--Qwen--Qwen2.5-Coder-7B-Instruct-GGUF` → `Qwen/Qwen2.5-Coder-7B-Instruct-GGUF`.
fn repo_from_cache_dir(name: &str) -> Option<String> {
    name.strip_prefix("models--")
        .filter(|rest| !rest.is_empty())
        .map(|rest| rest.replace("--", "/"))
}

fn snapshot_ggufs(repo_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let snapshots = repo_dir.join("snapshots");
    if snapshots.is_dir() {
        collect_ggufs(&snapshots, &mut files)?;
    }
    Ok(files)
}

fn collect_ggufs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_ggufs(&path, out)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"))
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Quantization named in a GGUF file name: `qwen2.5-coder-7b-instruct-q4_k_m.gguf` → `Q4_K_M`.
pub fn gguf_quant(file_name: &str) -> Option<String> {
    let stem = file_name.get(..file_name.len().checked_sub(5)?)?;
    if !file_name[stem.len()..].eq_ignore_ascii_case(".gguf") {
        return None;
    }
    stem.rsplit(['-', '.'])
        .find(|part| is_quant_token(part))
        .map(str::to_uppercase)
}

fn is_quant_token(part: &str) -> bool {
    let lower = part.to_ascii_lowercase();
    if matches!(lower.as_str(), "f16" | "bf16" | "f32") {
        return true;
    }
    lower
        .strip_prefix("iq")
        .or_else(|| lower.strip_prefix('q'))
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
}

/// First column of `docker model ls` / `ollama list` output, header skipped.
pub fn parse_model_table(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let upper = line.to_uppercase();
            !(upper == *line && upper.contains("NAME"))
        })
        .filter_map(|line| line.split_whitespace().next())
        .map(|name| name.to_string())
        .collect()
}

/// Pull with exponential backoff. Stops early on errors that retrying cannot fix.
pub fn pull_with_retry(
    runtime: &dyn ModelRuntime,
    model_id: &str,
    attempts: u32,
    backoff: Duration,
) -> Result<u32> {
    let attempts = attempts.max(1);
    let mut delay = backoff;

    for attempt in 1..=attempts {
        let err = match runtime.pull(model_id) {
            Ok(()) => return Ok(attempt),
            Err(e @ SetupError::CommandNotFound(_)) => return Err(e),
            Err(e) => e,
        };

        let (kind, message) = match &err {
            SetupError::CommandFailed { stderr, .. } => {
                (PullErrorKind::classify(stderr), stderr.clone())
            }
            SetupError::Timeout { .. } => (PullErrorKind::Network, err.to_string()),
            other => (PullErrorKind::classify(&other.to_string()), other.to_string()),
        };

        warn!(
            model = model_id,
            attempt,
            attempts,
            %kind,
            "pull failed"
        );

        if !kind.is_retryable() || attempt == attempts {
            return Err(SetupError::PullFailed {
                model: model_id.to_string(),
                kind,
                message,
            });
        }

        thread::sleep(delay);
        delay = delay.saturating_mul(2);
    }

    unreachable!("loop returns on the last attempt")
}
