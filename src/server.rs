//! Lifecycle of a background `llama-server` started by llmsetup.
//!
//! The server outlives the command that started it, so its pid is kept in a
//! file and its output goes to a log file next to the setup manifest.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessStatus, Signal, System};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::SetupConfig;
use crate::error::{Result, SetupError};

const SERVER_BINARY: &str = "llama-server";
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const STOP_GRACE: Duration = Duration::from_secs(5);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Manager for a detached llama-server process.
pub struct LlamaServer {
    binary: String,
    port: u16,
    pid_path: PathBuf,
    log_path: PathBuf,
}

impl LlamaServer {
    pub fn new(config: &SetupConfig) -> Self {
        Self {
            binary: SERVER_BINARY.to_string(),
            port: Backend::LlamaCpp.default_port(),
            pid_path: config.server_pid_path(),
            log_path: config.server_log_path(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Pid recorded by the last start, if the pid file is readable.
    pub fn pid(&self) -> Option<u32> {
        fs::read_to_string(&self.pid_path)
            .ok()
            .and_then(|text| text.trim().parse().ok())
    }

    pub fn is_running(&self) -> bool {
        let Some(pid) = self.pid() else {
            return false;
        };
        let mut sys = System::new();
        server_alive(&mut sys, Pid::from_u32(pid))
    }

    /// Spawn llama-server serving `model_id` (`<hf-repo>:<quant>`) in the background.
    pub fn start(&self, model_id: &str, context: u32) -> Result<Child> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        info!(model = model_id, port = self.port, context, "starting llama-server");

        let mut command = Command::new(&self.binary);
        command
            .arg("-hf")
            .arg(model_id)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(self.port.to_string())
            .arg("--ctx-size")
            .arg(context.to_string())
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log);
        // Keep Ctrl-C in this terminal from reaching the server.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SetupError::CommandNotFound(self.binary.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        fs::write(&self.pid_path, child.id().to_string())?;
        debug!(pid = child.id(), "llama-server process started");
        Ok(child)
    }

    /// Poll `/health` until the server answers, the process dies, or `timeout` passes.
    pub fn wait_ready(&self, child: &mut Child, timeout: Duration) -> Result<()> {
        let url = format!("http://127.0.0.1:{}/health", self.port);
        let agent = ureq::AgentBuilder::new().timeout(HEALTH_TIMEOUT).build();
        let start = Instant::now();

        while start.elapsed() < timeout {
            if let Some(status) = child.try_wait()? {
                let _ = fs::remove_file(&self.pid_path);
                return Err(SetupError::CommandFailed {
                    command: SERVER_BINARY.to_string(),
                    code: status.code(),
                    stderr: self.tail_log(5)?.join("\n"),
                });
            }
            if agent.get(&url).call().is_ok() {
                info!(port = self.port, "llama-server is ready");
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }

        Err(SetupError::Timeout {
            command: SERVER_BINARY.to_string(),
            timeout,
        })
    }

    /// Stop the recorded server. Returns whether a live process was stopped.
    pub fn stop(&self) -> Result<bool> {
        let Some(pid) = self.pid() else {
            return Ok(false);
        };
        let pid = Pid::from_u32(pid);
        let mut sys = System::new();

        let stopped = if server_alive(&mut sys, pid) {
            info!(%pid, "stopping llama-server");
            if let Some(process) = sys.process(pid) {
                if process.kill_with(Signal::Term).is_none() {
                    process.kill();
                }
            }

            let deadline = Instant::now() + STOP_GRACE;
            while server_alive(&mut sys, pid) && Instant::now() < deadline {
                thread::sleep(POLL_INTERVAL);
            }
            if server_alive(&mut sys, pid) {
                warn!(%pid, "llama-server did not exit, killing");
                if let Some(process) = sys.process(pid) {
                    process.kill();
                }
            }
            true
        } else {
            debug!(%pid, "stale pid file");
            false
        };

        match fs::remove_file(&self.pid_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(stopped)
    }

    pub fn restart(&self, model_id: &str, context: u32) -> Result<Child> {
        self.stop()?;
        self.start(model_id, context)
    }

    /// Last `lines` lines of the server log. Empty when nothing was logged yet.
    pub fn tail_log(&self, lines: usize) -> Result<Vec<String>> {
        let bytes = match fs::read(&self.log_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&bytes);
        let all: Vec<&str> = text.lines().collect();
        let skip = all.len().saturating_sub(lines);
        Ok(all[skip..].iter().map(|l| l.to_string()).collect())
    }
}

/// Live, non-zombie process whose name says llama-server. Guards against pid reuse.
fn server_alive(sys: &mut System, pid: Pid) -> bool {
    if !sys.refresh_process(pid) {
        return false;
    }
    sys.process(pid).is_some_and(|p| {
        p.status() != ProcessStatus::Zombie && p.name().contains("llama")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_in(dir: &Path) -> LlamaServer {
        let config = SetupConfig::builder().continue_dir(dir).build();
        LlamaServer::new(&config)
    }

    #[test]
    fn test_paths_and_port() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_in(dir.path()).with_port(9090);
        assert_eq!(server.port(), 9090);
        assert_eq!(server.log_path(), dir.path().join("llama-server.log"));
        assert_eq!(server.pid(), None);
        assert!(!server.is_running());
    }

    #[test]
    fn test_stop_without_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!server_in(dir.path()).stop().unwrap());
    }

    #[test]
    fn test_stale_pid_file_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("llama-server.pid");
        fs::write(&pid_path, "999999999").unwrap();

        let server = server_in(dir.path());
        assert_eq!(server.pid(), Some(999_999_999));
        assert!(!server.stop().unwrap());
        assert!(!pid_path.exists());
    }

    #[test]
    fn test_garbage_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("llama-server.pid"), "not a pid").unwrap();
        assert_eq!(server_in(dir.path()).pid(), None);
    }

    #[test]
    fn test_tail_log() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_in(dir.path());
        assert!(server.tail_log(10).unwrap().is_empty());

        let log: String = (1..=10).map(|i| format!("line {i}\n")).collect();
        fs::write(server.log_path(), log).unwrap();
        assert_eq!(server.tail_log(3).unwrap(), vec!["line 8", "line 9", "line 10"]);
        assert_eq!(server.tail_log(50).unwrap().len(), 10);
    }

    #[test]
    fn test_start_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_in(dir.path()).with_binary("llmsetup-no-such-server");
        let err = server
            .start("Qwen/Qwen2.5-Coder-7B-Instruct-GGUF:Q4_K_M", 4096)
            .unwrap_err();
        assert!(matches!(err, SetupError::CommandNotFound(_)));
        assert_eq!(server.pid(), None);
    }
}
