//! Daemon process management
//!
//! PID and version files live under the runtime directory; `start` re-execs
//! the binary with the hidden `run-daemon` subcommand, and `stop` signals it.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use eyre::{Context, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Current version from git describe (set at compile time)
pub const VERSION: &str = env!("GIT_DESCRIBE");

/// How long `stop` waits for a graceful exit before SIGKILL
const STOP_GRACE: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(100);

fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("broadcastd")
}

/// Daemon process manager
#[derive(Debug)]
pub struct DaemonManager {
    pid_file: PathBuf,
    version_file: PathBuf,
}

/// Daemon status information
#[derive(Debug, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    /// Version the running daemon was built from
    pub version: Option<String>,
    pub pid_file: PathBuf,
}

impl Default for DaemonManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonManager {
    /// Manager over the default PID file location
    pub fn new() -> Self {
        Self::with_pid_file(runtime_dir().join("broadcastd.pid"))
    }

    /// Manager over a custom PID file; the version file sits beside it
    pub fn with_pid_file(pid_file: PathBuf) -> Self {
        debug!(?pid_file, "DaemonManager::with_pid_file: called");
        let version_file = pid_file.with_extension("version");
        Self { pid_file, version_file }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn is_running(&self) -> bool {
        self.running_pid().is_some()
    }

    /// PID of the daemon if its process is alive
    pub fn running_pid(&self) -> Option<u32> {
        let pid = read_trimmed(&self.pid_file)?.parse().ok()?;
        let alive = is_process_running(pid);
        debug!(pid, alive, "DaemonManager::running_pid: checked");
        alive.then_some(pid)
    }

    pub fn read_version(&self) -> Option<String> {
        read_trimmed(&self.version_file)
    }

    /// Whether the running daemon was built from the same version as this binary
    pub fn version_matches(&self) -> bool {
        let matches = self.read_version().is_some_and(|v| v == VERSION);
        debug!(matches, cli_version = VERSION, "DaemonManager::version_matches: checked");
        matches
    }

    pub fn status(&self) -> DaemonStatus {
        let pid = self.running_pid();
        DaemonStatus {
            running: pid.is_some(),
            pid,
            version: pid.and_then(|_| self.read_version()),
            pid_file: self.pid_file.clone(),
        }
    }

    /// Spawn a detached `run-daemon` process and return its PID
    pub fn start(&self, config_path: Option<&PathBuf>) -> Result<u32> {
        debug!(?config_path, "DaemonManager::start: called");
        if let Some(pid) = self.running_pid() {
            return Err(eyre::eyre!("Daemon already running with PID {}", pid));
        }

        let exe = std::env::current_exe().context("Failed to get current executable")?;
        let mut command = Command::new(&exe);
        if let Some(path) = config_path {
            command.arg("--config").arg(path);
        }
        let child = command
            .arg("run-daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn daemon process")?;

        let pid = child.id();
        write_file(&self.pid_file, &pid.to_string())?;
        info!(pid, "Daemon started");
        Ok(pid)
    }

    /// SIGTERM the daemon, escalating to SIGKILL after a grace period
    pub fn stop(&self) -> Result<u32> {
        debug!("DaemonManager::stop: called");
        let pid = self
            .running_pid()
            .ok_or_else(|| eyre::eyre!("Daemon is not running"))?;

        info!(pid, "Stopping daemon");
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).context("Failed to send SIGTERM")?;

        let mut waited = Duration::ZERO;
        while is_process_running(pid) && waited < STOP_GRACE {
            std::thread::sleep(STOP_POLL);
            waited += STOP_POLL;
        }

        if is_process_running(pid) {
            warn!(pid, "Daemon did not stop gracefully, sending SIGKILL");
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }

        self.unregister()?;
        info!(pid, ?waited, "Daemon stopped");
        Ok(pid)
    }

    /// Record the current process as the daemon
    pub fn register_self(&self) -> Result<()> {
        let pid = std::process::id();
        write_file(&self.pid_file, &pid.to_string())?;
        write_file(&self.version_file, VERSION)?;
        info!(pid, version = VERSION, "Daemon registered");
        Ok(())
    }

    /// Remove the PID and version files
    pub fn unregister(&self) -> Result<()> {
        debug!("DaemonManager::unregister: called");
        for path in [&self.pid_file, &self.version_file] {
            if path.exists() {
                fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    Some(contents.trim().to_string())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), "write_file: wrote");
    Ok(())
}

/// Signal 0 probes for the process without affecting it
fn is_process_running(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}
