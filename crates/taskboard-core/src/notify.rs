use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;

/// Fire-and-forget side channel for human-readable events, such as a
/// recurring task spawning its next occurrence.
pub trait Notifier {
    fn notify(&self, message: &str);
}

/// Emits notifications as log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        info!(message, "notification");
    }
}

/// Hook scripts under `data_dir` unless `hooks` is off, in which case
/// notifications only reach the log.
pub fn notifier_for(cfg: &Config, data_dir: &Path) -> Box<dyn Notifier> {
    if cfg.get_bool("hooks").unwrap_or(true) {
        Box::new(HookNotifier::new(data_dir))
    } else {
        debug!("hooks disabled; notifications are logged only");
        Box::new(LogNotifier)
    }
}

/// Runs every executable `on-repeat.*` script in the hooks directory with the
/// message as its first argument and on stdin. Failures are logged.
#[derive(Debug, Clone)]
pub struct HookNotifier {
    hooks_dir: PathBuf,
}

impl HookNotifier {
    pub fn new(data_dir: &Path) -> Self {
        let hooks_dir = data_dir.join("hooks");
        debug!(hooks_dir = %hooks_dir.display(), "initialized hook notifier");
        Self { hooks_dir }
    }

    #[instrument(skip(self))]
    fn list_scripts(&self, event: &str) -> anyhow::Result<Vec<PathBuf>> {
        if !self.hooks_dir.exists() {
            return Ok(Vec::new());
        }

        let mut scripts = Vec::new();
        for entry in fs::read_dir(&self.hooks_dir)
            .with_context(|| format!("failed to read hooks dir {}", self.hooks_dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !name.starts_with(&format!("{event}.")) {
                continue;
            }

            if !is_executable(&path)? {
                debug!(path = %path.display(), "skipping non-executable hook");
                continue;
            }

            debug!(event, path = %path.display(), "selected hook script");
            scripts.push(path);
        }

        scripts.sort();
        Ok(scripts)
    }
}

impl Notifier for HookNotifier {
    fn notify(&self, message: &str) {
        info!(message, "notification");
        let scripts = match self.list_scripts("on-repeat") {
            Ok(scripts) => scripts,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed listing on-repeat hooks");
                return;
            }
        };

        for script in scripts {
            if let Err(err) = run_hook_with_message(&script, message) {
                warn!(hook = %script.display(), error = %format!("{err:#}"), "hook failed");
            }
        }
    }
}

fn run_hook_with_message(path: &Path, message: &str) -> anyhow::Result<()> {
    info!(hook = %path.display(), "running hook");
    let mut child = Command::new(path)
        .arg(message)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to run hook {}", path.display()))?;

    if let Some(mut stdin) = child.stdin.take() {
        writeln!(stdin, "{message}")?;
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("failed to wait for hook {}", path.display()))?;

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        return Err(anyhow!(
            "script {} failed with status {}: {stderr}",
            path.display(),
            output
                .status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ));
    }

    if !stderr.is_empty() {
        warn!(hook = %path.display(), stderr = %stderr, "hook wrote stderr");
    }

    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> anyhow::Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)?.permissions().mode();
    Ok(mode & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> anyhow::Result<bool> {
    Ok(path.is_file())
}
