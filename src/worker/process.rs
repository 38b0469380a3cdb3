//! Child-process transport for the automation worker.
//!
//! Each invocation spawns `<program> <args...> <mode> [flags] [targets...]`,
//! overlays credentials and behaviour flags on the inherited environment, and
//! waits for exit under a hard timeout. On unix the worker leads its own
//! process group, and the whole group (browser processes included) is killed
//! if the wait is abandoned, whether through the timeout or because the caller
//! was dropped.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use super::WorkerBridge;
use super::extract::extract_json;
use crate::config::Settings;
use crate::error::BridgeError;
use crate::models::{WorkerInvocation, env_keys};
use crate::utils::truncate_for_log;

/// Spawns the worker as a child process, once per invocation.
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessWorker {
    /// Build a worker transport.
    ///
    /// # Arguments
    ///
    /// * `program` - Interpreter or executable to run, e.g. `node`
    /// * `args` - Arguments placed before the invocation's own, e.g. the script path
    /// * `timeout` - Upper bound on a single invocation; the process is killed after it
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.worker_program.clone(),
            settings.worker_args.clone(),
            settings.timeout(),
        )
    }

    /// The executable this worker launches.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Check that the worker runtime can be started at all.
    ///
    /// Runs `<program> --version` and returns the reported version. A
    /// [`BridgeError::Spawn`] here means the executable is missing, which is
    /// the one worker failure that ends a run before it starts.
    #[instrument(level = "info", skip_all, fields(program = %self.program))]
    pub async fn preflight(&self, limit: Duration) -> Result<String, BridgeError> {
        let child = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let output = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| BridgeError::Timeout(limit))??;

        if !output.status.success() {
            return Err(BridgeError::Exit {
                code: output.status.code(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(%version, "Worker runtime available");
        Ok(version)
    }

    fn command(&self, invocation: &WorkerInvocation) -> Command {
        let vars = invocation.env.vars();
        let mut base = std::process::Command::new(&self.program);
        base.args(&self.args).args(invocation.args());
        for key in [env_keys::TWOCAPTCHA, env_keys::GEMINI] {
            if !vars.iter().any(|(k, _)| *k == key) {
                base.env_remove(key);
            }
        }
        base.envs(vars).stdout(Stdio::piped()).stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            base.process_group(0);
        }

        let mut cmd = Command::from(base);
        cmd.kill_on_drop(true);
        cmd
    }

    fn describe(&self, invocation: &WorkerInvocation) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(str::to_string)
            .chain(invocation.args())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Kills the worker's process group on drop unless disarmed.
///
/// `kill_on_drop` only reaches the direct child; the browsers a worker
/// launches live in the same group and would otherwise outlive it.
struct GroupKill(Option<u32>);

impl GroupKill {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.0.take() {
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;

            match i32::try_from(pid) {
                Ok(pgid) => {
                    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                        debug!(pgid, error = %e, "Worker process group already gone");
                    } else {
                        debug!(pgid, "Killed worker process group");
                    }
                }
                Err(_) => warn!(pid, "Worker pid out of range; process group not killed"),
            }
        }
    }
}

/// Pull the `error` message out of a failed worker's output, if it left one.
fn reported_error(stderr: &str, stdout: &str) -> Option<String> {
    [stderr, stdout]
        .into_iter()
        .filter_map(extract_json)
        .find_map(|payload| {
            payload.get("error").map(|e| match e {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        })
}

impl WorkerBridge for ProcessWorker {
    #[instrument(level = "info", skip_all, fields(mode = invocation.mode.as_arg(), targets = invocation.targets.len()))]
    async fn invoke(&self, invocation: &WorkerInvocation) -> Result<Value, BridgeError> {
        debug!(command = %self.describe(invocation), env = ?invocation.env, "Launching worker");
        let t0 = Instant::now();

        let child = self
            .command(invocation)
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let mut group = GroupKill(child.id());
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(waited) => {
                group.disarm();
                waited?
            }
            Err(_) => {
                error!(timeout_secs = self.timeout.as_secs(), "Worker timed out and was killed");
                return Err(BridgeError::Timeout(self.timeout));
            }
        };
        let elapsed_ms = t0.elapsed().as_millis();

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(stderr = %truncate_for_log(stderr.trim(), 500), "Worker stderr");
        }

        if !output.status.success() {
            let code = output.status.code();
            let reported = reported_error(&stderr, &stdout);
            error!(
                ?code,
                elapsed_ms,
                stderr = %truncate_for_log(stderr.trim(), 500),
                "Worker exited with failure"
            );
            if let Some(message) = &reported {
                error!(error = %message, "Worker reported error");
            }
            return Err(BridgeError::Exit {
                code,
                detail: reported.unwrap_or_else(|| truncate_for_log(stderr.trim(), 300)),
            });
        }

        if stdout.trim().is_empty() {
            warn!(elapsed_ms, "No output from worker");
            return Err(BridgeError::NoOutput);
        }

        match extract_json(&stdout) {
            Some(payload) => {
                debug!(elapsed_ms, "Worker returned JSON payload");
                Ok(payload)
            }
            None => {
                error!(elapsed_ms, "Failed to parse JSON from worker output");
                debug!(raw = %truncate_for_log(stdout.trim(), 500), "Raw worker output");
                Err(BridgeError::NoJson {
                    preview: truncate_for_log(stdout.trim(), 200),
                })
            }
        }
    }
}
