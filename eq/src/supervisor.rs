//! Process supervisor - launches and stops module processes
//!
//! A module's process is started as
//! `[launcher] <package> <executable> <equipletId> <moduleId>`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::domain::{Bootstrap, ModuleId};
use crate::error::{CoordError, CoordResult};

/// Fully rendered command line for one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapCommand {
    pub module_id: ModuleId,
    pub program: String,
    pub args: Vec<String>,
}

impl BootstrapCommand {
    pub fn new(launcher: Option<&str>, bootstrap: &Bootstrap, equiplet_id: u32, module_id: ModuleId) -> Self {
        let mut words: Vec<String> = launcher
            .map(|l| l.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        words.push(bootstrap.package.clone());
        words.push(bootstrap.executable.clone());
        words.push(equiplet_id.to_string());
        words.push(module_id.to_string());

        let program = words.remove(0);
        Self {
            module_id,
            program,
            args: words,
        }
    }

    pub fn render(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A started module process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub module_id: ModuleId,
    pub pid: Option<u32>,
}

#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Command prefixed to every launch
    fn launcher(&self) -> Option<&str> {
        None
    }

    /// Start the module's process
    async fn start(&self, command: &BootstrapCommand) -> CoordResult<ProcessHandle>;

    /// Stop the module's process; returns false if nothing was running for it
    async fn stop(&self, module_id: ModuleId) -> CoordResult<bool>;
}

/// Supervisor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Command prefixed to every launch, e.g. `rosrun`
    #[serde(default)]
    pub launcher: Option<String>,

    /// How long a fresh process must survive before the launch counts as good
    #[serde(default = "default_startup_grace_ms", rename = "startup-grace-ms")]
    pub startup_grace_ms: u64,
}

fn default_startup_grace_ms() -> u64 {
    100
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            launcher: None,
            startup_grace_ms: default_startup_grace_ms(),
        }
    }
}

/// Launches modules as detached child processes
pub struct ShellSupervisor {
    config: SupervisorConfig,
    children: Mutex<HashMap<ModuleId, Child>>,
}

impl ShellSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        debug!(?config, "ShellSupervisor::new: called");
        Self {
            config,
            children: Mutex::new(HashMap::new()),
        }
    }

    fn children(&self) -> std::sync::MutexGuard<'_, HashMap<ModuleId, Child>> {
        self.children.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ProcessSupervisor for ShellSupervisor {
    fn launcher(&self) -> Option<&str> {
        self.config.launcher.as_deref()
    }

    async fn start(&self, command: &BootstrapCommand) -> CoordResult<ProcessHandle> {
        debug!(command = %command.render(), "ShellSupervisor::start: called");
        let failure = |reason: String| CoordError::BootstrapFailure {
            module_id: command.module_id,
            reason,
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| failure(format!("{}: {}", command.program, e)))?;

        if self.config.startup_grace_ms > 0 {
            let grace = Duration::from_millis(self.config.startup_grace_ms);
            if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                let status = status.map_err(|e| failure(e.to_string()))?;
                if !status.success() {
                    return Err(failure(format!("exited during startup with {}", status)));
                }
                debug!(module_id = command.module_id, "ShellSupervisor::start: process exited cleanly during grace");
            }
        }

        let pid = child.id();
        info!(module_id = command.module_id, ?pid, command = %command.render(), "Module process started");
        self.children().insert(command.module_id, child);
        Ok(ProcessHandle {
            module_id: command.module_id,
            pid,
        })
    }

    async fn stop(&self, module_id: ModuleId) -> CoordResult<bool> {
        debug!(%module_id, "ShellSupervisor::stop: called");
        let tracked = { self.children().remove(&module_id) };
        let Some(mut child) = tracked else {
            debug!(%module_id, "ShellSupervisor::stop: no process tracked");
            return Ok(false);
        };

        match child.id() {
            Some(pid) => {
                #[cfg(unix)]
                {
                    use nix::sys::signal::{Signal, kill};
                    use nix::unistd::Pid;

                    debug!(%module_id, pid, "ShellSupervisor::stop: sending SIGTERM");
                    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                        warn!(%module_id, pid, error = %e, "Failed to send SIGTERM");
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = child.start_kill();
                }
            }
            None => {
                debug!(%module_id, "ShellSupervisor::stop: process already exited");
            }
        }

        // Reap in the background so the caller never waits on a slow shutdown
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        info!(%module_id, "Module process stopped");
        Ok(true)
    }
}

/// Records launches instead of performing them
#[derive(Default)]
pub struct RecordingSupervisor {
    started: Mutex<Vec<BootstrapCommand>>,
    stopped: Mutex<Vec<ModuleId>>,
    fail: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl RecordingSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `start` fail
    pub fn failing() -> Self {
        let supervisor = Self::default();
        supervisor.set_failing(true);
        supervisor
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make every later `start` wait for one notification on the returned gate
    pub fn hold_starts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        if let Ok(mut slot) = self.gate.lock() {
            *slot = Some(gate.clone());
        }
        gate
    }

    pub fn started(&self) -> Vec<BootstrapCommand> {
        self.started.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn stopped(&self) -> Vec<ModuleId> {
        self.stopped.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ProcessSupervisor for RecordingSupervisor {
    async fn start(&self, command: &BootstrapCommand) -> CoordResult<ProcessHandle> {
        debug!(command = %command.render(), "RecordingSupervisor::start: called");
        if let Ok(mut started) = self.started.lock() {
            started.push(command.clone());
        }
        let gate = self.gate.lock().ok().and_then(|g| g.clone());
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoordError::BootstrapFailure {
                module_id: command.module_id,
                reason: "launch refused".to_string(),
            });
        }
        Ok(ProcessHandle {
            module_id: command.module_id,
            pid: None,
        })
    }

    async fn stop(&self, module_id: ModuleId) -> CoordResult<bool> {
        debug!(%module_id, "RecordingSupervisor::stop: called");
        let was_started = self.started().iter().any(|c| c.module_id == module_id);
        if let Ok(mut stopped) = self.stopped.lock() {
            stopped.push(module_id);
        }
        Ok(was_started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_template() {
        let bootstrap = Bootstrap::new("delta_robot_node", "DeltaRobotNode");
        let command = BootstrapCommand::new(None, &bootstrap, 2, 7);
        assert_eq!(command.program, "delta_robot_node");
        assert_eq!(command.args, vec!["DeltaRobotNode", "2", "7"]);

        let command = BootstrapCommand::new(Some("rosrun"), &bootstrap, 2, 7);
        assert_eq!(command.render(), "rosrun delta_robot_node DeltaRobotNode 2 7");
    }

    #[tokio::test]
    async fn test_recording_supervisor() {
        let supervisor = RecordingSupervisor::new();
        let command = BootstrapCommand::new(None, &Bootstrap::new("pkg", "exe"), 1, 1);
        let handle = supervisor.start(&command).await.unwrap();
        assert_eq!(handle.module_id, 1);
        assert!(supervisor.stop(1).await.unwrap());
        assert!(!supervisor.stop(2).await.unwrap());
        assert_eq!(supervisor.started(), vec![command]);
        assert_eq!(supervisor.stopped(), vec![1, 2]);

        supervisor.set_failing(true);
        let command = BootstrapCommand::new(None, &Bootstrap::new("pkg", "exe"), 1, 3);
        assert!(matches!(
            supervisor.start(&command).await,
            Err(CoordError::BootstrapFailure { module_id: 3, .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_supervisor_reports_missing_program() {
        let supervisor = ShellSupervisor::new(SupervisorConfig::default());
        let command = BootstrapCommand::new(None, &Bootstrap::new("/nonexistent/equiplet-module", "exe"), 1, 1);
        assert!(matches!(
            supervisor.start(&command).await,
            Err(CoordError::BootstrapFailure { module_id: 1, .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_supervisor_starts_and_stops() {
        let supervisor = ShellSupervisor::new(SupervisorConfig {
            launcher: None,
            startup_grace_ms: 50,
        });
        let command = BootstrapCommand {
            module_id: 5,
            program: "sleep".to_string(),
            args: vec!["30".to_string()],
        };
        let handle = supervisor.start(&command).await.unwrap();
        assert!(handle.pid.is_some());
        assert!(supervisor.stop(5).await.unwrap());
        assert!(!supervisor.stop(5).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_supervisor_detects_early_exit() {
        let supervisor = ShellSupervisor::new(SupervisorConfig {
            launcher: None,
            startup_grace_ms: 500,
        });
        let command = BootstrapCommand {
            module_id: 6,
            program: "false".to_string(),
            args: vec![],
        };
        assert!(matches!(
            supervisor.start(&command).await,
            Err(CoordError::BootstrapFailure { module_id: 6, .. })
        ));
    }
}
