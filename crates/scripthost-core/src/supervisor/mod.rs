// ABOUTME: Supervisor owning every live hosted process and the registry.
// ABOUTME: Start, pause, restart, terminate and listing, with status kept in step with the process table.

mod process;
pub mod report;

pub use process::{RunningHandle, StopKind};

use crate::config::{HostConfig, SupervisorSettings};
use crate::error::SupervisorError;
use crate::notify::{Notice, Notifier};
use crate::registry::{Registry, ScriptField, ScriptRecord};
use crate::status::{ScriptStatus, StatusEvent};
use crate::uid::Uid;
use crate::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Result of a start that got as far as spawning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Still alive after the capture window
    Running { pid: u32, initial_output: String },
    /// Exited inside the capture window and is now `Stopped`
    Exited {
        output: String,
        exit_code: Option<i32>,
        success: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    Paused,
    /// Recorded as running but no live process was tracked
    PausedUntracked,
}

/// Which restart branch was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPath {
    /// A live process was stopped and started again
    Live,
    /// Recorded as running without a live process
    Recovered,
    /// Paused, stopped, or cleared from an error
    Resume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartReport {
    pub path: RestartPath,
    pub outcome: StartOutcome,
}

/// One row of a user's script listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptListing {
    pub uid: Uid,
    pub display_name: String,
    pub status: ScriptStatus,
    /// A live process is tracked for this script
    pub live: bool,
}

/// True when an immediately exited script counts as successful: a zero exit
/// code and no `error` or `exception` anywhere in its output.
pub fn classify_exit(output: &str, exit_code: Option<i32>) -> bool {
    let lowered = output.to_lowercase();
    let mentions_failure = lowered.contains("error") || lowered.contains("exception");
    !mentions_failure && exit_code == Some(0)
}

pub struct Supervisor {
    registry: Registry,
    processes: HashMap<Uid, RunningHandle>,
    interpreter: String,
    extension: String,
    settings: SupervisorSettings,
    notifier: Arc<dyn Notifier>,
}

impl AsMut<Supervisor> for Supervisor {
    fn as_mut(&mut self) -> &mut Supervisor {
        self
    }
}

impl Supervisor {
    pub fn new(
        registry: Registry,
        host: &HostConfig,
        settings: SupervisorSettings,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            processes: HashMap::new(),
            interpreter: host.interpreter.clone(),
            extension: host.extension().to_string(),
            settings,
            notifier,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn is_tracked(&self, uid: &Uid) -> bool {
        self.processes.contains_key(uid)
    }

    pub fn tracked_count(&self) -> usize {
        self.processes.len()
    }

    fn record(&self, user_id: UserId, uid: &Uid) -> Result<ScriptRecord, SupervisorError> {
        self.registry
            .script(user_id, uid)
            .cloned()
            .ok_or_else(|| SupervisorError::UnknownScript {
                user_id,
                uid: uid.clone(),
            })
    }

    fn transition(
        uid: &Uid,
        from: &ScriptStatus,
        event: StatusEvent,
    ) -> Result<ScriptStatus, SupervisorError> {
        from.apply(event)
            .ok_or_else(|| SupervisorError::InvalidTransition {
                uid: uid.clone(),
                from: from.clone(),
                event,
            })
    }

    fn set_status(
        &mut self,
        user_id: UserId,
        uid: &Uid,
        status: ScriptStatus,
    ) -> Result<(), SupervisorError> {
        self.registry
            .update_script_field(user_id, uid, ScriptField::Status(status))?;
        Ok(())
    }

    fn set_pid(&mut self, user_id: UserId, uid: &Uid, pid: u32) -> Result<(), SupervisorError> {
        self.registry
            .update_script_field(user_id, uid, ScriptField::ProcessId(pid))?;
        Ok(())
    }

    async fn notify(&self, user_id: UserId, silent: bool, notice: Notice) {
        if !silent {
            self.notifier.notify(user_id, notice).await;
        }
    }

    /// Return the user to idle once a user-facing operation is done.
    fn finish_interaction(&mut self, user_id: UserId) {
        if let Err(e) = self.registry.reset_user_state(user_id) {
            warn!(user_id, error = %e, "Failed to reset user state");
        }
    }

    /// Launch a script and watch it for the capture window.
    ///
    /// Missing files, an already tracked uid, and spawn failures are reported
    /// to the user unless `silent`, then returned as errors.
    pub async fn start(
        &mut self,
        user_id: UserId,
        uid: &Uid,
        silent: bool,
    ) -> Result<StartOutcome, SupervisorError> {
        let record = self.record(user_id, uid)?;
        let name = record.display_name.clone();

        // A live process keeps its record untouched, whatever happened to its file
        if self.is_tracked(uid) {
            warn!(user_id, uid = %uid, "Start requested for a tracked script");
            self.notify(user_id, silent, report::already_tracked(&name, uid))
                .await;
            return Err(SupervisorError::AlreadyTracked { uid: uid.clone() });
        }

        let running = Self::transition(uid, &record.status, StatusEvent::Start)?;

        let path = self.registry.script_path(user_id, &record.file_name);
        if !path.exists() {
            let status = Self::transition(uid, &record.status, StatusEvent::FileMissing)?;
            self.set_status(user_id, uid, status)?;
            error!(user_id, uid = %uid, path = %path.display(), "Script file missing");
            self.notify(user_id, silent, report::file_missing(&name, uid))
                .await;
            return Err(SupervisorError::FileMissing {
                uid: uid.clone(),
                path,
            });
        }

        self.set_status(user_id, uid, running.clone())?;

        let cwd = self.registry.ensure_user_dir(user_id)?;
        let handle = match RunningHandle::spawn(
            uid,
            &self.interpreter,
            &record.file_name,
            &cwd,
            self.settings.output_buffer_lines,
        ) {
            Ok(handle) => handle,
            Err(source) => {
                let status = Self::transition(uid, &running, StatusEvent::SpawnFailed)?;
                self.set_status(user_id, uid, status)?;
                error!(user_id, uid = %uid, error = %source, "Failed to spawn script");
                self.notify(
                    user_id,
                    silent,
                    report::spawn_failed(&name, uid, &source.to_string()),
                )
                .await;
                return Err(SupervisorError::Spawn {
                    uid: uid.clone(),
                    source,
                });
            }
        };

        let pid = handle.pid();
        let handle = self.processes.entry(uid.clone()).or_insert(handle);
        let window = self.settings.capture_window();
        let poll = self.settings.poll_interval();
        let grace = self.settings.grace_period();

        let mut lines = handle.output_mut().collect_for(window, poll).await;
        let exit = handle.try_exit_status();
        if exit.is_some() {
            lines.extend(handle.output_mut().drain_closed(grace).await);
        }
        let dropped = handle.output_mut().dropped_lines();
        if dropped > 0 {
            warn!(uid = %uid, dropped, "Output lines dropped during capture");
        }
        let output = lines.join("\n").trim().to_string();

        if let Err(e) = self.set_pid(user_id, uid, pid) {
            warn!(uid = %uid, pid, error = %e, "Failed to record pid");
        }

        let Some(status) = exit else {
            info!(user_id, uid = %uid, pid, "Script running");
            self.notify(user_id, silent, report::started(&name, uid, &output))
                .await;
            return Ok(StartOutcome::Running {
                pid,
                initial_output: output,
            });
        };

        self.terminate(uid).await;
        let stopped = Self::transition(uid, &running, StatusEvent::Exited)?;
        self.set_status(user_id, uid, stopped)?;
        self.set_pid(user_id, uid, 0)?;

        let exit_code = status.code();
        let success = classify_exit(&output, exit_code);
        info!(user_id, uid = %uid, ?exit_code, success, "Script exited during capture window");

        let notice = if success {
            report::execution_complete(&name, uid, &output)
        } else {
            report::execution_failed(&name, uid, &output)
        };
        self.notify(user_id, silent, notice).await;

        Ok(StartOutcome::Exited {
            output,
            exit_code,
            success,
        })
    }

    /// Stop and forget the live process for `uid`. Returns false when none
    /// was tracked. The recorded status is left alone.
    pub async fn terminate(&mut self, uid: &Uid) -> bool {
        let Some(handle) = self.processes.remove(uid) else {
            return false;
        };
        let pid = handle.pid();
        let kind = handle.stop(self.settings.grace_period()).await;
        debug!(uid = %uid, pid, ?kind, "Terminated");
        true
    }

    pub async fn pause(
        &mut self,
        user_id: UserId,
        uid: &Uid,
    ) -> Result<PauseOutcome, SupervisorError> {
        let record = self.record(user_id, uid)?;
        if record.status != ScriptStatus::Running {
            return Err(SupervisorError::NotRunning {
                uid: uid.clone(),
                status: record.status,
            });
        }
        let paused = Self::transition(uid, &record.status, StatusEvent::Pause)?;

        let outcome = if self.terminate(uid).await {
            PauseOutcome::Paused
        } else {
            warn!(user_id, uid = %uid, "Paused a script with no live process");
            PauseOutcome::PausedUntracked
        };

        self.set_status(user_id, uid, paused)?;
        self.set_pid(user_id, uid, 0)?;
        self.finish_interaction(user_id);
        info!(user_id, uid = %uid, ?outcome, "Script paused");
        Ok(outcome)
    }

    pub async fn restart(
        &mut self,
        user_id: UserId,
        uid: &Uid,
        silent: bool,
    ) -> Result<RestartReport, SupervisorError> {
        let record = self.record(user_id, uid)?;
        let name = record.display_name.clone();

        let path = if self.is_tracked(uid) {
            self.notify(user_id, silent, report::restarting_live(&name, uid))
                .await;
            self.terminate(uid).await;
            RestartPath::Live
        } else {
            match &record.status {
                ScriptStatus::Running => {
                    self.notify(user_id, silent, report::restarting_recovered(&name, uid))
                        .await;
                    RestartPath::Recovered
                }
                ScriptStatus::Paused
                | ScriptStatus::Stopped
                | ScriptStatus::Error
                | ScriptStatus::ErrorFileMissing => {
                    if record.status.is_error() {
                        let cleared =
                            Self::transition(uid, &record.status, StatusEvent::ClearError)?;
                        self.set_status(user_id, uid, cleared)?;
                    }
                    self.notify(user_id, silent, report::starting(&name, uid))
                        .await;
                    RestartPath::Resume
                }
                other => {
                    return Err(SupervisorError::UnknownStatusOnRestart {
                        uid: uid.clone(),
                        status: other.clone(),
                    });
                }
            }
        };

        let started = self.start(user_id, uid, silent).await;
        if !silent {
            self.finish_interaction(user_id);
        }
        Ok(RestartReport {
            path,
            outcome: started?,
        })
    }

    /// Stop the script if live, then delete its record and file.
    pub async fn terminate_and_delete(
        &mut self,
        user_id: UserId,
        uid: &Uid,
    ) -> Result<ScriptRecord, SupervisorError> {
        // Ownership is checked first so one user can never stop another's process
        self.record(user_id, uid)?;
        self.terminate(uid).await;
        let record = self.registry.delete_script(user_id, uid)?;
        self.finish_interaction(user_id);
        info!(user_id, uid = %uid, "Script terminated and deleted");
        Ok(record)
    }

    /// Terminate and delete every script of a user. Returns how many were deleted.
    pub async fn terminate_all_for_user(&mut self, user_id: UserId) -> Result<usize, SupervisorError> {
        let uids: Vec<Uid> = match self.registry.user(user_id) {
            Some(user) => user.hosted_scripts.keys().cloned().collect(),
            None => return Ok(0),
        };

        let mut deleted = 0;
        for uid in &uids {
            self.terminate(uid).await;
            self.registry.delete_script(user_id, uid)?;
            deleted += 1;
        }
        info!(user_id, deleted, "Terminated all scripts for user");
        Ok(deleted)
    }

    /// Store an uploaded script under a fresh uid and start it.
    pub async fn host(
        &mut self,
        user_id: UserId,
        display_name: &str,
        contents: &[u8],
        silent: bool,
    ) -> Result<(Uid, StartOutcome), SupervisorError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(SupervisorError::EmptyName);
        }

        let uid = self.registry.generate_uid();
        let file_name = uid.file_name(&self.extension);
        let dir = self.registry.ensure_user_dir(user_id)?;
        let path = dir.join(&file_name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| SupervisorError::WriteFile {
                path: path.clone(),
                source,
            })?;

        self.registry
            .add_script(user_id, uid.clone(), display_name, &file_name)?;
        self.finish_interaction(user_id);
        info!(user_id, uid = %uid, name = display_name, bytes = contents.len(), "Script hosted");

        let outcome = self.start(user_id, &uid, silent).await?;
        Ok((uid, outcome))
    }

    pub fn rename(
        &mut self,
        user_id: UserId,
        uid: &Uid,
        new_name: &str,
    ) -> Result<(), SupervisorError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(SupervisorError::EmptyName);
        }
        self.record(user_id, uid)?;
        self.registry.update_script_field(
            user_id,
            uid,
            ScriptField::DisplayName(new_name.to_string()),
        )?;
        self.finish_interaction(user_id);
        Ok(())
    }

    /// A user's scripts with their statuses. Live processes that exited on
    /// their own are cleaned up and recorded as `Stopped` first.
    pub async fn list(&mut self, user_id: UserId) -> Result<Vec<ScriptListing>, SupervisorError> {
        let records: Vec<(Uid, ScriptRecord)> = match self.registry.user(user_id) {
            Some(user) => user
                .hosted_scripts
                .iter()
                .map(|(uid, record)| (uid.clone(), record.clone()))
                .collect(),
            None => return Ok(Vec::new()),
        };

        let mut listing = Vec::with_capacity(records.len());
        for (uid, mut record) in records {
            let exited = self
                .processes
                .get_mut(&uid)
                .and_then(|handle| handle.try_exit_status());
            if let Some(status) = exited {
                info!(user_id, uid = %uid, %status, "Script exited on its own");
                self.terminate(&uid).await;
                if let Some(stopped) = record.status.apply(StatusEvent::Exited) {
                    self.set_status(user_id, &uid, stopped.clone())?;
                    self.set_pid(user_id, &uid, 0)?;
                    record.status = stopped;
                }
            }

            listing.push(ScriptListing {
                live: self.is_tracked(&uid),
                uid,
                display_name: record.display_name,
                status: record.status,
            });
        }
        Ok(listing)
    }

    /// Stop every live process without touching recorded statuses, so the
    /// next boot restarts whatever was running.
    pub async fn shutdown(&mut self) {
        let count = self.processes.len();
        if count == 0 {
            return;
        }
        info!(count, "Stopping all hosted scripts");

        let grace = self.settings.grace_period();
        let mut stops = JoinSet::new();
        for (uid, handle) in self.processes.drain() {
            stops.spawn(async move { (uid, handle.stop(grace).await) });
        }
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((uid, kind)) => debug!(uid = %uid, ?kind, "Stopped on shutdown"),
                Err(e) => warn!(error = %e, "Stop task failed during shutdown"),
            }
        }
    }
}
