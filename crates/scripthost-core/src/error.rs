// ABOUTME: Error types for scripthost-core.
// ABOUTME: Registry, supervisor, and admission failures with the uid or user they concern.

use crate::status::{ScriptStatus, StatusEvent};
use crate::uid::Uid;
use crate::UserId;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the durable stores (script registry and approvals file).
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Reading or writing a backing file failed.
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The user has no script with this uid.
    #[error("script {uid} not found for user {user_id}")]
    UnknownScript { user_id: UserId, uid: Uid },

    /// A user state field was given a value of the wrong shape.
    #[error("invalid value for field {key}: {reason}")]
    InvalidField { key: String, reason: String },
}

/// Failures of supervisor operations.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The script file is gone from disk. Needs terminate + re-upload.
    #[error("script file for {uid} is missing at {}", .path.display())]
    FileMissing { uid: Uid, path: PathBuf },

    /// A live handle already exists for this uid.
    #[error("script {uid} is already being tracked as running")]
    AlreadyTracked { uid: Uid },

    /// The interpreter could not be launched.
    #[error("failed to spawn script {uid}: {source}")]
    Spawn {
        uid: Uid,
        #[source]
        source: std::io::Error,
    },

    /// The uploaded script could not be written to the hosting directory.
    #[error("failed to store script file {}: {source}", .path.display())]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("script {uid} not found for user {user_id}")]
    UnknownScript { user_id: UserId, uid: Uid },

    /// Pause requested for a script that is not recorded as running.
    #[error("script {uid} is not running (status: {status})")]
    NotRunning { uid: Uid, status: ScriptStatus },

    /// Restart requested for a script whose status is not restartable.
    #[error("script {uid} is in an unknown state: {status}")]
    UnknownStatusOnRestart { uid: Uid, status: ScriptStatus },

    /// The status machine has no edge for this event.
    #[error("script {uid} cannot go from {from} on {event}")]
    InvalidTransition {
        uid: Uid,
        from: ScriptStatus,
        event: StatusEvent,
    },

    #[error("display name cannot be empty")]
    EmptyName,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl SupervisorError {
    /// True for the start failures that `start` already reported to the user
    /// through the notifier when it was not silent.
    pub fn reported_by_start(&self) -> bool {
        matches!(
            self,
            SupervisorError::FileMissing { .. }
                | SupervisorError::AlreadyTracked { .. }
                | SupervisorError::Spawn { .. }
        )
    }
}

/// Failures of authorization, quota, and approval management.
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// The user is not the owner and has no live approval.
    #[error("user {0} is not approved")]
    NotApproved(UserId),

    /// Hosting another script would exceed the user's quota.
    #[error("user {user_id} is hosting {hosted} scripts (limit {max_scripts})")]
    QuotaExceeded {
        user_id: UserId,
        hosted: usize,
        max_scripts: u32,
    },

    /// The owner's access cannot be granted, renewed, or revoked.
    #[error("the owner's access cannot be changed")]
    OwnerImmutable,

    #[error("max scripts must be a positive number")]
    InvalidQuota,

    /// A quota renewal below what the user already hosts.
    #[error("user {user_id} is hosting {hosted} scripts; the limit must be {hosted} or more")]
    QuotaBelowHosted { user_id: UserId, hosted: usize },

    #[error(transparent)]
    Store(#[from] RegistryError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}
