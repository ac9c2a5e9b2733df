// ABOUTME: Script hosting core: registry, approvals, process supervisor, and admission control.
// ABOUTME: Front ends drive it through the Supervisor and AdmissionControl plus the notify traits.

pub mod admission;
pub mod approvals;
pub mod config;
pub mod error;
pub mod notify;
pub mod output;
mod persist;
pub mod reconcile;
pub mod registry;
pub mod status;
pub mod supervisor;
pub mod uid;

/// Chat platform user id.
pub type UserId = i64;

pub use admission::{parse_duration, AdmissionControl, Revocation};
pub use approvals::{ApprovalRecord, ApprovalStore};
pub use config::{HostConfig, SupervisorSettings};
pub use error::{AdmissionError, RegistryError, SupervisorError};
pub use notify::{Keyboard, NameResolver, Notice, Notifier, SilentNotifier};
pub use output::OutputCollector;
pub use reconcile::{ReconcilePlan, ReconcileReport, Reconciler};
pub use registry::{Registry, ScriptField, ScriptRecord, UserState};
pub use status::{ScriptStatus, StatusEvent};
pub use supervisor::{
    classify_exit, PauseOutcome, RestartPath, RestartReport, ScriptListing, StartOutcome,
    Supervisor,
};
pub use uid::Uid;
