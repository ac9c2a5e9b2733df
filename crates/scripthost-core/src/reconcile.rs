// ABOUTME: Boot-time reconciliation of recorded script state.
// ABOUTME: Repairs legacy markers, then silently restarts every script recorded as running.

use crate::registry::{Registry, ScriptField};
use crate::status::{ScriptStatus, StatusEvent};
use crate::supervisor::Supervisor;
use crate::uid::Uid;
use crate::UserId;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// What boot reconciliation found before anything is restarted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Legacy `Stopped (Process Lost)` records rewritten to `Stopped`
    pub normalized: usize,
    /// Scripts recorded as running, in registry order
    pub worklist: Vec<(UserId, Uid)>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub normalized: usize,
    pub restarted: usize,
    pub failed: usize,
}

pub struct Reconciler {
    settle_delay: Duration,
}

impl Reconciler {
    pub fn new(settle_delay: Duration) -> Self {
        Self { settle_delay }
    }

    /// Normalize legacy statuses and collect the restart worklist.
    pub fn plan(registry: &mut Registry) -> ReconcilePlan {
        let mut lost = Vec::new();
        let mut worklist = Vec::new();
        for (user_id, user) in registry.users() {
            for (uid, record) in &user.hosted_scripts {
                match record.status {
                    ScriptStatus::ProcessLost => lost.push((user_id, uid.clone())),
                    ScriptStatus::Running => worklist.push((user_id, uid.clone())),
                    _ => {}
                }
            }
        }

        let mut normalized = 0;
        for (user_id, uid) in lost {
            let Some(stopped) = ScriptStatus::ProcessLost.apply(StatusEvent::Normalize) else {
                continue;
            };
            match registry.update_script_field(user_id, &uid, ScriptField::Status(stopped)) {
                Ok(()) => {
                    normalized += 1;
                    debug!(user_id, uid = %uid, "Cleared legacy process-lost status");
                }
                Err(e) => warn!(user_id, uid = %uid, error = %e, "Failed to normalize status"),
            }
        }

        info!(normalized, to_restart = worklist.len(), "Reconciliation planned");
        ReconcilePlan {
            normalized,
            worklist,
        }
    }

    /// Wait out the settle delay, then start each worklist entry silently.
    /// Failures are logged and never stop the rest of the worklist.
    pub async fn execute<S>(&self, plan: ReconcilePlan, supervisor: &Mutex<S>) -> ReconcileReport
    where
        S: AsMut<Supervisor>,
    {
        let mut report = ReconcileReport {
            normalized: plan.normalized,
            ..Default::default()
        };
        if plan.worklist.is_empty() {
            return report;
        }

        tokio::time::sleep(self.settle_delay).await;
        info!(count = plan.worklist.len(), "Starting auto-restart");
        let started = Instant::now();

        for (user_id, uid) in plan.worklist {
            let mut guard = supervisor.lock().await;
            match guard.as_mut().start(user_id, &uid, true).await {
                Ok(outcome) => {
                    report.restarted += 1;
                    debug!(user_id, uid = %uid, ?outcome, "Auto-restarted script");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(user_id, uid = %uid, error = %e, "Auto-restart failed");
                }
            }
        }

        info!(
            restarted = report.restarted,
            failed = report.failed,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Auto-restart finished"
        );
        report
    }
}
