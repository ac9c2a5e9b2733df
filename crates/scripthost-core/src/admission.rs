// ABOUTME: Authorization and quota checks in front of the supervisor.
// ABOUTME: Owns the approvals store: approve, renew, revoke with cascading script deletion.

use crate::approvals::{to_unix_seconds, ApprovalRecord, ApprovalStore, UNKNOWN_USER};
use crate::error::AdmissionError;
use crate::notify::NameResolver;
use crate::registry::Registry;
use crate::supervisor::Supervisor;
use crate::UserId;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

/// Result of revoking a user's access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    pub name: String,
    /// Scripts terminated and deleted
    pub terminated: usize,
}

/// One entry of the approvals listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalEntry {
    pub user_id: UserId,
    pub record: ApprovalRecord,
    pub expired: bool,
}

pub struct AdmissionControl {
    owner_id: UserId,
    approvals: ApprovalStore,
}

impl AdmissionControl {
    pub fn new(approvals: ApprovalStore) -> Self {
        Self {
            owner_id: approvals.owner_id(),
            approvals,
        }
    }

    pub fn owner_id(&self) -> UserId {
        self.owner_id
    }

    pub fn is_owner(&self, user_id: UserId) -> bool {
        user_id == self.owner_id
    }

    pub fn approval(&self, user_id: UserId) -> Option<&ApprovalRecord> {
        self.approvals.get(user_id)
    }

    pub fn is_authorized(&mut self, user_id: UserId) -> bool {
        self.is_authorized_at(user_id, Utc::now())
    }

    /// Owner, or an approval expiring strictly after `now`. An expired
    /// approval found here is removed and the store saved.
    pub fn is_authorized_at(&mut self, user_id: UserId, now: DateTime<Utc>) -> bool {
        if self.is_owner(user_id) {
            return true;
        }
        let Some(record) = self.approvals.get(user_id) else {
            return false;
        };
        if !record.is_expired_at(now) {
            return true;
        }

        warn!(user_id, "Access expired, removing approval");
        self.approvals.remove(user_id);
        if let Err(e) = self.approvals.save() {
            warn!(user_id, error = %e, "Failed to save approvals after expiry");
        }
        false
    }

    /// Whether a user hosting `hosted` scripts may host one more.
    pub fn check_quota(&self, user_id: UserId, hosted: usize) -> Result<(), AdmissionError> {
        if self.is_owner(user_id) {
            return Ok(());
        }
        let record = self
            .approvals
            .get(user_id)
            .ok_or(AdmissionError::NotApproved(user_id))?;
        if hosted >= record.max_scripts as usize {
            return Err(AdmissionError::QuotaExceeded {
                user_id,
                hosted,
                max_scripts: record.max_scripts,
            });
        }
        Ok(())
    }

    /// Authorization plus quota, checked right before a new script is hosted.
    pub fn admit_new_script(
        &mut self,
        user_id: UserId,
        registry: &Registry,
    ) -> Result<(), AdmissionError> {
        if !self.is_authorized(user_id) {
            return Err(AdmissionError::NotApproved(user_id));
        }
        self.check_quota(user_id, registry.hosted_count(user_id))
    }

    /// Grant access for `duration` with a script quota. The display name is
    /// looked up best-effort.
    pub async fn approve(
        &mut self,
        user_id: UserId,
        duration: Duration,
        max_scripts: u32,
        resolver: &dyn NameResolver,
    ) -> Result<&ApprovalRecord, AdmissionError> {
        if self.is_owner(user_id) {
            return Err(AdmissionError::OwnerImmutable);
        }
        if max_scripts == 0 {
            return Err(AdmissionError::InvalidQuota);
        }

        let name = resolver
            .display_name(user_id)
            .await
            .unwrap_or_else(|| UNKNOWN_USER.to_string());
        let record = ApprovalRecord::new(Utc::now() + duration, name, max_scripts);
        self.approvals.insert(user_id, record);
        self.approvals.save()?;
        info!(user_id, max_scripts, "User approved");

        self.approvals
            .get(user_id)
            .ok_or(AdmissionError::NotApproved(user_id))
    }

    /// Extend access by `duration`, counted from the later of the current
    /// expiry and now.
    pub fn renew_time(
        &mut self,
        user_id: UserId,
        duration: Duration,
    ) -> Result<&ApprovalRecord, AdmissionError> {
        if self.is_owner(user_id) {
            return Err(AdmissionError::OwnerImmutable);
        }
        let record = self
            .approvals
            .get_mut(user_id)
            .ok_or(AdmissionError::NotApproved(user_id))?;
        let base = record.expires_at().max(Utc::now());
        record.expiry = to_unix_seconds(base + duration);
        self.approvals.save()?;
        info!(user_id, "Access time renewed");

        self.approvals
            .get(user_id)
            .ok_or(AdmissionError::NotApproved(user_id))
    }

    /// Set a new script quota; it may not drop below what the user hosts.
    pub fn renew_quota(
        &mut self,
        user_id: UserId,
        new_max: u32,
        hosted: usize,
    ) -> Result<&ApprovalRecord, AdmissionError> {
        if self.is_owner(user_id) {
            return Err(AdmissionError::OwnerImmutable);
        }
        if new_max == 0 {
            return Err(AdmissionError::InvalidQuota);
        }
        let record = self
            .approvals
            .get_mut(user_id)
            .ok_or(AdmissionError::NotApproved(user_id))?;
        if (new_max as usize) < hosted {
            return Err(AdmissionError::QuotaBelowHosted { user_id, hosted });
        }
        record.max_scripts = new_max;
        self.approvals.save()?;
        info!(user_id, new_max, "Script quota renewed");

        self.approvals
            .get(user_id)
            .ok_or(AdmissionError::NotApproved(user_id))
    }

    /// Remove access and terminate and delete every script of the user.
    pub async fn revoke(
        &mut self,
        user_id: UserId,
        supervisor: &mut Supervisor,
    ) -> Result<Revocation, AdmissionError> {
        if self.is_owner(user_id) {
            return Err(AdmissionError::OwnerImmutable);
        }
        let record = self
            .approvals
            .get(user_id)
            .cloned()
            .ok_or(AdmissionError::NotApproved(user_id))?;

        let terminated = supervisor.terminate_all_for_user(user_id).await?;
        self.approvals.remove(user_id);
        self.approvals.save()?;
        info!(user_id, terminated, "Access revoked");

        Ok(Revocation {
            name: record.name,
            terminated,
        })
    }

    pub fn approvals(&self) -> Vec<ApprovalEntry> {
        self.approvals_at(Utc::now())
    }

    pub fn approvals_at(&self, now: DateTime<Utc>) -> Vec<ApprovalEntry> {
        self.approvals
            .iter()
            .map(|(user_id, record)| ApprovalEntry {
                user_id,
                record: record.clone(),
                expired: record.is_expired_at(now),
            })
            .collect()
    }
}

/// Parse durations like `30m`, `1.5h`, `3d`, `2w`.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim().to_ascii_lowercase();
    let unit = input.chars().last()?;
    let seconds_per_unit = match unit {
        'm' => 60.0,
        'h' => 3_600.0,
        'd' => 86_400.0,
        'w' => 604_800.0,
        _ => return None,
    };
    let value: f64 = input[..input.len() - 1].trim().parse().ok()?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    let millis = value * seconds_per_unit * 1_000.0;
    if millis > i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(millis.round() as i64)
}

/// Render an expiry the way notices show it.
pub fn format_expiry(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    const OWNER: UserId = 1;

    struct FixedName(Option<&'static str>);

    #[async_trait]
    impl NameResolver for FixedName {
        async fn display_name(&self, _user_id: UserId) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    fn admission() -> (AdmissionControl, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ApprovalStore::load(dir.path().join("approved.json"), OWNER);
        (AdmissionControl::new(store), dir)
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30m"), Some(Duration::minutes(30)));
        assert_eq!(parse_duration("1h"), Some(Duration::hours(1)));
        assert_eq!(parse_duration("3d"), Some(Duration::days(3)));
        assert_eq!(parse_duration("2W"), Some(Duration::weeks(2)));
        assert_eq!(parse_duration("1.5h"), Some(Duration::minutes(90)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("h"), None);
        assert_eq!(parse_duration("5s"), None);
        assert_eq!(parse_duration("0d"), None);
        assert_eq!(parse_duration("-1d"), None);
        assert_eq!(parse_duration("abc"), None);
    }

    #[test]
    fn test_owner_always_authorized_and_unlimited() {
        let (mut admission, _dir) = admission();
        assert!(admission.is_authorized(OWNER));
        assert!(admission.check_quota(OWNER, 10_000).is_ok());
    }

    #[test]
    fn test_unknown_user_not_authorized() {
        let (mut admission, _dir) = admission();
        assert!(!admission.is_authorized(99));
        assert!(matches!(
            admission.check_quota(99, 0),
            Err(AdmissionError::NotApproved(99))
        ));
    }

    #[tokio::test]
    async fn test_approve_resolves_name_with_fallback() {
        let (mut admission, _dir) = admission();
        let record = admission
            .approve(5, Duration::days(1), 2, &FixedName(Some("Ada")))
            .await
            .unwrap();
        assert_eq!(record.name, "Ada");
        assert_eq!(record.max_scripts, 2);

        let record = admission
            .approve(6, Duration::days(1), 1, &FixedName(None))
            .await
            .unwrap();
        assert_eq!(record.name, UNKNOWN_USER);
        assert!(admission.is_authorized(5));
        assert!(admission.is_authorized(6));
    }

    #[tokio::test]
    async fn test_approve_rejects_owner_and_zero_quota() {
        let (mut admission, _dir) = admission();
        let resolver = FixedName(None);
        assert!(matches!(
            admission.approve(OWNER, Duration::days(1), 1, &resolver).await,
            Err(AdmissionError::OwnerImmutable)
        ));
        assert!(matches!(
            admission.approve(5, Duration::days(1), 0, &resolver).await,
            Err(AdmissionError::InvalidQuota)
        ));
    }

    #[tokio::test]
    async fn test_quota_boundary() {
        let (mut admission, _dir) = admission();
        admission
            .approve(5, Duration::days(1), 2, &FixedName(None))
            .await
            .unwrap();
        assert!(admission.check_quota(5, 1).is_ok());
        assert!(matches!(
            admission.check_quota(5, 2),
            Err(AdmissionError::QuotaExceeded {
                hosted: 2,
                max_scripts: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_renew_time_extends_from_later_of_expiry_and_now() {
        let (mut admission, _dir) = admission();
        admission
            .approve(5, Duration::days(2), 1, &FixedName(None))
            .await
            .unwrap();
        let before = admission.approval(5).unwrap().expires_at();
        let renewed = admission.renew_time(5, Duration::days(1)).unwrap().expires_at();
        let gained = renewed - before;
        assert!(gained >= Duration::days(1) - Duration::seconds(1));
        assert!(gained <= Duration::days(1) + Duration::seconds(1));

        // Expired approvals renew from now
        admission.approvals.insert(
            7,
            ApprovalRecord::new(Utc::now() - Duration::days(10), "old", 1),
        );
        let renewed = admission.renew_time(7, Duration::hours(1)).unwrap().expires_at();
        assert!(renewed > Utc::now() + Duration::minutes(59));
    }

    #[tokio::test]
    async fn test_renew_quota_rules() {
        let (mut admission, _dir) = admission();
        admission
            .approve(5, Duration::days(1), 3, &FixedName(None))
            .await
            .unwrap();

        assert!(matches!(
            admission.renew_quota(5, 1, 2),
            Err(AdmissionError::QuotaBelowHosted { hosted: 2, .. })
        ));
        assert!(matches!(
            admission.renew_quota(5, 0, 0),
            Err(AdmissionError::InvalidQuota)
        ));
        assert!(matches!(
            admission.renew_quota(42, 3, 0),
            Err(AdmissionError::NotApproved(42))
        ));
        assert_eq!(admission.renew_quota(5, 2, 2).unwrap().max_scripts, 2);
    }

    #[test]
    fn test_expired_approval_removed_on_check() {
        let (mut admission, dir) = admission();
        let now = Utc::now();
        admission
            .approvals
            .insert(8, ApprovalRecord::new(now - Duration::seconds(1), "late", 1));
        admission.approvals.save().unwrap();

        assert!(!admission.is_authorized_at(8, now));
        assert!(admission.approval(8).is_none());

        let reloaded = ApprovalStore::load(dir.path().join("approved.json"), OWNER);
        assert!(reloaded.get(8).is_none());
    }

    #[test]
    fn test_approvals_listing_marks_expired() {
        let (mut admission, _dir) = admission();
        let now = Utc::now();
        admission
            .approvals
            .insert(2, ApprovalRecord::new(now + Duration::hours(1), "a", 1));
        admission
            .approvals
            .insert(3, ApprovalRecord::new(now - Duration::hours(1), "b", 1));

        let entries = admission.approvals_at(now);
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].expired);
        assert!(entries[1].expired);
    }

    #[test]
    fn test_format_expiry() {
        let at = DateTime::from_timestamp(0, 0).unwrap();
        assert_eq!(format_expiry(at), "1970-01-01 00:00:00 UTC");
    }
}
