// ABOUTME: Durable store of user approvals (expiry, display name, script quota).
// ABOUTME: Reads the current schema and both legacy shapes; always writes the current one.

use crate::error::RegistryError;
use crate::persist::write_json_atomic;
use crate::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Name used when a user's display name could not be resolved.
pub const UNKNOWN_USER: &str = "Unknown User";

/// Access granted to one non-owner user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Absolute UTC expiry as fractional UNIX seconds
    pub expiry: f64,
    pub name: String,
    pub max_scripts: u32,
}

impl ApprovalRecord {
    pub fn new(expires_at: DateTime<Utc>, name: impl Into<String>, max_scripts: u32) -> Self {
        Self {
            expiry: to_unix_seconds(expires_at),
            name: name.into(),
            max_scripts,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let secs = self.expiry.floor();
        let nanos = ((self.expiry - secs) * 1e9) as u32;
        DateTime::from_timestamp(secs as i64, nanos).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Expired unless the expiry is strictly after `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }
}

pub(crate) fn to_unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp() as f64 + f64::from(at.timestamp_subsec_nanos()) / 1e9
}

/// Every shape an approval has been stored in.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredApproval {
    Current {
        expiry: f64,
        #[serde(default = "unknown_user")]
        name: String,
        #[serde(default = "one")]
        max_scripts: u32,
    },
    Pair(f64, String),
    Bare(f64),
}

fn unknown_user() -> String {
    UNKNOWN_USER.to_string()
}

fn one() -> u32 {
    1
}

impl From<StoredApproval> for ApprovalRecord {
    fn from(stored: StoredApproval) -> Self {
        match stored {
            StoredApproval::Current {
                expiry,
                name,
                max_scripts,
            } => ApprovalRecord {
                expiry,
                name,
                max_scripts,
            },
            StoredApproval::Pair(expiry, name) => ApprovalRecord {
                expiry,
                name,
                max_scripts: 1,
            },
            StoredApproval::Bare(expiry) => ApprovalRecord {
                expiry,
                name: unknown_user(),
                max_scripts: 1,
            },
        }
    }
}

/// JSON-file approvals keyed by user id. The owner is never stored.
pub struct ApprovalStore {
    path: PathBuf,
    owner_id: UserId,
    entries: BTreeMap<UserId, ApprovalRecord>,
}

impl ApprovalStore {
    /// Load approvals from `path`. Never fails: unreadable or corrupt files
    /// are logged and yield an empty store.
    pub fn load(path: impl AsRef<Path>, owner_id: UserId) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match Self::parse(&contents, owner_id) {
                Ok(entries) => entries,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Approvals file is corrupt, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read approvals file, starting empty");
                BTreeMap::new()
            }
        };

        info!(path = %path.display(), approvals = entries.len(), "Approvals loaded");
        Self {
            path,
            owner_id,
            entries,
        }
    }

    /// Parse the approvals JSON, normalizing legacy entries and dropping the owner.
    pub fn parse(
        contents: &str,
        owner_id: UserId,
    ) -> Result<BTreeMap<UserId, ApprovalRecord>, serde_json::Error> {
        let raw: BTreeMap<String, StoredApproval> = serde_json::from_str(contents)?;
        let mut entries = BTreeMap::new();
        for (key, stored) in raw {
            let Ok(user_id) = key.trim().parse::<UserId>() else {
                warn!(key = %key, "Skipping approval with a non-numeric user id");
                continue;
            };
            if user_id == owner_id {
                continue;
            }
            entries.insert(user_id, stored.into());
        }
        Ok(entries)
    }

    pub fn save(&self) -> Result<(), RegistryError> {
        let out: BTreeMap<String, &ApprovalRecord> = self
            .entries
            .iter()
            .map(|(user_id, record)| (user_id.to_string(), record))
            .collect();
        write_json_atomic(&self.path, &out)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner_id(&self) -> UserId {
        self.owner_id
    }

    pub fn get(&self, user_id: UserId) -> Option<&ApprovalRecord> {
        self.entries.get(&user_id)
    }

    pub(crate) fn get_mut(&mut self, user_id: UserId) -> Option<&mut ApprovalRecord> {
        self.entries.get_mut(&user_id)
    }

    /// Insert or replace an approval. Owner entries are ignored.
    pub fn insert(&mut self, user_id: UserId, record: ApprovalRecord) {
        if user_id == self.owner_id {
            return;
        }
        self.entries.insert(user_id, record);
    }

    pub fn remove(&mut self, user_id: UserId) -> Option<ApprovalRecord> {
        self.entries.remove(&user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (UserId, &ApprovalRecord)> {
        self.entries.iter().map(|(user_id, record)| (*user_id, record))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
