// ABOUTME: Durable registry of per-user state and hosted script records.
// ABOUTME: JSON-backed, every mutation persisted before returning; corrupt files load as empty.

use crate::error::RegistryError;
use crate::persist::write_json_atomic;
use crate::status::ScriptStatus;
use crate::uid::Uid;
use crate::UserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Conversational state a user is in when nothing is pending.
pub const IDLE: &str = "IDLE";

/// Chat-layer fields cleared whenever a user's state is reset.
const PENDING_FIELDS: [&str; 5] = [
    "pending_file_name",
    "pending_file_name_on_disk",
    "pending_update_uid",
    "admin_target_id",
    "admin_target_step",
];

/// Metadata for one hosted script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRecord {
    pub display_name: String,
    pub file_name: String,
    pub status: ScriptStatus,
    /// Last known OS pid, 0 when not running
    #[serde(default)]
    pub process_id: u32,
}

/// Everything persisted about one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    #[serde(default = "idle")]
    pub current_process: String,

    #[serde(default)]
    pub hosted_scripts: BTreeMap<Uid, ScriptRecord>,

    /// Chat-layer fields (`pending_*`, admin steps), kept verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn idle() -> String {
    IDLE.to_string()
}

impl Default for UserState {
    fn default() -> Self {
        let extra = PENDING_FIELDS[..3]
            .iter()
            .map(|key| (key.to_string(), Value::Null))
            .collect();
        Self {
            current_process: idle(),
            hosted_scripts: BTreeMap::new(),
            extra,
        }
    }
}

/// A single mutable property of a script record.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptField {
    DisplayName(String),
    Status(ScriptStatus),
    ProcessId(u32),
}

/// JSON-file registry keyed by user id string.
pub struct Registry {
    path: PathBuf,
    hosting_root: PathBuf,
    data: BTreeMap<String, UserState>,
}

impl Registry {
    /// Open the registry at `path`, creating it and the hosting root if needed.
    ///
    /// Only failures to create the backing storage are errors. A file that
    /// exists but does not parse is logged and treated as an empty store.
    pub fn open(
        path: impl AsRef<Path>,
        hosting_root: impl AsRef<Path>,
    ) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let hosting_root = hosting_root.as_ref().to_path_buf();

        std::fs::create_dir_all(&hosting_root).map_err(|source| RegistryError::Io {
            path: hosting_root.clone(),
            source,
        })?;

        let data = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(data) => data,
                Err(e) => {
                    error!(
                        path = %path.display(),
                        error = %e,
                        "Registry file is corrupt, resetting to an empty store"
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                write_json_atomic(&path, &BTreeMap::<String, UserState>::new())?;
                BTreeMap::new()
            }
            Err(source) => return Err(RegistryError::Io { path, source }),
        };

        info!(path = %path.display(), users = data.len(), "Registry loaded");

        Ok(Self {
            path,
            hosting_root,
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hosting_root(&self) -> &Path {
        &self.hosting_root
    }

    fn save(&self) -> Result<(), RegistryError> {
        write_json_atomic(&self.path, &self.data)
    }

    /// State for `user_id`, creating and persisting an idle record if absent.
    pub fn get_user(&mut self, user_id: UserId) -> Result<&UserState, RegistryError> {
        let key = user_id.to_string();
        if !self.data.contains_key(&key) {
            self.data.insert(key.clone(), UserState::default());
            self.save()?;
        }
        Ok(&self.data[&key])
    }

    /// State for `user_id` if it has ever been created.
    pub fn user(&self, user_id: UserId) -> Option<&UserState> {
        self.data.get(&user_id.to_string())
    }

    fn user_mut(&mut self, user_id: UserId) -> &mut UserState {
        self.data.entry(user_id.to_string()).or_default()
    }

    /// Persist one user state field. `hosted_scripts` is owned by the registry
    /// and cannot be set this way.
    pub fn set_user_field(
        &mut self,
        user_id: UserId,
        key: &str,
        value: Value,
    ) -> Result<(), RegistryError> {
        match key {
            "current_process" => {
                let Value::String(state) = value else {
                    return Err(RegistryError::InvalidField {
                        key: key.to_string(),
                        reason: "expected a string".to_string(),
                    });
                };
                self.user_mut(user_id).current_process = state;
            }
            "hosted_scripts" => {
                return Err(RegistryError::InvalidField {
                    key: key.to_string(),
                    reason: "scripts are managed through add/delete".to_string(),
                });
            }
            _ => {
                self.user_mut(user_id).extra.insert(key.to_string(), value);
            }
        }
        self.save()
    }

    /// Put the user back to idle and clear every pending chat field.
    pub fn reset_user_state(&mut self, user_id: UserId) -> Result<(), RegistryError> {
        let user = self.user_mut(user_id);
        user.current_process = idle();
        for key in PENDING_FIELDS {
            user.extra.insert(key.to_string(), Value::Null);
        }
        self.save()
    }

    pub fn script(&self, user_id: UserId, uid: &Uid) -> Option<&ScriptRecord> {
        self.user(user_id)?.hosted_scripts.get(uid)
    }

    /// Number of scripts a user hosts, whatever their status.
    pub fn hosted_count(&self, user_id: UserId) -> usize {
        self.user(user_id)
            .map(|user| user.hosted_scripts.len())
            .unwrap_or(0)
    }

    /// Insert a new record. New scripts start out `Running` with no pid yet.
    pub fn add_script(
        &mut self,
        user_id: UserId,
        uid: Uid,
        display_name: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let record = ScriptRecord {
            display_name: display_name.into(),
            file_name: file_name.into(),
            status: ScriptStatus::Running,
            process_id: 0,
        };
        self.user_mut(user_id).hosted_scripts.insert(uid, record);
        self.save()
    }

    pub fn update_script_field(
        &mut self,
        user_id: UserId,
        uid: &Uid,
        field: ScriptField,
    ) -> Result<(), RegistryError> {
        let record = self
            .data
            .get_mut(&user_id.to_string())
            .and_then(|user| user.hosted_scripts.get_mut(uid))
            .ok_or_else(|| RegistryError::UnknownScript {
                user_id,
                uid: uid.clone(),
            })?;

        match field {
            ScriptField::DisplayName(name) => record.display_name = name,
            ScriptField::Status(status) => record.status = status,
            ScriptField::ProcessId(pid) => record.process_id = pid,
        }
        self.save()
    }

    /// Remove a record and delete its file. Returns the removed record.
    pub fn delete_script(
        &mut self,
        user_id: UserId,
        uid: &Uid,
    ) -> Result<ScriptRecord, RegistryError> {
        let record = self
            .data
            .get_mut(&user_id.to_string())
            .and_then(|user| user.hosted_scripts.remove(uid))
            .ok_or_else(|| RegistryError::UnknownScript {
                user_id,
                uid: uid.clone(),
            })?;
        self.save()?;

        let file = self.script_path(user_id, &record.file_name);
        if file.exists() {
            match std::fs::remove_file(&file) {
                Ok(()) => info!(uid = %uid, path = %file.display(), "Script file deleted"),
                Err(e) => warn!(uid = %uid, path = %file.display(), error = %e, "Failed to delete script file"),
            }
        }
        Ok(record)
    }

    /// Random uid not used by any script of any user.
    pub fn generate_uid(&self) -> Uid {
        loop {
            let uid = Uid::random();
            if !self.contains_uid(&uid) {
                return uid;
            }
        }
    }

    pub fn contains_uid(&self, uid: &Uid) -> bool {
        self.data
            .values()
            .any(|user| user.hosted_scripts.contains_key(uid))
    }

    /// Every user with a numeric id, in key order.
    pub fn users(&self) -> impl Iterator<Item = (UserId, &UserState)> {
        self.data.iter().filter_map(|(key, state)| match key.parse() {
            Ok(user_id) => Some((user_id, state)),
            Err(_) => {
                warn!(key = %key, "Skipping registry entry with a non-numeric user id");
                None
            }
        })
    }

    /// Private hosting directory of a user.
    pub fn user_dir(&self, user_id: UserId) -> PathBuf {
        self.hosting_root.join(user_id.to_string())
    }

    /// Create the user's hosting directory if missing and return it.
    pub fn ensure_user_dir(&self, user_id: UserId) -> Result<PathBuf, RegistryError> {
        let dir = self.user_dir(user_id);
        std::fs::create_dir_all(&dir).map_err(|source| RegistryError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    pub fn script_path(&self, user_id: UserId, file_name: &str) -> PathBuf {
        self.user_dir(user_id).join(file_name)
    }
}
