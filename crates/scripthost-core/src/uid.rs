// ABOUTME: Script identifiers in the fixed R###J### format.
// ABOUTME: Random generation from uuid v4 plus parsing of user-typed ids.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Globally unique identifier of a hosted script: `R` + 3 hex digits + `J` + 3 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid script uid {0:?} (expected format R###J###)")]
pub struct InvalidUid(pub String);

impl Uid {
    /// A fresh random uid. Collisions are the registry's concern, see `Registry::generate_uid`.
    pub fn random() -> Self {
        let first = Uuid::new_v4().simple().to_string();
        let second = Uuid::new_v4().simple().to_string();
        Uid(format!(
            "R{}J{}",
            first[..3].to_ascii_uppercase(),
            second[3..6].to_ascii_uppercase()
        ))
    }

    /// Parse a uid typed by a user. Surrounding whitespace and case are ignored.
    pub fn parse(input: &str) -> Result<Self, InvalidUid> {
        let candidate = input.trim().to_ascii_uppercase();
        if Self::is_well_formed(&candidate) {
            Ok(Uid(candidate))
        } else {
            Err(InvalidUid(input.trim().to_string()))
        }
    }

    fn is_well_formed(s: &str) -> bool {
        let bytes = s.as_bytes();
        bytes.len() == 8
            && bytes[0] == b'R'
            && bytes[4] == b'J'
            && bytes[1..4].iter().all(u8::is_ascii_hexdigit)
            && bytes[5..8].iter().all(u8::is_ascii_hexdigit)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// On-disk file name for this script.
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.0, extension)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Uid {
    type Err = InvalidUid;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uid::parse(s)
    }
}
