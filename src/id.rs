use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{AvatarError, Result, AVATAR_FILENAME};

/// Opaque identifier of an entity (a personality's primary key).
///
/// The id doubles as the folder name inside the avatar bucket, so it must
/// be non-empty, must not contain a path separator and must not be `.` or
/// `..`.
#[derive(
    Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Debug, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(AvatarError::Validation(
                "entity id must not be empty".to_owned(),
            ));
        }
        if trimmed.contains('/') {
            return Err(AvatarError::Validation(format!(
                "entity id {} must not contain '/'",
                trimmed
            )));
        }
        if trimmed == "." || trimmed == ".." {
            return Err(AvatarError::Validation(format!(
                "entity id {} is not a folder name",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage key of the entity's avatar, `{id}/avatar.webp`.
    pub fn canonical_key(&self) -> String {
        format!("{}/{}", self.0, AVATAR_FILENAME)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = AvatarError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = AvatarError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
