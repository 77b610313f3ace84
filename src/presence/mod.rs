use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::id::EntityId;
use crate::Result;

mod http;
mod listing;

pub use http::HttpPresenceSource;
pub use listing::StoreListingSource;

/// Whether an entity currently has an avatar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarPresence {
    pub entity_id: EntityId,
    pub has_avatar: bool,
}

impl AvatarPresence {
    pub fn new(entity_id: EntityId, has_avatar: bool) -> Self {
        Self {
            entity_id,
            has_avatar,
        }
    }
}

/// A row of the backend's bulk avatar listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalityWithAvatar {
    pub personality_id: EntityId,
    pub first_name: String,
    pub last_name: String,
    pub has_avatar: bool,
    #[serde(default)]
    pub shows: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_show: Option<String>,
}

impl From<PersonalityWithAvatar> for AvatarPresence {
    fn from(row: PersonalityWithAvatar) -> Self {
        Self::new(row.personality_id, row.has_avatar)
    }
}

/// Envelope every backend endpoint answers with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

/// Where the avatar cache gets its bulk listing from.
///
/// One call must return the presence of every entity at once.
#[async_trait]
pub trait PresenceSource: Send + Sync {
    async fn fetch_presence(&self) -> Result<Vec<AvatarPresence>>;
}
