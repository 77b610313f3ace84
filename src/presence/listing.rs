use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use super::{AvatarPresence, PresenceSource};
use crate::id::EntityId;
use crate::store::{ListOptions, ObjectStore, EMPTY_FOLDER_PLACEHOLDER};
use crate::{Result, AVATAR_FILENAME, DEFAULT_PROBE_CONCURRENCY};

/// Page size used when listing the entity folders of the bucket root.
pub const ROOT_LISTING_LIMIT: usize = 1000;

/// Presence derived straight from the avatar bucket.
///
/// One listing of the bucket root finds the entity folders, then every
/// folder is probed for the canonical file with at most
/// `probe_concurrency` probes in flight. A failing probe counts as
/// "no avatar" for that folder only.
pub struct StoreListingSource {
    store: Arc<dyn ObjectStore>,
    probe_concurrency: usize,
    entities: Option<Vec<EntityId>>,
}

impl StoreListingSource {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
            entities: None,
        }
    }

    pub fn with_probe_concurrency(mut self, limit: usize) -> Self {
        self.probe_concurrency = limit.max(1);
        self
    }

    /// Report these entities too, as `false` when they have no folder.
    pub fn with_entities(mut self, entities: Vec<EntityId>) -> Self {
        self.entities = Some(entities);
        self
    }

    async fn probe(&self, folder: EntityId) -> AvatarPresence {
        let options = ListOptions {
            limit: 1,
            search: Some(AVATAR_FILENAME.to_owned()),
            ..Default::default()
        };
        let has_avatar =
            match self.store.list_objects(folder.as_str(), &options).await {
                Ok(files) => files.iter().any(|f| f.name == AVATAR_FILENAME),
                Err(e) => {
                    log::warn!("presence: probing {} failed: {}", folder, e);
                    false
                }
            };
        AvatarPresence::new(folder, has_avatar)
    }
}

#[async_trait]
impl PresenceSource for StoreListingSource {
    async fn fetch_presence(&self) -> Result<Vec<AvatarPresence>> {
        let mut entries = Vec::new();
        let mut root = ListOptions {
            limit: ROOT_LISTING_LIMIT,
            ..Default::default()
        };
        loop {
            let page = self.store.list_objects("", &root).await?;
            let full = page.len() == root.limit;
            entries.extend(page);
            if !full {
                break;
            }
            root.offset += root.limit;
            log::debug!(
                "presence: root of {} has more than {} entries, next page",
                self.store.bucket(),
                root.offset
            );
        }

        let folders: Vec<EntityId> = entries
            .into_iter()
            .filter(|entry| entry.is_folder())
            .filter(|entry| entry.name != EMPTY_FOLDER_PLACEHOLDER)
            .filter_map(|entry| EntityId::new(entry.name).ok())
            .collect();
        log::debug!(
            "presence: probing {} folders in bucket {}",
            folders.len(),
            self.store.bucket()
        );

        let probed: BTreeMap<EntityId, bool> = stream::iter(folders)
            .map(|folder| self.probe(folder))
            .buffer_unordered(self.probe_concurrency)
            .map(|presence| (presence.entity_id, presence.has_avatar))
            .collect()
            .await;

        let presence = match &self.entities {
            Some(entities) => entities
                .iter()
                .map(|id| {
                    let has_avatar = probed.get(id).copied().unwrap_or(false);
                    AvatarPresence::new(id.clone(), has_avatar)
                })
                .collect(),
            None => probed
                .into_iter()
                .map(|(id, has_avatar)| AvatarPresence::new(id, has_avatar))
                .collect(),
        };
        Ok(presence)
    }
}
