use std::sync::Arc;

use url::Url;

use crate::cache::AvatarCache;
use crate::id::EntityId;
use crate::normalize::normalize;
use crate::store::{ObjectStore, PutOptions};
use crate::{
    AvatarError, Result, AVATAR_FILENAME, DEFAULT_MAX_DIMENSION,
    MAX_UPLOAD_BYTES,
};

/// Raw image as handed over by a caller, together with its declared
/// MIME type.
#[derive(Debug, Clone)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageBlob {
    pub fn new<S: Into<String>>(bytes: Vec<u8>, mime_type: S) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.trim().to_ascii_lowercase().starts_with("image/")
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Resolves, uploads and removes entity avatars.
///
/// The cache is only updated after the store confirmed a write, so a
/// failed upload or removal leaves the cached flag as it was.
pub struct AvatarService {
    store: Arc<dyn ObjectStore>,
    cache: Arc<AvatarCache>,
    public_base: Url,
    max_dimension: u32,
    max_upload_bytes: u64,
}

impl AvatarService {
    /// `public_base` is the public read location of the bucket, e.g.
    /// `https://<ref>.supabase.co/storage/v1/object/public/personalities`.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cache: Arc<AvatarCache>,
        public_base: Url,
    ) -> Result<Self> {
        if public_base.cannot_be_a_base() {
            return Err(AvatarError::Config(format!(
                "{} cannot be used as a base URL",
                public_base
            )));
        }
        Ok(Self {
            store,
            cache,
            public_base,
            max_dimension: DEFAULT_MAX_DIMENSION,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        })
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: u64) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    pub fn cache(&self) -> &Arc<AvatarCache> {
        &self.cache
    }

    /// Public URL of the canonical avatar object. Performs no I/O and
    /// does not check that the object exists.
    pub fn public_url(&self, id: &EntityId) -> Url {
        let mut url = self.public_base.clone();
        // checked for cannot-be-a-base in the constructor
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(id.as_str()).push(AVATAR_FILENAME);
        }
        url
    }

    /// URL of the entity's avatar, or `None` when it has none and a
    /// placeholder should be shown instead.
    pub async fn resolve(&self, id: &EntityId) -> Option<Url> {
        self.cache.ensure_ready().await;
        if self.cache.has_avatar(id) {
            Some(self.public_url(id))
        } else {
            None
        }
    }

    /// Normalize `blob` and store it as the entity's avatar, replacing
    /// any previous one.
    pub async fn upload(&self, id: &EntityId, blob: ImageBlob) -> Result<()> {
        self.validate(&blob)?;

        let max_dimension = self.max_dimension;
        let normalized = tokio::task::spawn_blocking(move || {
            normalize(&blob.bytes, max_dimension)
        })
        .await??;

        let key = id.canonical_key();
        if let Err(e) = self
            .store
            .put_object(&key, normalized.bytes, &PutOptions::avatar())
            .await
        {
            log::error!("avatars: upload of {} failed: {}", key, e);
            return Err(e);
        }
        log::info!(
            "avatars: uploaded {} ({}x{})",
            key,
            normalized.width,
            normalized.height
        );

        self.record(id, true).await
    }

    /// Delete the entity's avatar. Deleting a missing avatar succeeds.
    pub async fn remove(&self, id: &EntityId) -> Result<()> {
        let key = id.canonical_key();
        if let Err(e) = self.store.delete_object(&key).await {
            log::error!("avatars: deletion of {} failed: {}", key, e);
            return Err(e);
        }
        log::info!("avatars: deleted {}", key);

        self.record(id, false).await
    }

    /// Flip the cached flag after a confirmed write. An invalidation
    /// racing with this is retried once; if it wins again the flag is
    /// dropped, as the reload it triggered already sees the write.
    async fn record(&self, id: &EntityId, has_avatar: bool) -> Result<()> {
        for _ in 0..2 {
            self.cache.ensure_ready().await;
            match self.cache.set(id.clone(), has_avatar) {
                Err(AvatarError::NotReady) => continue,
                other => return other,
            }
        }
        log::debug!(
            "avatars: cache reloading, not recording has_avatar={} for {}",
            has_avatar,
            id
        );
        Ok(())
    }

    fn validate(&self, blob: &ImageBlob) -> Result<()> {
        if !blob.is_image() {
            return Err(AvatarError::Validation(format!(
                "please select an image file, got {}",
                blob.mime_type
            )));
        }
        if blob.len() as u64 > self.max_upload_bytes {
            return Err(AvatarError::Validation(format!(
                "file is too large ({} bytes), maximum size is {} bytes",
                blob.len(),
                self.max_upload_bytes
            )));
        }
        Ok(())
    }
}
