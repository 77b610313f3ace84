use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Result, MAX_UPLOAD_BYTES};

mod memory;
mod supabase;

pub use memory::{FailureMode, MemoryStore, StoreCalls};
pub use supabase::SupabaseStorage;

/// Placeholder object some stores create to keep an empty folder alive.
pub const EMPTY_FOLDER_PLACEHOLDER: &str = ".emptyFolderPlaceholder";

/// One name returned by a folder-style listing.
///
/// Listing the bucket root yields folder names (entity ids), listing a
/// folder yields file names. Folders carry no `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
}

impl ObjectEntry {
    pub fn is_folder(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    pub limit: usize,
    pub offset: usize,
    pub search: Option<String>,
    pub sort_by_name: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            search: None,
            sort_by_name: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: String,
    pub cache_control: String,
    pub upsert: bool,
}

impl PutOptions {
    /// Overwriting upload of a WebP avatar.
    pub fn avatar() -> Self {
        Self {
            content_type: crate::WEBP_MIME_TYPE.to_owned(),
            cache_control: "3600".to_owned(),
            upsert: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketOptions {
    pub name: String,
    pub public: bool,
    pub allowed_mime_types: Vec<String>,
    pub file_size_limit: u64,
}

impl BucketOptions {
    /// Publicly readable bucket accepting common image types up to 5 MiB.
    pub fn avatars<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            public: true,
            allowed_mime_types: ["image/jpeg", "image/png", "image/webp"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            file_size_limit: MAX_UPLOAD_BYTES,
        }
    }
}

/// Remote object storage holding one folder per entity.
///
/// Implementations report a missing bucket as
/// [`AvatarError::BucketNotFound`](crate::AvatarError::BucketNotFound) and
/// every other failure as [`AvatarError::Store`](crate::AvatarError::Store)
/// or a wrapped transport error.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket this store operates on.
    fn bucket(&self) -> &str;

    async fn list_objects(
        &self,
        prefix: &str,
        options: &ListOptions,
    ) -> Result<Vec<ObjectEntry>>;

    /// Write `bytes` under `key`. With `upsert` an existing object is
    /// replaced, without it an existing object is an error.
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        options: &PutOptions,
    ) -> Result<()>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete_object(&self, key: &str) -> Result<()>;

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;

    async fn create_bucket(&self, options: &BucketOptions) -> Result<()>;
}
