//! Avatar presence cache, resolution and storage for personality records.
//!
//! Every entity owns at most one avatar, stored as WebP under the
//! canonical key `{entity_id}/avatar.webp` of a publicly readable bucket.
//! Which entities have one is learned from a single bulk listing and kept
//! in an [`AvatarCache`], which the [`AvatarService`] consults to build
//! public URLs and updates after confirmed uploads and removals.

use std::sync::Once;

pub mod cache;
pub mod config;
mod errors;
pub mod id;
pub mod normalize;
pub mod presence;
pub mod service;
pub mod setup;
pub mod store;

pub use cache::{AvatarCache, CacheState};
pub use config::AvatarConfig;
pub use errors::{AvatarError, Outcome, Result};
pub use id::EntityId;
pub use service::{AvatarService, ImageBlob};

pub const AVATAR_FILENAME: &str = "avatar.webp";
pub const WEBP_MIME_TYPE: &str = "image/webp";

/// Lossy WebP quality, 0.8 on a 0..1 scale
pub const WEBP_QUALITY: u8 = 80;

pub const DEFAULT_BUCKET: &str = "personalities";
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:3001/api";
pub const DEFAULT_MAX_DIMENSION: u32 = 512;
pub const DEFAULT_PROBE_CONCURRENCY: usize = 8;

const KILOBYTE: u64 = 1024;
const MEGABYTE: u64 = 1024 * KILOBYTE;
pub const MAX_UPLOAD_BYTES: u64 = 5 * MEGABYTE;

static INIT: Once = Once::new();

/// Install the `env_logger` backend, honouring `RUST_LOG`.
pub fn initialize() {
    INIT.call_once(|| {
        let _ = env_logger::builder()
            .is_test(cfg!(test))
            .try_init();
        log::info!("Initializing avatarlib");
    });
}
