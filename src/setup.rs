use crate::store::{BucketOptions, ObjectStore};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketSetup {
    AlreadyExists,
    Created,
}

/// Make sure the bucket described by `options` exists, creating it when
/// it is missing. Existing buckets are left as they are.
pub async fn ensure_bucket(
    store: &dyn ObjectStore,
    options: &BucketOptions,
) -> Result<BucketSetup> {
    log::debug!("setup: checking bucket {}", options.name);
    let buckets = store.list_buckets().await?;
    if buckets.iter().any(|b| b.name == options.name) {
        log::info!("setup: bucket {} already exists", options.name);
        return Ok(BucketSetup::AlreadyExists);
    }

    store.create_bucket(options).await?;
    log::info!(
        "setup: created bucket {} (public: {}, limit: {} bytes)",
        options.name,
        options.public,
        options.file_size_limit
    );
    Ok(BucketSetup::Created)
}
