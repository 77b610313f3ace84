use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use avatarlib::presence::{AvatarPresence, PresenceSource, StoreListingSource};
use avatarlib::store::{FailureMode, MemoryStore, ObjectStore};
use avatarlib::{
    AvatarCache, AvatarError, AvatarService, CacheState, EntityId, ImageBlob,
    Outcome, Result, MAX_UPLOAD_BYTES,
};
use image::{DynamicImage, GenericImageView, ImageBuffer, ImageOutputFormat, Rgba};
use url::Url;

const PUBLIC_BASE: &str =
    "https://demo.supabase.co/storage/v1/object/public/personalities";

/// Bulk listing backed by a fixed set of records.
struct CountingSource {
    records: Vec<AvatarPresence>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl CountingSource {
    fn new(records: &[(&str, bool)]) -> Arc<Self> {
        Arc::new(Self {
            records: records
                .iter()
                .map(|(raw, has)| AvatarPresence::new(id(raw), *has))
                .collect(),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PresenceSource for CountingSource {
    async fn fetch_presence(&self) -> Result<Vec<AvatarPresence>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(AvatarError::Initialization("connection refused".into()));
        }
        Ok(self.records.clone())
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    source: Arc<CountingSource>,
    service: AvatarService,
}

fn id(raw: &str) -> EntityId {
    EntityId::new(raw).unwrap()
}

fn fixture(records: &[(&str, bool)]) -> Fixture {
    avatarlib::initialize();
    let store = Arc::new(MemoryStore::new("personalities"));
    let source = CountingSource::new(records);
    let cache = Arc::new(AvatarCache::new("test".to_owned(), source.clone()));
    let service = AvatarService::new(
        store.clone(),
        cache,
        Url::parse(PUBLIC_BASE).unwrap(),
    )
    .unwrap();
    Fixture {
        store,
        source,
        service,
    }
}

fn png(width: u32, height: u32) -> ImageBlob {
    let buffer =
        ImageBuffer::from_pixel(width, height, Rgba([200u8, 40, 90, 255]));
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(buffer)
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .unwrap();
    ImageBlob::new(cursor.into_inner(), "image/png")
}

#[tokio::test]
async fn never_uploaded_entities_resolve_to_none() {
    let f = fixture(&[("a", true), ("b", false)]);

    assert_eq!(f.service.resolve(&id("b")).await, None);
    assert_eq!(f.service.resolve(&id("unknown")).await, None);
    assert_eq!(
        f.service.resolve(&id("a")).await.unwrap().as_str(),
        format!("{}/a/avatar.webp", PUBLIC_BASE)
    );
    assert_eq!(f.source.calls(), 1);
}

#[tokio::test]
async fn upload_then_resolve_returns_canonical_url() {
    let f = fixture(&[]);
    let entity = id("3f2a9c");

    f.service.upload(&entity, png(2000, 1000)).await.unwrap();

    let url = f.service.resolve(&entity).await.unwrap();
    assert!(url.as_str().contains("3f2a9c"));
    assert!(url.as_str().ends_with("/3f2a9c/avatar.webp"));
    assert_eq!(f.source.calls(), 1);

    let stored = f.store.get("3f2a9c/avatar.webp").unwrap();
    let decoded = image::load_from_memory(&stored).unwrap();
    assert_eq!(decoded.dimensions(), (512, 256));
}

#[tokio::test]
async fn upload_overwrites_previous_avatar() {
    let f = fixture(&[]);
    let entity = id("a");

    f.service.upload(&entity, png(64, 64)).await.unwrap();
    f.service.upload(&entity, png(32, 16)).await.unwrap();

    let stored = f.store.get("a/avatar.webp").unwrap();
    let decoded = image::load_from_memory(&stored).unwrap();
    assert_eq!(decoded.dimensions(), (32, 16));
    assert_eq!(f.store.calls().put, 2);
}

#[tokio::test]
async fn remove_then_resolve_returns_none() {
    let f = fixture(&[("a", true)]);
    f.store.insert("a/avatar.webp", vec![1]);
    let entity = id("a");

    assert!(f.service.resolve(&entity).await.is_some());
    f.service.remove(&entity).await.unwrap();
    assert_eq!(f.service.resolve(&entity).await, None);
    assert!(!f.store.contains("a/avatar.webp"));

    // removing again is fine
    f.service.remove(&entity).await.unwrap();
    assert_eq!(f.service.resolve(&entity).await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resolves_share_one_bulk_fetch() {
    let f = fixture(&[("a", true)]);
    let service = Arc::new(f.service);

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let raw = if i % 2 == 0 { "a" } else { "b" };
                service.resolve(&EntityId::new(raw).unwrap()).await
            })
        })
        .collect();

    let mut found = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            found += 1;
        }
    }
    assert_eq!(found, 25);
    assert_eq!(f.source.calls(), 1);
}

#[tokio::test]
async fn non_image_upload_is_rejected_without_store_calls() {
    let f = fixture(&[]);
    let blob = ImageBlob::new(b"%PDF-1.4".to_vec(), "application/pdf");

    let err = f.service.upload(&id("a"), blob).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(f.store.calls().total(), 0);
    assert_eq!(f.source.calls(), 0);
}

#[tokio::test]
async fn oversized_upload_is_rejected_without_store_calls() {
    let f = fixture(&[]);
    let blob =
        ImageBlob::new(vec![0u8; MAX_UPLOAD_BYTES as usize + 1], "image/png");

    let err = f.service.upload(&id("a"), blob).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(f.store.calls().total(), 0);

    let outcome = Outcome::from(Err::<(), _>(err));
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("too large"));
}

#[tokio::test]
async fn undecodable_image_is_not_stored() {
    let f = fixture(&[]);
    let blob = ImageBlob::new(b"not really a png".to_vec(), "image/png");

    let err = f.service.upload(&id("a"), blob).await.unwrap_err();
    assert!(matches!(err, AvatarError::Image(_)));
    assert_eq!(f.store.calls().put, 0);
}

#[tokio::test]
async fn failed_bulk_fetch_leaves_every_entity_without_avatar() {
    let f = fixture(&[("a", true)]);
    f.source.fail.store(true, Ordering::SeqCst);

    assert_eq!(f.service.resolve(&id("a")).await, None);
    assert_eq!(f.service.resolve(&id("b")).await, None);
    assert_eq!(f.service.cache().state(), CacheState::Ready);
    assert!(f.service.cache().is_empty());
    assert_eq!(f.source.calls(), 1);
}

#[tokio::test]
async fn missing_bucket_leaves_cache_untouched() {
    let f = fixture(&[("a", false)]);
    f.store.fail_with(FailureMode::BucketMissing);

    let err = f.service.upload(&id("a"), png(10, 10)).await.unwrap_err();
    assert!(matches!(err, AvatarError::BucketNotFound(ref b) if b == "personalities"));
    assert_eq!(f.service.resolve(&id("a")).await, None);

    f.store.recover();
    f.store.insert("a/avatar.webp", vec![1]);
    f.store
        .fail_with(FailureMode::Message("permission denied".to_owned()));
    f.service.cache().set(id("a"), true).unwrap();

    let err = f.service.remove(&id("a")).await.unwrap_err();
    assert!(matches!(err, AvatarError::Store(ref m) if m == "permission denied"));
    assert!(f.service.resolve(&id("a")).await.is_some());
}

#[tokio::test]
async fn refresh_rereads_the_listing() {
    let f = fixture(&[("a", false)]);
    f.service.upload(&id("a"), png(8, 8)).await.unwrap();
    assert!(f.service.resolve(&id("a")).await.is_some());

    // the fixed listing still says "no avatar", so a refresh drops the
    // local write
    f.service.cache().refresh().await;
    assert_eq!(f.source.calls(), 2);
    assert_eq!(f.service.resolve(&id("a")).await, None);
}

#[tokio::test]
async fn listing_source_sees_uploads_after_refresh() {
    avatarlib::initialize();
    let store = Arc::new(MemoryStore::new("personalities"));
    store.insert("b/avatar.webp", vec![1]);
    let dyn_store: Arc<dyn ObjectStore> = store.clone();
    let source = Arc::new(StoreListingSource::new(dyn_store.clone()));
    let cache = Arc::new(AvatarCache::new("listing".to_owned(), source));
    let service =
        AvatarService::new(dyn_store, cache, Url::parse(PUBLIC_BASE).unwrap())
            .unwrap();

    assert!(service.resolve(&id("b")).await.is_some());
    assert_eq!(service.resolve(&id("a")).await, None);

    service.upload(&id("a"), png(20, 20)).await.unwrap();
    service.cache().refresh().await;
    assert!(service.resolve(&id("a")).await.is_some());
    assert!(service.resolve(&id("b")).await.is_some());
}

#[tokio::test]
async fn upload_from_file_on_disk() {
    use tempdir::TempDir;
    let dir = TempDir::new("avatarlib_test").unwrap();
    let path = dir.path().join("portrait.jpg");
    let portrait = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
        300,
        900,
        Rgba([10u8, 20, 30, 255]),
    ));
    portrait.to_rgb8().save(&path).unwrap();

    let f = fixture(&[]);
    let bytes = tokio::fs::read(&path).await.unwrap();
    f.service
        .upload(&id("p-7"), ImageBlob::new(bytes, "image/jpeg"))
        .await
        .unwrap();

    let stored = f.store.get("p-7/avatar.webp").unwrap();
    let decoded = image::load_from_memory(&stored).unwrap();
    assert_eq!(decoded.dimensions(), (170, 512));
}
