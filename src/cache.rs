use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Mutex;

use crate::id::EntityId;
use crate::presence::{AvatarPresence, PresenceSource};
use crate::{AvatarError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Uninitialized,
    Ready,
}

/// Process-local mirror of which entities have an avatar.
///
/// The cache is filled by a single bulk fetch from its
/// [`PresenceSource`] the first time [`AvatarCache::ensure_ready`] is
/// awaited. Concurrent callers share that one fetch. A failed fetch
/// leaves the cache ready and empty, it is not retried until the cache
/// is invalidated.
pub struct AvatarCache {
    /// Label for logging
    label: String,
    source: Arc<dyn PresenceSource>,
    entries: RwLock<HashMap<EntityId, bool>>,
    ready: AtomicBool,
    /// Serializes initialization and invalidation
    init: Mutex<()>,
}

impl AvatarCache {
    pub fn new(label: String, source: Arc<dyn PresenceSource>) -> Self {
        log::debug!("cache/{}: created", label);
        Self {
            label,
            source,
            entries: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(false),
            init: Mutex::new(()),
        }
    }

    pub fn state(&self) -> CacheState {
        if self.is_ready() {
            CacheState::Ready
        } else {
            CacheState::Uninitialized
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Bring the cache into the `Ready` state, fetching the bulk listing
    /// if no other caller has done so yet.
    pub async fn ensure_ready(&self) {
        if self.is_ready() {
            return;
        }

        let _guard = self.init.lock().await;
        // another caller may have finished while we waited for the lock
        if self.is_ready() {
            return;
        }

        log::debug!("cache/{}: loading avatar information", self.label);
        match self.source.fetch_presence().await {
            Ok(records) => {
                let mut entries = self.write();
                entries.clear();
                for record in records {
                    entries.insert(record.entity_id, record.has_avatar);
                }
                log::info!(
                    "cache/{}: initialized with {} entries",
                    self.label,
                    entries.len()
                );
            }
            Err(e) => {
                self.write().clear();
                log::warn!(
                    "cache/{}: failed to load avatar information, \
                     continuing without avatars: {}",
                    self.label,
                    e
                );
            }
        }
        self.ready.store(true, Ordering::Release);
    }

    /// The cached flag of `id`, `None` if unknown or not yet loaded.
    pub fn get(&self, id: &EntityId) -> Option<bool> {
        if !self.is_ready() {
            return None;
        }
        self.read().get(id).copied()
    }

    /// Whether `id` is known to have an avatar.
    pub fn has_avatar(&self, id: &EntityId) -> bool {
        self.get(id).unwrap_or(false)
    }

    /// Record the avatar flag of `id`. Last write wins.
    pub fn set(&self, id: EntityId, has_avatar: bool) -> Result<()> {
        if !self.is_ready() {
            return Err(AvatarError::NotReady);
        }
        log::debug!(
            "cache/{}: set {} has_avatar={}",
            self.label,
            id,
            has_avatar
        );
        self.write().insert(id, has_avatar);
        Ok(())
    }

    /// Drop all entries and return to `Uninitialized`; the next
    /// [`Self::ensure_ready`] fetches the listing again.
    pub async fn invalidate(&self) {
        let _guard = self.init.lock().await;
        self.ready.store(false, Ordering::Release);
        self.write().clear();
        log::debug!("cache/{}: invalidated", self.label);
    }

    /// Invalidate and immediately reload.
    pub async fn refresh(&self) {
        self.invalidate().await;
        self.ensure_ready().await;
    }

    /// All known entries, ordered by entity id.
    pub fn snapshot(&self) -> Vec<AvatarPresence> {
        let mut all: Vec<AvatarPresence> = self
            .read()
            .iter()
            .map(|(id, has_avatar)| AvatarPresence::new(id.clone(), *has_avatar))
            .collect();
        all.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        all
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<EntityId, bool>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EntityId, bool>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn id(raw: &str) -> EntityId {
        EntityId::new(raw).unwrap()
    }

    /// Source answering from a fixed list, counting its calls.
    struct FixedSource {
        records: Vec<AvatarPresence>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(records: &[(&str, bool)]) -> Arc<Self> {
            Arc::new(Self {
                records: records
                    .iter()
                    .map(|(raw, has)| AvatarPresence::new(id(raw), *has))
                    .collect(),
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                records: vec![],
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PresenceSource for FixedSource {
        async fn fetch_presence(&self) -> Result<Vec<AvatarPresence>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail {
                return Err(AvatarError::Initialization(
                    "backend unreachable".to_owned(),
                ));
            }
            Ok(self.records.clone())
        }
    }

    #[tokio::test]
    async fn loads_once_and_answers_from_memory() {
        let source = FixedSource::new(&[("a", true), ("b", false)]);
        let cache = AvatarCache::new("test".to_owned(), source.clone());
        assert_eq!(cache.state(), CacheState::Uninitialized);
        assert_eq!(cache.get(&id("a")), None);

        cache.ensure_ready().await;
        cache.ensure_ready().await;

        assert_eq!(cache.state(), CacheState::Ready);
        assert_eq!(source.calls(), 1);
        assert_eq!(cache.get(&id("a")), Some(true));
        assert_eq!(cache.get(&id("b")), Some(false));
        assert_eq!(cache.get(&id("c")), None);
        assert!(!cache.has_avatar(&id("c")));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_fetch() {
        let source = FixedSource::new(&[("a", true)]);
        let cache = Arc::new(AvatarCache::new("test".to_owned(), source.clone()));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache.ensure_ready().await;
                    cache.has_avatar(&EntityId::new("a").unwrap())
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn abandoned_initialization_is_taken_over() {
        let source = FixedSource::new(&[("a", true)]);
        let cache = AvatarCache::new("test".to_owned(), source.clone());

        let first =
            tokio::time::timeout(Duration::from_millis(1), cache.ensure_ready())
                .await;
        assert!(first.is_err());
        assert_eq!(cache.state(), CacheState::Uninitialized);

        cache.ensure_ready().await;
        assert_eq!(cache.state(), CacheState::Ready);
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.get(&id("a")), Some(true));
    }

    #[tokio::test]
    async fn failed_fetch_degrades_to_empty() {
        let source = FixedSource::failing();
        let cache = AvatarCache::new("test".to_owned(), source.clone());
        cache.ensure_ready().await;
        cache.ensure_ready().await;

        assert_eq!(cache.state(), CacheState::Ready);
        assert!(cache.is_empty());
        assert_eq!(cache.get(&id("a")), None);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn set_requires_ready() {
        let cache =
            AvatarCache::new("test".to_owned(), FixedSource::new(&[]));
        let err = cache.set(id("a"), true).unwrap_err();
        assert!(matches!(err, AvatarError::NotReady));

        cache.ensure_ready().await;
        cache.set(id("a"), true).unwrap();
        cache.set(id("a"), false).unwrap();
        assert_eq!(cache.get(&id("a")), Some(false));
    }

    #[tokio::test]
    async fn invalidate_discards_local_writes() {
        let source = FixedSource::new(&[("a", false)]);
        let cache = AvatarCache::new("test".to_owned(), source.clone());
        cache.ensure_ready().await;
        cache.set(id("a"), true).unwrap();
        cache.set(id("b"), true).unwrap();

        cache.invalidate().await;
        assert_eq!(cache.state(), CacheState::Uninitialized);
        assert!(cache.is_empty());

        cache.refresh().await;
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.get(&id("a")), Some(false));
        assert_eq!(cache.get(&id("b")), None);
    }

    #[tokio::test]
    async fn snapshot_is_sorted() {
        let source = FixedSource::new(&[("c", true), ("a", false), ("b", true)]);
        let cache = AvatarCache::new("test".to_owned(), source);
        cache.ensure_ready().await;
        let ids: Vec<_> = cache
            .snapshot()
            .into_iter()
            .map(|p| p.entity_id.to_string())
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }
}
