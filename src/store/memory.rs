use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{
    BucketInfo, BucketOptions, ListOptions, ObjectEntry, ObjectStore,
    PutOptions,
};
use crate::{AvatarError, Result};

/// Failure injected into every subsequent call of a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureMode {
    BucketMissing,
    Message(String),
}

/// Number of calls a [`MemoryStore`] has received, per operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreCalls {
    pub list: usize,
    pub put: usize,
    pub delete: usize,
}

impl StoreCalls {
    pub fn total(&self) -> usize {
        self.list + self.put + self.delete
    }
}

#[derive(Default)]
struct Inner {
    buckets: BTreeSet<String>,
    objects: BTreeMap<String, Vec<u8>>,
    failure: Option<FailureMode>,
}

/// In-process object store with folder-style listing.
///
/// Keys are `/`-separated. Listing with an empty prefix returns the
/// top-level folder names, listing with a folder prefix returns the
/// names directly below it.
#[derive(Default)]
pub struct MemoryStore {
    bucket: String,
    inner: Mutex<Inner>,
    lists: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryStore {
    /// Store whose bucket already exists.
    pub fn new<S: Into<String>>(bucket: S) -> Self {
        let store = Self::without_bucket(bucket);
        let name = store.bucket.clone();
        store.lock().buckets.insert(name);
        store
    }

    /// Store whose bucket has not been created yet.
    pub fn without_bucket<S: Into<String>>(bucket: S) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Make every following operation fail until [`Self::recover`].
    pub fn fail_with(&self, failure: FailureMode) {
        self.lock().failure = Some(failure);
    }

    pub fn recover(&self) {
        self.lock().failure = None;
    }

    pub fn calls(&self) -> StoreCalls {
        StoreCalls {
            list: self.lists.load(Ordering::SeqCst),
            put: self.puts.load(Ordering::SeqCst),
            delete: self.deletes.load(Ordering::SeqCst),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().objects.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).cloned()
    }

    /// Put an object directly, bypassing call accounting.
    pub fn insert<K: Into<String>>(&self, key: K, bytes: Vec<u8>) {
        self.lock().objects.insert(key.into(), bytes);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, inner: &Inner) -> Result<()> {
        match &inner.failure {
            Some(FailureMode::BucketMissing) => {
                Err(AvatarError::BucketNotFound(self.bucket.clone()))
            }
            Some(FailureMode::Message(message)) => {
                Err(AvatarError::Store(message.clone()))
            }
            None if !inner.buckets.contains(&self.bucket) => {
                Err(AvatarError::BucketNotFound(self.bucket.clone()))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_objects(
        &self,
        prefix: &str,
        options: &ListOptions,
    ) -> Result<Vec<ObjectEntry>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();
        self.check(&inner)?;

        let prefix = prefix.trim_matches('/');
        let mut entries: BTreeMap<String, ObjectEntry> = BTreeMap::new();
        for key in inner.objects.keys() {
            let rest = if prefix.is_empty() {
                key.as_str()
            } else {
                match key.strip_prefix(prefix) {
                    Some(rest) if rest.starts_with('/') => &rest[1..],
                    _ => continue,
                }
            };

            let entry = match rest.split_once('/') {
                Some((folder, _)) => ObjectEntry {
                    name: folder.to_owned(),
                    id: None,
                },
                None => ObjectEntry {
                    name: rest.to_owned(),
                    id: Some(key.clone()),
                },
            };
            if let Some(search) = &options.search {
                if !entry.name.contains(search.as_str()) {
                    continue;
                }
            }
            entries.entry(entry.name.clone()).or_insert(entry);
        }

        // BTreeMap iteration is already sorted by name
        Ok(entries
            .into_values()
            .skip(options.offset)
            .take(options.limit)
            .collect())
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        options: &PutOptions,
    ) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        self.check(&inner)?;

        if !options.upsert && inner.objects.contains_key(key) {
            return Err(AvatarError::Store(format!(
                "The resource {} already exists",
                key
            )));
        }
        inner.objects.insert(key.to_owned(), bytes);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        self.check(&inner)?;

        inner.objects.remove(key);
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let inner = self.lock();
        if let Some(FailureMode::Message(message)) = &inner.failure {
            return Err(AvatarError::Store(message.clone()));
        }
        Ok(inner
            .buckets
            .iter()
            .map(|name| BucketInfo {
                id: name.clone(),
                name: name.clone(),
                public: true,
            })
            .collect())
    }

    async fn create_bucket(&self, options: &BucketOptions) -> Result<()> {
        let mut inner = self.lock();
        if let Some(FailureMode::Message(message)) = &inner.failure {
            return Err(AvatarError::Store(message.clone()));
        }
        if !inner.buckets.insert(options.name.clone()) {
            return Err(AvatarError::Store(format!(
                "Bucket {} already exists",
                options.name
            )));
        }
        if inner.failure == Some(FailureMode::BucketMissing) {
            inner.failure = None;
        }
        Ok(())
    }
}
