//! BucketStore - manages bucket files on disk.
//!
//! The store is responsible for the lifecycle of bucket files:
//!
//! - **Saving** buckets (canonical encoding, gzip-compressed, written
//!   atomically via a temp file + rename)
//! - **Loading** buckets by content hash, with hash verification
//! - **Caching** recently used buckets in memory
//!
//! # File Layout
//!
//! ```text
//! <bucket_dir>/
//!   <hash1>.bucket.gz
//!   <hash2>.bucket.gz
//!   ...
//! ```
//!
//! # Thread Safety
//!
//! The cache is behind an `RwLock`, so concurrent reads are cheap and
//! loads are exclusive. When the cache is full an arbitrary entry is
//! evicted.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use tidepool_common::Hash256;

use crate::bucket::Bucket;
use crate::{BucketError, Result};

/// Store for bucket files on disk with an in-memory cache.
pub struct BucketStore {
    /// Directory where bucket files are stored.
    bucket_dir: PathBuf,
    /// Cache of loaded buckets, keyed by content hash.
    cache: RwLock<HashMap<Hash256, Arc<Bucket>>>,
    /// Maximum number of buckets to keep in cache.
    max_cache_size: usize,
}

impl BucketStore {
    /// Default maximum cache size.
    pub const DEFAULT_MAX_CACHE_SIZE: usize = 100;

    /// Create a new store rooted at the given directory.
    pub fn new(bucket_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&bucket_dir)?;

        Ok(Self {
            bucket_dir,
            cache: RwLock::new(HashMap::new()),
            max_cache_size: Self::DEFAULT_MAX_CACHE_SIZE,
        })
    }

    /// Create a new store with a custom cache size.
    pub fn with_cache_size(bucket_dir: PathBuf, max_cache_size: usize) -> Result<Self> {
        std::fs::create_dir_all(&bucket_dir)?;

        Ok(Self {
            bucket_dir,
            cache: RwLock::new(HashMap::new()),
            max_cache_size,
        })
    }

    /// Get the bucket directory path.
    pub fn bucket_dir(&self) -> &Path {
        &self.bucket_dir
    }

    /// Get the file path for a bucket with the given hash.
    pub fn bucket_path(&self, hash: &Hash256) -> PathBuf {
        self.bucket_dir.join(format!("{}.bucket.gz", hash.to_hex()))
    }

    /// Save a bucket to disk and cache it.
    ///
    /// The empty bucket is never written; it is always materialized from
    /// the zero-hash sentinel.
    pub fn put(&self, bucket: Bucket) -> Result<Arc<Bucket>> {
        if bucket.is_empty() {
            return Ok(Arc::new(Bucket::empty()));
        }

        let hash = bucket.hash();
        {
            let cache = self.cache.read().unwrap();
            if let Some(cached) = cache.get(&hash) {
                return Ok(Arc::clone(cached));
            }
        }

        let path = self.bucket_path(&hash);
        if !path.exists() {
            let encoded = bucket.to_encoded_bytes();
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&encoded)?;
            let compressed = encoder.finish()?;

            // Write to a temp file then rename, so readers never see a
            // partially written bucket.
            let tmp_path = path.with_extension("tmp");
            std::fs::write(&tmp_path, &compressed)?;
            std::fs::rename(&tmp_path, &path)?;
            debug!(hash = %hash, entries = bucket.len(), "saved bucket");
        }

        let bucket = Arc::new(bucket);
        self.add_to_cache(hash, Arc::clone(&bucket));
        Ok(bucket)
    }

    /// Load a bucket by its content hash.
    ///
    /// The zero hash resolves to the empty bucket. Loads verify the file's
    /// contents against the requested hash.
    pub fn get_by_hash(&self, hash: &Hash256) -> Result<Arc<Bucket>> {
        if hash.is_zero() {
            return Ok(Arc::new(Bucket::empty()));
        }

        {
            let cache = self.cache.read().unwrap();
            if let Some(cached) = cache.get(hash) {
                return Ok(Arc::clone(cached));
            }
        }

        let path = self.bucket_path(hash);
        if !path.exists() {
            return Err(BucketError::NotFound(hash.to_hex()));
        }

        let file = std::fs::File::open(&path)?;
        let mut decoder = GzDecoder::new(file);
        let mut encoded = Vec::new();
        decoder.read_to_end(&mut encoded)?;

        let bucket = Bucket::from_encoded_bytes(&encoded)?;
        if bucket.hash() != *hash {
            return Err(BucketError::HashMismatch {
                expected: hash.to_hex(),
                actual: bucket.hash().to_hex(),
            });
        }

        let bucket = Arc::new(bucket);
        self.add_to_cache(*hash, Arc::clone(&bucket));
        Ok(bucket)
    }

    /// Check whether a bucket file exists on disk.
    pub fn contains(&self, hash: &Hash256) -> bool {
        hash.is_zero() || self.bucket_path(hash).exists()
    }

    /// Drop all cached buckets.
    pub fn clear_cache(&self) {
        self.cache.write().unwrap().clear();
    }

    /// Number of buckets currently cached.
    pub fn cached_count(&self) -> usize {
        self.cache.read().unwrap().len()
    }

    fn add_to_cache(&self, hash: Hash256, bucket: Arc<Bucket>) {
        let mut cache = self.cache.write().unwrap();
        if cache.len() >= self.max_cache_size && !cache.contains_key(&hash) {
            if let Some(evict) = cache.keys().next().copied() {
                cache.remove(&evict);
            }
        }
        cache.insert(hash, bucket);
    }
}
