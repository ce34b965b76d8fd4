// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Two-level result cache keyed by node fingerprint.
//!
//! Level one is an in-memory map of lazy-plan handles, populated during
//! planning and execution and gone at process shutdown. Level two is the
//! materialised on-disk cache, `{cache_dir}/{flow_id}/{fingerprint}.arrow`
//! with a `.sha256` sidecar; the filesystem is authoritative. Entries are
//! immutable once sealed: a reader either sees no entry or a fully sealed
//! one. Seals go through a temp file + rename so a crash mid-write never
//! leaves a half-entry behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest as _, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::ExecutionError;
use crate::fingerprint::Digest;
use crate::graph::FlowId;

/// A sealed result for one fingerprint.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    /// A serialised query plan that has not been materialised.
    LazyPlan(Arc<Vec<u8>>),
    /// A materialised Arrow file in the flow's cache directory.
    MaterialisedTable(PathBuf),
    /// A result written to external storage by a writer node.
    ExternalRef(String),
}

impl CacheEntry {
    /// Plan bytes if this entry is (or scans as) a lazy plan.
    pub fn plan_bytes(&self) -> Option<&[u8]> {
        match self {
            CacheEntry::LazyPlan(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Per-flow result cache.
pub struct ResultCache {
    flow_id: FlowId,
    root: PathBuf,
    plans: Mutex<HashMap<Digest, CacheEntry>>,
}

impl ResultCache {
    pub fn new(cache_dir: impl Into<PathBuf>, flow_id: FlowId) -> Self {
        Self {
            flow_id,
            root: cache_dir.into(),
            plans: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding this flow's materialised entries.
    pub fn flow_dir(&self) -> PathBuf {
        self.root.join(self.flow_id.to_string())
    }

    /// Path of the materialised file for a fingerprint.
    pub fn table_path(&self, fingerprint: &Digest) -> PathBuf {
        self.flow_dir().join(format!("{fingerprint}.arrow"))
    }

    fn checksum_path(&self, fingerprint: &Digest) -> PathBuf {
        self.flow_dir().join(format!("{fingerprint}.sha256"))
    }

    /// Probe both levels for a sealed entry.
    ///
    /// A disk entry with a checksum mismatch is corrupt: it is discarded
    /// here and `None` is returned so the caller rebuilds transparently.
    pub async fn probe(&self, fingerprint: &Digest) -> Option<CacheEntry> {
        if let Some(entry) = self.plans.lock().await.get(fingerprint) {
            return Some(entry.clone());
        }

        let path = self.table_path(fingerprint);
        if !path.exists() {
            return None;
        }
        match self.verify_checksum(fingerprint, &path).await {
            Ok(true) => {
                let entry = CacheEntry::MaterialisedTable(path);
                self.plans
                    .lock()
                    .await
                    .insert(*fingerprint, entry.clone());
                Some(entry)
            }
            Ok(false) => {
                warn!(fingerprint = %fingerprint, "cache checksum mismatch, discarding entry");
                self.discard(fingerprint).await;
                None
            }
            Err(err) => {
                warn!(fingerprint = %fingerprint, error = %err, "cache probe failed, discarding entry");
                self.discard(fingerprint).await;
                None
            }
        }
    }

    /// Whether a sealed entry exists for the fingerprint.
    pub async fn contains(&self, fingerprint: &Digest) -> bool {
        self.probe(fingerprint).await.is_some()
    }

    /// Seal an in-memory entry (lazy plan or external ref).
    pub async fn seal(&self, fingerprint: Digest, entry: CacheEntry) {
        self.plans.lock().await.insert(fingerprint, entry);
    }

    /// Seal materialised bytes to disk, returning the table entry.
    ///
    /// Writes to a temp file, records the checksum, then renames into
    /// place so readers never observe partial content.
    pub async fn seal_table(
        &self,
        fingerprint: Digest,
        bytes: &[u8],
    ) -> Result<CacheEntry, ExecutionError> {
        let dir = self.flow_dir();
        tokio::fs::create_dir_all(&dir).await?;

        let final_path = self.table_path(&fingerprint);
        let tmp_path = dir.join(format!("{fingerprint}.arrow.tmp"));
        tokio::fs::write(&tmp_path, bytes).await?;

        let checksum = hex::encode(Sha256::digest(bytes));
        tokio::fs::write(self.checksum_path(&fingerprint), &checksum).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        debug!(fingerprint = %fingerprint, path = %final_path.display(), "sealed materialised entry");

        let entry = CacheEntry::MaterialisedTable(final_path);
        self.plans.lock().await.insert(fingerprint, entry.clone());
        Ok(entry)
    }

    /// Adopt an already-written file (e.g. produced by the worker) as the
    /// sealed entry for a fingerprint.
    pub async fn seal_table_file(
        &self,
        fingerprint: Digest,
        path: PathBuf,
    ) -> Result<CacheEntry, ExecutionError> {
        let bytes = tokio::fs::read(&path).await?;
        let checksum = hex::encode(Sha256::digest(&bytes));
        tokio::fs::create_dir_all(self.flow_dir()).await?;
        tokio::fs::write(self.checksum_path(&fingerprint), &checksum).await?;

        let final_path = self.table_path(&fingerprint);
        if path != final_path {
            tokio::fs::rename(&path, &final_path).await?;
        }
        let entry = CacheEntry::MaterialisedTable(final_path);
        self.plans.lock().await.insert(fingerprint, entry.clone());
        Ok(entry)
    }

    /// Drop the entries for a set of fingerprints, memory and disk.
    pub async fn invalidate(&self, fingerprints: impl IntoIterator<Item = Digest>) {
        let mut plans = self.plans.lock().await;
        for fingerprint in fingerprints {
            plans.remove(&fingerprint);
            drop_file(&self.table_path(&fingerprint)).await;
            drop_file(&self.checksum_path(&fingerprint)).await;
        }
    }

    /// Remove everything cached for this flow.
    pub async fn clear(&self) {
        self.plans.lock().await.clear();
        let _ = tokio::fs::remove_dir_all(self.flow_dir()).await;
    }

    async fn discard(&self, fingerprint: &Digest) {
        self.plans.lock().await.remove(fingerprint);
        drop_file(&self.table_path(fingerprint)).await;
        drop_file(&self.checksum_path(fingerprint)).await;
    }

    async fn verify_checksum(
        &self,
        fingerprint: &Digest,
        path: &Path,
    ) -> Result<bool, ExecutionError> {
        let checksum_path = self.checksum_path(fingerprint);
        let expected = match tokio::fs::read_to_string(&checksum_path).await {
            Ok(s) => s,
            // Entries sealed by external writers may lack a sidecar;
            // treat the file as authoritative in that case.
            Err(_) => return Ok(true),
        };
        let bytes = tokio::fs::read(path).await?;
        let actual = hex::encode(Sha256::digest(&bytes));
        Ok(actual == expected.trim())
    }
}

async fn drop_file(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove cache file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(tag: &[u8]) -> Digest {
        Digest::of_bytes(tag)
    }

    #[tokio::test]
    async fn probe_misses_on_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), 1);
        assert!(cache.probe(&fp(b"nothing")).await.is_none());
    }

    #[tokio::test]
    async fn sealed_table_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), 1);
        let fingerprint = fp(b"table");

        cache.seal_table(fingerprint, b"arrow-bytes").await.unwrap();
        match cache.probe(&fingerprint).await {
            Some(CacheEntry::MaterialisedTable(path)) => {
                assert_eq!(std::fs::read(path).unwrap(), b"arrow-bytes");
            }
            other => panic!("unexpected probe result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disk_survives_memory_reset() {
        let dir = tempfile::tempdir().unwrap();
        let fingerprint = fp(b"persist");
        {
            let cache = ResultCache::new(dir.path(), 7);
            cache.seal_table(fingerprint, b"payload").await.unwrap();
        }
        // Fresh cache instance: memory gone, disk authoritative.
        let cache = ResultCache::new(dir.path(), 7);
        assert!(cache.probe(&fingerprint).await.is_some());
    }

    #[tokio::test]
    async fn corrupt_entry_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let fingerprint = fp(b"corrupt");
        let cache = ResultCache::new(dir.path(), 1);
        cache.seal_table(fingerprint, b"good-bytes").await.unwrap();

        // Flip the file under the cache's feet.
        std::fs::write(cache.table_path(&fingerprint), b"tampered").unwrap();
        let fresh = ResultCache::new(dir.path(), 1);
        assert!(fresh.probe(&fingerprint).await.is_none());
        // Both files were removed.
        assert!(!fresh.table_path(&fingerprint).exists());
    }

    #[tokio::test]
    async fn invalidate_removes_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let fingerprint = fp(b"gone");
        let cache = ResultCache::new(dir.path(), 1);
        cache.seal_table(fingerprint, b"bytes").await.unwrap();
        cache
            .seal(fp(b"plan"), CacheEntry::LazyPlan(Arc::new(vec![1, 2, 3])))
            .await;

        cache.invalidate([fingerprint, fp(b"plan")]).await;
        assert!(cache.probe(&fingerprint).await.is_none());
        assert!(cache.probe(&fp(b"plan")).await.is_none());
        assert!(!cache.table_path(&fingerprint).exists());
    }

    #[tokio::test]
    async fn lazy_plan_entry_served_from_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), 1);
        let fingerprint = fp(b"lazy");
        cache
            .seal(fingerprint, CacheEntry::LazyPlan(Arc::new(b"plan".to_vec())))
            .await;
        match cache.probe(&fingerprint).await {
            Some(CacheEntry::LazyPlan(bytes)) => assert_eq!(bytes.as_slice(), b"plan"),
            other => panic!("unexpected probe result: {other:?}"),
        }
    }
}
