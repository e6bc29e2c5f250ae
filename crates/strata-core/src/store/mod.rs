//! Hierarchical Store
//!
//! Routes records across four tiers:
//! - **Hot**: in-memory LRU cache, bounded by `hot_cache_limit`
//! - **Warm**: durable backend, authoritative for recent records
//! - **Cold**: compressed calendar-day session blobs
//! - **Frozen**: export-only, never read back automatically
//!
//! Reads promote on hit (warm → hot, cold → warm + hot) and a record id is
//! resident in exactly one of warm/cold at a time; hot is a cache over
//! warm. Every public operation takes the store-wide operation lock first,
//! so the background maintenance task and foreground calls are serialized
//! against each other.

mod backend;
mod maintenance;

pub use backend::{MemoryBackend, SqliteBackend, WarmBackend};
pub use maintenance::MaintenanceScheduler;

use chrono::{Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use crate::error::{EngineError, Result};
use crate::fingerprint::{Fingerprint, FingerprintIndex};
use crate::pipeline::{compress_session, decompress_session};
use crate::record::{MemoryExport, MemoryRecord, RecordInput};

/// Backend namespace for warm-tier records
const RECORDS_STORE: &str = "records";

/// Backend namespace for cold-tier session blobs
const SESSIONS_STORE: &str = "sessions";

// ============================================================================
// CONFIG, OPTIONS, STATS
// ============================================================================

/// Tunables for tier routing
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Hot tier capacity (LRU-evicted beyond this)
    pub hot_cache_limit: usize,
    /// Warm records older than this are eligible for cold archival
    pub warm_to_cold: Duration,
    /// Warm count that triggers synchronous session compression on `add`
    pub auto_compress_threshold: usize,
    /// Default result cap for `search`
    pub search_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hot_cache_limit: 10,
            warm_to_cold: Duration::hours(24),
            auto_compress_threshold: 100,
            search_limit: 100,
        }
    }
}

/// Options for `search`
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Also scan (and decompress) cold session blobs; higher latency
    pub search_cold: bool,
    /// Result cap; store default when `None`
    pub limit: Option<usize>,
}

/// What one `compress_old_sessions` run archived
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub sessions: usize,
    pub records: usize,
}

/// Per-tier counts and lifetime counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierStats {
    pub hot_count: usize,
    pub warm_count: usize,
    pub cold_sessions: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub sessions_compressed: u64,
    pub records_archived: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: u64,
    cache_misses: u64,
    sessions_compressed: u64,
    records_archived: u64,
    /// Warm count at the end of the previous `add`, for crossing detection
    last_warm_count: usize,
}

#[derive(Default)]
struct FingerprintState {
    index: FingerprintIndex,
    by_id: HashMap<String, Fingerprint>,
}

// ============================================================================
// STORE
// ============================================================================

/// Four-tier record store
///
/// All methods take `&self`; interior state is mutex-guarded so an
/// `Arc<HierarchicalStore>` can be shared with the maintenance task.
pub struct HierarchicalStore {
    config: StoreConfig,
    backend: Box<dyn WarmBackend>,
    /// Serializes every public operation; see module docs
    op_lock: Mutex<()>,
    hot: Mutex<LruCache<String, MemoryRecord>>,
    fingerprints: Mutex<FingerprintState>,
    counters: Mutex<Counters>,
}

impl HierarchicalStore {
    /// Store with default configuration over the given backend
    pub fn new(backend: Box<dyn WarmBackend>) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    /// Store with explicit configuration
    pub fn with_config(backend: Box<dyn WarmBackend>, config: StoreConfig) -> Self {
        let capacity = NonZeroUsize::new(config.hot_cache_limit.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            backend,
            op_lock: Mutex::new(()),
            hot: Mutex::new(LruCache::new(capacity)),
            fingerprints: Mutex::new(FingerprintState::default()),
            counters: Mutex::new(Counters::default()),
        }
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Validate and store a record in hot + warm.
    ///
    /// Rejects invalid input before any tier mutation. Duplicate ids are
    /// last-write-wins. Crossing the auto-compress threshold runs session
    /// compression synchronously before returning.
    pub fn add(&self, input: RecordInput) -> Result<MemoryRecord> {
        let _op = self.lock_ops()?;
        let record = input.into_record()?;

        self.backend
            .put(RECORDS_STORE, &record.id, &serde_json::to_value(&record)?)?;

        // Fingerprint and cache registration follow the durable write, so
        // a failed put leaves no ghost entries for the id
        {
            let mut fps = self.lock_fingerprints()?;
            let fp = fps.index.generate(
                &record.text,
                record.context_text.as_deref(),
                record.created_at,
            );
            fps.by_id.insert(record.id.clone(), fp);
        }
        self.lock_hot()?.put(record.id.clone(), record.clone());

        // Compression runs on the upward threshold crossing, not on every
        // add while the count sits at or above it
        let warm_count = self.backend.count(RECORDS_STORE)?;
        let crossed = {
            let mut counters = self.lock_counters()?;
            let crossed = warm_count >= self.config.auto_compress_threshold
                && counters.last_warm_count < self.config.auto_compress_threshold;
            counters.last_warm_count = warm_count;
            crossed
        };
        if crossed {
            let report = self.compress_old_sessions_locked()?;
            self.lock_counters()?.last_warm_count = self.backend.count(RECORDS_STORE)?;
            if report.sessions > 0 {
                tracing::debug!(
                    sessions = report.sessions,
                    records = report.records,
                    "auto-compression archived aged sessions"
                );
            }
        }

        Ok(record)
    }

    /// Remove a record from whichever tier holds it
    pub fn delete(&self, id: &str) -> Result<bool> {
        let _op = self.lock_ops()?;
        self.lock_fingerprints()?.by_id.remove(id);
        let was_hot = self.lock_hot()?.pop(id).is_some();
        let was_warm = self.backend.delete(RECORDS_STORE, id)?;
        if was_warm || was_hot {
            return Ok(true);
        }

        // Cold: rewrite the containing session without the member
        for (session_id, blob) in self.session_blobs()? {
            let Some(mut records) = self.decode_session(&session_id, &blob) else {
                continue;
            };
            let before = records.len();
            records.retain(|r| r.id != id);
            if records.len() < before {
                if records.is_empty() {
                    self.backend.delete(SESSIONS_STORE, &session_id)?;
                } else {
                    self.backend
                        .put(SESSIONS_STORE, &session_id, &Value::String(compress_session(&records)?))?;
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Probe hot → warm → cold, promoting on hit. `Ok(None)` when absent
    /// from all three; the frozen tier is never consulted.
    pub fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let _op = self.lock_ops()?;

        if let Some(record) = self.lock_hot()?.get(id).cloned() {
            self.lock_counters()?.cache_hits += 1;
            return Ok(Some(record));
        }
        self.lock_counters()?.cache_misses += 1;

        if let Some(value) = self.backend.get(RECORDS_STORE, id)? {
            let record: MemoryRecord = serde_json::from_value(value)?;
            self.lock_hot()?.put(record.id.clone(), record.clone());
            return Ok(Some(record));
        }

        // Cold scan: decompress session blobs until the member is found.
        // A corrupt blob is logged and treated as not-found for its members.
        for (session_id, blob) in self.session_blobs()? {
            let Some(records) = self.decode_session(&session_id, &blob) else {
                continue;
            };
            if let Some(found) = records.iter().find(|r| r.id == id).cloned() {
                self.promote_from_cold(&session_id, records, &found)?;
                return Ok(Some(found));
            }
        }

        Ok(None)
    }

    /// Most recent records across hot ∪ warm, descending by timestamp
    pub fn get_recent(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        let _op = self.lock_ops()?;
        let mut merged: HashMap<String, MemoryRecord> = HashMap::new();
        for (_, value) in self.backend.get_all(RECORDS_STORE)? {
            if let Ok(record) = serde_json::from_value::<MemoryRecord>(value) {
                merged.insert(record.id.clone(), record);
            }
        }
        for (id, record) in self.lock_hot()?.iter() {
            merged.insert(id.clone(), record.clone());
        }

        let mut records: Vec<MemoryRecord> = merged.into_values().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    /// Substring search over hot ∪ warm, and cold when requested.
    /// Deduplicated by id, descending by timestamp, capped at the limit.
    pub fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<MemoryRecord>> {
        let _op = self.lock_ops()?;
        let needle = query.to_lowercase();
        let matches = |r: &MemoryRecord| {
            r.text.to_lowercase().contains(&needle)
                || r.context_text
                    .as_deref()
                    .is_some_and(|c| c.to_lowercase().contains(&needle))
        };

        let mut merged: HashMap<String, MemoryRecord> = HashMap::new();

        if options.search_cold {
            for (session_id, blob) in self.session_blobs()? {
                let Some(records) = self.decode_session(&session_id, &blob) else {
                    continue;
                };
                for record in records.into_iter().filter(|r| matches(r)) {
                    merged.insert(record.id.clone(), record);
                }
            }
        }
        for (_, value) in self.backend.get_all(RECORDS_STORE)? {
            if let Ok(record) = serde_json::from_value::<MemoryRecord>(value) {
                if matches(&record) {
                    merged.insert(record.id.clone(), record);
                }
            }
        }
        for (_, record) in self.lock_hot()?.iter() {
            if matches(record) {
                merged.insert(record.id.clone(), record.clone());
            }
        }

        let mut results: Vec<MemoryRecord> = merged.into_values().collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results.truncate(options.limit.unwrap_or(self.config.search_limit));
        Ok(results)
    }

    /// Rank stored records against one record's fingerprint.
    /// Returns `(id, score)` pairs, best first.
    pub fn find_similar(
        &self,
        id: &str,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<(String, f64)>> {
        let _op = self.lock_ops()?;
        let fps = self.lock_fingerprints()?;
        let query = fps
            .by_id
            .get(id)
            .ok_or_else(|| EngineError::NotFound(format!("no fingerprint for record {}", id)))?
            .clone();

        let mut entries: Vec<(&String, &Fingerprint)> =
            fps.by_id.iter().filter(|(rid, _)| rid.as_str() != id).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let corpus: Vec<Fingerprint> = entries.iter().map(|(_, fp)| (*fp).clone()).collect();

        let matches = FingerprintIndex::find_similar(&query, &corpus, threshold, limit);
        Ok(matches
            .into_iter()
            .map(|m| (entries[m.index].0.clone(), m.score))
            .collect())
    }

    /// Stored fingerprint for a record, if it was added to this instance
    pub fn fingerprint_of(&self, id: &str) -> Result<Option<Fingerprint>> {
        Ok(self.lock_fingerprints()?.by_id.get(id).cloned())
    }

    // ========================================================================
    // ARCHIVAL
    // ========================================================================

    /// Archive aged warm records into compressed cold sessions.
    ///
    /// Partitions warm records older than `warm_to_cold` by calendar day,
    /// bulk-compresses each partition, stores it under the session key, and
    /// deletes the originals from warm (and hot). Retry-safe: an existing
    /// session blob is merged with new members rather than overwritten.
    pub fn compress_old_sessions(&self) -> Result<ArchiveReport> {
        let _op = self.lock_ops()?;
        self.compress_old_sessions_locked()
    }

    fn compress_old_sessions_locked(&self) -> Result<ArchiveReport> {
        let cutoff = Utc::now() - self.config.warm_to_cold;

        let mut sessions: HashMap<String, Vec<MemoryRecord>> = HashMap::new();
        for (_, value) in self.backend.get_all(RECORDS_STORE)? {
            if let Ok(record) = serde_json::from_value::<MemoryRecord>(value) {
                if record.created_at < cutoff {
                    sessions.entry(record.session_key()).or_default().push(record);
                }
            }
        }
        if sessions.is_empty() {
            return Ok(ArchiveReport::default());
        }

        let mut report = ArchiveReport::default();
        for (session_id, mut records) in sessions {
            // Merge with an already-archived blob for the same day
            if let Some(Value::String(existing)) = self.backend.get(SESSIONS_STORE, &session_id)? {
                if let Some(previous) = self.decode_session(&session_id, &existing) {
                    for old in previous {
                        if !records.iter().any(|r| r.id == old.id) {
                            records.push(old);
                        }
                    }
                }
            }
            records.sort_by(|a, b| a.created_at.cmp(&b.created_at));

            let blob = compress_session(&records)?;
            self.backend
                .put(SESSIONS_STORE, &session_id, &Value::String(blob))?;

            let mut hot = self.lock_hot()?;
            for record in &records {
                self.backend.delete(RECORDS_STORE, &record.id)?;
                hot.pop(&record.id);
            }
            drop(hot);

            tracing::info!(
                session = %session_id,
                records = records.len(),
                "archived session to cold tier"
            );
            report.sessions += 1;
            report.records += records.len();
        }

        let mut counters = self.lock_counters()?;
        counters.sessions_compressed += report.sessions as u64;
        counters.records_archived += report.records as u64;
        Ok(report)
    }

    // ========================================================================
    // EXPORT BOUNDARY
    // ========================================================================

    /// Snapshot every resident record (cold included) into a plain-data
    /// bundle for the frozen tier
    pub fn export(&self) -> Result<MemoryExport> {
        let _op = self.lock_ops()?;
        let mut merged: HashMap<String, MemoryRecord> = HashMap::new();
        for (session_id, blob) in self.session_blobs()? {
            if let Some(records) = self.decode_session(&session_id, &blob) {
                for record in records {
                    merged.insert(record.id.clone(), record);
                }
            }
        }
        for (_, value) in self.backend.get_all(RECORDS_STORE)? {
            if let Ok(record) = serde_json::from_value::<MemoryRecord>(value) {
                merged.insert(record.id.clone(), record);
            }
        }

        let mut messages: Vec<MemoryRecord> = merged.into_values().collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut metadata = HashMap::new();
        metadata.insert("exportedAt".to_string(), serde_json::json!(Utc::now()));
        metadata.insert("recordCount".to_string(), serde_json::json!(messages.len()));
        metadata.insert(
            "version".to_string(),
            serde_json::json!(env!("CARGO_PKG_VERSION")),
        );

        Ok(MemoryExport {
            messages,
            graph: Value::Null,
            metadata,
        })
    }

    /// Restore records from an export bundle into the warm tier.
    /// Existing ids are overwritten (last write wins). Returns how many
    /// records were imported.
    pub fn import(&self, bundle: &MemoryExport) -> Result<usize> {
        let _op = self.lock_ops()?;
        let mut imported = 0;
        for record in &bundle.messages {
            if record.id.is_empty() || record.text.is_empty() {
                tracing::warn!("skipping malformed record in import bundle");
                continue;
            }
            {
                let mut fps = self.lock_fingerprints()?;
                let fp = fps.index.generate(
                    &record.text,
                    record.context_text.as_deref(),
                    record.created_at,
                );
                fps.by_id.insert(record.id.clone(), fp);
            }
            self.backend
                .put(RECORDS_STORE, &record.id, &serde_json::to_value(record)?)?;
            imported += 1;
        }
        Ok(imported)
    }

    /// Current tier occupancy and lifetime counters
    pub fn stats(&self) -> Result<TierStats> {
        let _op = self.lock_ops()?;
        let counters = self.lock_counters()?;
        Ok(TierStats {
            hot_count: self.lock_hot()?.len(),
            warm_count: self.backend.count(RECORDS_STORE)?,
            cold_sessions: self.backend.count(SESSIONS_STORE)?,
            cache_hits: counters.cache_hits,
            cache_misses: counters.cache_misses,
            sessions_compressed: counters.sessions_compressed,
            records_archived: counters.records_archived,
        })
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Move one member out of a cold session into warm + hot, rewriting the
    /// remainder so the id stays resident in exactly one tier.
    ///
    /// The warm write comes first: until it lands, the session blob stays
    /// untouched, so a storage failure here is retryable. The transient
    /// dual residency between the two writes is invisible to readers
    /// (`get` probes warm before cold) and the archival merge deduplicates
    /// by id.
    fn promote_from_cold(
        &self,
        session_id: &str,
        session_records: Vec<MemoryRecord>,
        found: &MemoryRecord,
    ) -> Result<()> {
        self.backend
            .put(RECORDS_STORE, &found.id, &serde_json::to_value(found)?)?;
        self.lock_hot()?.put(found.id.clone(), found.clone());

        let remainder: Vec<MemoryRecord> = session_records
            .into_iter()
            .filter(|r| r.id != found.id)
            .collect();
        if remainder.is_empty() {
            self.backend.delete(SESSIONS_STORE, session_id)?;
        } else {
            self.backend.put(
                SESSIONS_STORE,
                session_id,
                &Value::String(compress_session(&remainder)?),
            )?;
        }
        tracing::debug!(id = %found.id, session = %session_id, "promoted record from cold tier");
        Ok(())
    }

    fn session_blobs(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .backend
            .get_all(SESSIONS_STORE)?
            .into_iter()
            .filter_map(|(id, value)| value.as_str().map(|s| (id, s.to_string())))
            .collect())
    }

    /// Decode a session blob, logging and swallowing corruption so one bad
    /// blob never aborts a multi-record scan
    fn decode_session(&self, session_id: &str, blob: &str) -> Option<Vec<MemoryRecord>> {
        match decompress_session(blob) {
            Ok(records) => Some(records),
            Err(e) => {
                tracing::warn!(session = %session_id, "skipping corrupt cold session: {}", e);
                None
            }
        }
    }

    fn lock_ops(&self) -> Result<MutexGuard<'_, ()>> {
        self.op_lock
            .lock()
            .map_err(|_| EngineError::StorageUnavailable("operation lock poisoned".to_string()))
    }

    fn lock_hot(&self) -> Result<MutexGuard<'_, LruCache<String, MemoryRecord>>> {
        self.hot
            .lock()
            .map_err(|_| EngineError::StorageUnavailable("hot tier lock poisoned".to_string()))
    }

    fn lock_fingerprints(&self) -> Result<MutexGuard<'_, FingerprintState>> {
        self.fingerprints
            .lock()
            .map_err(|_| EngineError::StorageUnavailable("fingerprint lock poisoned".to_string()))
    }

    fn lock_counters(&self) -> Result<MutexGuard<'_, Counters>> {
        self.counters
            .lock()
            .map_err(|_| EngineError::StorageUnavailable("counter lock poisoned".to_string()))
    }
}
