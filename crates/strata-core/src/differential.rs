//! Differential Engine
//!
//! Base-snapshot-plus-delta persistence over a record sequence. Every
//! `base_interval` additions a full snapshot is captured; additions in
//! between become minimal deltas against the nearest preceding snapshot.
//! Reconstruction replays deltas over a snapshot; log compaction folds an
//! overgrown delta chain into a fresh synthetic snapshot.
//!
//! Each delta carries a 32-bit checksum of its serialized operation;
//! reconstruction skips deltas that fail verification instead of silently
//! producing corrupt state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::record::MemoryRecord;

/// Records added between full snapshots, by default
pub const DEFAULT_BASE_INTERVAL: u64 = 100;

/// Referencing deltas a snapshot may accumulate before compaction
const COMPACTION_DELTA_LIMIT: usize = 50;

// ============================================================================
// DATA SHAPES
// ============================================================================

/// Field subset of a record captured by snapshots and deltas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl From<&MemoryRecord> for SnapshotRecord {
    fn from(record: &MemoryRecord) -> Self {
        Self {
            id: record.id.clone(),
            text: record.text.clone(),
            created_at: record.created_at,
            metadata: record.metadata.clone(),
        }
    }
}

/// Full point-in-time capture of the record set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub record_count: usize,
    pub records: Vec<SnapshotRecord>,
}

/// Minimal recorded change relative to a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum DeltaOp {
    /// A record absent from the base snapshot was added
    Add { record: SnapshotRecord },
    /// A record present in the base changed; only changed fields carried
    Modify { id: String, changed: Map<String, Value> },
    /// A record was removed
    Delete { id: String },
}

/// One delta in a snapshot's chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub id: String,
    /// Snapshot this delta applies against
    pub base_ref: String,
    /// Position within the base's chain, starting at 1
    pub sequence_number: u64,
    /// Global message count when the delta was recorded; replay order key
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub op: DeltaOp,
    /// 32-bit checksum of the serialized op
    pub checksum: u32,
}

impl Delta {
    fn new(base_ref: String, sequence_number: u64, message_count: u64, op: DeltaOp) -> Self {
        let checksum = op_checksum(&op);
        Self {
            id: Uuid::new_v4().to_string(),
            base_ref,
            sequence_number,
            message_count,
            created_at: Utc::now(),
            op,
            checksum,
        }
    }

    /// Verify the stored checksum against the op
    pub fn verify(&self) -> bool {
        op_checksum(&self.op) == self.checksum
    }
}

/// Chronological index entry mapping a count range to its snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotIndexEntry {
    pub snapshot_id: String,
    pub start_count: u64,
    pub end_count: u64,
    pub timestamp: DateTime<Utc>,
}

/// What an `add` produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Snapshot(String),
    Delta(String),
}

/// Sync payload: one base snapshot plus its referencing deltas
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeBundle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_snapshot: Option<Snapshot>,
    #[serde(default)]
    pub deltas: Vec<Delta>,
    pub current_message_count: u64,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Snapshot/delta differencing engine
#[derive(Debug, Clone, Default)]
pub struct DifferentialEngine {
    base_interval: u64,
    message_count: u64,
    snapshots: HashMap<String, Snapshot>,
    deltas: HashMap<String, Delta>,
    index: Vec<SnapshotIndexEntry>,
}

impl DifferentialEngine {
    /// Engine with the default base interval of 100
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_BASE_INTERVAL)
    }

    /// Engine snapshotting every `base_interval` additions (minimum 1)
    pub fn with_interval(base_interval: u64) -> Self {
        Self {
            base_interval: base_interval.max(1),
            ..Default::default()
        }
    }

    /// Monotonic count of records added
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Number of retained snapshots
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Number of retained deltas
    pub fn delta_count(&self) -> usize {
        self.deltas.len()
    }

    /// Record an addition. `history` is the full record sequence so far,
    /// current record included; it is only captured when a snapshot fires.
    pub fn add(&mut self, record: &MemoryRecord, history: &[MemoryRecord]) -> AddOutcome {
        self.message_count += 1;
        let interval = self.base_interval.max(1);
        if interval == 1 || self.message_count % interval == 1 {
            AddOutcome::Snapshot(self.create_snapshot(history))
        } else {
            self.create_delta(record, history)
        }
    }

    /// Capture a full snapshot of the passed records
    pub fn create_snapshot(&mut self, records: &[MemoryRecord]) -> String {
        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            record_count: records.len(),
            records: records.iter().map(SnapshotRecord::from).collect(),
        };
        let id = snapshot.id.clone();
        self.index.push(SnapshotIndexEntry {
            snapshot_id: id.clone(),
            start_count: self.message_count.saturating_sub(self.base_interval),
            end_count: self.message_count,
            timestamp: snapshot.created_at,
        });
        self.snapshots.insert(id.clone(), snapshot);
        id
    }

    /// Record a delta against the nearest preceding snapshot, falling back
    /// to a full snapshot when none exists yet
    fn create_delta(&mut self, record: &MemoryRecord, history: &[MemoryRecord]) -> AddOutcome {
        let Some(base_id) = self.nearest_snapshot_id(self.message_count) else {
            return AddOutcome::Snapshot(self.create_snapshot(history));
        };

        let incoming = SnapshotRecord::from(record);
        let base = &self.snapshots[&base_id];
        let op = match base.records.iter().find(|r| r.id == incoming.id) {
            Some(existing) => DeltaOp::Modify {
                id: incoming.id.clone(),
                changed: changed_fields(existing, &incoming),
            },
            None => DeltaOp::Add { record: incoming },
        };

        let sequence_number = self.deltas_for(&base_id).count() as u64 + 1;
        let delta = Delta::new(base_id.clone(), sequence_number, self.message_count, op);
        let delta_id = delta.id.clone();
        self.deltas.insert(delta_id.clone(), delta);

        if self.deltas_for(&base_id).count() > COMPACTION_DELTA_LIMIT {
            self.compact(&base_id);
        }

        AddOutcome::Delta(delta_id)
    }

    /// Rebuild the record set as of `target_count`.
    ///
    /// Empty history (no snapshot at or before the target) yields an empty
    /// list rather than an error. Corrupt deltas are skipped with a warning.
    pub fn reconstruct(&self, target_count: u64) -> Vec<SnapshotRecord> {
        let Some(entry) = self
            .index
            .iter()
            .filter(|e| e.end_count <= target_count)
            .max_by_key(|e| e.end_count)
        else {
            return Vec::new();
        };

        let mut records = self.snapshots[&entry.snapshot_id].records.clone();

        let mut replay: Vec<&Delta> = self
            .deltas_for(&entry.snapshot_id)
            .filter(|d| d.message_count > entry.end_count && d.message_count <= target_count)
            .collect();
        // Last-writer-by-timestamp for colliding counts from merged histories
        replay.sort_by(|a, b| {
            a.message_count
                .cmp(&b.message_count)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.sequence_number.cmp(&b.sequence_number))
        });

        for delta in replay {
            if !delta.verify() {
                tracing::warn!(delta_id = %delta.id, "skipping delta with bad checksum");
                continue;
            }
            apply_delta(&mut records, &delta.op);
        }

        records
    }

    /// Bundle the base snapshot covering `since_count` plus all of its
    /// referencing deltas, for a peer to import
    pub fn export_changes(&self, since_count: u64) -> ChangeBundle {
        let entry = self
            .index
            .iter()
            .filter(|e| e.end_count <= since_count.max(1))
            .max_by_key(|e| e.end_count)
            .or_else(|| self.index.iter().min_by_key(|e| e.end_count));

        let Some(entry) = entry else {
            return ChangeBundle {
                base_snapshot: None,
                deltas: Vec::new(),
                current_message_count: self.message_count,
            };
        };

        let mut deltas: Vec<Delta> = self.deltas_for(&entry.snapshot_id).cloned().collect();
        deltas.sort_by_key(|d| d.message_count);

        ChangeBundle {
            base_snapshot: Some(self.snapshots[&entry.snapshot_id].clone()),
            deltas,
            current_message_count: self.message_count,
        }
    }

    /// Merge a peer's bundle. Unseen snapshots and deltas are adopted by
    /// id, seen ones are left alone, and the local count advances to the
    /// maximum. Idempotent, and commutative for disjoint delta sets.
    pub fn import_changes(&mut self, bundle: &ChangeBundle) {
        if let Some(snapshot) = &bundle.base_snapshot {
            if !self.snapshots.contains_key(&snapshot.id) {
                let end = bundle
                    .deltas
                    .iter()
                    .map(|d| d.message_count)
                    .min()
                    .map(|m| m.saturating_sub(1))
                    .unwrap_or(snapshot.record_count as u64);
                self.index.push(SnapshotIndexEntry {
                    snapshot_id: snapshot.id.clone(),
                    start_count: end.saturating_sub(self.base_interval),
                    end_count: end,
                    timestamp: snapshot.created_at,
                });
                self.snapshots.insert(snapshot.id.clone(), snapshot.clone());
            }
        }
        for delta in &bundle.deltas {
            self.deltas
                .entry(delta.id.clone())
                .or_insert_with(|| delta.clone());
        }
        self.message_count = self.message_count.max(bundle.current_message_count);
    }

    /// Fold a snapshot's delta chain into a new synthetic snapshot,
    /// atomically replacing the old snapshot and its deltas in the index
    pub fn compact(&mut self, snapshot_id: &str) -> bool {
        let Some(pos) = self.index.iter().position(|e| e.snapshot_id == snapshot_id) else {
            return false;
        };
        let old_entry = self.index[pos].clone();
        let chain_len = self.deltas_for(snapshot_id).count() as u64;
        if chain_len == 0 {
            return false;
        }

        let state = self.reconstruct(old_entry.end_count + chain_len);

        let synthetic = Snapshot {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            record_count: state.len(),
            records: state,
        };
        tracing::debug!(
            old = %snapshot_id,
            new = %synthetic.id,
            folded = chain_len,
            "compacted delta chain"
        );

        self.index[pos] = SnapshotIndexEntry {
            snapshot_id: synthetic.id.clone(),
            start_count: old_entry.start_count,
            end_count: old_entry.end_count + chain_len,
            timestamp: synthetic.created_at,
        };
        self.snapshots.insert(synthetic.id.clone(), synthetic);
        self.snapshots.remove(snapshot_id);
        self.deltas.retain(|_, d| d.base_ref != snapshot_id);
        true
    }

    fn nearest_snapshot_id(&self, count: u64) -> Option<String> {
        self.index
            .iter()
            .filter(|e| e.start_count <= count)
            .max_by_key(|e| e.end_count)
            .map(|e| e.snapshot_id.clone())
    }

    fn deltas_for<'a>(&'a self, snapshot_id: &'a str) -> impl Iterator<Item = &'a Delta> {
        self.deltas.values().filter(move |d| d.base_ref == snapshot_id)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Serialize-and-compare field diff between two captured records
fn changed_fields(existing: &SnapshotRecord, incoming: &SnapshotRecord) -> Map<String, Value> {
    let old = serde_json::to_value(existing).unwrap_or(Value::Null);
    let new = serde_json::to_value(incoming).unwrap_or(Value::Null);
    let mut changed = Map::new();
    if let (Some(old), Some(new)) = (old.as_object(), new.as_object()) {
        for (key, value) in new {
            if old.get(key) != Some(value) {
                changed.insert(key.clone(), value.clone());
            }
        }
    }
    changed
}

/// Add appends, modify merges fields on the matching id, delete removes
fn apply_delta(records: &mut Vec<SnapshotRecord>, op: &DeltaOp) {
    match op {
        DeltaOp::Add { record } => records.push(record.clone()),
        DeltaOp::Modify { id, changed } => {
            if let Some(target) = records.iter_mut().find(|r| r.id == *id) {
                let mut value = serde_json::to_value(&*target).unwrap_or(Value::Null);
                if let Some(obj) = value.as_object_mut() {
                    for (key, field) in changed {
                        obj.insert(key.clone(), field.clone());
                    }
                }
                if let Ok(updated) = serde_json::from_value(value) {
                    *target = updated;
                }
            }
        }
        DeltaOp::Delete { id } => records.retain(|r| r.id != *id),
    }
}

/// 32-bit multiplicative checksum over the serialized op, seed 0
fn op_checksum(op: &DeltaOp) -> u32 {
    let serialized = serde_json::to_string(op).unwrap_or_default();
    let mut hash: u32 = 0;
    for byte in serialized.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as u32);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordInput;

    fn record(i: usize) -> MemoryRecord {
        RecordInput {
            id: Some(format!("rec-{}", i)),
            ..RecordInput::text(format!("conversational text number {}", i))
        }
        .into_record()
        .unwrap()
    }

    fn drive(engine: &mut DifferentialEngine, n: usize) -> Vec<MemoryRecord> {
        let mut history = Vec::new();
        for i in 0..n {
            history.push(record(i));
            let current = history.last().unwrap().clone();
            engine.add(&current, &history);
        }
        history
    }

    #[test]
    fn test_first_add_snapshots() {
        let mut engine = DifferentialEngine::new();
        let r = record(0);
        let outcome = engine.add(&r, std::slice::from_ref(&r));
        assert!(matches!(outcome, AddOutcome::Snapshot(_)));
        assert_eq!(engine.message_count(), 1);
    }

    #[test]
    fn test_reconstruction_equivalence_150() {
        let mut engine = DifferentialEngine::new();
        let history = drive(&mut engine, 150);
        assert_eq!(engine.message_count(), 150);

        let rebuilt = engine.reconstruct(150);
        assert_eq!(rebuilt.len(), 150);
        let mut ids: Vec<&str> = rebuilt.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), history.len());
    }

    #[test]
    fn test_reconstruct_midpoint() {
        let mut engine = DifferentialEngine::new();
        drive(&mut engine, 150);
        assert_eq!(engine.reconstruct(120).len(), 120);
    }

    #[test]
    fn test_reconstruct_empty_history() {
        let engine = DifferentialEngine::new();
        assert!(engine.reconstruct(50).is_empty());
    }

    #[test]
    fn test_modify_delta_carries_changed_fields_only() {
        let mut engine = DifferentialEngine::with_interval(10);
        let mut history = drive(&mut engine, 1);

        let mut edited = history[0].clone();
        edited.text = "rewritten".to_string();
        history.push(edited.clone());
        let outcome = engine.add(&edited, &history);
        let AddOutcome::Delta(delta_id) = outcome else {
            panic!("expected a delta");
        };

        let rebuilt = engine.reconstruct(2);
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(rebuilt[0].text, "rewritten");

        // Only the text field differed
        let delta = &engine.deltas[&delta_id];
        let DeltaOp::Modify { changed, .. } = &delta.op else {
            panic!("expected modify");
        };
        assert_eq!(changed.len(), 1);
        assert!(changed.contains_key("text"));
    }

    #[test]
    fn test_corrupt_delta_skipped() {
        let mut engine = DifferentialEngine::with_interval(10);
        let mut history = drive(&mut engine, 1);
        history.push(record(1));
        let outcome = engine.add(&history[1].clone(), &history);
        let AddOutcome::Delta(delta_id) = outcome else {
            panic!("expected a delta");
        };

        // Tamper with the op; checksum no longer matches
        if let Some(delta) = engine.deltas.get_mut(&delta_id) {
            delta.op = DeltaOp::Delete {
                id: "rec-0".to_string(),
            };
        }

        let rebuilt = engine.reconstruct(2);
        // Tampered delta skipped: base record survives, addition is lost
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(rebuilt[0].id, "rec-0");
    }

    #[test]
    fn test_compaction_folds_chain() {
        let mut engine = DifferentialEngine::new();
        drive(&mut engine, 60);
        // 59 deltas crossed the 50-delta limit, so the chain was folded
        assert!(engine.delta_count() <= COMPACTION_DELTA_LIMIT);
        assert_eq!(engine.reconstruct(60).len(), 60);
    }

    #[test]
    fn test_export_import_round_trip() {
        let mut source = DifferentialEngine::with_interval(10);
        drive(&mut source, 15);

        let bundle = source.export_changes(15);
        assert!(bundle.base_snapshot.is_some());

        let mut target = DifferentialEngine::with_interval(10);
        target.import_changes(&bundle);
        assert_eq!(target.message_count(), 15);

        // Import is idempotent
        let before = (target.snapshot_count(), target.delta_count());
        target.import_changes(&bundle);
        assert_eq!((target.snapshot_count(), target.delta_count()), before);
    }

    #[test]
    fn test_interval_one_always_snapshots() {
        let mut engine = DifferentialEngine::with_interval(1);
        let history = drive(&mut engine, 5);
        assert_eq!(engine.snapshot_count(), history.len());
        assert_eq!(engine.delta_count(), 0);
    }
}
