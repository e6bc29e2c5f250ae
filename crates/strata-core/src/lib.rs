//! # Strata Core
//!
//! Local conversational memory engine. Everything runs in-process with
//! zero network dependencies:
//!
//! - **Fingerprint Index**: hash-bucket + TF-IDF key-term fingerprints for
//!   fast similarity search without embeddings
//! - **Compression Pipeline**: five stages from lossy semantic extraction
//!   down to LZW and base64 binary packing, each independently skippable
//! - **Differential Engine**: snapshot/delta version history with
//!   checksummed deltas, export/import, and chain compaction
//! - **Hierarchical Store**: hot (LRU) / warm (durable) / cold
//!   (compressed day sessions) / frozen (export-only) tiers with
//!   promotion on read
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata_core::{HierarchicalStore, MemoryBackend, RecordInput, SearchOptions};
//!
//! let store = HierarchicalStore::new(Box::new(MemoryBackend::new()));
//!
//! let record = store.add(RecordInput::text("Started the billing migration"))?;
//! let hits = store.search("billing", SearchOptions::default())?;
//! let similar = store.find_similar(&record.id, 0.5, 10)?;
//! ```
//!
//! Durable deployments use [`SqliteBackend`] instead of [`MemoryBackend`],
//! and can spawn a [`MaintenanceScheduler`] to archive aged sessions in
//! the background.

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod differential;
pub mod error;
pub mod fingerprint;
pub mod pipeline;
pub mod record;
pub mod store;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Errors
pub use error::{EngineError, Result};

// Records and the export boundary
pub use record::{MemoryExport, MemoryRecord, RecordInput};

// Fingerprint index
pub use fingerprint::{CorpusState, Fingerprint, FingerprintIndex, SimilarMatch};

// Compression pipeline
pub use pipeline::{
    compress_session, decompress_session, CompressOptions, CompressedRecord, CompressionMetrics,
    CompressionPipeline, PipelineStats, Stage, StageMetric,
};

// Differential history
pub use differential::{
    AddOutcome, ChangeBundle, Delta, DeltaOp, DifferentialEngine, Snapshot, SnapshotRecord,
};

// Hierarchical store
pub use store::{
    ArchiveReport, HierarchicalStore, MaintenanceScheduler, MemoryBackend, SearchOptions,
    SqliteBackend, StoreConfig, TierStats, WarmBackend,
};

/// Crate version, surfaced in export metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
