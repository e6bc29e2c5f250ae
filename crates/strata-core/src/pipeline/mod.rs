//! Multi-stage compression pipeline
//!
//! A record passes through an ordered, independently toggleable sequence of
//! stages; each stage's output becomes the next stage's input and an
//! explicit [`Stage`] marker is recorded so decompression can invert
//! exactly the stages that ran, in strict reverse order.
//!
//! | Stage | Transform | Reversibility |
//! |---|---|---|
//! | 1 semantic extraction | text → `{action, entities, temporal, quantities}` | lossy |
//! | 2 code structure | code text → `{language, signatures, classes, lines}` | lossy |
//! | 3 differential encode | keep only fields differing from a previous state | lossless w/ previous |
//! | 4 dictionary (LZW) | canonical JSON → code stream | lossless |
//! | 5 binary packing | code stream → base64 text | lossless |
//!
//! The code heuristic is evaluated against the ORIGINAL text before the
//! semantic stage rewrites it; when both fire, the semantic summary owns
//! the text slot and the code structure travels beside it.

mod code;
mod lzw;
mod semantic;

pub use code::{looks_like_code, CodeStructure};
pub use lzw::{lzw_compress, lzw_decompress};
pub use semantic::{Quantity, SemanticSummary};

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

use crate::error::{EngineError, Result};
use crate::record::MemoryRecord;

// ============================================================================
// STAGES & OPTIONS
// ============================================================================

/// Applied-stage marker, recorded in application order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    SemanticExtract,
    CodeExtract,
    DifferentialEncode,
    Dictionary,
    BinaryPack,
}

/// Which stages a `compress` call applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressOptions {
    pub semantic: bool,
    pub code: bool,
    pub differential: bool,
    pub dictionary: bool,
    pub binary_pack: bool,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            semantic: true,
            code: true,
            differential: false,
            dictionary: true,
            binary_pack: true,
        }
    }
}

impl CompressOptions {
    /// Lossless-only configuration: stages 4 and 5
    pub fn lossless() -> Self {
        Self {
            semantic: false,
            code: false,
            differential: false,
            dictionary: true,
            binary_pack: true,
        }
    }

    /// Lossless with differential encoding: stages 3 through 5
    pub fn lossless_differential() -> Self {
        Self {
            differential: true,
            ..Self::lossless()
        }
    }
}

// ============================================================================
// ARTIFACTS & METRICS
// ============================================================================

/// Per-stage byte sizes of the working payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMetric {
    pub stage: Stage,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

/// Metrics surfaced per compression call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionMetrics {
    pub original_bytes: usize,
    pub compressed_bytes: usize,
    /// `1 − compressed/original`; negative when a stage expanded the payload
    pub ratio: f64,
    pub elapsed_micros: u64,
    #[serde(default)]
    pub stages: Vec<StageMetric>,
}

/// A compressed record plus everything needed to invert it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedRecord {
    /// Id of the source record, kept outside the payload for lookups
    pub id: String,
    /// Stages that ran, in application order
    pub stages: Vec<Stage>,
    /// Working payload after the final stage
    pub payload: Value,
    pub metrics: CompressionMetrics,
}

/// Aggregate pipeline statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub compressions: u64,
    pub total_original_bytes: u64,
    pub total_compressed_bytes: u64,
    pub average_ratio: f64,
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Staged record compressor
#[derive(Debug, Clone, Default)]
pub struct CompressionPipeline {
    options: CompressOptions,
    stats: PipelineStats,
}

impl CompressionPipeline {
    /// Pipeline with the default stage set (1, 2, 4, 5)
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with explicit stage toggles
    pub fn with_options(options: CompressOptions) -> Self {
        Self {
            options,
            stats: PipelineStats::default(),
        }
    }

    /// Aggregate statistics over every `compress` call so far
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Run the enabled stages over a working copy of `record`.
    ///
    /// `previous` is required when the differential stage is enabled and is
    /// the caller-retained state the delta is taken against.
    pub fn compress(
        &mut self,
        record: &MemoryRecord,
        previous: Option<&Value>,
    ) -> Result<CompressedRecord> {
        let started = Instant::now();
        let mut payload = serde_json::to_value(record)?;
        let original_bytes = payload_size(&payload)?;

        let mut stages = Vec::new();
        let mut stage_metrics = Vec::new();

        // Heuristic runs on the original text, before stage 1 consumes it
        let code_structure = (self.options.code && looks_like_code(&record.text))
            .then(|| CodeStructure::extract(&record.text));

        if self.options.semantic {
            let before = payload_size(&payload)?;
            let summary = SemanticSummary::extract(&record.text);
            set_field(&mut payload, "text", serde_json::to_value(summary)?)?;
            stages.push(Stage::SemanticExtract);
            stage_metrics.push(StageMetric {
                stage: Stage::SemanticExtract,
                bytes_before: before,
                bytes_after: payload_size(&payload)?,
            });
        }

        if let Some(structure) = code_structure {
            let before = payload_size(&payload)?;
            let slot = if stages.contains(&Stage::SemanticExtract) {
                "codeStructure"
            } else {
                "text"
            };
            set_field(&mut payload, slot, serde_json::to_value(structure)?)?;
            stages.push(Stage::CodeExtract);
            stage_metrics.push(StageMetric {
                stage: Stage::CodeExtract,
                bytes_before: before,
                bytes_after: payload_size(&payload)?,
            });
        }

        if self.options.differential {
            let previous = previous.ok_or_else(|| {
                EngineError::InvalidInput(
                    "differential stage requires the previous state".to_string(),
                )
            })?;
            let before = payload_size(&payload)?;
            payload = diff_fields(&payload, previous);
            stages.push(Stage::DifferentialEncode);
            stage_metrics.push(StageMetric {
                stage: Stage::DifferentialEncode,
                bytes_before: before,
                bytes_after: payload_size(&payload)?,
            });
        }

        if self.options.dictionary {
            let canonical = serde_json::to_string(&payload)?;
            let before = canonical.len();
            let codes = lzw_compress(&canonical);
            payload = serde_json::to_value(codes)?;
            stages.push(Stage::Dictionary);
            stage_metrics.push(StageMetric {
                stage: Stage::Dictionary,
                bytes_before: before,
                bytes_after: payload_size(&payload)?,
            });
        }

        if self.options.binary_pack {
            let serialized = serde_json::to_string(&payload)?;
            let before = serialized.len();
            payload = Value::String(general_purpose::STANDARD.encode(serialized.as_bytes()));
            stages.push(Stage::BinaryPack);
            stage_metrics.push(StageMetric {
                stage: Stage::BinaryPack,
                bytes_before: before,
                bytes_after: payload_size(&payload)?,
            });
        }

        let compressed_bytes = payload_size(&payload)?;
        let ratio = if original_bytes > 0 {
            1.0 - compressed_bytes as f64 / original_bytes as f64
        } else {
            0.0
        };

        self.stats.compressions += 1;
        self.stats.total_original_bytes += original_bytes as u64;
        self.stats.total_compressed_bytes += compressed_bytes as u64;
        let n = self.stats.compressions as f64;
        self.stats.average_ratio = (self.stats.average_ratio * (n - 1.0) + ratio) / n;

        Ok(CompressedRecord {
            id: record.id.clone(),
            stages,
            payload,
            metrics: CompressionMetrics {
                original_bytes,
                compressed_bytes,
                ratio,
                elapsed_micros: started.elapsed().as_micros() as u64,
                stages: stage_metrics,
            },
        })
    }

    /// Invert the recorded stages in strict reverse order.
    ///
    /// `previous` must be the same state passed to `compress` when the
    /// differential stage ran.
    pub fn decompress(
        &self,
        compressed: &CompressedRecord,
        previous: Option<&Value>,
    ) -> Result<MemoryRecord> {
        let mut payload = compressed.payload.clone();
        let semantic_ran = compressed.stages.contains(&Stage::SemanticExtract);
        let mut code_stubs: Option<String> = None;

        for stage in compressed.stages.iter().rev() {
            match stage {
                Stage::BinaryPack => {
                    let packed = payload.as_str().ok_or_else(|| {
                        EngineError::CorruptData("binary-pack payload is not a string".into())
                    })?;
                    let bytes = general_purpose::STANDARD.decode(packed).map_err(|e| {
                        EngineError::CorruptData(format!("base64 decode failed: {}", e))
                    })?;
                    let text = String::from_utf8(bytes).map_err(|e| {
                        EngineError::CorruptData(format!("packed payload is not utf-8: {}", e))
                    })?;
                    payload = parse_corrupt_guard(&text)?;
                }
                Stage::Dictionary => {
                    let codes: Vec<u32> =
                        serde_json::from_value(payload.clone()).map_err(|e| {
                            EngineError::CorruptData(format!("malformed code stream: {}", e))
                        })?;
                    let text = lzw_decompress(&codes)?;
                    payload = parse_corrupt_guard(&text)?;
                }
                Stage::DifferentialEncode => {
                    let previous = previous.ok_or_else(|| {
                        EngineError::InvalidInput(
                            "differential decode requires the previous state".to_string(),
                        )
                    })?;
                    payload = merge_fields(previous, &payload);
                }
                Stage::CodeExtract => {
                    let slot = if semantic_ran { "codeStructure" } else { "text" };
                    let raw = take_field(&mut payload, slot)?;
                    let structure: CodeStructure =
                        serde_json::from_value(raw).map_err(|e| {
                            EngineError::CorruptData(format!("malformed code structure: {}", e))
                        })?;
                    if semantic_ran {
                        code_stubs = Some(structure.reconstruct());
                    } else {
                        set_field(&mut payload, "text", Value::String(structure.reconstruct()))?;
                    }
                }
                Stage::SemanticExtract => {
                    let raw = take_field(&mut payload, "text")?;
                    let summary: SemanticSummary =
                        serde_json::from_value(raw).map_err(|e| {
                            EngineError::CorruptData(format!("malformed semantic summary: {}", e))
                        })?;
                    set_field(&mut payload, "text", Value::String(summary.reconstruct()))?;
                }
            }
        }

        let mut record: MemoryRecord = serde_json::from_value(payload)?;
        if let Some(stubs) = code_stubs {
            record.text = format!("{}\n{}", record.text, stubs);
        }
        Ok(record)
    }
}

// ============================================================================
// SESSION BULK COMPRESSION
// ============================================================================

/// Bulk-compress a session's record list with the lossless stages (4–5),
/// producing a transport-safe blob for the cold tier.
pub fn compress_session(records: &[MemoryRecord]) -> Result<String> {
    let canonical = serde_json::to_string(records)?;
    let codes = lzw_compress(&canonical);
    let serialized = serde_json::to_string(&codes)?;
    Ok(general_purpose::STANDARD.encode(serialized.as_bytes()))
}

/// Invert [`compress_session`]; any malformed layer fails with `CorruptData`
pub fn decompress_session(blob: &str) -> Result<Vec<MemoryRecord>> {
    let bytes = general_purpose::STANDARD
        .decode(blob)
        .map_err(|e| EngineError::CorruptData(format!("session base64 decode failed: {}", e)))?;
    let serialized = String::from_utf8(bytes)
        .map_err(|e| EngineError::CorruptData(format!("session blob is not utf-8: {}", e)))?;
    let codes: Vec<u32> = serde_json::from_str(&serialized)
        .map_err(|e| EngineError::CorruptData(format!("malformed session code stream: {}", e)))?;
    let canonical = lzw_decompress(&codes)?;
    serde_json::from_str(&canonical)
        .map_err(|e| EngineError::CorruptData(format!("malformed session records: {}", e)))
}

// ============================================================================
// HELPERS
// ============================================================================

fn payload_size(payload: &Value) -> Result<usize> {
    Ok(serde_json::to_string(payload)?.len())
}

fn parse_corrupt_guard(text: &str) -> Result<Value> {
    serde_json::from_str(text)
        .map_err(|e| EngineError::CorruptData(format!("malformed stage payload: {}", e)))
}

fn set_field(payload: &mut Value, key: &str, value: Value) -> Result<()> {
    payload
        .as_object_mut()
        .ok_or_else(|| EngineError::CorruptData("working payload is not an object".into()))?
        .insert(key.to_string(), value);
    Ok(())
}

fn take_field(payload: &mut Value, key: &str) -> Result<Value> {
    payload
        .as_object_mut()
        .ok_or_else(|| EngineError::CorruptData("working payload is not an object".into()))?
        .remove(key)
        .ok_or_else(|| EngineError::CorruptData(format!("missing stage field `{}`", key)))
}

/// Keep only fields whose serialized value differs from the previous state.
/// The id always survives so the artifact stays addressable.
fn diff_fields(current: &Value, previous: &Value) -> Value {
    let (Some(cur), Some(prev)) = (current.as_object(), previous.as_object()) else {
        return current.clone();
    };
    let mut diff = serde_json::Map::new();
    for (key, value) in cur {
        if key == "id" || prev.get(key) != Some(value) {
            diff.insert(key.clone(), value.clone());
        }
    }
    Value::Object(diff)
}

/// Overlay a field diff onto the previous state
fn merge_fields(previous: &Value, diff: &Value) -> Value {
    let (Some(prev), Some(d)) = (previous.as_object(), diff.as_object()) else {
        return diff.clone();
    };
    let mut merged = prev.clone();
    for (key, value) in d {
        merged.insert(key.clone(), value.clone());
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordInput;

    fn record(text: &str) -> MemoryRecord {
        RecordInput::text(text).into_record().unwrap()
    }

    #[test]
    fn test_lossless_round_trip() {
        let mut pipeline = CompressionPipeline::with_options(CompressOptions::lossless());
        let original = record("exact bytes must survive — naïve 🚀 text");
        let compressed = pipeline.compress(&original, None).unwrap();
        assert_eq!(
            compressed.stages,
            vec![Stage::Dictionary, Stage::BinaryPack]
        );
        let restored = pipeline.decompress(&compressed, None).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_lossless_differential_round_trip() {
        let mut pipeline =
            CompressionPipeline::with_options(CompressOptions::lossless_differential());
        let mut previous = record("original phrasing");
        previous.id = "r1".to_string();
        let mut current = previous.clone();
        current.text = "edited phrasing".to_string();

        let prev_state = serde_json::to_value(&previous).unwrap();
        let compressed = pipeline.compress(&current, Some(&prev_state)).unwrap();
        let restored = pipeline.decompress(&compressed, Some(&prev_state)).unwrap();
        assert_eq!(restored, current);
    }

    #[test]
    fn test_differential_without_previous_rejected() {
        let mut pipeline =
            CompressionPipeline::with_options(CompressOptions::lossless_differential());
        let err = pipeline.compress(&record("x"), None).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_semantic_stage_is_lossy_but_structured() {
        let mut pipeline = CompressionPipeline::new();
        let original = record("Started the migration today, moved 3 tables");
        let compressed = pipeline.compress(&original, None).unwrap();
        assert!(compressed.stages.contains(&Stage::SemanticExtract));

        let restored = pipeline.decompress(&compressed, None).unwrap();
        assert_eq!(restored.id, original.id);
        assert_eq!(restored.created_at, original.created_at);
        assert!(restored.text.contains("started"));
        assert!(restored.text.contains("migration"));
        assert!(restored.text.contains("today"));
    }

    #[test]
    fn test_code_heuristic_fires_on_original_text() {
        let mut pipeline = CompressionPipeline::new();
        let original = record("def handler(event):\n    return event\n");
        let compressed = pipeline.compress(&original, None).unwrap();
        // Stage 1 consumed the text, yet stage 2 still saw the raw code
        assert!(compressed.stages.contains(&Stage::SemanticExtract));
        assert!(compressed.stages.contains(&Stage::CodeExtract));

        let restored = pipeline.decompress(&compressed, None).unwrap();
        assert!(restored.text.contains("def handler(event)"));
    }

    #[test]
    fn test_decompress_skips_absent_stages() {
        let mut pipeline = CompressionPipeline::with_options(CompressOptions {
            semantic: false,
            code: false,
            differential: false,
            dictionary: true,
            binary_pack: false,
        });
        let original = record("dictionary only");
        let compressed = pipeline.compress(&original, None).unwrap();
        assert_eq!(compressed.stages, vec![Stage::Dictionary]);
        assert_eq!(pipeline.decompress(&compressed, None).unwrap(), original);
    }

    #[test]
    fn test_corrupt_payload_reported() {
        let mut pipeline = CompressionPipeline::with_options(CompressOptions::lossless());
        let mut compressed = pipeline.compress(&record("abc"), None).unwrap();
        compressed.payload = Value::String("%%% not base64 %%%".to_string());
        let err = pipeline.decompress(&compressed, None).unwrap_err();
        assert!(matches!(err, EngineError::CorruptData(_)));
    }

    #[test]
    fn test_metrics_cover_each_stage() {
        let mut pipeline = CompressionPipeline::with_options(CompressOptions::lossless());
        let compressed = pipeline
            .compress(&record(&"repetition ".repeat(200)), None)
            .unwrap();
        assert_eq!(compressed.metrics.stages.len(), 2);
        assert!(compressed.metrics.original_bytes > 0);
        assert!(compressed.metrics.ratio > 0.0);
        assert_eq!(pipeline.stats().compressions, 1);
    }

    #[test]
    fn test_session_round_trip() {
        let records: Vec<MemoryRecord> = (0..20)
            .map(|i| record(&format!("session member number {}", i)))
            .collect();
        let blob = compress_session(&records).unwrap();
        let restored = decompress_session(&blob).unwrap();
        assert_eq!(restored, records);
    }

    #[test]
    fn test_session_corrupt_blob() {
        assert!(matches!(
            decompress_session("definitely-not-a-blob").unwrap_err(),
            EngineError::CorruptData(_)
        ));
    }
}
