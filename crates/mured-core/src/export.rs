//! # Trace Export Module
//!
//! Deterministic encodings of a run trace.
//!
//! - **JSONL**: one canonical JSON object per line, keys in the fixed order
//!   `v, type, i, before, after, projection`. Identical runs give
//!   byte-identical text.
//! - **Binary**: a `postcard` stream behind a small header carrying a magic
//!   marker, a version, the event count and a BLAKE3 checksum of the data
//!   section.
//!
//! ```text
//! [header_len: u32 LE] [TraceHeader (postcard)] [CanonicalTrace (postcard)]
//! ```

use crate::types::{MuredError, ProjectionId, TraceEvent, ValueHash};
use serde::{Deserialize, Serialize};

// =============================================================================
// BINARY FORMAT
// =============================================================================

/// Magic bytes for binary trace files.
pub const TRACE_MAGIC: [u8; 4] = *b"MUTR";

/// Current binary trace format version.
pub const TRACE_VERSION: u8 = 1;

/// Version of the JSONL line format.
pub const JSONL_VERSION: u8 = 1;

/// Event type written on every JSONL line.
pub const STEP_EVENT_TYPE: &str = "kernel.step";

/// Maximum event count accepted on import.
///
/// Checked against the header before the body is decoded.
pub const MAX_IMPORT_EVENT_COUNT: u64 = 1_000_000;

/// Header for binary trace files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceHeader {
    /// Magic bytes to identify the format.
    pub magic: [u8; 4],

    /// Format version.
    pub version: u8,

    /// Number of events in the data section.
    pub event_count: u64,

    /// BLAKE3 digest of the data section.
    pub checksum: [u8; 32],
}

impl TraceHeader {
    #[must_use]
    pub fn new(event_count: u64, checksum: [u8; 32]) -> Self {
        Self {
            magic: TRACE_MAGIC,
            version: TRACE_VERSION,
            event_count,
            checksum,
        }
    }

    /// Validate magic and version.
    ///
    /// Error messages stay generic so they do not describe the format.
    pub fn validate(&self) -> Result<(), MuredError> {
        if self.magic != TRACE_MAGIC {
            return Err(MuredError::SerializationError(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != TRACE_VERSION {
            return Err(MuredError::SerializationError(
                "Unsupported file version".to_string(),
            ));
        }
        Ok(())
    }
}

/// A trace event with plain field types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalEvent {
    pub index: u64,
    pub before: [u8; 32],
    pub after: [u8; 32],
    pub projection: Option<String>,
}

impl From<&TraceEvent> for CanonicalEvent {
    fn from(event: &TraceEvent) -> Self {
        Self {
            index: event.index,
            before: event.before.0,
            after: event.after.0,
            projection: event.projection.as_ref().map(|p| p.as_str().to_string()),
        }
    }
}

impl From<CanonicalEvent> for TraceEvent {
    fn from(event: CanonicalEvent) -> Self {
        Self {
            index: event.index,
            before: ValueHash(event.before),
            after: ValueHash(event.after),
            projection: event.projection.map(ProjectionId),
        }
    }
}

/// Data section of a binary trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalTrace {
    pub events: Vec<CanonicalEvent>,
}

impl CanonicalTrace {
    #[must_use]
    pub fn from_events(events: &[TraceEvent]) -> Self {
        Self {
            events: events.iter().map(CanonicalEvent::from).collect(),
        }
    }

    /// Check that indices run 0, 1, 2, ... without gaps.
    pub fn check_indices(&self) -> Result<(), MuredError> {
        for (expected, event) in self.events.iter().enumerate() {
            if event.index != expected as u64 {
                return Err(MuredError::SerializationError(format!(
                    "Event index {} out of sequence, expected {}",
                    event.index, expected
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// BINARY EXPORT / IMPORT
// =============================================================================

/// Encode a trace in the binary format.
pub fn export_trace(events: &[TraceEvent]) -> Result<Vec<u8>, MuredError> {
    let canonical = CanonicalTrace::from_events(events);

    let data_bytes = postcard::to_allocvec(&canonical)
        .map_err(|e| MuredError::SerializationError(format!("Data: {}", e)))?;
    let header = TraceHeader::new(
        canonical.events.len() as u64,
        *blake3::hash(&data_bytes).as_bytes(),
    );
    let header_bytes = postcard::to_allocvec(&header)
        .map_err(|e| MuredError::SerializationError(format!("Header: {}", e)))?;

    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| MuredError::SerializationError("Header too large".to_string()))?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + data_bytes.len());
    result.extend_from_slice(&header_len.to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data_bytes);
    Ok(result)
}

/// Decode a binary trace, verifying header, checksum, count and indices.
pub fn import_trace(data: &[u8]) -> Result<Vec<TraceEvent>, MuredError> {
    let (len_bytes, rest) = data
        .split_first_chunk::<4>()
        .ok_or_else(|| MuredError::SerializationError("Data too short".to_string()))?;
    let header_len = u32::from_le_bytes(*len_bytes) as usize;

    if rest.len() < header_len {
        return Err(MuredError::SerializationError(
            "Data too short for header".to_string(),
        ));
    }
    let (header_bytes, data_bytes) = rest.split_at(header_len);

    let header: TraceHeader = postcard::from_bytes(header_bytes)
        .map_err(|e| MuredError::SerializationError(format!("Header: {}", e)))?;
    header.validate()?;

    if header.event_count > MAX_IMPORT_EVENT_COUNT {
        return Err(MuredError::SerializationError(format!(
            "Event count {} exceeds maximum allowed {}",
            header.event_count, MAX_IMPORT_EVENT_COUNT
        )));
    }

    if *blake3::hash(data_bytes).as_bytes() != header.checksum {
        return Err(MuredError::SerializationError(
            "Checksum mismatch".to_string(),
        ));
    }

    let canonical: CanonicalTrace = postcard::from_bytes(data_bytes)
        .map_err(|e| MuredError::SerializationError(format!("Data: {}", e)))?;

    if canonical.events.len() as u64 != header.event_count {
        return Err(MuredError::SerializationError(
            "Event count mismatch".to_string(),
        ));
    }
    canonical.check_indices()?;

    Ok(canonical.events.into_iter().map(TraceEvent::from).collect())
}

// =============================================================================
// JSONL
// =============================================================================

/// One JSONL line. Field order here is the key order on disk.
#[derive(Serialize)]
struct JsonlLine<'a> {
    v: u8,
    #[serde(rename = "type")]
    kind: &'static str,
    i: u64,
    before: String,
    after: String,
    projection: Option<&'a str>,
}

/// Render a trace as canonical JSONL, one event per line.
pub fn trace_to_jsonl(events: &[TraceEvent]) -> Result<String, MuredError> {
    let mut out = String::new();
    for event in events {
        let line = JsonlLine {
            v: JSONL_VERSION,
            kind: STEP_EVENT_TYPE,
            i: event.index,
            before: event.before.to_hex(),
            after: event.after.to_hex(),
            projection: event.projection.as_ref().map(ProjectionId::as_str),
        };
        let json = serde_json::to_string(&line)
            .map_err(|e| MuredError::SerializationError(e.to_string()))?;
        out.push_str(&json);
        out.push('\n');
    }
    Ok(out)
}

/// BLAKE3 hex digest of the canonical JSONL rendering.
pub fn trace_checksum(events: &[TraceEvent]) -> Result<String, MuredError> {
    let jsonl = trace_to_jsonl(events)?;
    Ok(ValueHash::of_bytes(jsonl.as_bytes()).to_hex())
}

// =============================================================================
// TESTS
// =============================================================================
