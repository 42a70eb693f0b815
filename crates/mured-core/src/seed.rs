//! # Seed Loader
//!
//! The only way untrusted projection data becomes a [`ProjectionSet`].
//!
//! A seed is a JSON document:
//!
//! ```json
//! {
//!   "meta": {
//!     "schema": "mured.seed/v1",
//!     "name": "peano",
//!     "version": "1.0.0",
//!     "description": "...",
//!     "expected_ids": ["peano.succ", "peano.wrap"]
//!   },
//!   "projections": [ {"id": "...", "pattern": ..., "body": ...} ],
//!   "checksum": "<blake3 hex>"
//! }
//! ```
//!
//! Loading checks, in order: JSON syntax, document structure, schema marker,
//! every projection, the set as a whole, the checksum, expected ids, and the
//! position of the fallback projection. The first failure aborts the load.
//!
//! The checksum is BLAKE3 over the canonical serialization of the document
//! without its `checksum` key, so whitespace and key order in the file do not
//! matter.

use crate::kernel::{ProjectionSet, SeedOrigin};
use crate::primitives::{MAX_SEED_FILE_SIZE, SEED_SCHEMA};
use crate::types::{Projection, SeedIntegrityError, ValidationError};
use crate::value::{Limits, MuValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// Suffix marking a catch-all projection when `meta.fallback` is absent.
const WRAP_SUFFIX: &str = ".wrap";

// =============================================================================
// DOCUMENT
// =============================================================================

/// The `meta` block of a seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedMeta {
    pub schema: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub expected_ids: Vec<String>,
    /// Catch-all projection that must come last.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl SeedMeta {
    fn to_mu(&self) -> MuValue {
        let mut fields = vec![
            ("schema", MuValue::from(self.schema.as_str())),
            ("name", MuValue::from(self.name.as_str())),
            ("version", MuValue::from(self.version.as_str())),
            ("description", MuValue::from(self.description.as_str())),
            (
                "expected_ids",
                MuValue::list(self.expected_ids.iter().map(|id| MuValue::from(id.as_str()))),
            ),
        ];
        if let Some(fallback) = &self.fallback {
            fields.push(("fallback", MuValue::from(fallback.as_str())));
        }
        MuValue::map(fields)
    }

    /// The fallback id: explicit, or the first expected id ending in `.wrap`.
    #[must_use]
    pub fn fallback_id(&self) -> Option<&str> {
        self.fallback.as_deref().or_else(|| {
            self.expected_ids
                .iter()
                .map(String::as_str)
                .find(|id| id.ends_with(WRAP_SUFFIX))
        })
    }
}

/// One projection as written in a seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedEntry {
    pub id: String,
    pub pattern: serde_json::Value,
    pub body: serde_json::Value,
}

/// A whole seed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedDocument {
    pub meta: SeedMeta,
    pub projections: Vec<SeedEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl SeedDocument {
    /// Parse and structurally check a seed document.
    pub fn parse(source: &str) -> Result<Self, SeedIntegrityError> {
        let json: serde_json::Value = serde_json::from_str(source)
            .map_err(|e| SeedIntegrityError::Malformed(e.to_string()))?;
        let document =
            Self::deserialize(&json).map_err(|e| SeedIntegrityError::Schema(e.to_string()))?;
        if document.meta.schema != SEED_SCHEMA {
            return Err(SeedIntegrityError::UnsupportedSchema(
                document.meta.schema.clone(),
            ));
        }
        Ok(document)
    }

    /// Convert every entry into a validated projection, in order.
    pub fn projections(&self, limits: &Limits) -> Result<Vec<Projection>, SeedIntegrityError> {
        self.projections
            .iter()
            .map(|entry| {
                let invalid = |source: ValidationError| SeedIntegrityError::InvalidProjection {
                    id: entry.id.clone(),
                    source,
                };
                let pattern = MuValue::from_json(&entry.pattern, limits).map_err(invalid)?;
                let body = MuValue::from_json(&entry.body, limits).map_err(invalid)?;
                let projection = Projection::new(entry.id.clone(), pattern, body);
                projection.validate(limits).map_err(invalid)?;
                Ok(projection)
            })
            .collect()
    }
}

/// Canonical checksum of a seed's meta block and projections.
#[must_use]
pub fn seed_checksum(meta: &SeedMeta, projections: &[Projection]) -> String {
    let document = MuValue::map([
        ("meta", meta.to_mu()),
        (
            "projections",
            MuValue::list(projections.iter().map(Projection::to_mu)),
        ),
    ]);
    document.content_hash().to_hex()
}

// =============================================================================
// LOADER
// =============================================================================

/// Loads seeds into projection sets.
#[derive(Debug, Clone, Default)]
pub struct SeedLoader {
    limits: Limits,
    required_ids: Vec<String>,
    pinned_checksum: Option<String>,
}

impl SeedLoader {
    /// Loader with default limits and no extra requirements.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits for patterns and bodies.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Ids that must be present in addition to `meta.expected_ids`.
    #[must_use]
    pub fn require_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// A checksum the seed must have, independently of the one it declares.
    #[must_use]
    pub fn pin_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.pinned_checksum = Some(checksum.into());
        self
    }

    /// The limits this loader validates against.
    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Load a seed from a string.
    pub fn load(&self, source: &str) -> Result<ProjectionSet, SeedIntegrityError> {
        let document = SeedDocument::parse(source)?;
        let projections = document.projections(&self.limits)?;
        let actual = seed_checksum(&document.meta, &projections);
        let set = ProjectionSet::with_limits(projections, &self.limits)
            .map_err(SeedIntegrityError::InvalidSet)?;

        let Some(declared) = document.checksum.as_deref() else {
            return Err(SeedIntegrityError::Schema(
                "missing field `checksum`".to_string(),
            ));
        };
        for expected in std::iter::once(declared).chain(self.pinned_checksum.as_deref()) {
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(SeedIntegrityError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let meta = &document.meta;
        let present: BTreeSet<&str> = set.iter().map(|p| p.id.as_str()).collect();
        let fallback = meta.fallback_id();
        let missing: BTreeSet<&str> = meta
            .expected_ids
            .iter()
            .chain(&self.required_ids)
            .map(String::as_str)
            .chain(fallback)
            .filter(|id| !present.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(SeedIntegrityError::MissingProjections(
                missing.into_iter().map(str::to_owned).collect(),
            ));
        }

        if let Some(fallback) = fallback {
            let last = set.iter().last().map(|p| p.id.as_str()).unwrap_or_default();
            if last != fallback {
                return Err(SeedIntegrityError::FallbackNotLast {
                    fallback: fallback.to_string(),
                    last: last.to_string(),
                });
            }
        }

        info!(
            seed = %meta.name,
            version = %meta.version,
            projections = set.len(),
            checksum = %actual,
            "seed loaded"
        );
        Ok(set.with_origin(SeedOrigin {
            name: meta.name.clone(),
            version: meta.version.clone(),
            checksum: actual,
        }))
    }

    /// Load a seed file, refusing files over [`MAX_SEED_FILE_SIZE`].
    pub fn load_path(&self, path: &Path) -> Result<ProjectionSet, SeedIntegrityError> {
        let size = std::fs::metadata(path)
            .map_err(|e| SeedIntegrityError::IoError(format!("{}: {}", path.display(), e)))?
            .len();
        if size > MAX_SEED_FILE_SIZE {
            return Err(SeedIntegrityError::IoError(format!(
                "{}: seed file is {} bytes, limit is {}",
                path.display(),
                size,
                MAX_SEED_FILE_SIZE
            )));
        }
        let source = std::fs::read_to_string(path)
            .map_err(|e| SeedIntegrityError::IoError(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), bytes = size, "reading seed");
        self.load(&source)
    }

    /// Compute the checksum of an unsealed (or stale) seed and insert it.
    ///
    /// Returns the sealed document as pretty-printed JSON. Everything `load`
    /// checks before the checksum is checked here too.
    pub fn seal(&self, source: &str) -> Result<String, SeedIntegrityError> {
        let mut document = SeedDocument::parse(source)?;
        let projections = document.projections(&self.limits)?;
        let checksum = seed_checksum(&document.meta, &projections);
        ProjectionSet::with_limits(projections, &self.limits)
            .map_err(SeedIntegrityError::InvalidSet)?;

        document.checksum = Some(checksum);
        serde_json::to_string_pretty(&document)
            .map_err(|e| SeedIntegrityError::Malformed(e.to_string()))
    }
}

/// Load a seed with the default loader.
pub fn load_projections(source: &str) -> Result<ProjectionSet, SeedIntegrityError> {
    SeedLoader::new().load(source)
}

/// Seal a seed with the default loader.
pub fn seal_seed(source: &str) -> Result<String, SeedIntegrityError> {
    SeedLoader::new().seal(source)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unsealed(projections: serde_json::Value, expected: &[&str]) -> String {
        json!({
            "meta": {
                "schema": SEED_SCHEMA,
                "name": "peano",
                "version": "1.0.0",
                "description": "countdown",
                "expected_ids": expected,
            },
            "projections": projections,
        })
        .to_string()
    }

    fn peano_projections() -> serde_json::Value {
        json!([
            {"id": "peano.succ", "pattern": {"succ": {"var": "n"}}, "body": {"var": "n"}},
            {"id": "peano.wrap", "pattern": {"wrap": {"var": "x"}}, "body": {"var": "x"}},
        ])
    }

    fn sealed_peano() -> String {
        seal_seed(&unsealed(peano_projections(), &["peano.succ", "peano.wrap"])).expect("seal")
    }

    #[test]
    fn sealed_seed_loads() {
        let set = load_projections(&sealed_peano()).expect("load");
        let ids: Vec<&str> = set.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["peano.succ", "peano.wrap"]);
        let origin = set.origin().expect("origin");
        assert_eq!(origin.name, "peano");
        assert_eq!(origin.checksum.len(), 64);
    }

    #[test]
    fn checksum_ignores_formatting() {
        let sealed = sealed_peano();
        let compact: serde_json::Value = serde_json::from_str(&sealed).expect("json");
        assert!(load_projections(&compact.to_string()).is_ok());
    }

    #[test]
    fn tampered_seed_is_rejected() {
        let sealed = sealed_peano().replace("\"succ\"", "\"pred\"");
        assert!(matches!(
            load_projections(&sealed),
            Err(SeedIntegrityError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn pinned_checksum_must_agree() {
        let sealed = sealed_peano();
        let loader = SeedLoader::new().pin_checksum("00".repeat(32));
        assert!(matches!(
            loader.load(&sealed),
            Err(SeedIntegrityError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn missing_checksum_is_schema_error() {
        let source = unsealed(peano_projections(), &["peano.succ"]);
        assert!(matches!(
            load_projections(&source),
            Err(SeedIntegrityError::Schema(_))
        ));
    }

    #[test]
    fn entry_without_body_is_schema_error() {
        let source = unsealed(json!([{"id": "p", "pattern": 1}]), &[]);
        assert!(matches!(
            seal_seed(&source),
            Err(SeedIntegrityError::Schema(_))
        ));
    }

    #[test]
    fn unknown_keys_are_schema_errors() {
        let mut doc: serde_json::Value =
            serde_json::from_str(&unsealed(peano_projections(), &[])).expect("json");
        doc["extra"] = json!(true);
        assert!(matches!(
            seal_seed(&doc.to_string()),
            Err(SeedIntegrityError::Schema(_))
        ));
    }

    #[test]
    fn wrong_schema_marker() {
        let mut doc: serde_json::Value =
            serde_json::from_str(&unsealed(peano_projections(), &[])).expect("json");
        doc["meta"]["schema"] = json!("other/v9");
        assert_eq!(
            seal_seed(&doc.to_string()),
            Err(SeedIntegrityError::UnsupportedSchema("other/v9".to_string()))
        );
    }

    #[test]
    fn malformed_json() {
        assert!(matches!(
            load_projections("{not json"),
            Err(SeedIntegrityError::Malformed(_))
        ));
    }

    #[test]
    fn missing_expected_id() {
        let sealed = seal_seed(&unsealed(
            peano_projections(),
            &["peano.succ", "peano.zero", "peano.wrap"],
        ))
        .expect("seal");
        assert_eq!(
            load_projections(&sealed).map(|s| s.len()),
            Err(SeedIntegrityError::MissingProjections(vec![
                "peano.zero".to_string()
            ]))
        );
    }

    #[test]
    fn required_ids_from_loader() {
        let loader = SeedLoader::new().require_ids(["peano.extra"]);
        assert!(matches!(
            loader.load(&sealed_peano()),
            Err(SeedIntegrityError::MissingProjections(_))
        ));
    }

    #[test]
    fn fallback_must_be_last() {
        let projections = json!([
            {"id": "peano.wrap", "pattern": {"wrap": {"var": "x"}}, "body": {"var": "x"}},
            {"id": "peano.succ", "pattern": {"succ": {"var": "n"}}, "body": {"var": "n"}},
        ]);
        let sealed = seal_seed(&unsealed(projections, &["peano.succ", "peano.wrap"])).expect("seal");
        assert_eq!(
            load_projections(&sealed).map(|s| s.len()),
            Err(SeedIntegrityError::FallbackNotLast {
                fallback: "peano.wrap".to_string(),
                last: "peano.succ".to_string(),
            })
        );
    }

    #[test]
    fn duplicate_ids_are_an_invalid_set() {
        let projections = json!([
            {"id": "a", "pattern": 1, "body": 2},
            {"id": "a", "pattern": 2, "body": 3},
        ]);
        assert_eq!(
            seal_seed(&unsealed(projections, &[])),
            Err(SeedIntegrityError::InvalidSet(
                ValidationError::DuplicateProjectionId("a".to_string())
            ))
        );
    }

    #[test]
    fn reserved_field_in_body_is_invalid_projection() {
        let projections = json!([{"id": "a", "pattern": 1, "body": {"_projs": null}}]);
        assert!(matches!(
            seal_seed(&unsealed(projections, &[])),
            Err(SeedIntegrityError::InvalidProjection { id, .. }) if id == "a"
        ));
    }

    #[test]
    fn load_path_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("peano.json");
        std::fs::write(&path, sealed_peano()).expect("write");
        assert_eq!(SeedLoader::new().load_path(&path).expect("load").len(), 2);
        assert!(matches!(
            SeedLoader::new().load_path(&dir.path().join("absent.json")),
            Err(SeedIntegrityError::IoError(_))
        ));
    }
}
