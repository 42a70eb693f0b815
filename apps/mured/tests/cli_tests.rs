//! Integration tests for the mured command set.
//!
//! Each test works in its own temporary directory and passes an explicit
//! config file, so the working directory and environment never leak in.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use clap::Parser;
use mured::cli::{Cli, execute};
use mured_core::{MuredError, SeedIntegrityError, import_trace};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// HELPERS
// =============================================================================

const PEANO_SEED: &str = r#"{
    "meta": {
        "schema": "mured.seed/v1",
        "name": "peano",
        "version": "1.0.0",
        "description": "successor countdown",
        "expected_ids": ["peano.succ", "peano.wrap"]
    },
    "projections": [
        {"id": "peano.succ", "pattern": {"succ": {"var": "n"}}, "body": {"var": "n"}},
        {"id": "peano.wrap", "pattern": {"wrap": {"var": "x"}}, "body": {"var": "x"}}
    ]
}"#;

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new(config: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mured.toml");
        std::fs::write(&path, config).unwrap();
        Self { dir, config: path }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn exec(&self, args: &[&str]) -> Result<(), MuredError> {
        let config = self.config.to_string_lossy().into_owned();
        let mut argv = vec!["mured", "--quiet", "--config", config.as_str()];
        argv.extend_from_slice(args);
        execute(Cli::try_parse_from(argv).unwrap())
    }

    /// Seal the Peano seed and return the sealed file path.
    fn sealed_peano(&self) -> PathBuf {
        let source = self.write("peano.json", PEANO_SEED);
        let sealed = self.path("peano.sealed.json");
        self.exec(&["seal", "--seed", s(&source), "--output", s(&sealed)])
            .unwrap();
        sealed
    }
}

fn s(path: &Path) -> &str {
    path.to_str().unwrap()
}

// =============================================================================
// SEAL / VERIFY
// =============================================================================

#[test]
fn test_seal_then_verify() {
    let ws = Workspace::new("");
    let sealed = ws.sealed_peano();

    let content = std::fs::read_to_string(&sealed).unwrap();
    let json: serde_json::Value = serde_json::from_str(&content).unwrap();
    let checksum = json["checksum"].as_str().unwrap();
    assert_eq!(checksum.len(), 64);

    ws.exec(&["verify", "--seed", s(&sealed)]).unwrap();
    ws.exec(&["--json-mode", "verify", "--seed", s(&sealed)])
        .unwrap();
}

#[test]
fn test_verify_unsealed_seed_fails() {
    let ws = Workspace::new("");
    let source = ws.write("peano.json", PEANO_SEED);

    let result = ws.exec(&["verify", "--seed", s(&source)]);
    assert!(matches!(
        result,
        Err(MuredError::SeedIntegrity(SeedIntegrityError::Schema(_)))
    ));
}

#[test]
fn test_verify_edited_seed_fails() {
    let ws = Workspace::new("");
    let sealed = ws.sealed_peano();
    let content = std::fs::read_to_string(&sealed).unwrap();
    std::fs::write(&sealed, content.replace("countdown", "count-down")).unwrap();

    let result = ws.exec(&["verify", "--seed", s(&sealed)]);
    assert!(matches!(
        result,
        Err(MuredError::SeedIntegrity(
            SeedIntegrityError::ChecksumMismatch { .. }
        ))
    ));
}

#[test]
fn test_pinned_checksum_from_config() {
    let ws = Workspace::new(&format!(
        "[seed]\npinned_checksum = \"{}\"\n",
        "0".repeat(64)
    ));
    let sealed = ws.sealed_peano();

    let result = ws.exec(&["verify", "--seed", s(&sealed)]);
    assert!(matches!(
        result,
        Err(MuredError::SeedIntegrity(
            SeedIntegrityError::ChecksumMismatch { .. }
        ))
    ));
}

#[test]
fn test_required_ids_from_config() {
    let ws = Workspace::new("[seed]\nrequired_ids = [\"peano.pred\"]\n");
    let sealed = ws.sealed_peano();

    let result = ws.exec(&["verify", "--seed", s(&sealed)]);
    assert!(matches!(
        result,
        Err(MuredError::SeedIntegrity(SeedIntegrityError::MissingProjections(ids)))
            if ids == vec!["peano.pred".to_string()]
    ));
}

#[test]
fn test_missing_seed_file() {
    let ws = Workspace::new("");
    let missing = ws.path("absent.json");
    assert!(matches!(
        ws.exec(&["verify", "--seed", s(&missing)]),
        Err(MuredError::IoError(_))
    ));
}

// =============================================================================
// STEP / RUN
// =============================================================================

#[test]
fn test_step_command() {
    let ws = Workspace::new("");
    let sealed = ws.sealed_peano();

    ws.exec(&["step", "--seed", s(&sealed), "--value", r#"{"succ": "zero"}"#])
        .unwrap();
    ws.exec(&["--json-mode", "step", "--seed", s(&sealed), "-i", r#""zero""#])
        .unwrap();
}

#[test]
fn test_run_writes_jsonl_trace() {
    let ws = Workspace::new("");
    let sealed = ws.sealed_peano();
    let trace = ws.path("trace.jsonl");

    ws.exec(&[
        "run",
        "--seed",
        s(&sealed),
        "--value",
        r#"{"succ": {"succ": "zero"}}"#,
        "--trace-out",
        s(&trace),
    ])
    .unwrap();

    let content = std::fs::read_to_string(&trace).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["i"], 0);
    assert_eq!(lines[0]["projection"], "peano.succ");
    assert_eq!(lines[2]["before"], lines[2]["after"]);
}

#[test]
fn test_run_binary_trace_matches_jsonl_run() {
    let ws = Workspace::new("");
    let sealed = ws.sealed_peano();
    let value = ws.write("value.json", r#"{"wrap": {"succ": {"succ": "zero"}}}"#);
    let value_arg = format!("@{}", s(&value));
    let binary = ws.path("trace.bin");

    ws.exec(&[
        "run",
        "--seed",
        s(&sealed),
        "--value",
        &value_arg,
        "--trace-out",
        s(&binary),
        "--trace-format",
        "binary",
    ])
    .unwrap();

    let events = import_trace(&std::fs::read(&binary).unwrap()).unwrap();
    assert_eq!(events.len(), 4);
    assert_eq!(
        events[0].projection.as_ref().map(|p| p.as_str()),
        Some("peano.wrap")
    );
    assert!(events[3].projection.is_none());
}

#[test]
fn test_identical_runs_write_identical_traces() {
    let ws = Workspace::new("");
    let sealed = ws.sealed_peano();
    let first = ws.path("first.jsonl");
    let second = ws.path("second.jsonl");

    for out in [&first, &second] {
        ws.exec(&[
            "--json-mode",
            "run",
            "--seed",
            s(&sealed),
            "--value",
            r#"{"succ": {"succ": {"succ": "zero"}}}"#,
            "--trace-out",
            s(out),
        ])
        .unwrap();
    }

    assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
}

#[test]
fn test_run_budget_from_config() {
    let ws = Workspace::new("[run]\nmax_steps = 1\n");
    let sealed = ws.sealed_peano();
    let trace = ws.path("trace.jsonl");

    ws.exec(&[
        "run",
        "--seed",
        s(&sealed),
        "--value",
        r#"{"succ": {"succ": "zero"}}"#,
        "--trace-out",
        s(&trace),
    ])
    .unwrap();

    let content = std::fs::read_to_string(&trace).unwrap();
    assert_eq!(content.lines().count(), 1);
}

#[test]
fn test_run_rejects_reserved_field() {
    let ws = Workspace::new("");
    let sealed = ws.sealed_peano();

    let result = ws.exec(&["run", "--seed", s(&sealed), "--value", r#"{"_mode": 1}"#]);
    assert!(matches!(result, Err(MuredError::Validation(_))));
}

#[test]
fn test_run_rejects_invalid_json() {
    let ws = Workspace::new("");
    let sealed = ws.sealed_peano();

    let result = ws.exec(&["run", "--seed", s(&sealed), "--value", "{not json"]);
    assert!(matches!(result, Err(MuredError::Validation(_))));
}

// =============================================================================
// CLASSIFY / HASH
// =============================================================================

#[test]
fn test_classify_and_hash() {
    let ws = Workspace::new("");
    ws.exec(&["classify", "--value", "[1, 2]", "--normalize"])
        .unwrap();
    ws.exec(&["--json-mode", "classify", "--value", r#"{"var": "x"}"#])
        .unwrap();
    ws.exec(&["hash", "--value", r#"{"b": 1, "a": 2}"#]).unwrap();
}

#[test]
fn test_floats_follow_config() {
    let strict = Workspace::new("");
    assert!(strict.exec(&["hash", "--value", "1.5"]).is_err());

    let relaxed = Workspace::new("[limits]\nallow_floats = true\n");
    relaxed.exec(&["hash", "--value", "1.5"]).unwrap();
}

// =============================================================================
// ARGUMENTS / CONFIG
// =============================================================================

#[test]
fn test_missing_required_argument() {
    assert!(Cli::try_parse_from(["mured", "run", "--value", "1"]).is_err());
}

#[test]
fn test_invalid_config_fails() {
    let ws = Workspace::new("[run]\nmax_step = 3\n");
    assert!(matches!(
        ws.exec(&["hash", "--value", "1"]),
        Err(MuredError::ConfigError(_))
    ));
}
