//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::TraceFormat;
use crate::config::MuredConfig;
use mured_core::primitives::MAX_RUN_STEPS;
use mured_core::{
    Execution, Halt, MuValue, MuredError, ProjectionKernel, ProjectionSet, StepOutcome,
    classify, export_trace, normalize, trace_checksum, trace_to_jsonl,
};
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a value file (16 MB).
const MAX_VALUE_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), MuredError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| MuredError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(MuredError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Validate an input path: it must resolve to an existing regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, MuredError> {
    let canonical = path.canonicalize().map_err(|e| {
        MuredError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(MuredError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Validate an output path: its parent must be an existing directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, MuredError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        MuredError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(MuredError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| MuredError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// INPUT HELPERS
// =============================================================================

/// Parse a value argument: inline JSON, or `@path` to a JSON file.
pub fn parse_value_arg(arg: &str, config: &MuredConfig) -> Result<MuValue, MuredError> {
    let text = match arg.strip_prefix('@') {
        Some(path) => {
            let validated = validate_file_path(Path::new(path))?;
            validate_file_size(&validated, MAX_VALUE_FILE_SIZE)?;
            std::fs::read_to_string(&validated)
                .map_err(|e| MuredError::IoError(format!("Read file: {}", e)))?
        }
        None => arg.to_string(),
    };
    Ok(MuValue::parse(&text, &config.limits)?)
}

/// Load and verify a seed file with the configured loader.
pub fn load_seed(path: &Path, config: &MuredConfig) -> Result<ProjectionSet, MuredError> {
    let validated = validate_file_path(path)?;
    Ok(config.seed_loader().load_path(&validated)?)
}

fn print_json(output: &serde_json::Value) -> Result<(), MuredError> {
    let text = serde_json::to_string_pretty(output)
        .map_err(|e| MuredError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, MuredError> {
    serde_json::to_value(value).map_err(|e| MuredError::SerializationError(e.to_string()))
}

// =============================================================================
// VERIFY COMMAND
// =============================================================================

/// Load a seed and report what it contains.
pub fn cmd_verify(config: &MuredConfig, json_mode: bool, seed: &Path) -> Result<(), MuredError> {
    let set = load_seed(seed, config)?;
    let ids: Vec<&str> = set.iter().map(|p| p.id.as_str()).collect();
    let origin = set.origin();

    if json_mode {
        let output = serde_json::json!({
            "seed": seed.to_string_lossy(),
            "name": origin.map(|o| o.name.as_str()),
            "version": origin.map(|o| o.version.as_str()),
            "checksum": origin.map(|o| o.checksum.as_str()),
            "projections": ids,
        });
        return print_json(&output);
    }

    println!("Seed Verified");
    println!("=============");
    if let Some(origin) = origin {
        println!("Name:     {}", origin.name);
        println!("Version:  {}", origin.version);
        println!("Checksum: {}", origin.checksum);
    }
    println!();
    println!("Projections ({}, in order):", ids.len());
    for (position, id) in ids.iter().enumerate() {
        println!("  {:>3}. {}", position + 1, id);
    }

    Ok(())
}

// =============================================================================
// SEAL COMMAND
// =============================================================================

/// Compute a seed's checksum and write the sealed document.
pub fn cmd_seal(config: &MuredConfig, seed: &Path, output: Option<&Path>) -> Result<(), MuredError> {
    let validated = validate_file_path(seed)?;
    let source = std::fs::read_to_string(&validated)
        .map_err(|e| MuredError::IoError(format!("Read file: {}", e)))?;
    let sealed = config.seed_loader().seal(&source)?;

    match output {
        Some(output) => {
            let validated_output = validate_output_path(output)?;
            std::fs::write(&validated_output, format!("{}\n", sealed))
                .map_err(|e| MuredError::IoError(format!("Write file: {}", e)))?;
            tracing::info!(output = %validated_output.display(), "seed sealed");
        }
        None => println!("{}", sealed),
    }

    Ok(())
}

// =============================================================================
// STEP COMMAND
// =============================================================================

/// Apply one step to a value.
pub fn cmd_step(
    config: &MuredConfig,
    json_mode: bool,
    seed: &Path,
    value: &str,
) -> Result<(), MuredError> {
    let set = load_seed(seed, config)?;
    let value = parse_value_arg(value, config)?;
    let kernel = ProjectionKernel::with_limits(&set, config.limits);
    let outcome = kernel.step_outcome(&value)?;

    let (result, projection, stall) = match &outcome {
        StepOutcome::Rewrote {
            projection, value, ..
        } => (value, Some(projection.as_str()), None),
        StepOutcome::Stalled(reason) => (&value, None, Some(reason.to_string())),
        StepOutcome::Exhausted {
            resource,
            projection,
        } => (
            &value,
            Some(projection.as_str()),
            Some(format!("result exceeds {}", resource)),
        ),
    };

    if json_mode {
        let output = serde_json::json!({
            "value": result.to_json(),
            "hash": result.content_hash().to_hex(),
            "projection": projection,
            "stalled": stall,
        });
        return print_json(&output);
    }

    println!("{}", result);
    match (projection, stall) {
        (Some(projection), None) => println!("fired: {}", projection),
        (_, Some(stall)) => println!("stalled: {}", stall),
        (None, None) => {}
    }

    Ok(())
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Step a value until it stalls or a budget runs out.
pub fn cmd_run(
    config: &MuredConfig,
    json_mode: bool,
    seed: &Path,
    value: &str,
    max_steps: Option<usize>,
    trace_out: Option<&Path>,
    trace_format: TraceFormat,
) -> Result<(), MuredError> {
    let set = load_seed(seed, config)?;
    let value = parse_value_arg(value, config)?;
    let budget = max_steps.unwrap_or(config.run.max_steps).min(MAX_RUN_STEPS);

    let mut execution = Execution::with_limits(&set, value, config.limits)?;
    let halt = execution.run(budget)?;
    let trace = execution.trace();
    let checksum = trace_checksum(&trace)?;

    let truncated = execution.dropped_events() > 0;
    if truncated {
        tracing::warn!(
            dropped = execution.dropped_events(),
            "event log full, trace is truncated"
        );
    }

    if let Some(path) = trace_out {
        let validated_output = validate_output_path(path)?;
        let data = match trace_format {
            TraceFormat::Jsonl => trace_to_jsonl(&trace)?.into_bytes(),
            TraceFormat::Binary => export_trace(&trace)?,
        };
        std::fs::write(&validated_output, &data)
            .map_err(|e| MuredError::IoError(format!("Write file: {}", e)))?;
        tracing::info!(
            output = %validated_output.display(),
            bytes = data.len(),
            "trace written"
        );
    }

    let final_value = execution.value();
    if json_mode {
        let output = serde_json::json!({
            "value": final_value.to_json(),
            "hash": execution.hash().to_hex(),
            "steps": execution.steps(),
            "stalled": matches!(halt, Halt::Stalled(_)),
            "halt": to_json(&halt)?,
            "trace_checksum": checksum,
            "trace_truncated": truncated,
            "evidence": to_json(&execution.evidence())?,
        });
        return print_json(&output);
    }

    println!("{}", final_value);
    println!();
    println!("Halt:           {}", halt);
    println!("Steps:          {}", execution.steps());
    println!("Trace checksum: {}", checksum);
    if truncated {
        println!("Trace:          truncated ({} events dropped)", execution.dropped_events());
    }
    if execution.evidence().is_empty() {
        println!("Evidence:       none");
    } else {
        println!("Evidence:");
        for evidence in execution.evidence() {
            println!(
                "  {} at {} ({})",
                evidence.pattern_id, evidence.value_hash, evidence.reason
            );
        }
    }

    Ok(())
}

// =============================================================================
// CLASSIFY COMMAND
// =============================================================================

/// Report the shape of a value.
pub fn cmd_classify(
    config: &MuredConfig,
    json_mode: bool,
    value: &str,
    show_normalized: bool,
) -> Result<(), MuredError> {
    let value = parse_value_arg(value, config)?;
    let shape = classify(&value);
    let normalized = if show_normalized {
        Some(normalize(&value, &config.limits)?)
    } else {
        None
    };

    if json_mode {
        let output = serde_json::json!({
            "shape": to_json(&shape)?,
            "normalized": normalized.as_ref().map(MuValue::to_json),
        });
        return print_json(&output);
    }

    println!("Shape: {:?}", shape);
    if let Some(normalized) = normalized {
        println!("Normalized: {}", normalized);
    }

    Ok(())
}

// =============================================================================
// HASH COMMAND
// =============================================================================

/// Print the BLAKE3 content hash of a value.
pub fn cmd_hash(config: &MuredConfig, json_mode: bool, value: &str) -> Result<(), MuredError> {
    let value = parse_value_arg(value, config)?;
    let hash = value.content_hash();

    if json_mode {
        let output = serde_json::json!({
            "canonical": value.canonical_json(),
            "blake3_hash": hash.to_hex(),
        });
        return print_json(&output);
    }

    println!("{}", hash);
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn inline_value_argument() {
        let config = MuredConfig::default();
        let value = parse_value_arg(r#"{"x": [1, 2]}"#, &config).expect("parse");
        assert_eq!(value.canonical_json(), r#"{"x":[1,2]}"#);
    }

    #[test]
    fn file_value_argument() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("value.json");
        std::fs::write(&path, r#"{"succ": "zero"}"#).expect("write");
        let arg = format!("@{}", path.display());
        let value = parse_value_arg(&arg, &MuredConfig::default()).expect("parse");
        assert_eq!(value.get("succ"), Some(&MuValue::from("zero")));
    }

    #[test]
    fn value_argument_respects_limits() {
        let mut config = MuredConfig::default();
        config.limits.max_depth = 1;
        assert!(matches!(
            parse_value_arg("[[1]]", &config),
            Err(MuredError::Validation(_))
        ));
        assert!(parse_value_arg("1.5", &MuredConfig::default()).is_err());
    }

    #[test]
    fn output_path_needs_existing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(validate_output_path(&dir.path().join("out.jsonl")).is_ok());
        assert!(validate_output_path(&dir.path().join("missing/out.jsonl")).is_err());
    }

    #[test]
    fn directory_is_not_an_input_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(validate_file_path(dir.path()).is_err());
    }
}
