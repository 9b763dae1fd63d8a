use anyhow::{Context, Result, anyhow};
use schemars::{Schema, schema_for};
use serde_valid::Validate;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, warn};

use super::models::Bundle;
use super::validate::{Level, validate_preset};

/// Load a bundle from a string slice.
pub fn load_from_str(s: &str) -> Result<Bundle> {
    let bundle: Bundle =
        serde_json::from_str(s).context("Failed to parse JSON bundle string into Bundle")?;
    check_bundle(&bundle)?;
    Ok(bundle)
}

/// Load a bundle from any reader (e.g., a file).
pub fn load_from_reader<R: Read>(reader: R) -> Result<Bundle> {
    let bundle: Bundle =
        serde_json::from_reader(reader).context("Failed to parse JSON bundle from reader")?;
    check_bundle(&bundle)?;
    Ok(bundle)
}

/// Load a bundle from a file path synchronously.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Bundle> {
    let path_ref = path.as_ref();
    let file = File::open(path_ref)
        .with_context(|| format!("Failed to open bundle file {}", path_ref.display()))?;
    let bundle = load_from_reader(file)
        .with_context(|| format!("Invalid bundle file {}", path_ref.display()))?;
    debug!(target: "rotabot::config", "Loaded bundle from {}", path_ref.display());
    Ok(bundle)
}

/// Load a bundle from a file path asynchronously (Tokio).
pub async fn load_from_path_async<P: AsRef<Path>>(path: P) -> Result<Bundle> {
    use tokio::fs;
    let path_ref = path.as_ref();
    let bytes = fs::read(path_ref)
        .await
        .with_context(|| format!("Failed to read bundle file {}", path_ref.display()))?;
    let bundle: Bundle = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse JSON bundle from {}", path_ref.display()))?;
    check_bundle(&bundle)?;
    debug!(target: "rotabot::config", "Loaded bundle from {}", path_ref.display());
    Ok(bundle)
}

/// Generate the JSON Schema for the Bundle model (for external validation or tooling).
pub fn generate_schema() -> Schema {
    schema_for!(Bundle)
}

/// Write the JSON Schema for the Bundle model to any writer (pretty-printed).
pub fn write_schema_to_writer<W: Write>(mut writer: W) -> Result<()> {
    let schema = generate_schema();
    let json = serde_json::to_string_pretty(&schema).context("Failed to serialize schema")?;
    writer
        .write_all(json.as_bytes())
        .context("Failed to write schema to writer")?;
    Ok(())
}

/// Range-check the settings and log preset warnings.
///
/// Structural preset errors are not rejected here: the engine runs the same
/// validation on start and reports it through its error callback.
pub fn check_bundle(bundle: &Bundle) -> Result<()> {
    bundle
        .settings
        .validate()
        .map_err(|e| anyhow!("Invalid engine settings: {e}"))?;

    let report = validate_preset(&bundle.preset, Some(&bundle.profile));
    for d in report.diagnostics.iter().filter(|d| d.level == Level::Warning) {
        warn!(target: "rotabot::config", code = d.code, path = %d.path, "{}", d.message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "profile": { "skills": [ { "id": "fire", "trigger": { "key": "1" } } ] },
        "preset": {
            "id": "p",
            "entry": { "track_id": "t", "node_id": "n" },
            "global_tracks": [ { "id": "t", "nodes": [ { "kind": "skill", "id": "n", "skill_id": "fire" } ] } ]
        }
    }"#;

    #[test]
    fn loads_minimal_bundle_with_default_settings() {
        let bundle = load_from_str(MINIMAL).unwrap();
        assert_eq!(bundle.preset.id, "p");
        assert_eq!(bundle.settings.gateway_poll_delay_ms, 10);
    }

    #[test]
    fn rejects_out_of_range_settings() {
        let text = MINIMAL.replacen("{", r#"{ "settings": { "tick_interval_ms": 0 },"#, 1);
        let err = load_from_str(&text).unwrap_err();
        assert!(err.to_string().contains("Invalid engine settings"));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(load_from_str("{ not json").is_err());
    }

    #[test]
    fn schema_mentions_preset() {
        let mut out = Vec::new();
        write_schema_to_writer(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("preset"));
    }
}
