//! Subsystem options with TOML preset support.
//!
//! Buffer sizing, per-instance channels and diagnostics are consolidated
//! here. Every section uses `#[serde(default)]`, so a TOML file only needs to
//! name the values it overrides.

mod buffers;
mod debug;
mod instancing;

use std::path::Path;

pub use buffers::BufferOptions;
pub use debug::DebugOptions;
pub use instancing::InstancingOptions;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::MultiMeshError;

/// Top-level options container.
#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema,
)]
#[serde(default)]
pub struct Options {
    /// Device buffer sizing.
    pub buffers: BufferOptions,
    /// Per-instance attribute channels.
    pub instancing: InstancingOptions,
    /// Diagnostics.
    pub debug: DebugOptions,
}

impl Options {
    /// Generate JSON Schema describing the UI-exposed options.
    #[must_use]
    pub fn json_schema() -> schemars::Schema {
        schemars::schema_for!(Options)
    }

    /// Load options from a TOML file. Missing fields use defaults.
    ///
    /// # Errors
    ///
    /// [`MultiMeshError::Io`] if the file cannot be read,
    /// [`MultiMeshError::OptionsParse`] if it is not valid options TOML.
    pub fn load(path: &Path) -> Result<Self, MultiMeshError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| MultiMeshError::OptionsParse(e.to_string()))
    }

    /// Save options to a TOML file (pretty-printed).
    ///
    /// # Errors
    ///
    /// [`MultiMeshError::OptionsParse`] if serialization fails,
    /// [`MultiMeshError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), MultiMeshError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MultiMeshError::OptionsParse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Copy with out-of-range values pulled back into range: growth factor
    /// at least 1.0, initial capacity at least one instance.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let mut opts = self.clone();
        if !opts.buffers.growth_factor.is_finite() || opts.buffers.growth_factor < 1.0 {
            opts.buffers.growth_factor = 1.0;
        }
        opts.buffers.initial_instance_capacity = opts.buffers.initial_instance_capacity.max(1);
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_toml() {
        let opts = Options::default();
        let toml_str = toml::to_string_pretty(&opts).unwrap();
        let parsed: Options = toml::from_str(&toml_str).unwrap();
        assert_eq!(opts, parsed);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r"
[buffers]
growth_factor = 1.5
";
        let opts: Options = toml::from_str(toml_str).unwrap();
        assert_eq!(opts.buffers.growth_factor, 1.5);
        assert_eq!(opts.buffers.initial_instance_capacity, 16);
        assert!(opts.instancing.instance_colors);
        assert!(!opts.debug.log_frame_stats);
    }

    #[test]
    fn sanitized_clamps_out_of_range_values() {
        let mut opts = Options::default();
        opts.buffers.growth_factor = 0.25;
        opts.buffers.initial_instance_capacity = 0;
        let clean = opts.sanitized();
        assert_eq!(clean.buffers.growth_factor, 1.0);
        assert_eq!(clean.buffers.initial_instance_capacity, 1);
        assert_eq!(clean.buffers.growth_policy().factor, 1.0);
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("multimesh-options-{}", std::process::id()));
        let path = dir.join("preset.toml");
        let mut opts = Options::default();
        opts.instancing.default_color = [0.5, 0.25, 1.0, 1.0];
        opts.save(&path).unwrap();
        assert_eq!(Options::load(&path).unwrap(), opts);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = std::env::temp_dir().join(format!("multimesh-bad-options-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "[buffers]\ngrowth_factor = \"fast\"\n").unwrap();
        assert!(matches!(
            Options::load(&path),
            Err(MultiMeshError::OptionsParse(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn schema_has_expected_properties() {
        let schema_value =
            serde_json::to_value(Options::json_schema()).unwrap();
        let props = schema_value["properties"].as_object().unwrap();

        assert!(props.contains_key("buffers"));
        assert!(props.contains_key("instancing"));
        assert!(props.contains_key("debug"));

        let instancing = &props["instancing"]["properties"];
        assert!(instancing.get("instance_colors").is_some());
        assert!(instancing.get("default_color").is_none());
    }
}
