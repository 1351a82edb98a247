use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Per-instance attribute channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Instancing", inline)]
#[serde(default)]
pub struct InstancingOptions {
    /// Allocate a color buffer and tint each instance's vertices.
    #[schemars(title = "Instance Colors")]
    pub instance_colors: bool,
    /// Tint for instances added without a color.
    #[schemars(skip)]
    pub default_color: [f32; 4],
}

impl Default for InstancingOptions {
    fn default() -> Self {
        Self {
            instance_colors: true,
            default_color: [1.0; 4],
        }
    }
}
