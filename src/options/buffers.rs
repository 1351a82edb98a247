use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::gpu::device_buffer::GrowthPolicy;

/// Device buffer sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Buffers", inline)]
#[serde(default)]
pub struct BufferOptions {
    /// Instances the per-instance buffers hold before the first growth.
    #[schemars(title = "Initial Capacity", range(min = 1, max = 65536))]
    pub initial_instance_capacity: usize,
    /// Capacity multiplier applied on growth.
    #[schemars(title = "Growth Factor", range(min = 1.0, max = 4.0), extend("step" = 0.25))]
    pub growth_factor: f32,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            initial_instance_capacity: 16,
            growth_factor: 2.0,
        }
    }
}

impl BufferOptions {
    /// Growth rule derived from [`growth_factor`](Self::growth_factor).
    #[must_use]
    pub fn growth_policy(&self) -> GrowthPolicy {
        GrowthPolicy {
            factor: self.growth_factor.max(1.0),
        }
    }
}
