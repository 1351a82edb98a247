use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Diagnostics toggles.
#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema,
)]
#[schemars(title = "Debug", inline)]
#[serde(default)]
pub struct DebugOptions {
    /// Log [`FrameStats`](crate::renderer::FrameStats) at debug level every
    /// frame.
    #[schemars(title = "Log Frame Stats")]
    pub log_frame_stats: bool,
}
