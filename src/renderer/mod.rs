//! The streaming mesh subsystem.
//!
//! [`MultiMesh`] ties together the instance registry, the per-instance
//! device buffers ([`capacity`]) and the template expansion pass
//! ([`stream_out`]).

pub mod capacity;
pub mod multi_mesh;
pub mod stream_out;

pub use multi_mesh::{FramePhase, FrameStats, MultiMesh, PublishedMesh};
