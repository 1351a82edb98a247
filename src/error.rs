//! Crate-level error types.

use std::fmt;

use crate::gpu::{device::BufferKind, device::DeviceError, render_context::RenderContextError};

/// Errors produced by the multimesh crate.
#[derive(Debug)]
pub enum MultiMeshError {
    /// The device reported a failure (allocation, validation, pipeline).
    Device(DeviceError),
    /// GPU context initialization failure.
    Context(RenderContextError),
    /// Growth of a buffer would exceed the device limit for its kind.
    CapacityExhaustion {
        /// Buffer that could not grow.
        kind: BufferKind,
        /// Elements requested.
        requested: usize,
        /// Most elements the device allows for this kind.
        limit: usize,
    },
    /// An upload was larger than the buffer's current capacity.
    UploadOverflow {
        /// Buffer written.
        kind: BufferKind,
        /// Elements in the upload.
        len: usize,
        /// Buffer capacity in elements.
        capacity: usize,
    },
    /// Instance count passed to the expansion disagrees with the uploaded
    /// per-instance buffers.
    StaleBindingMismatch {
        /// Instances requested for the pass.
        instance_count: usize,
        /// Elements uploaded into the transform buffer.
        uploaded: usize,
        /// Elements uploaded into the color buffer; equals `uploaded` when
        /// colors are disabled.
        colors_uploaded: usize,
    },
    /// No usable template mesh was supplied.
    MissingTemplate,
    /// The template mesh cannot be expanded.
    InvalidTemplate(String),
    /// The subsystem was already torn down.
    TornDown,
    /// Generic I/O failure.
    Io(std::io::Error),
    /// TOML options parsing/serialization failure.
    OptionsParse(String),
}

impl fmt::Display for MultiMeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(e) => write!(f, "device error: {e}"),
            Self::Context(e) => write!(f, "GPU context error: {e}"),
            Self::CapacityExhaustion {
                kind,
                requested,
                limit,
            } => write!(
                f,
                "{kind}: {requested} elements requested, device limit is {limit}"
            ),
            Self::UploadOverflow {
                kind,
                len,
                capacity,
            } => write!(
                f,
                "{kind}: upload of {len} elements exceeds capacity {capacity}"
            ),
            Self::StaleBindingMismatch {
                instance_count,
                uploaded,
                colors_uploaded,
            } => write!(
                f,
                "expansion of {instance_count} instances with {uploaded} uploaded transforms \
                 and {colors_uploaded} uploaded colors"
            ),
            Self::MissingTemplate => f.write_str("no template mesh configured"),
            Self::InvalidTemplate(msg) => write!(f, "invalid template mesh: {msg}"),
            Self::TornDown => f.write_str("multimesh already torn down"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::OptionsParse(msg) => write!(f, "options parse error: {msg}"),
        }
    }
}

impl std::error::Error for MultiMeshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Device(e) => Some(e),
            Self::Context(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DeviceError> for MultiMeshError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl From<RenderContextError> for MultiMeshError {
    fn from(e: RenderContextError) -> Self {
        Self::Context(e)
    }
}

impl From<std::io::Error> for MultiMeshError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
