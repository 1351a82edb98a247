//! Device / command-submission seam.
//!
//! Everything the streaming mesh needs from a GPU goes through
//! [`GpuDevice`]: buffer creation and upload, the expansion pipeline, its
//! bindings, and the expansion dispatch. Resources are owning handles, so
//! dropping a `Buffer`, `Pipeline` or `Bindings` value releases the device
//! resource behind it.
//!
//! Two implementations ship with the crate:
//! - [`WgpuDevice`](super::wgpu_device::WgpuDevice) drives a real adapter.
//! - [`HeadlessDevice`](super::headless::HeadlessDevice) executes the
//!   expansion on the CPU and records every device call.

use std::fmt;

/// Which device buffer a request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Expanded per-instance vertex stream (the stream-out target).
    Output,
    /// Per-instance world transforms.
    Transform,
    /// Per-instance RGBA colors.
    Color,
    /// Template vertex records, uploaded once at configure time.
    TemplateVertices,
    /// Template triangle-list indices, uploaded once at configure time.
    TemplateIndices,
    /// Per-pass expansion parameters.
    Params,
}

impl BufferKind {
    /// Human-readable label used for device debug names and diagnostics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Output => "MultiMesh Output Buffer",
            Self::Transform => "MultiMesh Transform Buffer",
            Self::Color => "MultiMesh Color Buffer",
            Self::TemplateVertices => "MultiMesh Template Vertices",
            Self::TemplateIndices => "MultiMesh Template Indices",
            Self::Params => "MultiMesh Expansion Params",
        }
    }

    /// How the device must be able to use a buffer of this kind.
    #[must_use]
    pub const fn usage(self) -> BufferUsage {
        match self {
            Self::Output => BufferUsage::StreamOutput,
            Self::Params => BufferUsage::Uniform,
            Self::Transform
            | Self::Color
            | Self::TemplateVertices
            | Self::TemplateIndices => BufferUsage::Attribute,
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Device-side usage class of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Read-only shader storage, written from the CPU.
    Attribute,
    /// Written by the expansion pass, then read as a vertex buffer.
    StreamOutput,
    /// Small uniform block, written from the CPU.
    Uniform,
}

/// Parameters for [`GpuDevice::create_buffer`].
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Size in bytes. Always non-zero.
    pub size: u64,
    /// Usage class.
    pub usage: BufferUsage,
}

/// Device limits relevant to buffer growth and dispatch sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Largest buffer the device will allocate, in bytes.
    pub max_buffer_size: u64,
    /// Largest range bindable as a storage buffer, in bytes.
    pub max_storage_binding_size: u64,
    /// Maximum workgroup count along any dispatch dimension.
    pub max_workgroups_per_dimension: u32,
}

impl DeviceLimits {
    /// Largest byte size a buffer of `usage` may have on this device.
    #[must_use]
    pub fn max_bytes(&self, usage: BufferUsage) -> u64 {
        match usage {
            BufferUsage::Uniform => self.max_buffer_size,
            BufferUsage::Attribute | BufferUsage::StreamOutput => {
                self.max_buffer_size.min(self.max_storage_binding_size)
            }
        }
    }
}

impl Default for DeviceLimits {
    /// The WebGPU default limits.
    fn default() -> Self {
        Self {
            max_buffer_size: 256 << 20,
            max_storage_binding_size: 128 << 20,
            max_workgroups_per_dimension: 65_535,
        }
    }
}

/// A compiled shader program handed in by the shader/effect system.
#[derive(Debug, Clone, Copy)]
pub struct ShaderProgram<'a> {
    /// Debug label.
    pub label: &'a str,
    /// WGSL source, possibly containing `#import` directives.
    pub source: &'a str,
    /// Virtual file path used in composer diagnostics.
    pub file_path: &'a str,
    /// Compute entry point.
    pub entry_point: &'a str,
}

/// Parameter block the expansion program reads (`ExpansionParams` in WGSL).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ExpansionParams {
    /// Output vertices per instance (template index count).
    pub vertices_per_instance: u32,
    /// Instances expanded by this pass.
    pub instance_count: u32,
    /// Instance rows per z-slice of the dispatch grid.
    pub rows_per_slice: u32,
    /// Non-zero when the color buffer tints each instance.
    pub use_instance_colors: u32,
}

/// Threads per workgroup along x in the expansion program.
pub const EXPANSION_WORKGROUP_SIZE: u32 = 64;

/// The buffers one expansion pass reads and writes.
pub struct ExpansionResources<'a, B> {
    /// Per-pass parameter block.
    pub params: &'a B,
    /// Template vertex records.
    pub template_vertices: &'a B,
    /// Template triangle-list indices.
    pub template_indices: &'a B,
    /// Per-instance transforms.
    pub transforms: &'a B,
    /// Per-instance colors, when the color channel is enabled.
    pub colors: Option<&'a B>,
    /// Stream-out target.
    pub output: &'a B,
}

/// Errors reported by a [`GpuDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device could not allocate a buffer.
    OutOfMemory {
        /// Label of the failed allocation.
        label: String,
        /// Requested size in bytes.
        size: u64,
    },
    /// The device rejected a resource description.
    Validation(String),
    /// Shader composition or pipeline creation failed.
    Pipeline(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { label, size } => {
                write!(f, "out of device memory allocating '{label}' ({size} bytes)")
            }
            Self::Validation(msg) => write!(f, "device validation error: {msg}"),
            Self::Pipeline(msg) => write!(f, "pipeline creation failed: {msg}"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// The device/command-submission context the streaming mesh runs on.
///
/// All calls happen on the thread that owns the context; commands execute in
/// submission order.
pub trait GpuDevice {
    /// Owning buffer handle. Dropping it releases the device buffer.
    type Buffer;
    /// Owning expansion pipeline state.
    type Pipeline;
    /// Resource bindings for one set of expansion buffers.
    type Bindings;

    /// Limits used for growth clamping and dispatch sizing.
    fn limits(&self) -> DeviceLimits;

    /// Allocate an uninitialized buffer.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] when the device cannot allocate the buffer.
    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<Self::Buffer, DeviceError>;

    /// Queue a write of `data` into `buffer` at byte `offset`.
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    /// Build the expansion pipeline from `program`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Pipeline`] when the program does not compose or
    /// the device rejects the pipeline.
    fn create_expansion_pipeline(
        &self,
        program: &ShaderProgram<'_>,
    ) -> Result<Self::Pipeline, DeviceError>;

    /// Bind a set of expansion buffers for use with `pipeline`.
    fn create_expansion_bindings(
        &self,
        pipeline: &Self::Pipeline,
        resources: &ExpansionResources<'_, Self::Buffer>,
    ) -> Self::Bindings;

    /// Record and submit one expansion pass over `workgroups`.
    ///
    /// The pass is closed before submission, so the output buffer is free to
    /// be read as vertex input by later commands.
    fn dispatch_expansion(
        &self,
        pipeline: &Self::Pipeline,
        bindings: &Self::Bindings,
        workgroups: [u32; 3],
    );
}
