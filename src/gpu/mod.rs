//! GPU resource management.
//!
//! Provides the device seam the streaming mesh is written against, its wgpu
//! and headless implementations, growable typed buffers, and shader
//! composition.

/// The device trait, buffer kinds, limits and the expansion parameter block.
pub mod device;
/// Growable typed device buffers with a monotonic growth policy.
pub mod device_buffer;
/// CPU-executed device used for headless hosts and tests.
pub mod headless;
/// wgpu device and queue initialization.
pub mod render_context;
/// WGSL shader composition with `#import` support via naga-oil.
pub mod shader_composer;
/// wgpu implementation of the device seam.
pub mod wgpu_device;
