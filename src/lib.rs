// -- Lint policy ---------------------------------------------------------
// This is the single source of truth for crate-wide lints.

// Broad lint groups
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
// Documentation
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::bare_urls)]
// No panicking in library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
// No debug/print artifacts
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
// Import hygiene
#![deny(clippy::wildcard_imports)]
// Function signature hygiene
#![deny(clippy::too_many_arguments)]
#![deny(clippy::fn_params_excessive_bools)]
// Clone / pass-by-value hygiene
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::implicit_clone)]
// String hygiene
#![deny(clippy::inefficient_to_string)]
#![deny(clippy::redundant_closure_for_method_calls)]
#![deny(clippy::manual_string_new)]
#![deny(clippy::str_to_string)]
// Cargo lints (warn, not deny since cargo lints can be noisy)
#![warn(clippy::cargo)]
// Unused / redundant code
#![warn(unused_results)]
#![warn(unused_qualifications)]
// Cast hygiene
#![warn(trivial_casts)]
#![warn(trivial_numeric_casts)]
// Tests lean on unwrap and exact float comparison
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::float_cmp))]

//! Dynamic GPU-instanced streaming mesh built on wgpu.
//!
//! A `multimesh` renders a large, changing population of identically shaped
//! objects by expanding one template mesh into per-instance transformed
//! geometry on the device, then drawing the result as a single ordinary
//! vertex buffer.
//!
//! # Key entry points
//!
//! - [`renderer::MultiMesh`] - registry, buffers and expansion pass driven as
//!   one per-frame cycle
//! - [`mesh::TemplateMesh`] - the base geometry every instance copies
//! - [`gpu::device::GpuDevice`] - the device seam, implemented by
//!   [`gpu::wgpu_device::WgpuDevice`] and [`gpu::headless::HeadlessDevice`]
//! - [`options::Options`] - buffer sizing and per-instance channels
//!
//! # Frame cycle
//!
//! Every [`renderer::MultiMesh::update`] snapshots the instance registry,
//! grows the transform, color and output buffers as needed, uploads the
//! snapshot, and dispatches the expansion compute pass. The output buffer is
//! created with `STORAGE | VERTEX` usage, so the host's render pass binds it
//! directly through [`renderer::MultiMesh::published`].

pub mod error;
pub mod gpu;
pub mod instance;
pub mod mesh;
pub mod options;
pub mod renderer;

pub use error::MultiMeshError;
pub use instance::{InstanceData, InstanceId};
pub use mesh::{MeshVertex, TemplateMesh};
pub use options::Options;
pub use renderer::{FrameStats, MultiMesh, PublishedMesh};
