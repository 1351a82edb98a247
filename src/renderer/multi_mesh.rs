//! The streaming mesh: registry, buffers and expansion pass driven as one
//! per-frame cycle.
//!
//! Each [`MultiMesh::update`] walks
//! `Idle → Snapshotting → Resizing → Uploading → Expanding → Published → Idle`.
//! Any failure aborts the frame, returns to `Idle`, and leaves the previously
//! published mesh in place so the host can keep drawing it.

use std::fmt;

use glam::Mat4;

use super::{capacity::BufferCapacityManager, stream_out::StreamOutPipeline};
use crate::{
    error::MultiMeshError,
    gpu::device::{BufferKind, GpuDevice, ShaderProgram},
    instance::{InstanceData, InstanceId, InstanceRegistry, InstanceSnapshot},
    mesh::TemplateMesh,
    options::Options,
};

/// Where the frame cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePhase {
    /// Between frames.
    #[default]
    Idle,
    /// Copying the registry into the frame snapshot.
    Snapshotting,
    /// Growing device buffers to fit the snapshot.
    Resizing,
    /// Writing transforms and colors.
    Uploading,
    /// Running the expansion pass.
    Expanding,
    /// The output buffer holds this frame's geometry.
    Published,
}

/// What one [`MultiMesh::update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Zero-based index of the completed frame.
    pub frame: u64,
    /// Instances expanded.
    pub instance_count: usize,
    /// Output vertices published.
    pub vertex_count: u32,
    /// Buffers reallocated during this frame.
    pub reallocations: u32,
    /// Buffers reallocated since attach.
    pub total_reallocations: u64,
}

impl fmt::Display for FrameStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {}: {} instances, {} vertices, {} reallocations ({} total)",
            self.frame,
            self.instance_count,
            self.vertex_count,
            self.reallocations,
            self.total_reallocations
        )
    }
}

/// The drawable result of the last successful frame.
///
/// Bind [`buffer`](Self::buffer) as vertex input (layout
/// [`MeshVertex::layout`](crate::mesh::MeshVertex::layout)) and draw
/// `0..vertex_count` as a non-indexed triangle list.
#[derive(Debug)]
pub struct PublishedMesh<'a, B> {
    /// The output buffer.
    pub buffer: &'a B,
    /// Vertices to draw.
    pub vertex_count: u32,
    /// Output buffer generation; changes whenever the buffer was replaced.
    pub generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct Published {
    vertex_count: u32,
    generation: u64,
}

/// Fields drop buffers first, then the pipeline.
struct Resources<D: GpuDevice> {
    buffers: BufferCapacityManager<D>,
    pipeline: StreamOutPipeline<D>,
}

/// A dynamic population of template-mesh instances, expanded on the device
/// into one flat vertex stream every frame.
pub struct MultiMesh<D: GpuDevice> {
    registry: InstanceRegistry,
    snapshot: InstanceSnapshot,
    resources: Option<Resources<D>>,
    published: Option<Published>,
    phase: FramePhase,
    options: Options,
    frame: u64,
    total_reallocations: u64,
}

impl<D: GpuDevice> MultiMesh<D> {
    /// Attach: build the expansion pipeline from `program`, upload
    /// `template`, and allocate the per-instance buffers.
    ///
    /// # Errors
    ///
    /// Template validation errors, pipeline build errors, and allocation
    /// failures. Anything acquired before the failure is released.
    pub fn new(
        device: &D,
        template: &TemplateMesh,
        program: &ShaderProgram<'_>,
        options: &Options,
    ) -> Result<Self, MultiMeshError> {
        let options = options.sanitized();
        let pipeline = StreamOutPipeline::configure(device, program, template)?;
        let buffers = BufferCapacityManager::new(
            device,
            &options.buffers,
            options.instancing.instance_colors,
            pipeline.vertices_per_instance(),
        )?;

        log::info!(
            "multimesh attached: {} vertices per instance, capacity {} instances",
            pipeline.vertices_per_instance(),
            options.buffers.initial_instance_capacity
        );

        Ok(Self {
            registry: InstanceRegistry::new(),
            snapshot: InstanceSnapshot::default(),
            resources: Some(Resources { buffers, pipeline }),
            published: None,
            phase: FramePhase::Idle,
            options,
            frame: 0,
            total_reallocations: 0,
        })
    }

    // -- Registry --

    /// Add an instance under a fresh id.
    pub fn add_instance(&mut self, data: InstanceData) -> InstanceId {
        self.registry.add(data)
    }

    /// Add or overwrite the instance `id`.
    pub fn insert_instance(&mut self, id: InstanceId, data: InstanceData) -> InstanceId {
        self.registry.insert(id, data)
    }

    /// Remove `id`. Returns whether it was present.
    pub fn remove_instance(&mut self, id: InstanceId) -> bool {
        self.registry.remove(id)
    }

    /// Move the instance `id`. Returns `false` if absent.
    pub fn update_transform(&mut self, id: InstanceId, transform: Mat4) -> bool {
        self.registry.update_transform(id, transform)
    }

    /// Recolor the instance `id`. Returns `false` if absent.
    pub fn update_color(&mut self, id: InstanceId, color: Option<[f32; 4]>) -> bool {
        self.registry.update_color(id, color)
    }

    /// Keep only instances for which `keep` returns `true`.
    pub fn retain(&mut self, keep: impl FnMut(InstanceId, &InstanceData) -> bool) -> usize {
        self.registry.retain(keep)
    }

    /// The instance registry.
    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    // -- Frame cycle --

    /// Run one frame: snapshot, resize, upload, expand, publish.
    ///
    /// # Errors
    ///
    /// [`MultiMeshError::TornDown`] after [`teardown`](Self::teardown).
    /// Otherwise any resize, upload or expansion error; the frame is aborted
    /// and [`published`](Self::published) keeps returning the previous
    /// frame's mesh.
    pub fn update(&mut self, device: &D) -> Result<FrameStats, MultiMeshError> {
        let Some(resources) = self.resources.as_mut() else {
            return Err(MultiMeshError::TornDown);
        };

        self.phase = FramePhase::Snapshotting;
        self.registry
            .snapshot_into(&mut self.snapshot, self.options.instancing.default_color);

        match run_frame(resources, device, &self.snapshot, &mut self.phase) {
            Ok((vertex_count, reallocations)) => {
                self.phase = FramePhase::Published;
                self.published = Some(Published {
                    vertex_count,
                    generation: resources.buffers.output().generation(),
                });
                self.total_reallocations = resources.buffers.reallocations();
                let stats = FrameStats {
                    frame: self.frame,
                    instance_count: self.snapshot.len(),
                    vertex_count,
                    reallocations,
                    total_reallocations: self.total_reallocations,
                };
                if self.options.debug.log_frame_stats {
                    log::debug!("{stats}");
                }
                self.frame += 1;
                self.phase = FramePhase::Idle;
                Ok(stats)
            }
            Err(e) => {
                self.total_reallocations = resources.buffers.reallocations();
                log::warn!(
                    "frame {} aborted during {:?}, keeping previous mesh: {e}",
                    self.frame,
                    self.phase
                );
                self.phase = FramePhase::Idle;
                Err(e)
            }
        }
    }

    /// The last successfully expanded mesh, or `None` before the first
    /// successful frame and after teardown.
    pub fn published(&self) -> Option<PublishedMesh<'_, D::Buffer>> {
        let resources = self.resources.as_ref()?;
        let published = self.published?;
        Some(PublishedMesh {
            buffer: resources.buffers.output().buffer(),
            vertex_count: published.vertex_count,
            generation: published.generation,
        })
    }

    /// Current phase of the frame cycle; `Idle` between calls to
    /// [`update`](Self::update).
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Frames completed so far.
    pub fn frames(&self) -> u64 {
        self.frame
    }

    /// Buffers reallocated since attach, counting frames that aborted after
    /// growing some of them.
    pub fn total_reallocations(&self) -> u64 {
        self.total_reallocations
    }

    /// Whether [`teardown`](Self::teardown) has run.
    pub fn is_torn_down(&self) -> bool {
        self.resources.is_none()
    }

    /// The effective (sanitized) options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Capacity in elements of the buffer of `kind`, while attached.
    pub fn capacity(&self, kind: BufferKind) -> Option<usize> {
        self.resources.as_ref()?.buffers.capacity(kind)
    }

    /// Reallocation count of the buffer of `kind`, while attached.
    pub fn generation(&self, kind: BufferKind) -> Option<u64> {
        self.resources.as_ref()?.buffers.generation(kind)
    }

    /// `(label, used_bytes, allocated_bytes)` for every live device buffer.
    pub fn buffer_info(&self) -> Vec<(&'static str, usize, usize)> {
        self.resources.as_ref().map_or_else(Vec::new, |resources| {
            let mut info = resources.pipeline.buffer_info();
            info.extend(resources.buffers.buffer_info());
            info
        })
    }

    /// Release every device resource in reverse acquisition order: output,
    /// color and transform buffers, then bindings, parameters, template
    /// buffers, and the pipeline. Later calls do nothing.
    pub fn teardown(&mut self) {
        let Some(Resources { buffers, pipeline }) = self.resources.take() else {
            return;
        };
        buffers.release();
        pipeline.release();
        self.published = None;
        self.phase = FramePhase::Idle;
        log::info!("multimesh torn down after {} frames", self.frame);
    }
}

impl<D: GpuDevice> Drop for MultiMesh<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Resize, upload and expand. Returns `(vertex_count, reallocations)`.
fn run_frame<D: GpuDevice>(
    resources: &mut Resources<D>,
    device: &D,
    snapshot: &InstanceSnapshot,
    phase: &mut FramePhase,
) -> Result<(u32, u32), MultiMeshError> {
    let count = snapshot.len();

    *phase = FramePhase::Resizing;
    resources.pipeline.check_dispatch(device, count)?;
    let reallocations = resources.buffers.ensure_instances(device, count)?;

    *phase = FramePhase::Uploading;
    resources.buffers.upload(device, snapshot)?;

    *phase = FramePhase::Expanding;
    let vertex_count = resources
        .pipeline
        .execute(device, &mut resources.buffers, count)?;
    Ok((vertex_count, reallocations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gpu::{headless::HeadlessDevice, shader_composer::EXPAND_INSTANCES},
        mesh::MeshVertex,
    };

    fn quad() -> TemplateMesh {
        TemplateMesh::new(
            vec![
                MeshVertex::new([-1.0, -1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
                MeshVertex::new([1.0, -1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
                MeshVertex::new([1.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 1.0]),
                MeshVertex::new([-1.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    fn attach(device: &HeadlessDevice) -> MultiMesh<HeadlessDevice> {
        MultiMesh::new(device, &quad(), &EXPAND_INSTANCES, &Options::default()).unwrap()
    }

    #[test]
    fn nothing_published_before_first_frame() {
        let device = HeadlessDevice::new();
        let mesh = attach(&device);
        assert!(mesh.published().is_none());
        assert_eq!(mesh.phase(), FramePhase::Idle);
    }

    #[test]
    fn update_publishes_vertex_count() {
        let device = HeadlessDevice::new();
        let mut mesh = attach(&device);
        for _ in 0..4 {
            let _ = mesh.add_instance(InstanceData::default());
        }
        let stats = mesh.update(&device).unwrap();
        assert_eq!(stats.instance_count, 4);
        assert_eq!(stats.vertex_count, 24);
        assert_eq!(mesh.published().unwrap().vertex_count, 24);
        assert_eq!(mesh.phase(), FramePhase::Idle);
        assert_eq!(mesh.frames(), 1);
    }

    #[test]
    fn options_are_sanitized_on_attach() {
        let device = HeadlessDevice::new();
        let mut options = Options::default();
        options.buffers.initial_instance_capacity = 0;
        let mesh = MultiMesh::new(&device, &quad(), &EXPAND_INSTANCES, &options).unwrap();
        assert_eq!(mesh.capacity(BufferKind::Transform), Some(1));
        assert_eq!(mesh.capacity(BufferKind::Output), Some(6));
    }

    #[test]
    fn attach_failure_releases_partial_resources() {
        let device = HeadlessDevice::new();
        device.fail_next_allocations(1);
        let result = MultiMesh::new(&device, &quad(), &EXPAND_INSTANCES, &Options::default());
        assert!(matches!(result, Err(MultiMeshError::Device(_))));
        assert_eq!(device.live_buffers(), 0);
        assert!(matches!(
            device.events().last(),
            Some(crate::gpu::headless::DeviceEvent::PipelineReleased { .. })
        ));
    }

    #[test]
    fn update_after_teardown_is_an_error() {
        let device = HeadlessDevice::new();
        let mut mesh = attach(&device);
        mesh.teardown();
        assert!(mesh.is_torn_down());
        assert!(matches!(mesh.update(&device), Err(MultiMeshError::TornDown)));
        assert!(mesh.published().is_none());
        assert!(mesh.buffer_info().is_empty());
    }

    #[test]
    fn buffer_info_lists_every_live_buffer() {
        let device = HeadlessDevice::new();
        let mut mesh = attach(&device);
        let _ = mesh.add_instance(InstanceData::default());
        let _ = mesh.update(&device).unwrap();
        let info = mesh.buffer_info();
        assert_eq!(info.len(), 6);
        assert_eq!(info.len(), device.live_buffers());
        let output = info
            .iter()
            .find(|(label, ..)| *label == BufferKind::Output.label())
            .unwrap();
        assert_eq!(output.1, 6 * 48);
        assert_eq!(output.2, 16 * 6 * 48);
    }
}
