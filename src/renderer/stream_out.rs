//! The template expansion pass.
//!
//! Every instance's copy of the template is written into the output buffer
//! as a flat triangle list: instance `i` owns output vertices
//! `[i * V, (i + 1) * V)` where `V` is the template index count. The grid
//! runs template corners along x and instances along y and z, so instance
//! counts beyond one dispatch dimension fold into additional z slices.

use crate::{
    error::MultiMeshError,
    gpu::{
        device::{
            BufferKind, ExpansionParams, ExpansionResources, GpuDevice, ShaderProgram,
            EXPANSION_WORKGROUP_SIZE,
        },
        device_buffer::DeviceBuffer,
    },
    mesh::{MeshVertex, TemplateMesh},
};

use super::capacity::BufferCapacityManager;

/// Generations of the buffers a binding set was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BindingKey {
    transforms: u64,
    colors: Option<u64>,
    output: u64,
}

impl BindingKey {
    fn of<D: GpuDevice>(buffers: &BufferCapacityManager<D>) -> Self {
        Self {
            transforms: buffers.transforms().generation(),
            colors: buffers.colors().map(DeviceBuffer::generation),
            output: buffers.output().generation(),
        }
    }
}

struct CachedBindings<D: GpuDevice> {
    key: BindingKey,
    bindings: D::Bindings,
}

/// Workgroup grid covering `vertices_per_instance × instance_count`
/// invocations, plus the number of instance rows per z slice.
///
/// Returns `None` when either axis cannot fit in `max_per_dimension`
/// workgroups.
#[must_use]
pub fn dispatch_grid(
    vertices_per_instance: u32,
    instance_count: u32,
    max_per_dimension: u32,
) -> Option<([u32; 3], u32)> {
    if vertices_per_instance == 0 || instance_count == 0 || max_per_dimension == 0 {
        return None;
    }
    let x = vertices_per_instance.div_ceil(EXPANSION_WORKGROUP_SIZE);
    let rows = instance_count.min(max_per_dimension);
    let z = instance_count.div_ceil(rows);
    (x <= max_per_dimension && z <= max_per_dimension).then_some(([x, rows, z], rows))
}

/// Expansion pipeline state plus the template and parameter buffers it
/// reads.
///
/// Fields drop in declaration order: bindings, parameters, template indices,
/// template vertices, then the pipeline itself.
pub struct StreamOutPipeline<D: GpuDevice> {
    bindings: Option<CachedBindings<D>>,
    params: DeviceBuffer<D, ExpansionParams>,
    template_indices: DeviceBuffer<D, u32>,
    template_vertices: DeviceBuffer<D, MeshVertex>,
    pipeline: D::Pipeline,
    vertices_per_instance: u32,
}

impl<D: GpuDevice> StreamOutPipeline<D> {
    /// Build the pipeline from `program` and upload `template`.
    ///
    /// # Errors
    ///
    /// [`MultiMeshError::MissingTemplate`] or
    /// [`MultiMeshError::InvalidTemplate`] for an unusable template, device
    /// errors for pipeline or buffer creation.
    pub fn configure(
        device: &D,
        program: &ShaderProgram<'_>,
        template: &TemplateMesh,
    ) -> Result<Self, MultiMeshError> {
        template.validate()?;

        let pipeline = device.create_expansion_pipeline(program)?;
        let template_vertices =
            DeviceBuffer::with_data(device, BufferKind::TemplateVertices, template.vertices())?;
        let template_indices =
            DeviceBuffer::with_data(device, BufferKind::TemplateIndices, template.indices())?;
        let params = DeviceBuffer::with_capacity(device, BufferKind::Params, 1)?;

        log::debug!(
            "configured '{}': {} template vertices, {} vertices per instance",
            program.label,
            template.vertices().len(),
            template.vertices_per_instance()
        );

        Ok(Self {
            bindings: None,
            params,
            template_indices,
            template_vertices,
            pipeline,
            vertices_per_instance: template.vertices_per_instance(),
        })
    }

    /// Output vertices each instance contributes.
    pub fn vertices_per_instance(&self) -> u32 {
        self.vertices_per_instance
    }

    /// Check that `instance_count` instances can be expanded in one pass on
    /// `device`, before any buffer is touched.
    ///
    /// # Errors
    ///
    /// [`MultiMeshError::CapacityExhaustion`] when the dispatch grid would
    /// exceed the device's workgroup limits.
    pub fn check_dispatch(&self, device: &D, instance_count: usize) -> Result<(), MultiMeshError> {
        if instance_count == 0 {
            return Ok(());
        }
        self.grid_for(device, instance_count).map(|_| ())
    }

    fn grid_for(&self, device: &D, instance_count: usize) -> Result<([u32; 3], u32), MultiMeshError> {
        let max = device.limits().max_workgroups_per_dimension;
        let limit = (max as usize).saturating_mul(max as usize);
        u32::try_from(instance_count)
            .ok()
            .and_then(|count| dispatch_grid(self.vertices_per_instance, count, max))
            .ok_or(MultiMeshError::CapacityExhaustion {
                kind: BufferKind::Output,
                requested: instance_count,
                limit,
            })
    }

    /// Expand `instance_count` instances into the output buffer.
    ///
    /// `instance_count` must equal the number of transforms uploaded this
    /// frame. Bindings are rebuilt only when a buffer generation changed. An
    /// empty set issues no dispatch. Returns the number of output vertices
    /// now valid.
    ///
    /// # Errors
    ///
    /// [`MultiMeshError::StaleBindingMismatch`] if `instance_count` differs
    /// from the uploaded data, [`MultiMeshError::UploadOverflow`] if the
    /// output buffer is too small, or a grid size error from
    /// [`check_dispatch`](Self::check_dispatch). Nothing is dispatched in any
    /// of these cases.
    pub fn execute(
        &mut self,
        device: &D,
        buffers: &mut BufferCapacityManager<D>,
        instance_count: usize,
    ) -> Result<u32, MultiMeshError> {
        let uploaded = buffers.transforms().len();
        let colors_uploaded = buffers.colors().map_or(uploaded, DeviceBuffer::len);
        if instance_count != uploaded || instance_count != colors_uploaded {
            return Err(MultiMeshError::StaleBindingMismatch {
                instance_count,
                uploaded,
                colors_uploaded,
            });
        }

        let vertex_total = instance_count.saturating_mul(self.vertices_per_instance as usize);
        let output_capacity = buffers.output().capacity();
        if vertex_total > output_capacity {
            return Err(MultiMeshError::UploadOverflow {
                kind: BufferKind::Output,
                len: vertex_total,
                capacity: output_capacity,
            });
        }

        if instance_count == 0 {
            buffers.output_mut().set_len(0);
            return Ok(0);
        }

        let (workgroups, rows_per_slice) = self.grid_for(device, instance_count)?;
        let vertex_count = u32::try_from(vertex_total).map_err(|_| MultiMeshError::UploadOverflow {
            kind: BufferKind::Output,
            len: vertex_total,
            capacity: u32::MAX as usize,
        })?;

        self.params.write(
            device,
            &[ExpansionParams {
                vertices_per_instance: self.vertices_per_instance,
                instance_count: instance_count as u32,
                rows_per_slice,
                use_instance_colors: u32::from(buffers.colors().is_some()),
            }],
        )?;

        let key = BindingKey::of(buffers);
        if self.bindings.as_ref().is_none_or(|cached| cached.key != key) {
            // Old bindings reference buffers that may already be gone.
            self.bindings = None;
            let bindings = device.create_expansion_bindings(
                &self.pipeline,
                &ExpansionResources {
                    params: self.params.buffer(),
                    template_vertices: self.template_vertices.buffer(),
                    template_indices: self.template_indices.buffer(),
                    transforms: buffers.transforms().buffer(),
                    colors: buffers.colors().map(DeviceBuffer::buffer),
                    output: buffers.output().buffer(),
                },
            );
            log::debug!("rebuilt expansion bindings for {key:?}");
            self.bindings = Some(CachedBindings { key, bindings });
        }

        if let Some(cached) = &self.bindings {
            device.dispatch_expansion(&self.pipeline, &cached.bindings, workgroups);
        }
        buffers.output_mut().set_len(vertex_total);
        Ok(vertex_count)
    }

    /// `(label, used_bytes, allocated_bytes)` for the template and
    /// parameter buffers.
    pub fn buffer_info(&self) -> Vec<(&'static str, usize, usize)> {
        vec![
            self.template_vertices.buffer_info(),
            self.template_indices.buffer_info(),
            self.params.buffer_info(),
        ]
    }

    /// Release bindings, parameters, template indices, template vertices,
    /// then the pipeline.
    pub fn release(self) {
        let Self {
            bindings,
            params,
            template_indices,
            template_vertices,
            pipeline,
            ..
        } = self;
        drop(bindings);
        drop(params);
        drop(template_indices);
        drop(template_vertices);
        drop(pipeline);
    }
}
