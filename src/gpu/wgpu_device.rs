//! [`GpuDevice`] backed by a wgpu device and queue.
//!
//! wgpu has no fixed-function stream-out stage, so the expansion runs as a
//! compute pass writing into a buffer created with `STORAGE | VERTEX` usage.
//! Ending the compute pass before submission releases the stream target;
//! later render passes read the same buffer as ordinary vertex input.

use std::cell::RefCell;

use super::{
    device::{
        BufferDesc, BufferUsage, DeviceError, DeviceLimits, ExpansionResources, GpuDevice,
        ShaderProgram,
    },
    render_context::RenderContext,
    shader_composer::ShaderComposer,
};
use crate::renderer::multi_mesh::PublishedMesh;

/// wgpu implementation of the device seam.
pub struct WgpuDevice {
    context: RenderContext,
    composer: RefCell<ShaderComposer>,
}

/// Compute pipeline plus the layout its bind groups are built against.
pub struct ExpansionPipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    /// Bound in the color slot when per-instance colors are disabled.
    placeholder_colors: wgpu::Buffer,
}

impl WgpuDevice {
    /// Wrap a render context.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Pipeline`] if the shared shader modules fail to
    /// register.
    pub fn new(context: RenderContext) -> Result<Self, DeviceError> {
        Ok(Self {
            context,
            composer: RefCell::new(ShaderComposer::new()?),
        })
    }

    /// The underlying device and queue.
    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    /// Draw a published mesh with the caller's render pipeline, which must
    /// use [`MeshVertex::layout`](crate::mesh::MeshVertex::layout) at slot 0.
    pub fn draw_published(
        render_pass: &mut wgpu::RenderPass<'_>,
        mesh: &PublishedMesh<'_, wgpu::Buffer>,
    ) {
        if mesh.vertex_count == 0 {
            return;
        }
        render_pass.set_vertex_buffer(0, mesh.buffer.slice(..));
        render_pass.draw(0..mesh.vertex_count, 0..1);
    }

    /// Run `create` inside out-of-memory and validation error scopes.
    fn scoped<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T, wgpu::Error> {
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = create(device);
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        let validation = pollster::block_on(device.pop_error_scope());
        match out_of_memory.or(validation) {
            Some(error) => Err(error),
            None => Ok(value),
        }
    }
}

fn usages(usage: BufferUsage) -> wgpu::BufferUsages {
    match usage {
        BufferUsage::Attribute => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        BufferUsage::StreamOutput => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::VERTEX,
        BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    }
}

fn layout_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    layout_entry(binding, wgpu::BufferBindingType::Storage { read_only })
}

impl GpuDevice for WgpuDevice {
    type Buffer = wgpu::Buffer;
    type Pipeline = ExpansionPipeline;
    type Bindings = wgpu::BindGroup;

    fn limits(&self) -> DeviceLimits {
        let limits = self.context.device.limits();
        DeviceLimits {
            max_buffer_size: limits.max_buffer_size,
            max_storage_binding_size: u64::from(limits.max_storage_buffer_binding_size),
            max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
        }
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<wgpu::Buffer, DeviceError> {
        self.scoped(|device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label),
                size: desc.size,
                usage: usages(desc.usage),
                mapped_at_creation: false,
            })
        })
        .map_err(|e| match e {
            wgpu::Error::OutOfMemory { .. } => DeviceError::OutOfMemory {
                label: desc.label.to_owned(),
                size: desc.size,
            },
            other => DeviceError::Validation(other.to_string()),
        })
    }

    fn write_buffer(&self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
        if !data.is_empty() {
            self.context.queue.write_buffer(buffer, offset, data);
        }
    }

    fn create_expansion_pipeline(
        &self,
        program: &ShaderProgram<'_>,
    ) -> Result<ExpansionPipeline, DeviceError> {
        let module = self
            .composer
            .borrow_mut()
            .compose(&self.context.device, program)?;
        let label = program.label;

        self.scoped(|device| {
            let bind_group_layout =
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{label} Layout")),
                    entries: &[
                        layout_entry(0, wgpu::BufferBindingType::Uniform),
                        storage(1, true),
                        storage(2, true),
                        storage(3, true),
                        storage(4, true),
                        storage(5, false),
                    ],
                });

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{label} Pipeline Layout")),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&format!("{label} Pipeline")),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(program.entry_point),
                compilation_options: Default::default(),
                cache: None,
            });

            let placeholder_colors = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{label} Placeholder Colors")),
                size: 16,
                usage: wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            });

            ExpansionPipeline {
                pipeline,
                bind_group_layout,
                placeholder_colors,
            }
        })
        .map_err(|e| DeviceError::Pipeline(e.to_string()))
    }

    fn create_expansion_bindings(
        &self,
        pipeline: &ExpansionPipeline,
        resources: &ExpansionResources<'_, wgpu::Buffer>,
    ) -> wgpu::BindGroup {
        let colors = resources.colors.unwrap_or(&pipeline.placeholder_colors);
        self.context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("MultiMesh Expansion Bind Group"),
                layout: &pipeline.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: resources.params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: resources.template_vertices.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: resources.template_indices.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: resources.transforms.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: colors.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: resources.output.as_entire_binding(),
                    },
                ],
            })
    }

    fn dispatch_expansion(
        &self,
        pipeline: &ExpansionPipeline,
        bindings: &wgpu::BindGroup,
        workgroups: [u32; 3],
    ) {
        let mut encoder = self.context.create_encoder("MultiMesh Expansion Encoder");
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("MultiMesh Expansion Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, bindings, &[]);
            pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
        }
        self.context.submit(encoder);
    }
}
