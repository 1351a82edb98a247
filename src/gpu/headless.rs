//! CPU-side [`GpuDevice`] for headless hosts and tests.
//!
//! Buffers live in host memory, the expansion pass runs the same per-vertex
//! math as the WGSL program (see [`MeshVertex::transformed`]), and every
//! device call is appended to an event log. Reads and writes past the end of
//! a buffer are skipped and counted instead of corrupting memory, the way
//! robust buffer access behaves on a GPU.

use std::{cell::RefCell, rc::Rc};

use glam::Mat4;
use rustc_hash::FxHashMap;

use super::device::{
    BufferDesc, DeviceError, DeviceLimits, ExpansionParams, ExpansionResources, GpuDevice,
    ShaderProgram, EXPANSION_WORKGROUP_SIZE,
};
use crate::mesh::MeshVertex;

/// One recorded device call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A buffer was allocated.
    BufferCreated {
        /// Buffer id.
        id: u64,
        /// Debug label.
        label: String,
        /// Size in bytes.
        size: u64,
    },
    /// Bytes were written into a buffer.
    BufferWritten {
        /// Buffer id.
        id: u64,
        /// Byte offset.
        offset: u64,
        /// Bytes written.
        len: usize,
    },
    /// A buffer handle was dropped.
    BufferReleased {
        /// Buffer id.
        id: u64,
    },
    /// An expansion pipeline was built.
    PipelineCreated {
        /// Pipeline id.
        id: u64,
    },
    /// An expansion pipeline was dropped.
    PipelineReleased {
        /// Pipeline id.
        id: u64,
    },
    /// A binding set was created.
    BindingsCreated {
        /// Binding set id.
        id: u64,
    },
    /// A binding set was dropped.
    BindingsReleased {
        /// Binding set id.
        id: u64,
    },
    /// An expansion pass was submitted.
    Dispatched {
        /// Workgroup grid.
        workgroups: [u32; 3],
    },
}

#[derive(Default)]
struct HeadlessState {
    next_id: u64,
    contents: FxHashMap<u64, Vec<u8>>,
    events: Vec<DeviceEvent>,
    failing_allocations: u32,
    out_of_range_accesses: u64,
    stale_binding_uses: u64,
}

impl HeadlessState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

type SharedState = Rc<RefCell<HeadlessState>>;

/// Host-memory device that executes the expansion on the CPU.
#[derive(Clone)]
pub struct HeadlessDevice {
    limits: DeviceLimits,
    state: SharedState,
}

/// Buffer owned by a [`HeadlessDevice`]. Dropping it frees the host memory.
pub struct HeadlessBuffer {
    id: u64,
    size: u64,
    state: SharedState,
}

impl HeadlessBuffer {
    /// Device-unique id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for HeadlessBuffer {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        let _ = state.contents.remove(&self.id);
        state.events.push(DeviceEvent::BufferReleased { id: self.id });
    }
}

/// Expansion pipeline placeholder; the program itself runs on the CPU.
pub struct HeadlessPipeline {
    id: u64,
    state: SharedState,
}

impl Drop for HeadlessPipeline {
    fn drop(&mut self) {
        self.state
            .borrow_mut()
            .events
            .push(DeviceEvent::PipelineReleased { id: self.id });
    }
}

/// Binding set: buffer ids resolved at dispatch time.
pub struct HeadlessBindings {
    id: u64,
    params: u64,
    template_vertices: u64,
    template_indices: u64,
    transforms: u64,
    colors: Option<u64>,
    output: u64,
    state: SharedState,
}

impl Drop for HeadlessBindings {
    fn drop(&mut self) {
        self.state
            .borrow_mut()
            .events
            .push(DeviceEvent::BindingsReleased { id: self.id });
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// Device with the WebGPU default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    /// Device with explicit limits.
    #[must_use]
    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            state: Rc::default(),
        }
    }

    /// Make the next `count` allocations fail with
    /// [`DeviceError::OutOfMemory`].
    pub fn fail_next_allocations(&self, count: u32) {
        self.state.borrow_mut().failing_allocations = count;
    }

    /// Every device call so far, in submission order.
    #[must_use]
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state.borrow().events.clone()
    }

    /// Forget recorded events.
    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    /// Buffers currently alive on this device.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.state.borrow().contents.len()
    }

    /// Reads or writes skipped because they fell outside a buffer.
    #[must_use]
    pub fn out_of_range_accesses(&self) -> u64 {
        self.state.borrow().out_of_range_accesses
    }

    /// Dispatches that referenced a buffer which no longer exists.
    #[must_use]
    pub fn stale_binding_uses(&self) -> u64 {
        self.state.borrow().stale_binding_uses
    }

    /// Copy the contents of `buffer` out as elements of `T`.
    #[must_use]
    pub fn read<T: bytemuck::Pod>(&self, buffer: &HeadlessBuffer) -> Vec<T> {
        let state = self.state.borrow();
        state.contents.get(&buffer.id).map_or_else(Vec::new, |bytes| {
            bytes
                .chunks_exact(size_of::<T>())
                .map(bytemuck::pod_read_unaligned)
                .collect()
        })
    }
}

fn read_element<T: bytemuck::Pod>(bytes: &[u8], index: usize) -> Option<T> {
    let size = size_of::<T>();
    let start = index.checked_mul(size)?;
    bytes
        .get(start..start.checked_add(size)?)
        .map(bytemuck::pod_read_unaligned)
}

fn write_element<T: bytemuck::Pod>(bytes: &mut [u8], index: usize, value: &T) -> bool {
    let size = size_of::<T>();
    let Some(start) = index.checked_mul(size) else {
        return false;
    };
    match bytes.get_mut(start..start + size) {
        Some(dst) => {
            dst.copy_from_slice(bytemuck::bytes_of(value));
            true
        }
        None => false,
    }
}

/// Run the expansion grid exactly as the compute program would. Returns the
/// number of skipped out-of-range accesses, or `None` if a bound buffer is
/// gone.
fn expand_on_cpu(
    contents: &FxHashMap<u64, Vec<u8>>,
    bindings: &HeadlessBindings,
    workgroups: [u32; 3],
    output: &mut [u8],
) -> Option<u64> {
    let lookup = |id: u64| contents.get(&id).map(Vec::as_slice);
    let params: ExpansionParams = read_element(lookup(bindings.params)?, 0)?;
    let vertices = lookup(bindings.template_vertices)?;
    let indices = lookup(bindings.template_indices)?;
    let transforms = lookup(bindings.transforms)?;
    let colors = match bindings.colors {
        Some(id) => Some(lookup(id)?),
        None => None,
    };

    let per_instance = params.vertices_per_instance as usize;
    let mut skipped = 0;
    for gz in 0..workgroups[2] {
        for gy in 0..workgroups[1] {
            let instance = (gz * params.rows_per_slice + gy) as usize;
            for corner in 0..(workgroups[0] * EXPANSION_WORKGROUP_SIZE) as usize {
                if corner >= per_instance || instance >= params.instance_count as usize {
                    continue;
                }
                let vertex = read_element::<u32>(indices, corner)
                    .and_then(|i| read_element::<MeshVertex>(vertices, i as usize));
                let model = read_element::<[[f32; 4]; 4]>(transforms, instance);
                let tint = if params.use_instance_colors == 0 {
                    Some([1.0; 4])
                } else {
                    colors.and_then(|c| read_element::<[f32; 4]>(c, instance))
                };
                let (Some(vertex), Some(model), Some(tint)) = (vertex, model, tint) else {
                    skipped += 1;
                    continue;
                };
                let expanded = vertex.transformed(&Mat4::from_cols_array_2d(&model), tint);
                if !write_element(output, instance * per_instance + corner, &expanded) {
                    skipped += 1;
                }
            }
        }
    }
    Some(skipped)
}

impl GpuDevice for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type Pipeline = HeadlessPipeline;
    type Bindings = HeadlessBindings;

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<HeadlessBuffer, DeviceError> {
        let mut state = self.state.borrow_mut();
        if state.failing_allocations > 0 {
            state.failing_allocations -= 1;
            return Err(DeviceError::OutOfMemory {
                label: desc.label.to_owned(),
                size: desc.size,
            });
        }
        if desc.size == 0 || desc.size > self.limits.max_bytes(desc.usage) {
            return Err(DeviceError::Validation(format!(
                "buffer '{}' has invalid size {}",
                desc.label, desc.size
            )));
        }

        let id = state.allocate_id();
        let _ = state.contents.insert(id, vec![0; desc.size as usize]);
        state.events.push(DeviceEvent::BufferCreated {
            id,
            label: desc.label.to_owned(),
            size: desc.size,
        });
        Ok(HeadlessBuffer {
            id,
            size: desc.size,
            state: Rc::clone(&self.state),
        })
    }

    fn write_buffer(&self, buffer: &HeadlessBuffer, offset: u64, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        let start = offset as usize;
        let written = state
            .contents
            .get_mut(&buffer.id)
            .and_then(|bytes| bytes.get_mut(start..start + data.len()))
            .map(|dst| dst.copy_from_slice(data))
            .is_some();
        if written {
            state.events.push(DeviceEvent::BufferWritten {
                id: buffer.id,
                offset,
                len: data.len(),
            });
        } else {
            state.out_of_range_accesses += 1;
        }
    }

    fn create_expansion_pipeline(
        &self,
        program: &ShaderProgram<'_>,
    ) -> Result<HeadlessPipeline, DeviceError> {
        if program.entry_point.is_empty() {
            return Err(DeviceError::Pipeline(format!(
                "program '{}' has no entry point",
                program.label
            )));
        }
        let mut state = self.state.borrow_mut();
        let id = state.allocate_id();
        state.events.push(DeviceEvent::PipelineCreated { id });
        Ok(HeadlessPipeline {
            id,
            state: Rc::clone(&self.state),
        })
    }

    fn create_expansion_bindings(
        &self,
        _pipeline: &HeadlessPipeline,
        resources: &ExpansionResources<'_, HeadlessBuffer>,
    ) -> HeadlessBindings {
        let mut state = self.state.borrow_mut();
        let id = state.allocate_id();
        state.events.push(DeviceEvent::BindingsCreated { id });
        HeadlessBindings {
            id,
            params: resources.params.id,
            template_vertices: resources.template_vertices.id,
            template_indices: resources.template_indices.id,
            transforms: resources.transforms.id,
            colors: resources.colors.map(HeadlessBuffer::id),
            output: resources.output.id,
            state: Rc::clone(&self.state),
        }
    }

    fn dispatch_expansion(
        &self,
        _pipeline: &HeadlessPipeline,
        bindings: &HeadlessBindings,
        workgroups: [u32; 3],
    ) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.events.push(DeviceEvent::Dispatched { workgroups });

        let Some(mut output) = state.contents.remove(&bindings.output) else {
            state.stale_binding_uses += 1;
            return;
        };
        let skipped = expand_on_cpu(&state.contents, bindings, workgroups, &mut output);
        let _ = state.contents.insert(bindings.output, output);
        match skipped {
            Some(count) => state.out_of_range_accesses += count,
            None => state.stale_binding_uses += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::device::BufferUsage;

    fn desc(size: u64) -> BufferDesc<'static> {
        BufferDesc {
            label: "test",
            size,
            usage: BufferUsage::Attribute,
        }
    }

    #[test]
    fn dropping_a_buffer_releases_it() {
        let device = HeadlessDevice::new();
        let buffer = device.create_buffer(&desc(16)).unwrap();
        let id = buffer.id();
        assert_eq!(device.live_buffers(), 1);
        drop(buffer);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(
            device.events().last(),
            Some(&DeviceEvent::BufferReleased { id })
        );
    }

    #[test]
    fn write_past_end_is_skipped() {
        let device = HeadlessDevice::new();
        let buffer = device.create_buffer(&desc(8)).unwrap();
        device.write_buffer(&buffer, 4, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(device.out_of_range_accesses(), 1);
        assert_eq!(device.read::<u8>(&buffer), vec![0; 8]);
    }

    #[test]
    fn injected_allocation_failure() {
        let device = HeadlessDevice::new();
        device.fail_next_allocations(1);
        assert!(matches!(
            device.create_buffer(&desc(16)),
            Err(DeviceError::OutOfMemory { size: 16, .. })
        ));
        assert!(device.create_buffer(&desc(16)).is_ok());
    }

    #[test]
    fn rejects_buffers_beyond_limits() {
        let device = HeadlessDevice::with_limits(DeviceLimits {
            max_buffer_size: 64,
            max_storage_binding_size: 32,
            max_workgroups_per_dimension: 8,
        });
        assert!(device.create_buffer(&desc(32)).is_ok());
        assert!(matches!(
            device.create_buffer(&desc(33)),
            Err(DeviceError::Validation(_))
        ));
    }
}
