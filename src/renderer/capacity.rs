//! Per-instance device buffers and their growth.
//!
//! Owns the transform, optional color and output buffers. Capacities only
//! grow; the manager never shrinks a buffer and only
//! [`release`](BufferCapacityManager::release) (or drop) frees them.

use crate::{
    error::MultiMeshError,
    gpu::{
        device::{BufferKind, GpuDevice},
        device_buffer::{DeviceBuffer, GrowthPolicy},
    },
    instance::InstanceSnapshot,
    mesh::MeshVertex,
    options::BufferOptions,
};

/// Column-major 4x4 transform as uploaded.
pub type TransformRecord = [[f32; 4]; 4];
/// RGBA tint as uploaded.
pub type ColorRecord = [f32; 4];

/// Growable transform, color and output buffers for one streaming mesh.
///
/// Fields drop in declaration order, which is the reverse of acquisition:
/// output, then colors, then transforms.
pub struct BufferCapacityManager<D: GpuDevice> {
    output: DeviceBuffer<D, MeshVertex>,
    colors: Option<DeviceBuffer<D, ColorRecord>>,
    transforms: DeviceBuffer<D, TransformRecord>,
    vertices_per_instance: usize,
    policy: GrowthPolicy,
    reallocations: u64,
}

impl<D: GpuDevice> BufferCapacityManager<D> {
    /// Allocate transform, color (when `instance_colors` is set) and output
    /// buffers sized for `options.initial_instance_capacity` instances.
    ///
    /// # Errors
    ///
    /// Propagates allocation failures and
    /// [`MultiMeshError::CapacityExhaustion`] for an initial size beyond the
    /// device limits. Buffers allocated before the failure are released.
    pub fn new(
        device: &D,
        options: &BufferOptions,
        instance_colors: bool,
        vertices_per_instance: u32,
    ) -> Result<Self, MultiMeshError> {
        let initial = options.initial_instance_capacity.max(1);
        let vertices_per_instance = vertices_per_instance as usize;

        let transforms = DeviceBuffer::with_capacity(device, BufferKind::Transform, initial)?;
        let colors = if instance_colors {
            Some(DeviceBuffer::with_capacity(device, BufferKind::Color, initial)?)
        } else {
            None
        };
        let output = DeviceBuffer::with_capacity(
            device,
            BufferKind::Output,
            initial.saturating_mul(vertices_per_instance),
        )?;

        Ok(Self {
            output,
            colors,
            transforms,
            vertices_per_instance,
            policy: options.growth_policy(),
            reallocations: 0,
        })
    }

    /// Grow the buffer of `kind` to hold at least `required` elements.
    ///
    /// Returns `true` if it was reallocated. Kinds this manager does not own
    /// (template and parameter buffers), and the color kind when colors are
    /// disabled, are left alone and return `false`.
    ///
    /// # Errors
    ///
    /// [`MultiMeshError::CapacityExhaustion`] or an allocation failure; the
    /// existing buffer stays in place.
    pub fn ensure_capacity(
        &mut self,
        device: &D,
        kind: BufferKind,
        required: usize,
    ) -> Result<bool, MultiMeshError> {
        let grew = match kind {
            BufferKind::Transform => self.transforms.ensure_capacity(device, required, &self.policy)?,
            BufferKind::Color => match self.colors.as_mut() {
                Some(colors) => colors.ensure_capacity(device, required, &self.policy)?,
                None => false,
            },
            BufferKind::Output => self.output.ensure_capacity(device, required, &self.policy)?,
            BufferKind::TemplateVertices | BufferKind::TemplateIndices | BufferKind::Params => {
                false
            }
        };
        if grew {
            self.reallocations += 1;
        }
        Ok(grew)
    }

    /// Make every buffer large enough for `instance_count` instances.
    ///
    /// Transforms grow first and the output last, so when a later kind fails
    /// the output buffer still holds the last published vertices. Returns
    /// the number of buffers reallocated.
    ///
    /// # Errors
    ///
    /// As [`ensure_capacity`](Self::ensure_capacity).
    pub fn ensure_instances(&mut self, device: &D, instance_count: usize) -> Result<u32, MultiMeshError> {
        let output_required = instance_count
            .checked_mul(self.vertices_per_instance)
            .ok_or_else(|| MultiMeshError::CapacityExhaustion {
                kind: BufferKind::Output,
                requested: usize::MAX,
                limit: DeviceBuffer::<D, MeshVertex>::element_limit(device, BufferKind::Output),
            })?;

        let mut reallocations = 0;
        for (kind, required) in [
            (BufferKind::Transform, instance_count),
            (BufferKind::Color, instance_count),
            (BufferKind::Output, output_required),
        ] {
            if self.ensure_capacity(device, kind, required)? {
                reallocations += 1;
            }
        }
        Ok(reallocations)
    }

    /// Write the snapshot's transforms and colors from element 0.
    ///
    /// # Errors
    ///
    /// [`MultiMeshError::UploadOverflow`] if capacity was not ensured first.
    pub fn upload(&mut self, device: &D, snapshot: &InstanceSnapshot) -> Result<(), MultiMeshError> {
        self.transforms.write(device, snapshot.transforms())?;
        if let Some(colors) = self.colors.as_mut() {
            colors.write(device, snapshot.colors())?;
        }
        Ok(())
    }

    /// Transform buffer.
    pub fn transforms(&self) -> &DeviceBuffer<D, TransformRecord> {
        &self.transforms
    }

    /// Color buffer, if per-instance colors are enabled.
    pub fn colors(&self) -> Option<&DeviceBuffer<D, ColorRecord>> {
        self.colors.as_ref()
    }

    /// Expanded vertex buffer.
    pub fn output(&self) -> &DeviceBuffer<D, MeshVertex> {
        &self.output
    }

    pub(crate) fn output_mut(&mut self) -> &mut DeviceBuffer<D, MeshVertex> {
        &mut self.output
    }

    #[cfg(test)]
    pub(crate) fn colors_mut(&mut self) -> Option<&mut DeviceBuffer<D, ColorRecord>> {
        self.colors.as_mut()
    }

    /// Reallocations since allocation, including those made by calls that
    /// later failed.
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    /// Output vertices per instance.
    pub fn vertices_per_instance(&self) -> usize {
        self.vertices_per_instance
    }

    /// Capacity in elements of the buffer of `kind`, if this manager owns one.
    pub fn capacity(&self, kind: BufferKind) -> Option<usize> {
        match kind {
            BufferKind::Transform => Some(self.transforms.capacity()),
            BufferKind::Color => self.colors.as_ref().map(DeviceBuffer::capacity),
            BufferKind::Output => Some(self.output.capacity()),
            _ => None,
        }
    }

    /// Reallocation count of the buffer of `kind`, if this manager owns one.
    pub fn generation(&self, kind: BufferKind) -> Option<u64> {
        match kind {
            BufferKind::Transform => Some(self.transforms.generation()),
            BufferKind::Color => self.colors.as_ref().map(DeviceBuffer::generation),
            BufferKind::Output => Some(self.output.generation()),
            _ => None,
        }
    }

    /// `(label, used_bytes, allocated_bytes)` for every owned buffer.
    pub fn buffer_info(&self) -> Vec<(&'static str, usize, usize)> {
        let mut info = vec![self.transforms.buffer_info()];
        if let Some(colors) = &self.colors {
            info.push(colors.buffer_info());
        }
        info.push(self.output.buffer_info());
        info
    }

    /// Release output, colors, then transforms.
    pub fn release(self) {
        let Self {
            output,
            colors,
            transforms,
            ..
        } = self;
        drop(output);
        drop(colors);
        drop(transforms);
    }
}
