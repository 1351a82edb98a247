//! Growable typed device buffers.
//!
//! Capacity is tracked in elements and only ever grows. Growth allocates the
//! replacement first and drops the old buffer only once the swap is done, so
//! a failed allocation leaves the previous buffer bound and usable.

use std::marker::PhantomData;

use super::device::{BufferDesc, BufferKind, GpuDevice};
use crate::error::MultiMeshError;

/// Capacity growth rule applied when a buffer must be reallocated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthPolicy {
    /// Multiplier applied to the current capacity (clamped to at least 1).
    pub factor: f32,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self { factor: 2.0 }
    }
}

impl GrowthPolicy {
    /// New capacity for growing `current` to hold `required` elements, or
    /// `None` if `required` exceeds `limit`.
    ///
    /// The result is `max(required, ceil(current × factor))`, clamped to
    /// `limit`.
    #[must_use]
    pub fn grow(&self, current: usize, required: usize, limit: usize) -> Option<usize> {
        if required > limit {
            return None;
        }
        let factor = f64::from(self.factor.max(1.0));
        let scaled = (current as f64 * factor).ceil() as usize;
        Some(required.max(scaled).min(limit))
    }
}

/// A device buffer of `T` records that can grow.
///
/// Never shrinks. Each reallocation bumps [`generation`](Self::generation),
/// which is how dependents know their bindings are stale.
pub struct DeviceBuffer<D: GpuDevice, T> {
    buffer: D::Buffer,
    kind: BufferKind,
    capacity: usize,
    len: usize,
    generation: u64,
    _marker: PhantomData<T>,
}

impl<D: GpuDevice, T: bytemuck::Pod> DeviceBuffer<D, T> {
    /// Buffer with room for `capacity` elements (at least one, so the device
    /// never sees a zero-sized allocation).
    ///
    /// # Errors
    ///
    /// [`MultiMeshError::CapacityExhaustion`] if `capacity` exceeds the device
    /// limit for `kind`, or the device's allocation error.
    pub fn with_capacity(
        device: &D,
        kind: BufferKind,
        capacity: usize,
    ) -> Result<Self, MultiMeshError> {
        let capacity = capacity.max(1);
        let limit = Self::element_limit(device, kind);
        if capacity > limit {
            return Err(MultiMeshError::CapacityExhaustion {
                kind,
                requested: capacity,
                limit,
            });
        }
        Ok(Self {
            buffer: Self::allocate(device, kind, capacity)?,
            kind,
            capacity,
            len: 0,
            generation: 0,
            _marker: PhantomData,
        })
    }

    /// Buffer sized for and initialized from `data`.
    ///
    /// # Errors
    ///
    /// Same as [`with_capacity`](Self::with_capacity).
    pub fn with_data(device: &D, kind: BufferKind, data: &[T]) -> Result<Self, MultiMeshError> {
        let mut buffer = Self::with_capacity(device, kind, data.len())?;
        buffer.write(device, data)?;
        Ok(buffer)
    }

    /// Largest element count the device allows for a buffer of `kind`.
    #[must_use]
    pub fn element_limit(device: &D, kind: BufferKind) -> usize {
        let max_bytes = device.limits().max_bytes(kind.usage());
        usize::try_from(max_bytes / size_of::<T>() as u64).unwrap_or(usize::MAX)
    }

    fn allocate(device: &D, kind: BufferKind, capacity: usize) -> Result<D::Buffer, MultiMeshError> {
        let buffer = device.create_buffer(&BufferDesc {
            label: kind.label(),
            size: (capacity * size_of::<T>()) as u64,
            usage: kind.usage(),
        })?;
        Ok(buffer)
    }

    /// Make room for `required` elements.
    ///
    /// Returns `true` if the buffer was reallocated (bindings need
    /// recreation). Contents never survive a reallocation; callers upload the
    /// full data set afterwards.
    ///
    /// # Errors
    ///
    /// [`MultiMeshError::CapacityExhaustion`] when `required` exceeds the
    /// device limit, or the device's allocation error. In both cases the
    /// current buffer stays in place untouched.
    pub fn ensure_capacity(
        &mut self,
        device: &D,
        required: usize,
        policy: &GrowthPolicy,
    ) -> Result<bool, MultiMeshError> {
        if required <= self.capacity {
            return Ok(false);
        }

        let limit = Self::element_limit(device, self.kind);
        let new_capacity = policy.grow(self.capacity, required, limit).ok_or(
            MultiMeshError::CapacityExhaustion {
                kind: self.kind,
                requested: required,
                limit,
            },
        )?;

        let replacement = Self::allocate(device, self.kind, new_capacity)?;
        let previous = std::mem::replace(&mut self.buffer, replacement);
        drop(previous);

        log::debug!(
            "{}: grew {} -> {} elements",
            self.kind,
            self.capacity,
            new_capacity
        );
        self.capacity = new_capacity;
        self.len = 0;
        self.generation += 1;
        Ok(true)
    }

    /// Write `data` from element 0. The buffer must already be large enough.
    ///
    /// # Errors
    ///
    /// [`MultiMeshError::UploadOverflow`] if `data` does not fit.
    pub fn write(&mut self, device: &D, data: &[T]) -> Result<(), MultiMeshError> {
        if data.len() > self.capacity {
            return Err(MultiMeshError::UploadOverflow {
                kind: self.kind,
                len: data.len(),
                capacity: self.capacity,
            });
        }
        if !data.is_empty() {
            device.write_buffer(&self.buffer, 0, bytemuck::cast_slice(data));
        }
        self.len = data.len();
        Ok(())
    }

    /// Record that the device itself filled the first `len` elements.
    pub(crate) fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity);
        self.len = len.min(self.capacity);
    }

    /// The device buffer handle.
    pub fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    /// What this buffer holds.
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Elements currently in use.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no elements are in use.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Capacity in elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of reallocations so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `(label, used_bytes, allocated_bytes)`.
    pub fn buffer_info(&self) -> (&'static str, usize, usize) {
        let element = size_of::<T>();
        (self.kind.label(), self.len * element, self.capacity * element)
    }
}
