//! Instance registry and per-frame snapshots.
//!
//! The registry is the host-facing store of "what exists and where"; it has
//! no GPU knowledge. Once per frame it is materialized into an
//! [`InstanceSnapshot`], whose id, transform and color arrays are built in a
//! single pass and therefore index-aligned.

use std::fmt;

use glam::Mat4;
use rustc_hash::FxHashMap;

/// Stable handle for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// The raw key.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Renderable state of one instance, stored by copy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceData {
    /// Object-to-world transform.
    pub transform: Mat4,
    /// Tint; `None` uses the configured default color.
    pub color: Option<[f32; 4]>,
}

impl InstanceData {
    /// Instance with the default color.
    #[must_use]
    pub const fn new(transform: Mat4) -> Self {
        Self {
            transform,
            color: None,
        }
    }

    /// Set an explicit tint.
    #[must_use]
    pub const fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = Some(color);
        self
    }
}

impl Default for InstanceData {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}

/// Index-aligned per-frame copy of the registry.
///
/// Element `i` of [`transforms`](Self::transforms) and
/// [`colors`](Self::colors) both belong to [`ids`](Self::ids)`[i]`. The
/// vectors are reused across frames to avoid reallocating every tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceSnapshot {
    ids: Vec<InstanceId>,
    transforms: Vec<[[f32; 4]; 4]>,
    colors: Vec<[f32; 4]>,
}

impl InstanceSnapshot {
    /// Instances captured.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Captured ids.
    #[must_use]
    pub fn ids(&self) -> &[InstanceId] {
        &self.ids
    }

    /// Column-major transforms, aligned with [`ids`](Self::ids).
    #[must_use]
    pub fn transforms(&self) -> &[[[f32; 4]; 4]] {
        &self.transforms
    }

    /// Resolved colors, aligned with [`ids`](Self::ids).
    #[must_use]
    pub fn colors(&self) -> &[[f32; 4]] {
        &self.colors
    }

    fn clear(&mut self) {
        self.ids.clear();
        self.transforms.clear();
        self.colors.clear();
    }
}

/// Mapping from [`InstanceId`] to [`InstanceData`].
///
/// Iteration order is unspecified and may change between mutations.
#[derive(Debug, Clone, Default)]
pub struct InstanceRegistry {
    instances: FxHashMap<InstanceId, InstanceData>,
    next_id: u64,
}

impl InstanceRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under a fresh id.
    pub fn add(&mut self, data: InstanceData) -> InstanceId {
        let mut id = InstanceId(self.next_id);
        while self.instances.contains_key(&id) {
            self.next_id = self.next_id.wrapping_add(1);
            id = InstanceId(self.next_id);
        }
        self.next_id = self.next_id.wrapping_add(1);
        let _ = self.instances.insert(id, data);
        id
    }

    /// Store `data` under `id`, replacing any previous entry.
    pub fn insert(&mut self, id: InstanceId, data: InstanceData) -> InstanceId {
        let _ = self.instances.insert(id, data);
        id
    }

    /// Remove `id`. Returns whether it was present.
    pub fn remove(&mut self, id: InstanceId) -> bool {
        self.instances.remove(&id).is_some()
    }

    /// Whether `id` is present.
    #[must_use]
    pub fn contains(&self, id: InstanceId) -> bool {
        self.instances.contains_key(&id)
    }

    /// Stored data for `id`.
    #[must_use]
    pub fn get(&self, id: InstanceId) -> Option<&InstanceData> {
        self.instances.get(&id)
    }

    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Replace the transform of `id`. Returns `false` if absent.
    pub fn update_transform(&mut self, id: InstanceId, transform: Mat4) -> bool {
        self.instances
            .get_mut(&id)
            .map(|data| data.transform = transform)
            .is_some()
    }

    /// Replace the color of `id`. Returns `false` if absent.
    pub fn update_color(&mut self, id: InstanceId, color: Option<[f32; 4]>) -> bool {
        self.instances
            .get_mut(&id)
            .map(|data| data.color = color)
            .is_some()
    }

    /// Keep only instances for which `keep` returns `true`. Returns the
    /// number removed.
    pub fn retain(&mut self, mut keep: impl FnMut(InstanceId, &InstanceData) -> bool) -> usize {
        let before = self.instances.len();
        self.instances.retain(|id, data| keep(*id, data));
        before - self.instances.len()
    }

    /// Iterate over all instances.
    pub fn iter(&self) -> impl Iterator<Item = (InstanceId, &InstanceData)> {
        self.instances.iter().map(|(id, data)| (*id, data))
    }

    /// Materialize the registry into `snapshot`, resolving missing colors to
    /// `default_color`.
    pub fn snapshot_into(&self, snapshot: &mut InstanceSnapshot, default_color: [f32; 4]) {
        snapshot.clear();
        snapshot.ids.reserve(self.instances.len());
        snapshot.transforms.reserve(self.instances.len());
        snapshot.colors.reserve(self.instances.len());
        for (id, data) in &self.instances {
            snapshot.ids.push(*id);
            snapshot.transforms.push(data.transform.to_cols_array_2d());
            snapshot.colors.push(data.color.unwrap_or(default_color));
        }
    }
}
