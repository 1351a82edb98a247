//! Template geometry and the vertex record shared by template and output.

use glam::{Mat4, Vec4};

use crate::error::MultiMeshError;

/// Vertex record for both the template mesh and the expanded output stream.
///
/// 48 bytes, tightly packed: the expansion shader declares the same layout
/// as twelve scalar fields so no WGSL vector alignment padding applies.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    /// Object-space (template) or world-space (output) position.
    pub position: [f32; 3],
    /// Unit normal.
    pub normal: [f32; 3],
    /// Texture coordinate.
    pub tex_coord: [f32; 2],
    /// Linear RGBA color.
    pub color: [f32; 4],
}

const ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x3,
    2 => Float32x2,
    3 => Float32x4,
];

impl MeshVertex {
    /// Vertex with white color.
    #[must_use]
    pub const fn new(position: [f32; 3], normal: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tex_coord,
            color: [1.0; 4],
        }
    }

    /// CPU mirror of the expansion shader's per-vertex work: affine
    /// transform of position and normal, color multiplied by `tint`.
    #[must_use]
    pub fn transformed(&self, model: &Mat4, tint: [f32; 4]) -> Self {
        let [px, py, pz] = self.position;
        let [nx, ny, nz] = self.normal;
        let position = *model * Vec4::new(px, py, pz, 1.0);
        let mut normal = (*model * Vec4::new(nx, ny, nz, 0.0)).truncate();
        let length = normal.length();
        if length > 0.0 {
            normal /= length;
        }
        Self {
            position: position.truncate().to_array(),
            normal: normal.to_array(),
            tex_coord: self.tex_coord,
            color: [
                self.color[0] * tint[0],
                self.color[1] * tint[1],
                self.color[2] * tint[2],
                self.color[3] * tint[3],
            ],
        }
    }

    /// Vertex buffer layout for drawing the published output stream with an
    /// ordinary (non-instanced) render pipeline.
    #[must_use]
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }
}

/// The single base geometry every instance is a copy of.
///
/// Triangle list; the expansion writes one output vertex per index, so the
/// number of vertices each instance contributes equals the index count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateMesh {
    vertices: Vec<MeshVertex>,
    indices: Vec<u32>,
}

impl TemplateMesh {
    /// Wrap vertex and index data. Validation happens when the mesh is
    /// configured into a pipeline.
    #[must_use]
    pub fn new(vertices: Vec<MeshVertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Template vertices.
    #[must_use]
    pub fn vertices(&self) -> &[MeshVertex] {
        &self.vertices
    }

    /// Template triangle-list indices.
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Output vertices produced per instance.
    #[must_use]
    pub fn vertices_per_instance(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Check the mesh can drive an expansion pass.
    ///
    /// # Errors
    ///
    /// [`MultiMeshError::MissingTemplate`] for an empty mesh,
    /// [`MultiMeshError::InvalidTemplate`] for a non-triangle index count or
    /// an index past the end of the vertex array.
    pub fn validate(&self) -> Result<(), MultiMeshError> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(MultiMeshError::MissingTemplate);
        }
        if self.indices.len() % 3 != 0 {
            return Err(MultiMeshError::InvalidTemplate(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        if let Some(&bad) = self
            .indices
            .iter()
            .find(|&&i| i as usize >= self.vertices.len())
        {
            return Err(MultiMeshError::InvalidTemplate(format!(
                "index {bad} out of range for {} vertices",
                self.vertices.len()
            )));
        }
        Ok(())
    }
}
