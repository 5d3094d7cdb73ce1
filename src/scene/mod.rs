pub mod builder;
pub mod light;
pub mod scenes;

use glam::Vec3;

use crate::geometry::TriangleMask;

pub use builder::{BoxSpec, SceneBuilder};
pub use light::AreaLight;
pub use scenes::{create_cornell_box, create_empty_room};

/// Immutable triangle soup produced by [`SceneBuilder`].
///
/// Vertex arrays are parallel; triangle `i` uses vertices `3i..3i + 3` and mask `i`.
#[derive(Clone, Debug)]
pub struct Scene {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    colors: Vec<Vec3>,
    masks: Vec<TriangleMask>,
    light: AreaLight,
}

impl Scene {
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn colors(&self) -> &[Vec3] {
        &self.colors
    }

    pub fn masks(&self) -> &[TriangleMask] {
        &self.masks
    }

    pub fn light(&self) -> &AreaLight {
        &self.light
    }

    pub fn triangle_count(&self) -> usize {
        self.masks.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle(&self, index: usize) -> [Vec3; 3] {
        let base = index * 3;
        [
            self.positions[base],
            self.positions[base + 1],
            self.positions[base + 2],
        ]
    }

    /// Barycentric interpolation of a per-vertex attribute over triangle `index`.
    ///
    /// `coordinates` are the weights of the second and third vertex.
    pub fn interpolate(attribute: &[Vec3], index: usize, coordinates: [f32; 2]) -> Vec3 {
        let [u, v] = coordinates;
        let w = 1.0 - u - v;
        let base = index * 3;
        attribute[base] * w + attribute[base + 1] * u + attribute[base + 2] * v
    }
}
