use std::ops::Range;

use glam::{Mat4, Vec3};

use super::{AreaLight, Scene};
use crate::error::{RenderError, RenderResult};
use crate::geometry::{self, CUBE_FACES, Faces, TriangleMask};

/// One transformed box of the scene.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxSpec {
    pub faces: Faces,
    pub color: Vec3,
    pub transform: Mat4,
    pub inward_normals: bool,
    pub mask: TriangleMask,
}

impl BoxSpec {
    pub fn new(faces: Faces, transform: Mat4) -> Self {
        Self {
            faces,
            color: Vec3::ONE,
            transform,
            inward_normals: false,
            mask: TriangleMask::Geometry,
        }
    }

    pub fn color(mut self, color: Vec3) -> Self {
        self.color = color;
        self
    }

    pub fn inward(mut self) -> Self {
        self.inward_normals = true;
        self
    }

    pub fn light(mut self) -> Self {
        self.mask = TriangleMask::Light;
        self
    }
}

/// Accumulates triangle soup box by box. Emission order is insertion order, so triangle
/// `i` of the finished scene is always primitive `i` of the mask array.
#[derive(Debug, Default)]
pub struct SceneBuilder {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    colors: Vec<Vec3>,
    masks: Vec<TriangleMask>,
    light: Option<AreaLight>,
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the requested faces of `spec` and returns the triangle indices they occupy.
    pub fn add_box(&mut self, spec: BoxSpec) -> Range<u32> {
        let first = self.masks.len() as u32;
        let corners = geometry::transformed_cube_corners(spec.transform);
        let all = spec.faces.contains(Faces::ALL);

        for (face, quad) in CUBE_FACES {
            if all || spec.faces.contains(face) {
                self.add_face(&corners, quad, &spec);
            }
        }

        first..self.masks.len() as u32
    }

    fn add_face(&mut self, corners: &[Vec3; 8], [i0, i1, i2, i3]: [usize; 4], spec: &BoxSpec) {
        let (v0, v1, v2, v3) = (corners[i0], corners[i1], corners[i2], corners[i3]);

        let mut n0 = geometry::triangle_normal(v0, v1, v2);
        let mut n1 = geometry::triangle_normal(v0, v2, v3);
        if spec.inward_normals {
            n0 = -n0;
            n1 = -n1;
        }

        self.positions.extend_from_slice(&[v0, v1, v2, v0, v2, v3]);
        self.normals.extend_from_slice(&[n0, n0, n0, n1, n1, n1]);
        self.colors.extend_from_slice(&[spec.color; 6]);
        self.masks.extend_from_slice(&[spec.mask; 2]);
    }

    pub fn set_light(&mut self, light: AreaLight) -> &mut Self {
        self.light = Some(light);
        self
    }

    pub fn triangle_count(&self) -> usize {
        self.masks.len()
    }

    pub fn build(self) -> RenderResult<Scene> {
        if self.masks.is_empty() {
            return Err(RenderError::EmptyScene);
        }
        debug_assert_eq!(self.masks.len() * 3, self.positions.len());

        Ok(Scene {
            positions: self.positions,
            normals: self.normals,
            colors: self.colors,
            masks: self.masks,
            light: self.light.unwrap_or_default(),
        })
    }
}
