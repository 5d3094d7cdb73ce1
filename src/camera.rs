use glam::Vec3;

/// Vertical field of view of the pinhole camera.
pub const FIELD_OF_VIEW_DEGREES: f32 = 45.0;

/// Pinhole camera basis. `right` and `up` are unit vectors here; the uniforms carry them
/// scaled to the image plane (see [`Camera::image_plane`]).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
}

/// Camera basis with `right` and `up` pre-scaled by the half-extents of the image plane at
/// unit distance, so that ray generation needs no trigonometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImagePlane {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
}

impl Camera {
    /// Looking down -Z into the open side of the Cornell box.
    pub fn cornell() -> Self {
        Self {
            position: Vec3::new(0.0, 1.0, 3.38),
            forward: Vec3::NEG_Z,
            right: Vec3::X,
            up: Vec3::Y,
        }
    }

    pub fn image_plane(&self, width: u32, height: u32) -> ImagePlane {
        let aspect_ratio = width as f32 / height.max(1) as f32;
        let image_plane_height = (FIELD_OF_VIEW_DEGREES.to_radians() / 2.0).tan();
        let image_plane_width = aspect_ratio * image_plane_height;

        ImagePlane {
            position: self.position,
            forward: self.forward,
            right: self.right * image_plane_width,
            up: self.up * image_plane_height,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::cornell()
    }
}

impl ImagePlane {
    /// Direction through normalized device coordinates `uv` in `[-1, 1]²`, +y up.
    pub fn direction(&self, uv: [f32; 2]) -> Vec3 {
        (self.right * uv[0] + self.up * uv[1] + self.forward).normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_plane_scales_with_aspect() {
        let plane = Camera::cornell().image_plane(200, 100);
        let half_height = (22.5_f32).to_radians().tan();
        assert!((plane.up.length() - half_height).abs() < 1e-6);
        assert!((plane.right.length() - 2.0 * half_height).abs() < 1e-6);
    }

    #[test]
    fn corner_direction_spans_half_field_of_view() {
        let plane = Camera::cornell().image_plane(64, 64);
        let top = plane.direction([0.0, 1.0]);
        let angle = top.angle_between(Vec3::NEG_Z).to_degrees();
        assert!((angle - FIELD_OF_VIEW_DEGREES / 2.0).abs() < 1e-3);
    }
}
