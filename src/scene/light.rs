use glam::Vec3;

/// Rectangular area light used for next-event estimation.
///
/// `right` and `up` are half-extents: the emitting rectangle spans
/// `position ± right ± up`. `forward` is the emitting direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AreaLight {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub color: Vec3,
}

impl AreaLight {
    /// The ceiling light of the Cornell box.
    pub fn cornell() -> Self {
        Self {
            position: Vec3::new(0.0, 1.98, 0.0),
            forward: Vec3::new(0.0, -1.0, 0.0),
            right: Vec3::new(0.25, 0.0, 0.0),
            up: Vec3::new(0.0, 0.0, 0.25),
            color: Vec3::splat(4.0),
        }
    }

    /// Maps a random pair in `[0, 1)²` to a point on the emitting rectangle.
    pub fn sample_point(&self, r: [f32; 2]) -> Vec3 {
        self.position + self.right * (r[0] * 2.0 - 1.0) + self.up * (r[1] * 2.0 - 1.0)
    }

    /// Radiance arriving at `point` from a sampled light point, before the receiver's cosine.
    ///
    /// Returns the unit direction towards the light, the distance to it and the radiance.
    pub fn sample(&self, r: [f32; 2], point: Vec3) -> (Vec3, f32, Vec3) {
        let to_light = self.sample_point(r) - point;
        let distance = to_light.length();
        if distance <= f32::EPSILON {
            return (self.forward, 0.0, Vec3::ZERO);
        }
        let direction = to_light / distance;
        let falloff = (-direction).dot(self.forward).clamp(0.0, 1.0) / (distance * distance);
        (direction, distance, self.color * falloff)
    }
}

impl Default for AreaLight {
    fn default() -> Self {
        Self::cornell()
    }
}
