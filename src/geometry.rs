use glam::{Mat4, Vec3};

bitflags::bitflags! {
    /// Which faces of a box the scene builder emits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Faces: u32 {
        const POSITIVE_X = 1;
        const NEGATIVE_X = 1 << 1;
        const POSITIVE_Y = 1 << 2;
        const NEGATIVE_Y = 1 << 3;
        const POSITIVE_Z = 1 << 4;
        const NEGATIVE_Z = 1 << 5;
        /// Emits all six faces regardless of the other bits.
        const ALL = 1 << 6;
    }
}

/// Per-triangle classification, stored as a bit so that ray masks can select it.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TriangleMask {
    Geometry = 1,
    Light = 2,
}

impl TriangleMask {
    pub const fn bits(self) -> u32 {
        self as u32
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            1 => Some(TriangleMask::Geometry),
            2 => Some(TriangleMask::Light),
            _ => None,
        }
    }
}

// Ray masks. A hit counts only when `ray.mask & triangle_mask != 0`.
pub const RAY_MASK_PRIMARY: u32 = TriangleMask::Geometry.bits() | TriangleMask::Light.bits();
pub const RAY_MASK_SHADOW: u32 = TriangleMask::Geometry.bits();
pub const RAY_MASK_SECONDARY: u32 = TriangleMask::Geometry.bits();

/// Corners of the unit cube centered on the origin. Bit 0 of the index selects +x,
/// bit 1 selects +y and bit 2 selects +z.
pub const UNIT_CUBE_CORNERS: [Vec3; 8] = [
    Vec3::new(-0.5, -0.5, -0.5),
    Vec3::new(0.5, -0.5, -0.5),
    Vec3::new(-0.5, 0.5, -0.5),
    Vec3::new(0.5, 0.5, -0.5),
    Vec3::new(-0.5, -0.5, 0.5),
    Vec3::new(0.5, -0.5, 0.5),
    Vec3::new(-0.5, 0.5, 0.5),
    Vec3::new(0.5, 0.5, 0.5),
];

/// Faces in emission order with their corner quads. Winding is counter-clockwise seen from
/// outside, so the cross product of the first two edges points outward.
pub const CUBE_FACES: [(Faces, [usize; 4]); 6] = [
    (Faces::NEGATIVE_X, [0, 4, 6, 2]),
    (Faces::POSITIVE_X, [1, 3, 7, 5]),
    (Faces::NEGATIVE_Y, [0, 1, 5, 4]),
    (Faces::POSITIVE_Y, [2, 6, 7, 3]),
    (Faces::NEGATIVE_Z, [0, 2, 3, 1]),
    (Faces::POSITIVE_Z, [4, 5, 7, 6]),
];

pub fn transformed_cube_corners(transform: Mat4) -> [Vec3; 8] {
    UNIT_CUBE_CORNERS.map(|corner| transform.transform_point3(corner))
}

/// Unit normal of the triangle `v0 v1 v2` following its winding.
pub fn triangle_normal(v0: Vec3, v1: Vec3, v2: Vec3) -> Vec3 {
    let e1 = (v1 - v0).normalize();
    let e2 = (v2 - v0).normalize();
    e1.cross(e2).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_cube_faces_point_outward() {
        for (face, [i0, i1, i2, i3]) in CUBE_FACES {
            let corners = UNIT_CUBE_CORNERS;
            let normal = triangle_normal(corners[i0], corners[i1], corners[i2]);
            let centroid = (corners[i0] + corners[i1] + corners[i2] + corners[i3]) / 4.0;
            assert!(
                normal.dot(centroid) > 0.99 * centroid.length(),
                "{face:?} normal {normal} is not outward"
            );
        }
    }

    #[test]
    fn triangle_masks_round_trip_bits() {
        assert_eq!(TriangleMask::from_bits(1), Some(TriangleMask::Geometry));
        assert_eq!(TriangleMask::from_bits(2), Some(TriangleMask::Light));
        assert_eq!(TriangleMask::from_bits(3), None);
        assert_eq!(RAY_MASK_SHADOW & TriangleMask::Light.bits(), 0);
        assert_ne!(RAY_MASK_PRIMARY & TriangleMask::Light.bits(), 0);
    }
}
