use glam::{Mat4, Vec3};

use super::builder::{BoxSpec, SceneBuilder};
use super::light::AreaLight;
use super::Scene;
use crate::error::RenderResult;
use crate::geometry::Faces;

const WHITE: Vec3 = Vec3::new(0.725, 0.71, 0.68);
const RED: Vec3 = Vec3::new(0.63, 0.065, 0.05);
const GREEN: Vec3 = Vec3::new(0.14, 0.45, 0.091);

/// Adds the ceiling light quad and the open-fronted room shared by the presets.
fn add_room(builder: &mut SceneBuilder) {
    // Light: the +Y face of a thin box just below the ceiling, emitting downwards.
    builder.add_box(
        BoxSpec::new(
            Faces::POSITIVE_Y,
            Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0))
                * Mat4::from_scale(Vec3::new(0.5, 1.98, 0.5)),
        )
        .inward()
        .light(),
    );

    let room = Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)) * Mat4::from_scale(Vec3::splat(2.0));
    // Floor, ceiling and back wall
    builder.add_box(
        BoxSpec::new(
            Faces::NEGATIVE_Y | Faces::POSITIVE_Y | Faces::NEGATIVE_Z,
            room,
        )
        .color(WHITE)
        .inward(),
    );
    // Left wall
    builder.add_box(BoxSpec::new(Faces::NEGATIVE_X, room).color(RED).inward());
    // Right wall
    builder.add_box(BoxSpec::new(Faces::POSITIVE_X, room).color(GREEN).inward());

    builder.set_light(AreaLight::cornell());
}

/// The Cornell box: light, room and the short and tall boxes.
pub fn create_cornell_box() -> RenderResult<Scene> {
    let mut builder = SceneBuilder::new();
    add_room(&mut builder);

    // Short box
    builder.add_box(
        BoxSpec::new(
            Faces::ALL,
            Mat4::from_translation(Vec3::new(0.3275, 0.3, 0.3725))
                * Mat4::from_rotation_y(-0.3)
                * Mat4::from_scale(Vec3::splat(0.6)),
        )
        .color(WHITE),
    );
    // Tall box
    builder.add_box(
        BoxSpec::new(
            Faces::ALL,
            Mat4::from_translation(Vec3::new(-0.335, 0.6, -0.29))
                * Mat4::from_rotation_y(0.3)
                * Mat4::from_scale(Vec3::new(0.6, 1.2, 0.6)),
        )
        .color(WHITE),
    );

    builder.build()
}

/// Light and room only.
pub fn create_empty_room() -> RenderResult<Scene> {
    let mut builder = SceneBuilder::new();
    add_room(&mut builder);
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TriangleMask;

    #[test]
    fn cornell_box_layout() {
        let scene = create_cornell_box().unwrap();
        // 1 light face + 5 room faces + 2 * 6 box faces
        assert_eq!(scene.triangle_count(), (1 + 5 + 12) * 2);
        assert_eq!(scene.vertex_count(), scene.triangle_count() * 3);
        assert_eq!(
            scene
                .masks()
                .iter()
                .filter(|&&m| m == TriangleMask::Light)
                .count(),
            2
        );
    }

    #[test]
    fn light_quad_sits_below_ceiling_facing_down() {
        let scene = create_empty_room().unwrap();
        for vertex in 0..6 {
            assert!((scene.positions()[vertex].y - 1.99).abs() < 1e-5);
            assert!(scene.normals()[vertex].y < -0.99);
        }
    }
}
