//! Triangle acceleration structure.
//!
//! A median-split bounding volume hierarchy over the scene's triangle soup, flattened into a
//! node array. Triangle indices in leaves keep the scene's primitive order, so
//! intersection results and mask lookups use the scene's own indices.

use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

use crate::error::{RenderError, RenderResult};
use crate::geometry::TriangleMask;
use crate::intersector::{Intersection, Ray};

const MAX_LEAF_SIZE: usize = 4;
const MAX_DEPTH: u32 = 64;

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::INFINITY,
        max: Vec3::NEG_INFINITY,
    };

    pub fn from_triangle([v0, v1, v2]: [Vec3; 3]) -> Self {
        Self {
            min: v0.min(v1).min(v2),
            max: v0.max(v1).max(v2),
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    /// Slab test. Returns the entry distance when the ray overlaps the box within `t_max`.
    /// An axis the ray does not move along is a hit only while the origin lies within that
    /// slab, boundary included.
    fn hit(&self, origin: Vec3, direction: Vec3, inv_direction: Vec3, t_max: f32) -> Option<f32> {
        let mut t_near = 0.0f32;
        let mut t_far = t_max;
        for axis in 0..3 {
            if direction[axis] == 0.0 {
                if origin[axis] < self.min[axis] || origin[axis] > self.max[axis] {
                    return None;
                }
                continue;
            }
            let t0 = (self.min[axis] - origin[axis]) * inv_direction[axis];
            let t1 = (self.max[axis] - origin[axis]) * inv_direction[axis];
            t_near = t_near.max(t0.min(t1));
            t_far = t_far.min(t0.max(t1));
        }
        (t_near <= t_far).then_some(t_near)
    }
}

/// Node layout read by the intersection kernel. Internal nodes store their children in
/// `left_first` / `right_or_count`; leaves set [`LEAF_FLAG`] in `right_or_count` and keep the
/// triangle range there.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BvhNodeRecord {
    pub min: Vec3,
    pub left_first: u32,
    pub max: Vec3,
    pub right_or_count: u32,
}

pub const LEAF_FLAG: u32 = 1 << 31;

#[derive(Clone, Copy, Debug)]
enum BvhNode {
    Internal { bounds: Aabb, left: u32, right: u32 },
    Leaf { bounds: Aabb, first: u32, count: u32 },
}

impl BvhNode {
    fn bounds(&self) -> &Aabb {
        match self {
            BvhNode::Internal { bounds, .. } | BvhNode::Leaf { bounds, .. } => bounds,
        }
    }
}

/// Build statistics
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildStats {
    pub build_time_ms: f32,
    pub node_count: u32,
    pub leaf_count: u32,
    pub max_depth: u32,
}

/// Index over a static triangle soup answering nearest-hit and any-hit queries.
#[derive(Clone, Debug)]
pub struct AccelerationStructure {
    positions: Vec<Vec3>,
    masks: Vec<u32>,
    nodes: Vec<BvhNode>,
    root: Option<u32>,
    tri_indices: Vec<u32>,
    stats: BuildStats,
}

impl AccelerationStructure {
    /// Takes the flattened vertex buffer (three positions per triangle) and one mask per
    /// triangle. The structure answers no queries until [`rebuild`](Self::rebuild) runs.
    pub fn new(positions: &[Vec3], masks: &[TriangleMask]) -> RenderResult<Self> {
        if positions.is_empty() {
            return Err(RenderError::EmptyScene);
        }
        if positions.len() % 3 != 0 || masks.len() * 3 != positions.len() {
            return Err(RenderError::InvalidConfig(format!(
                "{} vertices do not match {} triangle masks",
                positions.len(),
                masks.len()
            )));
        }

        Ok(Self {
            positions: positions.to_vec(),
            masks: masks.iter().map(|m| m.bits()).collect(),
            nodes: Vec::new(),
            root: None,
            tri_indices: Vec::new(),
            stats: BuildStats::default(),
        })
    }

    /// Builds the structure for a finished scene.
    pub fn for_scene(scene: &crate::scene::Scene) -> RenderResult<Self> {
        let mut accel = Self::new(scene.positions(), scene.masks())?;
        accel.rebuild();
        Ok(accel)
    }

    /// One leaf holding every triangle: traversal degenerates into testing them all.
    pub fn single_leaf(scene: &crate::scene::Scene) -> RenderResult<Self> {
        let mut accel = Self::new(scene.positions(), scene.masks())?;
        let count = accel.triangle_count();
        let bounds = (0..count).fold(Aabb::EMPTY, |acc, i| {
            acc.union(Aabb::from_triangle(accel.triangle(i)))
        });
        accel.tri_indices = (0..count as u32).collect();
        accel.nodes = vec![BvhNode::Leaf {
            bounds,
            first: 0,
            count: count as u32,
        }];
        accel.root = Some(0);
        accel.stats = BuildStats {
            node_count: 1,
            leaf_count: 1,
            ..BuildStats::default()
        };
        Ok(accel)
    }

    pub fn triangle_count(&self) -> usize {
        self.masks.len()
    }

    pub fn is_built(&self) -> bool {
        self.root.is_some()
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    pub fn bounds(&self) -> Aabb {
        self.root
            .map_or(Aabb::EMPTY, |root| *self.nodes[root as usize].bounds())
    }

    pub fn triangle(&self, index: usize) -> [Vec3; 3] {
        let base = index * 3;
        [
            self.positions[base],
            self.positions[base + 1],
            self.positions[base + 2],
        ]
    }

    pub fn mask(&self, index: usize) -> u32 {
        self.masks[index]
    }

    pub fn masks(&self) -> &[u32] {
        &self.masks
    }

    pub fn triangle_indices(&self) -> &[u32] {
        &self.tri_indices
    }

    /// Vertex positions widened to `vec4` for storage buffer layout.
    pub fn position_records(&self) -> Vec<Vec4> {
        self.positions.iter().map(|p| p.extend(1.0)).collect()
    }

    /// Nodes in kernel layout. Children precede their parents, so the root is the last
    /// record.
    pub fn node_records(&self) -> Vec<BvhNodeRecord> {
        debug_assert!(
            self.root.is_none() || self.root == Some(self.nodes.len() as u32 - 1),
            "root must be the last node"
        );
        self.nodes
            .iter()
            .map(|node| match *node {
                BvhNode::Internal {
                    bounds,
                    left,
                    right,
                } => BvhNodeRecord {
                    min: bounds.min,
                    left_first: left,
                    max: bounds.max,
                    right_or_count: right,
                },
                BvhNode::Leaf {
                    bounds,
                    first,
                    count,
                } => BvhNodeRecord {
                    min: bounds.min,
                    left_first: first,
                    max: bounds.max,
                    right_or_count: count | LEAF_FLAG,
                },
            })
            .collect()
    }

    pub fn rebuild(&mut self) {
        let start_time = Instant::now();
        let count = self.triangle_count();

        let tri_bounds: Vec<Aabb> = (0..count)
            .map(|i| Aabb::from_triangle(self.triangle(i)))
            .collect();
        let centroids: Vec<Vec3> = tri_bounds.iter().map(|b| (b.min + b.max) * 0.5).collect();

        self.tri_indices = (0..count as u32).collect();
        self.nodes = Vec::with_capacity(2 * count);
        self.stats = BuildStats::default();

        let root = build_recursive(
            &tri_bounds,
            &centroids,
            &mut self.tri_indices,
            &mut self.nodes,
            0,
            count,
            0,
            &mut self.stats,
        );
        self.root = Some(root);

        self.stats.node_count = self.nodes.len() as u32;
        self.stats.build_time_ms = start_time.elapsed().as_secs_f32() * 1000.0;
        log::debug!(
            "built acceleration structure: {} triangles, {} nodes, depth {}",
            count,
            self.stats.node_count,
            self.stats.max_depth
        );
    }

    /// Closest qualifying hit, or [`Intersection::MISS`].
    pub fn intersect_nearest(&self, ray: &Ray) -> Intersection {
        let mut closest = Intersection::MISS;
        let mut t_max = ray.max_distance;
        self.traverse(ray, |accel, tri| {
            if let Some((t, u, v)) = accel.hit_triangle(ray, tri, t_max) {
                t_max = t;
                closest = Intersection {
                    distance: t,
                    primitive_index: tri as u32,
                    coordinates: Vec2::new(u, v),
                };
            }
            (false, t_max)
        });
        closest
    }

    /// Any qualifying hit; returns its distance, or a negative distance when unoccluded.
    pub fn intersect_any(&self, ray: &Ray) -> f32 {
        let mut found = -1.0;
        self.traverse(ray, |accel, tri| {
            if let Some((t, _, _)) = accel.hit_triangle(ray, tri, ray.max_distance) {
                found = t;
                return (true, ray.max_distance);
            }
            (false, ray.max_distance)
        });
        found
    }

    /// Walks the hierarchy, calling `visit` for each candidate triangle. `visit` returns
    /// whether to stop and the current upper bound on hit distance.
    fn traverse(&self, ray: &Ray, mut visit: impl FnMut(&Self, usize) -> (bool, f32)) {
        let Some(root) = self.root else {
            return;
        };
        if !ray.is_active() {
            return;
        }

        let inv_direction = ray.direction.recip();
        let mut t_max = ray.max_distance;
        let mut stack = Vec::with_capacity(MAX_DEPTH as usize);
        stack.push(root);

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if node
                .bounds()
                .hit(ray.origin, ray.direction, inv_direction, t_max)
                .is_none() {
                continue;
            }
            match *node {
                BvhNode::Leaf { first, count, .. } => {
                    for &tri in &self.tri_indices[first as usize..(first + count) as usize] {
                        let (stop, bound) = visit(self, tri as usize);
                        if stop {
                            return;
                        }
                        t_max = bound;
                    }
                }
                BvhNode::Internal { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
    }

    /// Möller-Trumbore test against one triangle, honoring the ray mask.
    /// Returns the distance and the barycentric weights of the second and third vertex.
    pub fn hit_triangle(&self, ray: &Ray, index: usize, t_max: f32) -> Option<(f32, f32, f32)> {
        if ray.mask & self.masks[index] == 0 {
            return None;
        }
        let [v0, v1, v2] = self.triangle(index);
        let e1 = v1 - v0;
        let e2 = v2 - v0;
        let p = ray.direction.cross(e2);
        let det = e1.dot(p);
        if det.abs() < 1e-8 {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = ray.origin - v0;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(e1);
        let v = ray.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = e2.dot(q) * inv_det;
        (t > 0.0 && t <= t_max).then_some((t, u, v))
    }
}

#[allow(clippy::too_many_arguments)]
fn build_recursive(
    tri_bounds: &[Aabb],
    centroids: &[Vec3],
    tri_indices: &mut [u32],
    nodes: &mut Vec<BvhNode>,
    first: usize,
    count: usize,
    depth: u32,
    stats: &mut BuildStats,
) -> u32 {
    stats.max_depth = stats.max_depth.max(depth);

    let range = first..first + count;
    let bounds = tri_indices[range.clone()]
        .iter()
        .fold(Aabb::EMPTY, |acc, &i| acc.union(tri_bounds[i as usize]));

    let make_leaf = |nodes: &mut Vec<BvhNode>, stats: &mut BuildStats| {
        stats.leaf_count += 1;
        nodes.push(BvhNode::Leaf {
            bounds,
            first: first as u32,
            count: count as u32,
        });
        (nodes.len() - 1) as u32
    };

    if count <= MAX_LEAF_SIZE || depth >= MAX_DEPTH {
        return make_leaf(nodes, stats);
    }

    // Split the centroid bounds along their longest axis at the median centroid.
    let centroid_bounds = tri_indices[range.clone()].iter().fold(Aabb::EMPTY, |acc, &i| {
        let c = centroids[i as usize];
        acc.union(Aabb { min: c, max: c })
    });
    let extent = centroid_bounds.extent();
    let axis = if extent.x > extent.y && extent.x > extent.z {
        0
    } else if extent.y > extent.z {
        1
    } else {
        2
    };
    if extent[axis] <= 0.0 {
        return make_leaf(nodes, stats);
    }

    let slice = &mut tri_indices[range];
    let mid = count / 2;
    slice.select_nth_unstable_by(mid, |&a, &b| {
        centroids[a as usize][axis].total_cmp(&centroids[b as usize][axis])
    });

    let left = build_recursive(
        tri_bounds,
        centroids,
        tri_indices,
        nodes,
        first,
        mid,
        depth + 1,
        stats,
    );
    let right = build_recursive(
        tri_bounds,
        centroids,
        tri_indices,
        nodes,
        first + mid,
        count - mid,
        depth + 1,
        stats,
    );

    nodes.push(BvhNode::Internal {
        bounds,
        left,
        right,
    });
    (nodes.len() - 1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{RAY_MASK_PRIMARY, RAY_MASK_SHADOW};
    use crate::scene::create_cornell_box;

    fn ray(origin: Vec3, direction: Vec3, mask: u32) -> Ray {
        Ray::new(origin, direction.normalize(), mask, f32::INFINITY)
    }

    #[test]
    fn mismatched_masks_are_rejected() {
        let positions = [Vec3::ZERO; 6];
        assert!(AccelerationStructure::new(&positions, &[TriangleMask::Geometry]).is_err());
        assert!(matches!(
            AccelerationStructure::new(&[], &[]),
            Err(RenderError::EmptyScene)
        ));
    }

    #[test]
    fn unbuilt_structure_reports_no_hits() {
        let scene = create_cornell_box().unwrap();
        let accel = AccelerationStructure::new(scene.positions(), scene.masks()).unwrap();
        assert!(!accel.is_built());
        let down = ray(Vec3::new(0.0, 1.0, 0.0), Vec3::NEG_Y, RAY_MASK_PRIMARY);
        assert!(!accel.intersect_nearest(&down).is_hit());
    }

    #[test]
    fn build_covers_the_scene() {
        let scene = create_cornell_box().unwrap();
        let accel = AccelerationStructure::for_scene(&scene).unwrap();
        let bounds = accel.bounds();
        assert!(bounds.is_valid());
        assert!(bounds.min.y <= 0.0 && bounds.max.y >= 2.0);
        assert!(accel.stats().leaf_count > 1);
        assert_eq!(accel.stats().node_count, 2 * accel.stats().leaf_count - 1);
    }

    #[test]
    fn shadow_mask_sees_through_the_light() {
        let scene = create_cornell_box().unwrap();
        let accel = AccelerationStructure::for_scene(&scene).unwrap();

        let up = ray(Vec3::new(0.0, 1.5, 0.0), Vec3::Y, RAY_MASK_PRIMARY);
        let hit = accel.intersect_nearest(&up);
        assert!(hit.is_hit());
        assert_eq!(
            scene.masks()[hit.primitive_index as usize],
            TriangleMask::Light
        );
        assert!((hit.distance - 0.49).abs() < 1e-4);

        let shadow = ray(Vec3::new(0.0, 1.5, 0.0), Vec3::Y, RAY_MASK_SHADOW);
        let hit = accel.intersect_nearest(&shadow);
        assert_eq!(
            scene.masks()[hit.primitive_index as usize],
            TriangleMask::Geometry
        );
        assert!((hit.distance - 0.5).abs() < 1e-4);
    }

    #[test]
    fn slab_test_handles_rays_parallel_to_a_face() {
        let unit = Aabb {
            min: Vec3::ZERO,
            max: Vec3::ONE,
        };
        let hit = |origin: Vec3, direction: Vec3| {
            unit.hit(origin, direction, direction.recip(), f32::INFINITY)
        };
        // Origin on the x = 0 plane, moving along +Y.
        assert_eq!(hit(Vec3::new(0.0, -1.0, 0.5), Vec3::Y), Some(1.0));
        assert_eq!(hit(Vec3::new(1.0, -1.0, 0.5), Vec3::Y), Some(1.0));
        assert_eq!(hit(Vec3::new(-0.001, -1.0, 0.5), Vec3::Y), None);
        assert_eq!(hit(Vec3::new(0.5, 0.5, 0.5), Vec3::NEG_Z), Some(0.0));
        assert_eq!(hit(Vec3::new(0.5, 2.0, 0.5), Vec3::Y), None);
    }

    #[test]
    fn light_is_found_from_a_wall_plane_origin() {
        let scene = create_cornell_box().unwrap();
        let accel = AccelerationStructure::for_scene(&scene).unwrap();
        // x = -0.25 lies on the light's edge plane.
        let up = ray(Vec3::new(-0.25, 0.01, 0.0), Vec3::Y, RAY_MASK_PRIMARY);
        let hit = accel.intersect_nearest(&up);
        assert!(hit.is_hit());
        assert_eq!(
            scene.masks()[hit.primitive_index as usize],
            TriangleMask::Light
        );
        assert!((hit.distance - 1.98).abs() < 1e-4);
    }

    #[test]
    fn node_records_put_the_root_last() {
        let scene = create_cornell_box().unwrap();
        let accel = AccelerationStructure::for_scene(&scene).unwrap();
        let records = accel.node_records();
        assert_eq!(records.len(), accel.stats().node_count as usize);
        let root = records.last().unwrap();
        assert_eq!(root.min, accel.bounds().min);
        assert_eq!(root.max, accel.bounds().max);
        assert_eq!(root.right_or_count & LEAF_FLAG, 0);

        let leaves: u32 = records
            .iter()
            .filter(|r| r.right_or_count & LEAF_FLAG != 0)
            .map(|r| r.right_or_count & !LEAF_FLAG)
            .sum();
        assert_eq!(leaves as usize, accel.triangle_count());
    }

    #[test]
    fn single_leaf_holds_every_triangle() {
        let scene = create_cornell_box().unwrap();
        let accel = AccelerationStructure::single_leaf(&scene).unwrap();
        let records = accel.node_records();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].right_or_count,
            scene.triangle_count() as u32 | LEAF_FLAG
        );
    }

    #[test]
    fn any_hit_respects_max_distance() {
        let scene = create_cornell_box().unwrap();
        let accel = AccelerationStructure::for_scene(&scene).unwrap();
        let mut r = ray(Vec3::new(0.0, 1.0, 0.0), Vec3::NEG_Y, RAY_MASK_SHADOW);
        assert!(accel.intersect_any(&r) > 0.0);
        r.max_distance = 0.5;
        assert!(accel.intersect_any(&r) < 0.0);
    }
}
