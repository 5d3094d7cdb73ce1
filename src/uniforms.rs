//! Per-frame camera/light parameters and random pools, ring-buffered across in-flight slots.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

use crate::camera::Camera;
use crate::error::RenderResult;
use crate::frames::FrameSlot;
use crate::gpu::{GpuBuffer, GpuContext};
use crate::scene::AreaLight;

/// Size of one uniform record in the shared ring. Records are 256-byte aligned.
pub const UNIFORM_STRIDE: usize = 256;
/// Random pairs written per frame. Pixels tile the pool in 16×16 blocks.
pub const RANDOM_PAIRS_PER_FRAME: usize = 256;
pub const RANDOM_STRIDE: usize = RANDOM_PAIRS_PER_FRAME * std::mem::size_of::<Vec2>();
/// Side of the square pixel block that shares one random pool.
pub const RANDOM_BLOCK_SIZE: u32 = 16;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraUniforms {
    pub position: Vec3,
    pub _pad0: f32,
    pub forward: Vec3,
    pub _pad1: f32,
    pub right: Vec3,
    pub _pad2: f32,
    pub up: Vec3,
    pub _pad3: f32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LightUniforms {
    pub position: Vec3,
    pub _pad0: f32,
    pub forward: Vec3,
    pub _pad1: f32,
    pub right: Vec3,
    pub _pad2: f32,
    pub up: Vec3,
    pub _pad3: f32,
    pub color: Vec3,
    pub _pad4: f32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Uniforms {
    pub width: u32,
    pub height: u32,
    pub blocks_wide: u32,
    pub frame_index: u32,
    pub camera: CameraUniforms,
    pub light: LightUniforms,
}

const _: () = assert!(std::mem::size_of::<Uniforms>() <= UNIFORM_STRIDE);

impl CameraUniforms {
    pub fn new(camera: &Camera, width: u32, height: u32) -> Self {
        let plane = camera.image_plane(width, height);
        Self {
            position: plane.position,
            forward: plane.forward,
            right: plane.right,
            up: plane.up,
            ..Self::zeroed()
        }
    }
}

impl From<&AreaLight> for LightUniforms {
    fn from(light: &AreaLight) -> Self {
        Self {
            position: light.position,
            forward: light.forward,
            right: light.right,
            up: light.up,
            color: light.color,
            ..Self::zeroed()
        }
    }
}

impl LightUniforms {
    pub fn to_light(&self) -> AreaLight {
        AreaLight {
            position: self.position,
            forward: self.forward,
            right: self.right,
            up: self.up,
            color: self.color,
        }
    }
}

impl Uniforms {
    /// Random pair assigned to pixel `(x, y)` within this frame's pool.
    pub fn random_index(x: u32, y: u32) -> usize {
        ((y % RANDOM_BLOCK_SIZE) * RANDOM_BLOCK_SIZE + x % RANDOM_BLOCK_SIZE) as usize
    }
}

/// Where this frame's data lives inside the shared rings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameOffsets {
    pub slot: usize,
    pub uniform_offset: usize,
    pub random_offset: usize,
    pub frame_index: u32,
}

impl FrameOffsets {
    /// Dynamic offsets for a bind group whose only dynamic binding is the uniform record.
    pub fn uniform(&self) -> [u32; 1] {
        [self.uniform_offset as u32]
    }

    /// Dynamic offsets for a bind group with the uniform record followed by the random pool.
    pub fn uniform_and_randoms(&self) -> [u32; 2] {
        [self.uniform_offset as u32, self.random_offset as u32]
    }
}

/// Everything a frame publishes before it is encoded.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameData {
    pub offsets: FrameOffsets,
    pub uniforms: Uniforms,
    pub randoms: Vec<Vec2>,
}

/// Host side of the per-frame data: frame counter, seeded generator, camera and light.
pub struct FrameSequence {
    slot_count: usize,
    frame_index: u32,
    rng: Xoshiro256Plus,
    camera: Camera,
    light: AreaLight,
}

impl FrameSequence {
    pub fn new(slot_count: usize, seed: u64, camera: Camera, light: AreaLight) -> Self {
        Self {
            slot_count,
            frame_index: 0,
            rng: Xoshiro256Plus::seed_from_u64(seed),
            camera,
            light,
        }
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn reset(&mut self) {
        self.frame_index = 0;
    }

    /// Uniforms and a fresh random pool for `slot`, then advances the frame counter.
    pub fn next(&mut self, slot: &FrameSlot, width: u32, height: u32) -> FrameData {
        let index = slot.index();
        debug_assert!(index < self.slot_count, "slot {index} outside the ring");

        let uniforms = Uniforms {
            width,
            height,
            blocks_wide: width.div_ceil(RANDOM_BLOCK_SIZE),
            frame_index: self.frame_index,
            camera: CameraUniforms::new(&self.camera, width, height),
            light: LightUniforms::from(&self.light),
        };
        let randoms = (0..RANDOM_PAIRS_PER_FRAME)
            .map(|_| Vec2::new(self.rng.random(), self.rng.random()))
            .collect();

        let offsets = FrameOffsets {
            slot: index,
            uniform_offset: UNIFORM_STRIDE * index,
            random_offset: RANDOM_STRIDE * index,
            frame_index: self.frame_index,
        };
        self.frame_index += 1;
        FrameData {
            offsets,
            uniforms,
            randoms,
        }
    }
}

/// Uniform ring and random-pool ring on the device, one region per in-flight slot.
pub struct FrameDataManager {
    sequence: FrameSequence,
    uniforms: GpuBuffer<u8>,
    randoms: GpuBuffer<Vec2>,
}

impl FrameDataManager {
    pub fn new(
        gpu: &GpuContext,
        slot_count: usize,
        seed: u64,
        camera: Camera,
        light: AreaLight,
    ) -> RenderResult<Self> {
        Ok(Self {
            sequence: FrameSequence::new(slot_count, seed, camera, light),
            uniforms: gpu.create_buffer(
                "Uniform Ring",
                UNIFORM_STRIDE * slot_count,
                wgpu::BufferUsages::UNIFORM
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            )?,
            randoms: gpu.create_buffer(
                "Random Pool Ring",
                RANDOM_PAIRS_PER_FRAME * slot_count,
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            )?,
        })
    }

    /// One uniform record, addressed with [`FrameOffsets::uniform_offset`].
    pub fn uniform_binding(&self) -> wgpu::BindingResource<'_> {
        self.uniforms.window_binding(std::mem::size_of::<Uniforms>())
    }

    /// One frame's random pool, addressed with [`FrameOffsets::random_offset`].
    pub fn random_binding(&self) -> wgpu::BindingResource<'_> {
        self.randoms.window_binding(RANDOM_PAIRS_PER_FRAME)
    }

    /// Index the next call to [`advance_frame`](Self::advance_frame) will publish.
    pub fn frame_index(&self) -> u32 {
        self.sequence.frame_index()
    }

    /// Restarts accumulation; the next frame is written as frame 0.
    pub fn reset(&mut self) {
        self.sequence.reset();
    }

    /// Queues `slot`'s region of both rings for a `width`×`height` frame.
    ///
    /// Owning the slot is what makes the write safe: no in-flight frame can be reading it.
    pub fn advance_frame(
        &mut self,
        queue: &wgpu::Queue,
        slot: &FrameSlot,
        width: u32,
        height: u32,
    ) -> FrameOffsets {
        let data = self.sequence.next(slot, width, height);
        let offsets = data.offsets;
        self.uniforms.write(
            queue,
            offsets.uniform_offset,
            bytemuck::bytes_of(&data.uniforms),
        );
        self.randoms.write(queue, slot.index() * RANDOM_PAIRS_PER_FRAME, &data.randoms);
        offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::InFlightFrames;
    use rstest::rstest;

    fn sequence(slots: usize) -> FrameSequence {
        FrameSequence::new(slots, 1, Camera::cornell(), AreaLight::cornell())
    }

    #[rstest]
    #[case(640, 40)]
    #[case(641, 41)]
    #[case(1, 1)]
    #[case(16, 1)]
    fn frame_index_increments_and_blocks_round_up(#[case] width: u32, #[case] blocks: u32) {
        let mut data = sequence(3);
        let frames = InFlightFrames::new(3);
        for expected in 0..5 {
            let slot = frames.acquire();
            let frame = data.next(&slot, width, 48);
            assert_eq!(frame.offsets.frame_index, expected);
            assert_eq!(frame.uniforms.frame_index, expected);
            assert_eq!(frame.uniforms.blocks_wide, blocks);
            assert_eq!((frame.uniforms.width, frame.uniforms.height), (width, 48));
        }
    }

    #[test]
    fn slots_rotate_with_period_three() {
        let mut data = sequence(3);
        let frames = InFlightFrames::new(3);
        let offsets: Vec<FrameOffsets> = (0..6)
            .map(|_| data.next(&frames.acquire(), 32, 32).offsets)
            .collect();
        for i in 0..3 {
            assert_eq!(offsets[i].slot, offsets[i + 3].slot);
            assert_eq!(offsets[i].uniform_offset, offsets[i + 3].uniform_offset);
            assert_eq!(offsets[i].random_offset, offsets[i + 3].random_offset);
        }
        assert_eq!(offsets[1].uniform_offset, UNIFORM_STRIDE);
        assert_eq!(offsets[2].random_offset, 2 * RANDOM_STRIDE);
        assert_eq!(
            offsets[2].uniform_and_randoms(),
            [2 * UNIFORM_STRIDE as u32, 2 * RANDOM_STRIDE as u32]
        );
    }

    #[test]
    fn ring_offsets_meet_device_alignment() {
        // Dynamic offsets must be multiples of the default 256-byte alignment.
        assert_eq!(UNIFORM_STRIDE % 256, 0);
        assert_eq!(RANDOM_STRIDE % 256, 0);
    }

    #[test]
    fn reset_restarts_at_zero() {
        let mut data = sequence(2);
        let frames = InFlightFrames::new(2);
        data.next(&frames.acquire(), 8, 8);
        data.next(&frames.acquire(), 8, 8);
        data.reset();
        assert_eq!(data.next(&frames.acquire(), 8, 8).offsets.frame_index, 0);
    }

    #[test]
    fn random_pool_is_fresh_and_in_unit_square() {
        let mut data = sequence(1);
        let frames = InFlightFrames::new(1);
        let a = data.next(&frames.acquire(), 8, 8).randoms;
        let b = data.next(&frames.acquire(), 8, 8).randoms;
        assert_eq!(a.len(), RANDOM_PAIRS_PER_FRAME);
        assert_ne!(a, b);
        assert!(a.iter().all(|r| (0.0..1.0).contains(&r.x) && (0.0..1.0).contains(&r.y)));
    }

    #[test]
    fn camera_vectors_are_prescaled() {
        let camera = CameraUniforms::new(&Camera::cornell(), 100, 50);
        let half_height = (22.5f32).to_radians().tan();
        assert!((camera.up.y - half_height).abs() < 1e-6);
        assert!((camera.right.x - 2.0 * half_height).abs() < 1e-6);
    }

    #[test]
    fn random_index_tiles_sixteen_by_sixteen() {
        assert_eq!(Uniforms::random_index(0, 0), 0);
        assert_eq!(Uniforms::random_index(15, 15), 255);
        assert_eq!(Uniforms::random_index(17, 1), 17);
        assert_eq!(Uniforms::random_index(33, 34), 2 * 16 + 1);
    }

    #[test]
    fn uploaded_uniforms_land_at_the_slot_offset() {
        let Some(gpu) = crate::gpu::test_gpu() else { return };
        let mut data =
            FrameDataManager::new(&gpu, 3, 1, Camera::cornell(), AreaLight::cornell()).unwrap();
        let frames = InFlightFrames::new(3);
        let _first = frames.acquire();
        let second = frames.acquire();
        data.advance_frame(&gpu.queue, &second, 40, 30);

        let bytes = gpu.read_buffer(&data.uniforms).unwrap();
        let record = &bytes[UNIFORM_STRIDE..UNIFORM_STRIDE + std::mem::size_of::<Uniforms>()];
        let written: Uniforms = bytemuck::pod_read_unaligned(record);
        assert_eq!((written.width, written.height), (40, 30));
        assert_eq!(written.frame_index, 0);
    }
}
