// SPDX-License-Identifier: CEPL-1.0
//! Point lights, the tile grid and the visibility buffer layout.

use crate::error::{RenderError, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use fplus_math::{LightVolume, Vec3};
use rand::Rng;

pub const MAX_POINT_LIGHT_COUNT: usize = 1000;
pub const MAX_POINT_LIGHTS_PER_TILE: usize = 63;
pub const TILE_SIZE: u32 = 16;

pub const LIGHT_RADIUS: f32 = 5.0;
/// Vertical speed of the animated lights, world units per second.
pub const LIGHT_RISE_SPEED: f32 = 3.0;
const MIN_COLOR_LENGTH: f32 = 0.8;

/// One tile record: a count followed by the visible light indices.
pub const VISIBILITY_RECORD_SIZE: vk::DeviceSize = 4 * (MAX_POINT_LIGHTS_PER_TILE as vk::DeviceSize + 1);

/// `i32` count padded to 16 bytes ahead of the light array.
pub const LIGHT_HEADER_SIZE: usize = 16;
pub const LIGHT_BUFFER_SIZE: usize =
    LIGHT_HEADER_SIZE + MAX_POINT_LIGHT_COUNT * std::mem::size_of::<PointLight>();

/// std430 layout of one light.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PointLight {
    pub pos: [f32; 3],
    pub radius: f32,
    pub intensity: [f32; 3],
    pub _pad: f32,
}

impl PointLight {
    pub fn new(pos: Vec3, radius: f32, intensity: Vec3) -> Self {
        Self {
            pos: pos.to_array(),
            radius,
            intensity: intensity.to_array(),
            _pad: 0.0,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.pos)
    }
}

/// The scene's lights, animated on the CPU and uploaded every frame.
#[derive(Clone, Debug)]
pub struct LightSet {
    lights: Vec<PointLight>,
    volume: LightVolume,
}

impl LightSet {
    pub fn new(lights: Vec<PointLight>, volume: LightVolume) -> Result<Self> {
        if lights.len() > MAX_POINT_LIGHT_COUNT {
            return Err(RenderError::LightCapacity {
                requested: lights.len(),
                capacity: MAX_POINT_LIGHT_COUNT,
            });
        }
        Ok(Self { lights, volume })
    }

    /// `count` lights scattered uniformly through `volume` with bright
    /// random colours.
    pub fn random(count: usize, volume: LightVolume, rng: &mut impl Rng) -> Result<Self> {
        if count > MAX_POINT_LIGHT_COUNT {
            return Err(RenderError::LightCapacity {
                requested: count,
                capacity: MAX_POINT_LIGHT_COUNT,
            });
        }
        let lights = (0..count)
            .map(|_| {
                let pos = Vec3::new(
                    rng.gen_range(volume.min.x..=volume.max.x),
                    rng.gen_range(volume.min.y..=volume.max.y),
                    rng.gen_range(volume.min.z..=volume.max.z),
                );
                let color = loop {
                    let c = Vec3::new(rng.gen(), rng.gen(), rng.gen());
                    if c.length() >= MIN_COLOR_LENGTH {
                        break c;
                    }
                };
                PointLight::new(pos, LIGHT_RADIUS, color)
            })
            .collect();
        Ok(Self { lights, volume })
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn lights(&self) -> &[PointLight] {
        &self.lights
    }

    pub fn volume(&self) -> LightVolume {
        self.volume
    }

    pub fn animate(&mut self, dt: f32) {
        for light in &mut self.lights {
            light.pos = self
                .volume
                .rise(light.position(), LIGHT_RISE_SPEED, dt)
                .to_array();
        }
    }

    /// Count-prefixed buffer image, always `LIGHT_BUFFER_SIZE` bytes.
    pub fn to_gpu_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; LIGHT_BUFFER_SIZE];
        out[..4].copy_from_slice(&(self.lights.len() as i32).to_ne_bytes());
        let body: &[u8] = bytemuck::cast_slice(&self.lights);
        out[LIGHT_HEADER_SIZE..LIGHT_HEADER_SIZE + body.len()].copy_from_slice(body);
        out
    }
}

/// Screen tiles covering an extent, rounded up at the right and bottom edges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileGrid {
    pub x: u32,
    pub y: u32,
}

impl TileGrid {
    pub fn for_extent(extent: vk::Extent2D) -> Self {
        fn tiles(px: u32) -> u32 {
            if px == 0 {
                0
            } else {
                (px - 1) / TILE_SIZE + 1
            }
        }
        Self {
            x: tiles(extent.width),
            y: tiles(extent.height),
        }
    }

    pub fn count(&self) -> u32 {
        self.x * self.y
    }

    pub fn visibility_buffer_size(&self) -> vk::DeviceSize {
        // Vulkan rejects zero-sized buffers.
        (self.count() as vk::DeviceSize).max(1) * VISIBILITY_RECORD_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn tile_grid_rounds_up() {
        assert_eq!(TileGrid::for_extent(extent(800, 600)), TileGrid { x: 50, y: 38 });
        assert_eq!(TileGrid::for_extent(extent(801, 600)), TileGrid { x: 51, y: 38 });
        assert_eq!(TileGrid::for_extent(extent(16, 16)), TileGrid { x: 1, y: 1 });
        assert_eq!(TileGrid::for_extent(extent(17, 1)), TileGrid { x: 2, y: 1 });
    }

    #[test]
    fn visibility_buffer_scales_with_tiles() {
        assert_eq!(VISIBILITY_RECORD_SIZE, 256);
        let grid = TileGrid::for_extent(extent(800, 600));
        assert_eq!(grid.visibility_buffer_size(), 50 * 38 * 256);
    }

    #[test]
    fn light_record_is_std430_sized() {
        assert_eq!(std::mem::size_of::<PointLight>(), 32);
        assert_eq!(LIGHT_BUFFER_SIZE, 16 + 1000 * 32);
    }

    #[test]
    fn random_lights_stay_in_volume_with_bright_colours() {
        let mut rng = StdRng::seed_from_u64(7);
        let volume = LightVolume::default();
        let set = LightSet::random(200, volume, &mut rng).unwrap();
        assert_eq!(set.len(), 200);
        for l in set.lights() {
            assert!(volume.contains(l.position()));
            assert_eq!(l.radius, LIGHT_RADIUS);
            assert!(Vec3::from_array(l.intensity).length() >= MIN_COLOR_LENGTH);
        }
    }

    #[test]
    fn same_seed_same_lights() {
        let volume = LightVolume::default();
        let a = LightSet::random(16, volume, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = LightSet::random(16, volume, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a.lights(), b.lights());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = LightSet::random(MAX_POINT_LIGHT_COUNT + 1, LightVolume::default(), &mut rng).unwrap_err();
        assert!(matches!(err, RenderError::LightCapacity { requested: 1001, capacity: 1000 }));
        assert!(LightSet::random(MAX_POINT_LIGHT_COUNT, LightVolume::default(), &mut rng).is_ok());
    }

    #[test]
    fn animation_rises_and_wraps() {
        let volume = LightVolume::default();
        let mut set = LightSet::new(
            vec![
                PointLight::new(Vec3::new(0.0, 0.0, 0.0), LIGHT_RADIUS, Vec3::ONE),
                PointLight::new(Vec3::new(0.0, 19.0, 0.0), LIGHT_RADIUS, Vec3::ONE),
            ],
            volume,
        )
        .unwrap();
        set.animate(1.0);
        assert_eq!(set.lights()[0].pos[1], 3.0);
        assert!((set.lights()[1].pos[1] - (22.0 - volume.height())).abs() < 1e-5);
    }

    #[test]
    fn gpu_bytes_are_count_prefixed() {
        let set = LightSet::new(
            vec![PointLight::new(Vec3::new(1.0, 2.0, 3.0), 5.0, Vec3::new(0.5, 0.25, 1.0))],
            LightVolume::default(),
        )
        .unwrap();
        let bytes = set.to_gpu_bytes();
        assert_eq!(bytes.len(), LIGHT_BUFFER_SIZE);
        assert_eq!(i32::from_ne_bytes(bytes[..4].try_into().unwrap()), 1);
        let first: PointLight = bytemuck::pod_read_unaligned(&bytes[16..48]);
        assert_eq!(first.pos, [1.0, 2.0, 3.0]);
        assert_eq!(first.radius, 5.0);
        assert!(bytes[48..].iter().all(|&b| b == 0));
    }
}
