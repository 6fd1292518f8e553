// SPDX-License-Identifier: CEPL-1.0
//! The demo scene: a subdivided floor with rows of pillars on it.

use fplus_math::Vec3;
use fplus_render::{AssetError, MeshData, PixelImage, SceneAssets, Vertex};

const FLOOR_HALF_X: f32 = 20.0;
const FLOOR_HALF_Z: f32 = 10.0;
const FLOOR_CELLS: u32 = 16;
const PILLAR_ROWS: [f32; 2] = [-4.0, 4.0];
const PILLAR_COUNT: u32 = 7;
const PILLAR_HALF_WIDTH: f32 = 0.6;
const PILLAR_HEIGHT: f32 = 8.0;
// Texture repeats per world unit.
const UV_SCALE: f32 = 0.25;

const CHECKER_SIZE: u32 = 256;
const CHECKER_CELLS: u32 = 8;
const CHECKER_LIGHT: [u8; 4] = [200, 200, 200, 255];
const CHECKER_DARK: [u8; 4] = [90, 90, 90, 255];
/// Tangent-space +Z.
const FLAT_NORMAL: [u8; 4] = [128, 128, 255, 255];

struct MeshBuilder {
    mesh: MeshData,
}

impl MeshBuilder {
    fn new() -> Self {
        Self {
            mesh: MeshData::default(),
        }
    }

    /// Corners counter-clockwise seen from the side `normal` points to.
    fn quad(&mut self, corners: [Vec3; 4], normal: Vec3, uvs: [[f32; 2]; 4], color: Vec3) {
        let base = self.mesh.vertices.len() as u32;
        for (pos, uv) in corners.iter().zip(uvs) {
            self.mesh.vertices.push(Vertex {
                pos: pos.to_array(),
                color: color.to_array(),
                tex_coord: uv,
                normal: normal.to_array(),
            });
        }
        self.mesh
            .indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    fn floor(&mut self) {
        let step_x = 2.0 * FLOOR_HALF_X / FLOOR_CELLS as f32;
        let step_z = 2.0 * FLOOR_HALF_Z / FLOOR_CELLS as f32;
        for i in 0..FLOOR_CELLS {
            for j in 0..FLOOR_CELLS {
                let x0 = -FLOOR_HALF_X + i as f32 * step_x;
                let z0 = -FLOOR_HALF_Z + j as f32 * step_z;
                let (x1, z1) = (x0 + step_x, z0 + step_z);
                let uv = |x: f32, z: f32| [x * UV_SCALE, z * UV_SCALE];
                self.quad(
                    [
                        Vec3::new(x0, 0.0, z0),
                        Vec3::new(x0, 0.0, z1),
                        Vec3::new(x1, 0.0, z1),
                        Vec3::new(x1, 0.0, z0),
                    ],
                    Vec3::Y,
                    [uv(x0, z0), uv(x0, z1), uv(x1, z1), uv(x1, z0)],
                    Vec3::ONE,
                );
            }
        }
    }

    /// An open-bottomed box standing on the floor.
    fn pillar(&mut self, centre: Vec3, color: Vec3) {
        let (w, h) = (PILLAR_HALF_WIDTH, PILLAR_HEIGHT);
        let c = |dx: f32, y: f32, dz: f32| centre + Vec3::new(dx, y, dz);
        let side_uv = [[0.0, h * UV_SCALE], [0.5, h * UV_SCALE], [0.5, 0.0], [0.0, 0.0]];
        self.quad([c(-w, 0.0, w), c(w, 0.0, w), c(w, h, w), c(-w, h, w)], Vec3::Z, side_uv, color);
        self.quad([c(w, 0.0, -w), c(-w, 0.0, -w), c(-w, h, -w), c(w, h, -w)], -Vec3::Z, side_uv, color);
        self.quad([c(w, 0.0, w), c(w, 0.0, -w), c(w, h, -w), c(w, h, w)], Vec3::X, side_uv, color);
        self.quad([c(-w, 0.0, -w), c(-w, 0.0, w), c(-w, h, w), c(-w, h, -w)], -Vec3::X, side_uv, color);
        self.quad(
            [c(-w, h, w), c(w, h, w), c(w, h, -w), c(-w, h, -w)],
            Vec3::Y,
            [[0.0, 0.0], [0.5, 0.0], [0.5, 0.5], [0.0, 0.5]],
            color,
        );
    }
}

pub fn build_mesh() -> MeshData {
    let mut b = MeshBuilder::new();
    b.floor();
    let span = 2.0 * (FLOOR_HALF_X - 3.0);
    for (row, &z) in PILLAR_ROWS.iter().enumerate() {
        let tint = if row == 0 {
            Vec3::new(0.9, 0.85, 0.8)
        } else {
            Vec3::new(0.8, 0.85, 0.9)
        };
        for k in 0..PILLAR_COUNT {
            let x = -span / 2.0 + span * k as f32 / (PILLAR_COUNT - 1) as f32;
            b.pillar(Vec3::new(x, 0.0, z), tint);
        }
    }
    b.mesh
}

pub fn checkerboard(size: u32, cells: u32) -> Result<PixelImage, AssetError> {
    let cell = (size / cells.max(1)).max(1);
    let mut rgba = Vec::with_capacity(size as usize * size as usize * 4);
    for y in 0..size {
        for x in 0..size {
            let light = (x / cell + y / cell) % 2 == 0;
            rgba.extend_from_slice(if light { &CHECKER_LIGHT } else { &CHECKER_DARK });
        }
    }
    PixelImage::new(size, size, rgba)
}

pub fn build_scene() -> Result<SceneAssets, AssetError> {
    let mesh = build_mesh();
    mesh.validate()?;
    Ok(SceneAssets {
        mesh,
        albedo: checkerboard(CHECKER_SIZE, CHECKER_CELLS)?,
        normal_map: PixelImage::solid(4, 4, FLAT_NORMAL)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_mesh_is_well_formed() {
        let scene = build_scene().unwrap();
        let quads = FLOOR_CELLS * FLOOR_CELLS + PILLAR_ROWS.len() as u32 * PILLAR_COUNT * 5;
        assert_eq!(scene.mesh.vertices.len() as u32, quads * 4);
        assert_eq!(scene.mesh.indices.len() as u32, quads * 6);
    }

    #[test]
    fn quad_winding_matches_its_normal() {
        let mesh = build_mesh();
        for tri in mesh.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(mesh.vertices[i as usize].pos));
            let n = Vec3::from(mesh.vertices[tri[0] as usize].normal);
            assert!((b - a).cross(c - a).dot(n) > 0.0);
        }
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let img = checkerboard(16, 4).unwrap();
        assert_eq!(&img.row(0)[..4], &CHECKER_LIGHT);
        assert_eq!(&img.row(0)[4 * 4..4 * 4 + 4], &CHECKER_DARK);
        assert_eq!(&img.row(4)[..4], &CHECKER_DARK);
        assert_eq!(&img.row(4)[4 * 4..4 * 4 + 4], &CHECKER_LIGHT);
    }
}
