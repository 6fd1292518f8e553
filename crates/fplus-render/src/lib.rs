// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use fplus_math::{Mat4, Vec3};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::{fs, io, path::Path, path::PathBuf};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Minimised windows report a zero extent; nothing can be presented then.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What the forward fragment shader writes out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DebugView {
    #[default]
    Shaded,
    HeatmapShaded,
    Heatmap,
    Depth,
    Normals,
}

impl DebugView {
    pub const COUNT: u32 = 5;

    /// Any index is accepted; it wraps modulo [`DebugView::COUNT`].
    pub fn from_index(index: u32) -> Self {
        match index % Self::COUNT {
            0 => DebugView::Shaded,
            1 => DebugView::HeatmapShaded,
            2 => DebugView::Heatmap,
            3 => DebugView::Depth,
            _ => DebugView::Normals,
        }
    }

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn next(self) -> Self {
        Self::from_index(self.index() + 1)
    }

    pub fn name(self) -> &'static str {
        match self {
            DebugView::Shaded => "shaded",
            DebugView::HeatmapShaded => "heatmap+shaded",
            DebugView::Heatmap => "heatmap",
            DebugView::Depth => "depth",
            DebugView::Normals => "normals",
        }
    }
}

/// Interleaved vertex; binding 0, locations 0..=3 in field order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
    pub normal: [f32; 3],
}

#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn validate(&self) -> Result<(), AssetError> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(AssetError::EmptyMesh);
        }
        if self.indices.len() % 3 != 0 {
            return Err(AssetError::PartialTriangle(self.indices.len()));
        }
        let n = self.vertices.len();
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= n) {
            return Err(AssetError::IndexOutOfRange {
                index: bad,
                vertex_count: n,
            });
        }
        Ok(())
    }
}

/// Decoded RGBA8 pixels, rows tightly packed.
#[derive(Clone, Debug)]
pub struct PixelImage {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl PixelImage {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, AssetError> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(AssetError::PixelSize {
                width,
                height,
                len: rgba.len(),
            });
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self, AssetError> {
        Self::new(width, height, rgba.repeat(width as usize * height as usize))
    }

    pub fn width(&self) -> u32 {
        self.width
    }
    pub fn height(&self) -> u32 {
        self.height
    }
    pub fn bytes(&self) -> &[u8] {
        &self.rgba
    }
    pub fn row(&self, y: u32) -> &[u8] {
        let pitch = self.width as usize * 4;
        let start = y as usize * pitch;
        &self.rgba[start..start + pitch]
    }
}

/// SPIR-V binaries, kept opaque until module creation.
#[derive(Clone, Debug, Default)]
pub struct ShaderBlobs {
    pub forward_vert: Vec<u8>,
    pub forward_frag: Vec<u8>,
    pub depth_vert: Vec<u8>,
    pub light_culling_comp: Vec<u8>,
}

impl ShaderBlobs {
    pub const FILE_NAMES: [&'static str; 4] = [
        "forwardplus_vert.spv",
        "forwardplus_frag.spv",
        "depth_vert.spv",
        "light_culling_comp.spv",
    ];

    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, AssetError> {
        let dir = dir.as_ref();
        let read = |name: &str| {
            let path = dir.join(name);
            fs::read(&path).map_err(|source| AssetError::Read { path, source })
        };
        Ok(Self {
            forward_vert: read(Self::FILE_NAMES[0])?,
            forward_frag: read(Self::FILE_NAMES[1])?,
            depth_vert: read(Self::FILE_NAMES[2])?,
            light_culling_comp: read(Self::FILE_NAMES[3])?,
        })
    }
}

/// The single hardcoded scene: one mesh, its albedo and its normal map.
#[derive(Clone, Debug)]
pub struct SceneAssets {
    pub mesh: MeshData,
    pub albedo: PixelImage,
    pub normal_map: PixelImage,
}

#[derive(Clone, Debug)]
pub struct RendererDesc {
    pub size: RenderSize,
    pub scene: SceneAssets,
    pub shaders: ShaderBlobs,
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("pixel buffer of {len} bytes does not match {width}x{height} RGBA8")]
    PixelSize { width: u32, height: u32, len: usize },
    #[error("mesh has no vertices or no indices")]
    EmptyMesh,
    #[error("index count {0} is not a multiple of 3")]
    PartialTriangle(usize),
    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        desc: RendererDesc,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn set_camera(&mut self, view: Mat4, position: Vec3);
    fn request_frame(&mut self, delta_time: f32) -> Result<()>;
    /// Index wraps modulo 5; a change rebuilds the pipelines.
    fn set_debug_view(&mut self, index: u32) -> Result<()>;
    fn shutdown(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, _rgba: [f32; 4]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_view_wraps_modulo_five() {
        assert_eq!(DebugView::from_index(5), DebugView::from_index(0));
        assert_eq!(DebugView::from_index(7), DebugView::Heatmap);
        assert_eq!(DebugView::from_index(u32::MAX), DebugView::from_index(u32::MAX % 5));
        assert_eq!(DebugView::Normals.next(), DebugView::Shaded);
    }

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 11 * 4);
    }

    #[test]
    fn pixel_image_rejects_wrong_length() {
        assert!(PixelImage::new(2, 2, vec![0; 15]).is_err());
        let img = PixelImage::solid(2, 3, [1, 2, 3, 4]).unwrap();
        assert_eq!(img.row(2), &[1, 2, 3, 4, 1, 2, 3, 4]);
    }

    #[test]
    fn mesh_validation_catches_bad_indices() {
        let mesh = MeshData {
            vertices: vec![Vertex::default(); 3],
            indices: vec![0, 1, 3],
        };
        assert!(matches!(
            mesh.validate(),
            Err(AssetError::IndexOutOfRange { index: 3, .. })
        ));
        let partial = MeshData {
            vertices: vec![Vertex::default(); 3],
            indices: vec![0, 1],
        };
        assert!(matches!(partial.validate(), Err(AssetError::PartialTriangle(2))));
    }

    #[test]
    fn missing_shader_dir_names_the_file() {
        let err = ShaderBlobs::load_dir("no/such/dir").unwrap_err();
        assert!(err.to_string().contains("forwardplus_vert.spv"));
    }
}
