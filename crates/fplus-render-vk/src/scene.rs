// SPDX-License-Identifier: CEPL-1.0
//! Device-lifetime scene data: geometry, textures, samplers and the
//! camera/light buffers refreshed every frame.

use crate::config::RendererConfig;
use crate::device::DeviceContext;
use crate::error::{Result, VkResultExt};
use crate::lights::{LightSet, LIGHT_BUFFER_SIZE};
use crate::memory::{Allocator, DeviceArena, GpuBuffer, GpuImage, Sharing};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use fplus_math::{vulkan_perspective, Mat4, Vec3};
use fplus_render::{SceneAssets, Vertex};
use std::mem::{offset_of, size_of};

pub const FOV_Y_DEGREES: f32 = 45.0;
pub const Z_NEAR: f32 = 0.5;
pub const Z_FAR: f32 = 100.0;

/// Camera block shared by the vertex, fragment and culling stages.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraUbo {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub projview: [[f32; 4]; 4],
    pub cam_pos: [f32; 3],
    pub _pad: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ObjectUbo {
    pub model: [[f32; 4]; 4],
}

impl Default for ObjectUbo {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY.to_cols_array_2d(),
        }
    }
}

pub fn projection(extent: vk::Extent2D) -> Mat4 {
    let aspect = if extent.height == 0 {
        1.0
    } else {
        extent.width as f32 / extent.height as f32
    };
    vulkan_perspective(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR)
}

pub fn camera_ubo(view: Mat4, position: Vec3, extent: vk::Extent2D) -> CameraUbo {
    let proj = projection(extent);
    CameraUbo {
        view: view.to_cols_array_2d(),
        proj: proj.to_cols_array_2d(),
        projview: (proj * view).to_cols_array_2d(),
        cam_pos: position.to_array(),
        _pad: 0.0,
    }
}

pub fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

/// Locations 0..=3: position, colour, texture coordinate, normal.
pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 4] {
    let attr = |location, format, offset: usize| vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format,
        offset: offset as u32,
    };
    [
        attr(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, pos)),
        attr(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
        attr(2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, tex_coord)),
        attr(3, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
    ]
}

pub fn create_texture_sampler(device: &ash::Device, max_anisotropy: Option<f32>) -> Result<vk::Sampler> {
    let repeat = vk::SamplerAddressMode::REPEAT;
    let info = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: repeat,
        address_mode_v: repeat,
        address_mode_w: repeat,
        anisotropy_enable: max_anisotropy.is_some() as vk::Bool32,
        max_anisotropy: max_anisotropy.unwrap_or(1.0),
        compare_enable: vk::FALSE,
        compare_op: vk::CompareOp::ALWAYS,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        unnormalized_coordinates: vk::FALSE,
        ..Default::default()
    };
    unsafe { device.create_sampler(&info, None) }.op("vkCreateSampler")
}

/// Point sampling of the pre-pass depth; no filtering across tile edges.
pub fn create_depth_sampler(device: &ash::Device) -> Result<vk::Sampler> {
    let clamp = vk::SamplerAddressMode::CLAMP_TO_EDGE;
    let info = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::NEAREST,
        min_filter: vk::Filter::NEAREST,
        mipmap_mode: vk::SamplerMipmapMode::NEAREST,
        address_mode_u: clamp,
        address_mode_v: clamp,
        address_mode_w: clamp,
        max_anisotropy: 1.0,
        border_color: vk::BorderColor::FLOAT_OPAQUE_WHITE,
        ..Default::default()
    };
    unsafe { device.create_sampler(&info, None) }.op("vkCreateSampler")
}

pub struct SceneResources {
    pub vertex: GpuBuffer,
    pub index: GpuBuffer,
    pub index_count: u32,
    pub object: GpuBuffer,
    pub albedo: GpuImage,
    pub normal_map: GpuImage,
    pub texture_sampler: vk::Sampler,
    pub depth_sampler: vk::Sampler,
    /// Device-local, read by graphics and compute.
    pub camera: GpuBuffer,
    pub camera_staging: GpuBuffer,
    /// Device-local and exclusive; moves between queues every frame.
    pub lights: GpuBuffer,
    pub lights_staging: GpuBuffer,
}

impl SceneResources {
    pub fn upload(
        ctx: &DeviceContext,
        alloc: &Allocator,
        arena: &mut DeviceArena,
        scene: &SceneAssets,
        lights: &LightSet,
        config: &RendererConfig,
    ) -> Result<Self> {
        scene.mesh.validate()?;

        let vertex = alloc.create_buffer_with_data(
            arena,
            "vertex buffer",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&scene.mesh.vertices),
        )?;
        let index = alloc.create_buffer_with_data(
            arena,
            "index buffer",
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&scene.mesh.indices),
        )?;
        let object = alloc.create_buffer_with_data(
            arena,
            "object ubo",
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            bytemuck::bytes_of(&ObjectUbo::default()),
        )?;

        let albedo = alloc.upload_texture(arena, "albedo texture", &scene.albedo)?;
        let normal_map = alloc.upload_texture(arena, "normal map", &scene.normal_map)?;

        let anisotropy = ctx.sampler_anisotropy.then(|| {
            config
                .max_anisotropy
                .clamp(1.0, ctx.properties.limits.max_sampler_anisotropy)
        });
        let texture_sampler = create_texture_sampler(&ctx.device, anisotropy)?;
        arena.adopt("texture sampler", move |d| unsafe { d.destroy_sampler(texture_sampler, None) });
        let depth_sampler = create_depth_sampler(&ctx.device)?;
        arena.adopt("depth sampler", move |d| unsafe { d.destroy_sampler(depth_sampler, None) });

        let camera_size = size_of::<CameraUbo>() as vk::DeviceSize;
        let camera = alloc.create_buffer(
            arena,
            "camera buffer",
            camera_size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Sharing::between(ctx.families.graphics, ctx.families.compute),
        )?;
        let camera_staging = alloc.create_staging(arena, "camera staging", camera_size)?;

        let light_size = LIGHT_BUFFER_SIZE as vk::DeviceSize;
        let lights_gpu = alloc.create_buffer(
            arena,
            "light buffer",
            light_size,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Sharing::Exclusive,
        )?;
        let lights_staging = alloc.create_staging(arena, "light staging", light_size)?;
        alloc.stage_and_copy(&lights_staging, lights_gpu.buffer, &lights.to_gpu_bytes())?;

        tracing::debug!(
            "scene: {} vertices, {} indices, {} lights",
            scene.mesh.vertices.len(),
            scene.mesh.indices.len(),
            lights.len()
        );

        Ok(Self {
            vertex,
            index,
            index_count: scene.mesh.indices.len() as u32,
            object,
            albedo,
            normal_map,
            texture_sampler,
            depth_sampler,
            camera,
            camera_staging,
            lights: lights_gpu,
            lights_staging,
        })
    }

    /// Per-frame refresh through the persistent staging buffers.
    pub fn write_frame(&self, alloc: &Allocator, camera: &CameraUbo, lights: &LightSet) -> Result<()> {
        alloc.stage_and_copy(&self.camera_staging, self.camera.buffer, bytemuck::bytes_of(camera))?;
        alloc.stage_and_copy(&self.lights_staging, self.lights.buffer, &lights.to_gpu_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_blocks_have_std430_sizes() {
        assert_eq!(size_of::<CameraUbo>(), 208);
        assert_eq!(size_of::<ObjectUbo>(), 64);
    }

    #[test]
    fn vertex_layout_matches_the_struct() {
        let b = vertex_binding();
        assert_eq!(b.stride, 44);
        let offsets: Vec<u32> = vertex_attributes().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32]);
        let locations: Vec<u32> = vertex_attributes().iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3]);
    }

    #[test]
    fn camera_block_composes_projection_and_view() {
        let extent = vk::Extent2D { width: 800, height: 600 };
        let view = Mat4::look_at_rh(Vec3::new(0.0, 5.0, 20.0), Vec3::ZERO, Vec3::Y);
        let ubo = camera_ubo(view, Vec3::new(0.0, 5.0, 20.0), extent);
        let proj = Mat4::from_cols_array_2d(&ubo.proj);
        assert!(proj.y_axis.y < 0.0, "Y must be flipped for Vulkan clip space");
        let projview = Mat4::from_cols_array_2d(&ubo.projview);
        assert!(projview.abs_diff_eq(proj * view, 1e-5));
        assert_eq!(ubo.cam_pos, [0.0, 5.0, 20.0]);
    }

    #[test]
    fn zero_height_extent_does_not_divide_by_zero() {
        let p = projection(vk::Extent2D { width: 10, height: 0 });
        assert!(p.is_finite());
    }
}
