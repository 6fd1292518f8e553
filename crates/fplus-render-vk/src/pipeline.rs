// SPDX-License-Identifier: CEPL-1.0
//! Descriptor-set layouts, pipeline layouts, render passes and the three
//! pipelines of the forward-plus frame.

use crate::error::{RenderError, Result, VkResultExt};
use crate::lights::TileGrid;
use crate::memory::DeviceArena;
use crate::scene;
use crate::shaders::ShaderModules;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use fplus_render::DebugView;
use std::ffi::CStr;
use std::fs;
use std::path::{Path, PathBuf};

const ENTRY: &CStr = c"main";

/// Push-constant block of the forward fragment shader and the culling
/// compute shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PushConstants {
    pub viewport_size: [i32; 2],
    pub tile_nums: [i32; 2],
    pub debug_view_index: i32,
}

impl PushConstants {
    pub fn new(extent: vk::Extent2D, grid: TileGrid, view: DebugView) -> Self {
        Self {
            viewport_size: [extent.width as i32, extent.height as i32],
            tile_nums: [grid.x as i32, grid.y as i32],
            debug_view_index: view.index() as i32,
        }
    }
}

/// Descriptor sets by role. Shaders hard-code the set number each role is
/// bound at, per pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SetSlot {
    /// Model transform, albedo and normal map.
    Object,
    Camera,
    /// Visibility records and the light list.
    LightCulling,
    /// Pre-pass depth as a sampled image.
    Intermediate,
}

pub const FORWARD_SETS: [SetSlot; 4] = [
    SetSlot::Object,
    SetSlot::Camera,
    SetSlot::LightCulling,
    SetSlot::Intermediate,
];
pub const DEPTH_SETS: [SetSlot; 2] = [SetSlot::Object, SetSlot::Camera];
pub const COMPUTE_SETS: [SetSlot; 3] = [SetSlot::LightCulling, SetSlot::Camera, SetSlot::Intermediate];

/// Set number of `slot` in a pipeline layout built from `order`.
pub fn set_index(order: &[SetSlot], slot: SetSlot) -> Option<u32> {
    order.iter().position(|&s| s == slot).map(|i| i as u32)
}

fn binding(
    binding: u32,
    descriptor_type: vk::DescriptorType,
    stage_flags: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding {
        binding,
        descriptor_type,
        descriptor_count: 1,
        stage_flags,
        ..Default::default()
    }
}

impl SetSlot {
    pub fn bindings(self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        use vk::DescriptorType as T;
        use vk::ShaderStageFlags as S;
        match self {
            SetSlot::Object => vec![
                binding(0, T::UNIFORM_BUFFER, S::VERTEX | S::FRAGMENT),
                binding(1, T::COMBINED_IMAGE_SAMPLER, S::FRAGMENT),
                binding(2, T::COMBINED_IMAGE_SAMPLER, S::FRAGMENT),
            ],
            SetSlot::Camera => vec![binding(0, T::STORAGE_BUFFER, S::VERTEX | S::FRAGMENT | S::COMPUTE)],
            SetSlot::LightCulling => vec![
                binding(0, T::STORAGE_BUFFER, S::COMPUTE | S::FRAGMENT),
                binding(1, T::STORAGE_BUFFER, S::COMPUTE | S::FRAGMENT),
            ],
            SetSlot::Intermediate => {
                vec![binding(0, T::COMBINED_IMAGE_SAMPLER, S::COMPUTE | S::FRAGMENT)]
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SetLayouts {
    pub object: vk::DescriptorSetLayout,
    pub camera: vk::DescriptorSetLayout,
    pub light_culling: vk::DescriptorSetLayout,
    pub intermediate: vk::DescriptorSetLayout,
}

impl SetLayouts {
    pub fn create(device: &ash::Device, arena: &mut DeviceArena) -> Result<Self> {
        let mut make = |slot: SetSlot| -> Result<vk::DescriptorSetLayout> {
            let bindings = slot.bindings();
            let ci = vk::DescriptorSetLayoutCreateInfo {
                s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
                binding_count: bindings.len() as u32,
                p_bindings: bindings.as_ptr(),
                ..Default::default()
            };
            let layout = unsafe { device.create_descriptor_set_layout(&ci, None) }
                .op("vkCreateDescriptorSetLayout")?;
            arena.adopt("descriptor set layout", move |d| unsafe {
                d.destroy_descriptor_set_layout(layout, None)
            });
            Ok(layout)
        };
        Ok(Self {
            object: make(SetSlot::Object)?,
            camera: make(SetSlot::Camera)?,
            light_culling: make(SetSlot::LightCulling)?,
            intermediate: make(SetSlot::Intermediate)?,
        })
    }

    pub fn get(&self, slot: SetSlot) -> vk::DescriptorSetLayout {
        match slot {
            SetSlot::Object => self.object,
            SetSlot::Camera => self.camera,
            SetSlot::LightCulling => self.light_culling,
            SetSlot::Intermediate => self.intermediate,
        }
    }

    pub fn ordered(&self, order: &[SetSlot]) -> Vec<vk::DescriptorSetLayout> {
        order.iter().map(|&s| self.get(s)).collect()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PipelineLayouts {
    pub forward: vk::PipelineLayout,
    pub depth: vk::PipelineLayout,
    pub compute: vk::PipelineLayout,
}

fn create_pipeline_layout(
    device: &ash::Device,
    arena: &mut DeviceArena,
    set_layouts: &[vk::DescriptorSetLayout],
    push_stage: Option<vk::ShaderStageFlags>,
) -> Result<vk::PipelineLayout> {
    let range = push_stage.map(|stage_flags| vk::PushConstantRange {
        stage_flags,
        offset: 0,
        size: std::mem::size_of::<PushConstants>() as u32,
    });
    let ranges = range.as_slice();
    let ci = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: set_layouts.len() as u32,
        p_set_layouts: set_layouts.as_ptr(),
        push_constant_range_count: ranges.len() as u32,
        p_push_constant_ranges: ranges.as_ptr(),
        ..Default::default()
    };
    let layout = unsafe { device.create_pipeline_layout(&ci, None) }.op("vkCreatePipelineLayout")?;
    arena.adopt("pipeline layout", move |d| unsafe { d.destroy_pipeline_layout(layout, None) });
    Ok(layout)
}

impl PipelineLayouts {
    pub fn create(device: &ash::Device, arena: &mut DeviceArena, sets: &SetLayouts) -> Result<Self> {
        Ok(Self {
            forward: create_pipeline_layout(
                device,
                arena,
                &sets.ordered(&FORWARD_SETS),
                Some(vk::ShaderStageFlags::FRAGMENT),
            )?,
            depth: create_pipeline_layout(device, arena, &sets.ordered(&DEPTH_SETS), None)?,
            compute: create_pipeline_layout(
                device,
                arena,
                &sets.ordered(&COMPUTE_SETS),
                Some(vk::ShaderStageFlags::COMPUTE),
            )?,
        })
    }
}

// ---- render passes ---------------------------------------------------------

/// Depth-only pass. The attachment enters in the attachment layout and leaves
/// readable by the culling and forward shaders.
pub fn create_depth_render_pass(
    device: &ash::Device,
    arena: &mut DeviceArena,
    depth_format: vk::Format,
) -> Result<vk::RenderPass> {
    let attachment = vk::AttachmentDescription {
        format: depth_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ..Default::default()
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    let depth_tests =
        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let depth_rw = vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    let readers = vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER;
    let dependencies = [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: readers,
            dst_stage_mask: depth_tests,
            src_access_mask: vk::AccessFlags::SHADER_READ,
            dst_access_mask: depth_rw,
            ..Default::default()
        },
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: depth_tests,
            dst_stage_mask: readers,
            src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::SHADER_READ,
            ..Default::default()
        },
    ];
    let ci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &attachment,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: dependencies.len() as u32,
        p_dependencies: dependencies.as_ptr(),
        ..Default::default()
    };
    let pass = unsafe { device.create_render_pass(&ci, None) }.op("vkCreateRenderPass")?;
    arena.adopt("depth render pass", move |d| unsafe { d.destroy_render_pass(pass, None) });
    Ok(pass)
}

/// Colour + depth pass that ends ready for presentation.
pub fn create_forward_render_pass(
    device: &ash::Device,
    arena: &mut DeviceArena,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ];
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        dst_stage_mask: stages,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let ci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    let pass = unsafe { device.create_render_pass(&ci, None) }.op("vkCreateRenderPass")?;
    arena.adopt("forward render pass", move |d| unsafe { d.destroy_render_pass(pass, None) });
    Ok(pass)
}

// ---- pipelines -------------------------------------------------------------

fn stage(stage: vk::ShaderStageFlags, module: vk::ShaderModule) -> vk::PipelineShaderStageCreateInfo<'static> {
    vk::PipelineShaderStageCreateInfo {
        s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
        stage,
        module,
        p_name: ENTRY.as_ptr(),
        ..Default::default()
    }
}

struct GraphicsDesc<'a> {
    label: &'static str,
    stages: &'a [vk::PipelineShaderStageCreateInfo<'a>],
    attributes: &'a [vk::VertexInputAttributeDescription],
    /// Alpha-blended colour target; none for depth-only.
    color: bool,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
}

fn create_graphics_pipeline(
    device: &ash::Device,
    arena: &mut DeviceArena,
    cache: vk::PipelineCache,
    desc: GraphicsDesc<'_>,
) -> Result<vk::Pipeline> {
    let vb = scene::vertex_binding();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &vb,
        vertex_attribute_description_count: desc.attributes.len() as u32,
        p_vertex_attribute_descriptions: desc.attributes.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    // Baked in; pipelines are rebuilt with the swapchain.
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: desc.extent.width as f32,
        height: desc.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: desc.extent,
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::LESS,
        ..Default::default()
    };
    let blend_attachment = vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ZERO,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: desc.color as u32,
        p_attachments: &blend_attachment,
        ..Default::default()
    };

    let info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: desc.stages.len() as u32,
        p_stages: desc.stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        layout: desc.layout,
        render_pass: desc.render_pass,
        subpass: 0,
        ..Default::default()
    };
    let pipelines = unsafe {
        device.create_graphics_pipelines(cache, std::slice::from_ref(&info), None)
    }
    .map_err(|(_, result)| RenderError::Vulkan {
        op: "vkCreateGraphicsPipelines",
        result,
    })?;
    let pipeline = pipelines[0];
    arena.adopt(desc.label, move |d| unsafe { d.destroy_pipeline(pipeline, None) });
    Ok(pipeline)
}

#[derive(Clone, Copy, Debug)]
pub struct GraphicsPipelines {
    pub forward: vk::Pipeline,
    pub depth: vk::Pipeline,
}

impl GraphicsPipelines {
    /// Both graphics pipelines for one swapchain extent.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        device: &ash::Device,
        arena: &mut DeviceArena,
        cache: vk::PipelineCache,
        layouts: &PipelineLayouts,
        modules: &ShaderModules,
        forward_pass: vk::RenderPass,
        depth_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let all_attributes = scene::vertex_attributes();
        let forward_stages = [
            stage(vk::ShaderStageFlags::VERTEX, modules.forward_vert),
            stage(vk::ShaderStageFlags::FRAGMENT, modules.forward_frag),
        ];
        let forward = create_graphics_pipeline(
            device,
            arena,
            cache,
            GraphicsDesc {
                label: "forward pipeline",
                stages: &forward_stages,
                attributes: &all_attributes,
                color: true,
                layout: layouts.forward,
                render_pass: forward_pass,
                extent,
            },
        )?;

        // Position only; the depth pass has no fragment stage.
        let depth_stages = [stage(vk::ShaderStageFlags::VERTEX, modules.depth_vert)];
        let depth = create_graphics_pipeline(
            device,
            arena,
            cache,
            GraphicsDesc {
                label: "depth pipeline",
                stages: &depth_stages,
                attributes: &all_attributes[..1],
                color: false,
                layout: layouts.depth,
                render_pass: depth_pass,
                extent,
            },
        )?;
        Ok(Self { forward, depth })
    }
}

pub fn create_compute_pipeline(
    device: &ash::Device,
    arena: &mut DeviceArena,
    cache: vk::PipelineCache,
    layout: vk::PipelineLayout,
    module: vk::ShaderModule,
) -> Result<vk::Pipeline> {
    let info = vk::ComputePipelineCreateInfo {
        s_type: vk::StructureType::COMPUTE_PIPELINE_CREATE_INFO,
        stage: stage(vk::ShaderStageFlags::COMPUTE, module),
        layout,
        ..Default::default()
    };
    let pipelines = unsafe { device.create_compute_pipelines(cache, std::slice::from_ref(&info), None) }
        .map_err(|(_, result)| RenderError::Vulkan {
            op: "vkCreateComputePipelines",
            result,
        })?;
    let pipeline = pipelines[0];
    arena.adopt("light culling pipeline", move |d| unsafe { d.destroy_pipeline(pipeline, None) });
    Ok(pipeline)
}

// ---- pipeline cache --------------------------------------------------------

fn hex_bytes(b: &[u8]) -> String {
    let mut s = String::with_capacity(b.len() * 2);
    for x in b {
        use std::fmt::Write as _;
        let _ = write!(&mut s, "{:02x}", x);
    }
    s
}

/// Per-adapter cache file in the working directory.
pub fn pipeline_cache_path(props: &vk::PhysicalDeviceProperties) -> PathBuf {
    PathBuf::from(format!(
        "fplus_pipeline_cache_{:04x}_{:04x}_{}.bin",
        props.vendor_id,
        props.device_id,
        hex_bytes(&props.pipeline_cache_uuid)
    ))
}

fn create_cache(device: &ash::Device, initial: &[u8]) -> Result<vk::PipelineCache> {
    let ci = vk::PipelineCacheCreateInfo {
        s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
        initial_data_size: initial.len(),
        p_initial_data: if initial.is_empty() {
            std::ptr::null()
        } else {
            initial.as_ptr().cast()
        },
        ..Default::default()
    };
    unsafe { device.create_pipeline_cache(&ci, None) }.op("vkCreatePipelineCache")
}

/// Seeds the cache from `path` when it exists. A stale or corrupt file
/// just means a cold cache.
pub fn load_pipeline_cache(device: &ash::Device, path: Option<&Path>) -> Result<vk::PipelineCache> {
    let seed = path.and_then(|p| fs::read(p).ok()).unwrap_or_default();
    if !seed.is_empty() {
        match create_cache(device, &seed) {
            Ok(cache) => {
                tracing::debug!("pipeline cache: loaded {} bytes", seed.len());
                return Ok(cache);
            }
            Err(e) => tracing::debug!("pipeline cache: ignoring saved data ({e})"),
        }
    }
    create_cache(device, &[])
}

pub fn save_pipeline_cache(device: &ash::Device, cache: vk::PipelineCache, path: &Path) {
    match unsafe { device.get_pipeline_cache_data(cache) } {
        Ok(bytes) => {
            if let Err(e) = fs::write(path, &bytes) {
                tracing::debug!("pipeline cache: write {} failed: {e}", path.display());
            }
        }
        Err(e) => tracing::debug!("pipeline cache: no data ({e})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_are_twenty_bytes() {
        assert_eq!(std::mem::size_of::<PushConstants>(), 20);
        let pc = PushConstants::new(
            vk::Extent2D { width: 800, height: 600 },
            TileGrid { x: 50, y: 38 },
            DebugView::Heatmap,
        );
        assert_eq!(pc.viewport_size, [800, 600]);
        assert_eq!(pc.tile_nums, [50, 38]);
        assert_eq!(pc.debug_view_index, 2);
    }

    #[test]
    fn set_order_matches_shader_expectations() {
        assert_eq!(set_index(&FORWARD_SETS, SetSlot::Object), Some(0));
        assert_eq!(set_index(&FORWARD_SETS, SetSlot::Camera), Some(1));
        assert_eq!(set_index(&FORWARD_SETS, SetSlot::LightCulling), Some(2));
        assert_eq!(set_index(&FORWARD_SETS, SetSlot::Intermediate), Some(3));

        assert_eq!(set_index(&COMPUTE_SETS, SetSlot::LightCulling), Some(0));
        assert_eq!(set_index(&COMPUTE_SETS, SetSlot::Camera), Some(1));
        assert_eq!(set_index(&COMPUTE_SETS, SetSlot::Intermediate), Some(2));
        assert_eq!(set_index(&COMPUTE_SETS, SetSlot::Object), None);

        assert_eq!(set_index(&DEPTH_SETS, SetSlot::Camera), Some(1));
    }

    #[test]
    fn camera_is_shared_with_compute() {
        let camera = SetSlot::Camera.bindings();
        assert_eq!(camera[0].descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert!(camera[0].stage_flags.contains(vk::ShaderStageFlags::COMPUTE));

        let culling = SetSlot::LightCulling.bindings();
        assert_eq!(culling.len(), 2);
        for b in &culling {
            assert_eq!(b.descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
            assert!(b.stage_flags.contains(vk::ShaderStageFlags::FRAGMENT));
        }
    }

    #[test]
    fn slots_used_by_pipelines_have_their_bindings() {
        // Every binding number is unique within its set.
        for slot in FORWARD_SETS {
            let mut numbers: Vec<u32> = slot.bindings().iter().map(|b| b.binding).collect();
            numbers.dedup();
            assert_eq!(numbers.len(), slot.bindings().len());
        }
    }

    #[test]
    fn cache_file_names_the_adapter() {
        let mut props = vk::PhysicalDeviceProperties {
            vendor_id: 0x10de,
            device_id: 0x2684,
            ..Default::default()
        };
        props.pipeline_cache_uuid[0] = 0xab;
        let name = pipeline_cache_path(&props);
        let name = name.to_string_lossy();
        assert!(name.starts_with("fplus_pipeline_cache_10de_2684_ab00"));
        assert!(name.ends_with(".bin"));
    }
}
