// SPDX-License-Identifier: CEPL-1.0
//! Command recording for the depth pre-pass, light culling and forward pass.
//!
//! Buffers are recorded once per swapchain build and resubmitted every frame.

use crate::barrier::{self, HandoffPlan, HandoffSite, SharedBuffer};
use crate::descriptors::DescriptorSets;
use crate::error::{Result, VkResultExt};
use crate::lights::TileGrid;
use crate::memory::{DeviceArena, GpuImage};
use crate::pipeline::{GraphicsPipelines, PipelineLayouts, PushConstants, COMPUTE_SETS, DEPTH_SETS, FORWARD_SETS};
use ash::vk;

pub fn allocate_command_buffers(
    device: &ash::Device,
    arena: &mut DeviceArena,
    pool: vk::CommandPool,
    count: u32,
    label: &'static str,
) -> Result<Vec<vk::CommandBuffer>> {
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: count,
        ..Default::default()
    };
    let buffers = unsafe { device.allocate_command_buffers(&ai) }.op("vkAllocateCommandBuffers")?;
    let owned = buffers.clone();
    arena.adopt(label, move |d| unsafe { d.free_command_buffers(pool, &owned) });
    Ok(buffers)
}

/// Everything the three passes reference, for one swapchain build.
pub struct FrameTargets<'a> {
    pub extent: vk::Extent2D,
    pub tiles: TileGrid,
    pub depth_pass: vk::RenderPass,
    pub depth_framebuffer: vk::Framebuffer,
    pub forward_pass: vk::RenderPass,
    pub pipelines: GraphicsPipelines,
    pub compute_pipeline: vk::Pipeline,
    pub layouts: PipelineLayouts,
    pub sets: DescriptorSets,
    pub vertex: vk::Buffer,
    pub index: vk::Buffer,
    pub index_count: u32,
    pub prepass_depth: GpuImage,
    pub lights: vk::Buffer,
    pub visibility: vk::Buffer,
    pub push: PushConstants,
    pub clear_color: [f32; 4],
    pub handoffs: &'a HandoffPlan,
}

impl FrameTargets<'_> {
    fn shared(&self, buffer: SharedBuffer) -> vk::Buffer {
        match buffer {
            SharedBuffer::Lights => self.lights,
            SharedBuffer::Visibility => self.visibility,
        }
    }

    fn full_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }
}

fn begin(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::SIMULTANEOUS_USE,
        ..Default::default()
    };
    unsafe { device.begin_command_buffer(cmd, &bi) }.op("vkBeginCommandBuffer")
}

fn end(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    unsafe { device.end_command_buffer(cmd) }.op("vkEndCommandBuffer")
}

const DEPTH_CLEAR: vk::ClearValue = vk::ClearValue {
    depth_stencil: vk::ClearDepthStencilValue {
        depth: 1.0,
        stencil: 0,
    },
};

unsafe fn draw_mesh(device: &ash::Device, cmd: vk::CommandBuffer, t: &FrameTargets<'_>) {
    device.cmd_bind_vertex_buffers(cmd, 0, &[t.vertex], &[0]);
    device.cmd_bind_index_buffer(cmd, t.index, 0, vk::IndexType::UINT32);
    device.cmd_draw_indexed(cmd, t.index_count, 1, 0, 0, 0);
}

/// Depth-only draw into the pre-pass image, then the graphics-side release
/// of the shared buffers.
pub fn record_depth(device: &ash::Device, cmd: vk::CommandBuffer, t: &FrameTargets<'_>) -> Result<()> {
    begin(device, cmd)?;
    let rp = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass: t.depth_pass,
        framebuffer: t.depth_framebuffer,
        render_area: t.full_area(),
        clear_value_count: 1,
        p_clear_values: &DEPTH_CLEAR,
        ..Default::default()
    };
    let sets = t.sets.ordered(&DEPTH_SETS);
    unsafe {
        device.cmd_begin_render_pass(cmd, &rp, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, t.pipelines.depth);
        device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, t.layouts.depth, 0, &sets, &[]);
        draw_mesh(device, cmd, t);
        device.cmd_end_render_pass(cmd);
    }
    t.handoffs.record(device, cmd, HandoffSite::DepthTail, |b| t.shared(b));
    end(device, cmd)
}

/// One workgroup per tile, bracketed by the compute-side acquire and release.
pub fn record_culling(device: &ash::Device, cmd: vk::CommandBuffer, t: &FrameTargets<'_>) -> Result<()> {
    begin(device, cmd)?;
    t.handoffs.record(device, cmd, HandoffSite::CullingHead, |b| t.shared(b));
    let sets = t.sets.ordered(&COMPUTE_SETS);
    unsafe {
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, t.compute_pipeline);
        device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::COMPUTE, t.layouts.compute, 0, &sets, &[]);
        device.cmd_push_constants(
            cmd,
            t.layouts.compute,
            vk::ShaderStageFlags::COMPUTE,
            0,
            bytemuck::bytes_of(&t.push),
        );
        device.cmd_dispatch(cmd, t.tiles.x, t.tiles.y, 1);
    }
    t.handoffs.record(device, cmd, HandoffSite::CullingTail, |b| t.shared(b));
    end(device, cmd)
}

/// Shaded draw into one swapchain framebuffer. Ends by handing the pre-pass
/// depth back to the attachment layout for the next frame.
pub fn record_forward(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    framebuffer: vk::Framebuffer,
    t: &FrameTargets<'_>,
) -> Result<()> {
    begin(device, cmd)?;
    t.handoffs.record(device, cmd, HandoffSite::ForwardHead, |b| t.shared(b));
    let clears = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: t.clear_color,
            },
        },
        DEPTH_CLEAR,
    ];
    let rp = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass: t.forward_pass,
        framebuffer,
        render_area: t.full_area(),
        clear_value_count: clears.len() as u32,
        p_clear_values: clears.as_ptr(),
        ..Default::default()
    };
    let sets = t.sets.ordered(&FORWARD_SETS);
    unsafe {
        device.cmd_begin_render_pass(cmd, &rp, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, t.pipelines.forward);
        device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, t.layouts.forward, 0, &sets, &[]);
        device.cmd_push_constants(
            cmd,
            t.layouts.forward,
            vk::ShaderStageFlags::FRAGMENT,
            0,
            bytemuck::bytes_of(&t.push),
        );
        draw_mesh(device, cmd, t);
        device.cmd_end_render_pass(cmd);
    }
    barrier::record_layout_transition(
        device,
        cmd,
        t.prepass_depth.image,
        t.prepass_depth.format,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    )?;
    end(device, cmd)
}
