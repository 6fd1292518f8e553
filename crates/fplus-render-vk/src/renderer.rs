// SPDX-License-Identifier: CEPL-1.0
//! The Vulkan forward-plus backend.
//!
//! Resources live in one of two scopes. The device scope holds everything
//! created once (layouts, compute pipeline, shaders, pools, semaphores, scene
//! buffers, textures, samplers, descriptor sets). The swapchain scope holds
//! everything sized by the surface and is emptied on every rebuild.

use crate::barrier::HandoffPlan;
use crate::config::RendererConfig;
use crate::descriptors::DescriptorSets;
use crate::device::DeviceContext;
use crate::error::{RenderError, Result, VkResultExt};
use crate::frame::{
    AcquireOutcome, FrameBackend, FrameSemaphores, Pass, PresentOutcome, QueueRole, RenderState, Submission,
    PRESENT_WAIT,
};
use crate::frame_graph::{self, FrameTargets};
use crate::lights::{LightSet, TileGrid};
use crate::memory::{Allocator, DeviceArena, GpuBuffer, ImageDesc, Sharing};
use crate::pipeline::{self, GraphicsPipelines, PipelineLayouts, PushConstants, SetLayouts};
use crate::scene::{self, SceneResources};
use crate::shaders::ShaderModules;
use crate::swapchain::{self, Swapchain};
use ash::vk;
use fplus_math::{LightVolume, Mat4, Vec3};
use fplus_render::{DebugView, RenderSize, RendererDesc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;

/// Device-scope objects, built once.
struct DeviceResources {
    alloc: Allocator,
    compute_pool: vk::CommandPool,
    graphics_pool: vk::CommandPool,
    semaphores: FrameSemaphores,
    layouts: PipelineLayouts,
    modules: ShaderModules,
    pipeline_cache: vk::PipelineCache,
    compute_pipeline: vk::Pipeline,
    scene: SceneResources,
    sets: DescriptorSets,
    handoffs: HandoffPlan,
    depth_format: vk::Format,
}

fn create_pool(ctx: &DeviceContext, arena: &mut DeviceArena, family: u32, label: &'static str) -> Result<vk::CommandPool> {
    let ci = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        queue_family_index: family,
        ..Default::default()
    };
    let pool = unsafe { ctx.device.create_command_pool(&ci, None) }.op("vkCreateCommandPool")?;
    arena.adopt(label, move |d| unsafe { d.destroy_command_pool(pool, None) });
    Ok(pool)
}

impl DeviceResources {
    fn create(
        ctx: &DeviceContext,
        arena: &mut DeviceArena,
        desc: &RendererDesc,
        lights: &LightSet,
        config: &RendererConfig,
        cache_path: Option<&std::path::Path>,
    ) -> Result<Self> {
        let device = &ctx.device;
        let graphics_pool = create_pool(ctx, arena, ctx.families.graphics, "graphics command pool")?;
        let compute_pool = create_pool(ctx, arena, ctx.families.compute, "compute command pool")?;
        let alloc = Allocator::new(device, ctx.memory_properties, ctx.graphics_queue, graphics_pool);

        let semaphores = FrameSemaphores::create(device, arena)?;
        let set_layouts = SetLayouts::create(device, arena)?;
        let layouts = PipelineLayouts::create(device, arena, &set_layouts)?;
        let modules = ShaderModules::create(device, arena, &desc.shaders)?;

        let pipeline_cache = pipeline::load_pipeline_cache(device, cache_path)?;
        arena.adopt("pipeline cache", move |d| unsafe { d.destroy_pipeline_cache(pipeline_cache, None) });
        let compute_pipeline = pipeline::create_compute_pipeline(
            device,
            arena,
            pipeline_cache,
            layouts.compute,
            modules.light_culling_comp,
        )?;

        let scene = SceneResources::upload(ctx, &alloc, arena, &desc.scene, lights, config)?;
        let sets = DescriptorSets::allocate(device, arena, &set_layouts)?;
        sets.write_scene(device, &scene);

        Ok(Self {
            alloc,
            compute_pool,
            graphics_pool,
            semaphores,
            layouts,
            modules,
            pipeline_cache,
            compute_pipeline,
            scene,
            sets,
            handoffs: HandoffPlan::new(ctx.families.graphics, ctx.families.compute),
            depth_format: swapchain::pick_depth_format(ctx)?,
        })
    }
}

/// Swapchain-scope objects; handles only, destruction is owned by the arena.
struct SwapResources {
    tiles: TileGrid,
    visibility: GpuBuffer,
    forward_cmds: Vec<vk::CommandBuffer>,
    depth_cmd: vk::CommandBuffer,
    culling_cmd: vk::CommandBuffer,
}

fn create_framebuffer(
    device: &ash::Device,
    arena: &mut DeviceArena,
    pass: vk::RenderPass,
    attachments: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let ci = vk::FramebufferCreateInfo {
        s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
        render_pass: pass,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        width: extent.width,
        height: extent.height,
        layers: 1,
        ..Default::default()
    };
    let fb = unsafe { device.create_framebuffer(&ci, None) }.op("vkCreateFramebuffer")?;
    arena.adopt("framebuffer", move |d| unsafe { d.destroy_framebuffer(fb, None) });
    Ok(fb)
}

impl SwapResources {
    fn create(
        ctx: &DeviceContext,
        res: &DeviceResources,
        arena: &mut DeviceArena,
        swapchain: &Swapchain,
        view: DebugView,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let device = &ctx.device;
        let alloc = &res.alloc;
        let extent = swapchain.extent;
        let tiles = TileGrid::for_extent(extent);

        let mut views = Vec::with_capacity(swapchain.images.len());
        for &image in &swapchain.images {
            let v = alloc.create_view(image, swapchain.format.format, vk::ImageAspectFlags::COLOR)?;
            arena.adopt("swapchain view", move |d| unsafe { d.destroy_image_view(v, None) });
            views.push(v);
        }

        let depth_pass = pipeline::create_depth_render_pass(device, arena, res.depth_format)?;
        let forward_pass =
            pipeline::create_forward_render_pass(device, arena, swapchain.format.format, res.depth_format)?;
        let pipelines = GraphicsPipelines::create(
            device,
            arena,
            res.pipeline_cache,
            &res.layouts,
            &res.modules,
            forward_pass,
            depth_pass,
            extent,
        )?;

        // The pre-pass depth is sampled by the compute queue as well.
        let prepass_depth = alloc.create_image(
            arena,
            "pre-pass depth",
            &ImageDesc {
                extent,
                format: res.depth_format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                initial_layout: vk::ImageLayout::UNDEFINED,
                sharing: Sharing::between(ctx.families.graphics, ctx.families.compute),
            },
            Some(vk::ImageAspectFlags::DEPTH),
        )?;
        let forward_depth = alloc.create_image(
            arena,
            "forward depth",
            &ImageDesc {
                extent,
                format: res.depth_format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                initial_layout: vk::ImageLayout::UNDEFINED,
                sharing: Sharing::Exclusive,
            },
            Some(vk::ImageAspectFlags::DEPTH),
        )?;
        for image in [&prepass_depth, &forward_depth] {
            alloc.transition(
                image.image,
                image.format,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            )?;
        }

        let depth_framebuffer = create_framebuffer(device, arena, depth_pass, &[prepass_depth.view], extent)?;
        let framebuffers = views
            .iter()
            .map(|&v| create_framebuffer(device, arena, forward_pass, &[v, forward_depth.view], extent))
            .collect::<Result<Vec<_>>>()?;

        let visibility = alloc.create_buffer(
            arena,
            "visibility buffer",
            tiles.visibility_buffer_size(),
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Sharing::Exclusive,
        )?;
        res.sets.write_culling(
            device,
            visibility.buffer,
            res.scene.lights.buffer,
            prepass_depth.view,
            res.scene.depth_sampler,
        );

        let targets = FrameTargets {
            extent,
            tiles,
            depth_pass,
            depth_framebuffer,
            forward_pass,
            pipelines,
            compute_pipeline: res.compute_pipeline,
            layouts: res.layouts,
            sets: res.sets,
            vertex: res.scene.vertex.buffer,
            index: res.scene.index.buffer,
            index_count: res.scene.index_count,
            prepass_depth,
            lights: res.scene.lights.buffer,
            visibility: visibility.buffer,
            push: PushConstants::new(extent, tiles, view),
            clear_color,
            handoffs: &res.handoffs,
        };

        let forward_cmds = frame_graph::allocate_command_buffers(
            device,
            arena,
            res.graphics_pool,
            framebuffers.len() as u32,
            "forward command buffers",
        )?;
        for (&cmd, &fb) in forward_cmds.iter().zip(&framebuffers) {
            frame_graph::record_forward(device, cmd, fb, &targets)?;
        }
        let culling_cmd =
            frame_graph::allocate_command_buffers(device, arena, res.compute_pool, 1, "culling command buffer")?[0];
        frame_graph::record_culling(device, culling_cmd, &targets)?;
        let depth_cmd =
            frame_graph::allocate_command_buffers(device, arena, res.graphics_pool, 1, "depth command buffer")?[0];
        frame_graph::record_depth(device, depth_cmd, &targets)?;

        Ok(Self {
            tiles,
            visibility,
            forward_cmds,
            depth_cmd,
            culling_cmd,
        })
    }
}

pub struct ForwardPlusRenderer {
    config: RendererConfig,
    cache_path: Option<PathBuf>,
    lights: LightSet,
    camera_view: Mat4,
    camera_pos: Vec3,
    swap: Option<SwapResources>,
    swapchain: Option<Swapchain>,
    swap_scope: DeviceArena,
    res: DeviceResources,
    device_scope: DeviceArena,
    ctx: DeviceContext,
}

impl ForwardPlusRenderer {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        desc: &RendererDesc,
        config: RendererConfig,
    ) -> Result<Self> {
        let ctx = DeviceContext::new(window, display, &config)?;

        let mut rng = match config.light_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let lights = LightSet::random(config.light_count, LightVolume::default(), &mut rng)?;

        let cache_path = config
            .pipeline_cache
            .then(|| pipeline::pipeline_cache_path(&ctx.properties));
        let mut device_scope = DeviceArena::new("device scope");
        let res = match DeviceResources::create(&ctx, &mut device_scope, desc, &lights, &config, cache_path.as_deref()) {
            Ok(res) => res,
            Err(e) => {
                device_scope.destroy_all(&ctx.device);
                return Err(e);
            }
        };

        let mut this = Self {
            config,
            cache_path,
            lights,
            camera_view: Mat4::look_at_rh(Vec3::new(0.0, 5.0, 20.0), Vec3::ZERO, Vec3::Y),
            camera_pos: Vec3::new(0.0, 5.0, 20.0),
            swap: None,
            swapchain: None,
            swap_scope: DeviceArena::new("swapchain scope"),
            res,
            device_scope,
            ctx,
        };
        // Drop cleans up whatever was built if this fails.
        this.build_swapchain(desc.size, DebugView::default())?;
        Ok(this)
    }

    /// `None` while the surface has no extent to render to.
    pub fn tiles(&self) -> Option<TileGrid> {
        self.swap.as_ref().map(|s| s.tiles)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.as_ref().map(|s| s.extent).unwrap_or_default()
    }

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    /// Reads the visibility records back to the host; for inspection only.
    pub fn read_visibility(&self) -> Result<Vec<u8>> {
        let swap = self.swap.as_ref().ok_or(RenderError::NotReady(RenderState::Rebuilding))?;
        self.res
            .alloc
            .read_back(swap.visibility.buffer, swap.visibility_len())
    }

    fn build_swapchain(&mut self, size: RenderSize, view: DebugView) -> Result<Option<TileGrid>> {
        let old = self.swapchain.take();
        let old_handle = old.as_ref().map_or(vk::SwapchainKHR::null(), |s| s.handle);
        let created = Swapchain::create(&self.ctx, size, self.config.present_mode, old_handle);
        if let Some(mut old) = old {
            old.destroy();
        }
        let Some(created) = created? else {
            return Ok(None);
        };
        let swapchain = self.swapchain.insert(created);

        let swap = SwapResources::create(
            &self.ctx,
            &self.res,
            &mut self.swap_scope,
            swapchain,
            view,
            self.config.clear_color,
        )?;
        let tiles = swap.tiles;
        self.swap = Some(swap);
        Ok(Some(tiles))
    }

    fn swap(&self) -> Result<&SwapResources> {
        self.swap
            .as_ref()
            .ok_or(RenderError::NotReady(RenderState::Rebuilding))
    }
}

impl SwapResources {
    fn visibility_len(&self) -> usize {
        self.visibility.size as usize
    }
}

impl FrameBackend for ForwardPlusRenderer {
    fn wait_previous_frame(&mut self) -> Result<()> {
        // One frame in flight: the graphics queue holds the last forward
        // submit, which waits on image-available and reads the frame buffers.
        unsafe { self.ctx.device.queue_wait_idle(self.ctx.graphics_queue) }.op("vkQueueWaitIdle")
    }

    fn acquire(&mut self) -> Result<AcquireOutcome> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or(RenderError::NotReady(RenderState::Rebuilding))?;
        match swapchain.acquire(self.res.semaphores.image_available) {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(result) => Err(RenderError::Vulkan {
                op: "vkAcquireNextImageKHR",
                result,
            }),
        }
    }

    fn update_uniforms(&mut self, dt: f32) -> Result<()> {
        self.lights.animate(dt);
        let camera = scene::camera_ubo(self.camera_view, self.camera_pos, self.extent());
        self.res.scene.write_frame(&self.res.alloc, &camera, &self.lights)
    }

    fn submit(&mut self, submission: &Submission, image_index: u32) -> Result<()> {
        let swap = self.swap()?;
        let cmd = match submission.pass {
            Pass::Depth => swap.depth_cmd,
            Pass::LightCulling => swap.culling_cmd,
            Pass::Forward => swap.forward_cmds[image_index as usize],
        };
        let queue = match submission.queue {
            QueueRole::Graphics => self.ctx.graphics_queue,
            QueueRole::Compute => self.ctx.compute_queue,
        };
        let sems = &self.res.semaphores;
        let waits: Vec<vk::Semaphore> = submission.waits.iter().map(|&(role, _)| sems.get(role)).collect();
        let stages: Vec<vk::PipelineStageFlags> = submission.waits.iter().map(|&(_, stage)| stage).collect();
        let signal = sems.get(submission.signal);

        let info = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: waits.len() as u32,
            p_wait_semaphores: waits.as_ptr(),
            p_wait_dst_stage_mask: stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &signal,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .queue_submit(queue, std::slice::from_ref(&info), vk::Fence::null())
        }
        .op("vkQueueSubmit")
    }

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or(RenderError::NotReady(RenderState::Rebuilding))?;
        let wait = self.res.semaphores.get(PRESENT_WAIT);
        match swapchain.present(self.ctx.present_queue, image_index, wait) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(result) => Err(RenderError::Vulkan {
                op: "vkQueuePresentKHR",
                result,
            }),
        }
    }

    fn rebuild(&mut self, size: RenderSize, view: DebugView) -> Result<Option<TileGrid>> {
        self.ctx.wait_idle()?;
        self.swap = None;
        self.swap_scope.destroy_all(&self.ctx.device);
        let Some(tiles) = self.build_swapchain(size, view)? else {
            tracing::info!("swapchain released: surface has no extent");
            return Ok(None);
        };
        let extent = self.extent();
        tracing::info!(
            "swapchain rebuilt: {}x{}, {}x{} tiles, view {}",
            extent.width,
            extent.height,
            tiles.x,
            tiles.y,
            view.name()
        );
        Ok(Some(tiles))
    }

    fn set_camera(&mut self, view: Mat4, position: Vec3) {
        self.camera_view = view;
        self.camera_pos = position;
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.config.clear_color = rgba;
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.ctx.wait_idle()
    }
}

impl Drop for ForwardPlusRenderer {
    fn drop(&mut self) {
        let device = &self.ctx.device;
        // 1) nothing in flight
        let _ = self.ctx.wait_idle();
        // 2) swapchain scope, then the swapchain itself
        self.swap = None;
        self.swap_scope.destroy_all(device);
        if let Some(mut swapchain) = self.swapchain.take() {
            swapchain.destroy();
        }
        // 3) persist the cache while it still exists
        if let Some(path) = &self.cache_path {
            pipeline::save_pipeline_cache(device, self.res.pipeline_cache, path);
        }
        // 4) device scope; the context drops last and takes the device,
        //    surface and instance with it
        self.device_scope.destroy_all(device);
    }
}
