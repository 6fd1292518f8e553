// SPDX-License-Identifier: CEPL-1.0
//! Vulkan forward-plus renderer: depth pre-pass, tiled light culling on the
//! compute queue, and a forward pass that shades each pixel with only the
//! lights its tile can see.

pub mod arena;
pub mod barrier;
pub mod config;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod frame;
pub mod frame_graph;
pub mod lights;
pub mod memory;
pub mod pipeline;
pub mod renderer;
pub mod scene;
pub mod shaders;
pub mod swapchain;

pub use config::{PresentPreference, RendererConfig};
pub use error::{ErrorKind, RenderError, Result};
pub use frame::{
    AcquireOutcome, FrameBackend, FrameDriver, FrameOutcome, PresentOutcome, RebuildCause, RenderState, Submission,
};
pub use lights::{TileGrid, MAX_POINT_LIGHTS_PER_TILE, MAX_POINT_LIGHT_COUNT, TILE_SIZE};
pub use renderer::ForwardPlusRenderer;
#[cfg(feature = "embed-shaders")]
pub use shaders::embedded_shaders;

use fplus_math::{Mat4, Vec3};
use fplus_render::{DebugView, RenderSize, Renderer, RendererDesc};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;

/// The public face of the backend: a [`FrameDriver`] over the Vulkan
/// [`ForwardPlusRenderer`].
pub struct VkRenderer {
    driver: FrameDriver<ForwardPlusRenderer>,
}

impl VkRenderer {
    pub fn with_config(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        desc: RendererDesc,
        config: RendererConfig,
    ) -> Result<Self> {
        let backend = ForwardPlusRenderer::new(window, display, &desc, config)?;
        let tiles = backend.tiles();
        let extent = backend.extent();
        match tiles {
            Some(t) => info!(
                "forward+ ready: {}x{}, {}x{} tiles",
                extent.width, extent.height, t.x, t.y
            ),
            None => info!("forward+ ready, paused until the surface has an extent"),
        }
        Ok(Self {
            driver: FrameDriver::new(backend, desc.size, DebugView::default(), tiles),
        })
    }

    pub fn tiles(&self) -> TileGrid {
        self.driver.tiles()
    }

    pub fn debug_view(&self) -> DebugView {
        self.driver.debug_view()
    }

    pub fn state(&self) -> RenderState {
        self.driver.state()
    }

    pub fn rebuilds(&self) -> u64 {
        self.driver.rebuilds()
    }

    pub fn driver(&self) -> &FrameDriver<ForwardPlusRenderer> {
        &self.driver
    }

    pub fn frame(&mut self, delta_time: f32) -> Result<FrameOutcome> {
        self.driver.request_frame(delta_time)
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        desc: RendererDesc,
    ) -> anyhow::Result<Self> {
        let config = RendererConfig::default().with_env_overrides();
        Ok(Self::with_config(window, display, desc, config)?)
    }

    fn resize(&mut self, size: RenderSize) -> anyhow::Result<()> {
        Ok(self.driver.resize(size)?)
    }

    fn set_camera(&mut self, view: Mat4, position: Vec3) {
        self.driver.set_camera(view, position);
    }

    fn request_frame(&mut self, delta_time: f32) -> anyhow::Result<()> {
        self.driver.request_frame(delta_time)?;
        Ok(())
    }

    fn set_debug_view(&mut self, index: u32) -> anyhow::Result<()> {
        Ok(self.driver.set_debug_view(index)?)
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        Ok(self.driver.shutdown()?)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.driver.set_clear_color(rgba);
    }
}
