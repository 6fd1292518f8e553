// SPDX-License-Identifier: CEPL-1.0
//! The per-frame protocol, independent of how a backend talks to the GPU.
//!
//! A frame is: wait for the previous frame, acquire, refresh uniforms,
//! submit depth pre-pass, light culling and forward pass in that order, then
//! present. A stale swapchain at acquire or present turns into a rebuild
//! instead of an error. A surface whose extent is zero pauses rendering.

use crate::arena::ResourceArena;
use crate::error::{RenderError, Result, VkResultExt};
use crate::lights::TileGrid;
use ash::vk;
use bitflags::bitflags;
use fplus_math::{Mat4, Vec3};
use fplus_render::{DebugView, RenderSize};

bitflags! {
    /// Why the swapchain-dependent resources were last rebuilt.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RebuildCause: u8 {
        const RESIZE = 1 << 0;
        const STALE_ACQUIRE = 1 << 1;
        const STALE_PRESENT = 1 << 2;
        const DEBUG_VIEW = 1 << 3;
        const CLEAR_COLOR = 1 << 4;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderState {
    #[default]
    Uninitialized,
    Ready,
    Rebuilding,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Lifecycle {
    state: RenderState,
    rebuilds: u64,
    last_cause: RebuildCause,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Completed rebuilds since initialisation.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn last_cause(&self) -> RebuildCause {
        self.last_cause
    }

    pub fn mark_ready(&mut self) {
        self.state = RenderState::Ready;
    }

    pub fn require_ready(&self) -> Result<()> {
        match self.state {
            RenderState::Ready => Ok(()),
            other => Err(RenderError::NotReady(other)),
        }
    }

    pub fn begin_rebuild(&mut self, cause: RebuildCause) -> Result<()> {
        self.require_ready()?;
        self.state = RenderState::Rebuilding;
        self.last_cause = cause;
        Ok(())
    }

    pub fn finish_rebuild(&mut self) {
        if self.state == RenderState::Rebuilding {
            self.state = RenderState::Ready;
            self.rebuilds += 1;
        }
    }

    pub fn shutdown(&mut self) {
        self.state = RenderState::Uninitialized;
    }
}

// ---- submission plan -------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pass {
    Depth,
    LightCulling,
    Forward,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueRole {
    Graphics,
    Compute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SemaphoreRole {
    ImageAvailable,
    DepthDone,
    CullingDone,
    RenderFinished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Submission {
    pub pass: Pass,
    pub queue: QueueRole,
    pub waits: &'static [(SemaphoreRole, vk::PipelineStageFlags)],
    pub signal: SemaphoreRole,
}

/// The three submits of a frame, in order. Present then waits on
/// [`SemaphoreRole::RenderFinished`].
pub const SUBMIT_PLAN: [Submission; 3] = [
    Submission {
        pass: Pass::Depth,
        queue: QueueRole::Graphics,
        waits: &[],
        signal: SemaphoreRole::DepthDone,
    },
    Submission {
        pass: Pass::LightCulling,
        queue: QueueRole::Compute,
        waits: &[(SemaphoreRole::DepthDone, vk::PipelineStageFlags::COMPUTE_SHADER)],
        signal: SemaphoreRole::CullingDone,
    },
    Submission {
        pass: Pass::Forward,
        queue: QueueRole::Graphics,
        waits: &[
            (
                SemaphoreRole::ImageAvailable,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ),
            (SemaphoreRole::CullingDone, vk::PipelineStageFlags::FRAGMENT_SHADER),
        ],
        signal: SemaphoreRole::RenderFinished,
    },
];

pub const PRESENT_WAIT: SemaphoreRole = SemaphoreRole::RenderFinished;

/// Binary semaphores with fixed roles, created once per device.
#[derive(Clone, Copy, Debug)]
pub struct FrameSemaphores {
    pub image_available: vk::Semaphore,
    pub depth_done: vk::Semaphore,
    pub culling_done: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

impl FrameSemaphores {
    pub fn create(device: &ash::Device, arena: &mut ResourceArena<ash::Device>) -> Result<Self> {
        let mut make = |label: &'static str| -> Result<vk::Semaphore> {
            let ci = vk::SemaphoreCreateInfo {
                s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
                ..Default::default()
            };
            let sem = unsafe { device.create_semaphore(&ci, None) }.op("vkCreateSemaphore")?;
            arena.adopt(label, move |d| unsafe { d.destroy_semaphore(sem, None) });
            Ok(sem)
        };
        Ok(Self {
            image_available: make("image available")?,
            depth_done: make("depth done")?,
            culling_done: make("culling done")?,
            render_finished: make("render finished")?,
        })
    }

    pub fn get(&self, role: SemaphoreRole) -> vk::Semaphore {
        match role {
            SemaphoreRole::ImageAvailable => self.image_available,
            SemaphoreRole::DepthDone => self.depth_done,
            SemaphoreRole::CullingDone => self.culling_done,
            SemaphoreRole::RenderFinished => self.render_finished,
        }
    }
}

// ---- backend seam ----------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Out of date or suboptimal; rebuild before the next frame.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Zero-sized surface; nothing was done.
    Paused,
    /// The frame ended in a rebuild (and was not presented if stale at
    /// acquire).
    Rebuilt(RebuildCause),
}

/// What the driver needs from a GPU backend.
pub trait FrameBackend {
    /// Blocks until the previous frame no longer uses the image-available
    /// semaphore or the per-frame buffers. Called before every acquire.
    fn wait_previous_frame(&mut self) -> Result<()>;

    fn acquire(&mut self) -> Result<AcquireOutcome>;

    /// Animates lights and uploads per-frame data.
    fn update_uniforms(&mut self, dt: f32) -> Result<()>;

    fn submit(&mut self, submission: &Submission, image_index: u32) -> Result<()>;

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome>;

    /// Tears down and recreates everything sized by the swapchain. `None`
    /// when the surface currently has a zero extent and nothing was built.
    fn rebuild(&mut self, size: RenderSize, view: DebugView) -> Result<Option<TileGrid>>;

    fn set_camera(&mut self, view: Mat4, position: Vec3);

    /// Takes effect at the next rebuild.
    fn set_clear_color(&mut self, rgba: [f32; 4]);

    /// Blocks until the GPU is idle.
    fn wait_idle(&mut self) -> Result<()>;
}

pub struct FrameDriver<B> {
    backend: B,
    lifecycle: Lifecycle,
    size: RenderSize,
    debug_view: DebugView,
    tiles: TileGrid,
    paused: bool,
    /// Changes that need a rebuild before the next frame.
    pending: RebuildCause,
}

impl<B: FrameBackend> FrameDriver<B> {
    /// `backend` must already be fully built for `size`. `tiles` is `None`
    /// when the surface had no extent to build for; the driver starts paused.
    pub fn new(backend: B, size: RenderSize, debug_view: DebugView, tiles: Option<TileGrid>) -> Self {
        let mut lifecycle = Lifecycle::new();
        lifecycle.mark_ready();
        Self {
            backend,
            lifecycle,
            size,
            debug_view,
            tiles: tiles.unwrap_or_default(),
            paused: size.is_empty() || tiles.is_none(),
            pending: RebuildCause::empty(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn state(&self) -> RenderState {
        self.lifecycle.state()
    }

    pub fn rebuilds(&self) -> u64 {
        self.lifecycle.rebuilds()
    }

    pub fn last_rebuild_cause(&self) -> RebuildCause {
        self.lifecycle.last_cause()
    }

    pub fn tiles(&self) -> TileGrid {
        self.tiles
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    pub fn debug_view(&self) -> DebugView {
        self.debug_view
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn rebuild(&mut self, cause: RebuildCause) -> Result<()> {
        self.lifecycle.begin_rebuild(cause)?;
        tracing::info!(
            "rebuilding swapchain resources ({:?}) at {}x{}",
            cause,
            self.size.width,
            self.size.height
        );
        // A failure leaves the lifecycle in Rebuilding: later frames refuse.
        match self.backend.rebuild(self.size, self.debug_view)? {
            Some(tiles) => self.tiles = tiles,
            None => {
                tracing::debug!("surface extent is zero, pausing");
                self.tiles = TileGrid::default();
                self.paused = true;
            }
        }
        self.pending = RebuildCause::empty();
        self.lifecycle.finish_rebuild();
        Ok(())
    }

    /// Zero-sized: pause. Same size: nothing. Otherwise one rebuild.
    pub fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.lifecycle.require_ready()?;
        if size.is_empty() {
            if !self.paused {
                tracing::debug!("surface is zero-sized, pausing");
            }
            self.paused = true;
            self.size = size;
            return Ok(());
        }
        if !self.paused && size == self.size {
            return Ok(());
        }
        self.paused = false;
        self.size = size;
        self.rebuild(RebuildCause::RESIZE)
    }

    /// Index wraps modulo [`DebugView::COUNT`]; an unchanged view is a no-op.
    pub fn set_debug_view(&mut self, index: u32) -> Result<()> {
        self.lifecycle.require_ready()?;
        let view = DebugView::from_index(index);
        if view == self.debug_view {
            return Ok(());
        }
        tracing::info!("debug view: {}", view.name());
        self.debug_view = view;
        if self.paused {
            // Picked up by the resize that ends the pause.
            return Ok(());
        }
        self.rebuild(RebuildCause::DEBUG_VIEW)
    }

    pub fn set_camera(&mut self, view: Mat4, position: Vec3) {
        self.backend.set_camera(view, position);
    }

    /// The forward pass records its clear value, so the next frame rebuilds.
    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.backend.set_clear_color(rgba);
        self.pending |= RebuildCause::CLEAR_COLOR;
    }

    pub fn request_frame(&mut self, dt: f32) -> Result<FrameOutcome> {
        self.lifecycle.require_ready()?;
        if self.paused {
            return Ok(FrameOutcome::Paused);
        }
        if !self.pending.is_empty() {
            let cause = self.pending;
            self.rebuild(cause)?;
            if self.paused {
                return Ok(FrameOutcome::Rebuilt(cause));
            }
        }

        // The previous frame's forward submit still waits on the
        // image-available semaphore until the graphics queue drains.
        self.backend.wait_previous_frame()?;
        let image_index = match self.backend.acquire()? {
            AcquireOutcome::Acquired { image_index, .. } => image_index,
            AcquireOutcome::Stale => {
                self.rebuild(RebuildCause::STALE_ACQUIRE)?;
                return Ok(FrameOutcome::Rebuilt(RebuildCause::STALE_ACQUIRE));
            }
        };

        self.backend.update_uniforms(dt)?;
        for submission in &SUBMIT_PLAN {
            self.backend.submit(submission, image_index)?;
        }

        match self.backend.present(image_index)? {
            PresentOutcome::Presented => Ok(FrameOutcome::Presented),
            PresentOutcome::Stale => {
                self.rebuild(RebuildCause::STALE_PRESENT)?;
                Ok(FrameOutcome::Rebuilt(RebuildCause::STALE_PRESENT))
            }
        }
    }

    /// Idles the GPU; afterwards every call fails with `NotReady`.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.lifecycle.state() == RenderState::Uninitialized {
            return Ok(());
        }
        self.lifecycle.shutdown();
        self.backend.wait_idle()
    }

    pub fn into_backend(self) -> B {
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_plan_chains_the_passes() {
        let passes: Vec<Pass> = SUBMIT_PLAN.iter().map(|s| s.pass).collect();
        assert_eq!(passes, vec![Pass::Depth, Pass::LightCulling, Pass::Forward]);

        // Every wait is signalled by an earlier submit, or by acquire.
        let mut signalled = vec![SemaphoreRole::ImageAvailable];
        for s in &SUBMIT_PLAN {
            for (wait, _) in s.waits {
                assert!(signalled.contains(wait), "{:?} waits on unsignalled {:?}", s.pass, wait);
            }
            signalled.push(s.signal);
        }
        assert!(signalled.contains(&PRESENT_WAIT));
    }

    #[test]
    fn culling_runs_on_compute_between_graphics_submits() {
        assert_eq!(SUBMIT_PLAN[0].queue, QueueRole::Graphics);
        assert_eq!(SUBMIT_PLAN[1].queue, QueueRole::Compute);
        assert_eq!(SUBMIT_PLAN[2].queue, QueueRole::Graphics);
        assert_eq!(
            SUBMIT_PLAN[1].waits,
            &[(SemaphoreRole::DepthDone, vk::PipelineStageFlags::COMPUTE_SHADER)]
        );
        let forward_waits: Vec<_> = SUBMIT_PLAN[2].waits.iter().map(|w| w.0).collect();
        assert_eq!(
            forward_waits,
            vec![SemaphoreRole::ImageAvailable, SemaphoreRole::CullingDone]
        );
    }

    #[test]
    fn lifecycle_counts_completed_rebuilds() {
        let mut l = Lifecycle::new();
        assert!(matches!(
            l.begin_rebuild(RebuildCause::RESIZE),
            Err(RenderError::NotReady(RenderState::Uninitialized))
        ));
        l.mark_ready();
        l.begin_rebuild(RebuildCause::RESIZE).unwrap();
        assert_eq!(l.state(), RenderState::Rebuilding);
        assert!(l.begin_rebuild(RebuildCause::DEBUG_VIEW).is_err());
        l.finish_rebuild();
        assert_eq!(l.state(), RenderState::Ready);
        assert_eq!(l.rebuilds(), 1);
        assert_eq!(l.last_cause(), RebuildCause::RESIZE);
        l.shutdown();
        assert!(l.require_ready().is_err());
    }
}
