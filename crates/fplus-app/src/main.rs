// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod camera;
mod scene;

use anyhow::{Context, Result};
use camera::OrbitCamera;
use clap::Parser;
use fplus_core::{init_tracing, load_toml_or_default};
use fplus_platform::FrameClock;
use fplus_render::{DebugView, RenderSize, Renderer, RendererDesc, ShaderBlobs};
use fplus_render_vk::{RendererConfig, VkRenderer, MAX_POINT_LIGHT_COUNT};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};

use fplus_platform::winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Forward+ renderer demo", long_about = None)]
struct Args {
    /// TOML file with [window] and [render] tables
    #[arg(long, default_value = "forwardplus.toml")]
    config: PathBuf,
    /// Directory holding the compiled .spv shaders
    #[arg(long)]
    shaders: Option<PathBuf>,
    /// Initial debug view, 0..=4 (wraps)
    #[arg(long)]
    debug_view: Option<u32>,
    /// Number of point lights
    #[arg(long)]
    lights: Option<usize>,
    /// Disable the Vulkan validation layer
    #[arg(long)]
    no_validation: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "forward+".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AppCfg {
    window: WindowCfg,
    render: RendererConfig,
}

impl AppCfg {
    /// File, then environment, then command line.
    fn resolve(path: &Path, args: &Args) -> Result<Self> {
        let mut cfg: AppCfg = load_toml_or_default(path)?;
        cfg.apply(args);
        Ok(cfg)
    }

    fn apply(&mut self, args: &Args) {
        self.render = self.render.clone().with_env_overrides();
        if let Some(n) = args.lights {
            self.render.light_count = n.min(MAX_POINT_LIGHT_COUNT);
        }
        if args.no_validation {
            self.render.validation = false;
        }
    }
}

const DEFAULT_SHADER_DIR: &str = "shaders";

fn load_shaders(dir: Option<&Path>) -> Result<ShaderBlobs> {
    #[cfg(feature = "embed-shaders")]
    if dir.is_none() {
        return Ok(fplus_render_vk::embedded_shaders());
    }
    let dir = dir.unwrap_or(Path::new(DEFAULT_SHADER_DIR));
    ShaderBlobs::load_dir(dir).with_context(|| format!("loading shaders from {}", dir.display()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KeyAction {
    SelectView(u32),
    CycleView,
    ToggleOrbit,
}

fn key_action(key: &Key) -> Option<KeyAction> {
    match key {
        Key::Character(c) => match c.as_str() {
            "0" => Some(KeyAction::SelectView(0)),
            "1" => Some(KeyAction::SelectView(1)),
            "2" => Some(KeyAction::SelectView(2)),
            "3" => Some(KeyAction::SelectView(3)),
            "4" => Some(KeyAction::SelectView(4)),
            _ => None,
        },
        Key::Named(NamedKey::Tab) => Some(KeyAction::CycleView),
        Key::Named(NamedKey::Space) => Some(KeyAction::ToggleOrbit),
        _ => None,
    }
}

struct App {
    cfg: AppCfg,
    shaders: Option<PathBuf>,
    initial_view: DebugView,
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    render_size: RenderSize,
    camera: OrbitCamera,
    clock: FrameClock,
    paused: bool,
    exiting: bool,
    failure: Option<anyhow::Error>,
}

impl App {
    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(LogicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = event_loop.create_window(attrs).context("create_window")?;
        let size = window.inner_size();
        self.render_size = RenderSize::new(size.width, size.height);

        let desc = RendererDesc {
            size: self.render_size,
            scene: scene::build_scene()?,
            shaders: load_shaders(self.shaders.as_deref())?,
        };
        let mut renderer = VkRenderer::with_config(&window, &window, desc, self.cfg.render.clone())?;
        renderer.set_camera(self.camera.view(), self.camera.position());
        renderer.set_debug_view(self.initial_view.index())?;

        info!(
            "{} lights, debug view {}",
            self.cfg.render.light_count,
            self.initial_view.name()
        );
        self.paused = self.render_size.is_empty();
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.failure = Some(err);
        self.exit(event_loop);
    }

    fn exit(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let Some(mut r) = self.renderer.take() {
            if let Err(e) = r.shutdown() {
                error!("shutdown: {e:#}");
            }
        }
        self.window = None;
        event_loop.exit();
    }

    fn on_key(&mut self, action: KeyAction) -> Result<()> {
        let Some(renderer) = &mut self.renderer else {
            return Ok(());
        };
        match action {
            KeyAction::SelectView(i) => renderer.set_debug_view(i)?,
            KeyAction::CycleView => renderer.set_debug_view(renderer.debug_view().next().index())?,
            KeyAction::ToggleOrbit => {
                let paused = self.camera.toggle_pause();
                info!("orbit {}", if paused { "paused" } else { "resumed" });
            }
        }
        Ok(())
    }

    fn frame(&mut self) -> Result<()> {
        let Some(renderer) = &mut self.renderer else {
            return Ok(());
        };
        let now = Instant::now();
        let dt = self.clock.tick(now);
        self.camera.update(dt);
        renderer.set_camera(self.camera.view(), self.camera.position());
        renderer.request_frame(dt)?;
        if let Some(fps) = self.clock.count_frame(now) {
            info!("fps ~ {fps}");
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        self.clock.reset(Instant::now());
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exit(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize::new(new_size.width, new_size.height);
                let now_paused = self.render_size.is_empty();
                if self.paused != now_paused {
                    info!(
                        "Resized → {}x{} (paused={})",
                        self.render_size.width, self.render_size.height, now_paused
                    );
                    if !now_paused {
                        self.clock.reset(Instant::now());
                    }
                }
                self.paused = now_paused;
                if let Some(r) = &mut self.renderer {
                    if let Err(e) = r.resize(self.render_size) {
                        self.fail(event_loop, e);
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state != ElementState::Pressed || event.repeat {
                    return;
                }
                if let Some(action) = key_action(&event.logical_key) {
                    if let Err(e) = self.on_key(action) {
                        self.fail(event_loop, e);
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                if let Err(e) = self.frame() {
                    self.fail(event_loop, e);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            // Minimised: sleep until the next resize.
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = AppCfg::resolve(&args.config, &args)?;
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        cfg,
        shaders: args.shaders,
        initial_view: DebugView::from_index(args.debug_view.unwrap_or(0)),
        window: None,
        renderer: None,
        render_size: RenderSize::new(1, 1),
        camera: OrbitCamera::default(),
        clock: FrameClock::new(Instant::now()),
        paused: false,
        exiting: false,
        failure: None,
    };

    event_loop.run_app(&mut app)?;
    match app.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(std::iter::once("fplus-app").chain(extra.iter().copied()))
    }

    #[test]
    fn digit_keys_select_views() {
        for i in 0..5u32 {
            let key = Key::Character(i.to_string().into());
            assert_eq!(key_action(&key), Some(KeyAction::SelectView(i)));
        }
        assert_eq!(key_action(&Key::Character("5".into())), None);
        assert_eq!(key_action(&Key::Named(NamedKey::Tab)), Some(KeyAction::CycleView));
        assert_eq!(key_action(&Key::Named(NamedKey::Space)), Some(KeyAction::ToggleOrbit));
    }

    #[test]
    fn config_tables_parse_partially() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [window]
            width = 640

            [render]
            light_count = 32
            present_mode = "fifo"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 720);
        assert_eq!(cfg.render.light_count, 32);
        assert_eq!(cfg.render.present_mode, fplus_render_vk::PresentPreference::Fifo);
    }

    #[test]
    fn command_line_overrides_the_file() {
        let mut cfg = AppCfg::default();
        cfg.render.validation = true;
        cfg.apply(&args(&["--lights", "5000", "--no-validation"]));
        assert_eq!(cfg.render.light_count, MAX_POINT_LIGHT_COUNT);
        assert!(!cfg.render.validation);
    }

    #[test]
    fn defaults_when_no_flags() {
        let a = args(&[]);
        assert_eq!(a.config, PathBuf::from("forwardplus.toml"));
        assert!(a.shaders.is_none() && a.debug_view.is_none());
    }
}
