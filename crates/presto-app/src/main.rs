// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use presto_core::{init_tracing, verbose_frames};
use presto_platform::WinitWindowAdapter;
use presto_render::NativeWindow;
use presto_vk::ash::vk;
use presto_vk::{
    Application, AshGpu, ContextOptions, DepthMode, Frame, FrameConfig, FrameCycle,
    PresentStatus, PrestoError, SwapchainInfo, VulkanContext,
};
use serde::Deserialize;
use tracing::{error, info, trace, warn};

use presto_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML settings file; missing means built-in defaults
    #[arg(long, default_value = "presto.toml")]
    config: PathBuf,
    /// Render without a depth attachment
    #[arg(long)]
    no_depth: bool,
    #[arg(long, value_enum)]
    present_mode: Option<PresentModeArg>,
    /// Images requested on top of the surface minimum
    #[arg(long)]
    extra_images: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "snake_case")]
enum PresentModeArg {
    #[default]
    Fifo,
    Mailbox,
    Immediate,
    FifoRelaxed,
}

impl PresentModeArg {
    fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            PresentModeArg::Fifo => vk::PresentModeKHR::FIFO,
            PresentModeArg::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentModeArg::Immediate => vk::PresentModeKHR::IMMEDIATE,
            PresentModeArg::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum DepthCfg {
    #[default]
    Auto,
    Off,
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
            title: "presto".into(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct FrameCfg {
    clear_color: [f32; 4],
    present_mode: PresentModeArg,
    extra_images: u32,
    depth: DepthCfg,
    /// 0 waits forever.
    fence_timeout_ms: u64,
    validation: Option<bool>,
}

impl Default for FrameCfg {
    fn default() -> Self {
        Self {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            present_mode: PresentModeArg::Fifo,
            extra_images: 1,
            depth: DepthCfg::Auto,
            fence_timeout_ms: 0,
            validation: None,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct AppCfg {
    window: WindowCfg,
    frame: FrameCfg,
}

impl AppCfg {
    fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("parsing settings")
    }

    fn apply_args(&mut self, args: &Args) {
        if args.no_depth {
            self.frame.depth = DepthCfg::Off;
        }
        if let Some(mode) = args.present_mode {
            self.frame.present_mode = mode;
        }
        if let Some(extra) = args.extra_images {
            self.frame.extra_images = extra;
        }
    }

    fn frame_config(&self) -> FrameConfig {
        let mut cfg = FrameConfig {
            present_mode: self.frame.present_mode.to_vk(),
            additional_image_count: self.frame.extra_images,
            clear_color: self.frame.clear_color,
            ..FrameConfig::default()
        };
        if self.frame.depth == DepthCfg::Off {
            cfg.depth = DepthMode::Disabled;
        }
        if self.frame.fence_timeout_ms > 0 {
            cfg.fence_timeout_ns = self.frame.fence_timeout_ms.saturating_mul(1_000_000);
        }
        cfg
    }

    fn context_options(&self) -> ContextOptions {
        let mut options = ContextOptions {
            app_name: self.window.title.clone(),
            ..ContextOptions::default()
        };
        if let Some(validation) = self.frame.validation {
            options.validation = validation;
        }
        options
    }
}

fn load_cfg(path: &Path) -> AppCfg {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!("{}: {e}; using defaults", path.display());
            return AppCfg::default();
        }
    };
    match AppCfg::parse(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("{}: {e:#}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

/// Clears the screen and nothing else.
#[derive(Default)]
struct ClearPass;

impl Application<AshGpu> for ClearPass {
    fn init_swapchain_resources(&mut self, _gpu: &AshGpu, info: &SwapchainInfo) -> presto_vk::Result<()> {
        info!(
            "swapchain: {}x{} {:?}, depth {:?}, {} images",
            info.extent.width, info.extent.height, info.color_format, info.depth_format, info.image_count
        );
        Ok(())
    }

    fn render(&mut self, gpu: &AshGpu, frame: &mut Frame) -> presto_vk::Result<()> {
        frame.begin_render_pass(gpu)?;
        frame.end_render_pass(gpu);
        Ok(())
    }
}

// Field order is drop order: the cycle must go before the context it runs on.
struct Running {
    cycle: FrameCycle<AshGpu>,
    context: VulkanContext,
    adapter: Arc<WinitWindowAdapter>,
}

fn start<W: NativeWindow + 'static>(
    window: Arc<W>,
    cfg: &AppCfg,
    pass: &mut ClearPass,
) -> Result<(FrameCycle<AshGpu>, VulkanContext)> {
    let context = VulkanContext::new(window.as_ref(), &cfg.context_options())
        .context("bringing up Vulkan")?;
    info!("device = {}", context.device_name());
    let mut cycle = FrameCycle::new(
        context.device_context(),
        context.surface(),
        window,
        cfg.frame_config(),
    )
    .context("building the swapchain")?;
    cycle.attach(pass).context("initializing frame resources")?;
    Ok((cycle, context))
}

struct App {
    cfg: AppCfg,
    window: Option<Arc<Window>>,
    running: Option<Running>,
    pass: ClearPass,
    frames: u64,
    exiting: bool,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        Self {
            cfg,
            window: None,
            running: None,
            pass: ClearPass,
            frames: 0,
            exiting: false,
        }
    }

    fn shut_down(&mut self) {
        if let Some(mut running) = self.running.take() {
            if let Err(e) = running.cycle.detach(&mut self.pass) {
                warn!("detach: {e}");
            }
            info!("releasing {}", running.context.device_name());
            drop(running);
        }
        self.window = None;
    }

    fn draw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(running) = &mut self.running else {
            return;
        };
        match running.cycle.run_frame(&mut self.pass) {
            Ok(PresentStatus::Success) => {
                self.frames = self.frames.saturating_add(1);
                if verbose_frames() {
                    trace!("frame {} presented (generation {})", self.frames, running.cycle.generation());
                }
            }
            Ok(status) => {
                if verbose_frames() {
                    trace!("frame skipped: {status:?}");
                }
            }
            Err(PrestoError::DeviceLost) => {
                error!("device lost after {} frames; exiting", self.frames);
                self.exiting = true;
                // The device is gone; skip detach hooks that would touch it.
                self.running = None;
                self.window = None;
                event_loop.exit();
            }
            Err(e) if ends_loop(&e) => {
                error!("frame error after {} frames: {e}; exiting", self.frames);
                self.exiting = true;
                self.shut_down();
                event_loop.exit();
            }
            Err(e) => warn!("frame skipped: {e}"),
        }
    }
}

/// Errors after which the frame loop stops instead of trying the next frame.
fn ends_loop(err: &PrestoError) -> bool {
    matches!(
        err,
        PrestoError::DeviceLost
            | PrestoError::Submission(_)
            | PrestoError::Resource { .. }
            | PrestoError::Configuration(_)
    )
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                error!("create_window: {e}");
                event_loop.exit();
                return;
            }
        };
        let adapter = Arc::new(WinitWindowAdapter::new(window.clone()));

        match start(adapter.clone(), &self.cfg, &mut self.pass) {
            Ok((cycle, context)) => {
                info!("resumed → paused={}", cycle.is_paused());
                self.running = Some(Running {
                    cycle,
                    context,
                    adapter,
                });
            }
            Err(e) => {
                error!("{e:#}");
                event_loop.exit();
                return;
            }
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested after {} frames", self.frames);
                self.exiting = true;
                self.shut_down();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                if let Some(running) = &self.running {
                    running.adapter.notify_resized(size.width, size.height);
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                if !self.exiting {
                    self.draw(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        // Minimised windows wait for the next resize instead of spinning.
        let paused = self.running.as_ref().is_some_and(|r| r.cycle.is_paused());
        if !paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shut_down();
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = load_cfg(&args.config);
    cfg.apply_args(&args);
    info!("config: {:?}", cfg.frame);

    let event_loop = EventLoop::new().context("creating event loop")?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app).context("event loop")?;
    Ok(())
}
