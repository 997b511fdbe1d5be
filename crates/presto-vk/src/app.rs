// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{debug, error};

use crate::cycle::FrameCycle;
use crate::error::{PresentStatus, PrestoError, Result};
use crate::frame::Frame;
use crate::gpu::Gpu;

/// What swapchain-sized application resources need to know.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainInfo {
    pub extent: vk::Extent2D,
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
    pub image_count: usize,
    pub render_pass: vk::RenderPass,
}

/// Hooks a renderer plugs into [`FrameCycle::run_frame`].
///
/// Swapchain hooks bracket every rebuild: release runs on an idle device
/// before the old targets go away, init runs once the new ones exist.
pub trait Application<G: Gpu> {
    fn init_resources(&mut self, _gpu: &G) -> Result<()> {
        Ok(())
    }

    fn release_resources(&mut self, _gpu: &G) {}

    fn init_swapchain_resources(&mut self, _gpu: &G, _info: &SwapchainInfo) -> Result<()> {
        Ok(())
    }

    fn release_swapchain_resources(&mut self, _gpu: &G) {}

    /// Records into `frame`, whose command buffer is already open. Leave the
    /// render pass closed on return.
    fn render(&mut self, gpu: &G, frame: &mut Frame) -> Result<()>;
}

impl<G: Gpu> FrameCycle<G> {
    pub fn swapchain_info(&self) -> SwapchainInfo {
        SwapchainInfo {
            extent: self.swapchain().extent(),
            color_format: self.swapchain().format(),
            depth_format: self.targets().depth_format(),
            image_count: self.swapchain().image_count(),
            render_pass: self.targets().render_pass(),
        }
    }

    /// Runs the application's init hooks. Swapchain hooks are skipped while
    /// paused and run on the first successful rebuild instead.
    pub fn attach<A: Application<G>>(&mut self, app: &mut A) -> Result<()> {
        app.init_resources(self.gpu())?;
        if self.swapchain().is_live() {
            let info = self.swapchain_info();
            app.init_swapchain_resources(self.gpu(), &info)?;
        }
        Ok(())
    }

    /// Rebuilds with the application's swapchain hooks around it.
    pub fn rebuild_for<A: Application<G>>(&mut self, app: &mut A) -> Result<bool> {
        let rebuilt = self.rebuild_with(|gpu| app.release_swapchain_resources(gpu))?;
        if rebuilt {
            let info = self.swapchain_info();
            app.init_swapchain_resources(self.gpu(), &info)?;
        }
        Ok(rebuilt)
    }

    /// One full frame: honors pending resizes, acquires, lets `app` record,
    /// submits and presents. Returns `RecoverableResize` for a frame that was
    /// skipped or needed a rebuild afterwards; the rebuild has already run.
    pub fn run_frame<A: Application<G>>(&mut self, app: &mut A) -> Result<PresentStatus> {
        if self.window().take_resize() || self.is_paused() {
            self.rebuild_for(app)?;
            if self.is_paused() {
                return Ok(PresentStatus::RecoverableResize);
            }
        }

        let mut frame = match self.acquire_next_frame() {
            Ok(frame) => frame,
            Err(PrestoError::SurfaceOutOfDate) => {
                debug!("acquire out of date; rebuilding");
                self.rebuild_for(app)?;
                return Ok(PresentStatus::RecoverableResize);
            }
            Err(e) => return Err(e),
        };

        self.begin_recording(&mut frame)?;
        app.render(self.gpu(), &mut frame)?;
        frame.end_command_buffer(self.gpu())?;
        self.submit_frame(&frame)?;

        match self.present_frame(&frame)? {
            PresentStatus::FatalDeviceLost => {
                error!("device lost; frame loop cannot continue");
                Err(PrestoError::DeviceLost)
            }
            PresentStatus::RecoverableResize => {
                self.rebuild_for(app)?;
                Ok(PresentStatus::RecoverableResize)
            }
            PresentStatus::Success => Ok(PresentStatus::Success),
        }
    }

    /// Waits for the device and runs the release hooks, swapchain first.
    pub fn detach<A: Application<G>>(&mut self, app: &mut A) -> Result<()> {
        self.wait_for_present()?;
        if self.swapchain().is_live() {
            app.release_swapchain_resources(self.gpu());
        }
        app.release_resources(self.gpu());
        Ok(())
    }
}
