// SPDX-License-Identifier: CEPL-1.0
//! Swapchain lifetime plus the acquire → record → submit → present loop.

use std::sync::Arc;

use ash::vk;
use presto_render::WindowAdapter;
use tracing::{debug, error, info, trace, warn};

use crate::config::FrameConfig;
use crate::context::DeviceContext;
use crate::error::{PresentStatus, PrestoError, Result};
use crate::frame::Frame;
use crate::frame_pool::{FramePool, FrameSlot, SlotState};
use crate::gpu::{Gpu, SubmitDesc};
use crate::swapchain::{plan_swapchain, SwapchainPlan, SwapchainRequest, SwapchainState};
use crate::targets::{select_depth_format, RenderTargets};

fn device_error(result: vk::Result) -> PrestoError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => PrestoError::DeviceLost,
        other => PrestoError::Vulkan(other),
    }
}

fn slot_of<'a>(pool: &'a mut FramePool, index: usize) -> Result<&'a mut FrameSlot> {
    let len = pool.len();
    pool.slot_mut(index).ok_or_else(|| {
        PrestoError::Configuration(format!("image index {index} out of range for {len} slots"))
    })
}

fn invalid(index: usize, slot: &FrameSlot, op: &'static str) -> PrestoError {
    PrestoError::InvalidFrameState {
        slot: index,
        state: slot.state,
        op,
    }
}

/// Owns the swapchain, its render targets and the per-image frame slots for
/// one surface.
///
/// Slot `i` serves swapchain image `i`. Acquire waits the slot's fence before
/// handing out its command buffer, so a slot is never re-recorded while the
/// GPU still reads it. The image-available semaphore is rotated through a
/// spare because the image index is only known after acquire returns.
///
/// Frames carry the swapchain generation they were acquired under; a rebuild
/// bumps it and any older frame is refused with [`PrestoError::StaleFrame`].
pub struct FrameCycle<G: Gpu> {
    ctx: DeviceContext<G>,
    surface: vk::SurfaceKHR,
    window: Arc<dyn WindowAdapter>,
    config: FrameConfig,

    swapchain: SwapchainState,
    targets: RenderTargets,
    pool: FramePool,
    spare_acquire: vk::Semaphore,
    /// Spares left signaled by an acquire whose frame was never handed out.
    /// Destroyed once the device is idle.
    retired_acquire: Vec<vk::Semaphore>,

    generation: u64,
    paused: bool,
    suboptimal: bool,
    destroyed: bool,
}

impl<G: Gpu> FrameCycle<G> {
    /// Builds the chain, render pass, depth target, framebuffers and slots.
    /// A zero-sized window starts paused with no chain.
    pub fn new(
        ctx: DeviceContext<G>,
        surface: vk::SurfaceKHR,
        window: Arc<dyn WindowAdapter>,
        config: FrameConfig,
    ) -> Result<Self> {
        let depth_format = select_depth_format(&ctx.gpu, &config.depth)?;
        let mut cycle = Self {
            ctx,
            surface,
            window,
            config,
            swapchain: SwapchainState::default(),
            targets: RenderTargets::default(),
            pool: FramePool::default(),
            spare_acquire: vk::Semaphore::null(),
            retired_acquire: Vec::new(),
            generation: 0,
            paused: false,
            suboptimal: false,
            destroyed: false,
        };
        // On error, Drop releases whatever was built.
        cycle.build(depth_format)?;
        Ok(cycle)
    }

    fn build(&mut self, depth_format: Option<vk::Format>) -> Result<()> {
        let plan = plan_swapchain(&self.ctx, self.surface, &self.request(), self.drawable_extent())?;
        self.targets = RenderTargets::new(&self.ctx.gpu, self.config.color_format, depth_format)?;
        self.spare_acquire = self
            .ctx
            .gpu
            .create_semaphore()
            .map_err(PrestoError::resource("acquire semaphore"))?;

        if plan.is_zero_area() {
            warn!("surface has zero area at startup; frames paused");
            self.paused = true;
            return Ok(());
        }
        self.install(&plan)
    }

    fn request(&self) -> SwapchainRequest {
        SwapchainRequest {
            color_format: self.config.color_format,
            present_mode: self.config.present_mode,
            additional_image_count: self.config.additional_image_count,
        }
    }

    fn drawable_extent(&self) -> vk::Extent2D {
        let size = self.window.drawable_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    /// Creates the chain from `plan`, matches the pool to its image count and
    /// builds the size-bound targets.
    fn install(&mut self, plan: &SwapchainPlan) -> Result<()> {
        let gpu = &self.ctx.gpu;
        self.swapchain = SwapchainState::from_plan(gpu, plan)?;

        let count = self.swapchain.image_count();
        if self.pool.len() != count {
            if !self.pool.is_empty() {
                warn!("swapchain image count changed {} -> {count}; recreating frame slots", self.pool.len());
            }
            self.pool.destroy(gpu);
            self.pool = FramePool::create(gpu, count, self.ctx.graphics_family)?;
        }

        self.targets.build_for(gpu, &self.swapchain)?;
        self.paused = false;
        self.suboptimal = false;
        Ok(())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed {
            return Err(PrestoError::Configuration("frame cycle already destroyed".into()));
        }
        Ok(())
    }

    fn check_frame(&self, frame: &Frame) -> Result<()> {
        self.ensure_alive()?;
        if frame.generation != self.generation {
            return Err(PrestoError::StaleFrame {
                frame: frame.generation,
                current: self.generation,
            });
        }
        Ok(())
    }

    /// Acquires the next image and returns its frame, ready to record.
    ///
    /// Blocks on the slot fence until the GPU is done with that slot's last
    /// submission. Returns [`PrestoError::SurfaceOutOfDate`] while paused or
    /// when the driver says the chain is stale.
    pub fn acquire_next_frame(&mut self) -> Result<Frame> {
        self.ensure_alive()?;
        if self.paused || !self.swapchain.is_live() {
            return Err(PrestoError::SurfaceOutOfDate);
        }
        if self.spare_acquire == vk::Semaphore::null() {
            self.spare_acquire = self
                .ctx
                .gpu
                .create_semaphore()
                .map_err(PrestoError::resource("acquire semaphore"))?;
        }

        let timeout = self.config.fence_timeout_ns;
        let gpu = &self.ctx.gpu;
        let (image_index, suboptimal) =
            match gpu.acquire_next_image(self.swapchain.handle(), timeout, self.spare_acquire) {
                Ok(acquired) => acquired,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    warn!("acquire: swapchain out of date");
                    return Err(PrestoError::SurfaceOutOfDate);
                }
                Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                    return Err(PrestoError::Timeout("swapchain image"))
                }
                Err(e) => return Err(device_error(e)),
            };
        if suboptimal {
            warn!("acquire: swapchain suboptimal");
            self.suboptimal = true;
        }

        match self.claim_slot(image_index) {
            Ok(slot_index) => {
                trace!("acquired image {image_index}");
                Ok(self.frame_for(slot_index, image_index))
            }
            Err(e) => {
                self.retire_spare();
                Err(e)
            }
        }
    }

    /// Waits the slot serving `image_index` and hands it the spare's signal.
    /// On error the spare is still signaled and the slot is unchanged.
    fn claim_slot(&mut self, image_index: u32) -> Result<usize> {
        let gpu = &self.ctx.gpu;
        let slot_index = image_index as usize;
        let slot = slot_of(&mut self.pool, slot_index)?;
        if matches!(slot.state, SlotState::Acquired | SlotState::Recording) {
            return Err(invalid(slot_index, slot, "acquire"));
        }

        debug!("waiting on fence of slot {slot_index}");
        match gpu.wait_for_fence(slot.fence, self.config.fence_timeout_ns) {
            Ok(()) => {}
            Err(vk::Result::TIMEOUT) => return Err(PrestoError::Timeout("frame fence")),
            Err(e) => return Err(device_error(e)),
        }
        gpu.reset_command_buffer(slot.command_buffer).map_err(device_error)?;

        // The spare now holds this acquire's signal; the slot's old semaphore
        // has retired with the fence and becomes the next spare.
        std::mem::swap(&mut slot.image_available, &mut self.spare_acquire);
        slot.state = SlotState::Acquired;
        Ok(slot_index)
    }

    /// Parks a spare that still carries an unconsumed acquire signal and puts
    /// a fresh one in its place. The image it was acquired for stays held
    /// until the next rebuild.
    fn retire_spare(&mut self) {
        warn!("acquired image abandoned; retiring its semaphore");
        let retired = std::mem::replace(&mut self.spare_acquire, vk::Semaphore::null());
        self.retired_acquire.push(retired);
        match self.ctx.gpu.create_semaphore() {
            Ok(fresh) => self.spare_acquire = fresh,
            Err(e) => error!("replacing acquire semaphore: {e}"),
        }
    }

    /// Device must be idle.
    fn destroy_retired(&mut self) {
        for semaphore in self.retired_acquire.drain(..) {
            self.ctx.gpu.destroy_semaphore(semaphore);
        }
    }

    fn frame_for(&self, slot_index: usize, image_index: u32) -> Frame {
        let slot = &self.pool.slots()[slot_index];
        let (depth_image, depth_image_view, depth_format) = self
            .targets
            .depth()
            .map_or((vk::Image::null(), vk::ImageView::null(), vk::Format::UNDEFINED), |d| {
                (d.image, d.view, d.format)
            });
        Frame {
            slot_index,
            image_index,
            command_buffer: slot.command_buffer,
            command_pool: slot.command_pool,
            framebuffer: self.targets.framebuffers()[slot_index],
            render_pass: self.targets.render_pass(),
            swapchain_image: self.swapchain.images()[slot_index],
            swapchain_image_view: self.swapchain.views()[slot_index],
            swapchain_extent: self.swapchain.extent(),
            depth_image,
            depth_image_view,
            color_format: self.swapchain.format(),
            depth_format,
            image_available_semaphore: slot.image_available,
            render_complete_semaphore: slot.render_complete,
            fence: slot.fence,
            clear_color: self.config.clear_color,
            clear_depth: self.config.clear_depth,
            generation: self.generation,
            recording: false,
        }
    }

    /// Opens the frame's command buffer and marks its slot as recording.
    pub fn begin_recording(&mut self, frame: &mut Frame) -> Result<()> {
        self.check_frame(frame)?;
        let slot = slot_of(&mut self.pool, frame.slot_index)?;
        if slot.state != SlotState::Acquired {
            return Err(invalid(frame.slot_index, slot, "begin recording"));
        }
        frame.begin_command_buffer(&self.ctx.gpu)?;
        slot.state = SlotState::Recording;
        Ok(())
    }

    /// Submits the recorded buffer: waits on image-available at color output,
    /// signals render-complete and the slot fence.
    pub fn submit_frame(&mut self, frame: &Frame) -> Result<()> {
        self.check_frame(frame)?;
        let gpu = &self.ctx.gpu;
        let slot = slot_of(&mut self.pool, frame.slot_index)?;
        if !matches!(slot.state, SlotState::Acquired | SlotState::Recording) {
            return Err(invalid(frame.slot_index, slot, "submit"));
        }
        if frame.recording {
            return Err(PrestoError::InvalidFrameState {
                slot: frame.slot_index,
                state: SlotState::Recording,
                op: "submit an open command buffer",
            });
        }

        // Reset only now: an acquire that fails later must not leave the
        // fence unsignaled with nothing in flight.
        gpu.reset_fence(slot.fence).map_err(device_error)?;
        let submit = SubmitDesc {
            command_buffer: slot.command_buffer,
            wait_semaphore: slot.image_available,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: slot.render_complete,
            fence: slot.fence,
        };
        match gpu.queue_submit(self.ctx.graphics_queue, &submit) {
            Ok(()) => {
                slot.state = SlotState::Submitted;
                Ok(())
            }
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                error!("device lost on submit");
                Err(PrestoError::DeviceLost)
            }
            Err(e) => {
                error!("queue_submit failed: {e}");
                // Nothing will signal the reset fence; swap in a signaled one
                // so the next wait on this slot returns.
                let fresh = gpu
                    .create_fence(true)
                    .map_err(PrestoError::resource("frame fence"))?;
                gpu.destroy_fence(slot.fence);
                slot.fence = fresh;
                Err(PrestoError::Submission(e))
            }
        }
    }

    /// Queues the image for display once render-complete signals.
    pub fn present_frame(&mut self, frame: &Frame) -> Result<PresentStatus> {
        self.check_frame(frame)?;
        let gpu = &self.ctx.gpu;
        let slot = slot_of(&mut self.pool, frame.slot_index)?;
        if slot.state != SlotState::Submitted {
            return Err(invalid(frame.slot_index, slot, "present"));
        }

        let result = gpu.queue_present(
            self.ctx.present_queue,
            self.swapchain.handle(),
            frame.image_index,
            slot.render_complete,
        );
        slot.state = SlotState::Presented;

        let mut status = PresentStatus::from_present_result(result)?;
        if status == PresentStatus::Success && self.suboptimal {
            status = PresentStatus::RecoverableResize;
        }
        match status {
            PresentStatus::Success => trace!("presented image {}", frame.image_index),
            PresentStatus::RecoverableResize => warn!("present: swapchain needs rebuild"),
            PresentStatus::FatalDeviceLost => error!("device lost on present"),
        }
        Ok(status)
    }

    /// Blocks until the device is idle. Presented slots return to idle.
    pub fn wait_for_present(&mut self) -> Result<()> {
        self.ensure_alive()?;
        self.ctx.gpu.device_wait_idle().map_err(device_error)?;
        for slot in self.pool.slots_mut() {
            if slot.state == SlotState::Presented {
                slot.state = SlotState::Idle;
            }
        }
        Ok(())
    }

    /// Rebuilds the chain at the window's current size. Returns `false` when
    /// the surface has zero area: the old chain stays and frames pause.
    pub fn rebuild_swapchain(&mut self) -> Result<bool> {
        self.rebuild_with(|_| {})
    }

    /// `before_teardown` runs after the device is idle and before any
    /// size-bound object is destroyed, only if a chain existed.
    pub(crate) fn rebuild_with(&mut self, before_teardown: impl FnOnce(&G)) -> Result<bool> {
        self.ensure_alive()?;
        let plan = plan_swapchain(&self.ctx, self.surface, &self.request(), self.drawable_extent())?;
        if plan.is_zero_area() {
            if !self.paused {
                warn!("surface has zero area; frames paused");
            }
            self.paused = true;
            return Ok(false);
        }

        self.wait_for_present()?;
        self.destroy_retired();
        let gpu = &self.ctx.gpu;
        if self.swapchain.is_live() {
            before_teardown(gpu);
        }
        self.pool.recycle_abandoned(gpu)?;
        self.targets.release_size_bound(gpu);
        self.swapchain.destroy(gpu);
        self.generation += 1;

        self.install(&plan)?;
        info!(
            "swapchain rebuilt: {}x{} generation {}",
            plan.extent().width,
            plan.extent().height,
            self.generation
        );
        Ok(true)
    }

    /// Consumes the window's resize request, or retries a paused chain.
    /// Returns whether a rebuild happened.
    pub fn poll_resize(&mut self) -> Result<bool> {
        if self.window.take_resize() {
            return self.rebuild_swapchain();
        }
        if self.paused {
            return self.rebuild_swapchain();
        }
        Ok(false)
    }

    /// Waits for the device, then releases slots, framebuffers, depth, render
    /// pass, views and chain. The second call does nothing.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        if let Err(e) = self.ctx.gpu.device_wait_idle() {
            warn!("device_wait_idle during teardown: {e}");
        }
        self.destroy_retired();
        let gpu = &self.ctx.gpu;
        self.pool.destroy(gpu);
        self.targets.destroy(gpu);
        self.swapchain.destroy(gpu);
        if self.spare_acquire != vk::Semaphore::null() {
            gpu.destroy_semaphore(self.spare_acquire);
            self.spare_acquire = vk::Semaphore::null();
        }
        info!("frame cycle destroyed");
    }

    pub fn gpu(&self) -> &G {
        &self.ctx.gpu
    }

    pub fn context(&self) -> &DeviceContext<G> {
        &self.ctx
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn window(&self) -> &dyn WindowAdapter {
        self.window.as_ref()
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn swapchain(&self) -> &SwapchainState {
        &self.swapchain
    }

    pub fn targets(&self) -> &RenderTargets {
        &self.targets
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.pool.slot(index).map(FrameSlot::state)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl<G: Gpu> Drop for FrameCycle<G> {
    fn drop(&mut self) {
        self.destroy();
    }
}
