// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{PrestoError, Result};
use crate::frame_pool::SlotState;
use crate::gpu::Gpu;

/// Everything one frame records against. Handed out by acquire and valid
/// until the swapchain is rebuilt.
#[derive(Clone, Debug)]
pub struct Frame {
    pub slot_index: usize,
    pub image_index: u32,
    pub command_buffer: vk::CommandBuffer,
    pub command_pool: vk::CommandPool,
    pub framebuffer: vk::Framebuffer,
    pub render_pass: vk::RenderPass,
    pub swapchain_image: vk::Image,
    pub swapchain_image_view: vk::ImageView,
    pub swapchain_extent: vk::Extent2D,
    /// Null without depth.
    pub depth_image: vk::Image,
    pub depth_image_view: vk::ImageView,
    pub color_format: vk::Format,
    /// `UNDEFINED` without depth.
    pub depth_format: vk::Format,
    pub image_available_semaphore: vk::Semaphore,
    pub render_complete_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
    pub clear_color: [f32; 4],
    pub clear_depth: vk::ClearDepthStencilValue,
    pub(crate) generation: u64,
    pub(crate) recording: bool,
}

impl Frame {
    pub fn has_depth(&self) -> bool {
        self.depth_image_view != vk::ImageView::null()
    }

    /// Color first, then depth when the pass has a depth attachment.
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        let mut values = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];
        if self.has_depth() {
            values.push(vk::ClearValue {
                depth_stencil: self.clear_depth,
            });
        }
        values
    }

    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.swapchain_extent,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn begin_command_buffer<G: Gpu>(&mut self, gpu: &G) -> Result<()> {
        if self.recording {
            return Err(self.state_error(SlotState::Recording, "begin recording"));
        }
        gpu.begin_command_buffer(self.command_buffer)?;
        self.recording = true;
        Ok(())
    }

    pub fn end_command_buffer<G: Gpu>(&mut self, gpu: &G) -> Result<()> {
        if !self.recording {
            return Err(self.state_error(SlotState::Acquired, "end recording"));
        }
        gpu.end_command_buffer(self.command_buffer)?;
        self.recording = false;
        Ok(())
    }

    /// Begins the frame's pass over its framebuffer with [`Frame::clear_values`].
    pub fn begin_render_pass<G: Gpu>(&self, gpu: &G) -> Result<()> {
        if !self.recording {
            return Err(self.state_error(SlotState::Acquired, "begin render pass"));
        }
        gpu.cmd_begin_render_pass(
            self.command_buffer,
            self.render_pass,
            self.framebuffer,
            self.swapchain_extent,
            &self.clear_values(),
        );
        Ok(())
    }

    pub fn end_render_pass<G: Gpu>(&self, gpu: &G) {
        gpu.cmd_end_render_pass(self.command_buffer);
    }

    fn state_error(&self, state: SlotState, op: &'static str) -> PrestoError {
        PrestoError::InvalidFrameState {
            slot: self.slot_index,
            state,
            op,
        }
    }
}
