// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

use crate::frame_pool::SlotState;

#[derive(Error, Debug)]
pub enum PrestoError {
    /// The surface or device cannot satisfy a fixed requirement. Fatal at init.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Allocation or object creation failed. Fatal.
    #[error("failed to create {what}: {result}")]
    Resource {
        what: &'static str,
        result: vk::Result,
    },

    /// The graphics queue rejected a submission.
    #[error("queue submission rejected: {0}")]
    Submission(vk::Result),

    #[error("device lost")]
    DeviceLost,

    /// The chain no longer matches the surface; rebuild before the next frame.
    #[error("surface out of date")]
    SurfaceOutOfDate,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("slot {slot} is {state:?}, cannot {op}")]
    InvalidFrameState {
        slot: usize,
        state: SlotState,
        op: &'static str,
    },

    #[error("frame from swapchain generation {frame} used after rebuild (current {current})")]
    StaleFrame { frame: u64, current: u64 },

    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("window error: {0}")]
    Window(String),
}

pub type Result<T> = std::result::Result<T, PrestoError>;

impl PrestoError {
    /// `map_err` adapter for creation calls:
    /// `gpu.create_fence(true).map_err(PrestoError::resource("fence"))?`
    pub fn resource(what: &'static str) -> impl FnOnce(vk::Result) -> PrestoError {
        move |result| match result {
            vk::Result::ERROR_DEVICE_LOST => PrestoError::DeviceLost,
            result => PrestoError::Resource { what, result },
        }
    }

    /// True for the class the frame-loop owner answers with a swapchain rebuild.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PrestoError::SurfaceOutOfDate)
    }

    pub fn is_device_lost(&self) -> bool {
        matches!(self, PrestoError::DeviceLost)
    }
}

/// Outcome of presenting one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Success,
    /// Out of date or suboptimal: rebuild the swapchain, then keep going.
    RecoverableResize,
    FatalDeviceLost,
}

impl PresentStatus {
    /// Classifies a raw present result. Anything that is neither a resize
    /// signal nor device loss stays an error.
    pub fn from_present_result(result: VkResult<bool>) -> Result<Self> {
        match result {
            Ok(false) => Ok(PresentStatus::Success),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::RecoverableResize),
            Err(vk::Result::ERROR_DEVICE_LOST) => Ok(PresentStatus::FatalDeviceLost),
            Err(e) => Err(PrestoError::Vulkan(e)),
        }
    }
}
