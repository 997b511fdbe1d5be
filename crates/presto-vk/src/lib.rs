// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Swapchain lifetime and per-frame synchronization over Vulkan.
//!
//! [`VulkanContext`] brings up a device for a window, [`FrameCycle`] owns the
//! swapchain built on it and runs acquire → record → submit → present, and
//! [`Application`] is how a renderer plugs into that loop.

pub mod app;
pub mod ash_gpu;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod cycle;
pub mod error;
pub mod frame;
pub mod frame_pool;
pub mod gpu;
pub mod surface;
pub mod swapchain;
pub mod targets;

#[cfg(test)]
pub(crate) mod mock;

pub use app::{Application, SwapchainInfo};
pub use ash;
pub use ash_gpu::AshGpu;
pub use bootstrap::{ContextOptions, VulkanContext};
pub use config::{DepthMode, FrameConfig, DEFAULT_DEPTH_CANDIDATES};
pub use context::DeviceContext;
pub use cycle::FrameCycle;
pub use error::{PresentStatus, PrestoError, Result};
pub use frame::Frame;
pub use frame_pool::SlotState;
pub use gpu::Gpu;
