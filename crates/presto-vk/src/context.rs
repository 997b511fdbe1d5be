// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::gpu::Gpu;

/// Borrowed view of an already-initialized device. Owns nothing: dropping it
/// destroys no Vulkan objects.
pub struct DeviceContext<G: Gpu> {
    pub gpu: G,
    pub physical_device: vk::PhysicalDevice,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub graphics_family: u32,
    pub present_family: u32,
}
