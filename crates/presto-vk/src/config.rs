// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

/// Probe order used by [`DepthMode::Auto`], best first.
pub const DEFAULT_DEPTH_CANDIDATES: [vk::Format; 5] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DepthMode {
    Disabled,
    Auto,
    /// Caller-supplied probe order.
    Prefer(Vec<vk::Format>),
}

impl DepthMode {
    /// `None` when depth is off.
    pub fn candidates(&self) -> Option<&[vk::Format]> {
        match self {
            DepthMode::Disabled => None,
            DepthMode::Auto => Some(&DEFAULT_DEPTH_CANDIDATES),
            DepthMode::Prefer(list) => Some(list),
        }
    }
}

/// Knobs for one frame cycle. `Default` gives an 8-bit BGRA chain under FIFO
/// with one extra image, auto depth and a white clear.
#[derive(Clone, Debug)]
pub struct FrameConfig {
    /// Must be the surface's first reported format.
    pub color_format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub additional_image_count: u32,
    pub depth: DepthMode,
    pub clear_color: [f32; 4],
    pub clear_depth: vk::ClearDepthStencilValue,
    /// Per-wait bound for acquire and slot fences. `u64::MAX` waits forever.
    pub fence_timeout_ns: u64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            color_format: vk::Format::B8G8R8A8_UNORM,
            present_mode: vk::PresentModeKHR::FIFO,
            additional_image_count: 1,
            depth: DepthMode::Auto,
            clear_color: [1.0, 1.0, 1.0, 1.0],
            clear_depth: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
            fence_timeout_ns: u64::MAX,
        }
    }
}

impl FrameConfig {
    pub fn without_depth(mut self) -> Self {
        self.depth = DepthMode::Disabled;
        self
    }
}
