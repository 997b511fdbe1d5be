// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{debug, info, warn};

use crate::context::DeviceContext;
use crate::error::{PrestoError, Result};
use crate::gpu::{Gpu, SwapchainDesc};

/// The parts of `VkSurfaceCapabilitiesKHR` creation depends on.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceCapabilitiesSnapshot {
    pub min_image_count: u32,
    /// 0 = no upper bound.
    pub max_image_count: u32,
    pub current_extent: vk::Extent2D,
    pub min_image_extent: vk::Extent2D,
    pub max_image_extent: vk::Extent2D,
    pub current_transform: vk::SurfaceTransformFlagsKHR,
    pub supported_composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl From<vk::SurfaceCapabilitiesKHR> for SurfaceCapabilitiesSnapshot {
    fn from(caps: vk::SurfaceCapabilitiesKHR) -> Self {
        Self {
            min_image_count: caps.min_image_count,
            max_image_count: caps.max_image_count,
            current_extent: caps.current_extent,
            min_image_extent: caps.min_image_extent,
            max_image_extent: caps.max_image_extent,
            current_transform: caps.current_transform,
            supported_composite_alpha: caps.supported_composite_alpha,
        }
    }
}

impl SurfaceCapabilitiesSnapshot {
    /// The surface lets the swapchain pick its own size.
    pub fn extent_is_deferred(&self) -> bool {
        self.current_extent.width == u32::MAX
    }

    /// Surface extent, or the drawable size clamped to the allowed range when
    /// the surface defers to the swapchain.
    pub fn select_extent(&self, drawable: vk::Extent2D) -> vk::Extent2D {
        if !self.extent_is_deferred() {
            return self.current_extent;
        }
        vk::Extent2D {
            width: drawable
                .width
                .clamp(self.min_image_extent.width, self.max_image_extent.width),
            height: drawable
                .height
                .clamp(self.min_image_extent.height, self.max_image_extent.height),
        }
    }

    pub fn select_image_count(&self, additional: u32) -> u32 {
        let wanted = self.min_image_count.saturating_add(additional);
        if self.max_image_count > 0 {
            wanted.min(self.max_image_count)
        } else {
            wanted
        }
    }

    /// OPAQUE when allowed, otherwise the first mode the surface does allow.
    pub fn composite_alpha(&self) -> vk::CompositeAlphaFlagsKHR {
        [
            vk::CompositeAlphaFlagsKHR::OPAQUE,
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::INHERIT,
        ]
        .into_iter()
        .find(|mode| self.supported_composite_alpha.contains(*mode))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
    }
}

/// Concurrent only when presentation happens on a different family.
pub fn select_sharing(graphics_family: u32, present_family: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics_family == present_family {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![graphics_family, present_family],
        )
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainRequest {
    pub color_format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub additional_image_count: u32,
}

/// Everything validated and chosen, nothing created yet.
#[derive(Clone, Debug)]
pub struct SwapchainPlan {
    pub capabilities: SurfaceCapabilitiesSnapshot,
    pub desc: SwapchainDesc,
}

impl SwapchainPlan {
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Minimized windows report a zero-sized surface; no chain can be built.
    pub fn is_zero_area(&self) -> bool {
        self.desc.extent.width == 0 || self.desc.extent.height == 0
    }
}

/// Queries the surface and settles every creation parameter.
pub fn plan_swapchain<G: Gpu>(
    ctx: &DeviceContext<G>,
    surface: vk::SurfaceKHR,
    request: &SwapchainRequest,
    drawable: vk::Extent2D,
) -> Result<SwapchainPlan> {
    let gpu = &ctx.gpu;
    let caps: SurfaceCapabilitiesSnapshot = gpu.surface_capabilities(surface)?.into();
    let formats = gpu.surface_formats(surface)?;

    let format = match formats.first() {
        Some(first) if first.format == request.color_format => *first,
        Some(first) => {
            return Err(PrestoError::Configuration(format!(
                "surface prefers {:?}, {:?} required",
                first.format, request.color_format
            )))
        }
        None => {
            return Err(PrestoError::Configuration(
                "surface reports no formats".into(),
            ))
        }
    };

    let modes = gpu.surface_present_modes(surface)?;
    if !modes.contains(&request.present_mode) {
        return Err(PrestoError::Configuration(format!(
            "present mode {:?} unsupported (available: {modes:?})",
            request.present_mode
        )));
    }

    let (sharing_mode, queue_family_indices) =
        select_sharing(ctx.graphics_family, ctx.present_family);

    let desc = SwapchainDesc {
        surface,
        min_image_count: caps.select_image_count(request.additional_image_count),
        format,
        extent: caps.select_extent(drawable),
        sharing_mode,
        queue_family_indices,
        pre_transform: caps.current_transform,
        composite_alpha: caps.composite_alpha(),
        present_mode: request.present_mode,
    };
    debug!(
        "swapchain plan: {}x{} min_images={} {:?} {:?}",
        desc.extent.width, desc.extent.height, desc.min_image_count, format.format, sharing_mode
    );
    Ok(SwapchainPlan {
        capabilities: caps,
        desc,
    })
}

/// Presentation chain plus one color view per image. All handles are null
/// after [`SwapchainState::destroy`].
#[derive(Debug)]
pub struct SwapchainState {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    capabilities: Option<SurfaceCapabilitiesSnapshot>,
}

impl Default for SwapchainState {
    fn default() -> Self {
        Self {
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            views: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            capabilities: None,
        }
    }
}

impl SwapchainState {
    /// Creates the chain and one view per image. The plan must not be zero
    /// area; callers pause instead.
    pub fn from_plan<G: Gpu>(gpu: &G, plan: &SwapchainPlan) -> Result<Self> {
        let swapchain = gpu
            .create_swapchain(&plan.desc)
            .map_err(PrestoError::resource("swapchain"))?;

        let mut state = Self {
            swapchain,
            format: plan.desc.format,
            extent: plan.desc.extent,
            present_mode: plan.desc.present_mode,
            capabilities: Some(plan.capabilities),
            ..Self::default()
        };
        if let Err(e) = state.create_views(gpu) {
            state.destroy(gpu);
            return Err(e);
        }

        if state.images.len() as u32 != plan.desc.min_image_count {
            warn!(
                "driver gave {} swapchain images, asked for {}",
                state.images.len(),
                plan.desc.min_image_count
            );
        }
        info!(
            "swapchain: {}x{} images={} {:?}",
            state.extent.width,
            state.extent.height,
            state.images.len(),
            state.present_mode
        );
        Ok(state)
    }

    fn create_views<G: Gpu>(&mut self, gpu: &G) -> Result<()> {
        self.images = gpu.swapchain_images(self.swapchain)?;
        self.views.reserve(self.images.len());
        for &image in &self.images {
            let view = gpu
                .create_image_view(image, self.format.format, vk::ImageAspectFlags::COLOR)
                .map_err(PrestoError::resource("swapchain image view"))?;
            self.views.push(view);
        }
        Ok(())
    }

    /// Views first, then the chain. Safe to call twice.
    pub fn destroy<G: Gpu>(&mut self, gpu: &G) {
        for view in self.views.drain(..) {
            gpu.destroy_image_view(view);
        }
        self.images.clear();
        if self.swapchain != vk::SwapchainKHR::null() {
            gpu.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn is_live(&self) -> bool {
        self.swapchain != vk::SwapchainKHR::null()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn capabilities(&self) -> Option<&SurfaceCapabilitiesSnapshot> {
        self.capabilities.as_ref()
    }
}
