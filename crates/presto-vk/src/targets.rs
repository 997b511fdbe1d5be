// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{debug, error, info};

use crate::config::DepthMode;
use crate::error::{PrestoError, Result};
use crate::gpu::{Gpu, ImageDesc, RenderPassDesc};
use crate::swapchain::SwapchainState;

/// First candidate usable as an optimal-tiling depth/stencil attachment.
/// `Ok(None)` when depth is disabled.
pub fn select_depth_format<G: Gpu>(gpu: &G, mode: &DepthMode) -> Result<Option<vk::Format>> {
    let Some(candidates) = mode.candidates() else {
        return Ok(None);
    };
    candidates
        .iter()
        .copied()
        .find(|&format| {
            gpu.format_properties(format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .map(Some)
        .ok_or_else(|| {
            error!("none of {candidates:?} can be a depth attachment");
            PrestoError::Resource {
                what: "depth format",
                result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            }
        })
}

/// Index of the first memory type allowed by `type_bits` whose flags include
/// all of `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::S8_UINT
    )
}

pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Depth image, its backing memory and view. Null handles once destroyed.
#[derive(Debug)]
pub struct DepthTarget {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

impl DepthTarget {
    fn empty(format: vk::Format) -> Self {
        Self {
            image: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            format,
        }
    }

    pub fn create<G: Gpu>(gpu: &G, extent: vk::Extent2D, format: vk::Format) -> Result<Self> {
        let mut target = Self::empty(format);
        if let Err(e) = target.populate(gpu, extent) {
            target.destroy(gpu);
            return Err(e);
        }
        Ok(target)
    }

    fn populate<G: Gpu>(&mut self, gpu: &G, extent: vk::Extent2D) -> Result<()> {
        self.image = gpu
            .create_image(&ImageDesc {
                extent,
                format: self.format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            })
            .map_err(PrestoError::resource("depth image"))?;

        let req = gpu.image_memory_requirements(self.image);
        let type_index = find_memory_type(
            &gpu.memory_properties(),
            req.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .ok_or(PrestoError::Resource {
            what: "depth memory type",
            result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        })?;

        self.memory = gpu
            .allocate_memory(req.size, type_index)
            .map_err(PrestoError::resource("depth memory"))?;
        gpu.bind_image_memory(self.image, self.memory)
            .map_err(PrestoError::resource("depth memory binding"))?;
        self.view = gpu
            .create_image_view(self.image, self.format, depth_aspect(self.format))
            .map_err(PrestoError::resource("depth view"))?;
        Ok(())
    }

    /// View, image, memory. Safe to call twice.
    pub fn destroy<G: Gpu>(&mut self, gpu: &G) {
        if self.view != vk::ImageView::null() {
            gpu.destroy_image_view(self.view);
            self.view = vk::ImageView::null();
        }
        if self.image != vk::Image::null() {
            gpu.destroy_image(self.image);
            self.image = vk::Image::null();
        }
        if self.memory != vk::DeviceMemory::null() {
            gpu.free_memory(self.memory);
            self.memory = vk::DeviceMemory::null();
        }
    }
}

/// Single-subpass pass: color cleared and kept for present, optional depth
/// cleared and kept.
pub fn render_pass_desc(color_format: vk::Format, depth_format: Option<vk::Format>) -> RenderPassDesc {
    let mut attachments = vec![vk::AttachmentDescription {
        format: color_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }];

    let depth_ref = depth_format.map(|format| {
        attachments.push(vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::CLEAR,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        });
        vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    });

    // Color writes wait for the presentation engine to finish reading the image.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::MEMORY_READ,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dependency_flags: vk::DependencyFlags::BY_REGION,
    };

    RenderPassDesc {
        attachments,
        color_ref: vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        },
        depth_ref,
        dependencies: vec![dependency],
    }
}

/// One framebuffer per color view, each sharing the depth view if any.
pub fn create_framebuffers<G: Gpu>(
    gpu: &G,
    render_pass: vk::RenderPass,
    color_views: &[vk::ImageView],
    depth_view: Option<vk::ImageView>,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(color_views.len());
    for &view in color_views {
        let mut attachments = vec![view];
        attachments.extend(depth_view);
        match gpu.create_framebuffer(render_pass, &attachments, extent) {
            Ok(fb) => framebuffers.push(fb),
            Err(result) => {
                destroy_framebuffers(gpu, &mut framebuffers);
                return Err(PrestoError::resource("framebuffer")(result));
            }
        }
    }
    Ok(framebuffers)
}

pub fn destroy_framebuffers<G: Gpu>(gpu: &G, framebuffers: &mut Vec<vk::Framebuffer>) {
    for fb in framebuffers.drain(..) {
        gpu.destroy_framebuffer(fb);
    }
}

/// Render pass for the chain's lifetime plus the size-bound depth target and
/// framebuffers, rebuilt with each swapchain.
#[derive(Debug)]
pub struct RenderTargets {
    render_pass: vk::RenderPass,
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
    depth: Option<DepthTarget>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl Default for RenderTargets {
    fn default() -> Self {
        Self {
            render_pass: vk::RenderPass::null(),
            color_format: vk::Format::UNDEFINED,
            depth_format: None,
            depth: None,
            framebuffers: Vec::new(),
        }
    }
}

impl RenderTargets {
    pub fn new<G: Gpu>(gpu: &G, color_format: vk::Format, depth_format: Option<vk::Format>) -> Result<Self> {
        let desc = render_pass_desc(color_format, depth_format);
        let render_pass = gpu
            .create_render_pass(&desc)
            .map_err(PrestoError::resource("render pass"))?;
        debug!(
            "render pass: {:?} depth={:?}",
            color_format, depth_format
        );
        Ok(Self {
            render_pass,
            color_format,
            depth_format,
            ..Self::default()
        })
    }

    /// Creates depth and framebuffers matching `swapchain`. Anything left
    /// from the previous chain must already be released.
    pub fn build_for<G: Gpu>(&mut self, gpu: &G, swapchain: &SwapchainState) -> Result<()> {
        debug_assert!(self.framebuffers.is_empty() && self.depth.is_none());
        if swapchain.format() != self.color_format {
            return Err(PrestoError::Configuration(format!(
                "swapchain format {:?} no longer matches render pass {:?}",
                swapchain.format(),
                self.color_format
            )));
        }
        let extent = swapchain.extent();
        if let Some(format) = self.depth_format {
            self.depth = Some(DepthTarget::create(gpu, extent, format)?);
        }
        let depth_view = self.depth.as_ref().map(|d| d.view);
        match create_framebuffers(gpu, self.render_pass, swapchain.views(), depth_view, extent) {
            Ok(fbs) => self.framebuffers = fbs,
            Err(e) => {
                self.release_size_bound(gpu);
                return Err(e);
            }
        }
        info!(
            "render targets: {} framebuffers at {}x{}",
            self.framebuffers.len(),
            extent.width,
            extent.height
        );
        Ok(())
    }

    /// Framebuffers, then depth. The render pass stays.
    pub fn release_size_bound<G: Gpu>(&mut self, gpu: &G) {
        destroy_framebuffers(gpu, &mut self.framebuffers);
        if let Some(mut depth) = self.depth.take() {
            depth.destroy(gpu);
        }
    }

    /// Safe to call twice.
    pub fn destroy<G: Gpu>(&mut self, gpu: &G) {
        self.release_size_bound(gpu);
        if self.render_pass != vk::RenderPass::null() {
            gpu.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn depth(&self) -> Option<&DepthTarget> {
        self.depth.as_ref()
    }

    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }
}
