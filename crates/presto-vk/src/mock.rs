// SPDX-License-Identifier: CEPL-1.0
//! In-memory [`Gpu`] that records calls, tracks live objects and simulates
//! fence/semaphore signaling closely enough to catch ordering mistakes.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use presto_render::{RenderSize, WindowAdapter};

use crate::context::DeviceContext;
use crate::gpu::{Gpu, ImageDesc, RenderPassDesc, SubmitDesc, SwapchainDesc};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CreateSwapchain {
        min_image_count: u32,
        extent: (u32, u32),
        sharing: vk::SharingMode,
    },
    DestroySwapchain(vk::SwapchainKHR),
    CreateRenderPass {
        attachments: usize,
    },
    DestroyRenderPass(vk::RenderPass),
    CreateFramebuffer {
        attachments: usize,
        extent: (u32, u32),
    },
    DestroyFramebuffer(vk::Framebuffer),
    DestroyImageView(vk::ImageView),
    CreateImage(vk::Format),
    DestroyImage(vk::Image),
    FreeMemory(vk::DeviceMemory),
    DestroyCommandPool(vk::CommandPool),
    DestroyFence(vk::Fence),
    DestroySemaphore(vk::Semaphore),
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    BeginRenderPass {
        framebuffer: vk::Framebuffer,
        clear_values: usize,
    },
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    Acquire {
        image_index: u32,
        semaphore: vk::Semaphore,
    },
    Submit {
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    },
    Present {
        image_index: u32,
        wait: vk::Semaphore,
    },
    WaitIdle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    Unsignaled,
    /// Submitted work not yet retired.
    Pending,
}

pub struct MockState {
    next_handle: u64,
    live: HashMap<&'static str, HashSet<u64>>,
    pub calls: Vec<Call>,
    pub violations: Vec<String>,

    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub depth_features: HashMap<vk::Format, vk::FormatFeatureFlags>,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub image_memory_type_bits: u32,

    /// Overrides the image count a new swapchain gets.
    pub force_image_count: Option<u32>,
    chain_images: HashMap<u64, Vec<vk::Image>>,
    next_acquire: u32,

    pub acquire_script: VecDeque<VkResult<(u32, bool)>>,
    pub present_script: VecDeque<VkResult<bool>>,
    pub submit_script: VecDeque<VkResult<()>>,
    pub fence_wait_script: VecDeque<VkResult<()>>,
    pub fail_framebuffer_at: Option<usize>,
    framebuffers_made: usize,

    pub fences: HashMap<u64, FenceState>,
    signaled_semaphores: HashSet<u64>,
    in_flight_buffers: HashMap<u64, u64>,
}

impl Default for MockState {
    fn default() -> Self {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            ..Default::default()
        };
        memory_properties.memory_types[0].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        memory_properties.memory_types[1].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;

        let mut depth_features = HashMap::new();
        depth_features.insert(
            vk::Format::D32_SFLOAT,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        );
        depth_features.insert(
            vk::Format::D16_UNORM,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        );

        Self {
            next_handle: 0x1000,
            live: HashMap::new(),
            calls: Vec::new(),
            violations: Vec::new(),
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 3,
                current_extent: vk::Extent2D {
                    width: 1280,
                    height: 720,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            depth_features,
            memory_properties,
            image_memory_type_bits: 0b11,
            force_image_count: None,
            chain_images: HashMap::new(),
            next_acquire: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            submit_script: VecDeque::new(),
            fence_wait_script: VecDeque::new(),
            fail_framebuffer_at: None,
            framebuffers_made: 0,
            fences: HashMap::new(),
            signaled_semaphores: HashSet::new(),
            in_flight_buffers: HashMap::new(),
        }
    }
}

impl MockState {
    fn mint<H: Handle>(&mut self, kind: &'static str) -> H {
        self.next_handle += 1;
        self.live.entry(kind).or_default().insert(self.next_handle);
        H::from_raw(self.next_handle)
    }

    fn release<H: Handle + Copy>(&mut self, kind: &'static str, handle: H) {
        if handle.as_raw() == 0 {
            self.violations.push(format!("destroy of null {kind}"));
            return;
        }
        let gone = self
            .live
            .get_mut(kind)
            .is_some_and(|set| set.remove(&handle.as_raw()));
        if !gone {
            self.violations
                .push(format!("destroy of unknown {kind} {:#x}", handle.as_raw()));
        }
    }

    fn check_not_in_flight(&mut self, command_buffer: vk::CommandBuffer, op: &str) {
        if let Some(fence) = self.in_flight_buffers.get(&command_buffer.as_raw()) {
            if self.fences.get(fence) == Some(&FenceState::Pending) {
                self.violations
                    .push(format!("{op} on command buffer still in flight"));
            }
        }
    }
}

#[derive(Default)]
pub struct MockGpu {
    pub state: RefCell<MockState>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.borrow_mut())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    pub fn live(&self, kind: &str) -> usize {
        self.state.borrow().live.get(kind).map_or(0, HashSet::len)
    }

    pub fn live_total(&self) -> usize {
        self.state.borrow().live.values().map(HashSet::len).sum()
    }

    pub fn fence_state(&self, fence: vk::Fence) -> Option<FenceState> {
        self.state.borrow().fences.get(&fence.as_raw()).copied()
    }

    pub fn set_current_extent(&self, width: u32, height: u32) {
        self.with(|s| s.capabilities.current_extent = vk::Extent2D { width, height });
    }
}

impl Gpu for MockGpu {
    fn surface_capabilities(&self, _surface: vk::SurfaceKHR) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.state.borrow().capabilities)
    }

    fn surface_formats(&self, _surface: vk::SurfaceKHR) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state.borrow().formats.clone())
    }

    fn surface_present_modes(&self, _surface: vk::SurfaceKHR) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state.borrow().present_modes.clone())
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let optimal = self
            .state
            .borrow()
            .depth_features
            .get(&format)
            .copied()
            .unwrap_or_default();
        vk::FormatProperties {
            optimal_tiling_features: optimal,
            ..Default::default()
        }
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.state.borrow().memory_properties
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::CreateSwapchain {
            min_image_count: desc.min_image_count,
            extent: (desc.extent.width, desc.extent.height),
            sharing: desc.sharing_mode,
        });
        let chain: vk::SwapchainKHR = s.mint("swapchain");
        let count = s.force_image_count.unwrap_or(desc.min_image_count);
        let images = (0..count)
            .map(|_| {
                s.next_handle += 1;
                vk::Image::from_raw(s.next_handle)
            })
            .collect();
        s.chain_images.insert(chain.as_raw(), images);
        s.next_acquire = 0;
        Ok(chain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.state
            .borrow()
            .chain_images
            .get(&swapchain.as_raw())
            .cloned()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::DestroySwapchain(swapchain));
        s.chain_images.remove(&swapchain.as_raw());
        s.release("swapchain", swapchain);
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView> {
        Ok(self.state.borrow_mut().mint("image_view"))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::DestroyImageView(view));
        s.release("image_view", view);
    }

    fn create_image(&self, desc: &ImageDesc) -> VkResult<vk::Image> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::CreateImage(desc.format));
        Ok(s.mint("image"))
    }

    fn image_memory_requirements(&self, _image: vk::Image) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 4096,
            alignment: 256,
            memory_type_bits: self.state.borrow().image_memory_type_bits,
        }
    }

    fn allocate_memory(&self, _size: vk::DeviceSize, memory_type_index: u32) -> VkResult<vk::DeviceMemory> {
        let mut s = self.state.borrow_mut();
        if memory_type_index >= s.memory_properties.memory_type_count {
            s.violations.push(format!("allocation from bad type {memory_type_index}"));
        }
        Ok(s.mint("memory"))
    }

    fn bind_image_memory(&self, _image: vk::Image, _memory: vk::DeviceMemory) -> VkResult<()> {
        Ok(())
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::DestroyImage(image));
        s.release("image", image);
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::FreeMemory(memory));
        s.release("memory", memory);
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> VkResult<vk::RenderPass> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::CreateRenderPass {
            attachments: desc.attachments.len(),
        });
        Ok(s.mint("render_pass"))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::DestroyRenderPass(render_pass));
        s.release("render_pass", render_pass);
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let mut s = self.state.borrow_mut();
        if s.fail_framebuffer_at == Some(s.framebuffers_made) {
            s.fail_framebuffer_at = None;
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        s.framebuffers_made += 1;
        s.calls.push(Call::CreateFramebuffer {
            attachments: attachments.len(),
            extent: (extent.width, extent.height),
        });
        Ok(s.mint("framebuffer"))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::DestroyFramebuffer(framebuffer));
        s.release("framebuffer", framebuffer);
    }

    fn create_command_pool(&self, _queue_family: u32) -> VkResult<vk::CommandPool> {
        Ok(self.state.borrow_mut().mint("command_pool"))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::DestroyCommandPool(pool));
        s.release("command_pool", pool);
    }

    fn allocate_primary_command_buffer(&self, _pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        // Freed with its pool, so not tracked as live.
        let mut s = self.state.borrow_mut();
        s.next_handle += 1;
        Ok(vk::CommandBuffer::from_raw(s.next_handle))
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::ResetCommandBuffer(command_buffer));
        s.check_not_in_flight(command_buffer, "reset");
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::BeginCommandBuffer(command_buffer));
        s.check_not_in_flight(command_buffer, "begin");
        Ok(())
    }

    fn end_command_buffer(&self, _command_buffer: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        _command_buffer: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        self.state.borrow_mut().calls.push(Call::BeginRenderPass {
            framebuffer,
            clear_values: clear_values.len(),
        });
    }

    fn cmd_end_render_pass(&self, _command_buffer: vk::CommandBuffer) {}

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut s = self.state.borrow_mut();
        let fence: vk::Fence = s.mint("fence");
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        s.fences.insert(fence.as_raw(), state);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::DestroyFence(fence));
        if s.fences.remove(&fence.as_raw()) == Some(FenceState::Pending) {
            s.violations.push("destroyed a fence with work in flight".into());
        }
        s.release("fence", fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::WaitFence(fence));
        if let Some(scripted) = s.fence_wait_script.pop_front() {
            scripted?;
        }
        match s.fences.get(&fence.as_raw()).copied() {
            Some(FenceState::Unsignaled) => Err(vk::Result::TIMEOUT),
            Some(_) => {
                s.fences.insert(fence.as_raw(), FenceState::Signaled);
                Ok(())
            }
            None => {
                s.violations.push("wait on unknown fence".into());
                Err(vk::Result::ERROR_UNKNOWN)
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::ResetFence(fence));
        if s.fences.get(&fence.as_raw()) == Some(&FenceState::Pending) {
            s.violations.push("reset of a fence with work in flight".into());
        }
        s.fences.insert(fence.as_raw(), FenceState::Unsignaled);
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        Ok(self.state.borrow_mut().mint("semaphore"))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::DestroySemaphore(semaphore));
        s.signaled_semaphores.remove(&semaphore.as_raw());
        s.release("semaphore", semaphore);
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.state.borrow_mut();
        let len = s
            .chain_images
            .get(&swapchain.as_raw())
            .map_or(0, |images| images.len() as u32);
        let (image_index, suboptimal) = match s.acquire_script.pop_front() {
            Some(scripted) => scripted?,
            None if len == 0 => return Err(vk::Result::ERROR_OUT_OF_DATE_KHR),
            None => {
                let index = s.next_acquire % len;
                s.next_acquire += 1;
                (index, false)
            }
        };
        if !s.signaled_semaphores.insert(semaphore.as_raw()) {
            s.violations.push("acquire into an already signaled semaphore".into());
        }
        s.calls.push(Call::Acquire {
            image_index,
            semaphore,
        });
        Ok((image_index, suboptimal))
    }

    fn queue_submit(&self, _queue: vk::Queue, submit: &SubmitDesc) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::Submit {
            command_buffer: submit.command_buffer,
            wait: submit.wait_semaphore,
            signal: submit.signal_semaphore,
            fence: submit.fence,
        });
        if let Some(scripted) = s.submit_script.pop_front() {
            scripted?;
        }
        if !s.signaled_semaphores.remove(&submit.wait_semaphore.as_raw()) {
            s.violations.push("submit waits on a semaphore nothing signals".into());
        }
        if !s.signaled_semaphores.insert(submit.signal_semaphore.as_raw()) {
            s.violations.push("submit signals an already signaled semaphore".into());
        }
        if s.fences.get(&submit.fence.as_raw()) != Some(&FenceState::Unsignaled) {
            s.violations.push("submit with a fence that is not reset".into());
        }
        s.fences.insert(submit.fence.as_raw(), FenceState::Pending);
        s.in_flight_buffers
            .insert(submit.command_buffer.as_raw(), submit.fence.as_raw());
        Ok(())
    }

    fn queue_present(
        &self,
        _queue: vk::Queue,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::Present {
            image_index,
            wait: wait_semaphore,
        });
        if !s.signaled_semaphores.remove(&wait_semaphore.as_raw()) {
            s.violations.push("present waits on a semaphore nothing signals".into());
        }
        s.present_script.pop_front().unwrap_or(Ok(false))
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::WaitIdle);
        for state in s.fences.values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
        Ok(())
    }
}

pub fn mock_context(gpu: MockGpu) -> DeviceContext<MockGpu> {
    DeviceContext {
        gpu,
        physical_device: vk::PhysicalDevice::from_raw(1),
        graphics_queue: vk::Queue::from_raw(1),
        present_queue: vk::Queue::from_raw(1),
        graphics_family: 0,
        present_family: 0,
    }
}

pub fn mock_surface() -> vk::SurfaceKHR {
    vk::SurfaceKHR::from_raw(0xabc)
}

/// Window stand-in with a settable size and resize flag.
pub struct TestWindow {
    size: Cell<RenderSize>,
    resize: Cell<bool>,
}

impl TestWindow {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            size: Cell::new(RenderSize::new(width, height)),
            resize: Cell::new(false),
        })
    }

    pub fn resize_to(&self, width: u32, height: u32) {
        self.size.set(RenderSize::new(width, height));
        self.resize.set(true);
    }
}

impl WindowAdapter for TestWindow {
    fn drawable_size(&self) -> RenderSize {
        self.size.get()
    }

    fn take_resize(&self) -> bool {
        self.resize.replace(false)
    }
}
