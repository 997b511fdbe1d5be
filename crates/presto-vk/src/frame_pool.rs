// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::error::{PrestoError, Result};
use crate::gpu::Gpu;

/// Where a slot is in its acquire/record/submit/present cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquired,
    Recording,
    Submitted,
    Presented,
}

/// Resources for one swapchain image. Slot `i` always serves image `i`.
#[derive(Debug)]
pub struct FrameSlot {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    /// Created signaled so the first wait returns immediately.
    pub fence: vk::Fence,
    pub image_available: vk::Semaphore,
    pub render_complete: vk::Semaphore,
    pub(crate) state: SlotState,
}

impl FrameSlot {
    fn empty() -> Self {
        Self {
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            image_available: vk::Semaphore::null(),
            render_complete: vk::Semaphore::null(),
            state: SlotState::Idle,
        }
    }

    fn create<G: Gpu>(gpu: &G, queue_family: u32) -> Result<Self> {
        let mut slot = Self::empty();
        if let Err(e) = slot.populate(gpu, queue_family) {
            slot.destroy_sync(gpu);
            slot.destroy_pool(gpu);
            return Err(e);
        }
        Ok(slot)
    }

    fn populate<G: Gpu>(&mut self, gpu: &G, queue_family: u32) -> Result<()> {
        self.command_pool = gpu
            .create_command_pool(queue_family)
            .map_err(PrestoError::resource("command pool"))?;
        self.command_buffer = gpu
            .allocate_primary_command_buffer(self.command_pool)
            .map_err(PrestoError::resource("command buffer"))?;
        self.fence = gpu
            .create_fence(true)
            .map_err(PrestoError::resource("frame fence"))?;
        self.image_available = gpu
            .create_semaphore()
            .map_err(PrestoError::resource("image-available semaphore"))?;
        self.render_complete = gpu
            .create_semaphore()
            .map_err(PrestoError::resource("render-complete semaphore"))?;
        Ok(())
    }

    fn destroy_sync<G: Gpu>(&mut self, gpu: &G) {
        if self.fence != vk::Fence::null() {
            gpu.destroy_fence(self.fence);
            self.fence = vk::Fence::null();
        }
        for sem in [&mut self.image_available, &mut self.render_complete] {
            if *sem != vk::Semaphore::null() {
                gpu.destroy_semaphore(*sem);
                *sem = vk::Semaphore::null();
            }
        }
    }

    // Frees the command buffer with it.
    fn destroy_pool<G: Gpu>(&mut self, gpu: &G) {
        if self.command_pool != vk::CommandPool::null() {
            gpu.destroy_command_pool(self.command_pool);
            self.command_pool = vk::CommandPool::null();
        }
        self.command_buffer = vk::CommandBuffer::null();
    }

    pub fn state(&self) -> SlotState {
        self.state
    }
}

/// One [`FrameSlot`] per swapchain image.
#[derive(Debug, Default)]
pub struct FramePool {
    slots: Vec<FrameSlot>,
}

impl FramePool {
    pub fn create<G: Gpu>(gpu: &G, image_count: usize, queue_family: u32) -> Result<Self> {
        let mut pool = Self {
            slots: Vec::with_capacity(image_count),
        };
        for _ in 0..image_count {
            match FrameSlot::create(gpu, queue_family) {
                Ok(slot) => {
                    debug!(
                        "slot {}: fence {:?}, command buffer {:?}",
                        pool.slots.len(),
                        slot.fence,
                        slot.command_buffer
                    );
                    pool.slots.push(slot)
                }
                Err(e) => {
                    pool.destroy(gpu);
                    return Err(e);
                }
            }
        }
        debug!("frame pool: {image_count} slots on family {queue_family}");
        Ok(pool)
    }

    /// Sync objects of every slot go before any command pool. Callers make
    /// sure the device is idle first. Safe to call twice.
    pub fn destroy<G: Gpu>(&mut self, gpu: &G) {
        for slot in &mut self.slots {
            slot.destroy_sync(gpu);
        }
        for slot in &mut self.slots {
            slot.destroy_pool(gpu);
        }
        self.slots.clear();
    }

    /// Puts every slot back to idle. A frame acquired but never submitted
    /// leaves image-available signaled; one submitted but never presented
    /// leaves render-complete signaled. Either gets a fresh semaphore.
    /// Device must be idle.
    pub fn recycle_abandoned<G: Gpu>(&mut self, gpu: &G) -> Result<()> {
        for slot in &mut self.slots {
            let stale = match slot.state {
                SlotState::Acquired | SlotState::Recording => &mut slot.image_available,
                SlotState::Submitted => &mut slot.render_complete,
                SlotState::Idle | SlotState::Presented => {
                    slot.state = SlotState::Idle;
                    continue;
                }
            };
            let fresh = gpu
                .create_semaphore()
                .map_err(PrestoError::resource("frame semaphore"))?;
            gpu.destroy_semaphore(*stale);
            *stale = fresh;
            slot.state = SlotState::Idle;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut FrameSlot> {
        self.slots.get_mut(index)
    }

    pub(crate) fn slots_mut(&mut self) -> impl Iterator<Item = &mut FrameSlot> {
        self.slots.iter_mut()
    }
}
