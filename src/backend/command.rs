// Command pools and buffers
//
// Two submission paths exist:
// - `CommandPool::emit_command_buffer` records and submits a one-off buffer
//   and blocks until it finishes. Setup only (uploads, layout transitions).
// - Per-frame work goes through `QueueFrame` pools and `Device::submit_batch`.

use ash::vk;
use std::sync::Arc;

use super::queue::QueueKind;
use super::sync::Fence;
use super::Device;
use crate::error::{RenderResult, VkResultExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBuffer(vk::CommandBuffer);

impl CommandBuffer {
    pub fn handle(self) -> vk::CommandBuffer {
        self.0
    }

    pub fn begin(self, device: &ash::Device, usage: vk::CommandBufferUsageFlags) -> RenderResult<()> {
        let info = vk::CommandBufferBeginInfo::default().flags(usage);
        unsafe { device.begin_command_buffer(self.0, &info) }.describe("vkBeginCommandBuffer")
    }

    pub fn end(self, device: &ash::Device) -> RenderResult<()> {
        unsafe { device.end_command_buffer(self.0) }.describe("vkEndCommandBuffer")
    }
}

pub struct CommandPool {
    handle: vk::CommandPool,
    kind: QueueKind,
    device: Arc<Device>,
}

impl CommandPool {
    /// Pool for the family serving `kind`. Buffers are reset with the pool.
    pub fn new(device: Arc<Device>, kind: QueueKind) -> RenderResult<Self> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.families().family(kind))
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let handle = unsafe { device.raw().create_command_pool(&info, None) }
            .describe("vkCreateCommandPool")?;
        Ok(Self {
            handle,
            kind,
            device,
        })
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn allocate(&self, count: u32) -> RenderResult<Vec<CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        let buffers = unsafe { self.device.raw().allocate_command_buffers(&info) }
            .describe("vkAllocateCommandBuffers")?;
        Ok(buffers.into_iter().map(CommandBuffer).collect())
    }

    pub fn free(&self, buffers: &[CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        let handles: Vec<_> = buffers.iter().map(|b| b.0).collect();
        unsafe { self.device.raw().free_command_buffers(self.handle, &handles) };
    }

    /// Reset every buffer allocated from this pool and return their memory.
    pub fn reset(&self) -> RenderResult<()> {
        unsafe {
            self.device
                .raw()
                .reset_command_pool(self.handle, vk::CommandPoolResetFlags::RELEASE_RESOURCES)
        }
        .describe("vkResetCommandPool")
    }

    /// Record `record` into a fresh buffer, submit it alone to this pool's
    /// queue and block until the GPU has executed it.
    pub fn emit_command_buffer<F>(&self, record: F) -> RenderResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let buffers = self.allocate(1)?;
        let result = self.submit_and_wait(buffers[0], record);
        self.free(&buffers);
        result
    }

    fn submit_and_wait<F>(&self, buffer: CommandBuffer, record: F) -> RenderResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = self.device.raw();
        buffer.begin(device, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record(device, buffer.handle());
        buffer.end(device)?;

        let fence = Fence::new(self.device.clone(), false)?;
        let handles = [buffer.handle()];
        let submit = vk::SubmitInfo::default().command_buffers(&handles);
        unsafe {
            device.queue_submit(
                self.device.queue(self.kind).handle,
                std::slice::from_ref(&submit),
                fence.handle(),
            )
        }
        .describe("vkQueueSubmit")?;
        fence.wait()
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_command_pool(self.handle, None) };
    }
}
