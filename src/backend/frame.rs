// Per-frame resources
//
// One Frame per frame-in-flight slot, one QueueFrame per device queue inside
// it. Command buffers are reset with their pool at the start of a frame and
// handed out again instead of being reallocated.

use std::sync::Arc;

use super::command::{CommandBuffer, CommandPool};
use super::queue::{Queue, QueueKind};
use super::sync::{Fence, Semaphore};
use super::Device;
use crate::error::RenderResult;

pub struct QueueFrame {
    kind: QueueKind,
    queue: Queue,
    pool: CommandPool,
    recording: Vec<CommandBuffer>,
    completed: Vec<CommandBuffer>,
}

impl QueueFrame {
    pub fn new(device: Arc<Device>, kind: QueueKind) -> RenderResult<Self> {
        let queue = device.queue(kind);
        Ok(Self {
            kind,
            queue,
            pool: CommandPool::new(device, kind)?,
            recording: Vec::new(),
            completed: Vec::new(),
        })
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn queue(&self) -> Queue {
        self.queue
    }

    /// Start a new frame. Every buffer this frame used last time must have
    /// finished executing.
    pub fn begin(&mut self) -> RenderResult<()> {
        self.pool.reset()?;
        self.completed.append(&mut self.recording);
        Ok(())
    }

    /// A reset command buffer for this frame, reused when one is available.
    pub fn acquire_command_buffer(&mut self) -> RenderResult<CommandBuffer> {
        let buffer = match self.completed.pop() {
            Some(buffer) => buffer,
            None => {
                let mut allocated = self.pool.allocate(1)?;
                allocated.remove(0)
            }
        };
        self.recording.push(buffer);
        Ok(buffer)
    }

    pub fn recorded(&self) -> &[CommandBuffer] {
        &self.recording
    }

    /// Buffers stay owned by the pool and are reused by the next `begin`.
    pub fn end(&mut self) {
        log::trace!(
            "{:?} queue: {} command buffer(s) this frame",
            self.kind,
            self.recording.len()
        );
    }
}

pub struct Frame {
    pub image_acquired: Semaphore,
    pub rendering_done: Semaphore,
    /// Signaled by each batch submission, reset before the next.
    pub submit_fence: Fence,
    queue_frames: Vec<QueueFrame>,
}

impl Frame {
    pub fn new(device: Arc<Device>) -> RenderResult<Self> {
        let queue_frames = QueueKind::ALL
            .into_iter()
            .map(|kind| QueueFrame::new(device.clone(), kind))
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(Self {
            image_acquired: Semaphore::binary(device.clone())?,
            rendering_done: Semaphore::binary(device.clone())?,
            submit_fence: Fence::new(device, false)?,
            queue_frames,
        })
    }

    pub fn queue_frame(&self, kind: QueueKind) -> &QueueFrame {
        &self.queue_frames[kind.index()]
    }

    pub fn queue_frame_mut(&mut self, kind: QueueKind) -> &mut QueueFrame {
        &mut self.queue_frames[kind.index()]
    }

    pub fn begin(&mut self) -> RenderResult<()> {
        self.queue_frames.iter_mut().try_for_each(QueueFrame::begin)
    }

    pub fn end(&mut self) {
        self.queue_frames.iter_mut().for_each(QueueFrame::end);
    }
}
