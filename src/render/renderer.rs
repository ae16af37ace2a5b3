// Renderer - per-frame graph update, multi-queue submission and present
//
// FRAME FLOW:
// 1. acquire_next_image   swapchain image, signals the frame's image_acquired
// 2. update               graph re-evaluated against that image
// 3. render               each batch recorded, submitted and waited on in
//                         layout order, then the image is presented
//
// Batches synchronize through one timeline semaphore whose values are chosen
// by the render graph. The first batch also waits for the acquired image and
// the last one signals rendering_done, which present waits on.
//
// A frame that fails after its image was acquired leaves that image and the
// slot's binary semaphores unusable. The renderer then refuses to acquire
// again until the swapchain is recreated.

use ash::vk;
use std::ops::Range;
use std::sync::Arc;

use crate::backend::{
    DrawableSize, Device, Frame, GraphicsContext, QueueKind, Semaphore, Swapchain,
};
use crate::error::{RenderError, RenderResult};
use crate::graph::{
    BackBufferDesc, BatchLayout, GraphCreateInfo, GraphStatus, GraphUpdateInfo, RecordInfo,
    RenderGraph,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquired,
    GraphUpdated,
    BatchesRecorded,
    Submitted,
    Presented,
}

/// One queue submission derived from a render graph batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSubmission {
    pub queue_index: u32,
    pub commands: Range<usize>,
    pub timeline_waits: Vec<u64>,
    pub wait_image_acquired: bool,
    pub timeline_signal: Option<u64>,
    pub signal_rendering_done: bool,
}

/// Turns a batch layout into submissions, in layout order.
///
/// An empty layout still yields one submission with no commands so the
/// acquired image is consumed and present has something to wait on.
pub fn plan_submission(
    layout: &BatchLayout,
    queue_count: usize,
) -> RenderResult<Vec<BatchSubmission>> {
    if layout.batches.is_empty() {
        return Ok(vec![BatchSubmission {
            queue_index: QueueKind::Direct.index() as u32,
            commands: 0..0,
            timeline_waits: Vec::new(),
            wait_image_acquired: true,
            timeline_signal: None,
            signal_rendering_done: true,
        }]);
    }

    let last = layout.batches.len() - 1;
    layout
        .batches
        .iter()
        .enumerate()
        .map(|(i, batch)| {
            if batch.queue_index as usize >= queue_count {
                return Err(RenderError::GraphLayoutError(GraphStatus::INDEX_OUT_OF_BOUNDS));
            }
            let waits = layout
                .wait_values(batch)
                .map_err(RenderError::GraphLayoutError)?;
            Ok(BatchSubmission {
                queue_index: batch.queue_index,
                commands: batch.commands.clone(),
                timeline_waits: waits.to_vec(),
                wait_image_acquired: i == 0,
                timeline_signal: Some(batch.signal_fence_value),
                signal_rendering_done: i == last,
            })
        })
        .collect()
}

/// The three steps every batch goes through.
pub trait BatchExecutor {
    /// Record the batch's commands. `None` when there is nothing to record.
    fn record(&mut self, batch: &BatchSubmission) -> RenderResult<Option<vk::CommandBuffer>>;

    fn submit(
        &mut self,
        batch: &BatchSubmission,
        command_buffer: Option<vk::CommandBuffer>,
    ) -> RenderResult<()>;

    /// Block until the submission has finished executing.
    fn wait(&mut self, batch: &BatchSubmission) -> RenderResult<()>;
}

/// Record, submit and wait on each batch strictly in order. Stops at the
/// first error.
pub fn execute_batches<E>(batches: &[BatchSubmission], executor: &mut E) -> RenderResult<()>
where
    E: BatchExecutor + ?Sized,
{
    for batch in batches {
        let command_buffer = executor.record(batch)?;
        executor.submit(batch, command_buffer)?;
        executor.wait(batch)?;
    }
    Ok(())
}

fn queue_kind(queue_index: u32) -> RenderResult<QueueKind> {
    QueueKind::from_index(queue_index)
        .ok_or(RenderError::GraphLayoutError(GraphStatus::INDEX_OUT_OF_BOUNDS))
}

struct VulkanExecutor<'a> {
    device: &'a Device,
    graph: &'a mut dyn RenderGraph,
    frame: &'a mut Frame,
    cycle: &'a mut FrameCycle,
    timeline: vk::Semaphore,
}

impl VulkanExecutor<'_> {
    fn record_batch(&mut self, batch: &BatchSubmission) -> RenderResult<Option<vk::CommandBuffer>> {
        if batch.commands.is_empty() {
            return Ok(None);
        }
        let kind = queue_kind(batch.queue_index)?;
        let buffer = self.frame.queue_frame_mut(kind).acquire_command_buffer()?;
        let device = self.device.raw();

        buffer.begin(device, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        self.graph
            .record_commands(&RecordInfo {
                command_buffer: buffer.handle(),
                commands: batch.commands.clone(),
                frame_index: self.cycle.frame_index,
            })
            .map_err(RenderError::GraphRecordFailed)?;
        buffer.end(device)?;

        Ok(Some(buffer.handle()))
    }
}

impl BatchExecutor for VulkanExecutor<'_> {
    fn record(&mut self, batch: &BatchSubmission) -> RenderResult<Option<vk::CommandBuffer>> {
        let command_buffer = self.record_batch(batch)?;
        if batch.signal_rendering_done {
            self.cycle.state = FrameState::BatchesRecorded;
        }
        Ok(command_buffer)
    }

    fn submit(
        &mut self,
        batch: &BatchSubmission,
        command_buffer: Option<vk::CommandBuffer>,
    ) -> RenderResult<()> {
        let kind = queue_kind(batch.queue_index)?;

        // Binary semaphores ignore their timeline value slot.
        let mut wait_semaphores = vec![self.timeline; batch.timeline_waits.len()];
        let mut wait_values = batch.timeline_waits.clone();
        if batch.wait_image_acquired {
            wait_semaphores.push(self.frame.image_acquired.handle());
            wait_values.push(0);
        }
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait_semaphores.len()];

        let mut signal_semaphores = Vec::with_capacity(2);
        let mut signal_values = Vec::with_capacity(2);
        if let Some(value) = batch.timeline_signal {
            signal_semaphores.push(self.timeline);
            signal_values.push(value);
        }
        if batch.signal_rendering_done {
            signal_semaphores.push(self.frame.rendering_done.handle());
            signal_values.push(0);
        }

        let command_buffers: Vec<_> = command_buffer.into_iter().collect();
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        self.frame.submit_fence.reset()?;
        self.device
            .submit_batch(kind, std::slice::from_ref(&submit), &self.frame.submit_fence)?;

        if batch.signal_rendering_done {
            self.cycle.state = FrameState::Submitted;
        }
        Ok(())
    }

    fn wait(&mut self, _batch: &BatchSubmission) -> RenderResult<()> {
        self.frame.submit_fence.wait()
    }
}

/// Frame counters and the per-frame state machine.
#[derive(Debug)]
struct FrameCycle {
    state: FrameState,
    slot: usize,
    slots: usize,
    frame_index: u64,
    last_submitted: Option<u64>,
    completed: Option<u64>,
    /// A frame acquired an image and never presented it.
    frame_lost: bool,
}

impl FrameCycle {
    fn new(slots: usize) -> Self {
        Self {
            state: FrameState::Idle,
            slot: 0,
            slots: slots.max(1),
            frame_index: 0,
            last_submitted: None,
            completed: None,
            frame_lost: false,
        }
    }

    fn out_of_order(&self, expected: FrameState) -> RenderError {
        RenderError::FrameOutOfOrder {
            expected,
            found: self.state,
        }
    }

    fn check_acquire(&self) -> RenderResult<()> {
        if self.frame_lost {
            return Err(RenderError::FrameLost);
        }
        match self.state {
            FrameState::Idle | FrameState::Presented => Ok(()),
            _ => Err(self.out_of_order(FrameState::Idle)),
        }
    }

    fn check_update(&self) -> RenderResult<()> {
        match self.state {
            FrameState::Acquired | FrameState::GraphUpdated => Ok(()),
            _ => Err(self.out_of_order(FrameState::Acquired)),
        }
    }

    fn check_render(&self) -> RenderResult<()> {
        match self.state {
            FrameState::GraphUpdated => Ok(()),
            _ => Err(self.out_of_order(FrameState::GraphUpdated)),
        }
    }

    /// Every batch of the current frame has finished on the GPU.
    fn frame_completed(&mut self) {
        self.last_submitted = Some(self.frame_index);
        self.completed = Some(self.frame_index);
    }

    fn presented(&mut self) {
        self.state = FrameState::Presented;
        self.advance();
    }

    fn advance(&mut self) {
        self.frame_index += 1;
        self.slot = (self.slot + 1) % self.slots;
    }

    /// A step of the current frame failed.
    fn fail(&mut self) {
        match self.state {
            FrameState::Idle | FrameState::Presented => {}
            // Graph timeline values are spent; the next frame must not reuse the index.
            FrameState::Submitted => {
                self.frame_lost = true;
                self.advance();
            }
            _ => self.frame_lost = true,
        }
        self.state = FrameState::Idle;
    }

    fn reset(&mut self, slots: usize) {
        self.slots = slots.max(1);
        self.slot = 0;
        self.state = FrameState::Idle;
        self.frame_lost = false;
    }
}

pub struct Renderer {
    // Dropped first: the graph may reference device objects
    graph: Box<dyn RenderGraph>,
    frames: Vec<Frame>,
    timeline: Semaphore,
    swapchain: Swapchain,
    device: Arc<Device>,
    cycle: FrameCycle,
}

impl Renderer {
    pub fn new(
        device: Arc<Device>,
        swapchain: Swapchain,
        frames_in_flight: usize,
    ) -> RenderResult<Self> {
        let graph_device = device
            .graph_device()
            .ok_or(RenderError::GraphCreationFailed(GraphStatus::INVALID_OPERATION))?;
        let queue_flags = device.queue_capabilities();
        let graph = graph_device
            .create_graph(&GraphCreateInfo {
                queue_flags: &queue_flags,
            })
            .map_err(RenderError::GraphCreationFailed)?;

        let frames = Self::create_frames(&device, frames_in_flight)?;
        let timeline = Semaphore::timeline(device.clone(), 0)?;

        log::info!(
            "Renderer created: {} frame(s) in flight, {} swapchain images",
            frames.len(),
            swapchain.images().len()
        );

        Ok(Self {
            cycle: FrameCycle::new(frames.len()),
            graph,
            frames,
            timeline,
            swapchain,
            device,
        })
    }

    fn create_frames(device: &Arc<Device>, count: usize) -> RenderResult<Vec<Frame>> {
        (0..count.max(1)).map(|_| Frame::new(device.clone())).collect()
    }

    /// Acquire the swapchain image this frame renders into.
    ///
    /// Fails with `FrameLost` after a frame was abandoned mid-way; call
    /// `recreate_swapchain` first.
    pub fn acquire_next_image(&mut self) -> RenderResult<u32> {
        self.cycle.check_acquire()?;
        let frame = &self.frames[self.cycle.slot];
        let index = self.swapchain.next_image(&frame.image_acquired)?;
        self.cycle.state = FrameState::Acquired;
        Ok(index)
    }

    /// Rebind the graph's external resources for the current frame. Must run
    /// after `acquire_next_image` and before `render`.
    pub fn update(&mut self) -> RenderResult<()> {
        self.cycle.check_update()?;
        match self.update_graph() {
            Ok(()) => {
                self.cycle.state = FrameState::GraphUpdated;
                Ok(())
            }
            Err(e) => {
                self.cycle.fail();
                Err(e)
            }
        }
    }

    fn update_graph(&mut self) -> RenderResult<()> {
        let images = self.swapchain.images();
        let info = GraphUpdateInfo {
            frame_index: self.cycle.frame_index,
            gpu_completed_frame_index: self.cycle.completed,
            back_buffers: images,
            back_buffer_index: self.swapchain.current_image_index(),
            back_buffer_desc: BackBufferDesc {
                format: self.swapchain.format(),
                extent: self.swapchain.extent(),
                temporal_layers: images.len() as u32,
            },
        };
        self.graph
            .update(&info)
            .map_err(RenderError::GraphUpdateFailed)
    }

    /// Record and submit every batch of the current layout, then present.
    /// On error the frame is lost and the swapchain must be recreated.
    pub fn render(&mut self) -> RenderResult<()> {
        self.cycle.check_render()?;
        let result = self.render_frame();
        if result.is_err() {
            self.cycle.fail();
        }
        result
    }

    fn render_frame(&mut self) -> RenderResult<()> {
        let layout = self
            .graph
            .batch_layout()
            .map_err(RenderError::GraphLayoutError)?;
        let plan = plan_submission(&layout, QueueKind::ALL.len())?;

        let slot = self.cycle.slot;
        self.frames[slot].begin()?;

        let mut executor = VulkanExecutor {
            device: &self.device,
            graph: self.graph.as_mut(),
            frame: &mut self.frames[slot],
            cycle: &mut self.cycle,
            timeline: self.timeline.handle(),
        };
        execute_batches(&plan, &mut executor)?;
        self.frames[slot].end();

        // Every batch has been waited on, so the GPU is done with this frame.
        self.cycle.frame_completed();
        log::trace!(
            "frame {}: {} batch(es) submitted",
            self.cycle.frame_index,
            plan.len()
        );

        let rendering_done = [self.frames[slot].rendering_done.handle()];
        self.swapchain
            .present(self.device.queue(QueueKind::Direct), &rendering_done)?;

        self.cycle.presented();
        Ok(())
    }

    /// The swapchain is suboptimal or a frame was lost; recreate before the
    /// next acquire.
    pub fn needs_recreation(&self) -> bool {
        self.cycle.frame_lost || self.swapchain.is_suboptimal()
    }

    /// Rebuild the swapchain after a resize, an out-of-date error or a lost
    /// frame.
    pub fn recreate_swapchain(
        &mut self,
        context: &GraphicsContext,
        window: &dyn DrawableSize,
    ) -> RenderResult<()> {
        self.device.wait_idle()?;
        let swapchain = Swapchain::new(context, self.device.clone(), window, Some(&self.swapchain))?;
        self.swapchain = swapchain;

        // A lost frame can leave binary semaphores signaled; start clean.
        self.frames = Self::create_frames(&self.device, self.frames.len())?;
        self.cycle.reset(self.frames.len());
        Ok(())
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn state(&self) -> FrameState {
        self.cycle.state
    }

    /// Index of the next frame to be rendered.
    pub fn frame_index(&self) -> u64 {
        self.cycle.frame_index
    }

    pub fn last_submitted_frame(&self) -> Option<u64> {
        self.cycle.last_submitted
    }

    /// Most recent frame whose GPU work has finished.
    pub fn completed_frame(&self) -> Option<u64> {
        self.cycle.completed
    }

    pub fn timeline_value(&self) -> RenderResult<u64> {
        self.timeline.counter_value()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
    }
}
