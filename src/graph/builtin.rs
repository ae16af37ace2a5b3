// Built-in render graph runtime
//
// Evaluates a `Program` every update, schedules the declared passes into
// batches and replays each pass's record callback when the renderer asks for
// a command range. Timeline values keep increasing across frames so a single
// timeline semaphore can be shared by every frame in flight.

use ash::vk;
use std::ops::Range;

use super::builder::{BackBuffer, GraphArgs, GraphBuilder, PassContext, PassNode, Program};
use super::schedule::{self, PassAccess};
use super::{
    BatchLayout, DeviceBinding, GraphCreateInfo, GraphDevice, GraphResult, GraphStatus,
    GraphUpdateInfo, HostAllocator, RecordInfo, RenderGraph, RenderGraphRuntime,
};

pub struct BuiltinRuntime {
    program: Program,
}

impl BuiltinRuntime {
    pub fn new(program: Program) -> Self {
        Self { program }
    }
}

impl RenderGraphRuntime for BuiltinRuntime {
    fn bind_device(&self, binding: &DeviceBinding) -> GraphResult<Box<dyn GraphDevice>> {
        (binding.host.print)(format_args!(
            "built-in render graph bound to physical device {:?}",
            binding.physical_device
        ));
        Ok(Box::new(BuiltinDevice {
            device: binding.device.clone(),
            host: binding.host,
            flip_viewport: binding.flip_viewport,
            program: self.program.clone(),
        }))
    }
}

struct BuiltinDevice {
    device: ash::Device,
    host: HostAllocator,
    flip_viewport: bool,
    program: Program,
}

impl GraphDevice for BuiltinDevice {
    fn create_graph(&self, info: &GraphCreateInfo<'_>) -> GraphResult<Box<dyn RenderGraph>> {
        let graph = CompiledGraph::new(self.program.clone(), info.queue_flags)?;
        (self.host.print)(format_args!(
            "render graph created over {} queue(s)",
            info.queue_flags.len()
        ));
        Ok(Box::new(BuiltinGraph {
            device: self.device.clone(),
            flip_viewport: self.flip_viewport,
            compiled: graph,
        }))
    }
}

struct BuiltinGraph {
    device: ash::Device,
    flip_viewport: bool,
    compiled: CompiledGraph,
}

impl RenderGraph for BuiltinGraph {
    fn update(&mut self, info: &GraphUpdateInfo<'_>) -> GraphResult<()> {
        self.compiled.update(info)
    }

    fn batch_layout(&self) -> GraphResult<BatchLayout> {
        self.compiled.layout().cloned()
    }

    fn record_commands(&mut self, info: &RecordInfo) -> GraphResult<()> {
        let back_buffer = self.compiled.back_buffer()?;
        for pass in self.compiled.passes(info.commands.clone())? {
            log::trace!("recording pass '{}'", pass.name);
            let ctx = PassContext {
                device: &self.device,
                command_buffer: info.command_buffer,
                frame_index: info.frame_index,
                back_buffer,
                flip_viewport: self.flip_viewport,
            };
            (pass.record)(&ctx);
        }
        Ok(())
    }
}

/// Device-independent state of a built-in graph.
struct CompiledGraph {
    program: Program,
    queues: Vec<vk::QueueFlags>,
    fence_base: u64,
    passes: Vec<PassNode>,
    layout: BatchLayout,
    args: Option<GraphArgs>,
}

impl CompiledGraph {
    fn new(program: Program, queues: &[vk::QueueFlags]) -> GraphResult<Self> {
        let has_direct = queues
            .first()
            .is_some_and(|flags| flags.contains(vk::QueueFlags::GRAPHICS));
        if !has_direct {
            return Err(GraphStatus::INVALID_ARGUMENTS);
        }
        Ok(Self {
            program,
            queues: queues.to_vec(),
            fence_base: 0,
            passes: Vec::new(),
            layout: BatchLayout::default(),
            args: None,
        })
    }

    fn update(&mut self, info: &GraphUpdateInfo<'_>) -> GraphResult<()> {
        let image = *info
            .back_buffers
            .get(info.back_buffer_index as usize)
            .ok_or(GraphStatus::INDEX_OUT_OF_BOUNDS)?;
        let args = GraphArgs {
            frame_index: info.frame_index,
            gpu_completed_frame_index: info.gpu_completed_frame_index,
            back_buffer: BackBuffer {
                image,
                format: info.back_buffer_desc.format,
                extent: info.back_buffer_desc.extent,
            },
            back_buffer_index: info.back_buffer_index,
            temporal_layers: info.back_buffer_desc.temporal_layers,
        };

        let mut builder = GraphBuilder::new();
        (self.program)(&mut builder, &args);
        let passes = builder.into_passes();

        let access: Vec<PassAccess<'_>> = passes
            .iter()
            .map(|pass| PassAccess {
                class: pass.class,
                reads: &pass.reads,
                writes: &pass.writes,
            })
            .collect();
        let layout = schedule::build_layout(&access, &self.queues, self.fence_base)?;

        if let Some(last) = layout.batches.last() {
            self.fence_base = last.signal_fence_value;
        }
        log::debug!(
            "frame {}: {} pass(es) in {} batch(es)",
            args.frame_index,
            passes.len(),
            layout.batches.len()
        );

        self.passes = passes;
        self.layout = layout;
        self.args = Some(args);
        Ok(())
    }

    fn layout(&self) -> GraphResult<&BatchLayout> {
        match self.args {
            Some(_) => Ok(&self.layout),
            None => Err(GraphStatus::INVALID_OPERATION),
        }
    }

    fn back_buffer(&self) -> GraphResult<BackBuffer> {
        self.args
            .map(|args| args.back_buffer)
            .ok_or(GraphStatus::INVALID_OPERATION)
    }

    fn passes(&self, range: Range<usize>) -> GraphResult<&[PassNode]> {
        self.passes.get(range).ok_or(GraphStatus::INDEX_OUT_OF_BOUNDS)
    }
}
