// Render graph programs
//
// A program is a closure re-evaluated every frame. It declares passes against
// the imported back buffer (and any resources it creates), stating which queue
// class each pass runs on and which resources it reads and writes. The
// scheduler turns those declarations into batches.

use ash::vk;
use std::sync::Arc;

pub type Program = Arc<dyn Fn(&mut GraphBuilder, &GraphArgs) + Send + Sync>;

pub(crate) type RecordFn = Box<dyn Fn(&PassContext<'_>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueClass {
    Graphics,
    Compute,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackBuffer {
    pub image: vk::Image,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Per-frame arguments visible to a program.
#[derive(Debug, Clone, Copy)]
pub struct GraphArgs {
    pub frame_index: u64,
    pub gpu_completed_frame_index: Option<u64>,
    pub back_buffer: BackBuffer,
    pub back_buffer_index: u32,
    pub temporal_layers: u32,
}

pub(crate) struct PassNode {
    pub name: String,
    pub class: QueueClass,
    pub reads: Vec<ResourceId>,
    pub writes: Vec<ResourceId>,
    pub record: RecordFn,
}

pub struct GraphBuilder {
    resources: Vec<String>,
    passes: Vec<PassNode>,
}

impl GraphBuilder {
    pub(crate) fn new() -> Self {
        Self {
            resources: vec!["back_buffer".to_string()],
            passes: Vec::new(),
        }
    }

    /// The swapchain image being rendered this frame.
    pub fn back_buffer(&self) -> ResourceId {
        ResourceId(0)
    }

    /// Declares a graph-local resource used only for dependency tracking.
    pub fn create_resource(&mut self, name: &str) -> ResourceId {
        self.resources.push(name.to_string());
        ResourceId(self.resources.len() - 1)
    }

    pub fn resource_name(&self, id: ResourceId) -> Option<&str> {
        self.resources.get(id.0).map(String::as_str)
    }

    /// Starts a pass. It is added to the graph once `record` is called.
    pub fn add_pass(&mut self, name: &str, class: QueueClass) -> PassBuilder<'_> {
        PassBuilder {
            graph: self,
            name: name.to_string(),
            class,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub(crate) fn into_passes(self) -> Vec<PassNode> {
        self.passes
    }
}

#[must_use = "a pass is only added once `record` is called"]
pub struct PassBuilder<'a> {
    graph: &'a mut GraphBuilder,
    name: String,
    class: QueueClass,
    reads: Vec<ResourceId>,
    writes: Vec<ResourceId>,
}

impl PassBuilder<'_> {
    pub fn reads(mut self, resource: ResourceId) -> Self {
        self.reads.push(resource);
        self
    }

    pub fn writes(mut self, resource: ResourceId) -> Self {
        self.writes.push(resource);
        self
    }

    pub fn record<F>(self, record: F)
    where
        F: Fn(&PassContext<'_>) + Send + Sync + 'static,
    {
        self.graph.passes.push(PassNode {
            name: self.name,
            class: self.class,
            reads: self.reads,
            writes: self.writes,
            record: Box::new(record),
        });
    }
}

/// What a pass sees while its commands are recorded.
pub struct PassContext<'a> {
    pub device: &'a ash::Device,
    pub command_buffer: vk::CommandBuffer,
    pub frame_index: u64,
    pub back_buffer: BackBuffer,
    pub(crate) flip_viewport: bool,
}

impl PassContext<'_> {
    pub fn viewport(&self) -> vk::Viewport {
        full_viewport(self.back_buffer.extent, self.flip_viewport)
    }

    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.back_buffer.extent,
        }
    }
}

fn full_viewport(extent: vk::Extent2D, flip: bool) -> vk::Viewport {
    let (y, height) = if flip {
        (extent.height as f32, -(extent.height as f32))
    } else {
        (0.0, extent.height as f32)
    };
    vk::Viewport {
        x: 0.0,
        y,
        width: extent.width as f32,
        height,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}
