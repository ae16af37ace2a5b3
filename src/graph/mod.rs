// Render graph boundary
//
// The renderer talks to a render-graph runtime through three traits:
// - RenderGraphRuntime binds the runtime to a logical device
// - GraphDevice creates graphs against a fixed queue capability set
// - RenderGraph is updated, laid out into batches and recorded every frame
//
// A graph is destroyed by dropping it. The built-in runtime lives in `builtin`
// and is programmed through `builder`.

pub mod builder;
pub mod builtin;
pub mod host;
pub mod schedule;

use ash::vk;
use std::fmt;
use std::ops::Range;

pub use builder::{GraphArgs, GraphBuilder, PassContext, Program, QueueClass, ResourceId};
pub use builtin::BuiltinRuntime;
pub use host::HostAllocator;

/// Status code returned by a render-graph backend. Negative values are failures.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphStatus(pub i32);

impl GraphStatus {
    pub const OK: Self = Self(0);
    pub const UNSPECIFIED: Self = Self(-1);
    pub const INVALID_ARGUMENTS: Self = Self(-2);
    pub const OUT_OF_MEMORY: Self = Self(-3);
    pub const INDEX_OUT_OF_BOUNDS: Self = Self(-4);
    pub const INTEGER_OVERFLOW: Self = Self(-5);
    pub const INVALID_OPERATION: Self = Self(-6);
    pub const INVALID_PROGRAM: Self = Self(-7);
    pub const API_ERROR: Self = Self(-8);

    pub fn is_failure(self) -> bool {
        self.0 < 0
    }

    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::OK => "OK",
            Self::UNSPECIFIED => "UNSPECIFIED",
            Self::INVALID_ARGUMENTS => "INVALID_ARGUMENTS",
            Self::OUT_OF_MEMORY => "OUT_OF_MEMORY",
            Self::INDEX_OUT_OF_BOUNDS => "INDEX_OUT_OF_BOUNDS",
            Self::INTEGER_OVERFLOW => "INTEGER_OVERFLOW",
            Self::INVALID_OPERATION => "INVALID_OPERATION",
            Self::INVALID_PROGRAM => "INVALID_PROGRAM",
            Self::API_ERROR => "API_ERROR",
            _ => return None,
        })
    }
}

impl fmt::Display for GraphStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "status {}", self.0),
        }
    }
}

impl fmt::Debug for GraphStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

pub type GraphResult<T> = Result<T, GraphStatus>;

/// Native handles and host services handed to a runtime when it is bound.
#[derive(Clone)]
pub struct DeviceBinding {
    pub instance: ash::Instance,
    /// Loaded device function table.
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub host: HostAllocator,
    /// Keep Vulkan's native viewport orientation (y pointing down).
    pub flip_viewport: bool,
}

pub trait RenderGraphRuntime: Send + Sync {
    fn bind_device(&self, binding: &DeviceBinding) -> GraphResult<Box<dyn GraphDevice>>;
}

pub trait GraphDevice: Send + Sync {
    fn create_graph(&self, info: &GraphCreateInfo<'_>) -> GraphResult<Box<dyn RenderGraph>>;
}

pub trait RenderGraph: Send {
    /// Re-evaluates the graph for a new frame.
    fn update(&mut self, info: &GraphUpdateInfo<'_>) -> GraphResult<()>;

    /// Batches produced by the last successful `update`.
    fn batch_layout(&self) -> GraphResult<BatchLayout>;

    /// Records `info.commands` into an already-begun command buffer.
    fn record_commands(&mut self, info: &RecordInfo) -> GraphResult<()>;
}

pub struct GraphCreateInfo<'a> {
    /// Capabilities of each queue the graph may schedule onto, by queue index.
    pub queue_flags: &'a [vk::QueueFlags],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackBufferDesc {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    /// Number of swapchain images backing the back buffer.
    pub temporal_layers: u32,
}

pub struct GraphUpdateInfo<'a> {
    pub frame_index: u64,
    /// Most recent frame the GPU has finished, if any.
    pub gpu_completed_frame_index: Option<u64>,
    pub back_buffers: &'a [vk::Image],
    pub back_buffer_index: u32,
    pub back_buffer_desc: BackBufferDesc,
}

#[derive(Debug, Clone)]
pub struct RecordInfo {
    pub command_buffer: vk::CommandBuffer,
    pub commands: Range<usize>,
    pub frame_index: u64,
}

/// A contiguous run of commands for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    pub queue_index: u32,
    pub commands: Range<usize>,
    /// Range into `BatchLayout::wait_fence_values`.
    pub wait_fences: Range<usize>,
    pub signal_fence_value: u64,
}

/// Per-frame submission plan. Batches are in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchLayout {
    pub batches: Vec<CommandBatch>,
    pub wait_fence_values: Vec<u64>,
}

impl BatchLayout {
    pub fn wait_values(&self, batch: &CommandBatch) -> GraphResult<&[u64]> {
        self.wait_fence_values
            .get(batch.wait_fences.clone())
            .ok_or(GraphStatus::INDEX_OUT_OF_BOUNDS)
    }
}
