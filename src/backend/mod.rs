// Backend module - Vulkan abstraction layer
//
// Design: Thin owned wrappers around ash handles. Every wrapper holds an
// Arc<Device> so the device outlives everything created from it.

pub mod command;
pub mod context;
pub mod device;
pub mod frame;
pub mod queue;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use command::{CommandBuffer, CommandPool};
pub use context::{DrawableSize, GraphicsContext};
pub use device::{Device, DeviceSelector, FirstDevice, LargestLocalHeap, PhysicalDeviceCandidate};
pub use frame::{Frame, QueueFrame};
pub use queue::{Queue, QueueFamilyAssignment, QueueKind};
pub use shader::Shader;
pub use swapchain::Swapchain;
pub use sync::{Fence, Semaphore};
