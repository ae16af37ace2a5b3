// Error types for the rendering runtime
//
// Every variant carries the failing operation and the native result code so a
// log line alone is enough to tell what went wrong.

use ash::vk;

use crate::graph::GraphStatus;
use crate::render::FrameState;

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    WindowHandle(String),

    #[error("no suitable GPU found: {reason}")]
    NoDeviceFound { reason: String },

    #[error("device creation failed ({reason}): {result:?}")]
    DeviceCreationFailed { reason: String, result: vk::Result },

    #[error("GPU memory allocator creation failed: {0}")]
    AllocatorCreationFailed(#[source] gpu_allocator::AllocationError),

    #[error("render graph device binding failed: {0}")]
    GraphBindFailed(GraphStatus),

    #[error("render graph creation failed: {0}")]
    GraphCreationFailed(GraphStatus),

    #[error("render graph update failed: {0}")]
    GraphUpdateFailed(GraphStatus),

    #[error("render graph batch layout query failed: {0}")]
    GraphLayoutError(GraphStatus),

    #[error("render graph command recording failed: {0}")]
    GraphRecordFailed(GraphStatus),

    #[error("frame step out of order: expected {expected:?}, renderer is {found:?}")]
    FrameOutOfOrder { expected: FrameState, found: FrameState },

    #[error("a frame failed after its swapchain image was acquired; recreate the swapchain")]
    FrameLost,

    #[error("context was created without a presentation surface")]
    NoSurface,

    #[error("queue family {family} cannot present to the surface")]
    SurfaceUnsupported { family: u32 },

    #[error("swapchain out of date")]
    SwapchainOutOfDate,

    #[error("vkAcquireNextImageKHR: {0:?}")]
    AcquireFailed(vk::Result),

    #[error("vkQueuePresentKHR: {0:?}")]
    PresentFailed(vk::Result),

    #[error("wait timed out")]
    WaitTimedOut,

    #[error("{operation}: {result:?}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl RenderError {
    /// Timeouts leave the waited object intact, so the caller may retry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RenderError::WaitTimedOut)
    }

    /// True when the swapchain has to be recreated before the next frame.
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self,
            RenderError::SwapchainOutOfDate
                | RenderError::FrameLost
                | RenderError::PresentFailed(vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }
}

/// Attaches the name of the Vulkan call to a raw result code.
pub trait VkResultExt<T> {
    fn describe(self, operation: &'static str) -> RenderResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn describe(self, operation: &'static str) -> RenderResult<T> {
        self.map_err(|result| RenderError::Vulkan { operation, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_keeps_operation_and_code() {
        let err = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .describe("vkQueueSubmit")
            .unwrap_err();
        assert_eq!(err.to_string(), "vkQueueSubmit: ERROR_DEVICE_LOST");
    }

    #[test]
    fn out_of_date_covers_acquire_and_present() {
        assert!(RenderError::SwapchainOutOfDate.is_out_of_date());
        assert!(RenderError::PresentFailed(vk::Result::ERROR_OUT_OF_DATE_KHR).is_out_of_date());
        assert!(RenderError::FrameLost.is_out_of_date());
        assert!(!RenderError::PresentFailed(vk::Result::ERROR_SURFACE_LOST_KHR).is_out_of_date());
        assert!(!RenderError::AcquireFailed(vk::Result::ERROR_DEVICE_LOST).is_out_of_date());
    }

    #[test]
    fn only_wait_timeouts_are_retryable() {
        assert!(RenderError::WaitTimedOut.is_timeout());
        assert!(!RenderError::Vulkan {
            operation: "vkWaitForFences",
            result: vk::Result::ERROR_DEVICE_LOST
        }
        .is_timeout());
    }

    #[test]
    fn graph_errors_name_the_status() {
        let err = RenderError::GraphLayoutError(GraphStatus::INDEX_OUT_OF_BOUNDS);
        assert_eq!(
            err.to_string(),
            "render graph batch layout query failed: INDEX_OUT_OF_BOUNDS"
        );
    }
}
