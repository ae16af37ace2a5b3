// Synchronization primitives
//
// Owned fence and semaphore wrappers. A timed-out wait leaves the object
// untouched, so the caller can wait again.

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use super::Device;
use crate::error::{RenderError, RenderResult, VkResultExt};

/// Wait timeout in nanoseconds; durations past `u64::MAX` ns wait forever.
pub fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

pub(crate) fn map_wait_result(
    result: Result<(), vk::Result>,
    operation: &'static str,
) -> RenderResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(RenderError::WaitTimedOut),
        Err(result) => Err(RenderError::Vulkan { operation, result }),
    }
}

pub struct Fence {
    handle: vk::Fence,
    device: Arc<Device>,
}

impl Fence {
    pub fn new(device: Arc<Device>, signaled: bool) -> RenderResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        let handle = unsafe { device.raw().create_fence(&info, None) }.describe("vkCreateFence")?;
        Ok(Self { handle, device })
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    /// Block until signaled.
    pub fn wait(&self) -> RenderResult<()> {
        self.wait_for(Duration::MAX)
    }

    pub fn wait_for(&self, timeout: Duration) -> RenderResult<()> {
        let result = unsafe {
            self.device
                .raw()
                .wait_for_fences(&[self.handle], true, timeout_nanos(timeout))
        };
        map_wait_result(result, "vkWaitForFences")
    }

    pub fn reset(&self) -> RenderResult<()> {
        unsafe { self.device.raw().reset_fences(&[self.handle]) }.describe("vkResetFences")
    }

    pub fn is_signaled(&self) -> RenderResult<bool> {
        unsafe { self.device.raw().get_fence_status(self.handle) }.describe("vkGetFenceStatus")
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_fence(self.handle, None) };
    }
}

pub struct Semaphore {
    handle: vk::Semaphore,
    timeline: bool,
    device: Arc<Device>,
}

impl Semaphore {
    pub fn binary(device: Arc<Device>) -> RenderResult<Self> {
        let info = vk::SemaphoreCreateInfo::default();
        let handle =
            unsafe { device.raw().create_semaphore(&info, None) }.describe("vkCreateSemaphore")?;
        Ok(Self {
            handle,
            timeline: false,
            device,
        })
    }

    pub fn timeline(device: Arc<Device>, initial_value: u64) -> RenderResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let handle =
            unsafe { device.raw().create_semaphore(&info, None) }.describe("vkCreateSemaphore")?;
        Ok(Self {
            handle,
            timeline: true,
            device,
        })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }

    pub fn is_timeline(&self) -> bool {
        self.timeline
    }

    /// Current counter of a timeline semaphore.
    pub fn counter_value(&self) -> RenderResult<u64> {
        debug_assert!(self.timeline);
        unsafe { self.device.raw().get_semaphore_counter_value(self.handle) }
            .describe("vkGetSemaphoreCounterValue")
    }

    /// Host-side wait until the timeline reaches `value`.
    pub fn wait_value(&self, value: u64, timeout: Duration) -> RenderResult<()> {
        debug_assert!(self.timeline);
        let semaphores = [self.handle];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        let result = unsafe {
            self.device
                .raw()
                .wait_semaphores(&info, timeout_nanos(timeout))
        };
        map_wait_result(result, "vkWaitSemaphores")
    }

    /// Host-side signal of a timeline value.
    pub fn signal(&self, value: u64) -> RenderResult<()> {
        debug_assert!(self.timeline);
        let info = vk::SemaphoreSignalInfo::default()
            .semaphore(self.handle)
            .value(value);
        unsafe { self.device.raw().signal_semaphore(&info) }.describe("vkSignalSemaphore")
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_semaphore(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_saturate() {
        assert_eq!(timeout_nanos(Duration::ZERO), 0);
        assert_eq!(timeout_nanos(Duration::from_millis(16)), 16_000_000);
        assert_eq!(timeout_nanos(Duration::MAX), u64::MAX);
    }

    #[test]
    fn timeout_is_distinct_from_failure() {
        assert!(map_wait_result(Ok(()), "vkWaitForFences").is_ok());
        assert!(map_wait_result(Err(vk::Result::TIMEOUT), "vkWaitForFences")
            .unwrap_err()
            .is_timeout());

        let err = map_wait_result(Err(vk::Result::ERROR_DEVICE_LOST), "vkWaitForFences")
            .unwrap_err();
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "vkWaitForFences: ERROR_DEVICE_LOST");
    }
}
