// Device - GPU selection and logical device bootstrap
//
// Responsibilities:
// - Physical device enumeration and selection (first device by default)
// - Queue family assignment (direct / compute / transfer)
// - Logical device with timeline semaphores and dynamic rendering enabled
// - Memory allocator setup
// - Binding the render graph runtime to the device
//
// Teardown order: allocator, render graph device, logical device.

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::sync::Arc;

use super::context::{GraphicsContext, API_VERSION};
use super::queue::{Queue, QueueFamilyAssignment, QueueKind};
use super::sync::Fence;
use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::graph::{DeviceBinding, GraphDevice, HostAllocator, RenderGraphRuntime};

const QUEUE_PRIORITY: [f32; 1] = [1.0];

/// Properties of a physical device gathered before selection.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    /// Total size of all device-local heaps, in bytes.
    pub device_local_heap: u64,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
}

impl PhysicalDeviceCandidate {
    pub fn query(instance: &ash::Instance, handle: vk::PhysicalDevice) -> Self {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let memory = unsafe { instance.get_physical_device_memory_properties(handle) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(handle) };

        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_string());

        Self {
            handle,
            name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            device_local_heap: device_local_heap_size(&memory),
            queue_families,
        }
    }
}

pub fn device_local_heap_size(memory: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    let count = (memory.memory_heap_count as usize).min(vk::MAX_MEMORY_HEAPS);
    memory.memory_heaps[..count]
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

/// Policy for choosing among enumerated physical devices.
pub trait DeviceSelector {
    fn select<'a>(
        &self,
        candidates: &'a [PhysicalDeviceCandidate],
    ) -> Option<&'a PhysicalDeviceCandidate>;
}

/// Takes the first enumerated device.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstDevice;

impl DeviceSelector for FirstDevice {
    fn select<'a>(
        &self,
        candidates: &'a [PhysicalDeviceCandidate],
    ) -> Option<&'a PhysicalDeviceCandidate> {
        candidates.first()
    }
}

/// Takes the device with the most device-local memory; ties keep the first.
#[derive(Debug, Clone, Copy, Default)]
pub struct LargestLocalHeap;

impl DeviceSelector for LargestLocalHeap {
    fn select<'a>(
        &self,
        candidates: &'a [PhysicalDeviceCandidate],
    ) -> Option<&'a PhysicalDeviceCandidate> {
        candidates.iter().reduce(|best, candidate| {
            if candidate.device_local_heap > best.device_local_heap {
                candidate
            } else {
                best
            }
        })
    }
}

pub struct Device {
    // Released in Drop, in this order, before the logical device
    allocator: Option<Mutex<Allocator>>,
    graph_device: Option<Box<dyn GraphDevice>>,

    device: ash::Device,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    name: String,
    families: QueueFamilyAssignment,
    queues: [Queue; 3],
    properties: vk::PhysicalDeviceProperties,
}

impl Device {
    /// Pick the first physical device and bring it up.
    pub fn find_device(
        context: &GraphicsContext,
        runtime: &dyn RenderGraphRuntime,
    ) -> RenderResult<Arc<Self>> {
        Self::find_device_with(context, runtime, &FirstDevice)
    }

    pub fn find_device_with(
        context: &GraphicsContext,
        runtime: &dyn RenderGraphRuntime,
        selector: &dyn DeviceSelector,
    ) -> RenderResult<Arc<Self>> {
        let instance = context.instance();
        let handles = unsafe { instance.enumerate_physical_devices() }.map_err(|result| {
            RenderError::NoDeviceFound {
                reason: format!("vkEnumeratePhysicalDevices: {result:?}"),
            }
        })?;
        if handles.is_empty() {
            return Err(RenderError::NoDeviceFound {
                reason: "no Vulkan physical devices".to_string(),
            });
        }

        let candidates: Vec<_> = handles
            .into_iter()
            .map(|handle| PhysicalDeviceCandidate::query(instance, handle))
            .collect();
        for candidate in &candidates {
            log::debug!(
                "Found GPU: {} ({:?}, {} MiB device-local)",
                candidate.name,
                candidate.device_type,
                candidate.device_local_heap >> 20
            );
        }

        let candidate = selector
            .select(&candidates)
            .ok_or_else(|| RenderError::NoDeviceFound {
                reason: "device selector rejected every device".to_string(),
            })?;

        Self::new(context, candidate, runtime).map(Arc::new)
    }

    fn new(
        context: &GraphicsContext,
        candidate: &PhysicalDeviceCandidate,
        runtime: &dyn RenderGraphRuntime,
    ) -> RenderResult<Self> {
        let instance = context.instance();
        let physical_device = candidate.handle;
        log::info!("Selected GPU: {} ({:?})", candidate.name, candidate.device_type);

        // Step 1: Check the device can run us at all
        if candidate.api_version < API_VERSION {
            return Err(RenderError::DeviceCreationFailed {
                reason: format!(
                    "{} supports Vulkan {}.{}, 1.3 is required",
                    candidate.name,
                    vk::api_version_major(candidate.api_version),
                    vk::api_version_minor(candidate.api_version)
                ),
                result: vk::Result::ERROR_INCOMPATIBLE_DRIVER,
            });
        }
        Self::check_features(instance, physical_device)?;
        let extensions = Self::device_extensions(context, physical_device)?;

        // Step 2: Queue families
        let families = QueueFamilyAssignment::select(&candidate.queue_families);
        log::info!(
            "Queue families: direct={} compute={} transfer={}",
            families.direct,
            families.compute,
            families.transfer
        );
        let queue_infos: Vec<_> = families
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&QUEUE_PRIORITY)
            })
            .collect();

        // Step 3: Logical device
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);
        let mut features = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut features12)
            .push_next(&mut features13);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .map_err(|result| RenderError::DeviceCreationFailed {
                reason: "vkCreateDevice".to_string(),
                result,
            })?;

        let queue = |kind: QueueKind| {
            let family_index = families.family(kind);
            Queue {
                handle: unsafe { device.get_device_queue(family_index, 0) },
                family_index,
            }
        };
        let queues = QueueKind::ALL.map(queue);

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        // From here on, Drop unwinds whatever has been created.
        let mut this = Self {
            allocator: None,
            graph_device: None,
            device,
            instance: instance.clone(),
            physical_device,
            name: candidate.name.clone(),
            families,
            queues,
            properties,
        };

        // Step 4: Memory allocator
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: this.instance.clone(),
            device: this.device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(RenderError::AllocatorCreationFailed)?;
        this.allocator = Some(Mutex::new(allocator));

        // Step 5: Render graph device
        let binding = DeviceBinding {
            instance: this.instance.clone(),
            device: this.device.clone(),
            physical_device,
            host: HostAllocator::system(),
            flip_viewport: false,
        };
        let graph_device = runtime
            .bind_device(&binding)
            .map_err(RenderError::GraphBindFailed)?;
        this.graph_device = Some(graph_device);

        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        Ok(this)
    }

    fn check_features(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> RenderResult<()> {
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        {
            let mut features = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut features12)
                .push_next(&mut features13);
            unsafe { instance.get_physical_device_features2(physical_device, &mut features) };
        }

        let missing = match (
            features12.timeline_semaphore == vk::TRUE,
            features13.dynamic_rendering == vk::TRUE,
        ) {
            (true, true) => return Ok(()),
            (false, _) => "timelineSemaphore",
            (_, false) => "dynamicRendering",
        };
        Err(RenderError::DeviceCreationFailed {
            reason: format!("missing feature {missing}"),
            result: vk::Result::ERROR_FEATURE_NOT_PRESENT,
        })
    }

    fn device_extensions(
        context: &GraphicsContext,
        physical_device: vk::PhysicalDevice,
    ) -> RenderResult<Vec<*const std::ffi::c_char>> {
        let available = unsafe {
            context
                .instance()
                .enumerate_device_extension_properties(physical_device)
        }
        .describe("vkEnumerateDeviceExtensionProperties")?;
        let has = |name: &std::ffi::CStr| {
            available
                .iter()
                .any(|ext| ext.extension_name_as_c_str() == Ok(name))
        };

        let mut extensions = Vec::new();
        if context.surface().is_some() {
            if !has(ash::khr::swapchain::NAME) {
                return Err(RenderError::DeviceCreationFailed {
                    reason: "missing extension VK_KHR_swapchain".to_string(),
                    result: vk::Result::ERROR_EXTENSION_NOT_PRESENT,
                });
            }
            extensions.push(ash::khr::swapchain::NAME.as_ptr());
        }
        // Core since 1.2; still enabled when advertised for older layers.
        if has(ash::khr::timeline_semaphore::NAME) {
            extensions.push(ash::khr::timeline_semaphore::NAME.as_ptr());
        }
        Ok(extensions)
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn families(&self) -> &QueueFamilyAssignment {
        &self.families
    }

    pub fn queue(&self, kind: QueueKind) -> Queue {
        self.queues[kind.index()]
    }

    /// Queue capability set the render graph is created against, by queue index.
    pub fn queue_capabilities(&self) -> [vk::QueueFlags; 3] {
        QueueKind::ALL.map(QueueKind::capabilities)
    }

    pub fn allocator(&self) -> Option<&Mutex<Allocator>> {
        self.allocator.as_ref()
    }

    pub fn graph_device(&self) -> Option<&dyn GraphDevice> {
        self.graph_device.as_deref()
    }

    /// Per-frame submission path; the caller serializes access to the queue.
    pub fn submit_batch(
        &self,
        kind: QueueKind,
        submits: &[vk::SubmitInfo<'_>],
        fence: &Fence,
    ) -> RenderResult<()> {
        unsafe {
            self.device
                .queue_submit(self.queue(kind).handle, submits, fence.handle())
        }
        .describe("vkQueueSubmit")
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.describe("vkDeviceWaitIdle")
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::info!("Destroying device {}...", self.name);

        let _ = self.wait_idle();

        drop(self.allocator.take());
        drop(self.graph_device.take());
        unsafe { self.device.destroy_device(None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    const GIB: u64 = 1 << 30;

    fn candidate(raw: u64, name: &str, heap: u64) -> PhysicalDeviceCandidate {
        PhysicalDeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: name.to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version: vk::API_VERSION_1_3,
            device_local_heap: heap,
            queue_families: Vec::new(),
        }
    }

    #[test]
    fn first_device_ignores_memory() {
        let devices = [candidate(1, "A", 2 * GIB), candidate(2, "B", 8 * GIB)];
        assert_eq!(FirstDevice.select(&devices).map(|d| d.name.as_str()), Some("A"));
        assert_eq!(
            LargestLocalHeap.select(&devices).map(|d| d.name.as_str()),
            Some("B")
        );
    }

    #[test]
    fn largest_heap_keeps_first_on_tie() {
        let devices = [
            candidate(1, "A", 4 * GIB),
            candidate(2, "B", 4 * GIB),
            candidate(3, "C", GIB),
        ];
        assert_eq!(
            LargestLocalHeap.select(&devices).map(|d| d.handle.as_raw()),
            Some(1)
        );
    }

    #[test]
    fn selectors_handle_no_devices() {
        assert!(FirstDevice.select(&[]).is_none());
        assert!(LargestLocalHeap.select(&[]).is_none());
    }

    #[test]
    fn heap_size_sums_device_local_heaps_only() {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_heap_count: 3,
            ..Default::default()
        };
        memory.memory_heaps[0] = vk::MemoryHeap {
            size: 6 * GIB,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        memory.memory_heaps[1] = vk::MemoryHeap {
            size: 16 * GIB,
            flags: vk::MemoryHeapFlags::empty(),
        };
        memory.memory_heaps[2] = vk::MemoryHeap {
            size: 256 << 20,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        // Entries past memory_heap_count are ignored.
        memory.memory_heaps[3] = vk::MemoryHeap {
            size: 64 * GIB,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };

        assert_eq!(device_local_heap_size(&memory), 6 * GIB + (256 << 20));
    }
}
