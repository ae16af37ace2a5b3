// Tests against a real Vulkan driver. Run with `cargo test -- --ignored`.

use ash::vk;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kiln::backend::{
    CommandPool, Device, DrawableSize, Fence, GraphicsContext, QueueKind, Semaphore, Swapchain,
};
use kiln::graph::{
    BackBufferDesc, BuiltinRuntime, DeviceBinding, GraphArgs, GraphBuilder, GraphCreateInfo,
    GraphDevice, GraphResult, GraphStatus, GraphUpdateInfo, Program, QueueClass, RecordInfo,
    RenderGraph, RenderGraphRuntime,
};
use kiln::render::clear_program;
use kiln::RenderError;

/// Fields drop in order: the device before the instance it came from.
struct Gpu {
    device: Arc<Device>,
    context: GraphicsContext,
}

fn headless_device(program: Program) -> Gpu {
    let context = GraphicsContext::headless("kiln-tests", false).expect("Vulkan 1.3 instance");
    let runtime = BuiltinRuntime::new(program);
    let device = Device::find_device(&context, &runtime).expect("Vulkan 1.3 device");
    Gpu {
        device,
        context,
    }
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn device_round_trip() {
    let gpu = headless_device(clear_program([0.0; 4]));
    let device = gpu.device.clone();

    assert!(!device.name().is_empty());
    assert!(device.graph_device().is_some());
    assert!(device.allocator().is_some());
    for kind in QueueKind::ALL {
        assert_eq!(device.queue(kind).family_index, device.families().family(kind));
    }
    assert!(device.queue_capabilities()[0].contains(vk::QueueFlags::GRAPHICS));
    device.wait_idle().unwrap();
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn unsignaled_fence_times_out() {
    let gpu = headless_device(clear_program([0.0; 4]));
    let device = gpu.device.clone();

    let fence = Fence::new(device.clone(), false).unwrap();
    let err = fence.wait_for(Duration::ZERO).unwrap_err();
    assert!(err.is_timeout());
    assert!(!fence.is_signaled().unwrap());

    let signaled = Fence::new(device, true).unwrap();
    signaled.wait_for(Duration::ZERO).unwrap();
    signaled.reset().unwrap();
    assert!(!signaled.is_signaled().unwrap());
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn timeline_signal_and_wait() {
    let gpu = headless_device(clear_program([0.0; 4]));
    let device = gpu.device.clone();

    let timeline = Semaphore::timeline(device, 2).unwrap();
    assert!(timeline.is_timeline());
    assert_eq!(timeline.counter_value().unwrap(), 2);

    timeline.signal(5).unwrap();
    assert_eq!(timeline.counter_value().unwrap(), 5);
    timeline.wait_value(4, Duration::from_secs(1)).unwrap();
    assert!(timeline
        .wait_value(6, Duration::ZERO)
        .unwrap_err()
        .is_timeout());
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn one_time_submission_runs_on_every_queue() {
    let gpu = headless_device(clear_program([0.0; 4]));
    let device = gpu.device.clone();

    for kind in QueueKind::ALL {
        let pool = CommandPool::new(device.clone(), kind).unwrap();
        let mut recorded = false;
        pool.emit_command_buffer(|_, command_buffer| {
            recorded = command_buffer != vk::CommandBuffer::null();
        })
        .unwrap();
        assert!(recorded, "{:?} queue", kind);
    }
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn builtin_graph_records_into_device_command_buffers() {
    let recorded = Arc::new(AtomicUsize::new(0));
    let counter = recorded.clone();
    let program: Program = Arc::new(move |graph: &mut GraphBuilder, _args: &GraphArgs| {
        let target = graph.back_buffer();
        let counter = counter.clone();
        graph
            .add_pass("count", QueueClass::Graphics)
            .writes(target)
            .record(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
    });
    let gpu = headless_device(program);
    let device = gpu.device.clone();

    let queue_flags = device.queue_capabilities();
    let graph_device = device.graph_device().unwrap();
    let mut graph = graph_device
        .create_graph(&GraphCreateInfo {
            queue_flags: &queue_flags,
        })
        .unwrap();

    let images = [vk::Image::null()];
    graph
        .update(&GraphUpdateInfo {
            frame_index: 0,
            gpu_completed_frame_index: None,
            back_buffers: &images,
            back_buffer_index: 0,
            back_buffer_desc: BackBufferDesc {
                format: vk::Format::B8G8R8A8_UNORM,
                extent: vk::Extent2D {
                    width: 16,
                    height: 16,
                },
                temporal_layers: 1,
            },
        })
        .unwrap();

    let layout = graph.batch_layout().unwrap();
    assert_eq!(layout.batches.len(), 1);
    assert_eq!(layout.batches[0].queue_index, 0);

    let pool = CommandPool::new(device.clone(), QueueKind::Direct).unwrap();
    let commands = layout.batches[0].commands.clone();
    let mut result = Ok(());
    pool.emit_command_buffer(|_, command_buffer| {
        result = graph.record_commands(&RecordInfo {
            command_buffer,
            commands,
            frame_index: 0,
        });
    })
    .unwrap();

    result.unwrap();
    assert_eq!(recorded.load(Ordering::SeqCst), 1);
}

/// Refuses every device it is offered.
struct RejectingRuntime;

impl RenderGraphRuntime for RejectingRuntime {
    fn bind_device(&self, _binding: &DeviceBinding) -> GraphResult<Box<dyn GraphDevice>> {
        Err(GraphStatus::API_ERROR)
    }
}

struct FixedSize(vk::Extent2D);

impl DrawableSize for FixedSize {
    fn drawable_size(&self) -> vk::Extent2D {
        self.0
    }
}

// Validation is on so a leaked allocator or device shows up in the log.
#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn device_unwinds_when_graph_binding_fails() {
    let _ = env_logger::builder().is_test(true).try_init();
    let context = GraphicsContext::headless("kiln-tests", true).expect("Vulkan 1.3 instance");

    match Device::find_device(&context, &RejectingRuntime) {
        Err(RenderError::GraphBindFailed(status)) => assert_eq!(status, GraphStatus::API_ERROR),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("device created without a graph binding"),
    }

    // The instance must still be usable after the partial device was torn down.
    let runtime = BuiltinRuntime::new(clear_program([0.0; 4]));
    let device = Device::find_device(&context, &runtime).expect("Vulkan 1.3 device");
    device.wait_idle().unwrap();
    drop(device);
    drop(context);
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn swapchain_needs_a_surface() {
    let gpu = headless_device(clear_program([0.0; 4]));
    let size = FixedSize(vk::Extent2D {
        width: 64,
        height: 64,
    });

    let result = Swapchain::new(&gpu.context, gpu.device.clone(), &size, None);
    assert!(matches!(result, Err(RenderError::NoSurface)));
}
