// Built-in programs

use ash::vk;
use std::sync::Arc;

use crate::graph::{GraphArgs, GraphBuilder, PassContext, Program, QueueClass};

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// A single graphics pass that clears the back buffer to `color` and leaves
/// it ready for present.
pub fn clear_program(color: [f32; 4]) -> Program {
    Arc::new(move |graph: &mut GraphBuilder, _args: &GraphArgs| {
        let target = graph.back_buffer();
        graph
            .add_pass("clear", QueueClass::Graphics)
            .writes(target)
            .record(move |pass| record_clear(pass, color));
    })
}

fn record_clear(pass: &PassContext<'_>, color: [f32; 4]) {
    let image = pass.back_buffer.image;
    let clear_value = vk::ClearColorValue { float32: color };

    // Previous contents are discarded, so the old layout does not matter.
    let to_transfer = vk::ImageMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE);

    let to_present = vk::ImageMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::empty())
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE);

    unsafe {
        pass.device.cmd_pipeline_barrier(
            pass.command_buffer,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[to_transfer],
        );
        pass.device.cmd_clear_color_image(
            pass.command_buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &clear_value,
            &[COLOR_RANGE],
        );
        pass.device.cmd_pipeline_barrier(
            pass.command_buffer,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[to_present],
        );
    }
}
