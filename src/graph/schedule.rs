// Batch scheduling for the built-in render graph
//
// Passes keep their declaration order. Consecutive passes resolved to the same
// queue share a batch; a queue change starts a new one. Each batch signals the
// next timeline value after `fence_base`, and a batch waits on the values of
// batches on other queues that produced what it reads (RAW), or that wrote or
// read what it writes (WAW, WAR). Same-queue hazards are ordered by submission.

use ash::vk;
use std::collections::HashMap;

use super::builder::{QueueClass, ResourceId};
use super::{BatchLayout, CommandBatch, GraphResult, GraphStatus};

#[derive(Debug, Clone, Copy)]
pub struct PassAccess<'a> {
    pub class: QueueClass,
    pub reads: &'a [ResourceId],
    pub writes: &'a [ResourceId],
}

/// Picks a queue index for a pass class, preferring dedicated queues.
pub fn resolve_queue(class: QueueClass, queues: &[vk::QueueFlags]) -> Option<u32> {
    let find = |want: vk::QueueFlags, avoid: vk::QueueFlags| {
        queues
            .iter()
            .position(|flags| flags.contains(want) && !flags.intersects(avoid))
            .map(|index| index as u32)
    };
    let none = vk::QueueFlags::empty();

    match class {
        QueueClass::Graphics => find(vk::QueueFlags::GRAPHICS, none),
        QueueClass::Compute => find(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS)
            .or_else(|| find(vk::QueueFlags::COMPUTE, none)),
        // Graphics and compute queues always accept transfer commands.
        QueueClass::Copy => find(
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )
        .or_else(|| find(vk::QueueFlags::TRANSFER, none))
        .or_else(|| find(vk::QueueFlags::GRAPHICS, none))
        .or_else(|| find(vk::QueueFlags::COMPUTE, none)),
    }
}

pub fn build_layout(
    passes: &[PassAccess<'_>],
    queues: &[vk::QueueFlags],
    fence_base: u64,
) -> GraphResult<BatchLayout> {
    let mut batches: Vec<CommandBatch> = Vec::new();
    let mut waits: Vec<Vec<u64>> = Vec::new();
    let mut last_writer: HashMap<ResourceId, usize> = HashMap::new();
    let mut readers: HashMap<ResourceId, Vec<usize>> = HashMap::new();

    for (index, pass) in passes.iter().enumerate() {
        let queue = resolve_queue(pass.class, queues).ok_or(GraphStatus::INVALID_ARGUMENTS)?;

        let same_queue = batches.last().is_some_and(|last| last.queue_index == queue);
        let batch = if same_queue {
            let last = batches.len() - 1;
            batches[last].commands.end = index + 1;
            last
        } else {
            let signal_fence_value = fence_base
                .checked_add(batches.len() as u64 + 1)
                .ok_or(GraphStatus::INTEGER_OVERFLOW)?;
            batches.push(CommandBatch {
                queue_index: queue,
                commands: index..index + 1,
                wait_fences: 0..0,
                signal_fence_value,
            });
            waits.push(Vec::new());
            batches.len() - 1
        };

        let mut producers = Vec::new();
        for resource in pass.reads {
            producers.extend(last_writer.get(resource).copied());
        }
        for resource in pass.writes {
            producers.extend(last_writer.get(resource).copied());
            if let Some(previous) = readers.get(resource) {
                producers.extend(previous.iter().copied());
            }
        }
        for producer in producers {
            if batches[producer].queue_index != queue {
                let value = batches[producer].signal_fence_value;
                waits[batch].push(value);
            }
        }

        for resource in pass.reads {
            readers.entry(*resource).or_default().push(batch);
        }
        for resource in pass.writes {
            last_writer.insert(*resource, batch);
            readers.remove(resource);
        }
    }

    let mut wait_fence_values = Vec::new();
    for (batch, mut values) in batches.iter_mut().zip(waits) {
        values.sort_unstable();
        values.dedup();
        let start = wait_fence_values.len();
        wait_fence_values.extend(values);
        batch.wait_fences = start..wait_fence_values.len();
    }

    Ok(BatchLayout {
        batches,
        wait_fence_values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_queues() -> [vk::QueueFlags; 3] {
        [
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            vk::QueueFlags::COMPUTE,
            vk::QueueFlags::TRANSFER,
        ]
    }

    fn pass<'a>(
        class: QueueClass,
        reads: &'a [ResourceId],
        writes: &'a [ResourceId],
    ) -> PassAccess<'a> {
        PassAccess { class, reads, writes }
    }

    #[test]
    fn classes_map_to_dedicated_queues() {
        assert_eq!(resolve_queue(QueueClass::Graphics, &device_queues()), Some(0));
        assert_eq!(resolve_queue(QueueClass::Compute, &device_queues()), Some(1));
        assert_eq!(resolve_queue(QueueClass::Copy, &device_queues()), Some(2));

        let universal = [device_queues()[0]];
        assert_eq!(resolve_queue(QueueClass::Compute, &universal), Some(0));
        assert_eq!(resolve_queue(QueueClass::Copy, &universal), Some(0));

        assert_eq!(resolve_queue(QueueClass::Graphics, &[vk::QueueFlags::COMPUTE]), None);
    }

    #[test]
    fn single_pass_single_batch() {
        let target = [ResourceId(0)];
        let layout = build_layout(&[pass(QueueClass::Graphics, &[], &target)], &device_queues(), 0)
            .unwrap();
        assert_eq!(
            layout.batches,
            [CommandBatch {
                queue_index: 0,
                commands: 0..1,
                wait_fences: 0..0,
                signal_fence_value: 1,
            }]
        );
        assert!(layout.wait_fence_values.is_empty());
    }

    #[test]
    fn same_queue_passes_share_a_batch() {
        let a = [ResourceId(1)];
        let target = [ResourceId(0)];
        let passes = [
            pass(QueueClass::Graphics, &[], &a),
            pass(QueueClass::Graphics, &a, &target),
        ];
        let layout = build_layout(&passes, &device_queues(), 10).unwrap();
        assert_eq!(layout.batches.len(), 1);
        assert_eq!(layout.batches[0].commands, 0..2);
        assert_eq!(layout.batches[0].signal_fence_value, 11);
        assert!(layout.wait_fence_values.is_empty());
    }

    #[test]
    fn cross_queue_reads_wait_on_producer() {
        let a = [ResourceId(1)];
        let b = [ResourceId(2)];
        let target = [ResourceId(0)];
        let passes = [
            pass(QueueClass::Graphics, &[], &a),
            pass(QueueClass::Compute, &a, &b),
            pass(QueueClass::Graphics, &b, &target),
        ];
        let layout = build_layout(&passes, &device_queues(), 4).unwrap();

        let queues: Vec<_> = layout.batches.iter().map(|b| b.queue_index).collect();
        assert_eq!(queues, [0, 1, 0]);
        let signals: Vec<_> = layout.batches.iter().map(|b| b.signal_fence_value).collect();
        assert_eq!(signals, [5, 6, 7]);

        assert_eq!(layout.wait_values(&layout.batches[0]).unwrap(), &[] as &[u64]);
        assert_eq!(layout.wait_values(&layout.batches[1]).unwrap(), &[5]);
        assert_eq!(layout.wait_values(&layout.batches[2]).unwrap(), &[6]);
    }

    #[test]
    fn overwriting_waits_for_readers_on_other_queues() {
        let a = [ResourceId(1)];
        let passes = [
            pass(QueueClass::Graphics, &[], &a),
            pass(QueueClass::Copy, &a, &[]),
            pass(QueueClass::Graphics, &[], &a),
        ];
        let layout = build_layout(&passes, &device_queues(), 0).unwrap();

        assert_eq!(layout.batches.len(), 3);
        assert_eq!(layout.batches[1].queue_index, 2);
        assert_eq!(layout.wait_values(&layout.batches[1]).unwrap(), &[1]);
        // The earlier write on the same queue needs no timeline wait.
        assert_eq!(layout.wait_values(&layout.batches[2]).unwrap(), &[2]);
    }

    #[test]
    fn duplicate_waits_collapse() {
        let a = [ResourceId(1)];
        let b = [ResourceId(2)];
        let both = [ResourceId(1), ResourceId(2)];
        let passes = [
            pass(QueueClass::Compute, &[], &a),
            pass(QueueClass::Compute, &[], &b),
            pass(QueueClass::Graphics, &both, &[]),
        ];
        let layout = build_layout(&passes, &device_queues(), 0).unwrap();
        assert_eq!(layout.batches.len(), 2);
        assert_eq!(layout.wait_values(&layout.batches[1]).unwrap(), &[1]);
    }

    #[test]
    fn single_universal_queue_needs_no_waits() {
        let a = [ResourceId(1)];
        let passes = [
            pass(QueueClass::Compute, &[], &a),
            pass(QueueClass::Graphics, &a, &[]),
        ];
        let layout = build_layout(&passes, &device_queues()[..1], 0).unwrap();
        assert_eq!(layout.batches.len(), 1);
        assert!(layout.wait_fence_values.is_empty());
    }

    #[test]
    fn unschedulable_pass_is_rejected() {
        let passes = [pass(QueueClass::Graphics, &[], &[])];
        assert_eq!(
            build_layout(&passes, &[vk::QueueFlags::TRANSFER], 0),
            Err(GraphStatus::INVALID_ARGUMENTS)
        );
    }

    #[test]
    fn fence_values_must_not_overflow() {
        let passes = [pass(QueueClass::Graphics, &[], &[])];
        assert_eq!(
            build_layout(&passes, &device_queues(), u64::MAX),
            Err(GraphStatus::INTEGER_OVERFLOW)
        );
    }
}
