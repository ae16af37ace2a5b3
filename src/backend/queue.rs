// Queue family selection
//
// One queue is taken from each of up to three families:
// - direct: graphics + compute + transfer
// - compute: prefers a family without graphics or transfer
// - transfer: prefers a family without graphics or compute
// Dedicated families fall back to partial overlap and finally to direct.

use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Direct,
    Compute,
    Transfer,
}

impl QueueKind {
    pub const ALL: [QueueKind; 3] = [QueueKind::Direct, QueueKind::Compute, QueueKind::Transfer];

    /// Position of this queue in the render graph's queue list.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Capabilities advertised to the render graph for this queue.
    pub fn capabilities(self) -> vk::QueueFlags {
        match self {
            QueueKind::Direct => {
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER
            }
            QueueKind::Compute => vk::QueueFlags::COMPUTE,
            QueueKind::Transfer => vk::QueueFlags::TRANSFER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Queue {
    pub handle: vk::Queue,
    pub family_index: u32,
}

/// Index of the family with every `desired` flag and no `undesired` flag.
/// The family with the most queues wins; ties keep the lowest index.
pub fn find_family_index(
    families: &[vk::QueueFamilyProperties],
    desired: vk::QueueFlags,
    undesired: vk::QueueFlags,
) -> Option<u32> {
    let mut best: Option<(u32, u32)> = None;
    for (index, family) in families.iter().enumerate() {
        if family.queue_count == 0
            || !family.queue_flags.contains(desired)
            || family.queue_flags.intersects(undesired)
        {
            continue;
        }
        if best.map_or(true, |(_, count)| family.queue_count > count) {
            best = Some((index as u32, family.queue_count));
        }
    }
    best.map(|(index, _)| index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyAssignment {
    pub direct: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilyAssignment {
    pub fn select(families: &[vk::QueueFamilyProperties]) -> Self {
        use vk::QueueFlags as F;

        let direct = find_family_index(families, F::GRAPHICS | F::COMPUTE | F::TRANSFER, F::empty())
            .unwrap_or(0);

        let compute = find_family_index(families, F::COMPUTE, F::GRAPHICS | F::TRANSFER)
            .or_else(|| find_family_index(families, F::COMPUTE, F::GRAPHICS))
            .or_else(|| find_family_index(families, F::COMPUTE, F::TRANSFER))
            .unwrap_or(direct);

        let transfer = find_family_index(families, F::TRANSFER, F::GRAPHICS | F::COMPUTE)
            .or_else(|| find_family_index(families, F::TRANSFER, F::GRAPHICS))
            .or_else(|| find_family_index(families, F::TRANSFER, F::COMPUTE))
            .unwrap_or(direct);

        Self {
            direct,
            compute,
            transfer,
        }
    }

    pub fn family(&self, kind: QueueKind) -> u32 {
        match kind {
            QueueKind::Direct => self.direct,
            QueueKind::Compute => self.compute,
            QueueKind::Transfer => self.transfer,
        }
    }

    /// Families that need a queue create info: direct first, then any distinct
    /// compute and transfer families.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = vec![self.direct];
        for family in [self.compute, self.transfer] {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn universal() -> vk::QueueFlags {
        QueueKind::Direct.capabilities()
    }

    #[test]
    fn single_family_serves_everything() {
        let families = [family(universal(), 1)];
        let assignment = QueueFamilyAssignment::select(&families);
        assert_eq!(
            assignment,
            QueueFamilyAssignment {
                direct: 0,
                compute: 0,
                transfer: 0
            }
        );
        assert_eq!(assignment.unique_families(), [0]);
    }

    #[test]
    fn dedicated_families_are_preferred() {
        let families = [
            family(universal(), 1),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 4),
            family(vk::QueueFlags::COMPUTE, 2),
            family(vk::QueueFlags::TRANSFER | vk::QueueFlags::SPARSE_BINDING, 2),
        ];
        let assignment = QueueFamilyAssignment::select(&families);
        assert_eq!(assignment.direct, 0);
        assert_eq!(assignment.compute, 2);
        assert_eq!(assignment.transfer, 3);
        assert_eq!(assignment.unique_families(), [0, 2, 3]);
    }

    #[test]
    fn partial_overlap_is_second_choice() {
        // Typical desktop layout: universal, async compute (+transfer), nothing else.
        let families = [
            family(universal(), 16),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 8),
        ];
        let assignment = QueueFamilyAssignment::select(&families);
        assert_eq!(assignment.compute, 1);
        assert_eq!(assignment.transfer, 1);
        assert_eq!(assignment.unique_families(), [0, 1]);
    }

    #[test]
    fn direct_prefers_larger_family_and_first_on_tie() {
        let families = [family(universal(), 1), family(universal(), 4), family(universal(), 4)];
        assert_eq!(
            find_family_index(&families, universal(), vk::QueueFlags::empty()),
            Some(1)
        );
    }

    #[test]
    fn empty_families_are_skipped() {
        let families = [family(vk::QueueFlags::COMPUTE, 0), family(universal(), 1)];
        assert_eq!(
            find_family_index(&families, vk::QueueFlags::COMPUTE, vk::QueueFlags::empty()),
            Some(1)
        );
    }

    #[test]
    fn missing_direct_family_falls_back_to_zero() {
        let families = [family(vk::QueueFlags::COMPUTE, 1)];
        let assignment = QueueFamilyAssignment::select(&families);
        assert_eq!(assignment.direct, 0);
        assert_eq!(assignment.compute, 0);
        assert_eq!(assignment.transfer, 0);
    }

    #[test]
    fn queue_kinds_follow_graph_order() {
        assert_eq!(QueueKind::from_index(1), Some(QueueKind::Compute));
        assert_eq!(QueueKind::from_index(3), None);
        for kind in QueueKind::ALL {
            assert_eq!(QueueKind::from_index(kind.index() as u32), Some(kind));
        }
        assert!(QueueKind::Direct
            .capabilities()
            .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER));
    }
}
