//! 3D repair of the stacked masks: closing across slices, then cavity filling.

use std::collections::VecDeque;

use ndarray::Array3;
use tracing::{debug, info};

use crate::{
    config::RepairConfig,
    enums::Connectivity,
    morphology::{close3d, neighbours_3d},
    volume::Volume,
};

/// Foreground voxel counts observed while repairing a volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub foreground_before: usize,
    pub foreground_after_closing: usize,
    pub foreground_after_filling: usize,
}

impl RepairReport {
    pub fn voxels_added(&self) -> usize {
        self.foreground_after_filling
            .saturating_sub(self.foreground_before)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TopologyRepairer {
    config: RepairConfig,
}

impl TopologyRepairer {
    pub fn new(config: RepairConfig) -> Self {
        Self { config }
    }

    /// Close gaps in 3D and fill enclosed cavities, in place.
    ///
    /// Closing runs first so that gaps between slices are bridged before the
    /// cavity test decides what is enclosed.
    pub fn repair(&self, volume: &mut Volume) -> RepairReport {
        let foreground_before = volume.foreground_count();

        let closed = close3d(
            volume.data(),
            self.config.connectivity,
            self.config.close_iterations,
        );
        *volume.data_mut() = closed;
        let foreground_after_closing = volume.foreground_count();
        debug!(
            iterations = self.config.close_iterations,
            added = foreground_after_closing - foreground_before,
            "closed volume"
        );

        let filled = fill_cavities(volume.data_mut(), self.config.connectivity);
        let foreground_after_filling = volume.foreground_count();
        debug!(filled, "filled cavities");

        let report = RepairReport {
            foreground_before,
            foreground_after_closing,
            foreground_after_filling,
        };
        info!(
            before = report.foreground_before,
            after = report.foreground_after_filling,
            "repaired volume"
        );
        report
    }
}

/// Mark background voxels that can reach the volume boundary through
/// background, moving between neighbours given by `connectivity`.
pub fn exterior_background(data: &Array3<u8>, connectivity: Connectivity) -> Array3<bool> {
    let dim = data.dim();
    let (depth, height, width) = dim;
    let offsets = connectivity.offsets();
    let mut reached = Array3::<bool>::default(dim);
    let mut queue = VecDeque::new();

    for ((z, y, x), &value) in data.indexed_iter() {
        let on_boundary =
            z == 0 || y == 0 || x == 0 || z + 1 == depth || y + 1 == height || x + 1 == width;
        if on_boundary && value == 0 {
            reached[[z, y, x]] = true;
            queue.push_back((z, y, x));
        }
    }

    while let Some(voxel) = queue.pop_front() {
        for neighbour in neighbours_3d(voxel, &offsets, dim) {
            if data[neighbour] == 0 && !reached[neighbour] {
                reached[neighbour] = true;
                queue.push_back(neighbour);
            }
        }
    }

    reached
}

/// Turn every background voxel that cannot reach the boundary into
/// foreground. Returns the number of voxels filled.
pub fn fill_cavities(data: &mut Array3<u8>, connectivity: Connectivity) -> usize {
    let exterior = exterior_background(data, connectivity);
    let mut filled = 0;
    ndarray::Zip::from(data)
        .and(&exterior)
        .for_each(|value, &outside| {
            if *value == 0 && !outside {
                *value = 1;
                filled += 1;
            }
        });
    filled
}

#[cfg(test)]
mod tests {
    use ndarray::Array3;

    use super::*;
    use crate::config::PhysicalSpacing;

    fn hollow_cube(size: usize) -> Array3<u8> {
        Array3::from_shape_fn((size, size, size), |(z, y, x)| {
            let shell = |v: usize| v == 1 || v == size - 2;
            let inside = |v: usize| (1..size - 1).contains(&v);
            u8::from(inside(z) && inside(y) && inside(x) && (shell(z) || shell(y) || shell(x)))
        })
    }

    #[test]
    fn enclosed_cavity_is_filled() {
        let mut data = hollow_cube(7);
        let before = data.iter().filter(|&&v| v == 1).count();
        let filled = fill_cavities(&mut data, Connectivity::Full);
        assert_eq!(filled, 27);
        assert_eq!(data.iter().filter(|&&v| v == 1).count(), before + 27);
        assert_eq!(data[[3, 3, 3]], 1);
        assert_eq!(data[[0, 0, 0]], 0);
    }

    #[test]
    fn open_cavity_is_left_alone() {
        let mut data = hollow_cube(7);
        data[[1, 3, 3]] = 0;
        let filled = fill_cavities(&mut data, Connectivity::Full);
        assert_eq!(filled, 0);
        assert_eq!(data[[3, 3, 3]], 0);
    }

    #[test]
    fn diagonal_leak_depends_on_connectivity() {
        // The centre voxel touches the open corner (3, 3, 3) only diagonally.
        let mut data = Array3::<u8>::zeros((5, 5, 5));
        for z in 1..4 {
            for y in 1..4 {
                for x in 1..4 {
                    data[[z, y, x]] = 1;
                }
            }
        }
        data[[2, 2, 2]] = 0;
        data[[3, 3, 3]] = 0;

        let mut full = data.clone();
        assert_eq!(fill_cavities(&mut full, Connectivity::Full), 0);

        let mut face = data.clone();
        assert_eq!(fill_cavities(&mut face, Connectivity::Face), 1);
        assert_eq!(face[[2, 2, 2]], 1);
        assert_eq!(face[[3, 3, 3]], 0);
    }

    #[test]
    fn repair_never_removes_foreground() {
        let mut data = hollow_cube(9);
        data[[4, 4, 0]] = 1;
        data[[0, 8, 8]] = 1;
        let original = data.clone();
        let mut volume = Volume::new(data, PhysicalSpacing::uniform(1.0));

        let report = TopologyRepairer::default().repair(&mut volume);
        assert!(report.foreground_after_closing >= report.foreground_before);
        assert!(report.foreground_after_filling >= report.foreground_after_closing);
        assert!(
            original
                .iter()
                .zip(volume.data().iter())
                .all(|(&a, &b)| b >= a)
        );
    }

    #[test]
    fn repair_bridges_missing_slice() {
        let mut data = Array3::<u8>::zeros((7, 12, 12));
        for z in [0, 1, 2, 4, 5, 6] {
            for y in 3..9 {
                for x in 3..9 {
                    data[[z, y, x]] = 1;
                }
            }
        }
        let mut volume = Volume::new(data, PhysicalSpacing::uniform(1.0));
        TopologyRepairer::default().repair(&mut volume);
        assert_eq!(volume.data()[[3, 5, 5]], 1);
        assert_eq!(volume.data()[[3, 0, 0]], 0);
    }

    #[test]
    fn repair_is_deterministic() {
        let data = hollow_cube(8);
        let mut a = Volume::new(data.clone(), PhysicalSpacing::uniform(1.0));
        let mut b = Volume::new(data, PhysicalSpacing::uniform(1.0));
        let repairer = TopologyRepairer::default();
        assert_eq!(repairer.repair(&mut a), repairer.repair(&mut b));
        assert_eq!(a, b);
    }
}
