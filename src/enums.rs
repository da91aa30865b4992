use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Plane through the volume, named after the medical axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// Key used to order DICOM files into slices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}

/// Neighbourhood used by 3D morphology and flood fill.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Connectivity {
    /// 6 neighbours sharing a face.
    Face,
    /// 26 neighbours sharing a face, an edge or a corner.
    #[default]
    Full,
}

impl Connectivity {
    /// Neighbour offsets as `(dz, dy, dx)`, excluding the centre.
    pub fn offsets(self) -> Vec<(isize, isize, isize)> {
        let mut offsets = Vec::with_capacity(26);
        for dz in -1isize..=1 {
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    let manhattan = dz.abs() + dy.abs() + dx.abs();
                    let keep = match self {
                        Connectivity::Face => manhattan == 1,
                        Connectivity::Full => manhattan > 0,
                    };
                    if keep {
                        offsets.push((dz, dy, dx));
                    }
                }
            }
        }
        offsets
    }
}

/// Layout of the written STL file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum StlFormat {
    #[default]
    Binary,
    Ascii,
}
