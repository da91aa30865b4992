use crate::{
    config::AssembleConfig,
    error::{ReconstructionError, Result},
    interpolator::Interpolator,
    slice_binarizer::{collect_slice_paths, load_grayscale},
    volume::Volume,
};

use image::GrayImage;
use ndarray::{Array2, Array3, s};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A binary mask tagged with its slice number.
#[derive(Debug, Clone)]
pub struct IndexedMask {
    pub index: i64,
    pub mask: GrayImage,
}

impl IndexedMask {
    pub fn new(index: i64, mask: GrayImage) -> Self {
        Self { index, mask }
    }
}

/// Mask pixels above this value become foreground voxels.
const FOREGROUND_CUTOFF: u8 = 127;

pub struct VolumeAssembler;

impl VolumeAssembler {
    /// Stack masks into a volume.
    ///
    /// # Arguments
    ///
    /// * `masks` - Masks in any order; they are sorted by slice index
    /// * `config` - Downsampling ratio and voxel spacing
    ///
    /// # Errors
    ///
    /// Returns error if no masks are given, the indices are not contiguous, or
    /// the resized masks disagree on dimensions
    pub fn assemble(mut masks: Vec<IndexedMask>, config: &AssembleConfig) -> Result<Volume> {
        if masks.is_empty() {
            return Err(ReconstructionError::NoSlices {
                path: PathBuf::new(),
            });
        }

        Self::sort_masks(&mut masks);
        Self::validate_sequence(&masks)?;

        let images: Vec<(i64, Array2<u8>)> = masks
            .into_iter()
            .map(|IndexedMask { index, mask }| {
                let resized = if config.resize_ratio < 1.0 {
                    Interpolator::nearest_resize(&mask, config.resize_ratio)
                } else {
                    mask
                };
                (index, Self::mask_to_array(&resized))
            })
            .collect();

        Self::validate_dimensions(&images)?;

        let volume_array = Self::build_volume_array(&images);
        let (depth, height, width) = volume_array.dim();
        info!(depth, height, width, "assembled volume");

        Ok(Volume::new(volume_array, config.spacing))
    }

    /// Load every mask in a directory and stack it.
    ///
    /// File stems must be slice numbers. A mask that cannot be decoded is
    /// skipped with a warning, which leaves a gap that then fails assembly.
    pub fn load_from_directory(path: impl AsRef<Path>, config: &AssembleConfig) -> Result<Volume> {
        let dir = path.as_ref();
        let paths = collect_slice_paths(dir)?;
        if paths.is_empty() {
            return Err(ReconstructionError::NoSlices {
                path: dir.to_path_buf(),
            });
        }
        info!(count = paths.len(), masks = %dir.display(), "loading masks");

        let mut masks = Vec::with_capacity(paths.len());
        for path in &paths {
            let index = Self::slice_index(path)?;
            match load_grayscale(path) {
                Ok(mask) => masks.push(IndexedMask::new(index, mask)),
                Err(err) if err.is_recoverable() => {
                    warn!(mask = %path.display(), error = %err, "skipping unreadable mask");
                }
                Err(err) => return Err(err),
            }
        }

        Self::assemble(masks, config)
    }

    /// Parse the slice number from a file stem such as `0042.png`.
    pub fn slice_index(path: &Path) -> Result<i64> {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<i64>().ok())
            .ok_or_else(|| ReconstructionError::NonNumericStem {
                path: path.to_path_buf(),
            })
    }

    fn sort_masks(masks: &mut [IndexedMask]) {
        masks.sort_by_key(|mask| mask.index);
    }

    fn validate_sequence(masks: &[IndexedMask]) -> Result<()> {
        let gap = masks
            .windows(2)
            .find(|pair| pair[0].index.checked_add(1) != Some(pair[1].index));
        if let Some(pair) = gap {
            return Err(ReconstructionError::SliceGap {
                previous: pair[0].index,
                next: pair[1].index,
            });
        }
        Ok(())
    }

    fn mask_to_array(mask: &GrayImage) -> Array2<u8> {
        let (width, height) = mask.dimensions();
        Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            u8::from(mask.get_pixel(x as u32, y as u32)[0] > FOREGROUND_CUTOFF)
        })
    }

    fn validate_dimensions(images: &[(i64, Array2<u8>)]) -> Result<()> {
        let first_dim = images[0].1.dim();
        if let Some((index, image)) = images.iter().find(|(_, img)| img.dim() != first_dim) {
            return Err(ReconstructionError::InputShape {
                index: *index,
                expected: first_dim,
                actual: image.dim(),
            });
        }
        Ok(())
    }

    fn build_volume_array(images: &[(i64, Array2<u8>)]) -> Array3<u8> {
        let (height, width) = images[0].1.dim();
        let depth = images.len();
        let mut volume = Array3::<u8>::zeros((depth, height, width));

        for (i, (index, image)) in images.iter().enumerate() {
            debug!(slice = index, layer = i, "stacking mask");
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;
    use crate::config::PhysicalSpacing;

    fn config(ratio: f32) -> AssembleConfig {
        AssembleConfig {
            resize_ratio: ratio,
            spacing: PhysicalSpacing::uniform(1.0),
        }
    }

    fn square_mask(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if (2..size - 2).contains(&x) && (2..size - 2).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn stacks_in_numeric_order() {
        let mut marked = GrayImage::new(8, 8);
        marked.put_pixel(1, 1, Luma([255]));
        let masks = vec![
            IndexedMask::new(10, GrayImage::new(8, 8)),
            IndexedMask::new(9, marked),
            IndexedMask::new(11, square_mask(8)),
        ];
        let volume = VolumeAssembler::assemble(masks, &config(1.0)).expect("assemble");
        assert_eq!(volume.dim(), (3, 8, 8));
        assert_eq!(volume.data[[0, 1, 1]], 1);
        assert_eq!(volume.data[[1, 1, 1]], 0);
        assert_eq!(volume.data[[2, 4, 4]], 1);
        assert!(volume.data.iter().all(|&v| v <= 1));
    }

    #[test]
    fn empty_input_is_missing_input() {
        let err = VolumeAssembler::assemble(Vec::new(), &config(1.0)).expect_err("empty");
        assert!(matches!(err, ReconstructionError::NoSlices { .. }));
    }

    #[test]
    fn shape_mismatch_is_fatal() {
        let masks = vec![
            IndexedMask::new(0, square_mask(10)),
            IndexedMask::new(1, square_mask(12)),
        ];
        let err = VolumeAssembler::assemble(masks, &config(1.0)).expect_err("mismatch");
        match err {
            ReconstructionError::InputShape {
                index,
                expected,
                actual,
            } => {
                assert_eq!(index, 1);
                assert_eq!(expected, (10, 10));
                assert_eq!(actual, (12, 12));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn shape_mismatch_is_checked_after_resizing() {
        let masks = vec![
            IndexedMask::new(0, square_mask(20)),
            IndexedMask::new(1, square_mask(21)),
        ];
        // 20 * 0.5 = 10 and 21 * 0.5 = 10.5 -> 10
        let volume = VolumeAssembler::assemble(masks, &config(0.5)).expect("same size after resize");
        assert_eq!(volume.dim(), (2, 10, 10));
    }

    #[test]
    fn gap_in_sequence_is_fatal() {
        let masks = vec![
            IndexedMask::new(1, square_mask(8)),
            IndexedMask::new(2, square_mask(8)),
            IndexedMask::new(4, square_mask(8)),
        ];
        let err = VolumeAssembler::assemble(masks, &config(1.0)).expect_err("gap");
        assert!(matches!(
            err,
            ReconstructionError::SliceGap {
                previous: 2,
                next: 4
            }
        ));
    }

    #[test]
    fn duplicate_index_is_fatal() {
        let masks = vec![
            IndexedMask::new(3, square_mask(8)),
            IndexedMask::new(3, square_mask(8)),
        ];
        assert!(VolumeAssembler::assemble(masks, &config(1.0)).is_err());
    }

    #[test]
    fn duplicate_maximum_index_is_a_gap() {
        let masks = vec![
            IndexedMask::new(i64::MAX, square_mask(8)),
            IndexedMask::new(i64::MAX, square_mask(8)),
        ];
        let err = VolumeAssembler::assemble(masks, &config(1.0)).expect_err("duplicate");
        assert!(matches!(
            err,
            ReconstructionError::SliceGap {
                previous: i64::MAX,
                next: i64::MAX
            }
        ));
    }

    #[test]
    fn sequence_ending_at_maximum_index_assembles() {
        let masks = vec![
            IndexedMask::new(i64::MAX - 1, square_mask(8)),
            IndexedMask::new(i64::MAX, square_mask(8)),
        ];
        let volume = VolumeAssembler::assemble(masks, &config(1.0)).expect("assemble");
        assert_eq!(volume.dim(), (2, 8, 8));
    }

    #[test]
    fn slice_index_requires_numeric_stem() {
        assert_eq!(VolumeAssembler::slice_index(Path::new("a/0042.png")).ok(), Some(42));
        let err = VolumeAssembler::slice_index(Path::new("a/IM_0001.png")).expect_err("stem");
        assert!(matches!(err, ReconstructionError::NonNumericStem { .. }));
    }

    #[test]
    fn directory_with_unreadable_mask_fails_on_gap() {
        let dir = tempfile::tempdir().expect("tempdir");
        for i in [0, 2] {
            square_mask(8)
                .save(dir.path().join(format!("{i}.png")))
                .expect("save");
        }
        std::fs::write(dir.path().join("1.png"), b"garbage").expect("write");
        let err = VolumeAssembler::load_from_directory(dir.path(), &config(1.0)).expect_err("gap");
        assert!(matches!(
            err,
            ReconstructionError::SliceGap {
                previous: 0,
                next: 2
            }
        ));
    }
}
