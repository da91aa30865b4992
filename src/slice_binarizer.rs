//! Per-slice segmentation of grayscale cross-sections into 0/255 masks.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

use image::{GrayImage, Luma};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    config::BinarizeConfig,
    error::{ReconstructionError, Result},
    morphology::{dilate3x3, erode3x3},
};

/// File extensions accepted as slice images, compared case-insensitively.
pub const SLICE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

/// A slice that was left out of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSlice {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of binarizing a directory of slices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Written mask files, in input order.
    pub processed: Vec<PathBuf>,
    pub skipped: Vec<SkippedSlice>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.processed.len() + self.skipped.len()
    }
}

/// Turns one grayscale slice into a cleaned binary mask.
#[derive(Debug, Clone, Default)]
pub struct SliceBinarizer {
    config: BinarizeConfig,
}

impl SliceBinarizer {
    pub fn new(config: BinarizeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BinarizeConfig {
        &self.config
    }

    /// Binarize one slice.
    ///
    /// Thresholds at the Otsu level plus the configured offset, drops small
    /// 8-connected specks, closes gaps by dilation, fills every outer contour
    /// and erodes back by the same amount. The result has the input's
    /// dimensions and contains only `0` and `255`.
    pub fn binarize(&self, slice: &GrayImage) -> GrayImage {
        let otsu = otsu_threshold(slice);
        let level = otsu.saturating_add(self.config.threshold_offset);
        debug!(otsu, level, "slice threshold");

        let mut mask = threshold(slice, level);
        let removed = remove_small_components(&mut mask, self.config.min_component_area);
        if removed > 0 {
            debug!(removed, "dropped small components");
        }

        let iterations = self.config.gap_close_iterations;
        let dilated = dilate3x3(&mask, iterations);
        let filled = fill_exterior_contours(&dilated);
        erode3x3(&filled, iterations)
    }

    /// Decode `input` as grayscale, binarize it and write the mask to `output`.
    pub fn binarize_file(&self, input: &Path, output: &Path) -> Result<()> {
        let slice = load_grayscale(input)?;
        self.binarize(&slice).save(output)?;
        Ok(())
    }

    /// Binarize every slice image in `input_dir` into `output_dir`, keeping
    /// file names.
    ///
    /// Slices are processed in parallel. Undecodable slices are logged and
    /// reported in the summary; any other failure aborts the batch.
    pub fn binarize_directory(
        &self,
        input_dir: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
    ) -> Result<BatchSummary> {
        let input_dir = input_dir.as_ref();
        let output_dir = output_dir.as_ref();
        let paths = collect_slice_paths(input_dir)?;
        if paths.is_empty() {
            return Err(ReconstructionError::NoSlices {
                path: input_dir.to_path_buf(),
            });
        }
        fs::create_dir_all(output_dir)?;
        info!(count = paths.len(), input = %input_dir.display(), "binarizing slices");

        let results: Vec<(PathBuf, Result<PathBuf>)> = paths
            .par_iter()
            .map(|path| {
                let target = output_dir.join(path.file_name().unwrap_or_default());
                let result = self.binarize_file(path, &target).map(|()| target);
                (path.clone(), result)
            })
            .collect();

        let mut summary = BatchSummary::default();
        for (path, result) in results {
            match result {
                Ok(target) => {
                    debug!(mask = %target.display(), "saved mask");
                    summary.processed.push(target);
                }
                Err(err) if err.is_recoverable() => {
                    warn!(slice = %path.display(), error = %err, "skipping slice");
                    summary.skipped.push(SkippedSlice {
                        path,
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            processed = summary.processed.len(),
            skipped = summary.skipped.len(),
            "binarization finished"
        );
        Ok(summary)
    }
}

pub(crate) fn load_grayscale(path: &Path) -> Result<GrayImage> {
    image::open(path)
        .map(|img| img.to_luma8())
        .map_err(|source| ReconstructionError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

fn has_slice_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| SLICE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Image files in `dir` with a recognized slice extension, sorted by path.
pub fn collect_slice_paths(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<_> = fs::read_dir(dir.as_ref())?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_slice_extension(path))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Otsu's threshold: the smallest level `t` maximizing the between-class
/// variance when class 0 holds intensities `<= t`.
pub fn otsu_threshold(slice: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in slice.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let mut background_count = 0u64;
    let mut background_sum = 0.0f64;
    let mut best_level = 0u8;
    let mut best_variance = -1.0f64;

    for (level, &count) in histogram.iter().enumerate() {
        background_count += count;
        background_sum += level as f64 * count as f64;
        if background_count == 0 {
            continue;
        }
        let foreground_count = total - background_count;
        if foreground_count == 0 {
            break;
        }

        let background_mean = background_sum / background_count as f64;
        let foreground_mean = (weighted_total - background_sum) / foreground_count as f64;
        let diff = background_mean - foreground_mean;
        let variance = background_count as f64 * foreground_count as f64 * diff * diff;
        if variance > best_variance {
            best_variance = variance;
            best_level = level as u8;
        }
    }

    best_level
}

/// Foreground where intensity is strictly above `level`.
pub fn threshold(slice: &GrayImage, level: u8) -> GrayImage {
    let (width, height) = slice.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        if slice.get_pixel(x, y)[0] > level {
            Luma([FOREGROUND])
        } else {
            Luma([BACKGROUND])
        }
    })
}

const NEIGHBOURS_8: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

const NEIGHBOURS_4: [(i64, i64); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

/// Breadth-first walk over pixels matching `include`, starting from `seeds`.
/// Marks every reached pixel in `visited` and returns them in visit order.
fn flood(
    mask: &GrayImage,
    visited: &mut [bool],
    seeds: impl IntoIterator<Item = (u32, u32)>,
    neighbours: &[(i64, i64)],
    include: impl Fn(u8) -> bool,
) -> Vec<(u32, u32)> {
    let (width, height) = mask.dimensions();
    let mut queue = VecDeque::new();
    for (x, y) in seeds {
        let idx = (y * width + x) as usize;
        if !visited[idx] && include(mask.get_pixel(x, y)[0]) {
            visited[idx] = true;
            queue.push_back((x, y));
        }
    }

    let mut reached = Vec::new();
    while let Some((x, y)) = queue.pop_front() {
        reached.push((x, y));
        for &(dx, dy) in neighbours {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                continue;
            }
            let (nx, ny) = (nx as u32, ny as u32);
            let idx = (ny * width + nx) as usize;
            if !visited[idx] && include(mask.get_pixel(nx, ny)[0]) {
                visited[idx] = true;
                queue.push_back((nx, ny));
            }
        }
    }
    reached
}

/// Clear every 8-connected foreground component smaller than `min_area`
/// pixels. Returns the number of components removed.
pub fn remove_small_components(mask: &mut GrayImage, min_area: usize) -> usize {
    let (width, height) = mask.dimensions();
    let mut visited = vec![false; (width as usize) * (height as usize)];
    let mut removed = 0;

    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            if visited[idx] || mask.get_pixel(x, y)[0] == BACKGROUND {
                continue;
            }
            let component = flood(mask, &mut visited, [(x, y)], &NEIGHBOURS_8, |v| {
                v != BACKGROUND
            });
            if component.len() < min_area {
                for (cx, cy) in component {
                    mask.put_pixel(cx, cy, Luma([BACKGROUND]));
                }
                removed += 1;
            }
        }
    }
    removed
}

/// Fill the inside of every outer contour.
///
/// Background that cannot reach the raster border through 4-connected
/// background is enclosed by an 8-connected foreground boundary and becomes
/// foreground.
pub fn fill_exterior_contours(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    let mut outside = vec![false; (width as usize) * (height as usize)];

    let border = (0..width)
        .flat_map(|x| [(x, 0), (x, height.saturating_sub(1))])
        .chain((0..height).flat_map(|y| [(0, y), (width.saturating_sub(1), y)]));
    if width > 0 && height > 0 {
        flood(mask, &mut outside, border, &NEIGHBOURS_4, |v| v == BACKGROUND);
    }

    GrayImage::from_fn(width, height, |x, y| {
        if outside[(y * width + x) as usize] {
            Luma([BACKGROUND])
        } else {
            Luma([FOREGROUND])
        }
    })
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;

    fn disc(size: u32, radius: f32, inside: u8, outside: u8) -> GrayImage {
        let c = (size as f32 - 1.0) / 2.0;
        GrayImage::from_fn(size, size, |x, y| {
            let dx = x as f32 - c;
            let dy = y as f32 - c;
            if dx * dx + dy * dy <= radius * radius {
                Luma([inside])
            } else {
                Luma([outside])
            }
        })
    }

    #[test]
    fn otsu_splits_bimodal_histogram() {
        let slice = disc(50, 15.0, 200, 20);
        assert_eq!(otsu_threshold(&slice), 20);
    }

    #[test]
    fn otsu_of_constant_image_is_zero() {
        let slice = GrayImage::from_pixel(10, 10, Luma([120]));
        assert_eq!(otsu_threshold(&slice), 0);
    }

    #[test]
    fn threshold_is_strict() {
        let slice = GrayImage::from_fn(3, 1, |x, _| Luma([[99, 100, 101][x as usize]]));
        let mask = threshold(&slice, 100);
        assert_eq!(mask.as_raw(), &vec![0, 0, 255]);
    }

    #[test]
    fn small_components_are_removed() {
        let mut mask = GrayImage::new(40, 40);
        // 3x3 speck (9 px) and a 10x10 block (100 px)
        for y in 1..4 {
            for x in 1..4 {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
        for y in 20..30 {
            for x in 20..30 {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
        let removed = remove_small_components(&mut mask, 70);
        assert_eq!(removed, 1);
        assert_eq!(mask.get_pixel(2, 2)[0], BACKGROUND);
        assert_eq!(mask.get_pixel(25, 25)[0], FOREGROUND);
    }

    #[test]
    fn diagonal_pixels_form_one_component() {
        let mut mask = GrayImage::new(10, 10);
        for i in 0..8 {
            mask.put_pixel(i, i, Luma([FOREGROUND]));
        }
        assert_eq!(remove_small_components(&mut mask, 8), 0);
        assert_eq!(remove_small_components(&mut mask, 9), 1);
        assert!(mask.pixels().all(|p| p[0] == BACKGROUND));
    }

    #[test]
    fn ring_interior_is_filled() {
        let mut mask = GrayImage::new(20, 20);
        for i in 5..15 {
            mask.put_pixel(i, 5, Luma([FOREGROUND]));
            mask.put_pixel(i, 14, Luma([FOREGROUND]));
            mask.put_pixel(5, i, Luma([FOREGROUND]));
            mask.put_pixel(14, i, Luma([FOREGROUND]));
        }
        let filled = fill_exterior_contours(&mask);
        assert_eq!(filled.get_pixel(10, 10)[0], FOREGROUND);
        assert_eq!(filled.get_pixel(2, 2)[0], BACKGROUND);
        assert_eq!(filled.pixels().filter(|p| p[0] == FOREGROUND).count(), 100);
    }

    #[test]
    fn open_ring_is_not_filled() {
        let mut mask = GrayImage::new(20, 20);
        for i in 5..15 {
            mask.put_pixel(i, 5, Luma([FOREGROUND]));
            mask.put_pixel(5, i, Luma([FOREGROUND]));
            mask.put_pixel(14, i, Luma([FOREGROUND]));
        }
        let filled = fill_exterior_contours(&mask);
        assert_eq!(filled.get_pixel(10, 10)[0], BACKGROUND);
    }

    #[test]
    fn binarize_keeps_disc_and_drops_speck() {
        let mut slice = disc(100, 30.0, 200, 20);
        for y in 2..5 {
            for x in 2..5 {
                slice.put_pixel(x, y, Luma([220]));
            }
        }
        let mask = SliceBinarizer::default().binarize(&slice);
        assert_eq!(mask.dimensions(), slice.dimensions());
        assert!(mask.pixels().all(|p| p[0] == 0 || p[0] == 255));
        assert_eq!(mask.get_pixel(50, 50)[0], FOREGROUND);
        assert_eq!(mask.get_pixel(3, 3)[0], BACKGROUND);
        assert_eq!(mask.get_pixel(50, 15)[0], BACKGROUND);
    }

    #[test]
    fn binarize_fills_hollow_cortex() {
        // bright ring with dark marrow, as in a long-bone cross-section
        let outer = disc(80, 25.0, 230, 10);
        let slice = GrayImage::from_fn(80, 80, |x, y| {
            let dx = x as f32 - 39.5;
            let dy = y as f32 - 39.5;
            if dx * dx + dy * dy <= 15.0 * 15.0 {
                Luma([60])
            } else {
                *outer.get_pixel(x, y)
            }
        });
        let mask = SliceBinarizer::default().binarize(&slice);
        assert_eq!(mask.get_pixel(40, 40)[0], FOREGROUND);
    }

    #[test]
    fn collects_slice_paths_case_insensitively() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["2.PNG", "1.jpg", "notes.txt", "3.TiF"] {
            std::fs::write(dir.path().join(name), b"x").expect("write");
        }
        let paths = collect_slice_paths(dir.path()).expect("list");
        let names: Vec<_> = paths
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["1.jpg", "2.PNG", "3.TiF"]);
    }

    #[test]
    fn directory_batch_skips_undecodable_slices() {
        let input = tempfile::tempdir().expect("tempdir");
        let output = tempfile::tempdir().expect("tempdir");
        disc(40, 12.0, 200, 20)
            .save(input.path().join("0.png"))
            .expect("save");
        std::fs::write(input.path().join("1.png"), b"not an image").expect("write");

        let summary = SliceBinarizer::default()
            .binarize_directory(input.path(), output.path())
            .expect("batch should continue past a bad slice");
        assert_eq!(summary.processed.len(), 1);
        assert_eq!(summary.skipped.len(), 1);
        assert!(output.path().join("0.png").exists());
        assert!(!output.path().join("1.png").exists());
    }

    #[test]
    fn empty_directory_is_missing_input() {
        let input = tempfile::tempdir().expect("tempdir");
        let output = tempfile::tempdir().expect("tempdir");
        let err = SliceBinarizer::default()
            .binarize_directory(input.path(), output.path())
            .expect_err("no slices");
        assert!(matches!(err, ReconstructionError::NoSlices { .. }));
    }
}
