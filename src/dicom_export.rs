//! Conversion of a DICOM series into numbered grayscale slice images.
//!
//! This is the step in front of the binarizer: each DICOM file is decoded with
//! its first VOI LUT window applied, stretched to 0–255 and written as
//! `NNNN.png`, numbered in slice order so the numeric-stem contract of the
//! later stages holds.

use crate::{enums::SortBy, slice_binarizer::SkippedSlice};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use image::GrayImage;
use ndarray::{Array2, s};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DicomExportError {
    #[error("No valid DICOM images found in {}", .0.display())]
    NoValidImages(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Outcome of exporting a DICOM directory.
#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    /// Written slice images, in slice order.
    pub written: Vec<PathBuf>,
    pub skipped: Vec<SkippedSlice>,
}

pub struct DicomExporter;

impl DicomExporter {
    /// Convert every DICOM file in `input` into `output/NNNN.png`.
    ///
    /// Files that are not DICOM, or whose pixel data or sort key cannot be
    /// read, are skipped and reported.
    ///
    /// # Errors
    ///
    /// Returns error if no file could be converted or an output image cannot
    /// be written
    pub fn export_directory(
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<ExportSummary, DicomExportError> {
        let input = input.as_ref();
        let output = output.as_ref();

        let mut paths: Vec<_> = fs::read_dir(input)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();
        info!(files = paths.len(), input = %input.display(), "scanning for DICOM files");

        let mut summary = ExportSummary::default();
        let mut images_with_order = Vec::with_capacity(paths.len());
        for path in paths {
            let dicom_object = match open_file(&path) {
                Ok(object) => object,
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "skipping non-DICOM file");
                    summary.skipped.push(SkippedSlice {
                        path,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            match Self::extract_image_with_order(&dicom_object, &sort_by) {
                Some((order, image)) => images_with_order.push((order, image)),
                None => {
                    warn!(file = %path.display(), "skipping DICOM file without usable pixel data");
                    summary.skipped.push(SkippedSlice {
                        path,
                        reason: "no decodable pixel data or sort key".to_string(),
                    });
                }
            }
        }

        if images_with_order.is_empty() {
            return Err(DicomExportError::NoValidImages(input.to_path_buf()));
        }

        fs::create_dir_all(output)?;
        for (i, slice) in Self::ordered_slices(images_with_order, sort_by)
            .into_iter()
            .enumerate()
        {
            let target = output.join(format!("{i:04}.png"));
            slice.save(&target)?;
            debug!(slice = %target.display(), "wrote slice");
            summary.written.push(target);
        }

        info!(
            written = summary.written.len(),
            skipped = summary.skipped.len(),
            "DICOM export finished"
        );
        Ok(summary)
    }

    /// Put decoded images into slice order and stretch each to 8 bits.
    fn ordered_slices(
        mut images_with_order: Vec<(Option<f32>, Array2<u16>)>,
        sort_by: SortBy,
    ) -> Vec<GrayImage> {
        Self::sort_images(&mut images_with_order, sort_by);
        images_with_order
            .iter()
            .map(|(_, image)| Self::normalize_to_u8(image))
            .collect()
    }

    fn extract_image_with_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<(Option<f32>, Array2<u16>)> {
        let order = Self::get_sort_order(dicom_object, sort_by)?;
        let image_2d = Self::decode_image(dicom_object)?;
        Some((order, image_2d))
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<Option<f32>> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let pos = dicom_object
                    .element(tags::IMAGE_POSITION_PATIENT)
                    .ok()?
                    .to_multi_float32()
                    .ok()?;
                Some(pos.get(2).copied())
            }
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float32()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f32);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    /// First frame, first sample, with the first VOI LUT window applied.
    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<u16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::First);
        pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn sort_images(images_with_order: &mut [(Option<f32>, Array2<u16>)], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            images_with_order
                .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        }

        if matches!(sort_by, SortBy::ImagePositionPatient) {
            images_with_order.reverse();
        }
    }

    /// Stretch the value range of `image` to 0–255. A constant image maps to 0.
    pub fn normalize_to_u8(image: &Array2<u16>) -> GrayImage {
        let (height, width) = image.dim();
        let min = image.iter().copied().min().unwrap_or(0);
        let max = image.iter().copied().max().unwrap_or(0);
        let range = f32::from(max - min);

        let pixel_data: Vec<u8> = image
            .iter()
            .map(|&v| {
                if range == 0.0 {
                    0
                } else {
                    ((f32::from(v - min) / range) * 255.0).clamp(0.0, 255.0) as u8
                }
            })
            .collect();
        GrayImage::from_raw(width as u32, height as u32, pixel_data)
            .unwrap_or_else(|| GrayImage::new(width as u32, height as u32))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};

    use super::*;

    #[test]
    fn normalize_stretches_range() {
        let image = array![[100u16, 200], [300, 500]];
        let out = DicomExporter::normalize_to_u8(&image);
        assert_eq!(out.dimensions(), (2, 2));
        assert_eq!(out.as_raw(), &vec![0, 63, 127, 255]);
    }

    #[test]
    fn normalize_constant_image_is_black() {
        let image = Array2::<u16>::from_elem((3, 4), 1234);
        let out = DicomExporter::normalize_to_u8(&image);
        assert_eq!(out.dimensions(), (4, 3));
        assert!(out.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn sort_orders_by_key_and_reverses_patient_position() {
        let tagged = |order: f32| (Some(order), Array2::<u16>::from_elem((1, 1), order as u16));
        let mut images = vec![tagged(3.0), tagged(1.0), tagged(2.0)];
        DicomExporter::sort_images(&mut images, SortBy::InstanceNumber);
        let keys: Vec<_> = images.iter().map(|(k, _)| k.unwrap_or_default()).collect();
        assert_eq!(keys, vec![1.0, 2.0, 3.0]);

        DicomExporter::sort_images(&mut images, SortBy::ImagePositionPatient);
        let keys: Vec<_> = images.iter().map(|(k, _)| k.unwrap_or_default()).collect();
        assert_eq!(keys, vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn ordered_slices_are_sorted_and_normalized() {
        let ramp = |order: f32, base: u16| {
            (Some(order), array![[base, base + 10], [base + 20, base + 30]])
        };
        let slices = DicomExporter::ordered_slices(
            vec![ramp(2.0, 500), ramp(0.0, 0), ramp(1.0, 7)],
            SortBy::InstanceNumber,
        );
        assert_eq!(slices.len(), 3);
        for slice in &slices {
            assert_eq!(slice.dimensions(), (2, 2));
            assert_eq!(slice.as_raw(), &vec![0, 85, 170, 255]);
        }

        let unsorted = vec![
            (Some(1.0), Array2::<u16>::from_elem((1, 2), 9)),
            (Some(0.0), array![[0u16, 100]]),
        ];
        let kept = DicomExporter::ordered_slices(unsorted.clone(), SortBy::None);
        assert_eq!(kept[0].as_raw(), &vec![0, 0]);
        let sorted = DicomExporter::ordered_slices(unsorted, SortBy::TablePosition);
        assert_eq!(sorted[0].as_raw(), &vec![0, 255]);
    }

    #[test]
    fn directory_without_dicom_files_is_an_error() {
        let input = tempfile::tempdir().expect("tempdir");
        let output = tempfile::tempdir().expect("tempdir");
        std::fs::write(input.path().join("readme.txt"), b"not dicom").expect("write");
        let err = DicomExporter::export_directory(input.path(), output.path(), SortBy::default())
            .expect_err("no DICOM");
        assert!(matches!(err, DicomExportError::NoValidImages(_)));
    }
}
