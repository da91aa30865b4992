use crate::config::PhysicalSpacing;
use crate::enums::Orientation;

use image::GrayImage;
use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::s;

/// Binary voxel volume with shape (depth, height, width).
///
/// Voxels hold `1` for foreground and `0` for background. Depth runs along
/// the slice order, which is also the physical Z axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Volume {
    pub data: Array3<u8>,
    pub spacing: PhysicalSpacing,
}

impl Volume {
    pub fn new(data: Array3<u8>, spacing: PhysicalSpacing) -> Self {
        Self { data, spacing }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u8> {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut Array3<u8> {
        &mut self.data
    }

    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: &Orientation,
    ) -> Option<ArrayView2<'_, u8>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice_result = match orientation {
            Orientation::Axial => self.data().slice(s![index, .., ..]),
            Orientation::Coronal => self.data().slice(s![.., index, ..]),
            Orientation::Sagittal => self.data().slice(s![.., .., index]),
        };
        Some(slice_result)
    }

    /// Render one plane of the volume as a 0/255 mask image.
    ///
    /// Rows of a coronal or sagittal image run along the slice axis.
    pub fn slice_image(&self, index: usize, orientation: Orientation) -> Option<GrayImage> {
        let slice = self.get_slice_from_axis(index, &orientation)?;
        Self::slice_to_image(&slice)
    }

    fn slice_to_image(slice: &ArrayView2<'_, u8>) -> Option<GrayImage> {
        let (height, width) = slice.dim();
        let pixel_data: Vec<u8> = slice
            .iter()
            .map(|&v| if v != 0 { 255 } else { 0 })
            .collect();
        GrayImage::from_raw(width as u32, height as u32, pixel_data)
    }

    fn is_valid_index(&self, index: usize, orientation: &Orientation) -> bool {
        let dim = self.data.dim();
        let max_index = match orientation {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        };
        index < max_index
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array3;

    use super::*;

    fn sample() -> Volume {
        let mut data = Array3::<u8>::zeros((3, 4, 5));
        data[[1, 2, 3]] = 1;
        data[[0, 0, 0]] = 1;
        Volume::new(data, PhysicalSpacing::uniform(1.0))
    }

    #[test]
    fn counts_foreground() {
        assert_eq!(sample().foreground_count(), 2);
    }

    #[test]
    fn slice_images_have_plane_dimensions() {
        let volume = sample();
        let axial = volume.slice_image(1, Orientation::Axial).expect("axial");
        assert_eq!(axial.dimensions(), (5, 4));
        assert_eq!(axial.get_pixel(3, 2)[0], 255);

        let coronal = volume.slice_image(2, Orientation::Coronal).expect("coronal");
        assert_eq!(coronal.dimensions(), (5, 3));
        assert_eq!(coronal.get_pixel(3, 1)[0], 255);

        let sagittal = volume.slice_image(3, Orientation::Sagittal).expect("sagittal");
        assert_eq!(sagittal.dimensions(), (4, 3));
        assert_eq!(sagittal.get_pixel(2, 1)[0], 255);
    }

    #[test]
    fn out_of_range_index_returns_none() {
        let volume = sample();
        assert!(volume.slice_image(3, Orientation::Axial).is_none());
        assert!(volume.slice_image(4, Orientation::Coronal).is_none());
        assert!(volume.slice_image(5, Orientation::Sagittal).is_none());
    }
}
