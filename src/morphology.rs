//! Binary morphology on masks and volumes.
//!
//! 2D operators work on `GrayImage` masks where any non-zero pixel is set and
//! write `0` or `255`. 3D operators work on `{0, 1}` voxel arrays.
//!
//! Neighbours outside the raster never set a pixel during dilation and never
//! clear one during erosion, so a closing never removes foreground.

use image::{GrayImage, Luma};
use ndarray::{Array3, Zip};

use crate::enums::Connectivity;

fn dilate3x3_once(src: &GrayImage) -> GrayImage {
    let (width, height) = src.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let any_set =
            neighbourhood_2d(x, y, width, height).any(|(nx, ny)| src.get_pixel(nx, ny)[0] != 0);
        Luma([if any_set { 255 } else { 0 }])
    })
}

fn erode3x3_once(src: &GrayImage) -> GrayImage {
    let (width, height) = src.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let all_set =
            neighbourhood_2d(x, y, width, height).all(|(nx, ny)| src.get_pixel(nx, ny)[0] != 0);
        Luma([if all_set { 255 } else { 0 }])
    })
}

/// In-bounds pixels of the 3x3 square centred on `(x, y)`, centre included.
fn neighbourhood_2d(
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> impl Iterator<Item = (u32, u32)> {
    let x0 = x.saturating_sub(1);
    let y0 = y.saturating_sub(1);
    let x1 = (x + 1).min(width - 1);
    let y1 = (y + 1).min(height - 1);
    (y0..=y1).flat_map(move |ny| (x0..=x1).map(move |nx| (nx, ny)))
}

/// Dilate with a 3x3 square, `iterations` times.
pub fn dilate3x3(src: &GrayImage, iterations: usize) -> GrayImage {
    (0..iterations).fold(src.clone(), |mask, _| dilate3x3_once(&mask))
}

/// Erode with a 3x3 square, `iterations` times.
pub fn erode3x3(src: &GrayImage, iterations: usize) -> GrayImage {
    (0..iterations).fold(src.clone(), |mask, _| erode3x3_once(&mask))
}

#[inline]
fn neighbour_index(
    (z, y, x): (usize, usize, usize),
    (dz, dy, dx): (isize, isize, isize),
    (depth, height, width): (usize, usize, usize),
) -> Option<(usize, usize, usize)> {
    let nz = z.checked_add_signed(dz).filter(|&v| v < depth)?;
    let ny = y.checked_add_signed(dy).filter(|&v| v < height)?;
    let nx = x.checked_add_signed(dx).filter(|&v| v < width)?;
    Some((nz, ny, nx))
}

/// Neighbours of a voxel that lie inside a volume of shape `dim`.
pub(crate) fn neighbours_3d<'a>(
    voxel: (usize, usize, usize),
    offsets: &'a [(isize, isize, isize)],
    dim: (usize, usize, usize),
) -> impl Iterator<Item = (usize, usize, usize)> + 'a {
    offsets
        .iter()
        .filter_map(move |&offset| neighbour_index(voxel, offset, dim))
}

/// One 3D dilation step with the structuring element given by `connectivity`.
pub fn dilate3d(src: &Array3<u8>, connectivity: Connectivity) -> Array3<u8> {
    let offsets = connectivity.offsets();
    let dim = src.dim();
    let mut out = Array3::<u8>::zeros(dim);
    Zip::indexed(&mut out).par_for_each(|voxel, value| {
        let set = src[voxel] != 0 || neighbours_3d(voxel, &offsets, dim).any(|n| src[n] != 0);
        *value = u8::from(set);
    });
    out
}

/// One 3D erosion step with the structuring element given by `connectivity`.
pub fn erode3d(src: &Array3<u8>, connectivity: Connectivity) -> Array3<u8> {
    let offsets = connectivity.offsets();
    let dim = src.dim();
    let mut out = Array3::<u8>::zeros(dim);
    Zip::indexed(&mut out).par_for_each(|voxel, value| {
        let set = src[voxel] != 0 && neighbours_3d(voxel, &offsets, dim).all(|n| src[n] != 0);
        *value = u8::from(set);
    });
    out
}

/// `iterations` dilations followed by `iterations` erosions.
pub fn close3d(src: &Array3<u8>, connectivity: Connectivity, iterations: usize) -> Array3<u8> {
    let dilated = (0..iterations).fold(src.clone(), |v, _| dilate3d(&v, connectivity));
    (0..iterations).fold(dilated, |v, _| erode3d(&v, connectivity))
}
