use image::GrayImage;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Output size of a `(width, height)` raster scaled by `ratio`, truncated
    /// towards zero and never below one pixel.
    pub(crate) fn get_scaled_dimensions(width: u32, height: u32, ratio: f32) -> (u32, u32) {
        let new_width = ((width as f32 * ratio) as u32).max(1);
        let new_height = ((height as f32 * ratio) as u32).max(1);
        (new_width, new_height)
    }

    /// Nearest-neighbour resize. Every output pixel copies exactly one source
    /// pixel, so a binary mask stays binary.
    pub(crate) fn nearest_resize(mask: &GrayImage, ratio: f32) -> GrayImage {
        let (width, height) = mask.dimensions();
        let (new_width, new_height) = Self::get_scaled_dimensions(width, height, ratio);
        if (new_width, new_height) == (width, height) {
            return mask.clone();
        }

        let scale_x = width as f64 / new_width as f64;
        let scale_y = height as f64 / new_height as f64;

        GrayImage::from_fn(new_width, new_height, |x, y| {
            let src_x = ((x as f64 * scale_x).floor() as u32).min(width - 1);
            let src_y = ((y as f64 * scale_y).floor() as u32).min(height - 1);
            *mask.get_pixel(src_x, src_y)
        })
    }
}
