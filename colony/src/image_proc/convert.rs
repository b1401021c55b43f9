use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use ndarray::{Array2, ArrayView2};

use crate::error::{ColonyError, ColonyResult};

/// Pixel value written for foreground pixels when a mask is rendered.
pub const MASK_FOREGROUND: u8 = 255;

/// Pixel value written for background pixels when a mask is rendered.
pub const MASK_BACKGROUND: u8 = 0;

/// Converts an ndarray Array2<u8> to an image::GrayImage
///
/// Array indices [y, x] map to pixel coordinates (x, y). Array dimensions are
/// (height, width) while image dimensions are (width, height).
pub fn array2_to_gray_image(arr: ArrayView2<u8>) -> GrayImage {
    let (height, width) = arr.dim();
    let mut img = GrayImage::new(width as u32, height as u32);

    for ((y, x), &value) in arr.indexed_iter() {
        img.put_pixel(x as u32, y as u32, Luma([value]));
    }

    img
}

/// Converts an image::GrayImage to an ndarray Array2<u8> of shape (height, width)
pub fn gray_image_to_array2(img: &GrayImage) -> Array2<u8> {
    let (width, height) = img.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        img.get_pixel(x as u32, y as u32)[0]
    })
}

/// Render a binary mask with [`MASK_FOREGROUND`] and [`MASK_BACKGROUND`] values.
pub fn mask_to_gray_image(mask: ArrayView2<bool>) -> GrayImage {
    array2_to_gray_image(mask.mapv(|fg| if fg { MASK_FOREGROUND } else { MASK_BACKGROUND }).view())
}

/// Encode any image as PNG bytes
pub fn encode_png(img: &DynamicImage) -> ColonyResult<Vec<u8>> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(ColonyError::Encode)?;
    Ok(bytes)
}

/// Encode a binary mask as a single-channel PNG
pub fn encode_mask_png(mask: ArrayView2<bool>) -> ColonyResult<Vec<u8>> {
    encode_png(&DynamicImage::ImageLuma8(mask_to_gray_image(mask)))
}
