//! Rendered previews of an image with its reconciled colonies.

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_circle_mut;

use crate::colony::Colony;
use crate::error::ColonyResult;
use crate::image_proc::{array2_to_gray_image, decode_image, encode_png, to_grayscale};
use crate::session::ImageEntry;

/// Outline for auto colonies that count
pub const AUTO_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
/// Outline for auto colonies the operator removed
pub const REMOVED_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
/// Outline for operator-added colonies
pub const ADDED_COLOR: Rgb<u8> = Rgb([0, 80, 255]);

/// Outline radius for points placed without a size
const MIN_MARKER_RADIUS: f64 = 6.0;

/// Geometry is clamped to within `width + height` of the canvas before the
/// integer conversion; nothing farther out can touch a pixel.
fn outline(canvas: &mut RgbImage, colony: &Colony, color: Rgb<u8>) {
    let reach = f64::from(canvas.width()) + f64::from(canvas.height());
    let radius = colony.radius.clamp(MIN_MARKER_RADIUS, reach.max(MIN_MARKER_RADIUS));
    let center = (
        colony.x.clamp(-reach, 2.0 * reach).round() as i32,
        colony.y.clamp(-reach, 2.0 * reach).round() as i32,
    );
    let radius = radius.round() as i32;
    draw_hollow_circle_mut(canvas, center, radius, color);
    // two pixels wide
    draw_hollow_circle_mut(canvas, center, radius + 1, color);
}

/// Grayscale image as RGB PNG with colonies outlined.
///
/// Auto colonies are green unless matched by a removal within `tolerance`,
/// in which case they are red. Added points are blue.
pub fn render_preview(entry: &ImageEntry, tolerance: f64) -> ColonyResult<Vec<u8>> {
    let image = decode_image(&entry.bytes, &entry.filename)?;
    let gray = array2_to_gray_image(to_grayscale(&image).view());
    let mut canvas = DynamicImage::ImageLuma8(gray).to_rgb8();

    let auto = entry
        .detection
        .as_ref()
        .map_or(&[][..], |detection| detection.colonies.as_slice());
    for colony in auto {
        let removed = entry
            .edits
            .removed
            .iter()
            .any(|r| r.matches(colony, tolerance));
        let color = if removed { REMOVED_COLOR } else { AUTO_COLOR };
        outline(&mut canvas, colony, color);
    }
    for colony in &entry.edits.added {
        outline(&mut canvas, colony, ADDED_COLOR);
    }

    encode_png(&DynamicImage::ImageRgb8(canvas))
}
