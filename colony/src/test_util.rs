//! Synthetic plate images for tests and benchmarks.
//!
//! Plates are light backgrounds carrying dark filled disks, optionally with
//! seeded uniform noise so runs stay reproducible.

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::image_proc::encode_png;

/// Layout of a synthetic plate
#[derive(Debug, Clone, PartialEq)]
pub struct PlateSpec {
    pub width: u32,
    pub height: u32,
    /// Agar intensity
    pub background: u8,
    /// Colony intensity
    pub colony_level: u8,
    /// Disk radius in pixels
    pub radius: f64,
    /// Disk centers (x, y), listed in (y, x) order
    pub centers: Vec<(f64, f64)>,
    /// Half-width of the uniform noise added to every pixel; 0 disables noise
    pub noise_amplitude: u8,
    pub seed: u64,
}

impl Default for PlateSpec {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            background: 200,
            colony_level: 60,
            radius: 16.0,
            centers: vec![
                (60.0, 60.0),
                (160.0, 60.0),
                (260.0, 70.0),
                (80.0, 170.0),
                (200.0, 180.0),
            ],
            noise_amplitude: 0,
            seed: 7,
        }
    }
}

impl PlateSpec {
    /// A plate with no colonies at all
    pub fn empty() -> Self {
        Self {
            centers: Vec::new(),
            ..Default::default()
        }
    }

    fn intensities(&self) -> GrayImage {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let amplitude = i16::from(self.noise_amplitude);
        let r2 = self.radius * self.radius;

        GrayImage::from_fn(self.width, self.height, |x, y| {
            let inside = self.centers.iter().any(|&(cx, cy)| {
                let dx = f64::from(x) - cx;
                let dy = f64::from(y) - cy;
                dx * dx + dy * dy <= r2
            });
            let base = if inside {
                self.colony_level
            } else {
                self.background
            };
            let noise = if amplitude > 0 {
                rng.random_range(-amplitude..=amplitude)
            } else {
                0
            };
            Luma([(i16::from(base) + noise).clamp(0, 255) as u8])
        })
    }
}

/// Grayscale plate
pub fn synthetic_plate(spec: &PlateSpec) -> DynamicImage {
    DynamicImage::ImageLuma8(spec.intensities())
}

/// Plate with a warm agar tint, as photographed under a white light box
pub fn synthetic_rgb_plate(spec: &PlateSpec) -> DynamicImage {
    let gray = spec.intensities();
    let rgb = RgbImage::from_fn(spec.width, spec.height, |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Rgb([v.saturating_add(10), v, v.saturating_sub(10)])
    });
    DynamicImage::ImageRgb8(rgb)
}

/// PNG bytes of an image, as an uploader would send them
///
/// # Panics
///
/// Panics if PNG encoding fails, which only happens for images with a zero
/// dimension.
pub fn encode_png_bytes(image: &DynamicImage) -> Vec<u8> {
    encode_png(image).expect("Failed to encode synthetic plate")
}
