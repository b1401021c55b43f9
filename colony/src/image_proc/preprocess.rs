//! Image normalization: decoding, grayscale conversion and CLAHE.
//!
//! Plate photographs carry uneven illumination (vignetting, gradient
//! lighting). Contrast-limited adaptive histogram equalization evens out
//! local contrast so that a single threshold behaves similarly across the
//! frame.

use std::io::Cursor;
use std::time::Instant;

use image::{DynamicImage, ImageReader};
use ndarray::{Array2, ArrayView2, Zip};
use rayon::prelude::*;
use tracing::debug;

use super::convert::gray_image_to_array2;
use crate::config::DetectionParams;
use crate::error::{ColonyError, ColonyResult};

const HIST_BINS: usize = 256;

/// Decode raw bytes of any supported raster format.
///
/// The format is sniffed from the content, not from `filename`, which is only
/// used to label the error.
pub fn decode_image(bytes: &[u8], filename: &str) -> ColonyResult<DynamicImage> {
    let decode_err = |source| ColonyError::Decode {
        filename: filename.to_string(),
        source,
    };
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| decode_err(image::ImageError::IoError(e)))?
        .decode()
        .map_err(decode_err)
}

/// Single-channel intensity with standard luminance weighting
///
/// Color sources are weighted 0.299 R + 0.587 G + 0.114 B; grayscale sources
/// (any bit depth) are converted down to 8 bits unchanged in meaning.
pub fn to_grayscale(image: &DynamicImage) -> Array2<u8> {
    if !image.color().has_color() {
        return gray_image_to_array2(&image.to_luma8());
    }

    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        let [r, g, b] = rgb.get_pixel(x as u32, y as u32).0;
        let luma = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
        luma.round().clamp(0.0, 255.0) as u8
    })
}

/// Contrast-limited adaptive histogram equalization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clahe {
    clip_limit: f64,
    tile_grid_size: usize,
}

impl Clahe {
    pub fn new(clip_limit: f64, tile_grid_size: usize) -> Self {
        Self {
            clip_limit,
            tile_grid_size: tile_grid_size.max(1),
        }
    }

    /// Equalize `image`, returning a new array of the same shape.
    ///
    /// The grid is clamped to the image size so that every tile holds at
    /// least one pixel. Tile edges are split by integer division.
    pub fn apply(&self, image: ArrayView2<u8>) -> Array2<u8> {
        let (height, width) = image.dim();
        if height == 0 || width == 0 {
            return image.to_owned();
        }

        let tiles_x = self.tile_grid_size.min(width);
        let tiles_y = self.tile_grid_size.min(height);

        let luts: Vec<[u8; HIST_BINS]> = (0..tiles_x * tiles_y)
            .into_par_iter()
            .map(|idx| {
                let (ty, tx) = (idx / tiles_x, idx % tiles_x);
                let rows = (ty * height / tiles_y)..((ty + 1) * height / tiles_y);
                let cols = (tx * width / tiles_x)..((tx + 1) * width / tiles_x);
                self.tile_lut(image.slice(ndarray::s![rows, cols]))
            })
            .collect();

        let tile_w = width as f64 / tiles_x as f64;
        let tile_h = height as f64 / tiles_y as f64;

        let mut out = Array2::zeros((height, width));
        Zip::indexed(&mut out)
            .and(&image)
            .par_for_each(|(y, x), out_px, &value| {
                let (ty1, ty2, wy) = neighbour_tiles(y, tile_h, tiles_y);
                let (tx1, tx2, wx) = neighbour_tiles(x, tile_w, tiles_x);
                let v = usize::from(value);

                let top = f64::from(luts[ty1 * tiles_x + tx1][v]) * (1.0 - wx)
                    + f64::from(luts[ty1 * tiles_x + tx2][v]) * wx;
                let bottom = f64::from(luts[ty2 * tiles_x + tx1][v]) * (1.0 - wx)
                    + f64::from(luts[ty2 * tiles_x + tx2][v]) * wx;
                let blended = top * (1.0 - wy) + bottom * wy;

                *out_px = blended.round().clamp(0.0, 255.0) as u8;
            });

        out
    }

    /// Clipped, equalized lookup table for one tile
    fn tile_lut(&self, tile: ArrayView2<u8>) -> [u8; HIST_BINS] {
        let area = tile.len();
        let mut hist = [0usize; HIST_BINS];
        for &value in tile.iter() {
            hist[usize::from(value)] += 1;
        }

        let clip = ((self.clip_limit * area as f64 / HIST_BINS as f64) as usize).max(1);
        let mut excess = 0;
        for count in hist.iter_mut() {
            if *count > clip {
                excess += *count - clip;
                *count = clip;
            }
        }

        // Spread the clipped mass evenly, remainder one count at a time.
        let batch = excess / HIST_BINS;
        let mut residual = excess % HIST_BINS;
        for count in hist.iter_mut() {
            *count += batch;
        }
        if residual > 0 {
            let step = (HIST_BINS / residual).max(1);
            let mut bin = 0;
            while bin < HIST_BINS && residual > 0 {
                hist[bin] += 1;
                residual -= 1;
                bin += step;
            }
        }

        let scale = (HIST_BINS - 1) as f64 / area as f64;
        let mut lut = [0u8; HIST_BINS];
        let mut cumulative = 0;
        for (entry, &count) in lut.iter_mut().zip(hist.iter()) {
            cumulative += count;
            *entry = (cumulative as f64 * scale).round().min(255.0) as u8;
        }
        lut
    }
}

/// The two tiles whose centers bracket `pos`, plus the weight of the second.
fn neighbour_tiles(pos: usize, tile_size: f64, tiles: usize) -> (usize, usize, f64) {
    let t = (pos as f64 + 0.5) / tile_size - 0.5;
    let lower = t.floor();
    let weight = t - lower;
    let last = (tiles - 1) as f64;
    let first = lower.clamp(0.0, last) as usize;
    let second = (lower + 1.0).clamp(0.0, last) as usize;
    (first, second, weight)
}

/// Converts arbitrary decoded images into the normalized intensity image the
/// segmenter works on.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    clahe: Clahe,
}

impl ImagePreprocessor {
    pub fn new(params: &DetectionParams) -> Self {
        Self {
            clahe: Clahe::new(params.clahe_clip_limit(), params.clahe_tile_grid_size()),
        }
    }

    /// Grayscale then CLAHE; output has the input's pixel dimensions.
    pub fn normalize(&self, image: &DynamicImage) -> Array2<u8> {
        let start = Instant::now();
        let gray = to_grayscale(image);
        let normalized = self.clahe.apply(gray.view());
        debug!(
            width = image.width(),
            height = image.height(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Normalized image"
        );
        normalized
    }
}
