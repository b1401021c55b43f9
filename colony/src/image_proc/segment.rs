//! Foreground/background segmentation of normalized plate images.

use std::time::Instant;

use ndarray::{Array2, ArrayView2};
use tracing::debug;

use super::morphology::{close, dilate_n, open, SquareKernel};
use super::thresholding::{adaptive_mean_threshold, combine_masks, global_threshold};
use crate::config::DetectionParams;

/// Turns a normalized intensity image into a binary colony mask.
///
/// Stages run in a fixed order: global and adaptive masks are OR-combined,
/// then opened (noise removal), dilated (area recovery) and closed (fragment
/// merging). A stage with zero iterations passes its input through.
#[derive(Debug, Clone)]
pub struct Segmenter {
    global_thresh: u8,
    block_size: usize,
    c: u8,
    kernel: SquareKernel,
    opening: usize,
    dilation: usize,
    closing: usize,
}

impl Segmenter {
    pub fn new(params: &DetectionParams) -> Self {
        Self {
            global_thresh: params.global_thresh(),
            block_size: params.adaptive_block_size(),
            c: params.adaptive_c(),
            kernel: SquareKernel::new(params.morph_kernel_size()),
            opening: params.opening_iterations(),
            dilation: params.dilation_iterations(),
            closing: params.closing_iterations(),
        }
    }

    /// Mask with the same shape as `image`; `true` marks candidate colony pixels.
    pub fn segment(&self, image: ArrayView2<u8>) -> Array2<bool> {
        let start = Instant::now();

        let global = global_threshold(image, self.global_thresh);
        let adaptive = adaptive_mean_threshold(image, self.block_size, self.c);
        let combined = combine_masks(global.view(), adaptive.view());

        let opened = open(combined.view(), self.kernel, self.opening);
        let dilated = dilate_n(opened.view(), self.kernel, self.dilation);
        let closed = close(dilated.view(), self.kernel, self.closing);

        debug!(
            foreground = closed.iter().filter(|&&fg| fg).count(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Segmented image"
        );
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionParamsRaw;

    #[test]
    fn test_mask_matches_input_shape() {
        let image = Array2::from_shape_fn((40, 25), |(y, x)| ((y * 31 + x * 17) % 256) as u8);
        let mask = Segmenter::new(&DetectionParams::default()).segment(image.view());
        assert_eq!(mask.dim(), (40, 25));
    }

    #[test]
    fn test_bright_plate_is_background() {
        let image = Array2::from_elem((30, 30), 220u8);
        let mask = Segmenter::new(&DetectionParams::default()).segment(image.view());
        assert!(mask.iter().all(|&fg| !fg));
    }

    #[test]
    fn test_dark_square_is_foreground() {
        let mut image = Array2::from_elem((40, 40), 220u8);
        for y in 10..30 {
            for x in 10..30 {
                image[[y, x]] = 30;
            }
        }
        let params = DetectionParams::new(DetectionParamsRaw {
            opening_iterations: 0,
            dilation_iterations: 0,
            closing_iterations: 0,
            ..Default::default()
        })
        .unwrap();
        let mask = Segmenter::new(&params).segment(image.view());
        assert!(mask[[20, 20]]);
        assert!(!mask[[2, 2]]);
        assert_eq!(mask.iter().filter(|&&fg| fg).count(), 400);
    }
}
