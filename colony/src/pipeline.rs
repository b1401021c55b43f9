//! Detection pipeline: normalization, segmentation and extraction.

use std::time::Instant;

use image::DynamicImage;
use ndarray::{Array2, ArrayView2};
use serde::Serialize;
use tracing::debug;

use crate::colony::Colony;
use crate::config::DetectionParams;
use crate::error::ColonyResult;
use crate::image_proc::{decode_image, ColonyExtractor, ImagePreprocessor, Segmenter};
use crate::session::{ImageId, SessionId};

/// Output of one pipeline run on one image
#[derive(Debug, Clone)]
pub struct Detection {
    /// Accepted colonies sorted by (y, x)
    pub colonies: Vec<Colony>,
    /// Final segmentation mask, shape (height, width)
    pub mask: Array2<bool>,
}

/// Runs the three pipeline stages with one fixed parameter set.
#[derive(Debug, Clone)]
pub struct ColonyDetector {
    preprocessor: ImagePreprocessor,
    segmenter: Segmenter,
    extractor: ColonyExtractor,
}

impl ColonyDetector {
    pub fn new(params: &DetectionParams) -> Self {
        Self {
            preprocessor: ImagePreprocessor::new(params),
            segmenter: Segmenter::new(params),
            extractor: ColonyExtractor::new(params),
        }
    }

    /// Detect colonies in a decoded image.
    pub fn detect(&self, image: &DynamicImage) -> Detection {
        let normalized = self.preprocessor.normalize(image);
        self.detect_normalized(normalized.view())
    }

    /// Segment and extract from an already normalized intensity image.
    pub fn detect_normalized(&self, normalized: ArrayView2<u8>) -> Detection {
        let mask = self.segmenter.segment(normalized);
        let colonies = self.extractor.extract(mask.view());
        Detection { colonies, mask }
    }

    /// Decode raw bytes and detect.
    pub fn detect_bytes(&self, bytes: &[u8], filename: &str) -> ColonyResult<Detection> {
        let start = Instant::now();
        let image = decode_image(bytes, filename)?;
        let detection = self.detect(&image);
        debug!(
            filename,
            count = detection.colonies.len(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Detected colonies"
        );
        Ok(detection)
    }
}

/// Immutable snapshot of one successful detect call, stored per image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub image_id: ImageId,
    pub session_id: SessionId,
    /// Auto colonies sorted by (y, x)
    pub colonies: Vec<Colony>,
    /// Parameters that produced this result
    pub params: DetectionParams,
    /// Final mask as PNG, when requested
    #[serde(skip)]
    pub mask_png: Option<Vec<u8>>,
    /// Detect sequence number this result answers
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Wall-clock time spent decoding and detecting
    pub detection_time_ms: f64,
}

impl DetectionResult {
    pub fn count(&self) -> usize {
        self.colonies.len()
    }
}
