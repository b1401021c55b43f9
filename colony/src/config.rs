//! Detection parameters and service configuration.
//!
//! [`DetectionParams`] is the only way parameters reach the pipeline. It is
//! built from a [`DetectionParamsRaw`] bag of numbers, validated as a whole,
//! and immutable afterwards. Deserialization goes through the same
//! validation, so a malformed JSON document can never produce a value.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::annotation::RemovalPolicy;
use crate::error::{ColonyResult, ValidationError};

/// Unvalidated detection parameters as supplied by a caller.
///
/// Every field has the default used by the bench workflow, so a partial JSON
/// document only needs to name the fields it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionParamsRaw {
    /// Global threshold (0-255); darker pixels are foreground
    pub global_thresh: i32,
    /// Side of the adaptive threshold window (odd, 3-99)
    pub adaptive_block_size: i32,
    /// Offset subtracted from the local mean (0-20)
    #[serde(rename = "adaptive_C", alias = "adaptive_c")]
    pub adaptive_c: i32,
    /// Side of the square structuring element (1-15)
    pub morph_kernel_size: i32,
    /// Opening rounds (0-8)
    pub opening_iterations: i32,
    /// Dilation rounds (0-8)
    pub dilation_iterations: i32,
    /// Closing rounds (0-12)
    pub closing_iterations: i32,
    /// Smallest region area kept, in pixels
    pub min_area: f64,
    /// Largest region area kept, in pixels
    pub max_area: f64,
    /// CLAHE contrast limit (0.5-5.0)
    pub clahe_clip_limit: f64,
    /// CLAHE tiles per axis (2-32)
    pub clahe_tile_grid_size: i32,
}

impl Default for DetectionParamsRaw {
    fn default() -> Self {
        Self {
            global_thresh: 127,
            adaptive_block_size: 21,
            adaptive_c: 4,
            morph_kernel_size: 3,
            opening_iterations: 2,
            dilation_iterations: 3,
            closing_iterations: 6,
            min_area: 525.0,
            max_area: 15000.0,
            clahe_clip_limit: 2.0,
            clahe_tile_grid_size: 8,
        }
    }
}

fn check_int(field: &'static str, value: i32, min: i32, max: i32) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value: f64::from(value),
            min: f64::from(min),
            max: f64::from(max),
        });
    }
    Ok(())
}

fn check_float(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFinite { field });
    }
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Validated, immutable detection parameters.
///
/// Construct with [`DetectionParams::new`] or `TryFrom<DetectionParamsRaw>`.
/// `Default` yields the bench defaults, which are always valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DetectionParamsRaw", into = "DetectionParamsRaw")]
pub struct DetectionParams {
    global_thresh: u8,
    adaptive_block_size: usize,
    adaptive_c: u8,
    morph_kernel_size: usize,
    opening_iterations: usize,
    dilation_iterations: usize,
    closing_iterations: usize,
    min_area: f64,
    max_area: f64,
    clahe_clip_limit: f64,
    clahe_tile_grid_size: usize,
}

impl DetectionParams {
    /// Validate a raw parameter set.
    ///
    /// The whole set is rejected on the first invalid field.
    pub fn new(raw: DetectionParamsRaw) -> Result<Self, ValidationError> {
        check_int("global_thresh", raw.global_thresh, 0, 255)?;
        check_int("adaptive_block_size", raw.adaptive_block_size, 3, 99)?;
        if raw.adaptive_block_size % 2 == 0 {
            return Err(ValidationError::EvenBlockSize(raw.adaptive_block_size));
        }
        check_int("adaptive_C", raw.adaptive_c, 0, 20)?;
        check_int("morph_kernel_size", raw.morph_kernel_size, 1, 15)?;
        check_int("opening_iterations", raw.opening_iterations, 0, 8)?;
        check_int("dilation_iterations", raw.dilation_iterations, 0, 8)?;
        check_int("closing_iterations", raw.closing_iterations, 0, 12)?;
        check_float("min_area", raw.min_area, 0.0, f64::MAX)?;
        check_float("max_area", raw.max_area, 0.0, f64::MAX)?;
        if raw.min_area >= raw.max_area {
            return Err(ValidationError::AreaOrder {
                min_area: raw.min_area,
                max_area: raw.max_area,
            });
        }
        check_float("clahe_clip_limit", raw.clahe_clip_limit, 0.5, 5.0)?;
        check_int("clahe_tile_grid_size", raw.clahe_tile_grid_size, 2, 32)?;

        // Ranges checked above make these conversions lossless.
        Ok(Self {
            global_thresh: raw.global_thresh as u8,
            adaptive_block_size: raw.adaptive_block_size as usize,
            adaptive_c: raw.adaptive_c as u8,
            morph_kernel_size: raw.morph_kernel_size as usize,
            opening_iterations: raw.opening_iterations as usize,
            dilation_iterations: raw.dilation_iterations as usize,
            closing_iterations: raw.closing_iterations as usize,
            min_area: raw.min_area,
            max_area: raw.max_area,
            clahe_clip_limit: raw.clahe_clip_limit,
            clahe_tile_grid_size: raw.clahe_tile_grid_size as usize,
        })
    }

    pub fn global_thresh(&self) -> u8 {
        self.global_thresh
    }

    pub fn adaptive_block_size(&self) -> usize {
        self.adaptive_block_size
    }

    pub fn adaptive_c(&self) -> u8 {
        self.adaptive_c
    }

    pub fn morph_kernel_size(&self) -> usize {
        self.morph_kernel_size
    }

    pub fn opening_iterations(&self) -> usize {
        self.opening_iterations
    }

    pub fn dilation_iterations(&self) -> usize {
        self.dilation_iterations
    }

    pub fn closing_iterations(&self) -> usize {
        self.closing_iterations
    }

    pub fn min_area(&self) -> f64 {
        self.min_area
    }

    pub fn max_area(&self) -> f64 {
        self.max_area
    }

    pub fn clahe_clip_limit(&self) -> f64 {
        self.clahe_clip_limit
    }

    pub fn clahe_tile_grid_size(&self) -> usize {
        self.clahe_tile_grid_size
    }

    /// The raw form of these parameters, e.g. to tweak one field and revalidate.
    pub fn to_raw(&self) -> DetectionParamsRaw {
        DetectionParamsRaw::from(self.clone())
    }

    /// Save as pretty JSON
    pub fn save_to_file(&self, path: &Path) -> ColonyResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON file, validating every field
    pub fn load_from_file(path: &Path) -> ColonyResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl Default for DetectionParams {
    fn default() -> Self {
        let raw = DetectionParamsRaw::default();
        Self {
            global_thresh: raw.global_thresh as u8,
            adaptive_block_size: raw.adaptive_block_size as usize,
            adaptive_c: raw.adaptive_c as u8,
            morph_kernel_size: raw.morph_kernel_size as usize,
            opening_iterations: raw.opening_iterations as usize,
            dilation_iterations: raw.dilation_iterations as usize,
            closing_iterations: raw.closing_iterations as usize,
            min_area: raw.min_area,
            max_area: raw.max_area,
            clahe_clip_limit: raw.clahe_clip_limit,
            clahe_tile_grid_size: raw.clahe_tile_grid_size as usize,
        }
    }
}

impl TryFrom<DetectionParamsRaw> for DetectionParams {
    type Error = ValidationError;

    fn try_from(raw: DetectionParamsRaw) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<DetectionParams> for DetectionParamsRaw {
    fn from(params: DetectionParams) -> Self {
        Self {
            global_thresh: i32::from(params.global_thresh),
            adaptive_block_size: params.adaptive_block_size as i32,
            adaptive_c: i32::from(params.adaptive_c),
            morph_kernel_size: params.morph_kernel_size as i32,
            opening_iterations: params.opening_iterations as i32,
            dilation_iterations: params.dilation_iterations as i32,
            closing_iterations: params.closing_iterations as i32,
            min_area: params.min_area,
            max_area: params.max_area,
            clahe_clip_limit: params.clahe_clip_limit,
            clahe_tile_grid_size: params.clahe_tile_grid_size as i32,
        }
    }
}

/// Runtime configuration of a [`crate::ColonyCounter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Number of detection worker threads
    pub worker_threads: usize,
    /// Detection requests that may wait in the queue before submissions fail
    pub queue_capacity: usize,
    /// Skip queued detections whose image already has a newer queued
    /// request. Off by default: every accepted request runs and writes.
    pub skip_superseded: bool,
    /// How removals are matched against auto colonies on save
    pub removal_policy: RemovalPolicy,
    /// Distance in pixels within which two points are the same colony
    pub match_tolerance: f64,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.worker_threads == 0 {
            return Err(ValidationError::OutOfRange {
                field: "worker_threads",
                value: 0.0,
                min: 1.0,
                max: f64::from(u32::MAX),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::OutOfRange {
                field: "queue_capacity",
                value: 0.0,
                min: 1.0,
                max: f64::from(u32::MAX),
            });
        }
        check_float("match_tolerance", self.match_tolerance, 0.0, f64::MAX)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get().max(1),
            queue_capacity: 64,
            skip_superseded: false,
            removal_policy: RemovalPolicy::TrustCaller,
            match_tolerance: 5.0,
        }
    }
}
