//! CSV export of a session's reconciled counts.

use serde::Serialize;

use crate::annotation::AnnotationState;
use crate::config::DetectionParams;
use crate::error::ColonyResult;
use crate::session::ImageEntry;

/// One CSV row; parameter columns are empty for images never detected.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct ExportRow<'a> {
    image_id: String,
    filename: &'a str,
    auto_count: usize,
    manual_added: usize,
    manual_removed: usize,
    final_count: usize,
    global_thresh: Option<u8>,
    adaptive_block_size: Option<usize>,
    #[serde(rename = "adaptive_C")]
    adaptive_c: Option<u8>,
    morph_kernel_size: Option<usize>,
    opening_iterations: Option<usize>,
    dilation_iterations: Option<usize>,
    closing_iterations: Option<usize>,
    min_area: Option<f64>,
    max_area: Option<f64>,
    clahe_clip_limit: Option<f64>,
    clahe_tile_grid_size: Option<usize>,
}

impl<'a> ExportRow<'a> {
    fn new(entry: &'a ImageEntry) -> Self {
        let state = AnnotationState::reconcile(entry.detection.as_deref(), &entry.edits);
        let params: Option<&DetectionParams> = entry.detection.as_ref().map(|d| &d.params);
        Self {
            image_id: entry.image_id.to_string(),
            filename: &entry.filename,
            auto_count: state.auto_count,
            manual_added: state.manual_added,
            manual_removed: state.manual_removed,
            final_count: state.final_count,
            global_thresh: params.map(DetectionParams::global_thresh),
            adaptive_block_size: params.map(DetectionParams::adaptive_block_size),
            adaptive_c: params.map(DetectionParams::adaptive_c),
            morph_kernel_size: params.map(DetectionParams::morph_kernel_size),
            opening_iterations: params.map(DetectionParams::opening_iterations),
            dilation_iterations: params.map(DetectionParams::dilation_iterations),
            closing_iterations: params.map(DetectionParams::closing_iterations),
            min_area: params.map(DetectionParams::min_area),
            max_area: params.map(DetectionParams::max_area),
            clahe_clip_limit: params.map(DetectionParams::clahe_clip_limit),
            clahe_tile_grid_size: params.map(DetectionParams::clahe_tile_grid_size),
        }
    }
}

/// Serializes image entries as CSV, one row per entry in the given order.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvExporter;

impl CsvExporter {
    pub fn export(&self, entries: &[ImageEntry]) -> ColonyResult<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        if entries.is_empty() {
            writer.write_record(Self::header())?;
        }
        for entry in entries {
            writer.serialize(ExportRow::new(entry))?;
        }
        writer.flush()?;
        writer.into_inner().map_err(|e| e.into_error().into())
    }

    /// Column names, in order
    pub fn header() -> [&'static str; 17] {
        [
            "image_id",
            "filename",
            "auto_count",
            "manual_added",
            "manual_removed",
            "final_count",
            "global_thresh",
            "adaptive_block_size",
            "adaptive_C",
            "morph_kernel_size",
            "opening_iterations",
            "dilation_iterations",
            "closing_iterations",
            "min_area",
            "max_area",
            "clahe_clip_limit",
            "clahe_tile_grid_size",
        ]
    }
}
