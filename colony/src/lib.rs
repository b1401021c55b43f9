//! Colony counting for soft-agar plate assays.
//!
//! A raw plate photograph goes through three stages: normalization
//! (grayscale and CLAHE), segmentation (global and adaptive thresholds with
//! morphological cleanup) and extraction (8-connected regions, size filter,
//! deterministic ordering). The resulting auto colonies are stored per image
//! in a session and reconciled with the operator's manual edits into a final
//! count that can be exported as CSV.
//!
//! ```no_run
//! use colony::{ColonyCounter, DetectionParams, ServiceConfig, UploadFile};
//!
//! # fn main() -> colony::ColonyResult<()> {
//! let counter = ColonyCounter::new(ServiceConfig::default())?;
//! let bytes = std::fs::read("plate.png")?;
//! let upload = counter.upload(vec![UploadFile::new("plate.png", bytes)], None)?;
//! let image = upload.images[0].image_id;
//!
//! counter.detect(image, DetectionParams::default(), false)?;
//! let state = counter.get_annotation_state(image)?;
//! println!("{} colonies", state.final_count);
//!
//! let csv = counter.export(upload.session_id)?;
//! # let _ = csv;
//! # Ok(())
//! # }
//! ```

pub mod annotation;
pub mod colony;
pub mod config;
pub mod error;
pub mod export;
pub mod image_proc;
pub mod pipeline;
pub mod preview;
pub mod service;
pub mod session;
pub mod test_util;
pub mod worker;

pub use annotation::{AnnotationReconciler, AnnotationState, ManualEdits, RemovalPolicy, ToggleAction};
pub use colony::Colony;
pub use config::{DetectionParams, DetectionParamsRaw, ServiceConfig};
pub use error::{ColonyError, ColonyResult, ValidationError};
pub use export::CsvExporter;
pub use pipeline::{ColonyDetector, Detection, DetectionResult};
pub use service::{ColonyCounter, FetchedImage, RejectedUpload, UploadFile, UploadResponse, UploadedImage};
pub use session::{ImageEntry, ImageId, InMemorySessionStore, SessionId, SessionStore};
pub use worker::{DetectOutcome, DetectResponse, DetectTicket, DetectionPool};
