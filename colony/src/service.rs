//! Operations exposed to transport collaborators (HTTP layer, CLI, UI).
//!
//! [`ColonyCounter`] ties the session store, the detection pool, the
//! reconciler and the exporter together. Every operation validates its input
//! before touching stored state.

use std::io::Cursor;
use std::path::{Component, Path};
use std::sync::Arc;

use image::ImageReader;
use serde::Serialize;
use tracing::{info, warn};

use crate::annotation::{AnnotationReconciler, AnnotationState};
use crate::colony::Colony;
use crate::config::{DetectionParams, ServiceConfig};
use crate::error::{ColonyError, ColonyResult};
use crate::export::CsvExporter;
use crate::preview::render_preview;
use crate::session::{ImageId, InMemorySessionStore, SessionId, SessionStore};
use crate::worker::{DetectOutcome, DetectTicket, DetectionPool};

const DEFAULT_FILENAME: &str = "upload";

/// One file in an upload batch
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedImage {
    pub image_id: ImageId,
    pub filename: String,
    pub width: u32,
    pub height: u32,
}

/// A file that was not registered, with the decoder's reason
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedUpload {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResponse {
    pub session_id: SessionId,
    /// Registered images in upload order
    pub images: Vec<UploadedImage>,
    pub rejected: Vec<RejectedUpload>,
}

/// Raw bytes of an uploaded image plus a best-effort media type
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub filename: String,
    pub content_type: String,
    pub bytes: Arc<Vec<u8>>,
}

/// Relative form of an uploaded name: root, `.` and `..` components are
/// dropped and the rest joined with `/`. Falls back to `upload`.
fn sanitize_filename(name: &str) -> String {
    let parts: Vec<&str> = Path::new(name)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .filter(|part| !part.trim().is_empty())
        .collect();
    if parts.is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        parts.join("/")
    }
}

/// Read just enough of the file to learn its format and dimensions.
fn probe_dimensions(bytes: &[u8], filename: &str) -> ColonyResult<(u32, u32)> {
    let decode_err = |source| ColonyError::Decode {
        filename: filename.to_string(),
        source,
    };
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| decode_err(image::ImageError::IoError(e)))?
        .into_dimensions()
        .map_err(decode_err)
}

/// The colony counting service.
pub struct ColonyCounter {
    config: ServiceConfig,
    store: Arc<dyn SessionStore>,
    pool: DetectionPool,
    reconciler: AnnotationReconciler,
    exporter: CsvExporter,
}

impl ColonyCounter {
    /// Service backed by an [`InMemorySessionStore`].
    pub fn new(config: ServiceConfig) -> ColonyResult<Self> {
        Self::with_store(config, Arc::new(InMemorySessionStore::new()))
    }

    pub fn with_store(config: ServiceConfig, store: Arc<dyn SessionStore>) -> ColonyResult<Self> {
        config.validate()?;
        let pool = DetectionPool::new(
            store.clone(),
            config.worker_threads,
            config.queue_capacity,
            config.skip_superseded,
        )?;
        let reconciler =
            AnnotationReconciler::new(store.clone(), config.removal_policy, config.match_tolerance);
        Ok(Self {
            config,
            store,
            pool,
            reconciler,
            exporter: CsvExporter,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Register files in a new session, or append to `session` if given.
    ///
    /// Each file is checked independently: unreadable files land in
    /// `rejected` and the rest are still registered. An unknown `session`
    /// fails the whole call before anything is stored.
    pub fn upload(
        &self,
        files: Vec<UploadFile>,
        session: Option<SessionId>,
    ) -> ColonyResult<UploadResponse> {
        let session_id = match session {
            Some(id) if self.store.contains_session(id) => id,
            Some(id) => return Err(ColonyError::SessionNotFound(id)),
            None => self.store.create_session(),
        };

        let mut images = Vec::with_capacity(files.len());
        let mut rejected = Vec::new();
        for file in files {
            let filename = sanitize_filename(&file.filename);
            match probe_dimensions(&file.bytes, &filename) {
                Ok((width, height)) => {
                    let image_id = self.store.insert_image(
                        session_id,
                        filename.clone(),
                        Arc::new(file.bytes),
                        (width, height),
                    )?;
                    images.push(UploadedImage {
                        image_id,
                        filename,
                        width,
                        height,
                    });
                }
                Err(e) => {
                    warn!(session = %session_id, filename = %filename, "Rejected upload: {}", e);
                    rejected.push(RejectedUpload {
                        filename,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            session = %session_id,
            accepted = images.len(),
            rejected = rejected.len(),
            "Registered upload"
        );
        Ok(UploadResponse {
            session_id,
            images,
            rejected,
        })
    }

    /// Queue a detection without waiting for it.
    ///
    /// Parameters are validated first; a full queue yields
    /// [`ColonyError::QueueFull`].
    pub fn submit_detect<P>(
        &self,
        image: ImageId,
        params: P,
        include_mask: bool,
    ) -> ColonyResult<DetectTicket>
    where
        P: TryInto<DetectionParams>,
        ColonyError: From<P::Error>,
    {
        let params: DetectionParams = params.try_into()?;
        self.pool.try_submit(image, params, include_mask)
    }

    /// Run a detection on the worker pool and wait for it.
    ///
    /// The stored result is replaced only if detection succeeds.
    pub fn detect<P>(
        &self,
        image: ImageId,
        params: P,
        include_mask: bool,
    ) -> ColonyResult<DetectOutcome>
    where
        P: TryInto<DetectionParams>,
        ColonyError: From<P::Error>,
    {
        let params: DetectionParams = params.try_into()?;
        self.pool.submit(image, params, include_mask)?.wait()
    }

    pub fn update_annotations(
        &self,
        image: ImageId,
        added: Vec<Colony>,
        removed: Vec<Colony>,
    ) -> ColonyResult<AnnotationState> {
        self.reconciler.update_annotations(image, added, removed)
    }

    pub fn get_annotation_state(&self, image: ImageId) -> ColonyResult<AnnotationState> {
        self.reconciler.get_annotation_state(image)
    }

    /// CSV with a header and one row per image, in upload order.
    pub fn export(&self, session: SessionId) -> ColonyResult<Vec<u8>> {
        let entries = self.store.session_images(session)?;
        let csv = self.exporter.export(&entries)?;
        info!(session = %session, rows = entries.len(), "Exported session");
        Ok(csv)
    }

    pub fn fetch_image(&self, image: ImageId) -> ColonyResult<FetchedImage> {
        let entry = self.store.image(image)?;
        let content_type = mime_guess::from_path(&entry.filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(FetchedImage {
            filename: entry.filename,
            content_type,
            bytes: entry.bytes,
        })
    }

    /// PNG of the image with auto, removed and added colonies outlined.
    pub fn fetch_preview(&self, image: ImageId) -> ColonyResult<Vec<u8>> {
        let entry = self.store.image(image)?;
        render_preview(&entry, self.config.match_tolerance)
    }

    /// Drop a session and its images, returning how many images were dropped.
    pub fn remove_session(&self, session: SessionId) -> ColonyResult<usize> {
        self.store.remove_session(session)
    }
}
