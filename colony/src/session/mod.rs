//! Session and image registry
//!
//! Sessions group uploaded images that share one counting workflow. Storage
//! sits behind the [`SessionStore`] trait so eviction or external persistence
//! can replace [`InMemorySessionStore`] without touching detection or
//! reconciliation code.

mod memory;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::annotation::ManualEdits;
use crate::error::{ColonyResult, ValidationError};
use crate::pipeline::DetectionResult;

pub use memory::InMemorySessionStore;

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:016x}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                u64::from_str_radix(s.trim(), 16)
                    .map(Self)
                    .map_err(|_| ValidationError::MalformedId(s.to_string()))
            }
        }
    };
}

hex_id!(
    /// Identifier of a counting session, generated by the store
    SessionId
);

hex_id!(
    /// Identifier of an uploaded image, unique across all sessions
    ImageId
);

/// Everything the store knows about one uploaded image.
///
/// Snapshots returned by the store are clones; raw bytes and the detection
/// result are shared behind `Arc`s so cloning stays cheap.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    pub image_id: ImageId,
    pub session_id: SessionId,
    /// Uploaded name normalized to a relative path
    pub filename: String,
    pub bytes: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    /// Latest successful detection, replaced wholesale
    pub detection: Option<Arc<DetectionResult>>,
    /// Operator edits, replaced wholesale
    pub edits: ManualEdits,
    /// Highest detect sequence number issued for this image
    pub issued_sequence: u64,
    /// Highest sequence that made it into the detection queue
    pub queued_sequence: u64,
}

impl ImageEntry {
    pub fn new(
        image_id: ImageId,
        session_id: SessionId,
        filename: String,
        bytes: Arc<Vec<u8>>,
        (width, height): (u32, u32),
    ) -> Self {
        Self {
            image_id,
            session_id,
            filename,
            bytes,
            width,
            height,
            detection: None,
            edits: ManualEdits::default(),
            issued_sequence: 0,
            queued_sequence: 0,
        }
    }
}

/// Mapping interface over sessions and their images.
///
/// Implementations must serialize all mutations of a single image so that a
/// detection write and an annotation write never interleave. Different images
/// and different sessions must not block each other for longer than a map
/// lookup.
pub trait SessionStore: Send + Sync {
    /// Register a new, empty session.
    fn create_session(&self) -> SessionId;

    fn contains_session(&self, session: SessionId) -> bool;

    /// Drop a session and all its images, returning how many images went with it.
    fn remove_session(&self, session: SessionId) -> ColonyResult<usize>;

    /// Append an image to a session, preserving upload order.
    fn insert_image(
        &self,
        session: SessionId,
        filename: String,
        bytes: Arc<Vec<u8>>,
        dimensions: (u32, u32),
    ) -> ColonyResult<ImageId>;

    /// Snapshot of one image.
    fn image(&self, image: ImageId) -> ColonyResult<ImageEntry>;

    /// Snapshots of a session's images in upload order.
    fn session_images(&self, session: SessionId) -> ColonyResult<Vec<ImageEntry>>;

    /// Run `update` with exclusive access to one image entry.
    ///
    /// If `update` fails, any changes it made are discarded.
    fn update_image(
        &self,
        image: ImageId,
        update: &mut dyn FnMut(&mut ImageEntry) -> ColonyResult<()>,
    ) -> ColonyResult<()>;

    /// Issue the next detect sequence number for an image.
    fn next_detect_sequence(&self, image: ImageId) -> ColonyResult<u64> {
        let mut sequence = 0;
        self.update_image(image, &mut |entry| {
            entry.issued_sequence += 1;
            sequence = entry.issued_sequence;
            Ok(())
        })?;
        Ok(sequence)
    }

    /// Note that `sequence` was accepted by the detection queue.
    ///
    /// Sequences issued to requests that never got queued are not recorded,
    /// so they never make a later result look stale.
    fn record_queued(&self, image: ImageId, sequence: u64) -> ColonyResult<()> {
        self.update_image(image, &mut |entry| {
            entry.queued_sequence = entry.queued_sequence.max(sequence);
            Ok(())
        })
    }

    /// Replace an image's detection result.
    fn store_detection(&self, result: Arc<DetectionResult>) -> ColonyResult<()> {
        let image = result.image_id;
        let mut result = Some(result);
        self.update_image(image, &mut |entry| {
            if let Some(result) = result.take() {
                entry.detection = Some(result);
            }
            Ok(())
        })
    }
}
