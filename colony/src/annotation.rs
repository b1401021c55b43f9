//! Manual edits and their reconciliation with automatic detections.
//!
//! Counts are never stored: [`AnnotationState::reconcile`] derives them from
//! the current detection and the current edits every time they are read.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::colony::{nearest_match, Colony};
use crate::error::{ColonyResult, ValidationError};
use crate::pipeline::DetectionResult;
use crate::session::{ImageId, SessionStore};

/// Operator corrections for one image.
///
/// `removed` holds copies of auto colonies the operator struck out; `added`
/// holds points the detector missed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualEdits {
    pub added: Vec<Colony>,
    pub removed: Vec<Colony>,
}

/// What a single click did to a set of edits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    /// Added a new point
    Added,
    /// Removed a previously added point
    Unadded,
    /// Struck out an auto colony
    Removed,
    /// Restored a struck-out auto colony
    Restored,
}

impl ManualEdits {
    pub fn new(added: Vec<Colony>, removed: Vec<Colony>) -> Self {
        Self { added, removed }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .try_for_each(Colony::validate)
    }

    /// Apply one editor click at `point`.
    ///
    /// Priority: an added point within `tolerance` is withdrawn; otherwise an
    /// auto colony within `tolerance` is toggled in `removed`; otherwise the
    /// click becomes a new added point.
    pub fn toggle(&mut self, point: Colony, auto: &[Colony], tolerance: f64) -> ToggleAction {
        if let Some(idx) = nearest_match(&point, &self.added, tolerance) {
            self.added.remove(idx);
            return ToggleAction::Unadded;
        }

        if let Some(auto_idx) = nearest_match(&point, auto, tolerance) {
            let target = auto[auto_idx];
            if let Some(idx) = self
                .removed
                .iter()
                .position(|removed| removed.matches(&target, tolerance))
            {
                self.removed.remove(idx);
                return ToggleAction::Restored;
            }
            self.removed.push(target);
            return ToggleAction::Removed;
        }

        self.added.push(point);
        ToggleAction::Added
    }
}

/// Derived counts for one image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationState {
    pub auto_count: usize,
    pub manual_added: usize,
    pub manual_removed: usize,
    pub final_count: usize,
}

impl AnnotationState {
    /// Fold edits into a detection: `final = max(0, auto + added - removed)`.
    ///
    /// An image that was never detected has an auto count of zero.
    pub fn reconcile(detection: Option<&DetectionResult>, edits: &ManualEdits) -> Self {
        let auto_count = detection.map_or(0, DetectionResult::count);
        let manual_added = edits.added.len();
        let manual_removed = edits.removed.len();
        Self {
            auto_count,
            manual_added,
            manual_removed,
            final_count: (auto_count + manual_added).saturating_sub(manual_removed),
        }
    }
}

/// How removed points are related to the auto colonies when edits are saved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Store removals exactly as the caller supplied them.
    #[default]
    TrustCaller,
    /// Snap each removal to the nearest current auto colony within the match
    /// tolerance; removals with no match are dropped.
    RematchOnSave,
}

impl RemovalPolicy {
    /// Removals to store given the image's current auto colonies.
    ///
    /// Under [`RemovalPolicy::RematchOnSave`] no auto colony is claimed twice,
    /// and an image without a detection keeps no removals.
    pub fn resolve(&self, removed: Vec<Colony>, auto: &[Colony], tolerance: f64) -> Vec<Colony> {
        match self {
            RemovalPolicy::TrustCaller => removed,
            RemovalPolicy::RematchOnSave => {
                let mut claimed = vec![false; auto.len()];
                let mut matched = Vec::with_capacity(removed.len());
                for point in removed {
                    let best = auto
                        .iter()
                        .enumerate()
                        .filter(|&(idx, candidate)| {
                            !claimed[idx] && candidate.distance_to(&point) <= tolerance
                        })
                        .min_by(|a, b| {
                            a.1.distance_to(&point).total_cmp(&b.1.distance_to(&point))
                        });
                    match best {
                        Some((idx, colony)) => {
                            claimed[idx] = true;
                            matched.push(*colony);
                        }
                        None => warn!(
                            x = point.x,
                            y = point.y,
                            "Dropping removal with no matching auto colony"
                        ),
                    }
                }
                matched
            }
        }
    }
}

/// Reads and replaces per-image edits through a [`SessionStore`].
#[derive(Clone)]
pub struct AnnotationReconciler {
    store: Arc<dyn SessionStore>,
    policy: RemovalPolicy,
    tolerance: f64,
}

impl AnnotationReconciler {
    pub fn new(store: Arc<dyn SessionStore>, policy: RemovalPolicy, tolerance: f64) -> Self {
        Self {
            store,
            policy,
            tolerance,
        }
    }

    pub fn policy(&self) -> RemovalPolicy {
        self.policy
    }

    /// Replace the image's edits with the complete sets given.
    ///
    /// Coordinates are validated before anything is written; the detection
    /// read for reconciliation is the one stored at the time of the write.
    pub fn update_annotations(
        &self,
        image: ImageId,
        added: Vec<Colony>,
        removed: Vec<Colony>,
    ) -> ColonyResult<AnnotationState> {
        let edits = ManualEdits::new(added, removed);
        edits.validate()?;

        let mut pending = Some(edits);
        let mut state = AnnotationState::default();
        self.store.update_image(image, &mut |entry| {
            let Some(mut edits) = pending.take() else {
                return Ok(());
            };
            let auto = entry
                .detection
                .as_ref()
                .map_or(&[][..], |detection| detection.colonies.as_slice());
            edits.removed = self.policy.resolve(edits.removed, auto, self.tolerance);
            state = AnnotationState::reconcile(entry.detection.as_deref(), &edits);
            entry.edits = edits;
            Ok(())
        })?;

        info!(
            image = %image,
            added = state.manual_added,
            removed = state.manual_removed,
            final_count = state.final_count,
            "Updated annotations"
        );
        Ok(state)
    }

    /// Counts recomputed from the stored detection and edits.
    pub fn get_annotation_state(&self, image: ImageId) -> ColonyResult<AnnotationState> {
        let entry = self.store.image(image)?;
        Ok(AnnotationState::reconcile(
            entry.detection.as_deref(),
            &entry.edits,
        ))
    }
}
