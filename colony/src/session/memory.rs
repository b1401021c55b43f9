//! In-process session store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::info;

use super::{ImageEntry, ImageId, SessionId, SessionStore};
use crate::error::{ColonyError, ColonyResult};

/// Arena-style store keyed by generated ids.
///
/// Sessions live until [`SessionStore::remove_session`] is called; there is no
/// eviction. Each image sits behind its own mutex, so per-image writes are
/// serialized while other images proceed in parallel.
#[derive(Debug)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Vec<ImageId>>>,
    images: RwLock<HashMap<ImageId, Arc<Mutex<ImageEntry>>>>,
    next_session: AtomicU64,
    next_image: AtomicU64,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            images: RwLock::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            next_image: AtomicU64::new(1),
        }
    }

    fn entry(&self, image: ImageId) -> ColonyResult<Arc<Mutex<ImageEntry>>> {
        self.images
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&image)
            .cloned()
            .ok_or(ColonyError::ImageNotFound(image))
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for InMemorySessionStore {
    fn create_session(&self) -> SessionId {
        let id = SessionId::from_raw(self.next_session.fetch_add(1, Ordering::Relaxed));
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Vec::new());
        info!(session = %id, "Created session");
        id
    }

    fn contains_session(&self, session: SessionId) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&session)
    }

    fn remove_session(&self, session: SessionId) -> ColonyResult<usize> {
        let image_ids = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session)
            .ok_or(ColonyError::SessionNotFound(session))?;

        let mut images = self.images.write().unwrap_or_else(PoisonError::into_inner);
        for id in &image_ids {
            images.remove(id);
        }
        info!(session = %session, images = image_ids.len(), "Removed session");
        Ok(image_ids.len())
    }

    fn insert_image(
        &self,
        session: SessionId,
        filename: String,
        bytes: Arc<Vec<u8>>,
        dimensions: (u32, u32),
    ) -> ColonyResult<ImageId> {
        // Holding the session lock keeps a concurrent remove_session from
        // orphaning the new image.
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let order = sessions
            .get_mut(&session)
            .ok_or(ColonyError::SessionNotFound(session))?;

        let id = ImageId::from_raw(self.next_image.fetch_add(1, Ordering::Relaxed));
        let entry = ImageEntry::new(id, session, filename, bytes, dimensions);
        self.images
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(Mutex::new(entry)));
        order.push(id);
        Ok(id)
    }

    fn image(&self, image: ImageId) -> ColonyResult<ImageEntry> {
        let entry = self.entry(image)?;
        let snapshot = entry.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Ok(snapshot)
    }

    fn session_images(&self, session: SessionId) -> ColonyResult<Vec<ImageEntry>> {
        let ids = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session)
            .cloned()
            .ok_or(ColonyError::SessionNotFound(session))?;

        // An id can vanish if the session is removed concurrently; skip it.
        Ok(ids.into_iter().filter_map(|id| self.image(id).ok()).collect())
    }

    fn update_image(
        &self,
        image: ImageId,
        update: &mut dyn FnMut(&mut ImageEntry) -> ColonyResult<()>,
    ) -> ColonyResult<()> {
        let entry = self.entry(image)?;
        let mut guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
        let mut draft = guard.clone();
        update(&mut draft)?;
        *guard = draft;
        Ok(())
    }
}
