//! The handle → session registry and the shared model cache.
//!
//! Locking: the table's `RwLock` guards only structural changes (insert,
//! remove) and lookups. Each session sits in its own `Mutex` slot, so calls on
//! different handles run in parallel while calls on one handle, release
//! included, are serialized.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use llama_engine::{LlamaError, Result, SessionHandle, SessionSpec};
use llama_models::Model;

use crate::session::Session;

/// `None` once released; a caller that looked the slot up before removal
/// sees `InvalidHandle` rather than a freed session.
type Slot = Arc<Mutex<Option<Session>>>;

#[derive(Debug)]
pub struct SessionTable {
    sessions: RwLock<HashMap<SessionHandle, Slot>>,
    next_handle: AtomicU64,
    /// Canonical path → loaded model. Weak so a model is freed with its last session.
    models: Mutex<HashMap<PathBuf, Weak<Model>>>,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            models: Mutex::new(HashMap::new()),
        }
    }

    /// Load (or share) the model and register a new session over it.
    pub fn create(&self, spec: &SessionSpec) -> Result<SessionHandle> {
        spec.validate()?;
        let (path, model) = self.model_for(&spec.model_path)?;
        let handle = SessionHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let session = Session::new(handle, model, path, spec)?;
        tracing::info!(
            %handle,
            session = %session.id(),
            model = %session.model_path().display(),
            n_ctx = session.n_ctx(),
            n_batch = session.n_batch(),
            kv_bytes = session.cache().memory_bytes(),
            "session created"
        );
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, Arc::new(Mutex::new(Some(session))));
        Ok(handle)
    }

    /// Run `f` with exclusive access to the session behind `handle`.
    pub fn with_session<R>(
        &self,
        handle: SessionHandle,
        f: impl FnOnce(&mut Session) -> Result<R>,
    ) -> Result<R> {
        let slot = self.slot(handle)?;
        let mut guard = slot.lock().map_err(|_| {
            LlamaError::Generation(format!(
                "Session {handle} was left inconsistent by an earlier failure; release and recreate it"
            ))
        })?;
        let session = guard.as_mut().ok_or(LlamaError::InvalidHandle(handle))?;
        f(session)
    }

    /// Remove the session, waiting for any in-flight call on it to finish.
    pub fn release(&self, handle: SessionHandle) -> Result<()> {
        let slot = self.slot(handle)?;
        let session = slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(LlamaError::InvalidHandle(handle))?;

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions
            .get(&handle)
            .is_some_and(|current| Arc::ptr_eq(current, &slot))
        {
            sessions.remove(&handle);
        }
        drop(sessions);

        tracing::info!(
            %handle,
            session = %session.id(),
            used = session.used_cells(),
            "session released"
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, handle: SessionHandle) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&handle)
    }

    /// Live handles in ascending order.
    pub fn handles(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<_> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        handles.sort();
        handles
    }

    /// Models still referenced by at least one session.
    pub fn loaded_models(&self) -> usize {
        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        models.retain(|_, m| m.strong_count() > 0);
        models.len()
    }

    fn slot(&self, handle: SessionHandle) -> Result<Slot> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
            .ok_or(LlamaError::InvalidHandle(handle))
    }

    /// The shared model for `path`, loading it if no live session holds it.
    ///
    /// Loading runs outside the cache lock; if two callers race on one path
    /// the first model inserted wins and the other load is dropped.
    fn model_for(&self, path: &Path) -> Result<(PathBuf, Arc<Model>)> {
        let canonical = path.canonicalize().map_err(|e| {
            LlamaError::ModelLoad(format!("Failed to load model from {}: {e}", path.display()))
        })?;
        if let Some(model) = self.cached_model(&canonical) {
            tracing::debug!(model = %canonical.display(), "reusing loaded model");
            return Ok((canonical, model));
        }

        let loaded = Model::load(&canonical).map_err(|e| {
            LlamaError::ModelLoad(format!(
                "Failed to load model from {}: {e}",
                canonical.display()
            ))
        })?;
        let loaded = Arc::new(loaded);

        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        models.retain(|_, m| m.strong_count() > 0);
        let model = match models.get(&canonical).and_then(Weak::upgrade) {
            Some(existing) => existing,
            None => {
                models.insert(canonical.clone(), Arc::downgrade(&loaded));
                loaded
            }
        };
        Ok((canonical, model))
    }

    fn cached_model(&self, canonical: &Path) -> Option<Arc<Model>> {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(canonical)
            .and_then(Weak::upgrade)
    }
}
