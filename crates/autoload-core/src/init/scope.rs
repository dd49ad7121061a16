use super::{Action, EngineShared, ScopeId};
use crate::error::Result;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Deferred work belonging to one descriptor.
///
/// An eager scope runs actions as they are enqueued. A lazy scope queues them
/// on its engine until a flush; dropping a lazy scope discards whatever it
/// still has queued.
pub struct InitScope {
    kind: ScopeKind,
}

enum ScopeKind {
    Eager,
    Lazy {
        id: ScopeId,
        engine: Arc<EngineShared>,
        /// Only read or written under the engine lock.
        discarded: AtomicBool,
    },
}

impl std::fmt::Debug for InitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ScopeKind::Eager => f.write_str("InitScope::Eager"),
            ScopeKind::Lazy { id, .. } => write!(f, "InitScope::Lazy({id})"),
        }
    }
}

impl InitScope {
    pub(super) fn eager() -> Self {
        Self {
            kind: ScopeKind::Eager,
        }
    }

    pub(super) fn lazy(id: ScopeId, engine: Arc<EngineShared>) -> Self {
        Self {
            kind: ScopeKind::Lazy {
                id,
                engine,
                discarded: AtomicBool::new(false),
            },
        }
    }

    #[must_use]
    pub fn is_lazy(&self) -> bool {
        matches!(self.kind, ScopeKind::Lazy { .. })
    }

    /// Engine-local id of a lazy scope.
    #[must_use]
    pub fn id(&self) -> Option<ScopeId> {
        match &self.kind {
            ScopeKind::Eager => None,
            ScopeKind::Lazy { id, .. } => Some(*id),
        }
    }

    /// Run `action` now (eager) or queue it (lazy).
    ///
    /// # Errors
    /// Returns the action's error when it runs inline, and
    /// [`Error::ScopeDiscarded`](crate::Error::ScopeDiscarded) after [`discard`](Self::discard).
    pub fn enqueue<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        match &self.kind {
            ScopeKind::Eager => action(),
            ScopeKind::Lazy {
                id,
                engine,
                discarded,
            } => engine.enqueue(*id, discarded, Box::new(action) as Action),
        }
    }

    /// Run this scope's queued actions now, in enqueue order.
    ///
    /// A no-op when called from one of this scope's own actions.
    pub fn flush(&self) -> Result<()> {
        match &self.kind {
            ScopeKind::Eager => Ok(()),
            ScopeKind::Lazy { id, engine, .. } => engine.flush(Some(*id)),
        }
    }

    /// Drop this scope's queued actions without running them.
    pub fn discard(&self) {
        if let ScopeKind::Lazy {
            id,
            engine,
            discarded,
        } = &self.kind
        {
            engine.discard(*id, discarded);
        }
    }
}

impl Drop for InitScope {
    fn drop(&mut self) {
        self.discard();
    }
}
