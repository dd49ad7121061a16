//! Deferred initialization engine.
//!
//! Descriptor setup must not run from inside a module's one-time
//! initializer: some hosts have global state that is sensitive to when it is
//! first touched. Setup is queued instead and runs the first time a
//! resolution actually fails, by which point host startup is over.
//!
//! The "done" flag lives in an [`InitGate`]. Once any flush has started it is
//! set for good, and every scope created afterwards is eager.
//!
//! Locking model:
//! - one engine mutex protects the pending list, the progress table and the
//!   multiplexer subscription;
//! - a scope's *progress lock* is an entry `scope -> thread` in the progress
//!   table, held while that thread runs the scope's actions;
//! - a flush of a scope whose progress lock the caller already holds is a
//!   no-op, and a thread holding any progress lock never waits, so no thread
//!   ever waits on itself or on a thread that waits on it.

mod scope;

pub use scope::InitScope;

use crate::error::{Error, Result};
use crate::multiplexer::{HandlerId, ResolutionMultiplexer};
use crate::sync::{lock, wait};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, ThreadId};
use tracing::{debug, trace, warn};

/// A unit of deferred setup work.
pub type Action = Box<dyn FnOnce() -> Result<()> + Send>;

/// Monotonic "initialization has happened" flag.
#[derive(Debug, Default)]
pub struct InitGate {
    done: AtomicBool,
}

impl InitGate {
    /// A gate that has not fired yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A gate that has already fired: every scope created over it is eager.
    #[must_use]
    pub fn completed() -> Self {
        Self {
            done: AtomicBool::new(true),
        }
    }

    /// The process-wide gate.
    #[must_use]
    pub fn global() -> Arc<InitGate> {
        static GLOBAL: OnceLock<Arc<InitGate>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(InitGate::new())).clone()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn mark_done(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            debug!("deferred initialization period is over");
        }
    }
}

/// Identifies a lazy scope within its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Pending {
    scope: ScopeId,
    action: Action,
}

#[derive(Default)]
struct EngineState {
    /// Queued actions across all scopes, in enqueue order.
    pending: Vec<Pending>,
    /// Progress locks: scope -> thread running its actions.
    progress: HashMap<ScopeId, ThreadId>,
    subscription: Option<HandlerId>,
}

pub(crate) struct EngineShared {
    gate: Arc<InitGate>,
    state: Mutex<EngineState>,
    /// Signalled whenever progress locks are released.
    released: Condvar,
    next_scope: AtomicU64,
    multiplexer: Option<Arc<ResolutionMultiplexer>>,
}

/// Schedules descriptor setup and runs it at most once.
#[derive(Clone)]
pub struct InitEngine {
    shared: Arc<EngineShared>,
}

impl std::fmt::Debug for InitEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("InitEngine")
            .field("done", &self.shared.gate.is_done())
            .field("pending", &state.pending.len())
            .field("in_progress", &state.progress.len())
            .field("subscribed", &state.subscription.is_some())
            .finish()
    }
}

impl InitEngine {
    /// Engine over `gate` that is only flushed explicitly.
    #[must_use]
    pub fn new(gate: Arc<InitGate>) -> Self {
        Self::with_multiplexer(gate, None)
    }

    /// Engine over `gate` that flushes everything the first time any
    /// resolution request reaches `multiplexer`.
    #[must_use]
    pub fn attached(gate: Arc<InitGate>, multiplexer: &Arc<ResolutionMultiplexer>) -> Self {
        Self::with_multiplexer(gate, Some(multiplexer.clone()))
    }

    fn with_multiplexer(gate: Arc<InitGate>, multiplexer: Option<Arc<ResolutionMultiplexer>>) -> Self {
        let shared = Arc::new(EngineShared {
            gate,
            state: Mutex::new(EngineState::default()),
            released: Condvar::new(),
            next_scope: AtomicU64::new(0),
            multiplexer,
        });

        if let Some(mux) = &shared.multiplexer {
            // Subscribe under the engine lock so a dispatch racing with
            // construction always sees the stored subscription.
            let mut state = lock(&shared.state);
            if !shared.gate.is_done() {
                let weak = Arc::downgrade(&shared);
                state.subscription = Some(mux.subscribe(move |request| {
                    let shared = weak.upgrade()?;
                    if let Err(e) = shared.flush(None) {
                        warn!(
                            requested = %request.requested,
                            error = %e,
                            "deferred initialization failed while handling a resolution request"
                        );
                    }
                    None
                }));
            }
        }

        Self { shared }
    }

    /// The gate this engine reads and sets.
    #[must_use]
    pub fn gate(&self) -> &Arc<InitGate> {
        &self.shared.gate
    }

    /// An eager scope once the gate has fired, a lazy one before.
    #[must_use]
    pub fn create_scope(&self) -> InitScope {
        if self.shared.gate.is_done() {
            InitScope::eager()
        } else {
            let id = ScopeId(self.shared.next_scope.fetch_add(1, Ordering::Relaxed));
            InitScope::lazy(id, self.shared.clone())
        }
    }

    /// Run every pending action now.
    pub fn flush(&self) -> Result<()> {
        self.shared.flush(None)
    }

    /// Number of queued, not yet started actions.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.state).pending.len()
    }

    /// Whether the engine still listens for resolution requests.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        lock(&self.shared.state).subscription.is_some()
    }

    /// Stop listening for resolution requests without flushing.
    pub(crate) fn unsubscribe(&self) {
        let subscription = lock(&self.shared.state).subscription.take();
        if let (Some(id), Some(mux)) = (subscription, &self.shared.multiplexer) {
            mux.unsubscribe(id);
        }
    }
}

impl EngineShared {
    /// Queue `action` for `scope`, or run it now if the deferred period has
    /// ended since the scope was created.
    pub(crate) fn enqueue(&self, scope: ScopeId, discarded: &AtomicBool, action: Action) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if discarded.load(Ordering::Relaxed) {
                return Err(Error::ScopeDiscarded);
            }
            if !self.gate.is_done() {
                state.pending.push(Pending { scope, action });
                trace!(scope = %scope, pending = state.pending.len(), "queued deferred action");
                return Ok(());
            }
        }

        // Too late to defer: catch up on this scope, then run inline.
        let flushed = self.flush(Some(scope));
        let ran = action();
        Error::collect(flushed.err().into_iter().chain(ran.err()).collect())
    }

    /// Run the pending actions of `target`, or of every scope when `None`.
    pub(crate) fn flush(&self, target: Option<ScopeId>) -> Result<()> {
        let me = thread::current().id();
        let mut state = lock(&self.state);

        if let Some(scope) = target {
            if state.progress.get(&scope) == Some(&me) {
                trace!(scope = %scope, "flush re-entered from the scope's own action");
                return Ok(());
            }
        }

        let nested = state.progress.values().any(|owner| *owner == me);
        if !nested {
            while Self::busy(&state, target) {
                state = wait(&self.released, state);
            }
        }

        // Set together with taking the work: nothing is appended after this.
        self.gate.mark_done();

        let queued = std::mem::take(&mut state.pending);
        let (selected, kept): (Vec<Pending>, Vec<Pending>) = queued.into_iter().partition(|p| {
            target.map_or(true, |t| p.scope == t) && !state.progress.contains_key(&p.scope)
        });
        state.pending = kept;

        let unsubscribe = if target.is_none() && state.pending.is_empty() {
            state.subscription.take()
        } else {
            None
        };

        let groups = group_by_scope(selected);
        for (scope, _) in &groups {
            state.progress.insert(*scope, me);
        }
        drop(state);

        if let (Some(id), Some(mux)) = (unsubscribe, &self.multiplexer) {
            mux.unsubscribe(id);
            debug!("deferred initialization complete, engine unsubscribed");
        }

        if groups.is_empty() {
            return Ok(());
        }
        debug!(
            scopes = groups.len(),
            actions = groups.iter().map(|(_, a)| a.len()).sum::<usize>(),
            nested,
            "running deferred actions"
        );

        let mut guard = ProgressGuard {
            shared: self,
            held: groups.iter().map(|(scope, _)| *scope).collect(),
        };
        let mut failures = Vec::new();
        for (scope, actions) in groups {
            for action in actions {
                // A panic counts as a failure of this action only.
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(action)).unwrap_or_else(|payload| {
                        Err(Error::other(format!(
                            "deferred action panicked: {}",
                            panic_message(payload.as_ref())
                        )))
                    });
                if let Err(e) = outcome {
                    warn!(scope = %scope, error = %e, "deferred action failed");
                    failures.push(e);
                }
            }
            guard.release(scope);
        }

        Error::collect(failures)
    }

    /// Drop the not-yet-started actions of `scope`.
    pub(crate) fn discard(&self, scope: ScopeId, discarded: &AtomicBool) {
        let dropped: Vec<Pending> = {
            let mut state = lock(&self.state);
            if discarded.swap(true, Ordering::Relaxed) {
                return;
            }
            let queued = std::mem::take(&mut state.pending);
            let (dropped, kept): (Vec<Pending>, Vec<Pending>) =
                queued.into_iter().partition(|p| p.scope == scope);
            state.pending = kept;
            dropped
        };

        if !dropped.is_empty() {
            debug!(scope = %scope, dropped = dropped.len(), "discarded deferred actions");
        }
        // Closures are dropped outside the engine lock.
        drop(dropped);
    }

    /// Whether another thread is mid-flush for the target.
    fn busy(state: &EngineState, target: Option<ScopeId>) -> bool {
        match target {
            Some(scope) => state.progress.contains_key(&scope),
            None => !state.progress.is_empty(),
        }
    }

    fn release(&self, scopes: &[ScopeId]) {
        let me = thread::current().id();
        {
            let mut state = lock(&self.state);
            for scope in scopes {
                let owner = state.progress.remove(scope);
                debug_assert_eq!(owner, Some(me), "progress lock for scope {scope} not held by this thread");
            }
        }
        self.released.notify_all();
    }
}

impl Drop for EngineShared {
    fn drop(&mut self) {
        let subscription = self
            .state
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .subscription
            .take();
        if let (Some(id), Some(mux)) = (subscription, &self.multiplexer) {
            mux.unsubscribe(id);
        }
    }
}

/// Releases whatever progress locks are still held when a flush unwinds.
struct ProgressGuard<'a> {
    shared: &'a EngineShared,
    held: Vec<ScopeId>,
}

impl ProgressGuard<'_> {
    fn release(&mut self, scope: ScopeId) {
        self.held.retain(|s| *s != scope);
        self.shared.release(&[scope]);
    }
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            self.shared.release(&self.held);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Group actions by scope, scopes ordered by their first queued action.
fn group_by_scope(selected: Vec<Pending>) -> Vec<(ScopeId, Vec<Action>)> {
    let mut groups: Vec<(ScopeId, Vec<Action>)> = Vec::new();
    for Pending { scope, action } in selected {
        match groups.iter_mut().find(|(s, _)| *s == scope) {
            Some((_, actions)) => actions.push(action),
            None => groups.push((scope, vec![action])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InProcessHost, ResolveRequest};
    use crate::identity::{ModuleIdentity, ModuleVersion};
    use std::sync::atomic::AtomicUsize;

    fn fresh() -> InitEngine {
        InitEngine::new(Arc::new(InitGate::new()))
    }

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Action) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &'static str| -> Action {
            let sink = sink.clone();
            Box::new(move || {
                lock(&sink).push(label);
                Ok(())
            })
        };
        (log, make)
    }

    #[test]
    fn test_scope_kind_follows_gate() {
        let engine = fresh();
        assert!(engine.create_scope().is_lazy());

        let done = InitEngine::new(Arc::new(InitGate::completed()));
        assert!(!done.create_scope().is_lazy());
    }

    #[test]
    fn test_eager_scope_runs_inline() {
        let engine = InitEngine::new(Arc::new(InitGate::completed()));
        let (log, make) = recorder();
        let scope = engine.create_scope();
        scope.enqueue(make("now")).unwrap();
        assert_eq!(*lock(&log), ["now"]);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_lazy_scope_waits_for_flush() {
        let engine = fresh();
        let (log, make) = recorder();
        let scope = engine.create_scope();
        scope.enqueue(make("a")).unwrap();
        assert!(lock(&log).is_empty());
        assert_eq!(engine.pending_count(), 1);
        assert!(!engine.gate().is_done());

        engine.flush().unwrap();
        assert_eq!(*lock(&log), ["a"]);
        assert!(engine.gate().is_done());
    }

    #[test]
    fn test_scope_flush_only_runs_its_own_actions() {
        let engine = fresh();
        let (log, make) = recorder();
        let s1 = engine.create_scope();
        let s2 = engine.create_scope();
        s1.enqueue(make("s1")).unwrap();
        s2.enqueue(make("s2")).unwrap();

        s2.flush().unwrap();
        assert_eq!(*lock(&log), ["s2"]);
        assert_eq!(engine.pending_count(), 1);
    }

    #[test]
    fn test_enqueue_after_done_catches_up_then_runs_inline() {
        let engine = fresh();
        let (log, make) = recorder();
        let s1 = engine.create_scope();
        let s2 = engine.create_scope();
        s1.enqueue(make("first")).unwrap();
        s2.enqueue(make("other")).unwrap();

        s2.flush().unwrap();
        assert!(engine.gate().is_done());

        s1.enqueue(make("second")).unwrap();
        assert_eq!(*lock(&log), ["other", "first", "second"]);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_discarded_scope_rejects_enqueue() {
        let engine = fresh();
        let (_log, make) = recorder();
        let scope = engine.create_scope();
        scope.discard();
        scope.discard();
        assert!(matches!(scope.enqueue(make("x")), Err(Error::ScopeDiscarded)));
        assert!(scope.flush().is_ok());
    }

    #[test]
    fn test_dropped_scope_discards_pending() {
        let engine = fresh();
        let (log, make) = recorder();
        let scope = engine.create_scope();
        scope.enqueue(make("never")).unwrap();
        drop(scope);

        engine.flush().unwrap();
        assert!(lock(&log).is_empty());
    }

    #[test]
    fn test_failures_are_collected_without_aborting_siblings() {
        let engine = fresh();
        let (log, make) = recorder();
        let s1 = engine.create_scope();
        let s2 = engine.create_scope();
        s1.enqueue(|| Err(Error::other("s1 broke"))).unwrap();
        s2.enqueue(|| Err(Error::other("s2 broke"))).unwrap();
        s1.enqueue(make("s1 after failure")).unwrap();

        let err = engine.flush().unwrap_err();
        let Error::Aggregate(failures) = err else {
            panic!("expected aggregate");
        };
        let messages: Vec<_> = failures.iter().map(ToString::to_string).collect();
        assert_eq!(messages, ["s1 broke", "s2 broke"]);
        assert_eq!(*lock(&log), ["s1 after failure"]);
    }

    #[test]
    fn test_single_failure_is_returned_as_is() {
        let engine = fresh();
        let scope = engine.create_scope();
        scope.enqueue(|| Err(Error::other("only one"))).unwrap();
        let err = engine.flush().unwrap_err();
        assert!(matches!(err, Error::Other(ref m) if m == "only one"));
    }

    #[test]
    fn test_panicking_action_is_reported_and_releases_progress_lock() {
        let engine = fresh();
        let scope = engine.create_scope();
        scope.enqueue(|| panic!("action exploded")).unwrap();

        let err = engine.flush().unwrap_err();
        assert!(matches!(err, Error::Other(ref m) if m.contains("action exploded")));

        assert!(scope.flush().is_ok());
        assert!(lock(&engine.shared.state).progress.is_empty());
    }

    #[test]
    fn test_panicking_action_does_not_abort_sibling_scopes() {
        let engine = fresh();
        let (log, make) = recorder();
        let bad = engine.create_scope();
        let good = engine.create_scope();
        bad.enqueue(|| panic!("setup exploded")).unwrap();
        bad.enqueue(make("bad after panic")).unwrap();
        good.enqueue(make("good")).unwrap();

        let err = engine.flush().unwrap_err();
        assert!(matches!(err, Error::Other(ref m) if m.contains("setup exploded")));
        assert_eq!(*lock(&log), ["bad after panic", "good"]);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_action_flushing_its_own_scope_returns() {
        let engine = fresh();
        let (log, make) = recorder();
        let scope = engine.create_scope();
        let scope_id = scope.id().unwrap();
        let shared = engine.shared.clone();
        let inner = make("inner");

        scope
            .enqueue(move || {
                shared.flush(Some(scope_id))?;
                inner()
            })
            .unwrap();
        scope.enqueue(make("after")).unwrap();

        engine.flush().unwrap();
        assert_eq!(*lock(&log), ["inner", "after"]);
        assert!(lock(&engine.shared.state).progress.is_empty());
    }

    #[test]
    fn test_attached_engine_flushes_on_first_request_then_unsubscribes() {
        let host = Arc::new(InProcessHost::new());
        let mux = ResolutionMultiplexer::new(host.clone());
        let engine = InitEngine::attached(Arc::new(InitGate::new()), &mux);
        assert!(engine.is_subscribed());
        assert!(host.is_hooked());

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let scope = engine.create_scope();
        scope
            .enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let request = ResolveRequest::new(ModuleIdentity::new("Missing", ModuleVersion::default()));
        assert_eq!(host.resolve(&request), None);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // A second request finds nothing left to run.
        assert_eq!(host.resolve(&request), None);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        assert!(!engine.create_scope().is_lazy());
        assert!(!engine.is_subscribed());
        assert!(!host.is_hooked());
    }

    #[test]
    fn test_attached_engine_over_completed_gate_never_subscribes() {
        let host = Arc::new(InProcessHost::new());
        let mux = ResolutionMultiplexer::new(host.clone());
        let engine = InitEngine::attached(Arc::new(InitGate::completed()), &mux);
        assert!(!engine.is_subscribed());
        assert!(!host.is_hooked());
    }

    #[test]
    fn test_dropping_engine_unsubscribes() {
        let host = Arc::new(InProcessHost::new());
        let mux = ResolutionMultiplexer::new(host.clone());
        let engine = InitEngine::attached(Arc::new(InitGate::new()), &mux);
        assert_eq!(mux.handler_count(), 1);
        drop(engine);
        assert_eq!(mux.handler_count(), 0);
        assert!(!host.is_hooked());
    }

    #[test]
    fn test_group_by_scope_orders_by_first_appearance() {
        let noop = || -> Action { Box::new(|| Ok(())) };
        let groups = group_by_scope(vec![
            Pending { scope: ScopeId(2), action: noop() },
            Pending { scope: ScopeId(1), action: noop() },
            Pending { scope: ScopeId(2), action: noop() },
        ]);
        let shape: Vec<_> = groups.iter().map(|(s, a)| (s.0, a.len())).collect();
        assert_eq!(shape, [(2, 2), (1, 1)]);
    }
}
