//! Fan-out of the host's single resolution-failure hook.
//!
//! The host exposes one slot. The multiplexer occupies it only while at least
//! one handler is subscribed and forwards each failure to every handler in
//! subscription order until one produces a module.

use crate::host::{LoadedModule, ResolutionHost, ResolveRequest};
use crate::sync::lock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace};

/// A subscribed resolution handler.
pub type Handler = Arc<dyn Fn(&ResolveRequest) -> Option<LoadedModule> + Send + Sync>;

/// Subscription token returned by [`ResolutionMultiplexer::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct Subscribers {
    handlers: Vec<(HandlerId, Handler)>,
    /// Bumped on every subscribe/unsubscribe.
    generation: u64,
    attached: bool,
}

/// Multiplexes one host hook across many subscribers.
pub struct ResolutionMultiplexer {
    host: Arc<dyn ResolutionHost>,
    this: Weak<ResolutionMultiplexer>,
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ResolutionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subs = lock(&self.subscribers);
        f.debug_struct("ResolutionMultiplexer")
            .field("handlers", &subs.handlers.len())
            .field("generation", &subs.generation)
            .field("attached", &subs.attached)
            .finish()
    }
}

impl ResolutionMultiplexer {
    /// Create a multiplexer for `host`. Nothing is attached until the first subscription.
    #[must_use]
    pub fn new(host: Arc<dyn ResolutionHost>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            host,
            this: this.clone(),
            subscribers: Mutex::new(Subscribers::default()),
            next_id: AtomicU64::new(0),
        })
    }

    /// The host this multiplexer is bound to.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn ResolutionHost> {
        &self.host
    }

    /// Subscribe a handler, attaching to the host if this is the first one.
    pub fn subscribe<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ResolveRequest) -> Option<LoadedModule> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = lock(&self.subscribers);
        subs.handlers.push((id, Arc::new(handler)));
        subs.generation += 1;

        if !subs.attached {
            let this = self.this.clone();
            self.host.attach(Arc::new(move |request: &ResolveRequest| {
                this.upgrade()?.dispatch(request)
            }));
            subs.attached = true;
            debug!("attached resolution hook to host");
        }
        id
    }

    /// Remove a handler, detaching from the host when none remain.
    ///
    /// Returns `false` if the handler was not subscribed.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut subs = lock(&self.subscribers);
        let Some(pos) = subs.handlers.iter().position(|(h, _)| *h == id) else {
            return false;
        };
        subs.handlers.remove(pos);
        subs.generation += 1;

        if subs.handlers.is_empty() && subs.attached {
            self.host.detach();
            subs.attached = false;
            debug!("detached resolution hook from host");
        }
        true
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        lock(&self.subscribers).handlers.len()
    }

    /// Whether the host hook is currently wired.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        lock(&self.subscribers).attached
    }

    /// Offer `request` to each handler in order; the first answer wins.
    ///
    /// Handlers may subscribe or unsubscribe while being invoked. Each handler
    /// runs at most once per dispatch, handlers added mid-dispatch still run,
    /// and the dispatch ends once a full pass sees no change.
    pub fn dispatch(&self, request: &ResolveRequest) -> Option<LoadedModule> {
        let (snapshot, generation) = self.snapshot();
        trace!(requested = %request.requested, handlers = snapshot.len(), "dispatching resolution request");

        for (index, (_, handler)) in snapshot.iter().enumerate() {
            if let Some(found) = handler(request) {
                return Some(found);
            }
            if self.generation() != generation {
                let invoked = snapshot[..=index].iter().map(|(id, _)| *id).collect();
                return self.dispatch_changing(request, invoked);
            }
        }
        None
    }

    /// Slow path once the subscription set changed under a dispatch.
    fn dispatch_changing(
        &self,
        request: &ResolveRequest,
        mut invoked: HashSet<HandlerId>,
    ) -> Option<LoadedModule> {
        loop {
            let (live, generation) = self.snapshot();
            let mut ran_any = false;

            for (id, handler) in &live {
                if !invoked.insert(*id) {
                    continue;
                }
                ran_any = true;
                if let Some(found) = handler(request) {
                    return Some(found);
                }
            }

            // Stable across a full pass, or nothing new left to call.
            if !ran_any || self.generation() == generation {
                return None;
            }
        }
    }

    fn snapshot(&self) -> (Vec<(HandlerId, Handler)>, u64) {
        let subs = lock(&self.subscribers);
        (subs.handlers.clone(), subs.generation)
    }

    fn generation(&self) -> u64 {
        lock(&self.subscribers).generation
    }
}

impl Drop for ResolutionMultiplexer {
    fn drop(&mut self) {
        let subs = lock(&self.subscribers);
        if subs.attached {
            self.host.detach();
        }
    }
}
