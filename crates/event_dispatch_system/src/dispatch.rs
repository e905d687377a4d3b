//! Dispatch orchestrator
//!
//! The registration and raise surface consumed by game logic and plugins.
//! Registration resolves and compiles a listener's filter directives (sharing
//! compiled artifacts across captureless handlers), records the registration,
//! and updates the activation registry. `raise` runs synchronously on the calling
//! thread: it checks the concrete type's activation flag first and returns
//! immediately when nobody could care, otherwise walks the interested
//! listeners in priority order, isolating every per-listener failure.

use crate::adapter::{InvokeOutcome, ListenerAdapter, ListenerFn};
use crate::error::{EventError, FilterError};
use crate::event::GameEvent;
use crate::filter::{
    resolve, CompiledFilter, ExtractedArgs, ListenerDescriptor, ListenerSpec, MethodCache, Order,
};
use crate::lattice::{EventLattice, TypeToken};
use crate::monitoring::DispatchStats;
use crate::should_fire::ShouldFire;
use dashmap::DashMap;
use smallvec::SmallVec;
use std::any::TypeId;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Identity of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PluginId(pub Uuid);

impl PluginId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PluginId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PluginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ListenerId(pub Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle returned from registration; passing it back unregisters exactly
/// that listener.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationHandle {
    pub listener: ListenerId,
    pub plugin: PluginId,
    pub event: TypeToken,
}

/// One recorded registration.
struct ListenerRegistration {
    id: ListenerId,
    plugin: PluginId,
    event: TypeToken,
    order: Order,
    /// Registration sequence, breaking priority ties deterministically
    seq: u64,
    adapter: Arc<ListenerAdapter>,
}

/// One listener's failure during dispatch, reported through
/// [`DispatchResult`] instead of raised to the caller of `raise`.
#[derive(Debug)]
pub struct ListenerFailure {
    pub listener: ListenerId,
    pub plugin: PluginId,
    pub error: EventError,
}

/// Outcome of raising one event.
#[derive(Debug)]
pub struct DispatchResult {
    pub event: TypeToken,
    /// False when the activation check short-circuited the raise
    pub dispatched: bool,
    /// Listeners whose adapter matched and ran
    pub invoked: usize,
    /// Listeners whose filter rejected the event
    pub filtered: usize,
    pub failures: Vec<ListenerFailure>,
    /// Final cancellation state, when the event carries the capability
    pub cancelled: Option<bool>,
}

impl DispatchResult {
    fn skipped(event: TypeToken) -> Self {
        Self {
            event,
            dispatched: false,
            invoked: 0,
            filtered: 0,
            failures: Vec::new(),
            cancelled: None,
        }
    }

    /// True when the event ended up cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.unwrap_or(false)
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// The dispatch orchestrator.
pub struct EventDispatcher {
    lattice: Arc<EventLattice>,
    should_fire: Arc<ShouldFire>,
    /// Registrations keyed by the registered (possibly abstract) event type
    listeners: DashMap<TypeId, Vec<ListenerRegistration>>,
    /// Shared adapters for captureless handler types
    adapters: MethodCache<ListenerAdapter>,
    /// Serializes registration and unregistration; `raise` never takes it
    registration_lock: Mutex<()>,
    seq: AtomicU64,
    stats: DispatchStats,
}

impl EventDispatcher {
    /// Builds a dispatcher with its own activation registry over the lattice.
    pub fn new(lattice: Arc<EventLattice>) -> Self {
        let should_fire = Arc::new(ShouldFire::new(lattice.clone()));
        Self::with_activation(lattice, should_fire)
    }

    /// Builds a dispatcher over a shared activation registry (e.g. the
    /// process-wide one).
    pub fn with_activation(lattice: Arc<EventLattice>, should_fire: Arc<ShouldFire>) -> Self {
        Self {
            lattice,
            should_fire,
            listeners: DashMap::new(),
            adapters: MethodCache::new(),
            registration_lock: Mutex::new(()),
            seq: AtomicU64::new(0),
            stats: DispatchStats::new(),
        }
    }

    pub fn lattice(&self) -> &Arc<EventLattice> {
        &self.lattice
    }

    pub fn activation(&self) -> &ShouldFire {
        &self.should_fire
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    fn build_adapter(&self, spec: ListenerSpec, target: ListenerFn) -> ListenerAdapter {
        if spec.is_empty() {
            // Common case: nothing to filter, nothing to compile
            ListenerAdapter::direct(target)
        } else {
            let filter = CompiledFilter::compile(self.lattice.clone(), Arc::new(spec));
            ListenerAdapter::filtered(filter, target)
        }
    }

    /// Picks the adapter for one registration.
    ///
    /// Only handlers whose Rust type is zero-sized may share a cached
    /// adapter: a closure type with captures is one `TypeId` over many
    /// behaviors, so caching it would replay the first registration's
    /// captured state. A shared candidate is used only when it was built
    /// from an equivalent spec, so the same fn item registered under
    /// different directives keeps each filter intact.
    fn adapter_for<F: 'static>(
        &self,
        spec: ListenerSpec,
        target: ListenerFn,
    ) -> Arc<ListenerAdapter> {
        if std::mem::size_of::<F>() != 0 {
            return Arc::new(self.build_adapter(spec, target));
        }
        let candidate = {
            let spec = spec.clone();
            let target = target.clone();
            self.adapters.get_or_insert_with(TypeId::of::<F>(), move || {
                Arc::new(self.build_adapter(spec, target))
            })
        };
        if candidate.matches_spec(&spec) {
            candidate
        } else {
            Arc::new(self.build_adapter(spec, target))
        }
    }

    /// Registers a listener described by `descriptor`.
    ///
    /// The handler receives the event and the extracted arguments for its
    /// extra parameters, in declared order. Any invalid directive combination
    /// fails here, before anything is recorded: no partial registration and
    /// no activation-table mutation happens on error.
    pub fn register<F>(
        &self,
        plugin: PluginId,
        descriptor: ListenerDescriptor,
        handler: F,
    ) -> Result<RegistrationHandle, FilterError>
    where
        F: Fn(&dyn GameEvent, &ExtractedArgs) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let event = descriptor.event;
        let order = descriptor.order;

        // Resolve first: every hard failure happens before any mutation.
        let spec = resolve(&self.lattice, &descriptor)?;
        let adapter = self.adapter_for::<F>(spec, Arc::new(handler));

        let id = ListenerId::new();
        {
            let _guard = self
                .registration_lock
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            self.listeners
                .entry(event.id())
                .or_default()
                .push(ListenerRegistration {
                    id,
                    plugin,
                    event,
                    order,
                    seq,
                    adapter,
                });
            self.should_fire.register(event);
        }
        self.stats.record_registration();

        info!("📝 Registered listener {} for {} (plugin {})", id, event, plugin);
        Ok(RegistrationHandle {
            listener: id,
            plugin,
            event,
        })
    }

    /// Registers a plain listener for the exact concrete event type `E`,
    /// with no filter directives at all.
    pub fn register_exact<E, F>(
        &self,
        plugin: PluginId,
        order: Order,
        handler: F,
    ) -> Result<RegistrationHandle, FilterError>
    where
        E: GameEvent,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let event = TypeToken::of::<E>();
        if !self.lattice.contains(event) {
            return Err(FilterError::UnknownType(event.name()));
        }

        // Same sharing rule as `register`: only captureless handlers may
        // reuse a cached adapter.
        let adapter = if std::mem::size_of::<F>() == 0 {
            self.adapters
                .get_or_insert_with(TypeId::of::<F>(), || {
                    Arc::new(ListenerAdapter::direct_typed(handler))
                })
        } else {
            Arc::new(ListenerAdapter::direct_typed(handler))
        };

        let id = ListenerId::new();
        {
            let _guard = self
                .registration_lock
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            self.listeners
                .entry(event.id())
                .or_default()
                .push(ListenerRegistration {
                    id,
                    plugin,
                    event,
                    order,
                    seq,
                    adapter,
                });
            self.should_fire.register(event);
        }
        self.stats.record_registration();

        info!("📝 Registered listener {} for {} (plugin {})", id, event, plugin);
        Ok(RegistrationHandle {
            listener: id,
            plugin,
            event,
        })
    }

    /// Removes one registration. Returns false when the handle is unknown
    /// (e.g. already unregistered).
    pub fn unregister(&self, handle: &RegistrationHandle) -> bool {
        let _guard = self
            .registration_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let removed = match self.listeners.get_mut(&handle.event.id()) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|r| r.id != handle.listener);
                before != entry.len()
            }
            None => false,
        };
        if removed {
            self.should_fire.unregister(handle.event);
            self.stats.record_unregistration();
            debug!("Unregistered listener {} for {}", handle.listener, handle.event);
        }
        removed
    }

    /// Removes every registration owned by a plugin, decrementing matching
    /// activation cells once per removed registration. Returns the count.
    pub fn unregister_plugin(&self, plugin: PluginId) -> usize {
        let _guard = self
            .registration_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let mut removed: Vec<TypeToken> = Vec::new();
        for mut entry in self.listeners.iter_mut() {
            entry.value_mut().retain(|r| {
                if r.plugin == plugin {
                    removed.push(r.event);
                    false
                } else {
                    true
                }
            });
        }
        for token in &removed {
            self.should_fire.unregister(*token);
            self.stats.record_unregistration();
        }
        if !removed.is_empty() {
            info!("🧹 Unregistered {} listeners for plugin {}", removed.len(), plugin);
        }
        removed.len()
    }

    /// Raises an event synchronously on the calling thread.
    pub fn raise(&self, event: &dyn GameEvent) -> DispatchResult {
        let token = event.token();
        self.stats.record_raise();

        if !self.should_fire.query(token) {
            self.stats.record_skip();
            return DispatchResult::skipped(token);
        }

        // Every registration whose registered type is an ancestor of the
        // concrete type observes this event.
        let closure = match self.lattice.supertype_closure(token) {
            Some(closure) => closure,
            None => {
                error!("❌ Raised event of unregistered type {}", token);
                self.stats.record_skip();
                return DispatchResult::skipped(token);
            }
        };

        let mut batch: SmallVec<[(Order, u64, ListenerId, PluginId, Arc<ListenerAdapter>); 8]> =
            SmallVec::new();
        for type_id in closure.iter() {
            if let Some(entry) = self.listeners.get(type_id) {
                for reg in entry.iter() {
                    batch.push((reg.order, reg.seq, reg.id, reg.plugin, reg.adapter.clone()));
                }
            }
        }
        batch.sort_unstable_by_key(|(order, seq, ..)| (*order, *seq));

        let mut invoked = 0;
        let mut filtered = 0;
        let mut failures = Vec::new();
        for (_, _, id, plugin, adapter) in batch {
            let outcome = catch_unwind(AssertUnwindSafe(|| adapter.invoke(event)));
            match outcome {
                Ok(Ok(InvokeOutcome::Invoked)) => invoked += 1,
                Ok(Ok(InvokeOutcome::Skipped)) => filtered += 1,
                Ok(Err(err)) => {
                    error!("❌ Listener {} failed during {}: {}", id, token, err);
                    self.stats.record_failure();
                    failures.push(ListenerFailure {
                        listener: id,
                        plugin,
                        error: err,
                    });
                }
                Err(panic) => {
                    let message = panic_message(panic);
                    error!("❌ Listener {} panicked during {}: {}", id, token, message);
                    self.stats.record_failure();
                    failures.push(ListenerFailure {
                        listener: id,
                        plugin,
                        error: EventError::ListenerPanicked(message),
                    });
                }
            }
        }
        self.stats.record_invocations(invoked as u64);

        DispatchResult {
            event: token,
            dispatched: true,
            invoked,
            filtered,
            failures,
            cancelled: event.as_cancellable().map(|c| c.is_cancelled()),
        }
    }

    /// Total live registrations.
    pub fn listener_count(&self) -> usize {
        self.listeners.iter().map(|e| e.value().len()).sum()
    }

    /// Live registrations recorded directly against one event type.
    pub fn listeners_for(&self, token: TypeToken) -> usize {
        self.listeners
            .get(&token.id())
            .map(|e| e.len())
            .unwrap_or(0)
    }

    /// Live shared adapters (one per captureless handler type still
    /// registered).
    pub fn shared_adapters(&self) -> usize {
        self.adapters.len()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listener_count())
            .field("activation", &self.should_fire)
            .finish()
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
