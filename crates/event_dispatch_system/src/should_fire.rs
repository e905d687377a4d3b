//! Activation registry ("should fire")
//!
//! A process-wide table of boolean activation cells, one per tracked event
//! type, that lets event-producing game code decide in O(1) whether anyone
//! could possibly be listening before paying for cause construction and
//! dispatch.
//!
//! Registration propagates reference counts across the type lattice in both
//! directions: registering a listener for a general type activates every
//! tracked descendant (a general listener observes concrete events too), and
//! registering for a concrete leaf activates every tracked ancestor (generic
//! code checking the ancestor flag must not wrongly skip). Siblings are never
//! touched.
//!
//! `query` is a single atomic read and never blocks; the refcount walk is
//! serialized behind one mutex because registration is rare.

use crate::lattice::{EventLattice, TypeToken};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::any::TypeId;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

/// One tracked flag: the advisory boolean the hot path reads, plus the
/// number of live registrations referencing it.
struct ActivationCell {
    token: TypeToken,
    active: AtomicBool,
    refs: AtomicU32,
}

/// Snapshot of one cell, for diagnostics.
#[derive(Debug, Clone)]
pub struct ActivationSnapshot {
    pub token: TypeToken,
    pub active: bool,
    pub refs: u32,
}

/// Process-wide activation table.
///
/// The tracked-flag set is fixed at construction from every type registered
/// in the lattice at that point; it is the analog of introspecting the
/// event-factory surface at startup.
pub struct ShouldFire {
    lattice: Arc<EventLattice>,
    cells: DashMap<TypeId, Arc<ActivationCell>>,
    /// Serializes the refcount/propagation walk. Queries never take it.
    write_lock: Mutex<()>,
}

impl ShouldFire {
    /// Builds the table over every type currently in the lattice.
    pub fn new(lattice: Arc<EventLattice>) -> Self {
        let cells = DashMap::new();
        for token in lattice.registered_types() {
            cells.insert(
                token.id(),
                Arc::new(ActivationCell {
                    token,
                    active: AtomicBool::new(false),
                    refs: AtomicU32::new(0),
                }),
            );
        }
        debug!("Activation registry tracking {} event types", cells.len());
        Self {
            lattice,
            cells,
            write_lock: Mutex::new(()),
        }
    }

    /// Hot-path read: is any listener possibly interested in this type?
    ///
    /// Types that were not tracked at construction fail open so that events
    /// of late-registered types are still dispatched.
    #[inline]
    pub fn query(&self, token: TypeToken) -> bool {
        match self.cells.get(&token.id()) {
            Some(cell) => cell.active.load(Ordering::Relaxed),
            None => true,
        }
    }

    /// Records a listener registration for `token`, activating every tracked
    /// ancestor and descendant flag.
    pub fn register(&self, token: TypeToken) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.walk(token, |cell| {
            let previous = cell.refs.fetch_add(1, Ordering::Relaxed);
            if previous == 0 {
                cell.active.store(true, Ordering::Relaxed);
                debug!("🔔 Activated event flag {}", cell.token);
            }
        });
    }

    /// Mirror of [`register`](Self::register). A refcount underflow is an
    /// invariant violation in listener bookkeeping: it is logged loudly and
    /// clamped, never fatal, because the dispatch path must stay available.
    pub fn unregister(&self, token: TypeToken) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.walk(token, |cell| {
            let current = cell.refs.load(Ordering::Relaxed);
            if current == 0 {
                error!(
                    "❌ Activation refcount underflow for {}; unregister without matching register",
                    cell.token
                );
                return;
            }
            cell.refs.store(current - 1, Ordering::Relaxed);
            if current == 1 {
                cell.active.store(false, Ordering::Relaxed);
                debug!("🔕 Deactivated event flag {}", cell.token);
            }
        });
    }

    /// Applies `apply` to every tracked cell whose type is an ancestor or a
    /// descendant of `token` (including the cell for `token` itself).
    fn walk(&self, token: TypeToken, apply: impl Fn(&ActivationCell)) {
        let Some(closure) = self.lattice.supertype_closure(token) else {
            error!(
                "❌ Activation walk for unregistered event type {}; ignoring",
                token
            );
            return;
        };
        for entry in self.cells.iter() {
            let cell = entry.value();
            let flag = cell.token;
            let related = closure.contains(&flag.id())
                || self
                    .lattice
                    .supertype_closure(flag)
                    .map(|c| c.contains(&token.id()))
                    .unwrap_or(false);
            if related {
                apply(cell);
            }
        }
    }

    /// Number of tracked flags.
    pub fn tracked(&self) -> usize {
        self.cells.len()
    }

    /// Number of currently active flags.
    pub fn active(&self) -> usize {
        self.cells
            .iter()
            .filter(|e| e.value().active.load(Ordering::Relaxed))
            .count()
    }

    /// Full table snapshot for diagnostics.
    pub fn snapshot(&self) -> Vec<ActivationSnapshot> {
        self.cells
            .iter()
            .map(|e| {
                let cell = e.value();
                ActivationSnapshot {
                    token: cell.token,
                    active: cell.active.load(Ordering::Relaxed),
                    refs: cell.refs.load(Ordering::Relaxed),
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for ShouldFire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShouldFire")
            .field("tracked", &self.tracked())
            .field("active", &self.active())
            .finish()
    }
}

static GLOBAL: OnceCell<ShouldFire> = OnceCell::new();

/// Explicitly initializes the process-wide registry over a lattice. Later
/// calls return the already-initialized registry unchanged.
pub fn init_global(lattice: Arc<EventLattice>) -> &'static ShouldFire {
    GLOBAL.get_or_init(|| ShouldFire::new(lattice))
}

/// The process-wide registry, if [`init_global`] has run.
pub fn global() -> Option<&'static ShouldFire> {
    GLOBAL.get()
}
