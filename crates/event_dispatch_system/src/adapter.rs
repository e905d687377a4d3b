//! Listener adapters
//!
//! An adapter is the callable the dispatcher actually runs: it applies the
//! listener's compiled filter (when it has one) and invokes the target with
//! the event plus the extracted arguments. Listeners with no filtering at all
//! get a direct adapter that skips straight to invocation.
//!
//! Adapters are shared structurally: one adapter per captureless handler
//! type, regardless of how many plugins register it. Handlers carrying
//! captured state get a private adapter per registration.

use crate::error::EventError;
use crate::event::GameEvent;
use crate::filter::{CompiledFilter, ExtractedArgs, ListenerSpec};
use smallvec::SmallVec;
use std::sync::Arc;

/// Boxed listener target. Receives the event (parameter 0) and the extracted
/// arguments for parameters 1..n, in declared order; the tuple is empty for
/// direct adapters.
pub type ListenerFn =
    Arc<dyn Fn(&dyn GameEvent, &ExtractedArgs) -> Result<(), EventError> + Send + Sync>;

/// What invoking an adapter did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeOutcome {
    /// The filter matched (or was absent) and the target ran
    Invoked,
    /// The filter rejected the event; the target was not called. A no-op,
    /// not an error.
    Skipped,
}

enum AdapterKind {
    Direct(ListenerFn),
    Filtered {
        filter: CompiledFilter,
        target: ListenerFn,
    },
}

/// The constructed callable for one listener method.
pub struct ListenerAdapter {
    kind: AdapterKind,
}

impl ListenerAdapter {
    /// Adapter for listeners with an empty spec: no filter is compiled and
    /// nothing is allocated per invocation.
    pub fn direct(target: ListenerFn) -> Self {
        Self {
            kind: AdapterKind::Direct(target),
        }
    }

    /// Adapter that runs the compiled filter before the target.
    pub fn filtered(filter: CompiledFilter, target: ListenerFn) -> Self {
        Self {
            kind: AdapterKind::Filtered { filter, target },
        }
    }

    /// Direct adapter for a listener that only wants events of the exact
    /// concrete type `E`. Events of other concrete types (including lattice
    /// subtypes, which are distinct Rust types) are skipped.
    pub fn direct_typed<E, F>(target: F) -> Self
    where
        E: GameEvent,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        Self::direct(Arc::new(move |event: &dyn GameEvent, _args: &ExtractedArgs| {
            match event.as_any().downcast_ref::<E>() {
                Some(typed) => target(typed),
                None => Ok(()),
            }
        }))
    }

    pub fn is_filtered(&self) -> bool {
        matches!(self.kind, AdapterKind::Filtered { .. })
    }

    /// Whether this adapter was built from an equivalent spec. Registration
    /// shares a cached adapter only when the specs agree; the same handler
    /// registered under different directives keeps each filter intact.
    pub fn matches_spec(&self, spec: &ListenerSpec) -> bool {
        match &self.kind {
            AdapterKind::Direct(_) => spec.is_empty(),
            AdapterKind::Filtered { filter, .. } => filter.spec() == spec,
        }
    }

    /// Runs the adapter against one event.
    pub fn invoke(&self, event: &dyn GameEvent) -> Result<InvokeOutcome, EventError> {
        match &self.kind {
            AdapterKind::Direct(target) => {
                let args: ExtractedArgs = SmallVec::new();
                target(event, &args)?;
                Ok(InvokeOutcome::Invoked)
            }
            AdapterKind::Filtered { filter, target } => match filter.apply(event) {
                Some(args) => {
                    target(event, &args)?;
                    Ok(InvokeOutcome::Invoked)
                }
                None => Ok(InvokeOutcome::Skipped),
            },
        }
    }
}

impl std::fmt::Debug for ListenerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            AdapterKind::Direct(_) => f.write_str("ListenerAdapter::Direct"),
            AdapterKind::Filtered { filter, .. } => f
                .debug_struct("ListenerAdapter::Filtered")
                .field("filter", filter)
                .finish(),
        }
    }
}
