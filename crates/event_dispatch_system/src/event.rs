//! Core event capability traits
//!
//! An event is any value carrying a [`Cause`] trail and a concrete type drawn
//! from the registered event lattice. Cancellation is an optional capability
//! exposed through [`Cancellable`]; events that support it hand out a shared
//! reference so listeners can flip the flag mid-dispatch.

use crate::cause::Cause;
use crate::lattice::TypeToken;
use std::any::Any;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};

/// Capability set every dispatchable event implements.
///
/// Implementations are created by game logic, read by listeners during a
/// single synchronous dispatch, and dropped when `raise` returns. A single
/// event instance is only ever touched by one dispatch thread at a time.
pub trait GameEvent: Send + Sync + Debug + 'static {
    /// The concrete type tag of this event, as registered in the lattice
    fn token(&self) -> TypeToken;

    /// The ordered context trail attached to this event
    fn cause(&self) -> &Cause;

    /// Downcast access for exact-type listeners and getter accessors
    fn as_any(&self) -> &dyn Any;

    /// Cancellation capability, if this event type carries one
    fn as_cancellable(&self) -> Option<&dyn Cancellable> {
        None
    }
}

/// Optional cancellation capability of an event.
///
/// Uses interior mutability so listeners can set the flag through the shared
/// event reference they receive during dispatch.
pub trait Cancellable: Send + Sync {
    fn is_cancelled(&self) -> bool;
    fn set_cancelled(&self, cancelled: bool);
}

/// Ready-made cancellation state for embedding in event structs.
#[derive(Debug, Default)]
pub struct CancellationCell(AtomicBool);

impl CancellationCell {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }
}

impl Cancellable for CancellationCell {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set_cancelled(&self, cancelled: bool) {
        self.0.store(cancelled, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_cell_round_trips() {
        let cell = CancellationCell::new();
        assert!(!cell.is_cancelled());
        cell.set_cancelled(true);
        assert!(cell.is_cancelled());
        cell.set_cancelled(false);
        assert!(!cell.is_cancelled());
    }
}
