//! # Event Dispatch System
//!
//! An annotated-listener dispatch engine for game servers with plugin
//! ecosystems. Plugins subscribe to structured events through declarative
//! filter directives; the engine compiles each listener's directives into a
//! reusable extraction/matching pipeline once, and keeps a process-wide
//! activation table so the hot raise path can decide in O(1) whether anyone
//! could possibly care about an event before doing any expensive work.
//!
//! ## Key Features
//!
//! - **Declarative Filtering**: Whole-event include/exclude sets, cancellation
//!   requirements, and per-parameter cause/getter/data extraction directives
//! - **Compile Once, Dispatch Fast**: Filters are resolved and compiled at
//!   registration time; registrations of the same captureless handler share
//!   one compiled adapter
//! - **Activation Short-Circuit**: Reference-counted boolean flags propagated
//!   over the event type lattice make "nobody is listening" a single atomic
//!   read
//! - **Failure Isolation**: A listener that errors or panics never prevents
//!   its siblings from running or crashes the server tick
//! - **Hard Registration Errors**: Invalid directive combinations fail loudly
//!   at plugin load time, never silently downgrade into a no-op filter
//!
//! ## Architecture
//!
//! - **EventLattice**: explicit supertype relationships, cancellation
//!   capability, and accessor surface of every event/context type
//! - **Cause**: the ordered context trail every event carries
//! - **Resolver / Compiler**: directives -> validated spec -> pure pipeline
//! - **ListenerAdapter**: the constructed callable dispatch actually runs
//! - **ShouldFire**: the activation registry
//! - **EventDispatcher**: registration API and synchronous, priority-ordered
//!   raising
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use event_dispatch_system::*;
//! use std::any::Any;
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct Player { name: String }
//! impl ContextObject for Player {
//!     fn as_any(&self) -> &dyn Any { self }
//! }
//!
//! #[derive(Debug)]
//! struct SpawnEntityEvent { cause: Cause }
//! impl GameEvent for SpawnEntityEvent {
//!     fn token(&self) -> TypeToken { TypeToken::of::<Self>() }
//!     fn cause(&self) -> &Cause { &self.cause }
//!     fn as_any(&self) -> &dyn Any { self }
//! }
//!
//! fn main() -> Result<()> {
//!     let lattice = Arc::new(EventLattice::new());
//!     lattice.register::<Player>().finish()?;
//!     lattice.register::<SpawnEntityEvent>().finish()?;
//!
//!     let dispatcher = EventDispatcher::new(lattice);
//!     let plugin = PluginId::new();
//!
//!     // Listener with a cause-extraction parameter
//!     dispatcher.register(
//!         plugin,
//!         ListenerDescriptor::for_event::<SpawnEntityEvent>()
//!             .param(ParamDirective::cause_first::<Player>()),
//!         |_event, args| {
//!             let player = args[0].downcast_ref::<Player>().unwrap();
//!             println!("spawn caused by {}", player.name);
//!             Ok(())
//!         },
//!     )?;
//!
//!     let event = SpawnEntityEvent {
//!         cause: Cause::of(Player { name: "alice".into() }),
//!     };
//!     let result = dispatcher.raise(&event);
//!     assert_eq!(result.invoked, 1);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod cause;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod filter;
pub mod lattice;
pub mod monitoring;
pub mod should_fire;

#[cfg(test)]
mod tests;

// Re-exports for convenience
pub use adapter::{InvokeOutcome, ListenerAdapter, ListenerFn};
pub use cause::{Cause, CauseBuilder, CauseFrame, ContextObject, DataKey, DataQuery};
pub use dispatch::{
    DispatchResult, EventDispatcher, ListenerFailure, ListenerId, PluginId, RegistrationHandle,
};
pub use error::{EventError, FilterError};
pub use event::{Cancellable, CancellationCell, GameEvent};
pub use filter::{
    CancellationRequirement, CompiledFilter, ExtractedArgs, ExtractedValue, FilterKind,
    ListenerDescriptor, ListenerSpec, Order, ParamDirective, SubtypeFilter,
};
pub use lattice::{AccessorDef, AccessorFn, EventLattice, TypeToken};
pub use monitoring::{
    current_timestamp, DispatchMonitor, DispatchReport, DispatchStats, DispatchStatsSnapshot,
};
pub use should_fire::{global, init_global, ActivationSnapshot, ShouldFire};

/// Version information for compatibility checks
pub const EVENT_DISPATCH_SYSTEM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type used throughout registration paths
pub type Result<T> = std::result::Result<T, FilterError>;
