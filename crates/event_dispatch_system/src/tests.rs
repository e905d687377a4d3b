//! End-to-end dispatch scenarios.
//!
//! Unit tests live next to each module; everything here drives the public
//! surface the way a plugin host would: build a lattice, stand up a
//! dispatcher, register listeners through descriptors, raise events.

use crate::*;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ---- Context fixtures -------------------------------------------------

#[derive(Debug)]
struct Entity {
    id: u32,
}

#[derive(Debug)]
struct Monster {
    id: u32,
}

#[derive(Debug)]
struct Player {
    name: &'static str,
}

impl ContextObject for Entity {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ContextObject for Monster {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ContextObject for Player {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Container with keyed-data capability, for the data directives.
#[derive(Debug)]
struct Chest {
    locked: bool,
}

impl ContextObject for Chest {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn data(&self) -> Option<&dyn DataQuery> {
        Some(self)
    }
}

impl DataQuery for Chest {
    fn supports(&self, key: &DataKey) -> bool {
        key.as_str() == "lock"
    }

    fn get(&self, key: &DataKey) -> Option<Arc<dyn Any + Send + Sync>> {
        if key.as_str() == "lock" && self.locked {
            Some(Arc::new(true))
        } else {
            None
        }
    }
}

// ---- Event fixtures ---------------------------------------------------

/// Lattice-only ancestor tag, never instantiated.
struct ServerEvent;

#[derive(Debug)]
struct SpawnEntityEvent {
    cause: Cause,
    entity: Arc<dyn ContextObject>,
    cancel: CancellationCell,
}

impl SpawnEntityEvent {
    fn new(entity: Arc<dyn ContextObject>, cause: Cause) -> Self {
        Self {
            cause,
            entity,
            cancel: CancellationCell::new(),
        }
    }
}

impl GameEvent for SpawnEntityEvent {
    fn token(&self) -> TypeToken {
        TypeToken::of::<Self>()
    }

    fn cause(&self) -> &Cause {
        &self.cause
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_cancellable(&self) -> Option<&dyn Cancellable> {
        Some(&self.cancel)
    }
}

#[derive(Debug)]
struct CustomSpawnEvent {
    cause: Cause,
    cancel: CancellationCell,
}

impl CustomSpawnEvent {
    fn new(cause: Cause) -> Self {
        Self {
            cause,
            cancel: CancellationCell::new(),
        }
    }
}

impl GameEvent for CustomSpawnEvent {
    fn token(&self) -> TypeToken {
        TypeToken::of::<Self>()
    }

    fn cause(&self) -> &Cause {
        &self.cause
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_cancellable(&self) -> Option<&dyn Cancellable> {
        Some(&self.cancel)
    }
}

#[derive(Debug)]
struct ChatEvent {
    cause: Cause,
}

impl GameEvent for ChatEvent {
    fn token(&self) -> TypeToken {
        TypeToken::of::<Self>()
    }

    fn cause(&self) -> &Cause {
        &self.cause
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn game_lattice() -> Arc<EventLattice> {
    let lattice = Arc::new(EventLattice::new());
    lattice.register::<Entity>().finish().unwrap();
    lattice
        .register::<Monster>()
        .parent::<Entity>()
        .finish()
        .unwrap();
    lattice
        .register::<Player>()
        .parent::<Entity>()
        .finish()
        .unwrap();
    lattice.register::<Chest>().finish().unwrap();
    lattice.register::<ServerEvent>().finish().unwrap();
    lattice
        .register::<SpawnEntityEvent>()
        .parent::<ServerEvent>()
        .cancellable()
        .accessor_of::<Entity, _>("entity", |event| {
            event
                .as_any()
                .downcast_ref::<SpawnEntityEvent>()
                .map(|e| e.entity.clone())
        })
        .finish()
        .unwrap();
    lattice
        .register::<CustomSpawnEvent>()
        .parent::<SpawnEntityEvent>()
        .finish()
        .unwrap();
    lattice
        .register::<ChatEvent>()
        .parent::<ServerEvent>()
        .finish()
        .unwrap();
    lattice
}

fn dispatcher() -> EventDispatcher {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("event_dispatch_system=debug")
        .try_init();
    EventDispatcher::new(game_lattice())
}

fn spawn_with_player(name: &'static str) -> SpawnEntityEvent {
    SpawnEntityEvent::new(
        Arc::new(Entity { id: 1 }),
        Cause::builder()
            .push(Player { name })
            .push(Entity { id: 7 })
            .build(),
    )
}

// ---- Scenarios --------------------------------------------------------

#[test]
fn exact_listener_runs_unconditionally() {
    let dispatcher = dispatcher();
    let plugin = PluginId::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_clone = hits.clone();
    dispatcher
        .register_exact::<SpawnEntityEvent, _>(plugin, Order::Normal, move |_event| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let result = dispatcher.raise(&spawn_with_player("alice"));
    assert!(result.dispatched);
    assert_eq!(result.invoked, 1);
    assert_eq!(result.filtered, 0);
    assert!(!result.has_failures());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn supertype_listener_sees_subtype_raise() {
    let dispatcher = dispatcher();
    let plugin = PluginId::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_clone = hits.clone();
    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>(),
            move |_event, _args| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();

    let result = dispatcher.raise(&CustomSpawnEvent::new(Cause::of(Entity { id: 3 })));
    assert!(result.dispatched);
    assert_eq!(result.invoked, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // A sibling event type never reaches the listener, and its activation
    // flag was never raised, so the whole dispatch short-circuits.
    let result = dispatcher.raise(&ChatEvent {
        cause: Cause::of(Player { name: "bob" }),
    });
    assert!(!result.dispatched);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn activation_table_round_trips_through_unregister() {
    let dispatcher = dispatcher();
    let plugin = PluginId::new();

    let baseline = dispatcher.activation().snapshot();
    assert_eq!(dispatcher.activation().active(), 0);

    let handle = dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>(),
            |_event, _args| Ok(()),
        )
        .unwrap();

    // Ancestors and descendants light up, siblings stay dark.
    assert!(dispatcher.activation().query(TypeToken::of::<SpawnEntityEvent>()));
    assert!(dispatcher.activation().query(TypeToken::of::<CustomSpawnEvent>()));
    assert!(dispatcher.activation().query(TypeToken::of::<ServerEvent>()));
    assert!(!dispatcher.activation().query(TypeToken::of::<ChatEvent>()));

    assert!(dispatcher.unregister(&handle));
    assert!(!dispatcher.unregister(&handle));

    let after = dispatcher.activation().snapshot();
    let key = |snapshot: &[ActivationSnapshot]| {
        let mut entries: Vec<(&str, bool, u32)> = snapshot
            .iter()
            .map(|s| (s.token.name(), s.active, s.refs))
            .collect();
        entries.sort();
        entries
    };
    assert_eq!(key(&baseline), key(&after));
}

#[test]
fn listeners_run_in_priority_then_registration_order() {
    let dispatcher = dispatcher();
    let plugin = PluginId::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    for (label, order) in [
        ("late", Order::Late),
        ("first", Order::First),
        ("normal-a", Order::Normal),
        ("normal-b", Order::Normal),
        ("last", Order::Last),
        ("early", Order::Early),
    ] {
        let log = log.clone();
        dispatcher
            .register(
                plugin,
                ListenerDescriptor::for_event::<SpawnEntityEvent>().order(order),
                move |_event, _args| {
                    log.lock().unwrap().push(label);
                    Ok(())
                },
            )
            .unwrap();
    }

    let result = dispatcher.raise(&spawn_with_player("carol"));
    assert_eq!(result.invoked, 6);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["first", "early", "normal-a", "normal-b", "late", "last"]
    );
}

#[test]
fn failing_and_panicking_listeners_do_not_stop_the_batch() {
    let dispatcher = dispatcher();
    let plugin = PluginId::new();
    let hits = Arc::new(AtomicUsize::new(0));

    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>().order(Order::First),
            |_event, _args| Err(EventError::ListenerFailed("db offline".into())),
        )
        .unwrap();
    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>().order(Order::Early),
            |_event, _args| panic!("boom"),
        )
        .unwrap();
    let hits_clone = hits.clone();
    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>(),
            move |_event, _args| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();

    let result = dispatcher.raise(&spawn_with_player("dave"));
    assert_eq!(result.invoked, 1);
    assert_eq!(result.failures.len(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let messages: Vec<String> = result.failures.iter().map(|f| f.error.to_string()).collect();
    assert!(messages.iter().any(|m| m.contains("db offline")));
    assert!(messages.iter().any(|m| m.contains("boom")));
}

#[test]
fn cancellation_state_is_aggregated() {
    let dispatcher = dispatcher();
    let plugin = PluginId::new();

    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>(),
            |event, _args| {
                if let Some(cancellable) = event.as_cancellable() {
                    cancellable.set_cancelled(true);
                }
                Ok(())
            },
        )
        .unwrap();

    let result = dispatcher.raise(&spawn_with_player("erin"));
    assert_eq!(result.cancelled, Some(true));
    assert!(result.is_cancelled());

    // Events without the capability report no cancellation state at all.
    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<ChatEvent>(),
            |_event, _args| Ok(()),
        )
        .unwrap();
    let result = dispatcher.raise(&ChatEvent {
        cause: Cause::of(Player { name: "erin" }),
    });
    assert_eq!(result.cancelled, None);
    assert!(!result.is_cancelled());
}

#[test]
fn cancellation_requirement_gates_the_listener() {
    let dispatcher = dispatcher();
    let plugin = PluginId::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_clone = hits.clone();
    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>()
                .require_cancellation(CancellationRequirement::MustBeCancelled),
            move |_event, _args| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();

    let result = dispatcher.raise(&spawn_with_player("frank"));
    assert_eq!(result.invoked, 0);
    assert_eq!(result.filtered, 1);

    let event = spawn_with_player("frank");
    event.cancel.set_cancelled(true);
    let result = dispatcher.raise(&event);
    assert_eq!(result.invoked, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn invalid_directive_leaves_no_trace() {
    let dispatcher = dispatcher();
    let plugin = PluginId::new();

    // ChatEvent carries no cancellation capability in the lattice.
    let err = dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<ChatEvent>()
                .require_cancellation(CancellationRequirement::MustBeCancelled),
            |_event, _args| Ok(()),
        )
        .unwrap_err();
    assert!(matches!(err, FilterError::NotCancellable(_)));

    assert_eq!(dispatcher.listener_count(), 0);
    assert_eq!(dispatcher.shared_adapters(), 0);
    assert_eq!(dispatcher.activation().active(), 0);
}

#[test]
fn include_and_exclude_narrow_the_event_gate() {
    let dispatcher = dispatcher();
    let plugin = PluginId::new();
    let included = Arc::new(AtomicUsize::new(0));
    let excluded = Arc::new(AtomicUsize::new(0));

    let included_clone = included.clone();
    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>().include::<CustomSpawnEvent>(),
            move |_event, _args| {
                included_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();
    let excluded_clone = excluded.clone();
    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>().exclude::<CustomSpawnEvent>(),
            move |_event, _args| {
                excluded_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();

    let result = dispatcher.raise(&spawn_with_player("gina"));
    assert_eq!(result.invoked, 1);
    assert_eq!(result.filtered, 1);
    assert_eq!(included.load(Ordering::SeqCst), 0);
    assert_eq!(excluded.load(Ordering::SeqCst), 1);

    let result = dispatcher.raise(&CustomSpawnEvent::new(Cause::of(Entity { id: 9 })));
    assert_eq!(result.invoked, 1);
    assert_eq!(result.filtered, 1);
    assert_eq!(included.load(Ordering::SeqCst), 1);
    assert_eq!(excluded.load(Ordering::SeqCst), 1);
}

#[test]
fn getter_parameter_binds_covariantly() {
    let dispatcher = dispatcher();
    let plugin = PluginId::new();
    let seen = Arc::new(AtomicUsize::new(0));

    // The accessor declares Entity; the live value is a Monster.
    let seen_clone = seen.clone();
    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>()
                .param(ParamDirective::getter::<Entity>()),
            move |_event, args| {
                assert_eq!(args.len(), 1);
                let monster = args[0]
                    .downcast_ref::<Monster>()
                    .ok_or_else(|| EventError::ListenerFailed("not a monster".into()))?;
                seen_clone.store(monster.id as usize, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();

    let event = SpawnEntityEvent::new(
        Arc::new(Monster { id: 42 }),
        Cause::of(Player { name: "henry" }),
    );
    let result = dispatcher.raise(&event);
    assert_eq!(result.invoked, 1);
    assert!(!result.has_failures());
    assert_eq!(seen.load(Ordering::SeqCst), 42);
}

#[test]
fn cause_parameter_filters_when_absent() {
    let dispatcher = dispatcher();
    let plugin = PluginId::new();
    let names = Arc::new(Mutex::new(Vec::new()));

    let names_clone = names.clone();
    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>()
                .param(ParamDirective::cause_first::<Player>()),
            move |_event, args| {
                let player = args[0]
                    .downcast_ref::<Player>()
                    .ok_or_else(|| EventError::ListenerFailed("no player".into()))?;
                names_clone.lock().unwrap().push(player.name);
                Ok(())
            },
        )
        .unwrap();

    let result = dispatcher.raise(&spawn_with_player("ivy"));
    assert_eq!(result.invoked, 1);

    // No Player anywhere in the cause: the filter rejects, nothing runs.
    let result = dispatcher.raise(&SpawnEntityEvent::new(
        Arc::new(Entity { id: 2 }),
        Cause::of(Entity { id: 2 }),
    ));
    assert_eq!(result.invoked, 0);
    assert_eq!(result.filtered, 1);
    assert_eq!(*names.lock().unwrap(), vec!["ivy"]);
}

#[test]
fn data_directive_threads_a_previous_parameter() {
    let dispatcher = dispatcher();
    let plugin = PluginId::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_clone = hits.clone();
    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>()
                .param(ParamDirective::cause_first::<Chest>())
                .param(ParamDirective::data_has::<Chest>(0, DataKey::new("lock"))),
            move |_event, args| {
                assert_eq!(args.len(), 2);
                assert!(args[1].downcast_ref::<Chest>().is_some());
                hits_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();

    let locked = SpawnEntityEvent::new(
        Arc::new(Entity { id: 1 }),
        Cause::of(Chest { locked: true }),
    );
    assert_eq!(dispatcher.raise(&locked).invoked, 1);

    let unlocked = SpawnEntityEvent::new(
        Arc::new(Entity { id: 1 }),
        Cause::of(Chest { locked: false }),
    );
    let result = dispatcher.raise(&unlocked);
    assert_eq!(result.invoked, 0);
    assert_eq!(result.filtered, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

fn shared_handler(_event: &dyn GameEvent, _args: &ExtractedArgs) -> std::result::Result<(), EventError> {
    Ok(())
}

#[test]
fn same_method_identity_shares_one_adapter() {
    let dispatcher = dispatcher();
    let plugin_a = PluginId::new();
    let plugin_b = PluginId::new();

    dispatcher
        .register(
            plugin_a,
            ListenerDescriptor::for_event::<SpawnEntityEvent>(),
            shared_handler,
        )
        .unwrap();
    dispatcher
        .register(
            plugin_b,
            ListenerDescriptor::for_event::<SpawnEntityEvent>(),
            shared_handler,
        )
        .unwrap();

    assert_eq!(dispatcher.listener_count(), 2);
    assert_eq!(dispatcher.shared_adapters(), 1);

    assert_eq!(dispatcher.unregister_plugin(plugin_a), 1);
    assert_eq!(dispatcher.listener_count(), 1);
    assert_eq!(dispatcher.shared_adapters(), 1);

    assert_eq!(dispatcher.unregister_plugin(plugin_b), 1);
    assert_eq!(dispatcher.listener_count(), 0);
    assert_eq!(dispatcher.shared_adapters(), 0);
}

#[test]
fn same_fn_item_with_different_directives_keeps_both_filters() {
    let dispatcher = dispatcher();
    let plugin = PluginId::new();

    // First registration caches a filtered adapter; the second, with no
    // directives at all, must not inherit that filter.
    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>()
                .param(ParamDirective::cause_first::<Player>()),
            shared_handler,
        )
        .unwrap();
    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>(),
            shared_handler,
        )
        .unwrap();

    let playerless = SpawnEntityEvent::new(Arc::new(Entity { id: 1 }), Cause::of(Entity { id: 1 }));
    let result = dispatcher.raise(&playerless);
    assert_eq!(result.invoked, 1);
    assert_eq!(result.filtered, 1);

    let result = dispatcher.raise(&spawn_with_player("lena"));
    assert_eq!(result.invoked, 2);
    assert_eq!(result.filtered, 0);
}

#[test]
fn capturing_closures_never_share_an_adapter() {
    let dispatcher = dispatcher();
    let plugin = PluginId::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    // One closure type, two captures; each registration must run its own.
    for label in ["red", "blue"] {
        let log = log.clone();
        dispatcher
            .register(
                plugin,
                ListenerDescriptor::for_event::<SpawnEntityEvent>(),
                move |_event, _args| {
                    log.lock().unwrap().push(label);
                    Ok(())
                },
            )
            .unwrap();
    }

    let result = dispatcher.raise(&spawn_with_player("mona"));
    assert_eq!(result.invoked, 2);
    assert_eq!(*log.lock().unwrap(), vec!["red", "blue"]);
    assert_eq!(dispatcher.shared_adapters(), 0);
}

#[derive(Debug)]
struct UnmappedEvent {
    cause: Cause,
}

impl GameEvent for UnmappedEvent {
    fn token(&self) -> TypeToken {
        TypeToken::of::<Self>()
    }

    fn cause(&self) -> &Cause {
        &self.cause
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn unregistered_event_type_counts_as_skipped() {
    let dispatcher = dispatcher();

    let result = dispatcher.raise(&UnmappedEvent {
        cause: Cause::builder().build(),
    });
    assert!(!result.dispatched);

    let stats = dispatcher.stats().snapshot();
    assert_eq!(stats.events_raised, 1);
    assert_eq!(stats.events_skipped, 1);
}

#[test]
fn unregister_plugin_removes_everything_it_registered() {
    let dispatcher = dispatcher();
    let plugin_a = PluginId::new();
    let plugin_b = PluginId::new();

    dispatcher
        .register(
            plugin_a,
            ListenerDescriptor::for_event::<SpawnEntityEvent>(),
            |_event, _args| Ok(()),
        )
        .unwrap();
    dispatcher
        .register(
            plugin_a,
            ListenerDescriptor::for_event::<ChatEvent>(),
            |_event, _args| Ok(()),
        )
        .unwrap();
    dispatcher
        .register(
            plugin_b,
            ListenerDescriptor::for_event::<ChatEvent>(),
            |_event, _args| Ok(()),
        )
        .unwrap();

    assert_eq!(dispatcher.unregister_plugin(plugin_a), 2);
    assert_eq!(dispatcher.listener_count(), 1);
    assert!(!dispatcher.activation().query(TypeToken::of::<SpawnEntityEvent>()));
    assert!(dispatcher.activation().query(TypeToken::of::<ChatEvent>()));

    let result = dispatcher.raise(&ChatEvent {
        cause: Cause::of(Player { name: "judy" }),
    });
    assert_eq!(result.invoked, 1);
}

#[test]
fn monitor_reflects_dispatch_activity() {
    let dispatcher = Arc::new(dispatcher());
    let plugin = PluginId::new();

    dispatcher
        .register(
            plugin,
            ListenerDescriptor::for_event::<SpawnEntityEvent>(),
            |_event, _args| Ok(()),
        )
        .unwrap();

    dispatcher.raise(&spawn_with_player("kate"));
    dispatcher.raise(&ChatEvent {
        cause: Cause::of(Player { name: "kate" }),
    });

    let monitor = DispatchMonitor::new(dispatcher.clone());
    let report = monitor.generate_report();
    assert_eq!(report.stats.events_raised, 2);
    assert_eq!(report.stats.events_skipped, 1);
    assert_eq!(report.stats.listeners_invoked, 1);
    assert_eq!(report.stats.registrations, 1);
}
