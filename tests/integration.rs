//! Integration tests for observation and dispatch.

use observable::{
    CallbackError, Engine, EngineConfig, Link, ObjectCore, Observable, ObservableVec, Property,
    Tell,
};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct Model {
    core: ObjectCore,
    int_property: Property<i32>,
    name: Property<String>,
}

impl Observable for Model {
    fn core(&self) -> &ObjectCore {
        &self.core
    }
}

fn model(engine: &Engine) -> Rc<Model> {
    let core = ObjectCore::new(engine);
    let int_property = Property::new(&core, "int_property", 0);
    let name = Property::new(&core, "name", String::new());
    Rc::new(Model {
        core,
        int_property,
        name,
    })
}

/// Observer that appends its tag to a shared log.
struct Tagged {
    tag: &'static str,
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl Tagged {
    fn new(tag: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Rc<Self> {
        Rc::new(Self {
            tag,
            log: Rc::clone(log),
        })
    }

    fn record(&self, _: &Model) {
        self.log.borrow_mut().push(self.tag);
    }
}

fn engine() -> Engine {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Engine::new(EngineConfig::default())
}

// --- Basic Delivery ---

#[test]
fn test_change_is_delivered_on_flush() {
    let engine = engine();
    let m = model(&engine);
    let seen = Rc::new(RefCell::new(Vec::new()));

    m.tell(&seen, "int_property", |seen: &RefCell<Vec<i32>>, m: &Model| {
        seen.borrow_mut().push(m.int_property.get())
    })
    .unwrap();

    m.int_property.set(5);
    assert!(seen.borrow().is_empty(), "delivery waits for flush");

    let report = engine.flush();
    assert_eq!(*seen.borrow(), vec![5]);
    assert_eq!(report.delivered, 1);
    assert!(report.failed.is_empty());
}

#[test]
fn test_changes_coalesce_within_generation() {
    let engine = engine();
    let m = model(&engine);
    let seen = Rc::new(RefCell::new(Vec::new()));

    m.tell(&seen, "int_property", |seen: &RefCell<Vec<i32>>, m: &Model| {
        seen.borrow_mut().push(m.int_property.get())
    })
    .unwrap();

    m.int_property.set(1);
    m.int_property.set(2);
    m.int_property.set(3);
    assert_eq!(engine.pending_count(), 1);

    engine.flush();
    assert_eq!(*seen.borrow(), vec![3]);

    // Nothing left for the next flush.
    assert_eq!(engine.flush().delivered, 0);
}

#[test]
fn test_observers_run_in_registration_order() {
    let engine = engine();
    let m = model(&engine);
    let log = Rc::new(RefCell::new(Vec::new()));
    let first = Tagged::new("first", &log);
    let second = Tagged::new("second", &log);
    let third = Tagged::new("third", &log);

    m.tell(&second, "name", Tagged::record).unwrap();
    m.tell(&first, "int_property", Tagged::record).unwrap();
    m.tell(&third, "int_property", Tagged::record).unwrap();

    m.int_property.set(1);
    m.name.set("x".into());
    engine.flush();

    assert_eq!(*log.borrow(), vec!["second", "first", "third"]);
}

#[test]
fn test_equal_write_is_not_a_change() {
    let engine = engine();
    let m = model(&engine);
    let hits = Rc::new(Cell::new(0));

    m.tell(&hits, "name", |hits: &Cell<u32>, _: &Model| hits.set(hits.get() + 1))
        .unwrap();

    m.name.set(String::new());
    assert_eq!(engine.flush().delivered, 0);
    m.name.update(|name| name.push('a'));
    m.name.update(|_| {});
    assert_eq!(engine.flush().delivered, 1);
    assert_eq!(hits.get(), 1);
}

#[test]
fn test_wildcard_fires_for_any_property() {
    let engine = engine();
    let m = model(&engine);
    let hits = Rc::new(Cell::new(0));

    m.tell(&hits, "*", |hits: &Cell<u32>, _: &Model| hits.set(hits.get() + 1))
        .unwrap();

    m.name.set("a".into());
    engine.flush();
    m.int_property.set(9);
    engine.flush();
    assert_eq!(hits.get(), 2);
}

// --- Dispatch Semantics ---

#[test]
fn test_panicking_callback_is_isolated() {
    let engine = engine();
    let m = model(&engine);
    let log = Rc::new(RefCell::new(Vec::new()));
    let bad = Tagged::new("bad", &log);
    let good = Tagged::new("good", &log);
    let errors = engine.errors();

    m.tell(&bad, "int_property", |_: &Tagged, _: &Model| panic!("boom"))
        .unwrap();
    m.tell(&good, "int_property", Tagged::record).unwrap();

    m.int_property.set(5);
    let report = engine.flush();

    assert_eq!(*log.borrow(), vec!["good"]);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.invoked(), 2);

    let CallbackError::Panicked { path, message, .. } = errors.try_recv().unwrap();
    assert_eq!(path, "int_property");
    assert_eq!(message, "boom");

    // The failing subscription stays registered.
    assert_eq!(engine.subscription_count(), 2);
}

#[test]
fn test_mutations_during_flush_go_to_next_generation() {
    let engine = engine();
    let m = model(&engine);
    let hits = Rc::new(Cell::new(0));

    // Echo int_property into name.
    m.tell(&m, "int_property", |_: &Model, m: &Model| {
        m.name.set(m.int_property.get().to_string());
    })
    .unwrap();
    m.tell(&hits, "name", |hits: &Cell<u32>, _: &Model| hits.set(hits.get() + 1))
        .unwrap();

    m.int_property.set(7);
    let first = engine.flush();
    assert_eq!(first.delivered, 1);
    assert_eq!(hits.get(), 0);
    assert_eq!(engine.pending_count(), 1);

    let second = engine.flush();
    assert_eq!(second.generation, first.generation.next());
    assert_eq!(hits.get(), 1);
    assert_eq!(m.name.get(), "7");
}

struct Reentrant {
    engine: Engine,
    nested: Cell<Option<usize>>,
}

#[test]
fn test_nested_flush_is_a_noop() {
    let engine = engine();
    let m = model(&engine);
    let observer = Rc::new(Reentrant {
        engine: engine.clone(),
        nested: Cell::new(None),
    });
    let later = Rc::new(Cell::new(0));

    m.tell(&observer, "int_property", |o: &Reentrant, _: &Model| {
        o.nested.set(Some(o.engine.flush().invoked()));
    })
    .unwrap();
    m.tell(&later, "int_property", |hits: &Cell<u32>, _: &Model| {
        hits.set(hits.get() + 1)
    })
    .unwrap();

    m.int_property.set(1);
    let report = engine.flush();

    assert_eq!(observer.nested.get(), Some(0));
    assert_eq!(later.get(), 1, "outer flush continues after the nested call");
    assert_eq!(report.delivered, 2);
}

// --- Lifetimes ---

#[test]
fn test_dropped_observer_is_never_called() {
    let engine = engine();
    let m = model(&engine);
    let observer = Rc::new(Cell::new(0));

    m.tell(&observer, "int_property", |hits: &Cell<u32>, _: &Model| {
        hits.set(hits.get() + 1)
    })
    .unwrap();

    m.int_property.set(1);
    drop(observer);

    let report = engine.flush();
    assert_eq!(report.delivered, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(engine.subscription_count(), 0);
    assert!(!m.core.is_instrumented("int_property"));
}

#[test]
fn test_dropped_observed_purges_subscriptions() {
    let engine = engine();
    let m = model(&engine);
    let observer = Rc::new(Cell::new(0));

    m.tell(&observer, "int_property", |hits: &Cell<u32>, _: &Model| {
        hits.set(hits.get() + 1)
    })
    .unwrap();
    m.int_property.set(1);
    assert_eq!(engine.subscription_count(), 1);

    drop(m);
    assert_eq!(engine.subscription_count(), 0);
    assert_eq!(engine.flush().delivered, 0);
    assert_eq!(observer.get(), 0);
}

#[test]
fn test_flush_reaps_dropped_observer_without_mutation() {
    let engine = engine();
    let m = model(&engine);
    let observer = Rc::new(Cell::new(0));
    let states = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&states);
    m.core
        .set_observation_state_hook(move |name, on| sink.borrow_mut().push((name.to_string(), on)));

    m.tell(&observer, "int_property", |hits: &Cell<u32>, _: &Model| {
        hits.set(hits.get() + 1)
    })
    .unwrap();
    drop(observer);

    // Counts already exclude the dead observer.
    assert_eq!(m.core.observer_count("int_property"), 0);
    assert!(m.core.is_instrumented("int_property"));

    let report = engine.flush();
    assert_eq!(report.reaped, 1);
    assert!(!m.core.is_instrumented("int_property"));
    assert_eq!(engine.subscription_count(), 0);
    assert_eq!(
        *states.borrow(),
        vec![
            ("int_property".to_string(), true),
            ("int_property".to_string(), false)
        ]
    );
}

#[test]
fn test_explicit_reap() {
    let engine = engine();
    let m = model(&engine);
    let keep = Rc::new(Cell::new(0));
    let gone = Rc::new(Cell::new(0));

    m.tell(&keep, "name", |_: &Cell<u32>, _: &Model| {}).unwrap();
    m.tell(&gone, "name", |_: &Cell<u32>, _: &Model| {}).unwrap();
    m.tell(&gone, "int_property", |_: &Cell<u32>, _: &Model| {})
        .unwrap();
    drop(gone);

    assert_eq!(engine.reap(), 2);
    assert_eq!(engine.reap(), 0);
    assert!(m.core.is_instrumented("name"));
    assert!(!m.core.is_instrumented("int_property"));
    assert_eq!(m.core.observer_count("name"), 1);
}

// --- Cancellation ---

#[test]
fn test_stop_all_calls_to_cancels_shared_callback() {
    let engine = engine();
    let a = model(&engine);
    let b = model(&engine);
    let observer = Rc::new(Cell::new(0));
    let other = Rc::new(Cell::new(0));

    let report = a.tell_any(&observer, &["int_property", "name"], |hits: &Cell<u32>, _: &Model| {
        hits.set(hits.get() + 1)
    });
    b.tell(&observer, "name", |hits: &Cell<u32>, _: &Model| {
        hits.set(hits.get() + 10)
    })
    .unwrap();
    a.tell(&other, "name", |hits: &Cell<u32>, _: &Model| hits.set(hits.get() + 1))
        .unwrap();

    assert_eq!(engine.stop_all_calls_to(report.handles[1]), 2);
    assert_eq!(engine.stop_all_calls_to(report.handles[0]), 0);
    assert!(!a.core.is_instrumented("int_property"));

    a.int_property.set(1);
    a.name.set("a".into());
    b.name.set("b".into());
    engine.flush();
    assert_eq!(observer.get(), 10);
    assert_eq!(other.get(), 1);
}

#[test]
fn test_unregister_stops_delivery() {
    let engine = engine();
    let m = model(&engine);
    let observer = Rc::new(Cell::new(0));

    let handle = m
        .tell(&observer, "int_property", |hits: &Cell<u32>, _: &Model| {
            hits.set(hits.get() + 1)
        })
        .unwrap();

    assert!(engine.unregister(handle));
    assert!(!engine.unregister(handle));
    assert!(!m.core.is_instrumented("int_property"));

    m.int_property.set(3);
    engine.flush();
    assert_eq!(observer.get(), 0);
}

#[test]
fn test_unregister_with_pending_change_suppresses_delivery() {
    let engine = engine();
    let m = model(&engine);
    let observer = Rc::new(Cell::new(0));

    let handle = m
        .tell(&observer, "int_property", |hits: &Cell<u32>, _: &Model| {
            hits.set(hits.get() + 1)
        })
        .unwrap();

    m.int_property.set(3);
    engine.unregister(handle);

    let report = engine.flush();
    assert_eq!(report.delivered, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(observer.get(), 0);
}

#[test]
fn test_stop_telling_variants() {
    let engine = engine();
    let a = model(&engine);
    let b = model(&engine);
    let log = Rc::new(RefCell::new(Vec::new()));
    let observer = Tagged::new("observer", &log);

    a.tell(&observer, "int_property", Tagged::record).unwrap();
    a.tell(&observer, "name", Tagged::record).unwrap();
    b.tell(&observer, "int_property", Tagged::record).unwrap();
    b.tell(&observer, "name", Tagged::record).unwrap();
    assert_eq!(engine.subscription_count(), 4);

    assert_eq!(engine.stop_telling_about_path(&observer, &*a, "name"), 1);
    assert_eq!(engine.stop_telling_about_paths(&observer, &*a, &["name", "int_property"]), 1);
    assert!(a.core.observed_properties().is_empty());

    assert_eq!(b.stop_telling(&observer), 2);
    assert_eq!(engine.subscription_count(), 0);

    b.tell(&observer, "name", Tagged::record).unwrap();
    assert_eq!(engine.stop_telling(&observer), 1);
}

#[test]
fn test_unregister_observed_removes_all_observers() {
    let engine = engine();
    let m = model(&engine);
    let log = Rc::new(RefCell::new(Vec::new()));
    let first = Tagged::new("first", &log);
    let second = Tagged::new("second", &log);

    m.tell(&first, "name", Tagged::record).unwrap();
    m.tell(&second, "*", Tagged::record).unwrap();

    assert_eq!(engine.unregister_observed(&*m), 2);
    m.name.set("gone".into());
    engine.flush();
    assert!(log.borrow().is_empty());
}

// --- Multi-path And Immediate ---

#[test]
fn test_tell_any_delivers_once_per_flush() {
    let engine = engine();
    let m = model(&engine);
    let hits = Rc::new(Cell::new(0));

    let report = m.tell_any(&hits, &["int_property", "name"], |hits: &Cell<u32>, _: &Model| {
        hits.set(hits.get() + 1)
    });
    assert!(report.is_complete());
    assert_eq!(report.handles.len(), 2);

    m.int_property.set(1);
    m.name.set("both".into());
    assert_eq!(engine.pending_count(), 1);
    engine.flush();
    assert_eq!(hits.get(), 1);

    m.name.set("one".into());
    engine.flush();
    assert_eq!(hits.get(), 2);
}

#[test]
fn test_tell_any_survives_partial_unregister() {
    let engine = engine();
    let m = model(&engine);
    let hits = Rc::new(Cell::new(0));

    let report = engine.tell_any(&m, &hits, &["int_property", "name"], |hits: &Cell<u32>, _: &Model| {
        hits.set(hits.get() + 1)
    });

    // Fire through the first path, then cancel it before flushing.
    m.int_property.set(1);
    m.name.set("x".into());
    engine.unregister(report.handles[0]);

    engine.flush();
    assert_eq!(hits.get(), 1);
}

#[test]
fn test_immediate_mode_gets_previous_value() {
    let engine = engine();
    let m = model(&engine);
    let seen = Rc::new(RefCell::new(Vec::new()));

    m.tell_immediate(
        &seen,
        "int_property",
        |seen: &RefCell<Vec<(i32, i32)>>, m: &Model, previous: Option<&dyn Any>| {
            let previous = previous.and_then(|p| p.downcast_ref::<i32>()).copied();
            seen.borrow_mut()
                .push((previous.unwrap_or(-1), m.int_property.get()));
        },
    )
    .unwrap();

    m.int_property.set(1);
    m.int_property.set(2);
    assert_eq!(*seen.borrow(), vec![(0, 1), (1, 2)]);
    assert_eq!(engine.pending_count(), 0);

    // Manual triggers carry no previous value.
    m.core.trigger("int_property");
    assert_eq!(seen.borrow().last(), Some(&(-1, 2)));
}

// --- Collections ---

struct Playlist {
    core: ObjectCore,
    tracks: Property<Link<ObservableVec<String>>>,
}

impl Observable for Playlist {
    fn core(&self) -> &ObjectCore {
        &self.core
    }
}

#[test]
fn test_collection_membership_through_path() {
    let engine = engine();
    let tracks = Rc::new(ObservableVec::new(&engine));
    let core = ObjectCore::new(&engine);
    let playlist = Rc::new(Playlist {
        tracks: Property::new(&core, "tracks", Link::new(Rc::clone(&tracks))),
        core,
    });
    let hits = Rc::new(Cell::new(0));

    playlist
        .tell(&hits, "tracks.#", |hits: &Cell<u32>, _: &Playlist| {
            hits.set(hits.get() + 1)
        })
        .unwrap();

    tracks.push("intro".to_string());
    tracks.push("outro".to_string());
    engine.flush();
    assert_eq!(hits.get(), 1);

    tracks.clear();
    engine.flush();
    assert_eq!(hits.get(), 2);
    assert!(tracks.is_empty());
}

// --- Diagnostics ---

#[test]
fn test_debug_show_all_observers() {
    let engine = engine();
    let m = model(&engine);
    let observer = Rc::new(Cell::new(0));

    m.tell(&observer, "int_property", |_: &Cell<u32>, _: &Model| {})
        .unwrap();
    m.tell_immediate(&observer, "name", |_: &Cell<u32>, _: &Model, _: Option<&dyn Any>| {})
        .unwrap();

    assert_eq!(m.core.observed_properties(), vec!["int_property", "name"]);
    assert_eq!(m.core.observer_count("name"), 1);

    let report = engine.debug_report(&m.core);
    let json: serde_json::Value =
        serde_json::from_str(&engine.debug_show_all_observers(&m.core)).unwrap();
    assert_eq!(json["rooted_subscriptions"], 2);
    assert_eq!(json["properties"][1]["subscriptions"][0]["mode"], "immediate");
    assert_eq!(report.properties.len(), 2);
}

// --- Properties ---

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_writes_between_flushes_deliver_at_most_once(
            values in proptest::collection::vec(-3i32..3, 1..20)
        ) {
            let engine = Engine::new(EngineConfig::default());
            let m = model(&engine);
            let seen = Rc::new(RefCell::new(Vec::new()));
            m.tell(&seen, "int_property", |seen: &RefCell<Vec<i32>>, m: &Model| {
                seen.borrow_mut().push(m.int_property.get())
            })
            .unwrap();

            for value in &values {
                m.int_property.set(*value);
            }
            let report = engine.flush();

            let changed = values.iter().any(|value| *value != 0);
            prop_assert_eq!(report.delivered, usize::from(changed));
            if changed {
                prop_assert_eq!(seen.borrow().clone(), vec![*values.last().unwrap()]);
            }
        }
    }
}
