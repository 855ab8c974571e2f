//! Integration Tests for the Action Bus and State Streams
//!
//! These tests verify that actions, reducers, state streams, markers and
//! routines work together through a shared context.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use rivulet_core::action::{create_child_dispatcher, namespace_action_creator, qualify};
use rivulet_core::{
    collect_routines, combine, detect_glitch, find_marker, Action, ActionCreator,
    ActionStreamExt, Config, Context, Error, ErrorChannel, Mode, Namespace, PersistentOptions,
    Qualifier, ReducerEntry, Routine, Snapshot, Stream, Subscription,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn record<T: Clone + Send + Sync + 'static>(
    stream: &Stream<T>,
) -> (Arc<Mutex<Vec<T>>>, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sub = stream.subscribe(move |value| sink.lock().push(value));
    (seen, sub)
}

/// Dispatching increment-one then increment-many(5) from zero yields six.
#[test]
fn increment_scenario_folds_to_six() {
    init_tracing();
    let ctx = Context::default();
    let increment_one = ActionCreator::<()>::new("incrementOne");
    let increment_many = ActionCreator::<i64>::new("incrementMany");

    let fold = ctx.combine(
        0i64,
        vec![
            ReducerEntry::on(&increment_one, |n: &i64, _: &(), _| n + 1),
            ReducerEntry::on(&increment_many, |n: &i64, by: &i64, _| n + by),
        ],
    );
    let (seen, _sub) = record(&fold.over(&ctx.actions()));

    ctx.dispatch(increment_one.empty()).unwrap();
    ctx.dispatch(increment_many.create(5)).unwrap();

    assert_eq!(seen.lock().last(), Some(&6));
}

/// A throwing reducer in the middle of a sequence leaves the result equal to
/// folding the surrounding actions alone, with exactly one error reported.
#[test]
fn fold_errors_are_isolated_per_action() {
    let ctx = Context::default();
    let ok = ActionCreator::<i32>::new("ok");
    let throwing = ActionCreator::<()>::new("throwing");

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let channel = ErrorChannel::new(move |e| sink.lock().push(e));

    let fold = combine(
        0,
        vec![
            ReducerEntry::on(&ok, |s: &i32, n: &i32, _| s + n),
            ReducerEntry::try_on(&throwing, |_: &i32, _: &(), _| Err("reducer blew up")),
        ],
        channel,
    );
    let (seen, _sub) = record(&fold.over(&ctx.actions()));

    ctx.dispatch(ok.create(1)).unwrap();
    ctx.dispatch(throwing.empty()).unwrap();
    ctx.dispatch(ok.create(2)).unwrap();

    assert_eq!(seen.lock().last(), Some(&3));
    assert_eq!(errors.lock().len(), 1);
}

/// A namespaced creator always stamps its own namespace, and the namespace
/// filter passes matching and unscoped actions only.
#[test]
fn namespace_round_trip() {
    let ctx = Context::default();
    let add = ActionCreator::<u8>::new("add");
    let elsewhere = namespace_action_creator("elsewhere", &add);
    let scoped = namespace_action_creator("NS", &elsewhere);
    assert_eq!(scoped.create(1).namespace(), Some(&Namespace::new("NS")));

    let (seen, _sub) = record(&ctx.actions().with_namespace("NS"));
    ctx.dispatch(scoped.create(1)).unwrap();
    ctx.dispatch(add.create(2)).unwrap();
    ctx.dispatch(elsewhere.create(3)).unwrap();

    let payloads: Vec<u8> = seen
        .lock()
        .iter()
        .filter_map(|a| a.payload_as::<u8>().copied())
        .collect();
    assert_eq!(payloads, vec![1, 2]);
}

/// Wrapping a dispatcher with a qualifier and reading through the matching
/// child stream gives back the action with only that qualifier removed.
#[test]
fn qualifier_round_trip() {
    let ctx = Context::default();
    let toggle = ActionCreator::<u32>::new("toggle");
    let inner = qualify(&toggle, "row-7");

    let dispatch = create_child_dispatcher(&ctx.dispatcher(), "table");
    let child = ctx.child_actions("table");
    let (seen, _sub) = record(&child);

    dispatch.dispatch(inner.create(7)).unwrap();
    // An unqualified action breaks the child's precondition
    let errors = ctx.dispatch(toggle.create(0)).unwrap_err().into_errors();
    assert!(matches!(errors.as_slice(), [Error::EmptyQualifierStack(_)]));

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].qualifiers(), &[Qualifier::new("row-7")]);
    assert!(toggle.matches(&seen[0]));
    assert_eq!(seen[0].payload_as::<u32>(), Some(&7));
}

/// Stripping from an empty qualifier stack is reported, not ignored.
#[test]
fn stripping_empty_qualifier_stack_fails() {
    let ping = ActionCreator::<()>::new("ping");
    let result = ping.empty().strip_qualifier(&Qualifier::new("missing"));
    assert!(matches!(result, Err(Error::EmptyQualifierStack(_))));
}

/// An ephemeral state stream starts over from its seed once every
/// subscriber has left.
#[test]
fn ephemeral_stream_resets_on_idle() {
    let ctx = Context::default();
    let add = ActionCreator::<i32>::new("add");
    let count = ctx.reduce_state(
        "count",
        10,
        vec![ReducerEntry::on(&add, |s: &i32, n: &i32, _| s + n)],
    );

    let (first, sub) = record(&count.as_stream());
    ctx.dispatch(add.create(5)).unwrap();
    assert_eq!(*first.lock(), vec![10, 15]);
    sub.unsubscribe();

    let (second, _sub) = record(&count.as_stream());
    assert_eq!(*second.lock(), vec![10]);
}

/// A persistent stream keeps folding with no subscribers and only stops on
/// explicit teardown.
#[test]
fn persistent_stream_lifetime() {
    let ctx = Context::default();
    let add = ActionCreator::<i64>::new("add");
    let total = ctx
        .persistent_reduced_stream(
            "total",
            0i64,
            vec![ReducerEntry::on(&add, |s: &i64, n: &i64, _| s + n)],
            PersistentOptions::default(),
        )
        .unwrap();
    total.connect().unwrap();

    ctx.dispatch(add.create(2)).unwrap();
    let sub = total.subscribe(|_| {}).unwrap();
    drop(sub);
    ctx.dispatch(add.create(3)).unwrap();
    assert_eq!(total.state().unwrap(), 5);

    total.unsubscribe();
    assert!(matches!(total.state(), Err(Error::StreamClosed(_))));
}

/// Two reducers on independent sources firing in one turn produce a single
/// downstream emission carrying the later value.
#[test]
fn same_turn_updates_coalesce() {
    let ctx = Context::default();
    let left = ActionCreator::<i32>::new("left");
    let right = ActionCreator::<i32>::new("right");

    let a = ctx.reduce_state("a", 0, vec![ReducerEntry::on(&left, |_: &i32, v: &i32, _| *v)]);
    let b = ctx.reduce_state("b", 0, vec![ReducerEntry::on(&right, |_: &i32, v: &i32, _| *v)]);
    let both = ctx.derived_stream("both", &a.as_stream(), &b.as_stream(), |a, b| (a, b));
    let (seen, _sub) = record(&both.as_stream());

    // One listener dispatches the second action from inside the first
    let (dispatcher, trigger, follow) = (ctx.dispatcher(), left.clone(), right.clone());
    let _chain = ctx.subscribe(move |action: Action| {
        if trigger.matches(&action) {
            dispatcher.dispatch(follow.create(2)).unwrap();
        }
    });
    ctx.dispatch(left.create(1)).unwrap();

    assert_eq!(*seen.lock(), vec![(0, 0), (1, 2)]);
}

/// The diamond A -> B, A -> C, D = combine(B, C) is reported with both
/// paths ending at A.
#[test]
fn diamond_glitch_is_detected() {
    let ctx = Context::default();
    let set = ActionCreator::<i32>::new("set");
    let a = ctx.reduce_state("A", 0, vec![ReducerEntry::on(&set, |_: &i32, v: &i32, _| *v)]);
    let b = a.as_stream().map(|v| v + 1).mark_name("B");
    let c = a.as_stream().map(|v| v * 2).mark_name("C");
    let d = rivulet_core::stream::combine_latest(&b, &c);

    let marker = find_marker(&d).unwrap();
    let glitch = detect_glitch(&marker).unwrap();
    assert_eq!(glitch.first().last().and_then(|m| m.name()), Some("A"));
    assert_eq!(glitch.second().last().and_then(|m| m.name()), Some("A"));

    // A straight chain is clean
    assert!(detect_glitch(&find_marker(&b).unwrap()).is_none());
}

/// Registry snapshots survive a MessagePack round trip and seed a restart.
#[test]
fn registry_snapshot_restores_states() {
    let ctx = Context::new(Config::production());
    let add = ActionCreator::<i64>::new("add");
    let entries = || vec![ReducerEntry::on(&add, |s: &i64, n: &i64, _| s + n)];

    let total = ctx
        .persistent_reduced_stream("total", 0i64, entries(), PersistentOptions::default())
        .unwrap();
    ctx.start(None).unwrap();
    ctx.dispatch(add.create(41)).unwrap();

    let bytes = ctx.get_states().unwrap().to_msgpack().unwrap();
    let snapshot = Snapshot::from_msgpack(&bytes).unwrap();
    assert_eq!(snapshot.get("total"), Some(&json!(41)));

    // A fresh process seeded from the snapshot continues where it left off
    let restarted = Context::new(Config::production());
    let again = restarted
        .persistent_reduced_stream("total", 0i64, entries(), PersistentOptions::default())
        .unwrap();
    restarted.start(Some(&snapshot)).unwrap();
    restarted.dispatch(add.create(1)).unwrap();
    assert_eq!(again.state().unwrap(), 42);

    ctx.shutdown().unwrap();
    assert_eq!(total.state().unwrap(), 41);
}

/// Production mode rejects a duplicate name; development swaps it in place.
#[test]
fn duplicate_registration_by_mode() {
    let add = ActionCreator::<i64>::new("add");
    let entries = || vec![ReducerEntry::on(&add, |s: &i64, n: &i64, _| s + n)];

    let prod = Context::new(Config { mode: Mode::Production, ..Config::default() });
    prod.persistent_reduced_stream("x", 0i64, entries(), PersistentOptions::default())
        .unwrap();
    let duplicate =
        prod.persistent_reduced_stream("x", 0i64, entries(), PersistentOptions::default());
    assert!(matches!(duplicate, Err(Error::DuplicateStream(_))));

    let dev = Context::default();
    dev.start(None).unwrap();
    let old = dev
        .persistent_reduced_stream("x", 0i64, entries(), PersistentOptions::default())
        .unwrap();
    dev.dispatch(add.create(3)).unwrap();
    let new = dev
        .persistent_reduced_stream("x", 0i64, entries(), PersistentOptions::default())
        .unwrap();
    dev.dispatch(add.create(1)).unwrap();
    assert_eq!(old.state().unwrap(), 3);
    assert_eq!(new.state().unwrap(), 4);
}

/// Collected routines see each action once through a shared upstream, and
/// a failing routine keeps running.
#[test]
fn routines_are_isolated_and_shared() {
    let ctx = Context::default();
    let work = ActionCreator::<u32>::new("work");
    let handled = Arc::new(AtomicUsize::new(0));

    let counter = handled.clone();
    let counting = Routine::on("counting", &work, move |_: &u32, _: &Action| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), rivulet_core::BoxError>(())
    });
    let picky = Routine::on("picky", &work, |n: &u32, _: &Action| {
        if *n % 2 == 1 {
            Err(format!("odd input {n}"))
        } else {
            Ok(())
        }
    });

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let channel = ErrorChannel::new(move |e| sink.lock().push(e.to_string()));
    let workers = collect_routines("workers", vec![counting, picky]);
    let _sub = ctx.subscribe_routine_with(&workers, &channel);

    for n in 0..4 {
        ctx.dispatch(work.create(n)).unwrap();
    }
    assert_eq!(handled.load(Ordering::SeqCst), 4);
    assert_eq!(errors.lock().len(), 2);
    assert_eq!(errors.lock()[0], "routine `picky` failed: odd input 1");
}

/// Actions serialize with their label, payload and scope for inspection
/// tooling.
#[test]
fn actions_serialize_for_tooling() {
    let rename = ActionCreator::<String>::new("rename");
    let action = qualify(&rename, "item-1").create("draft".to_string());
    let scoped = action.with_namespace("editor");

    let value = serde_json::to_value(&scoped).unwrap();
    assert_eq!(value["payload"], json!("draft"));
    assert_eq!(value["meta"]["namespace"], json!("editor"));
    assert_eq!(value["meta"]["qualifiers"], json!(["item-1"]));

    let filtered = ActionStreamExt::of_type(&Stream::of(vec![scoped]), &rename);
    let (seen, _sub) = record(&filtered);
    assert_eq!(seen.lock().len(), 1);
}
