//! Dependency-ordered dispatch through the scheduler.

use crate::fixtures::{concurrent_queue, runtime, serial_queue};
use dispatchq::{
    Completer, Error, Outcome, Scheduler, SchedulerEvent, UnitPoll, UnitState, WorkUnit,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn ordered_unit(label: &str, order: &Arc<Mutex<Vec<String>>>) -> WorkUnit {
    let order = Arc::clone(order);
    let tag = label.to_string();
    WorkUnit::from_fn(label, move |_| {
        order.lock().unwrap().push(tag.clone());
        Ok(())
    })
}

#[test]
fn fan_out_fan_in_graph_respects_every_edge() {
    let rt = runtime(4);
    let queue = concurrent_queue(&rt, "dag", None);
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut scheduler = Scheduler::new(tx);

    let order = Arc::new(Mutex::new(Vec::new()));
    let fetch = ordered_unit("fetch", &order);
    let parse_a = ordered_unit("parse-a", &order);
    let parse_b = ordered_unit("parse-b", &order);
    let merge = ordered_unit("merge", &order);
    let publish = ordered_unit("publish", &order);

    let edges = vec![
        (fetch.id(), parse_a.id()),
        (fetch.id(), parse_b.id()),
        (parse_a.id(), merge.id()),
        (parse_b.id(), merge.id()),
        (merge.id(), publish.id()),
    ];
    let batch = [&fetch, &parse_a, &parse_b, &merge, &publish]
        .iter()
        .map(|u| ((*u).clone(), queue.clone()))
        .collect();
    scheduler.admit(batch, &edges).unwrap();
    scheduler.run_to_idle().unwrap();
    rt.shutdown();

    let order = order.lock().unwrap();
    let position = |tag: &str| order.iter().position(|o| o == tag).unwrap();
    assert_eq!(order.len(), 5);
    assert!(position("fetch") < position("parse-a"));
    assert!(position("fetch") < position("parse-b"));
    assert!(position("parse-a") < position("merge"));
    assert!(position("parse-b") < position("merge"));
    assert!(position("merge") < position("publish"));

    let events: Vec<SchedulerEvent> = rx.try_iter().collect();
    assert_eq!(
        events.last(),
        Some(&SchedulerEvent::AllUnitsFinished),
        "terminal event emitted once the whole graph drained"
    );
}

#[test]
fn cycle_in_admission_batch_rejected_before_any_execution() {
    let rt = runtime(2);
    let queue = serial_queue(&rt, "rejected");
    let (tx, _rx) = crossbeam_channel::unbounded();
    let mut scheduler = Scheduler::new(tx);

    let ran = Arc::new(AtomicUsize::new(0));
    let units: Vec<WorkUnit> = ["a", "b", "c"]
        .iter()
        .map(|label| {
            let ran = Arc::clone(&ran);
            WorkUnit::from_fn(label, move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect();
    let edges = vec![
        (units[0].id(), units[1].id()),
        (units[1].id(), units[2].id()),
        (units[2].id(), units[0].id()),
    ];
    let batch = units.iter().map(|u| (u.clone(), queue.clone())).collect();
    let err = scheduler.admit(batch, &edges).unwrap_err();

    match err {
        Error::DependencyCycle { units: members } => {
            assert_eq!(members, vec!["a", "b", "c"], "cycle participants named");
        }
        other => panic!("expected DependencyCycle, got {}", other),
    }
    rt.shutdown();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(units.iter().all(|u| u.state() == UnitState::Ready));
}

#[test]
fn cancelling_a_ready_unit_skips_its_body_but_frees_dependents() {
    let rt = runtime(2);
    let queue = serial_queue(&rt, "cancelling");
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut scheduler = Scheduler::new(tx);

    let touched = Arc::new(AtomicUsize::new(0));
    let t = Arc::clone(&touched);
    let doomed = WorkUnit::from_fn("doomed", move |_| {
        t.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let t = Arc::clone(&touched);
    let survivor = WorkUnit::from_fn("survivor", move |_| {
        t.fetch_add(10, Ordering::SeqCst);
        Ok(())
    });
    let edges = vec![(doomed.id(), survivor.id())];
    scheduler
        .admit(
            vec![(doomed.clone(), queue.clone()), (survivor.clone(), queue)],
            &edges,
        )
        .unwrap();

    doomed.cancel();
    scheduler.run_to_idle().unwrap();
    rt.shutdown();

    assert_eq!(doomed.outcome(), Some(Outcome::Cancelled));
    assert_eq!(survivor.outcome(), Some(Outcome::Success));
    assert_eq!(touched.load(Ordering::SeqCst), 10, "cancelled body never ran");

    let outcomes: Vec<SchedulerEvent> = rx.try_iter().collect();
    assert!(outcomes.contains(&SchedulerEvent::UnitFinished {
        id: doomed.id(),
        outcome: Outcome::Cancelled
    }));
}

#[test]
fn deferred_unit_holds_the_graph_until_its_completer_fires() {
    let rt = runtime(4);
    let queue = concurrent_queue(&rt, "deferred", None);
    let (tx, _rx) = crossbeam_channel::unbounded();
    let mut scheduler = Scheduler::new(tx);

    let completer_slot: Arc<Mutex<Option<Completer>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&completer_slot);
    let async_like = WorkUnit::new("callback-driven", move |ctx| {
        *slot.lock().unwrap() = Some(ctx.completer());
        UnitPoll::Deferred
    });
    let ran = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&ran);
    let follower = WorkUnit::from_fn("follower", move |_| {
        r.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let edges = vec![(async_like.id(), follower.id())];
    scheduler
        .admit(
            vec![
                (async_like.clone(), queue.clone()),
                (follower.clone(), queue),
            ],
            &edges,
        )
        .unwrap();

    // Completion arrives from outside the unit body, as an external
    // callback would deliver it.
    let unit = async_like.clone();
    let slot = Arc::clone(&completer_slot);
    let external = std::thread::spawn(move || {
        while unit.state() != UnitState::Executing {
            std::thread::yield_now();
        }
        std::thread::sleep(Duration::from_millis(5));
        let completer = slot.lock().unwrap().take().unwrap();
        completer.complete(Ok(()));
    });

    scheduler.run_to_idle().unwrap();
    external.join().unwrap();
    rt.shutdown();

    assert_eq!(async_like.outcome(), Some(Outcome::Success));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn incremental_admission_links_to_finished_units() {
    let rt = runtime(2);
    let queue = serial_queue(&rt, "incremental");
    let (tx, _rx) = crossbeam_channel::unbounded();
    let mut scheduler = Scheduler::new(tx);

    let order = Arc::new(Mutex::new(Vec::new()));
    let first = ordered_unit("first", &order);
    scheduler
        .admit(vec![(first.clone(), queue.clone())], &[])
        .unwrap();
    scheduler.run_to_idle().unwrap();
    assert_eq!(first.outcome(), Some(Outcome::Success));

    // A later batch may depend on an already-finished unit; it is
    // immediately ready.
    let second = ordered_unit("second", &order);
    let edges = vec![(first.id(), second.id())];
    scheduler
        .admit(vec![(second.clone(), queue)], &edges)
        .unwrap();
    scheduler.run_to_idle().unwrap();
    rt.shutdown();

    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}
