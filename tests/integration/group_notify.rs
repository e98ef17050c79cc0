//! Task group completion tracking across queues.

use crate::fixtures::{concurrent_queue, runtime, serial_queue, wait_until};
use dispatchq::{TaskGroup, WaitOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn group_spanning_two_queues_notifies_once_after_all_tasks() {
    let rt = runtime(4);
    let a = serial_queue(&rt, "alpha");
    let b = concurrent_queue(&rt, "beta", None);
    let group = TaskGroup::new("batch");
    let tasks_done = Arc::new(AtomicUsize::new(0));
    let notified = Arc::new(AtomicUsize::new(0));

    for queue in [&a, &b, &a] {
        let done = Arc::clone(&tasks_done);
        queue
            .submit_with_group(&group, move || {
                std::thread::sleep(Duration::from_millis(2));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }
    let seen_at_notify = Arc::new(AtomicUsize::new(0));
    let n = Arc::clone(&notified);
    let seen = Arc::clone(&seen_at_notify);
    let done = Arc::clone(&tasks_done);
    group
        .notify(&b, move || {
            seen.store(done.load(Ordering::SeqCst), Ordering::SeqCst);
            n.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    rt.shutdown();
    assert_eq!(notified.load(Ordering::SeqCst), 1, "exactly one notification");
    assert_eq!(
        seen_at_notify.load(Ordering::SeqCst),
        3,
        "notification ran after every task"
    );
}

#[test]
fn notify_on_an_already_idle_group_fires_immediately() {
    let rt = runtime(2);
    let queue = serial_queue(&rt, "idle-target");
    let group = TaskGroup::new("idle");
    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    group
        .notify(&queue, move || {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    rt.shutdown();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn wait_returns_when_the_batch_drains() {
    let rt = runtime(2);
    let queue = concurrent_queue(&rt, "waited", None);
    let group = TaskGroup::new("batch");
    for _ in 0..4 {
        queue
            .submit_with_group(&group, || {
                std::thread::sleep(Duration::from_millis(3));
            })
            .unwrap();
    }
    assert_eq!(group.wait(Some(Duration::from_secs(5))), WaitOutcome::Completed);
    assert_eq!(group.pending(), 0);
    rt.shutdown();
}

#[test]
fn wait_times_out_without_cancelling_anything() {
    let rt = runtime(2);
    let queue = serial_queue(&rt, "slow");
    let group = TaskGroup::new("slow-batch");
    let done = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&done);
    let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
    queue
        .submit_with_group(&group, move || {
            let _ = gate_rx.recv();
            d.store(1, Ordering::SeqCst);
        })
        .unwrap();

    assert_eq!(
        group.wait(Some(Duration::from_millis(10))),
        WaitOutcome::TimedOut
    );
    assert_eq!(done.load(Ordering::SeqCst), 0, "task still running");

    gate_tx.send(()).unwrap();
    assert_eq!(group.wait(Some(Duration::from_secs(5))), WaitOutcome::Completed);
    assert_eq!(done.load(Ordering::SeqCst), 1);
    rt.shutdown();
}

#[test]
fn group_is_reusable_across_batches() {
    let rt = runtime(2);
    let queue = serial_queue(&rt, "reused");
    let group = TaskGroup::new("cycles");

    for batch in 0..3 {
        queue.submit_with_group(&group, || {}).unwrap();
        assert_eq!(group.wait(Some(Duration::from_secs(5))), WaitOutcome::Completed);
        assert_eq!(group.generation(), batch + 1, "one crossing per batch");
    }
    rt.shutdown();
}

#[test]
fn manual_enter_leave_brackets_out_of_band_work() {
    let rt = runtime(2);
    let group = TaskGroup::new("manual");
    group.enter();
    let g = group.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(5));
        g.leave().unwrap();
    });
    assert_eq!(group.wait(Some(Duration::from_secs(5))), WaitOutcome::Completed);
    handle.join().unwrap();

    // A leave with no matching enter is a usage error.
    assert!(group.leave().is_err());
    rt.shutdown();
}

#[test]
fn panicked_task_is_reported_and_does_not_wedge_the_group() {
    let rt = runtime(2);
    let queue = concurrent_queue(&rt, "faulty", None);
    let group = TaskGroup::new("faulty-batch");
    queue
        .submit_with_group(&group, || panic!("worker tripped"))
        .unwrap();
    queue.submit_with_group(&group, || {}).unwrap();

    assert_eq!(group.wait(Some(Duration::from_secs(5))), WaitOutcome::Completed);
    assert_eq!(group.take_failures(), vec!["worker tripped"]);
    rt.shutdown();
}

#[test]
fn late_enter_starts_a_new_cycle_with_its_own_notification() {
    let rt = runtime(2);
    let queue = serial_queue(&rt, "cycling");
    let group = TaskGroup::new("two-cycles");
    let fired = Arc::new(AtomicUsize::new(0));

    queue.submit_with_group(&group, || {}).unwrap();
    let f = Arc::clone(&fired);
    group
        .notify(&queue, move || {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    wait_until(Duration::from_secs(5), "first notification", || {
        fired.load(Ordering::SeqCst) == 1
    });

    // Second batch, second registration, second crossing.
    queue.submit_with_group(&group, || {}).unwrap();
    let f = Arc::clone(&fired);
    group
        .notify(&queue, move || {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    wait_until(Duration::from_secs(5), "second notification", || {
        fired.load(Ordering::SeqCst) == 2
    });
    rt.shutdown();
}
