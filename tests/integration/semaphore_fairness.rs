//! Semaphore bounds and FIFO wake order under real queue traffic.

use crate::fixtures::{concurrent_queue, runtime, wait_until, ConcurrencyProbe};
use dispatchq::{AcquireOutcome, Semaphore};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn semaphore_bounds_concurrency_on_a_wide_queue() {
    let rt = runtime(8);
    let queue = concurrent_queue(&rt, "guarded", None);
    let sem = Semaphore::new(2);
    let probe = ConcurrencyProbe::new();

    for _ in 0..16 {
        let sem = sem.clone();
        let probe = probe.clone();
        queue
            .submit(move || {
                sem.acquire();
                {
                    let _guard = probe.enter();
                    std::thread::sleep(Duration::from_millis(2));
                }
                sem.release();
            })
            .unwrap();
    }
    rt.shutdown();
    assert!(probe.peak() <= 2, "peak {} exceeded the permit count", probe.peak());
    assert_eq!(sem.value(), 2, "all permits returned");
}

#[test]
fn releases_wake_waiters_in_arrival_order() {
    let sem = Semaphore::new(0);
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for i in 0..5 {
        let thread_sem = sem.clone();
        let order = Arc::clone(&order);
        handles.push(std::thread::spawn(move || {
            thread_sem.acquire();
            order.lock().unwrap().push(i);
        }));
        // Each waiter is parked before the next arrives.
        wait_until(Duration::from_secs(5), "waiter to park", || {
            sem.waiting() == i + 1
        });
    }

    for _ in 0..5 {
        sem.release();
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn zero_initialized_semaphore_is_a_rendezvous() {
    let sem = Semaphore::new(0);
    let sem2 = sem.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(10));
        sem2.release();
    });
    sem.acquire();
    handle.join().unwrap();
}

#[test]
fn timed_acquire_reports_timeout_and_does_not_refund() {
    let sem = Semaphore::new(0);
    let outcome = sem.acquire_timeout(Duration::from_millis(10));
    assert_eq!(outcome, AcquireOutcome::TimedOut);
    // The failed wait consumed its decrement; the next release only
    // restores it to zero.
    sem.release();
    assert_eq!(sem.value(), 0);
    assert_eq!(
        sem.acquire_timeout(Duration::from_millis(10)),
        AcquireOutcome::TimedOut
    );
}

#[test]
fn timed_acquire_succeeds_when_released_in_time() {
    let sem = Semaphore::new(0);
    let sem2 = sem.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(5));
        sem2.release();
    });
    assert_eq!(
        sem.acquire_timeout(Duration::from_secs(5)),
        AcquireOutcome::Acquired
    );
    handle.join().unwrap();
}
