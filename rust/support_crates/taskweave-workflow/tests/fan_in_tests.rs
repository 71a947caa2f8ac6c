use std::{
    collections::BTreeSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use taskweave_common::error::Error;
use taskweave_workflow::{
    config::DispatchOptions,
    data_parallel::for_each_parallel_with,
    latch::{Latch, SyncHandle},
    work_item::WorkItem,
    work_pool::{PoolState, WorkPool},
};

#[test]
fn test_latch_released_by_three_signalers() {
    let latch = Arc::new(Latch::new(3));
    let observed_early = Arc::new(AtomicUsize::new(0));

    let waiter = {
        let latch = latch.clone();
        thread::spawn(move || latch.wait_timeout(Duration::from_secs(30)))
    };

    let signalers = (0..3)
        .map(|i| {
            let latch = latch.clone();
            let observed_early = observed_early.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10 * i));
                if latch.is_set() {
                    observed_early.fetch_add(1, Ordering::SeqCst);
                }
                latch.signal().unwrap();
            })
        })
        .collect::<Vec<_>>();
    for s in signalers {
        s.join().unwrap();
    }

    waiter.join().unwrap().unwrap();
    assert!(latch.is_set());
    assert_eq!(observed_early.load(Ordering::SeqCst), 0);
}

#[test]
fn test_units_fan_in_on_shared_latch() {
    const UNITS: usize = 12;
    let latch = Arc::new(Latch::new(UNITS));
    let sum = Arc::new(AtomicUsize::new(0));

    let mut results = Vec::new();
    let mut items = Vec::new();
    for n in 0..UNITS {
        let sum = sum.clone();
        let (mut item, result) = WorkItem::function(
            n,
            latch.clone(),
            move |a: usize, b: usize| {
                sum.fetch_add(a * b, Ordering::SeqCst);
                a * b
            },
            (n, 2),
        );
        item.data_mut().insert("index", n);
        items.push(item);
        results.push(result);
    }

    // Hand the units to plain threads and fan in on the latch.
    let handles = items
        .into_iter()
        .map(|mut item| thread::spawn(move || item.execute()))
        .collect::<Vec<_>>();
    latch.wait_timeout(Duration::from_secs(30)).unwrap();
    for h in handles {
        h.join().unwrap().unwrap();
    }

    let values = results
        .iter()
        .map(|r| r.take().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(values, (0..UNITS).map(|n| n * 2).collect::<Vec<_>>());
    assert_eq!(sum.load(Ordering::SeqCst), (0..UNITS).map(|n| n * 2).sum::<usize>());
}

#[test]
fn test_pool_isolates_third_unit() {
    let latch = Arc::new(Latch::new(5));
    let completed = Arc::new(Mutex::new(BTreeSet::new()));

    let mut items = (1..=5u32)
        .map(|n| {
            let completed = completed.clone();
            WorkItem::action(
                n,
                latch.clone() as Arc<dyn SyncHandle>,
                move |n: u32| -> Result<(), Error> {
                    if n == 3 {
                        return Err(Error::invalid_operation("unit 3 refused"));
                    }
                    completed.lock().unwrap().insert(n);
                    Ok(())
                },
                (n,),
            )
        })
        .collect::<Vec<_>>();

    let mut pool = WorkPool::new();
    pool.drain_parallel(&mut items, &DispatchOptions::new().with_degree(2))
        .unwrap();

    assert_eq!(pool.state(), PoolState::Drained);
    assert_eq!(pool.faults().len(), 1);
    assert_eq!(pool.faults()[0].sort_order, "3");
    assert_eq!(*completed.lock().unwrap(), BTreeSet::from([1, 2, 4, 5]));
    assert!(latch.is_set());
}

#[test]
fn test_dispatcher_visits_one_through_eight() {
    let visited = Mutex::new(Vec::new());
    for_each_parallel_with(&DispatchOptions::new().with_degree(4), 1..=8, |v| {
        visited.lock().unwrap().push(v);
    })
    .unwrap();

    let visited = visited.into_inner().unwrap();
    let unique = visited.iter().copied().collect::<BTreeSet<_>>();
    assert_eq!(visited.len(), 8);
    assert_eq!(unique, (1..=8).collect::<BTreeSet<_>>());
}

#[test]
fn test_dispose_while_waiting_does_not_crash() {
    let latch = Arc::new(Latch::new(1));
    let waiters = (0..4)
        .map(|_| {
            let latch = latch.clone();
            thread::spawn(move || latch.wait_timeout(Duration::from_secs(30)))
        })
        .collect::<Vec<_>>();
    thread::sleep(Duration::from_millis(20));
    latch.dispose();
    for w in waiters {
        let e = w.join().expect("waiter survives dispose").unwrap_err();
        assert!(e.is_disposed());
    }
}
