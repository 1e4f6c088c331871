//! Cross-thread stress properties of the ring protocol.
//!
//! These are the load-bearing guarantees: exactly-once delivery, FIFO order
//! on the exclusive-consumer path, and race integrity of the optimistic
//! multi-consumer claims.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use rotor::sync::{spmc, spsc};

const COUNT: usize = 100_000;

#[test]
fn spsc_delivers_exactly_once_in_order() {
    let (producer, consumer) = spsc::channel::<usize>(1024);

    let producer_thread = thread::spawn(move || {
        for i in 0..COUNT {
            while producer.push(i).is_err() {
                std::hint::spin_loop();
            }
        }
    });

    let mut expected = 0;
    while expected < COUNT {
        if let Some(value) = consumer.pop() {
            assert_eq!(value, expected, "value lost, duplicated, or reordered");
            expected += 1;
        } else {
            std::hint::spin_loop();
        }
    }
    assert!(consumer.pop().is_none());

    producer_thread.join().unwrap();
}

#[test]
fn spmc_delivers_each_value_to_one_consumer() {
    const CONSUMERS: usize = 4;

    let (producer, consumer) = spmc::channel::<usize>(512);
    let done = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for _ in 0..CONSUMERS {
        let consumer = consumer.clone();
        let done = Arc::clone(&done);
        handles.push(thread::spawn(move || {
            let mut claimed = Vec::new();
            loop {
                if let Some(value) = consumer.pop() {
                    claimed.push(value);
                } else if done.load(Ordering::Acquire) {
                    // The earlier None may predate the producer's final
                    // pushes; drain again now that `done` is visible. A
                    // None here really means every entry was claimed by
                    // someone.
                    while let Some(value) = consumer.pop() {
                        claimed.push(value);
                    }
                    break;
                } else {
                    thread::yield_now();
                }
            }
            claimed
        }));
    }
    drop(consumer);

    for i in 0..COUNT {
        while producer.push(i).is_err() {
            thread::yield_now();
        }
    }
    done.store(true, Ordering::Release);

    let mut deliveries = vec![0usize; COUNT];
    for handle in handles {
        let claimed = handle.join().unwrap();
        // Global interleaving is unconstrained, but each consumer's own
        // claims must be monotonically increasing.
        for pair in claimed.windows(2) {
            assert!(pair[0] < pair[1], "per-consumer claim order regressed");
        }
        for value in claimed {
            deliveries[value] += 1;
        }
    }

    for (value, &count) in deliveries.iter().enumerate() {
        assert_eq!(count, 1, "value {value} delivered {count} times");
    }
}

#[test]
fn spmc_try_pop_never_double_claims() {
    const CONSUMERS: usize = 4;

    let (producer, consumer) = spmc::channel::<usize>(256);
    let seen: Arc<Vec<AtomicBool>> = Arc::new((0..COUNT).map(|_| AtomicBool::new(false)).collect());
    let claimed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..CONSUMERS {
        let consumer = consumer.clone();
        let seen = Arc::clone(&seen);
        let claimed = Arc::clone(&claimed);
        handles.push(thread::spawn(move || {
            while claimed.load(Ordering::Relaxed) < COUNT {
                // Single attempt: None may mean empty or a lost race, and
                // either way the attempt must have no observable effect.
                if let Some(value) = consumer.try_pop() {
                    let already = seen[value].swap(true, Ordering::Relaxed);
                    assert!(!already, "value {value} claimed twice");
                    claimed.fetch_add(1, Ordering::Relaxed);
                } else {
                    thread::yield_now();
                }
            }
        }));
    }
    drop(consumer);

    for i in 0..COUNT {
        while producer.push(i).is_err() {
            thread::yield_now();
        }
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(claimed.load(Ordering::Relaxed), COUNT);
    assert!(seen.iter().all(|flag| flag.load(Ordering::Relaxed)));
}
