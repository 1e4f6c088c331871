//! Ring queue throughput benchmark.
//!
//! Usage:
//!     cargo run --release --bin ring_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin the producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2  Pin the first consumer to CPU 2 (default: 2)
//!     CONSUMERS=4     SPMC consumer thread count (default: 4)

use std::env;
use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use rotor::sync::{spmc, spsc};

const QUEUE_SIZE: usize = 1 << 16;
const ITERATIONS: usize = 1 << 24;

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn pin_to_cpu(id: usize) {
    core_affinity::set_for_current(core_affinity::CoreId { id });
}

fn bench_spsc_throughput(producer_cpu: usize, consumer_cpu: usize) {
    let (producer, consumer) = spsc::channel::<usize>(QUEUE_SIZE);

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let consumer_thread = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        for expected in 0..ITERATIONS {
            loop {
                if let Some(value) = consumer.pop() {
                    assert_eq!(value, expected, "delivery out of order");
                    break;
                }
                hint::spin_loop();
            }
        }
    });

    while !ready.load(Ordering::Acquire) {
        hint::spin_loop();
    }
    pin_to_cpu(producer_cpu);

    let start = Instant::now();
    for i in 0..ITERATIONS {
        while producer.push(i).is_err() {
            hint::spin_loop();
        }
    }
    consumer_thread.join().unwrap();
    let elapsed = start.elapsed();

    let ops_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();
    println!("spsc: {} ops/ms", ops_per_ms);
}

fn bench_spmc_throughput(producer_cpu: usize, first_consumer_cpu: usize, consumers: usize) {
    let (producer, consumer) = spmc::channel::<usize>(QUEUE_SIZE);
    let claimed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..consumers {
        let consumer = consumer.clone();
        let claimed = Arc::clone(&claimed);
        handles.push(std::thread::spawn(move || {
            pin_to_cpu(first_consumer_cpu + i);
            while claimed.load(Ordering::Relaxed) < ITERATIONS {
                if consumer.pop().is_some() {
                    claimed.fetch_add(1, Ordering::Relaxed);
                } else {
                    hint::spin_loop();
                }
            }
        }));
    }
    drop(consumer);

    pin_to_cpu(producer_cpu);

    let start = Instant::now();
    for i in 0..ITERATIONS {
        while producer.push(i).is_err() {
            hint::spin_loop();
        }
    }
    for handle in handles {
        handle.join().unwrap();
    }
    let elapsed = start.elapsed();

    assert_eq!(claimed.load(Ordering::Relaxed), ITERATIONS);
    let ops_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();
    println!("spmc x{}: {} ops/ms", consumers, ops_per_ms);
}

fn main() {
    rotor::trace::init_tracing();

    let producer_cpu = env_usize("PRODUCER_CPU", 0);
    let consumer_cpu = env_usize("CONSUMER_CPU", 2);
    let consumers = env_usize("CONSUMERS", 4);

    println!(
        "rotor ring (size={}, iters={}):",
        QUEUE_SIZE, ITERATIONS
    );
    bench_spsc_throughput(producer_cpu, consumer_cpu);
    bench_spmc_throughput(producer_cpu, consumer_cpu, consumers);
}
