//! Ring buffer SPSC stress tests
//!
//! A producer thread writes a counting sequence in random-sized bursts while
//! a consumer thread reads it back in random-sized bursts. Any lost,
//! duplicated or reordered sample breaks the sequence.

use avsync_player::RingBuffer;
use rand::Rng;
use std::thread;

/// Sequence length; every value is exactly representable as f32
const TOTAL: usize = 2_000_000;

fn run_sequence(capacity: usize, in_place: bool) {
    let ring = RingBuffer::with_capacity(capacity).unwrap();
    let monitor = ring.monitor();
    let (mut producer, mut consumer) = ring.split();

    let writer = thread::spawn(move || {
        let mut rng = rand::thread_rng();
        let mut next = 0usize;
        let mut burst = Vec::with_capacity(capacity);
        while next < TOTAL {
            let len = rng.gen_range(1..=capacity).min(TOTAL - next);
            let written = if in_place {
                producer.write_in_place(len, |first, second| {
                    for (offset, slot) in first.iter_mut().chain(second.iter_mut()).enumerate() {
                        *slot = (next + offset) as f32;
                    }
                })
            } else {
                burst.clear();
                burst.extend((next..next + len).map(|v| v as f32));
                producer.push(&burst)
            };
            assert!(written <= len);
            next += written;
            if written == 0 {
                thread::yield_now();
            }
        }
    });

    let reader = thread::spawn(move || {
        let mut rng = rand::thread_rng();
        let mut expected = 0usize;
        let mut out = vec![0.0f32; capacity];
        while expected < TOTAL {
            let len = rng.gen_range(1..=capacity);
            let read = consumer.pop(&mut out[..len]);
            for sample in &out[..read] {
                assert_eq!(*sample, expected as f32, "sequence broken at {}", expected);
                expected += 1;
            }
            if read == 0 {
                thread::yield_now();
            }
        }
        assert!(consumer.is_empty());
    });

    writer.join().unwrap();
    reader.join().unwrap();

    assert_eq!(monitor.available_read(), 0);
    assert_eq!(monitor.available_write(), capacity);
}

#[test]
fn test_push_pop_sequence_survives_contention() {
    run_sequence(1024, false);
}

#[test]
fn test_in_place_writes_survive_contention() {
    run_sequence(1024, true);
}

#[test]
fn test_tiny_buffer_wraps_constantly() {
    run_sequence(3, false);
}

#[test]
fn test_odd_capacity_in_place() {
    run_sequence(4099, true);
}
