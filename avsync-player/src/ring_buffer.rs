//! Wait-Free SPSC Ring Buffer for Interleaved Audio Samples
//!
//! The only sample store shared between the decode side (producer) and the
//! real-time audio output callback (consumer).
//!
//! ## Design
//!
//! ```text
//! word 0      word 1      word 2 ............................ word 2+N-1
//! ┌──────────┬──────────┬──────────────────────────────────────────────┐
//! │ write ix │ read ix  │ N f32 slots (channel-interleaved samples)     │
//! └──────────┴──────────┴──────────────────────────────────────────────┘
//! ```
//!
//! - One contiguous region of 32-bit words, `N = capacity + 1` slots
//! - One slot is always left empty so `read == write` means empty and
//!   `write + 1 == read (mod N)` means full
//! - The producer is the only writer of the write index, the consumer the only
//!   writer of the read index
//! - Payload is written before the index is published (release store), and
//!   the other side's index is acquire-loaded before touching payload
//!
//! Every operation completes in a bounded number of steps: no locks, no
//! spinning, no allocation after construction.
//!
//! ## Roles
//!
//! `RingBuffer::split` consumes the buffer and yields exactly one
//! `SampleProducer` and one `SampleConsumer`. Neither is `Clone` and all
//! mutating operations take `&mut self`, so two writers or two readers cannot
//! exist. `BufferMonitor` is a read-only observer for diagnostics.
//!
//! ## Staleness
//!
//! `available_read()` / `available_write()` snapshot both indices. The other
//! side may move on right after the snapshot; the value is conservative for
//! the caller's own role (a producer never sees less free space than it will
//! actually get) but only approximate for observers.

use crate::error::{Error, Result};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Number of 32-bit header words preceding the sample slots
pub const HEADER_WORDS: usize = 2;

/// Size in bytes of one header word or sample slot
pub const WORD_BYTES: usize = 4;

const WRITE_WORD: usize = 0;
const READ_WORD: usize = 1;

/// Contiguous heap region: header words followed by sample slots
struct Region {
    ptr: NonNull<u32>,
    words: usize,
}

// SAFETY: the region is a plain heap allocation. Cross-thread access is
// coordinated by the SPSC protocol: header words are only touched atomically,
// and each sample slot is owned by exactly one side at any time.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    fn new(words: usize) -> Self {
        let boxed: Box<[u32]> = vec![0u32; words].into_boxed_slice();
        let ptr = NonNull::from(Box::leak(boxed)).cast::<u32>();
        Self { ptr, words }
    }

    fn header(&self, word: usize) -> &AtomicU32 {
        debug_assert!(word < HEADER_WORDS);
        // SAFETY: `word` is within the allocation, u32 and AtomicU32 share size
        // and alignment, and header words are never accessed non-atomically.
        unsafe { AtomicU32::from_ptr(self.ptr.as_ptr().add(word)) }
    }

    fn slots(&self) -> *mut f32 {
        // SAFETY: HEADER_WORDS < words, so the offset stays inside the allocation.
        // f32 has the same size and alignment as u32.
        unsafe { self.ptr.as_ptr().add(HEADER_WORDS).cast::<f32>() }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: ptr/words come from the leaked Box<[u32]> in `new`.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.words,
            )));
        }
    }
}

/// State shared by the producer, consumer and monitors
struct Shared {
    region: Region,

    /// Slot count N (usable capacity is N - 1)
    slots: usize,

    /// Pushes/reservations that delivered fewer elements than requested
    short_writes: AtomicU64,

    /// Pops that delivered fewer elements than requested (underruns)
    short_reads: AtomicU64,
}

impl Shared {
    fn write_index(&self) -> &AtomicU32 {
        self.region.header(WRITE_WORD)
    }

    fn read_index(&self) -> &AtomicU32 {
        self.region.header(READ_WORD)
    }

    fn capacity(&self) -> usize {
        self.slots - 1
    }

    fn readable(&self, read: usize, write: usize) -> usize {
        (write + self.slots - read) % self.slots
    }

    fn writable(&self, read: usize, write: usize) -> usize {
        self.capacity() - self.readable(read, write)
    }

    /// (read, write) snapshot, both acquire-loaded
    fn snapshot(&self) -> (usize, usize) {
        let read = self.read_index().load(Ordering::Acquire) as usize;
        let write = self.write_index().load(Ordering::Acquire) as usize;
        (read, write)
    }

    fn available_read(&self) -> usize {
        let (read, write) = self.snapshot();
        self.readable(read, write)
    }

    fn available_write(&self) -> usize {
        let (read, write) = self.snapshot();
        self.writable(read, write)
    }

    fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            capacity: self.capacity(),
            available_read: self.available_read(),
            short_writes: self.short_writes.load(Ordering::Relaxed),
            short_reads: self.short_reads.load(Ordering::Relaxed),
        }
    }
}

/// Fixed-capacity ring buffer of interleaved `f32` samples
///
/// Created once per playback session, then split into its two role handles.
pub struct RingBuffer {
    shared: Arc<Shared>,
}

impl RingBuffer {
    /// Create a ring buffer holding up to `capacity` samples
    ///
    /// # Errors
    /// `InvalidConfig` if `capacity` is zero or `capacity + 1` slots cannot be
    /// addressed by a 32-bit index.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig(
                "ring buffer capacity must be at least 1".to_string(),
            ));
        }
        let slots = capacity
            .checked_add(1)
            .filter(|slots| *slots <= u32::MAX as usize)
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "ring buffer capacity {} exceeds 32-bit index range",
                    capacity
                ))
            })?;

        debug!(
            "Creating ring buffer: capacity={} samples, region={} bytes",
            capacity,
            Self::region_len_bytes(capacity)
        );

        Ok(Self {
            shared: Arc::new(Shared {
                region: Region::new(HEADER_WORDS + slots),
                slots,
                short_writes: AtomicU64::new(0),
                short_reads: AtomicU64::new(0),
            }),
        })
    }

    /// Create a ring buffer sized to hold `duration` of interleaved audio
    pub fn for_duration(duration: Duration, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(Error::InvalidConfig(format!(
                "cannot size ring buffer for {} Hz / {} channels",
                sample_rate, channels
            )));
        }
        let frames = avsync_common::timing::duration_to_frames(duration, sample_rate);
        Self::with_capacity(frames * channels as usize)
    }

    /// Size in bytes of the shared region for a given usable capacity
    pub fn region_len_bytes(capacity: usize) -> usize {
        (HEADER_WORDS + capacity + 1) * WORD_BYTES
    }

    /// Usable capacity in samples
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Read-only observer handle
    pub fn monitor(&self) -> BufferMonitor {
        BufferMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Split into producer and consumer halves
    ///
    /// Producer is used by the decode side, consumer by the audio callback.
    /// Each half can be moved to a different thread.
    pub fn split(self) -> (SampleProducer, SampleConsumer) {
        let producer = SampleProducer {
            shared: Arc::clone(&self.shared),
        };
        let consumer = SampleConsumer {
            shared: self.shared,
        };
        (producer, consumer)
    }
}

/// Producer half (decode side)
pub struct SampleProducer {
    shared: Arc<Shared>,
}

impl SampleProducer {
    /// Push samples, returning how many were written
    ///
    /// Writes `min(elements.len(), available_write())`; returns 0 when full.
    /// Never blocks.
    pub fn push(&mut self, elements: &[f32]) -> usize {
        self.write_in_place(elements.len(), |first, second| {
            let split = first.len();
            first.copy_from_slice(&elements[..split]);
            second.copy_from_slice(&elements[split..split + second.len()]);
        })
    }

    /// Reserve up to `amount` slots and let `fill` write them directly
    ///
    /// `fill` receives the span before the wrap boundary and the span after it
    /// (either may be empty); their lengths add up to the returned count. The
    /// slots are published to the consumer only after `fill` returns.
    pub fn write_in_place<F>(&mut self, amount: usize, fill: F) -> usize
    where
        F: FnOnce(&mut [f32], &mut [f32]),
    {
        let shared = &*self.shared;
        let read = shared.read_index().load(Ordering::Acquire) as usize;
        let write = shared.write_index().load(Ordering::Relaxed) as usize;

        let reserved = amount.min(shared.writable(read, write));
        if reserved < amount {
            shared.short_writes.fetch_add(1, Ordering::Relaxed);
        }
        if reserved == 0 {
            return 0;
        }

        let first_len = reserved.min(shared.slots - write);
        let second_len = reserved - first_len;

        // SAFETY: [write, write + reserved) mod N lies in the free region, which
        // the consumer never reads until the write index is published below.
        // The two spans are disjoint and inside the slot array.
        let (first, second) = unsafe {
            let base = shared.region.slots();
            (
                std::slice::from_raw_parts_mut(base.add(write), first_len),
                std::slice::from_raw_parts_mut(base, second_len),
            )
        };
        fill(first, second);

        let next = (write + reserved) % shared.slots;
        shared.write_index().store(next as u32, Ordering::Release);
        reserved
    }

    /// Samples the producer can write right now
    pub fn available_write(&self) -> usize {
        self.shared.available_write()
    }

    /// Samples waiting for the consumer
    pub fn available_read(&self) -> usize {
        self.shared.available_read()
    }

    /// Usable capacity in samples
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Point-in-time full check
    pub fn is_full(&self) -> bool {
        self.available_write() == 0
    }

    /// Statistics snapshot
    pub fn stats(&self) -> RingBufferStats {
        self.shared.stats()
    }

    /// Read-only observer handle
    pub fn monitor(&self) -> BufferMonitor {
        BufferMonitor {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Consumer half (audio output callback)
pub struct SampleConsumer {
    shared: Arc<Shared>,
}

impl SampleConsumer {
    /// Pop samples into `elements`, returning how many were read
    ///
    /// Reads `min(elements.len(), available_read())`; returns 0 when empty.
    /// Real-time safe: no locks, no allocation, no logging.
    pub fn pop(&mut self, elements: &mut [f32]) -> usize {
        let shared = &*self.shared;
        let write = shared.write_index().load(Ordering::Acquire) as usize;
        let read = shared.read_index().load(Ordering::Relaxed) as usize;

        let count = elements.len().min(shared.readable(read, write));
        if count < elements.len() {
            shared.short_reads.fetch_add(1, Ordering::Relaxed);
        }
        if count == 0 {
            return 0;
        }

        let first_len = count.min(shared.slots - read);
        let second_len = count - first_len;

        // SAFETY: [read, read + count) mod N was published by the producer
        // (acquire load above) and is not rewritten until the read index moves.
        unsafe {
            let base = shared.region.slots();
            ptr::copy_nonoverlapping(base.add(read), elements.as_mut_ptr(), first_len);
            ptr::copy_nonoverlapping(base, elements.as_mut_ptr().add(first_len), second_len);
        }

        let next = (read + count) % shared.slots;
        shared.read_index().store(next as u32, Ordering::Release);
        count
    }

    /// Samples waiting to be read
    pub fn available_read(&self) -> usize {
        self.shared.available_read()
    }

    /// Free slots the producer could fill
    pub fn available_write(&self) -> usize {
        self.shared.available_write()
    }

    /// Usable capacity in samples
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Point-in-time empty check
    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }
}

/// Read-only view of a ring buffer for diagnostics
///
/// Only loads the indices, never publishes them.
#[derive(Clone)]
pub struct BufferMonitor {
    shared: Arc<Shared>,
}

impl BufferMonitor {
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    pub fn available_read(&self) -> usize {
        self.shared.available_read()
    }

    pub fn available_write(&self) -> usize {
        self.shared.available_write()
    }

    /// Fill ratio: `1 - available_write / capacity`
    pub fn health(&self) -> f64 {
        1.0 - self.available_write() as f64 / self.capacity() as f64
    }

    pub fn stats(&self) -> RingBufferStats {
        self.shared.stats()
    }
}

impl std::fmt::Debug for BufferMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferMonitor")
            .field("capacity", &self.capacity())
            .field("available_read", &self.available_read())
            .finish()
    }
}

/// Ring buffer statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingBufferStats {
    /// Usable capacity in samples
    pub capacity: usize,

    /// Samples buffered at snapshot time
    pub available_read: usize,

    /// Producer operations that wrote less than requested
    pub short_writes: u64,

    /// Consumer operations that read less than requested
    pub short_reads: u64,
}

impl RingBufferStats {
    /// Buffer fill ratio (0.0 to 1.0)
    pub fn fill_percent(&self) -> f64 {
        self.available_read as f64 / self.capacity as f64
    }
}

#[cfg(test)]
impl BufferMonitor {
    /// Raw header or slot word, for layout tests
    fn raw_word(&self, index: usize) -> u32 {
        assert!(index < self.shared.region.words);
        if index < HEADER_WORDS {
            self.shared.region.header(index).load(Ordering::Acquire)
        } else {
            // SAFETY: in-bounds read of a slot no one is writing during the test
            unsafe { ptr::read(self.shared.region.ptr.as_ptr().add(index)) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(capacity: usize) -> (SampleProducer, SampleConsumer) {
        RingBuffer::with_capacity(capacity).unwrap().split()
    }

    #[test]
    fn test_push_pop_basic() {
        let (mut prod, mut cons) = ring(8);

        assert_eq!(prod.push(&[0.1, 0.2, 0.3]), 3);
        assert_eq!(cons.available_read(), 3);

        let mut out = [0.0; 3];
        assert_eq!(cons.pop(&mut out), 3);
        assert_eq!(out, [0.1, 0.2, 0.3]);
        assert!(cons.is_empty());
    }

    #[test]
    fn test_capacity_reserves_sentinel_slot() {
        let rb = RingBuffer::with_capacity(4).unwrap();
        assert_eq!(rb.capacity(), 4);
        assert_eq!(RingBuffer::region_len_bytes(4), (2 + 5) * 4);

        let (mut prod, _cons) = rb.split();
        assert_eq!(prod.push(&[1.0; 10]), 4);
        assert!(prod.is_full());
        assert_eq!(prod.push(&[1.0]), 0);
    }

    #[test]
    fn test_pop_empty_returns_zero() {
        let (_prod, mut cons) = ring(4);
        let mut out = [9.0; 2];
        assert_eq!(cons.pop(&mut out), 0);
        assert_eq!(out, [9.0; 2]);
        assert_eq!(cons.shared.stats().short_reads, 1);
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let (mut prod, mut cons) = ring(5);
        let mut out = [0.0; 4];

        assert_eq!(prod.push(&[1.0, 2.0, 3.0, 4.0]), 4);
        assert_eq!(cons.pop(&mut out[..3]), 3);
        // write index is at 4 of 6 slots; this write wraps
        assert_eq!(prod.push(&[5.0, 6.0, 7.0, 8.0]), 4);
        assert_eq!(cons.available_read(), 5);

        let mut rest = [0.0; 5];
        assert_eq!(cons.pop(&mut rest), 5);
        assert_eq!(rest, [4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_write_in_place_splits_at_wrap() {
        let (mut prod, mut cons) = ring(5);
        let mut scratch = [0.0; 4];
        prod.push(&[0.0; 4]);
        cons.pop(&mut scratch);

        let mut lens = (0, 0);
        let reserved = prod.write_in_place(5, |first, second| {
            lens = (first.len(), second.len());
            for (i, s) in first.iter_mut().chain(second.iter_mut()).enumerate() {
                *s = i as f32;
            }
        });

        assert_eq!(reserved, 5);
        assert_eq!(lens, (2, 3));
        let mut out = [0.0; 5];
        assert_eq!(cons.pop(&mut out), 5);
        assert_eq!(out, [0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_write_in_place_short_when_nearly_full() {
        let (mut prod, _cons) = ring(4);
        prod.push(&[0.0; 3]);

        let reserved = prod.write_in_place(3, |first, second| {
            assert_eq!(first.len() + second.len(), 1);
        });
        assert_eq!(reserved, 1);
        assert_eq!(prod.stats().short_writes, 1);
    }

    #[test]
    fn test_available_sum_equals_capacity() {
        let (mut prod, mut cons) = ring(7);
        let mut out = [0.0; 3];
        for step in 0..20 {
            prod.push(&[step as f32; 2]);
            if step % 3 == 0 {
                cons.pop(&mut out);
            }
            assert_eq!(prod.available_read() + prod.available_write(), 7);
        }
    }

    #[test]
    fn test_bit_identical_round_trip() {
        let (mut prod, mut cons) = ring(16);
        let values = [
            f32::MIN_POSITIVE,
            -0.0,
            f32::MAX,
            f32::NAN,
            f32::INFINITY,
            1.0e-40, // subnormal
            -1.0,
        ];
        assert_eq!(prod.push(&values), values.len());

        let mut out = [0.0f32; 7];
        assert_eq!(cons.pop(&mut out), 7);
        for (a, b) in values.iter().zip(out.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_region_layout() {
        let rb = RingBuffer::with_capacity(4).unwrap();
        let monitor = rb.monitor();
        let (mut prod, mut cons) = rb.split();

        prod.push(&[1.5, -2.0]);
        assert_eq!(monitor.raw_word(0), 2); // write index
        assert_eq!(monitor.raw_word(1), 0); // read index
        assert_eq!(monitor.raw_word(2), 1.5f32.to_bits());
        assert_eq!(monitor.raw_word(3), (-2.0f32).to_bits());

        let mut out = [0.0; 1];
        cons.pop(&mut out);
        assert_eq!(monitor.raw_word(1), 1);
    }

    #[test]
    fn test_rejects_invalid_capacity() {
        assert!(matches!(
            RingBuffer::with_capacity(0),
            Err(Error::InvalidConfig(_))
        ));
        assert!(RingBuffer::for_duration(Duration::from_millis(600), 0, 2).is_err());
    }

    #[test]
    fn test_for_duration_sizing() {
        let rb = RingBuffer::for_duration(Duration::from_millis(600), 48_000, 2).unwrap();
        assert_eq!(rb.capacity(), 57_600);
    }

    #[test]
    fn test_monitor_health() {
        let rb = RingBuffer::with_capacity(10).unwrap();
        let monitor = rb.monitor();
        let (mut prod, _cons) = rb.split();

        assert_eq!(monitor.health(), 0.0);
        prod.push(&[0.0; 5]);
        assert!((monitor.health() - 0.5).abs() < 1e-12);
        assert_eq!(monitor.stats().available_read, 5);
    }
}
