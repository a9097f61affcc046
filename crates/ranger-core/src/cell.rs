//! Seqlock-protected double buffer with compare-and-set writers.
//!
//! Readers never block writers: they spin until they observe the same even
//! sequence number before and after copying the published buffer. Unlike a
//! single-producer seqlock, any number of writers may race; each claims the
//! write side by moving the sequence from even to odd with a compare-and-set,
//! so the edge handler, the timeout alarm, and the controller are serialised
//! without a mutex.
//!
//! ```text
//! sequence: even = stable, odd = write in progress
//! ┌──────────────┐  ┌──────────────┐
//! │ front buffer │  │ back buffer  │   writer copies front → back,
//! └──────────────┘  └──────────────┘   mutates back, then flips front_idx
//! ```
//!
//! Write sections must be short and must not panic: a writer that unwinds
//! while holding the odd sequence stalls every later access.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicU64, Ordering};

/// Spins before yielding the thread while waiting for a writer.
const SPINS_BEFORE_YIELD: u32 = 64;

/// Lock-free cell publishing consistent snapshots of a `Copy` record.
pub struct SeqlockCell<T: Copy> {
    /// Sequence number (odd = write in progress).
    sequence: CachePadded<AtomicU64>,
    buf0: CachePadded<UnsafeCell<T>>,
    buf1: CachePadded<UnsafeCell<T>>,
    /// Which buffer is currently published (0 or 1).
    front_idx: CachePadded<AtomicU64>,
}

// SAFETY: buffers are only written while the writer holds the odd sequence,
// which at most one thread can own at a time. Readers copy `T` out and
// discard the copy unless the sequence was stable across the read.
#[allow(unsafe_code)]
unsafe impl<T: Copy + Send> Sync for SeqlockCell<T> {}

impl<T: Copy> SeqlockCell<T> {
    /// Create a cell publishing `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            sequence: CachePadded::new(AtomicU64::new(0)),
            buf0: CachePadded::new(UnsafeCell::new(initial)),
            buf1: CachePadded::new(UnsafeCell::new(initial)),
            front_idx: CachePadded::new(AtomicU64::new(0)),
        }
    }

    fn buffer(&self, idx: u64) -> *mut T {
        if idx == 0 {
            self.buf0.get()
        } else {
            self.buf1.get()
        }
    }

    /// Read a consistent snapshot, spinning while a write is in progress.
    pub fn read(&self) -> T {
        let mut spins = 0u32;
        loop {
            let seq1 = self.sequence.load(Ordering::Acquire);

            if seq1 & 1 == 0 {
                let front = self.front_idx.load(Ordering::Acquire);
                // SAFETY: the value is only used if the sequence is unchanged
                // afterwards, which proves no writer touched it meanwhile.
                #[allow(unsafe_code)]
                let data = unsafe { std::ptr::read_volatile(self.buffer(front)) };

                fence(Ordering::Acquire);
                if self.sequence.load(Ordering::Relaxed) == seq1 {
                    return data;
                }
            }

            backoff(&mut spins);
        }
    }

    /// Apply `f` to a copy of the published record and publish the result.
    ///
    /// Concurrent callers are serialised; `f` runs exactly once and its
    /// return value is passed back.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let seq = self.acquire_write();

        let front = self.front_idx.load(Ordering::Relaxed);
        let back = 1 - front;
        // SAFETY: we own the odd sequence, so no other writer is active and
        // readers only read the front buffer or retry.
        #[allow(unsafe_code)]
        let result = unsafe {
            let src = self.buffer(front);
            let dst = self.buffer(back);
            *dst = *src;
            f(&mut *dst)
        };

        self.front_idx.store(back, Ordering::Release);
        self.sequence.store(seq.wrapping_add(2), Ordering::Release);
        result
    }

    /// Claim the write side; returns the even sequence observed.
    fn acquire_write(&self) -> u64 {
        let mut spins = 0u32;
        let mut seq = self.sequence.load(Ordering::Relaxed);
        loop {
            if seq & 1 == 0 {
                match self.sequence.compare_exchange_weak(
                    seq,
                    seq.wrapping_add(1),
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return seq,
                    Err(actual) => seq = actual,
                }
            } else {
                backoff(&mut spins);
                seq = self.sequence.load(Ordering::Relaxed);
            }
        }
    }

    /// Current sequence number (even when idle).
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl<T: Copy + Default> Default for SeqlockCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Copy + std::fmt::Debug> std::fmt::Debug for SeqlockCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqlockCell")
            .field("sequence", &self.sequence())
            .field("value", &self.read())
            .finish()
    }
}

fn backoff(spins: &mut u32) {
    if *spins < SPINS_BEFORE_YIELD {
        *spins += 1;
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
}
