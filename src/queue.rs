//! Lock-free bounded queues for handing parsed ticks between threads.
//!
//! Both queues round their capacity up to a power of two and reserve one
//! slot, so a queue built with capacity `C` holds at most `C − 1` items.
//! Producer and consumer counters live on separate cache lines; publication
//! is store-release, observation load-acquire. `size`/`is_empty` are
//! best-effort observers, exact at quiescent points.
//!
//! `spsc` is the hot-path queue: one producer writes the head, one consumer
//! writes the tail, no atomic read-modify-write anywhere. `spmc` keeps the
//! producer side identical and lets consumers compete for slots with a CAS
//! on the shared tail, using per-slot sequence stamps so a claimed slot is
//! never read while the producer laps it.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A counter on its own 64-byte cache line to avoid false sharing.
#[repr(align(64))]
struct CacheAligned(AtomicUsize);

impl CacheAligned {
    fn new(v: usize) -> Self {
        CacheAligned(AtomicUsize::new(v))
    }
}

fn slot_count(capacity: usize) -> usize {
    capacity.max(2).next_power_of_two()
}

pub mod spsc {
    use super::*;

    struct Inner<T> {
        slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
        mask: usize,
        /// Next write index. Written by the producer only.
        head: CacheAligned,
        /// Next read index. Written by the consumer only.
        tail: CacheAligned,
    }

    unsafe impl<T: Send> Send for Inner<T> {}
    unsafe impl<T: Send> Sync for Inner<T> {}

    impl<T> Inner<T> {
        fn len(&self) -> usize {
            let head = self.head.0.load(Ordering::Acquire);
            let tail = self.tail.0.load(Ordering::Acquire);
            head.wrapping_sub(tail) & self.mask
        }
    }

    impl<T> Drop for Inner<T> {
        fn drop(&mut self) {
            let head = self.head.0.load(Ordering::Relaxed);
            let mut tail = self.tail.0.load(Ordering::Relaxed);
            while tail != head {
                unsafe { (*self.slots[tail].get()).assume_init_drop() };
                tail = (tail + 1) & self.mask;
            }
        }
    }

    /// Build a single-producer/single-consumer queue. The handles are the
    /// ownership boundary: neither is cloneable, so the discipline holds by
    /// construction.
    pub fn channel<T: Send>(capacity: usize) -> (Sender<T>, Receiver<T>) {
        let slots = slot_count(capacity);
        let mut v = Vec::with_capacity(slots);
        v.resize_with(slots, || UnsafeCell::new(MaybeUninit::uninit()));

        let inner = Arc::new(Inner {
            slots: v.into_boxed_slice(),
            mask: slots - 1,
            head: CacheAligned::new(0),
            tail: CacheAligned::new(0),
        });
        (
            Sender {
                inner: Arc::clone(&inner),
            },
            Receiver { inner },
        )
    }

    pub struct Sender<T> {
        inner: Arc<Inner<T>>,
    }

    pub struct Receiver<T> {
        inner: Arc<Inner<T>>,
    }

    impl<T: Send> Sender<T> {
        /// Non-blocking push; hands the value back when the queue is full.
        pub fn push(&self, value: T) -> Result<(), T> {
            let inner = &*self.inner;
            let head = inner.head.0.load(Ordering::Relaxed);
            let next = (head + 1) & inner.mask;
            if next == inner.tail.0.load(Ordering::Acquire) {
                return Err(value);
            }

            unsafe { (*inner.slots[head].get()).write(value) };
            inner.head.0.store(next, Ordering::Release);
            Ok(())
        }

        pub fn len(&self) -> usize {
            self.inner.len()
        }

        pub fn is_empty(&self) -> bool {
            self.inner.len() == 0
        }

        /// Usable capacity (one slot of the power-of-two ring is reserved).
        pub fn capacity(&self) -> usize {
            self.inner.mask
        }
    }

    impl<T: Send> Receiver<T> {
        /// Non-blocking pop.
        pub fn pop(&self) -> Option<T> {
            let inner = &*self.inner;
            let tail = inner.tail.0.load(Ordering::Relaxed);
            if tail == inner.head.0.load(Ordering::Acquire) {
                return None;
            }

            let value = unsafe { (*inner.slots[tail].get()).assume_init_read() };
            inner.tail.0.store((tail + 1) & inner.mask, Ordering::Release);
            Some(value)
        }

        pub fn len(&self) -> usize {
            self.inner.len()
        }

        pub fn is_empty(&self) -> bool {
            self.inner.len() == 0
        }

        pub fn capacity(&self) -> usize {
            self.inner.mask
        }
    }
}

pub mod spmc {
    use super::*;

    struct Slot<T> {
        /// Lifecycle stamp: `c` free for counter `c`, `c + 1` published,
        /// `c + slots` free for the next lap.
        stamp: AtomicUsize,
        value: UnsafeCell<MaybeUninit<T>>,
    }

    struct Inner<T> {
        slots: Box<[Slot<T>]>,
        mask: usize,
        /// Monotonic write counter. Written by the producer only.
        head: CacheAligned,
        /// Monotonic read counter. Consumers advance it by CAS.
        tail: CacheAligned,
    }

    unsafe impl<T: Send> Send for Inner<T> {}
    unsafe impl<T: Send> Sync for Inner<T> {}

    impl<T> Drop for Inner<T> {
        fn drop(&mut self) {
            let head = self.head.0.load(Ordering::Relaxed);
            let mut tail = self.tail.0.load(Ordering::Relaxed);
            while tail != head {
                let slot = &self.slots[tail & self.mask];
                if slot.stamp.load(Ordering::Relaxed) == tail.wrapping_add(1) {
                    unsafe { (*slot.value.get()).assume_init_drop() };
                }
                tail = tail.wrapping_add(1);
            }
        }
    }

    /// Build a single-producer/multi-consumer queue. The receiver clones;
    /// the sender does not.
    pub fn channel<T: Send>(capacity: usize) -> (Sender<T>, Receiver<T>) {
        let slots = slot_count(capacity);
        let mut v = Vec::with_capacity(slots);
        for i in 0..slots {
            v.push(Slot {
                stamp: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }

        let inner = Arc::new(Inner {
            slots: v.into_boxed_slice(),
            mask: slots - 1,
            head: CacheAligned::new(0),
            tail: CacheAligned::new(0),
        });
        (
            Sender {
                inner: Arc::clone(&inner),
            },
            Receiver { inner },
        )
    }

    pub struct Sender<T> {
        inner: Arc<Inner<T>>,
    }

    pub struct Receiver<T> {
        inner: Arc<Inner<T>>,
    }

    impl<T> Clone for Receiver<T> {
        fn clone(&self) -> Self {
            Receiver {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl<T: Send> Sender<T> {
        /// Non-blocking push; hands the value back when the queue is full
        /// or a consumer is still draining the target slot.
        pub fn push(&self, value: T) -> Result<(), T> {
            let inner = &*self.inner;
            let head = inner.head.0.load(Ordering::Relaxed);

            if head.wrapping_sub(inner.tail.0.load(Ordering::Acquire)) >= inner.mask {
                return Err(value);
            }

            let slot = &inner.slots[head & inner.mask];
            if slot.stamp.load(Ordering::Acquire) != head {
                return Err(value);
            }

            unsafe { (*slot.value.get()).write(value) };
            slot.stamp.store(head.wrapping_add(1), Ordering::Release);
            inner.head.0.store(head.wrapping_add(1), Ordering::Release);
            Ok(())
        }

        pub fn len(&self) -> usize {
            let head = self.inner.head.0.load(Ordering::Acquire);
            let tail = self.inner.tail.0.load(Ordering::Acquire);
            head.wrapping_sub(tail)
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn capacity(&self) -> usize {
            self.inner.mask
        }
    }

    impl<T: Send> Receiver<T> {
        /// Non-blocking pop. Consumers race on the tail CAS; the loser of a
        /// race retries against the next slot.
        pub fn pop(&self) -> Option<T> {
            let inner = &*self.inner;
            let mut tail = inner.tail.0.load(Ordering::Relaxed);

            loop {
                let slot = &inner.slots[tail & inner.mask];
                let stamp = slot.stamp.load(Ordering::Acquire);
                let diff = stamp.wrapping_sub(tail.wrapping_add(1)) as isize;

                if diff == 0 {
                    match inner.tail.0.compare_exchange_weak(
                        tail,
                        tail.wrapping_add(1),
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            let value = unsafe { (*slot.value.get()).assume_init_read() };
                            slot.stamp
                                .store(tail.wrapping_add(inner.mask + 1), Ordering::Release);
                            return Some(value);
                        }
                        Err(current) => tail = current,
                    }
                } else if diff < 0 {
                    // Slot not yet published: empty from this consumer's view.
                    return None;
                } else {
                    // Another consumer has already advanced past this slot.
                    tail = inner.tail.0.load(Ordering::Relaxed);
                }
            }
        }

        pub fn len(&self) -> usize {
            let head = self.inner.head.0.load(Ordering::Acquire);
            let tail = self.inner.tail.0.load(Ordering::Acquire);
            head.wrapping_sub(tail)
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn capacity(&self) -> usize {
            self.inner.mask
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_spsc_push_pop() {
        let (tx, rx) = spsc::channel::<u64>(8);
        assert!(rx.pop().is_none());

        tx.push(1).unwrap();
        tx.push(2).unwrap();
        assert_eq!(tx.len(), 2);
        assert_eq!(rx.pop(), Some(1));
        assert_eq!(rx.pop(), Some(2));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn test_spsc_capacity_reserves_one_slot() {
        let (tx, rx) = spsc::channel::<u32>(8);
        assert_eq!(tx.capacity(), 7);
        for i in 0..7 {
            tx.push(i).unwrap();
        }
        assert_eq!(tx.push(99), Err(99));
        assert_eq!(rx.pop(), Some(0));
        tx.push(99).unwrap();
    }

    #[test]
    fn test_spsc_fifo_across_threads() {
        let (tx, rx) = spsc::channel::<u64>(64);
        const N: u64 = 100_000;

        let producer = thread::spawn(move || {
            for i in 0..N {
                let mut v = i;
                while let Err(back) = tx.push(v) {
                    v = back;
                    thread::yield_now();
                }
            }
        });

        let mut expected = 0u64;
        while expected < N {
            match rx.pop() {
                Some(v) => {
                    assert_eq!(v, expected);
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_spmc_single_consumer_fifo() {
        let (tx, rx) = spmc::channel::<u32>(16);
        for i in 0..10 {
            tx.push(i).unwrap();
        }
        for i in 0..10 {
            assert_eq!(rx.pop(), Some(i));
        }
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn test_spmc_each_item_claimed_once() {
        let (tx, rx) = spmc::channel::<u64>(128);
        const N: u64 = 50_000;
        const CONSUMERS: usize = 4;

        let mut handles = Vec::new();
        for _ in 0..CONSUMERS {
            let rx = rx.clone();
            handles.push(thread::spawn(move || {
                let mut seen = Vec::new();
                loop {
                    match rx.pop() {
                        Some(u64::MAX) => break,
                        Some(v) => seen.push(v),
                        None => thread::yield_now(),
                    }
                }
                seen
            }));
        }

        for i in 0..N {
            let mut v = i;
            while let Err(back) = tx.push(v) {
                v = back;
                thread::yield_now();
            }
        }
        // One poison pill per consumer.
        for _ in 0..CONSUMERS {
            let mut v = u64::MAX;
            while let Err(back) = tx.push(v) {
                v = back;
                thread::yield_now();
            }
        }

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all.len() as u64, N);
        for (i, v) in all.iter().enumerate() {
            assert_eq!(*v, i as u64);
        }
    }

    #[test]
    fn test_capacity_rounds_up_to_power_of_two() {
        let (tx, _rx) = spsc::channel::<u8>(5);
        assert_eq!(tx.capacity(), 7);
        let (tx, _rx) = spmc::channel::<u8>(100);
        assert_eq!(tx.capacity(), 127);
    }
}
