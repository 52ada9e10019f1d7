//! Lock-free single-producer/single-consumer ring buffer used to carry
//! `MetricSnapshot`s from the event loop to the metrics aggregator without
//! contending a mutex on the hot path (spec.md §4.1).
//!
//! Capacity is rounded up to a power of two so index wraparound is a mask
//! instead of a modulo. Head and tail counters live on separate cache lines
//! (`CachePadded`) so producer and consumer stores don't false-share.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

struct Slot<T> {
    cell: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T: Send> Sync for Slot<T> {}

struct Shared<T> {
    buffer: Box<[Slot<T>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

/// The producer half of the queue. `!Clone` and `!Sync`-by-convention: the
/// SPSC contract is enforced by construction, not by the type system, since
/// `Sender`/`Receiver` are each held by exactly one task.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

unsafe impl<T: Send> Send for Sender<T> {}
unsafe impl<T: Send> Send for Receiver<T> {}

/// Creates a bounded SPSC queue. `capacity` is rounded up to the next power
/// of two (minimum 2).
#[must_use]
pub fn bounded<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let capacity = capacity.max(2).next_power_of_two();
    let mut buffer = Vec::with_capacity(capacity);
    for _ in 0..capacity {
        buffer.push(Slot {
            cell: UnsafeCell::new(MaybeUninit::uninit()),
        });
    }
    let shared = Arc::new(Shared {
        buffer: buffer.into_boxed_slice(),
        mask: capacity - 1,
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
    });
    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

#[derive(Debug, PartialEq, Eq)]
pub struct QueueFull<T>(pub T);

impl<T> Sender<T> {
    /// Attempts to push a value. Returns the value back on `Err` if the
    /// queue is full; the caller decides whether to drop, retry, or block.
    pub fn try_send(&self, value: T) -> Result<(), QueueFull<T>> {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        let head = self.shared.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) > self.shared.mask {
            return Err(QueueFull(value));
        }

        let idx = tail & self.shared.mask;
        // SAFETY: the slot at `idx` was vacated by the consumer (head has not
        // yet reached `tail`, checked above) and only the single producer
        // ever writes, so no other reference to this cell is live.
        unsafe {
            (*self.shared.buffer[idx].cell.get()).write(value);
        }
        self.shared.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        let head = self.shared.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) > self.shared.mask
    }
}

impl<T> Receiver<T> {
    /// Pops the next value if one is available.
    pub fn try_recv(&self) -> Option<T> {
        let head = self.shared.head.load(Ordering::Relaxed);
        let tail = self.shared.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let idx = head & self.shared.mask;
        // SAFETY: `tail` (Acquire) was observed past `head`, so the producer's
        // Release store that initialised this slot happens-before this read,
        // and only the single consumer ever reads or advances `head`.
        let value = unsafe { (*self.shared.buffer[idx].cell.get()).assume_init_read() };
        self.shared.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let head = self.shared.head.load(Ordering::Acquire);
        let tail = self.shared.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains everything currently queued into `out`, returning the count
    /// drained. Used by the aggregator on a tick or on shutdown.
    pub fn drain_into(&self, out: &mut Vec<T>) -> usize {
        let mut count = 0;
        while let Some(item) = self.try_recv() {
            out.push(item);
            count += 1;
        }
        count
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        while self.try_recv().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_order() -> Result<(), String> {
        let (tx, rx) = bounded::<u32>(4);
        for i in 0..4 {
            tx.try_send(i).map_err(|_| "queue unexpectedly full".to_owned())?;
        }
        let mut seen = Vec::new();
        rx.drain_into(&mut seen);
        assert_eq!(seen, vec![0, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn rejects_push_when_full() -> Result<(), String> {
        let (tx, _rx) = bounded::<u32>(2);
        tx.try_send(1).map_err(|_| "queue unexpectedly full".to_owned())?;
        tx.try_send(2).map_err(|_| "queue unexpectedly full".to_owned())?;
        assert_eq!(tx.try_send(3), Err(QueueFull(3)));
        Ok(())
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() -> Result<(), String> {
        let (tx, _rx) = bounded::<u32>(3);
        for i in 0..4 {
            tx.try_send(i).map_err(|_| "queue unexpectedly full".to_owned())?;
        }
        assert!(tx.is_full());
        Ok(())
    }

    #[test]
    fn concurrent_spsc_preserves_all_items() -> Result<(), String> {
        let (tx, rx) = bounded::<u64>(16);
        let producer = std::thread::spawn(move || {
            for i in 0..10_000u64 {
                while tx.try_send(i).is_err() {
                    std::thread::yield_now();
                }
            }
        });

        let mut received = Vec::with_capacity(10_000);
        while received.len() < 10_000 {
            if let Some(v) = rx.try_recv() {
                received.push(v);
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().map_err(|_| "producer thread panicked".to_owned())?;
        assert_eq!(received, (0..10_000).collect::<Vec<_>>());
        Ok(())
    }
}
