//! Single-producer single-consumer lock-free ring queue.
//!
//! The receive thread publishes packet descriptors to the main thread
//! at up to 60 packets per second per connected player, so this path
//! avoids locks entirely: a ring buffer where the producer owns the
//! write cursor and the consumer owns the read cursor. The cursors are
//! published with release stores and observed with acquire loads, so a
//! consumer that sees a new write cursor also sees the slot contents
//! written before it.
//!
//! Queue endpoints are split into a `Producer`/`Consumer` pair, which
//! makes the single-producer/single-consumer contract a compile-time
//! property instead of a convention.
//!
//! Slots are padded to a cache line so the two sides never invalidate
//! each other's lines through neighbouring entries (false sharing).

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[repr(align(64))]
struct Slot<T>(UnsafeCell<MaybeUninit<T>>);

#[repr(align(64))]
struct Cursor(AtomicUsize);

struct Inner<T> {
    mask: usize,
    slots: Box<[Slot<T>]>,
    write_pos: Cursor,
    read_pos: Cursor,
}

// The slots are only ever touched by whichever side owns the index range
// between the cursors; the cursor protocol below keeps those ranges
// disjoint.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

pub struct Producer<T> {
    inner: Arc<Inner<T>>,
}

pub struct Consumer<T> {
    inner: Arc<Inner<T>>,
}

/// Creates a queue holding up to `capacity - 1` items.
pub fn channel<T: Copy>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(capacity.is_power_of_two(), "capacity must be a power of two");

    let slots = (0..capacity)
        .map(|_| Slot(UnsafeCell::new(MaybeUninit::uninit())))
        .collect();

    let inner = Arc::new(Inner {
        mask: capacity - 1,
        slots,
        write_pos: Cursor(AtomicUsize::new(0)),
        read_pos: Cursor(AtomicUsize::new(0)),
    });

    (
        Producer {
            inner: Arc::clone(&inner),
        },
        Consumer { inner },
    )
}

impl<T: Copy> Producer<T> {
    /// Returns false when the queue is full.
    pub fn try_push(&mut self, item: T) -> bool {
        let inner = &self.inner;
        let write = inner.write_pos.0.load(Ordering::Relaxed);
        let next_write = (write + 1) & inner.mask;

        if next_write == inner.read_pos.0.load(Ordering::Acquire) {
            return false;
        }

        // Exclusive: the consumer will not read this slot until the
        // release store below, and no other producer exists.
        unsafe {
            (*inner.slots[write].0.get()).write(item);
        }
        inner.write_pos.0.store(next_write, Ordering::Release);
        true
    }
}

impl<T: Copy> Consumer<T> {
    /// Returns `None` when the queue is empty.
    pub fn try_pop(&mut self) -> Option<T> {
        let inner = &self.inner;
        let read = inner.read_pos.0.load(Ordering::Relaxed);

        if read == inner.write_pos.0.load(Ordering::Acquire) {
            return None;
        }

        // The acquire load above synchronizes with the producer's release
        // store, so the slot contents are visible and initialized.
        let item = unsafe { (*inner.slots[read].0.get()).assume_init_read() };
        inner.read_pos.0.store((read + 1) & inner.mask, Ordering::Release);
        Some(item)
    }
}
