//! Fixed pool of packet buffers shared between the receive thread and
//! the main thread.
//!
//! The pool itself is not synchronized. Exclusive access to a buffer
//! follows its index: whoever holds an index (popped from a queue, held
//! in a reliable-window slot, or returned from `poll`) owns that buffer
//! until the index is handed somewhere else. The SPSC queues provide the
//! release/acquire edges that make writes visible across the handoff.

use std::cell::UnsafeCell;

use crate::net::protocol::MAX_PACKET_SIZE;

pub const PACKET_POOL_SIZE: usize = 256;

pub(crate) struct PacketPool {
    buffers: Box<[UnsafeCell<[u8; MAX_PACKET_SIZE]>]>,
}

unsafe impl Sync for PacketPool {}

impl PacketPool {
    pub(crate) fn new() -> Self {
        let buffers = (0..PACKET_POOL_SIZE)
            .map(|_| UnsafeCell::new([0u8; MAX_PACKET_SIZE]))
            .collect();
        Self { buffers }
    }

    /// # Safety
    /// The caller must hold `index` exclusively (outside both queues and
    /// any window slot) for the lifetime of the returned reference.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn buffer_mut(&self, index: u8) -> &mut [u8; MAX_PACKET_SIZE] {
        &mut *self.buffers[index as usize].get()
    }

    /// # Safety
    /// The caller must hold `index`; no writer may exist concurrently.
    pub(crate) unsafe fn buffer(&self, index: u8) -> &[u8; MAX_PACKET_SIZE] {
        &*self.buffers[index as usize].get()
    }
}
