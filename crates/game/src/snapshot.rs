//! Snapshots of world state and the ring buffers that hold them.
//!
//! Only the server creates snapshots; both endpoints keep the most recent
//! N. The server searches its ring for lag compensation, the client
//! interpolates between consecutive entries.

use crate::player::{Player, MAX_PLAYERS};

/// Server-side history depth for lag-compensated hit tests.
pub const HISTORY_SIZE: usize = 64;
/// Client-side depth for interpolation and reconciliation.
pub const SNAPSHOT_COUNT: usize = 32;

/// World state at one instant of the server clock. Slot `i` holds the
/// player with index `i`; unoccupied slots have `player_idx == -1`.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub timestamp: f32,
    pub players: [Player; MAX_PLAYERS],
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            timestamp: 0.0,
            players: [Player::default(); MAX_PLAYERS],
        }
    }
}

impl Snapshot {
    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.active())
    }
}

/// Fixed-capacity overwrite-oldest ring. Index 0 is the oldest entry.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: Vec<T>,
    start: usize,
    len: usize,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            items: Vec::with_capacity(capacity),
            start: 0,
            len: 0,
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() < self.capacity {
            self.items.push(item);
            self.len += 1;
        } else {
            self.items[self.start] = item;
            self.start = (self.start + 1) % self.capacity;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        Some(&self.items[(self.start + index) % self.capacity])
    }

    pub fn back(&self) -> Option<&T> {
        if self.len == 0 {
            None
        } else {
            self.get(self.len - 1)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.start = 0;
        self.len = 0;
    }
}

/// Newest-to-oldest search for the first frame at or before `time`.
/// Returns `None` when even the oldest retained frame is newer.
pub fn frame_at(history: &RingBuffer<Snapshot>, time: f32) -> Option<&Snapshot> {
    for i in (0..history.len()).rev() {
        let frame = history.get(i)?;
        if frame.timestamp <= time {
            return Some(frame);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamped(timestamp: f32) -> Snapshot {
        Snapshot {
            timestamp,
            ..Default::default()
        }
    }

    #[test]
    fn ring_overwrites_oldest() {
        let mut ring = RingBuffer::new(4);
        for i in 0..6 {
            ring.push(i);
        }

        assert_eq!(ring.len(), 4);
        assert_eq!(*ring.get(0).unwrap(), 2);
        assert_eq!(*ring.back().unwrap(), 5);

        let collected: Vec<i32> = ring.iter().copied().collect();
        assert_eq!(collected, vec![2, 3, 4, 5]);
    }

    #[test]
    fn history_stays_monotone() {
        let mut history = RingBuffer::new(HISTORY_SIZE);
        for i in 0..100 {
            history.push(stamped(i as f32 * 0.016));
        }

        let mut prev = f32::NEG_INFINITY;
        for snap in history.iter() {
            assert!(snap.timestamp >= prev);
            prev = snap.timestamp;
        }
    }

    #[test]
    fn frame_at_picks_largest_at_or_before() {
        let mut history = RingBuffer::new(8);
        for t in [1.0f32, 2.0, 3.0, 4.0] {
            history.push(stamped(t));
        }

        assert_eq!(frame_at(&history, 2.5).unwrap().timestamp, 2.0);
        assert_eq!(frame_at(&history, 3.0).unwrap().timestamp, 3.0);
        assert_eq!(frame_at(&history, 10.0).unwrap().timestamp, 4.0);
        assert!(frame_at(&history, 0.5).is_none());
    }
}
