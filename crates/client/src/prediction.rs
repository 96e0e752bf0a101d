//! Client-side prediction history and reconciliation.
//!
//! Every input gets a monotonically increasing sequence number and is
//! kept in a ring after being applied locally. A snapshot tells us the
//! last sequence the server processed and where that put us; replaying
//! everything newer on top of the authoritative state lands exactly on
//! the server's answer as long as the shared simulation stays pure.

use strafe::net::InputMessage;
use strafe::{apply_player_input, apply_player_physics, Map, Player, RingBuffer, MAX_PLAYERS, TICK_TIME};

const INPUT_HISTORY_SIZE: usize = 64;

/// Divergence past this is logged; the authoritative state wins anyway.
pub const DIVERGENCE_WARN_THRESHOLD: f32 = 0.4;

pub struct Predictor {
    history: RingBuffer<InputMessage>,
    next_sequence: u32,
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new()
    }
}

impl Predictor {
    pub fn new() -> Self {
        Self {
            history: RingBuffer::new(INPUT_HISTORY_SIZE),
            // The server treats sequence 0 as already processed.
            next_sequence: 1,
        }
    }

    pub fn next_sequence(&mut self) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }

    pub fn record(&mut self, input: InputMessage) {
        self.history.push(input);
    }

    pub fn buffered(&self) -> usize {
        self.history.len()
    }

    /// Starts from the authoritative player and re-applies every
    /// buffered input the server had not processed yet. Returns the
    /// corrected state and how many inputs were replayed.
    pub fn reconcile(
        &self,
        authoritative: &Player,
        others: &[Player; MAX_PLAYERS],
        map: &Map,
    ) -> (Player, u32) {
        let mut corrected = *authoritative;
        let mut replayed = 0;

        for input in self.history.iter() {
            if input.sequence > authoritative.last_processed_seq {
                apply_player_input(&mut corrected, input, TICK_TIME);
                apply_player_physics(&mut corrected, map, others, TICK_TIME);
                replayed += 1;
            }
        }

        (corrected, replayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use strafe::{generate_map, STARTING_HEALTH};

    fn spawned() -> Player {
        Player {
            player_idx: 0,
            position: Vec3::new(3.0, 1.0, 4.0),
            health: STARTING_HEALTH,
            ..Default::default()
        }
    }

    fn forward_input(sequence: u32) -> InputMessage {
        InputMessage {
            sequence,
            move_x: 1.0,
            move_z: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn sequences_are_monotonic() {
        let mut predictor = Predictor::new();
        let first = predictor.next_sequence();
        let second = predictor.next_sequence();
        assert!(second > first);
        assert!(first > 0, "sequence 0 would be discarded by the server");
    }

    #[test]
    fn reconciliation_matches_prediction_exactly() {
        // The client predicts through sequence 110; the server has
        // processed through 108. Replaying 109 and 110 on top of the
        // authoritative state must land on the predicted position.
        let map = generate_map();
        let others = [Player::default(); MAX_PLAYERS];

        let mut predictor = Predictor::new();
        let mut predicted = spawned();
        let mut authoritative = spawned();

        for sequence in 100..=110u32 {
            let input = forward_input(sequence);
            predictor.record(input);
            apply_player_input(&mut predicted, &input, TICK_TIME);
            apply_player_physics(&mut predicted, &map, &others, TICK_TIME);

            if sequence <= 108 {
                apply_player_input(&mut authoritative, &input, TICK_TIME);
                apply_player_physics(&mut authoritative, &map, &others, TICK_TIME);
                authoritative.last_processed_seq = sequence;
            }
        }

        let (reconciled, replayed) = predictor.reconcile(&authoritative, &others, &map);

        assert_eq!(replayed, 2);
        assert!(
            (reconciled.position - predicted.position).length() < 1e-5,
            "reconciled {} vs predicted {}",
            reconciled.position,
            predicted.position
        );
        assert!((reconciled.velocity - predicted.velocity).length() < 1e-5);
    }

    #[test]
    fn fully_acknowledged_history_replays_nothing() {
        let map = generate_map();
        let others = [Player::default(); MAX_PLAYERS];

        let mut predictor = Predictor::new();
        for sequence in 1..=10u32 {
            predictor.record(forward_input(sequence));
        }

        let mut authoritative = spawned();
        authoritative.last_processed_seq = 10;

        let (reconciled, replayed) = predictor.reconcile(&authoritative, &others, &map);
        assert_eq!(replayed, 0);
        assert_eq!(reconciled.position, authoritative.position);
    }

    #[test]
    fn history_is_bounded() {
        let mut predictor = Predictor::new();
        for sequence in 0..200u32 {
            predictor.record(forward_input(sequence));
        }
        assert_eq!(predictor.buffered(), INPUT_HISTORY_SIZE);
    }
}
