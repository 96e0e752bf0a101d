//! The client core: connects, sends inputs, predicts the local player,
//! reconciles against snapshots and builds the interpolated frame the
//! renderer draws.
//!
//! The poll-input/update/render loop of a single-player game is split
//! here: the authoritative update happens on the server, so each frame
//! this client ships its input, immediately applies it through the
//! shared simulation (waiting for the server would add the whole RTT to
//! every keypress), and renders everyone else a little in the past
//! where two snapshots bracket the render clock.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use strafe::net::{
    dequantize_player, dequantize_shot, ConnectRequest, InputMessage, Message, PeerId,
    SnapshotMessage, Transport, TransportEvent, UnknownSenderPolicy,
};
use strafe::{
    apply_player_input, apply_player_physics, generate_map, Map, Player, RingBuffer, Shot,
    Snapshot, MAX_PLAYERS, SNAPSHOT_COUNT, TICK_TIME,
};

use crate::clock::RenderClock;
use crate::interpolate::interpolated_frame;
use crate::prediction::{Predictor, DIVERGENCE_WARN_THRESHOLD};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const TRAIL_LIFETIME: f32 = 0.3;
const MAX_TRAILS: usize = 64;

/// One frame of player intent, produced by whatever input layer sits on
/// top (a window, a bot, a test).
#[derive(Debug, Clone, Copy, Default)]
pub struct InputSample {
    pub move_x: f32,
    pub move_z: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub shoot: bool,
    pub jump: bool,
}

impl InputSample {
    fn buttons(&self) -> u8 {
        (if self.shoot { InputMessage::BUTTON_SHOOT } else { 0 })
            | (if self.jump { InputMessage::BUTTON_JUMP } else { 0 })
    }
}

/// Surfaced to the host (UI layer) each frame.
#[derive(Debug, Clone, Copy)]
pub enum ClientEvent {
    Connected { player_index: i8 },
    PlayerKilled { killer_idx: i8, killed_idx: i8 },
    PlayerLeft { player_idx: i8 },
    Disconnected,
}

/// A short-lived shot visual.
#[derive(Debug, Clone, Copy)]
pub struct ShotTrail {
    pub shot: Shot,
    pub spawn_time: f32,
}

pub struct ClientGame {
    transport: Transport,
    server_peer: PeerId,
    player_idx: i8,
    connected: bool,

    map: Map,
    clock: RenderClock,
    snapshots: RingBuffer<Snapshot>,
    predictor: Predictor,
    local_player: Player,

    /// Interpolated remote players for the renderer.
    frame: Vec<Player>,
    trails: Vec<ShotTrail>,
    events: VecDeque<ClientEvent>,
}

impl ClientGame {
    pub fn new(local_port: u16, server_addr: SocketAddr) -> io::Result<Self> {
        let mut transport =
            Transport::bind(("0.0.0.0", local_port), UnknownSenderPolicy::Reject)?;
        let server_peer = transport
            .add_peer(server_addr)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        Ok(Self {
            transport,
            server_peer,
            player_idx: -1,
            connected: false,
            map: generate_map(),
            clock: RenderClock::new(),
            snapshots: RingBuffer::new(SNAPSHOT_COUNT),
            predictor: Predictor::new(),
            local_player: Player::default(),
            frame: Vec::with_capacity(MAX_PLAYERS),
            trails: Vec::with_capacity(MAX_TRAILS),
            events: VecDeque::new(),
        })
    }

    /// Blocks until the server accepts us or the timeout passes. The
    /// request is reliable, so loss on the wire only costs a resend.
    pub fn connect(&mut self, name: &str) -> io::Result<()> {
        log::info!("connecting as {name:?}");
        self.transport
            .send_reliable(self.server_peer, &ConnectRequest::new(name))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        let start = Instant::now();
        let mut last = start;

        while !self.connected {
            let now = Instant::now();
            let dt = (now - last).as_secs_f32();
            last = now;

            self.transport.update(dt);
            self.process_packets();

            if start.elapsed() > CONNECT_TIMEOUT {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connection timeout",
                ));
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        Ok(())
    }

    /// One frame: advance the clocks, send + predict this frame's
    /// input, ingest whatever arrived, and rebuild the render frame.
    pub fn update(&mut self, dt: f32, input: &InputSample) {
        self.clock.advance(dt);

        if self.connected {
            self.send_and_predict(input);
        }

        self.process_packets();
        self.transport.update(dt);
        self.process_transport_events();

        if let Some(newest) = self.snapshots.back() {
            let newest_time = newest.timestamp;
            self.clock.adapt_delay(newest_time);
        }

        let server_time = self.clock.server_time;
        self.trails
            .retain(|t| t.spawn_time + TRAIL_LIFETIME > server_time);

        self.build_frame();
    }

    fn send_and_predict(&mut self, input: &InputSample) {
        let msg = InputMessage {
            sequence: self.predictor.next_sequence(),
            move_x: input.move_x,
            move_z: input.move_z,
            look_yaw: input.yaw,
            look_pitch: input.pitch,
            buttons: input.buttons(),
            shot_time: if input.shoot { self.clock.render_time } else { 0.0 },
            time: self.clock.render_time,
        };

        // Inputs are not batched: losing one costs less than feeling it
        // arrive late.
        if let Err(e) = self.transport.send_unreliable(self.server_peer, &msg) {
            log::debug!("input send failed: {e}");
        }

        self.predictor.record(msg);

        // Applied immediately with the same functions the server runs.
        let others = self
            .snapshots
            .back()
            .map(|s| s.players)
            .unwrap_or([Player::default(); MAX_PLAYERS]);
        apply_player_input(&mut self.local_player, &msg, TICK_TIME);
        apply_player_physics(&mut self.local_player, &self.map, &others, TICK_TIME);
    }

    fn process_packets(&mut self) {
        while let Some(polled) = self.transport.poll() {
            let message = Message::decode(self.transport.payload(&polled));
            self.transport.release(polled);

            match message {
                Ok(Message::Snapshot(snapshot)) => self.process_snapshot(&snapshot),
                Ok(Message::ConnectAccept(accept)) => {
                    self.player_idx = accept.player_index;
                    self.clock.start(accept.server_time);
                    self.connected = true;
                    log::info!("connected as player {}", accept.player_index);
                    self.events.push_back(ClientEvent::Connected {
                        player_index: accept.player_index,
                    });
                }
                Ok(Message::PlayerDied(event)) => {
                    self.events.push_back(ClientEvent::PlayerKilled {
                        killer_idx: event.killer_idx,
                        killed_idx: event.killed_idx,
                    });
                }
                Ok(Message::PlayerLeft(event)) => {
                    self.events.push_back(ClientEvent::PlayerLeft {
                        player_idx: event.player_idx,
                    });
                }
                Ok(other) => log::debug!("unexpected message: {other:?}"),
                Err(e) => log::debug!("malformed payload: {e}"),
            }
        }
    }

    fn process_transport_events(&mut self) {
        let events: Vec<TransportEvent> = self.transport.drain_events().collect();
        for event in events {
            let TransportEvent::PeerRemoved(peer_id) = event;
            if peer_id == self.server_peer && self.connected {
                log::warn!("server connection lost");
                self.connected = false;
                self.events.push_back(ClientEvent::Disconnected);
            }
        }
    }

    fn process_snapshot(&mut self, msg: &SnapshotMessage) {
        self.clock.observe_snapshot_time(msg.server_time);

        // Scatter the dense wire array into stable slots.
        let mut snapshot = Snapshot {
            timestamp: msg.server_time,
            ..Default::default()
        };
        for q in &msg.players[..msg.player_count as usize] {
            let player = dequantize_player(q);
            let idx = player.player_idx;
            if idx >= 0 && (idx as usize) < MAX_PLAYERS {
                snapshot.players[idx as usize] = player;
            }
        }
        self.snapshots.push(snapshot);

        if self.player_idx >= 0 {
            let authoritative = snapshot.players[self.player_idx as usize];
            if authoritative.active() {
                self.reconcile(&authoritative, &snapshot);
            }
        }

        for q in &msg.shots[..msg.shot_count as usize] {
            let mut shot = dequantize_shot(q);
            // Our own tracer starts at the gun, not at the server's idea
            // of our eye; to this client the ray is only a visual.
            if shot.shooter_idx == self.player_idx {
                shot.ray.origin = self.local_player.eye_position();
            }
            if self.trails.len() < MAX_TRAILS {
                self.trails.push(ShotTrail {
                    shot,
                    spawn_time: self.clock.server_time,
                });
            }
        }
    }

    fn reconcile(&mut self, authoritative: &Player, snapshot: &Snapshot) {
        let predicted_position = self.local_player.position;

        // Wall contact data is not on the wire; carry it across the
        // correction and let the next physics step sort it out.
        let on_ground = self.local_player.on_ground;
        let wall_running = self.local_player.wall_running;
        let wall_normal = self.local_player.wall_normal;
        let wall_index = self.local_player.wall_index;

        let (mut corrected, replayed) =
            self.predictor
                .reconcile(authoritative, &snapshot.players, &self.map);

        let error = (predicted_position - corrected.position).length();

        corrected.on_ground = on_ground;
        corrected.wall_running = wall_running;
        corrected.wall_normal = wall_normal;
        corrected.wall_index = wall_index;
        self.local_player = corrected;

        if error >= DIVERGENCE_WARN_THRESHOLD {
            log::warn!(
                "prediction error {:.3} m ({} inputs replayed, {} buffered)",
                error,
                replayed,
                self.predictor.buffered()
            );
        }
    }

    fn build_frame(&mut self) {
        interpolated_frame(
            &self.snapshots,
            self.clock.render_time,
            self.player_idx,
            &mut self.frame,
        );
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn player_index(&self) -> i8 {
        self.player_idx
    }

    pub fn local_player(&self) -> &Player {
        &self.local_player
    }

    /// Interpolated remote players for rendering.
    pub fn frame(&self) -> &[Player] {
        &self.frame
    }

    pub fn trails(&self) -> &[ShotTrail] {
        &self.trails
    }

    pub fn latest_snapshot(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn map(&self) -> &Map {
        &self.map
    }

    pub fn rtt(&self) -> Option<f32> {
        self.transport.peer_rtt(self.server_peer)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use strafe::net::{quantize_player, quantize_shot};
    use strafe::{create_shot, STARTING_HEALTH};

    fn test_game() -> ClientGame {
        let server_addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        ClientGame::new(0, server_addr).unwrap()
    }

    fn snapshot_message(server_time: f32, players: &[Player]) -> SnapshotMessage {
        let mut msg = SnapshotMessage {
            server_time,
            player_count: players.len() as u8,
            ..Default::default()
        };
        for (i, player) in players.iter().enumerate() {
            msg.players[i] = quantize_player(player);
        }
        msg
    }

    #[test]
    fn snapshot_players_land_in_their_slots() {
        let mut game = test_game();

        let a = Player {
            player_idx: 0,
            position: Vec3::new(1.0, 1.0, 0.0),
            health: STARTING_HEALTH,
            ..Default::default()
        };
        let b = Player {
            player_idx: 3,
            position: Vec3::new(5.0, 1.0, 2.0),
            health: STARTING_HEALTH,
            ..Default::default()
        };

        // Dense on the wire, sparse in the ring.
        game.process_snapshot(&snapshot_message(1.0, &[a, b]));

        let stored = game.latest_snapshot().unwrap();
        assert!(stored.players[0].active());
        assert!(!stored.players[1].active());
        assert!(stored.players[3].active());
        assert!((stored.players[3].position.x - 5.0).abs() < 0.01);
    }

    #[test]
    fn own_shot_trail_is_reanchored() {
        let mut game = test_game();
        game.player_idx = 0;
        game.local_player = Player {
            player_idx: 0,
            position: Vec3::new(2.0, 1.0, 2.0),
            health: STARTING_HEALTH,
            ..Default::default()
        };

        let shooter = Player {
            player_idx: 0,
            position: Vec3::new(50.0, 1.0, 50.0), // server's idea, far away
            health: STARTING_HEALTH,
            ..Default::default()
        };
        let mut msg = snapshot_message(1.0, &[shooter]);
        msg.shot_count = 1;
        msg.shots[0] = quantize_shot(&create_shot(&shooter));

        game.process_snapshot(&msg);

        assert_eq!(game.trails().len(), 1);
        let origin = game.trails()[0].shot.ray.origin;
        assert!((origin - game.local_player.eye_position()).length() < 0.01);
    }

    #[test]
    fn reconciliation_adopts_authoritative_state() {
        let mut game = test_game();
        game.player_idx = 0;
        game.connected = true;
        game.local_player = Player {
            player_idx: 0,
            position: Vec3::new(0.0, 1.0, 0.0),
            health: STARTING_HEALTH,
            ..Default::default()
        };

        // Authoritative state far from the prediction, nothing buffered
        // to replay: the server's answer simply wins.
        let authoritative = Player {
            player_idx: 0,
            position: Vec3::new(3.0, 1.0, 0.0),
            health: STARTING_HEALTH - 10,
            ..Default::default()
        };
        game.process_snapshot(&snapshot_message(1.0, &[authoritative]));

        assert!((game.local_player().position.x - 3.0).abs() < 0.01);
        assert_eq!(game.local_player().health, STARTING_HEALTH - 10);
    }
}
