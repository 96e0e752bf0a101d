//! The authoritative game update. Ingests inputs, steps the shared
//! simulation at a fixed rate, keeps a history ring for lag-compensated
//! shots and broadcasts quantized snapshots to every connected player.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use strafe::net::{
    ConnectAccept, ConnectRequest, Encode, InputMessage, Message, PeerId, PlayerDiedEvent,
    PlayerLeftEvent, SnapshotMessage, Transport, TransportEvent, UnknownSenderPolicy,
    quantize_player, quantize_shot,
};
use strafe::{
    apply_player_input, apply_player_physics, create_shot, frame_at, generate_map, spawn_point,
    trace_shot, Map, Player, RingBuffer, Shot, Snapshot, HISTORY_SIZE, MAX_PLAYERS, MAX_SHOTS,
    STARTING_HEALTH,
};

use crate::config::ServerConfig;

const BULLET_DAMAGE: i8 = 10;
const INPUT_BUFFER_SIZE: usize = 12;
const MAX_FRAME_DELTA: f32 = 0.25;

/// Per-slot connection bookkeeping. Inputs are buffered because network
/// conditions deliver zero one tick and two the next.
#[derive(Debug, Default)]
struct ClientSlot {
    peer: Option<PeerId>,
    name: String,
    /// Sequence of the last input applied to the simulation; anything
    /// at or below this in the buffer is stale and dropped.
    last_processed: u32,
    inputs: VecDeque<InputMessage>,
}

impl ClientSlot {
    fn active(&self) -> bool {
        self.peer.is_some()
    }

    fn clear(&mut self) {
        self.peer = None;
        self.name.clear();
        self.last_processed = 0;
        self.inputs.clear();
    }
}

#[derive(Debug, Clone, Copy)]
struct Respawn {
    player_idx: i8,
    at: f32,
}

pub struct GameServer {
    transport: Transport,
    config: ServerConfig,
    map: Map,

    /// The live authoritative frame. Slot i is player i.
    frame: Snapshot,
    /// Past frames for lag-compensated hit tests.
    history: RingBuffer<Snapshot>,
    clients: [ClientSlot; MAX_PLAYERS],
    /// Shots fired since the last snapshot; they ride the next one.
    new_shots: Vec<Shot>,
    respawns: VecDeque<Respawn>,

    start: Instant,
    time: f32,
    last_frame: Instant,
    accumulator: f32,
    snapshot_acc: f32,
    network_acc: f32,

    running: Arc<AtomicBool>,
}

impl GameServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        let transport = Transport::bind(bind_addr, UnknownSenderPolicy::Accept)?;
        log::info!("listening on {}", transport.local_addr());

        Ok(Self {
            transport,
            config,
            map: generate_map(),
            frame: Snapshot::default(),
            history: RingBuffer::new(HISTORY_SIZE),
            clients: std::array::from_fn(|_| ClientSlot::default()),
            new_shots: Vec::with_capacity(MAX_SHOTS),
            respawns: VecDeque::with_capacity(MAX_PLAYERS),
            start: Instant::now(),
            time: 0.0,
            last_frame: Instant::now(),
            accumulator: 0.0,
            snapshot_acc: 0.0,
            network_acc: 0.0,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn player_count(&self) -> usize {
        self.clients.iter().filter(|c| c.active()).count()
    }

    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            std::thread::sleep(Duration::from_millis(1));
        }
        log::info!("shutdown complete");
    }

    /// One pacing step: runs as many fixed ticks as wall time owes us.
    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.accumulator += delta.min(MAX_FRAME_DELTA);

        let dt = 1.0 / self.config.tick_rate;

        while self.accumulator >= dt {
            self.accumulator -= dt;
            self.time = self.start.elapsed().as_secs_f32();

            self.process_network();
            self.tick(dt);

            self.snapshot_acc += dt;
            if self.snapshot_acc >= 1.0 / self.config.snapshot_rate {
                self.broadcast_snapshot();
                self.snapshot_acc = 0.0;
            }

            self.network_acc += dt;
            if self.network_acc >= self.config.network_update_interval {
                self.transport.update(self.network_acc);
                self.network_acc = 0.0;
                self.process_transport_events();
            }

            self.update_respawns();
        }
    }

    fn process_network(&mut self) {
        while let Some(polled) = self.transport.poll() {
            let from = polled.from;
            let message = Message::decode(self.transport.payload(&polled));
            self.transport.release(polled);

            match message {
                Ok(Message::ConnectRequest(request)) => self.handle_connect_request(from, &request),
                Ok(Message::Input(input)) => self.handle_input(from, input),
                Ok(other) => log::debug!("unexpected message from {from:08x}: {other:?}"),
                Err(e) => log::debug!("malformed payload from {from:08x}: {e}"),
            }
        }
    }

    fn process_transport_events(&mut self) {
        let events: Vec<TransportEvent> = self.transport.drain_events().collect();
        for event in events {
            match event {
                TransportEvent::PeerRemoved(peer_id) => self.remove_client(peer_id),
            }
        }
    }

    fn find_player_for_peer(&self, peer_id: PeerId) -> Option<usize> {
        self.clients.iter().position(|c| c.peer == Some(peer_id))
    }

    fn handle_connect_request(&mut self, peer_id: PeerId, request: &ConnectRequest) {
        if self.find_player_for_peer(peer_id).is_some() {
            // Duplicate request; the reliable accept is already on its way.
            return;
        }

        let Some(player_idx) = self.clients.iter().position(|c| !c.active()) else {
            log::warn!("no free player slots for {peer_id:08x}");
            return;
        };

        let slot = &mut self.clients[player_idx];
        slot.peer = Some(peer_id);
        slot.last_processed = 0;
        slot.name = request.name().to_string();
        slot.inputs.clear();

        self.frame.players[player_idx] = Player {
            player_idx: player_idx as i8,
            position: spawn_point(&self.map),
            health: STARTING_HEALTH,
            ..Default::default()
        };

        log::info!(
            "player {player_idx} connected (peer {peer_id:08x}, name {:?})",
            self.clients[player_idx].name
        );

        let accept = ConnectAccept {
            server_time: self.time,
            player_index: player_idx as i8,
        };
        if let Err(e) = self.transport.send_reliable(peer_id, &accept) {
            log::warn!("failed to send connect accept: {e}");
        }
    }

    fn handle_input(&mut self, peer_id: PeerId, input: InputMessage) {
        let Some(player_idx) = self.find_player_for_peer(peer_id) else {
            return;
        };

        let inputs = &mut self.clients[player_idx].inputs;
        if inputs.len() >= INPUT_BUFFER_SIZE {
            inputs.pop_front();
        }
        inputs.push_back(input);
    }

    fn tick(&mut self, dt: f32) {
        for player_idx in 0..MAX_PLAYERS {
            if !self.clients[player_idx].active() {
                continue;
            }

            let mut entity = self.frame.players[player_idx];
            if !entity.alive() {
                continue;
            }

            while let Some(input) = self.clients[player_idx].inputs.pop_front() {
                // Inputs can arrive bunched or out of order; the sequence
                // check keeps stale ones from being applied twice.
                if input.sequence <= self.clients[player_idx].last_processed {
                    continue;
                }
                self.clients[player_idx].last_processed = input.sequence;

                if input.buttons & InputMessage::BUTTON_SHOOT != 0 {
                    self.lag_compensated_shot(player_idx as i8, input.shot_time);
                }

                apply_player_input(&mut entity, &input, dt);
                apply_player_physics(&mut entity, &self.map, &self.frame.players, dt);
            }

            entity.last_processed_seq = self.clients[player_idx].last_processed;
            self.frame.players[player_idx] = entity;
        }

        self.frame.timestamp = self.time;
        self.history.push(self.frame);
    }

    /// Resolves a shot against the world as the shooter saw it: the
    /// newest historical frame at or before `shot_time`. Obstacles clip
    /// the ray, then the closest player sphere within the clipped length
    /// takes the damage.
    fn lag_compensated_shot(&mut self, shooter_idx: i8, shot_time: f32) {
        let historical: Snapshot = frame_at(&self.history, shot_time)
            .copied()
            .unwrap_or(self.frame);

        let hist_shooter = historical.players[shooter_idx as usize];
        if !hist_shooter.active() {
            return;
        }

        let mut shot = create_shot(&hist_shooter);
        let hit = trace_shot(&mut shot, &self.map, &historical.players);

        if self.new_shots.len() < MAX_SHOTS {
            self.new_shots.push(shot);
        }

        let Some(hit_idx) = hit else {
            return;
        };

        let killed = {
            let target = &mut self.frame.players[hit_idx as usize];
            if !target.active() || !target.alive() {
                // Historically visible but already gone or dead.
                return;
            }
            target.health = (target.health - BULLET_DAMAGE).max(0);
            !target.alive()
        };

        if !killed {
            return;
        }

        log::info!("player {shooter_idx} killed player {hit_idx}");
        self.respawns.push_back(Respawn {
            player_idx: hit_idx,
            at: self.time + self.config.respawn_delay,
        });

        self.broadcast_reliable(&PlayerDiedEvent {
            killer_idx: shooter_idx,
            killed_idx: hit_idx,
        });
    }

    fn update_respawns(&mut self) {
        while let Some(respawn) = self.respawns.front().copied() {
            // Queue is in firing order, so the first future one ends it.
            if respawn.at > self.time {
                break;
            }
            self.respawns.pop_front();

            let player_idx = respawn.player_idx as usize;
            if !self.clients[player_idx].active() || !self.frame.players[player_idx].active() {
                continue;
            }

            let spawn = spawn_point(&self.map);
            let player = &mut self.frame.players[player_idx];
            player.position = spawn;
            player.health = STARTING_HEALTH;
            log::info!("respawned player {player_idx}");
        }
    }

    fn broadcast_snapshot(&mut self) {
        let mut msg = SnapshotMessage {
            server_time: self.time,
            ..Default::default()
        };

        let mut count = 0;
        for entity in self.frame.players.iter().filter(|p| p.active()) {
            msg.players[count] = quantize_player(entity);
            count += 1;
        }
        msg.player_count = count as u8;

        let shot_count = self.new_shots.len().min(MAX_SHOTS);
        for (i, shot) in self.new_shots.iter().take(shot_count).enumerate() {
            msg.shots[i] = quantize_shot(shot);
        }
        msg.shot_count = shot_count as u8;

        for slot in &self.clients {
            if let Some(peer_id) = slot.peer {
                if let Err(e) = self.transport.send_unreliable(peer_id, &msg) {
                    log::debug!("snapshot send to {peer_id:08x} failed: {e}");
                }
            }
        }

        self.new_shots.clear();
    }

    fn broadcast_reliable<M: Encode>(&mut self, msg: &M) {
        for player_idx in 0..MAX_PLAYERS {
            if let Some(peer_id) = self.clients[player_idx].peer {
                if let Err(e) = self.transport.send_reliable(peer_id, msg) {
                    log::warn!("reliable broadcast to player {player_idx} failed: {e}");
                }
            }
        }
    }

    fn remove_client(&mut self, peer_id: PeerId) {
        let Some(player_idx) = self.find_player_for_peer(peer_id) else {
            return;
        };

        self.clients[player_idx].clear();
        let player = &mut self.frame.players[player_idx];
        player.player_idx = -1;
        player.health = 0;

        log::info!("player {player_idx} disconnected (peer {peer_id:08x})");
        self.broadcast_reliable(&PlayerLeftEvent {
            player_idx: player_idx as i8,
        });
    }
}
