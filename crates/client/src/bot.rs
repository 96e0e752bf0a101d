//! Rule-based NPC clients.
//!
//! Each bot is an ordinary transport-speaking client; the server cannot
//! tell them apart from a player. Decision making is deliberately
//! simple: wander between free points on the map, engage the nearest
//! visible enemy with imperfect aim, back off when hurt.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use glam::{Vec2, Vec3};

use strafe::rng::{rand_percent, rand_range};
use strafe::{has_line_of_sight, spawn_point, Player, TICK_TIME};

use crate::game::{ClientGame, InputSample};

const ENGAGE_RANGE: f32 = 30.0;
const ENGAGE_CLOSE: f32 = 7.0;
const ENGAGE_FAR: f32 = 12.0;
const WAYPOINT_REACHED: f32 = 3.0;
const WANDER_TIME_MAX: f32 = 12.0;
const STRAFE_FLIP_TIME: f32 = 1.5;

const SHOOT_COOLDOWN_BASE: f32 = 0.25;
const SHOOT_COOLDOWN_RETREAT: f32 = 0.3;
const SHOOT_COOLDOWN_VARIANCE: f32 = 0.4;

const RETREAT_HEALTH: i8 = 40;
const AIM_ERROR_ENGAGE: f32 = 0.25;
const AIM_ERROR_RETREAT: f32 = 0.3;

const JUMP_CHANCE: f32 = 0.01;

struct Npc {
    game: ClientGame,
    waypoint: Vec3,
    wander_timer: f32,
    shoot_cooldown: f32,
    strafe_dir: f32,
    strafe_timer: f32,
}

fn apply_aim_error(target: Vec3, error_radius: f32) -> Vec3 {
    let jitter = || (rand_percent() * 2.0 - 1.0) * error_radius;
    target + Vec3::new(jitter(), jitter(), jitter())
}

fn aim_angles(from: Vec3, to: Vec3) -> (f32, f32) {
    let delta = to - from;
    let yaw = delta.z.atan2(delta.x);
    let pitch = delta.y.atan2(Vec2::new(delta.x, delta.z).length());
    (yaw, pitch)
}

impl Npc {
    fn new(game: ClientGame) -> Self {
        Self {
            game,
            waypoint: Vec3::ZERO,
            wander_timer: 0.0,
            shoot_cooldown: 1.0,
            strafe_dir: 1.0,
            strafe_timer: STRAFE_FLIP_TIME,
        }
    }

    /// Picks the nearest living enemy we can actually see.
    fn find_target(&self, me: &Player) -> Option<(f32, Vec3)> {
        let snapshot = self.game.latest_snapshot()?;
        let mut best: Option<(f32, Vec3)> = None;

        for other in snapshot.active_players() {
            if other.player_idx == self.game.player_index() || !other.alive() {
                continue;
            }

            let distance = (other.position - me.position).length();
            if distance > ENGAGE_RANGE {
                continue;
            }
            if !has_line_of_sight(me.eye_position(), other.position, self.game.map()) {
                continue;
            }

            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, other.position));
            }
        }

        best
    }

    fn decide(&mut self, dt: f32) -> InputSample {
        self.wander_timer -= dt;
        self.shoot_cooldown -= dt;
        self.strafe_timer -= dt;

        if self.strafe_timer <= 0.0 {
            self.strafe_dir = -self.strafe_dir;
            self.strafe_timer = STRAFE_FLIP_TIME * (0.5 + rand_percent());
        }

        let me = *self.game.local_player();
        let mut sample = InputSample::default();

        if !me.alive() {
            return sample;
        }

        if let Some((distance, enemy_pos)) = self.find_target(&me) {
            let retreating = me.health < RETREAT_HEALTH;
            let error = if retreating { AIM_ERROR_RETREAT } else { AIM_ERROR_ENGAGE };

            let aim_at = apply_aim_error(enemy_pos, error);
            let (yaw, pitch) = aim_angles(me.eye_position(), aim_at);
            sample.yaw = yaw;
            sample.pitch = pitch;

            // Keep a preferred distance band while strafing.
            sample.move_x = self.strafe_dir;
            sample.move_z = if retreating || distance < ENGAGE_CLOSE {
                1.0
            } else if distance > ENGAGE_FAR {
                -1.0
            } else {
                0.0
            };

            if self.shoot_cooldown <= 0.0 {
                sample.shoot = true;
                let base = if retreating {
                    SHOOT_COOLDOWN_RETREAT
                } else {
                    SHOOT_COOLDOWN_BASE
                };
                self.shoot_cooldown = base + rand_percent() * SHOOT_COOLDOWN_VARIANCE;
            }
        } else {
            let reached =
                Vec2::new(me.position.x - self.waypoint.x, me.position.z - self.waypoint.z)
                    .length()
                    < WAYPOINT_REACHED;

            if self.wander_timer <= 0.0 || reached {
                self.waypoint = spawn_point(self.game.map());
                self.wander_timer = WANDER_TIME_MAX * (0.5 + rand_percent() * 0.5);
            }

            let (yaw, _) = aim_angles(me.position, self.waypoint);
            sample.yaw = yaw;
            sample.move_z = -1.0; // forward

            if rand_percent() < JUMP_CHANCE {
                sample.jump = true;
            }
        }

        sample
    }
}

pub fn run_npcs(server_addr: SocketAddr, name_prefix: &str, count: u32) -> io::Result<()> {
    let mut npcs = Vec::with_capacity(count as usize);

    for i in 0..count {
        let mut game = ClientGame::new(0, server_addr)?;
        game.connect(&format!("{name_prefix}{i}"))?;
        npcs.push(Npc::new(game));
        // Spread out connects a little.
        std::thread::sleep(Duration::from_millis(50 + rand_range(100) as u64));
    }

    log::info!("{count} bots connected to {server_addr}");

    let frame_time = Duration::from_secs_f32(TICK_TIME);
    let mut last = Instant::now();

    loop {
        let now = Instant::now();
        let dt = (now - last).as_secs_f32();
        last = now;

        let mut alive = 0;
        for npc in &mut npcs {
            let sample = npc.decide(dt);
            npc.game.update(dt, &sample);
            npc.game.drain_events().count();
            if npc.game.is_connected() {
                alive += 1;
            }
        }

        if alive == 0 {
            log::warn!("all bots lost the server, exiting");
            return Ok(());
        }

        let elapsed = last.elapsed();
        if elapsed < frame_time {
            std::thread::sleep(frame_time - elapsed);
        }
    }
}
