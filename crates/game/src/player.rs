//! Player state and the simulation functions shared by client and server.
//!
//! Both endpoints run the exact same input application and physics so the
//! client can predict its own player and later replay unacknowledged
//! inputs on top of an authoritative snapshot. These functions must stay
//! pure over `(player, input, dt, world)` — no clock reads, no randomness
//! — or prediction and reconciliation drift apart permanently.

use glam::{Vec2, Vec3};

use crate::collide::{sphere_vs_obb, sphere_vs_sphere, Contact, Sphere};
use crate::map::Map;
use crate::net::InputMessage;

pub const TICK_RATE: f32 = 60.0;
pub const TICK_TIME: f32 = 1.0 / TICK_RATE;
pub const MAX_PLAYERS: usize = 10;
pub const MAX_JUMPS: u8 = 2;

pub const PLAYER_RADIUS: f32 = 1.0;
pub const PLAYER_EYE_HEIGHT: f32 = 0.5;
pub const STARTING_HEALTH: i8 = 100;

const GRAVITY: f32 = 20.0;
const JUMP_VELOCITY: f32 = 14.0;
const DOUBLE_JUMP_VELOCITY: f32 = 14.0;
const GROUND_SPEED: f32 = 25.0;
const GROUND_ACCEL: f32 = 35.0;

const WALLRUN_MIN_SPEED: f32 = 15.0;
const WALLRUN_SPEED: f32 = 22.0;
const WALLRUN_JUMP_OUT: f32 = 15.0;
const WALLRUN_JUMP_UP: f32 = 10.0;

/// The essential simulated entity. The index is stable for the lifetime
/// of a connection; `-1` marks an unoccupied slot.
#[derive(Debug, Clone, Copy)]
pub struct Player {
    pub player_idx: i8,
    pub last_processed_seq: u32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
    pub health: i8,
    pub wall_running: bool,
    pub wall_normal: Vec3,
    pub wall_index: i16,
    pub jumps_remaining: u8,
}

impl Default for Player {
    fn default() -> Self {
        Self {
            player_idx: -1,
            last_processed_seq: 0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            on_ground: false,
            health: 0,
            wall_running: false,
            wall_normal: Vec3::ZERO,
            wall_index: -1,
            jumps_remaining: 0,
        }
    }
}

impl Player {
    pub fn active(&self) -> bool {
        self.player_idx != -1
    }

    pub fn alive(&self) -> bool {
        self.health > 0
    }

    pub fn eye_position(&self) -> Vec3 {
        self.position + Vec3::new(0.0, PLAYER_EYE_HEIGHT, 0.0)
    }
}

pub fn apply_player_input(player: &mut Player, input: &InputMessage, dt: f32) {
    player.yaw = input.look_yaw;
    player.pitch = input.look_pitch;

    let forward = Vec3::new(player.yaw.cos(), 0.0, player.yaw.sin());
    let right = Vec3::new(-forward.z, 0.0, forward.x);
    let mut move_dir = forward * -input.move_z + right * input.move_x;

    if move_dir.length() > 0.001 {
        move_dir = move_dir.normalize();
    }

    if player.wall_running {
        // Locked to wall speed; inputs only nudge the direction.
        let current = Vec3::new(player.velocity.x, 0.0, player.velocity.z);
        let speed = current.length();
        if speed > 0.1 {
            let dir = current / speed;
            player.velocity.x = dir.x * WALLRUN_SPEED;
            player.velocity.z = dir.z * WALLRUN_SPEED;
        }
        player.velocity.x += move_dir.x * 2.0;
        player.velocity.z += move_dir.z * 2.0;
    } else {
        let target = move_dir * GROUND_SPEED;
        let diff = target - Vec3::new(player.velocity.x, 0.0, player.velocity.z);
        player.velocity.x += diff.x * GROUND_ACCEL * dt;
        player.velocity.z += diff.z * GROUND_ACCEL * dt;
    }

    if input.buttons & InputMessage::BUTTON_JUMP != 0 {
        if player.on_ground {
            player.velocity.y = JUMP_VELOCITY;
            player.jumps_remaining = MAX_JUMPS - 1;
        } else if player.wall_running {
            player.velocity = player.wall_normal * WALLRUN_JUMP_OUT;
            player.velocity.y = WALLRUN_JUMP_UP;
            player.wall_running = false;
            player.jumps_remaining = MAX_JUMPS - 1;
        } else if player.jumps_remaining > 0 {
            player.velocity.y = DOUBLE_JUMP_VELOCITY;
            player.jumps_remaining -= 1;
        }
    }
}

fn is_wall_surface(normal: Vec3) -> bool {
    normal.y.abs() < 0.3
}

pub fn apply_player_physics(
    player: &mut Player,
    map: &Map,
    all_players: &[Player; MAX_PLAYERS],
    dt: f32,
) {
    if player.position.y <= PLAYER_RADIUS {
        player.position.y = PLAYER_RADIUS;
        player.on_ground = true;
        player.jumps_remaining = MAX_JUMPS;
        player.wall_running = false;
        if player.velocity.y < 0.0 {
            player.velocity.y = 0.0;
        }
    } else if player.wall_running {
        player.on_ground = false;
        player.velocity.y = 0.0;
    } else {
        player.on_ground = false;
        player.velocity.y -= GRAVITY * dt;
    }

    let obstacles = &map.obstacles;

    if player.wall_running {
        // Still attached? Collision resolution pushes us off the wall each
        // frame, so the probe uses an expanded radius to avoid flickering
        // between attached and detached.
        let probe = Sphere {
            center: player.position,
            radius: PLAYER_RADIUS * 1.2,
        };
        let attached = obstacles
            .get(player.wall_index as usize)
            .is_some_and(|wall| sphere_vs_obb(&probe, wall).is_some());
        if !attached {
            player.wall_running = false;
        }
    }

    let movement = player.velocity * dt;
    let mut new_position = player.position;

    // Resolve each axis separately so sliding along a wall keeps the
    // other components of the motion.
    let axes = [
        Vec3::new(movement.x, 0.0, 0.0),
        Vec3::new(0.0, 0.0, movement.z),
        Vec3::new(0.0, movement.y, 0.0),
    ];
    let vel_indices = [0usize, 2, 1];

    for i in 0..3 {
        let test_pos = new_position + axes[i];
        let test_sphere = Sphere {
            center: test_pos,
            radius: PLAYER_RADIUS,
        };

        let mut collision: Option<Contact> = None;

        for (index, obb) in obstacles.iter().enumerate() {
            let Some(contact) = sphere_vs_obb(&test_sphere, obb) else {
                continue;
            };
            collision = Some(contact);

            if !player.on_ground && !player.wall_running && is_wall_surface(contact.normal) {
                let horiz = Vec2::new(player.velocity.x, player.velocity.z);
                let horiz_speed = horiz.length();
                if horiz_speed < WALLRUN_MIN_SPEED {
                    continue;
                }

                player.wall_running = true;
                player.wall_index = index as i16;
                player.wall_normal = contact.normal;
                player.velocity.y = 0.0;
                player.jumps_remaining = MAX_JUMPS;

                let wall_normal_2d = Vec2::new(contact.normal.x, contact.normal.z);
                let into_wall = horiz.dot(wall_normal_2d);
                let mut along_wall = horiz - wall_normal_2d * into_wall;

                if along_wall.length() > 0.1 {
                    along_wall = along_wall.normalize() * WALLRUN_SPEED;
                } else {
                    // Moving straight into the wall; pick the tangent that
                    // matches the approach direction.
                    let mut wall_right = Vec3::Y.cross(player.wall_normal);
                    if Vec3::new(horiz.x, 0.0, horiz.y).dot(wall_right) < 0.0 {
                        wall_right = -wall_right;
                    }
                    along_wall = Vec2::new(wall_right.x, wall_right.z) * WALLRUN_SPEED;
                }

                player.velocity.x = along_wall.x;
                player.velocity.z = along_wall.y;
            }
        }

        match collision {
            None => {
                new_position = test_pos;
            }
            Some(contact) => {
                let is_walkable = contact.normal.y > 0.25;
                let mut resolved = false;

                if is_walkable && i < 2 {
                    let axis_length = axes[i].length();
                    if axis_length > 1e-6 {
                        let move_dir = axes[i] / axis_length;
                        let into_surface = move_dir.dot(contact.normal);

                        if into_surface < 0.0 {
                            let projected =
                                (move_dir - contact.normal * into_surface) * axis_length;
                            let slope_pos = new_position + projected;
                            let slope_sphere = Sphere {
                                center: slope_pos,
                                radius: PLAYER_RADIUS,
                            };

                            let blocked = obstacles
                                .iter()
                                .any(|b| sphere_vs_obb(&slope_sphere, b).is_some());

                            if !blocked {
                                new_position = slope_pos;
                                resolved = true;
                            }
                        }
                    }
                }

                if !resolved {
                    player.velocity[vel_indices[i]] = 0.0;
                    if i == 2 && movement.y < 0.0 {
                        player.on_ground = true;
                        player.wall_running = false;
                    }
                }
            }
        }
    }

    player.position = new_position;

    let own = Sphere {
        center: player.position,
        radius: PLAYER_RADIUS,
    };

    for other in all_players {
        if other.player_idx == player.player_idx || !other.active() {
            continue;
        }

        let other_sphere = Sphere {
            center: other.position,
            radius: PLAYER_RADIUS,
        };

        if let Some(contact) = sphere_vs_sphere(&own, &other_sphere) {
            player.position -= contact.normal * contact.depth;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::generate_map;

    fn spawned_player(position: Vec3) -> Player {
        Player {
            player_idx: 0,
            position,
            health: STARTING_HEALTH,
            ..Default::default()
        }
    }

    fn input(move_x: f32, move_z: f32, buttons: u8) -> InputMessage {
        InputMessage {
            sequence: 0,
            move_x,
            move_z,
            look_yaw: 0.0,
            look_pitch: 0.0,
            buttons,
            shot_time: 0.0,
            time: 0.0,
        }
    }

    #[test]
    fn ground_clamp_restores_jumps() {
        let map = generate_map();
        let others = [Player::default(); MAX_PLAYERS];
        let mut player = spawned_player(Vec3::new(0.0, 0.5, 0.0));
        player.velocity.y = -5.0;

        apply_player_physics(&mut player, &map, &others, TICK_TIME);

        assert!(player.on_ground);
        assert_eq!(player.position.y, PLAYER_RADIUS);
        assert_eq!(player.velocity.y, 0.0);
        assert_eq!(player.jumps_remaining, MAX_JUMPS);
    }

    #[test]
    fn jump_and_double_jump() {
        let mut player = spawned_player(Vec3::new(0.0, PLAYER_RADIUS, 0.0));
        player.on_ground = true;

        apply_player_input(&mut player, &input(0.0, 0.0, InputMessage::BUTTON_JUMP), TICK_TIME);
        assert_eq!(player.velocity.y, 14.0);
        assert_eq!(player.jumps_remaining, MAX_JUMPS - 1);

        player.on_ground = false;
        player.velocity.y = -2.0;
        apply_player_input(&mut player, &input(0.0, 0.0, InputMessage::BUTTON_JUMP), TICK_TIME);
        assert_eq!(player.velocity.y, 14.0);
        assert_eq!(player.jumps_remaining, 0);

        // Out of charges: the jump button does nothing in the air.
        player.velocity.y = -2.0;
        apply_player_input(&mut player, &input(0.0, 0.0, InputMessage::BUTTON_JUMP), TICK_TIME);
        assert_eq!(player.velocity.y, -2.0);
    }

    #[test]
    fn gravity_applies_in_air() {
        let map = generate_map();
        let others = [Player::default(); MAX_PLAYERS];
        let mut player = spawned_player(Vec3::new(0.0, 10.0, 0.0));

        apply_player_physics(&mut player, &map, &others, TICK_TIME);

        assert!(!player.on_ground);
        assert!(player.velocity.y < 0.0);
        assert!(player.position.y < 10.0);
    }

    #[test]
    fn simulation_is_deterministic() {
        let map = generate_map();
        let others = [Player::default(); MAX_PLAYERS];

        let mut a = spawned_player(Vec3::new(3.0, 2.0, 4.0));
        let mut b = a;

        for seq in 0..120u32 {
            let mut msg = input(1.0, 0.25, if seq % 30 == 0 { InputMessage::BUTTON_JUMP } else { 0 });
            msg.sequence = seq;
            msg.look_yaw = seq as f32 * 0.01;

            apply_player_input(&mut a, &msg, TICK_TIME);
            apply_player_physics(&mut a, &map, &others, TICK_TIME);
            apply_player_input(&mut b, &msg, TICK_TIME);
            apply_player_physics(&mut b, &map, &others, TICK_TIME);
        }

        assert_eq!(a.position, b.position);
        assert_eq!(a.velocity, b.velocity);
    }

    #[test]
    fn players_push_apart() {
        let map = generate_map();
        let mut others = [Player::default(); MAX_PLAYERS];
        others[1] = spawned_player(Vec3::new(0.5, PLAYER_RADIUS, 0.0));
        others[1].player_idx = 1;

        let mut player = spawned_player(Vec3::new(0.0, PLAYER_RADIUS, 0.0));
        apply_player_physics(&mut player, &map, &others, TICK_TIME);

        let dist = (player.position - others[1].position).length();
        assert!(dist >= 2.0 * PLAYER_RADIUS - 1e-3);
    }
}
