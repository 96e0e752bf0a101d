//! Lossy integer encoding for snapshot payloads.
//!
//! Positions compress from f32 to i16 by scaling by 500, giving ±65 m of
//! range at 2 mm precision. The dominant source of visual error is
//! latency and jitter, so none of this is noticeable on screen. Delta
//! encoding would go much further; this is deliberately the lite version.

use glam::Vec3;

use crate::net::protocol::{ProtocolError, Reader, Writer};
use crate::player::Player;
use crate::shot::Shot;

const POSITION_SCALE: f32 = 500.0;
const POSITION_INV_SCALE: f32 = 0.002;
const VELOCITY_SCALE: f32 = 10.0;
const VELOCITY_INV_SCALE: f32 = 0.1;

const FLAG_ON_GROUND: u8 = 0x01;
const FLAG_WALL_RUNNING: u8 = 0x02;

#[derive(Debug, Clone, Copy, Default)]
pub struct QuantizedPlayer {
    pub player_idx: i8,
    pub pos_x: i16,
    pub pos_y: i16,
    pub pos_z: i16,
    pub vel_x: i8,
    pub vel_y: i8,
    pub vel_z: i8,
    pub yaw: u8,
    pub pitch: i8,
    pub health: u8,
    pub flags: u8,
    pub last_processed_seq: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QuantizedShot {
    pub shooter_idx: i8,
    pub origin_x: i16,
    pub origin_y: i16,
    pub origin_z: i16,
    pub dir_x: i8,
    pub dir_y: i8,
    pub dir_z: i8,
    pub length: u8,
}

fn quantize_coord(v: f32) -> i16 {
    (v * POSITION_SCALE).clamp(-32768.0, 32767.0) as i16
}

fn quantize_vel(v: f32) -> i8 {
    (v * VELOCITY_SCALE).clamp(-128.0, 127.0) as i8
}

impl QuantizedPlayer {
    pub const SIZE: usize = 18;

    pub fn encode(&self, w: &mut Writer) {
        w.i8(self.player_idx);
        w.i16(self.pos_x);
        w.i16(self.pos_y);
        w.i16(self.pos_z);
        w.i8(self.vel_x);
        w.i8(self.vel_y);
        w.i8(self.vel_z);
        w.u8(self.yaw);
        w.i8(self.pitch);
        w.u8(self.health);
        w.u8(self.flags);
        w.u32(self.last_processed_seq);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        Ok(Self {
            player_idx: r.i8()?,
            pos_x: r.i16()?,
            pos_y: r.i16()?,
            pos_z: r.i16()?,
            vel_x: r.i8()?,
            vel_y: r.i8()?,
            vel_z: r.i8()?,
            yaw: r.u8()?,
            pitch: r.i8()?,
            health: r.u8()?,
            flags: r.u8()?,
            last_processed_seq: r.u32()?,
        })
    }
}

impl QuantizedShot {
    pub const SIZE: usize = 11;

    pub fn encode(&self, w: &mut Writer) {
        w.i8(self.shooter_idx);
        w.i16(self.origin_x);
        w.i16(self.origin_y);
        w.i16(self.origin_z);
        w.i8(self.dir_x);
        w.i8(self.dir_y);
        w.i8(self.dir_z);
        w.u8(self.length);
    }

    pub fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        Ok(Self {
            shooter_idx: r.i8()?,
            origin_x: r.i16()?,
            origin_y: r.i16()?,
            origin_z: r.i16()?,
            dir_x: r.i8()?,
            dir_y: r.i8()?,
            dir_z: r.i8()?,
            length: r.u8()?,
        })
    }
}

pub fn quantize_player(p: &Player) -> QuantizedPlayer {
    let normalized_yaw = p.yaw / std::f32::consts::TAU;
    let normalized_yaw = normalized_yaw - normalized_yaw.floor();

    QuantizedPlayer {
        player_idx: p.player_idx,
        last_processed_seq: p.last_processed_seq,
        pos_x: quantize_coord(p.position.x),
        pos_y: quantize_coord(p.position.y),
        pos_z: quantize_coord(p.position.z),
        vel_x: quantize_vel(p.velocity.x),
        vel_y: quantize_vel(p.velocity.y),
        vel_z: quantize_vel(p.velocity.z),
        yaw: (normalized_yaw * 255.0) as u8,
        pitch: (p.pitch * (128.0 / std::f32::consts::PI)).clamp(-128.0, 127.0) as i8,
        health: p.health.max(0) as u8,
        flags: (if p.on_ground { FLAG_ON_GROUND } else { 0 })
            | (if p.wall_running { FLAG_WALL_RUNNING } else { 0 })
            | ((p.jumps_remaining & 0x03) << 2),
    }
}

pub fn dequantize_player(q: &QuantizedPlayer) -> Player {
    Player {
        player_idx: q.player_idx,
        last_processed_seq: q.last_processed_seq,
        position: Vec3::new(
            q.pos_x as f32 * POSITION_INV_SCALE,
            q.pos_y as f32 * POSITION_INV_SCALE,
            q.pos_z as f32 * POSITION_INV_SCALE,
        ),
        velocity: Vec3::new(
            q.vel_x as f32 * VELOCITY_INV_SCALE,
            q.vel_y as f32 * VELOCITY_INV_SCALE,
            q.vel_z as f32 * VELOCITY_INV_SCALE,
        ),
        yaw: q.yaw as f32 * (std::f32::consts::TAU / 255.0),
        pitch: q.pitch as f32 * (std::f32::consts::PI / 128.0),
        health: q.health as i8,
        on_ground: q.flags & FLAG_ON_GROUND != 0,
        wall_running: q.flags & FLAG_WALL_RUNNING != 0,
        jumps_remaining: (q.flags >> 2) & 0x03,
        ..Default::default()
    }
}

pub fn quantize_shot(shot: &Shot) -> QuantizedShot {
    let dir = shot.ray.direction.normalize();

    QuantizedShot {
        shooter_idx: shot.shooter_idx,
        origin_x: quantize_coord(shot.ray.origin.x),
        origin_y: quantize_coord(shot.ray.origin.y),
        origin_z: quantize_coord(shot.ray.origin.z),
        dir_x: (dir.x * 127.0) as i8,
        dir_y: (dir.y * 127.0) as i8,
        dir_z: (dir.z * 127.0) as i8,
        length: shot.ray.length.clamp(0.0, 255.0) as u8,
    }
}

pub fn dequantize_shot(q: &QuantizedShot) -> Shot {
    let dir = Vec3::new(
        q.dir_x as f32 / 127.0,
        q.dir_y as f32 / 127.0,
        q.dir_z as f32 / 127.0,
    );

    Shot {
        shooter_idx: q.shooter_idx,
        ray: crate::collide::Ray {
            origin: Vec3::new(
                q.origin_x as f32 * POSITION_INV_SCALE,
                q.origin_y as f32 * POSITION_INV_SCALE,
                q.origin_z as f32 * POSITION_INV_SCALE,
            ),
            direction: dir.normalize(),
            length: q.length as f32,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collide::Ray;
    use crate::player::STARTING_HEALTH;

    #[test]
    fn position_roundtrip_within_2mm() {
        let mut p = -65.5f32;
        while p <= 65.5 {
            let q = quantize_coord(p);
            let back = q as f32 * POSITION_INV_SCALE;
            assert!(
                (back - p).abs() <= POSITION_INV_SCALE + 1e-4,
                "coord {p} came back as {back}"
            );
            p += 0.137;
        }
    }

    #[test]
    fn player_roundtrip() {
        let player = Player {
            player_idx: 3,
            last_processed_seq: 9001,
            position: Vec3::new(12.345, 1.0, -40.2),
            velocity: Vec3::new(5.0, -3.2, 0.7),
            yaw: 2.5,
            pitch: -0.4,
            health: STARTING_HEALTH,
            on_ground: true,
            jumps_remaining: 2,
            ..Default::default()
        };

        let q = quantize_player(&player);
        let back = dequantize_player(&q);

        assert_eq!(back.player_idx, 3);
        assert_eq!(back.last_processed_seq, 9001);
        assert_eq!(back.health, STARTING_HEALTH);
        assert!(back.on_ground);
        assert!(!back.wall_running);
        assert_eq!(back.jumps_remaining, 2);
        assert!((back.position - player.position).length() < 0.01);
        assert!((back.velocity - player.velocity).length() < 0.2);
        assert!((back.yaw - player.yaw).abs() < 0.05);
        assert!((back.pitch - player.pitch).abs() < 0.05);
    }

    #[test]
    fn yaw_wraps_to_full_turn() {
        let mut player = Player {
            player_idx: 0,
            ..Default::default()
        };
        player.yaw = -0.1;

        let q = quantize_player(&player);
        let back = dequantize_player(&q);

        // Negative yaw comes back in [0, 2π), same direction.
        let diff = (back.yaw - (std::f32::consts::TAU - 0.1)).abs();
        assert!(diff < 0.05, "yaw came back as {}", back.yaw);
    }

    #[test]
    fn shot_roundtrip() {
        let shot = Shot {
            shooter_idx: 2,
            ray: Ray {
                origin: Vec3::new(10.0, 1.5, -5.0),
                direction: Vec3::new(0.6, 0.0, 0.8),
                length: 42.7,
            },
        };

        let q = quantize_shot(&shot);
        let back = dequantize_shot(&q);

        assert_eq!(back.shooter_idx, 2);
        assert!((back.ray.origin - shot.ray.origin).length() < 0.01);
        assert!(back.ray.direction.dot(shot.ray.direction) > 0.99);
        assert!((back.ray.length - 42.0).abs() < 0.5);
    }
}
