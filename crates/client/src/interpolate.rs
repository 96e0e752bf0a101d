//! Remote-entity interpolation.
//!
//! Snapshots arrive at 20 Hz while frames render much faster, so remote
//! players are drawn at `render_time`, between the two snapshots that
//! bracket it. The same pair stays selected for several frames with `t`
//! sweeping 0 to 1.

use std::f32::consts::{PI, TAU};

use strafe::{Player, RingBuffer, Snapshot, MAX_PLAYERS};

/// Past this displacement the movement is not continuous (death,
/// respawn) and blending would paint a false picture; snap instead.
pub const TELEPORT_THRESHOLD: f32 = 10.0;

/// Fills `out` with the interpolated remote players at `render_time`.
/// The local player is excluded; prediction owns it.
pub fn interpolated_frame(
    snapshots: &RingBuffer<Snapshot>,
    render_time: f32,
    local_idx: i8,
    out: &mut Vec<Player>,
) {
    out.clear();

    let Some((before, after, t)) = bracketing_pair(snapshots, render_time) else {
        return;
    };

    for slot in 0..MAX_PLAYERS {
        let b = &before.players[slot];
        let a = &after.players[slot];

        if !b.active() || !a.active() || b.player_idx != a.player_idx {
            continue;
        }
        if b.player_idx == local_idx {
            continue;
        }

        out.push(blend_players(b, a, t));
    }
}

fn bracketing_pair(
    snapshots: &RingBuffer<Snapshot>,
    render_time: f32,
) -> Option<(&Snapshot, &Snapshot, f32)> {
    if snapshots.len() < 2 {
        return None;
    }

    for i in 0..snapshots.len() - 1 {
        let current = snapshots.get(i)?;
        let next = snapshots.get(i + 1)?;

        if current.timestamp <= render_time && next.timestamp >= render_time {
            let duration = next.timestamp - current.timestamp;
            let t = if duration > 0.001 {
                ((render_time - current.timestamp) / duration).clamp(0.0, 1.0)
            } else {
                0.0
            };
            return Some((current, next, t));
        }
    }

    None
}

pub fn blend_players(before: &Player, after: &Player, t: f32) -> Player {
    let mut out = Player {
        player_idx: before.player_idx,
        ..Default::default()
    };

    let position_delta = (after.position - before.position).length();
    let respawned = before.health == 0 || after.health > before.health;

    if position_delta > TELEPORT_THRESHOLD || respawned {
        out.position = after.position;
        out.velocity = after.velocity;
        out.yaw = after.yaw;
        out.pitch = after.pitch;
    } else {
        out.position = before.position.lerp(after.position, t);
        out.velocity = before.velocity.lerp(after.velocity, t);

        // Yaw takes the short way around the circle.
        let mut yaw_diff = after.yaw - before.yaw;
        if yaw_diff > PI {
            yaw_diff -= TAU;
        }
        if yaw_diff < -PI {
            yaw_diff += TAU;
        }
        out.yaw = before.yaw + yaw_diff * t;
        out.pitch = before.pitch + (after.pitch - before.pitch) * t;
    }

    out.health = after.health;
    out.on_ground = after.on_ground;
    out
}
