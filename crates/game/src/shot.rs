//! Hitscan shots: ray construction from a shooter's view and the trace
//! against world geometry and player spheres.

use glam::Vec3;

use crate::collide::{raycast_obb, raycast_sphere, Ray};
use crate::map::Map;
use crate::player::{Player, MAX_PLAYERS, PLAYER_RADIUS};

pub const MAX_SHOTS: usize = 16;
pub const MAX_SHOOT_RANGE: f32 = 100.0;

#[derive(Debug, Clone, Copy)]
pub struct Shot {
    pub shooter_idx: i8,
    pub ray: Ray,
}

/// Builds the eye-height ray along the shooter's view direction.
pub fn create_shot(shooter: &Player) -> Shot {
    let forward = Vec3::new(
        shooter.yaw.cos() * shooter.pitch.cos(),
        shooter.pitch.sin(),
        shooter.yaw.sin() * shooter.pitch.cos(),
    );

    Shot {
        shooter_idx: shooter.player_idx,
        ray: Ray {
            origin: shooter.eye_position(),
            direction: forward.normalize(),
            length: MAX_SHOOT_RANGE,
        },
    }
}

/// Traces a shot against the map and every player sphere except the
/// shooter's. Obstacles clip the ray first, then the closest player hit
/// within the clipped length wins (lower index on an exact tie). The
/// ray length is clipped to whatever was hit.
pub fn trace_shot(
    shot: &mut Shot,
    map: &Map,
    players: &[Player; MAX_PLAYERS],
) -> Option<i8> {
    let mut closest_dist = shot.ray.length;

    for obb in &map.obstacles {
        if let Some(hit) = raycast_obb(&shot.ray, obb) {
            if hit.distance < closest_dist {
                closest_dist = hit.distance;
                shot.ray.length = closest_dist;
            }
        }
    }

    let mut hit_player = None;

    for player in players {
        if !player.active() || player.player_idx == shot.shooter_idx {
            continue;
        }

        if let Some(hit) = raycast_sphere(&shot.ray, player.position, PLAYER_RADIUS) {
            if hit.distance < closest_dist {
                closest_dist = hit.distance;
                hit_player = Some(player.player_idx);
                shot.ray.length = closest_dist;
            }
        }
    }

    hit_player
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::generate_map;
    use crate::player::STARTING_HEALTH;

    fn player_at(idx: i8, position: Vec3) -> Player {
        Player {
            player_idx: idx,
            position,
            health: STARTING_HEALTH,
            ..Default::default()
        }
    }

    fn empty_map() -> Map {
        Map { obstacles: Vec::new() }
    }

    #[test]
    fn shot_follows_view_direction() {
        let mut shooter = player_at(0, Vec3::new(0.0, 1.0, 0.0));
        shooter.yaw = 0.0;
        shooter.pitch = 0.0;

        let shot = create_shot(&shooter);
        assert!((shot.ray.origin.y - 1.5).abs() < 1e-5);
        assert!((shot.ray.direction - Vec3::X).length() < 1e-5);
        assert_eq!(shot.ray.length, MAX_SHOOT_RANGE);
    }

    #[test]
    fn closest_player_wins() {
        let map = empty_map();
        let mut players = [Player::default(); MAX_PLAYERS];
        players[0] = player_at(0, Vec3::new(0.0, 1.0, 0.0));
        players[1] = player_at(1, Vec3::new(30.0, 1.5, 0.0));
        players[2] = player_at(2, Vec3::new(10.0, 1.5, 0.0));

        let mut shot = create_shot(&players[0]);
        let hit = trace_shot(&mut shot, &map, &players);

        assert_eq!(hit, Some(2));
        assert!(shot.ray.length < 10.0);
    }

    #[test]
    fn shooter_is_never_hit() {
        let map = empty_map();
        let mut players = [Player::default(); MAX_PLAYERS];
        players[0] = player_at(0, Vec3::ZERO);

        let mut shot = create_shot(&players[0]);
        assert_eq!(trace_shot(&mut shot, &map, &players), None);
        assert_eq!(shot.ray.length, MAX_SHOOT_RANGE);
    }

    #[test]
    fn wall_blocks_shot() {
        let map = generate_map();
        let mut players = [Player::default(); MAX_PLAYERS];
        // Shooter west of the corridor wall at x = 12, target east of it.
        players[0] = player_at(0, Vec3::new(5.0, 1.0, 0.0));
        players[1] = player_at(1, Vec3::new(20.0, 1.0, 0.0));

        let mut shot = create_shot(&players[0]);
        let hit = trace_shot(&mut shot, &map, &players);

        assert_eq!(hit, None);
        assert!(shot.ray.length < 8.0);
    }

    #[test]
    fn historical_frame_resolves_hit() {
        // Target stood at x = 10 when the trigger was pulled but has since
        // moved to x = 20; tracing against the historical frame hits.
        let map = empty_map();
        let mut historical = [Player::default(); MAX_PLAYERS];
        historical[0] = player_at(0, Vec3::new(0.0, 1.0, 0.0));
        historical[1] = player_at(1, Vec3::new(10.0, 1.5, 0.0));

        let mut live = historical;
        live[1].position = Vec3::new(20.0, 1.5, 5.0);

        let mut shot = create_shot(&historical[0]);
        assert_eq!(trace_shot(&mut shot, &map, &historical), Some(1));

        let mut live_shot = create_shot(&live[0]);
        assert_eq!(trace_shot(&mut live_shot, &map, &live), None);
    }
}
