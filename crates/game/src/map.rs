//! The arena. A fixed list of oriented boxes shared by client and server
//! so both run collision against identical geometry.

use glam::{Quat, Vec3};

use crate::collide::{raycast_obb, sphere_vs_obb, Obb, Ray, Sphere};
use crate::player::PLAYER_RADIUS;
use crate::rng::rand_range;

pub const MAX_OBSTACLES: usize = 256;

const SPAWN_ATTEMPT_COUNT: u32 = 50;
const SPAWN_RANDOM_RANGE: u32 = 60;
const SPAWN_RANDOM_OFFSET: f32 = 20.0;
const SPAWN_TEST_HEIGHT: f32 = 2.0;
const SPAWN_RAYCAST_DISTANCE: f32 = 20.0;
const SPAWN_GROUND_OFFSET: f32 = 1.0;
const SPAWN_DEFAULT_POSITION: Vec3 = Vec3::new(0.0, 2.0, 0.0);

#[derive(Debug, Clone)]
pub struct Map {
    pub obstacles: Vec<Obb>,
}

fn rotated_box(center: Vec3, half_extents: Vec3, axis: Vec3, angle_degrees: f32) -> Obb {
    let rotation = Quat::from_axis_angle(axis.normalize(), angle_degrees.to_radians());
    Obb::with_rotation(center, half_extents, rotation)
}

pub fn generate_map() -> Map {
    let mut obstacles = Vec::with_capacity(MAX_OBSTACLES);

    // Floor.
    obstacles.push(Obb::new(Vec3::new(0.0, -1.0, 0.0), Vec3::new(60.0, 0.5, 60.0)));

    // Perimeter walls.
    obstacles.push(Obb::new(Vec3::new(0.0, 4.0, -60.0), Vec3::new(60.0, 8.0, 0.5)));
    obstacles.push(Obb::new(Vec3::new(0.0, 4.0, 60.0), Vec3::new(60.0, 8.0, 0.5)));
    obstacles.push(Obb::new(Vec3::new(-60.0, 4.0, 0.0), Vec3::new(0.5, 8.0, 60.0)));
    obstacles.push(Obb::new(Vec3::new(60.0, 4.0, 0.0), Vec3::new(0.5, 8.0, 60.0)));

    // Inner ring walls.
    obstacles.push(Obb::new(Vec3::new(-20.0, 3.0, 30.0), Vec3::new(15.0, 6.0, 0.5)));
    obstacles.push(Obb::new(Vec3::new(20.0, 3.0, 30.0), Vec3::new(15.0, 6.0, 0.5)));
    obstacles.push(Obb::new(Vec3::new(-20.0, 3.0, -30.0), Vec3::new(15.0, 6.0, 0.5)));
    obstacles.push(Obb::new(Vec3::new(20.0, 3.0, -30.0), Vec3::new(15.0, 6.0, 0.5)));
    obstacles.push(Obb::new(Vec3::new(-30.0, 3.0, 20.0), Vec3::new(0.5, 6.0, 15.0)));
    obstacles.push(Obb::new(Vec3::new(-30.0, 3.0, -20.0), Vec3::new(0.5, 6.0, 15.0)));
    obstacles.push(Obb::new(Vec3::new(30.0, 3.0, 20.0), Vec3::new(0.5, 6.0, 15.0)));
    obstacles.push(Obb::new(Vec3::new(30.0, 3.0, -20.0), Vec3::new(0.5, 6.0, 15.0)));

    // Corner pockets.
    obstacles.push(Obb::new(Vec3::new(40.0, 3.0, 35.0), Vec3::new(8.0, 6.0, 0.5)));
    obstacles.push(Obb::new(Vec3::new(45.0, 3.0, 40.0), Vec3::new(0.5, 6.0, 8.0)));
    obstacles.push(Obb::new(Vec3::new(-40.0, 3.0, 35.0), Vec3::new(8.0, 6.0, 0.5)));
    obstacles.push(Obb::new(Vec3::new(-45.0, 3.0, 40.0), Vec3::new(0.5, 6.0, 8.0)));
    obstacles.push(Obb::new(Vec3::new(40.0, 3.0, -35.0), Vec3::new(8.0, 6.0, 0.5)));
    obstacles.push(Obb::new(Vec3::new(45.0, 3.0, -40.0), Vec3::new(0.5, 6.0, 8.0)));
    obstacles.push(Obb::new(Vec3::new(-40.0, 3.0, -35.0), Vec3::new(8.0, 6.0, 0.5)));
    obstacles.push(Obb::new(Vec3::new(-45.0, 3.0, -40.0), Vec3::new(0.5, 6.0, 8.0)));

    // Central corridor.
    obstacles.push(Obb::new(Vec3::new(-12.0, 2.5, 0.0), Vec3::new(0.5, 5.0, 18.0)));
    obstacles.push(Obb::new(Vec3::new(12.0, 2.5, 0.0), Vec3::new(0.5, 5.0, 18.0)));

    // Pillars.
    obstacles.push(Obb::new(Vec3::new(25.0, 3.5, 15.0), Vec3::new(2.0, 7.0, 2.0)));
    obstacles.push(Obb::new(Vec3::new(-25.0, 3.5, 15.0), Vec3::new(2.0, 7.0, 2.0)));
    obstacles.push(Obb::new(Vec3::new(25.0, 3.5, -15.0), Vec3::new(2.0, 7.0, 2.0)));
    obstacles.push(Obb::new(Vec3::new(-25.0, 3.5, -15.0), Vec3::new(2.0, 7.0, 2.0)));

    obstacles.push(Obb::new(Vec3::new(0.0, 1.5, 10.0), Vec3::new(6.0, 3.0, 0.5)));
    obstacles.push(Obb::new(Vec3::new(0.0, 1.5, -10.0), Vec3::new(6.0, 3.0, 0.5)));

    obstacles.push(Obb::new(Vec3::new(35.0, 2.0, 0.0), Vec3::new(0.5, 4.0, 8.0)));
    obstacles.push(Obb::new(Vec3::new(-35.0, 2.0, 0.0), Vec3::new(0.5, 4.0, 8.0)));
    obstacles.push(Obb::new(Vec3::new(0.0, 2.0, 40.0), Vec3::new(8.0, 4.0, 0.5)));
    obstacles.push(Obb::new(Vec3::new(0.0, 2.0, -40.0), Vec3::new(8.0, 4.0, 0.5)));

    // Crates.
    obstacles.push(Obb::new(Vec3::new(15.0, 1.0, 25.0), Vec3::new(2.0, 2.0, 2.0)));
    obstacles.push(Obb::new(Vec3::new(-15.0, 1.0, 25.0), Vec3::new(2.0, 2.0, 2.0)));
    obstacles.push(Obb::new(Vec3::new(15.0, 1.0, -25.0), Vec3::new(2.0, 2.0, 2.0)));
    obstacles.push(Obb::new(Vec3::new(-15.0, 1.0, -25.0), Vec3::new(2.0, 2.0, 2.0)));

    // Ramps.
    obstacles.push(rotated_box(
        Vec3::new(0.0, 1.0, 20.0),
        Vec3::new(5.0, 0.5, 8.0),
        Vec3::X,
        30.0,
    ));
    obstacles.push(rotated_box(
        Vec3::new(0.0, 1.0, -20.0),
        Vec3::new(5.0, 0.5, 8.0),
        Vec3::X,
        -30.0,
    ));

    Map { obstacles }
}

pub fn has_line_of_sight(from: Vec3, to: Vec3, map: &Map) -> bool {
    let delta = to - from;
    let dist = delta.length();
    if dist < 0.001 {
        return true;
    }

    let ray = Ray {
        origin: from,
        direction: delta / dist,
        length: dist,
    };

    for obb in &map.obstacles {
        if let Some(hit) = raycast_obb(&ray, obb) {
            if hit.distance < dist - 0.5 {
                return false;
            }
        }
    }

    true
}

/// True if a player sphere at `pos` does not overlap any geometry.
pub fn is_position_clear(pos: Vec3, map: &Map) -> bool {
    let test = Sphere {
        center: pos,
        radius: PLAYER_RADIUS,
    };
    map.obstacles.iter().all(|obb| sphere_vs_obb(&test, obb).is_none())
}

/// Picks a free spot by rejection sampling, then rests it on the ground
/// with a downward raycast.
pub fn spawn_point(map: &Map) -> Vec3 {
    for _ in 0..SPAWN_ATTEMPT_COUNT {
        let x = rand_range(SPAWN_RANDOM_RANGE) as f32 - SPAWN_RANDOM_OFFSET;
        let z = rand_range(SPAWN_RANDOM_RANGE) as f32 - SPAWN_RANDOM_OFFSET;
        let mut pos = Vec3::new(x, SPAWN_TEST_HEIGHT, z);

        if !is_position_clear(pos, map) {
            continue;
        }

        let down_ray = Ray {
            origin: pos,
            direction: Vec3::NEG_Y,
            length: SPAWN_RAYCAST_DISTANCE,
        };

        let mut closest_ground = SPAWN_RAYCAST_DISTANCE;
        for obb in &map.obstacles {
            if let Some(hit) = raycast_obb(&down_ray, obb) {
                if hit.distance < closest_ground {
                    closest_ground = hit.distance;
                }
            }
        }

        pos.y -= closest_ground - PLAYER_RADIUS - SPAWN_GROUND_OFFSET;
        return pos;
    }

    SPAWN_DEFAULT_POSITION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_fits_obstacle_capacity() {
        let map = generate_map();
        assert!(!map.obstacles.is_empty());
        assert!(map.obstacles.len() <= MAX_OBSTACLES);
    }

    #[test]
    fn spawn_points_are_clear() {
        let map = generate_map();
        for _ in 0..20 {
            let pos = spawn_point(&map);
            assert!(is_position_clear(pos, &map), "spawn inside geometry: {pos}");
            assert!(pos.x.abs() < 60.0 && pos.z.abs() < 60.0);
        }
    }

    #[test]
    fn line_of_sight_blocked_by_wall() {
        let map = generate_map();

        // Straight across the central corridor wall at x = 12.
        let from = Vec3::new(5.0, 2.0, 0.0);
        let to = Vec3::new(20.0, 2.0, 0.0);
        assert!(!has_line_of_sight(from, to, &map));

        // Short unobstructed hop.
        let near = Vec3::new(6.0, 2.0, 0.0);
        assert!(has_line_of_sight(from, near, &map));
    }
}
