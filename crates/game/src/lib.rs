pub mod collide;
pub mod map;
pub mod net;
pub mod player;
pub mod rng;
pub mod shot;
pub mod snapshot;

pub use collide::{Aabb, Contact, Obb, Ray, RayHit, Sphere};
pub use map::{generate_map, has_line_of_sight, is_position_clear, spawn_point, Map};
pub use player::{
    apply_player_input, apply_player_physics, Player, MAX_PLAYERS, PLAYER_EYE_HEIGHT,
    PLAYER_RADIUS, STARTING_HEALTH, TICK_RATE, TICK_TIME,
};
pub use shot::{create_shot, trace_shot, Shot, MAX_SHOOT_RANGE, MAX_SHOTS};
pub use snapshot::{frame_at, RingBuffer, Snapshot, HISTORY_SIZE, SNAPSHOT_COUNT};
