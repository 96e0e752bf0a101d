//! Collision primitives shared between client and server.
//!
//! Movement in this game is velocity integration plus fast analytic
//! collision checks, so everything here is a pure function over spheres,
//! rays and oriented boxes. Each test has a bounding-radius broadphase
//! built in.

use glam::{Mat3, Quat, Vec3};

#[derive(Debug, Clone, Copy)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

#[derive(Debug, Clone, Copy)]
pub struct Obb {
    pub center: Vec3,
    pub half_extents: Vec3,
    pub rotation: Quat,
    /// Precomputed for the broadphase.
    pub bounds_radius: f32,
}

impl Obb {
    pub fn new(center: Vec3, half_extents: Vec3) -> Self {
        Self::with_rotation(center, half_extents, Quat::IDENTITY)
    }

    pub fn with_rotation(center: Vec3, half_extents: Vec3, rotation: Quat) -> Self {
        Self {
            center,
            half_extents,
            rotation,
            bounds_radius: half_extents.length(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub length: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct Contact {
    pub point: Vec3,
    pub normal: Vec3,
    pub depth: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
}

pub fn sphere_vs_sphere(a: &Sphere, b: &Sphere) -> Option<Contact> {
    let delta = b.center - a.center;
    let dist_sq = delta.length_squared();
    let radius_sum = a.radius + b.radius;

    if dist_sq > radius_sum * radius_sum {
        return None;
    }

    let dist = dist_sq.sqrt();
    let normal = delta / dist;

    Some(Contact {
        point: a.center + normal * a.radius,
        normal,
        depth: radius_sum - dist,
    })
}

fn sphere_vs_aabb_local(sphere: &Sphere, aabb: &Aabb) -> Option<Contact> {
    let closest = sphere.center.clamp(aabb.min, aabb.max);
    let delta = closest - sphere.center;

    if delta.length_squared() > sphere.radius * sphere.radius {
        return None;
    }

    let to_min = sphere.center - aabb.min;
    let to_max = aabb.max - sphere.center;
    let distances = [to_min.x, to_min.y, to_min.z, to_max.x, to_max.y, to_max.z];

    let mut min_axis = 0;
    let mut min_dist = distances[0];
    for (i, &d) in distances.iter().enumerate().skip(1) {
        if d < min_dist {
            min_dist = d;
            min_axis = i;
        }
    }

    let mut normal = Vec3::ZERO;
    let mut point = sphere.center;
    if min_axis < 3 {
        normal[min_axis] = -1.0;
        point[min_axis] = aabb.min[min_axis];
    } else {
        let axis = min_axis - 3;
        normal[axis] = 1.0;
        point[axis] = aabb.max[axis];
    }

    Some(Contact {
        point,
        normal,
        depth: min_dist + sphere.radius,
    })
}

pub fn sphere_vs_obb(sphere: &Sphere, obb: &Obb) -> Option<Contact> {
    let delta = obb.center - sphere.center;
    let radius_sum = sphere.radius + obb.bounds_radius;
    if delta.length_squared() >= radius_sum * radius_sum {
        return None;
    }

    let rot = Mat3::from_quat(obb.rotation);
    let rot_inv = rot.transpose();
    let local_sphere = Sphere {
        center: rot_inv * (sphere.center - obb.center),
        radius: sphere.radius,
    };
    let local_box = Aabb {
        min: -obb.half_extents,
        max: obb.half_extents,
    };

    let local = sphere_vs_aabb_local(&local_sphere, &local_box)?;

    Some(Contact {
        point: rot * local.point + obb.center,
        normal: rot * local.normal,
        depth: local.depth,
    })
}

fn raycast_aabb(ray: &Ray, aabb: &Aabb) -> Option<RayHit> {
    let inv_dir = Vec3::ONE / ray.direction;
    let t_min = (aabb.min - ray.origin) * inv_dir;
    let t_max = (aabb.max - ray.origin) * inv_dir;

    let t1 = t_min.min(t_max);
    let t2 = t_max.max(t_min);

    let t_near = t1.x.max(t1.y).max(t1.z);
    let t_far = t2.x.min(t2.y).min(t2.z);

    if t_near > t_far || t_far < 0.0 || t_near > ray.length {
        return None;
    }

    let t = if t_near > 0.0 { t_near } else { t_far };

    let near_axis = if t1.x > t1.y {
        if t1.x > t1.z {
            0
        } else {
            2
        }
    } else if t1.y > t1.z {
        1
    } else {
        2
    };
    let mut normal = Vec3::ZERO;
    normal[near_axis] = if inv_dir[near_axis] > 0.0 { -1.0 } else { 1.0 };

    Some(RayHit {
        point: ray.origin + ray.direction * t,
        normal,
        distance: t,
    })
}

pub fn raycast_sphere(ray: &Ray, center: Vec3, radius: f32) -> Option<RayHit> {
    let to_sphere = center - ray.origin;
    let proj = to_sphere.dot(ray.direction);

    let closest = ray.origin + ray.direction * proj;
    let dist_sq = (closest - center).length_squared();

    if dist_sq > radius * radius {
        return None;
    }

    let half_chord = (radius * radius - dist_sq).sqrt();
    let t = proj - half_chord;

    if t < 0.0 || t > ray.length {
        return None;
    }

    let point = ray.origin + ray.direction * t;
    Some(RayHit {
        point,
        normal: (point - center).normalize(),
        distance: t,
    })
}

pub fn raycast_obb(ray: &Ray, obb: &Obb) -> Option<RayHit> {
    let to_obb = obb.center - ray.origin;
    let proj = to_obb.dot(ray.direction);

    if proj < -obb.bounds_radius || proj > ray.length + obb.bounds_radius {
        return None;
    }

    let closest = ray.origin + ray.direction * proj;
    if (closest - obb.center).length_squared() >= obb.bounds_radius * obb.bounds_radius {
        return None;
    }

    let rot = Mat3::from_quat(obb.rotation);
    let rot_inv = rot.transpose();
    let local_ray = Ray {
        origin: rot_inv * (ray.origin - obb.center),
        direction: rot_inv * ray.direction,
        length: ray.length,
    };
    let local_box = Aabb {
        min: -obb.half_extents,
        max: obb.half_extents,
    };

    let local = raycast_aabb(&local_ray, &local_box)?;

    Some(RayHit {
        point: rot * local.point + obb.center,
        normal: rot * local.normal,
        distance: local.distance,
    })
}
