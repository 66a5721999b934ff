//! Collision seam. The simulation never resolves collisions itself; it hands
//! an entity's collider, position and velocity to a [`PhysicsEngine`] and
//! takes back the resolved position. Server, demo and client prediction all
//! share the same implementation so predicted and authoritative movement
//! agree bit for bit.

use glam::Vec2;

use crate::net::quantize::{WORLD_MAX, WORLD_MIN};

pub const LAYER_UNIT: u8 = 1 << 0;
pub const LAYER_OBSTACLE: u8 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColliderShape {
    Circle { radius: f32 },
    Aabb { half_extents: Vec2 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collider {
    pub shape: ColliderShape,
    /// Layer bits this collider occupies.
    pub layer: u8,
    /// Layer bits this collider collides against.
    pub mask: u8,
}

pub trait PhysicsEngine {
    /// Integrates `position` by `velocity * dt` and resolves collisions.
    /// Returns the resolved position.
    fn move_entity(&self, collider: &Collider, position: Vec2, velocity: Vec2, dt: f32) -> Vec2;
}

#[derive(Debug, Clone, Copy)]
struct Wall {
    center: Vec2,
    half_extents: Vec2,
    layer: u8,
}

/// Kinematic mover: integrate, push circles out of static AABB walls along
/// the axis of least penetration, clamp to the world bounds.
#[derive(Debug, Default)]
pub struct KinematicPhysics {
    walls: Vec<Wall>,
}

impl KinematicPhysics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_wall(&mut self, center: Vec2, half_extents: Vec2) {
        self.walls.push(Wall {
            center,
            half_extents,
            layer: LAYER_OBSTACLE,
        });
    }

    /// The fixed arena every process builds. Client prediction must run
    /// against the same geometry as the server.
    pub fn standard_arena() -> Self {
        let mut physics = Self::new();
        physics.add_wall(Vec2::new(256.0, 0.0), Vec2::new(32.0, 128.0));
        physics.add_wall(Vec2::new(-256.0, 0.0), Vec2::new(32.0, 128.0));
        physics.add_wall(Vec2::new(0.0, 320.0), Vec2::new(160.0, 32.0));
        physics
    }

    fn resolve_circle(&self, mask: u8, mut position: Vec2, radius: f32) -> Vec2 {
        for wall in &self.walls {
            if mask & wall.layer == 0 {
                continue;
            }

            let delta = position - wall.center;
            let overlap_x = wall.half_extents.x + radius - delta.x.abs();
            let overlap_y = wall.half_extents.y + radius - delta.y.abs();
            if overlap_x <= 0.0 || overlap_y <= 0.0 {
                continue;
            }

            if overlap_x < overlap_y {
                position.x += overlap_x.copysign(delta.x);
            } else {
                position.y += overlap_y.copysign(delta.y);
            }
        }
        position
    }
}

impl PhysicsEngine for KinematicPhysics {
    fn move_entity(&self, collider: &Collider, position: Vec2, velocity: Vec2, dt: f32) -> Vec2 {
        let mut next = position + velocity * dt;

        if let ColliderShape::Circle { radius } = collider.shape {
            next = self.resolve_circle(collider.mask, next, radius);
        }

        next.x = next.x.clamp(WORLD_MIN, WORLD_MAX);
        next.y = next.y.clamp(WORLD_MIN, WORLD_MAX);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_collider() -> Collider {
        Collider {
            shape: ColliderShape::Circle { radius: 16.0 },
            layer: LAYER_UNIT,
            mask: LAYER_OBSTACLE,
        }
    }

    #[test]
    fn free_movement_integrates_velocity() {
        let physics = KinematicPhysics::new();
        let next = physics.move_entity(
            &unit_collider(),
            Vec2::ZERO,
            Vec2::new(100.0, 0.0),
            0.1,
        );
        assert_eq!(next, Vec2::new(10.0, 0.0));
    }

    #[test]
    fn circle_is_pushed_out_of_wall() {
        let mut physics = KinematicPhysics::new();
        physics.add_wall(Vec2::new(50.0, 0.0), Vec2::new(10.0, 100.0));

        let next = physics.move_entity(
            &unit_collider(),
            Vec2::new(20.0, 0.0),
            Vec2::new(200.0, 0.0),
            0.1,
        );
        // Left wall face is at x=40; the circle surface must stop there.
        assert!(next.x <= 40.0 - 16.0 + 0.001);
    }

    #[test]
    fn movement_is_clamped_to_world_bounds() {
        let physics = KinematicPhysics::new();
        let next = physics.move_entity(
            &unit_collider(),
            Vec2::new(1020.0, 0.0),
            Vec2::new(1000.0, 0.0),
            1.0,
        );
        assert_eq!(next.x, WORLD_MAX);
    }

    #[test]
    fn mask_gates_collisions() {
        let mut physics = KinematicPhysics::new();
        physics.add_wall(Vec2::new(5.0, 0.0), Vec2::new(10.0, 10.0));

        let ghost = Collider {
            mask: 0,
            ..unit_collider()
        };
        let next = physics.move_entity(&ghost, Vec2::ZERO, Vec2::ZERO, 0.1);
        assert_eq!(next, Vec2::ZERO);
    }
}
