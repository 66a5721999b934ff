use glam::Vec2;

use crate::physics::{Collider, PhysicsEngine};
use crate::world::Entity;

/// Player ground speed in world units per second.
pub const PLAYER_SPEED: f32 = 96.0;
/// Distance at which a patrolling obstacle flips to its other endpoint.
pub const OBSTACLE_ARRIVE_RADIUS: f32 = 10.0;

pub const FLAG_MOVING: u8 = 1 << 0;
pub const FLAG_FACING_LEFT: u8 = 1 << 1;

/// The shared motion rule. Server input application and client prediction
/// both go through here, so a prediction divergence can only come from
/// packet loss, never from drifting math.
pub fn step_player(
    physics: &dyn PhysicsEngine,
    collider: &Collider,
    position: Vec2,
    direction: Vec2,
    dt: f32,
) -> (Vec2, Vec2) {
    let velocity = direction.normalize_or_zero() * PLAYER_SPEED;
    let resolved = physics.move_entity(collider, position, velocity, dt);
    (resolved, velocity)
}

/// Facing/misc bits derived from movement, preserving the previous facing
/// while standing still.
pub fn facing_flags(direction: Vec2, previous: u8) -> u8 {
    if direction.length_squared() < 1e-6 {
        return previous & !FLAG_MOVING;
    }
    let mut flags = FLAG_MOVING;
    if direction.x < 0.0 {
        flags |= FLAG_FACING_LEFT;
    } else if direction.x == 0.0 {
        flags |= previous & FLAG_FACING_LEFT;
    }
    flags
}

/// Advances a scripted obstacle along its ping-pong patrol.
pub fn step_obstacle(entity: &mut Entity, dt: f32) {
    let Some(mut path) = entity.path else {
        return;
    };

    let target = path.target();
    let to_target = target - entity.position;
    if to_target.length() < OBSTACLE_ARRIVE_RADIUS {
        path.reverse();
    }

    let direction = (path.target() - entity.position).normalize_or_zero();
    entity.velocity = direction * path.speed;
    entity.position += entity.velocity * dt;
    entity.path = Some(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::KinematicPhysics;
    use crate::world::{Entity, ObstacleLeg};

    #[test]
    fn zero_input_means_zero_velocity() {
        let physics = KinematicPhysics::new();
        let entity = Entity::player(1, 1, Vec2::ZERO);
        let (pos, vel) = step_player(&physics, &entity.collider, Vec2::ZERO, Vec2::ZERO, 0.05);
        assert_eq!(pos, Vec2::ZERO);
        assert_eq!(vel, Vec2::ZERO);
    }

    #[test]
    fn diagonal_input_is_normalized() {
        let physics = KinematicPhysics::new();
        let entity = Entity::player(1, 1, Vec2::ZERO);
        let (_, vel) = step_player(
            &physics,
            &entity.collider,
            Vec2::ZERO,
            Vec2::new(1.0, 1.0),
            0.05,
        );
        assert!((vel.length() - PLAYER_SPEED).abs() < 0.001);
    }

    #[test]
    fn oversized_input_cannot_exceed_player_speed() {
        let physics = KinematicPhysics::new();
        let entity = Entity::player(1, 1, Vec2::ZERO);
        let (_, vel) = step_player(
            &physics,
            &entity.collider,
            Vec2::ZERO,
            Vec2::new(5_000.0, 0.0),
            0.05,
        );
        assert!((vel.length() - PLAYER_SPEED).abs() < 0.001);
    }

    #[test]
    fn obstacle_ping_pongs_between_endpoints() {
        let mut entity =
            Entity::moving_obstacle(1, Vec2::ZERO, Vec2::new(100.0, 0.0), 50.0);

        let mut steps = 0;
        while entity.path.unwrap().leg == ObstacleLeg::GoingToEnd {
            step_obstacle(&mut entity, 0.05);
            steps += 1;
            assert!(steps < 100, "never reached the far endpoint");
        }
        assert!(entity.position.x > 85.0);
        assert!(entity.velocity.x < 0.0);

        while entity.path.unwrap().leg == ObstacleLeg::GoingToStart {
            step_obstacle(&mut entity, 0.05);
            steps += 1;
            assert!(steps < 200, "never returned");
        }
        assert!(entity.position.x < 15.0);
    }

    #[test]
    fn facing_flags_track_direction() {
        assert_eq!(
            facing_flags(Vec2::new(-1.0, 0.0), 0),
            FLAG_MOVING | FLAG_FACING_LEFT
        );
        assert_eq!(facing_flags(Vec2::new(1.0, 0.0), FLAG_FACING_LEFT), FLAG_MOVING);
        // Standing still keeps facing, drops the moving bit.
        assert_eq!(
            facing_flags(Vec2::ZERO, FLAG_MOVING | FLAG_FACING_LEFT),
            FLAG_FACING_LEFT
        );
    }
}
