mod movement;
mod tick;

pub use movement::{
    facing_flags, step_obstacle, step_player, FLAG_FACING_LEFT, FLAG_MOVING,
    OBSTACLE_ARRIVE_RADIUS, PLAYER_SPEED,
};
pub use tick::FixedTimestep;

use glam::Vec2;

/// One unit of player intent, targeted at a specific simulation tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputCommand {
    pub tick: u32,
    pub direction: Vec2,
    pub timestamp_ms: u32,
}
