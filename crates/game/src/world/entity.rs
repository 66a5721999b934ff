use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::chunk::{world_to_chunk, ChunkCoord};
use crate::physics::{Collider, ColliderShape, LAYER_OBSTACLE, LAYER_UNIT};

pub type EntityId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum EntityKind {
    #[default]
    Player = 0,
    Npc = 1,
    MovingObstacle = 2,
}

impl From<u8> for EntityKind {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Player,
            1 => Self::Npc,
            2 => Self::MovingObstacle,
            _ => Self::Npc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObstacleLeg {
    GoingToEnd,
    GoingToStart,
}

/// Ping-pong patrol between two endpoints for scripted obstacles.
#[derive(Debug, Clone, Copy)]
pub struct ObstaclePath {
    pub start: Vec2,
    pub end: Vec2,
    pub speed: f32,
    pub leg: ObstacleLeg,
}

impl ObstaclePath {
    pub fn target(&self) -> Vec2 {
        match self.leg {
            ObstacleLeg::GoingToEnd => self.end,
            ObstacleLeg::GoingToStart => self.start,
        }
    }

    pub fn reverse(&mut self) {
        self.leg = match self.leg {
            ObstacleLeg::GoingToEnd => ObstacleLeg::GoingToStart,
            ObstacleLeg::GoingToStart => ObstacleLeg::GoingToEnd,
        };
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec2,
    pub velocity: Vec2,
    pub sprite_frame: u8,
    pub state_flags: u8,
    /// Derived from `position`; kept in lockstep with the chunk index by
    /// `World::refresh_chunks` once per tick.
    pub chunk: ChunkCoord,
    pub owner_peer: Option<u32>,
    pub collider: Collider,
    pub path: Option<ObstaclePath>,
}

impl Entity {
    pub fn player(id: EntityId, owner_peer: u32, position: Vec2) -> Self {
        Self {
            id,
            kind: EntityKind::Player,
            position,
            velocity: Vec2::ZERO,
            sprite_frame: 0,
            state_flags: 0,
            chunk: world_to_chunk(position),
            owner_peer: Some(owner_peer),
            collider: Collider {
                shape: ColliderShape::Circle { radius: 16.0 },
                layer: LAYER_UNIT,
                mask: LAYER_OBSTACLE,
            },
            path: None,
        }
    }

    pub fn npc(id: EntityId, position: Vec2) -> Self {
        Self {
            id,
            kind: EntityKind::Npc,
            position,
            velocity: Vec2::ZERO,
            sprite_frame: 0,
            state_flags: 0,
            chunk: world_to_chunk(position),
            owner_peer: None,
            collider: Collider {
                shape: ColliderShape::Circle { radius: 16.0 },
                layer: LAYER_UNIT,
                mask: LAYER_OBSTACLE,
            },
            path: None,
        }
    }

    pub fn moving_obstacle(id: EntityId, start: Vec2, end: Vec2, speed: f32) -> Self {
        Self {
            id,
            kind: EntityKind::MovingObstacle,
            position: start,
            velocity: Vec2::ZERO,
            sprite_frame: 0,
            state_flags: 0,
            chunk: world_to_chunk(start),
            owner_peer: None,
            collider: Collider {
                shape: ColliderShape::Aabb {
                    half_extents: Vec2::splat(24.0),
                },
                layer: LAYER_OBSTACLE,
                mask: 0,
            },
            path: Some(ObstaclePath {
                start,
                end,
                speed,
                leg: ObstacleLeg::GoingToEnd,
            }),
        }
    }
}
