mod buffer;
mod history;

pub use buffer::SnapshotBuffer;
pub use history::SnapshotHistory;

use std::collections::BTreeMap;

use glam::Vec2;

use crate::world::{Entity, EntityId, EntityKind};

/// Wire view of one entity inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityState {
    pub position: Vec2,
    pub velocity: Vec2,
    pub sprite_frame: u8,
    pub state_flags: u8,
    pub kind: EntityKind,
}

impl EntityState {
    pub fn of(entity: &Entity) -> Self {
        Self {
            position: entity.position,
            velocity: entity.velocity,
            sprite_frame: entity.sprite_frame,
            state_flags: entity.state_flags,
            kind: entity.kind,
        }
    }
}

/// The fixed-size prefix of an encoded snapshot, readable without touching
/// the body. The client uses it to pick the decode baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub sequence: u16,
    pub timestamp_ms: u32,
    pub baseline_sequence: u16,
}

/// Authoritative view of the entities visible to one peer at one tick.
///
/// `states` is keyed by entity id; the BTreeMap gives the ascending-id
/// iteration order the codec requires.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub sequence: u16,
    pub timestamp_ms: u32,
    /// 0 means this is a full (keyframe) snapshot.
    pub baseline_sequence: u16,
    /// 0 when the receiving peer controls no entity.
    pub player_entity_id: EntityId,
    pub last_processed_input_tick: u32,
    pub states: BTreeMap<EntityId, EntityState>,
}

impl Snapshot {
    pub fn new(sequence: u16, timestamp_ms: u32) -> Self {
        Self {
            sequence,
            timestamp_ms,
            baseline_sequence: 0,
            player_entity_id: 0,
            last_processed_input_tick: 0,
            states: BTreeMap::new(),
        }
    }

    pub fn is_keyframe(&self) -> bool {
        self.baseline_sequence == 0
    }

    pub fn entity_of(&self, id: EntityId) -> Option<&EntityState> {
        self.states.get(&id)
    }

    /// State of the entity this peer controls, if present in the snapshot.
    pub fn player_state(&self) -> Option<&EntityState> {
        if self.player_entity_id == 0 {
            return None;
        }
        self.states.get(&self.player_entity_id)
    }
}
