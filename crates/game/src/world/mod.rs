mod chunk;
mod entity;
mod interest;

pub use chunk::{world_to_chunk, ChunkCoord, ChunkIndex, CHUNK_SIZE};
pub use entity::{Entity, EntityId, EntityKind, ObstacleLeg, ObstaclePath};
pub use interest::{InterestConfig, InterestManager};

use std::collections::HashMap;
use std::time::Instant;

use glam::Vec2;

/// Authoritative entity arena. Everything else addresses entities by id.
#[derive(Debug)]
pub struct World {
    entities: HashMap<EntityId, Entity>,
    chunks: ChunkIndex,
    next_entity_id: EntityId,
    started: Instant,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            chunks: ChunkIndex::new(),
            next_entity_id: 1,
            started: Instant::now(),
        }
    }

    /// Milliseconds since server start. Wall clock, not tick-derived, so a
    /// stalled-then-recovering tick loop cannot produce time jumps in
    /// broadcast timestamps.
    pub fn timestamp_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    fn insert(&mut self, entity: Entity) -> EntityId {
        let id = entity.id;
        self.chunks.insert(id, entity.chunk);
        self.entities.insert(id, entity);
        id
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    pub fn spawn_player(&mut self, owner_peer: u32, position: Vec2) -> EntityId {
        let id = self.allocate_id();
        self.insert(Entity::player(id, owner_peer, position))
    }

    pub fn spawn_npc(&mut self, position: Vec2) -> EntityId {
        let id = self.allocate_id();
        self.insert(Entity::npc(id, position))
    }

    pub fn spawn_obstacle(&mut self, start: Vec2, end: Vec2, speed: f32) -> EntityId {
        let id = self.allocate_id();
        self.insert(Entity::moving_obstacle(id, start, end, speed))
    }

    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        self.chunks.remove(id, entity.chunk);
        Some(entity)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn chunks(&self) -> &ChunkIndex {
        &self.chunks
    }

    /// Re-derives every entity's chunk from its position and updates the
    /// index for the ones that moved across a boundary. Called once per tick
    /// after physics so index and positions stay atomic per tick.
    pub fn refresh_chunks(&mut self) {
        for entity in self.entities.values_mut() {
            let derived = world_to_chunk(entity.position);
            if derived != entity.chunk {
                self.chunks.relocate(entity.id, entity.chunk, derived);
                entity.chunk = derived;
            }
        }
    }

    /// Position of every live entity, for the lag-compensation history.
    pub fn positions(&self) -> HashMap<EntityId, Vec2> {
        self.entities
            .iter()
            .map(|(&id, e)| (id, e.position))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_registers_in_chunk_index() {
        let mut world = World::new();
        let id = world.spawn_npc(Vec2::new(100.0, 100.0));

        let entity = world.get(id).unwrap();
        assert!(world.chunks().contains(id, entity.chunk));
    }

    #[test]
    fn despawn_clears_chunk_index() {
        let mut world = World::new();
        let id = world.spawn_npc(Vec2::new(100.0, 100.0));
        let chunk = world.get(id).unwrap().chunk;

        world.despawn(id);
        assert!(!world.chunks().contains(id, chunk));
        assert!(world.get(id).is_none());
    }

    #[test]
    fn refresh_chunks_tracks_movement() {
        let mut world = World::new();
        let id = world.spawn_npc(Vec2::new(10.0, 10.0));
        let old_chunk = world.get(id).unwrap().chunk;

        world.get_mut(id).unwrap().position = Vec2::new(200.0, 10.0);
        world.refresh_chunks();

        let entity = world.get(id).unwrap();
        assert_ne!(entity.chunk, old_chunk);
        assert!(world.chunks().contains(id, entity.chunk));
        assert!(!world.chunks().contains(id, old_chunk));
        assert_eq!(entity.chunk, world_to_chunk(entity.position));
    }

    #[test]
    fn entity_ids_are_stable_and_increasing() {
        let mut world = World::new();
        let a = world.spawn_player(1, Vec2::ZERO);
        let b = world.spawn_npc(Vec2::ZERO);
        assert!(b > a);
        world.despawn(a);
        let c = world.spawn_npc(Vec2::ZERO);
        assert!(c > b);
    }
}
