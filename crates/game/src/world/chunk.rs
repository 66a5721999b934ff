use std::collections::{BTreeSet, HashMap};

use glam::Vec2;

use super::entity::EntityId;

/// Spatial granularity of the interest grid, in world units.
pub const CHUNK_SIZE: f32 = 64.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
}

impl ChunkCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

pub fn world_to_chunk(position: Vec2) -> ChunkCoord {
    ChunkCoord {
        x: (position.x / CHUNK_SIZE).floor() as i32,
        y: (position.y / CHUNK_SIZE).floor() as i32,
    }
}

/// Maps chunk coordinates to the entities inside them. Ordered sets keep
/// visibility collection deterministic across runs.
#[derive(Debug, Default)]
pub struct ChunkIndex {
    chunks: HashMap<ChunkCoord, BTreeSet<EntityId>>,
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: EntityId, chunk: ChunkCoord) {
        self.chunks.entry(chunk).or_default().insert(id);
    }

    pub fn remove(&mut self, id: EntityId, chunk: ChunkCoord) {
        if let Some(set) = self.chunks.get_mut(&chunk) {
            set.remove(&id);
            if set.is_empty() {
                self.chunks.remove(&chunk);
            }
        }
    }

    pub fn relocate(&mut self, id: EntityId, from: ChunkCoord, to: ChunkCoord) {
        if from == to {
            return;
        }
        self.remove(id, from);
        self.insert(id, to);
    }

    pub fn contains(&self, id: EntityId, chunk: ChunkCoord) -> bool {
        self.chunks.get(&chunk).is_some_and(|set| set.contains(&id))
    }

    /// Entities in the `(2·radius+1)²` square of chunks around `center`,
    /// in ascending id order per chunk.
    pub fn collect_square(&self, center: ChunkCoord, radius: i32) -> Vec<EntityId> {
        let mut out = Vec::new();
        for cy in (center.y - radius)..=(center.y + radius) {
            for cx in (center.x - radius)..=(center.x + radius) {
                if let Some(set) = self.chunks.get(&ChunkCoord::new(cx, cy)) {
                    out.extend(set.iter().copied());
                }
            }
        }
        out
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}
