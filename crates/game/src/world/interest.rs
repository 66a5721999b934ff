use std::collections::{HashMap, HashSet};

use glam::Vec2;

use super::chunk::world_to_chunk;
use super::entity::EntityId;
use super::World;

#[derive(Debug, Clone)]
pub struct InterestConfig {
    /// Chunk radius of the visibility square around the peer's player.
    pub radius_chunks: i32,
    /// Hard cap on entities per snapshot before MTU budgeting.
    pub max_entities: usize,
    /// Score bonus (units²) for entities already visible, suppressing
    /// flicker at the visibility edge.
    pub hysteresis_bonus: f32,
}

impl Default for InterestConfig {
    fn default() -> Self {
        Self {
            radius_chunks: 2,
            max_entities: 100,
            hysteresis_bonus: 10_000.0,
        }
    }
}

/// Decides which entities each peer gets to see.
///
/// Selection is deterministic: candidates come out of the chunk index in
/// ascending id order and distance ties break by ascending id, so the same
/// world state always yields the same visible set.
#[derive(Debug, Default)]
pub struct InterestManager {
    config: InterestConfig,
    visible: HashMap<u32, HashSet<EntityId>>,
}

impl InterestManager {
    pub fn new(config: InterestConfig) -> Self {
        Self {
            config,
            visible: HashMap::new(),
        }
    }

    /// Selects the visible set for one peer. The peer's own player entity is
    /// always included and always first. `budget` further caps the set below
    /// `max_entities` (the caller derives it from the MTU).
    ///
    /// The returned list is ordered player-first, then by ascending interest
    /// score, so truncating from the back always drops the least relevant
    /// entities.
    pub fn select_visible(
        &mut self,
        peer_id: u32,
        player_id: EntityId,
        center: Vec2,
        world: &World,
        budget: usize,
    ) -> Vec<EntityId> {
        let budget = budget.min(self.config.max_entities).max(1);
        let candidates = world
            .chunks()
            .collect_square(world_to_chunk(center), self.config.radius_chunks);

        let previously = self.visible.entry(peer_id).or_default();

        let mut scored: Vec<(f32, EntityId)> = Vec::with_capacity(candidates.len());
        for id in candidates {
            if id == player_id {
                continue;
            }
            let Some(entity) = world.get(id) else {
                continue;
            };
            let mut score = entity.position.distance_squared(center);
            if previously.contains(&id) {
                score -= self.config.hysteresis_bonus;
            }
            scored.push((score, id));
        }

        let mut selected = Vec::with_capacity(scored.len() + 1);
        selected.push(player_id);

        if scored.len() + 1 > budget {
            scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            scored.truncate(budget - 1);
        }
        selected.extend(scored.iter().map(|(_, id)| *id));

        *previously = selected.iter().copied().collect();
        selected
    }

    pub fn forget_peer(&mut self, peer_id: u32) {
        self.visible.remove(&peer_id);
    }

    pub fn config(&self) -> &InterestConfig {
        &self.config
    }
}
