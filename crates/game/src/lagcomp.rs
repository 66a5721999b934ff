//! Lag-compensated hit verification. The server keeps a short ring of world
//! positions per tick and rewinds to the shooter's reported time before
//! running the ray test, so what the shooter saw is what gets judged.

use std::collections::{HashMap, VecDeque};

use glam::Vec2;

use crate::world::EntityId;

/// Radius of the hit circle around every entity, in world units.
pub const HIT_RADIUS: f32 = 16.0;

#[derive(Debug)]
pub struct LagCompensation {
    frames: VecDeque<(u32, HashMap<EntityId, Vec2>)>,
    capacity: usize,
}

impl LagCompensation {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Records the world's positions at `tick` and evicts frames older than
    /// the history window.
    pub fn record(&mut self, tick: u32, positions: HashMap<EntityId, Vec2>) {
        self.frames.push_back((tick, positions));
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    pub fn frame(&self, tick: u32) -> Option<&HashMap<EntityId, Vec2>> {
        self.frames
            .iter()
            .find(|(t, _)| *t == tick)
            .map(|(_, f)| f)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Verifies a shot against the world as it was at `client_time_ms`.
    ///
    /// The reported time maps to a fractional tick; positions are lerped
    /// between the two bracketing frames. When the time is barely outside
    /// the history (a fresh shot racing the ring) the current world stands
    /// in; anything older is rejected outright.
    #[allow(clippy::too_many_arguments)]
    pub fn verify_hit(
        &self,
        origin: Vec2,
        direction: Vec2,
        client_time_ms: u32,
        tick_rate: u32,
        current_tick: u32,
        current_positions: &HashMap<EntityId, Vec2>,
        shooter: EntityId,
        hit_radius: f32,
    ) -> Option<EntityId> {
        let direction = direction.normalize_or_zero();
        if direction == Vec2::ZERO {
            return None;
        }

        let t_float = client_time_ms as f64 * tick_rate as f64 / 1000.0;
        let t0 = t_float.floor() as u32;
        let alpha = (t_float - t0 as f64) as f32;

        if let Some(frame0) = self.frame(t0) {
            let frame1 = self.frame(t0 + 1);
            let mut best: Option<(f32, EntityId)> = None;
            for (&id, &pos0) in frame0 {
                if id == shooter {
                    continue;
                }
                let pos1 = frame1.and_then(|f| f.get(&id)).copied().unwrap_or(pos0);
                let pos = pos0.lerp(pos1, alpha);
                if let Some(t) = ray_circle(origin, direction, pos, hit_radius) {
                    if best.map_or(true, |(bt, _)| t < bt) {
                        best = Some((t, id));
                    }
                }
            }
            return best.map(|(_, id)| id);
        }

        // Reported time not in history. Tolerate a near-miss against the
        // ring edge with a present-time raycast; reject anything older.
        if (t0 as i64 - current_tick as i64).abs() < 2 {
            let mut best: Option<(f32, EntityId)> = None;
            for (&id, &pos) in current_positions {
                if id == shooter {
                    continue;
                }
                if let Some(t) = ray_circle(origin, direction, pos, hit_radius) {
                    if best.map_or(true, |(bt, _)| t < bt) {
                        best = Some((t, id));
                    }
                }
            }
            return best.map(|(_, id)| id);
        }

        None
    }
}

/// Smallest non-negative ray parameter where the ray hits the circle, if any.
/// `direction` must be unit length.
fn ray_circle(origin: Vec2, direction: Vec2, center: Vec2, radius: f32) -> Option<f32> {
    let oc = origin - center;
    let b = oc.dot(direction);
    let c = oc.length_squared() - radius * radius;
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }

    let sqrt_d = discriminant.sqrt();
    let near = -b - sqrt_d;
    if near >= 0.0 {
        return Some(near);
    }
    let far = -b + sqrt_d;
    (far >= 0.0).then_some(far)
}
