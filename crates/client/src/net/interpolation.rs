use std::collections::{HashMap, HashSet};

use glam::Vec2;

use skirmish::snapshot::{EntityState, Snapshot, SnapshotBuffer};
use skirmish::world::{EntityId, EntityKind};

/// Error band inside which render time tracks without rate adjustment.
const TIME_DEADBAND_MS: f64 = 10.0;
/// How hard render time leans toward its target, per second of error.
const TIME_GAIN: f64 = 0.5 / 1000.0;
const MIN_TIME_SCALE: f64 = 0.90;
const MAX_TIME_SCALE: f64 = 1.10;
/// How long a vanished entity is held before it is dropped from the view.
const LEAVE_GRACE_MS: f64 = 500.0;

#[derive(Debug, Clone)]
pub struct InterpolationConfig {
    pub interpolation_delay_ms: f64,
    pub jitter_buffer_ms: f64,
    pub snapshot_rate: u32,
}

impl InterpolationConfig {
    pub fn total_delay_ms(&self) -> f64 {
        self.interpolation_delay_ms + self.jitter_buffer_ms
    }

    fn snapshot_period_ms(&self) -> f64 {
        1000.0 / self.snapshot_rate as f64
    }
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            interpolation_delay_ms: 100.0,
            jitter_buffer_ms: 50.0,
            snapshot_rate: skirmish::DEFAULT_SNAPSHOT_RATE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InterpolatedEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec2,
    pub velocity: Vec2,
    pub sprite_frame: u8,
    pub state_flags: u8,
}

#[derive(Debug, Clone, Copy)]
struct TrackedEntity {
    entity: InterpolatedEntity,
    last_seen_ms: f64,
}

/// Renders the remote world a fixed delay behind the server, blending
/// between buffered snapshots with Hermite interpolation. Never
/// extrapolates: when render time catches the newest snapshot it holds
/// there until more data arrives.
#[derive(Debug)]
pub struct Interpolator {
    config: InterpolationConfig,
    render_time_ms: f64,
    initialized: bool,
    entities: HashMap<EntityId, TrackedEntity>,
}

impl Interpolator {
    pub fn new(config: InterpolationConfig) -> Self {
        // A delay shorter than one snapshot period guarantees buffer
        // under-run: there would never be two snapshots to blend between.
        assert!(
            config.total_delay_ms() >= config.snapshot_period_ms() + config.jitter_buffer_ms,
            "total client delay must cover at least one snapshot period plus jitter"
        );

        Self {
            config,
            render_time_ms: 0.0,
            initialized: false,
            entities: HashMap::new(),
        }
    }

    /// Anchors the render clock the first time a snapshot arrives.
    pub fn on_snapshot(&mut self, snapshot: &Snapshot) {
        if !self.initialized {
            self.render_time_ms = snapshot.timestamp_ms as f64 - self.config.total_delay_ms();
            self.initialized = true;
        }
    }

    /// Advances render time by `dt`, slewed toward the target derived from
    /// the synchronized server clock, then re-samples entity states.
    pub fn advance(&mut self, dt_secs: f32, server_now_ms: Option<f64>, buffer: &SnapshotBuffer) {
        if !self.initialized || buffer.is_empty() {
            return;
        }

        let mut time_scale = 1.0;
        if let Some(now) = server_now_ms {
            let target = now - self.config.total_delay_ms();
            let error = target - self.render_time_ms;
            if error.abs() > TIME_DEADBAND_MS {
                time_scale = (1.0 + error * TIME_GAIN).clamp(MIN_TIME_SCALE, MAX_TIME_SCALE);
            }
        }

        self.render_time_ms += dt_secs as f64 * 1000.0 * time_scale;
        if let Some(latest) = buffer.latest() {
            self.render_time_ms = self.render_time_ms.min(latest.timestamp_ms as f64);
        }

        self.sample(buffer);
    }

    fn sample(&mut self, buffer: &SnapshotBuffer) {
        let Some((from, to)) = buffer.bracketing(self.render_time_ms) else {
            return;
        };

        let span = to.timestamp_ms as f64 - from.timestamp_ms as f64;
        let t = if span > 0.0 {
            (((self.render_time_ms - from.timestamp_ms as f64) / span) as f32).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let dt_snap = 1.0 / self.config.snapshot_rate as f32;

        let mut union: HashSet<EntityId> = from.states.keys().copied().collect();
        union.extend(to.states.keys().copied());

        for id in union {
            let entity = match (from.states.get(&id), to.states.get(&id)) {
                (Some(a), Some(b)) => blend_states(id, a, b, t, dt_snap),
                // Entering the interest set: snap to the incoming state.
                (None, Some(b)) => materialize(id, b),
                // Leaving: hold the last state the server gave us.
                (Some(a), None) => materialize(id, a),
                (None, None) => unreachable!(),
            };
            self.entities.insert(
                id,
                TrackedEntity {
                    entity,
                    last_seen_ms: self.render_time_ms,
                },
            );
        }

        let cutoff = self.render_time_ms - LEAVE_GRACE_MS;
        self.entities.retain(|_, tracked| tracked.last_seen_ms >= cutoff);
    }

    pub fn entity(&self, id: EntityId) -> Option<&InterpolatedEntity> {
        self.entities.get(&id).map(|t| &t.entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = &InterpolatedEntity> {
        self.entities.values().map(|t| &t.entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn render_time_ms(&self) -> f64 {
        self.render_time_ms
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn reset(&mut self) {
        self.render_time_ms = 0.0;
        self.initialized = false;
        self.entities.clear();
    }
}

fn materialize(id: EntityId, state: &EntityState) -> InterpolatedEntity {
    InterpolatedEntity {
        id,
        kind: state.kind,
        position: state.position,
        velocity: state.velocity,
        sprite_frame: state.sprite_frame,
        state_flags: state.state_flags,
    }
}

fn blend_states(
    id: EntityId,
    from: &EntityState,
    to: &EntityState,
    t: f32,
    dt_snap: f32,
) -> InterpolatedEntity {
    let position = hermite(from.position, from.velocity, to.position, to.velocity, t, dt_snap);
    let velocity = from.velocity.lerp(to.velocity, t);
    let discrete = if t < 0.5 { from } else { to };

    InterpolatedEntity {
        id,
        kind: discrete.kind,
        position,
        velocity,
        sprite_frame: discrete.sprite_frame,
        state_flags: discrete.state_flags,
    }
}

/// Cubic Hermite blend using the snapshot velocities as tangents scaled by
/// the snapshot period.
fn hermite(p0: Vec2, v0: Vec2, p1: Vec2, v1: Vec2, t: f32, dt_snap: f32) -> Vec2 {
    let t2 = t * t;
    let t3 = t2 * t;

    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;

    p0 * h00 + v0 * (h10 * dt_snap) + p1 * h01 + v1 * (h11 * dt_snap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skirmish::world::EntityKind;

    fn snapshot(sequence: u16, timestamp_ms: u32, entities: &[(EntityId, Vec2, Vec2)]) -> Snapshot {
        let mut snap = Snapshot::new(sequence, timestamp_ms);
        for &(id, position, velocity) in entities {
            snap.states.insert(
                id,
                EntityState {
                    position,
                    velocity,
                    sprite_frame: 0,
                    state_flags: 0,
                    kind: EntityKind::Npc,
                },
            );
        }
        snap
    }

    fn ten_hz_config() -> InterpolationConfig {
        InterpolationConfig {
            interpolation_delay_ms: 100.0,
            jitter_buffer_ms: 50.0,
            snapshot_rate: 10,
        }
    }

    #[test]
    #[should_panic(expected = "total client delay")]
    fn underrun_prone_delay_is_rejected() {
        // 75 ms total against a 100 ms snapshot period.
        Interpolator::new(InterpolationConfig {
            interpolation_delay_ms: 25.0,
            jitter_buffer_ms: 50.0,
            snapshot_rate: 10,
        });
    }

    #[test]
    fn constant_velocity_interpolates_linearly() {
        // Entity moving at 100 u/s sampled at 10 Hz: x=0 at t=0, x=10 at
        // t=100 ms. Halfway through, the render position must be 5.
        let mut buffer = SnapshotBuffer::new(8);
        let vel = Vec2::new(100.0, 0.0);
        buffer.insert(snapshot(1, 0, &[(1, Vec2::ZERO, vel)]));
        buffer.insert(snapshot(2, 100, &[(1, Vec2::new(10.0, 0.0), vel)]));

        let mut interp = Interpolator::new(ten_hz_config());
        interp.on_snapshot(buffer.get(1).unwrap());
        interp.render_time_ms = 50.0;
        interp.sample(&buffer);

        let entity = interp.entity(1).unwrap();
        assert!((entity.position.x - 5.0).abs() < 0.01, "{}", entity.position.x);
        assert!((entity.velocity - vel).length() < 0.001);
    }

    #[test]
    fn hermite_basis_endpoints_are_exact() {
        let p0 = Vec2::new(3.0, -2.0);
        let p1 = Vec2::new(-7.0, 4.0);
        let v = Vec2::new(50.0, 20.0);
        assert_eq!(hermite(p0, v, p1, v, 0.0, 0.1), p0);
        assert_eq!(hermite(p0, v, p1, v, 1.0, 0.1), p1);
    }

    #[test]
    fn render_time_never_passes_latest_snapshot() {
        let mut buffer = SnapshotBuffer::new(8);
        buffer.insert(snapshot(1, 0, &[(1, Vec2::ZERO, Vec2::ZERO)]));
        buffer.insert(snapshot(2, 100, &[(1, Vec2::new(10.0, 0.0), Vec2::ZERO)]));

        let mut interp = Interpolator::new(ten_hz_config());
        interp.on_snapshot(buffer.get(1).unwrap());

        // A huge frame delta would overshoot; the clamp holds at 100 ms.
        interp.advance(10.0, None, &buffer);
        assert_eq!(interp.render_time_ms(), 100.0);

        // Held at the latest snapshot's exact state.
        let entity = interp.entity(1).unwrap();
        assert!((entity.position.x - 10.0).abs() < 0.001);
    }

    #[test]
    fn time_scale_stays_in_band() {
        let mut buffer = SnapshotBuffer::new(8);
        buffer.insert(snapshot(1, 0, &[(1, Vec2::ZERO, Vec2::ZERO)]));
        buffer.insert(snapshot(2, 10_000, &[(1, Vec2::ZERO, Vec2::ZERO)]));

        let mut interp = Interpolator::new(ten_hz_config());
        interp.on_snapshot(buffer.get(1).unwrap());
        let start = interp.render_time_ms();

        // Target far ahead: scale must cap at 1.1x.
        interp.advance(1.0, Some(20_000.0), &buffer);
        let advanced = interp.render_time_ms() - start;
        assert!(advanced <= 1_100.0 + 0.001, "advanced {advanced}");
        assert!(advanced >= 1_000.0);
    }

    #[test]
    fn entering_entity_snaps_leaving_entity_holds() {
        let mut buffer = SnapshotBuffer::new(8);
        buffer.insert(snapshot(
            1,
            0,
            &[(1, Vec2::ZERO, Vec2::ZERO), (2, Vec2::new(5.0, 5.0), Vec2::ZERO)],
        ));
        buffer.insert(snapshot(
            2,
            100,
            &[(1, Vec2::ZERO, Vec2::ZERO), (3, Vec2::new(9.0, 9.0), Vec2::ZERO)],
        ));

        let mut interp = Interpolator::new(ten_hz_config());
        interp.on_snapshot(buffer.get(1).unwrap());
        interp.render_time_ms = 50.0;
        interp.sample(&buffer);

        // Entity 2 left `to`, holds its last position; entity 3 entered,
        // snaps to the incoming state.
        assert_eq!(interp.entity(2).unwrap().position, Vec2::new(5.0, 5.0));
        assert_eq!(interp.entity(3).unwrap().position, Vec2::new(9.0, 9.0));
    }

    #[test]
    fn absent_entities_expire_after_grace() {
        let mut buffer = SnapshotBuffer::new(8);
        buffer.insert(snapshot(1, 0, &[(2, Vec2::new(5.0, 5.0), Vec2::ZERO)]));
        buffer.insert(snapshot(2, 100, &[(2, Vec2::new(5.0, 5.0), Vec2::ZERO)]));

        let mut interp = Interpolator::new(ten_hz_config());
        interp.on_snapshot(buffer.get(1).unwrap());
        interp.render_time_ms = 50.0;
        interp.sample(&buffer);
        assert!(interp.entity(2).is_some());

        // Later snapshots no longer mention entity 2.
        buffer.insert(snapshot(3, 700, &[(1, Vec2::ZERO, Vec2::ZERO)]));
        buffer.insert(snapshot(4, 800, &[(1, Vec2::ZERO, Vec2::ZERO)]));
        interp.render_time_ms = 750.0;
        interp.sample(&buffer);

        assert!(interp.entity(2).is_none());
        assert!(interp.entity(1).is_some());
    }

    #[test]
    fn discrete_fields_switch_at_the_midpoint() {
        let mut from_state = EntityState {
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            sprite_frame: 1,
            state_flags: 0,
            kind: EntityKind::Npc,
        };
        let to_state = EntityState {
            sprite_frame: 7,
            ..from_state
        };
        from_state.sprite_frame = 1;

        assert_eq!(blend_states(1, &from_state, &to_state, 0.4, 0.1).sprite_frame, 1);
        assert_eq!(blend_states(1, &from_state, &to_state, 0.6, 0.1).sprite_frame, 7);
    }
}
