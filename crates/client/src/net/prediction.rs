use std::collections::VecDeque;

use glam::Vec2;

use skirmish::simulation::{step_player, InputCommand};
use skirmish::snapshot::EntityState;
use skirmish::{Collider, ColliderShape, KinematicPhysics};

#[derive(Debug, Clone)]
pub struct PredictionConfig {
    pub tick_rate: u32,
    /// Predicted-vs-server divergence (world units) beyond which the client
    /// snaps to the server position and replays its inputs.
    pub reconcile_threshold: f32,
    /// Input/predicted history depth in ticks; must cover at least the
    /// round trip, two seconds is comfortable.
    pub history_ticks: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        let tick_rate = skirmish::DEFAULT_TICK_RATE;
        Self {
            tick_rate,
            reconcile_threshold: 2.0,
            history_ticks: tick_rate as usize * 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PredictedState {
    pub tick: u32,
    pub position: Vec2,
    pub velocity: Vec2,
}

/// Client-side movement prediction for the local player.
///
/// Applies the same motion rule as the server every client tick, remembers
/// what it did, and corrects itself when an authoritative snapshot
/// disagrees: snap to the server position for the confirmed tick, then
/// replay every input the server has not seen yet.
pub struct PredictionController {
    config: PredictionConfig,
    physics: KinematicPhysics,
    collider: Collider,
    position: Vec2,
    velocity: Vec2,
    inputs: VecDeque<InputCommand>,
    predicted: VecDeque<PredictedState>,
    last_tick: u32,
    reconcile_snaps: u64,
}

impl PredictionController {
    pub fn new(config: PredictionConfig, physics: KinematicPhysics) -> Self {
        let capacity = config.history_ticks;
        Self {
            config,
            physics,
            collider: Collider {
                shape: ColliderShape::Circle { radius: 16.0 },
                layer: skirmish::physics::LAYER_UNIT,
                mask: skirmish::physics::LAYER_OBSTACLE,
            },
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            inputs: VecDeque::with_capacity(capacity),
            predicted: VecDeque::with_capacity(capacity),
            last_tick: 0,
            reconcile_snaps: 0,
        }
    }

    /// Runs one predicted tick with the given (already wire-quantized)
    /// input direction.
    pub fn tick(&mut self, tick: u32, direction: Vec2, timestamp_ms: u32) {
        let dt = 1.0 / self.config.tick_rate as f32;
        let (position, velocity) =
            step_player(&self.physics, &self.collider, self.position, direction, dt);
        self.position = position;
        self.velocity = velocity;
        self.last_tick = tick;

        self.push_bounded_input(InputCommand {
            tick,
            direction,
            timestamp_ms,
        });
        self.push_bounded_predicted(PredictedState {
            tick,
            position,
            velocity,
        });
    }

    fn push_bounded_input(&mut self, command: InputCommand) {
        if self.inputs.len() >= self.config.history_ticks {
            self.inputs.pop_front();
        }
        self.inputs.push_back(command);
    }

    fn push_bounded_predicted(&mut self, state: PredictedState) {
        if self.predicted.len() >= self.config.history_ticks {
            self.predicted.pop_front();
        }
        self.predicted.push_back(state);
    }

    /// Reconciles against the authoritative state for `server_tick`.
    /// Returns the divergence that was observed at that tick.
    pub fn reconcile(&mut self, server_state: &EntityState, server_tick: u32) -> f32 {
        let predicted_at = self
            .predicted
            .iter()
            .find(|p| p.tick == server_tick)
            .copied();

        let Some(predicted_at) = predicted_at else {
            // No local record of that tick (just spawned, or history
            // outrun): adopt the server state wholesale.
            self.position = server_state.position;
            self.velocity = server_state.velocity;
            self.evict_through(server_tick);
            return 0.0;
        };

        let error = (predicted_at.position - server_state.position).length();
        if error > self.config.reconcile_threshold {
            self.reconcile_snaps += 1;
            self.replay_from(server_state, server_tick);
        }

        self.evict_through(server_tick);
        error
    }

    /// Snap to the server's position for the confirmed tick, then re-apply
    /// every later input in order, overwriting the predicted entries.
    fn replay_from(&mut self, server_state: &EntityState, server_tick: u32) {
        let dt = 1.0 / self.config.tick_rate as f32;
        let mut position = server_state.position;
        let mut velocity = server_state.velocity;

        let replay: Vec<InputCommand> = self
            .inputs
            .iter()
            .filter(|c| c.tick > server_tick)
            .copied()
            .collect();

        for command in replay {
            let (next_position, next_velocity) =
                step_player(&self.physics, &self.collider, position, command.direction, dt);
            position = next_position;
            velocity = next_velocity;

            if let Some(entry) = self.predicted.iter_mut().find(|p| p.tick == command.tick) {
                entry.position = position;
                entry.velocity = velocity;
            }
        }

        self.position = position;
        self.velocity = velocity;
    }

    fn evict_through(&mut self, server_tick: u32) {
        while self.inputs.front().is_some_and(|c| c.tick <= server_tick) {
            self.inputs.pop_front();
        }
        while self.predicted.front().is_some_and(|p| p.tick <= server_tick) {
            self.predicted.pop_front();
        }
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    pub fn last_tick(&self) -> u32 {
        self.last_tick
    }

    pub fn pending_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn reconcile_snaps(&self) -> u64 {
        self.reconcile_snaps
    }

    pub fn reset(&mut self) {
        self.position = Vec2::ZERO;
        self.velocity = Vec2::ZERO;
        self.inputs.clear();
        self.predicted.clear();
        self.last_tick = 0;
        self.reconcile_snaps = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skirmish::world::EntityKind;
    use skirmish::PLAYER_SPEED;

    fn controller() -> PredictionController {
        PredictionController::new(
            PredictionConfig {
                tick_rate: 20,
                reconcile_threshold: 2.0,
                history_ticks: 40,
            },
            KinematicPhysics::new(),
        )
    }

    fn server_state(position: Vec2, velocity: Vec2) -> EntityState {
        EntityState {
            position,
            velocity,
            sprite_frame: 0,
            state_flags: 0,
            kind: EntityKind::Player,
        }
    }

    #[test]
    fn agreement_makes_reconcile_a_no_op() {
        let mut prediction = controller();
        let dt = 1.0 / 20.0;
        let dir = Vec2::new(1.0, 0.0);

        let mut expected = Vec2::ZERO;
        for tick in 1..=5 {
            prediction.tick(tick, dir, tick * 50);
            expected.x += PLAYER_SPEED * dt;
        }

        // The server confirms tick 3 exactly where we predicted it.
        let at_tick_3 = Vec2::new(PLAYER_SPEED * dt * 3.0, 0.0);
        let error = prediction.reconcile(
            &server_state(at_tick_3, dir * PLAYER_SPEED),
            3,
        );

        assert!(error < 1e-4);
        assert!((prediction.position() - expected).length() < 1e-4);
        // Confirmed history is gone.
        assert_eq!(prediction.pending_inputs(), 2);
        assert_eq!(prediction.reconcile_snaps(), 0);
    }

    #[test]
    fn misprediction_snaps_and_replays() {
        let mut prediction = controller();
        let dt = 1.0 / 20.0;
        let step = PLAYER_SPEED * dt;

        // Inputs over ticks 1..=5: right, right, idle, left, left.
        let dirs = [
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::ZERO,
            Vec2::new(-1.0, 0.0),
            Vec2::new(-1.0, 0.0),
        ];
        for (i, dir) in dirs.iter().enumerate() {
            prediction.tick(i as u32 + 1, *dir, 0);
        }

        // Server confirms tick 1 three units left of our prediction.
        let server_x = step - 3.0;
        prediction.reconcile(&server_state(Vec2::new(server_x, 0.0), Vec2::ZERO), 1);

        // Replay of ticks 2..=5 from the corrected base: +step, 0, -step,
        // -step.
        let expected_x = server_x + step - step - step;
        assert!(
            (prediction.position().x - expected_x).abs() < 1e-3,
            "got {} want {expected_x}",
            prediction.position().x
        );
        assert_eq!(prediction.reconcile_snaps(), 1);
    }

    #[test]
    fn sub_threshold_error_is_left_alone() {
        let mut prediction = controller();
        prediction.tick(1, Vec2::new(1.0, 0.0), 0);
        let predicted = prediction.position();

        // Server is half a unit off: inside the threshold, no snap.
        let off = predicted - Vec2::new(0.5, 0.0);
        let error = prediction.reconcile(&server_state(off, Vec2::ZERO), 1);

        assert!((error - 0.5).abs() < 1e-4);
        assert_eq!(prediction.position(), predicted);
        assert_eq!(prediction.reconcile_snaps(), 0);
    }

    #[test]
    fn unknown_tick_adopts_server_state() {
        let mut prediction = controller();
        // No local history at all.
        let error = prediction.reconcile(
            &server_state(Vec2::new(40.0, -7.0), Vec2::ZERO),
            100,
        );
        assert_eq!(error, 0.0);
        assert_eq!(prediction.position(), Vec2::new(40.0, -7.0));
    }

    #[test]
    fn history_is_bounded() {
        let mut prediction = PredictionController::new(
            PredictionConfig {
                tick_rate: 20,
                reconcile_threshold: 2.0,
                history_ticks: 8,
            },
            KinematicPhysics::new(),
        );

        for tick in 1..=100 {
            prediction.tick(tick, Vec2::new(0.0, 1.0), 0);
        }
        assert_eq!(prediction.pending_inputs(), 8);
    }
}
