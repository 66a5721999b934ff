//! Bit-packed snapshot serialization with delta compression against an
//! acknowledged baseline.
//!
//! Symmetry contract: the reader consumes a `changed` bit under exactly the
//! condition the writer emitted one — a baseline is in effect AND it contains
//! the entity id. Any asymmetry desynchronizes the rest of the stream, which
//! is why the effective baseline is derived from the encoded
//! `baseline_sequence`, never from what the caller happens to pass.

use std::collections::BTreeMap;

use thiserror::Error;

use super::bitstream::{BitReader, BitWriter};
use super::quantize::{
    decode_position, decode_velocity, encode_position, encode_velocity, ENTITY_KIND_BITS,
    POSITION_BITS, SPRITE_FRAME_BITS, STATE_FLAGS_BITS, VELOCITY_BITS,
};
use crate::snapshot::{EntityState, Snapshot, SnapshotHeader};
use crate::world::EntityKind;

/// Fixed header prefix: sequence(16) + timestamp(32) + baseline(16) +
/// count(16) + player id(32) + input tick(32).
pub const HEADER_BITS: usize = 144;

/// Upper bound on the encoded size of one entity: worst-case id varint,
/// changed flag, full state body.
pub const WORST_CASE_STATE_BITS: usize = 5 * 8
    + 1
    + 2 * POSITION_BITS as usize
    + 2 * VELOCITY_BITS as usize
    + SPRITE_FRAME_BITS as usize
    + STATE_FLAGS_BITS as usize
    + ENTITY_KIND_BITS as usize;

/// Positions/velocities this close count as unchanged for delta encoding.
pub const STATE_EPSILON: f32 = 0.01;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("bit stream ended before the payload was complete")]
    BufferUnderrun,
    #[error("varint ran past 5 continuation bytes")]
    VarintOverflow,
    #[error("snapshot was delta-encoded against sequence {expected}, have {found:?}")]
    BaselineMismatch { expected: u16, found: Option<u16> },
    #[error("entity ids are not strictly ascending")]
    InvalidEntityOrder,
}

/// Server-side changed-detection predicate: positions and velocities within
/// [`STATE_EPSILON`] per axis, discrete fields exactly equal.
pub fn states_equal(a: &EntityState, b: &EntityState) -> bool {
    (a.position.x - b.position.x).abs() <= STATE_EPSILON
        && (a.position.y - b.position.y).abs() <= STATE_EPSILON
        && (a.velocity.x - b.velocity.x).abs() <= STATE_EPSILON
        && (a.velocity.y - b.velocity.y).abs() <= STATE_EPSILON
        && a.sprite_frame == b.sprite_frame
        && a.state_flags == b.state_flags
        && a.kind == b.kind
}

/// Entities that fit a payload of `budget_bytes` in the worst case.
pub fn max_states_for_budget(budget_bytes: usize) -> usize {
    (budget_bytes * 8).saturating_sub(HEADER_BITS) / WORST_CASE_STATE_BITS
}

fn write_state(writer: &mut BitWriter, state: &EntityState) {
    writer.write_bits(encode_position(state.position.x), POSITION_BITS);
    writer.write_bits(encode_position(state.position.y), POSITION_BITS);
    writer.write_bits(encode_velocity(state.velocity.x), VELOCITY_BITS);
    writer.write_bits(encode_velocity(state.velocity.y), VELOCITY_BITS);
    writer.write_bits(state.sprite_frame as u32, SPRITE_FRAME_BITS);
    writer.write_bits(state.state_flags as u32, STATE_FLAGS_BITS);
    writer.write_bits(state.kind as u32, ENTITY_KIND_BITS);
}

fn read_state(reader: &mut BitReader) -> Result<EntityState, CodecError> {
    let px = decode_position(reader.read_bits(POSITION_BITS)?);
    let py = decode_position(reader.read_bits(POSITION_BITS)?);
    let vx = decode_velocity(reader.read_bits(VELOCITY_BITS)?);
    let vy = decode_velocity(reader.read_bits(VELOCITY_BITS)?);
    let sprite_frame = reader.read_bits(SPRITE_FRAME_BITS)? as u8;
    let state_flags = reader.read_bits(STATE_FLAGS_BITS)? as u8;
    let kind = EntityKind::from(reader.read_bits(ENTITY_KIND_BITS)? as u8);

    Ok(EntityState {
        position: glam::Vec2::new(px, py),
        velocity: glam::Vec2::new(vx, vy),
        sprite_frame,
        state_flags,
        kind,
    })
}

/// Encodes `snapshot`, delta-compressed against `baseline` when one is given.
/// `snapshot.baseline_sequence` must already name the baseline (0 for none).
pub fn encode(snapshot: &Snapshot, baseline: Option<&Snapshot>) -> Vec<u8> {
    debug_assert_eq!(
        snapshot.baseline_sequence,
        baseline.map_or(0, |b| b.sequence),
        "snapshot names a different baseline than the one supplied"
    );

    let mut writer = BitWriter::with_capacity(HEADER_BITS / 8 + snapshot.states.len() * 4);
    writer.write_bits(snapshot.sequence as u32, 16);
    writer.write_bits(snapshot.timestamp_ms, 32);
    writer.write_bits(snapshot.baseline_sequence as u32, 16);
    writer.write_bits(snapshot.states.len() as u32, 16);
    writer.write_bits(snapshot.player_entity_id, 32);
    writer.write_bits(snapshot.last_processed_input_tick, 32);

    let mut prev_id = 0u32;
    for (&id, state) in &snapshot.states {
        writer.write_varint(id - prev_id);
        prev_id = id;

        if let Some(baseline_state) = baseline.and_then(|b| b.states.get(&id)) {
            let changed = !states_equal(state, baseline_state);
            writer.write_bit(changed);
            if !changed {
                continue;
            }
        }
        write_state(&mut writer, state);
    }

    writer.into_bytes()
}

/// Decodes the fixed header prefix without consuming anything.
pub fn peek_header(bytes: &[u8]) -> Result<SnapshotHeader, CodecError> {
    let mut reader = BitReader::new(bytes);
    Ok(SnapshotHeader {
        sequence: reader.read_bits(16)? as u16,
        timestamp_ms: reader.read_bits(32)?,
        baseline_sequence: reader.read_bits(16)? as u16,
    })
}

/// Decodes a snapshot payload. When the payload names a baseline, `baseline`
/// must be exactly that snapshot or decoding refuses with
/// [`CodecError::BaselineMismatch`] — the caller then requests a keyframe.
pub fn decode(bytes: &[u8], baseline: Option<&Snapshot>) -> Result<Snapshot, CodecError> {
    let mut reader = BitReader::new(bytes);
    let sequence = reader.read_bits(16)? as u16;
    let timestamp_ms = reader.read_bits(32)?;
    let baseline_sequence = reader.read_bits(16)? as u16;
    let entity_count = reader.read_bits(16)? as usize;
    let player_entity_id = reader.read_bits(32)?;
    let last_processed_input_tick = reader.read_bits(32)?;

    // The writer only elided data when it had a baseline; mirror that exact
    // condition. A caller-supplied baseline for a keyframe payload is unused.
    let base = if baseline_sequence > 0 {
        match baseline {
            Some(b) if b.sequence == baseline_sequence => Some(b),
            other => {
                return Err(CodecError::BaselineMismatch {
                    expected: baseline_sequence,
                    found: other.map(|b| b.sequence),
                })
            }
        }
    } else {
        None
    };

    let mut states = BTreeMap::new();
    let mut prev_id = 0u32;
    for _ in 0..entity_count {
        let delta = reader.read_varint()?;
        if delta == 0 {
            return Err(CodecError::InvalidEntityOrder);
        }
        let id = prev_id
            .checked_add(delta)
            .ok_or(CodecError::InvalidEntityOrder)?;
        prev_id = id;

        if let Some(baseline_state) = base.and_then(|b| b.states.get(&id)) {
            let changed = reader.read_bit()?;
            if !changed {
                states.insert(id, *baseline_state);
                continue;
            }
        }
        states.insert(id, read_state(&mut reader)?);
    }

    Ok(Snapshot {
        sequence,
        timestamp_ms,
        baseline_sequence,
        player_entity_id,
        last_processed_input_tick,
        states,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::quantize::{position_quantum, velocity_quantum};
    use glam::Vec2;

    fn state(pos: Vec2, vel: Vec2, kind: EntityKind) -> EntityState {
        EntityState {
            position: pos,
            velocity: vel,
            sprite_frame: 2,
            state_flags: 0b0000_0101,
            kind,
        }
    }

    fn two_entity_snapshot(sequence: u16) -> Snapshot {
        let mut snap = Snapshot::new(sequence, 1_000);
        snap.player_entity_id = 1;
        snap.last_processed_input_tick = 77;
        snap.states.insert(
            1,
            state(
                Vec2::new(100.0, 200.0),
                Vec2::new(5.0, 0.0),
                EntityKind::Player,
            ),
        );
        snap.states.insert(
            2,
            state(Vec2::new(150.0, 300.0), Vec2::new(0.0, 3.0), EntityKind::Npc),
        );
        snap
    }

    fn assert_states_close(a: &Snapshot, b: &Snapshot) {
        assert_eq!(a.states.len(), b.states.len());
        for (id, sa) in &a.states {
            let sb = &b.states[id];
            assert!((sa.position - sb.position).abs().max_element() <= position_quantum());
            assert!((sa.velocity - sb.velocity).abs().max_element() <= velocity_quantum());
            assert_eq!(sa.sprite_frame, sb.sprite_frame);
            assert_eq!(sa.state_flags, sb.state_flags);
            assert_eq!(sa.kind, sb.kind);
        }
    }

    #[test]
    fn keyframe_roundtrip() {
        let snap = two_entity_snapshot(1);
        let bytes = encode(&snap, None);
        let decoded = decode(&bytes, None).unwrap();

        assert_eq!(decoded.sequence, 1);
        assert_eq!(decoded.timestamp_ms, 1_000);
        assert_eq!(decoded.baseline_sequence, 0);
        assert_eq!(decoded.player_entity_id, 1);
        assert_eq!(decoded.last_processed_input_tick, 77);
        assert_states_close(&snap, &decoded);
    }

    #[test]
    fn peek_header_matches_decode() {
        let snap = two_entity_snapshot(9);
        let bytes = encode(&snap, None);

        let header = peek_header(&bytes).unwrap();
        assert_eq!(header.sequence, 9);
        assert_eq!(header.timestamp_ms, 1_000);
        assert_eq!(header.baseline_sequence, 0);
    }

    #[test]
    fn unchanged_delta_costs_one_flag_bit_per_entity() {
        let baseline = decode(&encode(&two_entity_snapshot(1), None), None).unwrap();

        let mut delta = baseline.clone();
        delta.sequence = 2;
        delta.baseline_sequence = 1;

        let bytes = encode(&delta, Some(&baseline));
        // Header plus, per entity, varint(1) + changed=0: 18 + ceil(18/8) bytes.
        assert!(bytes.len() <= HEADER_BITS / 8 + 4);

        let decoded = decode(&bytes, Some(&baseline)).unwrap();
        assert_eq!(decoded.states, baseline.states);
    }

    #[test]
    fn new_entity_after_baseline_has_no_changed_bit() {
        let baseline = decode(&encode(&two_entity_snapshot(1), None), None).unwrap();

        let mut next = baseline.clone();
        next.sequence = 2;
        next.baseline_sequence = 1;
        next.states.insert(
            3,
            state(Vec2::ZERO, Vec2::ZERO, EntityKind::MovingObstacle),
        );

        let bytes = encode(&next, Some(&baseline));
        let decoded = decode(&bytes, Some(&baseline)).unwrap();

        assert_eq!(decoded.states.len(), 3);
        assert_eq!(decoded.states[&3].kind, EntityKind::MovingObstacle);
        assert!(decoded.states[&3].position.abs().max_element() <= position_quantum());
        // Entities covered by the baseline decode from it untouched.
        assert_eq!(decoded.states[&1], baseline.states[&1]);
        assert_eq!(decoded.states[&2], baseline.states[&2]);
    }

    #[test]
    fn changed_entity_reencodes_fully() {
        let baseline = decode(&encode(&two_entity_snapshot(1), None), None).unwrap();

        let mut next = baseline.clone();
        next.sequence = 2;
        next.baseline_sequence = 1;
        next.states.get_mut(&2).unwrap().position += Vec2::new(4.0, 0.0);

        let bytes = encode(&next, Some(&baseline));
        let decoded = decode(&bytes, Some(&baseline)).unwrap();

        assert_eq!(decoded.states[&1], baseline.states[&1]);
        assert!(
            (decoded.states[&2].position.x - next.states[&2].position.x).abs()
                <= position_quantum()
        );
    }

    #[test]
    fn delta_decode_without_baseline_is_refused() {
        let baseline = decode(&encode(&two_entity_snapshot(1), None), None).unwrap();
        let mut delta = baseline.clone();
        delta.sequence = 2;
        delta.baseline_sequence = 1;
        let bytes = encode(&delta, Some(&baseline));

        assert_eq!(
            decode(&bytes, None),
            Err(CodecError::BaselineMismatch {
                expected: 1,
                found: None
            })
        );
    }

    #[test]
    fn delta_decode_with_wrong_baseline_is_refused() {
        let baseline = decode(&encode(&two_entity_snapshot(1), None), None).unwrap();
        let mut delta = baseline.clone();
        delta.sequence = 3;
        delta.baseline_sequence = 1;
        let bytes = encode(&delta, Some(&baseline));

        let wrong = two_entity_snapshot(2);
        assert_eq!(
            decode(&bytes, Some(&wrong)),
            Err(CodecError::BaselineMismatch {
                expected: 1,
                found: Some(2)
            })
        );
    }

    #[test]
    fn truncated_payloads_never_decode() {
        let snap = two_entity_snapshot(1);
        let bytes = encode(&snap, None);

        for len in 0..bytes.len() - 1 {
            assert!(
                decode(&bytes[..len], None).is_err(),
                "prefix of {len} bytes decoded"
            );
        }
    }

    #[test]
    fn zero_id_delta_is_rejected() {
        // Hand-build a header claiming one entity, then a 0 varint.
        let mut writer = BitWriter::new();
        writer.write_bits(1, 16);
        writer.write_bits(0, 32);
        writer.write_bits(0, 16);
        writer.write_bits(1, 16);
        writer.write_bits(0, 32);
        writer.write_bits(0, 32);
        writer.write_varint(0);
        let bytes = writer.into_bytes();

        assert_eq!(decode(&bytes, None), Err(CodecError::InvalidEntityOrder));
    }

    #[test]
    fn encode_is_deterministic() {
        let snap = two_entity_snapshot(4);
        assert_eq!(encode(&snap, None), encode(&snap, None));
    }

    #[test]
    fn states_equal_tolerates_sub_epsilon_noise() {
        let a = state(Vec2::new(1.0, 1.0), Vec2::ZERO, EntityKind::Npc);
        let mut b = a;
        b.position.x += 0.009;
        assert!(states_equal(&a, &b));
        b.position.x += 0.01;
        assert!(!states_equal(&a, &b));
        let mut c = a;
        c.sprite_frame = 9;
        assert!(!states_equal(&a, &c));
    }

    #[test]
    fn budget_bound_is_conservative() {
        let max = max_states_for_budget(1400);
        let mut snap = Snapshot::new(1, 0);
        for i in 0..max as u32 {
            // Spread ids so varints stay short and positions vary.
            snap.states.insert(
                i * 3 + 1,
                state(
                    Vec2::new((i % 100) as f32, (i % 90) as f32),
                    Vec2::new(1.0, -1.0),
                    EntityKind::Npc,
                ),
            );
        }
        let bytes = encode(&snap, None);
        assert!(bytes.len() <= 1400, "{} bytes", bytes.len());
    }
}
