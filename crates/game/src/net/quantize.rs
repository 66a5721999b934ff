//! Fixed-point codecs for the snapshot wire format.
//!
//! These are protocol constants, not configuration: both ends of the wire
//! must agree byte-exactly on the envelope or every decode desynchronizes.

/// Bits per position axis over the world range.
pub const POSITION_BITS: u32 = 18;
/// Bits per velocity axis, offset-binary over `[-MAX_VELOCITY, MAX_VELOCITY]`.
pub const VELOCITY_BITS: u32 = 11;
pub const SPRITE_FRAME_BITS: u32 = 8;
pub const STATE_FLAGS_BITS: u32 = 8;
pub const ENTITY_KIND_BITS: u32 = 4;

pub const WORLD_MIN: f32 = -1024.0;
pub const WORLD_MAX: f32 = 1024.0;
pub const MAX_VELOCITY: f32 = 256.0;

const POSITION_MAX_CODE: u32 = (1 << POSITION_BITS) - 1;
const VELOCITY_MAX_CODE: u32 = (1 << VELOCITY_BITS) - 1;
/// Offset-binary midpoint: velocity 0.0 encodes to this code.
const VELOCITY_MID_CODE: u32 = (1 << (VELOCITY_BITS - 1)) - 1;
const VELOCITY_SCALE: f32 = (VELOCITY_MAX_CODE - VELOCITY_MID_CODE) as f32 / MAX_VELOCITY;

/// World-unit value of one position LSB (~0.0078 units).
pub fn position_quantum() -> f32 {
    (WORLD_MAX - WORLD_MIN) / POSITION_MAX_CODE as f32
}

/// World-unit value of one velocity LSB (0.25 units/s).
pub fn velocity_quantum() -> f32 {
    1.0 / VELOCITY_SCALE
}

/// Encodes one position axis. Out-of-range input is clamped; the debug
/// assertion flags it first because the simulation should already have
/// confined every entity to the world bounds.
pub fn encode_position(value: f32) -> u32 {
    debug_assert!(
        (WORLD_MIN..=WORLD_MAX).contains(&value),
        "position {value} outside world bounds"
    );
    let clamped = value.clamp(WORLD_MIN, WORLD_MAX);
    let normalized = (clamped - WORLD_MIN) / (WORLD_MAX - WORLD_MIN);
    (normalized * POSITION_MAX_CODE as f32).round() as u32
}

pub fn decode_position(code: u32) -> f32 {
    let normalized = (code & POSITION_MAX_CODE) as f32 / POSITION_MAX_CODE as f32;
    WORLD_MIN + normalized * (WORLD_MAX - WORLD_MIN)
}

/// Encodes one velocity axis as offset-binary around [`VELOCITY_MID_CODE`].
pub fn encode_velocity(value: f32) -> u32 {
    let clamped = value.clamp(-MAX_VELOCITY, MAX_VELOCITY);
    let offset = (clamped * VELOCITY_SCALE).round() as i32 + VELOCITY_MID_CODE as i32;
    offset.clamp(0, VELOCITY_MAX_CODE as i32) as u32
}

pub fn decode_velocity(code: u32) -> f32 {
    ((code & VELOCITY_MAX_CODE) as i32 - VELOCITY_MID_CODE as i32) as f32 / VELOCITY_SCALE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_bounds_hit_code_extremes() {
        assert_eq!(encode_position(WORLD_MIN), 0);
        assert_eq!(encode_position(WORLD_MAX), POSITION_MAX_CODE);
        assert_eq!(decode_position(0), WORLD_MIN);
        assert!((decode_position(POSITION_MAX_CODE) - WORLD_MAX).abs() < position_quantum());
    }

    #[test]
    fn position_roundtrip_within_one_quantum() {
        for value in [-1024.0, -513.7, -0.004, 0.0, 3.125, 100.5, 999.99, 1024.0] {
            let decoded = decode_position(encode_position(value));
            assert!(
                (decoded - value).abs() <= position_quantum(),
                "{value} -> {decoded}"
            );
        }
    }

    #[test]
    fn position_roundtrip_is_idempotent() {
        for value in [-800.25, -12.0, 0.33, 512.512] {
            let once = decode_position(encode_position(value));
            let twice = decode_position(encode_position(once));
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn velocity_zero_hits_mid_code() {
        assert_eq!(encode_velocity(0.0), VELOCITY_MID_CODE);
        assert_eq!(decode_velocity(VELOCITY_MID_CODE), 0.0);
    }

    #[test]
    fn velocity_extremes_hit_code_extremes() {
        assert_eq!(encode_velocity(MAX_VELOCITY), VELOCITY_MAX_CODE);
        assert_eq!(encode_velocity(-MAX_VELOCITY), 0);
        assert_eq!(encode_velocity(MAX_VELOCITY + 50.0), VELOCITY_MAX_CODE);
        assert_eq!(encode_velocity(-MAX_VELOCITY - 50.0), 0);
    }

    #[test]
    fn velocity_roundtrip_within_one_quantum() {
        for value in [-256.0, -100.3, -0.125, 0.0, 0.125, 42.5, 255.9] {
            let decoded = decode_velocity(encode_velocity(value));
            assert!(
                (decoded - value).abs() <= velocity_quantum(),
                "{value} -> {decoded}"
            );
        }
    }
}
