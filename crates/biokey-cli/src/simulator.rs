//! Synthetic fingers for driving the mock sensor from the command line.

use biokey_hardware::Result;
use biokey_hardware::mock::MockSensorHandle;

const TEMPLATE_LEN: usize = 64;

/// Deterministic template for finger `seed`. Equal seeds give equal
/// templates, so a probe made from an enrolled seed scores 1000.
pub fn synthetic_template(seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9).wrapping_add(0x7F4A_7C15);
    (0..TEMPLATE_LEN)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state.to_le_bytes()[0]
        })
        .collect()
}

/// Quality between 60 and 99 derived from the seed.
pub fn synthetic_quality(seed: u32) -> u8 {
    60 + u8::try_from(seed % 40).unwrap_or(0)
}

/// Queue fingers `first..first + count` on the sensor.
pub fn place_fingers(sensor: &MockSensorHandle, first: u32, count: u32) -> Result<()> {
    for seed in first..first.saturating_add(count) {
        sensor.place_finger(synthetic_template(seed), synthetic_quality(seed))?;
    }
    Ok(())
}
