//! Register fixtures shared by unit tests.

use super::models::{RegisterSnapshot, WordOrder};
use super::reading::Reading;

pub fn words_from_u32(value: u32, order: WordOrder) -> [u16; 2] {
    let high = (value >> 16) as u16;
    let low = (value & 0xFFFF) as u16;
    match order {
        WordOrder::HighFirst => [high, low],
        WordOrder::LowFirst => [low, high],
    }
}

pub fn words_from_f32(value: f32, order: WordOrder) -> [u16; 2] {
    words_from_u32(value.to_bits(), order)
}

pub fn scenario_reading() -> Reading {
    Reading {
        voltage: 220.0,
        current: 5.0,
        active_power: 1000.0,
        reactive_power: 50.0,
        power_factor: 0.98,
        frequency: 50.0,
        import_energy: 12345.6,
        export_energy: 0.0,
    }
}

/// Raw blocks a float-register meter would return for `reading`.
pub fn model_a_snapshot(reading: &Reading) -> RegisterSnapshot {
    let order = WordOrder::HighFirst;
    let mut main = vec![0u16; 18];
    for (offset, value) in [
        (0usize, reading.voltage),
        (2, reading.current),
        (4, reading.active_power),
        (6, reading.reactive_power),
        (10, reading.power_factor),
        (14, reading.frequency),
    ] {
        main[offset..offset + 2].copy_from_slice(&words_from_f32(value, order));
    }
    RegisterSnapshot::new(vec![
        main,
        words_from_f32(reading.import_energy, order).to_vec(),
        words_from_f32(reading.export_energy, order).to_vec(),
    ])
}

/// 220.0 V, 5.000 A, 1000.0 W, 0 Wh, 50.0 Hz, PF 0.98
pub fn model_b_words() -> Vec<u16> {
    let order = WordOrder::LowFirst;
    let mut words = vec![2200u16];
    words.extend_from_slice(&words_from_u32(5000, order));
    words.extend_from_slice(&words_from_u32(10000, order));
    words.extend_from_slice(&words_from_u32(0, order));
    words.push(500);
    words.push(98);
    words
}
