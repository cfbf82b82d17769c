//! Hour-of-day energy levels.

/// Energy multiplier per local hour: lowest around 1-2 a.m., peak mid-morning.
pub const CIRCADIAN_ENERGY: [f64; 24] = [
    0.3, 0.2, 0.2, 0.25, 0.3, 0.4, // 00-05
    0.6, 0.8, 0.9, 1.0, 1.0, 0.95, // 06-11
    0.85, 0.75, 0.8, 0.9, 0.95, 0.9, // 12-17
    0.85, 0.8, 0.75, 0.7, 0.6, 0.4, // 18-23
];

pub fn energy_at(hour: u32) -> f64 {
    CIRCADIAN_ENERGY[(hour % 24) as usize]
}

/// Delay stretch for the hour: tired hours slow everything down.
pub fn delay_multiplier(hour: u32) -> f64 {
    2.0 - energy_at(hour)
}
