//! UX tone generation.
//!
//! The normal close sequence plays three short 300 Hz beeps so the user
//! hears the channel go away even without a screen. A forced close after
//! an unrecoverable protocol error plays three descending beeps instead,
//! so the two endings are distinguishable by ear.

/// Frequency of the close beep in Hz.
pub const CLOSE_BEEP_HZ: f32 = 300.0;

/// Duration of one close beep in seconds.
pub const CLOSE_BEEP_SECS: f32 = 0.2;

/// Amplitude of the close beep.
pub const CLOSE_BEEP_VOLUME: f32 = 0.2;

/// Frequencies of the protocol-failure beeps, descending.
pub const ERROR_BEEP_HZ: [f32; 3] = [450.0, 350.0, 250.0];

/// Generate a sine tone as int16 PCM.
pub fn sine_tone(frequency: f32, duration_secs: f32, volume: f32, sample_rate: u32) -> Vec<i16> {
    let count = (sample_rate as f32 * duration_secs) as usize;
    (0..count)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let value = (t * frequency * 2.0 * std::f32::consts::PI).sin() * volume;
            (value * i16::MAX as f32) as i16
        })
        .collect()
}
