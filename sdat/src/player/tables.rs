//! Conversion curves of the sound driver
//!
//! Volumes are kept in tenths of a decibel, where 0 is full volume and [`SILENCE`] is the
//! quietest level a channel can reach before it is considered silent.

use std::sync::OnceLock;

/// The quietest volume level
pub const SILENCE: i32 = -723;

/// [`SILENCE`] at the fixed point scale of channel amplitudes, which carry 7 fractional bits
pub const AMPLITUDE_SILENCE: i32 = SILENCE << 7;

/// Steps in a semitone of tuning
pub const TUNE_PER_SEMITONE: i32 = 64;

/// Steps in an octave of the pitch table
const PITCH_STEPS: usize = 12 * TUNE_PER_SEMITONE as usize;

/// Convert an attack byte to the factor the amplitude is multiplied by (over 256) each update
pub fn attack(attack: u8) -> u8 {
    const FAST: [u8; 19] = [
        0x00, 0x01, 0x05, 0x0E, 0x1A, 0x26, 0x33, 0x3F, 0x49, 0x54, 0x5C, 0x64, 0x6D, 0x74, 0x7B,
        0x7F, 0x84, 0x89, 0x8F,
    ];

    let attack = attack.min(0x7F);
    if attack >= 0x6D {
        FAST[(0x7F - attack) as usize]
    } else {
        0xFF - attack
    }
}

/// Convert a decay or release byte to the amplitude that is subtracted each update
pub fn fall(fall: u8) -> u16 {
    match fall.min(0x7F) {
        0x7F => 0xFFFF,
        0x7E => 0x3C00,
        fall if fall < 0x32 => (fall as u16) * 2 + 1,
        fall => 0x1E00 / (0x7E - fall as u16),
    }
}

/// Convert a linear 7-bit level (volume, expression, velocity, sustain) to a volume level
pub fn sustain(level: u8) -> i16 {
    #[rustfmt::skip]
    const LEVELS: [i16; 128] = [
        -32768, -722, -721, -651, -601, -562, -530, -503,
        -480, -460, -442, -425, -410, -396, -383, -371,
        -360, -349, -339, -330, -321, -313, -305, -297,
        -289, -282, -276, -269, -263, -257, -251, -245,
        -239, -234, -229, -224, -219, -214, -210, -205,
        -201, -196, -192, -188, -184, -180, -176, -173,
        -169, -165, -162, -158, -155, -152, -149, -145,
        -142, -139, -136, -133, -130, -127, -125, -122,
        -119, -116, -114, -111, -109, -106, -103, -101,
        -99, -96, -94, -91, -89, -87, -85, -82,
        -80, -78, -76, -74, -72, -70, -68, -66,
        -64, -62, -60, -58, -56, -54, -52, -50,
        -49, -47, -45, -43, -42, -40, -38, -36,
        -35, -33, -31, -30, -28, -27, -25, -23,
        -22, -20, -19, -17, -16, -14, -13, -11,
        -10, -8, -7, -6, -4, -3, -1, 0,
    ];

    // Out of range levels behave as full volume
    if level & 0x80 != 0 {
        LEVELS[0x7F]
    } else {
        LEVELS[level as usize]
    }
}

/// The hardware volume and volume divider for a level, where 0 is [`SILENCE`]
///
/// The divider selects a shift of 0, 1, 2 or 4 bits, so quiet levels keep resolution.
pub fn volume(level: i32) -> (u8, u8) {
    static TABLE: OnceLock<Vec<u8>> = OnceLock::new();

    let level = level.clamp(0, -SILENCE);
    let divider = divider_for(level);

    let table = TABLE.get_or_init(|| {
        (0..=-SILENCE)
            .map(|level| {
                let gain = 10f64.powf((level + SILENCE) as f64 / 200.0);
                let boost = (1 << divider_shift(divider_for(level))) as f64;
                (127.0 * gain * boost).round().min(127.0) as u8
            })
            .collect()
    });

    (table[level as usize], divider)
}

fn divider_for(level: i32) -> u8 {
    match level + SILENCE {
        db if db < -240 => 3,
        db if db < -120 => 2,
        db if db < -60 => 1,
        _ => 0,
    }
}

/// The number of bits a volume divider shifts samples to the right
pub fn divider_shift(divider: u8) -> u32 {
    if divider == 3 {
        4
    } else {
        divider as u32
    }
}

/// Adjust a channel timer by a pitch offset in 64ths of a semitone
///
/// The timer counts down at a fixed clock, so raising the pitch shortens it.
pub fn adjust_timer(timer: u16, pitch: i32) -> u16 {
    static TABLE: OnceLock<Vec<u32>> = OnceLock::new();

    let table = TABLE.get_or_init(|| {
        (0..PITCH_STEPS)
            .map(|step| {
                let ratio = 2f64.powf(step as f64 / PITCH_STEPS as f64);
                ((ratio - 1.0) * 65536.0).round() as u32
            })
            .collect()
    });

    let steps = PITCH_STEPS as i32;
    let pitch = -pitch;
    let octaves = pitch.div_euclid(steps);
    let step = pitch.rem_euclid(steps) as usize;

    let scaled = timer as u64 * (table[step] as u64 + 0x10000);
    let shift = octaves - 16;

    let adjusted = if shift <= 0 {
        scaled >> (-shift).min(63)
    } else if shift < 32 {
        if scaled.leading_zeros() < shift as u32 {
            return 0xFFFF;
        }
        scaled << shift
    } else {
        return 0x10;
    };

    adjusted.clamp(0x10, 0xFFFF) as u16
}

/// A sine wave of period 128 and amplitude 127
pub fn sine(phase: u8) -> i32 {
    const QUARTER: usize = 32;

    let phase = phase as usize & 0x7F;
    let quarter = |index: usize| {
        (127.0 * (index as f64 * std::f64::consts::FRAC_PI_2 / QUARTER as f64).sin()).round() as i32
    };

    match phase / QUARTER {
        0 => quarter(phase),
        1 => quarter(2 * QUARTER - phase),
        2 => -quarter(phase - 2 * QUARTER),
        _ => -quarter(4 * QUARTER - phase),
    }
}

/// One step of a PSG square wave with the given duty cycle
///
/// Duty `n` keeps the wave high for `n + 1` of every 8 steps. Duty 7 stays low.
pub fn square(duty: u8, step: u32) -> i16 {
    let duty = duty & 7;
    if duty != 7 && (step & 7) >= 7 - duty as u32 {
        0x7FFF
    } else {
        -0x7FFF
    }
}

/// The linear 7-bit factor of a volume level in tenths of a decibel
pub fn gain(level: i16) -> u8 {
    let level = (level as i32).clamp(SILENCE, 0);
    (127.0 * 10f64.powf(level as f64 / 200.0)).round() as u8
}

/// Multiply by a 7-bit factor, where 127 means unity
pub fn mul_div7(value: i32, factor: u8) -> i32 {
    if factor == 127 {
        value
    } else {
        (value * factor as i32) >> 7
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attack_curve() {
        assert_eq!(attack(0x7F), 0x00);
        assert_eq!(attack(0x7E), 0x01);
        assert_eq!(attack(0x6D), 0x8F);
        assert_eq!(attack(0x6C), 0x93);
        assert_eq!(attack(0), 0xFF);

        // High bit set clamps to 0x7F
        assert_eq!(attack(0xFF), attack(0x7F));
    }

    #[test]
    fn fall_curve() {
        assert_eq!(fall(0x7F), 0xFFFF);
        assert_eq!(fall(0x7E), 0x3C00);
        assert_eq!(fall(0), 1);
        assert_eq!(fall(0x31), 0x63);
        assert_eq!(fall(0x32), 0x1E00 / 0x4C);
        assert_eq!(fall(0x80), fall(0x7F));
    }

    #[test]
    fn sustain_curve() {
        assert_eq!(sustain(127), 0);
        assert_eq!(sustain(0), -32768);
        assert_eq!(sustain(64), -119);
        assert_eq!(sustain(0x80), 0);
    }

    #[test]
    fn volume_curve() {
        assert_eq!(volume(-SILENCE), (127, 0));
        assert_eq!(volume(1000), (127, 0));
        assert_eq!(volume(0), (volume(0).0, 3));
        assert!(volume(0).0 < 10);

        // Halving the gain steps to the next divider, keeping the hardware volume up
        let (value, divider) = volume(-SILENCE - 61);
        assert_eq!(divider, 1);
        assert!(value > 120);
    }

    #[test]
    fn timers() {
        assert_eq!(adjust_timer(0x1000, 0), 0x1000);

        // An octave up halves the timer, an octave down doubles it
        assert_eq!(adjust_timer(0x1000, 768), 0x800);
        assert_eq!(adjust_timer(0x1000, -768), 0x2000);

        // A semitone up
        let semitone = adjust_timer(0x1000, 64);
        assert!(semitone < 0x1000 && semitone > 0xF00);

        assert_eq!(adjust_timer(0xF000, -768), 0xFFFF);
        assert_eq!(adjust_timer(0x20, 768 * 4), 0x10);
    }

    #[test]
    fn sine_wave() {
        assert_eq!(sine(0), 0);
        assert_eq!(sine(32), 127);
        assert_eq!(sine(64), 0);
        assert_eq!(sine(96), -127);
        assert_eq!(sine(16), -sine(80));
        assert_eq!(sine(128), sine(0));
    }

    #[test]
    fn gains() {
        assert_eq!(gain(0), 127);
        assert_eq!(gain(100), 127);
        assert_eq!(gain(-60), 64);
        assert_eq!(gain(-32768), 0);
    }

    #[test]
    fn squares() {
        let high = |duty| (0..8).filter(|step| square(duty, *step) > 0).count();
        assert_eq!(high(0), 1);
        assert_eq!(high(3), 4);
        assert_eq!(high(6), 7);
        assert_eq!(high(7), 0);
    }
}
