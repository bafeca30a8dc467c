//! IMA-ADPCM decoding, the compressed wave format of the DS sound hardware
//!
//! A compressed wave starts with a four byte header holding the initial predictor (`i16`) and
//! step index (`u16`). Every following byte holds two 4-bit samples, low nibble first.

/// Step sizes indexed by the step index
pub const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

/// Step index adjustment per nibble (the sign bit is ignored)
pub const INDEX_TABLE: [i32; 8] = [-1, -1, -1, -1, 2, 4, 6, 8];

/// The number of header bytes in front of the nibbles
pub const HEADER_LEN: usize = 4;

/// Running decoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoder {
    predictor: i32,
    step_index: i32,
}

impl Decoder {
    pub fn new(predictor: i16, step_index: u16) -> Self {
        Self {
            predictor: predictor as i32,
            step_index: (step_index as i32).clamp(0, 88),
        }
    }

    /// Decode a single 4-bit sample
    pub fn next(&mut self, nibble: u8) -> i16 {
        let step = STEP_TABLE[self.step_index as usize];

        let mut diff = step >> 3;
        if nibble & 1 != 0 {
            diff += step >> 2;
        }
        if nibble & 2 != 0 {
            diff += step >> 1;
        }
        if nibble & 4 != 0 {
            diff += step;
        }

        if nibble & 8 != 0 {
            self.predictor = (self.predictor - diff).max(-0x7FFF);
        } else {
            self.predictor = (self.predictor + diff).min(0x7FFF);
        }

        self.step_index = (self.step_index + INDEX_TABLE[(nibble & 7) as usize]).clamp(0, 88);

        self.predictor as i16
    }
}

/// Decode a complete compressed wave body (header included)
///
/// Bodies shorter than the header decode to no samples at all.
pub fn decode(data: &[u8]) -> Vec<i16> {
    if data.len() < HEADER_LEN {
        return Vec::new();
    }

    let predictor = i16::from_le_bytes([data[0], data[1]]);
    let step_index = u16::from_le_bytes([data[2], data[3]]);
    let mut decoder = Decoder::new(predictor, step_index);

    let mut samples = Vec::with_capacity((data.len() - HEADER_LEN) * 2);
    for byte in &data[HEADER_LEN..] {
        samples.push(decoder.next(byte & 0x0F));
        samples.push(decoder.next(byte >> 4));
    }

    samples
}
