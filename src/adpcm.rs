//! Adaptive differential PCM codec used on the wire.
//!
//! Each direction of a stream owns its own [`AdpcmState`]; state carries
//! across blocks, so both endpoints must reset to zero together whenever
//! the stream is discontinuous (see the connection state machine). The
//! tables and gains below are wire-load-bearing: changing any value breaks
//! compatibility with deployed peers.

const INDEX_ADJUST: [i32; 16] = [-1, -1, -1, -1, 2, 4, 6, 8, -1, -1, -1, -1, 2, 4, 6, 8];

#[rustfmt::skip]
const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14,
    16, 17, 19, 21, 23, 25, 28, 31,
    34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143,
    157, 173, 190, 209, 230, 253, 279, 307,
    337, 371, 408, 449, 494, 544, 598, 658,
    724, 796, 876, 963, 1060, 1166, 1282, 1411,
    1552, 1707, 1878, 2066, 2272, 2499, 2749, 3024,
    3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484,
    7132, 7845, 8630, 9493, 10442, 11487, 12635, 13899,
    15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

/// Microphone samples are boosted 3x before quantization.
const INPUT_GAIN: i32 = 3;
/// Decoded samples are halved before playback.
const OUTPUT_ATTENUATION: i32 = 2;

/// Per-direction codec state. `predictor` stays within i16 range and
/// `step_index` within [0, 88]; both are clamped after every sample,
/// never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdpcmState {
    predictor: i16,
    step_index: u8,
}

impl AdpcmState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn predictor(&self) -> i16 {
        self.predictor
    }

    pub fn step_index(&self) -> u8 {
        self.step_index
    }
}

fn clamp_index(index: i32) -> u8 {
    index.clamp(0, 88) as u8
}

fn quantized_diff(delta: i32, step: i32) -> i32 {
    let mut diffq = step >> 3;
    if delta & 4 != 0 {
        diffq += step;
    }
    if delta & 2 != 0 {
        diffq += step >> 1;
    }
    if delta & 1 != 0 {
        diffq += step >> 2;
    }
    diffq
}

/// Encode one frame of PCM into packed 4-bit codes, two per byte with the
/// low nibble first. An odd sample count pads the final high nibble with
/// zero, so the block length is always `(samples + 1) / 2`.
pub fn encode_block(samples: &[i16], state: &mut AdpcmState) -> Vec<u8> {
    let mut predictor = state.predictor as i32;
    let mut index = state.step_index as usize;
    let mut step = STEP_TABLE[index];

    let mut out = Vec::with_capacity((samples.len() + 1) / 2);
    let mut pending_low: Option<u8> = None;

    for &raw in samples {
        let sample = (raw as i32 * INPUT_GAIN).clamp(i16::MIN as i32, i16::MAX as i32);

        let mut diff = sample - predictor;
        let sign = if diff < 0 { 8 } else { 0 };
        if diff < 0 {
            diff = -diff;
        }

        let mut delta = 0;
        let mut temp_step = step;
        if diff >= temp_step {
            delta |= 4;
            diff -= temp_step;
        }
        temp_step >>= 1;
        if diff >= temp_step {
            delta |= 2;
            diff -= temp_step;
        }
        temp_step >>= 1;
        if diff >= temp_step {
            delta |= 1;
        }

        let nibble = (delta | sign) as u8;

        let diffq = quantized_diff(delta, step);
        if sign != 0 {
            predictor -= diffq;
        } else {
            predictor += diffq;
        }
        predictor = predictor.clamp(i16::MIN as i32, i16::MAX as i32);

        index = clamp_index(index as i32 + INDEX_ADJUST[nibble as usize]) as usize;
        step = STEP_TABLE[index];

        match pending_low.take() {
            None => pending_low = Some(nibble & 0x0f),
            Some(low) => out.push(low | (nibble & 0x0f) << 4),
        }
    }

    if let Some(low) = pending_low {
        out.push(low);
    }

    state.predictor = predictor as i16;
    state.step_index = index as u8;
    out
}

/// Decode a packed block back to PCM. Every byte yields two samples, low
/// nibble first; the predictor update mirrors the encoder exactly.
pub fn decode_block(block: &[u8], state: &mut AdpcmState) -> Vec<i16> {
    let mut predictor = state.predictor as i32;
    let mut index = state.step_index as usize;
    let mut step = STEP_TABLE[index];

    let mut out = Vec::with_capacity(block.len() * 2);

    for &byte in block {
        for shift in [0u8, 4u8] {
            let nibble = ((byte >> shift) & 0x0f) as i32;
            let sign = nibble & 8;
            let delta = nibble & 7;

            let diffq = quantized_diff(delta, step);
            if sign != 0 {
                predictor -= diffq;
            } else {
                predictor += diffq;
            }
            predictor = predictor.clamp(i16::MIN as i32, i16::MAX as i32);

            index = clamp_index(index as i32 + INDEX_ADJUST[nibble as usize]) as usize;
            step = STEP_TABLE[index];

            let sample =
                (predictor / OUTPUT_ATTENUATION).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            out.push(sample);
        }
    }

    state.predictor = predictor as i16;
    state.step_index = index as u8;
    out
}
