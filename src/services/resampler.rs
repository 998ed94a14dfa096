//! PCM16 <-> float32 sample-rate conversion (C2).
//!
//! Converts PCM16 mono buffers between 44.1 kHz, 22.05 kHz and 16 kHz as
//! normalized float32. Purely computational: no I/O, no shared state.

/// Decode little-endian PCM16 mono bytes into float32 samples normalized to
/// `[-1, 1]`.
pub fn pcm16_to_float32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / i16::MAX as f32)
        .collect()
}

/// Encode float32 samples in `[-1, 1]` back into little-endian PCM16 bytes.
pub fn float32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        let sample = (clamped * i16::MAX as f32).round() as i16;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Resample a mono float32 buffer from `from_rate` to `to_rate`.
///
/// Uses integer decimation when the ratio is an exact integer (cheap,
/// aliasing-free enough for the downsample-only paths this pipeline needs),
/// a rational polyphase step when both rates share a modest integer ratio,
/// and falls back to linear interpolation otherwise. Identity when the rates
/// match. Empty input yields empty output.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate {
        return samples.to_vec();
    }

    if from_rate % to_rate == 0 {
        return decimate(samples, (from_rate / to_rate) as usize);
    }

    if let Some((up, down)) = polyphase_ratio(from_rate, to_rate) {
        return polyphase_resample(samples, up, down);
    }

    linear_resample(samples, from_rate, to_rate)
}

/// Convenience wrapper for the common case: decode PCM16 bytes at
/// `from_rate` directly into a float32 buffer at `to_rate`.
pub fn resample_pcm16(bytes: &[u8], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let floats = pcm16_to_float32(bytes);
    resample(&floats, from_rate, to_rate)
}

fn decimate(samples: &[f32], factor: usize) -> Vec<f32> {
    if factor <= 1 {
        return samples.to_vec();
    }
    samples.iter().step_by(factor).copied().collect()
}

/// Reduce `from/to` to a small integer ratio, capped so the polyphase path
/// never degenerates into an enormous upsample factor.
fn polyphase_ratio(from_rate: u32, to_rate: u32) -> Option<(usize, usize)> {
    let g = gcd(from_rate, to_rate);
    let up = (to_rate / g) as usize;
    let down = (from_rate / g) as usize;
    if up <= 32 && down <= 32 {
        Some((up, down))
    } else {
        None
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Zero-stuff by `up`, apply a short linear-phase lowpass (triangular
/// kernel), then decimate by `down`. Good enough for the modest ratios
/// (e.g. 160/147 for 16 kHz <-> 44.1 kHz) this pipeline exercises.
fn polyphase_resample(samples: &[f32], up: usize, down: usize) -> Vec<f32> {
    if up == 1 && down == 1 {
        return samples.to_vec();
    }

    let upsampled_len = samples.len() * up;
    let mut upsampled = vec![0.0f32; upsampled_len];
    for (i, &s) in samples.iter().enumerate() {
        upsampled[i * up] = s;
    }

    let kernel_half = up.max(down);
    let kernel: Vec<f32> = (-(kernel_half as isize)..=(kernel_half as isize))
        .map(|i| {
            let x = i as f32 / kernel_half as f32;
            (1.0 - x.abs()).max(0.0)
        })
        .collect();
    let kernel_sum: f32 = kernel.iter().sum();

    let filtered_len = upsampled_len;
    let mut filtered = vec![0.0f32; filtered_len];
    for i in 0..filtered_len {
        let mut acc = 0.0f32;
        for (k, &kv) in kernel.iter().enumerate() {
            let offset = k as isize - kernel_half as isize;
            let src = i as isize + offset;
            if src >= 0 && (src as usize) < upsampled_len {
                acc += upsampled[src as usize] * kv;
            }
        }
        filtered[i] = acc / kernel_sum.max(1e-9);
    }

    filtered.into_iter().step_by(down).collect()
}

fn linear_resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let ratio = from_rate as f64 / to_rate as f64;
    let input_len = samples.len();
    let output_len = (input_len as f64 / ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos.floor() as usize;
        let next_idx = (src_idx + 1).min(input_len - 1);
        let frac = (src_pos - src_idx as f64) as f32;

        let curr = samples[src_idx.min(input_len - 1)];
        let next = samples[next_idx];
        output.push(curr * (1.0 - frac) + next * frac);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_rates_match() {
        let samples = vec![0.1, -0.2, 0.3, -0.4];
        assert_eq!(resample(&samples, 44100, 44100), samples);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(resample(&[], 44100, 16000).is_empty());
    }

    #[test]
    fn integer_decimation_halves_length() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let out = resample(&samples, 200, 100);
        assert_eq!(out.len(), 50);
        assert_eq!(out[0], samples[0]);
    }

    #[test]
    fn pcm16_round_trip_within_one_lsb() {
        let original: Vec<i16> = vec![0, 1000, -1000, i16::MAX, i16::MIN + 1];
        let bytes: Vec<u8> = original.iter().flat_map(|s| s.to_le_bytes()).collect();
        let floats = pcm16_to_float32(&bytes);
        let back = float32_to_pcm16(&floats);
        let recovered: Vec<i16> = back
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        for (a, b) in original.iter().zip(recovered.iter()) {
            assert!((*a as i32 - *b as i32).abs() <= 1);
        }
    }

    #[test]
    fn output_length_matches_ratio() {
        let samples = vec![0.0f32; 4410];
        let out = resample(&samples, 44100, 22050);
        assert_eq!(out.len(), 2205);
    }
}
