//! One-shot PCM preparation for the encoder.
//!
//! The whole clip is resampled once at load time; per-frame cost afterwards
//! is a byte-slice of the precomputed buffer.

/// Resample mono f32 samples to interleaved S16LE stereo at `output_rate`,
/// sized to a whole number of video frames.
///
/// Nearest-sample mapping: output sample `i` reads input
/// `floor(i * input_rate / output_rate)`; the input is clamped to [-1, 1]
/// and written to both channels.
pub fn resample_to_s16le_stereo(
    samples: &[f32],
    input_rate: u32,
    output_rate: u32,
    stream_fps: u32,
) -> Vec<u8> {
    let duration = samples.len() as f64 / input_rate as f64;
    let total_video_frames = (duration * stream_fps as f64).ceil() as usize;
    let samples_per_frame = (output_rate / stream_fps) as usize;
    let total_out = total_video_frames * samples_per_frame;

    let mut out = Vec::with_capacity(total_out * 4);
    for i in 0..total_out {
        let src = (i as u64 * input_rate as u64 / output_rate as u64) as usize;
        let value = samples.get(src).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
        let scaled = (value * i16::MAX as f32) as i16;
        let bytes = scaled.to_le_bytes();
        // Both stereo channels carry the mono signal.
        out.extend_from_slice(&bytes);
        out.extend_from_slice(&bytes);
    }
    out
}

/// One video frame of stereo S16LE silence.
pub fn silence_chunk(output_rate: u32, stream_fps: u32) -> Vec<u8> {
    vec![0u8; (output_rate / stream_fps) as usize * 4]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_sized_to_whole_frames() {
        // 1.5s at 16 kHz -> 45 video frames at 30 fps.
        let samples = vec![0.25f32; 24_000];
        let out = resample_to_s16le_stereo(&samples, 16_000, 44_100, 30);
        let bytes_per_frame = (44_100 / 30) * 4;
        assert_eq!(out.len(), 45 * bytes_per_frame as usize);
    }

    #[test]
    fn test_stereo_duplication_and_scale() {
        let samples = vec![0.5f32; 16_000];
        let out = resample_to_s16le_stereo(&samples, 16_000, 44_100, 30);
        let left = i16::from_le_bytes([out[0], out[1]]);
        let right = i16::from_le_bytes([out[2], out[3]]);
        assert_eq!(left, right);
        assert!((left as f32 / i16::MAX as f32 - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_clamps_out_of_range() {
        let samples = vec![2.0f32; 1600];
        let out = resample_to_s16le_stereo(&samples, 16_000, 44_100, 30);
        let first = i16::from_le_bytes([out[0], out[1]]);
        assert_eq!(first, i16::MAX);
    }

    #[test]
    fn test_silence_chunk_length() {
        // floor(44100/30) samples * 2 ch * 2 bytes.
        assert_eq!(silence_chunk(44_100, 30).len(), 1470 * 4);
    }

    #[test]
    fn test_tail_padded_with_silence() {
        // 0.51s: the final partial frame pads with zeros.
        let samples = vec![0.5f32; 8_160];
        let out = resample_to_s16le_stereo(&samples, 16_000, 44_100, 30);
        let last = i16::from_le_bytes([out[out.len() - 4], out[out.len() - 3]]);
        assert_eq!(last, 0);
    }
}
