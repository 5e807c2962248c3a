//! Raw PCM and RGBA decoding through FFmpeg pipes.

use std::path::Path;

use tracing::debug;

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};

/// One decoded RGBA frame.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode any audio file (or the audio track of a video) to mono f32 PCM
/// at `sample_rate`.
pub async fn decode_audio_f32_mono(
    path: impl AsRef<Path>,
    sample_rate: u32,
) -> MediaResult<Vec<f32>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let stdout = FfmpegCommand::new()
        .input_file(path.to_string_lossy())
        .output_args([
            "-vn",
            "-f",
            "f32le",
            "-acodec",
            "pcm_f32le",
            "-ac",
            "1",
            "-ar",
            &sample_rate.to_string(),
        ])
        .output("pipe:1")
        .run_collect_stdout()
        .await
        .map_err(|e| match e {
            MediaError::FfmpegFailed { stderr, .. } => MediaError::audio_decode(format!(
                "{}: {}",
                path.display(),
                stderr.unwrap_or_default()
            )),
            other => other,
        })?;

    if stdout.is_empty() {
        return Err(MediaError::audio_decode(format!(
            "no audio data in {}",
            path.display()
        )));
    }

    let samples: Vec<f32> = stdout
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    debug!(
        path = %path.display(),
        samples = samples.len(),
        sample_rate,
        "Decoded audio to mono f32"
    );

    Ok(samples)
}

/// Decode a video to letterboxed RGBA frames at a fixed size and frame rate.
///
/// Frames are scaled with aspect preserved and padded to `width`×`height`
/// with black.
pub async fn decode_video_rgba(
    path: impl AsRef<Path>,
    width: u32,
    height: u32,
    fps: u32,
) -> MediaResult<Vec<RawFrame>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let filter = format!(
        "fps={fps},scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black",
        fps = fps,
        w = width,
        h = height,
    );

    let stdout = FfmpegCommand::new()
        .input_file(path.to_string_lossy())
        .output_args(["-an", "-vf", &filter, "-f", "rawvideo", "-pix_fmt", "rgba"])
        .output("pipe:1")
        .run_collect_stdout()
        .await
        .map_err(|e| match e {
            MediaError::FfmpegFailed { stderr, .. } => MediaError::video_decode(format!(
                "{}: {}",
                path.display(),
                stderr.unwrap_or_default()
            )),
            other => other,
        })?;

    let frame_bytes = (width * height * 4) as usize;
    if stdout.len() < frame_bytes {
        return Err(MediaError::video_decode(format!(
            "no frames decoded from {}",
            path.display()
        )));
    }

    let frames: Vec<RawFrame> = stdout
        .chunks_exact(frame_bytes)
        .map(|chunk| RawFrame {
            data: chunk.to_vec(),
            width,
            height,
        })
        .collect();

    debug!(
        path = %path.display(),
        frames = frames.len(),
        size = format!("{}x{}", width, height),
        fps,
        "Decoded video to RGBA frames"
    );

    Ok(frames)
}

/// Extract the audio track of a media file to a standalone AAC file.
///
/// Returns `Ok(false)` when the source has no audio stream.
pub async fn extract_audio_track(
    source: impl AsRef<Path>,
    dest: impl AsRef<Path>,
) -> MediaResult<bool> {
    let source = source.as_ref();
    let dest = dest.as_ref();

    let info = crate::probe::probe_media(source).await?;
    if !info.has_audio {
        return Ok(false);
    }

    FfmpegCommand::new()
        .input_file(source.to_string_lossy())
        .output_args(["-vn", "-c:a", "aac", "-b:a", "128k"])
        .output(dest.to_string_lossy())
        .run()
        .await?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_decode_audio_missing_file() {
        let err = decode_audio_f32_mono("/nonexistent/a.mp3", 16_000)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_decode_video_missing_file() {
        let err = decode_video_rgba("/nonexistent/v.mp4", 320, 180, 30)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
