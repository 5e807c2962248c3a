//! FFmpeg command builder for multi-input pipelines.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// One FFmpeg input: the arguments that precede its `-i` plus the source.
#[derive(Debug, Clone)]
struct FfmpegInput {
    args: Vec<String>,
    source: String,
}

/// Builder for FFmpeg commands.
///
/// Unlike a single-input transcode, the continuous encoder and the raw
/// decoders need multiple inputs, raw pipe formats, and outputs that are
/// pipes rather than files, so inputs are explicit groups here.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCommand {
    inputs: Vec<FfmpegInput>,
    output_args: Vec<String>,
    /// Output file, pattern, or `pipe:1`.
    output: String,
    log_level: Option<String>,
}

impl FfmpegCommand {
    /// Create a new command with an error-only log level.
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            output_args: Vec::new(),
            output: String::new(),
            log_level: Some("error".to_string()),
        }
    }

    /// Add an input with its preceding arguments.
    pub fn input<I, S>(mut self, args: I, source: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(FfmpegInput {
            args: args.into_iter().map(Into::into).collect(),
            source: source.into(),
        });
        self
    }

    /// Add a plain file input with no extra arguments.
    pub fn input_file(self, source: impl Into<String>) -> Self {
        self.input(Vec::<String>::new(), source)
    }

    /// Add an output argument.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the output destination (file path, segment pattern, or pipe).
    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    /// Build the full argument vector.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-hide_banner".to_string()];

        if let Some(level) = &self.log_level {
            args.push("-loglevel".to_string());
            args.push(level.clone());
        }

        for input in &self.inputs {
            args.extend(input.args.clone());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        args.extend(self.output_args.clone());
        args.push(self.output.clone());

        args
    }

    /// Run to completion, collecting stdout. Suitable for decodes and
    /// one-shot extractions, not for the continuous encoder.
    pub async fn run_collect_stdout(&self) -> MediaResult<Vec<u8>> {
        check_ffmpeg()?;

        let args = self.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let output = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(stderr.to_string()),
                output.status.code(),
            ));
        }

        Ok(output.stdout)
    }

    /// Run to completion, discarding stdout.
    pub async fn run(&self) -> MediaResult<()> {
        self.run_collect_stdout().await.map(|_| ())
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_input_ordering() {
        let cmd = FfmpegCommand::new()
            .input(["-f", "rawvideo", "-pix_fmt", "rgb24"], "pipe:0")
            .input(["-f", "s16le", "-ar", "44100", "-ac", "2"], "/tmp/audio.fifo")
            .output_args(["-c:v", "libx264"])
            .output("out.m3u8");

        let args = cmd.build_args();
        let first_i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[first_i + 1], "pipe:0");
        let second_i = args.iter().rposition(|a| a == "-i").unwrap();
        assert_eq!(args[second_i + 1], "/tmp/audio.fifo");
        assert_eq!(args.last().unwrap(), "out.m3u8");
        // Input args precede their own -i.
        assert!(args.iter().position(|a| a == "rgb24").unwrap() < first_i);
    }

    #[test]
    fn test_overwrite_and_loglevel() {
        let args = FfmpegCommand::new().output("x.mp4").build_args();
        assert_eq!(args[0], "-y");
        assert!(args.contains(&"-loglevel".to_string()));
    }
}
