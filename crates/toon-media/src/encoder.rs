//! Continuous single-process HLS encoder.
//!
//! One long-lived FFmpeg child receives raw 24-bit RGB video on stdin and
//! S16LE stereo PCM on a FIFO, and emits a rolling HLS playlist of short
//! MPEG-TS segments. The child never restarts during normal operation; a
//! watchdog respawns it one second after an unexpected exit while the
//! stream is running.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::stat::Mode;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use toon_models::{EncoderSettings, StreamSettings};

use crate::command::{check_ffmpeg, FfmpegCommand};
use crate::error::{MediaError, MediaResult};

/// Delay before respawning the encoder after an unexpected exit.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Open write ends of the encoder's two input pipes.
struct EncoderPipes {
    video: ChildStdin,
    audio: Option<tokio::fs::File>,
}

/// The continuous encoder handle.
///
/// Writes are single-producer: only the frame loop calls `write_frame` and
/// `write_audio`, one chunk of each per tick. The watchdog task owns the
/// child process and is the only code that replaces the pipes.
pub struct ContinuousEncoder {
    width: u32,
    height: u32,
    settings: EncoderSettings,
    stream: StreamSettings,
    /// Whether the audio input pipe exists (synced stream mode).
    with_audio: bool,
    fifo_path: PathBuf,
    pipes: Arc<Mutex<Option<EncoderPipes>>>,
    running: Arc<AtomicBool>,
}

impl ContinuousEncoder {
    /// Spawn the encoder process and its watchdog.
    pub async fn start(
        width: u32,
        height: u32,
        settings: EncoderSettings,
        stream: StreamSettings,
        with_audio: bool,
    ) -> MediaResult<Self> {
        check_ffmpeg()?;

        tokio::fs::create_dir_all(&settings.stream_dir).await?;

        let fifo_path = settings.stream_dir.join("audio.fifo");
        if with_audio {
            make_fifo(&fifo_path)?;
        }

        let encoder = Self {
            width,
            height,
            settings,
            stream,
            with_audio,
            fifo_path,
            pipes: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(true)),
        };

        let (child, pipes) = encoder.spawn_process().await?;
        *encoder.pipes.lock().await = Some(pipes);
        encoder.spawn_watchdog(child);

        info!(
            size = format!("{}x{}", width, height),
            fps = encoder.stream.stream_fps,
            playlist = %encoder.settings.playlist_path().display(),
            with_audio,
            "Continuous encoder started"
        );

        Ok(encoder)
    }

    /// Build the encoder's FFmpeg argument vector.
    fn build_args(&self) -> Vec<String> {
        let fps = self.stream.stream_fps.to_string();
        let mut cmd = FfmpegCommand::new().input(
            [
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                &format!("{}x{}", self.width, self.height),
                "-r",
                &fps,
            ],
            "pipe:0",
        );

        if self.with_audio {
            cmd = cmd.input(
                [
                    "-f",
                    "s16le",
                    "-ar",
                    &self.stream.output_sample_rate.to_string(),
                    "-ac",
                    "2",
                ],
                self.fifo_path.to_string_lossy(),
            );
        }

        cmd = cmd.output_args(["-map", "0:v"]);
        if self.with_audio {
            cmd = cmd.output_args(["-map", "1:a", "-c:a", "aac", "-b:a"]);
            cmd = cmd.output_arg(&self.settings.audio_bitrate);
            cmd = cmd.output_args(["-af", "aresample=async=1", "-async", "1"]);
        }

        cmd = cmd.output_args([
            "-c:v",
            "libx264",
            "-preset",
            &self.settings.preset,
            "-tune",
            &self.settings.tune,
            "-crf",
            &self.settings.crf.to_string(),
            "-pix_fmt",
            "yuv420p",
            "-g",
            &fps,
            "-bf",
            "0",
            "-vsync",
            "cfr",
            "-f",
            "hls",
            "-hls_time",
            &self.settings.segment_seconds.to_string(),
            "-hls_list_size",
            &self.settings.playlist_size.to_string(),
            "-hls_flags",
            "delete_segments+independent_segments",
            "-hls_segment_filename",
        ]);
        cmd = cmd.output_arg(self.settings.segment_pattern().to_string_lossy());
        cmd = cmd.output(self.settings.playlist_path().to_string_lossy());

        cmd.build_args()
    }

    /// Spawn one FFmpeg child and open both input pipes.
    async fn spawn_process(&self) -> MediaResult<(Child, EncoderPipes)> {
        let args = self.build_args();
        debug!("Encoder command: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let video = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("encoder stdin not captured", None, None))?;

        // Opening the FIFO write end parks until FFmpeg opens the read end.
        let audio = if self.with_audio {
            Some(
                tokio::fs::OpenOptions::new()
                    .write(true)
                    .open(&self.fifo_path)
                    .await?,
            )
        } else {
            None
        };

        Ok((child, EncoderPipes { video, audio }))
    }

    /// Watch the child; on unexpected exit, respawn after `RESTART_DELAY`
    /// for as long as the stream is running.
    fn spawn_watchdog(&self, mut child: Child) {
        let pipes = Arc::clone(&self.pipes);
        let running = Arc::clone(&self.running);
        let encoder = self.clone_config();

        tokio::spawn(async move {
            loop {
                let status = child.wait().await;
                if !running.load(Ordering::SeqCst) {
                    debug!("Encoder exited after shutdown");
                    break;
                }

                warn!(?status, "Encoder exited unexpectedly, restarting in 1s");
                pipes.lock().await.take();
                tokio::time::sleep(RESTART_DELAY).await;

                if !running.load(Ordering::SeqCst) {
                    break;
                }

                loop {
                    match encoder.spawn_process().await {
                        Ok((new_child, new_pipes)) => {
                            *pipes.lock().await = Some(new_pipes);
                            child = new_child;
                            info!("Encoder restarted");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "Encoder restart failed, retrying");
                            tokio::time::sleep(RESTART_DELAY).await;
                            if !running.load(Ordering::SeqCst) {
                                return;
                            }
                        }
                    }
                }
            }
        });
    }

    /// A config-only clone for the watchdog (shares pipes and running flag).
    fn clone_config(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            settings: self.settings.clone(),
            stream: self.stream.clone(),
            with_audio: self.with_audio,
            fifo_path: self.fifo_path.clone(),
            pipes: Arc::clone(&self.pipes),
            running: Arc::clone(&self.running),
        }
    }

    /// Write one raw RGB24 frame. A broken pipe drops the write; the
    /// watchdog restarts the process.
    pub async fn write_frame(&self, rgb: &[u8]) -> MediaResult<()> {
        let expected = (self.width * self.height * 3) as usize;
        if rgb.len() != expected {
            return Err(MediaError::FrameSizeMismatch {
                expected,
                got: rgb.len(),
            });
        }

        let mut guard = self.pipes.lock().await;
        let Some(pipes) = guard.as_mut() else {
            // Encoder is mid-restart; the frame is dropped, not an error.
            return Ok(());
        };

        if let Err(e) = pipes.video.write_all(rgb).await {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                warn!("Encoder video pipe broken, dropping frame");
                guard.take();
                return Ok(());
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Write one S16LE stereo PCM chunk. No-op in video-only mode.
    pub async fn write_audio(&self, pcm: &[u8]) -> MediaResult<()> {
        let mut guard = self.pipes.lock().await;
        let Some(pipes) = guard.as_mut() else {
            return Ok(());
        };
        let Some(audio) = pipes.audio.as_mut() else {
            return Ok(());
        };

        if let Err(e) = audio.write_all(pcm).await {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                warn!("Encoder audio pipe broken, dropping chunk");
                guard.take();
                return Ok(());
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Whether a child process currently has open pipes.
    pub async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.pipes.lock().await.is_some()
    }

    /// Close both pipes and let the child finalize the playlist.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.pipes.lock().await.take();
        if self.with_audio {
            let _ = tokio::fs::remove_file(&self.fifo_path).await;
        }
        info!("Continuous encoder shut down");
    }
}

/// Create a fresh FIFO at `path`, replacing any stale one.
fn make_fifo(path: &std::path::Path) -> MediaResult<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR)
        .map_err(|e| MediaError::Io(std::io::Error::other(e)))?;
    Ok(())
}
