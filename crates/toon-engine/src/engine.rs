//! The stream engine loop.
//!
//! One tokio task owns every piece of mutable streaming state: the scene
//! compositor and its caches, the TV player, synced playback, the caption,
//! the render queue, and the encoder's write side. HTTP handlers talk to
//! the loop through a command channel, so all mutation happens on the
//! loop, and the encoder sees exactly one video frame and one audio chunk
//! per tick, in order.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use toon_audio::{silence_chunk, AudioClip, SyncedPlayback};
use toon_compositor::{
    BlendMode, CacheStats, CaptionRenderer, LayerStore, SceneCompositor, TvCompositor, TvItemSpec,
    TvState,
};
use toon_media::ContinuousEncoder;
use toon_models::{
    CharacterSide, EncoderSettings, ExpressionLimits, ExpressionOffsets, Manifest, Phoneme,
    StreamMode, StreamSettings,
};

use crate::error::{EngineError, EngineResult};
use crate::pipeline::FramePipeline;
use crate::planner::plan_from_text;

/// Seconds past clip end before its temp file is removed.
const CLEANUP_GRACE_SECS: u64 = 5;
/// Frames between flicker toggles while flicker is enabled.
const FLICKER_PERIOD_FRAMES: u64 = 5;

/// Filesystem and stream configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub manifest_path: PathBuf,
    pub layers_dir: PathBuf,
    pub limits_path: PathBuf,
    pub stream: StreamSettings,
    pub encoder: EncoderSettings,
}

/// How `/render` admits a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Replace whatever is playing.
    Direct,
    /// Queue behind the active clip.
    Router,
}

impl std::str::FromStr for RenderMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(RenderMode::Direct),
            "router" => Ok(RenderMode::Router),
            _ => Err(()),
        }
    }
}

/// A decoded clip ready for playback.
pub struct RenderRequest {
    pub clip: AudioClip,
    /// Whole-clip phoneme timeline, when rhubarb analyzed it.
    pub timeline: Option<Vec<Phoneme>>,
    pub mode: RenderMode,
    /// Uploaded temp file, removed after the clip finishes.
    pub temp_path: Option<PathBuf>,
}

/// `/render` response payload.
#[derive(Debug, Clone, Serialize)]
pub struct RenderResponse {
    #[serde(rename = "streamUrl")]
    pub stream_url: String,
    pub duration: f64,
    pub queued: bool,
    #[serde(rename = "queuePosition", skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

/// `/stream-info` payload.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    #[serde(rename = "streamUrl")]
    pub stream_url: String,
    #[serde(rename = "frameCount")]
    pub frame_count: u64,
    pub state: String,
    #[serde(rename = "lipsyncMode")]
    pub lipsync_mode: String,
    pub caches: CacheStatsInfo,
}

/// Cache occupancy reported through `/stream-info`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsInfo {
    pub transform: usize,
    pub l1: usize,
    pub l2: usize,
    pub output: usize,
}

impl From<CacheStats> for CacheStatsInfo {
    fn from(stats: CacheStats) -> Self {
        Self {
            transform: stats.transform,
            l1: stats.l1,
            l2: stats.l2,
            output: stats.output,
        }
    }
}

/// `/health` payload.
#[derive(Debug, Clone, Serialize)]
pub struct HealthInfo {
    pub status: String,
    pub streaming: bool,
    #[serde(rename = "lipsyncMode")]
    pub lipsync_mode: String,
    #[serde(rename = "streamMode")]
    pub stream_mode: String,
}

/// TV control verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TvControl {
    Play,
    Pause,
    Stop,
    Next,
    Hold,
    Release,
}

/// TV status after a control or playlist call.
#[derive(Debug, Clone, Serialize)]
pub struct TvStatus {
    pub state: TvState,
    pub items: usize,
    #[serde(rename = "audioPath", skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
}

enum Command {
    Render {
        request: RenderRequest,
        reply: oneshot::Sender<RenderResponse>,
    },
    PlaybackStart,
    StreamInfo {
        reply: oneshot::Sender<StreamInfo>,
    },
    Health {
        reply: oneshot::Sender<HealthInfo>,
    },
    SetHue(f64),
    SetEmission {
        opacity: Option<f32>,
        blend: Option<BlendMode>,
    },
    SetLights(bool),
    SetFlicker(bool),
    SetOffsets {
        character: CharacterSide,
        offsets: ExpressionOffsets,
    },
    SetLimits {
        limits: ExpressionLimits,
        reply: oneshot::Sender<Result<(), String>>,
    },
    TvPlaylist {
        specs: Vec<TvItemSpec>,
        reply: oneshot::Sender<Result<TvStatus, String>>,
    },
    TvControl {
        control: TvControl,
        reply: oneshot::Sender<TvStatus>,
    },
}

/// Cloneable handle HTTP handlers use to reach the loop.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
    stream_url: String,
    settings: StreamSettings,
}

impl EngineHandle {
    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> EngineResult<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(build(tx))
            .map_err(|_| EngineError::NotRunning)?;
        rx.await.map_err(|_| EngineError::NotRunning)
    }

    /// Submit a decoded clip for playback.
    pub async fn render(&self, request: RenderRequest) -> EngineResult<RenderResponse> {
        self.request(|reply| Command::Render { request, reply }).await
    }

    /// Start the analyzer clock in separate-audio mode.
    pub fn playback_start(&self) -> EngineResult<()> {
        self.tx
            .send(Command::PlaybackStart)
            .map_err(|_| EngineError::NotRunning)
    }

    pub async fn stream_info(&self) -> EngineResult<StreamInfo> {
        self.request(|reply| Command::StreamInfo { reply }).await
    }

    pub async fn health(&self) -> EngineResult<HealthInfo> {
        self.request(|reply| Command::Health { reply }).await
    }

    pub fn set_hue(&self, degrees: f64) -> EngineResult<()> {
        self.tx
            .send(Command::SetHue(degrees))
            .map_err(|_| EngineError::NotRunning)
    }

    pub fn set_emission(&self, opacity: Option<f32>, blend: Option<BlendMode>) -> EngineResult<()> {
        self.tx
            .send(Command::SetEmission { opacity, blend })
            .map_err(|_| EngineError::NotRunning)
    }

    pub fn set_lights(&self, on: bool) -> EngineResult<()> {
        self.tx
            .send(Command::SetLights(on))
            .map_err(|_| EngineError::NotRunning)
    }

    pub fn set_flicker(&self, on: bool) -> EngineResult<()> {
        self.tx
            .send(Command::SetFlicker(on))
            .map_err(|_| EngineError::NotRunning)
    }

    pub fn set_offsets(
        &self,
        character: CharacterSide,
        offsets: ExpressionOffsets,
    ) -> EngineResult<()> {
        self.tx
            .send(Command::SetOffsets { character, offsets })
            .map_err(|_| EngineError::NotRunning)
    }

    pub async fn set_limits(&self, limits: ExpressionLimits) -> EngineResult<Result<(), String>> {
        self.request(|reply| Command::SetLimits { limits, reply })
            .await
    }

    pub async fn tv_playlist(&self, specs: Vec<TvItemSpec>) -> EngineResult<Result<TvStatus, String>> {
        self.request(|reply| Command::TvPlaylist { specs, reply })
            .await
    }

    pub async fn tv_control(&self, control: TvControl) -> EngineResult<TvStatus> {
        self.request(|reply| Command::TvControl { control, reply })
            .await
    }
}

/// A static base rebuilt off-loop for a hue update.
struct HueResult {
    update_id: u64,
    degrees: f64,
    image: Arc<RgbaImage>,
}

/// A playlist decoded off-loop, ready to install.
struct TvLoaded {
    items: Vec<toon_compositor::TvItem>,
    reply: oneshot::Sender<Result<TvStatus, String>>,
}

/// The loop-owned engine state.
pub struct StreamEngine {
    config: EngineConfig,
    scene: SceneCompositor,
    tv: TvCompositor,
    playback: SyncedPlayback,
    pipeline: FramePipeline,
    captions: CaptionRenderer,
    encoder: ContinuousEncoder,

    frame: u64,
    queue: VecDeque<RenderRequest>,
    caption_text: Option<String>,
    caption_until: Option<Instant>,
    playback_start_frame: u64,

    silence: Vec<u8>,
    last_jpeg: Option<Arc<Vec<u8>>>,
    last_rgb: Vec<u8>,

    hue_update_id: u64,
    hue_tx: mpsc::UnboundedSender<HueResult>,
    hue_rx: mpsc::UnboundedReceiver<HueResult>,
    tv_tx: mpsc::UnboundedSender<TvLoaded>,
    tv_rx: mpsc::UnboundedReceiver<TvLoaded>,
}

impl StreamEngine {
    /// Load assets, start the encoder, and spawn the frame loop.
    pub async fn start(config: EngineConfig) -> EngineResult<EngineHandle> {
        let manifest = Manifest::load(&config.manifest_path)?;
        let layers_dir = config.layers_dir.clone();
        let scale = config.stream.output_scale;
        let store = tokio::task::spawn_blocking(move || {
            LayerStore::load(&manifest, &layers_dir, scale)
        })
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;
        let store = Arc::new(store);

        let limits = ExpressionLimits::load_or_default(&config.limits_path);
        let scene = SceneCompositor::new(Arc::clone(&store), limits);
        let tv = TvCompositor::new(store.tv_viewport, config.stream.stream_fps);
        let playback = SyncedPlayback::new(config.stream.clone());
        let pipeline = FramePipeline::new(config.stream.clone());
        let captions = CaptionRenderer::new(store.output_width, store.output_height);

        let encoder = ContinuousEncoder::start(
            store.output_width,
            store.output_height,
            config.encoder.clone(),
            config.stream.clone(),
            config.stream.stream_mode == StreamMode::Synced,
        )
        .await?;

        let silence = silence_chunk(config.stream.output_sample_rate, config.stream.stream_fps);
        let stream_url = format!(
            "/{}",
            config.encoder.playlist_path().to_string_lossy().replace('\\', "/")
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let (hue_tx, hue_rx) = mpsc::unbounded_channel();
        let (tv_tx, tv_rx) = mpsc::unbounded_channel();

        let handle = EngineHandle {
            tx,
            stream_url,
            settings: config.stream.clone(),
        };

        let engine = Self {
            config,
            scene,
            tv,
            playback,
            pipeline,
            captions,
            encoder,
            frame: 0,
            queue: VecDeque::new(),
            caption_text: None,
            caption_until: None,
            playback_start_frame: 0,
            silence,
            last_jpeg: None,
            last_rgb: Vec::new(),
            hue_update_id: 0,
            hue_tx,
            hue_rx,
            tv_tx,
            tv_rx,
        };

        tokio::spawn(engine.run(rx));
        info!("Stream engine started");
        Ok(handle)
    }

    /// The frame loop: one video frame and one audio chunk per tick.
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let period = Duration::from_secs_f64(1.0 / self.config.stream.stream_fps as f64);
        let mut ticker = tokio::time::interval(period);

        loop {
            ticker.tick().await;

            // Commands and off-loop results first, so this tick sees them.
            loop {
                match rx.try_recv() {
                    Ok(command) => self.handle_command(command).await,
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        info!("Engine handle dropped, shutting down");
                        self.encoder.shutdown().await;
                        return;
                    }
                }
            }
            while let Ok(result) = self.hue_rx.try_recv() {
                if result.update_id == self.hue_update_id {
                    self.scene.install_hue(result.degrees, result.image);
                } else {
                    // A newer hue request superseded this build.
                    info!(stale = result.update_id, "Discarding stale hue rebuild");
                }
            }
            while let Ok(loaded) = self.tv_rx.try_recv() {
                self.tv.install(loaded.items);
                let _ = loaded.reply.send(Ok(self.tv_status()));
            }

            self.check_playback_complete();
            self.apply_flicker();
            self.tick().await;
            self.frame += 1;
        }
    }

    /// Render and feed the encoder for one tick.
    async fn tick(&mut self) {
        let caption = self.current_caption();

        let jpeg = match self.pipeline.tick(
            self.frame,
            &mut self.scene,
            &mut self.tv,
            &mut self.playback,
            caption,
        ) {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                // Degrade to the last frame; timing never breaks.
                error!(frame = self.frame, error = %e, "Frame render failed");
                self.last_jpeg.clone()
            }
        };

        if let Some(jpeg) = jpeg {
            let same = self
                .last_jpeg
                .as_ref()
                .is_some_and(|last| Arc::ptr_eq(last, &jpeg));
            if !same || self.last_rgb.is_empty() {
                match decode_to_rgb24(&jpeg) {
                    Ok(rgb) => self.last_rgb = rgb,
                    Err(e) => warn!(error = %e, "Frame decode for encoder failed"),
                }
            }
            self.last_jpeg = Some(jpeg);
        }

        if !self.last_rgb.is_empty() {
            if let Err(e) = self.encoder.write_frame(&self.last_rgb).await {
                warn!(error = %e, "Video write failed");
            }
        }

        if self.config.stream.stream_mode == StreamMode::Synced {
            let chunk = match self.playback.next_audio_chunk() {
                Some(chunk) => chunk.to_vec(),
                None => self.silence.clone(),
            };
            if let Err(e) = self.encoder.write_audio(&chunk).await {
                warn!(error = %e, "Audio write failed");
            }
        }
    }

    /// The caption overlay for this tick, if one is live.
    fn current_caption(&mut self) -> Option<Arc<toon_compositor::CaptionOverlay>> {
        if let Some(until) = self.caption_until {
            if Instant::now() >= until {
                self.caption_text = None;
                self.caption_until = None;
            }
        }
        let text = self.caption_text.clone()?;
        match self.captions.render(&text) {
            Ok(overlay) => Some(overlay),
            Err(e) => {
                warn!(error = %e, "Caption render failed");
                None
            }
        }
    }

    /// Toggle the lights-on overlay periodically while flicker is enabled.
    fn apply_flicker(&mut self) {
        if !self.scene.lighting().flicker {
            return;
        }
        if self.frame % FLICKER_PERIOD_FRAMES == 0 {
            let on = self.scene.lighting().lights_on;
            self.scene.set_lights(!on);
        }
    }

    /// End-of-clip bookkeeping and queue draining.
    ///
    /// A completed clip tears down this tick and the queue pops on the
    /// next, so consecutive clips always show one idle frame between them.
    fn check_playback_complete(&mut self) {
        if self.playback.is_started() {
            let complete = match self.config.stream.stream_mode {
                StreamMode::Synced => self.playback.audio_exhausted(),
                StreamMode::Separate => self.playback.analysis_exhausted(),
            };
            if complete {
                info!(
                    frame = self.frame,
                    started_at = self.playback_start_frame,
                    "Clip playback complete"
                );
                self.playback.clear();
                self.scene.set_speaker(None);
                self.scene.reset_offsets();
                self.pipeline.reset_plan();
                self.caption_text = None;
                self.caption_until = None;
            }
            return;
        }

        if !self.playback.is_active() {
            if let Some(next) = self.queue.pop_front() {
                self.start_clip(next);
            }
        }
    }

    /// Begin a clip: speaker, playback, plan, caption, cleanup timer.
    fn start_clip(&mut self, request: RenderRequest) {
        let character = request.clip.character;
        let caption = request.clip.caption.clone();
        let duration = request.clip.duration;

        info!(
            character = %character,
            duration,
            rhubarb = request.timeline.is_some(),
            "Starting clip"
        );

        self.scene.set_speaker(Some(character));
        self.playback.load(request.clip, request.timeline);
        if self.config.stream.stream_mode == StreamMode::Synced {
            self.playback.start();
        }
        self.playback_start_frame = self.frame;

        if !caption.is_empty() {
            let plan = plan_from_text(&caption, character, duration);
            self.pipeline.load_plan(&plan, self.scene.limits());
            self.caption_text = Some(caption);
            self.caption_until = Some(Instant::now() + Duration::from_secs_f64(duration));
        } else {
            self.pipeline.reset_plan();
            self.caption_text = None;
            self.caption_until = None;
        }

        if let Some(path) = request.temp_path {
            let delay = Duration::from_secs_f64(duration) + Duration::from_secs(CLEANUP_GRACE_SECS);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Clip temp cleanup failed");
                }
            });
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Render { request, reply } => {
                let duration = request.clip.duration;
                let stream_url = format!(
                    "/{}",
                    self.config
                        .encoder
                        .playlist_path()
                        .to_string_lossy()
                        .replace('\\', "/")
                );

                let response = if self.playback.is_active() && request.mode == RenderMode::Router {
                    self.queue.push_back(request);
                    RenderResponse {
                        stream_url,
                        duration,
                        queued: true,
                        queue_position: Some(self.queue.len()),
                    }
                } else {
                    if self.playback.is_active() {
                        // Direct mode replaces the active clip immediately.
                        self.playback.clear();
                        self.scene.set_speaker(None);
                        self.pipeline.reset_plan();
                    }
                    self.start_clip(request);
                    RenderResponse {
                        stream_url,
                        duration,
                        queued: false,
                        queue_position: None,
                    }
                };
                let _ = reply.send(response);
            }
            Command::PlaybackStart => {
                self.playback.start();
                self.playback_start_frame = self.frame;
            }
            Command::StreamInfo { reply } => {
                let state = if self.playback.is_active() { "speaking" } else { "idle" };
                let _ = reply.send(StreamInfo {
                    stream_url: format!(
                        "/{}",
                        self.config
                            .encoder
                            .playlist_path()
                            .to_string_lossy()
                            .replace('\\', "/")
                    ),
                    frame_count: self.frame,
                    state: state.to_string(),
                    lipsync_mode: format!("{:?}", self.config.stream.lipsync_mode).to_lowercase(),
                    caches: self.scene.cache_stats().into(),
                });
            }
            Command::Health { reply } => {
                let streaming = self.encoder.is_running().await;
                let _ = reply.send(HealthInfo {
                    status: if streaming { "ok" } else { "degraded" }.to_string(),
                    streaming,
                    lipsync_mode: format!("{:?}", self.config.stream.lipsync_mode).to_lowercase(),
                    stream_mode: format!("{:?}", self.config.stream.stream_mode).to_lowercase(),
                });
            }
            Command::SetHue(degrees) => {
                self.hue_update_id += 1;
                let update_id = self.hue_update_id;
                let store = Arc::clone(self.scene.store());
                let mut lighting = self.scene.lighting();
                lighting.hue_degrees = degrees;
                let tx = self.hue_tx.clone();
                tokio::task::spawn_blocking(move || {
                    let image = Arc::new(toon_compositor::static_base::compose_static_base(
                        &store, &lighting,
                    ));
                    let _ = tx.send(HueResult {
                        update_id,
                        degrees,
                        image,
                    });
                });
            }
            Command::SetEmission { opacity, blend } => {
                self.scene.set_emission(opacity, blend);
            }
            Command::SetLights(on) => self.scene.set_lights(on),
            Command::SetFlicker(on) => self.scene.set_flicker(on),
            Command::SetOffsets { character, offsets } => {
                self.scene.set_offsets(character, offsets);
            }
            Command::SetLimits { limits, reply } => {
                self.scene.set_limits(limits.clone());
                // Persistence is opportunistic; memory stays authoritative.
                let result = limits
                    .persist(&self.config.limits_path)
                    .map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            Command::TvPlaylist { specs, reply } => {
                // Decoding happens off the loop; the reply waits for the
                // install so the caller sees the final status.
                let viewport = self.tv.viewport();
                let fps = self.tv.fps();
                let tv_tx = self.tv_tx.clone();
                tokio::spawn(async move {
                    let items = TvCompositor::decode_playlist(viewport, fps, specs).await;
                    let _ = tv_tx.send(TvLoaded { items, reply });
                });
            }
            Command::TvControl { control, reply } => {
                match control {
                    TvControl::Play => self.tv.play(),
                    TvControl::Pause => self.tv.pause(),
                    TvControl::Stop => self.tv.stop(),
                    TvControl::Next => self.tv.advance(),
                    TvControl::Hold => self.tv.set_hold(true),
                    TvControl::Release => self.tv.set_hold(false),
                }
                let _ = reply.send(self.tv_status());
            }
        }
    }

    fn tv_status(&self) -> TvStatus {
        TvStatus {
            state: self.tv.state(),
            items: self.tv.item_count(),
            audio_path: self.tv.current_audio_path().map(|p| p.to_path_buf()),
        }
    }
}

/// Decode a cached JPEG into the encoder's packed RGB24 layout.
fn decode_to_rgb24(jpeg: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let rgb = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)?.to_rgb8();
    Ok(rgb.into_raw())
}
