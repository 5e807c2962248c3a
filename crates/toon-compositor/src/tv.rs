//! TV-region sub-compositor.
//!
//! Owns a small playlist of decoded image/video items pre-sized to the TV
//! viewport. One `tick` per video frame advances the frame index; the
//! active frame is handed to the output composite. Audio is never mixed
//! here; an extracted audio track path is surfaced per item for the outer
//! system.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use toon_models::Rect;

use crate::error::CompositorResult;

/// Playback state of the TV region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TvState {
    Stopped,
    Playing,
    Paused,
}

/// One playlist entry as submitted through the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TvItemSpec {
    Image {
        source: PathBuf,
        /// Seconds the image is held on screen.
        duration: f64,
    },
    Video {
        source: PathBuf,
    },
}

/// A loaded playlist item.
pub struct TvItem {
    pub spec: TvItemSpec,
    /// Decoded frames at the viewport size; one frame for images.
    pub frames: Vec<Arc<RgbaImage>>,
    /// Ticks the item occupies before looping or advancing.
    pub frame_count: u64,
    pub is_static_image: bool,
    /// Extracted audio track for the outer system, when the source has one.
    pub audio_path: Option<PathBuf>,
    /// Load failure; errored items are skipped on advance.
    pub error: Option<String>,
}

impl TvItem {
    fn failed(spec: TvItemSpec, error: String) -> Self {
        Self {
            spec,
            frames: Vec::new(),
            frame_count: 0,
            is_static_image: false,
            audio_path: None,
            error: Some(error),
        }
    }

    fn playable(&self) -> bool {
        self.error.is_none() && !self.frames.is_empty() && self.frame_count > 0
    }
}

/// The TV playlist player.
pub struct TvCompositor {
    viewport: Rect,
    fps: u32,
    items: Vec<TvItem>,
    current: usize,
    frame_index: u64,
    state: TvState,
    /// Hold loops the current item; otherwise playback auto-advances.
    hold: bool,
}

impl TvCompositor {
    /// Create an empty player for the given viewport.
    pub fn new(viewport: Rect, fps: u32) -> Self {
        Self {
            viewport,
            fps,
            items: Vec::new(),
            current: 0,
            frame_index: 0,
            state: TvState::Stopped,
            hold: false,
        }
    }

    /// Decode a playlist's items up front, sized to `viewport` at `fps`.
    ///
    /// Item failures are recorded on the item rather than failing the
    /// whole playlist; this runs off the frame loop and the result is
    /// handed to `install`.
    pub async fn decode_playlist(viewport: Rect, fps: u32, specs: Vec<TvItemSpec>) -> Vec<TvItem> {
        let mut items = Vec::with_capacity(specs.len());
        for spec in specs {
            let item = match decode_item(viewport, fps, &spec).await {
                Ok(item) => item,
                Err(e) => {
                    warn!(spec = ?spec, error = %e, "TV item failed to load");
                    TvItem::failed(spec, e.to_string())
                }
            };
            items.push(item);
        }

        info!(
            items = items.len(),
            failed = items.iter().filter(|i| i.error.is_some()).count(),
            "TV playlist decoded"
        );
        items
    }

    /// Swap in a decoded playlist, resetting position and state.
    pub fn install(&mut self, items: Vec<TvItem>) {
        self.items = items;
        self.current = 0;
        self.frame_index = 0;
        self.state = TvState::Stopped;
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Advance one video tick while playing.
    pub fn tick(&mut self) {
        if self.state != TvState::Playing {
            return;
        }
        let Some(item) = self.items.get(self.current) else {
            return;
        };

        self.frame_index += 1;
        if self.frame_index >= item.frame_count {
            if self.hold {
                self.frame_index = 0;
            } else {
                self.advance();
            }
        }
    }

    /// Move to the next playable item, wrapping around.
    pub fn advance(&mut self) {
        if self.items.is_empty() {
            return;
        }
        let start = self.current;
        loop {
            self.current = (self.current + 1) % self.items.len();
            self.frame_index = 0;
            if self.items[self.current].playable() {
                return;
            }
            if self.current == start {
                // Nothing playable left.
                self.state = TvState::Stopped;
                return;
            }
        }
    }

    /// The active frame and a content key for output caching.
    ///
    /// The key identifies frame *content*: a held static image keeps one
    /// key, a playing video changes key every tick.
    pub fn current_frame(&self) -> Option<(u64, Arc<RgbaImage>)> {
        if self.state == TvState::Stopped {
            return None;
        }
        let item = self.items.get(self.current)?;
        if !item.playable() {
            return None;
        }
        let content_index = (self.frame_index as usize).min(item.frames.len() - 1);
        let key = ((self.current as u64) << 32) | content_index as u64;
        Some((key, Arc::clone(&item.frames[content_index])))
    }

    pub fn play(&mut self) {
        if self.items.iter().any(|i| i.playable()) {
            if !self.items[self.current].playable() {
                self.advance();
            }
            self.state = TvState::Playing;
        }
    }

    pub fn pause(&mut self) {
        if self.state == TvState::Playing {
            self.state = TvState::Paused;
        }
    }

    pub fn stop(&mut self) {
        self.state = TvState::Stopped;
        self.frame_index = 0;
        self.current = 0;
    }

    pub fn set_hold(&mut self, hold: bool) {
        self.hold = hold;
    }

    pub fn state(&self) -> TvState {
        self.state
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Audio path of the active item, for the outer orchestrator.
    pub fn current_audio_path(&self) -> Option<&Path> {
        self.items
            .get(self.current)
            .and_then(|i| i.audio_path.as_deref())
    }
}

/// Decode one playlist item to viewport-sized frames.
async fn decode_item(viewport: Rect, fps: u32, spec: &TvItemSpec) -> CompositorResult<TvItem> {
    match spec {
        TvItemSpec::Image { source, duration } => {
            let decoded = image::open(source)
                .map_err(|e| crate::error::CompositorError::image_decode(source, e.to_string()))?
                .to_rgba8();
            let frame = contain_fit(&decoded, viewport.width, viewport.height);
            Ok(TvItem {
                spec: spec.clone(),
                frames: vec![Arc::new(frame)],
                frame_count: (duration * fps as f64).ceil().max(1.0) as u64,
                is_static_image: true,
                audio_path: None,
                error: None,
            })
        }
        TvItemSpec::Video { source } => {
            let frames =
                toon_media::decode_video_rgba(source, viewport.width, viewport.height, fps).await?;

            let audio_path = extract_item_audio(source).await;

            let frames: Vec<Arc<RgbaImage>> = frames
                .into_iter()
                .map(|f| {
                    Arc::new(
                        RgbaImage::from_raw(f.width, f.height, f.data)
                            .unwrap_or_else(|| RgbaImage::new(f.width, f.height)),
                    )
                })
                .collect();
            let frame_count = frames.len() as u64;

            Ok(TvItem {
                spec: spec.clone(),
                frames,
                frame_count,
                is_static_image: false,
                audio_path,
                error: None,
            })
        }
    }
}

/// Scale with preserved aspect onto a black canvas of the viewport size.
fn contain_fit(src: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let scale = (width as f64 / src.width() as f64).min(height as f64 / src.height() as f64);
    let scaled_w = ((src.width() as f64 * scale).round() as u32).max(1);
    let scaled_h = ((src.height() as f64 * scale).round() as u32).max(1);
    let scaled = image::imageops::resize(src, scaled_w, scaled_h, FilterType::Triangle);

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
    let x = (width - scaled_w) / 2;
    let y = (height - scaled_h) / 2;
    image::imageops::overlay(&mut canvas, &scaled, x as i64, y as i64);
    canvas
}

/// Extract the source's audio track next to it; best-effort.
async fn extract_item_audio(source: &Path) -> Option<PathBuf> {
    let dest = source.with_extension("audio.m4a");
    match toon_media::extract_audio_track(source, &dest).await {
        Ok(true) => Some(dest),
        Ok(false) => None,
        Err(e) => {
            warn!(source = %source.display(), error = %e, "TV audio extraction failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_item(frame_count: u64) -> TvItem {
        TvItem {
            spec: TvItemSpec::Image {
                source: PathBuf::from("x.png"),
                duration: 1.0,
            },
            frames: vec![Arc::new(RgbaImage::new(4, 4))],
            frame_count,
            is_static_image: true,
            audio_path: None,
            error: None,
        }
    }

    fn video_item(frames: usize) -> TvItem {
        TvItem {
            spec: TvItemSpec::Video {
                source: PathBuf::from("x.mp4"),
            },
            frames: (0..frames).map(|_| Arc::new(RgbaImage::new(4, 4))).collect(),
            frame_count: frames as u64,
            is_static_image: false,
            audio_path: None,
            error: None,
        }
    }

    fn player_with(items: Vec<TvItem>) -> TvCompositor {
        let mut tv = TvCompositor::new(Rect::new(0, 0, 4, 4), 30);
        tv.items = items;
        tv
    }

    #[test]
    fn test_stopped_yields_no_frame() {
        let tv = player_with(vec![image_item(30)]);
        assert!(tv.current_frame().is_none());
    }

    #[test]
    fn test_static_image_key_is_stable() {
        let mut tv = player_with(vec![image_item(30)]);
        tv.play();
        let (k1, _) = tv.current_frame().unwrap();
        tv.tick();
        tv.tick();
        let (k2, _) = tv.current_frame().unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_video_key_advances_every_tick() {
        let mut tv = player_with(vec![video_item(10)]);
        tv.play();
        let (k1, _) = tv.current_frame().unwrap();
        tv.tick();
        let (k2, _) = tv.current_frame().unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_hold_loops_current_item() {
        let mut tv = player_with(vec![video_item(3), video_item(3)]);
        tv.set_hold(true);
        tv.play();
        for _ in 0..3 {
            tv.tick();
        }
        // Still on item 0, wrapped to its first frame.
        let (key, _) = tv.current_frame().unwrap();
        assert_eq!(key, 0);
    }

    #[test]
    fn test_auto_advance_moves_to_next() {
        let mut tv = player_with(vec![video_item(3), video_item(3)]);
        tv.play();
        for _ in 0..3 {
            tv.tick();
        }
        let (key, _) = tv.current_frame().unwrap();
        assert_eq!(key >> 32, 1);
    }

    #[test]
    fn test_errored_item_skipped() {
        let mut tv = player_with(vec![
            video_item(2),
            TvItem::failed(
                TvItemSpec::Video {
                    source: PathBuf::from("broken.mp4"),
                },
                "decode failed".to_string(),
            ),
            video_item(2),
        ]);
        tv.play();
        tv.tick();
        tv.tick();
        // Skips the failed middle item.
        let (key, _) = tv.current_frame().unwrap();
        assert_eq!(key >> 32, 2);
    }

    #[test]
    fn test_pause_freezes_index() {
        let mut tv = player_with(vec![video_item(10)]);
        tv.play();
        tv.tick();
        tv.pause();
        let (k1, _) = tv.current_frame().unwrap();
        tv.tick();
        let (k2, _) = tv.current_frame().unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_contain_fit_letterboxes() {
        let src = RgbaImage::from_pixel(100, 50, Rgba([255, 255, 255, 255]));
        let out = contain_fit(&src, 60, 60);
        assert_eq!(out.dimensions(), (60, 60));
        // Top band is padding.
        assert_eq!(out.get_pixel(30, 2).0, [0, 0, 0, 255]);
        // Center is content.
        assert_eq!(out.get_pixel(30, 30).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_spec_serde() {
        let json = r#"[{"type": "image", "source": "a.png", "duration": 5.0},
                       {"type": "video", "source": "b.mp4"}]"#;
        let specs: Vec<TvItemSpec> = serde_json::from_str(json).unwrap();
        assert_eq!(specs.len(), 2);
        assert!(matches!(specs[0], TvItemSpec::Image { .. }));
    }
}
