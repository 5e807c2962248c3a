//! Scene compositor: cache traversal and the committed-base protocol.
//!
//! The frame loop owns this struct exclusively. Expression-base (L1)
//! builds and character-frame (L2) pre-warms run on the blocking pool and
//! report back through a channel drained at the start of every tick, so
//! every cache mutation happens on the loop.
//!
//! Committed-base states: idle (an L1 hit commits itself), speaking-locked
//! (the committed base is frozen so L2 lookups hit), and
//! speaking-transitioning (a freshly built L1 commits only once its
//! pre-warm finishes; the swap is a single assignment).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use image::RgbaImage;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use toon_models::{CharacterSide, ExpressionLimits, ExpressionOffsets, Phoneme};

use crate::blend::BlendMode;
use crate::cache::FrameCache;
use crate::compose::{
    compose_l1, compose_l2, compose_output, decode_jpeg, encode_jpeg, expr_digest, l1_key, l2_key,
    output_key, transform_specs, CaptionOverlay, JPEG_QUALITY,
};
use crate::error::CompositorResult;
use crate::layer_store::LayerStore;
use crate::static_base::{LightingState, StaticBase};
use crate::transforms::{
    compute_missing_transforms, ExpressionLayerCache, TransformSpec, TransformedLayer,
};

/// Expression-base cache capacity.
const L1_CAPACITY: usize = 25;
/// Character-frame cache capacity.
const L2_CAPACITY: usize = 200;
/// Output cache capacity.
const OUTPUT_CAPACITY: usize = 60;
/// Eviction batch for the frame caches.
const EVICT_BATCH: usize = 5;

/// Everything the compositor needs for one tick.
#[derive(Debug, Clone, Default)]
pub struct FrameInputs {
    pub left_phoneme: Phoneme,
    pub right_phoneme: Phoneme,
    pub left_blink: bool,
    pub right_blink: bool,
    /// Current TV frame and its index, when the TV is playing.
    pub tv_frame: Option<(u64, Arc<RgbaImage>)>,
    pub caption: Option<Arc<CaptionOverlay>>,
}

/// Cache occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub transform: usize,
    pub l1: usize,
    pub l2: usize,
    pub output: usize,
}

/// Results delivered by background build tasks.
enum BuildResult {
    L1 {
        key: String,
        image: Arc<RgbaImage>,
        transforms: Vec<(String, Arc<TransformedLayer>)>,
    },
    PreWarm {
        l1_key: String,
        entries: Vec<(String, Arc<Vec<u8>>)>,
        error: Option<String>,
    },
}

/// The four-level cached compositor.
pub struct SceneCompositor {
    store: Arc<LayerStore>,
    limits: ExpressionLimits,
    lighting: LightingState,
    lighting_version: u64,
    static_base: StaticBase,

    left_offsets: ExpressionOffsets,
    right_offsets: ExpressionOffsets,

    transform_cache: ExpressionLayerCache,
    l1: FrameCache<Arc<RgbaImage>>,
    l2: FrameCache<Arc<Vec<u8>>>,
    output: FrameCache<Arc<Vec<u8>>>,

    /// The base guaranteed to have pre-warmed L2 entries for the speaker.
    committed: Option<(String, Arc<RgbaImage>)>,
    /// The most recently materialized L1, committed or not.
    last_l1: Option<(String, Arc<RgbaImage>)>,
    /// Raster of the most recent L2, kept so output composites avoid a
    /// JPEG decode on the common path.
    last_l2_raster: Option<(String, Arc<RgbaImage>)>,
    /// Fast path: the previously emitted output key and frame.
    last_output: Option<(String, Arc<Vec<u8>>)>,

    speaker: Option<CharacterSide>,
    inflight_l1: HashSet<String>,
    inflight_prewarm: HashSet<String>,
    results_tx: mpsc::UnboundedSender<BuildResult>,
    results_rx: mpsc::UnboundedReceiver<BuildResult>,
}

impl SceneCompositor {
    /// Create a compositor over a loaded layer store.
    pub fn new(store: Arc<LayerStore>, limits: ExpressionLimits) -> Self {
        let lighting = LightingState::default();
        let static_base = StaticBase::build(&store, &lighting);
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        Self {
            store,
            limits,
            lighting,
            lighting_version: 1,
            static_base,
            left_offsets: ExpressionOffsets::default(),
            right_offsets: ExpressionOffsets::default(),
            transform_cache: ExpressionLayerCache::new(),
            l1: FrameCache::new("l1", L1_CAPACITY, EVICT_BATCH),
            l2: FrameCache::new("l2", L2_CAPACITY, EVICT_BATCH),
            output: FrameCache::new("output", OUTPUT_CAPACITY, EVICT_BATCH),
            committed: None,
            last_l1: None,
            last_l2_raster: None,
            last_output: None,
            speaker: None,
            inflight_l1: HashSet::new(),
            inflight_prewarm: HashSet::new(),
            results_tx,
            results_rx,
        }
    }

    /// Render one frame, traversing the cache hierarchy.
    pub fn render_frame(&mut self, inputs: &FrameInputs) -> CompositorResult<Arc<Vec<u8>>> {
        self.drain_background();

        let digest = expr_digest(&self.left_offsets, &self.right_offsets);
        let requested = l1_key(self.static_base.version(), &digest);
        let (used_key, l1_image) = self.resolve_l1(&requested)?;

        let l2k = l2_key(
            &used_key,
            self.lighting_version,
            inputs.left_phoneme,
            inputs.right_phoneme,
            inputs.left_blink,
            inputs.right_blink,
        );
        let tv_index = inputs.tv_frame.as_ref().map(|(i, _)| *i);
        let caption_digest = inputs.caption.as_ref().map(|c| c.digest.as_str());
        let out_key = output_key(&l2k, tv_index, caption_digest);

        if let Some((key, jpeg)) = &self.last_output {
            if *key == out_key {
                return Ok(Arc::clone(jpeg));
            }
        }

        if let Some(jpeg) = self.output.get(&out_key) {
            self.last_output = Some((out_key, Arc::clone(&jpeg)));
            return Ok(jpeg);
        }

        let needs_raster = inputs.tv_frame.is_some() || inputs.caption.is_some();

        let (l2_jpeg, l2_raster) = match self.l2.get(&l2k) {
            Some(jpeg) => {
                let raster = if !needs_raster {
                    None
                } else if let Some((key, raster)) = &self.last_l2_raster {
                    if *key == l2k {
                        Some(Arc::clone(raster))
                    } else {
                        Some(Arc::new(decode_jpeg(&jpeg)?))
                    }
                } else {
                    Some(Arc::new(decode_jpeg(&jpeg)?))
                };
                (jpeg, raster)
            }
            None => {
                let raster = Arc::new(compose_l2(
                    &self.store,
                    &l1_image,
                    &self.lighting,
                    inputs.left_phoneme,
                    inputs.right_phoneme,
                    inputs.left_blink,
                    inputs.right_blink,
                ));
                let jpeg = Arc::new(encode_jpeg(&raster, JPEG_QUALITY)?);
                self.l2.insert(l2k.clone(), Arc::clone(&jpeg));
                (jpeg, Some(raster))
            }
        };
        if let Some(raster) = &l2_raster {
            self.last_l2_raster = Some((l2k.clone(), Arc::clone(raster)));
        }

        let final_jpeg = if !needs_raster {
            // Nothing composites over the character frame; reuse its JPEG.
            Arc::clone(&l2_jpeg)
        } else {
            let raster = l2_raster.expect("raster materialized when needed");
            let composed = compose_output(
                &self.store,
                &raster,
                inputs.tv_frame.as_ref().map(|(_, f)| f.as_ref()),
                inputs.caption.as_deref(),
            );
            Arc::new(encode_jpeg(&composed, JPEG_QUALITY)?)
        };

        self.output.insert(out_key.clone(), Arc::clone(&final_jpeg));
        self.last_output = Some((out_key, Arc::clone(&final_jpeg)));
        Ok(final_jpeg)
    }

    /// Resolve the L1 to composite against, never blocking on a miss.
    ///
    /// Fallback order on a miss: the committed base, then the last
    /// materialized base, then (first frame only) a synchronous build.
    /// The returned key is the one actually used, so downstream keys stay
    /// consistent with the pixels.
    fn resolve_l1(&mut self, requested: &str) -> CompositorResult<(String, Arc<RgbaImage>)> {
        if let Some(image) = self.l1.get(requested) {
            self.last_l1 = Some((requested.to_string(), Arc::clone(&image)));

            if self.speaker.is_none() {
                // Idle hits commit themselves.
                self.committed = Some((requested.to_string(), Arc::clone(&image)));
                return Ok((requested.to_string(), image));
            }

            match self.committed.clone() {
                Some((committed_key, committed_image)) if committed_key != requested => {
                    // Built but not pre-warmed for this speaker: keep the
                    // committed base on screen and warm the hit in the
                    // background.
                    if !self.inflight_prewarm.contains(requested) {
                        self.spawn_prewarm(requested.to_string(), image);
                    }
                    return Ok((committed_key, committed_image));
                }
                Some(committed) => return Ok(committed),
                None => {
                    self.committed = Some((requested.to_string(), Arc::clone(&image)));
                    return Ok((requested.to_string(), image));
                }
            }
        }

        if !self.inflight_l1.contains(requested) {
            self.spawn_l1_build(requested.to_string());
        }

        if let Some((key, image)) = &self.committed {
            return Ok((key.clone(), Arc::clone(image)));
        }
        if let Some((key, image)) = &self.last_l1 {
            return Ok((key.clone(), Arc::clone(image)));
        }

        // First frame ever: nothing to fall back to.
        let image = self.build_l1_blocking(requested)?;
        Ok((requested.to_string(), image))
    }

    /// The transform specs for both characters' current offsets.
    fn current_specs(&self) -> Vec<TransformSpec> {
        let mut specs = transform_specs(
            &self.store,
            CharacterSide::Left,
            &self.left_offsets,
            &self.limits.for_character(CharacterSide::Left),
        );
        specs.extend(transform_specs(
            &self.store,
            CharacterSide::Right,
            &self.right_offsets,
            &self.limits.for_character(CharacterSide::Right),
        ));
        specs
    }

    /// Snapshot the cached transforms the given specs can reuse.
    fn cached_transforms(&self, specs: &[TransformSpec]) -> HashMap<String, Arc<TransformedLayer>> {
        specs
            .iter()
            .filter_map(|s| self.transform_cache.get(&s.key).map(|t| (s.key.clone(), t)))
            .collect()
    }

    /// Build the requested L1 inline. First-frame path only.
    fn build_l1_blocking(&mut self, key: &str) -> CompositorResult<Arc<RgbaImage>> {
        let specs = self.current_specs();
        let cached = self.cached_transforms(&specs);
        let computed = compute_missing_transforms(&self.store, &specs, &cached);
        for (k, v) in &computed {
            self.transform_cache.insert(k.clone(), Arc::clone(v));
        }

        let transforms = collect_transforms(&specs, &cached, &computed);
        let image = Arc::new(compose_l1(
            &self.store,
            &self.static_base.image(),
            &transforms,
        ));

        self.l1.insert(key.to_string(), Arc::clone(&image));
        self.last_l1 = Some((key.to_string(), Arc::clone(&image)));
        self.committed = Some((key.to_string(), Arc::clone(&image)));
        debug!(key, "Built first expression base inline");
        Ok(image)
    }

    /// Kick off a background L1 build, deduplicated by key.
    fn spawn_l1_build(&mut self, key: String) {
        self.inflight_l1.insert(key.clone());

        let specs = self.current_specs();
        let cached = self.cached_transforms(&specs);
        let store = Arc::clone(&self.store);
        let base = self.static_base.image();
        let tx = self.results_tx.clone();

        tokio::task::spawn_blocking(move || {
            let computed = compute_missing_transforms(&store, &specs, &cached);
            let transforms = collect_transforms(&specs, &cached, &computed);
            let image = Arc::new(compose_l1(&store, &base, &transforms));
            let _ = tx.send(BuildResult::L1 {
                key,
                image,
                transforms: computed,
            });
        });
    }

    /// Pre-warm the six common mouth phonemes against a fresh base.
    ///
    /// The non-speaker holds the rest mouth and blinks are off, matching
    /// the keys the speaking path asks for. On completion the base becomes
    /// committed; errors only log.
    fn spawn_prewarm(&mut self, base_key: String, base_image: Arc<RgbaImage>) {
        let Some(speaker) = self.speaker else {
            return;
        };
        self.inflight_prewarm.insert(base_key.clone());

        let store = Arc::clone(&self.store);
        let lighting = self.lighting;
        let lighting_version = self.lighting_version;
        let tx = self.results_tx.clone();

        tokio::task::spawn_blocking(move || {
            let mut entries = Vec::with_capacity(Phoneme::PREWARM.len());
            let mut error = None;

            for phoneme in Phoneme::PREWARM {
                let (left, right) = match speaker {
                    CharacterSide::Left => (phoneme, Phoneme::A),
                    CharacterSide::Right => (Phoneme::A, phoneme),
                };
                let raster =
                    compose_l2(&store, &base_image, &lighting, left, right, false, false);
                match encode_jpeg(&raster, JPEG_QUALITY) {
                    Ok(jpeg) => {
                        let key =
                            l2_key(&base_key, lighting_version, left, right, false, false);
                        entries.push((key, Arc::new(jpeg)));
                    }
                    Err(e) => {
                        error = Some(e.to_string());
                        break;
                    }
                }
            }

            let _ = tx.send(BuildResult::PreWarm {
                l1_key: base_key,
                entries,
                error,
            });
        });
    }

    /// Apply background build results. Runs at the top of every tick.
    fn drain_background(&mut self) {
        while let Ok(result) = self.results_rx.try_recv() {
            match result {
                BuildResult::L1 {
                    key,
                    image,
                    transforms,
                } => {
                    self.inflight_l1.remove(&key);
                    for (k, v) in transforms {
                        self.transform_cache.insert(k, v);
                    }
                    if !self.key_is_current(&key) {
                        debug!(key, "Discarding stale expression base build");
                        continue;
                    }
                    self.l1.insert(key.clone(), Arc::clone(&image));
                    self.last_l1 = Some((key.clone(), Arc::clone(&image)));
                    if self.speaker.is_some() {
                        if !self.inflight_prewarm.contains(&key) {
                            self.spawn_prewarm(key, image);
                        }
                    } else {
                        self.committed = Some((key, image));
                    }
                }
                BuildResult::PreWarm {
                    l1_key,
                    entries,
                    error,
                } => {
                    self.inflight_prewarm.remove(&l1_key);
                    if let Some(error) = error {
                        // The current base stays authoritative.
                        warn!(key = l1_key, error, "Pre-warm failed");
                        continue;
                    }
                    for (key, jpeg) in entries {
                        self.l2.insert(key, jpeg);
                    }
                    if self.key_is_current(&l1_key) {
                        if let Some(image) = self.l1.get(&l1_key) {
                            // Atomic commit: one assignment of both fields.
                            self.committed = Some((l1_key, image));
                        }
                    }
                }
            }
        }
    }

    /// Whether a cache key was built against the live static base.
    fn key_is_current(&self, key: &str) -> bool {
        key.starts_with(&format!("{}:", self.static_base.version()))
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Mark a character as speaking (or none). Entering speech locks the
    /// committed base so L2 lookups keep hitting.
    pub fn set_speaker(&mut self, speaker: Option<CharacterSide>) {
        self.speaker = speaker;
        if speaker.is_some() && self.committed.is_none() {
            self.committed = self.last_l1.clone();
        }
    }

    pub fn speaker(&self) -> Option<CharacterSide> {
        self.speaker
    }

    /// Clamp, quantize, and store offsets; true if they changed.
    pub fn set_offsets(&mut self, character: CharacterSide, offsets: ExpressionOffsets) -> bool {
        let clamped = self.limits.for_character(character).clamp(&offsets).quantized();
        let slot = match character {
            CharacterSide::Left => &mut self.left_offsets,
            CharacterSide::Right => &mut self.right_offsets,
        };
        if *slot == clamped {
            return false;
        }
        *slot = clamped;
        self.last_output = None;
        true
    }

    pub fn offsets(&self, character: CharacterSide) -> ExpressionOffsets {
        match character {
            CharacterSide::Left => self.left_offsets,
            CharacterSide::Right => self.right_offsets,
        }
    }

    /// Re-center both characters' expressions.
    pub fn reset_offsets(&mut self) {
        self.left_offsets = ExpressionOffsets::default();
        self.right_offsets = ExpressionOffsets::default();
        self.last_output = None;
    }

    /// Rotate the lighting hue. Rebuilds the static base; stale L2/output
    /// entries become unreachable through the version in their keys.
    pub fn set_hue(&mut self, degrees: f64) {
        self.lighting.hue_degrees = degrees;
        self.static_base.rebuild(&self.store, &self.lighting);
        self.lighting_version += 1;
        self.last_output = None;
    }

    /// Install a hue change whose base was composited off the loop.
    pub fn install_hue(&mut self, degrees: f64, base: Arc<RgbaImage>) {
        self.lighting.hue_degrees = degrees;
        self.static_base.install(base);
        self.lighting_version += 1;
        self.last_output = None;
    }

    /// Change emission opacity and/or blend mode. Rebuilds the static base
    /// and actively clears the dependent caches.
    pub fn set_emission(&mut self, opacity: Option<f32>, blend: Option<BlendMode>) {
        if let Some(opacity) = opacity {
            self.lighting.emission_opacity = opacity.clamp(0.0, 1.0);
        }
        if let Some(blend) = blend {
            self.lighting.emission_blend = blend;
        }
        self.static_base.rebuild(&self.store, &self.lighting);
        self.l1.clear();
        self.l2.clear();
        self.committed = None;
        self.last_l1 = None;
        self.last_l2_raster = None;
        self.last_output = None;
    }

    /// Toggle the lights-on overlay.
    pub fn set_lights(&mut self, on: bool) {
        if self.lighting.lights_on == on {
            return;
        }
        self.lighting.lights_on = on;
        self.lighting_version += 1;
        self.last_output = None;
    }

    pub fn set_flicker(&mut self, on: bool) {
        self.lighting.flicker = on;
    }

    pub fn lighting(&self) -> LightingState {
        self.lighting
    }

    pub fn limits(&self) -> &ExpressionLimits {
        &self.limits
    }

    pub fn set_limits(&mut self, limits: ExpressionLimits) {
        self.limits = limits;
        // Re-clamp stored offsets against the new bounds.
        let left = self.left_offsets;
        let right = self.right_offsets;
        self.set_offsets(CharacterSide::Left, left);
        self.set_offsets(CharacterSide::Right, right);
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn static_base_version(&self) -> u64 {
        self.static_base.version()
    }

    pub fn lighting_version(&self) -> u64 {
        self.lighting_version
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            transform: self.transform_cache.len(),
            l1: self.l1.len(),
            l2: self.l2.len(),
            output: self.output.len(),
        }
    }

    /// The committed base key, for tests and diagnostics.
    pub fn committed_key(&self) -> Option<&str> {
        self.committed.as_ref().map(|(k, _)| k.as_str())
    }

    pub fn store(&self) -> &Arc<LayerStore> {
        &self.store
    }
}

/// Pair each spec's z-index with its transformed buffer.
fn collect_transforms(
    specs: &[TransformSpec],
    cached: &HashMap<String, Arc<TransformedLayer>>,
    computed: &[(String, Arc<TransformedLayer>)],
) -> Vec<(i32, Arc<TransformedLayer>)> {
    let computed_map: HashMap<&str, &Arc<TransformedLayer>> =
        computed.iter().map(|(k, v)| (k.as_str(), v)).collect();

    specs
        .iter()
        .filter_map(|spec| {
            cached
                .get(&spec.key)
                .or_else(|| computed_map.get(spec.key.as_str()).copied())
                .map(|t| (spec.z_index, Arc::clone(t)))
        })
        .collect()
}
