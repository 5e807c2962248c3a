//! Layer loading and classification.
//!
//! All layer rasters are decoded once at startup, resized to the output
//! resolution, and kept for the process lifetime. Derived data (TV viewport
//! from the mask, brow content bounds, lights-on alpha mask) is computed
//! here so the frame loop never touches source files.

use std::collections::HashMap;
use std::path::Path;

use image::imageops::FilterType;
use image::RgbaImage;
use tracing::{debug, info};

use toon_models::{CharacterSide, LayerInfo, LayerKind, Manifest, Phoneme, Rect};

use crate::error::{CompositorError, CompositorResult};

/// Padding applied around brow content bounds, in output pixels.
const BROW_BOUNDS_PAD: u32 = 4;
/// Lights-on pixels with max RGB at or below this are masked out.
const LIGHTS_ON_CHANNEL_FLOOR: u8 = 55;

/// One layer with its scaled raster and derived data.
#[derive(Debug, Clone)]
pub struct LoadedLayer {
    pub info: LayerInfo,
    /// Raster scaled to output resolution.
    pub image: RgbaImage,
    /// Placement at output resolution.
    pub x: i64,
    pub y: i64,
    /// Tight bounds of non-transparent content, padded; brow layers only.
    pub content_bounds: Option<Rect>,
    /// Crop of `image` to `content_bounds`, kept for rotation.
    pub cropped: Option<RgbaImage>,
}

impl LoadedLayer {
    /// Center of the content bounds in layer-local coordinates.
    pub fn content_center(&self) -> Option<(i64, i64)> {
        self.content_bounds.map(|b| {
            (
                b.x as i64 + b.width as i64 / 2,
                b.y as i64 + b.height as i64 / 2,
            )
        })
    }
}

/// All loaded layers, indexed by id, plus scene-level derived values.
#[derive(Debug)]
pub struct LayerStore {
    pub output_width: u32,
    pub output_height: u32,
    pub output_scale: f64,
    /// TV viewport extracted from the mask layer, output coordinates.
    pub tv_viewport: Rect,
    layers: HashMap<String, LoadedLayer>,
    /// Ids in ascending z-index order.
    z_order: Vec<String>,
}

impl LayerStore {
    /// Load every layer in the manifest, scaled by `output_scale`.
    pub fn load(
        manifest: &Manifest,
        layers_dir: &Path,
        output_scale: f64,
    ) -> CompositorResult<Self> {
        let output_width = (manifest.width as f64 * output_scale).round() as u32;
        let output_height = (manifest.height as f64 * output_scale).round() as u32;

        let mut layers = HashMap::with_capacity(manifest.layers.len());
        let mut tv_viewport = None;

        for info in &manifest.layers {
            let path = info.resolved_path(layers_dir);
            if !path.exists() {
                return Err(CompositorError::AssetMissing(path));
            }
            let decoded = image::open(&path)
                .map_err(|e| CompositorError::image_decode(&path, e.to_string()))?
                .to_rgba8();

            if info.kind == LayerKind::Mask {
                // The viewport bounding box is the mask's only use; the
                // raster itself is never composited.
                let native = alpha_bounds(&decoded).ok_or(CompositorError::NoTvViewport)?;
                let on_canvas = Rect::new(
                    (info.x + native.x as i32).max(0) as u32,
                    (info.y + native.y as i32).max(0) as u32,
                    native.width,
                    native.height,
                );
                tv_viewport = Some(on_canvas.scaled(output_scale));
                continue;
            }

            let scaled_w = (info.width as f64 * output_scale).round().max(1.0) as u32;
            let scaled_h = (info.height as f64 * output_scale).round().max(1.0) as u32;
            let mut image = image::imageops::resize(&decoded, scaled_w, scaled_h, FilterType::Lanczos3);

            if info.kind == LayerKind::LightsOn {
                mask_dim_pixels(&mut image);
            }

            let (content_bounds, cropped) = if info.kind == LayerKind::ExpressionBrow {
                match alpha_bounds(&image) {
                    Some(tight) => {
                        let padded = pad_bounds(tight, BROW_BOUNDS_PAD, scaled_w, scaled_h);
                        let crop = image::imageops::crop_imm(
                            &image,
                            padded.x,
                            padded.y,
                            padded.width,
                            padded.height,
                        )
                        .to_image();
                        (Some(padded), Some(crop))
                    }
                    None => (None, None),
                }
            } else {
                (None, None)
            };

            layers.insert(
                info.id.clone(),
                LoadedLayer {
                    info: info.clone(),
                    image,
                    x: (info.x as f64 * output_scale).round() as i64,
                    y: (info.y as f64 * output_scale).round() as i64,
                    content_bounds,
                    cropped,
                },
            );
        }

        let mut z_order: Vec<String> = layers.keys().cloned().collect();
        z_order.sort_by_key(|id| (layers[id].info.z_index, id.clone()));

        let tv_viewport = tv_viewport.ok_or(CompositorError::NoTvViewport)?;

        info!(
            layers = layers.len(),
            size = format!("{}x{}", output_width, output_height),
            tv = ?tv_viewport,
            "Layer store loaded"
        );

        Ok(Self {
            output_width,
            output_height,
            output_scale,
            tv_viewport,
            layers,
            z_order,
        })
    }

    /// Look up a layer by id.
    pub fn layer(&self, id: &str) -> CompositorResult<&LoadedLayer> {
        self.layers
            .get(id)
            .ok_or_else(|| CompositorError::UnknownLayer(id.to_string()))
    }

    /// All layers in ascending z-index order.
    pub fn in_z_order(&self) -> impl Iterator<Item = &LoadedLayer> {
        self.z_order.iter().map(|id| &self.layers[id])
    }

    /// Visible layers of one kind, in z order.
    pub fn of_kind(&self, kind: LayerKind) -> impl Iterator<Item = &LoadedLayer> {
        self.in_z_order()
            .filter(move |l| l.info.kind == kind && l.info.visible)
    }

    /// Visible layers of one kind belonging to a character, in z order.
    pub fn of_kind_for(
        &self,
        kind: LayerKind,
        character: CharacterSide,
    ) -> impl Iterator<Item = &LoadedLayer> {
        self.of_kind(kind)
            .filter(move |l| l.info.character == Some(character))
    }

    /// The mouth layer for a character and phoneme.
    pub fn mouth_layer(
        &self,
        character: CharacterSide,
        phoneme: Phoneme,
    ) -> Option<&LoadedLayer> {
        self.of_kind_for(LayerKind::MouthPhoneme, character)
            .find(|l| l.info.phoneme == Some(phoneme))
    }

    /// The blink overlay for a character.
    pub fn blink_layer(&self, character: CharacterSide) -> Option<&LoadedLayer> {
        self.of_kind_for(LayerKind::Blink, character).next()
    }

    /// Highest z-index among per-character feature layers; emissions above
    /// it are foreground and composite at the character-frame stage.
    fn feature_z_ceiling(&self) -> i32 {
        self.in_z_order()
            .filter(|l| {
                matches!(
                    l.info.kind,
                    LayerKind::MouthPhoneme
                        | LayerKind::Blink
                        | LayerKind::ExpressionEye
                        | LayerKind::ExpressionBrow
                        | LayerKind::ExpressionCover
                        | LayerKind::Nose
                )
            })
            .map(|l| l.info.z_index)
            .max()
            .unwrap_or(i32::MAX)
    }

    /// Emission layers baked into the static base.
    pub fn background_emissions(&self) -> Vec<&LoadedLayer> {
        let ceiling = self.feature_z_ceiling();
        self.of_kind(LayerKind::Emission)
            .filter(|l| l.info.z_index <= ceiling)
            .collect()
    }

    /// Emission layers composited over the characters.
    pub fn foreground_emissions(&self) -> Vec<&LoadedLayer> {
        let ceiling = self.feature_z_ceiling();
        self.of_kind(LayerKind::Emission)
            .filter(|l| l.info.z_index > ceiling)
            .collect()
    }

    pub fn lights_on_layers(&self) -> Vec<&LoadedLayer> {
        self.of_kind(LayerKind::LightsOn).collect()
    }

    pub fn tv_reflection_layers(&self) -> Vec<&LoadedLayer> {
        self.of_kind(LayerKind::TvReflection).collect()
    }
}

/// Tight bounding box of pixels with non-zero alpha.
fn alpha_bounds(image: &RgbaImage) -> Option<Rect> {
    let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
    let (mut max_x, mut max_y) = (0u32, 0u32);
    let mut any = false;

    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel.0[3] > 0 {
            any = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    any.then(|| Rect::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Expand bounds by `pad` on every side, clamped to the image.
fn pad_bounds(bounds: Rect, pad: u32, width: u32, height: u32) -> Rect {
    let x = bounds.x.saturating_sub(pad);
    let y = bounds.y.saturating_sub(pad);
    let right = (bounds.x + bounds.width + pad).min(width);
    let bottom = (bounds.y + bounds.height + pad).min(height);
    Rect::new(x, y, right - x, bottom - y)
}

/// Zero the alpha of pixels whose brightest channel is at or below the
/// floor. Keeps only the lit regions of the lights-on overlay.
fn mask_dim_pixels(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        if r.max(g).max(b) <= LIGHTS_ON_CHANNEL_FLOOR {
            pixel.0[3] = 0;
        }
    }
    debug!("Masked dim pixels from lights-on layer");
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_alpha_bounds() {
        let mut img = RgbaImage::new(10, 10);
        img.put_pixel(3, 4, Rgba([255, 0, 0, 255]));
        img.put_pixel(6, 7, Rgba([255, 0, 0, 128]));
        let b = alpha_bounds(&img).unwrap();
        assert_eq!(b, Rect::new(3, 4, 4, 4));
    }

    #[test]
    fn test_alpha_bounds_empty() {
        let img = RgbaImage::new(4, 4);
        assert!(alpha_bounds(&img).is_none());
    }

    #[test]
    fn test_pad_bounds_clamps() {
        let b = pad_bounds(Rect::new(1, 1, 4, 4), 4, 8, 8);
        assert_eq!(b, Rect::new(0, 0, 8, 8));
    }

    #[test]
    fn test_mask_dim_pixels() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([55, 40, 20, 255]));
        img.put_pixel(1, 0, Rgba([200, 180, 90, 255]));
        mask_dim_pixels(&mut img);
        assert_eq!(img.get_pixel(0, 0).0[3], 0);
        assert_eq!(img.get_pixel(1, 0).0[3], 255);
    }

    #[test]
    fn test_load_store_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let layers_dir = dir.path();

        // A 90x60 background and a 30x30 mask with a lit 12x9 region.
        image::RgbaImage::from_pixel(90, 60, Rgba([10, 20, 30, 255]))
            .save(layers_dir.join("bg.png"))
            .unwrap();
        let mut mask = RgbaImage::new(30, 30);
        for y in 9..18 {
            for x in 6..18 {
                mask.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        mask.save(layers_dir.join("mask.png")).unwrap();
        let mut brow = RgbaImage::new(30, 15);
        for x in 9..21 {
            brow.put_pixel(x, 6, Rgba([0, 0, 0, 255]));
        }
        brow.save(layers_dir.join("brow.png")).unwrap();

        let manifest: Manifest = serde_json::from_str(
            r#"{
            "width": 90, "height": 60,
            "layers": [
                {"id": "bg", "path": "bg.png", "type": "static",
                 "x": 0, "y": 0, "width": 90, "height": 60, "zIndex": 0},
                {"id": "brow-l", "path": "brow.png", "type": "expression-brow",
                 "character": "left",
                 "x": 12, "y": 9, "width": 30, "height": 15, "zIndex": 20},
                {"id": "tv-mask", "path": "mask.png", "type": "mask",
                 "x": 30, "y": 15, "width": 30, "height": 30, "zIndex": 0}
            ]}"#,
        )
        .unwrap();

        let store = LayerStore::load(&manifest, layers_dir, 1.0).unwrap();
        assert_eq!(store.output_width, 90);
        assert_eq!(store.output_height, 60);
        // Mask bounds (6,9)-(18,18) offset by layer position (30,15).
        assert_eq!(store.tv_viewport, Rect::new(36, 24, 12, 9));

        let brow = store.layer("brow-l").unwrap();
        let bounds = brow.content_bounds.unwrap();
        // Tight row y=6 x 9..21 padded by 4.
        assert_eq!(bounds, Rect::new(5, 2, 20, 9));
        assert!(brow.cropped.is_some());

        assert!(store.layer("tv-mask").is_err());
        assert_eq!(store.of_kind(LayerKind::Static).count(), 1);
    }

    #[test]
    fn test_missing_asset() {
        let dir = tempfile::tempdir().unwrap();
        let manifest: Manifest = serde_json::from_str(
            r#"{"width": 10, "height": 10, "layers": [
                {"id": "x", "path": "missing.png", "type": "static",
                 "x": 0, "y": 0, "width": 10, "height": 10, "zIndex": 0}]}"#,
        )
        .unwrap();
        let err = LayerStore::load(&manifest, dir.path(), 1.0).unwrap_err();
        assert!(matches!(err, CompositorError::AssetMissing(_)));
    }
}
