//! Geometric layer transforms and their cache.
//!
//! Eye and cover layers translate; brow layers rotate around their content
//! center and translate vertically. Transform outputs are small buffers
//! with placement offsets, cached by a key that encodes the exact
//! quantized geometry.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use tracing::trace;

use crate::layer_store::{LayerStore, LoadedLayer};

/// Cache capacity for transformed layers.
const TRANSFORM_CACHE_CAPACITY: usize = 300;
/// Entries dropped when the cache overflows.
const TRANSFORM_EVICT_BATCH: usize = 20;

/// A transformed layer buffer and where it lands on the canvas.
#[derive(Debug, Clone)]
pub struct TransformedLayer {
    pub image: RgbaImage,
    pub x: i64,
    pub y: i64,
}

/// The geometry of one required transform.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOp {
    /// Translate an eye or cover layer by `(dx, dy)`.
    Translate { layer_id: String, dx: i32, dy: i32 },
    /// Rotate a brow around its content center, then shift by `dy`.
    RotateBrow {
        layer_id: String,
        dy: i32,
        angle_deg: f64,
    },
}

/// A transform request with its cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSpec {
    pub key: String,
    pub op: TransformOp,
    /// z-index of the source layer, for composite ordering.
    pub z_index: i32,
}

impl TransformSpec {
    /// Key for a translated eye/cover layer.
    pub fn translate(layer: &LoadedLayer, dx: i32, dy: i32) -> Self {
        Self {
            key: format!("eye:{}:{}:{}", layer.info.id, dx, dy),
            op: TransformOp::Translate {
                layer_id: layer.info.id.clone(),
                dx,
                dy,
            },
            z_index: layer.info.z_index,
        }
    }

    /// Key for a rotated brow layer; rotation keyed in deci-degrees.
    pub fn rotate_brow(layer: &LoadedLayer, dy: i32, angle_deg: f64) -> Self {
        Self {
            key: format!(
                "brow:{}:{}:{}",
                layer.info.id,
                dy,
                (angle_deg * 10.0).round() as i64
            ),
            op: TransformOp::RotateBrow {
                layer_id: layer.info.id.clone(),
                dy,
                angle_deg,
            },
            z_index: layer.info.z_index,
        }
    }
}

/// Execute one transform against the store.
pub fn apply_transform(store: &LayerStore, op: &TransformOp) -> Option<TransformedLayer> {
    match op {
        TransformOp::Translate { layer_id, dx, dy } => {
            let layer = store.layer(layer_id).ok()?;
            Some(translate_layer(
                layer,
                *dx,
                *dy,
                store.output_width,
                store.output_height,
            ))
        }
        TransformOp::RotateBrow {
            layer_id,
            dy,
            angle_deg,
        } => {
            let layer = store.layer(layer_id).ok()?;
            rotate_brow_layer(layer, *dy, *angle_deg)
        }
    }
}

/// Translate a layer, keeping only the sub-rectangle that stays in frame.
pub fn translate_layer(
    layer: &LoadedLayer,
    dx: i32,
    dy: i32,
    canvas_w: u32,
    canvas_h: u32,
) -> TransformedLayer {
    let mut x = layer.x + dx as i64;
    let mut y = layer.y + dy as i64;
    let mut crop_x = 0u32;
    let mut crop_y = 0u32;
    let mut w = layer.image.width();
    let mut h = layer.image.height();

    if x < 0 {
        let clip = (-x) as u32;
        crop_x = clip.min(w);
        w = w.saturating_sub(clip);
        x = 0;
    }
    if y < 0 {
        let clip = (-y) as u32;
        crop_y = clip.min(h);
        h = h.saturating_sub(clip);
        y = 0;
    }
    if x as u64 + w as u64 > canvas_w as u64 {
        w = (canvas_w as i64 - x).max(0) as u32;
    }
    if y as u64 + h as u64 > canvas_h as u64 {
        h = (canvas_h as i64 - y).max(0) as u32;
    }

    let image = if w == 0 || h == 0 {
        RgbaImage::new(1, 1)
    } else if crop_x == 0 && crop_y == 0 && w == layer.image.width() && h == layer.image.height() {
        layer.image.clone()
    } else {
        image::imageops::crop_imm(&layer.image, crop_x, crop_y, w, h).to_image()
    };

    TransformedLayer { image, x, y }
}

/// Rotate a brow's cropped content buffer and place it back over its
/// content center, shifted vertically by `dy`.
pub fn rotate_brow_layer(layer: &LoadedLayer, dy: i32, angle_deg: f64) -> Option<TransformedLayer> {
    let cropped = layer.cropped.as_ref()?;
    let (center_x, center_y) = layer.content_center()?;

    let rotated = rotate_rgba(cropped, angle_deg);
    let (new_w, new_h) = (rotated.width() as i64, rotated.height() as i64);

    let mut x = layer.x + center_x - new_w / 2;
    let mut y = layer.y + center_y - new_h / 2 + dy as i64;

    // Placement past the top/left crops the rotated buffer instead.
    let mut image = rotated;
    if x < 0 || y < 0 {
        let crop_x = (-x).max(0) as u32;
        let crop_y = (-y).max(0) as u32;
        if crop_x >= image.width() || crop_y >= image.height() {
            return None;
        }
        image = image::imageops::crop_imm(
            &image,
            crop_x,
            crop_y,
            image.width() - crop_x,
            image.height() - crop_y,
        )
        .to_image();
        x = x.max(0);
        y = y.max(0);
    }

    Some(TransformedLayer { image, x, y })
}

/// Rotate an RGBA buffer by `degrees` counter-clockwise around its center,
/// onto a transparent canvas sized to the rotated bounding box.
pub fn rotate_rgba(src: &RgbaImage, degrees: f64) -> RgbaImage {
    let rad = degrees.to_radians();
    let (sin_r, cos_r) = (rad.sin(), rad.cos());
    let (w, h) = (src.width() as f64, src.height() as f64);

    let new_w = (w * cos_r.abs() + h * sin_r.abs()).ceil().max(1.0) as u32;
    let new_h = (w * sin_r.abs() + h * cos_r.abs()).ceil().max(1.0) as u32;
    let (cx_src, cy_src) = (w / 2.0, h / 2.0);
    let (cx_dst, cy_dst) = (new_w as f64 / 2.0, new_h as f64 / 2.0);

    let mut out = RgbaImage::new(new_w, new_h);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let dx = x as f64 + 0.5 - cx_dst;
        let dy = y as f64 + 0.5 - cy_dst;
        // Inverse mapping: rotate destination back into source space.
        let sx = cos_r * dx + sin_r * dy + cx_src - 0.5;
        let sy = -sin_r * dx + cos_r * dy + cy_src - 0.5;
        *pixel = sample_bilinear(src, sx, sy);
    }
    out
}

/// Bilinear sample with a transparent border.
fn sample_bilinear(src: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let (w, h) = (src.width() as i64, src.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let fetch = |px: i64, py: i64| -> [f32; 4] {
        if px < 0 || py < 0 || px >= w || py >= h {
            [0.0; 4]
        } else {
            let p = src.get_pixel(px as u32, py as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
        }
    };

    let (p00, p10, p01, p11) = (
        fetch(x0, y0),
        fetch(x0 + 1, y0),
        fetch(x0, y0 + 1),
        fetch(x0 + 1, y0 + 1),
    );

    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

/// Insertion-ordered cache of transformed layers.
pub struct ExpressionLayerCache {
    map: HashMap<String, Arc<TransformedLayer>>,
    order: VecDeque<String>,
}

impl Default for ExpressionLayerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionLayerCache {
    pub fn new() -> Self {
        Self {
            map: HashMap::with_capacity(TRANSFORM_CACHE_CAPACITY),
            order: VecDeque::with_capacity(TRANSFORM_CACHE_CAPACITY),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<TransformedLayer>> {
        self.map.get(key).cloned()
    }

    pub fn insert(&mut self, key: String, value: Arc<TransformedLayer>) {
        if self.map.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        if self.map.len() > TRANSFORM_CACHE_CAPACITY {
            for _ in 0..TRANSFORM_EVICT_BATCH {
                if let Some(oldest) = self.order.pop_front() {
                    self.map.remove(&oldest);
                }
            }
            trace!(len = self.map.len(), "Transform cache evicted batch");
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Compute every spec not already in `cached`, in parallel.
///
/// Returns the newly computed `(key, value)` pairs; the caller merges them
/// into the cache on the frame loop.
pub fn compute_missing_transforms(
    store: &LayerStore,
    specs: &[TransformSpec],
    cached: &HashMap<String, Arc<TransformedLayer>>,
) -> Vec<(String, Arc<TransformedLayer>)> {
    specs
        .par_iter()
        .filter(|spec| !cached.contains_key(&spec.key))
        .filter_map(|spec| {
            apply_transform(store, &spec.op).map(|t| (spec.key.clone(), Arc::new(t)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use toon_models::{LayerInfo, LayerKind, Rect};

    fn layer_at(x: i64, y: i64, w: u32, h: u32) -> LoadedLayer {
        let mut image = RgbaImage::new(w, h);
        for p in image.pixels_mut() {
            *p = Rgba([200, 100, 50, 255]);
        }
        LoadedLayer {
            info: LayerInfo {
                id: "test".to_string(),
                path: "test.png".to_string(),
                kind: LayerKind::ExpressionEye,
                character: None,
                phoneme: None,
                x: x as i32,
                y: y as i32,
                width: w,
                height: h,
                z_index: 10,
                visible: true,
            },
            image,
            x,
            y,
            content_bounds: None,
            cropped: None,
        }
    }

    #[test]
    fn test_translate_in_bounds() {
        let layer = layer_at(10, 10, 8, 8);
        let t = translate_layer(&layer, 4, -4, 100, 100);
        assert_eq!((t.x, t.y), (14, 6));
        assert_eq!(t.image.dimensions(), (8, 8));
    }

    #[test]
    fn test_translate_clips_left_edge() {
        let layer = layer_at(2, 2, 8, 8);
        let t = translate_layer(&layer, -6, 0, 100, 100);
        assert_eq!((t.x, t.y), (0, 2));
        assert_eq!(t.image.dimensions(), (4, 8));
    }

    #[test]
    fn test_translate_clips_bottom_right() {
        let layer = layer_at(96, 96, 8, 8);
        let t = translate_layer(&layer, 0, 0, 100, 100);
        assert_eq!(t.image.dimensions(), (4, 4));
    }

    #[test]
    fn test_rotate_bbox_growth() {
        let src = RgbaImage::from_pixel(20, 10, Rgba([255, 0, 0, 255]));
        let rotated = rotate_rgba(&src, 90.0);
        // Width and height swap at 90 degrees (within rounding).
        assert!(rotated.width() >= 10 && rotated.width() <= 12);
        assert!(rotated.height() >= 20 && rotated.height() <= 22);
    }

    #[test]
    fn test_rotate_zero_preserves_content() {
        let mut src = RgbaImage::new(9, 9);
        src.put_pixel(4, 4, Rgba([255, 0, 0, 255]));
        let rotated = rotate_rgba(&src, 0.0);
        assert_eq!(rotated.dimensions(), (9, 9));
        assert_eq!(rotated.get_pixel(4, 4).0[0], 255);
    }

    #[test]
    fn test_rotate_brow_placement() {
        let mut layer = layer_at(50, 30, 40, 20);
        layer.info.kind = LayerKind::ExpressionBrow;
        layer.content_bounds = Some(Rect::new(10, 5, 20, 10));
        layer.cropped = Some(
            image::imageops::crop_imm(&layer.image, 10, 5, 20, 10).to_image(),
        );

        let t = rotate_brow_layer(&layer, 4, 0.0).unwrap();
        // Content center is (20, 10) in layer space; buffer is 20x10.
        assert_eq!(t.x, 50 + 20 - 10);
        assert_eq!(t.y, 30 + 10 - 5 + 4);
    }

    #[test]
    fn test_cache_eviction_batch() {
        let mut cache = ExpressionLayerCache::new();
        for i in 0..=TRANSFORM_CACHE_CAPACITY {
            cache.insert(
                format!("eye:l:{i}:0"),
                Arc::new(TransformedLayer {
                    image: RgbaImage::new(1, 1),
                    x: 0,
                    y: 0,
                }),
            );
        }
        assert_eq!(cache.len(), TRANSFORM_CACHE_CAPACITY + 1 - TRANSFORM_EVICT_BATCH);
        // The oldest entries went first.
        assert!(cache.get("eye:l:0:0").is_none());
        assert!(cache
            .get(&format!("eye:l:{TRANSFORM_CACHE_CAPACITY}:0"))
            .is_some());
    }

    #[test]
    fn test_spec_keys() {
        let layer = layer_at(0, 0, 4, 4);
        let spec = TransformSpec::translate(&layer, 8, -4);
        assert_eq!(spec.key, "eye:test:8:-4");
        let spec = TransformSpec::rotate_brow(&layer, 2, -3.25);
        assert_eq!(spec.key, "brow:test:2:-33");
    }
}
