//! Pure composition steps and cache-key construction.
//!
//! Every function here is a deterministic function of its inputs; the
//! cache traversal and committed-base state live in `scene`.

use std::io::Cursor;
use std::sync::Arc;

use image::RgbaImage;

use toon_models::{CharacterSide, CharacterLimits, ExpressionOffsets, LayerKind, Phoneme, Rect};

use crate::blend::alpha_over;
use crate::error::{CompositorError, CompositorResult};
use crate::layer_store::LayerStore;
use crate::static_base::{composite_emission, LightingState};
use crate::transforms::{TransformSpec, TransformedLayer};

/// JPEG quality for cached frames.
pub const JPEG_QUALITY: u8 = 85;

/// Digest of both characters' quantized expression state.
pub fn expr_digest(left: &ExpressionOffsets, right: &ExpressionOffsets) -> String {
    format!("L{}|R{}", left.digest_fragment(), right.digest_fragment())
}

/// Expression-base cache key.
pub fn l1_key(static_base_version: u64, digest: &str) -> String {
    format!("{static_base_version}:{digest}")
}

/// Character-frame cache key.
pub fn l2_key(
    l1_key: &str,
    lighting_version: u64,
    left: Phoneme,
    right: Phoneme,
    left_blink: bool,
    right_blink: bool,
) -> String {
    format!(
        "{l1_key}:lv{lighting_version}:{left}:{right}:{}:{}",
        left_blink as u8, right_blink as u8
    )
}

/// Final output cache key.
pub fn output_key(l2_key: &str, tv_frame: Option<u64>, caption_digest: Option<&str>) -> String {
    let tv = tv_frame.map_or_else(|| "none".to_string(), |f| f.to_string());
    let caption = caption_digest.unwrap_or("none");
    format!("{l2_key}:tv{tv}:c{caption}")
}

/// The transforms one character's current offsets require.
///
/// Among a character's two brow layers, the one further left on screen is
/// its screen-left brow; rotation signs mirror for the right-facing
/// character so the face reads symmetrically.
pub fn transform_specs(
    store: &LayerStore,
    character: CharacterSide,
    offsets: &ExpressionOffsets,
    limits: &CharacterLimits,
) -> Vec<TransformSpec> {
    let mut specs = Vec::new();

    for layer in store.of_kind_for(LayerKind::ExpressionEye, character) {
        specs.push(TransformSpec::translate(layer, offsets.eyes.x, offsets.eyes.y));
    }
    for layer in store.of_kind_for(LayerKind::ExpressionCover, character) {
        specs.push(TransformSpec::translate(layer, offsets.eyes.x, offsets.eyes.y));
    }

    let mut brows: Vec<_> = store
        .of_kind_for(LayerKind::ExpressionBrow, character)
        .collect();
    brows.sort_by_key(|l| l.x);

    for (idx, layer) in brows.iter().enumerate() {
        let is_left_side = idx == 0;
        let side_y = offsets.eyebrows.side_y(is_left_side);
        let derived = limits.brow_rotation_for_y(side_y);
        let manual = offsets.eyebrows.side_rotation(is_left_side) as f64 / 10.0;
        let mut angle = derived + manual;
        if !is_left_side {
            angle = -angle;
        }
        if character.faces_left() {
            angle = -angle;
        }
        specs.push(TransformSpec::rotate_brow(layer, side_y, angle));
    }

    specs
}

/// Expression base: static base plus transformed eyes/covers/brows plus
/// nose overlays, composited in z order.
pub fn compose_l1(
    store: &LayerStore,
    base: &RgbaImage,
    transforms: &[(i32, Arc<TransformedLayer>)],
) -> RgbaImage {
    let mut canvas = base.clone();

    let mut items: Vec<(i32, &RgbaImage, i64, i64)> = transforms
        .iter()
        .map(|(z, t)| (*z, &t.image, t.x, t.y))
        .collect();
    for layer in store.of_kind(LayerKind::Nose) {
        items.push((layer.info.z_index, &layer.image, layer.x, layer.y));
    }
    items.sort_by_key(|(z, ..)| *z);

    for (_, image, x, y) in items {
        alpha_over(&mut canvas, image, x, y);
    }

    canvas
}

/// Character frame: expression base plus per-character mouth, blink
/// overlays, foreground emissions, and the lights-on overlay.
pub fn compose_l2(
    store: &LayerStore,
    l1: &RgbaImage,
    lighting: &LightingState,
    left_phoneme: Phoneme,
    right_phoneme: Phoneme,
    left_blink: bool,
    right_blink: bool,
) -> RgbaImage {
    let mut canvas = l1.clone();

    for (character, phoneme, blink) in [
        (CharacterSide::Left, left_phoneme, left_blink),
        (CharacterSide::Right, right_phoneme, right_blink),
    ] {
        if let Some(mouth) = store.mouth_layer(character, phoneme) {
            alpha_over(&mut canvas, &mouth.image, mouth.x, mouth.y);
        }
        if blink {
            if let Some(overlay) = store.blink_layer(character) {
                alpha_over(&mut canvas, &overlay.image, overlay.x, overlay.y);
            }
        }
    }

    for emission in store.foreground_emissions() {
        composite_emission(&mut canvas, &emission.image, emission.x, emission.y, lighting);
    }

    if lighting.lights_on {
        for layer in store.lights_on_layers() {
            alpha_over(&mut canvas, &layer.image, layer.x, layer.y);
        }
    }

    canvas
}

/// A rasterized caption banner with its placement.
#[derive(Debug, Clone)]
pub struct CaptionOverlay {
    pub image: RgbaImage,
    pub x: i64,
    pub y: i64,
    /// Digest of the caption text, used in output cache keys.
    pub digest: String,
}

/// Final frame: character frame plus TV content, TV reflection, and the
/// caption banner.
pub fn compose_output(
    store: &LayerStore,
    l2: &RgbaImage,
    tv_frame: Option<&RgbaImage>,
    caption: Option<&CaptionOverlay>,
) -> RgbaImage {
    let mut canvas = l2.clone();

    if let Some(frame) = tv_frame {
        let Rect { x, y, .. } = store.tv_viewport;
        alpha_over(&mut canvas, frame, x as i64, y as i64);
        for reflection in store.tv_reflection_layers() {
            alpha_over(&mut canvas, &reflection.image, reflection.x, reflection.y);
        }
    }

    if let Some(caption) = caption {
        alpha_over(&mut canvas, &caption.image, caption.x, caption.y);
    }

    canvas
}

/// Encode an RGBA frame to JPEG.
pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> CompositorResult<Vec<u8>> {
    let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut out = Cursor::new(Vec::new());
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)
        .map_err(|e| CompositorError::JpegEncode(e.to_string()))?;
    Ok(out.into_inner())
}

/// Decode a cached JPEG frame back to RGBA.
pub fn decode_jpeg(data: &[u8]) -> CompositorResult<RgbaImage> {
    image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map(|d| d.to_rgba8())
        .map_err(|e| CompositorError::JpegEncode(e.to_string()))
}

/// Strip alpha into the packed 24-bit RGB layout the encoder consumes.
pub fn rgba_to_rgb24(image: &RgbaImage) -> Vec<u8> {
    let mut out = Vec::with_capacity((image.width() * image.height() * 3) as usize);
    for pixel in image.pixels() {
        out.extend_from_slice(&pixel.0[..3]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use toon_models::ExpressionOffsets;

    #[test]
    fn test_key_composition() {
        let digest = expr_digest(&ExpressionOffsets::default(), &ExpressionOffsets::default());
        let l1 = l1_key(3, &digest);
        assert!(l1.starts_with("3:L"));

        let l2 = l2_key(&l1, 7, Phoneme::C, Phoneme::A, false, true);
        assert!(l2.contains(":lv7:C:A:0:1"));

        let out = output_key(&l2, Some(41), Some("abc123"));
        assert!(out.ends_with(":tv41:cabc123"));
        let idle = output_key(&l2, None, None);
        assert!(idle.ends_with(":tvnone:cnone"));
    }

    #[test]
    fn test_keys_distinguish_versions() {
        let digest = expr_digest(&ExpressionOffsets::default(), &ExpressionOffsets::default());
        assert_ne!(l1_key(1, &digest), l1_key(2, &digest));
        let l1 = l1_key(1, &digest);
        assert_ne!(
            l2_key(&l1, 1, Phoneme::A, Phoneme::A, false, false),
            l2_key(&l1, 2, Phoneme::A, Phoneme::A, false, false)
        );
    }

    #[test]
    fn test_jpeg_roundtrip_dimensions() {
        let image = RgbaImage::from_pixel(32, 16, image::Rgba([120, 40, 220, 255]));
        let jpeg = encode_jpeg(&image, JPEG_QUALITY).unwrap();
        assert!(jpeg.starts_with(&[0xFF, 0xD8]));
        let decoded = decode_jpeg(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (32, 16));
    }

    #[test]
    fn test_rgb24_packing() {
        let image = RgbaImage::from_pixel(2, 2, image::Rgba([1, 2, 3, 4]));
        let rgb = rgba_to_rgb24(&image);
        assert_eq!(rgb.len(), 12);
        assert_eq!(&rgb[..3], &[1, 2, 3]);
    }
}
