//! Precomposited static base.
//!
//! Everything that never animates (backgrounds, props, baked lighting
//! emissions) collapses into one opaque RGBA canvas. The base is rebuilt
//! only when lighting or emission parameters change, and each rebuild
//! bumps its version so stale expression-base cache keys become
//! unreachable.

use std::collections::HashSet;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use toon_models::LayerKind;

use crate::blend::{alpha_over, blend_over, hue_rotate, BlendMode};
use crate::layer_store::LayerStore;

/// Mutable lighting parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LightingState {
    /// Hue rotation applied to emission layers, degrees.
    pub hue_degrees: f64,
    /// Opacity multiplier for emission layers.
    pub emission_opacity: f32,
    /// Blend mode for emission layers.
    pub emission_blend: BlendMode,
    /// Whether the lights-on overlay is shown.
    pub lights_on: bool,
    /// Whether the lights-on overlay flickers.
    pub flicker: bool,
}

impl Default for LightingState {
    fn default() -> Self {
        Self {
            hue_degrees: 0.0,
            emission_opacity: 1.0,
            emission_blend: BlendMode::SoftLight,
            lights_on: true,
            flicker: false,
        }
    }
}

/// The versioned static base image.
pub struct StaticBase {
    image: Arc<RgbaImage>,
    version: u64,
}

impl StaticBase {
    /// Composite the base for the first time.
    pub fn build(store: &LayerStore, lighting: &LightingState) -> Self {
        Self {
            image: Arc::new(compose_static_base(store, lighting)),
            version: 1,
        }
    }

    /// Recomposite and bump the version. The old image stays alive for any
    /// frame still holding its `Arc`.
    pub fn rebuild(&mut self, store: &LayerStore, lighting: &LightingState) {
        self.image = Arc::new(compose_static_base(store, lighting));
        self.version += 1;
        debug!(version = self.version, "Static base rebuilt");
    }

    /// Install a base composited off-thread, bumping the version.
    pub fn install(&mut self, image: Arc<RgbaImage>) {
        self.image = image;
        self.version += 1;
        debug!(version = self.version, "Static base installed");
    }

    pub fn image(&self) -> Arc<RgbaImage> {
        Arc::clone(&self.image)
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Composite all static layers in z order over an opaque black canvas.
///
/// Emission layers use the configured blend mode and opacity, with hue
/// rotation applied to a working copy; everything else is plain
/// alpha-over. Mask and lights-on layers never appear here.
pub fn compose_static_base(store: &LayerStore, lighting: &LightingState) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(
        store.output_width,
        store.output_height,
        Rgba([0, 0, 0, 255]),
    );

    let background_emissions: HashSet<&str> = store
        .background_emissions()
        .iter()
        .map(|l| l.info.id.as_str())
        .collect();

    for layer in store.in_z_order() {
        if !layer.info.visible {
            continue;
        }
        match layer.info.kind {
            LayerKind::Static => {
                alpha_over(&mut canvas, &layer.image, layer.x, layer.y);
            }
            LayerKind::Emission if background_emissions.contains(layer.info.id.as_str()) => {
                composite_emission(&mut canvas, &layer.image, layer.x, layer.y, lighting);
            }
            _ => {}
        }
    }

    canvas
}

/// Blend one emission layer with the current lighting parameters.
pub fn composite_emission(
    canvas: &mut RgbaImage,
    emission: &RgbaImage,
    x: i64,
    y: i64,
    lighting: &LightingState,
) {
    if lighting.emission_opacity <= 0.0 {
        return;
    }
    if lighting.hue_degrees.abs() > f64::EPSILON {
        let mut rotated = emission.clone();
        hue_rotate(&mut rotated, lighting.hue_degrees);
        blend_over(
            canvas,
            &rotated,
            x,
            y,
            lighting.emission_blend,
            lighting.emission_opacity,
        );
    } else {
        blend_over(
            canvas,
            emission,
            x,
            y,
            lighting.emission_blend,
            lighting.emission_opacity,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lighting() {
        let lighting = LightingState::default();
        assert_eq!(lighting.emission_blend, BlendMode::SoftLight);
        assert!((lighting.emission_opacity - 1.0).abs() < f32::EPSILON);
        assert!(lighting.lights_on);
    }

    #[test]
    fn test_emission_zero_opacity_is_noop() {
        let mut canvas = RgbaImage::from_pixel(2, 2, Rgba([10, 10, 10, 255]));
        let emission = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]));
        let lighting = LightingState {
            emission_opacity: 0.0,
            ..Default::default()
        };
        composite_emission(&mut canvas, &emission, 0, 0, &lighting);
        assert_eq!(canvas.get_pixel(0, 0).0, [10, 10, 10, 255]);
    }

    #[test]
    fn test_emission_hue_changes_output() {
        let lighting = LightingState {
            emission_blend: BlendMode::Normal,
            ..Default::default()
        };
        let rotated = LightingState {
            hue_degrees: 120.0,
            ..lighting
        };
        let emission = RgbaImage::from_pixel(1, 1, Rgba([255, 0, 0, 255]));

        let mut a = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        let mut b = a.clone();
        composite_emission(&mut a, &emission, 0, 0, &lighting);
        composite_emission(&mut b, &emission, 0, 0, &rotated);
        assert_ne!(a.get_pixel(0, 0).0, b.get_pixel(0, 0).0);
    }
}
