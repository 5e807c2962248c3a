//! Layer manifest model.
//!
//! The manifest is the ordered list of pre-rendered raster layers exported
//! from the art pipeline, plus the native canvas dimensions. It is read once
//! at startup and never mutated.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::character::CharacterSide;
use crate::phoneme::Phoneme;

/// Errors reading the layer manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error reading manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown layer type: {0}")]
    UnknownLayerType(String),
}

/// Semantic role of a layer.
///
/// The renderer dispatches on this tag; `visible` and `z_index` belong to
/// every layer regardless of role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerKind {
    /// Backgrounds, props, and fixed lighting that never animate.
    Static,
    /// One mouth shape per phoneme per character.
    MouthPhoneme,
    /// Closed-eye overlay shown during a blink.
    Blink,
    /// Translatable eye layer.
    ExpressionEye,
    /// Rotatable eyebrow layer.
    ExpressionBrow,
    /// Eye-socket cover that translates with the eyes.
    ExpressionCover,
    /// Nose layer composited over the expression base.
    Nose,
    /// Additive/soft-light lighting emission.
    Emission,
    /// Bright-region overlay shown when the lights are on.
    LightsOn,
    /// Alpha mask defining the TV viewport. Never rendered.
    Mask,
    /// Screen-glass reflection composited over TV content.
    TvReflection,
}

impl LayerKind {
    /// Whether this layer participates in the precomposited static base.
    pub fn is_static_base(self) -> bool {
        matches!(self, LayerKind::Static | LayerKind::Emission)
    }
}

fn default_visible() -> bool {
    true
}

/// One manifest entry describing a raster layer at native resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerInfo {
    /// Stable string id, unique within the manifest.
    pub id: String,
    /// Source image path, `/`-separated, relative to the layers directory.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: LayerKind,
    /// Owning character, if any.
    #[serde(default)]
    pub character: Option<CharacterSide>,
    /// Mouth shape, for `MouthPhoneme` layers.
    #[serde(default)]
    pub phoneme: Option<Phoneme>,
    /// Top-left position at native resolution.
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "zIndex")]
    pub z_index: i32,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

impl LayerInfo {
    /// Resolve the layer's image path against the layers directory,
    /// translating `/` separators to the host OS.
    pub fn resolved_path(&self, layers_dir: &Path) -> PathBuf {
        let mut out = layers_dir.to_path_buf();
        for part in self.path.split('/') {
            out.push(part);
        }
        out
    }
}

/// The ordered list of layers plus native canvas dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Native canvas width in pixels.
    pub width: u32,
    /// Native canvas height in pixels.
    pub height: u32,
    pub layers: Vec<LayerInfo>,
}

impl Manifest {
    /// Load and parse a manifest JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ManifestError::NotFound(path.to_path_buf()));
        }
        let data = std::fs::read(path)?;
        let manifest: Manifest = serde_json::from_slice(&data)?;
        Ok(manifest)
    }

    /// Layers of a given kind, in manifest order.
    pub fn layers_of_kind(&self, kind: LayerKind) -> impl Iterator<Item = &LayerInfo> {
        self.layers.iter().filter(move |l| l.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "width": 2880,
        "height": 1620,
        "layers": [
            {"id": "bg", "path": "scene/bg.png", "type": "static",
             "x": 0, "y": 0, "width": 2880, "height": 1620, "zIndex": 0},
            {"id": "left-mouth-a", "path": "left/mouth_a.png", "type": "mouth-phoneme",
             "character": "left", "phoneme": "A",
             "x": 400, "y": 700, "width": 220, "height": 160, "zIndex": 30},
            {"id": "tv-mask", "path": "scene/tv_mask.png", "type": "mask",
             "x": 0, "y": 0, "width": 2880, "height": 1620, "zIndex": 0, "visible": false}
        ]
    }"#;

    #[test]
    fn test_parse_manifest() {
        let m: Manifest = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(m.width, 2880);
        assert_eq!(m.layers.len(), 3);
        assert_eq!(m.layers[0].kind, LayerKind::Static);
        assert!(m.layers[0].visible);
        assert_eq!(m.layers[1].character, Some(CharacterSide::Left));
        assert_eq!(m.layers[1].phoneme, Some(Phoneme::A));
        assert!(!m.layers[2].visible);
    }

    #[test]
    fn test_resolved_path_is_os_native() {
        let m: Manifest = serde_json::from_str(SAMPLE).unwrap();
        let p = m.layers[0].resolved_path(Path::new("assets"));
        assert!(p.ends_with(Path::new("scene").join("bg.png")));
    }

    #[test]
    fn test_layers_of_kind() {
        let m: Manifest = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(m.layers_of_kind(LayerKind::Mask).count(), 1);
        assert_eq!(m.layers_of_kind(LayerKind::Blink).count(), 0);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Manifest::load("/nonexistent/manifest.json").unwrap_err();
        assert!(matches!(err, ManifestError::NotFound(_)));
    }
}
