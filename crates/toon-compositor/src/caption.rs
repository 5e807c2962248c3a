//! Caption banner rasterizing.
//!
//! The caption is built as a small SVG (rounded banner, centered text) and
//! rasterized once per distinct caption text; the overlay is then reused
//! frame after frame through its digest.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use image::RgbaImage;
use tracing::debug;

use crate::compose::CaptionOverlay;
use crate::error::{CompositorError, CompositorResult};

/// Banner height in output pixels.
const BANNER_HEIGHT: u32 = 56;
/// Gap between the banner and the bottom edge.
const BANNER_MARGIN_BOTTOM: u32 = 20;
/// Fraction of the output width the banner spans.
const BANNER_WIDTH_RATIO: f64 = 0.82;
/// Rendered captions kept around.
const CAPTION_CACHE_CAPACITY: usize = 8;

/// Rasterizes caption text into positioned banner overlays.
pub struct CaptionRenderer {
    output_width: u32,
    output_height: u32,
    options: usvg::Options<'static>,
    cache: HashMap<String, Arc<CaptionOverlay>>,
}

impl CaptionRenderer {
    /// Create a renderer for the given output size, loading system fonts.
    pub fn new(output_width: u32, output_height: u32) -> Self {
        let mut options = usvg::Options::default();
        options.fontdb_mut().load_system_fonts();
        Self {
            output_width,
            output_height,
            options,
            cache: HashMap::new(),
        }
    }

    /// Render (or reuse) the banner for a caption.
    pub fn render(&mut self, text: &str) -> CompositorResult<Arc<CaptionOverlay>> {
        let digest = caption_digest(text);
        if let Some(cached) = self.cache.get(&digest) {
            return Ok(Arc::clone(cached));
        }

        let width = (self.output_width as f64 * BANNER_WIDTH_RATIO).round() as u32;
        let svg = banner_svg(text, width, BANNER_HEIGHT);

        let tree = usvg::Tree::from_str(&svg, &self.options)
            .map_err(|e| CompositorError::CaptionRender(e.to_string()))?;
        let mut pixmap = resvg::tiny_skia::Pixmap::new(width, BANNER_HEIGHT)
            .ok_or_else(|| CompositorError::CaptionRender("pixmap allocation".to_string()))?;
        resvg::render(&tree, resvg::tiny_skia::Transform::identity(), &mut pixmap.as_mut());

        let image = pixmap_to_rgba(&pixmap);
        let overlay = Arc::new(CaptionOverlay {
            x: ((self.output_width - width) / 2) as i64,
            y: (self.output_height - BANNER_HEIGHT - BANNER_MARGIN_BOTTOM) as i64,
            image,
            digest: digest.clone(),
        });

        if self.cache.len() >= CAPTION_CACHE_CAPACITY {
            self.cache.clear();
        }
        self.cache.insert(digest, Arc::clone(&overlay));
        debug!(text, "Caption banner rendered");
        Ok(overlay)
    }
}

/// Stable digest of a caption text.
pub fn caption_digest(text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// The banner SVG: translucent rounded rectangle with centered text.
fn banner_svg(text: &str, width: u32, height: u32) -> String {
    let escaped = escape_xml(text);
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}">
  <rect x="0" y="0" width="{width}" height="{height}" rx="12" ry="12"
        fill="#000000" fill-opacity="0.65"/>
  <text x="{cx}" y="{cy}" text-anchor="middle" dominant-baseline="central"
        font-family="sans-serif" font-size="26" fill="#ffffff">{escaped}</text>
</svg>"##,
        width = width,
        height = height,
        cx = width / 2,
        cy = height / 2,
        escaped = escaped,
    )
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Convert a premultiplied tiny-skia pixmap to straight-alpha RGBA.
fn pixmap_to_rgba(pixmap: &resvg::tiny_skia::Pixmap) -> RgbaImage {
    let (width, height) = (pixmap.width(), pixmap.height());
    let mut out = RgbaImage::new(width, height);
    for (pixel, src) in out.pixels_mut().zip(pixmap.pixels()) {
        let color = src.demultiply();
        pixel.0 = [color.red(), color.green(), color.blue(), color.alpha()];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_stable_and_distinct() {
        assert_eq!(caption_digest("hello"), caption_digest("hello"));
        assert_ne!(caption_digest("hello"), caption_digest("hello!"));
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a & b < c"), "a &amp; b &lt; c");
    }

    #[test]
    fn test_banner_svg_shape() {
        let svg = banner_svg("Hi <there>", 400, 56);
        assert!(svg.contains("rx=\"12\""));
        assert!(svg.contains("&lt;there&gt;"));
        assert!(svg.contains("text-anchor=\"middle\""));
    }

    #[test]
    fn test_render_caches_by_digest() {
        let mut renderer = CaptionRenderer::new(960, 540);
        let a = renderer.render("Hello there, friend.").unwrap();
        let b = renderer.render("Hello there, friend.").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.digest, caption_digest("Hello there, friend."));
        // Banner sits inside the frame.
        assert!(a.y > 0 && (a.y as u32) < 540);
        assert!(a.image.width() > 0);
    }
}
