//! Pixel blend modes and color adjustments.
//!
//! Blend formulas follow the SVG compositing definitions. Buffers are
//! straight-alpha RGBA; the static base canvas is fully opaque, so
//! non-normal modes lerp the blended color in by source coverage.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported layer blend modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Add,
    Subtract,
    Divide,
}

impl Default for BlendMode {
    fn default() -> Self {
        BlendMode::SoftLight
    }
}

impl FromStr for BlendMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(BlendMode::Normal),
            "multiply" => Ok(BlendMode::Multiply),
            "screen" => Ok(BlendMode::Screen),
            "overlay" => Ok(BlendMode::Overlay),
            "darken" => Ok(BlendMode::Darken),
            "lighten" => Ok(BlendMode::Lighten),
            "hard-light" => Ok(BlendMode::HardLight),
            "soft-light" => Ok(BlendMode::SoftLight),
            "difference" => Ok(BlendMode::Difference),
            "exclusion" => Ok(BlendMode::Exclusion),
            "add" => Ok(BlendMode::Add),
            "subtract" => Ok(BlendMode::Subtract),
            "divide" => Ok(BlendMode::Divide),
            _ => Err(()),
        }
    }
}

impl BlendMode {
    /// Blend one channel pair, inputs and output in [0, 1].
    fn apply(self, s: f32, d: f32) -> f32 {
        match self {
            BlendMode::Normal => s,
            BlendMode::Multiply => s * d,
            BlendMode::Screen => s + d - s * d,
            BlendMode::Overlay => hard_light(d, s),
            BlendMode::Darken => s.min(d),
            BlendMode::Lighten => s.max(d),
            BlendMode::HardLight => hard_light(s, d),
            BlendMode::SoftLight => soft_light(s, d),
            BlendMode::Difference => (s - d).abs(),
            BlendMode::Exclusion => s + d - 2.0 * s * d,
            BlendMode::Add => (s + d).min(1.0),
            BlendMode::Subtract => (d - s).max(0.0),
            BlendMode::Divide => {
                if s <= 0.0 {
                    1.0
                } else {
                    (d / s).min(1.0)
                }
            }
        }
    }
}

fn hard_light(s: f32, d: f32) -> f32 {
    if s <= 0.5 {
        2.0 * s * d
    } else {
        1.0 - 2.0 * (1.0 - s) * (1.0 - d)
    }
}

fn soft_light(s: f32, d: f32) -> f32 {
    if s <= 0.5 {
        d - (1.0 - 2.0 * s) * d * (1.0 - d)
    } else {
        let dd = if d <= 0.25 {
            ((16.0 * d - 12.0) * d + 4.0) * d
        } else {
            d.sqrt()
        };
        d + (2.0 * s - 1.0) * (dd - d)
    }
}

/// Composite `src` over `dst` at `(x, y)` with straight-alpha over.
///
/// Source regions outside the destination are clipped; negative offsets
/// clip the source's top/left.
pub fn alpha_over(dst: &mut RgbaImage, src: &RgbaImage, x: i64, y: i64) {
    blend_over(dst, src, x, y, BlendMode::Normal, 1.0);
}

/// Composite `src` over `dst` with the given blend mode and opacity.
pub fn blend_over(
    dst: &mut RgbaImage,
    src: &RgbaImage,
    x: i64,
    y: i64,
    mode: BlendMode,
    opacity: f32,
) {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 {
        return;
    }

    let (dw, dh) = (dst.width() as i64, dst.height() as i64);
    let (sw, sh) = (src.width() as i64, src.height() as i64);

    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + sw).min(dw);
    let y1 = (y + sh).min(dh);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    for dy in y0..y1 {
        for dx in x0..x1 {
            let sp = src.get_pixel((dx - x) as u32, (dy - y) as u32).0;
            let sa = sp[3] as f32 / 255.0 * opacity;
            if sa <= 0.0 {
                continue;
            }

            let dp = dst.get_pixel_mut(dx as u32, dy as u32);
            let da = dp.0[3] as f32 / 255.0;
            let out_a = sa + da * (1.0 - sa);
            if out_a <= 0.0 {
                continue;
            }

            for c in 0..3 {
                let s = sp[c] as f32 / 255.0;
                let d = dp.0[c] as f32 / 255.0;
                let blended = if mode == BlendMode::Normal {
                    s
                } else {
                    // Blend against the destination color where it has
                    // coverage, source color elsewhere.
                    mode.apply(s, d) * da + s * (1.0 - da)
                };
                let out = (blended * sa + d * da * (1.0 - sa)) / out_a;
                dp.0[c] = (out * 255.0).round().clamp(0.0, 255.0) as u8;
            }
            dp.0[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Rotate hue of every pixel by `degrees`, in place.
///
/// Uses the feColorMatrix hue-rotation matrix; alpha is untouched.
pub fn hue_rotate(image: &mut RgbaImage, degrees: f64) {
    let rad = degrees.to_radians();
    let (cos, sin) = (rad.cos() as f32, rad.sin() as f32);

    let m = [
        [
            0.213 + cos * 0.787 - sin * 0.213,
            0.715 - cos * 0.715 - sin * 0.715,
            0.072 - cos * 0.072 + sin * 0.928,
        ],
        [
            0.213 - cos * 0.213 + sin * 0.143,
            0.715 + cos * 0.285 + sin * 0.140,
            0.072 - cos * 0.072 - sin * 0.283,
        ],
        [
            0.213 - cos * 0.213 - sin * 0.787,
            0.715 - cos * 0.715 + sin * 0.715,
            0.072 + cos * 0.928 + sin * 0.072,
        ],
    ];

    for pixel in image.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let (rf, gf, bf) = (r as f32, g as f32, b as f32);
        pixel.0 = [
            (m[0][0] * rf + m[0][1] * gf + m[0][2] * bf).clamp(0.0, 255.0) as u8,
            (m[1][0] * rf + m[1][1] * gf + m[1][2] * bf).clamp(0.0, 255.0) as u8,
            (m[2][0] * rf + m[2][1] * gf + m[2][2] * bf).clamp(0.0, 255.0) as u8,
            a,
        ];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(rgba))
    }

    #[test]
    fn test_parse_all_modes() {
        for name in [
            "normal",
            "multiply",
            "screen",
            "overlay",
            "darken",
            "lighten",
            "hard-light",
            "soft-light",
            "difference",
            "exclusion",
            "add",
            "subtract",
            "divide",
        ] {
            assert!(name.parse::<BlendMode>().is_ok(), "{name}");
        }
        assert!("color-dodge".parse::<BlendMode>().is_err());
    }

    #[test]
    fn test_alpha_over_opaque() {
        let mut dst = solid(4, 4, [0, 0, 0, 255]);
        let src = solid(2, 2, [255, 0, 0, 255]);
        alpha_over(&mut dst, &src, 1, 1);
        assert_eq!(dst.get_pixel(1, 1).0, [255, 0, 0, 255]);
        assert_eq!(dst.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(dst.get_pixel(3, 3).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_alpha_over_half_transparent() {
        let mut dst = solid(1, 1, [0, 0, 0, 255]);
        let src = solid(1, 1, [255, 255, 255, 128]);
        alpha_over(&mut dst, &src, 0, 0);
        let [r, _, _, a] = dst.get_pixel(0, 0).0;
        assert!((127..=129).contains(&r));
        assert_eq!(a, 255);
    }

    #[test]
    fn test_clip_negative_offset() {
        let mut dst = solid(2, 2, [0, 0, 0, 255]);
        let src = solid(4, 4, [255, 0, 0, 255]);
        alpha_over(&mut dst, &src, -2, -2);
        assert_eq!(dst.get_pixel(0, 0).0, [255, 0, 0, 255]);
        alpha_over(&mut dst, &src, 10, 10);
    }

    #[test]
    fn test_multiply_darkens() {
        let mut dst = solid(1, 1, [128, 128, 128, 255]);
        let src = solid(1, 1, [128, 128, 128, 255]);
        blend_over(&mut dst, &src, 0, 0, BlendMode::Multiply, 1.0);
        let [r, ..] = dst.get_pixel(0, 0).0;
        assert!((63..=65).contains(&r), "got {r}");
    }

    #[test]
    fn test_screen_lightens() {
        let mut dst = solid(1, 1, [128, 128, 128, 255]);
        let src = solid(1, 1, [128, 128, 128, 255]);
        blend_over(&mut dst, &src, 0, 0, BlendMode::Screen, 1.0);
        let [r, ..] = dst.get_pixel(0, 0).0;
        assert!(r > 128, "got {r}");
    }

    #[test]
    fn test_soft_light_identity_on_midgray_source() {
        // s = 0.5 leaves the destination unchanged.
        let mut dst = solid(1, 1, [40, 90, 200, 255]);
        let src = solid(1, 1, [128, 128, 128, 255]);
        blend_over(&mut dst, &src, 0, 0, BlendMode::SoftLight, 1.0);
        let [r, g, b, _] = dst.get_pixel(0, 0).0;
        assert!((39..=41).contains(&r));
        assert!((89..=91).contains(&g));
        assert!((199..=201).contains(&b));
    }

    #[test]
    fn test_opacity_scales_effect() {
        let mut full = solid(1, 1, [0, 0, 0, 255]);
        let mut half = solid(1, 1, [0, 0, 0, 255]);
        let src = solid(1, 1, [255, 255, 255, 255]);
        blend_over(&mut full, &src, 0, 0, BlendMode::Normal, 1.0);
        blend_over(&mut half, &src, 0, 0, BlendMode::Normal, 0.5);
        assert!(half.get_pixel(0, 0).0[0] < full.get_pixel(0, 0).0[0]);
    }

    #[test]
    fn test_hue_rotate_red_to_green() {
        let mut img = solid(1, 1, [255, 0, 0, 200]);
        hue_rotate(&mut img, 120.0);
        let [r, g, _, a] = img.get_pixel(0, 0).0;
        assert!(g > r, "r={r} g={g}");
        assert_eq!(a, 200);
    }

    #[test]
    fn test_hue_rotate_zero_is_identity() {
        let mut img = solid(1, 1, [37, 140, 210, 255]);
        hue_rotate(&mut img, 0.0);
        let [r, g, b, _] = img.get_pixel(0, 0).0;
        assert!((36..=38).contains(&r));
        assert!((139..=141).contains(&g));
        assert!((209..=211).contains(&b));
    }
}
