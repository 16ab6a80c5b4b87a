//! Pixel-level drawing toolkit shared by the card, avatar and backdrop
//! stages: rounded geometry, gradient fills, image placement, alpha
//! punch-outs, drop shadows and the pixmap/image-buffer conversions.

use anyhow::{anyhow, bail, Context, Result};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::RgbaImage;
use tiny_skia::{
    BlendMode, Color, ColorU8, FillRule, FilterQuality, GradientStop, LineCap, LinearGradient,
    Paint, Path, PathBuilder, Pattern, Pixmap, PixmapPaint, Point, PremultipliedColorU8,
    RadialGradient, Rect, SpreadMode, Stroke, Transform,
};

use crate::colors::Rgb;

/// Control-point offset factor for approximating quarter circles with
/// cubic curves.
const KAPPA: f32 = 0.552_284_8;

pub fn new_pixmap(width: u32, height: u32) -> Result<Pixmap> {
    Pixmap::new(width, height).ok_or_else(|| anyhow!("invalid canvas size {width}x{height}"))
}

/// Rounded-rectangle outline. The radius is clamped so it never exceeds
/// half of either dimension; a radius of half the size yields a capsule.
pub fn rounded_rect_path(x: f32, y: f32, w: f32, h: f32, radius: f32) -> Option<Path> {
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    let mut r = radius.max(0.0);
    if w < 2.0 * r {
        r = w / 2.0;
    }
    if h < 2.0 * r {
        r = h / 2.0;
    }
    let k = r * KAPPA;
    let mut pb = PathBuilder::new();
    pb.move_to(x + r, y);
    pb.line_to(x + w - r, y);
    pb.cubic_to(x + w - r + k, y, x + w, y + r - k, x + w, y + r);
    pb.line_to(x + w, y + h - r);
    pb.cubic_to(x + w, y + h - r + k, x + w - r + k, y + h, x + w - r, y + h);
    pb.line_to(x + r, y + h);
    pb.cubic_to(x + r - k, y + h, x, y + h - r + k, x, y + h - r);
    pb.line_to(x, y + r);
    pb.cubic_to(x, y + r - k, x + r - k, y, x + r, y);
    pb.close();
    pb.finish()
}

/// Fills a rounded rectangle with a diagonal gradient running from the
/// top-left to the bottom-right corner. Equal stops collapse to a solid
/// fill.
#[allow(clippy::too_many_arguments)]
pub fn fill_rounded_rect(
    pixmap: &mut Pixmap,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    radius: f32,
    from: Rgb,
    to: Rgb,
) {
    let Some(path) = rounded_rect_path(x, y, w, h, radius) else {
        return;
    };
    let mut paint = Paint::default();
    paint.anti_alias = true;
    if from == to {
        paint.set_color(from.to_skia());
    } else {
        let stops = vec![
            GradientStop::new(0.0, from.to_skia()),
            GradientStop::new(1.0, to.to_skia()),
        ];
        match LinearGradient::new(
            Point::from_xy(x, y),
            Point::from_xy(x + w, y + h),
            stops,
            SpreadMode::Pad,
            Transform::identity(),
        ) {
            Some(shader) => paint.shader = shader,
            None => paint.set_color(from.to_skia()),
        }
    }
    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
}

/// Solid rounded rectangle, alpha included. Used for the translucent
/// bubble behind stickers.
pub fn fill_rounded_rect_color(
    pixmap: &mut Pixmap,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    radius: f32,
    color: Color,
) {
    let Some(path) = rounded_rect_path(x, y, w, h, radius) else {
        return;
    };
    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.set_color(color);
    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
}

pub fn fill_rect(pixmap: &mut Pixmap, x: f32, y: f32, w: f32, h: f32, color: Color) {
    let Some(rect) = Rect::from_xywh(x, y, w, h) else {
        return;
    };
    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.set_color(color);
    pixmap.fill_rect(rect, &paint, Transform::identity(), None);
}

/// Stroked diagonal cross, the "could not load" glyph on placeholder
/// tiles.
pub fn draw_cross(pixmap: &mut Pixmap, cx: f32, cy: f32, size: f32, width: f32, color: Color) {
    let half = size / 2.0;
    let mut pb = PathBuilder::new();
    pb.move_to(cx - half, cy - half);
    pb.line_to(cx + half, cy + half);
    pb.move_to(cx + half, cy - half);
    pb.line_to(cx - half, cy + half);
    let Some(path) = pb.finish() else {
        return;
    };
    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.set_color(color);
    let stroke = Stroke {
        width,
        line_cap: LineCap::Round,
        ..Stroke::default()
    };
    pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
}

/// Erases the alpha inside a rectangle, leaving a transparent window.
/// Anti-aliasing stays off so the hole edge lands exactly on pixel
/// boundaries where video frames are composited underneath.
pub fn punch_rect(pixmap: &mut Pixmap, x: f32, y: f32, w: f32, h: f32) {
    let Some(rect) = Rect::from_xywh(x, y, w, h) else {
        return;
    };
    let mut paint = Paint::default();
    paint.anti_alias = false;
    paint.set_color(Color::BLACK);
    paint.blend_mode = BlendMode::DestinationOut;
    pixmap.fill_rect(rect, &paint, Transform::identity(), None);
}

/// Draws `image` stretched into the `w`x`h` slot with rounded corners.
pub fn draw_image_rounded(
    pixmap: &mut Pixmap,
    image: &Pixmap,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    radius: f32,
) {
    if image.width() == 0 || image.height() == 0 {
        return;
    }
    let Some(path) = rounded_rect_path(x, y, w, h, radius) else {
        return;
    };
    let sx = w / image.width() as f32;
    let sy = h / image.height() as f32;
    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.shader = Pattern::new(
        image.as_ref(),
        SpreadMode::Pad,
        FilterQuality::Bilinear,
        1.0,
        Transform::from_row(sx, 0.0, 0.0, sy, x, y),
    );
    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
}

/// Draws `image` inside a circle of diameter `size`. Non-square sources
/// are center-cropped to their shorter side first so faces stay round
/// instead of squashed.
pub fn draw_image_circle(pixmap: &mut Pixmap, image: &Pixmap, x: f32, y: f32, size: f32) {
    if image.width() == 0 || image.height() == 0 || size <= 0.0 {
        return;
    }
    let side = image.width().min(image.height()) as f32;
    let scale = size / side;
    let dx = x - (image.width() as f32 - side) / 2.0 * scale;
    let dy = y - (image.height() as f32 - side) / 2.0 * scale;

    let mut pb = PathBuilder::new();
    pb.push_circle(x + size / 2.0, y + size / 2.0, size / 2.0);
    let Some(path) = pb.finish() else {
        return;
    };
    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.shader = Pattern::new(
        image.as_ref(),
        SpreadMode::Pad,
        FilterQuality::Bilinear,
        1.0,
        Transform::from_row(scale, 0.0, 0.0, scale, dx, dy),
    );
    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
}

/// Radial backdrop wash: `center` at the middle fading to `edge`, with
/// the gradient radius at half the canvas width.
pub fn fill_radial_background(pixmap: &mut Pixmap, center: Rgb, edge: Rgb) {
    let w = pixmap.width() as f32;
    let h = pixmap.height() as f32;
    let middle = Point::from_xy(w / 2.0, h / 2.0);
    let stops = vec![
        GradientStop::new(0.0, center.to_skia()),
        GradientStop::new(1.0, edge.to_skia()),
    ];
    let shader = RadialGradient::new(
        middle,
        middle,
        (w / 2.0).max(1.0),
        stops,
        SpreadMode::Pad,
        Transform::identity(),
    );
    match shader {
        Some(shader) => {
            let mut paint = Paint::default();
            paint.anti_alias = false;
            paint.shader = shader;
            if let Some(rect) = Rect::from_xywh(0.0, 0.0, w, h) {
                pixmap.fill_rect(rect, &paint, Transform::identity(), None);
            }
        }
        None => pixmap.fill(center.to_skia()),
    }
}

/// Tiles `tile` across the whole canvas at the given opacity.
pub fn draw_pattern_tiled(pixmap: &mut Pixmap, tile: &Pixmap, opacity: f32) {
    if tile.width() == 0 || tile.height() == 0 {
        return;
    }
    let w = pixmap.width() as f32;
    let h = pixmap.height() as f32;
    let mut paint = Paint::default();
    paint.anti_alias = false;
    paint.shader = Pattern::new(
        tile.as_ref(),
        SpreadMode::Repeat,
        FilterQuality::Bilinear,
        opacity.clamp(0.0, 1.0),
        Transform::identity(),
    );
    if let Some(rect) = Rect::from_xywh(0.0, 0.0, w, h) {
        pixmap.fill_rect(rect, &paint, Transform::identity(), None);
    }
}

pub fn stamp(pixmap: &mut Pixmap, source: &Pixmap, x: i32, y: i32) {
    pixmap.draw_pixmap(
        x,
        y,
        source.as_ref(),
        &PixmapPaint::default(),
        Transform::identity(),
        None,
    );
}

pub fn stamp_transformed(pixmap: &mut Pixmap, source: &Pixmap, transform: Transform, opacity: f32) {
    let mut paint = PixmapPaint::default();
    paint.quality = FilterQuality::Bilinear;
    paint.opacity = opacity.clamp(0.0, 1.0);
    pixmap.draw_pixmap(0, 0, source.as_ref(), &paint, transform, None);
}

/// Blurred silhouette of `source` blended under where the card will
/// land. `blur` matches the canvas shadowBlur convention, roughly two
/// standard deviations.
#[allow(clippy::too_many_arguments)]
pub fn draw_drop_shadow(
    pixmap: &mut Pixmap,
    source: &Pixmap,
    x: i32,
    y: i32,
    offset_x: i32,
    offset_y: i32,
    blur: f32,
    color: Color,
) {
    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    if width == 0 || height == 0 {
        return;
    }

    let mut plane = vec![0u8; width * height];
    for sy in 0..source.height() as i32 {
        let ty = y + offset_y + sy;
        if ty < 0 || ty >= height as i32 {
            continue;
        }
        for sx in 0..source.width() as i32 {
            let tx = x + offset_x + sx;
            if tx < 0 || tx >= width as i32 {
                continue;
            }
            let index = (sy as u32 * source.width() + sx as u32) as usize;
            plane[ty as usize * width + tx as usize] = source.pixels()[index].alpha();
        }
    }

    for radius in blur_box_radii(blur / 2.0) {
        box_blur_plane(&mut plane, width, height, radius);
    }

    let alpha = color.alpha();
    let red = color.red();
    let green = color.green();
    let blue = color.blue();
    for py in 0..height {
        for px in 0..width {
            let coverage = plane[py * width + px];
            if coverage == 0 {
                continue;
            }
            let a = f32::from(coverage) / 255.0 * alpha;
            blend_at(pixmap, px as u32, py as u32, red, green, blue, a);
        }
    }
}

/// Blends a grayscale coverage bitmap (one byte per pixel) as `color`
/// at the given opacity. This is the glyph compositing primitive.
#[allow(clippy::too_many_arguments)]
pub fn blend_coverage(
    pixmap: &mut Pixmap,
    left: i32,
    top: i32,
    width: usize,
    height: usize,
    coverage: &[u8],
    color: Rgb,
    opacity: f32,
) {
    let red = f32::from(color.r) / 255.0;
    let green = f32::from(color.g) / 255.0;
    let blue = f32::from(color.b) / 255.0;
    for gy in 0..height {
        let py = top + gy as i32;
        if py < 0 || py >= pixmap.height() as i32 {
            continue;
        }
        for gx in 0..width {
            let px = left + gx as i32;
            if px < 0 || px >= pixmap.width() as i32 {
                continue;
            }
            let cov = coverage[gy * width + gx];
            if cov == 0 {
                continue;
            }
            let alpha = f32::from(cov) / 255.0 * opacity;
            blend_at(pixmap, px as u32, py as u32, red, green, blue, alpha);
        }
    }
}

fn blend_at(pixmap: &mut Pixmap, x: u32, y: u32, r: f32, g: f32, b: f32, alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return;
    }
    let src_r = r.clamp(0.0, 1.0) * alpha * 255.0;
    let src_g = g.clamp(0.0, 1.0) * alpha * 255.0;
    let src_b = b.clamp(0.0, 1.0) * alpha * 255.0;
    let src_a = alpha * 255.0;

    let index = (y * pixmap.width() + x) as usize;
    if let Some(pixel) = pixmap.pixels_mut().get_mut(index) {
        let inv = 1.0 - alpha;
        let out_r = (src_r + f32::from(pixel.red()) * inv).clamp(0.0, 255.0).round() as u8;
        let out_g = (src_g + f32::from(pixel.green()) * inv)
            .clamp(0.0, 255.0)
            .round() as u8;
        let out_b = (src_b + f32::from(pixel.blue()) * inv)
            .clamp(0.0, 255.0)
            .round() as u8;
        let out_a = (src_a + f32::from(pixel.alpha()) * inv)
            .clamp(0.0, 255.0)
            .round() as u8;
        *pixel = PremultipliedColorU8::from_rgba(out_r, out_g, out_b, out_a)
            .unwrap_or(PremultipliedColorU8::TRANSPARENT);
    }
}

/// Box radii for three passes approximating a Gaussian of the given
/// sigma.
fn blur_box_radii(sigma: f32) -> [usize; 3] {
    if sigma <= 0.0 {
        return [0; 3];
    }
    let passes = 3.0f32;
    let w_ideal = (12.0 * sigma * sigma / passes + 1.0).sqrt();
    let mut lower = w_ideal.floor() as i32;
    if lower % 2 == 0 {
        lower -= 1;
    }
    let lower = lower.max(1);
    let upper = lower + 2;
    let m_ideal = (12.0 * sigma * sigma
        - passes * (lower * lower) as f32
        - 4.0 * passes * lower as f32
        - 3.0 * passes)
        / (-4.0 * lower as f32 - 4.0);
    let m = m_ideal.round() as i32;

    let mut radii = [0usize; 3];
    for (index, slot) in radii.iter_mut().enumerate() {
        let w = if (index as i32) < m { lower } else { upper };
        *slot = ((w - 1) / 2).max(0) as usize;
    }
    radii
}

fn box_blur_plane(plane: &mut [u8], width: usize, height: usize, radius: usize) {
    if radius == 0 || width == 0 || height == 0 {
        return;
    }
    let window = (2 * radius + 1) as u32;
    let mut scratch = vec![0u8; plane.len()];

    for y in 0..height {
        let row = &plane[y * width..(y + 1) * width];
        let out = &mut scratch[y * width..(y + 1) * width];
        let mut sum: u32 = 0;
        for x in 0..=radius.min(width - 1) {
            sum += u32::from(row[x]);
        }
        for x in 0..width {
            out[x] = (sum / window) as u8;
            if x + radius + 1 < width {
                sum += u32::from(row[x + radius + 1]);
            }
            if x >= radius {
                sum -= u32::from(row[x - radius]);
            }
        }
    }

    for x in 0..width {
        let mut sum: u32 = 0;
        for y in 0..=radius.min(height - 1) {
            sum += u32::from(scratch[y * width + x]);
        }
        for y in 0..height {
            plane[y * width + x] = (sum / window) as u8;
            if y + radius + 1 < height {
                sum += u32::from(scratch[(y + radius + 1) * width + x]);
            }
            if y >= radius {
                sum -= u32::from(scratch[(y - radius) * width + x]);
            }
        }
    }
}

pub fn decode_image(bytes: &[u8]) -> Result<Pixmap> {
    let decoded = image::load_from_memory(bytes).context("failed to decode image")?;
    rgba_image_to_pixmap(&decoded.to_rgba8())
}

pub fn rgba_image_to_pixmap(image: &RgbaImage) -> Result<Pixmap> {
    let mut pixmap = new_pixmap(image.width(), image.height())?;
    for (pixel, out) in image.pixels().zip(pixmap.pixels_mut()) {
        let [r, g, b, a] = pixel.0;
        *out = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pixmap)
}

pub fn pixmap_to_rgba_image(pixmap: &Pixmap) -> RgbaImage {
    let mut image = RgbaImage::new(pixmap.width(), pixmap.height());
    for (out, pixel) in image.pixels_mut().zip(pixmap.pixels()) {
        let c = pixel.demultiply();
        out.0 = [c.red(), c.green(), c.blue(), c.alpha()];
    }
    image
}

pub fn resize_pixmap(pixmap: &Pixmap, width: u32, height: u32) -> Result<Pixmap> {
    if width == 0 || height == 0 {
        bail!("cannot resize to {width}x{height}");
    }
    if width == pixmap.width() && height == pixmap.height() {
        return Ok(pixmap.clone());
    }
    let resized = image::imageops::resize(
        &pixmap_to_rgba_image(pixmap),
        width,
        height,
        FilterType::Lanczos3,
    );
    rgba_image_to_pixmap(&resized)
}

pub fn encode_png(pixmap: &Pixmap) -> Result<Vec<u8>> {
    pixmap.encode_png().context("failed to encode png")
}

pub fn encode_webp_lossless(pixmap: &Pixmap) -> Result<Vec<u8>> {
    let image = pixmap_to_rgba_image(pixmap);
    let mut out = Vec::new();
    WebPEncoder::new_lossless(&mut out)
        .encode(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .context("failed to encode webp")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alpha_at(pixmap: &Pixmap, x: u32, y: u32) -> u8 {
        pixmap.pixels()[(y * pixmap.width() + x) as usize].alpha()
    }

    #[test]
    fn punch_rect_clears_only_the_window() {
        let mut pixmap = new_pixmap(20, 20).unwrap();
        pixmap.fill(Color::from_rgba8(10, 20, 30, 255));
        punch_rect(&mut pixmap, 5.0, 5.0, 10.0, 10.0);
        assert_eq!(alpha_at(&pixmap, 10, 10), 0);
        assert_eq!(alpha_at(&pixmap, 1, 1), 255);
        assert_eq!(alpha_at(&pixmap, 18, 18), 255);
    }

    #[test]
    fn rounded_rect_radius_clamps_to_half_extent() {
        let mut pixmap = new_pixmap(40, 40).unwrap();
        // Radius larger than half the box collapses to a circle.
        fill_rounded_rect(
            &mut pixmap,
            0.0,
            0.0,
            40.0,
            40.0,
            100.0,
            Rgb::new(255, 0, 0),
            Rgb::new(255, 0, 0),
        );
        assert_eq!(alpha_at(&pixmap, 1, 1), 0);
        assert_eq!(alpha_at(&pixmap, 20, 20), 255);
    }

    #[test]
    fn gradient_fill_spans_both_stops() {
        let mut pixmap = new_pixmap(32, 32).unwrap();
        fill_rounded_rect(
            &mut pixmap,
            0.0,
            0.0,
            32.0,
            32.0,
            0.0,
            Rgb::new(255, 0, 0),
            Rgb::new(0, 0, 255),
        );
        let near_start = pixmap.pixels()[2 * 32 + 2].demultiply();
        let near_end = pixmap.pixels()[29 * 32 + 29].demultiply();
        assert!(near_start.red() > near_start.blue());
        assert!(near_end.blue() > near_end.red());
    }

    #[test]
    fn circle_draw_leaves_corners_transparent() {
        let mut source = new_pixmap(10, 10).unwrap();
        source.fill(Color::from_rgba8(0, 255, 0, 255));
        let mut dest = new_pixmap(50, 50).unwrap();
        draw_image_circle(&mut dest, &source, 0.0, 0.0, 50.0);
        assert_eq!(alpha_at(&dest, 0, 0), 0);
        assert_eq!(alpha_at(&dest, 25, 25), 255);
    }

    #[test]
    fn drop_shadow_spills_past_the_source_bounds() {
        let mut card = new_pixmap(10, 10).unwrap();
        card.fill(Color::from_rgba8(0, 0, 0, 255));
        let mut dest = new_pixmap(40, 40).unwrap();
        draw_drop_shadow(
            &mut dest,
            &card,
            10,
            10,
            4,
            4,
            8.0,
            Color::from_rgba8(0, 0, 0, 128),
        );
        // Blur pushes coverage outside the stamped 10x10 region.
        assert!(alpha_at(&dest, 26, 18) > 0);
        assert_eq!(alpha_at(&dest, 2, 2), 0);
    }

    #[test]
    fn coverage_blend_writes_premultiplied_color() {
        let mut pixmap = new_pixmap(4, 4).unwrap();
        let coverage = vec![255u8; 4];
        blend_coverage(
            &mut pixmap,
            1,
            1,
            2,
            2,
            &coverage,
            Rgb::new(200, 100, 0),
            1.0,
        );
        let pixel = pixmap.pixels()[4 + 1].demultiply();
        assert_eq!(pixel.red(), 200);
        assert_eq!(pixel.alpha(), 255);
        assert_eq!(alpha_at(&pixmap, 0, 0), 0);
    }

    #[test]
    fn png_roundtrip_preserves_dimensions() {
        let mut pixmap = new_pixmap(12, 7).unwrap();
        pixmap.fill(Color::from_rgba8(1, 2, 3, 255));
        let png = encode_png(&pixmap).unwrap();
        let decoded = decode_image(&png).unwrap();
        assert_eq!(decoded.width(), 12);
        assert_eq!(decoded.height(), 7);
    }

    #[test]
    fn resize_changes_dimensions() {
        let pixmap = new_pixmap(16, 16).unwrap();
        let resized = resize_pixmap(&pixmap, 8, 4).unwrap();
        assert_eq!((resized.width(), resized.height()), (8, 4));
        assert!(resize_pixmap(&pixmap, 0, 4).is_err());
    }
}
