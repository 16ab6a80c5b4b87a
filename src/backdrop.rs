//! Output finishing. A stacked card either ships raw or gets one of
//! three treatments: `quote` scales onto a 512 frame with a bottom pad,
//! `image` sits on a padded radial-gradient poster with a drop shadow
//! and a corner watermark, `stories` centers the card on a fixed
//! 720x1280 canvas with the watermark running up the left edge.

use anyhow::Result;
use tiny_skia::{Pixmap, Transform};

use crate::colors::Rgb;
use crate::fonts::{FontStyle, GlyphRasterizer};
use crate::painter;
use crate::shaper::{self, EmojiAtlas, ShapeRequest};
use crate::styled;

const FIT_EDGE: u32 = 512;
const QUOTE_BOTTOM_PAD: u32 = 75;
const STORIES_WIDTH: u32 = 720;
const STORIES_HEIGHT: u32 = 1280;
const STORIES_PADDING: f32 = 110.0;

/// Scales so the long axis lands on `FIT_EDGE`, pads the bottom, and
/// re-fits. Ties on the second pass go to the vertical axis, so a
/// padded square ends up 512 tall.
pub fn finish_quote(card: &Pixmap) -> Result<Pixmap> {
    let fitted = fit_long_axis(card, false)?;
    let mut padded = painter::new_pixmap(fitted.width(), fitted.height() + QUOTE_BOTTOM_PAD)?;
    painter::stamp(&mut padded, &fitted, 0, 0);
    fit_long_axis(&padded, true)
}

fn fit_long_axis(source: &Pixmap, ties_go_tall: bool) -> Result<Pixmap> {
    let (w, h) = (source.width().max(1), source.height().max(1));
    let tall = if ties_go_tall { h >= w } else { h > w };
    let (new_w, new_h) = if tall {
        let scaled = (w as f32 * FIT_EDGE as f32 / h as f32).round().max(1.0) as u32;
        (scaled, FIT_EDGE)
    } else {
        let scaled = (h as f32 * FIT_EDGE as f32 / w as f32).round().max(1.0) as u32;
        (FIT_EDGE, scaled)
    };
    painter::resize_pixmap(source, new_w, new_h)
}

/// Poster treatment: padding around the card, lightened radial
/// gradient, optional pattern tile, soft shadow, watermark bottom-right.
pub fn finish_image(
    card: &Pixmap,
    raster: &mut dyn GlyphRasterizer,
    scale: f32,
    background: (Rgb, Rgb),
    pattern: Option<&Pixmap>,
    watermark: &str,
) -> Result<Pixmap> {
    let width_padding = (95.0 * scale).round() as u32;
    let height_padding = (75.0 * scale).round() as u32;
    let mut canvas =
        painter::new_pixmap(card.width() + width_padding, card.height() + height_padding)?;

    let center = background.1.luminance_shift(0.15);
    let edge = background.0.luminance_shift(0.15);
    painter::fill_radial_background(&mut canvas, center, edge);
    if let Some(tile) = pattern {
        painter::draw_pattern_tiled(&mut canvas, tile, 0.3);
    }

    let x = (width_padding / 2) as i32;
    let y = (height_padding / 2) as i32;
    painter::draw_drop_shadow(
        &mut canvas,
        card,
        x,
        y,
        8,
        8,
        13.0,
        Rgb::new(0, 0, 0).to_skia_with_alpha(0.5),
    );
    painter::stamp(&mut canvas, card, x, y);

    let font_size = 8.0 * scale;
    let (block, text_width) = watermark_block(raster, watermark, font_size)?;
    let wm_x = canvas.width() as f32 - 25.0 - text_width;
    let wm_y = canvas.height() as f32 - 25.0 - font_size;
    painter::stamp_transformed(
        &mut canvas,
        &block,
        Transform::from_translate(wm_x, wm_y),
        0.3,
    );
    Ok(canvas)
}

/// Story frame: fixed portrait canvas, card contained within the
/// padding and centered, watermark rotated onto the left edge.
pub fn finish_stories(
    card: &Pixmap,
    raster: &mut dyn GlyphRasterizer,
    scale: f32,
    background: (Rgb, Rgb),
    pattern: Option<&Pixmap>,
    watermark: &str,
) -> Result<Pixmap> {
    let mut canvas = painter::new_pixmap(STORIES_WIDTH, STORIES_HEIGHT)?;

    let center = background.1.luminance_shift(0.25);
    let edge = background.0.luminance_shift(0.15);
    painter::fill_radial_background(&mut canvas, center, edge);
    if let Some(tile) = pattern {
        painter::draw_pattern_tiled(&mut canvas, tile, 0.3);
    }

    let max_w = STORIES_WIDTH as f32 - STORIES_PADDING * 2.0;
    let max_h = STORIES_HEIGHT as f32 - STORIES_PADDING * 2.0;
    let ratio = (max_w / card.width().max(1) as f32).min(max_h / card.height().max(1) as f32);
    let fitted = painter::resize_pixmap(
        card,
        ((card.width() as f32 * ratio).round().max(1.0)) as u32,
        ((card.height() as f32 * ratio).round().max(1.0)) as u32,
    )?;
    let x = ((STORIES_WIDTH - fitted.width()) / 2) as i32;
    let y = ((STORIES_HEIGHT - fitted.height()) / 2) as i32;
    painter::draw_drop_shadow(
        &mut canvas,
        &fitted,
        x,
        y,
        8,
        8,
        13.0,
        Rgb::new(0, 0, 0).to_skia_with_alpha(0.5),
    );
    painter::stamp(&mut canvas, &fitted, x, y);

    let (block, _) = watermark_block(raster, watermark, 16.0 * scale)?;
    painter::stamp_transformed(
        &mut canvas,
        &block,
        Transform::from_rotate(-90.0).post_translate(70.0, STORIES_HEIGHT as f32 / 2.0),
        0.4,
    );
    Ok(canvas)
}

/// Black watermark text shaped on a transparent block, with its
/// measured width so callers can right-align.
fn watermark_block(
    raster: &mut dyn GlyphRasterizer,
    text: &str,
    font_size: f32,
) -> Result<(Pixmap, f32)> {
    let width = raster.measure(text, FontStyle::Regular, font_size);
    let atlas = EmojiAtlas::default();
    // The wrap box leaves the shaper's trim margins clear of the text,
    // which must never wrap or truncate; the block crops to ink anyway.
    let block = shaper::shape_text(
        raster,
        &atlas,
        styled::segment(text, &[]),
        &ShapeRequest {
            font_size,
            font_color: Rgb::new(0, 0, 0),
            text_x: 0.0,
            text_y: font_size,
            max_width: width + font_size * 4.0,
            max_height: font_size * 2.0,
        },
    )?;
    Ok((block, width))
}
