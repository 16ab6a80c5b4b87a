//! Line breaking and text rendering. Takes the styled words from
//! [`crate::styled`], wraps them against a width/height box and paints
//! them onto a canvas that is then cropped to the ink extents. All
//! remote emoji fetching happens before this stage; the shaper only
//! consumes a prepared [`EmojiAtlas`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use tiny_skia::Pixmap;

use crate::colors::Rgb;
use crate::fonts::GlyphRasterizer;
use crate::painter;
use crate::styled::{self, Direction, StyledWord};

/// Code spans render in this fixed blue-grey regardless of theme.
pub const MONOSPACE_COLOR: Rgb = Rgb::new(0x58, 0x87, 0xa7);
/// Mentions, links, hashtags and commands share one accent blue.
pub const MENTION_COLOR: Rgb = Rgb::new(0x6a, 0xb7, 0xec);
/// Spoiler runs draw in the base text color at this opacity.
pub const SPOILER_ALPHA: f32 = 0.15;

/// Hard ceiling on the wrap box in either dimension.
const MAX_EXTENT: f32 = 10_000.0;

/// Emoji bitmaps resolved ahead of shaping: CDN sprites keyed by
/// codepoint key, custom emoji thumbnails keyed by their sticker id.
#[derive(Debug, Default)]
pub struct EmojiAtlas {
    pub sprites: HashMap<String, Arc<Pixmap>>,
    pub custom: HashMap<String, Arc<Pixmap>>,
}

impl EmojiAtlas {
    fn lookup(&self, word: &StyledWord) -> Option<Arc<Pixmap>> {
        if word.emoji.is_none() {
            return None;
        }
        if let Some(id) = &word.custom_emoji_id {
            if let Some(image) = self.custom.get(id) {
                return Some(Arc::clone(image));
            }
        }
        word.emoji
            .as_ref()
            .and_then(|emoji| self.sprites.get(&emoji.key))
            .cloned()
    }
}

/// Unique CDN sprite keys used by `words`, in first-seen order.
pub fn emoji_keys(words: &[StyledWord]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for word in words {
        if let Some(emoji) = &word.emoji {
            if seen.insert(emoji.key.clone()) {
                keys.push(emoji.key.clone());
            }
        }
    }
    keys
}

/// Unique custom emoji ids referenced by `words`, in first-seen order.
pub fn custom_emoji_ids(words: &[StyledWord]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for word in words {
        if let Some(id) = &word.custom_emoji_id {
            if seen.insert(id.clone()) {
                ids.push(id.clone());
            }
        }
    }
    ids
}

#[derive(Debug, Clone, Copy)]
pub struct ShapeRequest {
    pub font_size: f32,
    pub font_color: Rgb,
    pub text_x: f32,
    pub text_y: f32,
    pub max_width: f32,
    pub max_height: f32,
}

/// Fill color and opacity for one word. Spoilers win over the mention
/// and monospace accents and always tint from the base text color.
fn word_paint(word: &StyledWord, font_color: Rgb) -> (Rgb, f32) {
    if word.styles.spoiler {
        return (font_color, SPOILER_ALPHA);
    }
    let mut color = font_color;
    if word.styles.monospace {
        color = MONOSPACE_COLOR;
    }
    if word.styles.mention {
        color = MENTION_COLOR;
    }
    (color, 1.0)
}

/// Wraps and paints `words`, returning a canvas cropped to the text
/// block. The returned pixmap's dimensions are the block's layout size.
///
/// The wrap loop keeps a running pen (`line_x`, `line_y` at the
/// baseline) and the widest line seen so far. A word breaks the line
/// when it carries an explicit break or would cross `max_width` minus a
/// two-glyph margin; once the next line would cross `max_height` the
/// current word is trimmed to fit and drawing stops after an ellipsis.
/// Lines read right-to-left as soon as any of the next ten words
/// contains an RTL character, which mirrors the pen across the wrap box.
pub fn shape_text(
    raster: &mut dyn GlyphRasterizer,
    atlas: &EmojiAtlas,
    mut words: Vec<StyledWord>,
    request: &ShapeRequest,
) -> Result<Pixmap> {
    let font_size = request.font_size;
    let max_width = request.max_width.min(MAX_EXTENT);
    let max_height = request.max_height.min(MAX_EXTENT);
    let line_height = 4.0 * (font_size * 0.3);

    let mut canvas = painter::new_pixmap(
        (max_width + font_size).ceil().max(1.0) as u32,
        (max_height + font_size).ceil().max(1.0) as u32,
    )?;

    let mut line_x = request.text_x;
    let mut line_y = request.text_y;
    let mut text_width: f32 = 0.0;
    let mut break_write = false;
    let mut direction = styled::line_direction(&words, 0);

    for index in 0..words.len() {
        let styles = words[index].styles;
        let font_style = styles.font_style();
        let emoji_image = atlas.lookup(&words[index]);
        let is_emoji = words[index].emoji.is_some();
        let mut word_text = std::mem::take(&mut words[index].text);
        let (color, opacity) = word_paint(&words[index], request.font_color);

        // Single words wider than the box are trimmed up front.
        if raster.measure(&word_text, font_style, font_size) > max_width - font_size * 3.0 {
            while raster.measure(&word_text, font_style, font_size) > max_width - font_size * 3.0 {
                word_text.pop();
                if word_text.is_empty() {
                    break;
                }
            }
            word_text.push('…');
        }

        let word_width = raster.measure(&word_text, font_style, font_size);
        let mut line_width = if is_emoji {
            line_x + font_size
        } else {
            line_x + word_width
        };

        let wraps = styled::contains_break(&word_text)
            || (line_width > max_width - font_size * 2.0 && word_width < max_width);
        if wraps {
            if styled::contains_space(&word_text) && !styled::contains_break(&word_text) {
                word_text.clear();
            }
            let overflows = (styled::contains_space(&word_text)
                || !styled::contains_break(&word_text))
                && line_y + line_height > max_height;
            if overflows {
                while line_width > max_width - font_size * 2.0 {
                    word_text.pop();
                    line_width = line_x + raster.measure(&word_text, font_style, font_size);
                    if word_text.is_empty() {
                        break;
                    }
                }
                word_text.push('…');
                line_width = line_x + raster.measure(&word_text, font_style, font_size);
                break_write = true;
            } else {
                line_width = if is_emoji {
                    request.text_x + font_size + font_size * 0.2
                } else {
                    request.text_x + raster.measure(&word_text, font_style, font_size)
                };
                line_x = request.text_x;
                line_y += line_height;
                if index < words.len() - 1 {
                    let next_direction = styled::line_direction(&words, index + 1);
                    if direction != next_direction {
                        text_width = max_width - font_size * 2.0;
                    }
                    direction = next_direction;
                }
            }
        }

        if is_emoji {
            line_width += font_size * 0.2;
        }
        if line_width > text_width {
            text_width = line_width;
        }
        if text_width > max_width {
            text_width = max_width;
        }

        let word_x = match direction {
            Direction::Rtl => max_width - line_x - word_width - font_size * 2.0,
            Direction::Ltr => line_x,
        };

        if let Some(image) = emoji_image {
            let slot = font_size + font_size * 0.22;
            painter::draw_image_rounded(
                &mut canvas,
                &image,
                word_x,
                line_y - font_size + font_size * 0.15,
                slot,
                slot,
                0.0,
            );
        } else {
            let mut pen = word_x;
            for ch in word_text.chars() {
                let glyph = raster.rasterize(ch, font_style, font_size);
                painter::blend_coverage(
                    &mut canvas,
                    (pen + glyph.left).round() as i32,
                    (line_y + glyph.top).round() as i32,
                    glyph.width,
                    glyph.height,
                    &glyph.coverage,
                    color,
                    opacity,
                );
                pen += glyph.advance;
            }
            let draw_width = raster.measure(&word_text, font_style, font_size);
            if styles.strikethrough {
                painter::fill_rect(
                    &mut canvas,
                    word_x,
                    line_y - font_size / 2.8,
                    draw_width,
                    font_size * 0.1,
                    color.to_skia_with_alpha(opacity),
                );
            }
            if styles.underline {
                painter::fill_rect(
                    &mut canvas,
                    word_x,
                    line_y + 2.0,
                    draw_width,
                    font_size * 0.1,
                    color.to_skia_with_alpha(opacity),
                );
            }
        }

        line_x = line_width;
        if break_write {
            break;
        }
    }

    let out_width = text_width.ceil().max(1.0) as u32;
    let out_height = (line_y + font_size).ceil().max(1.0) as u32;
    let mut cropped = painter::new_pixmap(out_width, out_height)?;
    let dx = match direction {
        Direction::Rtl => (text_width - max_width + font_size * 2.0).round() as i32,
        Direction::Ltr => 0,
    };
    painter::stamp(&mut cropped, &canvas, dx, 0);
    Ok(cropped)
}
