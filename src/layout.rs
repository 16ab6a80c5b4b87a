//! Quote-card composition: panel auto-sizing around the shaped blocks,
//! avatar and reply placement, the media slot, and the back-to-front
//! paint. Animated media is reserved as a region for the compositor
//! instead of being painted here.

use anyhow::Result;
use tiny_skia::Pixmap;

use crate::colors::Rgb;
use crate::media::MediaDescriptor;
use crate::painter;

/// Rectangle on the card left unpainted for the animated compositor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReservedRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// The rendered static composite. `reserved` is present exactly when
/// the input media was an animated descriptor.
pub struct QuoteCard {
    pub canvas: Pixmap,
    pub reserved: Option<ReservedRegion>,
}

/// Pre-rendered blocks and media for one message. All pixmaps arrive
/// already shaped and cropped; layout only positions them.
#[derive(Default)]
pub struct CardContent<'a> {
    pub avatar: Option<&'a Pixmap>,
    pub name: Option<&'a Pixmap>,
    pub text: Option<&'a Pixmap>,
    pub reply_name: Option<&'a Pixmap>,
    pub reply_text: Option<&'a Pixmap>,
    pub reply_accent: Rgb,
    pub media: Option<&'a MediaDescriptor>,
    pub media_kind: Option<&'a str>,
    pub max_media_size: f32,
    /// Animated handling requested even if resolution fell back to
    /// pixels; sizing then still follows the clip rules.
    pub animated_hint: bool,
}

fn dims(block: Option<&Pixmap>) -> Option<(f32, f32)> {
    block.map(|pixmap| (pixmap.width() as f32, pixmap.height() as f32))
}

/// Lays out and paints one card. The accumulation below mirrors the
/// panel's growth rules: width tracks the widest block plus padding,
/// height stacks name, reply preview, media and text with fixed
/// indents, and both are floored so short messages still read as a
/// speech panel.
pub fn render_card(
    scale: f32,
    background: (Rgb, Rgb),
    content: &CardContent,
) -> Result<QuoteCard> {
    let avatar_pos_y = 5.0 * scale;
    let avatar_size = 50.0 * scale;
    let block_pos_x = avatar_size + 10.0 * scale;
    let indent = 14.0 * scale;

    let min_width = 112.0 * scale;
    let min_height = 61.0 * scale;

    let name = dims(content.name);
    let text = dims(content.text);
    let reply_name = dims(content.reply_name);
    let reply_text = dims(content.reply_text);

    let mut width = min_width;
    if let Some((name_w, _)) = name {
        width = width.max(name_w + indent * 2.0);
    }
    if let Some((text_w, _)) = text {
        if width < text_w + indent {
            width = text_w + indent;
        }
    }
    if let Some((name_w, _)) = name {
        if width < name_w + indent {
            width = name_w + indent;
        }
    }
    if let Some((reply_name_w, _)) = reply_name {
        if width < reply_name_w {
            width = reply_name_w + indent * 2.0;
        }
        if let Some((reply_text_w, _)) = reply_text {
            if width < reply_text_w {
                width = reply_text_w + indent * 2.0;
            }
        }
    }

    let mut height = min_height.max(indent);
    if let Some((_, text_h)) = text {
        height += text_h;
    } else {
        height += indent;
    }
    if let Some((_, name_h)) = name {
        height = name_h.max(min_height);
        if let Some((_, text_h)) = text {
            height = text_h + name_h;
        } else {
            height += indent;
        }
    }

    width += block_pos_x + indent;

    let mut name_pos_x = block_pos_x + indent;
    let mut name_pos_y = indent;
    if name.is_none() {
        name_pos_x = 0.0;
        name_pos_y = -indent;
    }

    let text_pos_x = block_pos_x + indent;
    let mut text_pos_y = indent;
    if let Some((_, name_h)) = name {
        text_pos_y = name_h + indent * 0.25;
        height += indent * 0.25;
    }

    let mut reply_pos_x = 0.0;
    let mut reply_name_pos_y = 0.0;
    let mut reply_text_pos_y = 0.0;
    if let (Some((_, reply_name_h)), Some((_, reply_text_h))) = (reply_name, reply_text) {
        reply_pos_x = text_pos_x + indent;
        let preview_half = reply_text_h * 0.5;
        reply_name_pos_y = name_pos_y + reply_name_h;
        reply_text_pos_y = reply_name_pos_y + preview_half;
        text_pos_y += reply_name_h + preview_half + indent / 4.0;
        height += reply_name_h + preview_half + indent / 4.0;
    }

    let animated = content.animated_hint
        || matches!(content.media, Some(MediaDescriptor::Animated(_)));

    let mut media_pos = (0.0f32, 0.0f32);
    let mut media_box: Option<(f32, f32)> = None;
    if let Some(media) = content.media {
        let (source_w, source_h) = match media {
            MediaDescriptor::Animated(clip) => (clip.width as f32, clip.height as f32),
            MediaDescriptor::Static(still) => {
                (still.image.width() as f32, still.image.height() as f32)
            }
        };
        let (mut media_w, mut media_h);
        if animated {
            let base = content.max_media_size.max(169.0 * scale);
            media_w = if source_w > 0.0 { source_w } else { base };
            media_h = if source_h > 0.0 { source_h } else { base };
            if media_w > base || media_h > base {
                let ratio = (base / media_w).min(base / media_h);
                media_w *= ratio;
                media_h *= ratio;
            }
            media_w = media_w.max(112.0 * scale);
            media_h = media_h.max(150.0 * scale);
        } else {
            media_w = source_w * (content.max_media_size / source_h);
            media_h = content.max_media_size;
            if media_w >= content.max_media_size {
                media_w = content.max_media_size;
                media_h = source_h * (content.max_media_size / source_w);
            }
        }

        let media_required = media_w + block_pos_x + indent * 1.69;
        if width < media_required {
            width = media_required;
        }
        height += media_h + indent * 0.42;

        if let Some((_, name_h)) = name {
            media_pos = (name_pos_x, name_h + 4.5 * scale);
        } else {
            media_pos = (block_pos_x + indent, indent * 0.84);
        }
        if reply_name.is_some() {
            media_pos.1 += reply_name_pos_y + indent / 2.0;
        }
        text_pos_y = media_pos.1 + media_h + 4.5 * scale;
        media_box = Some((media_w, media_h));
    }

    let mut rect_width = (width - block_pos_x).max(142.0 * scale);
    let mut rect_height = height.max(76.0 * scale);
    if animated {
        if let Some((media_w, media_h)) = media_box {
            rect_width = rect_width.max(media_w + indent * 1.12);
            let name_h = name.map_or(0.0, |(_, h)| h);
            rect_height = rect_height.max(media_h + name_h + indent * 1.27);
        }
    }

    let is_sticker = content.media_kind == Some("sticker");
    let media_animated = matches!(content.media, Some(MediaDescriptor::Animated(_)));
    let use_background =
        !(is_sticker && name.is_none() && reply_name.is_none() && text.is_none());

    // Stickers with chrome on top trade the gradient for a dark
    // translucent panel sized to just the overlayed blocks.
    let mut overlay = None;
    if is_sticker && (name.is_some() || reply_name.is_some() || media_animated) {
        if let (Some((_, reply_name_h)), Some((_, reply_text_h))) = (reply_name, reply_text) {
            rect_height = rect_height.max(reply_name_h + reply_text_h * 0.5 + indent * 0.84);
        } else if let Some((_, name_h)) = name {
            rect_height = rect_height.max(name_h + indent * 0.84);
        }
        overlay = Some(if media_animated {
            Rgb::new(30, 30, 30).to_skia_with_alpha(0.9)
        } else {
            Rgb::new(50, 50, 50).to_skia_with_alpha(0.8)
        });
    }

    let final_width = width.max(rect_width + block_pos_x);
    let final_height = height.max(rect_height);

    let mut canvas = painter::new_pixmap(
        final_width.ceil().max(1.0) as u32,
        final_height.ceil().max(1.0) as u32,
    )?;

    let rect_radius = 25.0 * scale;

    if let Some(avatar) = content.avatar {
        painter::draw_image_circle(&mut canvas, avatar, 0.0, avatar_pos_y, avatar_size);
    }
    if use_background {
        match overlay {
            Some(color) => painter::fill_rounded_rect_color(
                &mut canvas,
                block_pos_x,
                0.0,
                rect_width,
                rect_height,
                rect_radius,
                color,
            ),
            None => painter::fill_rounded_rect(
                &mut canvas,
                block_pos_x,
                0.0,
                rect_width,
                rect_height,
                rect_radius,
                background.0,
                background.1,
            ),
        }
    }
    if let Some(block) = content.name {
        painter::stamp(
            &mut canvas,
            block,
            name_pos_x.round() as i32,
            name_pos_y.round() as i32,
        );
    }
    if let Some(block) = content.text {
        painter::stamp(
            &mut canvas,
            block,
            text_pos_x.round() as i32,
            text_pos_y.round() as i32,
        );
    }

    let mut reserved = None;
    if let (Some(media), Some((media_w, media_h))) = (content.media, media_box) {
        match media {
            MediaDescriptor::Animated(_) => {
                reserved = Some(ReservedRegion {
                    x: media_pos.0,
                    y: media_pos.1,
                    width: media_w,
                    height: media_h,
                });
            }
            MediaDescriptor::Static(still) => {
                painter::draw_image_rounded(
                    &mut canvas,
                    &still.image,
                    media_pos.0,
                    media_pos.1,
                    media_w,
                    media_h,
                    5.0 * scale,
                );
            }
        }
    }

    if let (Some(reply_name_block), Some(reply_text_block)) =
        (content.reply_name, content.reply_text)
    {
        let reply_name_h = reply_name_block.height() as f32;
        let reply_text_h = reply_text_block.height() as f32;
        painter::fill_rect(
            &mut canvas,
            text_pos_x - 3.0,
            reply_name_pos_y,
            3.0 * scale,
            reply_name_h + reply_text_h * 0.4,
            content.reply_accent.to_skia(),
        );
        painter::stamp(
            &mut canvas,
            reply_name_block,
            reply_pos_x.round() as i32,
            reply_name_pos_y.round() as i32,
        );
        painter::stamp(
            &mut canvas,
            reply_text_block,
            reply_pos_x.round() as i32,
            reply_text_pos_y.round() as i32,
        );
    }

    Ok(QuoteCard { canvas, reserved })
}
