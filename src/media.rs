//! Attached-media resolution. Static images are fetched, optionally
//! cropped and decoded to pixels; animated clips are staged to a temp
//! file and probed, never decoded to frames here. Failures degrade to a
//! placeholder tile or a defaulted descriptor instead of aborting the
//! card.

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use image::ImageFormat;
use log::{debug, warn};
use tiny_skia::Pixmap;

use crate::colors::Rgb;
use crate::painter;
use crate::probe::{self, ProbeInfo};
use crate::provider::Fetcher;

const PLACEHOLDER_TILE: Rgb = Rgb::new(0xCC, 0xCC, 0xCC);
const PLACEHOLDER_GLYPH: Rgb = Rgb::new(0x66, 0x66, 0x66);

const DEFAULT_CLIP_DURATION_MS: u64 = 3000;
const DEFAULT_CLIP_FPS: f32 = 30.0;

/// Attention-map working width for the content-aware crop.
const SCORE_WIDTH: u32 = 160;

/// Resolved media, either pixels ready to draw or a staged clip
/// reference. Never both.
#[derive(Debug)]
pub enum MediaDescriptor {
    Static(StaticMedia),
    Animated(AnimatedMedia),
}

#[derive(Debug)]
pub struct StaticMedia {
    pub image: Pixmap,
}

#[derive(Debug, Clone)]
pub struct AnimatedMedia {
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
    pub fps: f32,
    /// Staged source bytes; `None` when staging failed.
    pub local_path: Option<PathBuf>,
    pub source_url: String,
    pub failed: bool,
}

/// Animated when the path mentions one of the two clip containers,
/// anywhere in the URL and in any case.
pub fn is_animated_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.contains(".webm") || lower.contains(".gif")
}

pub struct MediaResolver {
    fetcher: Fetcher,
    temp_dir: PathBuf,
}

impl MediaResolver {
    pub fn new(fetcher: Fetcher, temp_dir: PathBuf) -> Self {
        Self { fetcher, temp_dir }
    }

    /// Resolves `url` into a descriptor. `max_size` bounds the static
    /// crop window and sizes every fallback; `animated` forces the clip
    /// path regardless of the URL shape. Errors only on canvas
    /// allocation, not on fetch or decode problems.
    pub async fn resolve(
        &self,
        url: &str,
        max_size: f32,
        crop: bool,
        animated: bool,
    ) -> Result<MediaDescriptor> {
        if animated || is_animated_url(url) {
            Ok(MediaDescriptor::Animated(
                self.resolve_animated(url, max_size).await,
            ))
        } else {
            Ok(MediaDescriptor::Static(
                self.resolve_static(url, max_size, crop).await?,
            ))
        }
    }

    async fn resolve_static(&self, url: &str, max_size: f32, crop: bool) -> Result<StaticMedia> {
        match self.fetch_static(url, max_size, crop).await {
            Ok(image) => Ok(StaticMedia { image }),
            Err(error) => {
                warn!("media load failed for {url}: {error:#}");
                Ok(StaticMedia {
                    image: placeholder_tile(max_size)?,
                })
            }
        }
    }

    async fn fetch_static(&self, url: &str, max_size: f32, crop: bool) -> Result<Pixmap> {
        let bytes = self.fetcher.fetch_bytes(url).await?;
        let is_webp = image::guess_format(&bytes)
            .map(|format| format == ImageFormat::WebP)
            .unwrap_or(false);
        let decoded = painter::decode_image(&bytes)?;

        if !crop && !is_webp {
            return Ok(decoded);
        }
        if is_webp {
            // Sticker-style sources ship with large uniform borders;
            // trim those instead of looking for a salient window.
            return Ok(autocrop(decoded));
        }
        match smart_crop(&decoded, max_size.round().max(1.0) as u32) {
            Some(cropped) => Ok(cropped),
            None => Ok(decoded),
        }
    }

    async fn resolve_animated(&self, url: &str, max_size: f32) -> AnimatedMedia {
        let side = max_size.round().max(1.0) as u32;
        let staged = match self.stage(url).await {
            Ok(path) => path,
            Err(error) => {
                warn!("failed to stage animated media {url}: {error:#}");
                return AnimatedMedia {
                    width: side,
                    height: side,
                    duration_ms: DEFAULT_CLIP_DURATION_MS,
                    fps: DEFAULT_CLIP_FPS,
                    local_path: None,
                    source_url: url.to_string(),
                    failed: true,
                };
            }
        };

        let probed = match probe::probe_file(&staged) {
            Ok(info) => info,
            Err(error) => {
                warn!("probe failed for {}: {error:#}", staged.display());
                ProbeInfo::default()
            }
        };
        debug!(
            "staged animated media at {} ({probed:?})",
            staged.display()
        );
        AnimatedMedia {
            width: probed.width.unwrap_or(side),
            height: probed.height.unwrap_or(side),
            duration_ms: probed.duration_ms.unwrap_or(DEFAULT_CLIP_DURATION_MS),
            fps: probed.fps.unwrap_or(DEFAULT_CLIP_FPS),
            local_path: Some(staged),
            source_url: url.to_string(),
            failed: false,
        }
    }

    async fn stage(&self, url: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.temp_dir).with_context(|| {
            format!("failed to create temp dir {}", self.temp_dir.display())
        })?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let path = self.temp_dir.join(format!("input_{stamp}.webm"));
        let bytes = self.fetcher.fetch_bytes(url).await?;
        fs::write(&path, &bytes)
            .with_context(|| format!("failed to stage media at {}", path.display()))?;
        Ok(path)
    }
}

/// Mid-gray tile with a darker cross, drawn where media failed to load.
pub fn placeholder_tile(size: f32) -> Result<Pixmap> {
    let side = size.round().clamp(1.0, 4096.0) as u32;
    let mut tile = painter::new_pixmap(side, side)?;
    let extent = side as f32;
    painter::fill_rect(&mut tile, 0.0, 0.0, extent, extent, PLACEHOLDER_TILE.to_skia());
    painter::draw_cross(
        &mut tile,
        extent / 2.0,
        extent / 2.0,
        extent * 0.3,
        (extent * 0.05).max(1.0),
        PLACEHOLDER_GLYPH.to_skia(),
    );
    Ok(tile)
}

/// Trims borders that match the top-left corner pixel exactly, the way
/// sticker sheets pad their content. At least one pixel always
/// survives on each axis.
fn autocrop(image: Pixmap) -> Pixmap {
    let (width, height) = (image.width(), image.height());
    if width < 2 || height < 2 {
        return image;
    }
    let Some(corner) = image.pixel(0, 0) else {
        return image;
    };
    let uniform_row = |y: u32| (0..width).all(|x| image.pixel(x, y) == Some(corner));
    let uniform_col = |x: u32| (0..height).all(|y| image.pixel(x, y) == Some(corner));

    let mut top = 0;
    while top < height - 1 && uniform_row(top) {
        top += 1;
    }
    let mut bottom = height;
    while bottom > top + 1 && uniform_row(bottom - 1) {
        bottom -= 1;
    }
    let mut left = 0;
    while left < width - 1 && uniform_col(left) {
        left += 1;
    }
    let mut right = width;
    while right > left + 1 && uniform_col(right - 1) {
        right -= 1;
    }

    if top == 0 && left == 0 && bottom == height && right == width {
        return image;
    }
    let Ok(mut cropped) = painter::new_pixmap(right - left, bottom - top) else {
        return image;
    };
    painter::stamp(&mut cropped, &image, -(left as i32), -(top as i32));
    cropped
}

/// Content-aware horizontal crop: the `target`-wide full-height window
/// with the highest attention score. `None` when the image already
/// fits.
fn smart_crop(image: &Pixmap, target: u32) -> Option<Pixmap> {
    if target == 0 || image.width() <= target || image.height() == 0 {
        return None;
    }
    let scale = (SCORE_WIDTH as f32 / image.width() as f32).min(1.0);
    let small_w = ((image.width() as f32 * scale).round() as u32).max(1);
    let small_h = ((image.height() as f32 * scale).round() as u32).max(1);
    let small = painter::resize_pixmap(image, small_w, small_h).ok()?;

    let columns = attention_columns(&small);
    let window = (((target as f32) * scale).round() as usize).clamp(1, columns.len());
    let best = best_window(&columns, window);

    let source_x = ((best as f32 / scale).round() as u32).min(image.width() - target);
    let mut cropped = painter::new_pixmap(target, image.height()).ok()?;
    painter::stamp(&mut cropped, image, -(source_x as i32), 0);
    Some(cropped)
}

/// Per-column attention totals over a downscaled image: local edge
/// energy, plus saturation and skin-tone boosts in the mid-brightness
/// band.
fn attention_columns(image: &Pixmap) -> Vec<f64> {
    let (width, height) = (image.width() as i32, image.height() as i32);
    let luma_at = |x: i32, y: i32| -> f32 {
        let x = x.clamp(0, width - 1) as u32;
        let y = y.clamp(0, height - 1) as u32;
        match image.pixel(x, y) {
            Some(px) => {
                let c = px.demultiply();
                0.299 * c.red() as f32 + 0.587 * c.green() as f32 + 0.114 * c.blue() as f32
            }
            None => 0.0,
        }
    };

    let mut columns = vec![0f64; width as usize];
    for y in 0..height {
        for x in 0..width {
            let Some(px) = image.pixel(x as u32, y as u32) else {
                continue;
            };
            let c = px.demultiply();
            let (r, g, b) = (c.red() as f32, c.green() as f32, c.blue() as f32);
            let luma = luma_at(x, y);

            let edge = (4.0 * luma
                - luma_at(x - 1, y)
                - luma_at(x + 1, y)
                - luma_at(x, y - 1)
                - luma_at(x, y + 1))
            .abs()
                / (4.0 * 255.0);

            let brightness = luma / 255.0;
            let mid_band = brightness > 0.05 && brightness < 0.9;
            let saturation = if mid_band {
                (r.max(g).max(b) - r.min(g).min(b)) / 255.0
            } else {
                0.0
            };
            let skin = if mid_band { skin_likeness(r, g, b) } else { 0.0 };

            columns[x as usize] += f64::from(edge + 0.3 * saturation + 1.8 * skin * edge);
        }
    }
    columns
}

/// How closely the color direction matches a reference skin tone;
/// 1.0 is a perfect match, 0.0 anything further than the threshold.
fn skin_likeness(r: f32, g: f32, b: f32) -> f32 {
    const SKIN: (f32, f32, f32) = (0.78, 0.57, 0.44);
    let mag = (r * r + g * g + b * b).sqrt();
    if mag <= 0.0 {
        return 0.0;
    }
    let dot = (r / mag) * SKIN.0 + (g / mag) * SKIN.1 + (b / mag) * SKIN.2;
    let skin_mag = (SKIN.0 * SKIN.0 + SKIN.1 * SKIN.1 + SKIN.2 * SKIN.2).sqrt();
    let closeness = (dot / skin_mag).clamp(0.0, 1.0);
    ((closeness - 0.8) / 0.2).max(0.0)
}

/// Index of the `window`-wide span with the highest total, with a mild
/// preference for central placement to break flat ties.
fn best_window(columns: &[f64], window: usize) -> usize {
    let window = window.clamp(1, columns.len());
    let mut prefix = vec![0f64; columns.len() + 1];
    for (index, value) in columns.iter().enumerate() {
        prefix[index + 1] = prefix[index] + value;
    }

    let spans = columns.len() - window;
    let mut best = 0;
    let mut best_score = f64::MIN;
    for x in 0..=spans {
        let sum = prefix[x + window] - prefix[x];
        let centering = if spans > 0 {
            let offset = (x as f64 - spans as f64 / 2.0).abs() / (spans as f64 / 2.0).max(1.0);
            1.0 - 0.1 * offset
        } else {
            1.0
        };
        let score = sum * centering;
        if score > best_score {
            best_score = score;
            best = x;
        }
    }
    best
}
