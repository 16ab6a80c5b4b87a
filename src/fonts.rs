//! Font loading and the measurement/rasterization seam. The shaper and
//! layout code never touch `fontdue` directly; they speak through the
//! `TextMeasurer` / `GlyphRasterizer` traits so tests and benches can run
//! with a fixed-advance stand-in instead of real font files.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use fontdue::Font;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontStyle {
    Regular,
    Bold,
    Italic,
    BoldItalic,
    Monospace,
}

impl FontStyle {
    /// Monospace runs keep their face regardless of other flags, matching
    /// how code spans render in chat clients.
    pub fn select(bold: bool, italic: bool, monospace: bool) -> Self {
        if monospace {
            FontStyle::Monospace
        } else {
            match (bold, italic) {
                (true, true) => FontStyle::BoldItalic,
                (true, false) => FontStyle::Bold,
                (false, true) => FontStyle::Italic,
                (false, false) => FontStyle::Regular,
            }
        }
    }
}

/// A rasterized glyph positioned relative to the pen: draw the coverage
/// bitmap with its top-left at `(pen_x + left, baseline_y + top)`, then
/// advance the pen by `advance`.
#[derive(Debug, Clone)]
pub struct RasterGlyph {
    pub left: f32,
    pub top: f32,
    pub width: usize,
    pub height: usize,
    pub advance: f32,
    pub coverage: Arc<[u8]>,
}

pub trait TextMeasurer {
    fn measure(&self, text: &str, style: FontStyle, size: f32) -> f32;
}

pub trait GlyphRasterizer: TextMeasurer {
    fn rasterize(&mut self, ch: char, style: FontStyle, size: f32) -> RasterGlyph;
    fn ascent(&self, style: FontStyle, size: f32) -> f32;
}

#[derive(PartialEq, Eq, Hash)]
struct GlyphKey {
    ch: char,
    size_bits: u32,
    style: FontStyle,
}

/// The production font set, loaded from a fonts directory with the
/// conventional file names `regular.ttf`, `bold.ttf`, `italic.ttf`,
/// `bold-italic.ttf` and `monospace.ttf`. Any other `.ttf`/`.otf` files
/// in the directory join the fallback list for glyph coverage (CJK,
/// symbols). Only `regular.ttf` is mandatory.
pub struct FontStack {
    regular: Font,
    bold: Option<Font>,
    italic: Option<Font>,
    bold_italic: Option<Font>,
    monospace: Option<Font>,
    fallbacks: Vec<Font>,
    glyph_cache: HashMap<GlyphKey, RasterGlyph>,
}

// `fontdue::Font` has no `Debug` impl, so this cannot be derived.
impl std::fmt::Debug for FontStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontStack")
            .field("bold", &self.bold.is_some())
            .field("italic", &self.italic.is_some())
            .field("bold_italic", &self.bold_italic.is_some())
            .field("monospace", &self.monospace.is_some())
            .field("fallbacks", &self.fallbacks.len())
            .field("cached_glyphs", &self.glyph_cache.len())
            .finish_non_exhaustive()
    }
}

const STYLE_FILES: [&str; 5] = [
    "regular.ttf",
    "bold.ttf",
    "italic.ttf",
    "bold-italic.ttf",
    "monospace.ttf",
];

impl FontStack {
    pub fn load(fonts_dir: &Path) -> Result<Self> {
        let regular = load_font(&fonts_dir.join("regular.ttf")).with_context(|| {
            format!(
                "fonts directory {} must contain at least regular.ttf",
                fonts_dir.display()
            )
        })?;
        let bold = try_load_font(&fonts_dir.join("bold.ttf"))?;
        let italic = try_load_font(&fonts_dir.join("italic.ttf"))?;
        let bold_italic = try_load_font(&fonts_dir.join("bold-italic.ttf"))?;
        let monospace = try_load_font(&fonts_dir.join("monospace.ttf"))?;

        let mut fallback_paths = Vec::new();
        for entry in fs::read_dir(fonts_dir)
            .with_context(|| format!("failed to list fonts in {}", fonts_dir.display()))?
        {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_ascii_lowercase(),
                None => continue,
            };
            if STYLE_FILES.contains(&name.as_str()) {
                continue;
            }
            if name.ends_with(".ttf") || name.ends_with(".otf") {
                fallback_paths.push(path);
            }
        }
        fallback_paths.sort();
        let mut fallbacks = Vec::with_capacity(fallback_paths.len());
        for path in fallback_paths {
            fallbacks.push(load_font(&path)?);
        }

        Ok(Self {
            regular,
            bold,
            italic,
            bold_italic,
            monospace,
            fallbacks,
            glyph_cache: HashMap::new(),
        })
    }

    fn style_face(&self, style: FontStyle) -> &Font {
        let face = match style {
            FontStyle::Regular => None,
            FontStyle::Bold => self.bold.as_ref(),
            FontStyle::Italic => self.italic.as_ref(),
            FontStyle::BoldItalic => self.bold_italic.as_ref().or(self.bold.as_ref()),
            FontStyle::Monospace => self.monospace.as_ref(),
        };
        face.unwrap_or(&self.regular)
    }

    /// Styled face if it covers `ch`, then regular, then the fallback
    /// list; the styled face is kept as a last resort so missing glyphs
    /// render as its notdef box.
    fn face_for_char(&self, style: FontStyle, ch: char) -> &Font {
        let styled = self.style_face(style);
        if styled.lookup_glyph_index(ch) != 0 {
            return styled;
        }
        if self.regular.lookup_glyph_index(ch) != 0 {
            return &self.regular;
        }
        for fallback in &self.fallbacks {
            if fallback.lookup_glyph_index(ch) != 0 {
                return fallback;
            }
        }
        styled
    }
}

impl TextMeasurer for FontStack {
    // Control characters have no width or ink, matching 2D canvas text
    // semantics; without this, break characters would measure as the
    // notdef box.
    fn measure(&self, text: &str, style: FontStyle, size: f32) -> f32 {
        let mut width = 0.0;
        let mut prev: Option<char> = None;
        for ch in text.chars() {
            if ch.is_control() {
                continue;
            }
            let face = self.face_for_char(style, ch);
            width += face.metrics(ch, size).advance_width;
            if let Some(prev_ch) = prev {
                if let Some(kern) = face.horizontal_kern(prev_ch, ch, size) {
                    width += kern;
                }
            }
            prev = Some(ch);
        }
        width
    }
}

impl GlyphRasterizer for FontStack {
    fn rasterize(&mut self, ch: char, style: FontStyle, size: f32) -> RasterGlyph {
        if ch.is_control() {
            return RasterGlyph {
                left: 0.0,
                top: 0.0,
                width: 0,
                height: 0,
                advance: 0.0,
                coverage: Arc::from(Vec::new()),
            };
        }
        let key = GlyphKey {
            ch,
            size_bits: size.to_bits(),
            style,
        };
        if let Some(cached) = self.glyph_cache.get(&key) {
            return cached.clone();
        }
        let face = self.face_for_char(style, ch);
        let (metrics, bitmap) = face.rasterize(ch, size);
        let glyph = RasterGlyph {
            left: metrics.xmin as f32,
            top: -(metrics.ymin as f32 + metrics.height as f32),
            width: metrics.width,
            height: metrics.height,
            advance: metrics.advance_width,
            coverage: Arc::from(bitmap),
        };
        self.glyph_cache.insert(key, glyph.clone());
        glyph
    }

    fn ascent(&self, style: FontStyle, size: f32) -> f32 {
        self.style_face(style)
            .horizontal_line_metrics(size)
            .map(|m| m.ascent)
            .unwrap_or(size * 0.8)
    }
}

fn load_font(path: &Path) -> Result<Font> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read font {}", path.display()))?;
    Font::from_bytes(bytes, fontdue::FontSettings::default())
        .map_err(|error| anyhow!("failed to parse font {}: {error}", path.display()))
}

fn try_load_font(path: &Path) -> Result<Option<Font>> {
    if !path.exists() {
        return Ok(None);
    }
    load_font(path).map(Some)
}

/// Deterministic fixed-advance stack: every glyph measures
/// `advance_em x size` wide and rasterizes as a solid box. Keeps layout
/// and shaping tests (and the shaping bench) independent of font files.
#[derive(Debug, Clone, Copy)]
pub struct FixedAdvance {
    pub advance_em: f32,
}

impl Default for FixedAdvance {
    fn default() -> Self {
        Self { advance_em: 0.6 }
    }
}

impl TextMeasurer for FixedAdvance {
    fn measure(&self, text: &str, _style: FontStyle, size: f32) -> f32 {
        let count = text.chars().filter(|ch| !ch.is_control()).count();
        count as f32 * self.advance_em * size
    }
}

impl GlyphRasterizer for FixedAdvance {
    fn rasterize(&mut self, ch: char, _style: FontStyle, size: f32) -> RasterGlyph {
        if ch.is_control() {
            return RasterGlyph {
                left: 0.0,
                top: 0.0,
                width: 0,
                height: 0,
                advance: 0.0,
                coverage: Arc::from(Vec::new()),
            };
        }
        let advance = self.advance_em * size;
        if ch.is_whitespace() {
            return RasterGlyph {
                left: 0.0,
                top: 0.0,
                width: 0,
                height: 0,
                advance,
                coverage: Arc::from(Vec::new()),
            };
        }
        let width = (advance.max(1.0) as usize).max(1);
        let height = ((size * 0.7).max(1.0) as usize).max(1);
        RasterGlyph {
            left: 0.0,
            top: -(height as f32),
            width,
            height,
            advance,
            coverage: Arc::from(vec![255u8; width * height]),
        }
    }

    fn ascent(&self, _style: FontStyle, size: f32) -> f32 {
        size * 0.8
    }
}
