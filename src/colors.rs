//! Color parsing and the fixed palettes used for names, avatars and card
//! backgrounds. Brightness math follows the HSP model so light/dark
//! decisions agree with how the cards are perceived, not raw luma.

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Accepts `#rgb`, `#rrggbb`, `rgb(...)`, `rgba(...)` and a small set
    /// of CSS color names. Alpha components are ignored; card colors are
    /// opaque and translucency is applied at draw time.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            bail!("empty color");
        }
        let lower = trimmed.to_ascii_lowercase();
        if let Some(named) = lookup_named(&lower) {
            return Ok(named);
        }
        if let Some(args) = lower
            .strip_prefix("rgba(")
            .or_else(|| lower.strip_prefix("rgb("))
        {
            return parse_rgb_args(args.trim_end_matches(')'))
                .with_context(|| format!("invalid color {trimmed:?}"));
        }
        parse_hex(trimmed).with_context(|| format!("invalid color {trimmed:?}"))
    }

    /// Perceived brightness in 0..=255, the W3C weighted-sum form.
    pub fn brightness(self) -> f64 {
        (f64::from(self.r) * 299.0 + f64::from(self.g) * 587.0 + f64::from(self.b) * 114.0)
            / 1000.0
    }

    /// HSP lightness test. Crosses at 127.5, the midpoint of the channel
    /// range, so pure mid-gray counts as dark.
    pub fn is_light(self) -> bool {
        let r = f64::from(self.r);
        let g = f64::from(self.g);
        let b = f64::from(self.b);
        (0.299 * r * r + 0.587 * g * g + 0.114 * b * b).sqrt() > 127.5
    }

    /// Scales each channel by `1 + lum` and clamps. Negative values darken.
    pub fn luminance_shift(self, lum: f64) -> Self {
        let shift = |c: u8| {
            let v = f64::from(c);
            (v + v * lum).round().clamp(0.0, 255.0) as u8
        };
        Self::new(shift(self.r), shift(self.g), shift(self.b))
    }

    fn offset(self, amount: i32) -> Self {
        let shift = |c: u8| (i32::from(c) + amount).clamp(0, 255) as u8;
        Self::new(shift(self.r), shift(self.g), shift(self.b))
    }

    pub fn to_skia(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba8(self.r, self.g, self.b, 255)
    }

    pub fn to_skia_with_alpha(self, alpha: f32) -> tiny_skia::Color {
        let a = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
        tiny_skia::Color::from_rgba8(self.r, self.g, self.b, a)
    }
}

fn parse_hex(raw: &str) -> Result<Rgb> {
    let hex: String = raw.chars().filter(char::is_ascii_hexdigit).collect();
    let hex: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex,
        n => bail!("expected 3 or 6 hex digits, found {n}"),
    };
    Ok(Rgb::new(
        u8::from_str_radix(&hex[0..2], 16)?,
        u8::from_str_radix(&hex[2..4], 16)?,
        u8::from_str_radix(&hex[4..6], 16)?,
    ))
}

fn parse_rgb_args(args: &str) -> Result<Rgb> {
    let channels: Vec<&str> = args.split(',').map(str::trim).collect();
    if channels.len() != 3 && channels.len() != 4 {
        bail!("expected 3 or 4 components, found {}", channels.len());
    }
    let channel = |raw: &str| -> Result<u8> {
        let value: f64 = raw.parse()?;
        Ok(value.round().clamp(0.0, 255.0) as u8)
    };
    Ok(Rgb::new(
        channel(channels[0])?,
        channel(channels[1])?,
        channel(channels[2])?,
    ))
}

fn lookup_named(name: &str) -> Option<Rgb> {
    let color = match name {
        "black" => Rgb::new(0x00, 0x00, 0x00),
        "white" => Rgb::new(0xFF, 0xFF, 0xFF),
        "red" => Rgb::new(0xFF, 0x00, 0x00),
        "green" => Rgb::new(0x00, 0x80, 0x00),
        "lime" => Rgb::new(0x00, 0xFF, 0x00),
        "blue" => Rgb::new(0x00, 0x00, 0xFF),
        "yellow" => Rgb::new(0xFF, 0xFF, 0x00),
        "cyan" | "aqua" => Rgb::new(0x00, 0xFF, 0xFF),
        "magenta" | "fuchsia" => Rgb::new(0xFF, 0x00, 0xFF),
        "orange" => Rgb::new(0xFF, 0xA5, 0x00),
        "purple" => Rgb::new(0x80, 0x00, 0x80),
        "pink" => Rgb::new(0xFF, 0xC0, 0xCB),
        "gray" | "grey" => Rgb::new(0x80, 0x80, 0x80),
        "silver" => Rgb::new(0xC0, 0xC0, 0xC0),
        "maroon" => Rgb::new(0x80, 0x00, 0x00),
        "olive" => Rgb::new(0x80, 0x80, 0x00),
        "navy" => Rgb::new(0x00, 0x00, 0x80),
        "teal" => Rgb::new(0x00, 0x80, 0x80),
        "brown" => Rgb::new(0xA5, 0x2A, 0x2A),
        "violet" => Rgb::new(0xEE, 0x82, 0xEE),
        "indigo" => Rgb::new(0x4B, 0x00, 0x82),
        "gold" => Rgb::new(0xFF, 0xD7, 0x00),
        _ => return None,
    };
    Some(color)
}

/// Contrast ratio over perceived brightness, offset per WCAG so black on
/// black still yields a finite ratio.
pub fn contrast_ratio(a: Rgb, b: Rgb) -> f64 {
    let (lighter, darker) = if a.brightness() >= b.brightness() {
        (a.brightness(), b.brightness())
    } else {
        (b.brightness(), a.brightness())
    };
    (lighter + 0.05) / (darker + 0.05)
}

/// Nudges `foreground` toward a brightness of 175 whenever it sits below
/// a 4.5 contrast ratio against `background`. Already-readable colors
/// pass through untouched.
pub fn adjust_contrast(background: Rgb, foreground: Rgb) -> Rgb {
    if contrast_ratio(background, foreground) >= 4.5 {
        return foreground;
    }
    if background.brightness() >= foreground.brightness() {
        let amount = ((175.0 - foreground.brightness()) / 2.0).ceil() as i32;
        foreground.offset(amount)
    } else {
        let amount = ((foreground.brightness() - 175.0) / 2.0).ceil() as i32;
        foreground.offset(-amount)
    }
}

/// Sender-name colors for light card backgrounds.
pub const NAME_PALETTE_LIGHT: [Rgb; 7] = [
    Rgb::new(0xFC, 0x5C, 0x51),
    Rgb::new(0xFA, 0x79, 0x0F),
    Rgb::new(0x89, 0x5D, 0xD5),
    Rgb::new(0x0F, 0xB2, 0x97),
    Rgb::new(0x0F, 0xC9, 0xD6),
    Rgb::new(0x3C, 0xA5, 0xEC),
    Rgb::new(0xD5, 0x4F, 0xAF),
];

/// Sender-name colors for dark card backgrounds.
pub const NAME_PALETTE_DARK: [Rgb; 7] = [
    Rgb::new(0xFF, 0x8E, 0x86),
    Rgb::new(0xFF, 0xA3, 0x57),
    Rgb::new(0xB1, 0x8F, 0xFF),
    Rgb::new(0x4D, 0xD6, 0xBF),
    Rgb::new(0x45, 0xE8, 0xD1),
    Rgb::new(0x7A, 0xC9, 0xFF),
    Rgb::new(0xFF, 0x7F, 0xD5),
];

/// Top/bottom gradient stops for generated fallback avatars.
pub const AVATAR_GRADIENTS: [(Rgb, Rgb); 7] = [
    (Rgb::new(0xFF, 0x88, 0x5E), Rgb::new(0xFF, 0x51, 0x6A)),
    (Rgb::new(0xFF, 0xCD, 0x6A), Rgb::new(0xFF, 0xA8, 0x5C)),
    (Rgb::new(0xE0, 0xA2, 0xF3), Rgb::new(0xD6, 0x69, 0xED)),
    (Rgb::new(0xA0, 0xDE, 0x7E), Rgb::new(0x54, 0xCB, 0x68)),
    (Rgb::new(0x53, 0xED, 0xD6), Rgb::new(0x28, 0xC9, 0xB7)),
    (Rgb::new(0x72, 0xD5, 0xFD), Rgb::new(0x2A, 0x9E, 0xF1)),
    (Rgb::new(0xFF, 0xA8, 0xA8), Rgb::new(0xFF, 0x71, 0x9A)),
];

/// Stable identity-to-palette slot; all three palettes share seven slots.
pub fn palette_index(id: i64) -> usize {
    (id.unsigned_abs() % 7) as usize
}

pub const DEFAULT_BACKGROUND: &str = "//#292232";

/// Resolves a background spec to the gradient pair painted behind cards.
///
/// `a/b` keeps both stops as given, a `//` prefix derives a lighter and a
/// darker stop from one base color, and a bare color is used for both.
pub fn background_pair(spec: &str) -> Result<(Rgb, Rgb)> {
    let spec = if spec.trim().is_empty() {
        DEFAULT_BACKGROUND
    } else {
        spec
    };
    let parts: Vec<&str> = spec.split('/').collect();
    if parts.len() > 1 && !parts[0].is_empty() {
        return Ok((Rgb::parse(parts[0])?, Rgb::parse(parts[1])?));
    }
    if let Some(base) = spec.strip_prefix("//") {
        let base = Rgb::parse(base)?;
        return Ok((base.luminance_shift(0.35), base.luminance_shift(-0.15)));
    }
    let base = Rgb::parse(spec)?;
    Ok((base, base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_long_hex() {
        assert_eq!(Rgb::parse("#fff").unwrap(), Rgb::new(255, 255, 255));
        assert_eq!(Rgb::parse("#292232").unwrap(), Rgb::new(0x29, 0x22, 0x32));
        assert_eq!(Rgb::parse("292232").unwrap(), Rgb::new(0x29, 0x22, 0x32));
    }

    #[test]
    fn parses_functional_and_named_forms() {
        assert_eq!(Rgb::parse("rgb(255, 0, 10)").unwrap(), Rgb::new(255, 0, 10));
        assert_eq!(
            Rgb::parse("rgba(12, 250, 3, 0.5)").unwrap(),
            Rgb::new(12, 250, 3)
        );
        assert_eq!(Rgb::parse("Orange").unwrap(), Rgb::new(0xFF, 0xA5, 0x00));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Rgb::parse("#12345").is_err());
        assert!(Rgb::parse("rgb(1,2)").is_err());
        assert!(Rgb::parse("").is_err());
    }

    #[test]
    fn hsp_classifies_default_background_as_dark() {
        assert!(!Rgb::parse("#292232").unwrap().is_light());
        assert!(Rgb::new(255, 255, 255).is_light());
    }

    #[test]
    fn luminance_shift_clamps_at_channel_bounds() {
        let bright = Rgb::new(200, 200, 200).luminance_shift(0.5);
        assert_eq!(bright, Rgb::new(255, 255, 255));
        let dim = Rgb::new(100, 40, 0).luminance_shift(-0.5);
        assert_eq!(dim, Rgb::new(50, 20, 0));
    }

    #[test]
    fn readable_pairs_pass_through_adjustment() {
        let background = Rgb::parse("#292232").unwrap();
        let name = NAME_PALETTE_DARK[0];
        assert_eq!(adjust_contrast(background, name), name);
    }

    #[test]
    fn low_contrast_foreground_is_pulled_toward_midpoint() {
        let background = Rgb::new(255, 255, 255);
        let foreground = Rgb::new(0xFA, 0x79, 0x0F);
        // brightness 147.5, ratio ~1.73: brightened by ceil((175-147.5)/2).
        assert_eq!(
            adjust_contrast(background, foreground),
            Rgb::new(255, 135, 29)
        );
    }

    #[test]
    fn background_pair_derives_stops_from_double_slash() {
        let (one, two) = background_pair("//#292232").unwrap();
        let base = Rgb::parse("#292232").unwrap();
        assert_eq!(one, base.luminance_shift(0.35));
        assert_eq!(two, base.luminance_shift(-0.15));
    }

    #[test]
    fn background_pair_splits_explicit_gradients() {
        let (one, two) = background_pair("#112233/#445566").unwrap();
        assert_eq!(one, Rgb::new(0x11, 0x22, 0x33));
        assert_eq!(two, Rgb::new(0x44, 0x55, 0x66));
    }

    #[test]
    fn background_pair_defaults_when_empty() {
        let (one, two) = background_pair("").unwrap();
        assert_eq!(background_pair(DEFAULT_BACKGROUND).unwrap(), (one, two));
    }

    #[test]
    fn palette_index_folds_negative_ids() {
        assert_eq!(palette_index(-9), palette_index(9));
        assert!(palette_index(i64::MIN) < 7);
    }
}
