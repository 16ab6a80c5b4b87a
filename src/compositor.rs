//! WebM composition. The rendered card becomes a still overlay with the
//! media slot punched transparent, and ffmpeg loops the source clip
//! underneath it on a black bed. Runs as a staged pipeline: probe,
//! overlay, primary encode, size check, optional reduced-rate encode,
//! cleanup. Temp files are removed on every exit path.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use tiny_skia::Pixmap;

use crate::layout::ReservedRegion;
use crate::media::AnimatedMedia;
use crate::painter;
use crate::probe;

pub const VIDEO_CODEC: &str = "libvpx";

/// Neither output axis exceeds this.
const MAX_EDGE: f32 = 512.0;
/// Encodes above this many bytes get one reduced-rate retry.
const SIZE_CEILING: u64 = 256 * 1024;

/// A finished clip plus the metadata reported back to the caller.
#[derive(Debug)]
pub struct AnimatedQuote {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
    pub fps: f32,
}

/// Output frame and the media slot within it, in output pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputGeometry {
    pub width: u32,
    pub height: u32,
    pub media_x: u32,
    pub media_y: u32,
    pub media_width: u32,
    pub media_height: u32,
}

/// Scales the card so its long edge lands on 512 and maps the reserved
/// region by the same ratio. Frame axes are rounded down to even
/// because libvpx rejects odd frame sizes.
pub fn output_geometry(card_width: u32, card_height: u32, region: &ReservedRegion) -> OutputGeometry {
    let long_edge = card_width.max(card_height).max(1) as f32;
    let ratio = MAX_EDGE / long_edge;
    let scaled = |v: u32| ((v as f32 * ratio).round() as u32).min(MAX_EDGE as u32);
    OutputGeometry {
        width: even(scaled(card_width)),
        height: even(scaled(card_height)),
        media_x: (region.x.max(0.0) * ratio).round() as u32,
        media_y: (region.y.max(0.0) * ratio).round() as u32,
        media_width: ((region.width * ratio).round() as u32).max(1),
        media_height: ((region.height * ratio).round() as u32).max(1),
    }
}

fn even(value: u32) -> u32 {
    value.max(2) & !1
}

/// Card scaled to the output frame with the media slot cut out, so the
/// looping clip shows through when layered on top of it.
pub fn build_overlay(card: &Pixmap, geometry: &OutputGeometry) -> Result<Pixmap> {
    let mut scaled = painter::resize_pixmap(card, geometry.width, geometry.height)?;
    painter::punch_rect(
        &mut scaled,
        geometry.media_x as f32,
        geometry.media_y as f32,
        geometry.media_width as f32,
        geometry.media_height as f32,
    );
    Ok(scaled)
}

/// Primary tier: at least one second, at most three, at most 30 fps.
pub fn primary_tier(duration_secs: f32, source_fps: f32) -> (f32, f32) {
    (duration_secs.clamp(1.0, 3.0), source_fps.min(30.0))
}

/// Reduced tier used once when the primary encode exceeds the size
/// ceiling. Its output ships regardless of size.
pub fn fallback_tier(primary_secs: f32, source_fps: f32) -> (f32, f32) {
    (primary_secs.min(2.0), source_fps.min(24.0))
}

pub fn filter_graph(geometry: &OutputGeometry, duration_secs: f32) -> String {
    format!(
        "[0:v]scale={mw}:{mh}[scaled_media];\
         color=c=#000000:size={w}x{h}:duration={d}[bg];\
         [bg][scaled_media]overlay={x}:{y}:shortest=1[with_media];\
         [with_media][1:v]overlay=0:0[out]",
        mw = geometry.media_width,
        mh = geometry.media_height,
        w = geometry.width,
        h = geometry.height,
        d = duration_secs,
        x = geometry.media_x,
        y = geometry.media_y,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn encode_args(
    media: &Path,
    overlay: &Path,
    output: &Path,
    geometry: &OutputGeometry,
    duration_secs: f32,
    fps: f32,
    crf: u32,
    bitrate: &str,
) -> Vec<String> {
    vec![
        "-y".to_owned(),
        "-stream_loop".to_owned(),
        "-1".to_owned(),
        "-i".to_owned(),
        media.to_string_lossy().into_owned(),
        "-i".to_owned(),
        overlay.to_string_lossy().into_owned(),
        "-filter_complex".to_owned(),
        filter_graph(geometry, duration_secs),
        "-map".to_owned(),
        "[out]".to_owned(),
        "-c:v".to_owned(),
        VIDEO_CODEC.to_owned(),
        "-crf".to_owned(),
        crf.to_string(),
        "-b:v".to_owned(),
        bitrate.to_owned(),
        "-auto-alt-ref".to_owned(),
        "0".to_owned(),
        "-r".to_owned(),
        fps.to_string(),
        "-t".to_owned(),
        duration_secs.to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

pub fn ffmpeg_binary() -> PathBuf {
    #[cfg(feature = "sidecar_ffmpeg")]
    {
        if let Err(error) = ffmpeg_sidecar::download::auto_download() {
            log::warn!("ffmpeg sidecar download failed, trying PATH: {error}");
        }
        let path = ffmpeg_sidecar::paths::ffmpeg_path();
        if path.exists() {
            return path;
        }
    }
    PathBuf::from("ffmpeg")
}

fn run_ffmpeg(args: &[String]) -> Result<()> {
    let binary = ffmpeg_binary();
    debug!("running {} {}", binary.display(), args.join(" "));
    let output = Command::new(&binary)
        .args(args.iter().map(String::as_str))
        .output()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                anyhow!(
                    "ffmpeg executable not found (resolved_path={}). Install ffmpeg or build with `--features sidecar_ffmpeg`.",
                    binary.display()
                )
            } else {
                anyhow!("failed to run ffmpeg: {error}")
            }
        })?;
    if !output.status.success() {
        bail!(
            "ffmpeg failed with status {}: {}",
            output.status,
            probe::tail(&String::from_utf8_lossy(&output.stderr), 500)
        );
    }
    Ok(())
}

/// Files deleted when the pipeline exits, success or not.
#[derive(Default)]
struct TempSet {
    paths: Vec<PathBuf>,
}

impl TempSet {
    fn add(&mut self, path: &Path) {
        self.paths.push(path.to_owned());
    }
}

impl Drop for TempSet {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(error) = fs::remove_file(path) {
                if error.kind() != ErrorKind::NotFound {
                    debug!("failed to remove {}: {error}", path.display());
                }
            }
        }
    }
}

/// Composes the card and its staged clip into a WebM. Probe and encode
/// failures propagate so the caller can fall back to the static card.
pub fn compose_clip(
    card: &Pixmap,
    region: &ReservedRegion,
    media: &AnimatedMedia,
    temp_dir: &Path,
) -> Result<AnimatedQuote> {
    let source = media.local_path.as_deref().ok_or_else(|| {
        anyhow!(
            "animated media was never staged (source={})",
            media.source_url
        )
    })?;

    let probed = probe::probe_file(source)
        .with_context(|| format!("probing staged clip {}", source.display()))?;
    let duration_secs = probed.duration_ms.unwrap_or(media.duration_ms) as f32 / 1000.0;
    let source_fps = probed.fps.unwrap_or(media.fps);

    let geometry = output_geometry(card.width(), card.height(), region);

    fs::create_dir_all(temp_dir)
        .with_context(|| format!("creating temp dir {}", temp_dir.display()))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();

    let mut temp = TempSet::default();
    if source.starts_with(temp_dir) {
        temp.add(source);
    }

    let overlay_path = temp_dir.join(format!("overlay_{stamp}.png"));
    temp.add(&overlay_path);
    let overlay = build_overlay(card, &geometry)?;
    fs::write(&overlay_path, painter::encode_png(&overlay)?)
        .with_context(|| format!("writing overlay {}", overlay_path.display()))?;

    let output_path = temp_dir.join(format!("clip_{stamp}.webm"));
    temp.add(&output_path);

    let (primary_secs, primary_fps) = primary_tier(duration_secs, source_fps);
    run_ffmpeg(&encode_args(
        source,
        &overlay_path,
        &output_path,
        &geometry,
        primary_secs,
        primary_fps,
        23,
        "1M",
    ))?;

    let mut encoded_secs = primary_secs;
    let mut encoded_fps = primary_fps;
    let encoded_size = fs::metadata(&output_path)
        .with_context(|| format!("sizing encoded clip {}", output_path.display()))?
        .len();
    if encoded_size > SIZE_CEILING {
        let (reduced_secs, reduced_fps) = fallback_tier(primary_secs, source_fps);
        debug!("clip is {encoded_size} bytes, re-encoding at reduced rate");
        run_ffmpeg(&encode_args(
            source,
            &overlay_path,
            &output_path,
            &geometry,
            reduced_secs,
            reduced_fps,
            32,
            "512k",
        ))?;
        encoded_secs = reduced_secs;
        encoded_fps = reduced_fps;
    }

    let bytes = fs::read(&output_path)
        .with_context(|| format!("reading encoded clip {}", output_path.display()))?;
    Ok(AnimatedQuote {
        bytes,
        width: geometry.width,
        height: geometry.height,
        duration_ms: (encoded_secs * 1000.0).round() as u64,
        fps: encoded_fps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: f32, y: f32, width: f32, height: f32) -> ReservedRegion {
        ReservedRegion {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn geometry_scales_long_edge_to_512() {
        let geometry = output_geometry(202, 231, &region(74.0, 11.76, 112.0, 150.0));
        // ratio = 512 / 231.
        assert_eq!(geometry.width, 448);
        assert_eq!(geometry.height, 512);
        assert_eq!(geometry.media_x, 164);
        assert_eq!(geometry.media_y, 26);
        assert_eq!(geometry.media_width, 248);
        assert_eq!(geometry.media_height, 332);
    }

    #[test]
    fn geometry_upscales_small_cards() {
        let geometry = output_geometry(100, 50, &region(10.0, 10.0, 20.0, 20.0));
        assert_eq!((geometry.width, geometry.height), (512, 256));
        assert_eq!((geometry.media_x, geometry.media_y), (51, 51));
    }

    #[test]
    fn geometry_rounds_frame_axes_down_to_even() {
        // 103 * (512 / 205) rounds to 257.
        let geometry = output_geometry(205, 103, &region(0.0, 0.0, 10.0, 10.0));
        assert_eq!(geometry.width, 512);
        assert_eq!(geometry.height, 256);
    }

    #[test]
    fn encode_args_spell_out_the_primary_tier() {
        let geometry = output_geometry(202, 231, &region(74.0, 11.76, 112.0, 150.0));
        let args = encode_args(
            Path::new("/tmp/in.webm"),
            Path::new("/tmp/overlay.png"),
            Path::new("/tmp/out.webm"),
            &geometry,
            3.0,
            30.0,
            23,
            "1M",
        );
        let has_pair = |flag: &str, value: &str| {
            args.windows(2)
                .any(|pair| pair[0] == flag && pair[1] == value)
        };
        assert!(has_pair("-stream_loop", "-1"));
        assert!(has_pair("-c:v", "libvpx"));
        assert!(has_pair("-crf", "23"));
        assert!(has_pair("-b:v", "1M"));
        assert!(has_pair("-auto-alt-ref", "0"));
        assert!(has_pair("-r", "30"));
        assert!(has_pair("-t", "3"));
        assert!(has_pair("-map", "[out]"));
        assert_eq!(args.last().unwrap(), "/tmp/out.webm");

        let filter = &args[args
            .iter()
            .position(|arg| arg == "-filter_complex")
            .unwrap()
            + 1];
        assert!(filter.contains("[0:v]scale=248:332[scaled_media]"));
        assert!(filter.contains("color=c=#000000:size=448x512:duration=3[bg]"));
        assert!(filter.contains("overlay=164:26:shortest=1"));
        assert!(filter.contains("[with_media][1:v]overlay=0:0[out]"));
    }

    #[test]
    fn tiers_clamp_duration_and_rate() {
        assert_eq!(primary_tier(0.5, 60.0), (1.0, 30.0));
        assert_eq!(primary_tier(10.0, 25.0), (3.0, 25.0));
        assert_eq!(primary_tier(2.5, 30.0), (2.5, 30.0));
        assert_eq!(fallback_tier(3.0, 60.0), (2.0, 24.0));
        assert_eq!(fallback_tier(1.2, 20.0), (1.2, 20.0));
    }

    #[test]
    fn overlay_gets_a_transparent_hole() {
        let mut card = painter::new_pixmap(100, 50).unwrap();
        let white = tiny_skia::PremultipliedColorU8::from_rgba(255, 255, 255, 255).unwrap();
        for px in card.pixels_mut() {
            *px = white;
        }
        let geometry = output_geometry(100, 50, &region(10.0, 10.0, 20.0, 20.0));
        let overlay = build_overlay(&card, &geometry).unwrap();
        assert_eq!((overlay.width(), overlay.height()), (512, 256));
        // Hole spans (51, 51) to (153, 153); the frame is only 256 tall
        // so probe within it.
        assert_eq!(overlay.pixel(100, 100).unwrap().alpha(), 0);
        assert_eq!(overlay.pixel(10, 10).unwrap().alpha(), 255);
        assert_eq!(overlay.pixel(200, 100).unwrap().alpha(), 255);
    }

    #[test]
    fn unstaged_media_is_rejected_before_any_encode() {
        let card = painter::new_pixmap(100, 50).unwrap();
        let media = AnimatedMedia {
            width: 10,
            height: 10,
            duration_ms: 3000,
            fps: 30.0,
            local_path: None,
            source_url: "https://example.com/sticker.webm".to_owned(),
            failed: true,
        };
        let error = compose_clip(
            &card,
            &region(10.0, 10.0, 20.0, 20.0),
            &media,
            Path::new("/tmp/qcr-compositor-test"),
        )
        .unwrap_err();
        assert!(error.to_string().contains("never staged"));
    }
}
