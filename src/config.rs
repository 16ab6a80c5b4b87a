use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE_NAME: &str = "qcr.yaml";
pub const DEFAULT_FONTS_DIR: &str = "assets/fonts";
pub const DEFAULT_WATERMARK: &str = "@QuotLyBot";
pub const DEFAULT_EMOJI_CDN_TEMPLATE: &str =
    "https://cdn.jsdelivr.net/npm/emoji-datasource-{brand}@15.1.2/img/{brand}/64/{code}.png";
pub const DEFAULT_EMOJI_BRAND: &str = "apple";

/// Raw on-disk shape. Everything is optional so a partial file only
/// overrides what it names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub fonts_dir: Option<String>,
    #[serde(default)]
    pub temp_dir: Option<String>,
    #[serde(default)]
    pub pattern_path: Option<String>,
    #[serde(default)]
    pub watermark: Option<String>,
    #[serde(default)]
    pub emoji: EmojiSection,
    #[serde(default)]
    pub avatar: AvatarSection,
    #[serde(default)]
    pub results: ResultsSection,
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
    #[serde(default)]
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmojiSection {
    #[serde(default)]
    pub cdn_template: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub cache_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvatarSection {
    #[serde(default)]
    pub cache_capacity: Option<usize>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultsSection {
    #[serde(default)]
    pub max_bytes: Option<u64>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct QcrConfig {
    pub fonts_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub pattern_path: Option<PathBuf>,
    pub watermark: String,
    pub emoji_cdn_template: String,
    pub emoji_brand: String,
    pub emoji_cache_capacity: usize,
    pub avatar_cache_capacity: usize,
    pub avatar_cache_ttl: Duration,
    pub result_cache_max_bytes: u64,
    pub result_cache_ttl: Duration,
    pub fetch_timeout: Duration,
    pub bot_token: Option<String>,
}

impl Default for QcrConfig {
    fn default() -> Self {
        resolve(ConfigFile::default(), None)
    }
}

/// Loads configuration. An explicit path must exist; without one the
/// default file is picked up from the working directory when present,
/// and builtin defaults are used otherwise. `QCR_BOT_TOKEN` overrides
/// any token written in the file.
pub fn load(explicit_path: Option<&Path>) -> Result<QcrConfig> {
    let file = match explicit_path {
        Some(path) => load_file(path)?,
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE_NAME);
            if default_path.exists() {
                load_file(&default_path)?
            } else {
                ConfigFile::default()
            }
        }
    };
    Ok(resolve(file, env::var("QCR_BOT_TOKEN").ok()))
}

pub fn load_file(path: &Path) -> Result<ConfigFile> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    if text.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    let parsed: ConfigFile = serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse config yaml at {}", path.display()))?;
    Ok(parsed)
}

pub fn resolve(file: ConfigFile, env_token: Option<String>) -> QcrConfig {
    QcrConfig {
        fonts_dir: file
            .fonts_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FONTS_DIR)),
        temp_dir: file
            .temp_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("qcr")),
        pattern_path: file.pattern_path.map(PathBuf::from),
        watermark: file
            .watermark
            .unwrap_or_else(|| DEFAULT_WATERMARK.to_owned()),
        emoji_cdn_template: file
            .emoji
            .cdn_template
            .unwrap_or_else(|| DEFAULT_EMOJI_CDN_TEMPLATE.to_owned()),
        emoji_brand: file
            .emoji
            .brand
            .unwrap_or_else(|| DEFAULT_EMOJI_BRAND.to_owned()),
        emoji_cache_capacity: file.emoji.cache_capacity.unwrap_or(256),
        avatar_cache_capacity: file.avatar.cache_capacity.unwrap_or(20),
        avatar_cache_ttl: Duration::from_secs(file.avatar.ttl_secs.unwrap_or(300)),
        result_cache_max_bytes: file.results.max_bytes.unwrap_or(1_000_000_000),
        result_cache_ttl: Duration::from_secs(file.results.ttl_secs.unwrap_or(45 * 60)),
        fetch_timeout: Duration::from_secs(file.fetch_timeout_secs.unwrap_or(30)),
        bot_token: env_token.or(file.bot_token),
    }
}
