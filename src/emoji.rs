//! Emoji cluster detection and image fetching. Clusters are found with
//! Unicode emoji properties (presentation forms, VS16 forms, ZWJ
//! sequences, skin-tone modifiers, flag pairs, keycaps) and mapped to
//! CDN sprite names; images are fetched once and kept in a small LRU.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, warn};
use lru::LruCache;
use regex::Regex;
use tiny_skia::Pixmap;

use crate::painter;

/// Byte range of one emoji cluster in the scanned text plus its CDN
/// image key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmojiMatch {
    pub start: usize,
    pub end: usize,
    pub key: String,
}

fn cluster_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Ordered longest-form first: keycaps, flag pairs, ZWJ sequences,
        // then standalone pictographs (default-emoji or VS16-forced).
        Regex::new(
            r"(?x)
            (?: [0-9\#*] \x{FE0F}? \x{20E3} )
            | (?: \p{Regional_Indicator}{2} )
            | (?: \p{Emoji} \x{FE0F}? \p{Emoji_Modifier}?
                  (?: \x{200D} \p{Emoji} \x{FE0F}? \p{Emoji_Modifier}? )+ )
            | (?: \p{Emoji_Presentation} \p{Emoji_Modifier}? )
            | (?: \p{Emoji} \x{FE0F} \p{Emoji_Modifier}? )
            ",
        )
        .expect("emoji cluster regex should compile")
    })
}

pub fn scan(text: &str) -> Vec<EmojiMatch> {
    cluster_regex()
        .find_iter(text)
        .map(|found| EmojiMatch {
            start: found.start(),
            end: found.end(),
            key: image_key(found.as_str()),
        })
        .collect()
}

/// CDN sprite name for a cluster: scalars as lowercase hex padded to
/// four digits, joined by hyphens, with variation selectors dropped.
/// ZWJ joiners stay in the name.
pub fn image_key(cluster: &str) -> String {
    let mut parts = Vec::new();
    for ch in cluster.chars() {
        if ch == '\u{FE0F}' {
            continue;
        }
        parts.push(format!("{:04x}", ch as u32));
    }
    parts.join("-")
}

/// Second brand tried when the requested one has no sprite for a
/// cluster.
pub fn fallback_brand(brand: &str) -> &'static str {
    if brand == "blob" {
        "google"
    } else {
        "apple"
    }
}

pub fn sprite_url(template: &str, brand: &str, key: &str) -> String {
    template.replace("{brand}", brand).replace("{code}", key)
}

/// Fetch-once emoji sprite store. Failed lookups are cached too, so a
/// missing sprite costs at most one round-trip per brand pair.
pub struct EmojiImages {
    client: reqwest::Client,
    template: String,
    cache: Mutex<LruCache<String, Option<Arc<Pixmap>>>>,
}

impl EmojiImages {
    pub fn new(client: reqwest::Client, template: String, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            template,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn fetch(&self, brand: &str, key: &str) -> Option<Arc<Pixmap>> {
        let cache_key = format!("{brand}:{key}");
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(entry) = cache.get(&cache_key) {
                return entry.clone();
            }
        }

        let mut image = self.fetch_brand(brand, key).await;
        if image.is_none() {
            let fallback = fallback_brand(brand);
            if fallback != brand {
                image = self.fetch_brand(fallback, key).await;
            }
        }
        if image.is_none() {
            warn!("no emoji sprite for {key} (brand {brand}); rendering as text");
        }

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(cache_key, image.clone());
        }
        image
    }

    async fn fetch_brand(&self, brand: &str, key: &str) -> Option<Arc<Pixmap>> {
        let url = sprite_url(&self.template, brand, key);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(error) => {
                debug!("emoji sprite request failed for {url}: {error}");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!("emoji sprite {url} returned {}", response.status());
            return None;
        }
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!("emoji sprite body failed for {url}: {error}");
                return None;
            }
        };
        match painter::decode_image(&bytes) {
            Ok(pixmap) => Some(Arc::new(pixmap)),
            Err(error) => {
                debug!("emoji sprite decode failed for {url}: {error}");
                None
            }
        }
    }
}
