//! Sender avatars. Prefers a real photo (inline URL, then the Bot API
//! ladder, then the public userpic mirror) and falls back to a painted
//! initials badge that never needs the network.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::warn;
use lru::LruCache;
use tiny_skia::Pixmap;

use crate::colors::{palette_index, Rgb, AVATAR_GRADIENTS};
use crate::fonts::GlyphRasterizer;
use crate::painter;
use crate::params::User;
use crate::provider::{self, BotApi, Fetcher};
use crate::shaper::{self, EmojiAtlas, ShapeRequest};
use crate::styled;

const BADGE_SIZE: u32 = 500;
const BADGE_FONT_SIZE: f32 = 250.0;

/// Two letters identifying the sender: first runes of first and last
/// name when both are present (case kept), otherwise the display name
/// is uppercased and reduced to the first runes of its outer words, or
/// the first and last rune of a single word.
pub fn initials(user: &User) -> String {
    if let (Some(first), Some(last)) = (user.first_name.as_deref(), user.last_name.as_deref()) {
        let letters: String = first.chars().take(1).chain(last.chars().take(1)).collect();
        if !letters.is_empty() {
            return letters;
        }
    }
    let name = user
        .first_name
        .as_deref()
        .or(user.name.as_deref())
        .or(user.title.as_deref())
        .unwrap_or_default()
        .to_uppercase();
    let words: Vec<&str> = name.split_whitespace().collect();
    match words.as_slice() {
        [] => "?".to_string(),
        [word] => {
            let mut runes = word.chars();
            let first = runes.next();
            let last = runes.next_back();
            first.into_iter().chain(last).collect()
        }
        [first, .., last] => first
            .chars()
            .take(1)
            .chain(last.chars().take(1))
            .collect(),
    }
}

/// 500x500 fallback tile: the sender's gradient with `letters` shaped
/// on top. The text block keeps its baseline slop, so dividing the
/// vertical leftover by 1.5 is what lands the ink on the optical
/// center.
pub fn badge(raster: &mut dyn GlyphRasterizer, letters: &str, id: i64) -> Result<Pixmap> {
    let (from, to) = AVATAR_GRADIENTS[palette_index(id)];
    let side = BADGE_SIZE as f32;
    let mut canvas = painter::new_pixmap(BADGE_SIZE, BADGE_SIZE)?;
    painter::fill_rounded_rect(&mut canvas, 0.0, 0.0, side, side, 0.0, from, to);

    let request = ShapeRequest {
        font_size: BADGE_FONT_SIZE,
        font_color: Rgb::new(0xFF, 0xFF, 0xFF),
        text_x: 0.0,
        text_y: side,
        max_width: side * 5.0,
        max_height: side * 5.0,
    };
    let words = styled::segment(letters, &[]);
    let block = shaper::shape_text(raster, &EmojiAtlas::default(), words, &request)?;
    let x = ((side - block.width() as f32) / 2.0).round() as i32;
    let y = ((side - block.height() as f32) / 1.5).round() as i32;
    painter::stamp(&mut canvas, &block, x, y);
    Ok(canvas)
}

struct CachedAvatar {
    image: Arc<Pixmap>,
    stored_at: Instant,
}

/// Photo resolution with a small per-sender cache. Badge fallbacks are
/// cheap to repaint and are deliberately not cached, so a sender whose
/// photo starts resolving later is picked up within one TTL.
pub struct AvatarResolver {
    fetcher: Fetcher,
    cache: Mutex<LruCache<i64, CachedAvatar>>,
    ttl: Duration,
}

impl AvatarResolver {
    pub fn new(fetcher: Fetcher, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            fetcher,
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Photo for `user`, or `None` when every source fails; callers
    /// paint the initials badge themselves. The bot client is per call
    /// because requests may carry their own token.
    pub async fn photo(&self, bot: Option<&BotApi>, user: &User) -> Option<Arc<Pixmap>> {
        if let Some(id) = user.id {
            if let Some(hit) = self.cache_get(id) {
                return Some(hit);
            }
        }
        let image = Arc::new(self.fetch_photo(bot, user).await?);
        if let Some(id) = user.id {
            self.cache_put(id, image.clone());
        }
        Some(image)
    }

    async fn fetch_photo(&self, bot: Option<&BotApi>, user: &User) -> Option<Pixmap> {
        // An inline photo URL is authoritative: when it fails we go
        // straight to the badge instead of guessing at other sources.
        if let Some(url) = user.photo.as_ref().and_then(|photo| photo.url.as_deref()) {
            return match self.fetch_image(url).await {
                Ok(image) => Some(image),
                Err(error) => {
                    warn!("avatar photo url failed: {error:#}");
                    None
                }
            };
        }
        let url = match self.photo_url(bot, user).await {
            Ok(Some(url)) => url,
            Ok(None) => return None,
            Err(error) => {
                warn!("avatar lookup failed: {error:#}");
                return None;
            }
        };
        match self.fetch_image(&url).await {
            Ok(image) => Some(image),
            Err(error) => {
                warn!("avatar fetch failed: {error:#}");
                None
            }
        }
    }

    async fn photo_url(&self, bot: Option<&BotApi>, user: &User) -> Result<Option<String>> {
        if let Some(bot) = bot {
            let file_id = user
                .photo
                .as_ref()
                .and_then(|photo| photo.big_file_id.clone());
            if let Some(file_id) = file_id {
                return bot.file_url(&file_id).await.map(Some);
            }
            if let Some(id) = user.id {
                if let Some(file_id) = bot.chat_photo_file_id(id).await? {
                    return bot.file_url(&file_id).await.map(Some);
                }
            }
        }
        Ok(user
            .username
            .as_deref()
            .map(provider::userpic_fallback_url))
    }

    async fn fetch_image(&self, source: &str) -> Result<Pixmap> {
        let bytes = self.fetcher.fetch_bytes(source).await?;
        painter::decode_image(&bytes)
    }

    fn cache_get(&self, id: i64) -> Option<Arc<Pixmap>> {
        let mut cache = self.cache.lock().ok()?;
        match cache.get(&id) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.image.clone()),
            Some(_) => {
                cache.pop(&id);
                None
            }
            None => None,
        }
    }

    fn cache_put(&self, id: i64, image: Arc<Pixmap>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                id,
                CachedAvatar {
                    image,
                    stored_at: Instant::now(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::FixedAdvance;
    use crate::params::UserPhoto;

    fn named(
        first: Option<&str>,
        last: Option<&str>,
        name: Option<&str>,
        title: Option<&str>,
    ) -> User {
        User {
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            name: name.map(str::to_string),
            title: title.map(str::to_string),
            ..User::default()
        }
    }

    fn local_resolver(ttl: Duration) -> AvatarResolver {
        AvatarResolver::new(Fetcher::new(reqwest::Client::new()), 4, ttl)
    }

    #[test]
    fn initials_keep_case_of_split_names() {
        assert_eq!(initials(&named(Some("ada"), Some("lovelace"), None, None)), "al");
    }

    #[test]
    fn initials_use_outer_words_of_display_name() {
        assert_eq!(
            initials(&named(None, None, Some("ada king lovelace"), None)),
            "AL"
        );
    }

    #[test]
    fn initials_single_word_takes_first_and_last_rune() {
        assert_eq!(initials(&named(None, None, Some("adam"), None)), "AM");
        assert_eq!(initials(&named(None, None, Some("a"), None)), "A");
    }

    #[test]
    fn initials_fall_back_to_title_then_question_mark() {
        assert_eq!(initials(&named(None, None, None, Some("rust club"))), "RC");
        assert_eq!(initials(&User::default()), "?");
    }

    #[test]
    fn badge_paints_gradient_and_letters() {
        let mut raster = FixedAdvance::default();
        let canvas = badge(&mut raster, "AB", 3).unwrap();
        assert_eq!((canvas.width(), canvas.height()), (500, 500));

        // Diagonal gradient: opposite corners come from different stops.
        let top_left = canvas.pixel(2, 2).unwrap();
        let bottom_right = canvas.pixel(497, 497).unwrap();
        assert_ne!(top_left, bottom_right);

        // FixedAdvance at size 250 inks 300x175 of glyph box; centered
        // it covers the middle of the tile with solid white.
        let center = canvas.pixel(250, 250).unwrap();
        assert_eq!((center.red(), center.green(), center.blue()), (255, 255, 255));
    }

    #[test]
    fn cache_round_trips_within_ttl() {
        let resolver = local_resolver(Duration::from_secs(300));
        let image = Arc::new(painter::new_pixmap(1, 1).unwrap());
        resolver.cache_put(9, image);
        assert!(resolver.cache_get(9).is_some());
    }

    #[test]
    fn cache_entries_expire() {
        let resolver = local_resolver(Duration::ZERO);
        let image = Arc::new(painter::new_pixmap(1, 1).unwrap());
        resolver.cache_put(9, image);
        assert!(resolver.cache_get(9).is_none());
    }

    #[tokio::test]
    async fn photo_prefers_inline_url_and_caches_it() {
        let source = painter::new_pixmap(3, 2).unwrap();
        let png = painter::encode_png(&source).unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), &png).unwrap();

        let resolver = local_resolver(Duration::from_secs(300));
        let user = User {
            id: Some(7),
            photo: Some(UserPhoto {
                url: Some(file.path().display().to_string()),
                big_file_id: None,
            }),
            ..User::default()
        };
        let image = resolver.photo(None, &user).await.unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
        assert!(resolver.cache_get(7).is_some());
    }

    #[tokio::test]
    async fn photo_is_none_without_sources() {
        let resolver = local_resolver(Duration::from_secs(300));
        let user = named(Some("Ada"), Some("Lovelace"), None, None);
        assert!(resolver.photo(None, &user).await.is_none());
        // Failures stay out of the cache.
        assert!(resolver.cache_get(1).is_none());
    }
}
