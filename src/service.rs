//! The generate pipeline end to end: method dispatch, parameter
//! normalization, per-message card rendering, stacking, animated
//! composition, output surfaces, encoding, and the result cache.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, warn};
use serde_json::Value;
use tiny_skia::Pixmap;

use crate::avatar::{self, AvatarResolver};
use crate::backdrop;
use crate::cache::{self, ResultCache};
use crate::colors::{
    adjust_contrast, background_pair, contrast_ratio, palette_index, Rgb, NAME_PALETTE_DARK,
    NAME_PALETTE_LIGHT,
};
use crate::compositor;
use crate::config::QcrConfig;
use crate::emoji::EmojiImages;
use crate::errors::{
    CodedError, CODE_FONTS_UNAVAILABLE, CODE_MESSAGES_EMPTY, CODE_METHOD_NOT_FOUND,
    CODE_PARAMS_INVALID, CODE_QUERY_EMPTY,
};
use crate::fonts::FontStack;
use crate::layout::{self, CardContent, QuoteCard};
use crate::media::{self, AnimatedMedia, MediaDescriptor, MediaResolver, StaticMedia};
use crate::painter;
use crate::params::{GenerateParams, GenerationResult, ImagePayload, Message, ReplyRef, User};
use crate::provider::{self, BotApi, Fetcher};
use crate::shaper::{self, EmojiAtlas, ShapeRequest};
use crate::styled::{self, Entity, StyledWord};

const NAME_FONT_SIZE: f32 = 22.0;
const TEXT_FONT_SIZE: f32 = 24.0;
const REPLY_NAME_FONT_SIZE: f32 = 16.0;
const REPLY_TEXT_FONT_SIZE: f32 = 21.0;

/// Vertical gap between stacked message cards, in unscaled units.
const STACK_MARGIN: f32 = 5.0;

/// Static cards taller than this render as raw bytes regardless of the
/// requested kind, except for the `image` and `stories` surfaces.
const MAX_SURFACE_HEIGHT: u32 = 2048;

/// Everything a single request needs, shared across requests: font
/// stack, emoji and avatar caches, media staging, and the result cache.
pub struct QuoteService {
    config: QcrConfig,
    http: reqwest::Client,
    fetcher: Fetcher,
    fonts: Mutex<FontStack>,
    emoji: EmojiImages,
    avatars: AvatarResolver,
    media: MediaResolver,
    cache: ResultCache,
    pattern: Option<Pixmap>,
}

struct RenderedMessage {
    card: QuoteCard,
    animated: Option<AnimatedMedia>,
}

impl QuoteService {
    pub fn new(config: QcrConfig) -> Result<Self> {
        let http = provider::build_http_client(config.fetch_timeout)?;
        let fetcher = Fetcher::new(http.clone());
        let fonts = FontStack::load(&config.fonts_dir).map_err(|error| {
            anyhow::Error::new(CodedError::dependency(
                CODE_FONTS_UNAVAILABLE,
                format!(
                    "fonts failed to load from {}: {error:#}",
                    config.fonts_dir.display()
                ),
            ))
        })?;
        let pattern = load_pattern(config.pattern_path.as_deref());
        Ok(Self {
            emoji: EmojiImages::new(
                http.clone(),
                config.emoji_cdn_template.clone(),
                config.emoji_cache_capacity,
            ),
            avatars: AvatarResolver::new(
                fetcher.clone(),
                config.avatar_cache_capacity,
                config.avatar_cache_ttl,
            ),
            media: MediaResolver::new(fetcher.clone(), config.temp_dir.clone()),
            cache: ResultCache::new(config.result_cache_max_bytes, config.result_cache_ttl),
            fonts: Mutex::new(fonts),
            http,
            fetcher,
            pattern,
            config,
        })
    }

    pub fn config(&self) -> &QcrConfig {
        &self.config
    }

    /// Runs `method` with a raw parameter object. A `.webm` method
    /// suffix forces the animated output shape; static results are
    /// served from and stored into the result cache, animated requests
    /// bypass it entirely.
    pub async fn run(&self, method: &str, raw_params: &Value) -> Result<GenerationResult> {
        let canonical = cache::canonical_method(method);
        if !matches!(canonical.as_str(), "generate" | "quote" | "webm") {
            return Err(anyhow::Error::new(CodedError::usage(
                CODE_METHOD_NOT_FOUND,
                format!("method {method:?} is not available; try generate, quote, or webm"),
            )));
        }
        if raw_params.is_null() {
            return Err(anyhow::Error::new(CodedError::usage(
                CODE_QUERY_EMPTY,
                "no parameters supplied",
            )));
        }

        let params: GenerateParams = serde_json::from_value(raw_params.clone()).map_err(|error| {
            anyhow::Error::new(CodedError::validation(
                CODE_PARAMS_INVALID,
                format!("parameters did not parse: {error}"),
            ))
        })?;
        let mut params = params.normalized();
        if is_webm_request(method) {
            params.ext = Some("webm".to_owned());
            params.kind = Some("animated".to_owned());
        }
        if params.messages.is_empty() {
            return Err(anyhow::Error::new(CodedError::usage(
                CODE_MESSAGES_EMPTY,
                "messages must contain at least one entry",
            )));
        }

        let wants_animation =
            params.ext.as_deref() == Some("webm") || params.kind.as_deref() == Some("animated");
        let fingerprint = cache::fingerprint(&canonical, raw_params);
        if !wants_animation {
            if let Some(hit) = self.cache.get(&fingerprint) {
                debug!("result cache hit for {canonical}");
                return Ok((*hit).clone());
            }
        }

        let result = self.render(&params).await?;
        if !wants_animation && !result.is_animated {
            self.cache.put(fingerprint, Arc::new(result.clone()));
        }
        Ok(result)
    }

    async fn render(&self, params: &GenerateParams) -> Result<GenerationResult> {
        let scale = params.scale.unwrap_or(2.0);
        let width = params.width.unwrap_or(512) as f32 * scale;
        let height = params.height.unwrap_or(512) as f32 * scale;
        let background = background_pair(params.background_color.as_deref().unwrap_or(""))
            .map_err(|error| {
                anyhow::Error::new(CodedError::validation(
                    CODE_PARAMS_INVALID,
                    format!("backgroundColor: {error:#}"),
                ))
            })?;
        let brand = params
            .emoji_brand
            .as_deref()
            .unwrap_or(&self.config.emoji_brand);
        let bot = params
            .bot_token
            .as_deref()
            .or(self.config.bot_token.as_deref())
            .map(|token| BotApi::new(self.http.clone(), token.to_owned()));

        let mut rendered = Vec::with_capacity(params.messages.len());
        for message in &params.messages {
            rendered.push(
                self.render_message(message, scale, width, height, background, brand, bot.as_ref())
                    .await?,
            );
        }

        // The first card that reserved a clip slot drives the animated
        // branch; any compositor failure falls back to the static path.
        let clip_source = rendered.iter().find_map(|entry| {
            let region = entry.card.reserved?;
            let media = entry.animated.as_ref()?;
            Some((region, media, &entry.card.canvas))
        });
        if let Some((region, media, canvas)) = clip_source {
            match compositor::compose_clip(canvas, &region, media, &self.config.temp_dir) {
                Ok(clip) => {
                    let image = if params.ext.is_some() {
                        ImagePayload::Binary(clip.bytes)
                    } else {
                        ImagePayload::Base64(STANDARD.encode(&clip.bytes))
                    };
                    return Ok(GenerationResult {
                        image,
                        kind: "animated".to_owned(),
                        width: clip.width,
                        height: clip.height,
                        ext: Some(params.ext.clone().unwrap_or_else(|| "webm".to_owned())),
                        is_animated: true,
                        duration_ms: Some(clip.duration_ms),
                        fps: Some(clip.fps),
                        codec: Some(compositor::VIDEO_CODEC.to_owned()),
                    });
                }
                Err(error) => {
                    warn!("animated composition failed, falling back to static: {error:#}");
                }
            }
        }

        let cards: Vec<QuoteCard> = rendered.into_iter().map(|entry| entry.card).collect();
        let stacked = stack_cards(cards, scale)?;
        let kind = coerce_kind(params.kind.clone(), params.ext.is_some(), stacked.height());

        let mut webp = false;
        let finished = match kind.as_deref() {
            Some("quote") => {
                webp = params.format.as_deref() != Some("png");
                backdrop::finish_quote(&stacked)?
            }
            Some("image") => {
                let mut fonts = self.lock_fonts()?;
                backdrop::finish_image(
                    &stacked,
                    &mut *fonts,
                    scale,
                    background,
                    self.pattern.as_ref(),
                    &self.config.watermark,
                )?
            }
            Some("stories") => {
                let mut fonts = self.lock_fonts()?;
                backdrop::finish_stories(
                    &stacked,
                    &mut *fonts,
                    scale,
                    background,
                    self.pattern.as_ref(),
                    &self.config.watermark,
                )?
            }
            _ => stacked,
        };

        let bytes = if webp {
            painter::encode_webp_lossless(&finished)?
        } else {
            painter::encode_png(&finished)?
        };
        let image = if params.ext.is_some() {
            ImagePayload::Binary(bytes)
        } else {
            ImagePayload::Base64(STANDARD.encode(&bytes))
        };
        Ok(GenerationResult {
            image,
            kind: kind.unwrap_or_else(|| "png".to_owned()),
            width: finished.width(),
            height: finished.height(),
            ext: params.ext.clone(),
            is_animated: false,
            duration_ms: None,
            fps: None,
            codec: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn render_message(
        &self,
        message: &Message,
        scale: f32,
        width: f32,
        height: f32,
        background: (Rgb, Rgb),
        brand: &str,
        bot: Option<&BotApi>,
    ) -> Result<RenderedMessage> {
        let fallback_from = User::default();
        let from = message.from.as_ref().unwrap_or(&fallback_from);
        let light = background.0.is_light();
        let text_color = if light {
            Rgb::new(0x00, 0x00, 0x00)
        } else {
            Rgb::new(0xFF, 0xFF, 0xFF)
        };

        // Name, text, avatar, and reply resolution are independent;
        // they run concurrently and join before layout. Media waits for
        // the text block because its size cap depends on the text width.
        let (name_block, text_block, avatar, reply) = tokio::join!(
            async {
                match name_line(from) {
                    Some((name, entities)) => {
                        let name_size = NAME_FONT_SIZE * scale;
                        let request = ShapeRequest {
                            font_size: name_size,
                            font_color: sender_name_color(background, from.id),
                            text_x: 0.0,
                            text_y: name_size,
                            max_width: width,
                            max_height: name_size,
                        };
                        self.shape_block(&name, &entities, &request, brand, bot)
                            .await
                            .map(Some)
                    }
                    None => Ok(None),
                }
            },
            async {
                match message.text.as_deref().filter(|text| !text.is_empty()) {
                    Some(text) => {
                        let text_size = TEXT_FONT_SIZE * scale;
                        let request = ShapeRequest {
                            font_size: text_size,
                            font_color: text_color,
                            text_x: 0.0,
                            text_y: text_size,
                            max_width: width,
                            max_height: height - text_size,
                        };
                        self.shape_block(text, &message.entities, &request, brand, bot)
                            .await
                            .map(Some)
                    }
                    None => Ok(None),
                }
            },
            async {
                if message.avatar {
                    self.resolve_avatar(bot, from).await.map(Some)
                } else {
                    Ok(None)
                }
            },
            async {
                let Some(reply) = message
                    .reply_message
                    .as_ref()
                    .filter(|reply| reply.is_renderable())
                else {
                    return (None, None, Rgb::default());
                };
                let palette = if light {
                    &NAME_PALETTE_LIGHT
                } else {
                    &NAME_PALETTE_DARK
                };
                let accent = palette[palette_index(reply.chat_id.unwrap_or(0))];
                match self
                    .reply_blocks(reply, scale, width, text_color, accent, brand, bot)
                    .await
                {
                    Ok((name, text)) => (Some(name), Some(text), accent),
                    Err(error) => {
                        warn!("reply block failed, dropping the reply: {error:#}");
                        (None, None, Rgb::default())
                    }
                }
            },
        );
        let name_block = name_block?;
        let text_block = text_block?;
        let avatar = avatar?;
        let (reply_name_block, reply_text_block, reply_accent) = reply;

        let mut media_descriptor = None;
        let mut max_media_size = 0.0_f32;
        let mut animated_hint = false;
        if let Some(media) = &message.media {
            if let Some(entry) = media.select(message.media_crop) {
                max_media_size = (width / 3.0 * scale).max(225.0 * scale);
                if let Some(text) = &text_block {
                    max_media_size = max_media_size.max(text.width() as f32);
                }
                let raw_ref = entry.url().or(entry.file_id()).unwrap_or_default();
                animated_hint = entry.is_animated() || media::is_animated_url(raw_ref);

                let url = match entry.url() {
                    Some(url) => Some(url.to_owned()),
                    None => self.media_url(entry.file_id(), bot).await,
                };
                media_descriptor = Some(match url {
                    Some(url) => {
                        self.media
                            .resolve(&url, max_media_size, message.media_crop, animated_hint)
                            .await?
                    }
                    None => MediaDescriptor::Static(StaticMedia {
                        image: media::placeholder_tile(max_media_size)?,
                    }),
                });
            }
        }
        let animated = match &media_descriptor {
            Some(MediaDescriptor::Animated(clip)) => Some(clip.clone()),
            _ => None,
        };

        let content = CardContent {
            avatar: avatar.as_deref(),
            name: name_block.as_ref(),
            text: text_block.as_ref(),
            reply_name: reply_name_block.as_ref(),
            reply_text: reply_text_block.as_ref(),
            reply_accent,
            media: media_descriptor.as_ref(),
            media_kind: message.media_type.as_deref(),
            max_media_size,
            animated_hint,
        };
        let card = layout::render_card(scale, background, &content)?;
        Ok(RenderedMessage { card, animated })
    }

    #[allow(clippy::too_many_arguments)]
    async fn reply_blocks(
        &self,
        reply: &ReplyRef,
        scale: f32,
        width: f32,
        text_color: Rgb,
        accent: Rgb,
        brand: &str,
        bot: Option<&BotApi>,
    ) -> Result<(Pixmap, Pixmap)> {
        let name = reply.name.as_deref().unwrap_or_default();
        let name_size = REPLY_NAME_FONT_SIZE * scale;
        let bold = [Entity::new("bold", 0, utf16_len(name))];
        let name_request = ShapeRequest {
            font_size: name_size,
            font_color: accent,
            text_x: 0.0,
            text_y: name_size,
            max_width: width * 0.9,
            max_height: name_size,
        };
        let name_block = self
            .shape_block(name, &bold, &name_request, brand, bot)
            .await?;

        let text_size = REPLY_TEXT_FONT_SIZE * scale;
        let text_request = ShapeRequest {
            font_size: text_size,
            font_color: text_color,
            text_x: 0.0,
            text_y: text_size,
            max_width: width * 0.9,
            max_height: text_size,
        };
        let text_block = self
            .shape_block(
                reply.text.as_deref().unwrap_or_default(),
                &reply.entities,
                &text_request,
                brand,
                bot,
            )
            .await?;
        Ok((name_block, text_block))
    }

    /// Segments, gathers emoji bitmaps, and shapes one text block. The
    /// font lock is taken only after every fetch has finished.
    async fn shape_block(
        &self,
        text: &str,
        entities: &[Entity],
        request: &ShapeRequest,
        brand: &str,
        bot: Option<&BotApi>,
    ) -> Result<Pixmap> {
        let words = styled::segment(text, entities);
        let atlas = self.build_atlas(&words, brand, bot).await;
        let mut fonts = self.lock_fonts()?;
        shaper::shape_text(&mut *fonts, &atlas, words, request)
    }

    async fn build_atlas(
        &self,
        words: &[StyledWord],
        brand: &str,
        bot: Option<&BotApi>,
    ) -> EmojiAtlas {
        let mut atlas = EmojiAtlas::default();
        for key in shaper::emoji_keys(words) {
            if let Some(image) = self.emoji.fetch(brand, &key).await {
                atlas.sprites.insert(key, image);
            }
        }

        let ids = shaper::custom_emoji_ids(words);
        if ids.is_empty() {
            return atlas;
        }
        let Some(bot) = bot else {
            debug!("custom emoji requested without a bot token; rendering as text");
            return atlas;
        };
        match bot.custom_emoji_stickers(&ids).await {
            Ok(stickers) => {
                for sticker in stickers {
                    let Some(id) = sticker.custom_emoji_id else {
                        continue;
                    };
                    let Some(thumb) = sticker.thumb else {
                        continue;
                    };
                    match self.sticker_thumb(bot, &thumb.file_id).await {
                        Ok(image) => {
                            atlas.custom.insert(id, Arc::new(image));
                        }
                        Err(error) => debug!("custom emoji {id} thumb failed: {error:#}"),
                    }
                }
            }
            Err(error) => warn!("custom emoji lookup failed: {error:#}"),
        }
        atlas
    }

    async fn sticker_thumb(&self, bot: &BotApi, file_id: &str) -> Result<Pixmap> {
        let url = bot.file_url(file_id).await?;
        let bytes = self.fetcher.fetch_bytes(&url).await?;
        painter::decode_image(&bytes)
    }

    async fn resolve_avatar(&self, bot: Option<&BotApi>, from: &User) -> Result<Arc<Pixmap>> {
        if let Some(photo) = self.avatars.photo(bot, from).await {
            return Ok(photo);
        }
        let letters = avatar::initials(from);
        debug!("no avatar photo; painting initials badge {letters:?}");
        let mut fonts = self.lock_fonts()?;
        avatar::badge(&mut *fonts, &letters, from.id.unwrap_or(1)).map(Arc::new)
    }

    async fn media_url(&self, file_id: Option<&str>, bot: Option<&BotApi>) -> Option<String> {
        let file_id = file_id?;
        let Some(bot) = bot else {
            warn!("media file id without a bot token; drawing a placeholder");
            return None;
        };
        match bot.file_url(file_id).await {
            Ok(url) => Some(url),
            Err(error) => {
                warn!("media file id failed to resolve: {error:#}");
                None
            }
        }
    }

    fn lock_fonts(&self) -> Result<MutexGuard<'_, FontStack>> {
        self.fonts
            .lock()
            .map_err(|_| anyhow!("font stack lock poisoned"))
    }
}

fn is_webm_request(method: &str) -> bool {
    method.ends_with(".webm") || cache::canonical_method(method) == "webm"
}

fn utf16_len(text: &str) -> u32 {
    text.encode_utf16().count() as u32
}

/// Display name plus its styling entities, or `None` when the sender
/// carries no name material at all. The whole name is bold; an emoji
/// status appends a clown placeholder wired to the status sticker.
fn name_line(from: &User) -> Option<(String, Vec<Entity>)> {
    let has_material = [
        from.name.as_deref(),
        from.first_name.as_deref(),
        from.last_name.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|part| !part.is_empty());
    if !has_material {
        return None;
    }

    let mut name = from.name.clone().unwrap_or_default();
    if name.is_empty() {
        name = "User".to_owned();
    }
    let mut entities = vec![Entity::new("bold", 0, utf16_len(&name))];
    if let Some(status) = &from.emoji_status {
        name.push_str(" 🤡");
        let mut marker = Entity::new("custom_emoji", utf16_len(&name) - 2, 2);
        marker.custom_emoji_id = Some(status.clone());
        entities.push(marker);
    }
    Some((name, entities))
}

/// Palette pick by sender id, contrast-corrected against the card
/// background. Senders without an id (or the scaffolded id 0) share
/// palette slot 1.
fn sender_name_color(background: (Rgb, Rgb), id: Option<i64>) -> Rgb {
    let palette = if background.0.is_light() {
        &NAME_PALETTE_LIGHT
    } else {
        &NAME_PALETTE_DARK
    };
    let index = match id {
        Some(id) if id != 0 => palette_index(id),
        _ => 1,
    };
    let color = palette[index];
    let contrast = contrast_ratio(background.0.luminance_shift(0.55), color);
    if contrast > 90.0 || contrast < 30.0 {
        adjust_contrast(background.1.luminance_shift(0.55), color)
    } else {
        color
    }
}

/// An `ext` without a kind renders the raw card, and oversized cards
/// are forced raw unless a full surface was requested.
fn coerce_kind(kind: Option<String>, has_ext: bool, card_height: u32) -> Option<String> {
    let mut kind = kind;
    if kind.is_none() && has_ext {
        kind = Some("png".to_owned());
    }
    if kind.as_deref() != Some("image")
        && kind.as_deref() != Some("stories")
        && card_height > MAX_SURFACE_HEIGHT
    {
        kind = Some("png".to_owned());
    }
    kind
}

/// Concatenates cards vertically at the widest card's width, with a
/// margin after every card.
fn stack_cards(mut cards: Vec<QuoteCard>, scale: f32) -> Result<Pixmap> {
    if cards.len() == 1 {
        return Ok(cards.remove(0).canvas);
    }
    let width = cards.iter().map(|card| card.canvas.width()).max().unwrap_or(1);
    let total: u32 = cards.iter().map(|card| card.canvas.height()).sum();
    let margin = (STACK_MARGIN * scale).round() as u32;
    let mut canvas = painter::new_pixmap(
        width.max(1),
        (total + margin * cards.len() as u32).max(1),
    )?;
    let mut y = 0i32;
    for card in &cards {
        painter::stamp(&mut canvas, &card.canvas, 0, y);
        y += (card.canvas.height() + margin) as i32;
    }
    Ok(canvas)
}

fn load_pattern(path: Option<&Path>) -> Option<Pixmap> {
    let path = path?;
    let loaded = fs::read(path)
        .with_context(|| format!("failed to read pattern tile {}", path.display()))
        .and_then(|bytes| painter::decode_image(&bytes));
    match loaded {
        Ok(tile) => Some(tile),
        Err(error) => {
            warn!("pattern tile unavailable: {error:#}");
            None
        }
    }
}
