//! Wire shapes for the generate API: inbound parameters in the chat-API
//! dialect (camelCase keys, UTF-16 entities, loose optionality) and the
//! outbound result. Inbound messages are normalized once, up front, so
//! the rest of the pipeline never re-checks for absent senders.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize, Serializer};

use crate::styled::Entity;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenerateParams {
    pub messages: Vec<Message>,
    #[serde(alias = "botToken")]
    pub bot_token: Option<String>,
    #[serde(alias = "backgroundColor")]
    pub background_color: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub scale: Option<f32>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub format: Option<String>,
    pub ext: Option<String>,
    #[serde(alias = "emojiBrand")]
    pub emoji_brand: Option<String>,
}

impl GenerateParams {
    /// Fills defaults and scaffolds every message in one pass: scale 2
    /// (capped at 20), 512 canvas fallback, senders always present with
    /// an id, display names joined from name parts.
    pub fn normalized(mut self) -> Self {
        let scale = self.scale.unwrap_or(0.0);
        self.scale = Some(if scale <= 0.0 { 2.0 } else { scale.min(20.0) });
        self.width = Some(self.width.filter(|w| *w > 0).unwrap_or(512));
        self.height = Some(self.height.filter(|h| *h > 0).unwrap_or(512));
        for message in &mut self.messages {
            message.normalize();
        }
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Message {
    pub from: Option<User>,
    pub text: Option<String>,
    pub entities: Vec<Entity>,
    pub avatar: bool,
    pub media: Option<MediaRef>,
    #[serde(alias = "mediaType")]
    pub media_type: Option<String>,
    #[serde(alias = "mediaCrop")]
    pub media_crop: bool,
    #[serde(alias = "replyMessage")]
    pub reply_message: Option<ReplyRef>,
}

impl Message {
    fn normalize(&mut self) {
        let from = self.from.get_or_insert_with(User::default);
        if from.id.is_none() {
            from.id = Some(0);
        }
        if from.photo.is_none() {
            from.photo = Some(UserPhoto::default());
        }
        if from.name.as_deref().is_none_or(str::is_empty) {
            let joined = [from.first_name.as_deref(), from.last_name.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            let joined = joined.trim();
            if !joined.is_empty() {
                from.name = Some(joined.to_owned());
            }
        }
        if let Some(reply) = &mut self.reply_message {
            if reply.chat_id.is_none() {
                reply.chat_id = from.id;
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: Option<i64>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub name: Option<String>,
    pub title: Option<String>,
    pub username: Option<String>,
    pub photo: Option<UserPhoto>,
    pub emoji_status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserPhoto {
    pub url: Option<String>,
    pub big_file_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReplyRef {
    pub name: Option<String>,
    pub text: Option<String>,
    pub entities: Vec<Entity>,
    #[serde(alias = "chatId")]
    pub chat_id: Option<i64>,
}

impl ReplyRef {
    /// Only a reply carrying both a name and a text renders.
    pub fn is_renderable(&self) -> bool {
        self.name.as_deref().is_some_and(|name| !name.is_empty())
            && self.text.as_deref().is_some_and(|text| !text.is_empty())
    }
}

/// Media arrives as a bare file id, a single descriptor, or an album of
/// either (photo size arrays).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MediaRef {
    Single(MediaEntry),
    Album(Vec<MediaEntry>),
}

impl MediaRef {
    /// Which entry renders: albums of more than one pick the second
    /// size when cropping, otherwise the last (largest); everything
    /// else uses the sole entry.
    pub fn select(&self, crop: bool) -> Option<&MediaEntry> {
        match self {
            MediaRef::Single(entry) => Some(entry),
            MediaRef::Album(entries) if entries.len() > 1 => {
                if crop {
                    entries.get(1)
                } else {
                    entries.last()
                }
            }
            MediaRef::Album(entries) => entries.first(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MediaEntry {
    FileId(String),
    Item(MediaItem),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MediaItem {
    pub url: Option<String>,
    pub file_id: Option<String>,
    pub is_animated: bool,
}

impl MediaEntry {
    pub fn url(&self) -> Option<&str> {
        match self {
            MediaEntry::Item(item) => item.url.as_deref(),
            MediaEntry::FileId(_) => None,
        }
    }

    pub fn file_id(&self) -> Option<&str> {
        match self {
            MediaEntry::FileId(id) => Some(id),
            MediaEntry::Item(item) => item.file_id.as_deref(),
        }
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, MediaEntry::Item(item) if item.is_animated)
    }
}

/// Finished render. `image` is binary when an `ext` was requested and
/// base64 otherwise, mirroring how the payload is returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub image: ImagePayload,
    #[serde(rename = "type")]
    pub kind: String,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    pub is_animated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImagePayload {
    Binary(Vec<u8>),
    Base64(String),
}

impl ImagePayload {
    pub fn len(&self) -> usize {
        match self {
            ImagePayload::Binary(bytes) => bytes.len(),
            ImagePayload::Base64(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for ImagePayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ImagePayload::Base64(text) => serializer.serialize_str(text),
            ImagePayload::Binary(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> GenerateParams {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn defaults_fill_in_one_pass() {
        let params = parse("{}").normalized();
        assert_eq!(params.scale, Some(2.0));
        assert_eq!(params.width, Some(512));
        assert_eq!(params.height, Some(512));
        assert!(params.messages.is_empty());
    }

    #[test]
    fn scale_is_capped_and_zero_means_default() {
        assert_eq!(parse(r#"{"scale": 50}"#).normalized().scale, Some(20.0));
        assert_eq!(parse(r#"{"scale": 0}"#).normalized().scale, Some(2.0));
        assert_eq!(parse(r#"{"scale": 3}"#).normalized().scale, Some(3.0));
    }

    #[test]
    fn bare_messages_get_a_scaffolded_sender() {
        let params = parse(r#"{"messages": [{"text": "hi"}]}"#).normalized();
        let from = params.messages[0].from.as_ref().unwrap();
        assert_eq!(from.id, Some(0));
        assert!(from.photo.is_some());
        assert!(from.name.is_none());
    }

    #[test]
    fn display_name_joins_name_parts() {
        let raw = r#"{"messages": [{"from": {"first_name": "Ada", "last_name": "Lovelace"}}]}"#;
        let params = parse(raw).normalized();
        let from = params.messages[0].from.as_ref().unwrap();
        assert_eq!(from.name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn reply_inherits_the_sender_chat_id() {
        let raw = r#"{"messages": [{
            "from": {"id": 42},
            "replyMessage": {"name": "Bob", "text": "hey"}
        }]}"#;
        let params = parse(raw).normalized();
        let reply = params.messages[0].reply_message.as_ref().unwrap();
        assert_eq!(reply.chat_id, Some(42));
        assert!(reply.is_renderable());
    }

    #[test]
    fn empty_reply_is_not_renderable() {
        let raw = r#"{"messages": [{"replyMessage": {"name": "Bob"}}]}"#;
        let params = parse(raw).normalized();
        assert!(!params.messages[0].reply_message.as_ref().unwrap().is_renderable());
    }

    #[test]
    fn media_accepts_every_wire_form() {
        let by_id = parse(r#"{"messages": [{"media": "AgACAgIAAx"}]}"#);
        let entry = by_id.messages[0].media.as_ref().unwrap().select(false).unwrap();
        assert_eq!(entry.file_id(), Some("AgACAgIAAx"));

        let by_url = parse(r#"{"messages": [{"media": {"url": "https://x/y.png"}}]}"#);
        let entry = by_url.messages[0].media.as_ref().unwrap().select(false).unwrap();
        assert_eq!(entry.url(), Some("https://x/y.png"));
        assert!(!entry.is_animated());

        let album = parse(
            r#"{"messages": [{"media": [
                {"file_id": "small"}, {"file_id": "mid"}, {"file_id": "big"}
            ]}]}"#,
        );
        let media = album.messages[0].media.as_ref().unwrap();
        assert_eq!(media.select(false).unwrap().file_id(), Some("big"));
        assert_eq!(media.select(true).unwrap().file_id(), Some("mid"));
    }

    #[test]
    fn camel_case_aliases_parse() {
        let raw = r#"{
            "botToken": "123:abc",
            "backgroundColor": "//#FF0000",
            "emojiBrand": "google",
            "messages": [{"mediaCrop": true, "mediaType": "sticker"}]
        }"#;
        let params = parse(raw);
        assert_eq!(params.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(params.background_color.as_deref(), Some("//#FF0000"));
        assert_eq!(params.emoji_brand.as_deref(), Some("google"));
        assert!(params.messages[0].media_crop);
        assert_eq!(params.messages[0].media_type.as_deref(), Some("sticker"));
    }

    #[test]
    fn result_serializes_in_the_wire_dialect() {
        let result = GenerationResult {
            image: ImagePayload::Binary(vec![1, 2, 3]),
            kind: "quote".to_owned(),
            width: 10,
            height: 20,
            ext: None,
            is_animated: false,
            duration_ms: None,
            fps: None,
            codec: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["type"], "quote");
        assert_eq!(value["isAnimated"], false);
        assert_eq!(value["image"], "AQID");
        assert!(value.get("durationMs").is_none());
        assert!(value.get("ext").is_none());
    }
}
