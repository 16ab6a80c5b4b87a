//! Remote sources: a general byte fetcher (http(s), `file://` and plain
//! paths) and the chat bot API client used for file links, chat photos
//! and custom emoji stickers. Everything network-facing lives behind
//! these two types so the render stages stay transport-free.

use std::fs;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;

const BOT_API_BASE: &str = "https://api.telegram.org";

pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(concat!("qcr/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .context("failed to create HTTP client")
}

/// Fetches raw bytes from a URL or the local filesystem. Local reads
/// exist for staged test fixtures and pre-downloaded media.
#[derive(Debug, Clone)]
pub struct Fetcher {
    http: Client,
}

impl Fetcher {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    pub async fn fetch_bytes(&self, source: &str) -> Result<Vec<u8>> {
        match Url::parse(source) {
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|()| anyhow!("invalid file url {source}"))?;
                fs::read(&path)
                    .with_context(|| format!("failed to read file {}", path.display()))
            }
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                let bytes = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("failed to fetch {source}"))?
                    .error_for_status()
                    .with_context(|| format!("fetch returned an error status for {source}"))?
                    .bytes()
                    .await
                    .with_context(|| format!("failed to read bytes from {source}"))?;
                Ok(bytes.to_vec())
            }
            // Bare paths parse as relative URLs and land here.
            _ => fs::read(source).with_context(|| format!("failed to read file {source}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatPhoto {
    #[serde(default)]
    pub big_file_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatInfo {
    #[serde(default)]
    pub photo: Option<ChatPhoto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StickerThumb {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StickerInfo {
    #[serde(default)]
    pub custom_emoji_id: Option<String>,
    /// Bot API 6.6 renamed `thumb` to `thumbnail`; accept both.
    #[serde(default, alias = "thumbnail")]
    pub thumb: Option<StickerThumb>,
}

/// Minimal bot API client. Only the three calls the renderer needs.
#[derive(Debug, Clone)]
pub struct BotApi {
    http: Client,
    token: String,
    base: String,
}

impl BotApi {
    pub fn new(http: Client, token: String) -> Self {
        Self::with_base(http, token, BOT_API_BASE.to_owned())
    }

    /// Alternate base for self-hosted bot API servers.
    pub fn with_base(http: Client, token: String, base: String) -> Self {
        Self { http, token, base }
    }

    async fn call<T>(&self, method: &str, body: &serde_json::Value) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response: ApiResponse<T> = self
            .http
            .post(format!("{}/bot{}/{method}", self.base, self.token))
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to call bot API method {method}"))?
            .error_for_status()
            .with_context(|| format!("bot API method {method} returned an error status"))?
            .json()
            .await
            .with_context(|| format!("failed to decode bot API response for {method}"))?;
        if !response.ok {
            bail!(
                "bot API method {method} failed: {}",
                response.description.unwrap_or_else(|| "unknown error".to_owned())
            );
        }
        response
            .result
            .ok_or_else(|| anyhow!("bot API method {method} returned no result"))
    }

    /// Resolves a `file_id` to a direct download URL.
    pub async fn file_url(&self, file_id: &str) -> Result<String> {
        let file: FileInfo = self.call("getFile", &json!({ "file_id": file_id })).await?;
        let path = file
            .file_path
            .ok_or_else(|| anyhow!("getFile returned no file_path for {file_id}"))?;
        Ok(file_download_url(&self.base, &self.token, &path))
    }

    pub async fn chat_photo_file_id(&self, chat_id: i64) -> Result<Option<String>> {
        let chat: ChatInfo = self.call("getChat", &json!({ "chat_id": chat_id })).await?;
        Ok(chat.photo.and_then(|photo| photo.big_file_id))
    }

    pub async fn custom_emoji_stickers(&self, ids: &[String]) -> Result<Vec<StickerInfo>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.call(
            "getCustomEmojiStickers",
            &json!({ "custom_emoji_ids": ids }),
        )
        .await
    }
}

fn file_download_url(base: &str, token: &str, file_path: &str) -> String {
    format!("{base}/file/bot{token}/{file_path}")
}

/// Public userpic mirror used when the bot API has no photo on record.
pub fn userpic_fallback_url(username: &str) -> String {
    format!("https://telega.one/i/userpic/320/{username}.jpg")
}
