use std::path::Path;

use serde_json::{json, Value};
use tempfile::tempdir;

use qcr::config::QcrConfig;
use qcr::errors::{self, CODE_MESSAGES_EMPTY, CODE_QUERY_EMPTY};
use qcr::params::ImagePayload;
use qcr::service::QuoteService;

/// Tests in this file need real font files; they skip silently until
/// `cargo xtask fonts-fetch` has populated assets/fonts.
fn service_with_repo_fonts(temp_dir: &Path) -> Option<QuoteService> {
    let fonts_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/fonts");
    if !fonts_dir.join("regular.ttf").is_file() {
        return None;
    }
    let mut config = QcrConfig::default();
    config.fonts_dir = fonts_dir;
    config.temp_dir = temp_dir.to_path_buf();
    Some(QuoteService::new(config).expect("service should build"))
}

#[tokio::test]
async fn quote_surface_renders_a_text_message_offline() {
    let dir = tempdir().expect("tempdir should create");
    let Some(service) = service_with_repo_fonts(dir.path()) else {
        return;
    };

    let params = json!({
        "type": "quote",
        "backgroundColor": "//#292232",
        "messages": [
            {"from": {"id": 42, "name": "Ada"}, "text": "hello world", "avatar": true}
        ]
    });
    let result = service
        .run("generate", &params)
        .await
        .expect("render should succeed");

    assert_eq!(result.kind, "quote");
    assert!(!result.is_animated);
    assert!(result.width > 0 && result.height > 0);
    assert!(matches!(&result.image, ImagePayload::Base64(text) if !text.is_empty()));
}

#[tokio::test]
async fn webm_method_forces_the_animated_shape() {
    let dir = tempdir().expect("tempdir should create");
    let Some(service) = service_with_repo_fonts(dir.path()) else {
        return;
    };

    let params = json!({
        "messages": [{"from": {"id": 1, "name": "Ada"}, "text": "hi"}]
    });
    let result = service
        .run("generate.webm", &params)
        .await
        .expect("render should succeed");

    assert_eq!(result.kind, "animated");
    assert_eq!(result.ext.as_deref(), Some("webm"));
    // No animated media in the request, so the static fallback runs.
    assert!(!result.is_animated);
    assert!(matches!(&result.image, ImagePayload::Binary(bytes) if !bytes.is_empty()));
}

#[tokio::test]
async fn stories_surface_uses_the_standard_canvas() {
    let dir = tempdir().expect("tempdir should create");
    let Some(service) = service_with_repo_fonts(dir.path()) else {
        return;
    };

    let params = json!({
        "type": "stories",
        "messages": [{"from": {"id": 9, "name": "Grace"}, "text": "story time"}]
    });
    let result = service
        .run("generate", &params)
        .await
        .expect("render should succeed");

    assert_eq!(result.kind, "stories");
    assert_eq!((result.width, result.height), (720, 1280));
}

#[tokio::test]
async fn volatile_params_share_a_cache_entry() {
    let dir = tempdir().expect("tempdir should create");
    let Some(service) = service_with_repo_fonts(dir.path()) else {
        return;
    };

    let message = json!({"from": {"id": 5, "name": "Ada"}, "text": "cache me"});
    let first = service
        .run("generate", &json!({"messages": [message.clone()], "timestamp": 1}))
        .await
        .expect("first render should succeed");
    let second = service
        .run("generate", &json!({"messages": [message], "timestamp": 2}))
        .await
        .expect("second render should succeed");

    // The timestamp is volatile, so the second call is the cached first.
    assert_eq!(first, second);
}

#[tokio::test]
async fn local_file_media_extends_the_card() {
    let dir = tempdir().expect("tempdir should create");
    let Some(service) = service_with_repo_fonts(dir.path()) else {
        return;
    };

    let media_path = dir.path().join("tile.png");
    let mut tile = image::RgbaImage::new(8, 6);
    for pixel in tile.pixels_mut() {
        *pixel = image::Rgba([200, 40, 40, 255]);
    }
    tile.save_with_format(&media_path, image::ImageFormat::Png)
        .expect("tile should save");
    let url = format!("file://{}", media_path.display());

    let bare = service
        .run(
            "generate",
            &json!({"messages": [{"from": {"id": 3, "name": "Ada"}, "text": "pic"}]}),
        )
        .await
        .expect("bare render should succeed");
    let with_media = service
        .run(
            "generate",
            &json!({
                "messages": [
                    {"from": {"id": 3, "name": "Ada"}, "text": "pic", "media": {"url": url}}
                ]
            }),
        )
        .await
        .expect("media render should succeed");

    assert!(
        with_media.height > bare.height,
        "media rows should extend the card ({} vs {})",
        with_media.height,
        bare.height
    );
}

#[tokio::test]
async fn empty_messages_is_a_usage_error() {
    let dir = tempdir().expect("tempdir should create");
    let Some(service) = service_with_repo_fonts(dir.path()) else {
        return;
    };

    let error = service
        .run("generate", &json!({"messages": []}))
        .await
        .expect_err("empty messages must fail");
    let coded = errors::find_coded_error(&error).expect("coded error in the chain");
    assert_eq!(coded.code, CODE_MESSAGES_EMPTY);
    assert_eq!(coded.kind.exit_code(), 2);
}

#[tokio::test]
async fn null_params_are_rejected_before_parsing() {
    let dir = tempdir().expect("tempdir should create");
    let Some(service) = service_with_repo_fonts(dir.path()) else {
        return;
    };

    let error = service
        .run("generate", &Value::Null)
        .await
        .expect_err("null params must fail");
    let coded = errors::find_coded_error(&error).expect("coded error in the chain");
    assert_eq!(coded.code, CODE_QUERY_EMPTY);
}
