use std::env;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use qcr::colors::{background_pair, Rgb};
use qcr::compositor;
use qcr::config;
use qcr::errors::{
    self, CodedError, CODE_FFMPEG_UNAVAILABLE, CODE_FONTS_UNAVAILABLE, CODE_MESSAGES_EMPTY,
    CODE_PARAMS_INVALID, CODE_TEMP_UNWRITABLE,
};
use qcr::fonts::FontStack;
use qcr::params::{GenerateParams, GenerationResult, ImagePayload};
use qcr::probe;
use qcr::service::QuoteService;

#[derive(Debug, Parser)]
#[command(name = "qcr")]
#[command(about = "Quote Card Renderer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render a parameter object into a quote image or clip.
    Render {
        /// Parameter JSON file, or `-` for stdin.
        params: PathBuf,
        /// Write binary output here; the extension picks png/webp/webm.
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        #[arg(long = "config")]
        config: Option<PathBuf>,
        #[arg(long = "method", default_value = "generate")]
        method: String,
    },
    /// Parse and normalize parameters without rendering.
    Check {
        params: PathBuf,
    },
    /// Verify ffmpeg, ffprobe, fonts, and the temp directory.
    Doctor,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("QCR_LOG", "info")).init();

    let cli = Cli::parse();
    let sub = match &cli.command {
        Commands::Render { .. } => "render",
        Commands::Check { .. } => "check",
        Commands::Doctor => "doctor",
    };
    let outcome = match cli.command {
        Commands::Render {
            params,
            output,
            config,
            method,
        } => run_render(&params, output.as_deref(), config.as_deref(), &method).await,
        Commands::Check { params } => run_check(&params),
        Commands::Doctor => run_doctor(),
    };
    if let Err(error) = outcome {
        std::process::exit(report(sub, &error));
    }
}

/// Prints the failure (prose, or an error envelope when
/// `QCR_AGENT_MODE=1`) and returns the exit code for it.
fn report(sub: &str, error: &anyhow::Error) -> i32 {
    let coded = errors::find_coded_error(error);
    if agent_mode() {
        let envelope = match coded {
            Some(coded) => coded.envelope(),
            None => CodedError::io("internal", format!("{error:#}")).envelope(),
        };
        if let Ok(text) = serde_json::to_string(&envelope) {
            eprintln!("{text}");
        }
    } else {
        eprintln!("qcr {sub}: {error:#}");
    }
    coded.map(|coded| coded.kind.exit_code()).unwrap_or(1)
}

fn agent_mode() -> bool {
    env::var("QCR_AGENT_MODE").map(|value| value == "1").unwrap_or(false)
}

async fn run_render(
    params_path: &Path,
    output: Option<&Path>,
    config_path: Option<&Path>,
    method: &str,
) -> Result<()> {
    let mut raw = read_params(params_path)?;
    if let Some(out) = output {
        if let Some(ext) = out.extension().and_then(|ext| ext.to_str()) {
            let ext = ext.to_ascii_lowercase();
            if let Some(map) = raw.as_object_mut() {
                if ext == "png" {
                    map.insert("format".to_owned(), json!("png"));
                }
                map.insert("ext".to_owned(), json!(ext));
            }
        }
    }

    let config = config::load(config_path)?;
    let service = QuoteService::new(config)?;
    let result = service.run(method, &raw).await?;

    match output {
        Some(out) => {
            let GenerationResult {
                image,
                width,
                height,
                kind,
                ..
            } = result;
            let bytes = match image {
                ImagePayload::Binary(bytes) => bytes,
                ImagePayload::Base64(text) => STANDARD
                    .decode(text)
                    .context("failed to decode the rendered payload")?,
            };
            fs::write(out, &bytes).with_context(|| format!("failed to write {}", out.display()))?;
            println!("Wrote {} ({}x{} {kind})", out.display(), width, height);
        }
        None => {
            let envelope = json!({ "ok": true, "result": result });
            println!("{envelope}");
        }
    }
    Ok(())
}

fn run_check(params_path: &Path) -> Result<()> {
    let raw = read_params(params_path)?;
    let params: GenerateParams = serde_json::from_value(raw).map_err(|error| {
        anyhow::Error::new(CodedError::validation(
            CODE_PARAMS_INVALID,
            format!("parameters did not parse: {error}"),
        ))
    })?;
    let params = params.normalized();
    if params.messages.is_empty() {
        return Err(anyhow::Error::new(CodedError::usage(
            CODE_MESSAGES_EMPTY,
            "messages must contain at least one entry",
        )));
    }
    let background = background_pair(params.background_color.as_deref().unwrap_or(""))
        .map_err(|error| {
            anyhow::Error::new(CodedError::validation(
                CODE_PARAMS_INVALID,
                format!("backgroundColor: {error:#}"),
            ))
        })?;

    let mut kinds: Vec<&str> = params
        .messages
        .iter()
        .filter(|message| message.media.is_some())
        .map(|message| message.media_type.as_deref().unwrap_or("photo"))
        .collect();
    kinds.sort_unstable();
    kinds.dedup();
    let media = if kinds.is_empty() {
        "none".to_owned()
    } else {
        kinds.join(", ")
    };
    println!(
        "OK: {} message(s), media [{media}], background {}/{}",
        params.messages.len(),
        hex(background.0),
        hex(background.1)
    );
    Ok(())
}

fn run_doctor() -> Result<()> {
    println!(
        "qcr {} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("QCR_GIT_HASH").unwrap_or("unknown")
    );
    let config = config::load(None)?;

    let ffmpeg = compositor::ffmpeg_binary();
    check_tool(&ffmpeg, "ffmpeg")?;
    println!("ffmpeg: OK ({})", ffmpeg.display());

    let ffprobe = probe::ffprobe_binary();
    check_tool(&ffprobe, "ffprobe")?;
    println!("ffprobe: OK ({})", ffprobe.display());

    FontStack::load(&config.fonts_dir).map_err(|error| {
        anyhow::Error::new(CodedError::dependency(
            CODE_FONTS_UNAVAILABLE,
            format!(
                "fonts failed to load from {}: {error:#}",
                config.fonts_dir.display()
            ),
        ))
    })?;
    println!("fonts: OK ({})", config.fonts_dir.display());

    let marker = config.temp_dir.join(".doctor");
    fs::create_dir_all(&config.temp_dir)
        .and_then(|_| fs::write(&marker, b"ok"))
        .and_then(|_| fs::remove_file(&marker))
        .map_err(|error| {
            anyhow::Error::new(CodedError::io(
                CODE_TEMP_UNWRITABLE,
                format!("temp dir {} is not writable: {error}", config.temp_dir.display()),
            ))
        })?;
    println!("temp: OK ({})", config.temp_dir.display());
    Ok(())
}

fn check_tool(binary: &Path, name: &str) -> Result<()> {
    let output = Command::new(binary).arg("-version").output().map_err(|error| {
        anyhow::Error::new(CodedError::dependency(
            CODE_FFMPEG_UNAVAILABLE,
            format!("{name} is not runnable at {}: {error}", binary.display()),
        ))
    })?;
    if !output.status.success() {
        return Err(anyhow::Error::new(CodedError::dependency(
            CODE_FFMPEG_UNAVAILABLE,
            format!("{name} -version exited with {}", output.status),
        )));
    }
    Ok(())
}

fn read_params(path: &Path) -> Result<Value> {
    let text = if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read parameters from stdin")?;
        buffer
    } else {
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
    };
    serde_json::from_str(&text).map_err(|error| {
        anyhow::Error::new(CodedError::validation(
            CODE_PARAMS_INVALID,
            format!("parameters are not valid JSON: {error}"),
        ))
    })
}

fn hex(color: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", color.r, color.g, color.b)
}
