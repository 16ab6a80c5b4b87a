use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{self, Command, Stdio};

const FONTS_DIR: &str = "assets/fonts";

/// Conventional stack names mapped to freely licensed families.
const FONT_SOURCES: &[(&str, &str)] = &[
    (
        "regular.ttf",
        "https://github.com/googlefonts/opensans/raw/main/fonts/ttf/OpenSans-Regular.ttf",
    ),
    (
        "bold.ttf",
        "https://github.com/googlefonts/opensans/raw/main/fonts/ttf/OpenSans-Bold.ttf",
    ),
    (
        "italic.ttf",
        "https://github.com/googlefonts/opensans/raw/main/fonts/ttf/OpenSans-Italic.ttf",
    ),
    (
        "bold-italic.ttf",
        "https://github.com/googlefonts/opensans/raw/main/fonts/ttf/OpenSans-BoldItalic.ttf",
    ),
    (
        "monospace.ttf",
        "https://github.com/JetBrains/JetBrainsMono/raw/master/fonts/ttf/JetBrainsMono-Regular.ttf",
    ),
];

fn main() {
    if let Err(error) = run() {
        eprintln!("xtask: {error}");
        process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "fonts-fetch" => {
            let mut force = false;
            for arg in args {
                match arg.as_str() {
                    "--force" => force = true,
                    "--help" | "-h" => {
                        print_fonts_fetch_help();
                        return Ok(());
                    }
                    other => {
                        return Err(format!(
                            "unknown argument '{other}' for 'fonts-fetch' (try: cargo xtask fonts-fetch --help)"
                        ));
                    }
                }
            }
            fonts_fetch(force)
        }
        "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => Err(format!(
            "unknown xtask command '{other}' (try: cargo xtask --help)"
        )),
    }
}

fn fonts_fetch(force: bool) -> Result<(), String> {
    ensure_curl_available()?;

    let fonts_dir = repo_root()?.join(FONTS_DIR);
    fs::create_dir_all(&fonts_dir).map_err(|error| {
        format!(
            "failed to create fonts directory {}: {error}",
            fonts_dir.display()
        )
    })?;

    for (name, url) in FONT_SOURCES {
        let target = fonts_dir.join(name);
        if target.is_file() && !force {
            println!("{name}: already present, skipping (use --force to refetch)");
            continue;
        }
        download(url, &target)?;
        let size = fs::metadata(&target)
            .map_err(|error| format!("failed to stat {}: {error}", target.display()))?
            .len();
        if size == 0 {
            let _ = fs::remove_file(&target);
            return Err(format!("download of {name} from {url} produced an empty file"));
        }
        println!("{name}: fetched {size} bytes");
    }

    println!("Fonts ready in {}", fonts_dir.display());
    Ok(())
}

fn download(url: &str, target: &Path) -> Result<(), String> {
    let status = Command::new("curl")
        .arg("-fsSL")
        .arg("-o")
        .arg(target)
        .arg(url)
        .status()
        .map_err(|error| format!("failed to run curl: {error}"))?;

    if !status.success() {
        return Err(format!(
            "curl failed (exit status {:?}) while fetching {url}",
            status.code()
        ));
    }
    Ok(())
}

fn ensure_curl_available() -> Result<(), String> {
    let status = Command::new("curl")
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(format!(
            "curl check failed ('curl --version' exited with {:?})",
            status.code()
        )),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            Err("curl not found on PATH; install curl first".to_owned())
        }
        Err(error) => Err(format!("failed to run 'curl --version': {error}")),
    }
}

fn repo_root() -> Result<PathBuf, String> {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir.parent().map(Path::to_path_buf).ok_or_else(|| {
        format!(
            "failed to resolve repository root from {}",
            manifest_dir.display()
        )
    })
}

fn print_usage() {
    println!("Usage:");
    println!("  cargo xtask fonts-fetch [--force]");
}

fn print_fonts_fetch_help() {
    println!("Fetch the font stack into assets/fonts/.");
    println!();
    print_usage();
    println!();
    println!("Options:");
    println!("  --force   Refetch files that are already present");
}
