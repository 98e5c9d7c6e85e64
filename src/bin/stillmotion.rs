//! Command-line front end: animate one image and write the video to disk.
//!
//! Usage: stillmotion <IMAGE> <PROMPT...> [--out FILE] [--settings FILE]
//!
//! The credential comes from `API_KEY` (or `GEMINI_API_KEY`).

use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use stillmotion_lib::{ErrorKind, Progress, Settings, VideoGenerator};

struct Args {
    image: PathBuf,
    prompt: String,
    out: Option<PathBuf>,
    settings: Option<PathBuf>,
}

impl Args {
    fn parse(args: impl Iterator<Item = String>) -> Result<Self> {
        let mut image = None;
        let mut prompt = Vec::new();
        let mut out = None;
        let mut settings = None;

        let mut args = args;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--out" | "-o" => {
                    out = Some(PathBuf::from(args.next().context("--out needs a value")?));
                }
                "--settings" => {
                    settings = Some(PathBuf::from(
                        args.next().context("--settings needs a value")?,
                    ));
                }
                "--help" | "-h" => bail!("usage: stillmotion <IMAGE> <PROMPT...> [--out FILE] [--settings FILE]"),
                _ if image.is_none() => image = Some(PathBuf::from(arg)),
                _ => prompt.push(arg),
            }
        }

        Ok(Self {
            image: image.ok_or_else(|| anyhow!("missing image path"))?,
            prompt: prompt.join(" "),
            out,
            settings,
        })
    }
}

fn mime_from_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::InvalidInput => 2,
        ErrorKind::Safety => 3,
        ErrorKind::Quota | ErrorKind::TransientExhausted => 4,
        ErrorKind::MalformedResult | ErrorKind::Network | ErrorKind::Unknown => 1,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Log to stderr so stdout carries only the output path
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse(std::env::args().skip(1))?;
    let settings = Settings::load(args.settings.as_deref())?;
    info!(settings = ?settings, "loaded settings");

    let mime_type = mime_from_path(&args.image)
        .ok_or_else(|| anyhow!("unsupported image extension: {}", args.image.display()))?;
    let image = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("failed to read {}", args.image.display()))?;

    let mut generator = VideoGenerator::new(settings);
    generator.set_on_progress(Arc::new(|progress: Progress| match progress {
        Progress::Submitted { operation } => info!(%operation, "submitted"),
        Progress::Polling { checks, done } => info!(checks, done, "still generating..."),
        Progress::Backoff { failures, delay } => {
            info!(failures, delay_ms = delay.as_millis() as u64, "service busy, waiting")
        }
        Progress::Downloading => info!("downloading video"),
        Progress::Completed { bytes } => info!(bytes, "done"),
    }));

    let handle = match generator.generate_video(image, mime_type, &args.prompt).await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("animation failed [{}]: {e}", e.kind);
            eprintln!("{}", e.kind.hint());
            std::process::exit(exit_code(e.kind));
        }
    };

    match args.out {
        Some(out) => {
            tokio::fs::write(&out, handle.raw_data())
                .await
                .with_context(|| format!("failed to write {}", out.display()))?;
            handle.release().await?;
            println!("{}", out.display());
        }
        None => println!("{}", handle.path().display()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args> {
        Args::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn prompt_words_are_joined() {
        let args = parse(&["cat.png", "the", "cat", "yawns", "--out", "cat.mp4"]).unwrap();
        assert_eq!(args.image, PathBuf::from("cat.png"));
        assert_eq!(args.prompt, "the cat yawns");
        assert_eq!(args.out, Some(PathBuf::from("cat.mp4")));
        assert!(args.settings.is_none());
    }

    #[test]
    fn missing_image_is_an_error() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["a.png", "--out"]).is_err());
    }

    #[test]
    fn mime_is_inferred_from_extension() {
        assert_eq!(mime_from_path(Path::new("a/B.JPG")), Some("image/jpeg"));
        assert_eq!(mime_from_path(Path::new("x.webp")), Some("image/webp"));
        assert_eq!(mime_from_path(Path::new("x.bmp")), None);
        assert_eq!(mime_from_path(Path::new("noext")), None);
    }
}
