use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tempfile::NamedTempFile;
use tracing::info;

use crate::archive::{ArchiveOptions, Archiver, ThreadData};
use crate::bsky::{self, ClientConfig};
use crate::config::{self, Config};
use crate::markdown::{self, Format, MediaMode, RenderOptions};
use crate::media::{self, HttpFetcher};

#[derive(Debug, Parser)]
#[command(
    name = "bsky-archiver",
    version,
    about = "Archive a Bluesky thread as Markdown, optionally bundled with its images."
)]
pub struct Cli {
    /// Post URL, e.g. https://bsky.app/profile/alice.bsky.social/post/3kabc
    pub url: String,

    /// How images and link cards are included.
    #[arg(long, value_enum)]
    pub media: Option<MediaMode>,

    /// Plain Markdown, or front matter with timestamps and counts.
    #[arg(long, value_enum)]
    pub format: Option<Format>,

    /// Write `<handle>-<rkey>.md` (or `.zip` in download mode) into this
    /// directory instead of printing to stdout.
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Also copy the Markdown to the clipboard.
    #[arg(long)]
    pub copy: bool,

    /// Remember --media and --format for later runs.
    #[arg(long)]
    pub save_prefs: bool,

    /// Config file to read (and to update with --save-prefs).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Subtrees fetched concurrently while healing truncated replies.
    #[arg(long)]
    pub workers: Option<usize>,
}

pub fn run(cli: Cli) -> Result<()> {
    if cli.url.trim().is_empty() {
        bail!("Please enter a Bluesky post URL.");
    }

    let cfg = config::load(config::LoadOptions {
        config_file: cli.config.clone(),
        env_prefix: None,
    })
    .context("load config")?;

    let preferences = RenderOptions {
        media: cli.media.unwrap_or(cfg.preferences.media),
        format: cli.format.unwrap_or(cfg.preferences.format),
    };
    if cli.save_prefs {
        let path = config::save_preferences(cli.config.clone(), preferences)?;
        info!(path = %path.display(), "saved preferences");
    }

    let data = fetch_thread(&cfg, &cli)?;
    let markdown = write_output(&cfg, &cli, &data, &preferences)?;

    if cli.copy {
        let mut clipboard = arboard::Clipboard::new().context("open clipboard")?;
        clipboard
            .set_text(markdown)
            .context("copy markdown to clipboard")?;
        eprintln!("Copied!");
    }
    Ok(())
}

fn fetch_thread(cfg: &Config, cli: &Cli) -> Result<ThreadData> {
    let client = bsky::Client::new(ClientConfig {
        base_url: cfg.api.base_url.clone(),
        user_agent: cfg.api.user_agent.clone(),
        timeout: cfg.api.request_timeout,
        http_client: None,
    })?;
    let archiver = Archiver::new(
        client,
        ArchiveOptions {
            workers: cli.workers.unwrap_or(cfg.archive.workers).max(1),
            timeout: cfg.archive_timeout(),
        },
    );
    Ok(archiver.archive_thread(&cli.url)?)
}

/// Render and emit the thread; returns the Markdown for the clipboard.
fn write_output(
    cfg: &Config,
    cli: &Cli,
    data: &ThreadData,
    preferences: &RenderOptions,
) -> Result<String> {
    let base = media::base_name(data);

    if preferences.media == MediaMode::Download {
        let images = media::collect_images(&data.posts);
        let image_map = media::build_image_map(&images);
        let markdown = markdown::render(data, preferences, Some(&image_map));

        let dir = cli.output.clone().unwrap_or_else(|| PathBuf::from("."));
        let path = prepare(&dir, &format!("{base}.zip"))?;
        let fetcher = HttpFetcher::new(&cfg.api.user_agent, cfg.api.request_timeout)?;
        write_atomically(&path, |writer| {
            media::write_archive_zip(
                writer,
                &markdown,
                &base,
                &images,
                &fetcher,
                cfg.archive.download_workers,
            )
        })?;
        println!("{}", path.display());
        return Ok(markdown);
    }

    let markdown = markdown::render(data, preferences, None);
    match cli.output.as_ref() {
        Some(dir) => {
            let path = prepare(dir, &format!("{base}.md"))?;
            fs::write(&path, &markdown)
                .with_context(|| format!("write markdown {}", path.display()))?;
            println!("{}", path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{markdown}").context("write markdown to stdout")?;
        }
    }
    Ok(markdown)
}

/// Write through a temp file next to `path`; `path` only appears once the
/// writer has finished.
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(BufWriter<NamedTempFile>) -> Result<BufWriter<NamedTempFile>>,
{
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    let temp = write(BufWriter::new(temp))?
        .into_inner()
        .map_err(|err| err.into_error())
        .with_context(|| format!("write archive {}", path.display()))?;
    temp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("save archive {}", path.display()))?;
    Ok(())
}

fn prepare(dir: &Path, filename: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("create output directory {}", dir.display()))?;
    Ok(dir.join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let cli = Cli::try_parse_from([
            "bsky-archiver",
            "https://bsky.app/profile/a.test/post/1",
            "--media",
            "download",
            "--format",
            "minimal",
            "-o",
            "out",
            "--workers",
            "8",
            "--save-prefs",
        ])
        .unwrap();
        assert_eq!(cli.media, Some(MediaMode::Download));
        assert_eq!(cli.format, Some(Format::Minimal));
        assert_eq!(cli.output, Some(PathBuf::from("out")));
        assert_eq!(cli.workers, Some(8));
        assert!(cli.save_prefs);
        assert!(!cli.copy);
    }

    #[test]
    fn rejects_unknown_media_mode() {
        assert!(Cli::try_parse_from(["bsky-archiver", "u", "--media", "embed"]).is_err());
    }

    #[test]
    fn failed_archive_leaves_no_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice.test-abc123.zip");
        let err = write_atomically(&path, |mut writer| {
            writer.write_all(b"PK partial").unwrap();
            anyhow::bail!("zip: write entry image_1.png")
        })
        .unwrap_err();
        assert!(err.to_string().contains("image_1.png"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn finished_archive_is_moved_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice.test-abc123.zip");
        write_atomically(&path, |mut writer| {
            writer.write_all(b"PK done")?;
            Ok(writer)
        })
        .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"PK done");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn empty_url_is_rejected_before_loading_anything() {
        let cli = Cli::try_parse_from(["bsky-archiver", "  "]).unwrap();
        let err = run(cli).unwrap_err();
        assert_eq!(err.to_string(), "Please enter a Bluesky post URL.");
    }
}
