use std::collections::HashMap;
use std::io::{Seek, Write};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::unbounded;
use reqwest::blocking::Client;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::archive::ThreadData;
use crate::post_url::parse_post_url;
use crate::thread::Post;

/// Remote image URL → path relative to the Markdown file.
pub type ImageMap = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub url: String,
    pub filename: String,
}

/// Every image in post order, numbered `image_1`, `image_2`, ….
pub fn collect_images(posts: &[Post]) -> Vec<ImageRef> {
    posts
        .iter()
        .filter_map(|post| post.embed.as_ref())
        .flat_map(|embed| embed.images())
        .filter_map(|image| image.url())
        .enumerate()
        .map(|(index, url)| ImageRef {
            url: url.to_string(),
            filename: format!("image_{}{}", index + 1, guess_extension(url)),
        })
        .collect()
}

/// Extension from a CDN URL. The Bluesky CDN names the format after an `@`
/// (`…/cid@png`); plain file extensions work too. Anything else is JPEG.
pub fn guess_extension(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    let format = last
        .rsplit_once('@')
        .or_else(|| last.rsplit_once('.'))
        .map(|(_, format)| format.to_ascii_lowercase());
    match format.as_deref() {
        Some("png") => ".png",
        Some("gif") => ".gif",
        Some("webp") => ".webp",
        _ => ".jpg",
    }
}

pub fn build_image_map(images: &[ImageRef]) -> ImageMap {
    images
        .iter()
        .map(|image| (image.url.clone(), format!("./images/{}", image.filename)))
        .collect()
}

/// File stem for the archive: `{handle}-{rkey}`, restricted to characters
/// that are safe in file names everywhere. The rkey is the requested post's,
/// so a deleted root still gets a distinct name.
pub fn base_name(data: &ThreadData) -> String {
    let rkey = parse_post_url(&data.url)
        .ok()
        .map(|post_ref| post_ref.rkey)
        .or_else(|| data.root_rkey().map(str::to_string));
    let raw = match rkey {
        Some(rkey) => format!("{}-{}", data.handle, rkey),
        None => data.handle.clone(),
    };
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "thread".to_string()
    } else {
        cleaned
    }
}

pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("media: build http client")?;
        Ok(Self { client })
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().context("media: download")?;
        if !response.status().is_success() {
            return Err(anyhow!("media: request failed: HTTP {}", response.status()));
        }
        Ok(response.bytes().context("media: body")?.to_vec())
    }
}

/// Download every image with at most `workers` requests in flight. Failed
/// downloads come back as `None`; results keep the input order.
pub fn download_all(
    images: &[ImageRef],
    fetcher: &dyn ImageFetcher,
    workers: usize,
) -> Vec<Option<Vec<u8>>> {
    let (job_tx, job_rx) = unbounded::<(usize, &ImageRef)>();
    let (done_tx, done_rx) = unbounded();
    for job in images.iter().enumerate() {
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    thread::scope(|scope| {
        for _ in 0..workers.clamp(1, images.len().max(1)) {
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            scope.spawn(move || {
                for (index, image) in jobs.iter() {
                    let bytes = match fetcher.fetch(&image.url) {
                        Ok(bytes) => {
                            debug!(url = %image.url, size = bytes.len(), "downloaded image");
                            Some(bytes)
                        }
                        Err(err) => {
                            warn!(url = %image.url, "Failed to download image: {err:#}");
                            None
                        }
                    };
                    let _ = done.send((index, bytes));
                }
            });
        }
    });
    drop(done_tx);

    let mut results = vec![None; images.len()];
    for (index, bytes) in done_rx.iter() {
        results[index] = bytes;
    }
    results
}

/// Write `{base}.md` plus an `images/` folder into a zip. Images that fail to
/// download are left out; the archive is still produced.
pub fn write_archive_zip<W: Write + Seek>(
    writer: W,
    markdown: &str,
    base: &str,
    images: &[ImageRef],
    fetcher: &dyn ImageFetcher,
    workers: usize,
) -> Result<W> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(writer);

    zip.start_file(format!("{base}.md"), options)
        .context("zip: start markdown entry")?;
    zip.write_all(markdown.as_bytes())
        .context("zip: write markdown")?;

    if !images.is_empty() {
        zip.add_directory("images/", options)
            .context("zip: add images directory")?;
        let downloaded = download_all(images, fetcher, workers);
        for (image, bytes) in images.iter().zip(downloaded) {
            let Some(bytes) = bytes else { continue };
            zip.start_file(format!("images/{}", image.filename), options)
                .with_context(|| format!("zip: start entry {}", image.filename))?;
            zip.write_all(&bytes)
                .with_context(|| format!("zip: write entry {}", image.filename))?;
        }
    }

    zip.finish().context("zip: finish archive")
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use super::*;
    use crate::thread::fixtures::post;
    use crate::thread::{Embed, ExternalView, ImageView};

    fn image(full: &str, thumb: &str) -> ImageView {
        ImageView {
            thumb: thumb.into(),
            fullsize: full.into(),
            alt: String::new(),
        }
    }

    fn posts() -> Vec<Post> {
        let mut first = post("at://did:plc:a/app.bsky.feed.post/1", "did:plc:a", 0);
        first.embed = Some(Embed::Images {
            images: vec![
                image("https://cdn.test/full/one@jpeg", ""),
                image("", "https://cdn.test/thumb/two@png"),
                image("", ""),
            ],
        });
        let mut second = post("at://did:plc:a/app.bsky.feed.post/2", "did:plc:a", 0);
        second.embed = Some(Embed::External {
            external: ExternalView {
                uri: "https://example.com".into(),
                ..ExternalView::default()
            },
        });
        let mut third = post("at://did:plc:a/app.bsky.feed.post/3", "did:plc:a", 0);
        third.embed = Some(Embed::RecordWithMedia {
            media: Box::new(Embed::Images {
                images: vec![image("https://cdn.test/full/three@gif", "")],
            }),
        });
        vec![first, second, third]
    }

    struct FakeFetcher;

    impl ImageFetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            if url.contains("two") {
                return Err(anyhow!("HTTP 404"));
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    #[test]
    fn collects_images_in_post_order() {
        let images = collect_images(&posts());
        assert_eq!(
            images,
            vec![
                ImageRef {
                    url: "https://cdn.test/full/one@jpeg".into(),
                    filename: "image_1.jpg".into(),
                },
                ImageRef {
                    url: "https://cdn.test/thumb/two@png".into(),
                    filename: "image_2.png".into(),
                },
                ImageRef {
                    url: "https://cdn.test/full/three@gif".into(),
                    filename: "image_3.gif".into(),
                },
            ]
        );

        let map = build_image_map(&images);
        assert_eq!(map["https://cdn.test/thumb/two@png"], "./images/image_2.png");
    }

    #[test]
    fn guesses_extensions() {
        assert_eq!(guess_extension("https://x/a.PNG"), ".png");
        assert_eq!(guess_extension("https://x/a@webp"), ".webp");
        assert_eq!(guess_extension("https://x/a"), ".jpg");
        assert_eq!(
            guess_extension("https://cdn.bsky.app/img/feed_fullsize/plain/did:plc:gifpng/bafkgif@jpeg"),
            ".jpg"
        );
        assert_eq!(guess_extension("https://x/a.gif?width=10"), ".gif");
    }

    #[test]
    fn base_name_is_file_safe() {
        let data = ThreadData {
            handle: "alice.test".into(),
            url: String::new(),
            posts: posts(),
        };
        assert_eq!(base_name(&data), "alice.test-1");

        let odd = ThreadData {
            handle: "a/b c".into(),
            url: String::new(),
            posts: vec![],
        };
        assert_eq!(base_name(&odd), "a_b_c");
    }

    #[test]
    fn base_name_uses_requested_rkey() {
        let deleted_root = ThreadData {
            handle: "alice.test".into(),
            url: "https://bsky.app/profile/alice.test/post/3kabc".into(),
            posts: vec![],
        };
        assert_eq!(base_name(&deleted_root), "alice.test-3kabc");

        let mid_thread = ThreadData {
            handle: "alice.test".into(),
            url: "https://bsky.app/profile/alice.test/post/7".into(),
            posts: posts(),
        };
        assert_eq!(base_name(&mid_thread), "alice.test-7");
    }

    #[test]
    fn download_failures_are_skipped_in_order() {
        let images = collect_images(&posts());
        let results = download_all(&images, &FakeFetcher, 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_deref(), Some(images[0].url.as_bytes()));
        assert!(results[1].is_none());
        assert_eq!(results[2].as_deref(), Some(images[2].url.as_bytes()));
        assert!(download_all(&[], &FakeFetcher, 4).is_empty());
    }

    #[test]
    fn zip_contains_markdown_and_images() {
        let images = collect_images(&posts());
        let cursor = write_archive_zip(
            Cursor::new(Vec::new()),
            "# Thread",
            "alice.test-1",
            &images,
            &FakeFetcher,
            2,
        )
        .unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "alice.test-1.md",
                "images/",
                "images/image_1.jpg",
                "images/image_3.gif",
            ]
        );

        let mut markdown = String::new();
        archive
            .by_name("alice.test-1.md")
            .unwrap()
            .read_to_string(&mut markdown)
            .unwrap();
        assert_eq!(markdown, "# Thread");
    }
}
