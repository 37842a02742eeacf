//! Archive telegraph pages referenced in messages: images become data URIs,
//! stylesheets become content-addressed local files shared across pages,
//! tracking scripts are stripped. A message is marked archived only when
//! every referenced page succeeded.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use base64::Engine;
use md5::{Digest, Md5};
use regex::Regex;
use tracing::{error, info, warn};

use crate::store::Store;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const MESSAGES_PER_CHANNEL: usize = 10;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap())
}

fn telegraph_url_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    regex(&P, r#"https?://telegra\.ph/[^\s"<>]+"#)
}

/// Page URLs from the entity JSON and the message text.
pub fn extract_telegraph_urls(entities_json: Option<&str>, message_text: Option<&str>) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    let mut push = |url: String| {
        if !urls.contains(&url) {
            urls.push(url);
        }
    };

    if let Some(json) = entities_json {
        if let Ok(entities) = serde_json::from_str::<Vec<serde_json::Value>>(json) {
            for entity in entities {
                if let Some(url) = entity.get("url").and_then(|u| u.as_str()) {
                    if url.contains("telegra.ph") {
                        push(url.to_string());
                    }
                }
            }
        }
    }
    if let Some(text) = message_text {
        for m in telegraph_url_pattern().find_iter(text) {
            push(m.as_str().to_string());
        }
    }
    urls
}

fn resolve(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") || href.starts_with("data:") {
        href.to_string()
    } else if href.starts_with("//") {
        format!("https:{href}")
    } else if let Some(rest) = href.strip_prefix('/') {
        let origin: String = base_url
            .splitn(4, '/')
            .take(3)
            .collect::<Vec<_>>()
            .join("/");
        format!("{origin}/{rest}")
    } else {
        let trimmed = base_url.rsplit_once('/').map(|(head, _)| head).unwrap_or(base_url);
        format!("{trimmed}/{href}")
    }
}

fn page_slug(url: &str) -> String {
    let path = url
        .splitn(4, '/')
        .nth(3)
        .unwrap_or("")
        .trim_matches('/')
        .replace('/', "_");
    if path.is_empty() { "index".to_string() } else { path }
}

async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Option<(Vec<u8>, String)> {
    let resp = client
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .ok()?
        .error_for_status()
        .ok()?;
    let content_type = resp
        .headers()
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("image/jpeg")
        .to_string();
    let bytes = resp.bytes().await.ok()?;
    Some((bytes.to_vec(), content_type))
}

/// Image as a base64 data URI.
async fn download_and_embed_image(client: &reqwest::Client, img_url: &str) -> Option<String> {
    let (bytes, content_type) = match fetch_bytes(client, img_url).await {
        Some(r) => r,
        None => {
            warn!("    failed to download image {img_url}");
            return None;
        }
    };
    let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
    Some(format!("data:{content_type};base64,{b64}"))
}

/// Download a stylesheet, embed its url() resources, save it under a
/// content-hash name so identical sheets are shared. Returns the filename.
async fn get_or_download_css(
    client: &reqwest::Client,
    css_url: &str,
    css_dir: &Path,
) -> Option<String> {
    let (bytes, _) = match fetch_bytes(client, css_url).await {
        Some(r) => r,
        None => {
            warn!("    failed to download CSS {css_url}");
            return None;
        }
    };
    let mut css = String::from_utf8_lossy(&bytes).to_string();

    static CSS_URL: OnceLock<Regex> = OnceLock::new();
    let css_url_pattern = regex(&CSS_URL, r#"url\(["']?([^)"']+)["']?\)"#);
    let resources: Vec<String> = css_url_pattern
        .captures_iter(&css)
        .map(|c| c[1].to_string())
        .filter(|u| !u.starts_with("data:"))
        .collect();
    for resource in resources {
        let full = resolve(css_url, &resource);
        if let Some(embedded) = download_and_embed_image(client, &full).await {
            css = css.replace(&resource, &embedded);
        }
    }

    let digest = hex::encode(Md5::digest(css.as_bytes()));
    let filename = format!("{}.css", &digest[..12]);
    let css_path = css_dir.join(&filename);
    if !css_path.exists() {
        std::fs::create_dir_all(css_dir).ok()?;
        std::fs::write(&css_path, &css).ok()?;
        info!("    saved new CSS: {filename}");
    } else {
        info!("    reusing existing CSS: {filename}");
    }
    Some(filename)
}

/// Archive one page into `output_dir`.
pub async fn download_telegraph_page(
    client: &reqwest::Client,
    url: &str,
    output_dir: &Path,
    css_dir: &Path,
) -> bool {
    let Some((bytes, _)) = fetch_bytes(client, url).await else {
        error!("    failed to download {url}");
        return false;
    };
    let mut html = String::from_utf8_lossy(&bytes).to_string();

    // Tracking / sync scripts go first.
    static SCRIPT_SRC: OnceLock<Regex> = OnceLock::new();
    static SCRIPT_INLINE: OnceLock<Regex> = OnceLock::new();
    html = regex(
        &SCRIPT_SRC,
        r#"(?i)<script[^>]*src=["'][^"']*t\.me/_websync_[^"']*["'][^>]*>\s*</script>"#,
    )
    .replace_all(&html, "")
    .to_string();
    html = regex(
        &SCRIPT_INLINE,
        r#"(?is)<script[^>]*>[^<]*t\.me/_websync_[^<]*</script>"#,
    )
    .replace_all(&html, "")
    .to_string();

    // Stylesheets become shared local files.
    static CSS_LINK: OnceLock<Regex> = OnceLock::new();
    let css_pattern = regex(
        &CSS_LINK,
        r#"(?i)<link[^>]+href=["']([^"']+\.css[^"']*)["'][^>]*>"#,
    );
    let links: Vec<(String, String)> = css_pattern
        .captures_iter(&html)
        .map(|c| (c[0].to_string(), c[1].to_string()))
        .collect();
    for (tag, href) in links {
        let css_url = resolve(url, &href);
        if let Some(filename) = get_or_download_css(client, &css_url, css_dir).await {
            let replacement =
                format!("<link rel=\"stylesheet\" href=\"/telegraph/css/{filename}\">");
            html = html.replace(&tag, &replacement);
        }
    }

    // Images become data URIs.
    static IMG_SRC: OnceLock<Regex> = OnceLock::new();
    let img_pattern = regex(&IMG_SRC, r#"(?i)<img[^>]+src=["']([^"']+)["']"#);
    let srcs: Vec<String> = img_pattern
        .captures_iter(&html)
        .map(|c| c[1].to_string())
        .filter(|s| !s.starts_with("data:"))
        .collect();
    for src in srcs {
        let img_url = resolve(url, &src);
        if let Some(embedded) = download_and_embed_image(client, &img_url).await {
            html = html.replace(&format!("src=\"{src}\""), &format!("src=\"{embedded}\""));
            html = html.replace(&format!("src='{src}'"), &format!("src=\"{embedded}\""));
        }
    }

    // Background images in style attributes.
    static STYLE_BG: OnceLock<Regex> = OnceLock::new();
    let bg_pattern = regex(
        &STYLE_BG,
        r#"(?i)style=["'][^"']*background[^:]*:\s*url\(["']?([^)"']+)["']?\)"#,
    );
    let bgs: Vec<String> = bg_pattern
        .captures_iter(&html)
        .map(|c| c[1].to_string())
        .filter(|s| !s.starts_with("data:"))
        .collect();
    for bg in bgs {
        let bg_url = resolve(url, &bg);
        if let Some(embedded) = download_and_embed_image(client, &bg_url).await {
            html = html.replace(&bg, &embedded);
        }
    }

    if std::fs::create_dir_all(output_dir).is_err() {
        return false;
    }
    let output_file = output_dir.join(format!("{}.html", page_slug(url)));
    match std::fs::write(&output_file, html) {
        Ok(()) => {
            info!("    saved: {}", output_file.display());
            true
        }
        Err(e) => {
            error!("    failed to save {}: {e}", output_file.display());
            false
        }
    }
}

pub async fn run(store: &Store, telegraph_dir: &Path) -> anyhow::Result<()> {
    info!("starting telegraph download...");
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()?;
    let css_dir = telegraph_dir.join("css");

    let mut downloaded = 0usize;
    let mut failed = 0usize;

    for channel_id in store.all_message_table_channel_ids() {
        let messages = store.messages_with_telegraph_links(channel_id, MESSAGES_PER_CHANNEL);
        if messages.is_empty() {
            continue;
        }
        info!(
            "channel {channel_id}: {} messages with telegraph links",
            messages.len()
        );

        for (message_id, message, entities) in messages {
            let urls = extract_telegraph_urls(entities.as_deref(), message.as_deref());
            if urls.is_empty() {
                // LIKE matched something that is not a page link.
                store.mark_html_downloaded(channel_id, message_id).ok();
                continue;
            }

            let output_dir = telegraph_dir.join(channel_id.to_string());
            let mut all_success = true;
            for url in &urls {
                info!("  downloading: {url}");
                if download_telegraph_page(&client, url, &output_dir, &css_dir).await {
                    downloaded += 1;
                } else {
                    all_success = false;
                    failed += 1;
                }
            }
            if all_success {
                store.mark_html_downloaded(channel_id, message_id).ok();
            }
        }
    }

    info!("telegraph download completed: {downloaded} pages downloaded, {failed} failed");
    Ok(())
}
