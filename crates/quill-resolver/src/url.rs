//! Web page previews: title and media type of a linked URL.

use std::sync::LazyLock;

use futures::future::join_all;
use regex::Regex;
use reqwest::{Client, Response, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::{
  ResolveError,
  cache::{Fetcher, Loaded},
  http::check_status,
};

/// Only the head of a document is inspected for its title.
const MAX_HTML_BYTES: usize = 256 * 1024;

static OG_TITLE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    r#"(?is)<meta\s[^>]*property\s*=\s*["']og:title["'][^>]*content\s*=\s*["']([^"']*)["']"#,
  )
  .expect("valid og:title pattern")
});

static TITLE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebpageInfo {
  pub url:        String,
  pub title:      Option<String>,
  pub media_type: String,
}

/// Pull a human title out of an HTML document, preferring `og:title`.
pub fn extract_title(html: &str) -> Option<String> {
  let raw = OG_TITLE
    .captures(html)
    .or_else(|| TITLE.captures(html))
    .and_then(|c| c.get(1))?
    .as_str();
  let title = decode_entities(raw.split_whitespace().collect::<Vec<_>>().join(" ").as_str());
  (!title.is_empty()).then_some(title)
}

fn decode_entities(s: &str) -> String {
  s.replace("&quot;", "\"")
    .replace("&#39;", "'")
    .replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&amp;", "&")
}

#[derive(Clone)]
pub struct UrlFetcher {
  client: Client,
}

impl UrlFetcher {
  pub fn new(client: Client) -> Self { Self { client } }

  async fn preview(&self, url: &str) -> Loaded<WebpageInfo> {
    let Some(resp) = check_status(self.client.get(url).send().await?)? else {
      return Ok(None);
    };
    let media_type = resp
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.split(';').next())
      .map(|v| v.trim().to_ascii_lowercase())
      .unwrap_or_else(|| "application/octet-stream".into());

    let title = if media_type == "text/html" {
      let head = read_head(resp).await.map_err(ResolveError::from)?;
      extract_title(&String::from_utf8_lossy(&head))
    } else {
      None
    };

    Ok(Some(WebpageInfo { url: url.to_owned(), title, media_type }))
  }
}

/// The first [`MAX_HTML_BYTES`] of the body. The rest is never read.
async fn read_head(mut resp: Response) -> Result<Vec<u8>, reqwest::Error> {
  let mut head = Vec::new();
  while let Some(chunk) = resp.chunk().await? {
    let room = MAX_HTML_BYTES - head.len();
    head.extend_from_slice(&chunk[..chunk.len().min(room)]);
    if head.len() == MAX_HTML_BYTES {
      break;
    }
  }
  Ok(head)
}

impl Fetcher for UrlFetcher {
  type Key = String;
  type Value = WebpageInfo;

  fn name(&self) -> &'static str { "url" }

  async fn fetch_many(&self, keys: Vec<String>) -> Vec<Loaded<WebpageInfo>> {
    join_all(keys.iter().map(|url| self.preview(url))).await
  }
}
