use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::{info, warn, error};

use crate::{error::GenerationError, models::{FetchedImage, ImageRole}};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")] Http(String),
    #[error("status {0}")] Status(u16),
    #[error("empty response body")] Empty,
}

#[derive(Debug, Clone)]
pub struct Download {
    pub data: Bytes,
    pub content_type: Option<String>,
}

/// Where image bytes come from. The HTTP implementation is the only production one.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn download(&self, url: &str) -> Result<Download, DownloadError>;
}

pub struct HttpImageSource {
    client: Client,
}

impl HttpImageSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn download(&self, url: &str) -> Result<Download, DownloadError> {
        let response = self.client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        let data = response.bytes().await.map_err(|e| DownloadError::Http(e.to_string()))?;
        if data.is_empty() {
            return Err(DownloadError::Empty);
        }
        Ok(Download { data, content_type })
    }
}

/// Canonicalizes an image URL: trims it, requires an http(s) scheme and drops the
/// query string and fragment. Returns `None` for anything unusable.
pub fn clean_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return None;
    }
    let end = trimmed.find(['?', '#']).unwrap_or(trimmed.len());
    let cleaned = &trimmed[..end];
    Url::parse(cleaned).ok()?;
    Some(cleaned.to_string())
}

/// Picks a MIME type for downloaded bytes: an `image/*` header wins, then magic-byte sniffing.
pub fn detect_mime(data: &[u8], header: Option<&str>) -> String {
    if let Some(ct) = header.filter(|ct| ct.starts_with("image/")) {
        return ct.to_string();
    }
    image::guess_format(data)
        .map(|f| f.to_mime_type().to_string())
        .unwrap_or_else(|_| "image/jpeg".to_string())
}

pub struct AssetFetcher {
    source: Arc<dyn ImageSource>,
}

impl AssetFetcher {
    pub fn new(source: Arc<dyn ImageSource>) -> Self {
        Self { source }
    }

    /// Downloads every cleaned URL in order. Any single failure aborts the whole set.
    /// Returned images carry role-local 1-based indices and their request positions.
    pub async fn fetch_all(&self, urls: &[SourceUrl], role: ImageRole) -> Result<Vec<FetchedImage>, GenerationError> {
        info!("📥 Downloading {} {}(s)", urls.len(), role);
        let mut images = Vec::with_capacity(urls.len());
        for (i, source) in urls.iter().enumerate() {
            let download = self.source.download(&source.url).await.map_err(|e| {
                error!("❌ Failed to download {} {}: {}", role, source.url, e);
                GenerationError::Fetch { role: role.to_string(), url: source.url.clone(), reason: e.to_string() }
            })?;
            info!("✅ Downloaded {} {} ({} bytes)", role, source.url, download.data.len());
            images.push(FetchedImage {
                role,
                index: i + 1,
                position: source.position,
                mime_type: detect_mime(&download.data, download.content_type.as_deref()),
                source_url: source.url.clone(),
                data: download.data,
            });
        }
        Ok(images)
    }
}

/// A cleaned URL and where it sat in the request list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl {
    pub position: usize,
    pub url: String,
}

/// Validates the list for `role` without touching the network.
pub fn clean_urls(urls: &[String], role: ImageRole) -> Result<Vec<SourceUrl>, GenerationError> {
    let max = role.max_count();
    if urls.is_empty() {
        return Err(GenerationError::Validation(format!("at least one {role} is required")));
    }
    if urls.len() > max {
        return Err(GenerationError::Validation(format!("at most {max} {role}s are allowed, got {}", urls.len())));
    }

    let cleaned: Vec<SourceUrl> = urls
        .iter()
        .enumerate()
        .filter_map(|(position, raw)| match clean_url(raw) {
            Some(url) => Some(SourceUrl { position, url }),
            None => {
                warn!("⚠️ Dropping invalid {} URL: {:?}", role, raw);
                None
            }
        })
        .collect();

    if cleaned.is_empty() {
        return Err(GenerationError::Validation(format!("no valid {role} URL left after cleaning")));
    }
    Ok(cleaned)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers::{method, path}};

    pub(crate) const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    /// Serves fixed bytes for every URL, optionally failing for URLs containing a marker.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub calls: Mutex<Vec<String>>,
        pub fail_on: Option<String>,
    }

    #[async_trait]
    impl ImageSource for FakeSource {
        async fn download(&self, url: &str) -> Result<Download, DownloadError> {
            self.calls.lock().push(url.to_string());
            if self.fail_on.as_deref().is_some_and(|m| url.contains(m)) {
                return Err(DownloadError::Status(404));
            }
            Ok(Download { data: Bytes::from(format!("bytes:{url}")), content_type: Some("image/jpeg".into()) })
        }
    }

    #[test]
    fn clean_url_strips_query_and_is_idempotent() {
        let base = "https://cdn.example.com/photos/a.jpg";
        assert_eq!(clean_url(&format!("{base}?x=1")), Some(base.to_string()));
        assert_eq!(clean_url(&format!("{base}?x=1")), clean_url(base));
        assert_eq!(clean_url(&format!("  {base}#frag ")), Some(base.to_string()));
        let once = clean_url(&format!("{base}?token=abc&v=2")).unwrap();
        assert_eq!(clean_url(&once), Some(once.clone()));
    }

    #[test]
    fn clean_url_rejects_non_http_values() {
        assert_eq!(clean_url(""), None);
        assert_eq!(clean_url("   "), None);
        assert_eq!(clean_url("ftp://example.com/a.jpg"), None);
        assert_eq!(clean_url("/relative/a.jpg"), None);
        assert_eq!(clean_url("https://"), None);
    }

    #[test]
    fn clean_urls_enforces_role_bounds() {
        let four: Vec<String> = (0..4).map(|i| format!("https://x.test/{i}.jpg")).collect();
        assert!(matches!(clean_urls(&four, ImageRole::Customer), Err(GenerationError::Validation(_))));
        assert_eq!(clean_urls(&four, ImageRole::Product).unwrap().len(), 4);

        let eleven: Vec<String> = (0..11).map(|i| format!("https://x.test/{i}.jpg")).collect();
        assert!(matches!(clean_urls(&eleven, ImageRole::Product), Err(GenerationError::Validation(_))));
        assert!(matches!(clean_urls(&[], ImageRole::Product), Err(GenerationError::Validation(_))));
    }

    #[test]
    fn clean_urls_drops_invalid_but_fails_when_nothing_is_left() {
        let urls = vec!["".to_string(), "https://x.test/ok.jpg?v=3".to_string(), "nope".to_string()];
        assert_eq!(
            clean_urls(&urls, ImageRole::Customer).unwrap(),
            vec![SourceUrl { position: 1, url: "https://x.test/ok.jpg".to_string() }]
        );

        let urls = vec!["".to_string(), "data:image/png;base64,AAAA".to_string()];
        assert!(matches!(clean_urls(&urls, ImageRole::Customer), Err(GenerationError::Validation(_))));
    }

    #[tokio::test]
    async fn fetch_all_preserves_order_and_indices() {
        let source = Arc::new(FakeSource::default());
        let fetcher = AssetFetcher::new(source.clone());
        let urls = vec!["https://x.test/b.jpg".to_string(), "https://x.test/a.jpg?s=1".to_string()];

        let cleaned = clean_urls(&urls, ImageRole::Product).unwrap();
        let images = fetcher.fetch_all(&cleaned, ImageRole::Product).await.unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].source_url, "https://x.test/b.jpg");
        assert_eq!(images[1].source_url, "https://x.test/a.jpg");
        assert_eq!(images.iter().map(|i| i.index).collect::<Vec<_>>(), vec![1, 2]);
        assert!(images.iter().all(|i| i.role == ImageRole::Product));
        assert_eq!(source.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn fetch_all_keeps_request_positions_after_dropped_urls() {
        let fetcher = AssetFetcher::new(Arc::new(FakeSource::default()));
        let urls = vec![
            "not-a-url".to_string(),
            "https://x.test/jacket.jpg".to_string(),
            "".to_string(),
            "https://x.test/pants.jpg".to_string(),
        ];

        let cleaned = clean_urls(&urls, ImageRole::Product).unwrap();
        let images = fetcher.fetch_all(&cleaned, ImageRole::Product).await.unwrap();
        let got: Vec<(usize, usize)> = images.iter().map(|i| (i.index, i.position)).collect();
        assert_eq!(got, vec![(1, 1), (2, 3)]);
    }

    #[tokio::test]
    async fn fetch_all_aborts_on_first_failure() {
        let source = Arc::new(FakeSource { fail_on: Some("broken".into()), ..Default::default() });
        let fetcher = AssetFetcher::new(source.clone());
        let urls = vec![
            "https://x.test/1.jpg".to_string(),
            "https://x.test/broken.jpg".to_string(),
            "https://x.test/3.jpg".to_string(),
        ];

        let cleaned = clean_urls(&urls, ImageRole::Product).unwrap();
        let err = fetcher.fetch_all(&cleaned, ImageRole::Product).await.unwrap_err();
        match err {
            GenerationError::Fetch { url, .. } => assert_eq!(url, "https://x.test/broken.jpg"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(source.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn http_source_downloads_and_rejects_bad_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/ok.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_MAGIC.to_vec()))
            .mount(&server).await;
        Mock::given(method("GET")).and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server).await;
        Mock::given(method("GET")).and(path("/empty.png"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server).await;

        let source = HttpImageSource::new(Duration::from_secs(5)).unwrap();
        let ok = source.download(&format!("{}/ok.png", server.uri())).await.unwrap();
        assert_eq!(ok.data.as_ref(), PNG_MAGIC);
        assert_eq!(detect_mime(&ok.data, ok.content_type.as_deref()), "image/png");

        assert!(matches!(
            source.download(&format!("{}/missing.png", server.uri())).await,
            Err(DownloadError::Status(404))
        ));
        assert!(matches!(
            source.download(&format!("{}/empty.png", server.uri())).await,
            Err(DownloadError::Empty)
        ));
    }

    #[test]
    fn detect_mime_prefers_image_header() {
        assert_eq!(detect_mime(PNG_MAGIC, Some("image/webp")), "image/webp");
        assert_eq!(detect_mime(PNG_MAGIC, Some("application/octet-stream")), "image/png");
        assert_eq!(detect_mime(b"????", None), "image/jpeg");
    }
}
