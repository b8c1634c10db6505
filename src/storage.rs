use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{info, warn, error};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object already exists: {0}")]
    Duplicate(String),
    #[error("storage HTTP error: {0}")]
    Http(String),
    #[error("object storage is not configured")]
    NotConfigured,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("upload failed after {attempts} attempts, every key collided (last: {last_key})")]
    AttemptsExhausted { attempts: usize, last_key: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, key: &str, data: Bytes, content_type: &str, upsert: bool) -> Result<(), StorageError>;

    fn public_url(&self, key: &str) -> String;
}

/// Supabase Storage REST API.
pub struct SupabaseStorage {
    client: Client,
    base_url: String,
    service_key: Option<String>,
    bucket: String,
}

impl SupabaseStorage {
    pub fn new(base_url: Option<String>, service_key: Option<String>, bucket: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.unwrap_or_default().trim_end_matches('/').to_string(),
            service_key,
            bucket: bucket.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && self.service_key.is_some()
    }
}

fn is_duplicate(status: StatusCode, body: &str) -> bool {
    let body = body.to_lowercase();
    status == StatusCode::CONFLICT || body.contains("duplicate") || body.contains("already exists")
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn upload(&self, key: &str, data: Bytes, content_type: &str, upsert: bool) -> Result<(), StorageError> {
        let Some(service_key) = self.service_key.as_deref().filter(|_| !self.base_url.is_empty()) else {
            return Err(StorageError::NotConfigured);
        };
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, key);

        let response = self.client
            .post(&url)
            .bearer_auth(service_key)
            .header("apikey", service_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", if upsert { "true" } else { "false" })
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if is_duplicate(status, &body) {
            return Err(StorageError::Duplicate(key.to_string()));
        }
        Err(StorageError::Http(format!("status={} body={}", status, body)))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, self.bucket, key)
    }
}

/// Produces a fresh storage key for a file extension.
pub type KeyGenerator = Arc<dyn Fn(&str) -> String + Send + Sync>;

pub fn random_key(extension: &str) -> String {
    format!("generated/{}.{}", Uuid::new_v4(), extension)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedImage {
    pub key: String,
    pub url: String,
}

pub struct ResultPersister {
    store: Arc<dyn ObjectStore>,
    keys: KeyGenerator,
    max_attempts: usize,
}

impl ResultPersister {
    pub const DEFAULT_ATTEMPTS: usize = 3;

    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store, keys: Arc::new(random_key), max_attempts: Self::DEFAULT_ATTEMPTS }
    }

    pub fn with_key_generator(mut self, keys: KeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    /// Uploads `data` under a random key, drawing a new key on collision.
    pub async fn persist(&self, data: Bytes, provider_mime: Option<&str>) -> Result<PersistedImage, PersistError> {
        let (content_type, extension) = content_type_for(&data, provider_mime);
        let mut key = (self.keys)(&extension);

        for attempt in 1..=self.max_attempts {
            info!("📤 Uploading generated image to {} (attempt {})", key, attempt);
            match self.store.upload(&key, data.clone(), &content_type, false).await {
                Ok(()) => {
                    let url = self.store.public_url(&key);
                    info!("✅ Generated image stored at {}", url);
                    return Ok(PersistedImage { key, url });
                }
                Err(StorageError::Duplicate(_)) if attempt < self.max_attempts => {
                    warn!("⚠️ Storage key {} already exists, retrying with a new key", key);
                    key = (self.keys)(&extension);
                }
                Err(StorageError::Duplicate(_)) => break,
                Err(e) => {
                    error!("❌ Upload of {} failed: {}", key, e);
                    return Err(e.into());
                }
            }
        }
        Err(PersistError::AttemptsExhausted { attempts: self.max_attempts, last_key: key })
    }
}

/// Content type and file extension for generated bytes: sniffed format first, then the
/// provider-reported MIME type, then JPEG.
pub fn content_type_for(data: &[u8], provider_mime: Option<&str>) -> (String, String) {
    if let Ok(format) = image::guess_format(data) {
        let ext = format.extensions_str().first().copied().unwrap_or("bin");
        return (format.to_mime_type().to_string(), ext.to_string());
    }
    match provider_mime {
        Some("image/png") => ("image/png".into(), "png".into()),
        Some("image/webp") => ("image/webp".into(), "webp".into()),
        _ => ("image/jpeg".into(), "jpg".into()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers::{header, method, path}};

    /// Records every upload and replays scripted outcomes (success once the script is empty).
    #[derive(Default)]
    pub(crate) struct FakeStore {
        pub uploads: Mutex<Vec<String>>,
        pub script: Mutex<VecDeque<StorageError>>,
    }

    impl FakeStore {
        pub fn failing_with(errors: Vec<StorageError>) -> Self {
            Self { uploads: Mutex::default(), script: Mutex::new(errors.into()) }
        }
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn upload(&self, key: &str, _data: Bytes, _content_type: &str, upsert: bool) -> Result<(), StorageError> {
            assert!(!upsert, "collisions must surface");
            self.uploads.lock().push(key.to_string());
            match self.script.lock().pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://storage.test/public/{key}")
        }
    }

    fn counting_keys() -> KeyGenerator {
        let n = Arc::new(Mutex::new(0));
        Arc::new(move |ext: &str| {
            let mut n = n.lock();
            *n += 1;
            format!("generated/key-{}.{}", *n, ext)
        })
    }

    #[tokio::test]
    async fn collisions_regenerate_the_key() {
        let store = Arc::new(FakeStore::failing_with(vec![
            StorageError::Duplicate("generated/key-1.jpg".into()),
            StorageError::Duplicate("generated/key-2.jpg".into()),
        ]));
        let persister = ResultPersister::new(store.clone()).with_key_generator(counting_keys());

        let stored = persister.persist(Bytes::from_static(b"not-an-image"), None).await.unwrap();
        assert_eq!(stored.key, "generated/key-3.jpg");
        assert_eq!(stored.url, "https://storage.test/public/generated/key-3.jpg");
        assert_eq!(
            *store.uploads.lock(),
            vec!["generated/key-1.jpg", "generated/key-2.jpg", "generated/key-3.jpg"]
        );
    }

    #[tokio::test]
    async fn gives_up_after_three_collisions() {
        let store = Arc::new(FakeStore::failing_with(
            (0..4).map(|i| StorageError::Duplicate(format!("k{i}"))).collect(),
        ));
        let persister = ResultPersister::new(store.clone()).with_key_generator(counting_keys());

        let err = persister.persist(Bytes::from_static(b"x"), None).await.unwrap_err();
        assert!(matches!(err, PersistError::AttemptsExhausted { attempts: 3, .. }));
        assert_eq!(store.uploads.lock().len(), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let store = Arc::new(FakeStore::failing_with(vec![StorageError::Http("status=500".into())]));
        let persister = ResultPersister::new(store.clone());

        let err = persister.persist(Bytes::from_static(b"x"), None).await.unwrap_err();
        assert!(matches!(err, PersistError::Storage(StorageError::Http(_))));
        assert_eq!(store.uploads.lock().len(), 1);
    }

    #[test]
    fn random_keys_are_distinct() {
        let a = random_key("png");
        let b = random_key("png");
        assert_ne!(a, b);
        assert!(a.starts_with("generated/") && a.ends_with(".png"));
    }

    #[test]
    fn content_type_sniffs_before_trusting_provider() {
        let png = crate::fetcher::tests::PNG_MAGIC;
        assert_eq!(content_type_for(png, Some("image/jpeg")), ("image/png".into(), "png".into()));
        assert_eq!(content_type_for(b"????", Some("image/webp")), ("image/webp".into(), "webp".into()));
        assert_eq!(content_type_for(b"????", None), ("image/jpeg".into(), "jpg".into()));
    }

    #[tokio::test]
    async fn supabase_upload_maps_conflict_to_duplicate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/generated-images/generated/a.png"))
            .and(header("authorization", "Bearer service"))
            .and(header("x-upsert", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Key":"generated-images/generated/a.png"}"#))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/generated-images/generated/b.png"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"Duplicate","message":"The resource already exists"}"#))
            .mount(&server)
            .await;

        let store = SupabaseStorage::new(Some(server.uri()), Some("service".into()), "generated-images");
        store.upload("generated/a.png", Bytes::from_static(b"x"), "image/png", false).await.unwrap();
        assert!(matches!(
            store.upload("generated/b.png", Bytes::from_static(b"x"), "image/png", false).await,
            Err(StorageError::Duplicate(_))
        ));
        assert_eq!(
            store.public_url("generated/a.png"),
            format!("{}/storage/v1/object/public/generated-images/generated/a.png", server.uri())
        );
    }

    #[tokio::test]
    async fn unconfigured_supabase_refuses_upload() {
        let store = SupabaseStorage::new(None, None, "generated-images");
        assert!(!store.is_configured());
        assert!(matches!(
            store.upload("k", Bytes::from_static(b"x"), "image/png", false).await,
            Err(StorageError::NotConfigured)
        ));
    }
}
