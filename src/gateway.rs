use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    models::{AiService, FetchedImage, ProviderResult, ProviderStatus},
    prompt::{ImageSet, InputLimit},
};

/// One generative backend. Implementations never fail: missing credentials come back as
/// [`ProviderStatus::Placeholder`] and every other problem as [`ProviderStatus::Error`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn service(&self) -> AiService;

    fn is_configured(&self) -> bool;

    /// Inputs beyond this are not sent. `None` means the adapter takes the whole set.
    fn input_limit(&self) -> Option<InputLimit> {
        None
    }

    /// `images` must already be in placeholder order.
    async fn generate(&self, images: &[FetchedImage], prompt: &str) -> ProviderResult;
}

pub struct ProviderGateway {
    primary: Arc<dyn ProviderAdapter>,
    fallback: Arc<dyn ProviderAdapter>,
}

impl ProviderGateway {
    pub fn new(primary: Arc<dyn ProviderAdapter>, fallback: Arc<dyn ProviderAdapter>) -> Self {
        Self { primary, fallback }
    }

    pub fn adapters(&self) -> [&Arc<dyn ProviderAdapter>; 2] {
        [&self.primary, &self.fallback]
    }

    /// Preferred adapter first, the other one second.
    fn ordered(&self, preferred: AiService) -> (&dyn ProviderAdapter, &dyn ProviderAdapter) {
        if self.fallback.service() == preferred && self.primary.service() != preferred {
            (self.fallback.as_ref(), self.primary.as_ref())
        } else {
            (self.primary.as_ref(), self.fallback.as_ref())
        }
    }

    /// Tries `preferred`, switching to the other adapter only when the first one has no
    /// credential. Errors from a configured adapter are returned as-is.
    ///
    /// The prompt is composed per adapter from the images that adapter actually receives.
    pub async fn generate(
        &self,
        images: &ImageSet,
        compose: &(dyn Fn(&ImageSet) -> String + Sync),
        preferred: AiService,
    ) -> Generation {
        let (first, second) = self.ordered(preferred);

        let generation = Self::attempt(first, images, compose).await;
        if !generation.result.is_placeholder() {
            return generation;
        }

        warn!("⚠️ {} is not configured, falling back to {}", first.service(), second.service());
        let generation = Self::attempt(second, images, compose).await;
        match &generation.result.status {
            ProviderStatus::Placeholder => warn!("⚠️ No AI provider is configured, nothing was generated"),
            ProviderStatus::Completed { .. } => info!("🔄 Fallback {} produced the image", second.service()),
            ProviderStatus::Error(_) => {}
        }
        generation
    }

    async fn attempt(
        adapter: &dyn ProviderAdapter,
        images: &ImageSet,
        compose: &(dyn Fn(&ImageSet) -> String + Sync),
    ) -> Generation {
        let limited = match adapter.input_limit() {
            Some(limit) => {
                let (set, truncated) = images.limited(limit);
                if truncated && adapter.is_configured() {
                    warn!(
                        "⚠️ {} accepts at most {} customer photo(s) and {} garment(s), sending {} of {} images",
                        adapter.service(),
                        limit.customers,
                        limit.products,
                        set.ordered().len(),
                        images.ordered().len()
                    );
                }
                Some(set)
            }
            None => None,
        };
        let set = limited.as_ref().unwrap_or(images);
        let prompt = compose(set);
        let result = adapter.generate(set.ordered(), &prompt).await;
        Generation { result, prompt }
    }
}

/// A provider answer and the prompt that produced it.
#[derive(Debug, Clone)]
pub struct Generation {
    pub result: ProviderResult,
    pub prompt: String,
}
