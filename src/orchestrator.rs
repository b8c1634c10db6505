use std::time::Duration;

use chrono::Utc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn, error};
use uuid::Uuid;

use crate::{
    error::GenerationError,
    fetcher::{self, AssetFetcher, SourceUrl},
    gateway::{Generation, ProviderGateway},
    models::{
        AiService, GeneratedImageRecord, GenerationOutcome, GenerationRequest, ImageRole, ProviderStatus,
        ScenarioDescriptor, MAX_CUSTOMER_PHOTOS, MAX_PRODUCT_IMAGES, MAX_SCENARIOS,
    },
    prompt::{ImageSet, ProductLabels, PromptComposer},
    storage::ResultPersister,
};

/// Entry point of the generation pipeline: fetch once, then compose, generate and
/// persist once per scenario.
pub struct GenerationOrchestrator {
    fetcher: AssetFetcher,
    gateway: ProviderGateway,
    persister: ResultPersister,
    default_service: AiService,
    deadline: Option<Duration>,
}

impl GenerationOrchestrator {
    pub fn new(fetcher: AssetFetcher, gateway: ProviderGateway, persister: ResultPersister, default_service: AiService) -> Self {
        Self { fetcher, gateway, persister, default_service, deadline: None }
    }

    /// Caps the wall-clock time of a whole `generate` call.
    pub fn with_deadline(mut self, budget: Option<Duration>) -> Self {
        self.deadline = budget;
        self
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    pub fn default_service(&self) -> AiService {
        self.default_service
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutcome, GenerationError> {
        let urls = validate(request)?;
        let deadline = self.deadline.map(|budget| Instant::now() + budget);

        let fetch = async {
            let customers = self.fetcher.fetch_all(&urls.customers, ImageRole::Customer).await?;
            let products = self.fetcher.fetch_all(&urls.products, ImageRole::Product).await?;
            Ok::<_, GenerationError>(ImageSet::new(customers, products))
        };
        let images = match deadline {
            Some(at) => timeout_at(at, fetch).await.map_err(|_| GenerationError::DeadlineExceeded("image download"))??,
            None => fetch.await?,
        };

        for img in images.ordered() {
            debug!("{} = {} {}", img.placeholder(), img.role, img.source_url);
        }

        let scenarios: Vec<Option<&ScenarioDescriptor>> = if request.scenarios.is_empty() {
            vec![None]
        } else {
            if request.scenarios.len() > MAX_SCENARIOS {
                warn!(
                    "⚠️ {} scenarios requested, only the first {} will be generated",
                    request.scenarios.len(),
                    MAX_SCENARIOS
                );
            }
            request.scenarios.iter().take(MAX_SCENARIOS).map(Some).collect()
        };

        let labels = ProductLabels::new(
            request.product_names.as_deref(),
            request.product_categories.as_deref(),
            request.product_styles.as_deref(),
        );
        let preferred = request.ai_service.unwrap_or(self.default_service);
        let mut outcome = GenerationOutcome::default();
        let total = scenarios.len();

        for (i, scenario) in scenarios.into_iter().enumerate() {
            let n = i + 1;
            let label = scenario.and_then(ScenarioDescriptor::label);
            let tag = match &label {
                Some(l) => format!("scenario {n} ({l})"),
                None => format!("scenario {n}"),
            };
            info!("🎯 Generating {} of {} with {}", tag, total, preferred);

            let attempt = self.generate_one(request, &images, scenario, &labels, preferred, label);
            let result = match deadline {
                Some(at) => match timeout_at(at, attempt).await {
                    Ok(result) => result,
                    Err(_) => {
                        error!("❌ Deadline exceeded during {}, skipping the remaining scenarios", tag);
                        outcome.errors.push(format!("{tag}: deadline exceeded"));
                        outcome.errors.extend((n + 1..=total).map(|k| format!("scenario {k}: skipped, deadline exceeded")));
                        break;
                    }
                },
                None => attempt.await,
            };

            match result {
                Ok(record) => {
                    info!("✅ {} stored at {}", tag, record.image_url);
                    outcome.images.push(record);
                }
                Err(reason) => {
                    error!("❌ {} failed: {}", tag, reason);
                    outcome.errors.push(format!("{tag}: {reason}"));
                }
            }
        }

        if outcome.images.is_empty() {
            return Err(GenerationError::AggregateFailure { errors: outcome.errors });
        }
        info!("Generated {} image(s), {} failure(s)", outcome.images.len(), outcome.errors.len());
        Ok(outcome)
    }

    async fn generate_one(
        &self,
        request: &GenerationRequest,
        images: &ImageSet,
        scenario: Option<&ScenarioDescriptor>,
        labels: &ProductLabels,
        preferred: AiService,
        label: Option<String>,
    ) -> Result<GeneratedImageRecord, String> {
        let compose = |set: &ImageSet| PromptComposer::compose(set, scenario, labels, request.prompt_override.as_deref());
        let Generation { result, prompt } = self.gateway.generate(images, &compose, preferred).await;
        let service = result.ai_service;

        let (image, mime_type) = match result.status {
            ProviderStatus::Completed { image, mime_type } => (image, mime_type),
            ProviderStatus::Placeholder => {
                return Err("no AI provider is configured (placeholder result, no image generated)".to_string());
            }
            ProviderStatus::Error(failure) => {
                let mut reason = format!("{} failed ({:?}): {}", service, failure.kind, failure.message);
                if let Some(detail) = failure.detail {
                    reason.push_str(&format!(" - {detail}"));
                }
                return Err(reason);
            }
        };

        let stored = self
            .persister
            .persist(image, Some(&mime_type))
            .await
            .map_err(|e| format!("storing image from {service} failed: {e}"))?;
        debug!("Stored under key {}", stored.key);

        Ok(GeneratedImageRecord {
            id: Uuid::new_v4(),
            source_photo_id: request.source_photo_id,
            image_url: stored.url,
            prompt_used: prompt,
            scenario_description: label,
            ai_service: service,
            generated_at: Utc::now(),
        })
    }
}

/// Cleaned URL lists, each entry tagged with its position in the request.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedUrls {
    pub customers: Vec<SourceUrl>,
    pub products: Vec<SourceUrl>,
}

/// Count checks that must pass before any network I/O.
pub fn validate(request: &GenerationRequest) -> Result<ValidatedUrls, GenerationError> {
    let customers = request.customer_photo_urls.len();
    if !(1..=MAX_CUSTOMER_PHOTOS).contains(&customers) {
        return Err(GenerationError::Validation(format!(
            "between 1 and {MAX_CUSTOMER_PHOTOS} customer photos are required, got {customers}"
        )));
    }
    let products = request.product_image_urls.len();
    if !(1..=MAX_PRODUCT_IMAGES).contains(&products) {
        return Err(GenerationError::Validation(format!(
            "between 1 and {MAX_PRODUCT_IMAGES} product images are required, got {products}"
        )));
    }
    let parallel = [
        ("product names", &request.product_names),
        ("product categories", &request.product_categories),
        ("product styles", &request.product_styles),
    ];
    for (what, list) in parallel {
        if let Some(list) = list.as_ref().filter(|l| l.len() > products) {
            return Err(GenerationError::Validation(format!(
                "{} {what} given for {products} product images",
                list.len()
            )));
        }
    }
    Ok(ValidatedUrls {
        customers: fetcher::clean_urls(&request.customer_photo_urls, ImageRole::Customer)?,
        products: fetcher::clean_urls(&request.product_image_urls, ImageRole::Product)?,
    })
}
