use axum::{Json, extract::{Path, Query, State}, http::StatusCode, response::{IntoResponse, Response}};
use serde::Deserialize;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::{
    error::GenerationError,
    models::{GeneratedImageRecord, GenerationRequest},
    orchestrator::GenerationOrchestrator,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RwLock<HashMap<Uuid, GeneratedImageRecord>>>,
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub storage_configured: bool,
}

pub fn router(state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/health", get(health))
        .route("/api/generated-images", get(list_generated_images))
        .route("/api/generated-images/generate", post(generate_images))
        .route("/api/generated-images/:id", get(get_generated_image).delete(delete_generated_image))
        .with_state(state)
}

pub async fn generate_images(
    State(state): State<AppState>,
    Json(body): Json<GenerationRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), GenerationError> {
    tracing::info!(
        "🚀 Generation request: {} customer photo(s), {} product(s), {} scenario(s)",
        body.customer_photo_urls.len(),
        body.product_image_urls.len(),
        body.scenarios.len()
    );

    let outcome = state.orchestrator.generate(&body).await?;

    {
        let mut store = state.store.write();
        for record in &outcome.images {
            store.insert(record.id, record.clone());
        }
    }

    let count = outcome.images.len();
    Ok((
        StatusCode::CREATED,
        Json(json!({ "images": outcome.images, "errors": outcome.errors, "count": count })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListFilter {
    pub source_photo_id: Option<Uuid>,
}

pub async fn list_generated_images(State(state): State<AppState>, Query(filter): Query<ListFilter>) -> Json<serde_json::Value> {
    let mut images: Vec<GeneratedImageRecord> = state
        .store
        .read()
        .values()
        .filter(|r| filter.source_photo_id.is_none() || r.source_photo_id == filter.source_photo_id)
        .cloned()
        .collect();
    images.sort_by_key(|r| r.generated_at);
    let count = images.len();
    Json(json!({ "images": images, "count": count }))
}

pub async fn get_generated_image(Path(id): Path<Uuid>, State(state): State<AppState>) -> Response {
    if let Some(image) = state.store.read().get(&id).cloned() {
        Json(json!({ "image": image })).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

pub async fn delete_generated_image(Path(id): Path<Uuid>, State(state): State<AppState>) -> Response {
    if state.store.write().remove(&id).is_some() {
        Json(json!({ "message": "Generated image deleted", "image_id": id })).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers: serde_json::Map<String, serde_json::Value> = state
        .orchestrator
        .gateway()
        .adapters()
        .iter()
        .map(|a| (a.service().to_string(), json!(a.is_configured())))
        .collect();
    Json(json!({
        "status": "ok",
        "default_ai_service": state.orchestrator.default_service(),
        "providers": providers,
        "storage_configured": state.storage_configured,
    }))
}
