use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppQuery, JSend, JSendPaginated, Pagination};
use crate::assets::{NewAsset, DEFAULT_MIME_TYPE};
use crate::eviction::{enforce_budget, put_with_eviction};
use crate::storage::models::{AssetRecord, Provenance};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AssetResponse {
    pub byte_size: u64,
    pub created_at: String,
    pub id: String,
    pub last_used_at: String,
    pub mime_type: String,
    pub provenance: Provenance,
}

#[derive(Debug, Serialize)]
pub struct AssetStatsResponse {
    pub asset_count: usize,
    pub budget_bytes: u64,
    pub live_handles: usize,
    pub quota_bytes: Option<u64>,
    pub total_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct EvictResponse {
    pub max_bytes: u64,
    pub removed: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListAssetsParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Deserialize)]
pub struct EvictParams {
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

fn default_limit() -> u32 {
    50
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn upload_asset(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<JSend<AssetResponse>>, ApiError> {
    let mut payload: Option<Bytes> = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut provenance = Provenance::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        if field_name == "file" {
            file_name = field.file_name().map(|s| s.to_string());
            content_type = field.content_type().map(|s| s.to_string());

            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;

            if data.len() as u64 > state.config.max_upload_size {
                return Err(ApiError::payload_too_large(format!(
                    "File exceeds maximum upload size of {} bytes",
                    state.config.max_upload_size
                )));
            }
            payload = Some(data);
            continue;
        }

        let slot = match field_name.as_str() {
            "source" => &mut provenance.source,
            "author" => &mut provenance.author,
            "page_url" => &mut provenance.page_url,
            "license" => &mut provenance.license,
            _ => continue,
        };
        let text = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid {field_name}: {e}")))?;
        *slot = Some(text).filter(|t| !t.trim().is_empty());
    }

    let payload = payload.ok_or_else(|| ApiError::bad_request("file field is required"))?;

    // Part content type first, then a guess from the filename
    let mime_type = content_type
        .filter(|ct| ct != DEFAULT_MIME_TYPE)
        .or_else(|| {
            file_name
                .as_deref()
                .and_then(|n| mime_guess::from_path(n).first())
                .map(|m| m.to_string())
        })
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

    let id = put_with_eviction(
        &state.assets,
        payload,
        NewAsset::new(mime_type).with_provenance(provenance),
        state.config.storage.budget_bytes,
    )
    .await?;

    let record = state
        .assets
        .record(&id)
        .await?
        .ok_or_else(|| ApiError::internal("Asset not found after upload"))?;

    tracing::debug!(asset_id = %id, byte_size = record.byte_size, "Uploaded asset");
    Ok(JSend::success(asset_to_response(&record)))
}

pub async fn list_assets(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<ListAssetsParams>,
) -> Result<Json<JSendPaginated<AssetResponse>>, ApiError> {
    if params.limit == 0 {
        return Err(ApiError::bad_request("limit must be greater than 0"));
    }

    let records = state.assets.list_all().await?;
    let total = records.len() as u64;
    let items: Vec<AssetResponse> = records
        .iter()
        .skip(params.offset as usize)
        .take(params.limit as usize)
        .map(asset_to_response)
        .collect();

    Ok(JSendPaginated::success(
        items,
        Pagination {
            limit: params.limit,
            offset: params.offset,
            total,
        },
    ))
}

pub async fn asset_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<AssetStatsResponse>>, ApiError> {
    let records = state.assets.list_all().await?;

    Ok(JSend::success(AssetStatsResponse {
        asset_count: records.len(),
        budget_bytes: state.config.storage.budget_bytes,
        live_handles: state.handles.live_handles(),
        quota_bytes: state.assets.quota(),
        total_bytes: records.iter().map(|r| r.byte_size).sum(),
    }))
}

/// Metadata only; does not count as use.
pub async fn get_asset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<AssetResponse>>, ApiError> {
    let record = state
        .assets
        .record(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Asset not found"))?;

    Ok(JSend::success(asset_to_response(&record)))
}

/// Serve asset bytes through a render handle, which touches recency.
pub async fn serve_asset_content(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let handle = state
        .handles
        .acquire(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Asset not found"))?;

    let payload = handle.payload().clone();
    let mime_type = handle.mime_type().to_string();
    handle.release();

    let mut response = (StatusCode::OK, payload).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        mime_type
            .parse()
            .unwrap_or(header::HeaderValue::from_static(DEFAULT_MIME_TYPE)),
    );
    // Asset ids are never reused, so the bytes behind one never change
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("private, max-age=31536000, immutable"),
    );

    Ok(response)
}

pub async fn delete_asset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    if !state.assets.delete(&id).await? {
        return Err(ApiError::not_found("Asset not found"));
    }

    tracing::debug!(asset_id = %id, "Deleted asset");
    Ok(JSend::success(()))
}

pub async fn evict_assets(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<EvictParams>,
) -> Result<Json<JSend<EvictResponse>>, ApiError> {
    let max_bytes = params
        .max_bytes
        .unwrap_or(state.config.storage.budget_bytes);
    let removed = enforce_budget(&state.assets, max_bytes).await?;
    let total_bytes = state.assets.total_bytes().await?;

    Ok(JSend::success(EvictResponse {
        max_bytes,
        removed,
        total_bytes,
    }))
}

// ============================================================================
// Helpers
// ============================================================================

fn asset_to_response(record: &AssetRecord) -> AssetResponse {
    AssetResponse {
        byte_size: record.byte_size,
        created_at: record.created_at.to_rfc3339(),
        id: record.id.clone(),
        last_used_at: record.last_used_at.to_rfc3339(),
        mime_type: record.mime_type.clone(),
        provenance: record.provenance.clone(),
    }
}
