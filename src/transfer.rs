//! Portable export and validated import of boards.
//!
//! An export bundle carries the board, image credits and, optionally, the
//! referenced images as data URLs. Import accepts a bundle or a bare board,
//! validates it completely before touching either store, and treats asset
//! references it cannot resolve as dangling weak references.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assets::{AssetStore, BlobStoreError, NewAsset};
use crate::boards::BoardStore;
use crate::data_url;
use crate::eviction::put_with_eviction;
use crate::sanitize::sanitize;
use crate::storage::models::{new_board_id, Board, Card, Provenance, DEFAULT_COLUMN_COUNT};
use crate::storage::DatabaseError;

pub const EXPORT_APP: &str = "aac-store";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Invalid board import: {0}")]
    ValidationFailed(String),
    #[error(transparent)]
    Asset(#[from] BlobStoreError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

fn invalid(message: impl Into<String>) -> ImportError {
    ImportError::ValidationFailed(message.into())
}

// ============================================================================
// Export
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMeta {
    pub exported_at: DateTime<Utc>,
    pub app: String,
    pub version: String,
}

/// Attribution for one card's image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credit {
    pub card_id: String,
    pub source: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
    pub page_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedAsset {
    pub id: String,
    pub data_url: String,
    #[serde(default)]
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub meta: ExportMeta,
    pub board: Board,
    pub credits: Vec<Credit>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<EmbeddedAsset>,
}

/// Credits for every card whose image names a source or license
pub fn credits(board: &Board) -> Vec<Credit> {
    board
        .cells
        .iter()
        .filter(|c| c.image_source.is_some() || c.image_license.is_some())
        .map(|c| Credit {
            card_id: c.id.clone(),
            source: c.image_source.clone(),
            author: c.image_author.clone(),
            license: c.image_license.clone(),
            page_url: c.image_page_url.clone(),
        })
        .collect()
}

/// Export bundle without embedded images
pub fn build_export(board: &Board, exported_at: DateTime<Utc>) -> ExportBundle {
    let board = sanitize(board);
    ExportBundle {
        meta: ExportMeta {
            exported_at,
            app: EXPORT_APP.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        credits: credits(&board),
        board,
        assets: Vec::new(),
    }
}

/// Export bundle with every resolvable referenced image embedded as a data URL.
/// Reading assets for export does not count as use.
pub async fn export_with_assets(
    board: &Board,
    store: &AssetStore,
) -> Result<ExportBundle, BlobStoreError> {
    let mut bundle = build_export(board, Utc::now());
    for asset_id in bundle.board.asset_ids() {
        match store.get(&asset_id).await? {
            Some(asset) => bundle.assets.push(EmbeddedAsset {
                data_url: data_url::encode(&asset.record.mime_type, &asset.payload),
                id: asset_id,
                provenance: asset.record.provenance,
            }),
            None => {
                tracing::debug!(board_id = %board.id, asset_id = %asset_id, "Skipping missing asset in export");
            }
        }
    }
    Ok(bundle)
}

// ============================================================================
// Import
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportCard {
    #[serde(default)]
    id: String,
    #[serde(default)]
    label: String,
    #[serde(default, alias = "text")]
    speech_text: Option<String>,
    #[serde(default)]
    asset_id: Option<String>,
    /// Inline image data URL, as older exports stored images
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    image_source: Option<String>,
    #[serde(default)]
    image_author: Option<String>,
    #[serde(default)]
    image_page_url: Option<String>,
    #[serde(default)]
    image_license: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportBoard {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "cols")]
    column_count: Option<u32>,
    cells: Vec<ImportCard>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ImportBundle {
    board: ImportBoard,
    #[serde(default)]
    assets: Vec<EmbeddedAsset>,
}

struct DecodedImage {
    mime_type: String,
    payload: Bytes,
    provenance: Provenance,
}

/// A parsed and validated import, ready to be written
pub struct ImportPayload {
    board: ImportBoard,
    /// Embedded images keyed by the id cards use to reference them
    embedded: HashMap<String, DecodedImage>,
    /// Inline card images keyed by card id
    inline: HashMap<String, DecodedImage>,
}

impl ImportPayload {
    pub fn board_id(&self) -> &str {
        &self.board.id
    }

    pub fn card_count(&self) -> usize {
        self.board.cells.len()
    }
}

/// Result of a successful import
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub board: Board,
    /// Id the board carried in the import, if a fresh one had to be assigned
    pub reassigned_from: Option<String>,
    pub imported_assets: usize,
    /// Asset ids still referenced by cards but not present in the store
    pub unresolved_assets: Vec<String>,
}

/// Parse and validate an import document (a bundle or a bare board).
pub fn parse_import(text: &str) -> Result<ImportPayload, ImportError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| invalid(format!("malformed JSON: {e}")))?;

    if !value.is_object() {
        return Err(invalid("expected a JSON object"));
    }

    let bundle = if value.get("board").is_some_and(|b| b.is_object()) {
        serde_json::from_value::<ImportBundle>(value)
    } else {
        serde_json::from_value::<ImportBoard>(value).map(|board| ImportBundle {
            board,
            assets: Vec::new(),
        })
    }
    .map_err(|e| invalid(e.to_string()))?;

    validate(bundle)
}

fn validate(bundle: ImportBundle) -> Result<ImportPayload, ImportError> {
    let board = bundle.board;
    if board.id.trim().is_empty() {
        return Err(invalid("board id is required"));
    }
    if board.column_count == Some(0) {
        return Err(invalid("column count must be positive"));
    }

    let mut card_ids = HashSet::new();
    for card in &board.cells {
        if card.id.trim().is_empty() {
            return Err(invalid("every card needs an id"));
        }
        if !card_ids.insert(card.id.as_str()) {
            return Err(invalid(format!("duplicate card id '{}'", card.id)));
        }
    }

    let mut embedded = HashMap::new();
    for asset in bundle.assets {
        let (mime_type, payload) = data_url::decode(&asset.data_url)
            .map_err(|e| invalid(format!("embedded asset '{}': {e}", asset.id)))?;
        embedded.insert(
            asset.id,
            DecodedImage {
                mime_type,
                payload,
                provenance: asset.provenance,
            },
        );
    }

    let mut inline = HashMap::new();
    for card in &board.cells {
        if let Some(image) = card.image.as_deref().filter(|i| !i.trim().is_empty()) {
            let (mime_type, payload) = data_url::decode(image)
                .map_err(|e| invalid(format!("image of card '{}': {e}", card.id)))?;
            inline.insert(
                card.id.clone(),
                DecodedImage {
                    mime_type,
                    payload,
                    provenance: Provenance {
                        source: card.image_source.clone(),
                        author: card.image_author.clone(),
                        page_url: card.image_page_url.clone(),
                        license: card.image_license.clone(),
                    },
                },
            );
        }
    }

    Ok(ImportPayload {
        board,
        embedded,
        inline,
    })
}

/// Write a validated import. Images go through the asset store (evicting if
/// it is full); the board is stored under a fresh id if its id is taken.
///
/// The id is claimed atomically, so concurrent imports of the same board never
/// overwrite each other. If the import fails, images it already stored are
/// deleted again.
pub async fn import_board(
    boards: &dyn BoardStore,
    assets: &AssetStore,
    budget: u64,
    payload: ImportPayload,
) -> Result<ImportOutcome, ImportError> {
    let mut stored_assets = Vec::new();
    match write_import(boards, assets, budget, payload, &mut stored_assets).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            discard_assets(assets, &stored_assets).await;
            Err(e)
        }
    }
}

async fn write_import(
    boards: &dyn BoardStore,
    assets: &AssetStore,
    budget: u64,
    payload: ImportPayload,
    stored_assets: &mut Vec<String>,
) -> Result<ImportOutcome, ImportError> {
    let ImportPayload {
        board: incoming,
        embedded,
        inline,
    } = payload;

    let mut remapped: HashMap<String, (String, Provenance)> = HashMap::new();
    for (old_id, image) in embedded {
        let new_id = store_image(assets, budget, &image).await?;
        stored_assets.push(new_id.clone());
        remapped.insert(old_id, (new_id, image.provenance));
    }

    let mut cells = Vec::with_capacity(incoming.cells.len());
    for card in incoming.cells {
        let mut cell = Card {
            id: card.id.clone(),
            label: card.label,
            speech_text: card.speech_text,
            ..Default::default()
        };

        if let Some(image) = inline.get(&card.id) {
            let new_id = store_image(assets, budget, image).await?;
            stored_assets.push(new_id.clone());
            cell.assign_asset(new_id, &image.provenance);
        } else if let Some(asset_id) = card.asset_id {
            match remapped.get(&asset_id) {
                Some((new_id, provenance)) => {
                    // Card-level credits win over the embedded asset's own
                    let card_provenance = Provenance {
                        source: card.image_source,
                        author: card.image_author,
                        page_url: card.image_page_url,
                        license: card.image_license,
                    };
                    let provenance = if card_provenance.is_empty() {
                        provenance.clone()
                    } else {
                        card_provenance
                    };
                    cell.assign_asset(new_id.clone(), &provenance);
                }
                None => {
                    cell.asset_id = Some(asset_id);
                    cell.image_source = card.image_source;
                    cell.image_author = card.image_author;
                    cell.image_page_url = card.image_page_url;
                    cell.image_license = card.image_license;
                }
            }
        }
        cells.push(cell);
    }

    let now = Utc::now();
    let mut board = sanitize(&Board {
        id: incoming.id.clone(),
        title: incoming
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Imported Board".to_string()),
        column_count: incoming.column_count.unwrap_or(DEFAULT_COLUMN_COUNT),
        cells,
        created_at: incoming.created_at.unwrap_or(now),
        updated_at: now,
    });

    let mut unresolved_assets = Vec::new();
    for asset_id in board.asset_ids() {
        if assets.record(&asset_id).await?.is_none() {
            unresolved_assets.push(asset_id);
        }
    }

    let mut reassigned_from = None;
    let board = loop {
        if let Some(stored) = boards.insert_if_absent(board.clone()).await? {
            break stored;
        }
        reassigned_from.get_or_insert_with(|| incoming.id.clone());
        board.id = new_board_id();
    };

    let imported_assets = stored_assets.len();
    tracing::info!(
        board_id = %board.id,
        reassigned = reassigned_from.is_some(),
        imported_assets,
        unresolved = unresolved_assets.len(),
        "Imported board"
    );

    Ok(ImportOutcome {
        board,
        reassigned_from,
        imported_assets,
        unresolved_assets,
    })
}

async fn discard_assets(assets: &AssetStore, ids: &[String]) {
    for id in ids {
        match assets.delete(id).await {
            Ok(_) => tracing::debug!(asset_id = %id, "Removed asset of failed import"),
            Err(e) => tracing::warn!(asset_id = %id, error = %e, "Failed to remove asset of failed import"),
        }
    }
}

async fn store_image(
    assets: &AssetStore,
    budget: u64,
    image: &DecodedImage,
) -> Result<String, BlobStoreError> {
    put_with_eviction(
        assets,
        image.payload.clone(),
        NewAsset::new(image.mime_type.clone()).with_provenance(image.provenance.clone()),
        budget,
    )
    .await
}
