use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default grid width for new and imported boards
pub const DEFAULT_COLUMN_COUNT: u32 = 3;

/// Where an image came from. All fields are free text supplied by the producer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
}

impl Provenance {
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.author.is_none()
            && self.page_url.is_none()
            && self.license.is_none()
    }
}

/// Asset metadata stored in redb. The payload itself lives in the object store,
/// keyed by the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub id: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    #[serde(default)]
    pub provenance: Provenance,
}

/// An asset record together with its payload
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub record: AssetRecord,
    pub payload: Bytes,
}

/// A single cell of a board grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, alias = "text")]
    pub speech_text: Option<String>,
    /// Weak reference into the asset store; the asset may have been evicted.
    #[serde(default)]
    pub asset_id: Option<String>,

    // Denormalized provenance, set and cleared together with `asset_id`
    #[serde(default)]
    pub image_source: Option<String>,
    #[serde(default)]
    pub image_author: Option<String>,
    #[serde(default)]
    pub image_page_url: Option<String>,
    #[serde(default)]
    pub image_license: Option<String>,

    /// In-memory preview shown before the asset write resolves. Never persisted.
    #[serde(skip)]
    pub preview: Option<Bytes>,
}

impl Card {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            ..Default::default()
        }
    }

    /// Text to speak for this card, falling back to the label.
    pub fn speech(&self) -> &str {
        self.speech_text.as_deref().unwrap_or(&self.label)
    }

    /// Point the card at a stored asset, copying its provenance.
    pub fn assign_asset(&mut self, asset_id: impl Into<String>, provenance: &Provenance) {
        self.asset_id = Some(asset_id.into());
        self.image_source = provenance.source.clone();
        self.image_author = provenance.author.clone();
        self.image_page_url = provenance.page_url.clone();
        self.image_license = provenance.license.clone();
    }

    /// Drop the asset reference along with its provenance.
    pub fn clear_asset(&mut self) {
        self.asset_id = None;
        self.image_source = None;
        self.image_author = None;
        self.image_page_url = None;
        self.image_license = None;
    }

    pub fn provenance(&self) -> Provenance {
        Provenance {
            source: self.image_source.clone(),
            author: self.image_author.clone(),
            page_url: self.image_page_url.clone(),
            license: self.image_license.clone(),
        }
    }

    pub fn has_provenance(&self) -> bool {
        !self.provenance().is_empty()
    }
}

/// A board document: an ordered grid of cards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: String,
    pub title: String,
    #[serde(default = "default_column_count", alias = "cols")]
    pub column_count: u32,
    #[serde(default)]
    pub cells: Vec<Card>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_column_count() -> u32 {
    DEFAULT_COLUMN_COUNT
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardValidationError {
    #[error("board id must not be empty")]
    MissingId,
    #[error("columnCount must be greater than 0")]
    ZeroColumns,
    #[error("every card needs an id")]
    MissingCardId,
    #[error("duplicate card id '{0}'")]
    DuplicateCardId(String),
}

/// Generate a fresh board id.
pub fn new_board_id() -> String {
    format!("board-{}", uuid::Uuid::new_v4().simple())
}

impl Board {
    pub fn new(title: impl Into<String>, column_count: u32, cells: Vec<Card>) -> Self {
        let now = Utc::now();
        Self {
            id: new_board_id(),
            title: title.into(),
            column_count,
            cells,
            created_at: now,
            updated_at: now,
        }
    }

    /// A blank 3x3 board, as the editor creates when asked for a new board.
    pub fn empty(title: impl Into<String>) -> Self {
        let mut board = Self::new(title, DEFAULT_COLUMN_COUNT, Vec::new());
        board.cells = (1..=9)
            .map(|n| Card::new(format!("{}-c{n}", board.id), ""))
            .collect();
        board
    }

    /// The example board written into an empty database.
    pub fn core_example() -> Self {
        let mut board = Self::new("Core Board (Example)", DEFAULT_COLUMN_COUNT, Vec::new());
        board.id = "default-core-1".to_string();
        board.cells = [("c1", "I"), ("c2", "want"), ("c3", "more")]
            .into_iter()
            .map(|(id, word)| {
                let mut card = Card::new(id, word);
                card.speech_text = Some(word.to_string());
                card
            })
            .collect();
        board
    }

    pub fn card(&self, card_id: &str) -> Option<&Card> {
        self.cells.iter().find(|c| c.id == card_id)
    }

    /// Check the structural rules every stored board must satisfy.
    pub fn validate(&self) -> Result<(), BoardValidationError> {
        if self.id.trim().is_empty() {
            return Err(BoardValidationError::MissingId);
        }
        if self.column_count == 0 {
            return Err(BoardValidationError::ZeroColumns);
        }
        let mut seen = std::collections::HashSet::new();
        for card in &self.cells {
            if card.id.trim().is_empty() {
                return Err(BoardValidationError::MissingCardId);
            }
            if !seen.insert(card.id.as_str()) {
                return Err(BoardValidationError::DuplicateCardId(card.id.clone()));
            }
        }
        Ok(())
    }

    /// Ids of every asset referenced by this board, in grid order, without duplicates.
    pub fn asset_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.cells.iter().filter_map(|c| c.asset_id.as_ref()) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    pub fn has_previews(&self) -> bool {
        self.cells.iter().any(|c| c.preview.is_some())
    }

    pub fn summary(&self) -> BoardSummary {
        BoardSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            cell_count: self.cells.len(),
            column_count: self.column_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Cheap projection of a board for pickers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSummary {
    pub id: String,
    pub title: String,
    pub cell_count: usize,
    pub column_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
