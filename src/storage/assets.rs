use chrono::{DateTime, Utc};
use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::AssetRecord;
use super::tables::*;

/// Outcome of admitting a new asset record against a byte quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// The record would push the total past the quota; nothing was written.
    Rejected { used: u64 },
}

impl Database {
    // ========================================================================
    // Asset metadata operations
    // ========================================================================

    /// Insert an asset record if the total stored bytes stay within `quota`.
    /// The quota check and the insert share one write transaction.
    pub fn insert_asset(
        &self,
        record: &AssetRecord,
        quota: Option<u64>,
    ) -> Result<Admission, DatabaseError> {
        debug_assert!(!record.id.is_empty(), "asset id must not be empty");
        debug_assert!(record.last_used_at >= record.created_at);

        let write_txn = self.begin_write()?;
        let admission = {
            let mut table = write_txn.open_table(ASSETS)?;

            let mut used = 0u64;
            if quota.is_some() {
                for entry in table.iter()? {
                    let (_, value) = entry?;
                    let existing: AssetRecord = rmp_serde::from_slice(value.value())?;
                    used += existing.byte_size;
                }
            }

            match quota {
                Some(limit) if used.saturating_add(record.byte_size) > limit => {
                    Admission::Rejected { used }
                }
                _ => {
                    let data = rmp_serde::to_vec_named(record)?;
                    table.insert(record.id.as_str(), data.as_slice())?;
                    Admission::Admitted
                }
            }
        };

        if admission == Admission::Admitted {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(admission)
    }

    /// Get an asset record by id
    pub fn get_asset(&self, id: &str) -> Result<Option<AssetRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ASSETS)?;

        match table.get(id)? {
            Some(data) => {
                let record: AssetRecord = rmp_serde::from_slice(data.value())?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Move `last_used_at` forward to `at`. Never moves it backwards.
    /// Returns false when the asset does not exist.
    pub fn touch_asset(&self, id: &str, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let touched = {
            let mut table = write_txn.open_table(ASSETS)?;
            let existing = match table.get(id)? {
                Some(data) => Some(rmp_serde::from_slice::<AssetRecord>(data.value())?),
                None => None,
            };

            match existing {
                Some(mut record) => {
                    if at > record.last_used_at {
                        record.last_used_at = at;
                        let data = rmp_serde::to_vec_named(&record)?;
                        table.insert(id, data.as_slice())?;
                    }
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(touched)
    }

    /// Delete an asset record. Returns false if it was already gone.
    pub fn delete_asset(&self, id: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(ASSETS)?;
            let removed = table.remove(id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    /// All asset records (metadata only)
    pub fn list_assets(&self) -> Result<Vec<AssetRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ASSETS)?;

        let mut records = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let record: AssetRecord = rmp_serde::from_slice(value.value())?;
            records.push(record);
        }

        Ok(records)
    }

    /// Sum of `byte_size` over all asset records
    pub fn total_asset_bytes(&self) -> Result<u64, DatabaseError> {
        Ok(self.list_assets()?.iter().map(|r| r.byte_size).sum())
    }
}
