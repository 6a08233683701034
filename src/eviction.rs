//! Least-recently-used eviction over the asset store.
//!
//! Greedy: walk assets from the coldest and delete until the total fits the
//! budget. Checkouts are not tracked; a live [`RenderHandle`] owns its bytes,
//! so evicting its asset only affects future acquisitions.
//!
//! [`RenderHandle`]: crate::handles::RenderHandle

use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::assets::{AssetStore, BlobStoreError, NewAsset};
use crate::storage::models::AssetRecord;

/// Sort records coldest first: `last_used_at`, then `created_at`, then id.
pub fn eviction_order(mut records: Vec<AssetRecord>) -> Vec<AssetRecord> {
    records.sort_by(|a, b| {
        a.last_used_at
            .cmp(&b.last_used_at)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    records
}

/// Ids to delete, in order, so the remaining total is at most `max_bytes`.
pub fn plan_eviction(records: Vec<AssetRecord>, max_bytes: u64) -> Vec<String> {
    let mut total: u64 = records.iter().map(|r| r.byte_size).sum();
    if total <= max_bytes {
        return Vec::new();
    }

    let mut victims = Vec::new();
    for record in eviction_order(records) {
        if total <= max_bytes {
            break;
        }
        total = total.saturating_sub(record.byte_size);
        victims.push(record.id);
    }
    victims
}

/// Delete the coldest assets until the store holds at most `max_bytes`.
/// Returns how many assets were removed.
pub async fn enforce_budget(store: &AssetStore, max_bytes: u64) -> Result<usize, BlobStoreError> {
    let records = store.list_all().await?;
    let before: u64 = records.iter().map(|r| r.byte_size).sum();
    let victims = plan_eviction(records, max_bytes);
    if victims.is_empty() {
        debug!(total_bytes = before, max_bytes, "Asset store within budget");
        return Ok(0);
    }

    let mut removed = 0;
    for id in &victims {
        if store.delete(id).await? {
            removed += 1;
        }
    }

    info!(
        removed,
        total_bytes_before = before,
        max_bytes,
        "Evicted least recently used assets"
    );
    Ok(removed)
}

/// Store a payload, evicting cold assets and retrying once if the store is full.
pub async fn put_with_eviction(
    store: &AssetStore,
    payload: Bytes,
    asset: NewAsset,
    budget: u64,
) -> Result<String, BlobStoreError> {
    match store.put(payload.clone(), asset.clone()).await {
        Err(BlobStoreError::StorageFull { requested, .. }) => {
            let target = match store.quota() {
                Some(quota) => budget.min(quota.saturating_sub(requested)),
                None => budget,
            };
            let removed = enforce_budget(store, target).await?;
            warn!(
                requested,
                removed, target, "Asset store full, retrying after eviction"
            );
            store.put(payload, asset).await
        }
        other => other,
    }
}

/// Periodically enforce `budget` in the background. Errors are logged and the
/// task keeps running.
pub fn spawn_eviction_task(store: AssetStore, budget: u64, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = enforce_budget(&store, budget).await {
                error!(error = %e, "Background eviction failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(id: &str, created: i64, used: i64, size: u64) -> AssetRecord {
        AssetRecord {
            id: id.to_string(),
            mime_type: "image/png".to_string(),
            byte_size: size,
            created_at: at(created),
            last_used_at: at(used),
            provenance: Default::default(),
        }
    }

    #[test]
    fn test_order_is_least_recently_used_first() {
        let ordered = eviction_order(vec![
            record("c", 0, 3, 10),
            record("a", 0, 1, 10),
            record("b", 0, 2, 10),
        ]);
        let ids: Vec<&str> = ordered.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ties_broken_by_created_at_then_id() {
        let ordered = eviction_order(vec![
            record("z", 2, 5, 1),
            record("y", 1, 5, 1),
            record("x", 1, 5, 1),
        ]);
        let ids: Vec<&str> = ordered.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_plan_within_budget_is_empty() {
        let plan = plan_eviction(vec![record("a", 0, 1, 10), record("b", 0, 2, 10)], 20);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_removes_until_within_budget() {
        let plan = plan_eviction(
            vec![
                record("newest", 0, 3, 10),
                record("oldest", 0, 1, 10),
                record("middle", 0, 2, 10),
            ],
            15,
        );
        assert_eq!(plan, vec!["oldest".to_string(), "middle".to_string()]);
    }

    #[test]
    fn test_plan_budget_below_smallest_removes_everything() {
        let plan = plan_eviction(vec![record("a", 0, 1, 10), record("b", 0, 2, 20)], 5);
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_plan_on_empty_store() {
        assert!(plan_eviction(Vec::new(), 0).is_empty());
    }
}
