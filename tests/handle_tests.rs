use std::sync::Arc;

use aac_store::assets::{AssetStore, NewAsset};
use aac_store::clock::{Clock, ManualClock};
use aac_store::eviction::enforce_budget;
use aac_store::handles::{HandleBroker, HANDLE_URI_PREFIX};
use aac_store::object_store::MemoryStore;
use aac_store::storage::models::{Card, Provenance};
use aac_store::storage::Database;
use bytes::Bytes;
use chrono::{Duration, TimeZone, Utc};

fn setup() -> (tempfile::TempDir, Arc<ManualClock>, AssetStore, HandleBroker) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
    ));
    let store = AssetStore::new(db, Arc::new(MemoryStore::new())).with_clock(clock.clone());
    let broker = HandleBroker::new(store.clone());
    (dir, clock, store, broker)
}

async fn put(store: &AssetStore, data: &'static [u8]) -> String {
    store
        .put(Bytes::from_static(data), NewAsset::new("image/png"))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_acquire_touches_recency() {
    let (_dir, clock, store, broker) = setup();
    let id = put(&store, b"apple").await;

    clock.advance(Duration::minutes(3));
    let handle = broker.acquire(&id).await.unwrap().expect("asset exists");

    assert_eq!(handle.asset_id(), id);
    assert_eq!(handle.mime_type(), "image/png");
    assert_eq!(handle.payload().as_ref(), b"apple");
    let record = store.record(&id).await.unwrap().unwrap();
    assert_eq!(record.last_used_at, clock.now());
}

#[tokio::test]
async fn test_acquire_absent_asset_returns_none() {
    let (_dir, _clock, _store, broker) = setup();
    assert!(broker.acquire("missing").await.unwrap().is_none());
    assert_eq!(broker.live_handles(), 0);
}

#[tokio::test]
async fn test_uri_resolves_until_released() {
    let (_dir, _clock, store, broker) = setup();
    let id = put(&store, b"banana").await;

    let handle = broker.acquire(&id).await.unwrap().unwrap();
    let uri = handle.uri();
    assert!(uri.starts_with(HANDLE_URI_PREFIX));
    assert_eq!(broker.resolve(&uri).unwrap().as_ref(), b"banana");
    assert_eq!(broker.checkouts(&id), 1);

    assert!(broker.release(&handle));
    assert!(handle.is_released());
    assert!(broker.resolve(&uri).is_none());
    assert_eq!(broker.checkouts(&id), 0);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let (_dir, _clock, store, broker) = setup();
    let id = put(&store, b"cherry").await;

    let handle = broker.acquire(&id).await.unwrap().unwrap();
    assert!(handle.release());
    assert!(!handle.release());
    assert!(!broker.release(&handle));
    assert_eq!(broker.live_handles(), 0);
}

#[tokio::test]
async fn test_drop_releases_handle() {
    let (_dir, _clock, store, broker) = setup();
    let id = put(&store, b"date").await;

    let uri = {
        let handle = broker.acquire(&id).await.unwrap().unwrap();
        assert_eq!(broker.live_handles(), 1);
        handle.uri()
    };

    assert_eq!(broker.live_handles(), 0);
    assert!(broker.resolve(&uri).is_none());
}

#[tokio::test]
async fn test_each_acquire_gets_its_own_handle() {
    let (_dir, _clock, store, broker) = setup();
    let id = put(&store, b"elderberry").await;

    let first = broker.acquire(&id).await.unwrap().unwrap();
    let second = broker.acquire(&id).await.unwrap().unwrap();
    assert_ne!(first.uri(), second.uri());
    assert_eq!(broker.checkouts(&id), 2);

    first.release();
    assert!(broker.resolve(&second.uri()).is_some());
}

#[tokio::test]
async fn test_resolve_rejects_foreign_uris() {
    let (_dir, _clock, _store, broker) = setup();
    assert!(broker.resolve("https://example.com/a.png").is_none());
    assert!(broker.resolve(&format!("{HANDLE_URI_PREFIX}not-a-uuid")).is_none());
}

#[tokio::test]
async fn test_handle_outlives_deleted_asset() {
    let (_dir, _clock, store, broker) = setup();
    let id = put(&store, b"fig").await;

    let handle = broker.acquire(&id).await.unwrap().unwrap();
    store.delete(&id).await.unwrap();

    assert_eq!(handle.payload().as_ref(), b"fig");
    assert!(broker.resolve(&handle.uri()).is_some());
    assert!(broker.acquire(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_handle_outlives_eviction() {
    let (_dir, _clock, store, broker) = setup();
    let id = put(&store, b"grape").await;

    let handle = broker.acquire(&id).await.unwrap().unwrap();
    enforce_budget(&store, 0).await.unwrap();

    assert!(store.record(&id).await.unwrap().is_none());
    assert_eq!(handle.payload().as_ref(), b"grape");
}

#[tokio::test]
async fn test_resolve_card_with_image() {
    let (_dir, _clock, store, broker) = setup();
    let id = put(&store, b"honeydew").await;

    let mut card = Card::new("c1", "melon");
    card.assign_asset(&id, &Provenance::default());

    let view = broker.resolve_card(&card).await;
    assert_eq!(view.card_id, "c1");
    assert_eq!(view.label, "melon");
    assert_eq!(view.speech, "melon");
    assert!(!view.is_label_only());
    assert_eq!(view.image.as_ref().unwrap().payload().as_ref(), b"honeydew");
}

#[tokio::test]
async fn test_resolve_card_with_dangling_reference_is_label_only() {
    let (_dir, _clock, _store, broker) = setup();

    let mut card = Card::new("c1", "kiwi");
    card.speech_text = Some("I want kiwi".to_string());
    card.assign_asset("evicted-long-ago", &Provenance::default());

    let view = broker.resolve_card(&card).await;
    assert!(view.is_label_only());
    assert_eq!(view.speech, "I want kiwi");
    assert_eq!(broker.live_handles(), 0);
}

#[tokio::test]
async fn test_resolve_card_shows_preview_without_asset() {
    let (_dir, _clock, _store, broker) = setup();

    let mut card = Card::new("c1", "lemon");
    card.preview = Some(Bytes::from_static(b"transient"));

    let view = broker.resolve_card(&card).await;
    assert!(view.image.is_none());
    assert!(!view.is_label_only());
    assert_eq!(view.preview.unwrap().as_ref(), b"transient");
}
