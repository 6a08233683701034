use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aac_store::autosave::{
    AutosaveConfig, AutosaveCoordinator, AutosaveError, SaveState, SaveStatus,
};
use aac_store::boards::BoardStore;
use aac_store::storage::models::{Board, BoardSummary, Card};
use aac_store::storage::{Database, DatabaseError};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;

/// Board store that records puts and can hold them back or make them fail.
#[derive(Clone)]
struct ScriptedStore {
    inner: Database,
    started: Arc<AtomicUsize>,
    puts: Arc<Mutex<Vec<Board>>>,
    gate: Arc<Semaphore>,
    fail: Arc<AtomicBool>,
}

impl ScriptedStore {
    fn new(inner: Database, gated: bool) -> Self {
        let permits = if gated { 0 } else { Semaphore::MAX_PERMITS };
        Self {
            inner,
            started: Arc::new(AtomicUsize::new(0)),
            puts: Arc::new(Mutex::new(Vec::new())),
            gate: Arc::new(Semaphore::new(permits)),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    fn put_titles(&self) -> Vec<String> {
        self.puts.lock().unwrap().iter().map(|b| b.title.clone()).collect()
    }

    /// Let one held put proceed
    fn release_one(&self) {
        self.gate.add_permits(1);
    }

    async fn wait_started(&self, count: usize) {
        for _ in 0..1000 {
            if self.started() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {count} puts to start, saw {}", self.started());
    }
}

#[async_trait]
impl BoardStore for ScriptedStore {
    async fn get(&self, id: &str) -> Result<Option<Board>, DatabaseError> {
        self.inner.get(id).await
    }

    async fn put(&self, board: Board) -> Result<Board, DatabaseError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await.expect("gate closed").forget();
        if self.fail.load(Ordering::SeqCst) {
            return Err(DatabaseError::Io(std::io::Error::other("disk unplugged")));
        }
        let stored = self.inner.put(board).await?;
        self.puts.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn insert_if_absent(&self, board: Board) -> Result<Option<Board>, DatabaseError> {
        self.inner.insert_if_absent(board).await
    }

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        self.inner.delete(id).await
    }

    async fn list(&self) -> Result<Vec<BoardSummary>, DatabaseError> {
        self.inner.list().await
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store: ScriptedStore,
    autosave: AutosaveCoordinator,
}

fn harness(gated: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    let store = ScriptedStore::new(db, gated);
    let autosave = AutosaveCoordinator::spawn(Arc::new(store.clone()), AutosaveConfig::default());
    Harness {
        _dir: dir,
        store,
        autosave,
    }
}

fn board(id: &str, title: &str) -> Board {
    let mut board = Board::new(title, 3, vec![Card::new("c1", "go"), Card::new("c2", "stop")]);
    board.id = id.to_string();
    board
}

fn retitled(board: &Board, title: &str) -> Board {
    let mut next = board.clone();
    next.title = title.to_string();
    next
}

async fn wait_for_state(autosave: &AutosaveCoordinator, state: SaveState) -> SaveStatus {
    let mut status = autosave.subscribe();
    let result = tokio::time::timeout(
        Duration::from_secs(30),
        status.wait_for(|s| s.state == state),
    )
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {state:?}"))
    .expect("coordinator stopped");
    result.clone()
}

#[tokio::test(start_paused = true)]
async fn test_rapid_edits_coalesce_into_one_save() {
    let h = harness(false);
    let original = board("b1", "Draft");
    h.autosave.open(Some(original.clone())).unwrap();

    for i in 0..5 {
        h.autosave
            .edit(retitled(&original, &format!("Draft {i}")))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert_eq!(h.autosave.status().state, SaveState::Pending);
    assert_eq!(h.store.started(), 0);

    let status = wait_for_state(&h.autosave, SaveState::Saved).await;
    assert_eq!(h.store.put_titles(), vec!["Draft 4"]);
    assert_eq!(status.document_id.as_deref(), Some("b1"));
    assert!(status.last_saved_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_save_waits_for_quiet_period() {
    let h = harness(false);
    let original = board("b1", "Draft");
    h.autosave.edit(retitled(&original, "Edited")).unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(h.store.started(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    wait_for_state(&h.autosave, SaveState::Saved).await;
    assert_eq!(h.store.started(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_saved_reverts_to_idle() {
    let h = harness(false);
    h.autosave.edit(board("b1", "Draft")).unwrap();

    wait_for_state(&h.autosave, SaveState::Saved).await;
    let status = wait_for_state(&h.autosave, SaveState::Idle).await;
    assert!(status.last_saved_at.is_some());
    assert!(status.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_saved_copy_is_sanitized() {
    let h = harness(false);
    let mut working = board("b1", "Fruit");
    working.cells[0].preview = Some(Bytes::from_static(b"preview bytes"));
    working.cells[1].image_license = Some("CC0".to_string());

    h.autosave.edit(working).unwrap();
    h.autosave.flush().await.unwrap();

    let stored = h.store.inner.get_board("b1").unwrap().unwrap();
    assert!(stored.cells[0].preview.is_none());
    assert!(stored.cells[1].image_license.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_flush_without_changes_still_saves() {
    let h = harness(false);
    h.autosave.open(Some(board("b1", "Unchanged"))).unwrap();

    h.autosave.flush().await.unwrap();
    assert_eq!(h.store.put_titles(), vec!["Unchanged"]);
    assert_eq!(h.autosave.status().state, SaveState::Saved);
}

#[tokio::test(start_paused = true)]
async fn test_flush_with_nothing_open_resolves_immediately() {
    let h = harness(false);
    h.autosave.flush().await.unwrap();
    assert_eq!(h.store.started(), 0);
    assert_eq!(h.autosave.status().state, SaveState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_flush_bypasses_and_cancels_debounce() {
    let h = harness(false);
    h.autosave.edit(board("b1", "Now")).unwrap();

    h.autosave.flush().await.unwrap();
    assert_eq!(h.store.put_titles(), vec!["Now"]);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.store.started(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_switching_documents_cancels_pending_save() {
    let h = harness(false);
    let a = board("a", "Board A");
    h.autosave.open(Some(a.clone())).unwrap();
    h.autosave.edit(retitled(&a, "Board A edited")).unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    h.autosave.open(Some(board("b", "Board B"))).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(h.store.started(), 0);
    let status = h.autosave.status();
    assert_eq!(status.document_id.as_deref(), Some("b"));
    assert_eq!(status.state, SaveState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_edit_with_new_id_switches_documents() {
    let h = harness(false);
    h.autosave.edit(board("a", "Board A")).unwrap();
    h.autosave.edit(board("b", "Board B")).unwrap();

    wait_for_state(&h.autosave, SaveState::Saved).await;
    assert_eq!(h.store.put_titles(), vec!["Board B"]);
    assert_eq!(h.autosave.status().document_id.as_deref(), Some("b"));
}

#[tokio::test(start_paused = true)]
async fn test_flush_during_save_queues_one_follow_up() {
    let h = harness(true);
    let original = board("b1", "v1");
    h.autosave.edit(original.clone()).unwrap();

    let autosave = h.autosave.clone();
    let first = tokio::spawn(async move { autosave.flush().await });
    h.store.wait_started(1).await;
    assert_eq!(h.autosave.status().state, SaveState::Saving);

    h.autosave.edit(retitled(&original, "v2")).unwrap();
    h.autosave.edit(retitled(&original, "v3")).unwrap();
    let autosave = h.autosave.clone();
    let second = tokio::spawn(async move { autosave.flush().await });
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    // Never more than one write in flight
    assert_eq!(h.store.started(), 1);

    h.store.release_one();
    first.await.unwrap().unwrap();
    h.store.wait_started(2).await;

    h.store.release_one();
    second.await.unwrap().unwrap();

    assert_eq!(h.store.put_titles(), vec!["v1", "v3"]);
    assert_eq!(h.store.inner.get_board("b1").unwrap().unwrap().title, "v3");
}

#[tokio::test(start_paused = true)]
async fn test_edit_during_save_leaves_state_pending() {
    let h = harness(true);
    let original = board("b1", "v1");
    h.autosave.edit(original.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(1300)).await;
    h.store.wait_started(1).await;

    h.autosave.edit(retitled(&original, "v2")).unwrap();
    h.store.release_one();
    let mut updates = h.autosave.subscribe();
    let status = updates
        .wait_for(|s| s.last_saved_at.is_some())
        .await
        .unwrap()
        .clone();
    assert_eq!(status.state, SaveState::Pending);

    h.store.release_one();
    wait_for_state(&h.autosave, SaveState::Saved).await;
    assert_eq!(h.store.put_titles(), vec!["v1", "v2"]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_save_reports_error_without_retry() {
    let h = harness(false);
    h.store.fail.store(true, Ordering::SeqCst);
    let original = board("b1", "Doomed");
    h.autosave.edit(original.clone()).unwrap();

    let status = wait_for_state(&h.autosave, SaveState::Error).await;
    assert!(status.last_error.unwrap().contains("disk unplugged"));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.store.started(), 1);

    let err = h.autosave.flush().await.unwrap_err();
    assert!(matches!(err, AutosaveError::SaveFailed(_)));

    // The error stays until a save succeeds
    h.store.fail.store(false, Ordering::SeqCst);
    h.autosave.edit(retitled(&original, "Rescued")).unwrap();
    assert!(h.autosave.status().last_error.is_some());
    h.autosave.flush().await.unwrap();
    let status = h.autosave.status();
    assert_eq!(status.state, SaveState::Saved);
    assert!(status.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_delete_during_save_is_not_resurrected() {
    let h = harness(true);
    let original = board("b1", "Doomed");
    h.store.inner.put_board(&original).unwrap();

    h.autosave.open(Some(original.clone())).unwrap();
    h.autosave.edit(retitled(&original, "Doomed v2")).unwrap();
    let autosave = h.autosave.clone();
    let flush = tokio::spawn(async move { autosave.flush().await });
    h.store.wait_started(1).await;

    assert!(h.autosave.delete("b1").await.unwrap());
    assert!(h.autosave.status().document_id.is_none());

    // The held write lands after the delete
    h.store.release_one();
    flush.await.unwrap().unwrap();

    assert_eq!(h.store.put_titles(), vec!["Doomed v2"]);
    assert!(h.store.inner.get_board("b1").unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_delete_during_first_save_succeeds() {
    let h = harness(true);
    let fresh = board("fresh", "Never stored");

    h.autosave.open(Some(fresh.clone())).unwrap();
    let autosave = h.autosave.clone();
    let flush = tokio::spawn(async move { autosave.flush().await });
    h.store.wait_started(1).await;
    assert!(h.store.inner.get_board("fresh").unwrap().is_none());

    assert!(h.autosave.delete("fresh").await.unwrap());
    assert!(h.autosave.status().document_id.is_none());

    h.store.release_one();
    flush.await.unwrap().unwrap();
    assert!(h.store.inner.get_board("fresh").unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_delete_missing_board_returns_false() {
    let h = harness(false);
    assert!(!h.autosave.delete("nope").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_save_settling_after_switch_leaves_new_status_alone() {
    let h = harness(true);
    h.autosave.edit(board("a", "Board A")).unwrap();
    let autosave = h.autosave.clone();
    let flush = tokio::spawn(async move { autosave.flush().await });
    h.store.wait_started(1).await;

    h.autosave.open(Some(board("b", "Board B"))).unwrap();
    h.store.release_one();
    flush.await.unwrap().unwrap();

    let status = h.autosave.status();
    assert_eq!(status.document_id.as_deref(), Some("b"));
    assert_eq!(status.state, SaveState::Idle);
    assert!(status.last_saved_at.is_none());
    assert!(h.store.inner.get_board("a").unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_switch_supersedes_queued_flush() {
    let h = harness(true);
    let a = board("a", "Board A");
    h.autosave.edit(a.clone()).unwrap();
    let autosave = h.autosave.clone();
    let first = tokio::spawn(async move { autosave.flush().await });
    h.store.wait_started(1).await;

    let autosave = h.autosave.clone();
    let queued = tokio::spawn(async move { autosave.flush().await });
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    h.autosave.open(Some(board("b", "Board B"))).unwrap();

    assert_eq!(queued.await.unwrap(), Err(AutosaveError::Superseded));
    h.store.release_one();
    first.await.unwrap().unwrap();
    assert_eq!(h.store.started(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_lets_in_flight_save_finish() {
    let h = harness(true);
    h.autosave.edit(board("b1", "Last words")).unwrap();
    let autosave = h.autosave.clone();
    let flush = tokio::spawn(async move { autosave.flush().await });
    h.store.wait_started(1).await;

    let autosave = h.autosave.clone();
    let shutdown = tokio::spawn(async move { autosave.shutdown().await });
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert!(!shutdown.is_finished());

    h.store.release_one();
    shutdown.await.unwrap();
    flush.await.unwrap().unwrap();

    assert_eq!(h.store.put_titles(), vec!["Last words"]);
    assert_eq!(
        h.autosave.edit(board("b1", "Too late")),
        Err(AutosaveError::Closed)
    );
}
