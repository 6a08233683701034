//! Debounced autosave of the board being edited.
//!
//! The coordinator is an actor: a spawned task owns the working copy, the
//! debounce timer and the in-flight save, and is driven through a command
//! channel. Status is published on a watch channel for UI feedback.
//!
//! State transitions:
//! - `edit` cancels any armed timer, re-arms it and moves to `pending`.
//! - The timer firing (or `flush`) moves to `saving` and writes a sanitized
//!   snapshot. Success leads to `saved` and, after a short display delay, back
//!   to `idle`; failure leads to `error` with no automatic retry.
//! - `open` (switching boards) and `shutdown` cancel the timer but never an
//!   in-flight write.
//!
//! Only one write is in flight at a time. A save requested while another is
//! in flight runs once the current one settles.

use std::collections::HashSet;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tracing::{debug, error, warn};

use crate::boards::BoardStore;
use crate::sanitize::sanitize;
use crate::storage::models::Board;
use crate::storage::DatabaseError;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1200);
pub const DEFAULT_SAVED_DISPLAY: Duration = Duration::from_millis(1400);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveState {
    Idle,
    Pending,
    Saving,
    Saved,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveStatus {
    pub state: SaveState,
    pub document_id: Option<String>,
    pub last_saved_at: Option<DateTime<Utc>>,
    /// Message of the last failed save; kept until a save succeeds
    pub last_error: Option<String>,
}

impl SaveStatus {
    fn idle(document_id: Option<String>) -> Self {
        Self {
            state: SaveState::Idle,
            document_id,
            last_saved_at: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AutosaveError {
    #[error("Save failed: {0}")]
    SaveFailed(String),
    #[error("Save request superseded by a document switch")]
    Superseded,
    #[error("Delete failed: {0}")]
    DeleteFailed(String),
    #[error("Autosave coordinator is not running")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    /// Quiet period after the last edit before a save starts
    pub debounce: Duration,
    /// How long `saved` is shown before reverting to `idle`
    pub saved_display: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            saved_display: DEFAULT_SAVED_DISPLAY,
        }
    }
}

type Waiter = oneshot::Sender<Result<(), AutosaveError>>;

enum Command {
    Open(Option<Board>),
    Edit(Board),
    Flush(Waiter),
    Delete(String, oneshot::Sender<Result<bool, AutosaveError>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running autosave actor. Clones drive the same actor; the actor
/// stops once every handle is dropped or `shutdown` is called.
#[derive(Clone)]
pub struct AutosaveCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SaveStatus>,
}

impl AutosaveCoordinator {
    /// Spawn the actor on the current tokio runtime.
    pub fn spawn(store: Arc<dyn BoardStore>, config: AutosaveConfig) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SaveStatus::idle(None));

        let actor = Actor {
            store,
            config,
            status: status_tx,
            working: None,
            dirty: false,
            debounce: None,
            revert: None,
            in_flight: None,
            resave: false,
            queued: Vec::new(),
            deleted: HashSet::new(),
        };
        tokio::spawn(actor.run(receiver));

        Self { commands, status }
    }

    /// Make `board` the active document, or unload with `None`. Cancels any
    /// pending save of the previous document.
    pub fn open(&self, board: Option<Board>) -> Result<(), AutosaveError> {
        self.send(Command::Open(board))
    }

    /// Record a new working copy. A board with a different id switches documents first.
    pub fn edit(&self, board: Board) -> Result<(), AutosaveError> {
        self.send(Command::Edit(board))
    }

    /// Save the working copy now, bypassing the debounce timer.
    pub async fn flush(&self) -> Result<(), AutosaveError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx))?;
        rx.await.map_err(|_| AutosaveError::Closed)?
    }

    /// Delete a board, making sure an in-flight save cannot bring it back.
    /// Returns false if the board was neither stored nor the active document.
    pub async fn delete(&self, board_id: &str) -> Result<bool, AutosaveError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Delete(board_id.to_string(), tx))?;
        rx.await.map_err(|_| AutosaveError::Closed)?
    }

    /// Cancel the debounce timer, let any in-flight save settle and stop the actor.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn status(&self) -> SaveStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.status.clone()
    }

    fn send(&self, command: Command) -> Result<(), AutosaveError> {
        self.commands
            .send(command)
            .map_err(|_| AutosaveError::Closed)
    }
}

struct InFlight {
    document_id: String,
    task: JoinHandle<Result<Board, DatabaseError>>,
    waiters: Vec<Waiter>,
}

struct Actor {
    store: Arc<dyn BoardStore>,
    config: AutosaveConfig,
    status: watch::Sender<SaveStatus>,
    working: Option<Board>,
    /// The working copy has changes no save has picked up yet
    dirty: bool,
    debounce: Option<Pin<Box<Sleep>>>,
    revert: Option<Pin<Box<Sleep>>>,
    in_flight: Option<InFlight>,
    /// Another save was requested while one was in flight
    resave: bool,
    /// Flush requests waiting for the next save to start
    queued: Vec<Waiter>,
    /// Boards deleted while their save was in flight
    deleted: HashSet<String>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                // Commands first, so a delete is recorded before the save it races settles
                biased;

                command = commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.stop().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                result = settle(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.finish_save(result).await;
                }
                _ = expire(&mut self.debounce), if self.debounce.is_some() => {
                    self.debounce = None;
                    self.start_save();
                }
                _ = expire(&mut self.revert), if self.revert.is_some() => {
                    self.revert = None;
                    if self.status.borrow().state == SaveState::Saved {
                        self.set_state(SaveState::Idle);
                    }
                }
            }
        }
        debug!("Autosave coordinator stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Open(board) => self.switch_to(board),
            Command::Edit(board) => {
                let switching = self.working.as_ref().map(|b| b.id.as_str()) != Some(board.id.as_str());
                if switching {
                    self.switch_to(Some(board.clone()));
                }
                self.working = Some(board);
                self.dirty = true;
                self.revert = None;
                self.debounce = Some(Box::pin(sleep(self.config.debounce)));
                self.set_state(SaveState::Pending);
            }
            Command::Flush(waiter) => {
                if self.working.is_none() {
                    let _ = waiter.send(Ok(()));
                    return;
                }
                self.debounce = None;
                self.queued.push(waiter);
                self.start_save();
            }
            Command::Delete(board_id, reply) => {
                let in_flight =
                    self.in_flight.as_ref().map(|f| f.document_id.as_str()) == Some(board_id.as_str());
                if in_flight {
                    self.deleted.insert(board_id.clone());
                }
                let active = self.working.as_ref().map(|b| b.id.as_str()) == Some(board_id.as_str());
                if active {
                    self.switch_to(None);
                }
                // Loaded or in-flight boards count as existing before their first save lands
                let result = self
                    .store
                    .delete(&board_id)
                    .await
                    .map(|existed| existed || active || in_flight)
                    .map_err(|e| AutosaveError::DeleteFailed(e.to_string()));
                let _ = reply.send(result);
            }
            // Handled in the run loop
            Command::Shutdown(_) => {}
        }
    }

    fn switch_to(&mut self, board: Option<Board>) {
        self.debounce = None;
        self.revert = None;
        self.resave = false;
        self.dirty = false;
        for waiter in self.queued.drain(..) {
            let _ = waiter.send(Err(AutosaveError::Superseded));
        }

        if let Some(previous) = &self.working {
            debug!(board_id = %previous.id, "Autosave switched away from board");
        }
        let document_id = board.as_ref().map(|b| b.id.clone());
        self.working = board;
        self.status.send_replace(SaveStatus::idle(document_id));
    }

    fn start_save(&mut self) {
        if self.in_flight.is_some() {
            self.resave = true;
            return;
        }

        let Some(board) = &self.working else {
            for waiter in self.queued.drain(..) {
                let _ = waiter.send(Ok(()));
            }
            return;
        };

        let snapshot = sanitize(board);
        let document_id = snapshot.id.clone();
        let store = Arc::clone(&self.store);
        // Spawned so the write completes even if the coordinator moves on
        let task = tokio::spawn(async move { store.put(snapshot).await });

        debug!(board_id = %document_id, "Autosave started");
        self.dirty = false;
        self.revert = None;
        self.in_flight = Some(InFlight {
            document_id,
            task,
            waiters: std::mem::take(&mut self.queued),
        });
        self.set_state(SaveState::Saving);
    }

    async fn finish_save(&mut self, result: Result<Board, String>) {
        let Some(flight) = self.in_flight.take() else {
            return;
        };

        let is_current =
            self.working.as_ref().map(|b| b.id.as_str()) == Some(flight.document_id.as_str());

        let outcome = match result {
            Ok(saved) => {
                if self.deleted.remove(&flight.document_id) {
                    // The board was deleted while this write was in flight
                    match self.store.delete(&flight.document_id).await {
                        Ok(_) => debug!(board_id = %flight.document_id, "Removed board saved after deletion"),
                        Err(e) => warn!(board_id = %flight.document_id, error = %e, "Failed to remove board saved after deletion"),
                    }
                } else if is_current {
                    let still_pending = self.dirty || self.debounce.is_some();
                    self.status.send_modify(|s| {
                        s.last_saved_at = Some(saved.updated_at);
                        s.last_error = None;
                        s.state = if still_pending {
                            SaveState::Pending
                        } else {
                            SaveState::Saved
                        };
                    });
                    if !still_pending {
                        self.revert = Some(Box::pin(sleep(self.config.saved_display)));
                    }
                } else {
                    debug!(board_id = %flight.document_id, "Save settled for inactive board");
                }
                Ok(())
            }
            Err(message) => {
                self.deleted.remove(&flight.document_id);
                error!(board_id = %flight.document_id, error = %message, "Autosave failed");
                if is_current {
                    self.status.send_modify(|s| {
                        s.state = SaveState::Error;
                        s.last_error = Some(message.clone());
                    });
                }
                Err(AutosaveError::SaveFailed(message))
            }
        };

        for waiter in flight.waiters {
            let _ = waiter.send(outcome.clone());
        }

        if std::mem::take(&mut self.resave) {
            self.debounce = None;
            self.start_save();
        }
    }

    /// Cancel timers, then let the in-flight save (and any save queued behind it) settle.
    async fn stop(&mut self) {
        self.debounce = None;
        self.revert = None;
        while self.in_flight.is_some() {
            let result = settle(&mut self.in_flight).await;
            self.finish_save(result).await;
        }
        for waiter in self.queued.drain(..) {
            let _ = waiter.send(Err(AutosaveError::Closed));
        }
    }

    fn set_state(&self, state: SaveState) {
        self.status.send_modify(|s| s.state = state);
    }
}

async fn expire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn settle(in_flight: &mut Option<InFlight>) -> Result<Board, String> {
    match in_flight {
        Some(flight) => match (&mut flight.task).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("save task failed: {e}")),
        },
        None => pending().await,
    }
}
