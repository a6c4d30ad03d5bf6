//! In-memory collaborators for exercising the screens without SQLite or disk.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::db::{NoteFeed, NoteRepository};
use crate::images::{DEFAULT_MAX_IMAGE_BYTES, ImageError, ImageStore};
use crate::models::Note;
use crate::mvi::{Observer, Screen};

pub const FAKE_IMAGE_DIR: &str = "/fake/images";

#[derive(Default)]
pub struct FakeRepository {
    state: Mutex<RepoState>,
}

#[derive(Default)]
struct RepoState {
    notes: Vec<Note>,
    next_id: i64,
    subscribers: Vec<mpsc::Sender<Result<Vec<Note>>>>,
    fail_insert: Option<String>,
    fail_update: Option<String>,
    fail_delete: Option<String>,
    fail_get: Option<String>,
    insert_calls: usize,
    update_calls: usize,
    delete_calls: usize,
    get_calls: usize,
}

impl RepoState {
    fn store_new(&mut self, mut note: Note) -> i64 {
        self.next_id += 1;
        note.id = self.next_id;
        self.notes.push(note);
        self.next_id
    }

    fn broadcast(&mut self) {
        let snapshot = self.notes.clone();
        self.subscribers
            .retain(|tx| tx.try_send(Ok(snapshot.clone())).is_ok());
    }
}

impl FakeRepository {
    fn lock(&self) -> std::sync::MutexGuard<'_, RepoState> {
        self.state.lock().unwrap()
    }

    /// Stores a note as if another writer had inserted it; live feeds see it.
    pub fn seed(&self, note: Note) -> i64 {
        let mut state = self.lock();
        let id = state.store_new(note);
        state.broadcast();
        id
    }

    pub fn note(&self, id: i64) -> Option<Note> {
        self.lock().notes.iter().find(|n| n.id == id).cloned()
    }

    pub fn notes(&self) -> Vec<Note> {
        self.lock().notes.clone()
    }

    /// Pushes a read failure to every open feed.
    pub fn fail_feeds(&self, message: &str) {
        let mut state = self.lock();
        let subscribers = std::mem::take(&mut state.subscribers);
        for tx in subscribers {
            let _ = tx.try_send(Err(anyhow::anyhow!(message.to_string())));
        }
    }

    pub fn fail_insert(&self, message: &str) {
        self.lock().fail_insert = Some(message.to_string());
    }

    pub fn fail_update(&self, message: &str) {
        self.lock().fail_update = Some(message.to_string());
    }

    pub fn fail_delete(&self, message: &str) {
        self.lock().fail_delete = Some(message.to_string());
    }

    pub fn fail_get(&self, message: &str) {
        self.lock().fail_get = Some(message.to_string());
    }

    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls
    }

    pub fn update_calls(&self) -> usize {
        self.lock().update_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.lock().delete_calls
    }

    pub fn get_calls(&self) -> usize {
        self.lock().get_calls
    }

    pub fn write_calls(&self) -> usize {
        let state = self.lock();
        state.insert_calls + state.update_calls + state.delete_calls
    }
}

#[async_trait]
impl NoteRepository for FakeRepository {
    fn observe_all(&self) -> NoteFeed {
        let (tx, rx) = mpsc::channel(32);
        let mut state = self.lock();
        let _ = tx.try_send(Ok(state.notes.clone()));
        state.subscribers.push(tx);
        rx
    }

    async fn insert(&self, note: Note) -> Result<i64> {
        let mut state = self.lock();
        state.insert_calls += 1;
        if let Some(message) = state.fail_insert.clone() {
            bail!(message);
        }
        let id = state.store_new(note);
        state.broadcast();
        Ok(id)
    }

    async fn update(&self, note: Note) -> Result<()> {
        let mut state = self.lock();
        state.update_calls += 1;
        if let Some(message) = state.fail_update.clone() {
            bail!(message);
        }
        let Some(slot) = state.notes.iter_mut().find(|n| n.id == note.id) else {
            bail!("note {} not found", note.id);
        };
        *slot = note;
        state.broadcast();
        Ok(())
    }

    async fn delete(&self, note: &Note) -> Result<()> {
        let mut state = self.lock();
        state.delete_calls += 1;
        if let Some(message) = state.fail_delete.clone() {
            bail!(message);
        }
        state.notes.retain(|n| n.id != note.id);
        state.broadcast();
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Note>> {
        let mut state = self.lock();
        state.get_calls += 1;
        if let Some(message) = state.fail_get.clone() {
            bail!(message);
        }
        Ok(state.notes.iter().find(|n| n.id == id).cloned())
    }
}

#[derive(Default)]
pub struct FakeImageStore {
    state: Mutex<ImageState>,
}

#[derive(Default)]
struct ImageState {
    saved: Vec<PathBuf>,
    deleted: Vec<PathBuf>,
    too_large: bool,
    io_failure: Option<String>,
}

impl FakeImageStore {
    pub fn reject_as_too_large(&self) {
        self.state.lock().unwrap().too_large = true;
    }

    pub fn fail_io(&self, message: &str) {
        self.state.lock().unwrap().io_failure = Some(message.to_string());
    }

    pub fn saved(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().saved.clone()
    }

    pub fn deleted(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl ImageStore for FakeImageStore {
    async fn save(&self, _source: &Path, file_name: &str) -> Result<PathBuf, ImageError> {
        let mut state = self.state.lock().unwrap();
        if state.too_large {
            return Err(ImageError::TooLarge {
                bytes: DEFAULT_MAX_IMAGE_BYTES + 1,
                limit: DEFAULT_MAX_IMAGE_BYTES,
            });
        }
        if let Some(message) = state.io_failure.clone() {
            return Err(ImageError::Io(std::io::Error::other(message)));
        }
        let path = Path::new(FAKE_IMAGE_DIR).join(file_name);
        state.saved.push(path.clone());
        Ok(path)
    }

    async fn delete(&self, path: &Path) {
        self.state.lock().unwrap().deleted.push(path.to_path_buf());
    }
}

/// Observer that keeps every change, state and effect a store produced.
pub struct Recorder<S: Screen> {
    changes: Arc<Mutex<Vec<String>>>,
    states: Arc<Mutex<Vec<S::State>>>,
    effects: Arc<Mutex<Vec<String>>>,
}

impl<S: Screen> Default for Recorder<S> {
    fn default() -> Self {
        Self {
            changes: Arc::default(),
            states: Arc::default(),
            effects: Arc::default(),
        }
    }
}

impl<S: Screen> Clone for Recorder<S> {
    fn clone(&self) -> Self {
        Self {
            changes: Arc::clone(&self.changes),
            states: Arc::clone(&self.states),
            effects: Arc::clone(&self.effects),
        }
    }
}

impl<S: Screen> Recorder<S> {
    pub fn changes(&self) -> Vec<String> {
        self.changes.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<S::State> {
        self.states.lock().unwrap().clone()
    }

    pub fn effects(&self) -> Vec<String> {
        self.effects.lock().unwrap().clone()
    }
}

impl<S: Screen> Observer<S> for Recorder<S> {
    fn change(&self, change: &S::Change) {
        self.changes.lock().unwrap().push(format!("{change:?}"));
    }

    fn state(&self, state: &S::State) {
        self.states.lock().unwrap().push(state.clone());
    }

    fn effect(&self, effect: &S::Effect) {
        self.effects.lock().unwrap().push(format!("{effect:?}"));
    }
}
