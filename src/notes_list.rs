use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::backend::NotesBackend;
use crate::images::ImageStore;
use crate::models::Note;
use crate::mvi::{ChangeSink, PartialChange, Screen, StateView, Store};

pub type NotesListStore = Store<NotesListScreen>;

#[derive(Debug, Clone, PartialEq)]
pub enum NotesIntent {
    LoadNotes,
    DeleteNote(Note),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotesState {
    pub notes: Vec<Note>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotesChange {
    LoadingStarted,
    NotesLoaded(Vec<Note>),
    ErrorOccurred(String),
    NoteDeleted(Note),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotesEffect {
    ShowToast(String),
}

impl PartialChange<NotesState> for NotesChange {
    fn reduce(self, state: &NotesState) -> NotesState {
        match self {
            NotesChange::LoadingStarted => NotesState {
                is_loading: true,
                error: None,
                ..state.clone()
            },
            NotesChange::NotesLoaded(notes) => NotesState {
                notes,
                is_loading: false,
                error: None,
            },
            NotesChange::ErrorOccurred(error) => NotesState {
                is_loading: false,
                error: Some(error),
                ..state.clone()
            },
            NotesChange::NoteDeleted(note) => NotesState {
                notes: state
                    .notes
                    .iter()
                    .filter(|n| n.id != note.id)
                    .cloned()
                    .collect(),
                ..state.clone()
            },
        }
    }
}

pub struct NotesListScreen {
    backend: NotesBackend,
    images: Arc<dyn ImageStore>,
    // Bumped by every LoadNotes; older live subscriptions stop when it moves.
    subscriptions: watch::Sender<u64>,
}

impl NotesListScreen {
    pub fn new(backend: NotesBackend, images: Arc<dyn ImageStore>) -> Self {
        let (subscriptions, _) = watch::channel(0);
        Self {
            backend,
            images,
            subscriptions,
        }
    }

    async fn load_notes(&self, changes: &ChangeSink<NotesChange>) {
        let mut generation = 0;
        self.subscriptions.send_modify(|current| {
            *current += 1;
            generation = *current;
        });
        let mut superseded = self.subscriptions.subscribe();
        let mut feed = self.backend.notes();

        loop {
            let snapshot = tokio::select! {
                biased;
                _ = async {
                    let _ = superseded.wait_for(|current| *current != generation).await;
                } => {
                    debug!(generation, "Notes subscription superseded");
                    return;
                }
                snapshot = feed.recv() => snapshot,
            };

            let Some(snapshot) = snapshot else {
                debug!(generation, "Notes feed ended");
                return;
            };
            if !changes.emit(NotesChange::LoadingStarted) {
                return;
            }
            match snapshot {
                Ok(notes) => {
                    changes.emit(NotesChange::NotesLoaded(notes));
                }
                Err(err) => {
                    changes.emit(NotesChange::ErrorOccurred(err.to_string()));
                    return;
                }
            }
        }
    }

    async fn delete_note(&self, note: Note, changes: &ChangeSink<NotesChange>) {
        match self.backend.delete(&note).await {
            Ok(()) => {
                if let Some(path) = note.image_path.as_deref() {
                    self.images.delete(path).await;
                }
                changes.emit(NotesChange::NoteDeleted(note));
            }
            Err(err) => {
                changes.emit(NotesChange::ErrorOccurred(err.to_string()));
            }
        }
    }
}

#[async_trait]
impl Screen for NotesListScreen {
    const NAME: &'static str = "notes_list";

    type Intent = NotesIntent;
    type State = NotesState;
    type Change = NotesChange;
    type Effect = NotesEffect;

    async fn handle(
        &self,
        intent: NotesIntent,
        _state: StateView<NotesState>,
        changes: ChangeSink<NotesChange>,
    ) {
        match intent {
            NotesIntent::LoadNotes => self.load_notes(&changes).await,
            NotesIntent::DeleteNote(note) => self.delete_note(note, &changes).await,
        }
    }

    fn side_effects(&self, change: &NotesChange) -> Vec<NotesEffect> {
        match change {
            NotesChange::NoteDeleted(_) => vec![NotesEffect::ShowToast("Note deleted".to_string())],
            NotesChange::ErrorOccurred(error) => vec![NotesEffect::ShowToast(error.clone())],
            NotesChange::LoadingStarted | NotesChange::NotesLoaded(_) => Vec::new(),
        }
    }
}
