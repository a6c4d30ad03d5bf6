use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::backend::NotesBackend;
use crate::config::AppConfig;
use crate::db::{NoteRepository, SqliteNoteStore};
use crate::edit_note::{EditNoteScreen, EditNoteStore, open_editor};
use crate::images::{ImageStore, LocalImageStore};
use crate::mvi::{Screen, StoreOptions};
use crate::navigation::Destination;
use crate::notes_list::{NotesIntent, NotesListScreen, NotesListStore, NotesState};

/// Store of whichever screen a destination opens.
pub enum ScreenStore {
    NotesList(NotesListStore),
    EditNote(EditNoteStore),
}

/// Wires storage, images and the domain operations together and hands out
/// one store per displayed screen. Stores must be created inside a tokio
/// runtime.
pub struct NotesApp {
    config: AppConfig,
    backend: NotesBackend,
    images: Arc<dyn ImageStore>,
}

impl NotesApp {
    pub fn open(config: AppConfig) -> Result<Self> {
        let images_dir = config.images_dir();
        std::fs::create_dir_all(&images_dir)
            .with_context(|| format!("failed to create {}", images_dir.display()))?;
        let repo = SqliteNoteStore::open(config.database_path())?;
        let images = LocalImageStore::new(images_dir, config.max_image_bytes);
        info!(data_dir = %config.data_dir().display(), "Notes app ready");
        Ok(Self::with_parts(config, Arc::new(repo), Arc::new(images)))
    }

    pub fn with_parts(
        config: AppConfig,
        repo: Arc<dyn NoteRepository>,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        Self {
            config,
            backend: NotesBackend::new(repo),
            images,
        }
    }

    /// List store, already subscribed to the stored notes.
    pub fn notes_list(&self) -> NotesListStore {
        let screen = NotesListScreen::new(self.backend.clone(), Arc::clone(&self.images));
        let store = NotesListStore::with_options(screen, NotesState::default(), self.options());
        store.process_intent(NotesIntent::LoadNotes);
        store
    }

    /// Editor store; a positive `edit_target` loads that note, anything else
    /// starts a new one.
    pub fn edit_note(&self, edit_target: Option<i64>) -> EditNoteStore {
        let screen = EditNoteScreen::new(self.backend.clone(), Arc::clone(&self.images));
        open_editor(screen, edit_target, self.options())
    }

    pub fn open_destination(&self, destination: Destination) -> ScreenStore {
        match destination {
            Destination::NotesList => ScreenStore::NotesList(self.notes_list()),
            Destination::EditNote { .. } => {
                ScreenStore::EditNote(self.edit_note(destination.edit_target()))
            }
        }
    }

    fn options<S: Screen>(&self) -> StoreOptions<S> {
        StoreOptions::default().effect_buffer(self.config.effect_buffer)
    }
}
