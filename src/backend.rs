use std::sync::Arc;

use tracing::debug;

use crate::db::{NoteFeed, NoteRepository};
use crate::models::Note;

const MAX_TITLE_LENGTH: usize = 10_000;
const MAX_CONTENT_LENGTH: usize = 10_000_000;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Storage(String),
}

/// Note operations used by the screens. Every call is an independent,
/// single-row operation.
#[derive(Clone)]
pub struct NotesBackend {
    repo: Arc<dyn NoteRepository>,
}

impl NotesBackend {
    pub fn new(repo: Arc<dyn NoteRepository>) -> Self {
        Self { repo }
    }

    pub fn notes(&self) -> NoteFeed {
        self.repo.observe_all()
    }

    pub async fn note(&self, note_id: i64) -> Result<Option<Note>, BackendError> {
        ensure_note_id(note_id)?;
        self.repo.get_by_id(note_id).await.map_err(map_anyhow)
    }

    /// Creates the note when it has never been stored, otherwise overwrites
    /// the stored row. Returns the note's identifier.
    pub async fn save(&self, note: Note) -> Result<i64, BackendError> {
        let note = sanitize_note(note)?;
        if note.is_persisted() {
            let id = note.id;
            self.repo.update(note).await.map_err(map_anyhow)?;
            debug!(id, "Note updated");
            Ok(id)
        } else {
            let id = self.repo.insert(note).await.map_err(map_anyhow)?;
            debug!(id, "Note created");
            Ok(id)
        }
    }

    pub async fn delete(&self, note: &Note) -> Result<(), BackendError> {
        ensure_note_id(note.id)?;
        self.repo.delete(note).await.map_err(map_anyhow)
    }
}

/// True when nothing but whitespace or stripped characters remains of `title`.
pub fn is_blank_title(title: &str) -> bool {
    sanitize_text(title).trim().is_empty()
}

fn sanitize_note(mut note: Note) -> Result<Note, BackendError> {
    if is_blank_title(&note.title) {
        return Err(BackendError::Validation(
            "title must not be empty".to_string(),
        ));
    }
    note.title = sanitize_text(&note.title).trim().to_string();
    if note.title.len() > MAX_TITLE_LENGTH {
        return Err(BackendError::Validation(
            "title exceeds maximum length".to_string(),
        ));
    }

    note.content = sanitize_text(&note.content);
    if note.content.len() > MAX_CONTENT_LENGTH {
        return Err(BackendError::Validation(
            "content exceeds maximum length".to_string(),
        ));
    }
    Ok(note)
}

/// Drops control characters other than common whitespace, plus the
/// replacement character and byte order mark.
fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            if c == '\n' || c == '\t' || c == '\r' {
                return true;
            }
            if c < ' ' {
                return false;
            }
            c != '\u{FFFD}' && c != '\u{FEFF}'
        })
        .collect()
}

fn ensure_note_id(note_id: i64) -> Result<(), BackendError> {
    if note_id <= 0 {
        return Err(BackendError::Validation(
            "note id must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

fn map_anyhow(err: anyhow::Error) -> BackendError {
    let no_rows = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::QueryReturnedNoRows)
        )
    });
    let message = err.to_string();
    if no_rows || message.contains("not found") {
        return BackendError::NotFound(message);
    }

    BackendError::Storage(message)
}
