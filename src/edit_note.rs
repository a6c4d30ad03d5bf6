use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{NotesBackend, is_blank_title};
use crate::images::{ImageError, ImageStore, generate_file_name};
use crate::models::{Note, UNSAVED_NOTE_ID, now_millis};
use crate::mvi::{ChangeSink, PartialChange, Screen, StateView, Store, StoreOptions};

pub type EditNoteStore = Store<EditNoteScreen>;

const BLANK_TITLE: &str = "Title cannot be empty";
const NOTE_NOT_FOUND: &str = "Note not found";
const NOTE_SAVED: &str = "Note saved successfully";

#[derive(Debug, Clone, PartialEq)]
pub enum EditNoteIntent {
    LoadNote(i64),
    UpdateTitle(String),
    UpdateContent(String),
    /// `None` removes the picture from the note.
    SelectImage(Option<PathBuf>),
    SaveNote,
    ClearError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditNoteState {
    /// `None` while creating a new note.
    pub note_id: Option<i64>,
    pub title: String,
    pub content: String,
    /// Picture shown in the editor: either the stored file or a freshly
    /// picked source that is only copied into storage on save.
    pub selected_image: Option<PathBuf>,
    /// Stored picture of the note as it was loaded.
    pub current_image_path: Option<PathBuf>,
    pub is_edit_mode: bool,
    pub is_loading_note: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    pub is_note_saved: bool,
    pub is_current_image_changed: bool,
}

impl EditNoteState {
    /// Non-positive targets (the list's "new note" sentinel) open the editor
    /// in create mode.
    pub fn new(edit_target: Option<i64>) -> Self {
        let note_id = edit_target.filter(|id| *id > UNSAVED_NOTE_ID);
        Self {
            note_id,
            is_edit_mode: note_id.is_some(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditNoteChange {
    LoadingStarted(i64),
    NoteLoaded(Note),
    UpdateTitle(String),
    UpdateContent(String),
    SelectImage(Option<PathBuf>),
    SavingStarted,
    NoteSaved,
    ErrorOccurred(String),
    ErrorCleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditNoteEffect {
    ShowToast(String),
    NavigateBack,
}

impl PartialChange<EditNoteState> for EditNoteChange {
    fn reduce(self, state: &EditNoteState) -> EditNoteState {
        match self {
            EditNoteChange::LoadingStarted(note_id) => EditNoteState {
                note_id: Some(note_id),
                is_edit_mode: true,
                is_loading_note: true,
                error: None,
                ..state.clone()
            },
            EditNoteChange::NoteLoaded(note) => EditNoteState {
                title: note.title,
                content: note.content,
                selected_image: note.image_path.clone(),
                current_image_path: note.image_path,
                is_current_image_changed: false,
                is_loading_note: false,
                error: None,
                ..state.clone()
            },
            EditNoteChange::UpdateTitle(title) => EditNoteState {
                title,
                ..state.clone()
            },
            EditNoteChange::UpdateContent(content) => EditNoteState {
                content,
                ..state.clone()
            },
            EditNoteChange::SelectImage(image) => EditNoteState {
                selected_image: image,
                is_current_image_changed: true,
                ..state.clone()
            },
            EditNoteChange::SavingStarted => EditNoteState {
                is_loading: true,
                error: None,
                ..state.clone()
            },
            EditNoteChange::NoteSaved => EditNoteState {
                is_loading: false,
                is_note_saved: true,
                ..state.clone()
            },
            EditNoteChange::ErrorOccurred(error) => EditNoteState {
                is_loading: false,
                is_loading_note: false,
                error: Some(error),
                ..state.clone()
            },
            EditNoteChange::ErrorCleared => EditNoteState {
                error: None,
                ..state.clone()
            },
        }
    }
}

/// Where the saved note's picture ends up, and which files to clean up
/// depending on whether the note row is written.
struct ResolvedImage {
    path: Option<PathBuf>,
    written: Option<PathBuf>,
    replaced: Option<PathBuf>,
}

impl ResolvedImage {
    fn unchanged(path: Option<PathBuf>) -> Self {
        Self {
            path,
            written: None,
            replaced: None,
        }
    }
}

pub struct EditNoteScreen {
    backend: NotesBackend,
    images: Arc<dyn ImageStore>,
}

impl EditNoteScreen {
    pub fn new(backend: NotesBackend, images: Arc<dyn ImageStore>) -> Self {
        Self { backend, images }
    }

    async fn load_note(&self, note_id: i64, changes: &ChangeSink<EditNoteChange>) {
        changes.emit(EditNoteChange::LoadingStarted(note_id));
        let change = match self.backend.note(note_id).await {
            Ok(Some(note)) => EditNoteChange::NoteLoaded(note),
            Ok(None) => EditNoteChange::ErrorOccurred(NOTE_NOT_FOUND.to_string()),
            Err(err) => EditNoteChange::ErrorOccurred(err.to_string()),
        };
        changes.emit(change);
    }

    async fn save_note(&self, state: EditNoteState, changes: &ChangeSink<EditNoteChange>) {
        if is_blank_title(&state.title) {
            changes.emit(EditNoteChange::ErrorOccurred(BLANK_TITLE.to_string()));
            return;
        }
        let title = state.title.trim();
        changes.emit(EditNoteChange::SavingStarted);

        let image = match self.resolve_image(&state).await {
            Ok(image) => image,
            Err(message) => {
                changes.emit(EditNoteChange::ErrorOccurred(message));
                return;
            }
        };

        let now = now_millis();
        let note = match state.note_id.filter(|_| state.is_edit_mode) {
            Some(note_id) => {
                let created_at = match self.backend.note(note_id).await {
                    Ok(Some(existing)) => existing.created_at,
                    _ => now,
                };
                Note {
                    id: note_id,
                    title: title.to_string(),
                    content: state.content.trim().to_string(),
                    image_path: image.path.clone(),
                    created_at,
                    updated_at: now,
                }
            }
            None => Note {
                id: UNSAVED_NOTE_ID,
                title: title.to_string(),
                content: state.content.trim().to_string(),
                image_path: image.path.clone(),
                created_at: now,
                updated_at: now,
            },
        };

        match self.backend.save(note).await {
            Ok(note_id) => {
                if let Some(old) = image.replaced.as_deref() {
                    self.images.delete(old).await;
                }
                debug!(note_id, "Note saved from editor");
                changes.emit(EditNoteChange::NoteSaved);
            }
            Err(err) => {
                if let Some(written) = image.written.as_deref() {
                    self.images.delete(written).await;
                }
                changes.emit(EditNoteChange::ErrorOccurred(err.to_string()));
            }
        }
    }

    async fn resolve_image(&self, state: &EditNoteState) -> Result<ResolvedImage, String> {
        if !state.is_current_image_changed || state.selected_image == state.current_image_path {
            return Ok(ResolvedImage::unchanged(state.selected_image.clone()));
        }

        let replaced = state
            .current_image_path
            .clone()
            .filter(|_| state.is_edit_mode);
        let Some(source) = state.selected_image.as_deref() else {
            return Ok(ResolvedImage {
                path: None,
                written: None,
                replaced,
            });
        };

        match self.images.save(source, &generate_file_name()).await {
            Ok(stored) => Ok(ResolvedImage {
                path: Some(stored.clone()),
                written: Some(stored),
                replaced,
            }),
            Err(ImageError::TooLarge { limit, .. }) => Err(format!(
                "Image size exceeds {} limit",
                format_size_limit(limit)
            )),
            Err(err) => Err(format!("Failed to save image: {err}")),
        }
    }
}

/// Renders a byte limit the way the size error shows it: "2MB", "1.5MB",
/// "1KB" or "900 bytes".
fn format_size_limit(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;

    let (value, unit) = if bytes >= MIB {
        (bytes as f64 / MIB as f64, "MB")
    } else if bytes >= KIB {
        (bytes as f64 / KIB as f64, "KB")
    } else {
        return format!("{bytes} bytes");
    };
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{}{unit}", rounded as u64)
    } else {
        format!("{rounded:.1}{unit}")
    }
}

#[async_trait]
impl Screen for EditNoteScreen {
    const NAME: &'static str = "edit_note";

    type Intent = EditNoteIntent;
    type State = EditNoteState;
    type Change = EditNoteChange;
    type Effect = EditNoteEffect;

    async fn handle(
        &self,
        intent: EditNoteIntent,
        state: StateView<EditNoteState>,
        changes: ChangeSink<EditNoteChange>,
    ) {
        match intent {
            EditNoteIntent::LoadNote(note_id) => self.load_note(note_id, &changes).await,
            EditNoteIntent::UpdateTitle(title) => {
                changes.emit(EditNoteChange::UpdateTitle(title));
            }
            EditNoteIntent::UpdateContent(content) => {
                changes.emit(EditNoteChange::UpdateContent(content));
            }
            EditNoteIntent::SelectImage(image) => {
                changes.emit(EditNoteChange::SelectImage(image));
            }
            EditNoteIntent::SaveNote => self.save_note(state.current(), &changes).await,
            EditNoteIntent::ClearError => {
                changes.emit(EditNoteChange::ErrorCleared);
            }
        }
    }

    fn side_effects(&self, change: &EditNoteChange) -> Vec<EditNoteEffect> {
        match change {
            EditNoteChange::ErrorOccurred(error) => vec![EditNoteEffect::ShowToast(error.clone())],
            EditNoteChange::NoteSaved => vec![
                EditNoteEffect::ShowToast(NOTE_SAVED.to_string()),
                EditNoteEffect::NavigateBack,
            ],
            _ => Vec::new(),
        }
    }
}

/// Starts an editor store. With a valid `edit_target` the note is loaded
/// straight away.
pub fn open_editor(
    screen: EditNoteScreen,
    edit_target: Option<i64>,
    options: StoreOptions<EditNoteScreen>,
) -> EditNoteStore {
    let initial = EditNoteState::new(edit_target);
    let load = initial.note_id;
    let store = Store::with_options(screen, initial, options);
    if let Some(note_id) = load {
        store.process_intent(EditNoteIntent::LoadNote(note_id));
    }
    store
}
