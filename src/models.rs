use std::path::PathBuf;

use chrono::Utc;

/// Identifier carried by a note that has not been written to the store yet.
pub const UNSAVED_NOTE_ID: i64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub image_path: Option<PathBuf>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Note {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        image_path: Option<PathBuf>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: UNSAVED_NOTE_ID,
            title: title.into(),
            content: content.into(),
            image_path,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id > UNSAVED_NOTE_ID
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
