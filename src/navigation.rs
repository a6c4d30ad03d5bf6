use std::fmt;

/// Route argument the list passes when it opens the editor for a new note.
pub const NEW_NOTE_ARG: i64 = -1;

const NOTES_LIST_ROUTE: &str = "notes";
const EDIT_NOTE_ROUTE: &str = "edit_note";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    NotesList,
    EditNote { note_id: Option<i64> },
}

impl Destination {
    pub fn new_note() -> Self {
        Destination::EditNote { note_id: None }
    }

    pub fn edit_note(note_id: i64) -> Self {
        Destination::EditNote {
            note_id: Some(note_id),
        }
    }

    pub fn route(&self) -> String {
        match self {
            Destination::NotesList => NOTES_LIST_ROUTE.to_string(),
            Destination::EditNote { note_id } => {
                format!("{EDIT_NOTE_ROUTE}/{}", note_id.unwrap_or(NEW_NOTE_ARG))
            }
        }
    }

    /// Parses a route string. Unknown routes and malformed arguments give `None`.
    pub fn parse(route: &str) -> Option<Self> {
        let route = route.trim_matches('/');
        if route == NOTES_LIST_ROUTE {
            return Some(Destination::NotesList);
        }
        let arg = route.strip_prefix(EDIT_NOTE_ROUTE)?.strip_prefix('/')?;
        let note_id: i64 = arg.parse().ok()?;
        Some(Destination::EditNote {
            note_id: Some(note_id).filter(|id| *id != NEW_NOTE_ARG),
        })
    }

    /// The note the editor should load. Only positive ids name a stored note.
    pub fn edit_target(&self) -> Option<i64> {
        match self {
            Destination::EditNote { note_id } => note_id.filter(|id| *id > 0),
            Destination::NotesList => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.route())
    }
}
