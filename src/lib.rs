//! Notes with an optional picture, driven by intent/state/effect screen stores
//! over a SQLite note store.

pub mod app;
pub mod backend;
pub mod config;
pub mod db;
pub mod edit_note;
pub mod images;
pub mod logging;
pub mod models;
pub mod mvi;
pub mod navigation;
pub mod notes_list;

#[cfg(test)]
pub(crate) mod test_utils;

pub use app::{NotesApp, ScreenStore};
pub use config::AppConfig;
pub use models::Note;
pub use navigation::Destination;
