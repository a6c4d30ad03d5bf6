use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use crate::images::DEFAULT_MAX_IMAGE_BYTES;
use crate::mvi::DEFAULT_EFFECT_BUFFER;

/// Overrides the platform data directory when set.
pub const DATA_DIR_ENV: &str = "NOTEKEEPER_DATA_DIR";

const DATABASE_FILE: &str = "notes.db";
const IMAGES_DIR: &str = "images";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    /// Largest decoded (RGBA) size accepted for a note picture.
    pub max_image_bytes: u64,
    /// Capacity of each screen's one-shot effect queue.
    pub effect_buffer: usize,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => ProjectDirs::from("com", "Notekeeper", "notekeeper")
                .context("Cannot determine project dirs")?
                .data_dir()
                .to_path_buf(),
        };
        Ok(Self::with_data_dir(data_dir))
    }

    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            effect_buffer: DEFAULT_EFFECT_BUFFER,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join(IMAGES_DIR)
    }
}
