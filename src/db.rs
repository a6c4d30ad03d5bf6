use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow, bail, ensure};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, Row, Transaction, params};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::models::Note;

const CURRENT_SCHEMA_VERSION: i64 = 2;
const FEED_CAPACITY: usize = 16;

const NOTE_COLUMNS: &str = "id, title, content, image_path, created_at, updated_at";

/// Live sequence of ordered note snapshots.
///
/// The first snapshot arrives as soon as the feed is opened; later ones follow
/// every committed write. A failed read is delivered once and ends the feed.
pub type NoteFeed = mpsc::Receiver<Result<Vec<Note>>>;

#[async_trait]
pub trait NoteRepository: Send + Sync {
    fn observe_all(&self) -> NoteFeed;
    async fn insert(&self, note: Note) -> Result<i64>;
    async fn update(&self, note: Note) -> Result<()>;
    async fn delete(&self, note: &Note) -> Result<()>;
    async fn get_by_id(&self, id: i64) -> Result<Option<Note>>;
}

struct Database {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

pub struct SqliteNoteStore {
    db: Arc<Database>,
    changes: watch::Sender<u64>,
}

impl SqliteNoteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let conn = match open_file(&path) {
            Ok(conn) => conn,
            Err(err) if is_corruption_error(&err) => {
                warn!(path = %path.display(), error = %err, "Note database is corrupt, starting fresh");
                backup_corrupt_db_files(&path)?;
                open_file(&path)?
            }
            Err(err) => return Err(err),
        };

        info!(path = %path.display(), "Opened note database");
        Ok(Self::from_parts(Some(path), conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        apply_migrations(&mut conn)?;
        Ok(Self::from_parts(None, conn))
    }

    fn from_parts(path: Option<PathBuf>, conn: Connection) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            db: Arc::new(Database {
                path,
                conn: Mutex::new(conn),
            }),
            changes,
        }
    }

    fn notify_changed(&self) {
        self.changes.send_modify(|version| *version += 1);
    }
}

#[async_trait]
impl NoteRepository for SqliteNoteStore {
    fn observe_all(&self) -> NoteFeed {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let db = Arc::clone(&self.db);
        let mut changes = self.changes.subscribe();

        tokio::spawn(async move {
            loop {
                changes.borrow_and_update();
                let snapshot = blocking(&db, fetch_all).await;
                let failed = snapshot.is_err();
                if tx.send(snapshot).await.is_err() || failed {
                    break;
                }

                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tx.closed() => break,
                }
            }
            debug!("Note feed closed");
        });

        rx
    }

    async fn insert(&self, note: Note) -> Result<i64> {
        ensure!(!note.is_persisted(), "note {} is already stored", note.id);
        let id = blocking(&self.db, move |conn| {
            conn.execute(
                "INSERT INTO notes(title, content, image_path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    note.title,
                    note.content,
                    image_path_column(&note),
                    note.created_at,
                    note.updated_at
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await?;

        debug!(id, "Inserted note");
        self.notify_changed();
        Ok(id)
    }

    async fn update(&self, note: Note) -> Result<()> {
        let id = note.id;
        blocking(&self.db, move |conn| {
            let changed = conn.execute(
                "UPDATE notes
                 SET title = ?1, content = ?2, image_path = ?3, created_at = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    note.title,
                    note.content,
                    image_path_column(&note),
                    note.created_at,
                    note.updated_at,
                    note.id
                ],
            )?;
            if changed == 0 {
                bail!("note {} not found", note.id);
            }
            Ok(())
        })
        .await?;

        debug!(id, "Updated note");
        self.notify_changed();
        Ok(())
    }

    async fn delete(&self, note: &Note) -> Result<()> {
        let id = note.id;
        let removed = blocking(&self.db, move |conn| {
            Ok(conn.execute("DELETE FROM notes WHERE id = ?1", [id])?)
        })
        .await?;

        debug!(id, removed, "Deleted note");
        if removed > 0 {
            self.notify_changed();
        }
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Note>> {
        blocking(&self.db, move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1"),
                    [id],
                    note_from_row,
                )
                .optional()?)
        })
        .await
    }
}

async fn blocking<T, F>(db: &Arc<Database>, operation: F) -> Result<T>
where
    T: Send + 'static,
    F: FnMut(&Connection) -> Result<T> + Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || db.run_with_recovery(operation))
        .await
        .context("database worker stopped unexpectedly")?
}

impl Database {
    fn run_with_recovery<T, F>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(&Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("note database lock poisoned"))?;
        match operation(&conn) {
            Ok(value) => Ok(value),
            Err(err) if is_corruption_error(&err) => {
                let Some(path) = self.path.as_deref() else {
                    return Err(err);
                };
                warn!(path = %path.display(), error = %err, "Recovering corrupt note database");
                recover_connection(&mut conn, path)?;
                operation(&conn)
            }
            Err(err) => Err(err),
        }
    }
}

fn fetch_all(conn: &Connection) -> Result<Vec<Note>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NOTE_COLUMNS} FROM notes ORDER BY created_at DESC, id DESC"
    ))?;
    let notes = stmt
        .query_map([], note_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(notes)
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        image_path: row.get::<_, Option<String>>(3)?.map(PathBuf::from),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn image_path_column(note: &Note) -> Option<String> {
    note.image_path
        .as_ref()
        .map(|path| path.to_string_lossy().into_owned())
}

fn create_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
    )?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!(mode = %mode, "Journal mode set");
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

fn open_file(path: &Path) -> Result<Connection> {
    let mut conn = create_connection(path)?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

fn recover_connection(conn: &mut Connection, path: &Path) -> Result<()> {
    let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
    let old = std::mem::replace(conn, Connection::open_in_memory()?);
    drop(old);
    backup_corrupt_db_files(path)?;
    *conn = open_file(path)?;
    Ok(())
}

fn backup_corrupt_db_files(db_file: &Path) -> Result<()> {
    let stamp = Utc::now().timestamp();
    for file in [
        db_file.to_path_buf(),
        PathBuf::from(format!("{}-wal", db_file.display())),
        PathBuf::from(format!("{}-shm", db_file.display())),
    ] {
        if file.exists() {
            let backup = PathBuf::from(format!("{}.corrupt.{stamp}", file.display()));
            std::fs::rename(&file, &backup).with_context(|| {
                format!(
                    "failed to move corrupt database file from {} to {}",
                    file.display(),
                    backup.display()
                )
            })?;
        }
    }
    Ok(())
}

fn is_corruption_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(sql_err) = cause.downcast_ref::<rusqlite::Error>() {
            return matches!(
                sql_err,
                rusqlite::Error::SqliteFailure(code, _)
                    if code.code == ErrorCode::DatabaseCorrupt
                        || code.code == ErrorCode::NotADatabase
            );
        }

        let msg = cause.to_string().to_lowercase();
        msg.contains("database disk image is malformed")
    })
}

fn apply_migrations(conn: &mut Connection) -> Result<()> {
    create_schema_version_table(conn)?;
    let mut version = get_schema_version(conn)?;

    while version < CURRENT_SCHEMA_VERSION {
        let target = version + 1;
        let tx = conn.transaction()?;
        match target {
            1 => migrate_to_v1(&tx)?,
            2 => migrate_to_v2(&tx)?,
            _ => bail!("unsupported schema version migration: {target}"),
        }
        set_schema_version(&tx, target)?;
        tx.commit()?;
        debug!(version = target, "Applied note schema migration");
        version = target;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn
        .query_row(
            "SELECT version FROM schema_version WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0))
}

fn set_schema_version(tx: &Transaction<'_>, version: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO schema_version(id, version) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET version = excluded.version",
        [version],
    )?;
    Ok(())
}

fn migrate_to_v1(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            image_path TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn migrate_to_v2(tx: &Transaction<'_>) -> Result<()> {
    // Listing sorts newest first on every snapshot.
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_notes_created_at ON notes(created_at DESC, id DESC);",
    )?;
    Ok(())
}
