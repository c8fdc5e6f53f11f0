//! Vector store using SQLite and sqlite-vec
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub mod models;
pub mod records;
pub mod search;

use models::StoreHeader;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS store_header (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    dimension INTEGER NOT NULL,
    model_identifier TEXT NOT NULL,
    created_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS embeddings (
    chunk_id TEXT PRIMARY KEY,
    vector BLOB NOT NULL,
    model_identifier TEXT NOT NULL,
    created_at DATETIME NOT NULL,
    symbol_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    file_path TEXT NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    token_estimate INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_embeddings_file ON embeddings(file_path);
CREATE INDEX IF NOT EXISTS idx_embeddings_symbol ON embeddings(symbol_id);
"#;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Errors raised by the vector store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("dimension mismatch: store holds {expected}-d vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("model mismatch: store holds `{expected}` vectors, got `{actual}`")]
    ModelMismatch { expected: String, actual: String },

    #[error("corrupt store: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone)]
enum Target {
    File(PathBuf),
    Memory,
}

/// r2d2 manager for sqlite-vec enabled rusqlite connections.
#[derive(Debug)]
pub struct SqliteManager {
    target: Target,
}

impl r2d2::ManageConnection for SqliteManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        let conn = match &self.target {
            Target::File(path) => Connection::open(path)?,
            Target::Memory => Connection::open_in_memory()?,
        };
        conn.busy_timeout(Duration::from_secs(5))?;
        // journal_mode returns the resulting mode as a row
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch("SELECT 1")
    }

    fn has_broken(&self, _conn: &mut Connection) -> bool {
        false
    }
}

pub type PooledConnection = r2d2::PooledConnection<SqliteManager>;

/// Persistent nearest-neighbor store over `embeddings` rows.
///
/// Clones share one connection pool.
#[derive(Clone)]
pub struct VectorStore {
    pool: r2d2::Pool<SqliteManager>,
}

impl VectorStore {
    /// Open (or create) a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!("Initializing vector store: {}", path.display());
        init_sqlite_vec();

        let manager = SqliteManager {
            target: Target::File(path.to_path_buf()),
        };
        // Switch to WAL and create the schema once before pooled connections race for it.
        drop(r2d2::ManageConnection::connect(&manager)?);

        let pool = r2d2::Pool::builder()
            .max_size(8)
            .min_idle(Some(1))
            .build(manager)?;
        let store = Self { pool };
        store.log_version()?;
        Ok(store)
    }

    /// Open an in-memory store (useful for testing).
    ///
    /// Uses a single pooled connection that is never recycled, since each
    /// in-memory connection is its own database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        init_sqlite_vec();
        let pool = r2d2::Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .build(SqliteManager { target: Target::Memory })?;
        let store = Self { pool };
        store.log_version()?;
        Ok(store)
    }

    fn log_version(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<PooledConnection, StoreError> {
        Ok(self.pool.get()?)
    }

    /// Established dimension and model, if any record was ever written.
    pub fn header(&self) -> Result<Option<StoreHeader>, StoreError> {
        read_header(&*self.conn()?)
    }
}

pub(crate) fn read_header(conn: &Connection) -> Result<Option<StoreHeader>, StoreError> {
    let row = conn
        .query_row(
            "SELECT dimension, model_identifier, created_at FROM store_header WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, DateTime<Utc>>(2)?,
                ))
            },
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some((dimension, model_identifier, created_at)) => {
            let dimension = usize::try_from(dimension)
                .ok()
                .filter(|d| *d > 0)
                .ok_or_else(|| StoreError::Corrupt(format!("invalid dimension {dimension}")))?;
            Ok(Some(StoreHeader {
                dimension,
                model_identifier,
                created_at,
            }))
        }
    }
}

/// Helper to serialize a float32 vector into little-endian bytes
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Inverse of [`serialize_vector`].
pub fn deserialize_vector(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::Corrupt(format!(
            "vector blob of {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Hash of chunk text used to skip re-embedding unchanged chunks.
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}
