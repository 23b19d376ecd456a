/// Errors surfaced by the storage layer.
///
/// Open-time failures (`Open`, `SchemaTooNew`) are fatal to the caller;
/// everything else downgrades to a `false` write result at the public
/// write surface so a bad disk never stops collection.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The database could not be opened or initialized.
    #[error("storage: cannot open database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The on-disk schema was written by a newer build.
    #[error("storage: schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    /// The in-memory write batch is at its hard cap.
    #[error("storage: write buffer full ({cap} points)")]
    BufferFull { cap: usize },

    /// Corruption was detected during a flush; the handle only accepts
    /// reads until the process restarts.
    #[error("storage: handle degraded after corruption; restart required")]
    Degraded,

    /// The tiered retention windows are not strictly increasing.
    #[error("storage: invalid retention tiers: {0}")]
    InvalidRetention(String),

    /// A tier name that is not one of the three known tables.
    #[error("storage: unknown tier table '{0}'")]
    UnknownTable(String),

    /// An underlying SQLite error.
    #[error("storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
