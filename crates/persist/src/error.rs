/// Errors from the shared store and the local snapshot.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("snapshot file access: {0}")]
    Io(#[from] std::io::Error),
    #[error("shared store query: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("could not encode {0}")]
    CborEncode(String),
    #[error("could not decode {0}")]
    CborDecode(String),
    #[error("snapshot manifest: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot digest {actual} does not match manifest {expected}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("snapshot written with schema {file_version}, this build reads {expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("malformed row: {0}")]
    Malformed(String),
    #[error("shared store disabled by configuration")]
    LocalOnly,
    #[error("shared store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the error means the connection itself is unusable, as opposed
    /// to a problem with one statement or row. Lock contention is not: the
    /// busy timeout already waited and the caller may simply retry.
    pub fn is_connection_error(&self) -> bool {
        use rusqlite::ErrorCode;
        match self {
            Self::Unavailable(_) | Self::Io(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::NotADatabase
                    | ErrorCode::DatabaseCorrupt
                    | ErrorCode::ReadOnly
                    | ErrorCode::DiskFull
            ),
            _ => false,
        }
    }
}
