/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Database unavailability is the only fatal error class for a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Migrate(_))
    }
}

/// Parse a TEXT status column into its domain enum.
pub(crate) fn parse_status<T>(value: &str, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

/// Same, for nullable status columns.
pub(crate) fn parse_opt_status<T>(value: Option<&str>, column: &str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    value.map(|v| parse_status(v, column)).transpose()
}
