use thiserror::Error;

#[derive(Error, Debug)]
pub enum TracyError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Other error: {0}")]
    Other(String),
}

/// Failures surfaced by a [`crate::store::TracerStore`].
///
/// `Conflict` is an expected outcome (duplicate tracer string or duplicate
/// observation) and callers report it with its own status.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_conflict_display() {
        let err = StoreError::Conflict("duplicate key".to_string());
        assert!(err.is_conflict());
        assert_eq!(err.to_string(), "Conflict: duplicate key");
    }
}
