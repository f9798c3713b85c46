use thiserror::Error;

#[derive(Debug, Error)]
pub enum QaError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type QaResult<T> = Result<T, QaError>;

pub(crate) trait OptionalRow<T> {
    /// Turn `QueryReturnedNoRows` into `NotFound(what)`.
    fn or_not_found(self, what: impl FnOnce() -> String) -> QaResult<T>;
}

impl<T> OptionalRow<T> for Result<T, rusqlite::Error> {
    fn or_not_found(self, what: impl FnOnce() -> String) -> QaResult<T> {
        match self {
            Ok(value) => Ok(value),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(QaError::NotFound(what())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Map a UNIQUE/PRIMARY KEY failure to `Conflict`, leave everything else alone.
pub(crate) fn conflict_on_constraint(err: rusqlite::Error, what: impl FnOnce() -> String) -> QaError {
    match &err {
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            QaError::Conflict(what())
        }
        _ => QaError::Sql(err),
    }
}
