use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(i64),

    #[error("Database not found: {0}")]
    DatabaseNotFound(i64),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the store itself could not be reached, as opposed to a bad query.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Sqlx(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

impl From<Error> for qualstat_core::Error {
    fn from(err: Error) -> Self {
        if err.is_unavailable() {
            return qualstat_core::Error::StoreUnavailable(err.to_string());
        }
        match err {
            Error::ProjectNotFound(_) | Error::DatabaseNotFound(_) => {
                qualstat_core::Error::NotFound(err.to_string())
            }
            Error::Other(e) => qualstat_core::Error::Other(e),
            other => qualstat_core::Error::Other(anyhow::Error::new(other)),
        }
    }
}
