pub mod models;
pub mod repository;
pub mod source;
pub mod stats;
pub mod error;

// Re-exports
pub use models::{NewRecord, ProjectDatabaseRecord, RecordRow};
pub use repository::ServiceDatabase;
pub use source::RecordSource;
pub use stats::SqliteStatsProvider;
pub use error::{Error, Result};
