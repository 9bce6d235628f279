pub mod db;
pub mod error;
pub mod query;
pub mod views;

pub use db::{ConnectionConfig, Database, Listing, PgDatabase, QueryOutput, Record, SslMode};
pub use error::{CompileError, DriverError, PgError};
pub use query::{FilterNode, QueryBuilder, SqlValue};
pub use views::{ReportOutput, ReportRequest, ViewDefinition, ViewRegistry};
