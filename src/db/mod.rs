/// Connection management and query execution.
pub mod config;
pub mod driver;
pub mod executor;

pub use config::{ConnectionConfig, SslMode};
pub use driver::{Connection, Driver, PgConn, PgDriver, Record};
pub use executor::{Database, Listing, PgDatabase, QueryOutput};
