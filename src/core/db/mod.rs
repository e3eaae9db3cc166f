/// Database Module
///
/// The database layer is split into three concerns:
/// - **Connection Management** (`connection.rs`): connection settings and the live `Session`
/// - **TLS** (`tls.rs`): the explicit TLS bootstrap and connector construction
/// - **Query Execution** (`query.rs`): the `Executor` seam and statement outcomes
///
/// ## Error Handling
///
/// All database operations use the standardized `YsqlError` type for consistent error propagation.
pub mod connection;
pub mod query;
pub mod tls;

pub use connection::*;
pub use query::*;
pub use tls::{initialize as initialize_tls, TlsContext};
