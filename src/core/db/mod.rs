/// Database Module
///
/// Provider-independent data access, organized into focused submodules.
///
/// ## Architecture
///
/// - **Values** (`value.rs`): portable values, portable parameter types and coercions
/// - **Parameters** (`parameter.rs`): named, typed, directional parameters
/// - **Commands** (`command.rs`): the reusable command descriptor and its flags
/// - **Providers** (`provider.rs`): the capability a backend implements
/// - **Rows** (`row.rs`): typed column access and the ordinal cache
/// - **Connection Management** (`connection.rs`): open/close, binding, transactions
/// - **Readers** (`reader.rs`): the raw row cursor handle
/// - **Query Execution** (`query.rs`): fetch, fetch-one, non-query and scalar
///
/// ## Error Handling
///
/// All operations use the standardized `DbError` type for consistent error propagation.
pub mod command;
pub mod connection;
pub mod parameter;
pub mod provider;
pub mod query;
pub mod reader;
pub mod row;
pub mod value;

pub use command::*;
pub use connection::*;
pub use parameter::*;
pub use provider::*;
pub use query::*;
pub use reader::*;
pub use row::*;
pub use value::*;
