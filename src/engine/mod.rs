// Data Engine Module
// Universal abstraction layer for all database engines

pub mod dialect;
pub mod drivers;
pub mod error;
pub mod humanize;
pub mod paginator;
pub mod registry;
pub mod sql_safety;
pub mod traits;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use dialect::{Dialect, MySqlDialect, PostgresDialect};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use registry::{DriverFactory, DriverRegistry, SqlxDriverFactory};
pub use traits::DatabaseDriver;
pub use types::*;
