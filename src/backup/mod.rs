//! Logical backup and restore
//!
//! Dumps are produced through the driver contract only; imports split the
//! text into statements and replay them through the same driver.

pub mod dump;
pub mod import;
pub mod splitter;

pub use dump::{DumpGenerator, DumpOutput, DEFAULT_ROW_LIMIT};
pub use import::{import_file, import_sql, validate_file_name};
pub use splitter::SqlSplitter;
