// Database module
// SQLite storage for the reference passage index

pub mod sqlite;

pub use sqlite::*;
