//! `SQLite` schema definitions for civicloop.
//!
//! Local state is kept as keyed JSON blobs, one row per box.

/// SQL statement to create the keyed blob table.
pub const CREATE_BOXES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS boxes (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[CREATE_BOXES_TABLE, CREATE_METADATA_TABLE];
