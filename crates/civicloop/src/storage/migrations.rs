//! Schema versioning for the local box database.

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// The current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

/// A single forward-only schema step.
struct Migration {
    version: i32,
    description: &'static str,
    apply: fn(&Connection) -> Result<()>,
}

/// Ordered list of migrations. Version 1 is the base schema.
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "keyed boxes and metadata",
    apply: base_schema,
}];

/// Version 1 tables are created by `SCHEMA_STATEMENTS`; nothing else to do.
fn base_schema(_conn: &Connection) -> Result<()> {
    Ok(())
}

/// Create the base tables and bring the schema up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns an error if table creation fails, a stored version is unreadable,
/// or the database is newer than this build understands.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let version = schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {version} is newer than supported {CURRENT_VERSION}"
            ),
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > version) {
        info!(
            "Applying schema migration v{}: {}",
            migration.version, migration.description
        );
        (migration.apply)(conn)?;
        set_schema_version(conn, migration.version)?;
    }

    debug!("Schema at version {}", CURRENT_VERSION);
    Ok(())
}

/// Read the stored schema version; 0 for a fresh database.
fn schema_version(conn: &Connection) -> Result<i32> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        }),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Connection {
        Connection::open_in_memory().expect("failed to create in-memory database")
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    #[test]
    fn test_initialize_schema_creates_tables() {
        let conn = create_test_db();
        initialize_schema(&conn).expect("failed to initialize schema");

        assert!(table_exists(&conn, "boxes"));
        assert!(table_exists(&conn, "metadata"));
    }

    #[test]
    fn test_initialize_schema_sets_version() {
        let conn = create_test_db();
        initialize_schema(&conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_initialize_schema_idempotent() {
        let conn = create_test_db();

        initialize_schema(&conn).expect("first init failed");
        initialize_schema(&conn).expect("second init failed");

        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_schema_version_fresh_db() {
        let conn = create_test_db();
        conn.execute(super::super::schema::CREATE_METADATA_TABLE, [])
            .unwrap();

        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_rejects_newer_schema() {
        let conn = create_test_db();
        initialize_schema(&conn).unwrap();
        set_schema_version(&conn, CURRENT_VERSION + 1).unwrap();

        let err = initialize_schema(&conn).unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[test]
    fn test_rejects_garbage_version() {
        let conn = create_test_db();
        initialize_schema(&conn).unwrap();
        conn.execute(
            "UPDATE metadata SET value = 'abc' WHERE key = ?1",
            [VERSION_KEY],
        )
        .unwrap();

        let err = initialize_schema(&conn).unwrap_err();
        assert!(err.to_string().contains("invalid schema version"));
    }

    #[test]
    fn test_migrations_are_ordered() {
        let versions: Vec<i32> = MIGRATIONS.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        assert_eq!(versions, sorted);
        assert_eq!(versions.last().copied(), Some(CURRENT_VERSION));
    }
}
