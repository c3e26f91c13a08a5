//! Database schema: weights, energy and versioned secrets.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the initial schema (version 1).
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- Weight samples keyed by the provider log id, never a generated key
        CREATE TABLE IF NOT EXISTS weights (
            log_id INTEGER PRIMARY KEY,
            date TEXT NOT NULL,
            time TEXT NOT NULL,
            weight REAL NOT NULL,
            measured_at INTEGER NOT NULL,
            utc_offset INTEGER NOT NULL,
            synced_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_weights_date ON weights(date);
        CREATE INDEX IF NOT EXISTS idx_weights_measured_at ON weights(measured_at);

        -- Energy samples; identity is enforced by reconciliation per scope
        CREATE TABLE IF NOT EXISTS energy (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            granularity TEXT NOT NULL,
            day TEXT NOT NULL,
            kilojoules REAL NOT NULL,
            measured_at INTEGER NOT NULL,
            utc_offset INTEGER NOT NULL,
            synced_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_energy_day
            ON energy(kind, granularity, day);
        CREATE INDEX IF NOT EXISTS idx_energy_time
            ON energy(kind, granularity, measured_at);

        -- Versioned secrets; destroyed versions keep their row but lose the payload
        CREATE TABLE IF NOT EXISTS secret_versions (
            name TEXT NOT NULL,
            version INTEGER NOT NULL,
            payload BLOB,
            state TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            destroyed_at INTEGER,
            PRIMARY KEY (name, version)
        );
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"weights".to_string()));
        assert!(tables.contains(&"energy".to_string()));
        assert!(tables.contains(&"secret_versions".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}
