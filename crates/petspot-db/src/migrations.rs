use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE announcement (
                id                          TEXT PRIMARY KEY,
                pet_name                    TEXT,
                species                     TEXT NOT NULL,
                breed                       TEXT,
                sex                         TEXT NOT NULL,
                age                         INTEGER,
                description                 TEXT,
                microchip_number            TEXT UNIQUE,
                location_latitude           REAL NOT NULL,
                location_longitude          REAL NOT NULL,
                last_seen_date              TEXT NOT NULL,
                email                       TEXT,
                phone                       TEXT,
                photo_url                   TEXT,
                status                      TEXT NOT NULL DEFAULT 'MISSING',
                reward                      TEXT,
                management_password_hash    TEXT NOT NULL,
                created_at                  TEXT NOT NULL,
                updated_at                  TEXT NOT NULL
            );

            CREATE INDEX idx_announcement_location
                ON announcement(location_latitude, location_longitude);

            CREATE TABLE \"user\" (
                id              TEXT PRIMARY KEY,
                email           TEXT NOT NULL UNIQUE,
                password_hash   TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
