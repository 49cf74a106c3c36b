use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(16)
        .connect(database_url)
        .await
}

/// Idempotent schema setup, run once at startup. Timestamps are unix
/// seconds; file lists are JSON arrays of stored names. The unique key
/// on (room_id, client_id) is the one-submission-per-participant rule.
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rooms (
            id          TEXT PRIMARY KEY,
            created_at  INTEGER NOT NULL,
            expires_at  INTEGER NOT NULL,
            creator_id  TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS submissions (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id       TEXT NOT NULL,
            client_id     TEXT NOT NULL,
            yaml_files    TEXT NOT NULL DEFAULT '[]',
            apworld_files TEXT NOT NULL DEFAULT '[]',
            created_at    INTEGER NOT NULL,
            updated_at    INTEGER NOT NULL,
            UNIQUE (room_id, client_id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rooms_expires_at ON rooms(expires_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_submissions_room_id ON submissions(room_id)")
        .execute(pool)
        .await?;

    Ok(())
}
