use std::path::Path;
use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};

use crate::error_handling::types::StorageError;

/// SQLite-backed storage shared by every domain. The pool is cheap to clone;
/// the schema is created on open so a fresh deployment needs no migration
/// step.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: Pool<Sqlite>,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT,
        first_name TEXT NOT NULL DEFAULT '',
        last_name TEXT NOT NULL DEFAULT '',
        phone_number TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS children (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        age INTEGER NOT NULL,
        gender TEXT NOT NULL DEFAULT 'O',
        age_group TEXT NOT NULL DEFAULT '6-8',
        avatar TEXT,
        interests TEXT NOT NULL DEFAULT '[]',
        languages TEXT NOT NULL DEFAULT '[]',
        reading_level TEXT NOT NULL DEFAULT 'Beginner',
        favorite_topics TEXT NOT NULL DEFAULT '[]',
        learning_goals TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS stories (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        character TEXT NOT NULL,
        category TEXT NOT NULL DEFAULT '',
        content TEXT NOT NULL,
        image TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(title, character)
    );",
    "CREATE TABLE IF NOT EXISTS chats (
        id TEXT PRIMARY KEY,
        child_id TEXT NOT NULL REFERENCES children(id) ON DELETE CASCADE,
        character TEXT NOT NULL,
        story_id TEXT REFERENCES stories(id) ON DELETE SET NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
        content TEXT NOT NULL,
        is_from_user INTEGER NOT NULL DEFAULT 1,
        audio_file TEXT,
        vocabulary_score REAL,
        grammar_score REAL,
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS chat_analytics (
        id TEXT PRIMARY KEY,
        chat_id TEXT NOT NULL UNIQUE REFERENCES chats(id) ON DELETE CASCADE,
        message_count INTEGER NOT NULL DEFAULT 0,
        total_words INTEGER NOT NULL DEFAULT 0,
        avg_vocabulary_score REAL NOT NULL DEFAULT 0,
        avg_grammar_score REAL NOT NULL DEFAULT 0,
        topics TEXT NOT NULL DEFAULT '[]',
        growth TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS learning_milestones (
        id TEXT PRIMARY KEY,
        child_id TEXT NOT NULL REFERENCES children(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL DEFAULT '',
        achieved_at TEXT NOT NULL,
        metrics TEXT NOT NULL DEFAULT '{}'
    );",
    "CREATE TABLE IF NOT EXISTS character_interactions (
        id TEXT PRIMARY KEY,
        child_id TEXT NOT NULL REFERENCES children(id) ON DELETE CASCADE,
        character TEXT NOT NULL,
        total_chats INTEGER NOT NULL DEFAULT 0,
        total_messages INTEGER NOT NULL DEFAULT 0,
        total_time_minutes INTEGER NOT NULL DEFAULT 0,
        favorite_topics TEXT NOT NULL DEFAULT '[]',
        last_interaction TEXT NOT NULL,
        UNIQUE(child_id, character)
    );",
    "CREATE TABLE IF NOT EXISTS learning_progress (
        id TEXT PRIMARY KEY,
        child_id TEXT NOT NULL REFERENCES children(id) ON DELETE CASCADE,
        chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
        vocabulary_learned TEXT NOT NULL DEFAULT '{}',
        topics_discussed TEXT NOT NULL DEFAULT '{}',
        engagement_score REAL NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS parent_reviews (
        id TEXT PRIMARY KEY,
        child_id TEXT NOT NULL REFERENCES children(id) ON DELETE CASCADE,
        chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
        notes TEXT NOT NULL DEFAULT '',
        rating INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS devices (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        device_id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        last_seen TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS device_sessions (
        id TEXT PRIMARY KEY,
        device_id TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        session_id TEXT NOT NULL UNIQUE,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        is_active INTEGER NOT NULL DEFAULT 1
    );",
    "CREATE TABLE IF NOT EXISTS device_interactions (
        id TEXT PRIMARY KEY,
        device_id TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        session_id TEXT NOT NULL REFERENCES device_sessions(id) ON DELETE CASCADE,
        interaction_type TEXT NOT NULL,
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS auth_tokens (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        revoked INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );",
];

impl Database {
    /// Open (or create) the database file and bring the schema up.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Corrupted(e.to_string()))?;
            }
        }
        let opts = SqliteConnectOptions::from_str("sqlite://")
            .map_err(StorageError::ConnectionFailed)?
            .filename(path_ref)
            .create_if_missing(true)
            // per-connection pragma, so it has to be part of the options
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(StorageError::ConnectionFailed)?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(StorageError::QueryFailed)?;
        }

        Ok(Self { pool })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// Fresh database in a temp directory. The caller holds the `TempDir` so
    /// it outlives the pool and is removed when the test finishes.
    pub async fn temp_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.sqlite3");
        let db = Database::open(path).await.unwrap();
        (db, dir)
    }
}
