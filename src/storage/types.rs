//! Row types for every table the service owns.
//!
//! Ids are UUIDs stored as TEXT; timestamps are RFC3339 TEXT mapped through
//! chrono; free-form list/object fields are JSON TEXT columns decoded with
//! `#[sqlx(json)]`. Every row below the `users` table carries an ownership
//! chain back to exactly one user, and every query filters on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Parent account. `password_hash` is `None` for social-login-only accounts
/// and never serialized into responses.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const GENDERS: [&str; 3] = ["M", "F", "O"];
pub const AGE_GROUPS: [&str; 3] = ["3-5", "6-8", "9-12"];

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Child {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub age: i64,
    /// One of `GENDERS`
    pub gender: String,
    /// One of `AGE_GROUPS`
    pub age_group: String,
    /// Path into the external file store, not managed here
    pub avatar: Option<String>,
    #[sqlx(json)]
    pub interests: Vec<String>,
    #[sqlx(json)]
    pub languages: Vec<String>,
    pub reading_level: String,
    #[sqlx(json)]
    pub favorite_topics: Vec<String>,
    #[sqlx(json)]
    pub learning_goals: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Static, admin-managed story content. `(title, character)` is unique.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub description: String,
    pub character: String,
    pub category: String,
    pub content: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Chat {
    pub id: String,
    pub child_id: String,
    pub character: String,
    pub story_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub content: String,
    /// True when the child wrote it, false for the character's reply
    pub is_from_user: bool,
    pub audio_file: Option<String>,
    pub vocabulary_score: Option<f64>,
    pub grammar_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counters for one chat, created lazily on the first message and
/// bumped with atomic SQL increments afterwards.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChatAnalytics {
    pub id: String,
    pub chat_id: String,
    pub message_count: i64,
    pub total_words: i64,
    pub avg_vocabulary_score: f64,
    pub avg_grammar_score: f64,
    #[sqlx(json)]
    pub topics: Vec<String>,
    #[sqlx(json)]
    pub growth: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Written by an external scoring process; this service only reads them.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LearningMilestone {
    pub id: String,
    pub child_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub achieved_at: DateTime<Utc>,
    #[sqlx(json)]
    pub metrics: Value,
}

/// Per-(child, character) running totals, updated on every exchange.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CharacterInteraction {
    pub id: String,
    pub child_id: String,
    pub character: String,
    pub total_chats: i64,
    pub total_messages: i64,
    pub total_time_minutes: i64,
    #[sqlx(json)]
    pub favorite_topics: Vec<String>,
    pub last_interaction: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LearningProgress {
    pub id: String,
    pub child_id: String,
    pub chat_id: String,
    #[sqlx(json)]
    pub vocabulary_learned: Value,
    #[sqlx(json)]
    pub topics_discussed: Value,
    pub engagement_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ParentReview {
    pub id: String,
    pub child_id: String,
    pub chat_id: String,
    pub notes: String,
    /// 1..=5 when present
    pub rating: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Device {
    pub id: String,
    pub user_id: String,
    /// Hardware identifier reported by the companion client, unique
    pub device_id: String,
    pub name: String,
    pub is_active: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DeviceSession {
    pub id: String,
    pub device_id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

pub const INTERACTION_TYPES: [&str; 3] = ["AUDIO_IN", "AUDIO_OUT", "ERROR"];

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DeviceInteraction {
    pub id: String,
    pub device_id: String,
    pub session_id: String,
    /// One of `INTERACTION_TYPES`
    pub interaction_type: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Bearer token kinds issued by the auth gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }

    pub fn from_str(s: &str) -> Option<TokenKind> {
        match s {
            "access" => Some(TokenKind::Access),
            "refresh" => Some(TokenKind::Refresh),
            _ => None,
        }
    }
}

/// Issued token row. Logout flips `revoked`; expiry is checked on every use.
#[derive(Debug, Clone, FromRow)]
pub struct AuthToken {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}
