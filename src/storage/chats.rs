//! Story, chat, message and chat-analytics queries. Chat and message access
//! goes through a join on `children.user_id`, never on the chat id alone.

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::types::{Chat, ChatAnalytics, Message, Story};
use crate::storage::Database;

#[derive(Debug, Clone, Deserialize)]
pub struct NewStory {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub character: String,
    #[serde(default)]
    pub category: String,
    pub content: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatUpdate {
    pub character: Option<String>,
    pub story_id: Option<String>,
}

/// Parameters for a new persisted message. Scores are optional and backfilled
/// by the external scoring process for user messages.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub chat_id: &'a str,
    pub content: &'a str,
    pub is_from_user: bool,
    pub audio_file: Option<String>,
    pub vocabulary_score: Option<f64>,
    pub grammar_score: Option<f64>,
}

impl Database {
    pub async fn create_story(&self, new: &NewStory) -> Result<Story, StorageError> {
        let story = Story {
            id: Uuid::new_v4().to_string(),
            title: new.title.clone(),
            description: new.description.clone(),
            character: new.character.clone(),
            category: new.category.clone(),
            content: new.content.clone(),
            image: new.image.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO stories (id, title, description, character, category, content, image, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&story.id)
        .bind(&story.title)
        .bind(&story.description)
        .bind(&story.character)
        .bind(&story.category)
        .bind(&story.content)
        .bind(&story.image)
        .bind(story.created_at)
        .bind(story.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(story)
    }

    /// Stories are public; optional filters narrow by character and category.
    pub async fn list_stories(
        &self,
        character: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<Story>, StorageError> {
        let mut sql = String::from("SELECT * FROM stories");
        let mut clauses: Vec<&str> = Vec::new();
        let mut binds: Vec<String> = Vec::new();
        if let Some(c) = character {
            clauses.push("character = ?");
            binds.push(c.to_string());
        }
        if let Some(c) = category {
            clauses.push("category = ?");
            binds.push(c.to_string());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = sqlx::query_as::<_, Story>(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        query
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)
    }

    pub async fn get_story(&self, id: &str) -> Result<Option<Story>, StorageError> {
        sqlx::query_as::<_, Story>("SELECT * FROM stories WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)
    }

    pub async fn create_chat(
        &self,
        child_id: &str,
        character: &str,
        story_id: Option<&str>,
    ) -> Result<Chat, StorageError> {
        let chat = Chat {
            id: Uuid::new_v4().to_string(),
            child_id: child_id.to_string(),
            character: character.to_string(),
            story_id: story_id.map(|s| s.to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO chats (id, child_id, character, story_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&chat.id)
        .bind(&chat.child_id)
        .bind(&chat.character)
        .bind(&chat.story_id)
        .bind(chat.created_at)
        .bind(chat.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(chat)
    }

    pub async fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>, StorageError> {
        sqlx::query_as::<_, Chat>(
            "SELECT chats.* FROM chats
             JOIN children ON children.id = chats.child_id
             WHERE children.user_id = ?1
             ORDER BY chats.updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)
    }

    pub async fn get_chat(
        &self,
        user_id: &str,
        chat_id: &str,
    ) -> Result<Option<Chat>, StorageError> {
        sqlx::query_as::<_, Chat>(
            "SELECT chats.* FROM chats
             JOIN children ON children.id = chats.child_id
             WHERE chats.id = ?1 AND children.user_id = ?2",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)
    }

    pub async fn update_chat(
        &self,
        user_id: &str,
        chat_id: &str,
        update: &ChatUpdate,
    ) -> Result<Option<Chat>, StorageError> {
        sqlx::query(
            "UPDATE chats SET
                character = COALESCE(?3, character),
                story_id = COALESCE(?4, story_id),
                updated_at = ?5
             WHERE id = ?1 AND child_id IN (SELECT id FROM children WHERE user_id = ?2)",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(&update.character)
        .bind(&update.story_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        self.get_chat(user_id, chat_id).await
    }

    pub async fn delete_chat(&self, user_id: &str, chat_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "DELETE FROM chats WHERE id = ?1 AND child_id IN
                (SELECT id FROM children WHERE user_id = ?2)",
        )
        .bind(chat_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_message(&self, new: &NewMessage<'_>) -> Result<Message, StorageError> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            chat_id: new.chat_id.to_string(),
            content: new.content.to_string(),
            is_from_user: new.is_from_user,
            audio_file: new.audio_file.clone(),
            vocabulary_score: new.vocabulary_score,
            grammar_score: new.grammar_score,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO messages (id, chat_id, content, is_from_user, audio_file,
                                   vocabulary_score, grammar_score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&message.id)
        .bind(&message.chat_id)
        .bind(&message.content)
        .bind(message.is_from_user)
        .bind(&message.audio_file)
        .bind(message.vocabulary_score)
        .bind(message.grammar_score)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        sqlx::query("UPDATE chats SET updated_at = ?2 WHERE id = ?1")
            .bind(new.chat_id)
            .bind(message.created_at)
            .execute(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)?;
        Ok(message)
    }

    /// Messages of one chat, oldest first.
    pub async fn list_chat_messages(&self, chat_id: &str) -> Result<Vec<Message>, StorageError> {
        sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE chat_id = ?1 ORDER BY created_at ASC",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)
    }

    /// All messages the user may see, across their children's chats.
    pub async fn list_messages(&self, user_id: &str) -> Result<Vec<Message>, StorageError> {
        sqlx::query_as::<_, Message>(
            "SELECT messages.* FROM messages
             JOIN chats ON chats.id = messages.chat_id
             JOIN children ON children.id = chats.child_id
             WHERE children.user_id = ?1
             ORDER BY messages.created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)
    }

    /// Fold one exchange (user message + reply) into the chat's analytics row.
    ///
    /// A single upsert so two concurrent exchanges on the same chat cannot
    /// lose an update; the row is created on the first message.
    pub async fn record_exchange(
        &self,
        chat_id: &str,
        messages_added: i64,
        words_added: i64,
    ) -> Result<(), StorageError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO chat_analytics (id, chat_id, message_count, total_words, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(chat_id) DO UPDATE SET
               message_count = message_count + excluded.message_count,
               total_words = total_words + excluded.total_words,
               updated_at = excluded.updated_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(chat_id)
        .bind(messages_added)
        .bind(words_added)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(())
    }

    pub async fn get_chat_analytics(
        &self,
        chat_id: &str,
    ) -> Result<Option<ChatAnalytics>, StorageError> {
        sqlx::query_as::<_, ChatAnalytics>("SELECT * FROM chat_analytics WHERE chat_id = ?1")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)
    }

    /// Chats of one child created at or after `since`, newest last. Used by
    /// the analytics window aggregation.
    pub async fn chats_for_child_since(
        &self,
        child_id: &str,
        since: chrono::DateTime<Utc>,
    ) -> Result<Vec<Chat>, StorageError> {
        sqlx::query_as::<_, Chat>(
            "SELECT * FROM chats WHERE child_id = ?1 AND created_at >= ?2 ORDER BY created_at ASC",
        )
        .bind(child_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::test_support::temp_db;
    use crate::storage::users::NewChild;

    async fn seed_child(db: &Database) -> (String, String) {
        let user = db.create_user("p@x.org", None, "", "", "").await.unwrap();
        let child = db
            .create_child(
                &user.id,
                &NewChild {
                    name: "Mia".to_string(),
                    age: 6,
                    gender: None,
                    age_group: None,
                    avatar: None,
                    interests: vec![],
                    languages: vec![],
                    reading_level: None,
                    favorite_topics: vec![],
                    learning_goals: vec![],
                },
            )
            .await
            .unwrap();
        (user.id, child.id)
    }

    #[tokio::test]
    async fn test_story_filters() {
        let (db, _dir) = temp_db().await;
        db.create_story(&NewStory {
            title: "Moon Trip".to_string(),
            description: String::new(),
            character: "Luna".to_string(),
            category: "Space".to_string(),
            content: "...".to_string(),
            image: None,
        })
        .await
        .unwrap();
        db.create_story(&NewStory {
            title: "Jungle Day".to_string(),
            description: String::new(),
            character: "Dodo".to_string(),
            category: "Nature".to_string(),
            content: "...".to_string(),
            image: None,
        })
        .await
        .unwrap();

        assert_eq!(db.list_stories(None, None).await.unwrap().len(), 2);
        let luna = db.list_stories(Some("Luna"), None).await.unwrap();
        assert_eq!(luna.len(), 1);
        assert_eq!(luna[0].title, "Moon Trip");
        assert!(db
            .list_stories(Some("Luna"), Some("Nature"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_chat_ownership_join() {
        let (db, _dir) = temp_db().await;
        let (user_id, child_id) = seed_child(&db).await;
        let other = db.create_user("o@x.org", None, "", "", "").await.unwrap();

        let chat = db.create_chat(&child_id, "Luna", None).await.unwrap();
        assert!(db.get_chat(&user_id, &chat.id).await.unwrap().is_some());
        assert!(db.get_chat(&other.id, &chat.id).await.unwrap().is_none());
        assert!(db.list_chats(&other.id).await.unwrap().is_empty());
        assert!(!db.delete_chat(&other.id, &chat.id).await.unwrap());
        assert!(db.delete_chat(&user_id, &chat.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_exchange_counters_accumulate() {
        let (db, _dir) = temp_db().await;
        let (_, child_id) = seed_child(&db).await;
        let chat = db.create_chat(&child_id, "Luna", None).await.unwrap();

        db.record_exchange(&chat.id, 2, 10).await.unwrap();
        db.record_exchange(&chat.id, 2, 5).await.unwrap();

        let analytics = db.get_chat_analytics(&chat.id).await.unwrap().unwrap();
        assert_eq!(analytics.message_count, 4);
        assert_eq!(analytics.total_words, 15);
    }

    #[tokio::test]
    async fn test_window_excludes_older_chats() {
        let (db, _dir) = temp_db().await;
        let (_, child_id) = seed_child(&db).await;
        let old = db.create_chat(&child_id, "Luna", None).await.unwrap();
        let recent = db.create_chat(&child_id, "Dodo", None).await.unwrap();

        // Rewind one chat's creation time past the window edge
        sqlx::query("UPDATE chats SET created_at = '2000-01-01T00:00:00Z' WHERE id = ?1")
            .bind(&old.id)
            .execute(&db.pool)
            .await
            .unwrap();

        let since = Utc::now() - chrono::Duration::days(30);
        let windowed = db.chats_for_child_since(&child_id, since).await.unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].id, recent.id);
    }

    #[tokio::test]
    async fn test_chat_partial_update() {
        let (db, _dir) = temp_db().await;
        let (user_id, child_id) = seed_child(&db).await;
        let chat = db.create_chat(&child_id, "Luna", None).await.unwrap();

        let updated = db
            .update_chat(
                &user_id,
                &chat.id,
                &ChatUpdate {
                    character: Some("Dodo".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.character, "Dodo");
        assert_eq!(updated.story_id, None);

        // Strangers cannot update
        let other = db.create_user("o@x.org", None, "", "", "").await.unwrap();
        assert!(db
            .update_chat(&other.id, &chat.id, &ChatUpdate::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_messages_ordered_oldest_first() {
        let (db, _dir) = temp_db().await;
        let (user_id, child_id) = seed_child(&db).await;
        let chat = db.create_chat(&child_id, "Luna", None).await.unwrap();

        for content in ["first", "second", "third"] {
            db.create_message(&NewMessage {
                chat_id: &chat.id,
                content,
                is_from_user: true,
                audio_file: None,
                vocabulary_score: None,
                grammar_score: None,
            })
            .await
            .unwrap();
        }
        let messages = db.list_chat_messages(&chat.id).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(db.list_messages(&user_id).await.unwrap().len(), 3);
    }
}
