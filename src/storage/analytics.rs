//! Analytics-domain queries: milestones, per-character interaction totals,
//! learning progress and parent reviews. Everything is reached through the
//! owning user's children, same as the chat domain.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::types::{
    CharacterInteraction, LearningMilestone, LearningProgress, ParentReview,
};
use crate::storage::Database;

#[derive(Debug, Clone, Deserialize)]
pub struct NewMilestone {
    pub child_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub achieved_at: Option<DateTime<Utc>>,
    #[serde(default = "default_object")]
    pub metrics: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLearningProgress {
    pub child_id: String,
    pub chat_id: String,
    #[serde(default = "default_object")]
    pub vocabulary_learned: Value,
    #[serde(default = "default_object")]
    pub topics_discussed: Value,
    #[serde(default)]
    pub engagement_score: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LearningProgressUpdate {
    pub vocabulary_learned: Option<Value>,
    pub topics_discussed: Option<Value>,
    pub engagement_score: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewParentReview {
    pub child_id: String,
    pub chat_id: String,
    #[serde(default)]
    pub notes: String,
    pub rating: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParentReviewUpdate {
    pub notes: Option<String>,
    pub rating: Option<i64>,
}

fn default_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Database {
    pub async fn create_milestone(
        &self,
        new: &NewMilestone,
    ) -> Result<LearningMilestone, StorageError> {
        let milestone = LearningMilestone {
            id: Uuid::new_v4().to_string(),
            child_id: new.child_id.clone(),
            title: new.title.clone(),
            description: new.description.clone(),
            category: new.category.clone(),
            achieved_at: new.achieved_at.unwrap_or_else(Utc::now),
            metrics: new.metrics.clone(),
        };
        sqlx::query(
            "INSERT INTO learning_milestones (id, child_id, title, description, category, achieved_at, metrics)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&milestone.id)
        .bind(&milestone.child_id)
        .bind(&milestone.title)
        .bind(&milestone.description)
        .bind(&milestone.category)
        .bind(milestone.achieved_at)
        .bind(serde_json::to_string(&milestone.metrics).unwrap_or_else(|_| "{}".to_string()))
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(milestone)
    }

    pub async fn list_milestones(
        &self,
        user_id: &str,
        child_id: Option<&str>,
    ) -> Result<Vec<LearningMilestone>, StorageError> {
        let mut sql = String::from(
            "SELECT learning_milestones.* FROM learning_milestones
             JOIN children ON children.id = learning_milestones.child_id
             WHERE children.user_id = ?1",
        );
        if child_id.is_some() {
            sql.push_str(" AND learning_milestones.child_id = ?2");
        }
        sql.push_str(" ORDER BY learning_milestones.achieved_at DESC");
        let mut query = sqlx::query_as::<_, LearningMilestone>(&sql).bind(user_id);
        if let Some(id) = child_id {
            query = query.bind(id);
        }
        query
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)
    }

    pub async fn get_milestone(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<LearningMilestone>, StorageError> {
        sqlx::query_as::<_, LearningMilestone>(
            "SELECT learning_milestones.* FROM learning_milestones
             JOIN children ON children.id = learning_milestones.child_id
             WHERE learning_milestones.id = ?1 AND children.user_id = ?2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)
    }

    pub async fn milestones_for_child_since(
        &self,
        child_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LearningMilestone>, StorageError> {
        sqlx::query_as::<_, LearningMilestone>(
            "SELECT * FROM learning_milestones
             WHERE child_id = ?1 AND achieved_at >= ?2
             ORDER BY achieved_at DESC",
        )
        .bind(child_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)
    }

    /// Upsert bump when a new chat with this character starts.
    pub async fn bump_character_chats(
        &self,
        child_id: &str,
        character: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO character_interactions
                 (id, child_id, character, total_chats, total_messages, last_interaction)
             VALUES (?1, ?2, ?3, 1, 0, ?4)
             ON CONFLICT(child_id, character) DO UPDATE SET
               total_chats = total_chats + 1,
               last_interaction = excluded.last_interaction",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(child_id)
        .bind(character)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(())
    }

    /// Upsert bump for each completed exchange. Atomic for the same reason as
    /// `record_exchange`.
    pub async fn bump_character_messages(
        &self,
        child_id: &str,
        character: &str,
        messages_added: i64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO character_interactions
                 (id, child_id, character, total_chats, total_messages, last_interaction)
             VALUES (?1, ?2, ?3, 0, ?4, ?5)
             ON CONFLICT(child_id, character) DO UPDATE SET
               total_messages = total_messages + excluded.total_messages,
               last_interaction = excluded.last_interaction",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(child_id)
        .bind(character)
        .bind(messages_added)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(())
    }

    pub async fn list_character_interactions(
        &self,
        user_id: &str,
        child_id: Option<&str>,
    ) -> Result<Vec<CharacterInteraction>, StorageError> {
        let mut sql = String::from(
            "SELECT character_interactions.* FROM character_interactions
             JOIN children ON children.id = character_interactions.child_id
             WHERE children.user_id = ?1",
        );
        if child_id.is_some() {
            sql.push_str(" AND character_interactions.child_id = ?2");
        }
        sql.push_str(" ORDER BY character_interactions.last_interaction DESC");
        let mut query = sqlx::query_as::<_, CharacterInteraction>(&sql).bind(user_id);
        if let Some(id) = child_id {
            query = query.bind(id);
        }
        query
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)
    }

    pub async fn create_learning_progress(
        &self,
        new: &NewLearningProgress,
    ) -> Result<LearningProgress, StorageError> {
        let progress = LearningProgress {
            id: Uuid::new_v4().to_string(),
            child_id: new.child_id.clone(),
            chat_id: new.chat_id.clone(),
            vocabulary_learned: new.vocabulary_learned.clone(),
            topics_discussed: new.topics_discussed.clone(),
            engagement_score: new.engagement_score,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO learning_progress
                 (id, child_id, chat_id, vocabulary_learned, topics_discussed, engagement_score, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&progress.id)
        .bind(&progress.child_id)
        .bind(&progress.chat_id)
        .bind(serde_json::to_string(&progress.vocabulary_learned).unwrap_or_else(|_| "{}".to_string()))
        .bind(serde_json::to_string(&progress.topics_discussed).unwrap_or_else(|_| "{}".to_string()))
        .bind(progress.engagement_score)
        .bind(progress.created_at)
        .bind(progress.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(progress)
    }

    pub async fn list_learning_progress(
        &self,
        user_id: &str,
        child_id: Option<&str>,
    ) -> Result<Vec<LearningProgress>, StorageError> {
        let mut sql = String::from(
            "SELECT learning_progress.* FROM learning_progress
             JOIN children ON children.id = learning_progress.child_id
             WHERE children.user_id = ?1",
        );
        if child_id.is_some() {
            sql.push_str(" AND learning_progress.child_id = ?2");
        }
        sql.push_str(" ORDER BY learning_progress.updated_at DESC");
        let mut query = sqlx::query_as::<_, LearningProgress>(&sql).bind(user_id);
        if let Some(id) = child_id {
            query = query.bind(id);
        }
        query
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)
    }

    pub async fn get_learning_progress(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<LearningProgress>, StorageError> {
        sqlx::query_as::<_, LearningProgress>(
            "SELECT learning_progress.* FROM learning_progress
             JOIN children ON children.id = learning_progress.child_id
             WHERE learning_progress.id = ?1 AND children.user_id = ?2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)
    }

    pub async fn update_learning_progress(
        &self,
        user_id: &str,
        id: &str,
        update: &LearningProgressUpdate,
    ) -> Result<Option<LearningProgress>, StorageError> {
        let vocabulary = update
            .vocabulary_learned
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_else(|_| "{}".to_string()));
        let topics = update
            .topics_discussed
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_else(|_| "{}".to_string()));
        sqlx::query(
            "UPDATE learning_progress SET
                vocabulary_learned = COALESCE(?3, vocabulary_learned),
                topics_discussed = COALESCE(?4, topics_discussed),
                engagement_score = COALESCE(?5, engagement_score),
                updated_at = ?6
             WHERE id = ?1 AND child_id IN (SELECT id FROM children WHERE user_id = ?2)",
        )
        .bind(id)
        .bind(user_id)
        .bind(vocabulary)
        .bind(topics)
        .bind(update.engagement_score)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        self.get_learning_progress(user_id, id).await
    }

    pub async fn delete_learning_progress(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "DELETE FROM learning_progress WHERE id = ?1 AND child_id IN
                (SELECT id FROM children WHERE user_id = ?2)",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_parent_review(
        &self,
        new: &NewParentReview,
    ) -> Result<ParentReview, StorageError> {
        let review = ParentReview {
            id: Uuid::new_v4().to_string(),
            child_id: new.child_id.clone(),
            chat_id: new.chat_id.clone(),
            notes: new.notes.clone(),
            rating: new.rating,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO parent_reviews (id, child_id, chat_id, notes, rating, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&review.id)
        .bind(&review.child_id)
        .bind(&review.chat_id)
        .bind(&review.notes)
        .bind(review.rating)
        .bind(review.created_at)
        .bind(review.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(review)
    }

    pub async fn list_parent_reviews(
        &self,
        user_id: &str,
        child_id: Option<&str>,
    ) -> Result<Vec<ParentReview>, StorageError> {
        let mut sql = String::from(
            "SELECT parent_reviews.* FROM parent_reviews
             JOIN children ON children.id = parent_reviews.child_id
             WHERE children.user_id = ?1",
        );
        if child_id.is_some() {
            sql.push_str(" AND parent_reviews.child_id = ?2");
        }
        sql.push_str(" ORDER BY parent_reviews.updated_at DESC");
        let mut query = sqlx::query_as::<_, ParentReview>(&sql).bind(user_id);
        if let Some(id) = child_id {
            query = query.bind(id);
        }
        query
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)
    }

    pub async fn get_parent_review(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<ParentReview>, StorageError> {
        sqlx::query_as::<_, ParentReview>(
            "SELECT parent_reviews.* FROM parent_reviews
             JOIN children ON children.id = parent_reviews.child_id
             WHERE parent_reviews.id = ?1 AND children.user_id = ?2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)
    }

    pub async fn update_parent_review(
        &self,
        user_id: &str,
        id: &str,
        update: &ParentReviewUpdate,
    ) -> Result<Option<ParentReview>, StorageError> {
        sqlx::query(
            "UPDATE parent_reviews SET
                notes = COALESCE(?3, notes),
                rating = COALESCE(?4, rating),
                updated_at = ?5
             WHERE id = ?1 AND child_id IN (SELECT id FROM children WHERE user_id = ?2)",
        )
        .bind(id)
        .bind(user_id)
        .bind(&update.notes)
        .bind(update.rating)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        self.get_parent_review(user_id, id).await
    }

    pub async fn delete_parent_review(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "DELETE FROM parent_reviews WHERE id = ?1 AND child_id IN
                (SELECT id FROM children WHERE user_id = ?2)",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::test_support::temp_db;
    use crate::storage::users::NewChild;

    async fn seed(db: &Database) -> (String, String) {
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
    async fn test_character_interaction_upserts() {
        let (db, _dir) = temp_db().await;
        let (user_id, child_id) = seed(&db).await;

        db.bump_character_chats(&child_id, "Luna").await.unwrap();
        db.bump_character_messages(&child_id, "Luna", 2).await.unwrap();
        db.bump_character_messages(&child_id, "Luna", 2).await.unwrap();
        db.bump_character_chats(&child_id, "Dodo").await.unwrap();

        let rows = db
            .list_character_interactions(&user_id, Some(&child_id))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        let luna = rows.iter().find(|r| r.character == "Luna").unwrap();
        assert_eq!(luna.total_chats, 1);
        assert_eq!(luna.total_messages, 4);
    }

    #[tokio::test]
    async fn test_milestone_window_filter() {
        let (db, _dir) = temp_db().await;
        let (user_id, child_id) = seed(&db).await;
        let old = Utc::now() - chrono::Duration::days(90);

        db.create_milestone(&NewMilestone {
            child_id: child_id.clone(),
            title: "First full sentence".to_string(),
            description: String::new(),
            category: "grammar".to_string(),
            achieved_at: Some(old),
            metrics: serde_json::json!({}),
        })
        .await
        .unwrap();
        db.create_milestone(&NewMilestone {
            child_id: child_id.clone(),
            title: "Ten new words".to_string(),
            description: String::new(),
            category: "vocabulary".to_string(),
            achieved_at: None,
            metrics: serde_json::json!({"words": 10}),
        })
        .await
        .unwrap();

        let since = Utc::now() - chrono::Duration::days(30);
        let recent = db
            .milestones_for_child_since(&child_id, since)
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].title, "Ten new words");
        assert_eq!(db.list_milestones(&user_id, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reviews_scoped_and_updatable() {
        let (db, _dir) = temp_db().await;
        let (user_id, child_id) = seed(&db).await;
        let stranger = db.create_user("s@x.org", None, "", "", "").await.unwrap();
        let chat = db.create_chat(&child_id, "Luna", None).await.unwrap();

        let review = db
            .create_parent_review(&NewParentReview {
                child_id: child_id.clone(),
                chat_id: chat.id.clone(),
                notes: "good session".to_string(),
                rating: Some(4),
            })
            .await
            .unwrap();

        assert!(db
            .get_parent_review(&stranger.id, &review.id)
            .await
            .unwrap()
            .is_none());
        let updated = db
            .update_parent_review(
                &user_id,
                &review.id,
                &ParentReviewUpdate {
                    rating: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.rating, Some(5));
        assert_eq!(updated.notes, "good session");
    }
}
