//! User and child-profile queries. Every child query is scoped on `user_id`
//! so a caller can only ever see its own rows.

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::types::{Child, User};
use crate::storage::Database;

/// Profile fields a parent may change on their own account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewChild {
    pub name: String,
    pub age: i64,
    pub gender: Option<String>,
    pub age_group: Option<String>,
    pub avatar: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    pub reading_level: Option<String>,
    #[serde(default)]
    pub favorite_topics: Vec<String>,
    #[serde(default)]
    pub learning_goals: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChildUpdate {
    pub name: Option<String>,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub age_group: Option<String>,
    pub avatar: Option<String>,
    pub interests: Option<Vec<String>>,
    pub languages: Option<Vec<String>>,
    pub reading_level: Option<String>,
    pub favorite_topics: Option<Vec<String>>,
    pub learning_goals: Option<Vec<String>>,
}

impl Database {
    pub async fn create_user(
        &self,
        email: &str,
        password_hash: Option<String>,
        first_name: &str,
        last_name: &str,
        phone_number: &str,
    ) -> Result<User, StorageError> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_lowercase(),
            password_hash,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            phone_number: phone_number.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, first_name, last_name, phone_number, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone_number)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(user)
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?1")
            .bind(email.to_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, StorageError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)
    }

    pub async fn update_user(
        &self,
        id: &str,
        update: &UserUpdate,
    ) -> Result<Option<User>, StorageError> {
        sqlx::query(
            "UPDATE users SET
                first_name = COALESCE(?2, first_name),
                last_name = COALESCE(?3, last_name),
                phone_number = COALESCE(?4, phone_number),
                updated_at = ?5
             WHERE id = ?1",
        )
        .bind(id)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.phone_number)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        self.get_user(id).await
    }

    pub async fn create_child(
        &self,
        user_id: &str,
        new: &NewChild,
    ) -> Result<Child, StorageError> {
        let child = Child {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: new.name.clone(),
            age: new.age,
            gender: new.gender.clone().unwrap_or_else(|| "O".to_string()),
            age_group: new.age_group.clone().unwrap_or_else(|| "6-8".to_string()),
            avatar: new.avatar.clone(),
            interests: new.interests.clone(),
            languages: new.languages.clone(),
            reading_level: new
                .reading_level
                .clone()
                .unwrap_or_else(|| "Beginner".to_string()),
            favorite_topics: new.favorite_topics.clone(),
            learning_goals: new.learning_goals.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO children (id, user_id, name, age, gender, age_group, avatar, interests,
                                   languages, reading_level, favorite_topics, learning_goals,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )
        .bind(&child.id)
        .bind(&child.user_id)
        .bind(&child.name)
        .bind(child.age)
        .bind(&child.gender)
        .bind(&child.age_group)
        .bind(&child.avatar)
        .bind(serde_json::to_string(&child.interests).unwrap_or_else(|_| "[]".to_string()))
        .bind(serde_json::to_string(&child.languages).unwrap_or_else(|_| "[]".to_string()))
        .bind(&child.reading_level)
        .bind(serde_json::to_string(&child.favorite_topics).unwrap_or_else(|_| "[]".to_string()))
        .bind(serde_json::to_string(&child.learning_goals).unwrap_or_else(|_| "[]".to_string()))
        .bind(child.created_at)
        .bind(child.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(child)
    }

    pub async fn list_children(&self, user_id: &str) -> Result<Vec<Child>, StorageError> {
        sqlx::query_as::<_, Child>(
            "SELECT * FROM children WHERE user_id = ?1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)
    }

    pub async fn get_child(
        &self,
        user_id: &str,
        child_id: &str,
    ) -> Result<Option<Child>, StorageError> {
        sqlx::query_as::<_, Child>("SELECT * FROM children WHERE id = ?1 AND user_id = ?2")
            .bind(child_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)
    }

    pub async fn update_child(
        &self,
        user_id: &str,
        child_id: &str,
        update: &ChildUpdate,
    ) -> Result<Option<Child>, StorageError> {
        let interests = update
            .interests
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string()));
        let languages = update
            .languages
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string()));
        let favorite_topics = update
            .favorite_topics
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string()));
        let learning_goals = update
            .learning_goals
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string()));
        sqlx::query(
            "UPDATE children SET
                name = COALESCE(?3, name),
                age = COALESCE(?4, age),
                gender = COALESCE(?5, gender),
                age_group = COALESCE(?6, age_group),
                avatar = COALESCE(?7, avatar),
                interests = COALESCE(?8, interests),
                languages = COALESCE(?9, languages),
                reading_level = COALESCE(?10, reading_level),
                favorite_topics = COALESCE(?11, favorite_topics),
                learning_goals = COALESCE(?12, learning_goals),
                updated_at = ?13
             WHERE id = ?1 AND user_id = ?2",
        )
        .bind(child_id)
        .bind(user_id)
        .bind(&update.name)
        .bind(update.age)
        .bind(&update.gender)
        .bind(&update.age_group)
        .bind(&update.avatar)
        .bind(interests)
        .bind(languages)
        .bind(&update.reading_level)
        .bind(favorite_topics)
        .bind(learning_goals)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        self.get_child(user_id, child_id).await
    }

    pub async fn delete_child(&self, user_id: &str, child_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM children WHERE id = ?1 AND user_id = ?2")
            .bind(child_id)
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

    #[tokio::test]
    async fn test_user_roundtrip_and_email_normalization() {
        let (db, _dir) = temp_db().await;
        let user = db
            .create_user("Parent@Example.COM", None, "Pat", "Doe", "")
            .await
            .unwrap();
        assert_eq!(user.email, "parent@example.com");
        let found = db.find_user_by_email("PARENT@example.com").await.unwrap();
        assert_eq!(found.unwrap().id, user.id);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_unique_violation() {
        let (db, _dir) = temp_db().await;
        db.create_user("p@x.org", None, "", "", "").await.unwrap();

        // Same address in a different case collides after normalization
        let err = db.create_user("P@X.ORG", None, "", "", "").await.unwrap_err();
        assert!(err.is_unique_violation());

        let other = db.create_user("q@x.org", None, "", "", "").await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_children_are_scoped_to_owner() {
        let (db, _dir) = temp_db().await;
        let a = db.create_user("a@x.org", None, "", "", "").await.unwrap();
        let b = db.create_user("b@x.org", None, "", "", "").await.unwrap();
        let child = db
            .create_child(
                &a.id,
                &NewChild {
                    name: "Mia".to_string(),
                    age: 6,
                    gender: None,
                    age_group: None,
                    avatar: None,
                    interests: vec!["space".to_string()],
                    languages: vec![],
                    reading_level: None,
                    favorite_topics: vec![],
                    learning_goals: vec![],
                },
            )
            .await
            .unwrap();

        assert_eq!(db.list_children(&a.id).await.unwrap().len(), 1);
        assert!(db.list_children(&b.id).await.unwrap().is_empty());
        assert!(db.get_child(&b.id, &child.id).await.unwrap().is_none());
        assert!(!db.delete_child(&b.id, &child.id).await.unwrap());

        let fetched = db.get_child(&a.id, &child.id).await.unwrap().unwrap();
        assert_eq!(fetched.interests, vec!["space".to_string()]);
    }

    #[tokio::test]
    async fn test_child_partial_update() {
        let (db, _dir) = temp_db().await;
        let a = db.create_user("a@x.org", None, "", "", "").await.unwrap();
        let child = db
            .create_child(
                &a.id,
                &NewChild {
                    name: "Leo".to_string(),
                    age: 7,
                    gender: Some("M".to_string()),
                    age_group: Some("6-8".to_string()),
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
        let updated = db
            .update_child(
                &a.id,
                &child.id,
                &ChildUpdate {
                    age: Some(8),
                    interests: Some(vec!["dinosaurs".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.age, 8);
        assert_eq!(updated.name, "Leo");
        assert_eq!(updated.interests, vec!["dinosaurs".to_string()]);
    }
}
