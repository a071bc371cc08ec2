//! Issued-token persistence. The token service signs and verifies; this
//! module only stores the rows the verification step looks up.

use chrono::Utc;

use crate::error_handling::types::StorageError;
use crate::storage::types::AuthToken;
use crate::storage::Database;

impl Database {
    pub async fn insert_token(&self, token: &AuthToken) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO auth_tokens (id, user_id, kind, expires_at, revoked, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&token.id)
        .bind(&token.user_id)
        .bind(&token.kind)
        .bind(token.expires_at)
        .bind(token.revoked)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::QueryFailed)?;
        Ok(())
    }

    pub async fn get_token(&self, id: &str) -> Result<Option<AuthToken>, StorageError> {
        sqlx::query_as::<_, AuthToken>("SELECT * FROM auth_tokens WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)
    }

    /// Blacklist one token. Returns false when the id is unknown.
    pub async fn revoke_token(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE auth_tokens SET revoked = 1 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)?;
        Ok(result.rows_affected() > 0)
    }

    /// Housekeeping: drop rows past their expiry. Revocation state for live
    /// tokens is untouched.
    pub async fn purge_expired_tokens(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE expires_at < ?1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(StorageError::QueryFailed)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::test_support::temp_db;
    use chrono::Duration;

    #[tokio::test]
    async fn test_token_revoke_and_purge() {
        let (db, _dir) = temp_db().await;
        let user = db.create_user("p@x.org", None, "", "", "").await.unwrap();

        let live = AuthToken {
            id: "live".to_string(),
            user_id: user.id.clone(),
            kind: "access".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
            revoked: false,
            created_at: Utc::now(),
        };
        let stale = AuthToken {
            id: "stale".to_string(),
            user_id: user.id.clone(),
            kind: "refresh".to_string(),
            expires_at: Utc::now() - Duration::hours(1),
            revoked: false,
            created_at: Utc::now() - Duration::days(8),
        };
        db.insert_token(&live).await.unwrap();
        db.insert_token(&stale).await.unwrap();

        assert!(db.revoke_token("live").await.unwrap());
        assert!(!db.revoke_token("unknown").await.unwrap());
        assert!(db.get_token("live").await.unwrap().unwrap().revoked);

        assert_eq!(db.purge_expired_tokens().await.unwrap(), 1);
        assert!(db.get_token("stale").await.unwrap().is_none());
        assert!(db.get_token("live").await.unwrap().is_some());
    }
}
