//! Bearer token issuance and verification.
//!
//! A token is `{row id}.{hex HMAC-SHA256 of the id}`. The signature keeps
//! forged ids out of the database lookup; the row carries kind, expiry and
//! the revoked flag, so logout is a one-column update and every check reads
//! current state.

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::configuration::TokenConfig;
use crate::error_handling::types::AuthError;
use crate::storage::types::{AuthToken, TokenKind};
use crate::storage::Database;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, serde::Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Clone)]
pub struct TokenService {
    secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            secret: config.secret.as_bytes().to_vec(),
            access_ttl: Duration::seconds(config.access_ttl_secs as i64),
            refresh_ttl: Duration::seconds(config.refresh_ttl_secs as i64),
        }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        HmacSha256::new_from_slice(&self.secret).expect("HMAC key")
    }

    fn sign(&self, id: &str) -> String {
        let mut mac = self.mac();
        mac.update(id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn check_signature(&self, id: &str, signature: &str) -> Result<(), AuthError> {
        let raw = hex::decode(signature).map_err(|_| AuthError::MalformedToken)?;
        let mut mac = self.mac();
        mac.update(id.as_bytes());
        mac.verify_slice(&raw).map_err(|_| AuthError::MalformedToken)
    }

    pub async fn issue(
        &self,
        db: &Database,
        user_id: &str,
        kind: TokenKind,
    ) -> Result<String, AuthError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let row = AuthToken {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind: kind.as_str().to_string(),
            expires_at: Utc::now() + ttl,
            revoked: false,
            created_at: Utc::now(),
        };
        db.insert_token(&row).await?;
        Ok(format!("{}.{}", row.id, self.sign(&row.id)))
    }

    pub async fn issue_pair(&self, db: &Database, user_id: &str) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access: self.issue(db, user_id, TokenKind::Access).await?,
            refresh: self.issue(db, user_id, TokenKind::Refresh).await?,
        })
    }

    /// Full check: structure, signature, row presence, kind, revocation,
    /// expiry. Returns the row so callers get the user id.
    pub async fn verify(
        &self,
        db: &Database,
        token: &str,
        expected: TokenKind,
    ) -> Result<AuthToken, AuthError> {
        let row = self.verify_any(db, token).await?;
        if TokenKind::from_str(&row.kind) != Some(expected) {
            return Err(AuthError::WrongTokenKind);
        }
        Ok(row)
    }

    /// Like `verify` but accepts either kind; backs the `token/verify`
    /// endpoint.
    pub async fn verify_any(&self, db: &Database, token: &str) -> Result<AuthToken, AuthError> {
        let (id, signature) = token.split_once('.').ok_or(AuthError::MalformedToken)?;
        self.check_signature(id, signature)?;
        let row = db.get_token(id).await?.ok_or(AuthError::MalformedToken)?;
        if row.revoked {
            return Err(AuthError::TokenRevoked);
        }
        if row.expires_at < Utc::now() {
            return Err(AuthError::TokenExpired);
        }
        Ok(row)
    }

    /// Blacklist a refresh token (logout).
    pub async fn revoke(&self, db: &Database, token: &str) -> Result<(), AuthError> {
        let row = self.verify(db, token, TokenKind::Refresh).await?;
        db.revoke_token(&row.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::test_support::temp_db;

    fn service() -> TokenService {
        TokenService::new(&TokenConfig {
            secret: "test-secret".to_string(),
            access_ttl_secs: 3600,
            refresh_ttl_secs: 7200,
        })
    }

    async fn user(db: &Database) -> String {
        db.create_user("p@x.org", None, "", "", "").await.unwrap().id
    }

    #[tokio::test]
    async fn test_issue_and_verify_pair() {
        let (db, _dir) = temp_db().await;
        let service = service();
        let user_id = user(&db).await;

        let pair = service.issue_pair(&db, &user_id).await.unwrap();
        let access = service
            .verify(&db, &pair.access, TokenKind::Access)
            .await
            .unwrap();
        assert_eq!(access.user_id, user_id);

        // Kinds are not interchangeable
        assert!(matches!(
            service.verify(&db, &pair.access, TokenKind::Refresh).await,
            Err(AuthError::WrongTokenKind)
        ));
    }

    #[tokio::test]
    async fn test_tampered_token_rejected() {
        let (db, _dir) = temp_db().await;
        let service = service();
        let user_id = user(&db).await;

        let token = service
            .issue(&db, &user_id, TokenKind::Access)
            .await
            .unwrap();
        let mut forged = token.clone();
        forged.pop();
        forged.push('0');
        assert!(matches!(
            service.verify_any(&db, &forged).await,
            Err(AuthError::MalformedToken)
        ));
        assert!(matches!(
            service.verify_any(&db, "no-separator").await,
            Err(AuthError::MalformedToken)
        ));
    }

    #[tokio::test]
    async fn test_revoked_refresh_cannot_be_reused() {
        let (db, _dir) = temp_db().await;
        let service = service();
        let user_id = user(&db).await;

        let pair = service.issue_pair(&db, &user_id).await.unwrap();
        service.revoke(&db, &pair.refresh).await.unwrap();
        assert!(matches!(
            service.verify(&db, &pair.refresh, TokenKind::Refresh).await,
            Err(AuthError::TokenRevoked)
        ));
        // Access token from the same pair is untouched
        assert!(service
            .verify(&db, &pair.access, TokenKind::Access)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let (db, _dir) = temp_db().await;
        let service = TokenService::new(&TokenConfig {
            secret: "test-secret".to_string(),
            access_ttl_secs: 1,
            refresh_ttl_secs: 1,
        });
        let user_id = user(&db).await;
        let token = service
            .issue(&db, &user_id, TokenKind::Access)
            .await
            .unwrap();

        // Rewind the stored expiry instead of sleeping
        sqlx::query("UPDATE auth_tokens SET expires_at = '2000-01-01T00:00:00Z'")
            .execute(&db.pool)
            .await
            .unwrap();
        assert!(matches!(
            service.verify_any(&db, &token).await,
            Err(AuthError::TokenExpired)
        ));
    }
}
