//! Google ID-token verification for social login. The token is posted to
//! Google's tokeninfo endpoint and the `aud` claim must match the configured
//! client id; no local JWT parsing.

use std::time::Duration;

use serde::Deserialize;

use crate::error_handling::types::AuthError;

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Claims this service consumes from a verified token.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleIdentity {
    pub aud: String,
    pub email: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
}

#[derive(Clone)]
pub struct GoogleVerifier {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
}

impl GoogleVerifier {
    pub fn new(client_id: &str) -> Self {
        Self::with_endpoint(client_id, TOKENINFO_URL)
    }

    /// Endpoint override, used by tests to point at a stub server.
    pub fn with_endpoint(client_id: &str, endpoint: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            client_id: client_id.to_string(),
        }
    }

    pub async fn verify(&self, credential: &str) -> Result<GoogleIdentity, AuthError> {
        if self.client_id.is_empty() {
            return Err(AuthError::InvalidIdToken(
                "Google login is not configured".to_string(),
            ));
        }
        if credential.is_empty() {
            return Err(AuthError::InvalidIdToken(
                "No credential provided".to_string(),
            ));
        }

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("id_token", credential)])
            .timeout(VERIFY_TIMEOUT)
            .send()
            .await
            .map_err(|e| AuthError::VerificationUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::InvalidIdToken(
                "Token verification failed".to_string(),
            ));
        }

        let identity: GoogleIdentity = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidIdToken(e.to_string()))?;
        if identity.aud != self.client_id {
            return Err(AuthError::InvalidIdToken(
                "Token was issued for a different client".to_string(),
            ));
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_client_id_rejected() {
        let verifier = GoogleVerifier::new("");
        assert!(matches!(
            verifier.verify("anything").await,
            Err(AuthError::InvalidIdToken(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_credential_rejected() {
        let verifier = GoogleVerifier::new("client-id");
        assert!(matches!(
            verifier.verify("").await,
            Err(AuthError::InvalidIdToken(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        // Port 9 on localhost: nothing listens there
        let verifier = GoogleVerifier::with_endpoint("client-id", "http://127.0.0.1:9/tokeninfo");
        assert!(matches!(
            verifier.verify("credential").await,
            Err(AuthError::VerificationUnavailable(_))
        ));
    }
}
