//! Auth gateway routes: credential login, registration, logout, Google
//! login and token refresh/verify. Everything here is public except logout,
//! which needs a valid access token like any other authenticated route.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::auth::passwords;
use crate::error_handling::types::{ApiError, AuthError};
use crate::storage::types::{TokenKind, User};
use crate::web_interface::filters::{reject, with_auth, with_state};
use crate::web_interface::types::json_response;
use crate::web_interface::web_server::AppState;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh: String,
}

#[derive(Debug, Deserialize)]
pub struct GoogleLoginRequest {
    #[serde(default)]
    pub credential: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

/// Login/registration payload: the user plus a fresh token pair.
#[derive(Serialize)]
struct SessionResponse {
    user: User,
    access: String,
    refresh: String,
}

pub fn routes(state: Arc<AppState>) -> BoxedFilter<(warp::reply::Response,)> {
    let register = warp::path!("auth" / "register")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(register)
        .boxed();
    let login = warp::path!("auth" / "login")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(login)
        .boxed();
    let logout = warp::path!("auth" / "logout")
        .and(warp::post())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(logout)
        .boxed();
    let google = warp::path!("auth" / "google-login")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(google_login)
        .boxed();
    let refresh = warp::path!("auth" / "token" / "refresh")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(refresh)
        .boxed();
    let verify = warp::path!("auth" / "token" / "verify")
        .and(warp::post())
        .and(with_state(state))
        .and(warp::body::json())
        .and_then(verify)
        .boxed();

    register
        .or(login)
        .unify()
        .or(logout)
        .unify()
        .or(google)
        .unify()
        .or(refresh)
        .unify()
        .or(verify)
        .unify()
        .boxed()
}

async fn register(
    state: Arc<AppState>,
    body: RegisterRequest,
) -> Result<warp::reply::Response, Rejection> {
    if body.email.trim().is_empty() || !body.email.contains('@') {
        return Err(reject(ApiError::Validation {
            field: "email",
            message: "A valid email address is required".to_string(),
        }));
    }
    if body.password.len() < MIN_PASSWORD_LEN {
        return Err(reject(ApiError::Validation {
            field: "password",
            message: format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        }));
    }
    if body.password != body.password_confirm {
        return Err(reject(ApiError::Validation {
            field: "password_confirm",
            message: "Passwords do not match".to_string(),
        }));
    }
    // The UNIQUE constraint on users.email is the duplicate check; a
    // SELECT-then-INSERT would race with concurrent registrations.
    let user = match state
        .db
        .create_user(
            &body.email,
            Some(passwords::hash_password(&body.password)),
            &body.first_name,
            &body.last_name,
            &body.phone_number,
        )
        .await
    {
        Ok(user) => user,
        Err(e) if e.is_unique_violation() => {
            return Err(reject(ApiError::Validation {
                field: "email",
                message: "A user with this email already exists".to_string(),
            }))
        }
        Err(e) => return Err(reject(e.into())),
    };
    let pair = state
        .tokens
        .issue_pair(&state.db, &user.id)
        .await
        .map_err(|e| reject(e.into()))?;
    log::info!("registered user {}", user.id);
    Ok(json_response(
        &SessionResponse {
            user,
            access: pair.access,
            refresh: pair.refresh,
        },
        StatusCode::CREATED,
    ))
}

async fn login(
    state: Arc<AppState>,
    body: LoginRequest,
) -> Result<warp::reply::Response, Rejection> {
    if body.email.is_empty() || body.password.is_empty() {
        return Err(reject(ApiError::BadRequest(
            "Please provide both email and password".to_string(),
        )));
    }
    let user = state
        .db
        .find_user_by_email(&body.email)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(AuthError::InvalidCredentials.into()))?;
    let valid = user
        .password_hash
        .as_deref()
        .map(|stored| passwords::verify_password(&body.password, stored))
        .unwrap_or(false);
    if !valid {
        return Err(reject(AuthError::InvalidCredentials.into()));
    }
    let pair = state
        .tokens
        .issue_pair(&state.db, &user.id)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(
        &SessionResponse {
            user,
            access: pair.access,
            refresh: pair.refresh,
        },
        StatusCode::OK,
    ))
}

async fn logout(
    _user: User,
    state: Arc<AppState>,
    body: LogoutRequest,
) -> Result<warp::reply::Response, Rejection> {
    state
        .tokens
        .revoke(&state.db, &body.refresh)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT).into_response())
}

async fn google_login(
    state: Arc<AppState>,
    body: GoogleLoginRequest,
) -> Result<warp::reply::Response, Rejection> {
    let identity = state
        .google
        .verify(&body.credential)
        .await
        .map_err(|e| reject(e.into()))?;

    let user = match state
        .db
        .find_user_by_email(&identity.email)
        .await
        .map_err(|e| reject(e.into()))?
    {
        Some(existing) => existing,
        None => state
            .db
            .create_user(
                &identity.email,
                None, // social-login account, no password
                &identity.given_name,
                &identity.family_name,
                "",
            )
            .await
            .map_err(|e| reject(e.into()))?,
    };

    let pair = state
        .tokens
        .issue_pair(&state.db, &user.id)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(
        &SessionResponse {
            user,
            access: pair.access,
            refresh: pair.refresh,
        },
        StatusCode::OK,
    ))
}

async fn refresh(
    state: Arc<AppState>,
    body: RefreshRequest,
) -> Result<warp::reply::Response, Rejection> {
    let row = state
        .tokens
        .verify(&state.db, &body.refresh, TokenKind::Refresh)
        .await
        .map_err(|e| reject(e.into()))?;
    let access = state
        .tokens
        .issue(&state.db, &row.user_id, TokenKind::Access)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(
        &serde_json::json!({ "access": access }),
        StatusCode::OK,
    ))
}

async fn verify(
    state: Arc<AppState>,
    body: VerifyRequest,
) -> Result<warp::reply::Response, Rejection> {
    state
        .tokens
        .verify_any(&state.db, &body.token)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&serde_json::json!({}), StatusCode::OK))
}
