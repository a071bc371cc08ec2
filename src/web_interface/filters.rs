//! Shared warp filters: state injection, bearer authentication and the
//! rejection-to-JSON translation every route group hangs off.

use std::convert::Infallible;
use std::sync::Arc;

use serde_json::{json, Value};
use warp::http::StatusCode;
use warp::{reply, Filter, Rejection, Reply};

use crate::error_handling::types::ApiError;
use crate::storage::types::{TokenKind, User};
use crate::web_interface::web_server::AppState;

pub fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Resolves the `Authorization: Bearer <access>` header to the owning user.
/// Anything short of a live access token pointing at an existing user is a
/// 401 rejection.
pub fn with_auth(
    state: Arc<AppState>,
) -> impl Filter<Extract = (User,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_state(state))
        .and_then(authenticate)
}

async fn authenticate(header: Option<String>, state: Arc<AppState>) -> Result<User, Rejection> {
    let header = header.ok_or_else(|| {
        warp::reject::custom(ApiError::Unauthorized(
            "Authentication credentials were not provided".to_string(),
        ))
    })?;
    let token = header.strip_prefix("Bearer ").ok_or_else(|| {
        warp::reject::custom(ApiError::Unauthorized(
            "Authorization header must be a bearer token".to_string(),
        ))
    })?;
    let row = state
        .tokens
        .verify(&state.db, token, TokenKind::Access)
        .await
        .map_err(|e| warp::reject::custom(ApiError::from(e)))?;
    state
        .db
        .get_user(&row.user_id)
        .await
        .map_err(|e| warp::reject::custom(ApiError::from(e)))?
        .ok_or_else(|| {
            warp::reject::custom(ApiError::Unauthorized("Unknown user".to_string()))
        })
}

fn render(api: &ApiError) -> (StatusCode, Value) {
    match api {
        ApiError::Validation { field, message } => {
            let mut fields = serde_json::Map::new();
            fields.insert(field.to_string(), Value::String(message.clone()));
            (StatusCode::BAD_REQUEST, json!({ "errors": fields }))
        }
        ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, json!({ "detail": m })),
        ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, json!({ "detail": m })),
        ApiError::NotFound(m) => (StatusCode::NOT_FOUND, json!({ "detail": m })),
        ApiError::Upstream(m) => (StatusCode::SERVICE_UNAVAILABLE, json!({ "detail": m })),
        ApiError::Internal => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "detail": "Internal server error" }),
        ),
    }
}

/// Renders an `ApiError` straight to a response. Handlers on a path that
/// shadows a capture route (`chats/models` under `chats/:id`,
/// `learning-progress/child_progress` under `learning-progress/:id`) must use
/// this instead of rejecting: a rejection there falls back through the `or`
/// chain and gets re-labelled by whichever sibling matches the same path.
pub fn error_response(err: ApiError) -> warp::reply::Response {
    let (status, body) = render(&err);
    reply::with_status(reply::json(&body), status).into_response()
}

/// Terminal `recover` handler translating rejections into the error taxonomy:
/// 400 validation, 401 auth, 404 missing, 503 upstream, 500 everything else.
pub async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    let (status, body): (StatusCode, Value) = if let Some(api) = err.find::<ApiError>() {
        render(api)
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, json!({ "detail": "Not found" }))
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, json!({ "detail": e.to_string() }))
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (
            StatusCode::BAD_REQUEST,
            json!({ "detail": "Invalid query string" }),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            json!({ "detail": "Method not allowed" }),
        )
    } else {
        log::error!("unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "detail": "Internal server error" }),
        )
    };
    Ok(reply::with_status(reply::json(&body), status).into_response())
}

pub fn reject(err: ApiError) -> Rejection {
    warp::reject::custom(err)
}
