//! Device routes: CRUD over registered devices plus the session lifecycle
//! and interaction log the companion hardware reports into.

use std::sync::Arc;

use serde::Deserialize;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::error_handling::types::ApiError;
use crate::storage::devices::{DeviceUpdate, NewDevice};
use crate::storage::types::{Device, User, INTERACTION_TYPES};
use crate::web_interface::filters::{reject, with_auth, with_state};
use crate::web_interface::types::json_response;
use crate::web_interface::web_server::AppState;

#[derive(Debug, Deserialize)]
pub struct RecordInteractionRequest {
    #[serde(default)]
    pub interaction_type: String,
    #[serde(default)]
    pub content: String,
}

pub fn routes(state: Arc<AppState>) -> BoxedFilter<(warp::reply::Response,)> {
    let list_devices = warp::path!("devices")
        .and(warp::get())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(list_devices)
        .boxed();
    let create_device = warp::path!("devices")
        .and(warp::post())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(create_device)
        .boxed();
    let get_device = warp::path!("devices" / String)
        .and(warp::get())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(get_device)
        .boxed();
    let update_device = warp::path!("devices" / String)
        .and(warp::put())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(update_device)
        .boxed();
    let delete_device = warp::path!("devices" / String)
        .and(warp::delete())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(delete_device)
        .boxed();
    let start_session = warp::path!("devices" / String / "start_session")
        .and(warp::post())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(start_session)
        .boxed();
    let end_session = warp::path!("devices" / String / "end_session")
        .and(warp::post())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(end_session)
        .boxed();
    let record_interaction = warp::path!("devices" / String / "record_interaction")
        .and(warp::post())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(record_interaction)
        .boxed();
    let get_interactions = warp::path!("devices" / String / "interactions")
        .and(warp::get())
        .and(with_auth(state.clone()))
        .and(with_state(state))
        .and_then(get_interactions)
        .boxed();

    list_devices
        .or(create_device)
        .unify()
        .or(start_session)
        .unify()
        .or(end_session)
        .unify()
        .or(record_interaction)
        .unify()
        .or(get_interactions)
        .unify()
        .or(get_device)
        .unify()
        .or(update_device)
        .unify()
        .or(delete_device)
        .unify()
        .boxed()
}

async fn owned_device(
    state: &AppState,
    user: &User,
    device_id: &str,
) -> Result<Device, Rejection> {
    state
        .db
        .get_device(&user.id, device_id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Device not found".to_string())))
}

async fn list_devices(
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let devices = state
        .db
        .list_devices(&user.id)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&devices, StatusCode::OK))
}

async fn create_device(
    user: User,
    state: Arc<AppState>,
    new: NewDevice,
) -> Result<warp::reply::Response, Rejection> {
    if new.device_id.trim().is_empty() {
        return Err(reject(ApiError::Validation {
            field: "device_id",
            message: "Device id is required".to_string(),
        }));
    }
    let device = state
        .db
        .create_device(&user.id, &new)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&device, StatusCode::CREATED))
}

async fn get_device(
    device_id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let device = owned_device(&state, &user, &device_id).await?;
    Ok(json_response(&device, StatusCode::OK))
}

async fn update_device(
    device_id: String,
    user: User,
    state: Arc<AppState>,
    update: DeviceUpdate,
) -> Result<warp::reply::Response, Rejection> {
    let device = state
        .db
        .update_device(&user.id, &device_id, &update)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Device not found".to_string())))?;
    Ok(json_response(&device, StatusCode::OK))
}

async fn delete_device(
    device_id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let deleted = state
        .db
        .delete_device(&user.id, &device_id)
        .await
        .map_err(|e| reject(e.into()))?;
    if !deleted {
        return Err(reject(ApiError::NotFound("Device not found".to_string())));
    }
    Ok(warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT).into_response())
}

async fn start_session(
    device_id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let device = owned_device(&state, &user, &device_id).await?;
    let session = state
        .db
        .start_device_session(&device.id)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&session, StatusCode::CREATED))
}

async fn end_session(
    device_id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let device = owned_device(&state, &user, &device_id).await?;
    let session = state
        .db
        .end_device_session(&device.id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("No active session found".to_string())))?;
    Ok(json_response(&session, StatusCode::OK))
}

async fn record_interaction(
    device_id: String,
    user: User,
    state: Arc<AppState>,
    body: RecordInteractionRequest,
) -> Result<warp::reply::Response, Rejection> {
    if !INTERACTION_TYPES.contains(&body.interaction_type.as_str()) {
        return Err(reject(ApiError::Validation {
            field: "interaction_type",
            message: format!(
                "Interaction type must be one of {}",
                INTERACTION_TYPES.join(", ")
            ),
        }));
    }
    let device = owned_device(&state, &user, &device_id).await?;
    let session = state
        .db
        .active_device_session(&device.id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("No active session found".to_string())))?;
    let interaction = state
        .db
        .record_device_interaction(&device.id, &session.id, &body.interaction_type, &body.content)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&interaction, StatusCode::CREATED))
}

async fn get_interactions(
    device_id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let device = owned_device(&state, &user, &device_id).await?;
    let interactions = state
        .db
        .list_device_interactions(&device.id)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&interactions, StatusCode::OK))
}
