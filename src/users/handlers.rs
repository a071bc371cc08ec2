//! Profile routes: the authenticated parent's own record plus CRUD over
//! their child profiles. All of it sits behind bearer auth.

use std::sync::Arc;

use serde::Serialize;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::error_handling::types::ApiError;
use crate::storage::types::{Child, User, AGE_GROUPS, GENDERS};
use crate::storage::users::{ChildUpdate, NewChild, UserUpdate};
use crate::web_interface::filters::{reject, with_auth, with_state};
use crate::web_interface::types::json_response;
use crate::web_interface::web_server::AppState;

/// Parent profile with child profiles inlined.
#[derive(Serialize)]
struct UserWithChildren {
    #[serde(flatten)]
    user: User,
    children: Vec<Child>,
}

pub fn routes(state: Arc<AppState>) -> BoxedFilter<(warp::reply::Response,)> {
    let me = warp::path!("users" / "me")
        .and(warp::get())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(get_me)
        .boxed();
    let update_me = warp::path!("users" / "me")
        .and(warp::put())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(update_me)
        .boxed();
    let add_child = warp::path!("users" / "me" / "children")
        .and(warp::post())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(create_child)
        .boxed();
    let list_children = warp::path!("children")
        .and(warp::get())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(list_children)
        .boxed();
    let create_child_route = warp::path!("children")
        .and(warp::post())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(create_child)
        .boxed();
    let get_child = warp::path!("children" / String)
        .and(warp::get())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(get_child)
        .boxed();
    let update_child = warp::path!("children" / String)
        .and(warp::put())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(update_child)
        .boxed();
    let delete_child = warp::path!("children" / String)
        .and(warp::delete())
        .and(with_auth(state.clone()))
        .and(with_state(state))
        .and_then(delete_child)
        .boxed();

    me.or(update_me)
        .unify()
        .or(add_child)
        .unify()
        .or(list_children)
        .unify()
        .or(create_child_route)
        .unify()
        .or(get_child)
        .unify()
        .or(update_child)
        .unify()
        .or(delete_child)
        .unify()
        .boxed()
}

fn check_gender(gender: &str) -> Result<(), Rejection> {
    if GENDERS.contains(&gender) {
        Ok(())
    } else {
        Err(reject(ApiError::Validation {
            field: "gender",
            message: format!("Gender must be one of {}", GENDERS.join(", ")),
        }))
    }
}

fn check_age_group(age_group: &str) -> Result<(), Rejection> {
    if AGE_GROUPS.contains(&age_group) {
        Ok(())
    } else {
        Err(reject(ApiError::Validation {
            field: "age_group",
            message: format!("Age group must be one of {}", AGE_GROUPS.join(", ")),
        }))
    }
}

async fn with_children(
    state: &AppState,
    user: User,
) -> Result<UserWithChildren, Rejection> {
    let children = state
        .db
        .list_children(&user.id)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(UserWithChildren { user, children })
}

async fn get_me(user: User, state: Arc<AppState>) -> Result<warp::reply::Response, Rejection> {
    let profile = with_children(&state, user).await?;
    Ok(json_response(&profile, StatusCode::OK))
}

async fn update_me(
    user: User,
    state: Arc<AppState>,
    update: UserUpdate,
) -> Result<warp::reply::Response, Rejection> {
    let updated = state
        .db
        .update_user(&user.id, &update)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("User not found".to_string())))?;
    let profile = with_children(&state, updated).await?;
    Ok(json_response(&profile, StatusCode::OK))
}

async fn create_child(
    user: User,
    state: Arc<AppState>,
    new: NewChild,
) -> Result<warp::reply::Response, Rejection> {
    if new.name.trim().is_empty() {
        return Err(reject(ApiError::Validation {
            field: "name",
            message: "Name is required".to_string(),
        }));
    }
    if let Some(gender) = new.gender.as_deref() {
        check_gender(gender)?;
    }
    if let Some(age_group) = new.age_group.as_deref() {
        check_age_group(age_group)?;
    }
    let child = state
        .db
        .create_child(&user.id, &new)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&child, StatusCode::CREATED))
}

async fn list_children(
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let children = state
        .db
        .list_children(&user.id)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&children, StatusCode::OK))
}

async fn get_child(
    child_id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let child = state
        .db
        .get_child(&user.id, &child_id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Child not found".to_string())))?;
    Ok(json_response(&child, StatusCode::OK))
}

async fn update_child(
    child_id: String,
    user: User,
    state: Arc<AppState>,
    update: ChildUpdate,
) -> Result<warp::reply::Response, Rejection> {
    if let Some(gender) = update.gender.as_deref() {
        check_gender(gender)?;
    }
    if let Some(age_group) = update.age_group.as_deref() {
        check_age_group(age_group)?;
    }
    let child = state
        .db
        .update_child(&user.id, &child_id, &update)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Child not found".to_string())))?;
    Ok(json_response(&child, StatusCode::OK))
}

async fn delete_child(
    child_id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let deleted = state
        .db
        .delete_child(&user.id, &child_id)
        .await
        .map_err(|e| reject(e.into()))?;
    if !deleted {
        return Err(reject(ApiError::NotFound("Child not found".to_string())));
    }
    Ok(warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT).into_response())
}
