//! Analytics routes: the windowed per-child report plus CRUD over learning
//! progress and parent reviews, and read access to milestones and
//! per-character totals.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::analytics::aggregate::{summarize, ChatSample};
use crate::error_handling::types::ApiError;
use crate::storage::analytics::{
    LearningProgressUpdate, NewLearningProgress, NewParentReview, ParentReviewUpdate,
};
use crate::storage::types::User;
use crate::web_interface::filters::{error_response, reject, with_auth, with_state};
use crate::web_interface::types::json_response;
use crate::web_interface::web_server::AppState;

const DEFAULT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct ChildFilter {
    pub child_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub days: Option<String>,
}

pub fn routes(state: Arc<AppState>) -> BoxedFilter<(warp::reply::Response,)> {
    let child_report = warp::path!("analytics" / "children" / String)
        .and(warp::get())
        .and(warp::query::<WindowQuery>())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(child_report)
        .boxed();
    let list_milestones = warp::path!("milestones")
        .and(warp::get())
        .and(warp::query::<ChildFilter>())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(list_milestones)
        .boxed();
    let get_milestone = warp::path!("milestones" / String)
        .and(warp::get())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(get_milestone)
        .boxed();
    let character_interactions = warp::path!("character-interactions")
        .and(warp::get())
        .and(warp::query::<ChildFilter>())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(list_character_interactions)
        .boxed();

    // Fixed segment before the `learning-progress/:id` capture
    let child_progress = warp::path!("learning-progress" / "child_progress")
        .and(warp::get())
        .and(warp::query::<ChildFilter>())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(child_progress)
        .boxed();
    let list_progress = warp::path!("learning-progress")
        .and(warp::get())
        .and(warp::query::<ChildFilter>())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(list_progress)
        .boxed();
    let create_progress = warp::path!("learning-progress")
        .and(warp::post())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(create_progress)
        .boxed();
    let get_progress = warp::path!("learning-progress" / String)
        .and(warp::get())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(get_progress)
        .boxed();
    let update_progress = warp::path!("learning-progress" / String)
        .and(warp::put())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(update_progress)
        .boxed();
    let delete_progress = warp::path!("learning-progress" / String)
        .and(warp::delete())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(delete_progress)
        .boxed();

    let child_reviews = warp::path!("parent-reviews" / "child_reviews")
        .and(warp::get())
        .and(warp::query::<ChildFilter>())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(child_reviews)
        .boxed();
    let list_reviews = warp::path!("parent-reviews")
        .and(warp::get())
        .and(warp::query::<ChildFilter>())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(list_reviews)
        .boxed();
    let create_review = warp::path!("parent-reviews")
        .and(warp::post())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(create_review)
        .boxed();
    let get_review = warp::path!("parent-reviews" / String)
        .and(warp::get())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(get_review)
        .boxed();
    let update_review = warp::path!("parent-reviews" / String)
        .and(warp::put())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(update_review)
        .boxed();
    let delete_review = warp::path!("parent-reviews" / String)
        .and(warp::delete())
        .and(with_auth(state.clone()))
        .and(with_state(state))
        .and_then(delete_review)
        .boxed();

    child_report
        .or(list_milestones)
        .unify()
        .or(get_milestone)
        .unify()
        .or(character_interactions)
        .unify()
        .or(child_progress)
        .unify()
        .or(list_progress)
        .unify()
        .or(create_progress)
        .unify()
        .or(get_progress)
        .unify()
        .or(update_progress)
        .unify()
        .or(delete_progress)
        .unify()
        .or(child_reviews)
        .unify()
        .or(list_reviews)
        .unify()
        .or(create_review)
        .unify()
        .or(get_review)
        .unify()
        .or(update_review)
        .unify()
        .or(delete_review)
        .unify()
        .boxed()
}

fn parse_days(query: &WindowQuery) -> Result<i64, Rejection> {
    match query.days.as_deref() {
        None => Ok(DEFAULT_WINDOW_DAYS),
        Some(raw) => match raw.parse::<i64>() {
            Ok(days) if days > 0 => Ok(days),
            _ => Err(reject(ApiError::Validation {
                field: "days",
                message: "Days must be a positive integer".to_string(),
            })),
        },
    }
}

/// Windowed report for one child: totals and score averages over the last N
/// days, a per-character breakdown and the milestones achieved in the window.
async fn child_report(
    child_id: String,
    query: WindowQuery,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let days = parse_days(&query)?;
    let child = state
        .db
        .get_child(&user.id, &child_id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Child not found".to_string())))?;

    let since = Utc::now() - Duration::days(days);
    let chats = state
        .db
        .chats_for_child_since(&child.id, since)
        .await
        .map_err(|e| reject(e.into()))?;

    let mut samples = Vec::with_capacity(chats.len());
    for chat in &chats {
        let analytics = state
            .db
            .get_chat_analytics(&chat.id)
            .await
            .map_err(|e| reject(e.into()))?;
        // A chat with no analytics row has had no messages yet
        let (messages, words, vocab, grammar) = match analytics {
            Some(a) => (
                a.message_count,
                a.total_words,
                scored(a.avg_vocabulary_score),
                scored(a.avg_grammar_score),
            ),
            None => (0, 0, None, None),
        };
        samples.push(ChatSample {
            character: chat.character.clone(),
            message_count: messages,
            total_words: words,
            vocabulary_score: vocab,
            grammar_score: grammar,
        });
    }
    let summary = summarize(&samples);

    let milestones = state
        .db
        .milestones_for_child_since(&child.id, since)
        .await
        .map_err(|e| reject(e.into()))?;

    Ok(json_response(
        &serde_json::json!({
            "child_id": child.id,
            "child_name": child.name,
            "period_days": days,
            "summary": summary,
            "milestones": milestones,
        }),
        StatusCode::OK,
    ))
}

/// Zero means the external scoring process has not touched this chat.
fn scored(score: f64) -> Option<f64> {
    if score > 0.0 {
        Some(score)
    } else {
        None
    }
}

async fn list_milestones(
    query: ChildFilter,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let milestones = state
        .db
        .list_milestones(&user.id, query.child_id.as_deref())
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&milestones, StatusCode::OK))
}

async fn get_milestone(
    id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let milestone = state
        .db
        .get_milestone(&user.id, &id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Milestone not found".to_string())))?;
    Ok(json_response(&milestone, StatusCode::OK))
}

async fn list_character_interactions(
    query: ChildFilter,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let interactions = state
        .db
        .list_character_interactions(&user.id, query.child_id.as_deref())
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&interactions, StatusCode::OK))
}

/// Checks that the referenced child and chat both belong to the caller.
async fn check_refs(
    state: &AppState,
    user: &User,
    child_id: &str,
    chat_id: &str,
) -> Result<(), Rejection> {
    state
        .db
        .get_child(&user.id, child_id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Child not found".to_string())))?;
    state
        .db
        .get_chat(&user.id, chat_id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Chat not found".to_string())))?;
    Ok(())
}

// Shadows `learning-progress/:id`, so errors render directly instead of
// rejecting into that route's 404.
async fn child_progress(
    query: ChildFilter,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let child_id = match query.child_id {
        Some(id) => id,
        None => {
            return Ok(error_response(ApiError::BadRequest(
                "child_id parameter is required".to_string(),
            )))
        }
    };
    let progress = match state
        .db
        .list_learning_progress(&user.id, Some(&child_id))
        .await
    {
        Ok(progress) => progress,
        Err(e) => return Ok(error_response(e.into())),
    };
    Ok(json_response(&progress, StatusCode::OK))
}

async fn list_progress(
    query: ChildFilter,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let progress = state
        .db
        .list_learning_progress(&user.id, query.child_id.as_deref())
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&progress, StatusCode::OK))
}

async fn create_progress(
    user: User,
    state: Arc<AppState>,
    new: NewLearningProgress,
) -> Result<warp::reply::Response, Rejection> {
    check_refs(&state, &user, &new.child_id, &new.chat_id).await?;
    let progress = state
        .db
        .create_learning_progress(&new)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&progress, StatusCode::CREATED))
}

async fn get_progress(
    id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let progress = state
        .db
        .get_learning_progress(&user.id, &id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Learning progress not found".to_string())))?;
    Ok(json_response(&progress, StatusCode::OK))
}

async fn update_progress(
    id: String,
    user: User,
    state: Arc<AppState>,
    update: LearningProgressUpdate,
) -> Result<warp::reply::Response, Rejection> {
    let progress = state
        .db
        .update_learning_progress(&user.id, &id, &update)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Learning progress not found".to_string())))?;
    Ok(json_response(&progress, StatusCode::OK))
}

async fn delete_progress(
    id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let deleted = state
        .db
        .delete_learning_progress(&user.id, &id)
        .await
        .map_err(|e| reject(e.into()))?;
    if !deleted {
        return Err(reject(ApiError::NotFound(
            "Learning progress not found".to_string(),
        )));
    }
    Ok(warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT).into_response())
}

// Shadows `parent-reviews/:id`, same rule as child_progress.
async fn child_reviews(
    query: ChildFilter,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let child_id = match query.child_id {
        Some(id) => id,
        None => {
            return Ok(error_response(ApiError::BadRequest(
                "child_id parameter is required".to_string(),
            )))
        }
    };
    let reviews = match state.db.list_parent_reviews(&user.id, Some(&child_id)).await {
        Ok(reviews) => reviews,
        Err(e) => return Ok(error_response(e.into())),
    };
    Ok(json_response(&reviews, StatusCode::OK))
}

async fn list_reviews(
    query: ChildFilter,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let reviews = state
        .db
        .list_parent_reviews(&user.id, query.child_id.as_deref())
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&reviews, StatusCode::OK))
}

fn check_rating(rating: Option<i64>) -> Result<(), Rejection> {
    match rating {
        Some(r) if !(1..=5).contains(&r) => Err(reject(ApiError::Validation {
            field: "rating",
            message: "Rating must be between 1 and 5".to_string(),
        })),
        _ => Ok(()),
    }
}

async fn create_review(
    user: User,
    state: Arc<AppState>,
    new: NewParentReview,
) -> Result<warp::reply::Response, Rejection> {
    check_rating(new.rating)?;
    check_refs(&state, &user, &new.child_id, &new.chat_id).await?;
    let review = state
        .db
        .create_parent_review(&new)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&review, StatusCode::CREATED))
}

async fn get_review(
    id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let review = state
        .db
        .get_parent_review(&user.id, &id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Review not found".to_string())))?;
    Ok(json_response(&review, StatusCode::OK))
}

async fn update_review(
    id: String,
    user: User,
    state: Arc<AppState>,
    update: ParentReviewUpdate,
) -> Result<warp::reply::Response, Rejection> {
    check_rating(update.rating)?;
    let review = state
        .db
        .update_parent_review(&user.id, &id, &update)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Review not found".to_string())))?;
    Ok(json_response(&review, StatusCode::OK))
}

async fn delete_review(
    id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let deleted = state
        .db
        .delete_parent_review(&user.id, &id)
        .await
        .map_err(|e| reject(e.into()))?;
    if !deleted {
        return Err(reject(ApiError::NotFound("Review not found".to_string())));
    }
    Ok(warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT).into_response())
}
