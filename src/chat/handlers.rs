//! Conversation routes: the story catalogue, chat lifecycle, message
//! exchange against the inference server, and the unauthenticated public
//! chat endpoint.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::error_handling::types::ApiError;
use crate::storage::chats::{ChatUpdate, NewMessage};
use crate::storage::types::{Message, User};
use crate::web_interface::filters::{error_response, reject, with_auth, with_state};
use crate::web_interface::types::json_response;
use crate::web_interface::web_server::AppState;

#[derive(Debug, Deserialize)]
pub struct StoryQuery {
    pub character: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewChatRequest {
    pub child_id: String,
    pub character: String,
    pub story_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub audio_file: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PublicChatRequest {
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub content: String,
}

/// Both halves of one exchange, returned to the caller in order.
#[derive(Serialize)]
struct ExchangeResponse {
    user_message: Message,
    assistant_message: Message,
}

pub fn routes(state: Arc<AppState>) -> BoxedFilter<(warp::reply::Response,)> {
    let list_stories = warp::path!("stories")
        .and(warp::get())
        .and(warp::query::<StoryQuery>())
        .and(with_state(state.clone()))
        .and_then(list_stories)
        .boxed();
    let get_story = warp::path!("stories" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_story)
        .boxed();
    // Fixed segments before the `chats/:id` capture
    let models = warp::path!("chats" / "models")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(list_models)
        .boxed();
    let public_chat = warp::path!("chats" / "public")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(public_chat)
        .boxed();
    let list_chats = warp::path!("chats")
        .and(warp::get())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(list_chats)
        .boxed();
    let create_chat = warp::path!("chats")
        .and(warp::post())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(create_chat)
        .boxed();
    let get_chat = warp::path!("chats" / String)
        .and(warp::get())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(get_chat)
        .boxed();
    let update_chat = warp::path!("chats" / String)
        .and(warp::put())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(update_chat)
        .boxed();
    let delete_chat = warp::path!("chats" / String)
        .and(warp::delete())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(delete_chat)
        .boxed();
    let send_message = warp::path!("chats" / String / "send_message")
        .and(warp::post())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(send_message)
        .boxed();
    let history = warp::path!("chats" / String / "history")
        .and(warp::get())
        .and(with_auth(state.clone()))
        .and(with_state(state.clone()))
        .and_then(chat_history)
        .boxed();
    let list_messages = warp::path!("messages")
        .and(warp::get())
        .and(with_auth(state.clone()))
        .and(with_state(state))
        .and_then(list_messages)
        .boxed();

    list_stories
        .or(get_story)
        .unify()
        .or(models)
        .unify()
        .or(public_chat)
        .unify()
        .or(list_chats)
        .unify()
        .or(create_chat)
        .unify()
        .or(send_message)
        .unify()
        .or(history)
        .unify()
        .or(get_chat)
        .unify()
        .or(update_chat)
        .unify()
        .or(delete_chat)
        .unify()
        .or(list_messages)
        .unify()
        .boxed()
}

async fn list_stories(
    query: StoryQuery,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let stories = state
        .db
        .list_stories(query.character.as_deref(), query.category.as_deref())
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&stories, StatusCode::OK))
}

async fn get_story(
    story_id: String,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let story = state
        .db
        .get_story(&story_id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Story not found".to_string())))?;
    Ok(json_response(&story, StatusCode::OK))
}

// Shadows `chats/:id`; a rejection here would fall through the `or` chain and
// come back as that route's 401, so errors render directly.
async fn list_models(state: Arc<AppState>) -> Result<warp::reply::Response, Rejection> {
    let models = match state.inference.list_models().await {
        Ok(models) => models,
        Err(e) => return Ok(error_response(e.into())),
    };
    Ok(json_response(
        &serde_json::json!({ "models": models }),
        StatusCode::OK,
    ))
}

/// Stateless chat for the marketing page: nothing is persisted and no
/// account is needed.
async fn public_chat(
    state: Arc<AppState>,
    body: PublicChatRequest,
) -> Result<warp::reply::Response, Rejection> {
    if body.character.trim().is_empty() {
        return Err(reject(ApiError::Validation {
            field: "character",
            message: "Character is required".to_string(),
        }));
    }
    if body.content.trim().is_empty() {
        return Err(reject(ApiError::Validation {
            field: "content",
            message: "Content is required".to_string(),
        }));
    }
    let response = state
        .inference
        .generate(&body.character, &body.content)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(
        &serde_json::json!({ "response": response }),
        StatusCode::OK,
    ))
}

async fn list_chats(
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let chats = state
        .db
        .list_chats(&user.id)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&chats, StatusCode::OK))
}

async fn create_chat(
    user: User,
    state: Arc<AppState>,
    body: NewChatRequest,
) -> Result<warp::reply::Response, Rejection> {
    if body.character.trim().is_empty() {
        return Err(reject(ApiError::Validation {
            field: "character",
            message: "Character is required".to_string(),
        }));
    }
    state
        .db
        .get_child(&user.id, &body.child_id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Child not found".to_string())))?;
    if let Some(story_id) = body.story_id.as_deref() {
        state
            .db
            .get_story(story_id)
            .await
            .map_err(|e| reject(e.into()))?
            .ok_or_else(|| reject(ApiError::NotFound("Story not found".to_string())))?;
    }
    let chat = state
        .db
        .create_chat(&body.child_id, &body.character, body.story_id.as_deref())
        .await
        .map_err(|e| reject(e.into()))?;
    state
        .db
        .bump_character_chats(&chat.child_id, &chat.character)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&chat, StatusCode::CREATED))
}

async fn get_chat(
    chat_id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let chat = state
        .db
        .get_chat(&user.id, &chat_id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Chat not found".to_string())))?;
    Ok(json_response(&chat, StatusCode::OK))
}

async fn update_chat(
    chat_id: String,
    user: User,
    state: Arc<AppState>,
    update: ChatUpdate,
) -> Result<warp::reply::Response, Rejection> {
    if let Some(story_id) = update.story_id.as_deref() {
        state
            .db
            .get_story(story_id)
            .await
            .map_err(|e| reject(e.into()))?
            .ok_or_else(|| reject(ApiError::NotFound("Story not found".to_string())))?;
    }
    let chat = state
        .db
        .update_chat(&user.id, &chat_id, &update)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Chat not found".to_string())))?;
    Ok(json_response(&chat, StatusCode::OK))
}

async fn delete_chat(
    chat_id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let deleted = state
        .db
        .delete_chat(&user.id, &chat_id)
        .await
        .map_err(|e| reject(e.into()))?;
    if !deleted {
        return Err(reject(ApiError::NotFound("Chat not found".to_string())));
    }
    Ok(warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT).into_response())
}

/// One exchange: persist the child's message, ask the inference server for
/// the character's reply, persist that too and fold both into the chat and
/// per-character counters. If inference fails the user message stays and the
/// caller gets a 503.
async fn send_message(
    chat_id: String,
    user: User,
    state: Arc<AppState>,
    body: SendMessageRequest,
) -> Result<warp::reply::Response, Rejection> {
    let chat = state
        .db
        .get_chat(&user.id, &chat_id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Chat not found".to_string())))?;
    if body.content.trim().is_empty() {
        return Err(reject(ApiError::Validation {
            field: "content",
            message: "Content is required".to_string(),
        }));
    }

    let user_message = state
        .db
        .create_message(&NewMessage {
            chat_id: &chat.id,
            content: &body.content,
            is_from_user: true,
            audio_file: body.audio_file.clone(),
            vocabulary_score: None,
            grammar_score: None,
        })
        .await
        .map_err(|e| reject(e.into()))?;

    let reply = state
        .inference
        .generate(&chat.character, &body.content)
        .await
        .map_err(|e| reject(e.into()))?;

    let assistant_message = state
        .db
        .create_message(&NewMessage {
            chat_id: &chat.id,
            content: &reply,
            is_from_user: false,
            audio_file: None,
            vocabulary_score: None,
            grammar_score: None,
        })
        .await
        .map_err(|e| reject(e.into()))?;

    let words = (word_count(&user_message.content) + word_count(&assistant_message.content)) as i64;
    state
        .db
        .record_exchange(&chat.id, 2, words)
        .await
        .map_err(|e| reject(e.into()))?;
    state
        .db
        .bump_character_messages(&chat.child_id, &chat.character, 2)
        .await
        .map_err(|e| reject(e.into()))?;

    Ok(json_response(
        &ExchangeResponse {
            user_message,
            assistant_message,
        },
        StatusCode::OK,
    ))
}

async fn chat_history(
    chat_id: String,
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    state
        .db
        .get_chat(&user.id, &chat_id)
        .await
        .map_err(|e| reject(e.into()))?
        .ok_or_else(|| reject(ApiError::NotFound("Chat not found".to_string())))?;
    let messages = state
        .db
        .list_chat_messages(&chat_id)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&messages, StatusCode::OK))
}

async fn list_messages(
    user: User,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let messages = state
        .db
        .list_messages(&user.id)
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(json_response(&messages, StatusCode::OK))
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count() {
        assert_eq!(word_count("why is the moon round"), 5);
        assert_eq!(word_count("  spaced   out  "), 2);
        assert_eq!(word_count(""), 0);
    }
}
