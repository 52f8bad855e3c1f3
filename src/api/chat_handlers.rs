//! HTTP handlers for conversations, threads, moderation and AI context

use super::handlers::{ApiState, AppError};
use super::query::{ContextParams, DateRangeParams, PaginationParams, SearchParams};
use crate::auth::AuthUser;
use crate::chat::{
    parse_id, ChatError, ChatMessage, ChatStatistics, ContextEntry, FlagRecord, MessageDraft,
    MessageMetadata, MessageType, UserTimeout,
};
use crate::presence::PresenceEntry;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    pub message: String,
    #[serde(default)]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub metadata: Option<MessageMetadata>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutRequest {
    pub user_id: String,
    pub duration_secs: u64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub typing_users: Vec<String>,
    pub presence: HashMap<String, PresenceEntry>,
}

fn draft_from(project_id: uuid::Uuid, user: &AuthUser, req: PostMessageRequest) -> MessageDraft {
    let draft = MessageDraft::text(project_id, user.identity().as_sender(), req.message)
        .with_type(req.message_type.unwrap_or_default());
    match req.metadata {
        Some(metadata) => draft.with_metadata(metadata),
        None => draft,
    }
}

// ============================================================================
// Messages and threads
// ============================================================================

/// POST /api/projects/{project_id}/messages
pub async fn send_message(
    State(state): State<ApiState>,
    user: AuthUser,
    Path(project_id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), AppError> {
    let project_id = parse_id(&project_id, "project id")?;
    let message = state
        .messages
        .send_message(draft_from(project_id, &user, req))
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /api/projects/{project_id}/messages/{message_id}/replies
pub async fn reply_to_message(
    State(state): State<ApiState>,
    user: AuthUser,
    Path((project_id, message_id)): Path<(String, String)>,
    Json(req): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), AppError> {
    let project_id = parse_id(&project_id, "project id")?;
    let parent_id = parse_id(&message_id, "message id")?;
    let reply = state
        .messages
        .reply_to_message(parent_id, draft_from(project_id, &user, req))
        .await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

/// POST /api/messages/{message_id}/thread
pub async fn create_thread(
    State(state): State<ApiState>,
    _user: AuthUser,
    Path(message_id): Path<String>,
    body: Option<Json<CreateThreadRequest>>,
) -> Result<Json<ChatMessage>, AppError> {
    let message_id = parse_id(&message_id, "message id")?;
    let title = body.and_then(|Json(b)| b.title);
    Ok(Json(state.messages.create_thread(message_id, title).await?))
}

/// GET /api/threads/{thread_id}/messages
pub async fn get_thread_messages(
    State(state): State<ApiState>,
    _user: AuthUser,
    Path(thread_id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let thread_id = parse_id(&thread_id, "thread id")?;
    Ok(Json(state.messages.get_thread_messages(thread_id).await?))
}

/// GET /api/projects/{project_id}/threads
pub async fn list_threads(
    State(state): State<ApiState>,
    _user: AuthUser,
    Path(project_id): Path<String>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let project_id = parse_id(&project_id, "project id")?;
    Ok(Json(
        state
            .messages
            .get_thread_list(project_id, page.limit, page.offset)
            .await?,
    ))
}

/// GET /api/projects/{project_id}/messages/search
pub async fn search_messages(
    State(state): State<ApiState>,
    _user: AuthUser,
    Path(project_id): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let project_id = parse_id(&project_id, "project id")?;
    Ok(Json(
        state
            .messages
            .search_messages(project_id, &params.q, params.limit)
            .await?,
    ))
}

/// DELETE /api/messages/{message_id}
pub async fn delete_message(
    State(state): State<ApiState>,
    user: AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let message_id = parse_id(&message_id, "message id")?;
    let deleted = state
        .messages
        .delete_message(message_id, &user.user_id, user.role)
        .await?;
    Ok(Json(DeleteResponse { deleted }))
}

/// GET /api/projects/{project_id}/statistics
pub async fn get_statistics(
    State(state): State<ApiState>,
    _user: AuthUser,
    Path(project_id): Path<String>,
    Query(range): Query<DateRangeParams>,
) -> Result<Json<ChatStatistics>, AppError> {
    let project_id = parse_id(&project_id, "project id")?;
    Ok(Json(
        state
            .messages
            .get_chat_statistics(project_id, range.start, range.end)
            .await?,
    ))
}

/// POST /api/projects/{project_id}/read
pub async fn mark_as_read(
    State(state): State<ApiState>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let project_id = parse_id(&project_id, "project id")?;
    state.messages.mark_as_read(project_id, &user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Moderation
// ============================================================================

/// POST /api/projects/{project_id}/timeouts
pub async fn timeout_user(
    State(state): State<ApiState>,
    user: AuthUser,
    Path(project_id): Path<String>,
    Json(req): Json<TimeoutRequest>,
) -> Result<(StatusCode, Json<UserTimeout>), AppError> {
    let project_id = parse_id(&project_id, "project id")?;
    let timeout = state
        .messages
        .timeout_user(
            project_id,
            &req.user_id,
            req.duration_secs,
            req.reason,
            user.identity(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(timeout)))
}

/// GET /api/projects/{project_id}/flags (moderators only)
pub async fn list_flags(
    State(state): State<ApiState>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<FlagRecord>>, AppError> {
    if !user.role.can_moderate() {
        return Err(ChatError::PermissionDenied(format!(
            "role '{}' cannot review flags",
            user.role
        ))
        .into());
    }
    let project_id = parse_id(&project_id, "project id")?;
    Ok(Json(state.messages.list_flags(project_id).await?))
}

// ============================================================================
// Presence and AI context
// ============================================================================

/// GET /api/projects/{project_id}/presence
pub async fn get_presence(
    State(state): State<ApiState>,
    _user: AuthUser,
    Path(project_id): Path<String>,
) -> Result<Json<PresenceSnapshot>, AppError> {
    let project_id = parse_id(&project_id, "project id")?;
    let mut typing_users: Vec<String> = state.presence.typing_users(project_id).into_iter().collect();
    typing_users.sort();
    Ok(Json(PresenceSnapshot {
        typing_users,
        presence: state.presence.user_presence(project_id),
    }))
}

/// GET /api/projects/{project_id}/context?persona_id=...
pub async fn get_context(
    State(state): State<ApiState>,
    _user: AuthUser,
    Path(project_id): Path<String>,
    Query(params): Query<ContextParams>,
) -> Result<Json<Vec<ContextEntry>>, AppError> {
    let project_id = parse_id(&project_id, "project id")?;
    Ok(Json(
        state
            .context
            .get_context_for_ai(project_id, &params.persona_id)
            .await?,
    ))
}
