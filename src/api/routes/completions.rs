//! Completion ledger and settlement endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::models::{
    ApproveCompletionPayload, ApprovedCompletion, CompletionRecord, CompletionView, DeletedCompletion,
    SubmitCompletionPayload, SubmittedCompletion,
};

/// Submit a completion; it starts out pending and moves no points
pub async fn submit_completion(
    State(state): State<AppState>,
    payload: Result<Json<SubmitCompletionPayload>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmittedCompletion>)> {
    let Json(payload) = payload?;
    let submitted = state.tracker.submit_completion(payload).await?;
    Ok((StatusCode::CREATED, Json(submitted)))
}

/// Get a completion by ID
pub async fn get_completion(
    State(state): State<AppState>,
    Path(completion_id): Path<String>,
) -> ApiResult<Json<CompletionRecord>> {
    let completion = state.tracker.get_completion(&completion_id).await?;
    Ok(Json(completion))
}

/// Approve a pending completion and settle its points
pub async fn approve_completion(
    State(state): State<AppState>,
    Path(completion_id): Path<String>,
    payload: Result<Json<ApproveCompletionPayload>, JsonRejection>,
) -> ApiResult<Json<ApprovedCompletion>> {
    let Json(payload) = payload?;
    let approved = state
        .tracker
        .approve_completion(&completion_id, payload)
        .await?;
    Ok(Json(approved))
}

pub async fn delete_completion(
    State(state): State<AppState>,
    Path(completion_id): Path<String>,
) -> ApiResult<Json<DeletedCompletion>> {
    let deleted = state.tracker.delete_completion(&completion_id).await?;
    Ok(Json(deleted))
}

pub async fn list_group_completions(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> ApiResult<Json<Vec<CompletionView>>> {
    let completions = state.tracker.list_group_completions(&group_id).await?;
    Ok(Json(completions))
}

pub async fn list_user_completions(
    State(state): State<AppState>,
    Path((user_id, group_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<CompletionView>>> {
    let completions = state
        .tracker
        .list_user_completions_in_group(&user_id, &group_id)
        .await?;
    Ok(Json(completions))
}
