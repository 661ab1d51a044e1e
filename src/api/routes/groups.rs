//! Catalog, group challenge selection and standings endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};

use crate::api::dto::EligibilityQuery;
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::errors::AppError;
use crate::models::{
    CategorizedChallenges, Eligibility, GroupStanding, ReplaceGroupChallengesPayload, ReplacedChallengeSet,
};

pub async fn get_catalog(State(state): State<AppState>) -> ApiResult<Json<Vec<CategorizedChallenges>>> {
    Ok(Json(state.tracker.catalog().await?))
}

pub async fn get_group_challenges(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> ApiResult<Json<Vec<CategorizedChallenges>>> {
    let set = state.tracker.group_challenge_set(&group_id).await?;
    Ok(Json(set))
}

/// Replace the group's whole challenge selection
pub async fn replace_group_challenges(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    payload: Result<Json<ReplaceGroupChallengesPayload>, JsonRejection>,
) -> ApiResult<Json<ReplacedChallengeSet>> {
    let Json(payload) = payload?;
    let replaced = state
        .tracker
        .replace_group_challenges(&group_id, payload)
        .await?;
    Ok(Json(replaced))
}

pub async fn get_eligibility(
    State(state): State<AppState>,
    Path((group_id, challenge_id)): Path<(String, String)>,
    Query(query): Query<EligibilityQuery>,
) -> ApiResult<Json<Eligibility>> {
    let user_id = query
        .user_id
        .ok_or_else(|| AppError::Validation("user_id query parameter is required".to_string()))?;
    let eligibility = state
        .tracker
        .is_completable(&group_id, &user_id, &challenge_id)
        .await?;
    Ok(Json(eligibility))
}

pub async fn get_leaderboard(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> ApiResult<Json<Vec<GroupStanding>>> {
    Ok(Json(state.tracker.group_leaderboard(&group_id).await?))
}
