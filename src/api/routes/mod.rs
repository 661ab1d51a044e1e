//! API route handlers

pub mod completions;
pub mod groups;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::api::state::AppState;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        // Catalog
        .route("/challenges", get(groups::get_catalog))
        // Completion ledger and settlement
        .route("/challenge-completions", post(completions::submit_completion))
        .route(
            "/challenge-completions/:completion_id",
            get(completions::get_completion).delete(completions::delete_completion),
        )
        .route(
            "/challenge-completions/:completion_id/approve",
            post(completions::approve_completion),
        )
        .route(
            "/challenge-completions/group/:group_id",
            get(completions::list_group_completions),
        )
        .route(
            "/challenge-completions/user/:user_id/group/:group_id",
            get(completions::list_user_completions),
        )
        // Group challenge selection
        .route(
            "/groups/:group_id/challenges",
            get(groups::get_group_challenges).post(groups::replace_group_challenges),
        )
        .route(
            "/groups/:group_id/challenges/:challenge_id/eligibility",
            get(groups::get_eligibility),
        )
        .route("/groups/:group_id/leaderboard", get(groups::get_leaderboard))
        .with_state(state)
}
