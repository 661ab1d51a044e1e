//! REST boundary for the challenge tracker.
//!
//! ## Endpoints
//!
//! ### Completions
//! - POST /challenge-completions - Submit a completion (pending)
//! - GET /challenge-completions/:completion_id - Get one completion
//! - POST /challenge-completions/:completion_id/approve - Approve and settle points
//! - DELETE /challenge-completions/:completion_id - Delete, reversing settled points
//! - GET /challenge-completions/group/:group_id - List a group's completions
//! - GET /challenge-completions/user/:user_id/group/:group_id - List one user's completions in a group
//!
//! ### Groups and catalog
//! - GET /challenges - Active catalog by category
//! - GET /groups/:group_id/challenges - The group's selected challenges
//! - POST /groups/:group_id/challenges - Replace the group's selection
//! - GET /groups/:group_id/challenges/:challenge_id/eligibility?user_id= - Completability check
//! - GET /groups/:group_id/leaderboard - Group standings

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use dto::*;
pub use error::*;
pub use routes::create_router;
pub use state::*;
