//! Request and response shapes that exist only at the HTTP boundary.

use serde::{Deserialize, Serialize};

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct EligibilityQuery {
    pub user_id: Option<String>,
}
