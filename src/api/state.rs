//! Application state shared by the handlers

use crate::tracker::ChallengeTracker;

#[derive(Clone)]
pub struct AppState {
    pub tracker: ChallengeTracker,
    pub version: String,
}

impl AppState {
    pub fn new(tracker: ChallengeTracker) -> Self {
        Self {
            tracker,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
