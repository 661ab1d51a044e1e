use crate::db::{Database, DatabaseOptions};
use crate::errors::{AppError, AppResult};
use crate::models::{
    ApproveCompletionPayload, ApprovedCompletion, CategorizedChallenges, CompletionRecord, CompletionView,
    DeletedCompletion, Eligibility, GroupStanding, NewCompletion, ReplaceGroupChallengesPayload,
    ReplacedChallengeSet, SubmitCompletionPayload, SubmittedCompletion,
};
use std::path::Path;
use std::sync::Arc;

const MAX_EVIDENCE_URL_CHARS: usize = 2_048;
const MAX_NOTES_CHARS: usize = 1_000;

/// Async entry point for the completion workflow. Store calls run on the blocking pool.
#[derive(Clone)]
pub struct ChallengeTracker {
    db: Arc<Database>,
}

impl ChallengeTracker {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn open(path: &Path, options: &DatabaseOptions) -> AppResult<Self> {
        let db = Database::open(path, options)?;
        tracing::info!(path = %path.display(), "challenge store opened");
        Ok(Self::new(Arc::new(db)))
    }

    async fn with_db<T, F>(&self, operation: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> AppResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || operation(db.as_ref()))
            .await
            .map_err(|error| AppError::Internal(format!("store task failed: {}", error)))?
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.with_db(|db| db.ping()).await
    }

    pub async fn submit_completion(&self, payload: SubmitCompletionPayload) -> AppResult<SubmittedCompletion> {
        let completion = validate_submission(payload)?;
        let group_id = completion.group_id.clone();
        let user_id = completion.user_id.clone();
        let challenge_id = completion.challenge_id.clone();

        match self.with_db(move |db| db.submit_completion(&completion)).await {
            Ok(record) => {
                tracing::info!(
                    completion_id = %record.id,
                    group_id = %group_id,
                    user_id = %user_id,
                    challenge_id = %challenge_id,
                    points = record.points,
                    "completion submitted"
                );
                Ok(SubmittedCompletion {
                    completion_id: record.id,
                    points: record.points,
                    approved: record.approved,
                })
            }
            Err(error) => {
                log_rejection("submit", &error);
                Err(error)
            }
        }
    }

    pub async fn approve_completion(
        &self,
        completion_id: &str,
        payload: ApproveCompletionPayload,
    ) -> AppResult<ApprovedCompletion> {
        let approver_id = required_field(payload.approver_id, "approver_id")?;
        let completion_id = required_field(Some(completion_id.to_string()), "completion_id")?;

        let id = completion_id.clone();
        let approver = approver_id.clone();
        match self.with_db(move |db| db.approve_completion(&id, &approver)).await {
            Ok(approved) => {
                tracing::info!(
                    completion_id = %completion_id,
                    approver_id = %approver_id,
                    points = approved.points,
                    "completion approved and settled"
                );
                Ok(approved)
            }
            Err(error) => {
                log_rejection("approve", &error);
                Err(error)
            }
        }
    }

    pub async fn delete_completion(&self, completion_id: &str) -> AppResult<DeletedCompletion> {
        let id = completion_id.to_string();
        match self.with_db(move |db| db.delete_completion(&id)).await {
            Ok(deleted) => {
                tracing::info!(
                    completion_id = %deleted.completion_id,
                    reversed_points = deleted.reversed_points,
                    "completion deleted"
                );
                Ok(deleted)
            }
            Err(error) => {
                log_rejection("delete", &error);
                Err(error)
            }
        }
    }

    pub async fn get_completion(&self, completion_id: &str) -> AppResult<CompletionRecord> {
        let id = completion_id.to_string();
        self.with_db(move |db| db.get_completion(&id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("completion {} not found", completion_id)))
    }

    pub async fn list_group_completions(&self, group_id: &str) -> AppResult<Vec<CompletionView>> {
        let group_id = group_id.to_string();
        self.with_db(move |db| db.list_group_completions(&group_id)).await
    }

    pub async fn list_user_completions_in_group(&self, user_id: &str, group_id: &str) -> AppResult<Vec<CompletionView>> {
        let user_id = user_id.to_string();
        let group_id = group_id.to_string();
        self.with_db(move |db| db.list_user_completions_in_group(&user_id, &group_id))
            .await
    }

    pub async fn replace_group_challenges(
        &self,
        group_id: &str,
        payload: ReplaceGroupChallengesPayload,
    ) -> AppResult<ReplacedChallengeSet> {
        let challenge_ids = payload.challenge_ids.unwrap_or_default();
        if challenge_ids.is_empty() {
            return Err(AppError::Validation("challenge_ids must contain at least one id".to_string()));
        }
        let group = group_id.to_string();
        match self
            .with_db(move |db| db.replace_group_challenges(&group, &challenge_ids))
            .await
        {
            Ok(replaced) => {
                tracing::info!(
                    group_id = %replaced.group_id,
                    challenge_count = replaced.challenge_count,
                    "group challenge set replaced"
                );
                Ok(replaced)
            }
            Err(error) => {
                log_rejection("replace_group_challenges", &error);
                Err(error)
            }
        }
    }

    pub async fn group_challenge_set(&self, group_id: &str) -> AppResult<Vec<CategorizedChallenges>> {
        let group_id = group_id.to_string();
        self.with_db(move |db| db.group_challenge_set(&group_id)).await
    }

    pub async fn catalog(&self) -> AppResult<Vec<CategorizedChallenges>> {
        self.with_db(|db| db.list_catalog()).await
    }

    pub async fn is_completable(&self, group_id: &str, user_id: &str, challenge_id: &str) -> AppResult<Eligibility> {
        let user_id = required_field(Some(user_id.to_string()), "user_id")?;
        let group_id = group_id.to_string();
        let challenge_id = challenge_id.to_string();
        self.with_db(move |db| db.is_completable(&group_id, &user_id, &challenge_id))
            .await
    }

    pub async fn group_leaderboard(&self, group_id: &str) -> AppResult<Vec<GroupStanding>> {
        let group_id = group_id.to_string();
        self.with_db(move |db| db.group_leaderboard(&group_id)).await
    }
}

fn log_rejection(operation: &'static str, error: &AppError) {
    if error.is_retryable() || matches!(error, AppError::Internal(_)) {
        tracing::error!(operation, error = %error, "store operation failed");
    } else {
        tracing::warn!(operation, error = %error, "request rejected");
    }
}

fn required_field(value: Option<String>, field: &str) -> AppResult<String> {
    match value.map(|raw| raw.trim().to_string()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(AppError::Validation(format!("{} is required", field))),
    }
}

fn optional_text(value: Option<String>, field: &str, max_chars: usize) -> AppResult<Option<String>> {
    let Some(value) = value.map(|raw| raw.trim().to_string()) else {
        return Ok(None);
    };
    if value.is_empty() {
        return Ok(None);
    }
    if value.chars().count() > max_chars {
        return Err(AppError::Validation(format!(
            "{} must be at most {} characters",
            field, max_chars
        )));
    }
    Ok(Some(value))
}

fn validate_submission(payload: SubmitCompletionPayload) -> AppResult<NewCompletion> {
    Ok(NewCompletion {
        group_id: required_field(payload.group_id, "group_id")?,
        user_id: required_field(payload.user_id, "user_id")?,
        challenge_id: required_field(payload.challenge_id, "challenge_id")?,
        evidence_url: optional_text(payload.evidence_url, "evidence_url", MAX_EVIDENCE_URL_CHARS)?,
        notes: optional_text(payload.notes, "notes", MAX_NOTES_CHARS)?,
    })
}
