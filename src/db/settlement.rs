use super::ledger::fetch_completion;
use super::{timestamp, user_exists, Database};
use crate::errors::{AppError, AppResult};
use crate::models::ApprovedCompletion;
use chrono::Utc;
use rusqlite::{params, Connection, TransactionBehavior};

impl Database {
    /// Moves a pending completion to approved and credits the submitter, all in one
    /// write-locked transaction. The precondition reads happen after the lock is held, so a
    /// concurrent approval that committed first is seen here and rejected.
    pub fn approve_completion(&self, completion_id: &str, approver_id: &str) -> AppResult<ApprovedCompletion> {
        if approver_id.trim().is_empty() {
            return Err(AppError::Validation("approver_id is required".to_string()));
        }

        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let completion = fetch_completion(&tx, completion_id)?
            .ok_or_else(|| AppError::NotFound(format!("completion {} not found", completion_id)))?;
        if completion.approved || completion.is_settled() {
            return Err(AppError::AlreadyApproved(format!(
                "completion {} is already approved",
                completion_id
            )));
        }
        if completion.user_id == approver_id {
            return Err(AppError::SelfApprovalForbidden(
                "a completion must be approved by someone other than its submitter".to_string(),
            ));
        }
        if !user_exists(&tx, approver_id)? {
            return Err(AppError::NotFound(format!("approver {} not found", approver_id)));
        }

        let changed = tx.execute(
            "UPDATE challenge_completions
             SET approved = 1, approved_by = ?1, approved_at = ?2, settled_points = points
             WHERE id = ?3 AND approved = 0 AND settled_points IS NULL",
            params![approver_id, timestamp(Utc::now()), completion_id],
        )?;
        if changed != 1 {
            return Err(AppError::AlreadyApproved(format!(
                "completion {} is already approved",
                completion_id
            )));
        }

        settle_balances(&tx, &completion.group_id, &completion.user_id, completion.points, 1)?;
        tx.commit()?;

        Ok(ApprovedCompletion {
            completion_id: completion_id.to_string(),
            approved: true,
            points: completion.points,
        })
    }
}

/// The single writer of point balances. Applies `delta` to the user's global total and to
/// their balance in `group_id`, and `completed_delta` to their completed-challenge count.
/// Must run inside the caller's transaction; a missing user or membership row is an error
/// so the caller rolls back instead of half-applying.
pub(super) fn settle_balances(
    conn: &Connection,
    group_id: &str,
    user_id: &str,
    delta: i64,
    completed_delta: i64,
) -> AppResult<()> {
    let user_rows = conn.execute(
        "UPDATE users
         SET total_points = total_points + ?1,
             completed_challenges = MAX(completed_challenges + ?2, 0)
         WHERE id = ?3",
        params![delta, completed_delta, user_id],
    )?;
    if user_rows != 1 {
        return Err(AppError::NotFound(format!("user {} not found", user_id)));
    }

    let member_rows = conn.execute(
        "UPDATE group_members SET points = points + ?1 WHERE group_id = ?2 AND user_id = ?3",
        params![delta, group_id, user_id],
    )?;
    if member_rows != 1 {
        return Err(AppError::NotFound(format!(
            "membership of user {} in group {} not found",
            user_id, group_id
        )));
    }

    tracing::debug!(group_id, user_id, delta, "balances settled");
    Ok(())
}
