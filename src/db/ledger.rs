use super::catalog::evaluate_eligibility;
use super::settlement::settle_balances;
use super::{parse_sign, parse_time, timestamp, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{
    ApprovalState, CompletionRecord, CompletionView, DeletedCompletion, EligibilityReason, NewCompletion,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

const VIEW_SELECT: &str = "SELECT cc.id, cc.group_id, cc.user_id, u.display_name, cc.challenge_id,
        c.description, k.name, c.sign, cc.points, cc.evidence_url, cc.notes, cc.completed_at,
        cc.approved, cc.approved_by
     FROM challenge_completions cc
     JOIN users u ON u.id = cc.user_id
     JOIN challenges c ON c.id = cc.challenge_id
     JOIN categories k ON k.id = c.category_id";

impl Database {
    /// Records a pending completion. The eligibility check and the insert share one
    /// write-locked transaction, so two racing submissions of a non-repeatable challenge
    /// cannot both pass the duplicate check.
    pub fn submit_completion(&self, completion: &NewCompletion) -> AppResult<CompletionRecord> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (reason, challenge) = evaluate_eligibility(
            &tx,
            &completion.group_id,
            &completion.user_id,
            &completion.challenge_id,
        )?;
        let challenge = match (reason, challenge) {
            (EligibilityReason::Completable, Some(challenge)) => challenge,
            (EligibilityReason::ChallengeNotFound, _) | (_, None) => {
                return Err(AppError::NotFound(format!(
                    "challenge {} not found",
                    completion.challenge_id
                )))
            }
            (EligibilityReason::NotMember, _) => {
                return Err(AppError::NotFound(format!(
                    "user {} is not a member of group {}",
                    completion.user_id, completion.group_id
                )))
            }
            (EligibilityReason::Inactive, _) => {
                return Err(AppError::ChallengeUnavailable(format!(
                    "challenge {} is not active",
                    completion.challenge_id
                )))
            }
            (EligibilityReason::NotSelected, _) => {
                return Err(AppError::ChallengeUnavailable(format!(
                    "challenge {} is not selected for group {}",
                    completion.challenge_id, completion.group_id
                )))
            }
            (EligibilityReason::AlreadyCompleted, _) => {
                return Err(AppError::DuplicateNonRepeatable(format!(
                    "challenge {} can only be completed once per group",
                    completion.challenge_id
                )))
            }
        };

        let points = challenge.signed_points();
        tx.execute(
            "INSERT INTO challenge_completions (
               id, group_id, user_id, challenge_id, completed_at, evidence_url, notes,
               points, approved, approved_by, approved_at, settled_points
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, NULL, NULL)",
            params![
                id,
                completion.group_id,
                completion.user_id,
                completion.challenge_id,
                timestamp(now),
                completion.evidence_url,
                completion.notes,
                points,
            ],
        )?;
        tx.commit()?;

        Ok(CompletionRecord {
            id,
            group_id: completion.group_id.clone(),
            user_id: completion.user_id.clone(),
            challenge_id: completion.challenge_id.clone(),
            completed_at: now,
            evidence_url: completion.evidence_url.clone(),
            notes: completion.notes.clone(),
            points,
            approved: false,
            approved_by: None,
            approved_at: None,
            settled_points: None,
        })
    }

    pub fn get_completion(&self, completion_id: &str) -> AppResult<Option<CompletionRecord>> {
        let conn = self.connection()?;
        fetch_completion(&conn, completion_id)
    }

    /// Newest first. Each call issues a fresh query.
    pub fn list_group_completions(&self, group_id: &str) -> AppResult<Vec<CompletionView>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "{VIEW_SELECT}
             WHERE cc.group_id = ?1
             ORDER BY cc.completed_at DESC, cc.rowid DESC"
        ))?;
        let rows = stmt
            .query_map([group_id], parse_completion_view_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_user_completions_in_group(&self, user_id: &str, group_id: &str) -> AppResult<Vec<CompletionView>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "{VIEW_SELECT}
             WHERE cc.group_id = ?1 AND cc.user_id = ?2
             ORDER BY cc.completed_at DESC, cc.rowid DESC"
        ))?;
        let rows = stmt
            .query_map(params![group_id, user_id], parse_completion_view_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Removes a completion. If it was settled, the settled amount is taken back out of
    /// the submitter's balances in the same transaction; a pending completion touches no balance.
    pub fn delete_completion(&self, completion_id: &str) -> AppResult<DeletedCompletion> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let completion = fetch_completion(&tx, completion_id)?
            .ok_or_else(|| AppError::NotFound(format!("completion {} not found", completion_id)))?;

        // Reversal needs the submitter's membership row. Nothing removes members today;
        // a member-removal path would have to settle or reassign their completions first.
        let reversed_points = match completion.settled_points {
            Some(settled) => {
                settle_balances(&tx, &completion.group_id, &completion.user_id, -settled, -1)?;
                settled
            }
            None => 0,
        };

        tx.execute("DELETE FROM challenge_completions WHERE id = ?1", [completion_id])?;
        tx.commit()?;

        Ok(DeletedCompletion {
            completion_id: completion_id.to_string(),
            deleted: true,
            reversed_points,
        })
    }
}

pub(super) fn fetch_completion(conn: &Connection, completion_id: &str) -> AppResult<Option<CompletionRecord>> {
    conn.query_row(
        "SELECT id, group_id, user_id, challenge_id, completed_at, evidence_url, notes,
                points, approved, approved_by, approved_at, settled_points
         FROM challenge_completions WHERE id = ?1",
        [completion_id],
        parse_completion_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn parse_completion_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CompletionRecord> {
    Ok(CompletionRecord {
        id: row.get(0)?,
        group_id: row.get(1)?,
        user_id: row.get(2)?,
        challenge_id: row.get(3)?,
        completed_at: parse_time(&row.get::<_, String>(4)?)?,
        evidence_url: row.get(5)?,
        notes: row.get(6)?,
        points: row.get(7)?,
        approved: row.get::<_, i32>(8)? != 0,
        approved_by: row.get(9)?,
        approved_at: row
            .get::<_, Option<String>>(10)?
            .map(|raw| parse_time(&raw))
            .transpose()?,
        settled_points: row.get(11)?,
    })
}

fn parse_completion_view_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CompletionView> {
    let approved = row.get::<_, i32>(12)? != 0;
    Ok(CompletionView {
        completion_id: row.get(0)?,
        group_id: row.get(1)?,
        user_id: row.get(2)?,
        user_display_name: row.get(3)?,
        challenge_id: row.get(4)?,
        challenge_description: row.get(5)?,
        category_name: row.get(6)?,
        sign: parse_sign(&row.get::<_, String>(7)?)?,
        points: row.get(8)?,
        evidence_url: row.get(9)?,
        notes: row.get(10)?,
        completed_at: parse_time(&row.get::<_, String>(11)?)?,
        approved,
        approved_by: row.get(13)?,
        status: if approved {
            ApprovalState::Approved
        } else {
            ApprovalState::Pending
        },
    })
}

#[cfg(test)]
mod tests {
    use crate::db::fixtures::Fixture;
    use crate::db::{Database, DatabaseOptions};
    use crate::errors::AppError;
    use crate::models::{ApprovalState, ChallengeSign, NewCompletion};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    #[test]
    fn submission_is_pending_and_moves_no_balance() {
        let mut fx = Fixture::new();
        let challenge = fx.challenge(20, ChallengeSign::Positive, true);

        let completion = fx
            .db
            .submit_completion(&NewCompletion {
                evidence_url: Some("https://photos.example/1.jpg".to_string()),
                notes: Some("sunrise swim".to_string()),
                ..fx.submission(&fx.bob, &challenge)
            })
            .expect("submit");

        assert!(!completion.approved);
        assert_eq!(completion.points, 20);
        assert!(completion.settled_points.is_none());
        assert_eq!(fx.user_points(&fx.bob), 0);
        assert_eq!(fx.group_points(&fx.bob), 0);

        let stored = fx
            .db
            .get_completion(&completion.id)
            .expect("get")
            .expect("exists");
        assert_eq!(stored.evidence_url.as_deref(), Some("https://photos.example/1.jpg"));
        assert_eq!(stored.state(), ApprovalState::Pending);
    }

    #[test]
    fn non_repeatable_blocks_second_submission_in_any_state() {
        let mut fx = Fixture::new();
        let challenge = fx.challenge(20, ChallengeSign::Positive, false);

        let first = fx
            .db
            .submit_completion(&fx.submission(&fx.bob, &challenge))
            .expect("first");

        let pending_retry = fx.db.submit_completion(&fx.submission(&fx.bob, &challenge));
        assert!(matches!(pending_retry, Err(AppError::DuplicateNonRepeatable(_))));

        fx.db
            .approve_completion(&first.id, &fx.alice.id)
            .expect("approve");
        let approved_retry = fx.db.submit_completion(&fx.submission(&fx.bob, &challenge));
        assert!(matches!(approved_retry, Err(AppError::DuplicateNonRepeatable(_))));

        let untouched = fx.db.get_completion(&first.id).expect("get").expect("exists");
        assert!(untouched.approved);
        assert_eq!(fx.db.list_user_completions_in_group(&fx.bob.id, &fx.group.id).expect("list").len(), 1);
    }

    #[test]
    fn repeatable_challenges_accept_many_submissions() {
        let mut fx = Fixture::new();
        let challenge = fx.challenge(5, ChallengeSign::Positive, true);
        for _ in 0..3 {
            fx.db
                .submit_completion(&fx.submission(&fx.carol, &challenge))
                .expect("submit");
        }
        let listed = fx
            .db
            .list_user_completions_in_group(&fx.carol.id, &fx.group.id)
            .expect("list");
        assert_eq!(listed.len(), 3);
    }

    #[test]
    fn submission_failures_map_to_error_kinds() {
        let mut fx = Fixture::new();
        let challenge = fx.challenge(10, ChallengeSign::Positive, true);
        let outsider = fx.db.create_user("Outsider").expect("outsider");

        let missing = fx.db.submit_completion(&NewCompletion {
            challenge_id: "missing".to_string(),
            ..fx.submission(&fx.bob, &challenge)
        });
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        let not_member = fx.db.submit_completion(&fx.submission(&outsider, &challenge));
        assert!(matches!(not_member, Err(AppError::NotFound(_))));

        fx.db.set_challenge_active(&challenge.id, false).expect("deactivate");
        let inactive = fx.db.submit_completion(&fx.submission(&fx.bob, &challenge));
        assert!(matches!(inactive, Err(AppError::ChallengeUnavailable(_))));
    }

    #[test]
    fn captured_points_survive_catalog_edits() {
        let mut fx = Fixture::new();
        let challenge = fx.challenge(20, ChallengeSign::Positive, true);
        let completion = fx
            .db
            .submit_completion(&fx.submission(&fx.bob, &challenge))
            .expect("submit");

        fx.db.set_challenge_points(&challenge.id, 50).expect("edit catalog");
        fx.db
            .approve_completion(&completion.id, &fx.carol.id)
            .expect("approve");

        assert_eq!(fx.user_points(&fx.bob), 20);
        assert_eq!(fx.group_points(&fx.bob), 20);
    }

    #[test]
    fn listings_are_newest_first_and_scoped() {
        let mut fx = Fixture::new();
        let swim = fx.challenge(10, ChallengeSign::Positive, true);
        let hike = fx.challenge(30, ChallengeSign::Positive, true);

        let first = fx.db.submit_completion(&fx.submission(&fx.bob, &swim)).expect("first");
        let second = fx.db.submit_completion(&fx.submission(&fx.carol, &hike)).expect("second");
        let third = fx.db.submit_completion(&fx.submission(&fx.bob, &hike)).expect("third");

        let all = fx.db.list_group_completions(&fx.group.id).expect("group list");
        let ids: Vec<&str> = all.iter().map(|view| view.completion_id.as_str()).collect();
        assert_eq!(ids, vec![third.id.as_str(), second.id.as_str(), first.id.as_str()]);
        assert_eq!(all[0].user_display_name, "Bob");
        assert_eq!(all[0].category_name, "Adventure");
        assert_eq!(all[0].status, ApprovalState::Pending);

        let bobs = fx
            .db
            .list_user_completions_in_group(&fx.bob.id, &fx.group.id)
            .expect("user list");
        assert_eq!(bobs.len(), 2);
        assert!(bobs.iter().all(|view| view.user_id == fx.bob.id));

        let again = fx.db.list_group_completions(&fx.group.id).expect("re-issued");
        assert_eq!(again.len(), 3);
        assert!(fx.db.list_group_completions("other-group").expect("empty").is_empty());
    }

    #[test]
    fn deleting_pending_completion_keeps_balances() {
        let mut fx = Fixture::new();
        let challenge = fx.challenge(20, ChallengeSign::Positive, true);
        let settled = fx.db.submit_completion(&fx.submission(&fx.bob, &challenge)).expect("settled");
        fx.db.approve_completion(&settled.id, &fx.alice.id).expect("approve");
        let pending = fx.db.submit_completion(&fx.submission(&fx.bob, &challenge)).expect("pending");

        let deleted = fx.db.delete_completion(&pending.id).expect("delete");
        assert_eq!(deleted.reversed_points, 0);
        assert_eq!(fx.user_points(&fx.bob), 20);
        assert_eq!(fx.group_points(&fx.bob), 20);
        assert!(fx.db.get_completion(&pending.id).expect("get").is_none());
    }

    #[test]
    fn deleting_approved_completion_reverses_exactly_once() {
        let mut fx = Fixture::new();
        let challenge = fx.challenge(20, ChallengeSign::Positive, false);
        let completion = fx.db.submit_completion(&fx.submission(&fx.bob, &challenge)).expect("submit");
        fx.db.approve_completion(&completion.id, &fx.carol.id).expect("approve");
        assert_eq!(fx.user_points(&fx.bob), 20);

        let deleted = fx.db.delete_completion(&completion.id).expect("delete");
        assert_eq!(deleted.reversed_points, 20);
        assert_eq!(fx.user_points(&fx.bob), 0);
        assert_eq!(fx.group_points(&fx.bob), 0);
        let bob = fx.db.get_user(&fx.bob.id).expect("get").expect("bob");
        assert_eq!(bob.completed_challenges, 0);

        let again = fx.db.delete_completion(&completion.id);
        assert!(matches!(again, Err(AppError::NotFound(_))));
        assert_eq!(fx.user_points(&fx.bob), 0);

        // a deleted non-repeatable completion frees the challenge again
        fx.db
            .submit_completion(&fx.submission(&fx.bob, &challenge))
            .expect("resubmit after delete");
    }

    #[test]
    fn deleting_settled_completion_without_membership_rolls_back() {
        let mut fx = Fixture::new();
        let challenge = fx.challenge(20, ChallengeSign::Positive, true);
        let completion = fx.db.submit_completion(&fx.submission(&fx.bob, &challenge)).expect("submit");
        fx.db.approve_completion(&completion.id, &fx.alice.id).expect("approve");

        {
            let conn = fx.db.conn.lock().expect("db lock");
            conn.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                [&fx.group.id, &fx.bob.id],
            )
            .expect("remove membership");
        }

        let result = fx.db.delete_completion(&completion.id);
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(fx.db.get_completion(&completion.id).expect("get").is_some());
        assert_eq!(fx.user_points(&fx.bob), 20);
    }

    #[test]
    fn racing_submissions_of_non_repeatable_challenge_record_once() {
        let mut fx = Fixture::new();
        let challenge = fx.challenge(30, ChallengeSign::Positive, false);
        let submission = fx.submission(&fx.bob, &challenge);

        let options = DatabaseOptions {
            busy_timeout: Duration::from_secs(10),
            seed_catalog: false,
        };
        let contenders = 4;
        let barrier = Arc::new(Barrier::new(contenders));

        let handles: Vec<_> = (0..contenders)
            .map(|_| {
                let path = fx.db_path();
                let options = options.clone();
                let barrier = Arc::clone(&barrier);
                let submission = submission.clone();
                std::thread::spawn(move || {
                    let db = Database::open(&path, &options).expect("separate handle");
                    barrier.wait();
                    db.submit_completion(&submission)
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect();
        let recorded = results.iter().filter(|result| result.is_ok()).count();
        let duplicates = results
            .iter()
            .filter(|result| matches!(result, Err(AppError::DuplicateNonRepeatable(_))))
            .count();
        assert_eq!(recorded, 1);
        assert_eq!(duplicates, contenders - 1);

        let stored = fx
            .db
            .list_user_completions_in_group(&fx.bob.id, &fx.group.id)
            .expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(fx.user_points(&fx.bob), 0);
    }
}
