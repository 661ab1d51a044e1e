use super::{
    group_exists, parse_repeatable, parse_sign, parse_time, repeatable_flag, required_text, timestamp,
    Database,
};
use crate::errors::{AppError, AppResult};
use crate::models::{
    CategorizedChallenges, CategoryRecord, ChallengeRecord, Eligibility, EligibilityReason, NewChallenge,
    ReplacedChallengeSet,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashSet;
use uuid::Uuid;

const CHALLENGE_COLUMNS: &str =
    "c.id, c.category_id, c.description, c.points, c.sign, c.is_active, c.repeatable, c.created_at";

impl Database {
    pub fn create_category(&self, name: &str) -> AppResult<CategoryRecord> {
        let conn = self.connection()?;
        insert_category(&conn, name)
    }

    pub fn create_challenge(&self, challenge: &NewChallenge) -> AppResult<ChallengeRecord> {
        let conn = self.connection()?;
        insert_challenge(&conn, challenge)
    }

    pub fn get_challenge(&self, challenge_id: &str) -> AppResult<Option<ChallengeRecord>> {
        let conn = self.connection()?;
        fetch_challenge(&conn, challenge_id)
    }

    pub fn set_challenge_active(&self, challenge_id: &str, active: bool) -> AppResult<bool> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE challenges SET is_active = ?1 WHERE id = ?2",
            params![if active { 1 } else { 0 }, challenge_id],
        )?;
        Ok(changed > 0)
    }

    /// Catalog edit. Completions already recorded keep the points captured when they were submitted.
    pub fn set_challenge_points(&self, challenge_id: &str, points: i64) -> AppResult<bool> {
        if points < 0 {
            return Err(AppError::Validation("points must be a non-negative magnitude".to_string()));
        }
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE challenges SET points = ?1 WHERE id = ?2",
            params![points, challenge_id],
        )?;
        Ok(changed > 0)
    }

    /// Every active challenge, grouped by category.
    pub fn list_catalog(&self) -> AppResult<Vec<CategorizedChallenges>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHALLENGE_COLUMNS}, k.name
             FROM challenges c
             JOIN categories k ON k.id = c.category_id
             WHERE c.is_active = 1
             ORDER BY k.name ASC, k.id ASC, c.points DESC, c.description ASC"
        ))?;
        let rows = stmt
            .query_map([], parse_categorized_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(group_by_category(rows))
    }

    /// The active challenges a group has opted into, grouped by category for display.
    pub fn group_challenge_set(&self, group_id: &str) -> AppResult<Vec<CategorizedChallenges>> {
        let conn = self.connection()?;
        if !group_exists(&conn, group_id)? {
            return Err(AppError::NotFound(format!("group {} not found", group_id)));
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {CHALLENGE_COLUMNS}, k.name
             FROM group_challenges gc
             JOIN challenges c ON c.id = gc.challenge_id
             JOIN categories k ON k.id = c.category_id
             WHERE gc.group_id = ?1 AND c.is_active = 1
             ORDER BY k.name ASC, k.id ASC, c.points DESC, c.description ASC"
        ))?;
        let rows = stmt
            .query_map([group_id], parse_categorized_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(group_by_category(rows))
    }

    /// Replaces the group's whole selection. Duplicate ids collapse; an unknown id aborts
    /// the replacement and leaves the previous selection in place.
    pub fn replace_group_challenges(
        &self,
        group_id: &str,
        challenge_ids: &[String],
    ) -> AppResult<ReplacedChallengeSet> {
        if challenge_ids.is_empty() {
            return Err(AppError::Validation("challenge_ids must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        let unique: Vec<&str> = challenge_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| seen.insert(*id))
            .collect();
        if unique.iter().any(|id| id.is_empty()) {
            return Err(AppError::Validation("challenge_ids must not contain blank ids".to_string()));
        }

        let now = timestamp(Utc::now());
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !group_exists(&tx, group_id)? {
            return Err(AppError::NotFound(format!("group {} not found", group_id)));
        }
        for challenge_id in &unique {
            let count: i64 = tx.query_row(
                "SELECT COUNT(1) FROM challenges WHERE id = ?1",
                [challenge_id],
                |row| row.get(0),
            )?;
            if count == 0 {
                return Err(AppError::NotFound(format!("challenge {} not found", challenge_id)));
            }
        }

        tx.execute("DELETE FROM group_challenges WHERE group_id = ?1", [group_id])?;
        for challenge_id in &unique {
            tx.execute(
                "INSERT INTO group_challenges (group_id, challenge_id, added_at) VALUES (?1, ?2, ?3)",
                params![group_id, challenge_id, now],
            )?;
        }
        tx.commit()?;

        Ok(ReplacedChallengeSet {
            group_id: group_id.to_string(),
            challenge_count: unique.len(),
        })
    }

    pub fn is_completable(&self, group_id: &str, user_id: &str, challenge_id: &str) -> AppResult<Eligibility> {
        let conn = self.connection()?;
        let (reason, _) = evaluate_eligibility(&conn, group_id, user_id, challenge_id)?;
        Ok(Eligibility::from_reason(reason))
    }
}

pub(super) fn insert_category(conn: &Connection, name: &str) -> AppResult<CategoryRecord> {
    let name = required_text(name, "name")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO categories (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![id, name, timestamp(Utc::now())],
    )?;
    Ok(CategoryRecord { id, name })
}

pub(super) fn insert_challenge(conn: &Connection, challenge: &NewChallenge) -> AppResult<ChallengeRecord> {
    let description = required_text(&challenge.description, "description")?;
    if challenge.points < 0 {
        return Err(AppError::Validation(
            "points must be a non-negative magnitude; use sign for penalties".to_string(),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let category_count: i64 = conn.query_row(
        "SELECT COUNT(1) FROM categories WHERE id = ?1",
        [&challenge.category_id],
        |row| row.get(0),
    )?;
    if category_count == 0 {
        return Err(AppError::NotFound(format!(
            "category {} not found",
            challenge.category_id
        )));
    }

    conn.execute(
        "INSERT INTO challenges (id, category_id, description, points, sign, is_active, repeatable, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)",
        params![
            id,
            challenge.category_id,
            description,
            challenge.points,
            challenge.sign.as_str(),
            repeatable_flag(challenge.repeatable),
            timestamp(now),
        ],
    )?;

    Ok(ChallengeRecord {
        id,
        category_id: challenge.category_id.clone(),
        description,
        points: challenge.points,
        sign: challenge.sign,
        is_active: true,
        repeatable: challenge.repeatable,
        created_at: now,
    })
}

/// Applies the completability rules in order: the challenge exists, the user belongs to the
/// group, the challenge is active, the group selected it, and a non-repeatable challenge has
/// no earlier completion by this user in this group, pending or approved.
pub(super) fn evaluate_eligibility(
    conn: &Connection,
    group_id: &str,
    user_id: &str,
    challenge_id: &str,
) -> AppResult<(EligibilityReason, Option<ChallengeRecord>)> {
    let Some(challenge) = fetch_challenge(conn, challenge_id)? else {
        return Ok((EligibilityReason::ChallengeNotFound, None));
    };

    let member: i64 = conn.query_row(
        "SELECT COUNT(1) FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        params![group_id, user_id],
        |row| row.get(0),
    )?;
    if member == 0 {
        return Ok((EligibilityReason::NotMember, Some(challenge)));
    }

    if !challenge.is_active {
        return Ok((EligibilityReason::Inactive, Some(challenge)));
    }

    let selected: i64 = conn.query_row(
        "SELECT COUNT(1) FROM group_challenges WHERE group_id = ?1 AND challenge_id = ?2",
        params![group_id, challenge_id],
        |row| row.get(0),
    )?;
    if selected == 0 {
        return Ok((EligibilityReason::NotSelected, Some(challenge)));
    }

    if !challenge.repeatable {
        let prior: i64 = conn.query_row(
            "SELECT COUNT(1) FROM challenge_completions
             WHERE group_id = ?1 AND user_id = ?2 AND challenge_id = ?3",
            params![group_id, user_id, challenge_id],
            |row| row.get(0),
        )?;
        if prior > 0 {
            return Ok((EligibilityReason::AlreadyCompleted, Some(challenge)));
        }
    }

    Ok((EligibilityReason::Completable, Some(challenge)))
}

fn fetch_challenge(conn: &Connection, challenge_id: &str) -> AppResult<Option<ChallengeRecord>> {
    conn.query_row(
        &format!("SELECT {CHALLENGE_COLUMNS} FROM challenges c WHERE c.id = ?1"),
        [challenge_id],
        parse_challenge_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn parse_challenge_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChallengeRecord> {
    Ok(ChallengeRecord {
        id: row.get(0)?,
        category_id: row.get(1)?,
        description: row.get(2)?,
        points: row.get(3)?,
        sign: parse_sign(&row.get::<_, String>(4)?)?,
        is_active: row.get::<_, i32>(5)? != 0,
        repeatable: parse_repeatable(&row.get::<_, String>(6)?)?,
        created_at: parse_time(&row.get::<_, String>(7)?)?,
    })
}

fn parse_categorized_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, ChallengeRecord)> {
    Ok((row.get(8)?, parse_challenge_row(row)?))
}

/// Rows must arrive ordered so that challenges of one category are adjacent.
fn group_by_category(rows: Vec<(String, ChallengeRecord)>) -> Vec<CategorizedChallenges> {
    let mut grouped: Vec<CategorizedChallenges> = Vec::new();
    for (category_name, challenge) in rows {
        match grouped.last_mut() {
            Some(current) if current.category_id == challenge.category_id => current.challenges.push(challenge),
            _ => grouped.push(CategorizedChallenges {
                category_id: challenge.category_id.clone(),
                category_name,
                challenges: vec![challenge],
            }),
        }
    }
    grouped
}
