mod catalog;
mod ledger;
mod settlement;

use crate::errors::{AppError, AppResult};
use crate::models::{
    ChallengeSign, GroupRecord, GroupStanding, MemberRole, MembershipRecord, NewChallenge, UserRecord,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const JOIN_CODE_LEN: usize = 6;
const JOIN_CODE_ATTEMPTS: usize = 16;

#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// How long a writer waits for another connection's write lock before failing with a transient error.
    pub busy_timeout: Duration,
    pub seed_catalog: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5_000),
            seed_catalog: true,
        }
    }
}

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        Self::open(path, &DatabaseOptions::default())
    }

    pub fn open(path: &Path, options: &DatabaseOptions) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| AppError::Internal(err.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.busy_timeout(options.busy_timeout)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };

        if options.seed_catalog {
            db.seed_default_catalog()?;
        }

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connection(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn ping(&self) -> AppResult<()> {
        let conn = self.connection()?;
        let _one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(())
    }

    pub fn create_user(&self, display_name: &str) -> AppResult<UserRecord> {
        let display_name = required_text(display_name, "display_name")?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO users (id, display_name, total_points, completed_challenges, created_at)
             VALUES (?1, ?2, 0, 0, ?3)",
            params![id, display_name, timestamp(now)],
        )?;

        Ok(UserRecord {
            id,
            display_name,
            total_points: 0,
            completed_challenges: 0,
            created_at: now,
        })
    }

    pub fn get_user(&self, user_id: &str) -> AppResult<Option<UserRecord>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, display_name, total_points, completed_challenges, created_at
             FROM users WHERE id = ?1",
            [user_id],
            parse_user_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Creates a group with a fresh join code and makes the creator its admin.
    pub fn create_group(&self, name: &str, created_by: &str) -> AppResult<GroupRecord> {
        let name = required_text(name, "name")?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !user_exists(&tx, created_by)? {
            return Err(AppError::NotFound(format!("user {} not found", created_by)));
        }

        let mut join_code = None;
        for _ in 0..JOIN_CODE_ATTEMPTS {
            let candidate = generate_join_code();
            let taken: i64 = tx.query_row(
                "SELECT COUNT(1) FROM vacation_groups WHERE join_code = ?1",
                [&candidate],
                |row| row.get(0),
            )?;
            if taken == 0 {
                join_code = Some(candidate);
                break;
            }
        }
        let join_code = join_code
            .ok_or_else(|| AppError::Internal("unable to allocate a unique join code".to_string()))?;

        tx.execute(
            "INSERT INTO vacation_groups (id, name, join_code, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, name, join_code, created_by, timestamp(now)],
        )?;
        tx.execute(
            "INSERT INTO group_members (group_id, user_id, role, points, joined_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![id, created_by, MemberRole::Admin.as_str(), timestamp(now)],
        )?;
        tx.commit()?;

        Ok(GroupRecord {
            id,
            name,
            join_code,
            created_by: created_by.to_string(),
            created_at: now,
        })
    }

    pub fn get_group(&self, group_id: &str) -> AppResult<Option<GroupRecord>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, name, join_code, created_by, created_at FROM vacation_groups WHERE id = ?1",
            [group_id],
            parse_group_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn find_group_by_code(&self, join_code: &str) -> AppResult<Option<GroupRecord>> {
        let normalized = join_code.trim().to_ascii_uppercase();
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, name, join_code, created_by, created_at FROM vacation_groups WHERE join_code = ?1",
            [normalized],
            parse_group_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Joining a group the user already belongs to returns the existing membership unchanged.
    pub fn join_group_by_code(&self, join_code: &str, user_id: &str) -> AppResult<MembershipRecord> {
        let group = self
            .find_group_by_code(join_code)?
            .ok_or_else(|| AppError::NotFound(format!("no group with join code {}", join_code.trim())))?;
        self.add_member(&group.id, user_id, MemberRole::Member)
    }

    pub fn add_member(&self, group_id: &str, user_id: &str, role: MemberRole) -> AppResult<MembershipRecord> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !group_exists(&tx, group_id)? {
            return Err(AppError::NotFound(format!("group {} not found", group_id)));
        }
        if !user_exists(&tx, user_id)? {
            return Err(AppError::NotFound(format!("user {} not found", user_id)));
        }

        tx.execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, role, points, joined_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![group_id, user_id, role.as_str(), timestamp(Utc::now())],
        )?;
        let membership = fetch_membership(&tx, group_id, user_id)?
            .ok_or_else(|| AppError::Internal("membership missing after insert".to_string()))?;
        tx.commit()?;
        Ok(membership)
    }

    pub fn get_membership(&self, group_id: &str, user_id: &str) -> AppResult<Option<MembershipRecord>> {
        let conn = self.connection()?;
        fetch_membership(&conn, group_id, user_id)
    }

    /// Members ordered by group balance, highest first. Equal balances share a rank.
    pub fn group_leaderboard(&self, group_id: &str) -> AppResult<Vec<GroupStanding>> {
        let conn = self.connection()?;
        if !group_exists(&conn, group_id)? {
            return Err(AppError::NotFound(format!("group {} not found", group_id)));
        }

        let mut stmt = conn.prepare(
            "SELECT m.user_id, u.display_name, m.role, m.points
             FROM group_members m
             JOIN users u ON u.id = m.user_id
             WHERE m.group_id = ?1
             ORDER BY m.points DESC, u.display_name ASC, m.user_id ASC",
        )?;
        let rows = stmt
            .query_map([group_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    parse_role(&row.get::<_, String>(2)?)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut standings = Vec::with_capacity(rows.len());
        let mut rank = 0u32;
        let mut previous: Option<i64> = None;
        for (user_id, display_name, role, points) in rows {
            if previous != Some(points) {
                rank += 1;
                previous = Some(points);
            }
            standings.push(GroupStanding {
                rank,
                user_id,
                display_name,
                role,
                points,
            });
        }
        Ok(standings)
    }

    /// Inserts the default categories and challenges into an empty catalog. The whole seed
    /// commits at once, so a failure leaves the catalog empty and the next open retries it.
    fn seed_default_catalog(&self) -> AppResult<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing: i64 = tx.query_row("SELECT COUNT(1) FROM categories", [], |row| row.get(0))?;
        if existing > 0 {
            return Ok(());
        }

        let seeds: &[(&str, &[(&str, i64, ChallengeSign, bool)])] = &[
            (
                "Adventure",
                &[
                    ("Swim in the sea before breakfast", 15, ChallengeSign::Positive, true),
                    ("Reach the highest viewpoint in town", 30, ChallengeSign::Positive, false),
                    ("Rent a boat for an afternoon", 25, ChallengeSign::Positive, false),
                ],
            ),
            (
                "Food",
                &[
                    ("Order a dish you cannot pronounce", 10, ChallengeSign::Positive, true),
                    ("Cook dinner for the whole group", 20, ChallengeSign::Positive, true),
                ],
            ),
            (
                "Culture",
                &[
                    ("Learn ten words of the local language", 20, ChallengeSign::Positive, false),
                    ("Visit a museum", 15, ChallengeSign::Positive, true),
                ],
            ),
            (
                "Penalties",
                &[
                    ("Oversleep the group excursion", 10, ChallengeSign::Negative, true),
                    ("Lose the apartment key", 25, ChallengeSign::Negative, true),
                ],
            ),
        ];

        for (category_name, challenges) in seeds {
            let category = catalog::insert_category(&tx, category_name)?;
            for (description, points, sign, repeatable) in challenges.iter() {
                catalog::insert_challenge(&tx, &NewChallenge {
                    category_id: category.id.clone(),
                    description: description.to_string(),
                    points: *points,
                    sign: *sign,
                    repeatable: *repeatable,
                })?;
            }
        }
        tx.commit()?;
        tracing::info!(categories = seeds.len(), "seeded default challenge catalog");
        Ok(())
    }
}

fn fetch_membership(conn: &Connection, group_id: &str, user_id: &str) -> AppResult<Option<MembershipRecord>> {
    conn.query_row(
        "SELECT group_id, user_id, role, points, joined_at
         FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        params![group_id, user_id],
        parse_membership_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn user_exists(conn: &Connection, user_id: &str) -> AppResult<bool> {
    let count: i64 = conn.query_row("SELECT COUNT(1) FROM users WHERE id = ?1", [user_id], |row| row.get(0))?;
    Ok(count > 0)
}

fn group_exists(conn: &Connection, group_id: &str) -> AppResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(1) FROM vacation_groups WHERE id = ?1",
        [group_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn generate_join_code() -> String {
    let mut rng = rand::rng();
    (0..JOIN_CODE_LEN)
        .map(|_| JOIN_CODE_ALPHABET[rng.random_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

fn required_text(raw: &str, field: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

/// Fixed-width UTC timestamps so that lexical order in SQL matches time order.
fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        display_name: row.get(1)?,
        total_points: row.get(2)?,
        completed_challenges: row.get(3)?,
        created_at: parse_time(&row.get::<_, String>(4)?)?,
    })
}

fn parse_group_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupRecord> {
    Ok(GroupRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        join_code: row.get(2)?,
        created_by: row.get(3)?,
        created_at: parse_time(&row.get::<_, String>(4)?)?,
    })
}

fn parse_membership_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MembershipRecord> {
    Ok(MembershipRecord {
        group_id: row.get(0)?,
        user_id: row.get(1)?,
        role: parse_role(&row.get::<_, String>(2)?)?,
        points: row.get(3)?,
        joined_at: parse_time(&row.get::<_, String>(4)?)?,
    })
}

fn parse_role(raw: &str) -> rusqlite::Result<MemberRole> {
    match raw {
        "admin" => Ok(MemberRole::Admin),
        "member" => Ok(MemberRole::Member),
        other => Err(invalid_column(format!("Unknown member role '{}'", other))),
    }
}

fn parse_sign(raw: &str) -> rusqlite::Result<ChallengeSign> {
    match raw {
        "positive" => Ok(ChallengeSign::Positive),
        "negative" => Ok(ChallengeSign::Negative),
        other => Err(invalid_column(format!("Unknown challenge sign '{}'", other))),
    }
}

fn repeatable_flag(repeatable: bool) -> &'static str {
    if repeatable {
        "y"
    } else {
        "n"
    }
}

fn parse_repeatable(raw: &str) -> rusqlite::Result<bool> {
    match raw {
        "y" => Ok(true),
        "n" => Ok(false),
        other => Err(invalid_column(format!("Unknown repeatable flag '{}'", other))),
    }
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| invalid_column(error.to_string()))
}

fn invalid_column(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::{Database, DatabaseOptions};
    use crate::models::{
        CategoryRecord, ChallengeRecord, ChallengeSign, GroupRecord, MemberRole, NewChallenge, NewCompletion,
        UserRecord,
    };
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Three users in one group: alice (admin), bob and carol.
    pub(crate) struct Fixture {
        _dir: tempfile::TempDir,
        pub db: Arc<Database>,
        pub alice: UserRecord,
        pub bob: UserRecord,
        pub carol: UserRecord,
        pub group: GroupRecord,
        pub category: CategoryRecord,
        selected: Vec<String>,
    }

    impl Fixture {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let db = Database::open(
                &dir.path().join("test.db"),
                &DatabaseOptions {
                    seed_catalog: false,
                    ..DatabaseOptions::default()
                },
            )
            .expect("db");

            let alice = db.create_user("Alice").expect("alice");
            let bob = db.create_user("Bob").expect("bob");
            let carol = db.create_user("Carol").expect("carol");
            let group = db.create_group("Lisbon 2026", &alice.id).expect("group");
            db.add_member(&group.id, &bob.id, MemberRole::Member).expect("bob joins");
            db.add_member(&group.id, &carol.id, MemberRole::Member).expect("carol joins");
            let category = db.create_category("Adventure").expect("category");

            Self {
                _dir: dir,
                db: Arc::new(db),
                alice,
                bob,
                carol,
                group,
                category,
                selected: Vec::new(),
            }
        }

        pub fn db_path(&self) -> PathBuf {
            self.db.path().to_path_buf()
        }

        /// Creates a challenge in the catalog and adds it to the group's selection.
        pub fn challenge(&mut self, points: i64, sign: ChallengeSign, repeatable: bool) -> ChallengeRecord {
            let challenge = self
                .db
                .create_challenge(&NewChallenge {
                    category_id: self.category.id.clone(),
                    description: format!("challenge worth {}", points),
                    points,
                    sign,
                    repeatable,
                })
                .expect("create challenge");
            self.selected.push(challenge.id.clone());
            self.db
                .replace_group_challenges(&self.group.id, &self.selected)
                .expect("select challenge");
            challenge
        }

        pub fn submission(&self, user: &UserRecord, challenge: &ChallengeRecord) -> NewCompletion {
            NewCompletion {
                group_id: self.group.id.clone(),
                user_id: user.id.clone(),
                challenge_id: challenge.id.clone(),
                evidence_url: None,
                notes: None,
            }
        }

        pub fn user_points(&self, user: &UserRecord) -> i64 {
            self.db.get_user(&user.id).expect("get user").expect("user").total_points
        }

        pub fn group_points(&self, user: &UserRecord) -> i64 {
            self.db
                .get_membership(&self.group.id, &user.id)
                .expect("get membership")
                .expect("membership")
                .points
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::Fixture;
    use super::{Database, DatabaseOptions};
    use crate::errors::AppError;
    use crate::models::MemberRole;

    #[test]
    fn creator_becomes_admin_with_shareable_code() {
        let fx = Fixture::new();
        assert_eq!(fx.group.join_code.len(), 6);
        assert!(fx.group.join_code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

        let membership = fx
            .db
            .get_membership(&fx.group.id, &fx.alice.id)
            .expect("membership")
            .expect("exists");
        assert_eq!(membership.role, MemberRole::Admin);
        assert_eq!(membership.points, 0);
    }

    #[test]
    fn joining_by_code_is_idempotent() {
        let fx = Fixture::new();
        let dave = fx.db.create_user("Dave").expect("dave");
        let code = fx.group.join_code.to_lowercase();

        let first = fx.db.join_group_by_code(&code, &dave.id).expect("join");
        assert_eq!(first.role, MemberRole::Member);
        let second = fx.db.join_group_by_code(&code, &dave.id).expect("join again");
        assert_eq!(second.joined_at, first.joined_at);

        let standings = fx.db.group_leaderboard(&fx.group.id).expect("leaderboard");
        assert_eq!(standings.iter().filter(|s| s.user_id == dave.id).count(), 1);

        let missing = fx.db.join_group_by_code("ZZZZZZ0", &dave.id);
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[test]
    fn blank_names_are_rejected() {
        let fx = Fixture::new();
        assert!(matches!(fx.db.create_user("   "), Err(AppError::Validation(_))));
        assert!(matches!(
            fx.db.create_group("", &fx.alice.id),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            fx.db.create_group("Trip", "nobody"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn default_catalog_is_seeded_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("seeded.db");

        let first = Database::new(&path).expect("db");
        let catalog = first.list_catalog().expect("catalog");
        assert!(!catalog.is_empty());
        let count: usize = catalog.iter().map(|category| category.challenges.len()).sum();
        drop(first);

        let reopened = Database::open(&path, &DatabaseOptions::default()).expect("reopen");
        let again: usize = reopened
            .list_catalog()
            .expect("catalog")
            .iter()
            .map(|category| category.challenges.len())
            .sum();
        assert_eq!(count, again);
    }

    #[test]
    fn failed_seed_leaves_no_partial_catalog() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open(
            &dir.path().join("seed-failure.db"),
            &DatabaseOptions {
                seed_catalog: false,
                ..DatabaseOptions::default()
            },
        )
        .expect("db");

        db.connection()
            .expect("conn")
            .execute_batch(
                "CREATE TRIGGER reject_key_penalty BEFORE INSERT ON challenges
                 WHEN NEW.description = 'Lose the apartment key'
                 BEGIN SELECT RAISE(ABORT, 'seed rejected'); END;",
            )
            .expect("install trigger");

        assert!(db.seed_default_catalog().is_err());
        assert!(db.list_catalog().expect("catalog").is_empty());

        db.connection()
            .expect("conn")
            .execute_batch("DROP TRIGGER reject_key_penalty;")
            .expect("drop trigger");

        db.seed_default_catalog().expect("retry seed");
        assert_eq!(db.list_catalog().expect("catalog").len(), 4);
    }
}
