use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

/// Whether completing a challenge earns or costs points. The catalog stores an
/// unsigned magnitude; the sign is resolved into a signed delta when a
/// completion is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeSign {
    Positive,
    Negative,
}

impl ChallengeSign {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }

    pub fn apply(self, magnitude: i64) -> i64 {
        match self {
            Self::Positive => magnitude,
            Self::Negative => -magnitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub display_name: String,
    pub total_points: i64,
    pub completed_challenges: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
    pub join_code: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub group_id: String,
    pub user_id: String,
    pub role: MemberRole,
    pub points: i64,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub id: String,
    pub category_id: String,
    pub description: String,
    /// Unsigned magnitude as stored in the catalog.
    pub points: i64,
    pub sign: ChallengeSign,
    pub is_active: bool,
    pub repeatable: bool,
    pub created_at: DateTime<Utc>,
}

impl ChallengeRecord {
    pub fn signed_points(&self) -> i64 {
        self.sign.apply(self.points)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChallenge {
    pub category_id: String,
    pub description: String,
    pub points: i64,
    pub sign: ChallengeSign,
    pub repeatable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizedChallenges {
    pub category_id: String,
    pub category_name: String,
    pub challenges: Vec<ChallengeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub id: String,
    pub group_id: String,
    pub user_id: String,
    pub challenge_id: String,
    pub completed_at: DateTime<Utc>,
    pub evidence_url: Option<String>,
    pub notes: Option<String>,
    /// Signed delta frozen at submission time.
    pub points: i64,
    pub approved: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    /// Set exactly when the balances were credited for this completion.
    pub settled_points: Option<i64>,
}

impl CompletionRecord {
    pub fn state(&self) -> ApprovalState {
        if self.approved {
            ApprovalState::Approved
        } else {
            ApprovalState::Pending
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settled_points.is_some()
    }
}

/// Display projection of a completion joined with its challenge, category and submitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionView {
    pub completion_id: String,
    pub group_id: String,
    pub user_id: String,
    pub user_display_name: String,
    pub challenge_id: String,
    pub challenge_description: String,
    pub category_name: String,
    pub sign: ChallengeSign,
    pub points: i64,
    pub evidence_url: Option<String>,
    pub notes: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub approved: bool,
    pub approved_by: Option<String>,
    pub status: ApprovalState,
}

/// A validated submission.
#[derive(Debug, Clone)]
pub struct NewCompletion {
    pub group_id: String,
    pub user_id: String,
    pub challenge_id: String,
    pub evidence_url: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitCompletionPayload {
    pub group_id: Option<String>,
    pub user_id: Option<String>,
    pub challenge_id: Option<String>,
    pub evidence_url: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproveCompletionPayload {
    pub approver_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaceGroupChallengesPayload {
    pub challenge_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmittedCompletion {
    pub completion_id: String,
    pub points: i64,
    pub approved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovedCompletion {
    pub completion_id: String,
    pub approved: bool,
    pub points: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletedCompletion {
    pub completion_id: String,
    pub deleted: bool,
    /// Signed amount taken back out of the balances; zero when the completion was never settled.
    pub reversed_points: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplacedChallengeSet {
    pub group_id: String,
    pub challenge_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityReason {
    Completable,
    ChallengeNotFound,
    Inactive,
    NotSelected,
    NotMember,
    AlreadyCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub completable: bool,
    pub reason: EligibilityReason,
}

impl Eligibility {
    pub fn from_reason(reason: EligibilityReason) -> Self {
        Self {
            completable: reason == EligibilityReason::Completable,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupStanding {
    pub rank: u32,
    pub user_id: String,
    pub display_name: String,
    pub role: MemberRole,
    pub points: i64,
}
