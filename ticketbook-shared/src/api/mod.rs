use serde::{Deserialize, Serialize};

use crate::auth::{Role, UserStatus};
use crate::domain::{TransactionKind, VerificationStatus};

pub mod endpoints;

pub const API_V1_PREFIX: &str = "/api/v1";

// Errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResp {
    pub message: String,
}

// Auth / sessions
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginReq {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResp {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub role: Role,
    pub user_id: String,
    pub viewing_student_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshReq {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForceLogoutReq {
    pub target_user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForceLogoutResp {
    pub target_user_id: String,
    pub revoked_sessions: usize,
}

// One-time PINs
#[derive(Debug, Serialize, Deserialize)]
pub struct GeneratePinReq {
    pub target_user_id: String,
    pub target_role: Role,
    /// Required for parent PINs: the linked student the session will view.
    pub viewing_student_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeneratePinResp {
    pub pin: String,
    pub target_user_id: String,
    pub target_role: Role,
    pub expires_at: String, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimPinReq {
    pub pin: String,
}

// Task library / assignments
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateLibraryTaskReq {
    pub title: String,
    pub description: Option<String>,
    pub points: i64,
    #[serde(default)]
    pub can_self_assign: bool,
    pub attachment_path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LibraryTaskDto {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub points: i32,
    pub can_self_assign: bool,
    pub attachment_path: Option<String>,
}

/// Either `task_library_id` or an ad-hoc `title` + `points` must be given.
#[derive(Debug, Serialize, Deserialize)]
pub struct AssignTaskReq {
    pub student_id: String,
    pub task_library_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub points: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignedTaskDto {
    pub id: String,
    pub student_id: String,
    pub assigned_by_id: String,
    pub task_library_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub points: i32,
    pub attachment_path: Option<String>,
    pub is_complete: bool,
    pub completed_date: Option<String>,
    pub verification_status: Option<VerificationStatus>,
    pub verified_by_id: Option<String>,
    pub verified_date: Option<String>,
    pub actual_points_awarded: Option<i32>,
    pub assigned_date: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignmentReq {
    pub assignment_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyTaskReq {
    pub assignment_id: String,
    pub verification_status: VerificationStatus,
    pub actual_points_awarded: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyTaskResp {
    pub task: AssignedTaskDto,
    /// Ledger row written for the award, if any points were granted.
    pub transaction_id: Option<i32>,
    pub balance: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StudentReq {
    pub student_id: String,
}

// Tickets
#[derive(Debug, Serialize, Deserialize)]
pub struct AdjustTicketsReq {
    pub student_id: String,
    pub amount: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResp {
    pub student_id: String,
    pub balance: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryReq {
    pub student_id: String,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionDto {
    pub id: i32,
    pub amount: i32,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub source_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: String, // RFC3339 UTC
}

// Rewards
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRewardReq {
    pub name: String,
    pub description: Option<String>,
    pub cost: i64,
    #[serde(default)]
    pub is_goal_eligible: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RewardDto {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub cost: i32,
    pub is_goal_eligible: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemReq {
    pub student_id: String,
    pub reward_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemResp {
    pub student_id: String,
    pub reward_id: String,
    pub cost: i32,
    pub balance: i64,
}

// Users
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserLinks {
    pub teacher_ids: Option<Vec<String>>,
    pub parent_ids: Option<Vec<String>>,
    pub student_ids: Option<Vec<String>>,
    pub instrument_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUserReq {
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(flatten)]
    pub links: UserLinks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateUserReq {
    pub user_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
    #[serde(flatten)]
    pub links: UserLinks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserIdReq {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleStatusReq {
    pub user_id: String,
    pub status: UserStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserDto {
    pub id: String,
    pub company_id: String,
    pub role: Role,
    pub status: UserStatus,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub teacher_ids: Vec<String>,
    pub parent_ids: Vec<String>,
    pub student_ids: Vec<String>,
    pub instrument_ids: Vec<String>,
}

// Practice
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PracticeLogReq {
    /// Defaults to the caller (or the student a parent session is viewing).
    pub student_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PracticeLogResp {
    pub student_id: String,
    pub log_date: String, // YYYY-MM-DD
    pub streak: u32,
    pub streak_award: i32,
    pub balance: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StreakResp {
    pub student_id: String,
    pub streak: u32,
    pub last_logged: Option<String>,
}
