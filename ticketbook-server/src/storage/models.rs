use crate::storage::schema::{
    assigned_tasks, companies, instruments, one_time_pins, practice_logs, profiles,
    refresh_tokens, rewards, task_library, ticket_transactions,
};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use ticketbook_shared::auth::{Role, UserStatus};
use ticketbook_shared::domain::{TransactionKind, VerificationStatus};

#[derive(Insertable)]
#[diesel(table_name = companies)]
pub struct NewCompany<'a> {
    pub id: &'a str,
    pub name: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = profiles)]
pub struct Profile {
    pub id: String,
    pub company_id: String,
    pub role: String,
    pub status: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Profile {
    /// `None` when the stored role is not one we know about.
    pub fn role_kind(&self) -> Option<Role> {
        self.role.parse().ok()
    }

    pub fn status_kind(&self) -> Option<UserStatus> {
        self.status.parse().ok()
    }

    pub fn is_active(&self) -> bool {
        self.status_kind() == Some(UserStatus::Active)
    }

    /// Role of the profile if it is active, for capability checks.
    pub fn active_role(&self) -> Option<Role> {
        if self.is_active() {
            self.role_kind()
        } else {
            None
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = profiles)]
pub struct NewProfile<'a> {
    pub id: &'a str,
    pub company_id: &'a str,
    pub role: &'a str,
    pub status: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: Option<&'a str>,
    pub password_hash: Option<&'a str>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = instruments)]
pub struct NewInstrument<'a> {
    pub id: &'a str,
    pub company_id: &'a str,
    pub name: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = task_library)]
pub struct LibraryTask {
    pub id: String,
    pub company_id: String,
    pub title: String,
    pub description: Option<String>,
    pub points: i32,
    pub can_self_assign: bool,
    pub attachment_path: Option<String>,
    pub created_by_id: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = task_library)]
pub struct NewLibraryTask<'a> {
    pub id: &'a str,
    pub company_id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub points: i32,
    pub can_self_assign: bool,
    pub attachment_path: Option<&'a str>,
    pub created_by_id: &'a str,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = assigned_tasks)]
pub struct AssignedTask {
    pub id: String,
    pub company_id: String,
    pub student_id: String,
    pub assigned_by_id: String,
    pub task_library_id: Option<String>,
    pub task_title: String,
    pub task_description: Option<String>,
    pub task_points: i32,
    pub task_attachment_path: Option<String>,
    pub is_complete: bool,
    pub completed_date: Option<NaiveDateTime>,
    pub verification_status: Option<String>,
    pub verified_by_id: Option<String>,
    pub verified_date: Option<NaiveDateTime>,
    pub actual_points_awarded: Option<i32>,
    pub assigned_date: NaiveDateTime,
}

impl AssignedTask {
    pub fn status_kind(&self) -> Option<VerificationStatus> {
        self.verification_status
            .as_deref()
            .and_then(|s| s.parse().ok())
    }

    /// Unverified tasks have no status yet or are waiting for review.
    pub fn is_unverified(&self) -> bool {
        !self.status_kind().is_some_and(VerificationStatus::is_terminal)
    }
}

/// Task contents copied onto an assignment; later library edits do not
/// reach tasks that were already handed out.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub task_library_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub points: i32,
    pub attachment_path: Option<String>,
}

impl From<&LibraryTask> for TaskSnapshot {
    fn from(t: &LibraryTask) -> Self {
        TaskSnapshot {
            task_library_id: Some(t.id.clone()),
            title: t.title.clone(),
            description: t.description.clone(),
            points: t.points,
            attachment_path: t.attachment_path.clone(),
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = assigned_tasks)]
pub struct NewAssignedTask<'a> {
    pub id: &'a str,
    pub company_id: &'a str,
    pub student_id: &'a str,
    pub assigned_by_id: &'a str,
    pub task_library_id: Option<&'a str>,
    pub task_title: &'a str,
    pub task_description: Option<&'a str>,
    pub task_points: i32,
    pub task_attachment_path: Option<&'a str>,
    pub is_complete: bool,
    pub assigned_date: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = ticket_transactions)]
pub struct TicketTransaction {
    pub id: i32,
    pub student_id: String,
    pub company_id: String,
    pub amount: i32,
    pub kind: String,
    pub source_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

impl TicketTransaction {
    pub fn kind_enum(&self) -> Option<TransactionKind> {
        self.kind.parse().ok()
    }
}

#[derive(Insertable)]
#[diesel(table_name = ticket_transactions)]
pub struct NewTicketTransaction<'a> {
    pub student_id: &'a str,
    pub company_id: &'a str,
    pub amount: i32,
    pub kind: &'a str,
    pub source_id: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = rewards)]
pub struct Reward {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub description: Option<String>,
    pub cost: i32,
    pub is_goal_eligible: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = rewards)]
pub struct NewReward<'a> {
    pub id: &'a str,
    pub company_id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub cost: i32,
    pub is_goal_eligible: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = one_time_pins)]
#[diesel(primary_key(pin))]
pub struct OneTimePin {
    pub pin: String,
    pub user_id: String,
    pub target_role: String,
    pub viewing_student_id: Option<String>,
    pub company_id: String,
    pub created_by_id: String,
    pub expires_at: NaiveDateTime,
    pub claimed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = one_time_pins)]
pub struct NewOneTimePin<'a> {
    pub pin: &'a str,
    pub user_id: &'a str,
    pub target_role: &'a str,
    pub viewing_student_id: Option<&'a str>,
    pub company_id: &'a str,
    pub created_by_id: &'a str,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = refresh_tokens)]
pub struct RefreshToken {
    pub id: i32,
    pub user_id: String,
    pub token_hash: String,
    pub viewing_student_id: Option<String>,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken<'a> {
    pub user_id: &'a str,
    pub token_hash: &'a str,
    pub viewing_student_id: Option<&'a str>,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = practice_logs)]
pub struct NewPracticeLog<'a> {
    pub student_id: &'a str,
    pub company_id: &'a str,
    pub log_date: NaiveDate,
    pub created_at: NaiveDateTime,
}
