use axum::Json;
use axum::extract::{Extension, State};
use chrono::{Days, NaiveDate, Utc};
use ticketbook_shared::api;
use ticketbook_shared::auth::Role;
use ticketbook_shared::domain::TransactionKind;
use tracing::{error, info};

use super::auth::AuthCtx;
use super::{ApiJson, AppError, AppState, acl};
use crate::storage::{LedgerEntry, LedgerOutcome, StorageError};

/// Length of the run of consecutive days that ends at the newest log.
/// A run whose newest day is before yesterday has lapsed and counts as 0.
/// `dates_desc` must be sorted newest first.
pub(crate) fn current_streak(dates_desc: &[NaiveDate], today: NaiveDate) -> u32 {
    let Some(&newest) = dates_desc.first() else {
        return 0;
    };
    if let Some(yesterday) = today.checked_sub_days(Days::new(1))
        && newest < yesterday
    {
        return 0;
    }
    let mut streak = 1;
    let mut expected = newest;
    for &day in &dates_desc[1..] {
        if day == expected {
            continue;
        }
        match expected.checked_sub_days(Days::new(1)) {
            Some(prev) if prev == day => {
                streak += 1;
                expected = day;
            }
            _ => break,
        }
    }
    streak
}

fn is_milestone(streak: u32, every: u32) -> bool {
    every > 0 && streak > 0 && streak % every == 0
}

fn today_in(state: &AppState) -> NaiveDate {
    Utc::now().with_timezone(&state.config.tz()).date_naive()
}

pub async fn api_log_practice(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::PracticeLogReq>,
) -> Result<Json<api::PracticeLogResp>, AppError> {
    let tenant = state.tenant(&auth);
    let student_id = match (body.student_id, auth.role()) {
        (Some(id), _) => id,
        (None, Role::Student) => auth.user_id().to_string(),
        (None, _) => auth
            .viewing_student_id()
            .map(str::to_string)
            .ok_or_else(|| AppError::bad_request("student_id is required"))?,
    };
    let student = acl::resolve_student(&tenant, &student_id, true).await?;
    if !acl::acts_for_student(&tenant, &auth, &student.id).await {
        return Err(AppError::forbidden(
            "only the student or a linked parent can log practice",
        ));
    }

    let today = today_in(&state);
    let log_id = match tenant.insert_practice_log(&student.id, today).await {
        Ok(id) => id,
        Err(StorageError::Conflict(_)) => {
            return Err(AppError::conflict(
                "already_logged_today",
                "practice already logged today",
            ));
        }
        Err(e) => return Err(e.into()),
    };

    // The log row is committed; from here on a failure is partial.
    let partial = |e: StorageError| {
        error!(student_id = %student.id, log_id, error = %e, "practice: streak award failed");
        AppError::partial_failure("practice logged but streak award failed")
    };
    let dates = tenant.practice_dates(&student.id).await.map_err(partial)?;
    let streak = current_streak(&dates, today);
    let mut streak_award = 0;
    let balance = if is_milestone(streak, state.config.streak_milestone_days) {
        let entry = LedgerEntry {
            student_id: student.id.clone(),
            amount: state.config.streak_bonus_tickets,
            kind: TransactionKind::StreakAward,
            source_id: Some(log_id.to_string()),
            notes: Some(format!("{streak}-day practice streak")),
        };
        match tenant.append_checked(entry).await.map_err(partial)? {
            LedgerOutcome::Applied { balance, .. } => {
                streak_award = state.config.streak_bonus_tickets;
                balance
            }
            LedgerOutcome::Insufficient { .. } => {
                return Err(AppError::partial_failure(
                    "practice logged but streak award failed",
                ));
            }
        }
    } else {
        tenant.balance(&student.id).await.map_err(partial)?
    };
    info!(student_id = %student.id, streak, streak_award, "practice logged");
    Ok(Json(api::PracticeLogResp {
        student_id: student.id,
        log_date: today.format("%Y-%m-%d").to_string(),
        streak,
        streak_award,
        balance,
    }))
}

pub async fn api_streak(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::StudentReq>,
) -> Result<Json<api::StreakResp>, AppError> {
    let tenant = state.tenant(&auth);
    let student = acl::resolve_student(&tenant, &body.student_id, false).await?;
    if !acl::can_view_student(&tenant, &auth, &student.id).await {
        return Err(AppError::forbidden("not allowed to view this student"));
    }
    let dates = tenant.practice_dates(&student.id).await?;
    Ok(Json(api::StreakResp {
        student_id: student.id,
        streak: current_streak(&dates, today_in(&state)),
        last_logged: dates.first().map(|d| d.format("%Y-%m-%d").to_string()),
    }))
}
