use axum::Json;
use axum::extract::{Extension, State};
use ticketbook_shared::api;
use ticketbook_shared::domain::TransactionKind;
use tracing::info;

use super::auth::AuthCtx;
use super::{ApiJson, AppError, AppState, acl, rfc3339};
use crate::storage::models::TicketTransaction;
use crate::storage::{LedgerEntry, LedgerOutcome};

const DEFAULT_PER_PAGE: usize = 20;

fn transaction_dto(t: TicketTransaction) -> Result<api::TransactionDto, AppError> {
    let kind = t
        .kind_enum()
        .ok_or_else(|| AppError::internal(format!("unknown transaction type {}", t.kind)))?;
    Ok(api::TransactionDto {
        id: t.id,
        amount: t.amount,
        kind,
        source_id: t.source_id,
        notes: t.notes,
        created_at: rfc3339(t.created_at),
    })
}

pub async fn api_adjust(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::AdjustTicketsReq>,
) -> Result<Json<api::BalanceResp>, AppError> {
    let tenant = state.tenant(&auth);
    if !acl::is_active_admin(&tenant, auth.user_id()).await {
        return Err(AppError::forbidden("only admins can adjust tickets"));
    }
    if body.amount == 0 {
        return Err(AppError::bad_request("amount must be non-zero"));
    }
    let amount =
        i32::try_from(body.amount).map_err(|_| AppError::bad_request("amount out of range"))?;
    let student = acl::resolve_student(&tenant, &body.student_id, true).await?;

    let entry = LedgerEntry {
        student_id: student.id.clone(),
        amount,
        kind: TransactionKind::for_adjustment(amount),
        source_id: Some(auth.user_id().to_string()),
        notes: body.notes,
    };
    match tenant.append_checked(entry).await? {
        LedgerOutcome::Applied { balance, .. } => {
            info!(admin = %auth.user_id(), student_id = %student.id, amount, balance, "tickets adjusted");
            Ok(Json(api::BalanceResp {
                student_id: student.id,
                balance,
            }))
        }
        LedgerOutcome::Insufficient { balance } => Err(AppError::insufficient_balance(balance)),
    }
}

pub async fn api_balance(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::StudentReq>,
) -> Result<Json<api::BalanceResp>, AppError> {
    let tenant = state.tenant(&auth);
    let student = acl::resolve_student(&tenant, &body.student_id, false).await?;
    if !acl::can_view_student(&tenant, &auth, &student.id).await {
        return Err(AppError::forbidden("not allowed to view this student"));
    }
    let balance = tenant.balance(&student.id).await?;
    Ok(Json(api::BalanceResp {
        student_id: student.id,
        balance,
    }))
}

pub async fn api_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::HistoryReq>,
) -> Result<Json<Vec<api::TransactionDto>>, AppError> {
    let tenant = state.tenant(&auth);
    let student = acl::resolve_student(&tenant, &body.student_id, false).await?;
    if !acl::can_view_student(&tenant, &auth, &student.id).await {
        return Err(AppError::forbidden("not allowed to view this student"));
    }
    let page = body.page.unwrap_or(1);
    let per_page = body.per_page.unwrap_or(DEFAULT_PER_PAGE);
    let rows = tenant
        .list_transactions(&student.id, page, per_page)
        .await?;
    let items = rows
        .into_iter()
        .map(transaction_dto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(items))
}
