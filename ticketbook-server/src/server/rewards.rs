use axum::Json;
use axum::extract::{Extension, State};
use ticketbook_shared::api;
use ticketbook_shared::domain::TransactionKind;
use tracing::{info, warn};

use super::auth::AuthCtx;
use super::{ApiJson, AppError, AppState, acl};
use crate::storage::models::Reward;
use crate::storage::{LedgerEntry, LedgerOutcome};

fn reward_dto(r: Reward) -> api::RewardDto {
    api::RewardDto {
        id: r.id,
        name: r.name,
        description: r.description,
        cost: r.cost,
        is_goal_eligible: r.is_goal_eligible,
    }
}

pub async fn api_create_reward(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::CreateRewardReq>,
) -> Result<Json<api::RewardDto>, AppError> {
    let tenant = state.tenant(&auth);
    if !acl::is_active_admin(&tenant, auth.user_id()).await {
        return Err(AppError::forbidden("only admins can create rewards"));
    }
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    if body.cost <= 0 {
        return Err(AppError::bad_request("cost must be positive"));
    }
    let cost = i32::try_from(body.cost).map_err(|_| AppError::bad_request("cost out of range"))?;
    let reward = tenant
        .create_reward(name, body.description.as_deref(), cost, body.is_goal_eligible)
        .await?;
    info!(reward_id = %reward.id, cost, "reward created");
    Ok(Json(reward_dto(reward)))
}

pub async fn api_list_rewards(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::RewardDto>>, AppError> {
    let rows = state.tenant(&auth).list_rewards().await?;
    Ok(Json(rows.into_iter().map(reward_dto).collect()))
}

pub async fn api_redeem(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::RedeemReq>,
) -> Result<Json<api::RedeemResp>, AppError> {
    let tenant = state.tenant(&auth);
    if !acl::is_active_admin(&tenant, auth.user_id()).await {
        return Err(AppError::forbidden("only admins can redeem rewards"));
    }
    let student = acl::resolve_student(&tenant, &body.student_id, true).await?;
    let reward = tenant
        .get_reward(&body.reward_id)
        .await?
        .ok_or_else(|| AppError::not_found("reward not found"))?;

    let entry = LedgerEntry {
        student_id: student.id.clone(),
        amount: -reward.cost,
        kind: TransactionKind::Redemption,
        source_id: Some(reward.id.clone()),
        notes: Some(format!("Redeemed: {}", reward.name)),
    };
    match tenant.append_checked(entry).await? {
        LedgerOutcome::Applied { balance, .. } => {
            info!(student_id = %student.id, reward_id = %reward.id, balance, "reward redeemed");
            Ok(Json(api::RedeemResp {
                student_id: student.id,
                reward_id: reward.id,
                cost: reward.cost,
                balance,
            }))
        }
        LedgerOutcome::Insufficient { balance } => {
            warn!(student_id = %student.id, reward_id = %reward.id, balance, "redeem: insufficient balance");
            Err(AppError::insufficient_balance(balance))
        }
    }
}
