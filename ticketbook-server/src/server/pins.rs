use axum::Json;
use axum::extract::{Extension, State};
use chrono::{Duration, Utc};
use rand::Rng;
use ticketbook_shared::api;
use ticketbook_shared::auth::Role;
use tracing::{debug, info, warn};

use super::auth::{AuthCtx, SessionSubject, issue_session};
use super::{ApiJson, AppError, AppState, acl, rfc3339};
use crate::storage::StorageError;
use crate::storage::models::OneTimePin;

const INVALID_PIN: &str = "invalid or expired pin";

fn generate_pin(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

fn looks_like_pin(pin: &str, len: usize) -> bool {
    pin.len() == len && pin.bytes().all(|b| b.is_ascii_digit())
}

pub async fn api_generate_pin(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::GeneratePinReq>,
) -> Result<Json<api::GeneratePinResp>, AppError> {
    let tenant = state.tenant(&auth);
    let staff = acl::is_active_admin_or_teacher(&tenant, auth.user_id()).await;
    if !staff.role.is_some_and(Role::can_issue_pins) {
        return Err(AppError::forbidden("only admins and teachers can issue pins"));
    }

    let target = tenant
        .get_profile(&body.target_user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    let Some(target_role) = target.role_kind() else {
        return Err(AppError::internal(format!("unknown role {}", target.role)));
    };
    if target_role != body.target_role {
        return Err(AppError::bad_request("target_role does not match the user"));
    }
    if !target_role.can_receive_pin() {
        return Err(AppError::bad_request(
            "pins can only be issued to students and parents",
        ));
    }
    if !target.is_active() {
        return Err(AppError::forbidden("user is not active"));
    }

    let (student_id, viewing_student_id) = match target_role {
        Role::Parent => {
            let Some(viewing) = body.viewing_student_id.clone() else {
                return Err(AppError::bad_request(
                    "viewing_student_id is required for parent pins",
                ));
            };
            acl::resolve_student(&tenant, &viewing, true).await?;
            if !acl::is_parent_of_student(&tenant, &target.id, &viewing).await {
                return Err(AppError::bad_request(
                    "student is not linked to this parent",
                ));
            }
            (viewing.clone(), Some(viewing))
        }
        _ => (target.id.clone(), None),
    };
    if staff.role == Some(Role::Teacher)
        && !acl::is_teacher_linked(&tenant, auth.user_id(), &student_id).await
    {
        return Err(AppError::forbidden("teacher is not linked to this student"));
    }

    let now = Utc::now().naive_utc();
    if let Err(e) = state.store.purge_stale_pins(now).await {
        warn!(error = %e, "pins: purge failed");
    }

    let row = OneTimePin {
        pin: generate_pin(state.config.pin_length),
        user_id: target.id.clone(),
        target_role: target_role.as_str().to_string(),
        viewing_student_id,
        company_id: tenant.company_id().to_string(),
        created_by_id: auth.user_id().to_string(),
        expires_at: now + Duration::minutes(state.config.pin_ttl_minutes),
        claimed_at: None,
        created_at: now,
    };
    let pin = row.pin.clone();
    let expires_at = row.expires_at;
    match state.store.insert_pin(row).await {
        Ok(()) => {}
        Err(StorageError::Conflict(_)) => {
            return Err(AppError::Conflict {
                code: "pin_collision",
                message: "pin collision, please retry".to_string(),
                balance: None,
                retryable: true,
            });
        }
        Err(e) => return Err(e.into()),
    }
    info!(
        issuer = %auth.user_id(),
        target = %target.id,
        role = %target_role,
        "pin issued"
    );
    Ok(Json(api::GeneratePinResp {
        pin,
        target_user_id: target.id,
        target_role,
        expires_at: rfc3339(expires_at),
    }))
}

pub async fn api_claim_pin(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<api::ClaimPinReq>,
) -> Result<Json<api::SessionResp>, AppError> {
    let pin = body.pin.trim();
    if !looks_like_pin(pin, state.config.pin_length) {
        debug!("pin claim: malformed pin");
        return Err(AppError::unauthorized_with(INVALID_PIN));
    }
    let now = Utc::now().naive_utc();
    let Some(claimed) = state.store.claim_pin(pin, now).await? else {
        // Only for the log line; the conditional update above decides.
        let reason = match state.store.find_pin(pin).await? {
            None => "unknown",
            Some(p) if p.claimed_at.is_some() => "already claimed",
            Some(_) => "expired",
        };
        warn!(reason, "pin claim rejected");
        return Err(AppError::unauthorized_with(INVALID_PIN));
    };

    let profile = state
        .store
        .get_profile(&claimed.user_id)
        .await?
        .filter(|p| p.company_id == claimed.company_id);
    let Some((profile, role)) = profile.and_then(|p| p.active_role().map(|r| (p, r))) else {
        warn!(user_id = %claimed.user_id, "pin claim: profile missing or inactive");
        return Err(AppError::unauthorized_with(INVALID_PIN));
    };
    if role.as_str() != claimed.target_role {
        warn!(user_id = %profile.id, "pin claim: role changed since issue");
        return Err(AppError::unauthorized_with(INVALID_PIN));
    }
    if let Some(student) = claimed.viewing_student_id.as_deref() {
        let tenant = state.store.tenant(&profile.company_id);
        if !acl::is_parent_of_student(&tenant, &profile.id, student).await {
            warn!(user_id = %profile.id, student_id = student, "pin claim: parent link gone");
            return Err(AppError::unauthorized_with(INVALID_PIN));
        }
    }

    let subject = SessionSubject {
        user_id: profile.id,
        role,
        company_id: profile.company_id,
        viewing_student_id: claimed.viewing_student_id,
    };
    Ok(Json(issue_session(&state, subject).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_pins_are_digits_of_requested_length() {
        for len in [4, 6, 8] {
            let pin = generate_pin(len);
            assert!(looks_like_pin(&pin, len), "bad pin {pin}");
        }
    }

    #[test]
    fn malformed_pins_are_rejected_early() {
        assert!(!looks_like_pin("12345", 6));
        assert!(!looks_like_pin("12a456", 6));
        assert!(!looks_like_pin("", 6));
        assert!(looks_like_pin("000000", 6));
    }
}
