use axum::Json;
use axum::extract::{Extension, State};
use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use ticketbook_shared::api::{self, SessionResp};
use ticketbook_shared::auth::Role;
use ticketbook_shared::jwt::{self, AccessClaims};
use tracing::{error, info, warn};

use super::{ApiJson, AppError, AppState, acl};
use crate::storage::RefreshGrant;

/// Identity of an authenticated request, taken from the access token.
#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: AccessClaims,
}

impl AuthCtx {
    pub fn user_id(&self) -> &str {
        &self.claims.sub
    }

    pub fn role(&self) -> Role {
        self.claims.role
    }

    pub fn company_id(&self) -> &str {
        &self.claims.company_id
    }

    pub fn viewing_student_id(&self) -> Option<&str> {
        self.claims.viewing_student_id.as_deref()
    }
}

pub async fn require_bearer(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(header_val) = req.headers().get(header::AUTHORIZATION) else {
        return Err(AppError::unauthorized());
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let Some(token) = header_str.strip_prefix("Bearer ") else {
        return Err(AppError::unauthorized());
    };

    let claims = match jwt::decode_and_verify(token.trim(), state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            warn!(error=%e, "auth: jwt decode failed");
            return Err(AppError::unauthorized());
        }
    };
    if claims.sub.is_empty() || claims.company_id.is_empty() {
        warn!(jti = %claims.jti, "auth: token without subject or company");
        return Err(AppError::unauthorized());
    }

    req.extensions_mut().insert(AuthCtx { claims });
    Ok(next.run(req).await)
}

/// Who a new session is issued for.
#[derive(Debug, Clone)]
pub(crate) struct SessionSubject {
    pub user_id: String,
    pub role: Role,
    pub company_id: String,
    pub viewing_student_id: Option<String>,
}

fn mint_access_token(state: &AppState, subject: &SessionSubject) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = AccessClaims {
        sub: subject.user_id.clone(),
        jti: uuid::Uuid::new_v4().to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(state.config.access_token_ttl_secs)).timestamp(),
        role: subject.role,
        company_id: subject.company_id.clone(),
        viewing_student_id: subject.viewing_student_id.clone(),
    };
    jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(user_id = %subject.user_id, error=%e, "session: jwt encode failed");
        AppError::internal(e)
    })
}

/// 32 random bytes, base64url without padding.
pub(crate) fn new_refresh_token() -> String {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// `hex(sha256(salt || token))`; the only form a refresh token is stored in.
pub(crate) fn hash_refresh_token(salt: &str, raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

fn refresh_grant(state: &AppState, subject: &SessionSubject, raw: &str) -> RefreshGrant {
    RefreshGrant {
        user_id: subject.user_id.clone(),
        token_hash: hash_refresh_token(&state.config.refresh_token_salt, raw),
        viewing_student_id: subject.viewing_student_id.clone(),
        expires_at: (Utc::now() + Duration::days(state.config.refresh_token_ttl_days))
            .naive_utc(),
    }
}

fn session_resp(
    state: &AppState,
    subject: SessionSubject,
    access_token: String,
    refresh_token: String,
) -> SessionResp {
    SessionResp {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.access_token_ttl_secs,
        role: subject.role,
        user_id: subject.user_id,
        viewing_student_id: subject.viewing_student_id,
    }
}

pub(crate) async fn issue_session(
    state: &AppState,
    subject: SessionSubject,
) -> Result<SessionResp, AppError> {
    let access_token = mint_access_token(state, &subject)?;
    let refresh_token = new_refresh_token();
    state
        .store
        .insert_refresh_token(refresh_grant(state, &subject, &refresh_token))
        .await
        .map_err(|e| {
            error!(user_id = %subject.user_id, error=%e, "session: storing refresh token failed");
            AppError::internal(e)
        })?;
    info!(user_id = %subject.user_id, role = %subject.role, "session issued");
    Ok(session_resp(state, subject, access_token, refresh_token))
}

pub async fn api_login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<api::LoginReq>,
) -> Result<Json<SessionResp>, AppError> {
    let profile = state
        .store
        .find_profile_by_email(&body.email)
        .await?
        .ok_or_else(|| {
            warn!(email = %body.email, "login: unknown email");
            AppError::unauthorized()
        })?;
    let Some(hash) = profile.password_hash.as_deref() else {
        warn!(user_id = %profile.id, "login: profile has no password");
        return Err(AppError::unauthorized());
    };
    if !bcrypt::verify(&body.password, hash).map_err(|e| {
        error!(user_id = %profile.id, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        warn!(user_id = %profile.id, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    let Some(role) = profile.active_role() else {
        warn!(user_id = %profile.id, "login: profile inactive");
        return Err(AppError::unauthorized());
    };
    let subject = SessionSubject {
        user_id: profile.id,
        role,
        company_id: profile.company_id,
        viewing_student_id: None,
    };
    Ok(Json(issue_session(&state, subject).await?))
}

pub async fn api_refresh(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<api::RefreshReq>,
) -> Result<Json<SessionResp>, AppError> {
    let old_hash = hash_refresh_token(&state.config.refresh_token_salt, &body.refresh_token);
    let Some(row) = state.store.find_refresh_token(&old_hash).await? else {
        warn!("refresh: unknown token");
        return Err(AppError::unauthorized());
    };
    if row.expires_at <= Utc::now().naive_utc() {
        state.store.delete_refresh_token(&old_hash).await?;
        warn!(user_id = %row.user_id, "refresh: token expired");
        return Err(AppError::unauthorized());
    }
    let profile = state.store.get_profile(&row.user_id).await?;
    let Some((profile, role)) = profile.and_then(|p| p.active_role().map(|r| (p, r))) else {
        state.store.delete_refresh_token(&old_hash).await?;
        warn!(user_id = %row.user_id, "refresh: profile missing or inactive");
        return Err(AppError::unauthorized());
    };
    if let Some(student) = row.viewing_student_id.as_deref() {
        let tenant = state.store.tenant(&profile.company_id);
        if !acl::is_parent_of_student(&tenant, &profile.id, student).await {
            state.store.delete_refresh_token(&old_hash).await?;
            warn!(user_id = %profile.id, student_id = student, "refresh: parent link gone");
            return Err(AppError::unauthorized());
        }
    }

    let subject = SessionSubject {
        user_id: profile.id,
        role,
        company_id: profile.company_id,
        viewing_student_id: row.viewing_student_id,
    };
    let access_token = mint_access_token(&state, &subject)?;
    let refresh_token = new_refresh_token();
    let rotated = state
        .store
        .rotate_refresh_token(&old_hash, refresh_grant(&state, &subject, &refresh_token))
        .await?;
    if !rotated {
        warn!(user_id = %subject.user_id, "refresh: token already rotated");
        return Err(AppError::unauthorized());
    }
    Ok(Json(session_resp(&state, subject, access_token, refresh_token)))
}

pub async fn api_logout(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<api::RefreshReq>,
) -> Result<Json<api::MessageResp>, AppError> {
    let hash = hash_refresh_token(&state.config.refresh_token_salt, &body.refresh_token);
    let removed = state.store.delete_refresh_token(&hash).await?;
    info!(removed, "logout");
    Ok(Json(api::MessageResp {
        message: "logged out".to_string(),
    }))
}

pub async fn api_force_logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::ForceLogoutReq>,
) -> Result<Json<api::ForceLogoutResp>, AppError> {
    let tenant = state.tenant(&auth);
    if !acl::is_active_admin(&tenant, auth.user_id()).await {
        return Err(AppError::forbidden("only admins can force logout"));
    }
    if tenant.get_profile(&body.target_user_id).await?.is_none() {
        return Err(AppError::not_found("user not found"));
    }
    let revoked = state
        .store
        .delete_refresh_tokens_for_user(&body.target_user_id)
        .await?;
    info!(admin = %auth.user_id(), target = %body.target_user_id, revoked, "force logout");
    Ok(Json(api::ForceLogoutResp {
        target_user_id: body.target_user_id,
        revoked_sessions: revoked,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_tokens_are_32_bytes_base64url() {
        let t = new_refresh_token();
        assert_eq!(t.len(), 43);
        assert!(
            t.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(t, new_refresh_token());
    }

    #[test]
    fn hash_depends_on_salt_and_token() {
        let a = hash_refresh_token("salt", "token");
        assert_eq!(a.len(), 64);
        assert_eq!(a, hash_refresh_token("salt", "token"));
        assert_ne!(a, hash_refresh_token("pepper", "token"));
        assert_ne!(a, hash_refresh_token("salt", "other"));
    }

    #[test]
    fn hash_is_sha256_of_concatenation() {
        let expected = hex::encode(Sha256::digest(b"salttoken"));
        assert_eq!(hash_refresh_token("salt", "token"), expected);
    }
}
