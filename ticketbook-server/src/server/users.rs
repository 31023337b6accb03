use std::collections::BTreeSet;

use axum::Json;
use axum::extract::{Extension, State};
use ticketbook_shared::api;
use ticketbook_shared::auth::{Role, UserStatus};
use tracing::{info, warn};

use super::auth::AuthCtx;
use super::{ApiJson, AppError, AppState, acl};
use crate::storage::models::Profile;
use crate::storage::{
    LinkSet, ProfileChanges, ProfileDraft, ProfileLinks, StorageError, TenantStore,
};

const MIN_PASSWORD_LEN: usize = 8;

fn user_dto(p: Profile, links: ProfileLinks) -> Result<api::UserDto, AppError> {
    let role = p
        .role_kind()
        .ok_or_else(|| AppError::internal(format!("unknown role {}", p.role)))?;
    let status = p
        .status_kind()
        .ok_or_else(|| AppError::internal(format!("unknown status {}", p.status)))?;
    Ok(api::UserDto {
        id: p.id,
        company_id: p.company_id,
        role,
        status,
        first_name: p.first_name,
        last_name: p.last_name,
        email: p.email,
        teacher_ids: links.teacher_ids,
        parent_ids: links.parent_ids,
        student_ids: links.student_ids,
        instrument_ids: links.instrument_ids,
    })
}

fn name(field: &str, value: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::bad_request(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

fn hash_password(state: &AppState, password: &str) -> Result<String, AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    bcrypt::hash(password, state.config.bcrypt_cost).map_err(AppError::internal)
}

fn dedup(ids: &[String]) -> Vec<String> {
    ids.iter()
        .map(|s| s.trim().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Which link lists a profile of `role` can carry.
fn accepted_links(role: Role) -> &'static [&'static str] {
    match role {
        Role::Student => &["teacher_ids", "parent_ids", "instrument_ids"],
        Role::Teacher | Role::Parent => &["student_ids"],
        Role::Admin => &[],
    }
}

fn reject_foreign_links(role: Role, links: &api::UserLinks) -> Result<(), AppError> {
    let given = [
        ("teacher_ids", &links.teacher_ids),
        ("parent_ids", &links.parent_ids),
        ("student_ids", &links.student_ids),
        ("instrument_ids", &links.instrument_ids),
    ];
    for (field, ids) in given {
        if ids.as_ref().is_some_and(|v| !v.is_empty()) && !accepted_links(role).contains(&field) {
            return Err(AppError::bad_request(format!(
                "{field} is not valid for a {role}"
            )));
        }
    }
    Ok(())
}

async fn resolve_ids(
    tenant: &TenantStore,
    ids: &Option<Vec<String>>,
    role: Role,
) -> Result<Option<Vec<String>>, AppError> {
    let Some(ids) = ids else {
        return Ok(None);
    };
    let ids = dedup(ids);
    if ids.is_empty() {
        return Ok(Some(ids));
    }
    let found = tenant.ids_with_role(&ids, role).await?;
    if found.len() != ids.len() {
        return Err(AppError::bad_request(format!(
            "unknown {role} id in links"
        )));
    }
    Ok(Some(ids))
}

/// Teachers may only attach instruments and themselves to a new student.
fn teacher_created_links(teacher_id: &str, links: &api::UserLinks) -> Result<(), AppError> {
    let foreign_teacher = links
        .teacher_ids
        .iter()
        .flatten()
        .any(|t| t.trim() != teacher_id);
    let parents = links.parent_ids.as_ref().is_some_and(|p| !p.is_empty());
    if foreign_teacher || parents {
        return Err(AppError::forbidden(
            "teachers can only link new students to themselves",
        ));
    }
    Ok(())
}

/// Validates requested links for a profile of `role` and resolves every id
/// inside the caller's company.
async fn check_links(
    tenant: &TenantStore,
    role: Role,
    links: &api::UserLinks,
) -> Result<LinkSet, AppError> {
    reject_foreign_links(role, links)?;
    let mut out = LinkSet::default();
    match role {
        Role::Student => {
            out.teacher_ids = resolve_ids(tenant, &links.teacher_ids, Role::Teacher).await?;
            out.parent_ids = resolve_ids(tenant, &links.parent_ids, Role::Parent).await?;
            if let Some(ids) = &links.instrument_ids {
                let ids = dedup(ids);
                if tenant.instrument_ids(&ids).await?.len() != ids.len() {
                    return Err(AppError::bad_request("unknown instrument id in links"));
                }
                out.instrument_ids = Some(ids);
            }
        }
        Role::Teacher | Role::Parent => {
            out.student_ids = resolve_ids(tenant, &links.student_ids, Role::Student).await?;
        }
        Role::Admin => {}
    }
    Ok(out)
}

fn email_conflict(e: StorageError) -> AppError {
    match e {
        StorageError::Conflict(_) => AppError::conflict("email_taken", "email already in use"),
        other => other.into(),
    }
}

pub async fn api_create_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::CreateUserReq>,
) -> Result<Json<api::UserDto>, AppError> {
    let tenant = state.tenant(&auth);
    let staff = acl::is_active_admin_or_teacher(&tenant, auth.user_id()).await;
    match staff.role {
        Some(Role::Admin) => {}
        Some(Role::Teacher) if body.role == Role::Student => {}
        Some(Role::Teacher) => {
            return Err(AppError::forbidden("teachers can only create students"));
        }
        _ => return Err(AppError::forbidden("only admins and teachers can create users")),
    }

    let first_name = name("first_name", &body.first_name)?;
    let last_name = name("last_name", &body.last_name)?;
    let email = body
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_lowercase);
    if email.as_deref().is_some_and(|e| !e.contains('@')) {
        return Err(AppError::bad_request("email is not valid"));
    }
    if body.role.needs_password() && (email.is_none() || body.password.is_none()) {
        return Err(AppError::bad_request(format!(
            "a {} needs an email and a password",
            body.role
        )));
    }
    let password_hash = match body.password.as_deref() {
        Some(pw) => Some(hash_password(&state, pw)?),
        None => None,
    };

    if staff.role == Some(Role::Teacher) {
        teacher_created_links(auth.user_id(), &body.links)?;
    }
    let mut links = check_links(&tenant, body.role, &body.links).await?;
    if staff.role == Some(Role::Teacher) {
        // A teacher's new student is linked to that teacher only.
        links.teacher_ids = Some(vec![auth.user_id().to_string()]);
        links.parent_ids = None;
    }

    let draft = ProfileDraft {
        role: body.role,
        first_name,
        last_name,
        email,
        password_hash,
    };
    let (profile, links) = tenant
        .create_profile(draft, links)
        .await
        .map_err(email_conflict)?;
    info!(creator = %auth.user_id(), user_id = %profile.id, role = %body.role, "user created");
    Ok(Json(user_dto(profile, links)?))
}

/// What an update may touch, by who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateScope {
    /// Admin of the company: names, password and links.
    Full,
    /// The user themself: names and password.
    Own,
    /// A linked teacher editing a student: names and instruments.
    TeacherOfStudent,
}

async fn update_scope(
    tenant: &TenantStore,
    auth: &AuthCtx,
    target: &Profile,
) -> Result<UpdateScope, AppError> {
    if acl::is_active_admin(tenant, auth.user_id()).await {
        return Ok(UpdateScope::Full);
    }
    if target.id == auth.user_id() {
        return match tenant.active_role(auth.user_id()).await? {
            Some(_) => Ok(UpdateScope::Own),
            None => Err(AppError::forbidden("user is not active")),
        };
    }
    if target.role_kind() == Some(Role::Student)
        && acl::is_active_teacher(tenant, auth.user_id()).await
        && acl::is_teacher_linked(tenant, auth.user_id(), &target.id).await
    {
        return Ok(UpdateScope::TeacherOfStudent);
    }
    Err(AppError::forbidden("not allowed to update this user"))
}

pub async fn api_update_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::UpdateUserReq>,
) -> Result<Json<api::UserDto>, AppError> {
    let tenant = state.tenant(&auth);
    let target = tenant
        .get_profile(&body.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    let role = target
        .role_kind()
        .ok_or_else(|| AppError::internal(format!("unknown role {}", target.role)))?;
    let scope = update_scope(&tenant, &auth, &target).await?;

    let l = &body.links;
    let touches_people =
        l.teacher_ids.is_some() || l.parent_ids.is_some() || l.student_ids.is_some();
    match scope {
        UpdateScope::Full => {}
        UpdateScope::Own if touches_people || l.instrument_ids.is_some() => {
            return Err(AppError::forbidden("only admins can change links"));
        }
        UpdateScope::Own => {}
        UpdateScope::TeacherOfStudent if touches_people || body.password.is_some() => {
            return Err(AppError::forbidden(
                "teachers can only change a student's names and instruments",
            ));
        }
        UpdateScope::TeacherOfStudent => {}
    }

    let changes = ProfileChanges {
        first_name: body
            .first_name
            .as_deref()
            .map(|v| name("first_name", v))
            .transpose()?,
        last_name: body
            .last_name
            .as_deref()
            .map(|v| name("last_name", v))
            .transpose()?,
        password_hash: body
            .password
            .as_deref()
            .map(|pw| hash_password(&state, pw))
            .transpose()?,
    };
    let links = check_links(&tenant, role, &body.links).await?;
    let (profile, links) = tenant
        .update_profile(&target.id, changes, links)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    info!(caller = %auth.user_id(), user_id = %profile.id, ?scope, "user updated");
    Ok(Json(user_dto(profile, links)?))
}

pub async fn api_delete_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::UserIdReq>,
) -> Result<Json<api::MessageResp>, AppError> {
    let tenant = state.tenant(&auth);
    if !acl::is_active_admin(&tenant, auth.user_id()).await {
        return Err(AppError::forbidden("only admins can delete users"));
    }
    if body.user_id == auth.user_id() {
        warn!(admin = %auth.user_id(), "delete: self-delete refused");
        return Err(AppError::self_action("cannot delete yourself"));
    }
    if !tenant.delete_profile(&body.user_id).await? {
        return Err(AppError::not_found("user not found"));
    }
    info!(admin = %auth.user_id(), user_id = %body.user_id, "user deleted");
    Ok(Json(api::MessageResp {
        message: "deleted".to_string(),
    }))
}

pub async fn api_toggle_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::ToggleStatusReq>,
) -> Result<Json<api::UserDto>, AppError> {
    let tenant = state.tenant(&auth);
    if !acl::is_active_admin(&tenant, auth.user_id()).await {
        return Err(AppError::forbidden("only admins can change user status"));
    }
    if body.user_id == auth.user_id() {
        return Err(AppError::self_action("cannot change your own status"));
    }
    let (profile, revoked) = tenant
        .set_status(&body.user_id, body.status)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    if body.status == UserStatus::Inactive {
        info!(user_id = %profile.id, revoked, "user deactivated");
    }
    let links = tenant.profile_links(&profile.id).await?;
    Ok(Json(user_dto(profile, links)?))
}
