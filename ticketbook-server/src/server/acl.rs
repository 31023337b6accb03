//! Authorization predicates. Each one is a lookup through the caller's
//! company-scoped store; a failed lookup denies.

use ticketbook_shared::auth::Role;
use tracing::warn;

use super::AppError;
use super::auth::AuthCtx;
use crate::storage::models::Profile;
use crate::storage::{StorageError, TenantStore};

fn fail_closed(check: &'static str, res: Result<bool, StorageError>) -> bool {
    match res {
        Ok(allowed) => allowed,
        Err(e) => {
            warn!(check, error = %e, "ACL: lookup failed; denying");
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaffCheck {
    pub authorized: bool,
    pub role: Option<Role>,
}

async fn has_active_role(store: &TenantStore, user: &str, role: Role) -> Result<bool, StorageError> {
    Ok(store.active_role(user).await? == Some(role))
}

pub async fn is_active_admin(store: &TenantStore, user: &str) -> bool {
    fail_closed("is_active_admin", has_active_role(store, user, Role::Admin).await)
}

pub async fn is_active_teacher(store: &TenantStore, user: &str) -> bool {
    fail_closed(
        "is_active_teacher",
        has_active_role(store, user, Role::Teacher).await,
    )
}

pub async fn is_active_admin_or_teacher(store: &TenantStore, user: &str) -> StaffCheck {
    match store.active_role(user).await {
        Ok(Some(role)) if role.is_staff() => StaffCheck {
            authorized: true,
            role: Some(role),
        },
        Ok(_) => StaffCheck {
            authorized: false,
            role: None,
        },
        Err(e) => {
            warn!(check = "is_active_admin_or_teacher", error = %e, "ACL: lookup failed; denying");
            StaffCheck {
                authorized: false,
                role: None,
            }
        }
    }
}

pub async fn is_teacher_linked(store: &TenantStore, teacher: &str, student: &str) -> bool {
    if teacher.is_empty() || student.is_empty() || teacher == student {
        return false;
    }
    fail_closed(
        "is_teacher_linked",
        store.teacher_link_exists(teacher, student).await,
    )
}

pub async fn is_parent_of_student(store: &TenantStore, parent: &str, student: &str) -> bool {
    if parent.is_empty() || student.is_empty() || parent == student {
        return false;
    }
    fail_closed(
        "is_parent_of_student",
        store.parent_link_exists(parent, student).await,
    )
}

/// Active admin, or active teacher linked to the student.
pub async fn can_manage_student(store: &TenantStore, user: &str, student: &str) -> bool {
    match is_active_admin_or_teacher(store, user).await.role {
        Some(Role::Admin) => true,
        Some(Role::Teacher) => is_teacher_linked(store, user, student).await,
        _ => false,
    }
}

/// The student themself, or a linked parent. A parent session opened for
/// one student cannot act for another.
pub async fn acts_for_student(store: &TenantStore, auth: &AuthCtx, student: &str) -> bool {
    let role = match store.active_role(auth.user_id()).await {
        Ok(role) => role,
        Err(e) => {
            warn!(check = "acts_for_student", error = %e, "ACL: lookup failed; denying");
            return false;
        }
    };
    match role {
        Some(Role::Student) => auth.user_id() == student,
        Some(Role::Parent) => {
            if auth.viewing_student_id().is_some_and(|v| v != student) {
                return false;
            }
            is_parent_of_student(store, auth.user_id(), student).await
        }
        _ => false,
    }
}

/// Read access to a student's tasks, balance, history and streak.
pub async fn can_view_student(store: &TenantStore, auth: &AuthCtx, student: &str) -> bool {
    acts_for_student(store, auth, student).await
        || can_manage_student(store, auth.user_id(), student).await
}

/// Loads a student of the caller's company. Missing (or in another company)
/// is 404; an inactive student is 403 when `require_active` is set.
pub async fn resolve_student(
    store: &TenantStore,
    student: &str,
    require_active: bool,
) -> Result<Profile, AppError> {
    let profile = store
        .get_profile(student)
        .await?
        .filter(|p| p.role_kind() == Some(Role::Student))
        .ok_or_else(|| AppError::not_found("student not found"))?;
    if require_active && !profile.is_active() {
        return Err(AppError::forbidden("student is not active"));
    }
    Ok(profile)
}
