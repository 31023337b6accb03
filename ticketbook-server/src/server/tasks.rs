use axum::Json;
use axum::extract::{Extension, State};
use ticketbook_shared::api;
use ticketbook_shared::auth::Role;
use ticketbook_shared::domain::VerificationStatus;
use tracing::{info, warn};

use super::auth::AuthCtx;
use super::{ApiJson, AppError, AppState, acl, rfc3339};
use crate::storage::VerifyOutcome;
use crate::storage::models::{AssignedTask, LibraryTask, TaskSnapshot};

fn points_from(raw: i64) -> Result<i32, AppError> {
    if raw < 0 {
        return Err(AppError::bad_request("points must be a non-negative integer"));
    }
    i32::try_from(raw).map_err(|_| AppError::bad_request("points out of range"))
}

/// Checks a review request and returns the points to award.
fn validate_verification(status: VerificationStatus, points: i64) -> Result<i32, AppError> {
    if !status.is_terminal() {
        return Err(AppError::bad_request(
            "verification_status must be verified, partial or incomplete",
        ));
    }
    let points = points_from(points)?;
    if status == VerificationStatus::Incomplete && points != 0 {
        return Err(AppError::bad_request("incomplete tasks award no points"));
    }
    Ok(points)
}

fn non_empty(field: &str, value: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::bad_request(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

pub(crate) fn assigned_dto(t: AssignedTask) -> api::AssignedTaskDto {
    let verification_status = t.status_kind();
    api::AssignedTaskDto {
        id: t.id,
        student_id: t.student_id,
        assigned_by_id: t.assigned_by_id,
        task_library_id: t.task_library_id,
        title: t.task_title,
        description: t.task_description,
        points: t.task_points,
        attachment_path: t.task_attachment_path,
        is_complete: t.is_complete,
        completed_date: t.completed_date.map(rfc3339),
        verification_status,
        verified_by_id: t.verified_by_id,
        verified_date: t.verified_date.map(rfc3339),
        actual_points_awarded: t.actual_points_awarded,
        assigned_date: rfc3339(t.assigned_date),
    }
}

fn library_dto(t: LibraryTask) -> api::LibraryTaskDto {
    api::LibraryTaskDto {
        id: t.id,
        title: t.title,
        description: t.description,
        points: t.points,
        can_self_assign: t.can_self_assign,
        attachment_path: t.attachment_path,
    }
}

pub async fn api_create_library_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::CreateLibraryTaskReq>,
) -> Result<Json<api::LibraryTaskDto>, AppError> {
    let tenant = state.tenant(&auth);
    if !acl::is_active_admin_or_teacher(&tenant, auth.user_id())
        .await
        .authorized
    {
        return Err(AppError::forbidden(
            "only admins and teachers can create library tasks",
        ));
    }
    let snapshot = TaskSnapshot {
        task_library_id: None,
        title: non_empty("title", &body.title)?,
        description: body.description,
        points: points_from(body.points)?,
        attachment_path: body.attachment_path,
    };
    let task = tenant
        .create_library_task(auth.user_id(), snapshot, body.can_self_assign)
        .await?;
    info!(task_id = %task.id, "library task created");
    Ok(Json(library_dto(task)))
}

pub async fn api_assign_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::AssignTaskReq>,
) -> Result<Json<api::AssignedTaskDto>, AppError> {
    let tenant = state.tenant(&auth);
    let student = acl::resolve_student(&tenant, &body.student_id, true).await?;

    let library = match body.task_library_id.as_deref() {
        Some(id) => Some(
            tenant
                .get_library_task(id)
                .await?
                .ok_or_else(|| AppError::not_found("library task not found"))?,
        ),
        None => None,
    };

    let staff = acl::is_active_admin_or_teacher(&tenant, auth.user_id()).await;
    let allowed = match staff.role {
        Some(Role::Admin) => true,
        Some(Role::Teacher) => acl::is_teacher_linked(&tenant, auth.user_id(), &student.id).await,
        _ if !auth.role().can_self_assign() => false,
        _ => {
            let Some(lib) = library.as_ref() else {
                return Err(AppError::forbidden(
                    "self-assignment requires a library task",
                ));
            };
            lib.can_self_assign && acl::acts_for_student(&tenant, &auth, &student.id).await
        }
    };
    if !allowed {
        warn!(caller = %auth.user_id(), student_id = %student.id, "assign: denied");
        return Err(AppError::forbidden("not allowed to assign tasks to this student"));
    }

    let snapshot = match library.as_ref() {
        Some(lib) => TaskSnapshot::from(lib),
        None => {
            let title = non_empty("title", body.title.as_deref().unwrap_or_default())?;
            let Some(points) = body.points else {
                return Err(AppError::bad_request("points are required for ad-hoc tasks"));
            };
            TaskSnapshot {
                task_library_id: None,
                title,
                description: body.description,
                points: points_from(points)?,
                attachment_path: None,
            }
        }
    };
    let task = tenant
        .assign_task(&student.id, auth.user_id(), snapshot)
        .await?;
    Ok(Json(assigned_dto(task)))
}

pub async fn api_complete_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::AssignmentReq>,
) -> Result<Json<api::AssignedTaskDto>, AppError> {
    let tenant = state.tenant(&auth);
    let task = tenant
        .get_assigned_task(&body.assignment_id)
        .await?
        .ok_or_else(|| AppError::not_found("task not found"))?;
    if !(acl::acts_for_student(&tenant, &auth, &task.student_id).await
        || acl::can_manage_student(&tenant, auth.user_id(), &task.student_id).await)
    {
        return Err(AppError::forbidden("not allowed to complete this task"));
    }
    if task.is_complete || !tenant.mark_task_complete(&task.id).await? {
        return Err(AppError::conflict(
            "already_complete",
            "task is already complete",
        ));
    }
    let task = tenant
        .get_assigned_task(&task.id)
        .await?
        .ok_or_else(|| AppError::not_found("task not found"))?;
    info!(assignment_id = %task.id, "task completed");
    Ok(Json(assigned_dto(task)))
}

pub async fn api_verify_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::VerifyTaskReq>,
) -> Result<Json<api::VerifyTaskResp>, AppError> {
    let points = validate_verification(body.verification_status, body.actual_points_awarded)?;
    let tenant = state.tenant(&auth);
    let task = tenant
        .get_assigned_task(&body.assignment_id)
        .await?
        .ok_or_else(|| AppError::not_found("task not found"))?;
    if !acl::can_manage_student(&tenant, auth.user_id(), &task.student_id).await {
        return Err(AppError::forbidden("not allowed to verify this task"));
    }
    match tenant
        .verify_task(&task.id, auth.user_id(), body.verification_status, points)
        .await?
    {
        VerifyOutcome::Verified {
            task,
            transaction_id,
            balance,
        } => Ok(Json(api::VerifyTaskResp {
            task: assigned_dto(*task),
            transaction_id,
            balance,
        })),
        VerifyOutcome::NotPending => Err(AppError::conflict(
            "not_pending",
            "task is not awaiting verification",
        )),
    }
}

pub async fn api_delete_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::AssignmentReq>,
) -> Result<Json<api::MessageResp>, AppError> {
    let tenant = state.tenant(&auth);
    let task = tenant
        .get_assigned_task(&body.assignment_id)
        .await?
        .ok_or_else(|| AppError::not_found("task not found"))?;

    let staff = acl::is_active_admin_or_teacher(&tenant, auth.user_id()).await;
    let allowed = match staff.role {
        Some(Role::Admin) => true,
        Some(Role::Teacher) if task.assigned_by_id == auth.user_id() => true,
        Some(Role::Teacher) => {
            // Tasks a student or parent picked themselves can be cleaned up
            // by any of the student's teachers.
            let self_assigned = task.assigned_by_id == task.student_id
                || tenant
                    .get_profile(&task.assigned_by_id)
                    .await?
                    .is_some_and(|p| p.role_kind() == Some(Role::Parent));
            self_assigned && acl::is_teacher_linked(&tenant, auth.user_id(), &task.student_id).await
        }
        _ => false,
    };
    if !allowed {
        return Err(AppError::forbidden("not allowed to delete this task"));
    }
    if !task.is_unverified() || !tenant.delete_unverified_task(&task.id).await? {
        return Err(AppError::conflict(
            "already_verified",
            "verified tasks cannot be deleted",
        ));
    }
    info!(assignment_id = %task.id, caller = %auth.user_id(), "task deleted");
    Ok(Json(api::MessageResp {
        message: "deleted".to_string(),
    }))
}

pub async fn api_list_tasks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    ApiJson(body): ApiJson<api::StudentReq>,
) -> Result<Json<Vec<api::AssignedTaskDto>>, AppError> {
    let tenant = state.tenant(&auth);
    let student = acl::resolve_student(&tenant, &body.student_id, false).await?;
    if !acl::can_view_student(&tenant, &auth, &student.id).await {
        return Err(AppError::forbidden("not allowed to view this student"));
    }
    let rows = tenant.list_assigned_tasks(&student.id).await?;
    Ok(Json(rows.into_iter().map(assigned_dto).collect()))
}
