use chrono::Utc;
use diesel::prelude::*;
use ticketbook_shared::domain::{TransactionKind, VerificationStatus};
use tracing::info;

use super::ledger::{LedgerEntry, balance_in, insert_entry};
use super::models::{AssignedTask, LibraryTask, NewAssignedTask, NewLibraryTask, TaskSnapshot};
use super::schema::{assigned_tasks as at, task_library as tl};
use super::{StorageError, TenantStore};

#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    Verified {
        task: Box<AssignedTask>,
        transaction_id: Option<i32>,
        balance: i64,
    },
    /// The task is not complete or was already reviewed.
    NotPending,
}

const PENDING: &str = VerificationStatus::Pending.as_str();

impl TenantStore {
    pub async fn create_library_task(
        &self,
        created_by: &str,
        snapshot: TaskSnapshot,
        can_self_assign: bool,
    ) -> Result<LibraryTask, StorageError> {
        let created_by = created_by.to_string();
        self.with_conn(move |conn, company| {
            let id = uuid::Uuid::new_v4().to_string();
            let row = NewLibraryTask {
                id: &id,
                company_id: company,
                title: &snapshot.title,
                description: snapshot.description.as_deref(),
                points: snapshot.points,
                can_self_assign,
                attachment_path: snapshot.attachment_path.as_deref(),
                created_by_id: &created_by,
                created_at: Utc::now().naive_utc(),
            };
            Ok(diesel::insert_into(tl::table)
                .values(&row)
                .returning(LibraryTask::as_returning())
                .get_result::<LibraryTask>(conn)?)
        })
        .await
    }

    pub async fn get_library_task(&self, id: &str) -> Result<Option<LibraryTask>, StorageError> {
        let id = id.to_string();
        self.with_conn(move |conn, company| {
            Ok(tl::table
                .filter(tl::company_id.eq(company))
                .filter(tl::id.eq(&id))
                .select(LibraryTask::as_select())
                .first::<LibraryTask>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn assign_task(
        &self,
        student: &str,
        assigned_by: &str,
        snapshot: TaskSnapshot,
    ) -> Result<AssignedTask, StorageError> {
        let student = student.to_string();
        let assigned_by = assigned_by.to_string();
        self.with_conn(move |conn, company| {
            let id = uuid::Uuid::new_v4().to_string();
            let row = NewAssignedTask {
                id: &id,
                company_id: company,
                student_id: &student,
                assigned_by_id: &assigned_by,
                task_library_id: snapshot.task_library_id.as_deref(),
                task_title: &snapshot.title,
                task_description: snapshot.description.as_deref(),
                task_points: snapshot.points,
                task_attachment_path: snapshot.attachment_path.as_deref(),
                is_complete: false,
                assigned_date: Utc::now().naive_utc(),
            };
            let task = diesel::insert_into(at::table)
                .values(&row)
                .returning(AssignedTask::as_returning())
                .get_result::<AssignedTask>(conn)?;
            info!(
                assignment_id = %id,
                student_id = %student,
                assigned_by = %assigned_by,
                "task assigned"
            );
            Ok(task)
        })
        .await
    }

    pub async fn get_assigned_task(&self, id: &str) -> Result<Option<AssignedTask>, StorageError> {
        let id = id.to_string();
        self.with_conn(move |conn, company| {
            Ok(at::table
                .filter(at::company_id.eq(company))
                .filter(at::id.eq(&id))
                .select(AssignedTask::as_select())
                .first::<AssignedTask>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn list_assigned_tasks(
        &self,
        student: &str,
    ) -> Result<Vec<AssignedTask>, StorageError> {
        let student = student.to_string();
        self.with_conn(move |conn, company| {
            Ok(at::table
                .filter(at::company_id.eq(company))
                .filter(at::student_id.eq(&student))
                .order(at::assigned_date.desc())
                .select(AssignedTask::as_select())
                .load::<AssignedTask>(conn)?)
        })
        .await
    }

    /// ASSIGNED -> COMPLETED_PENDING. Returns `false` if the task was already
    /// complete (or does not exist in this company).
    pub async fn mark_task_complete(&self, id: &str) -> Result<bool, StorageError> {
        let id = id.to_string();
        self.with_conn(move |conn, company| {
            let now = Utc::now().naive_utc();
            let updated = diesel::update(
                at::table
                    .filter(at::company_id.eq(company))
                    .filter(at::id.eq(&id))
                    .filter(at::is_complete.eq(false)),
            )
            .set((
                at::is_complete.eq(true),
                at::completed_date.eq(Some(now)),
                at::verification_status.eq(Some(PENDING)),
            ))
            .execute(conn)?;
            Ok(updated == 1)
        })
        .await
    }

    /// COMPLETED_PENDING -> terminal status. The status change and the
    /// `task_award` row commit together or not at all.
    pub async fn verify_task(
        &self,
        id: &str,
        verifier: &str,
        status: VerificationStatus,
        points: i32,
    ) -> Result<VerifyOutcome, StorageError> {
        if !status.is_terminal() {
            return Err(StorageError::InvalidInput(
                "verification status must be terminal".to_string(),
            ));
        }
        let id = id.to_string();
        let verifier = verifier.to_string();
        self.with_conn(move |conn, company| {
            conn.immediate_transaction(|conn| -> Result<VerifyOutcome, StorageError> {
                let now = Utc::now().naive_utc();
                let updated = diesel::update(
                    at::table
                        .filter(at::company_id.eq(company))
                        .filter(at::id.eq(&id))
                        .filter(at::is_complete.eq(true))
                        .filter(
                            at::verification_status
                                .is_null()
                                .or(at::verification_status.eq(PENDING)),
                        ),
                )
                .set((
                    at::verification_status.eq(Some(status.as_str())),
                    at::verified_by_id.eq(Some(verifier.as_str())),
                    at::verified_date.eq(Some(now)),
                    at::actual_points_awarded.eq(Some(points)),
                ))
                .execute(conn)?;
                if updated != 1 {
                    return Ok(VerifyOutcome::NotPending);
                }
                let task = at::table
                    .filter(at::id.eq(&id))
                    .select(AssignedTask::as_select())
                    .first::<AssignedTask>(conn)?;
                let transaction_id = if points > 0 {
                    let entry = LedgerEntry {
                        student_id: task.student_id.clone(),
                        amount: points,
                        kind: TransactionKind::TaskAward,
                        source_id: Some(task.id.clone()),
                        notes: Some(format!("Task: {}", task.task_title)),
                    };
                    Some(insert_entry(conn, company, &entry)?)
                } else {
                    None
                };
                let balance = balance_in(conn, &task.student_id)?;
                info!(
                    assignment_id = %id,
                    verifier = %verifier,
                    status = %status,
                    points,
                    "task verified"
                );
                Ok(VerifyOutcome::Verified {
                    task: Box::new(task),
                    transaction_id,
                    balance,
                })
            })
        })
        .await
    }

    /// Deletes the assignment only while it is still unverified.
    pub async fn delete_unverified_task(&self, id: &str) -> Result<bool, StorageError> {
        let id = id.to_string();
        self.with_conn(move |conn, company| {
            let deleted = diesel::delete(
                at::table
                    .filter(at::company_id.eq(company))
                    .filter(at::id.eq(&id))
                    .filter(
                        at::verification_status
                            .is_null()
                            .or(at::verification_status.eq(PENDING)),
                    ),
            )
            .execute(conn)?;
            Ok(deleted == 1)
        })
        .await
    }
}
