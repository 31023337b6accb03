use std::collections::BTreeSet;

use chrono::Utc;
use diesel::prelude::*;
use ticketbook_shared::auth::{Role, UserStatus};
use tracing::info;

use super::models::{NewProfile, Profile};
use super::schema::{
    self, assigned_tasks, instruments, one_time_pins, parent_students, practice_logs, profiles,
    refresh_tokens, student_instruments, student_teachers, ticket_transactions,
};
use super::{StorageError, Store, TenantStore, unique_as_conflict};

/// Desired link sets for a profile. `None` leaves the current links alone.
#[derive(Debug, Clone, Default)]
pub struct LinkSet {
    pub teacher_ids: Option<Vec<String>>,
    pub parent_ids: Option<Vec<String>>,
    pub student_ids: Option<Vec<String>>,
    pub instrument_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileLinks {
    pub teacher_ids: Vec<String>,
    pub parent_ids: Vec<String>,
    pub student_ids: Vec<String>,
    pub instrument_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProfileDraft {
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = profiles)]
pub struct ProfileChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password_hash: Option<String>,
}

impl ProfileChanges {
    fn is_empty(&self) -> bool {
        self.first_name.is_none() && self.last_name.is_none() && self.password_hash.is_none()
    }
}

/// Returns `(removed, added)` between the current and the desired id sets.
fn diff_ids(current: Vec<String>, desired: &[String]) -> (Vec<String>, Vec<String>) {
    let current: BTreeSet<String> = current.into_iter().collect();
    let desired: BTreeSet<String> = desired.iter().cloned().collect();
    let removed = current.difference(&desired).cloned().collect();
    let added = desired.difference(&current).cloned().collect();
    (removed, added)
}

// Link tables have no lifecycle of their own: a sync deletes the pairs that
// are no longer wanted and inserts the new ones.
macro_rules! link_sync {
    ($name:ident, $table:ident, $owner:ident, $other:ident) => {
        fn $name(conn: &mut SqliteConnection, owner: &str, desired: &[String]) -> QueryResult<()> {
            use schema::$table::dsl as l;
            let current = l::$table
                .filter(l::$owner.eq(owner))
                .select(l::$other)
                .load::<String>(conn)?;
            let (removed, added) = diff_ids(current, desired);
            if !removed.is_empty() {
                diesel::delete(
                    l::$table
                        .filter(l::$owner.eq(owner))
                        .filter(l::$other.eq_any(&removed)),
                )
                .execute(conn)?;
            }
            for other in &added {
                diesel::insert_into(l::$table)
                    .values((l::$owner.eq(owner), l::$other.eq(other)))
                    .execute(conn)?;
            }
            Ok(())
        }
    };
}

link_sync!(sync_teachers_of_student, student_teachers, student_id, teacher_id);
link_sync!(sync_students_of_teacher, student_teachers, teacher_id, student_id);
link_sync!(sync_parents_of_student, parent_students, student_id, parent_id);
link_sync!(sync_students_of_parent, parent_students, parent_id, student_id);
link_sync!(sync_instruments_of_student, student_instruments, student_id, instrument_id);

fn apply_links(
    conn: &mut SqliteConnection,
    profile_id: &str,
    role: Role,
    links: &LinkSet,
) -> Result<(), StorageError> {
    match role {
        Role::Student => {
            if let Some(ids) = &links.teacher_ids {
                sync_teachers_of_student(conn, profile_id, ids)?;
            }
            if let Some(ids) = &links.parent_ids {
                sync_parents_of_student(conn, profile_id, ids)?;
            }
            if let Some(ids) = &links.instrument_ids {
                sync_instruments_of_student(conn, profile_id, ids)?;
            }
        }
        Role::Teacher => {
            if let Some(ids) = &links.student_ids {
                sync_students_of_teacher(conn, profile_id, ids)?;
            }
        }
        Role::Parent => {
            if let Some(ids) = &links.student_ids {
                sync_students_of_parent(conn, profile_id, ids)?;
            }
        }
        Role::Admin => {}
    }
    Ok(())
}

fn load_links(conn: &mut SqliteConnection, profile_id: &str) -> QueryResult<ProfileLinks> {
    use schema::{parent_students as ps, student_instruments as si, student_teachers as st};
    Ok(ProfileLinks {
        teacher_ids: st::table
            .filter(st::student_id.eq(profile_id))
            .select(st::teacher_id)
            .order(st::teacher_id.asc())
            .load(conn)?,
        parent_ids: ps::table
            .filter(ps::student_id.eq(profile_id))
            .select(ps::parent_id)
            .order(ps::parent_id.asc())
            .load(conn)?,
        student_ids: {
            let mut ids: Vec<String> = st::table
                .filter(st::teacher_id.eq(profile_id))
                .select(st::student_id)
                .load(conn)?;
            ids.extend(
                ps::table
                    .filter(ps::parent_id.eq(profile_id))
                    .select(ps::student_id)
                    .load::<String>(conn)?,
            );
            ids.sort();
            ids
        },
        instrument_ids: si::table
            .filter(si::student_id.eq(profile_id))
            .select(si::instrument_id)
            .order(si::instrument_id.asc())
            .load(conn)?,
    })
}

fn profile_in(
    conn: &mut SqliteConnection,
    company: &str,
    id: &str,
) -> QueryResult<Option<Profile>> {
    profiles::table
        .filter(profiles::company_id.eq(company))
        .filter(profiles::id.eq(id))
        .select(Profile::as_select())
        .first::<Profile>(conn)
        .optional()
}

impl Store {
    /// Unscoped lookup, for flows that start without a tenant (PIN claim,
    /// refresh).
    pub async fn get_profile(&self, id: &str) -> Result<Option<Profile>, StorageError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            Ok(profiles::table
                .filter(profiles::id.eq(&id))
                .select(Profile::as_select())
                .first::<Profile>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, StorageError> {
        let email = email.trim().to_lowercase();
        self.with_conn(move |conn| {
            Ok(profiles::table
                .filter(profiles::email.eq(&email))
                .select(Profile::as_select())
                .first::<Profile>(conn)
                .optional()?)
        })
        .await
    }
}

impl TenantStore {
    pub async fn get_profile(&self, id: &str) -> Result<Option<Profile>, StorageError> {
        let id = id.to_string();
        self.with_conn(move |conn, company| Ok(profile_in(conn, company, &id)?))
            .await
    }

    /// Role of the user if the profile exists in this company and is active.
    pub async fn active_role(&self, id: &str) -> Result<Option<Role>, StorageError> {
        Ok(self.get_profile(id).await?.and_then(|p| p.active_role()))
    }

    pub async fn teacher_link_exists(
        &self,
        teacher: &str,
        student: &str,
    ) -> Result<bool, StorageError> {
        use schema::student_teachers as st;
        let teacher = teacher.to_string();
        let student = student.to_string();
        self.with_conn(move |conn, company| {
            let count: i64 = st::table
                .inner_join(profiles::table.on(profiles::id.eq(st::student_id)))
                .filter(profiles::company_id.eq(company))
                .filter(st::teacher_id.eq(&teacher))
                .filter(st::student_id.eq(&student))
                .count()
                .get_result(conn)?;
            Ok(count > 0)
        })
        .await
    }

    pub async fn parent_link_exists(
        &self,
        parent: &str,
        student: &str,
    ) -> Result<bool, StorageError> {
        use schema::parent_students as ps;
        let parent = parent.to_string();
        let student = student.to_string();
        self.with_conn(move |conn, company| {
            let count: i64 = ps::table
                .inner_join(profiles::table.on(profiles::id.eq(ps::student_id)))
                .filter(profiles::company_id.eq(company))
                .filter(ps::parent_id.eq(&parent))
                .filter(ps::student_id.eq(&student))
                .count()
                .get_result(conn)?;
            Ok(count > 0)
        })
        .await
    }

    /// The subset of `ids` that are profiles of `role` in this company.
    pub async fn ids_with_role(
        &self,
        ids: &[String],
        role: Role,
    ) -> Result<Vec<String>, StorageError> {
        let ids = ids.to_vec();
        self.with_conn(move |conn, company| {
            Ok(profiles::table
                .filter(profiles::company_id.eq(company))
                .filter(profiles::role.eq(role.as_str()))
                .filter(profiles::id.eq_any(&ids))
                .select(profiles::id)
                .load::<String>(conn)?)
        })
        .await
    }

    pub async fn instrument_ids(&self, ids: &[String]) -> Result<Vec<String>, StorageError> {
        let ids = ids.to_vec();
        self.with_conn(move |conn, company| {
            Ok(instruments::table
                .filter(instruments::company_id.eq(company))
                .filter(instruments::id.eq_any(&ids))
                .select(instruments::id)
                .load::<String>(conn)?)
        })
        .await
    }

    pub async fn profile_links(&self, id: &str) -> Result<ProfileLinks, StorageError> {
        let id = id.to_string();
        self.with_conn(move |conn, _company| Ok(load_links(conn, &id)?))
            .await
    }

    pub async fn create_profile(
        &self,
        draft: ProfileDraft,
        links: LinkSet,
    ) -> Result<(Profile, ProfileLinks), StorageError> {
        self.with_conn(move |conn, company| {
            conn.immediate_transaction(|conn| -> Result<(Profile, ProfileLinks), StorageError> {
                let id = uuid::Uuid::new_v4().to_string();
                let email = draft.email.as_deref().map(|e| e.trim().to_lowercase());
                let row = NewProfile {
                    id: &id,
                    company_id: company,
                    role: draft.role.as_str(),
                    status: UserStatus::Active.as_str(),
                    first_name: &draft.first_name,
                    last_name: &draft.last_name,
                    email: email.as_deref(),
                    password_hash: draft.password_hash.as_deref(),
                    created_at: Utc::now().naive_utc(),
                };
                let profile = diesel::insert_into(profiles::table)
                    .values(&row)
                    .returning(Profile::as_returning())
                    .get_result::<Profile>(conn)
                    .map_err(unique_as_conflict("email already in use"))?;
                apply_links(conn, &id, draft.role, &links)?;
                let current = load_links(conn, &id)?;
                info!(user_id = %id, role = %draft.role, "profile created");
                Ok((profile, current))
            })
        })
        .await
    }

    pub async fn update_profile(
        &self,
        id: &str,
        changes: ProfileChanges,
        links: LinkSet,
    ) -> Result<Option<(Profile, ProfileLinks)>, StorageError> {
        let id = id.to_string();
        self.with_conn(move |conn, company| {
            conn.immediate_transaction(
                |conn| -> Result<Option<(Profile, ProfileLinks)>, StorageError> {
                    let Some(existing) = profile_in(conn, company, &id)? else {
                        return Ok(None);
                    };
                    let role = existing.role_kind().ok_or_else(|| {
                        StorageError::InvalidInput(format!("unknown role {}", existing.role))
                    })?;
                    if !changes.is_empty() {
                        diesel::update(profiles::table.filter(profiles::id.eq(&id)))
                            .set(&changes)
                            .execute(conn)?;
                    }
                    apply_links(conn, &id, role, &links)?;
                    let profile = profile_in(conn, company, &id)?.unwrap_or(existing);
                    let current = load_links(conn, &id)?;
                    Ok(Some((profile, current)))
                },
            )
        })
        .await
    }

    /// Sets the status; deactivation also drops every refresh token of the
    /// user. Returns `None` when the profile is not in this company.
    pub async fn set_status(
        &self,
        id: &str,
        status: UserStatus,
    ) -> Result<Option<(Profile, usize)>, StorageError> {
        let id = id.to_string();
        self.with_conn(move |conn, company| {
            conn.immediate_transaction(|conn| -> Result<Option<(Profile, usize)>, StorageError> {
                let updated = diesel::update(
                    profiles::table
                        .filter(profiles::company_id.eq(company))
                        .filter(profiles::id.eq(&id)),
                )
                .set(profiles::status.eq(status.as_str()))
                .execute(conn)?;
                if updated == 0 {
                    return Ok(None);
                }
                let revoked = if status == UserStatus::Inactive {
                    diesel::delete(refresh_tokens::table.filter(refresh_tokens::user_id.eq(&id)))
                        .execute(conn)?
                } else {
                    0
                };
                let profile = profiles::table
                    .filter(profiles::id.eq(&id))
                    .select(Profile::as_select())
                    .first::<Profile>(conn)?;
                info!(user_id = %id, status = status.as_str(), revoked, "profile status changed");
                Ok(Some((profile, revoked)))
            })
        })
        .await
    }

    /// Hard delete with cascade over everything that references the user.
    pub async fn delete_profile(&self, id: &str) -> Result<bool, StorageError> {
        let id = id.to_string();
        self.with_conn(move |conn, company| {
            conn.immediate_transaction(|conn| -> Result<bool, StorageError> {
                if profile_in(conn, company, &id)?.is_none() {
                    return Ok(false);
                }
                diesel::delete(
                    student_teachers::table.filter(
                        student_teachers::student_id
                            .eq(&id)
                            .or(student_teachers::teacher_id.eq(&id)),
                    ),
                )
                .execute(conn)?;
                diesel::delete(
                    parent_students::table.filter(
                        parent_students::student_id
                            .eq(&id)
                            .or(parent_students::parent_id.eq(&id)),
                    ),
                )
                .execute(conn)?;
                diesel::delete(
                    student_instruments::table.filter(student_instruments::student_id.eq(&id)),
                )
                .execute(conn)?;
                diesel::delete(assigned_tasks::table.filter(assigned_tasks::student_id.eq(&id)))
                    .execute(conn)?;
                diesel::delete(
                    ticket_transactions::table.filter(ticket_transactions::student_id.eq(&id)),
                )
                .execute(conn)?;
                diesel::delete(practice_logs::table.filter(practice_logs::student_id.eq(&id)))
                    .execute(conn)?;
                diesel::delete(
                    one_time_pins::table.filter(
                        one_time_pins::user_id
                            .eq(&id)
                            .or(one_time_pins::viewing_student_id.eq(&id)),
                    ),
                )
                .execute(conn)?;
                diesel::delete(
                    refresh_tokens::table.filter(
                        refresh_tokens::user_id
                            .eq(&id)
                            .or(refresh_tokens::viewing_student_id.eq(&id)),
                    ),
                )
                .execute(conn)?;
                diesel::delete(profiles::table.filter(profiles::id.eq(&id))).execute(conn)?;
                info!(user_id = %id, "profile deleted");
                Ok(true)
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::diff_ids;

    #[test]
    fn diff_reports_removed_and_added() {
        let current = vec!["a".to_string(), "b".to_string()];
        let desired = vec!["b".to_string(), "c".to_string()];
        let (removed, added) = diff_ids(current, &desired);
        assert_eq!(removed, vec!["a".to_string()]);
        assert_eq!(added, vec!["c".to_string()]);
    }

    #[test]
    fn diff_ignores_duplicates_in_desired() {
        let desired = vec!["x".to_string(), "x".to_string()];
        let (removed, added) = diff_ids(Vec::new(), &desired);
        assert!(removed.is_empty());
        assert_eq!(added, vec!["x".to_string()]);
    }
}
