use chrono::{NaiveDate, Utc};
use diesel::prelude::*;

use super::models::NewPracticeLog;
use super::schema::practice_logs as pl;
use super::{StorageError, TenantStore, unique_as_conflict};

impl TenantStore {
    /// One row per student per calendar day; a second log for the same day
    /// is a [`StorageError::Conflict`]. Returns the new row id.
    pub async fn insert_practice_log(
        &self,
        student: &str,
        log_date: NaiveDate,
    ) -> Result<i32, StorageError> {
        let student = student.to_string();
        self.with_conn(move |conn, company| {
            let row = NewPracticeLog {
                student_id: &student,
                company_id: company,
                log_date,
                created_at: Utc::now().naive_utc(),
            };
            let id = diesel::insert_into(pl::table)
                .values(&row)
                .returning(pl::id)
                .get_result::<i32>(conn)
                .map_err(unique_as_conflict("already logged today"))?;
            Ok(id)
        })
        .await
    }

    /// Distinct log dates, newest first.
    pub async fn practice_dates(&self, student: &str) -> Result<Vec<NaiveDate>, StorageError> {
        let student = student.to_string();
        self.with_conn(move |conn, company| {
            Ok(pl::table
                .filter(pl::company_id.eq(company))
                .filter(pl::student_id.eq(&student))
                .select(pl::log_date)
                .order(pl::log_date.desc())
                .load::<NaiveDate>(conn)?)
        })
        .await
    }
}
