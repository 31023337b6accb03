//! Append-only ticket ledger. A student's balance is the sum of their rows;
//! nothing else stores it.

use chrono::Utc;
use diesel::dsl::sum;
use diesel::prelude::*;
use ticketbook_shared::domain::TransactionKind;
use tracing::{debug, info};

use super::models::{NewTicketTransaction, TicketTransaction};
use super::schema::ticket_transactions as tt;
use super::{StorageError, TenantStore};

/// One ledger row to append.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub student_id: String,
    pub amount: i32,
    pub kind: TransactionKind,
    pub source_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    Applied { transaction_id: i32, balance: i64 },
    /// A debit would have taken the balance below zero; nothing was written.
    Insufficient { balance: i64 },
}

const MAX_PER_PAGE: usize = 1000;

/// Row offset of a 1-based `page`; pages past what SQLite can address are
/// invalid input.
fn page_offset(page: usize, per_page: usize) -> Result<i64, StorageError> {
    page.max(1)
        .checked_sub(1)
        .and_then(|p| p.checked_mul(per_page))
        .and_then(|o| i64::try_from(o).ok())
        .ok_or_else(|| StorageError::InvalidInput("page out of range".to_string()))
}

pub(crate) fn balance_in(conn: &mut SqliteConnection, student: &str) -> QueryResult<i64> {
    let total: Option<i64> = tt::table
        .filter(tt::student_id.eq(student))
        .select(sum(tt::amount))
        .first::<Option<i64>>(conn)?;
    Ok(total.unwrap_or(0))
}

pub(crate) fn insert_entry(
    conn: &mut SqliteConnection,
    company: &str,
    entry: &LedgerEntry,
) -> QueryResult<i32> {
    let row = NewTicketTransaction {
        student_id: &entry.student_id,
        company_id: company,
        amount: entry.amount,
        kind: entry.kind.as_str(),
        source_id: entry.source_id.as_deref(),
        notes: entry.notes.as_deref(),
        created_at: Utc::now().naive_utc(),
    };
    diesel::insert_into(tt::table)
        .values(&row)
        .returning(tt::id)
        .get_result::<i32>(conn)
}

impl TenantStore {
    pub async fn balance(&self, student: &str) -> Result<i64, StorageError> {
        let student = student.to_string();
        self.with_conn(move |conn, _company| Ok(balance_in(conn, &student)?))
            .await
    }

    /// Appends a row. Debits sum the balance and insert inside one
    /// `BEGIN IMMEDIATE` transaction, so concurrent debits of the same student
    /// are serialized and can never drive the balance negative.
    pub async fn append_checked(&self, entry: LedgerEntry) -> Result<LedgerOutcome, StorageError> {
        if entry.amount == 0 {
            return Err(StorageError::InvalidInput(
                "ledger amount must be non-zero".to_string(),
            ));
        }
        self.with_conn(move |conn, company| {
            conn.immediate_transaction(|conn| -> Result<LedgerOutcome, StorageError> {
                let balance = balance_in(conn, &entry.student_id)?;
                let next = balance + i64::from(entry.amount);
                if entry.amount < 0 && next < 0 {
                    debug!(
                        student_id = %entry.student_id,
                        balance,
                        amount = entry.amount,
                        "ledger: debit refused"
                    );
                    return Ok(LedgerOutcome::Insufficient { balance });
                }
                let transaction_id = insert_entry(conn, company, &entry)?;
                info!(
                    student_id = %entry.student_id,
                    amount = entry.amount,
                    kind = %entry.kind,
                    transaction_id,
                    balance = next,
                    "ledger: appended"
                );
                Ok(LedgerOutcome::Applied {
                    transaction_id,
                    balance: next,
                })
            })
        })
        .await
    }

    pub async fn list_transactions(
        &self,
        student: &str,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<TicketTransaction>, StorageError> {
        let student = student.to_string();
        let per_page = per_page.clamp(1, MAX_PER_PAGE);
        let offset = page_offset(page, per_page)?;
        let per_page = per_page as i64;
        self.with_conn(move |conn, company| {
            Ok(tt::table
                .filter(tt::company_id.eq(company))
                .filter(tt::student_id.eq(&student))
                .order((tt::created_at.desc(), tt::id.desc()))
                .offset(offset)
                .limit(per_page)
                .select(TicketTransaction::as_select())
                .load::<TicketTransaction>(conn)?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_starts_at_zero() {
        assert_eq!(page_offset(0, 20).unwrap(), 0);
        assert_eq!(page_offset(1, 20).unwrap(), 0);
        assert_eq!(page_offset(3, 20).unwrap(), 40);
    }

    #[test]
    fn huge_pages_are_rejected() {
        assert!(matches!(
            page_offset(usize::MAX, MAX_PER_PAGE),
            Err(StorageError::InvalidInput(_))
        ));
        assert!(page_offset(usize::MAX / 4, MAX_PER_PAGE).is_err());
    }
}
