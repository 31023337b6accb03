pub mod models;
pub mod schema;

mod ledger;
mod practice;
mod profiles;
mod rewards;
mod sessions;
mod tasks;

pub use ledger::{LedgerEntry, LedgerOutcome};
pub use profiles::{LinkSet, ProfileChanges, ProfileDraft, ProfileLinks};
pub use sessions::RefreshGrant;
pub use tasks::VerifyOutcome;

use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use models::{NewCompany, NewInstrument, NewProfile};
use ticketbook_shared::auth::UserStatus;
use tracing::{debug, info};

use crate::server::{CompanyConfig, UserConfig};

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Maps unique-constraint violations to [`StorageError::Conflict`] so callers
/// can tell "already exists" apart from real failures.
fn unique_as_conflict(what: &'static str) -> impl Fn(DieselError) -> StorageError {
    move |err| match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            StorageError::Conflict(what.to_string())
        }
        other => StorageError::Database(other),
    }
}

type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// Store handle bound to one company. Every lookup and write made through it
/// is filtered by `company_id`; records of other companies look missing.
#[derive(Clone)]
pub struct TenantStore {
    pool: SqlitePool,
    company_id: String,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    pub fn tenant(&self, company_id: &str) -> TenantStore {
        TenantStore {
            pool: self.pool.clone(),
            company_id: company_id.to_string(),
        }
    }

    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking(&self.pool, f).await
    }

    /// Upserts companies, their instruments and the bootstrap users from config.
    pub async fn seed_from_config(
        &self,
        cfg_companies: &[CompanyConfig],
        cfg_users: &[UserConfig],
    ) -> Result<(), StorageError> {
        use schema::{companies, instruments, profiles};

        let companies_owned = cfg_companies.to_owned();
        let users_owned = cfg_users.to_owned();
        self.with_conn(move |conn| {
            let now = Utc::now().naive_utc();
            for c in &companies_owned {
                let new_company = NewCompany {
                    id: &c.id,
                    name: &c.name,
                };
                diesel::insert_into(companies::table)
                    .values(&new_company)
                    .on_conflict(companies::id)
                    .do_update()
                    .set(companies::name.eq(new_company.name))
                    .execute(conn)?;

                for i in &c.instruments {
                    let new_instrument = NewInstrument {
                        id: &i.id,
                        company_id: &c.id,
                        name: &i.name,
                    };
                    diesel::insert_into(instruments::table)
                        .values(&new_instrument)
                        .on_conflict(instruments::id)
                        .do_update()
                        .set(instruments::name.eq(new_instrument.name))
                        .execute(conn)?;
                }
            }

            for u in &users_owned {
                if !companies_owned.iter().any(|c| c.id == u.company_id) {
                    return Err(StorageError::InvalidInput(format!(
                        "user {} references unknown company {}",
                        u.id, u.company_id
                    )));
                }
                let email = u.email.trim().to_lowercase();
                let new_profile = NewProfile {
                    id: &u.id,
                    company_id: &u.company_id,
                    role: u.role.as_str(),
                    status: UserStatus::Active.as_str(),
                    first_name: &u.first_name,
                    last_name: &u.last_name,
                    email: Some(email.as_str()),
                    password_hash: Some(u.password_hash.as_str()),
                    created_at: now,
                };
                // Role and company stay as first seeded
                diesel::insert_into(profiles::table)
                    .values(&new_profile)
                    .on_conflict(profiles::id)
                    .do_update()
                    .set((
                        profiles::first_name.eq(new_profile.first_name),
                        profiles::last_name.eq(new_profile.last_name),
                        profiles::email.eq(new_profile.email),
                        profiles::password_hash.eq(new_profile.password_hash),
                    ))
                    .execute(conn)
                    .map_err(unique_as_conflict("email already in use"))?;
            }
            info!(
                companies = companies_owned.len(),
                users = users_owned.len(),
                "seeded from config"
            );
            Ok(())
        })
        .await
    }
}

impl TenantStore {
    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut SqliteConnection, &str) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let company = self.company_id.clone();
        debug!(company_id = %company, "tenant query");
        run_blocking(&self.pool, move |conn| f(conn, &company)).await
    }
}

async fn run_blocking<T, F>(pool: &SqlitePool, f: F) -> Result<T, StorageError>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<T, StorageError> {
        let mut conn = pool.get()?;
        configure_sqlite_conn(&mut conn)?;
        f(&mut conn)
    })
    .await?
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    // Ignore the result rows; Diesel's execute is fine for PRAGMAs
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    Ok(())
}
