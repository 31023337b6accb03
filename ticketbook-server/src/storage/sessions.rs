//! One-time PINs and refresh tokens. Both are looked up before a tenant is
//! known, so these live on the unscoped [`Store`].

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use tracing::{debug, info};

use super::models::{NewOneTimePin, NewRefreshToken, OneTimePin, RefreshToken};
use super::schema::{one_time_pins as otp, refresh_tokens as rt};
use super::{StorageError, Store, unique_as_conflict};

/// Refresh token row to insert; only the hash of the raw token is stored.
#[derive(Debug, Clone)]
pub struct RefreshGrant {
    pub user_id: String,
    pub token_hash: String,
    pub viewing_student_id: Option<String>,
    pub expires_at: NaiveDateTime,
}

fn insert_grant(conn: &mut SqliteConnection, grant: &RefreshGrant) -> Result<(), StorageError> {
    let now = Utc::now().naive_utc();
    let row = NewRefreshToken {
        user_id: &grant.user_id,
        token_hash: &grant.token_hash,
        viewing_student_id: grant.viewing_student_id.as_deref(),
        expires_at: grant.expires_at,
        created_at: now,
        last_used_at: now,
    };
    diesel::insert_into(rt::table)
        .values(&row)
        .execute(conn)
        .map_err(unique_as_conflict("refresh token already exists"))?;
    Ok(())
}

impl Store {
    /// Stores a freshly generated PIN. A clash with a live PIN surfaces as
    /// [`StorageError::Conflict`]; the caller regenerates.
    pub async fn insert_pin(&self, pin: OneTimePin) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            let row = NewOneTimePin {
                pin: &pin.pin,
                user_id: &pin.user_id,
                target_role: &pin.target_role,
                viewing_student_id: pin.viewing_student_id.as_deref(),
                company_id: &pin.company_id,
                created_by_id: &pin.created_by_id,
                expires_at: pin.expires_at,
                created_at: pin.created_at,
            };
            diesel::insert_into(otp::table)
                .values(&row)
                .execute(conn)
                .map_err(unique_as_conflict("pin collision"))?;
            Ok(())
        })
        .await
    }

    /// Drops claimed and expired PINs so their digits can be handed out again.
    pub async fn purge_stale_pins(&self, now: NaiveDateTime) -> Result<usize, StorageError> {
        self.with_conn(move |conn| {
            let n = diesel::delete(
                otp::table.filter(otp::claimed_at.is_not_null().or(otp::expires_at.le(now))),
            )
            .execute(conn)?;
            if n > 0 {
                debug!(purged = n, "stale pins removed");
            }
            Ok(n)
        })
        .await
    }

    pub async fn find_pin(&self, pin: &str) -> Result<Option<OneTimePin>, StorageError> {
        let pin = pin.to_string();
        self.with_conn(move |conn| {
            Ok(otp::table
                .filter(otp::pin.eq(&pin))
                .select(OneTimePin::as_select())
                .first::<OneTimePin>(conn)
                .optional()?)
        })
        .await
    }

    /// Marks the PIN claimed if it is unclaimed and unexpired. Only one of
    /// any number of concurrent claims gets the row back.
    pub async fn claim_pin(
        &self,
        pin: &str,
        now: NaiveDateTime,
    ) -> Result<Option<OneTimePin>, StorageError> {
        let pin = pin.to_string();
        self.with_conn(move |conn| {
            Ok(diesel::update(
                otp::table
                    .filter(otp::pin.eq(&pin))
                    .filter(otp::claimed_at.is_null())
                    .filter(otp::expires_at.gt(now)),
            )
            .set(otp::claimed_at.eq(Some(now)))
            .returning(OneTimePin::as_returning())
            .get_result::<OneTimePin>(conn)
            .optional()?)
        })
        .await
    }

    pub async fn insert_refresh_token(&self, grant: RefreshGrant) -> Result<(), StorageError> {
        self.with_conn(move |conn| insert_grant(conn, &grant)).await
    }

    pub async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, StorageError> {
        let token_hash = token_hash.to_string();
        self.with_conn(move |conn| {
            Ok(rt::table
                .filter(rt::token_hash.eq(&token_hash))
                .select(RefreshToken::as_select())
                .first::<RefreshToken>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn delete_refresh_token(&self, token_hash: &str) -> Result<bool, StorageError> {
        let token_hash = token_hash.to_string();
        self.with_conn(move |conn| {
            let n = diesel::delete(rt::table.filter(rt::token_hash.eq(&token_hash)))
                .execute(conn)?;
            Ok(n == 1)
        })
        .await
    }

    /// Replaces `old_hash` with `grant`. Returns `false` when the old token
    /// was already gone, e.g. a concurrent refresh consumed it first.
    pub async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        grant: RefreshGrant,
    ) -> Result<bool, StorageError> {
        let old_hash = old_hash.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<bool, StorageError> {
                let removed = diesel::delete(
                    rt::table
                        .filter(rt::token_hash.eq(&old_hash))
                        .filter(rt::user_id.eq(&grant.user_id)),
                )
                .execute(conn)?;
                if removed != 1 {
                    return Ok(false);
                }
                insert_grant(conn, &grant)?;
                Ok(true)
            })
        })
        .await
    }

    pub async fn delete_refresh_tokens_for_user(&self, user_id: &str) -> Result<usize, StorageError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let n = diesel::delete(rt::table.filter(rt::user_id.eq(&user_id))).execute(conn)?;
            info!(user_id = %user_id, revoked = n, "refresh tokens revoked");
            Ok(n)
        })
        .await
    }
}
