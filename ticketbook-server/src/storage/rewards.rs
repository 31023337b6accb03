use chrono::Utc;
use diesel::prelude::*;

use super::models::{NewReward, Reward};
use super::schema::rewards as rw;
use super::{StorageError, TenantStore};

impl TenantStore {
    pub async fn create_reward(
        &self,
        name: &str,
        description: Option<&str>,
        cost: i32,
        is_goal_eligible: bool,
    ) -> Result<Reward, StorageError> {
        if cost <= 0 {
            return Err(StorageError::InvalidInput(
                "reward cost must be positive".to_string(),
            ));
        }
        let name = name.to_string();
        let description = description.map(str::to_string);
        self.with_conn(move |conn, company| {
            let id = uuid::Uuid::new_v4().to_string();
            let row = NewReward {
                id: &id,
                company_id: company,
                name: &name,
                description: description.as_deref(),
                cost,
                is_goal_eligible,
                created_at: Utc::now().naive_utc(),
            };
            Ok(diesel::insert_into(rw::table)
                .values(&row)
                .returning(Reward::as_returning())
                .get_result::<Reward>(conn)?)
        })
        .await
    }

    pub async fn get_reward(&self, id: &str) -> Result<Option<Reward>, StorageError> {
        let id = id.to_string();
        self.with_conn(move |conn, company| {
            Ok(rw::table
                .filter(rw::company_id.eq(company))
                .filter(rw::id.eq(&id))
                .select(Reward::as_select())
                .first::<Reward>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn list_rewards(&self) -> Result<Vec<Reward>, StorageError> {
        self.with_conn(move |conn, company| {
            Ok(rw::table
                .filter(rw::company_id.eq(company))
                .order((rw::cost.asc(), rw::name.asc()))
                .select(Reward::as_select())
                .load::<Reward>(conn)?)
        })
        .await
    }
}
