use chrono::{DateTime, Utc};
use diesel::{dsl, ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::RunQueryDsl;

use crate::db::{DaoError, DbAsyncPool};
use crate::models::job_registry_item::NewJobRegistryItem;
use crate::schema::job_registry as job_registry_fields;
use crate::schema::job_registry::dsl::job_registry;

pub struct Dao {
    db_async_pool: DbAsyncPool,
}

impl Dao {
    pub fn new(db_async_pool: &DbAsyncPool) -> Self {
        Self {
            db_async_pool: db_async_pool.clone(),
        }
    }

    pub async fn get_job_last_run_timestamp(
        &self,
        name: &str,
    ) -> Result<Option<DateTime<Utc>>, DaoError> {
        Ok(job_registry
            .select(job_registry_fields::last_run_timestamp)
            .find(name)
            .get_result(&mut self.db_async_pool.get().await?)
            .await
            .optional()?)
    }

    pub async fn set_job_last_run_timestamp(
        &self,
        job_name: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DaoError> {
        let registry_item = NewJobRegistryItem {
            job_name,
            last_run_timestamp: timestamp,
        };

        dsl::insert_into(job_registry)
            .values(&registry_item)
            .on_conflict(job_registry_fields::job_name)
            .do_update()
            .set(job_registry_fields::last_run_timestamp.eq(timestamp))
            .execute(&mut self.db_async_pool.get().await?)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils;

    use chrono::Duration;
    use uuid::Uuid;

    fn dao() -> Dao {
        Dao::new(test_utils::db_async_pool())
    }

    #[tokio::test]
    #[ignore]
    async fn job_registry_persists_and_updates_timestamps() {
        let dao = dao();
        let job_name = format!("test-job-{}", Uuid::now_v7());

        assert!(dao
            .get_job_last_run_timestamp(&job_name)
            .await
            .unwrap()
            .is_none());

        // Postgres keeps microsecond precision
        let timestamp = DateTime::from_timestamp_micros(Utc::now().timestamp_micros()).unwrap();
        dao.set_job_last_run_timestamp(&job_name, timestamp)
            .await
            .unwrap();

        let stored = dao.get_job_last_run_timestamp(&job_name).await.unwrap();
        assert_eq!(stored, Some(timestamp));

        let new_timestamp = timestamp + Duration::seconds(60);
        dao.set_job_last_run_timestamp(&job_name, new_timestamp)
            .await
            .unwrap();

        let updated = dao.get_job_last_run_timestamp(&job_name).await.unwrap();
        assert_eq!(updated, Some(new_timestamp));
    }
}
