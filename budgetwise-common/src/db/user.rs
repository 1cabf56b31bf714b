use chrono::Utc;
use diesel::{dsl, ExpressionMethods, QueryDsl};
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::db::{DaoError, DbAsyncPool};
use crate::models::user::{NewUser, User};
use crate::schema::accounts as account_fields;
use crate::schema::accounts::dsl::accounts;
use crate::schema::budgets as budget_fields;
use crate::schema::budgets::dsl::budgets;
use crate::schema::transactions as transaction_fields;
use crate::schema::transactions::dsl::transactions;
use crate::schema::users as user_fields;
use crate::schema::users::dsl::users;

pub struct Dao {
    db_async_pool: DbAsyncPool,
}

impl Dao {
    pub fn new(db_async_pool: &DbAsyncPool) -> Self {
        Self {
            db_async_pool: db_async_pool.clone(),
        }
    }

    pub async fn create_user(&self, email: &str, name: Option<&str>) -> Result<Uuid, DaoError> {
        let email_lowercase = email.to_lowercase();
        let user_id = Uuid::now_v7();

        let new_user = NewUser {
            id: user_id,
            email: &email_lowercase,
            name,
            created_timestamp: Utc::now(),
        };

        let mut conn = self.db_async_pool.get().await?;
        dsl::insert_into(users)
            .values(&new_user)
            .execute(&mut conn)
            .await?;

        Ok(user_id)
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User, DaoError> {
        let mut conn = self.db_async_pool.get().await?;
        Ok(users.find(user_id).first(&mut conn).await?)
    }

    pub async fn get_all_users(&self) -> Result<Vec<User>, DaoError> {
        let mut conn = self.db_async_pool.get().await?;
        Ok(users
            .order(user_fields::created_timestamp.asc())
            .load(&mut conn)
            .await?)
    }

    /// Removes the user along with their budget, transactions and accounts.
    pub async fn delete_user(&self, user_id: Uuid) -> Result<(), DaoError> {
        let mut db_connection = self.db_async_pool.get().await?;

        db_connection
            .build_transaction()
            .run::<_, diesel::result::Error, _>(|conn| {
                Box::pin(async move {
                    diesel::delete(budgets.filter(budget_fields::user_id.eq(user_id)))
                        .execute(conn)
                        .await?;

                    diesel::delete(transactions.filter(transaction_fields::user_id.eq(user_id)))
                        .execute(conn)
                        .await?;

                    diesel::delete(accounts.filter(account_fields::user_id.eq(user_id)))
                        .execute(conn)
                        .await?;

                    let deleted_count = diesel::delete(users.find(user_id)).execute(conn).await?;

                    if deleted_count == 0 {
                        return Err(diesel::result::Error::NotFound);
                    }

                    Ok(())
                })
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::db::test_utils;

    fn dao() -> Dao {
        Dao::new(test_utils::db_async_pool())
    }

    #[tokio::test]
    #[ignore]
    async fn create_user_stores_lowercase_email() {
        let dao = dao();
        let email = test_utils::unique_email().to_uppercase();

        let user_id = dao.create_user(&email, Some("Casey")).await.unwrap();
        let user = dao.get_user(user_id).await.unwrap();

        assert_eq!(user.email, email.to_lowercase());
        assert_eq!(user.name.as_deref(), Some("Casey"));

        test_utils::delete_user(user_id).await;
    }

    #[tokio::test]
    #[ignore]
    async fn get_all_users_includes_new_users() {
        let dao = dao();
        let first = test_utils::create_user().await;
        let second = test_utils::create_user().await;

        let all_ids: Vec<Uuid> = dao
            .get_all_users()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();

        assert!(all_ids.contains(&first));
        assert!(all_ids.contains(&second));

        test_utils::delete_user(first).await;
        test_utils::delete_user(second).await;
    }

    #[tokio::test]
    #[ignore]
    async fn get_user_reports_missing_user() {
        let error = dao().get_user(Uuid::now_v7()).await.unwrap_err();
        assert!(error.is_not_found());
    }

    #[tokio::test]
    #[ignore]
    async fn delete_user_removes_owned_rows() {
        let dao = dao();
        let user_id = test_utils::create_user().await;
        test_utils::create_default_account(user_id, rust_decimal::Decimal::TEN).await;

        dao.delete_user(user_id).await.unwrap();

        assert!(dao.get_user(user_id).await.unwrap_err().is_not_found());
        assert!(dao.delete_user(user_id).await.unwrap_err().is_not_found());
    }
}
