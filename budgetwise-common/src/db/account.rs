use chrono::Utc;
use diesel::{dsl, ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::RunQueryDsl;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::{DaoError, DbAsyncPool};
use crate::models::account::{Account, AccountType, NewAccount};
use crate::schema::accounts as account_fields;
use crate::schema::accounts::dsl::accounts;
use crate::schema::transactions as transaction_fields;
use crate::schema::transactions::dsl::transactions;

#[derive(Clone, Debug)]
pub struct AccountWithTransactionCount {
    pub account: Account,
    pub transaction_count: i64,
}

pub struct Dao {
    db_async_pool: DbAsyncPool,
}

impl Dao {
    pub fn new(db_async_pool: &DbAsyncPool) -> Self {
        Self {
            db_async_pool: db_async_pool.clone(),
        }
    }

    /// A user's first account is always their default. Making an account the default clears
    /// the flag on every other account the user owns.
    pub async fn create_account(
        &self,
        user_id: Uuid,
        name: &str,
        account_type: AccountType,
        balance: Decimal,
        is_default: bool,
    ) -> Result<Account, DaoError> {
        let mut db_connection = self.db_async_pool.get().await?;

        let account = db_connection
            .build_transaction()
            .run::<_, diesel::result::Error, _>(|conn| {
                Box::pin(async move {
                    let existing_account_count = accounts
                        .filter(account_fields::user_id.eq(user_id))
                        .count()
                        .get_result::<i64>(conn)
                        .await?;

                    let should_be_default = existing_account_count == 0 || is_default;

                    if should_be_default {
                        dsl::update(
                            accounts
                                .filter(account_fields::user_id.eq(user_id))
                                .filter(account_fields::is_default.eq(true)),
                        )
                        .set(account_fields::is_default.eq(false))
                        .execute(conn)
                        .await?;
                    }

                    let new_account = NewAccount {
                        id: Uuid::now_v7(),
                        user_id,
                        name,
                        account_type,
                        balance,
                        is_default: should_be_default,
                        created_timestamp: Utc::now(),
                    };

                    dsl::insert_into(accounts)
                        .values(&new_account)
                        .get_result::<Account>(conn)
                        .await
                })
            })
            .await?;

        Ok(account)
    }

    pub async fn get_user_accounts(&self, user_id: Uuid) -> Result<Vec<Account>, DaoError> {
        let mut conn = self.db_async_pool.get().await?;
        Ok(accounts
            .filter(account_fields::user_id.eq(user_id))
            .order(account_fields::created_timestamp.desc())
            .load::<Account>(&mut conn)
            .await?)
    }

    /// Same order as `get_user_accounts`. Accounts without transactions have a count of zero.
    pub async fn get_user_accounts_with_transaction_counts(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<AccountWithTransactionCount>, DaoError> {
        let mut conn = self.db_async_pool.get().await?;

        let user_accounts = accounts
            .filter(account_fields::user_id.eq(user_id))
            .order(account_fields::created_timestamp.desc())
            .load::<Account>(&mut conn)
            .await?;

        let counts: HashMap<Uuid, i64> = transactions
            .filter(transaction_fields::user_id.eq(user_id))
            .group_by(transaction_fields::account_id)
            .select((transaction_fields::account_id, dsl::count_star()))
            .load::<(Uuid, i64)>(&mut conn)
            .await?
            .into_iter()
            .collect();

        Ok(user_accounts
            .into_iter()
            .map(|account| AccountWithTransactionCount {
                transaction_count: counts.get(&account.id).copied().unwrap_or(0),
                account,
            })
            .collect())
    }

    pub async fn get_default_account(&self, user_id: Uuid) -> Result<Option<Account>, DaoError> {
        let mut conn = self.db_async_pool.get().await?;
        Ok(accounts
            .filter(account_fields::user_id.eq(user_id))
            .filter(account_fields::is_default.eq(true))
            .first::<Account>(&mut conn)
            .await
            .optional()?)
    }
}
