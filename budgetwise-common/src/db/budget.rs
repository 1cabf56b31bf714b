use chrono::{DateTime, Utc};
use diesel::{
    dsl, BoolExpressionMethods, ExpressionMethods, JoinOnDsl, NullableExpressionMethods,
    OptionalExtension, PgExpressionMethods, QueryDsl,
};
use diesel_async::RunQueryDsl;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{DaoError, DbAsyncPool};
use crate::models::budget::{Budget, NewBudget};
use crate::schema::accounts as account_fields;
use crate::schema::accounts::dsl::accounts;
use crate::schema::budgets as budget_fields;
use crate::schema::budgets::dsl::budgets;
use crate::schema::users as user_fields;
use crate::schema::users::dsl::users;

/// A budget along with what the alert check needs to know about its owner.
#[derive(Clone, Debug)]
pub struct BudgetAlertCandidate {
    pub budget: Budget,
    pub user_email: String,
    pub user_name: Option<String>,
    pub default_account: Option<DefaultAccountSummary>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefaultAccountSummary {
    pub id: Uuid,
    pub name: String,
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

    /// Each user has at most one budget. Changing the amount leaves `last_alert_sent` alone.
    pub async fn upsert_budget(&self, user_id: Uuid, amount: Decimal) -> Result<Budget, DaoError> {
        if amount <= Decimal::ZERO {
            return Err(DaoError::CannotRunQuery(
                "Budget amount must be greater than zero",
            ));
        }

        let now = Utc::now();
        let new_budget = NewBudget {
            id: Uuid::now_v7(),
            user_id,
            amount,
            last_alert_sent: None,
            modified_timestamp: now,
        };

        Ok(dsl::insert_into(budgets)
            .values(&new_budget)
            .on_conflict(budget_fields::user_id)
            .do_update()
            .set((
                budget_fields::amount.eq(amount),
                budget_fields::modified_timestamp.eq(now),
            ))
            .get_result::<Budget>(&mut self.db_async_pool.get().await?)
            .await?)
    }

    pub async fn get_budget(&self, user_id: Uuid) -> Result<Option<Budget>, DaoError> {
        Ok(budgets
            .filter(budget_fields::user_id.eq(user_id))
            .first::<Budget>(&mut self.db_async_pool.get().await?)
            .await
            .optional()?)
    }

    pub async fn get_all_budgets_for_alerts(&self) -> Result<Vec<BudgetAlertCandidate>, DaoError> {
        let rows = budgets
            .inner_join(users)
            .left_join(
                accounts.on(account_fields::user_id
                    .eq(budget_fields::user_id)
                    .and(account_fields::is_default.eq(true))),
            )
            .select((
                budget_fields::all_columns,
                user_fields::email,
                user_fields::name,
                (account_fields::id, account_fields::name).nullable(),
            ))
            .order(budget_fields::id.asc())
            .load::<(Budget, String, Option<String>, Option<(Uuid, String)>)>(
                &mut self.db_async_pool.get().await?,
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(budget, user_email, user_name, default_account)| BudgetAlertCandidate {
                    budget,
                    user_email,
                    user_name,
                    default_account: default_account
                        .map(|(id, name)| DefaultAccountSummary { id, name }),
                },
            )
            .collect())
    }

    /// Sets `last_alert_sent` only if it still holds `previous`. Returns false if another
    /// run got there first.
    pub async fn record_alert_sent(
        &self,
        budget_id: Uuid,
        previous: Option<DateTime<Utc>>,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, DaoError> {
        let updated_count = dsl::update(
            budgets
                .find(budget_id)
                .filter(budget_fields::last_alert_sent.is_not_distinct_from(previous)),
        )
        .set(budget_fields::last_alert_sent.eq(sent_at))
        .execute(&mut self.db_async_pool.get().await?)
        .await?;

        Ok(updated_count == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::db::test_utils;

    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn dao() -> Dao {
        Dao::new(test_utils::db_async_pool())
    }

    #[tokio::test]
    #[ignore]
    async fn upsert_budget_keeps_one_budget_per_user() {
        let dao = dao();
        let user_id = test_utils::create_user().await;

        assert!(dao.get_budget(user_id).await.unwrap().is_none());

        let first = dao.upsert_budget(user_id, dec!(1000)).await.unwrap();
        let second = dao.upsert_budget(user_id, dec!(1500.50)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.amount, dec!(1500.50));

        let stored = dao.get_budget(user_id).await.unwrap().unwrap();
        assert_eq!(stored.amount, dec!(1500.50));

        assert!(matches!(
            dao.upsert_budget(user_id, dec!(0)).await,
            Err(DaoError::CannotRunQuery(_))
        ));

        test_utils::delete_user(user_id).await;
    }

    #[tokio::test]
    #[ignore]
    async fn budgets_for_alerts_include_default_account() {
        let dao = dao();
        let with_account = test_utils::create_user().await;
        let without_account = test_utils::create_user().await;

        let account = test_utils::create_default_account(with_account, dec!(0)).await;
        let budget_a = dao.upsert_budget(with_account, dec!(500)).await.unwrap();
        let budget_b = dao.upsert_budget(without_account, dec!(250)).await.unwrap();

        let candidates = dao.get_all_budgets_for_alerts().await.unwrap();

        let a = candidates
            .iter()
            .find(|c| c.budget.id == budget_a.id)
            .unwrap();
        assert_eq!(
            a.default_account,
            Some(DefaultAccountSummary {
                id: account.id,
                name: account.name.clone(),
            })
        );
        assert!(a.user_email.ends_with("@budgetwise.test"));
        assert_eq!(a.user_name.as_deref(), Some("Test User"));

        let b = candidates
            .iter()
            .find(|c| c.budget.id == budget_b.id)
            .unwrap();
        assert!(b.default_account.is_none());

        test_utils::delete_user(with_account).await;
        test_utils::delete_user(without_account).await;
    }

    #[tokio::test]
    #[ignore]
    async fn record_alert_sent_is_compare_and_set() {
        let dao = dao();
        let user_id = test_utils::create_user().await;
        let budget = dao.upsert_budget(user_id, dec!(100)).await.unwrap();

        let first_alert = Utc::now();
        assert!(dao
            .record_alert_sent(budget.id, None, first_alert)
            .await
            .unwrap());

        // A concurrent run that also saw no previous alert loses
        assert!(!dao
            .record_alert_sent(budget.id, None, first_alert + Duration::seconds(1))
            .await
            .unwrap());

        let stored = dao.get_budget(user_id).await.unwrap().unwrap();
        assert_eq!(
            stored.last_alert_sent.map(|t| t.timestamp_micros()),
            Some(first_alert.timestamp_micros())
        );

        let next_month = first_alert + Duration::days(31);
        assert!(dao
            .record_alert_sent(budget.id, stored.last_alert_sent, next_month)
            .await
            .unwrap());

        test_utils::delete_user(user_id).await;
    }
}
