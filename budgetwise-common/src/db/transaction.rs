use chrono::{DateTime, Utc};
use diesel::{dsl, BoolExpressionMethods, ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::RunQueryDsl;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{DaoError, DbAsyncPool};
use crate::models::transaction::{
    self as transaction_model, NewTransaction, Transaction, TransactionStatus, TransactionType,
};
use crate::recurrence::{self, RecurringInterval};
use crate::schema::accounts as account_fields;
use crate::schema::accounts::dsl::accounts;
use crate::schema::transactions as transaction_fields;
use crate::schema::transactions::dsl::transactions;

#[derive(Clone, Debug)]
pub struct TransactionInput<'a> {
    pub account_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub description: Option<&'a str>,
    pub category: &'a str,
    pub date: DateTime<Utc>,
    pub recurring_interval: Option<RecurringInterval>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecurringProcessOutcome {
    Processed {
        generated_transaction_id: Uuid,
        next_recurring_date: DateTime<Utc>,
    },
    NotFound,
    NotDue,
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

    /// Records a transaction and applies it to the account balance in a single DB transaction.
    pub async fn create_transaction(
        &self,
        user_id: Uuid,
        input: &TransactionInput<'_>,
    ) -> Result<Transaction, DaoError> {
        if input.amount <= Decimal::ZERO {
            return Err(DaoError::CannotRunQuery(
                "Transaction amount must be greater than zero",
            ));
        }

        let next_recurring_date = match input.recurring_interval {
            Some(interval) => Some(
                recurrence::next_recurring_date(input.date, interval).ok_or(
                    DaoError::CannotRunQuery("Next recurring date is out of range"),
                )?,
            ),
            None => None,
        };

        let now = Utc::now();
        let new_transaction = NewTransaction {
            id: Uuid::now_v7(),
            user_id,
            account_id: input.account_id,
            transaction_type: input.transaction_type,
            amount: input.amount,
            description: input.description,
            category: input.category,
            date: input.date,
            is_recurring: input.recurring_interval.is_some(),
            recurring_interval: input.recurring_interval.as_ref().map(RecurringInterval::as_str),
            last_processed: None,
            next_recurring_date,
            status: TransactionStatus::Completed,
            created_timestamp: now,
        };

        let balance_change =
            transaction_model::balance_change(input.transaction_type, input.amount);

        let mut db_connection = self.db_async_pool.get().await?;

        let transaction = db_connection
            .build_transaction()
            .run::<_, diesel::result::Error, _>(|conn| {
                Box::pin(async move {
                    let updated_account_count = dsl::update(
                        accounts
                            .find(new_transaction.account_id)
                            .filter(account_fields::user_id.eq(user_id)),
                    )
                    .set(account_fields::balance.eq(account_fields::balance + balance_change))
                    .execute(conn)
                    .await?;

                    if updated_account_count == 0 {
                        return Err(diesel::result::Error::NotFound);
                    }

                    dsl::insert_into(transactions)
                        .values(&new_transaction)
                        .get_result::<Transaction>(conn)
                        .await
                })
            })
            .await?;

        Ok(transaction)
    }

    pub async fn get_user_transactions(&self, user_id: Uuid) -> Result<Vec<Transaction>, DaoError> {
        let mut conn = self.db_async_pool.get().await?;
        Ok(transactions
            .filter(transaction_fields::user_id.eq(user_id))
            .order(transaction_fields::date.desc())
            .load::<Transaction>(&mut conn)
            .await?)
    }

    /// Completed recurring transactions that were never processed or whose next recurring
    /// date has arrived.
    pub async fn get_due_recurring_transactions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, DaoError> {
        let mut conn = self.db_async_pool.get().await?;
        Ok(transactions
            .filter(transaction_fields::is_recurring.eq(true))
            .filter(transaction_fields::status.eq(TransactionStatus::Completed))
            .filter(
                transaction_fields::last_processed
                    .is_null()
                    .or(transaction_fields::next_recurring_date.le(now)),
            )
            .order(transaction_fields::date.asc())
            .load::<Transaction>(&mut conn)
            .await?)
    }

    /// Generates one occurrence of a recurring transaction. The generated transaction, the
    /// balance adjustment and the schedule advance are committed together or not at all.
    ///
    /// The source row is locked for the duration of the DB transaction and its due state is
    /// re-checked, so calling this again for an already-processed cycle is a no-op.
    pub async fn process_recurring_transaction(
        &self,
        transaction_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RecurringProcessOutcome, DaoError> {
        let mut db_connection = self.db_async_pool.get().await?;

        db_connection
            .build_transaction()
            .run::<_, DaoError, _>(|conn| {
                Box::pin(async move {
                    let source = transactions
                        .find(transaction_id)
                        .filter(transaction_fields::user_id.eq(user_id))
                        .for_update()
                        .first::<Transaction>(conn)
                        .await
                        .optional()?;

                    let Some(source) = source else {
                        return Ok(RecurringProcessOutcome::NotFound);
                    };

                    if !source.is_recurring || !source.is_due(now) {
                        return Ok(RecurringProcessOutcome::NotDue);
                    }

                    let occurrence = source.next_occurrence(now)?;

                    let generated = NewTransaction {
                        id: Uuid::now_v7(),
                        user_id: source.user_id,
                        account_id: source.account_id,
                        transaction_type: source.transaction_type,
                        amount: source.amount,
                        description: Some(&occurrence.description),
                        category: &source.category,
                        date: now,
                        is_recurring: false,
                        recurring_interval: None,
                        last_processed: None,
                        next_recurring_date: None,
                        status: TransactionStatus::Completed,
                        created_timestamp: now,
                    };

                    dsl::insert_into(transactions)
                        .values(&generated)
                        .execute(conn)
                        .await?;

                    let updated_account_count = dsl::update(accounts.find(source.account_id))
                        .set(
                            account_fields::balance
                                .eq(account_fields::balance + occurrence.balance_change),
                        )
                        .execute(conn)
                        .await?;

                    if updated_account_count == 0 {
                        return Err(DaoError::QueryFailure(diesel::result::Error::NotFound));
                    }

                    dsl::update(transactions.find(source.id))
                        .set((
                            transaction_fields::last_processed.eq(occurrence.last_processed),
                            transaction_fields::next_recurring_date
                                .eq(occurrence.next_recurring_date),
                        ))
                        .execute(conn)
                        .await?;

                    Ok(RecurringProcessOutcome::Processed {
                        generated_transaction_id: generated.id,
                        next_recurring_date: occurrence.next_recurring_date,
                    })
                })
            })
            .await
    }

    pub async fn sum_expenses_since(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Decimal, DaoError> {
        let mut conn = self.db_async_pool.get().await?;
        let total = transactions
            .select(dsl::sum(transaction_fields::amount))
            .filter(transaction_fields::user_id.eq(user_id))
            .filter(transaction_fields::account_id.eq(account_id))
            .filter(transaction_fields::transaction_type.eq(TransactionType::Expense))
            .filter(transaction_fields::date.ge(since))
            .first::<Option<Decimal>>(&mut conn)
            .await?;

        Ok(total.unwrap_or(Decimal::ZERO))
    }

    /// Transactions with `start <= date < end`, oldest first.
    pub async fn get_transactions_in_range(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, DaoError> {
        let mut conn = self.db_async_pool.get().await?;
        Ok(transactions
            .filter(transaction_fields::user_id.eq(user_id))
            .filter(transaction_fields::date.ge(start))
            .filter(transaction_fields::date.lt(end))
            .order(transaction_fields::date.asc())
            .load::<Transaction>(&mut conn)
            .await?)
    }
}
