use chrono::{DateTime, Utc};
use diesel::{AsExpression, FromSqlRow, Insertable, Queryable};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::account::Account;
use crate::models::text_enum_sql;
use crate::models::user::User;
use crate::recurrence::{self, InvalidRecurringInterval, RecurringInterval};
use crate::schema::transactions;

pub const RECURRING_DESCRIPTION_SUFFIX: &str = " (Recurring)";

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = diesel::sql_types::Text)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Income,
    Expense,
}

text_enum_sql!(TransactionType, "Unrecognized transaction type", {
    Income => "INCOME",
    Expense => "EXPENSE",
});

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = diesel::sql_types::Text)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

text_enum_sql!(TransactionStatus, "Unrecognized transaction status", {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Failed => "FAILED",
});

#[derive(
    Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Associations, Identifiable, Queryable,
)]
#[diesel(belongs_to(User, foreign_key = user_id))]
#[diesel(belongs_to(Account, foreign_key = account_id))]
#[diesel(table_name = transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_id: Uuid,

    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub description: Option<String>,
    pub category: String,
    pub date: DateTime<Utc>,

    pub is_recurring: bool,
    // Kept as raw text so that a malformed value only affects this transaction
    pub recurring_interval: Option<String>,
    pub last_processed: Option<DateTime<Utc>>,
    pub next_recurring_date: Option<DateTime<Utc>>,

    pub status: TransactionStatus,
    pub created_timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewTransaction<'a> {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_id: Uuid,

    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub description: Option<&'a str>,
    pub category: &'a str,
    pub date: DateTime<Utc>,

    pub is_recurring: bool,
    pub recurring_interval: Option<&'a str>,
    pub last_processed: Option<DateTime<Utc>>,
    pub next_recurring_date: Option<DateTime<Utc>>,

    pub status: TransactionStatus,
    pub created_timestamp: DateTime<Utc>,
}

/// The effects of processing one cycle of a recurring transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecurringOccurrence {
    pub description: String,
    pub balance_change: Decimal,
    pub last_processed: DateTime<Utc>,
    pub next_recurring_date: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecurrenceError {
    MissingInterval,
    InvalidInterval(InvalidRecurringInterval),
    DateOutOfRange,
}

impl std::error::Error for RecurrenceError {}

impl fmt::Display for RecurrenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecurrenceError::MissingInterval => {
                write!(f, "RecurrenceError: Recurring transaction has no interval")
            }
            RecurrenceError::InvalidInterval(e) => write!(f, "RecurrenceError: {e}"),
            RecurrenceError::DateOutOfRange => {
                write!(f, "RecurrenceError: Next recurring date is out of range")
            }
        }
    }
}

impl From<InvalidRecurringInterval> for RecurrenceError {
    fn from(e: InvalidRecurringInterval) -> Self {
        RecurrenceError::InvalidInterval(e)
    }
}

pub fn balance_change(transaction_type: TransactionType, amount: Decimal) -> Decimal {
    match transaction_type {
        TransactionType::Income => amount,
        TransactionType::Expense => -amount,
    }
}

impl Transaction {
    pub fn recurring_interval(&self) -> Result<RecurringInterval, RecurrenceError> {
        match &self.recurring_interval {
            Some(interval) => Ok(interval.parse()?),
            None => Err(RecurrenceError::MissingInterval),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        recurrence::is_transaction_due(self.last_processed, self.next_recurring_date, now)
    }

    pub fn balance_change(&self) -> Decimal {
        balance_change(self.transaction_type, self.amount)
    }

    /// Computes what processing this recurring transaction at `now` produces. Fails without
    /// producing anything if the interval is missing or malformed.
    pub fn next_occurrence(&self, now: DateTime<Utc>) -> Result<RecurringOccurrence, RecurrenceError> {
        let interval = self.recurring_interval()?;
        let next_recurring_date = recurrence::next_recurring_date(now, interval)
            .ok_or(RecurrenceError::DateOutOfRange)?;

        let description = format!(
            "{}{}",
            self.description.as_deref().unwrap_or_default(),
            RECURRING_DESCRIPTION_SUFFIX
        );

        Ok(RecurringOccurrence {
            description,
            balance_change: self.balance_change(),
            last_processed: now,
            next_recurring_date,
        })
    }
}
