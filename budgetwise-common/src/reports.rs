use chrono::{DateTime, Datelike, Days, Month, Months, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::transaction::{Transaction, TransactionType};

pub const BUDGET_ALERT_THRESHOLD_PERCENT: Decimal = Decimal::from_parts(80, 0, 0, false, 0);

/// A calendar month in UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportMonth {
    first_day: NaiveDate,
}

impl ReportMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|first_day| Self { first_day })
    }

    pub fn containing(instant: DateTime<Utc>) -> Self {
        let date = instant.date_naive();

        Self {
            first_day: date - Days::new(u64::from(date.day0())),
        }
    }

    pub fn previous(&self) -> Self {
        Self {
            first_day: self.first_day - Months::new(1),
        }
    }

    pub fn next(&self) -> Self {
        Self {
            first_day: self.first_day + Months::new(1),
        }
    }

    pub fn year(&self) -> i32 {
        self.first_day.year()
    }

    pub fn month(&self) -> u32 {
        self.first_day.month()
    }

    pub fn name(&self) -> &'static str {
        u8::try_from(self.month())
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .map(|m| m.name())
            .unwrap_or_default()
    }

    /// First instant of the month.
    pub fn start(&self) -> DateTime<Utc> {
        self.first_day.and_time(NaiveTime::MIN).and_utc()
    }

    /// First instant of the following month. Transactions in the month satisfy
    /// `start() <= date < end()`.
    pub fn end(&self) -> DateTime<Utc> {
        self.next().start()
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start() && instant < self.end()
    }
}

pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    ReportMonth::containing(now).start()
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyStats {
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub by_category: BTreeMap<String, Decimal>,
    pub transaction_count: usize,
}

impl MonthlyStats {
    /// Expenses count toward both the expense total and their category. Income only counts
    /// toward the income total.
    pub fn from_transactions<'a, I>(transactions: I) -> Self
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let mut stats = MonthlyStats::default();

        for transaction in transactions {
            match transaction.transaction_type {
                TransactionType::Expense => {
                    stats.total_expenses += transaction.amount;
                    *stats
                        .by_category
                        .entry(transaction.category.clone())
                        .or_insert(Decimal::ZERO) += transaction.amount;
                }
                TransactionType::Income => {
                    stats.total_income += transaction.amount;
                }
            }

            stats.transaction_count += 1;
        }

        stats
    }

    pub fn net_income(&self) -> Decimal {
        self.total_income - self.total_expenses
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BudgetUsage {
    pub total_expenses: Decimal,
    pub budget_amount: Decimal,
    pub percent_used: Decimal,
}

impl BudgetUsage {
    /// Returns `None` if the percentage does not fit in a `Decimal`.
    pub fn compute(total_expenses: Decimal, budget_amount: Decimal) -> Option<Self> {
        let percent_used = if budget_amount > Decimal::ZERO {
            total_expenses
                .checked_div(budget_amount)?
                .checked_mul(Decimal::ONE_HUNDRED)?
        } else {
            Decimal::ZERO
        };

        Some(Self {
            total_expenses,
            budget_amount,
            percent_used,
        })
    }
}

/// Alerts fire once per calendar month (UTC) after usage reaches the threshold.
pub fn should_send_budget_alert(
    percent_used: Decimal,
    last_alert_sent: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    if percent_used < BUDGET_ALERT_THRESHOLD_PERCENT {
        return false;
    }

    match last_alert_sent {
        Some(last) => last.year() != now.year() || last.month() != now.month(),
        None => true,
    }
}
