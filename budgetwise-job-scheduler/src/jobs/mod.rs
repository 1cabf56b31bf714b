mod check_budget_alerts;
mod generate_monthly_reports;
mod trigger_recurring_transactions;

pub use check_budget_alerts::CheckBudgetAlertsJob;
pub use generate_monthly_reports::GenerateMonthlyReportsJob;
pub use trigger_recurring_transactions::TriggerRecurringTransactionsJob;

use budgetwise_common::db::DaoError;
use budgetwise_common::email::EmailError;

use async_trait::async_trait;
use lettre::message::Mailbox;
use std::fmt;

#[derive(Debug)]
pub enum JobError {
    DaoFailure(Option<DaoError>),
    EmailFailure(EmailError),
    QueueClosed,
    NotReady,
}

impl std::error::Error for JobError {}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::DaoFailure(e) => {
                if let Some(inner_err) = e {
                    write!(f, "JobError: {inner_err}")
                } else {
                    write!(f, "JobError: DaoFailure")
                }
            }
            JobError::EmailFailure(e) => write!(f, "JobError: {e}"),
            JobError::QueueClosed => {
                write!(f, "JobError: Recurring transaction queue is closed")
            }
            JobError::NotReady => {
                write!(f, "JobError: Attempted execution before job was ready")
            }
        }
    }
}

impl From<DaoError> for JobError {
    fn from(e: DaoError) -> Self {
        JobError::DaoFailure(Some(e))
    }
}

impl From<EmailError> for JobError {
    fn from(e: EmailError) -> Self {
        JobError::EmailFailure(e)
    }
}

#[async_trait]
pub trait Job: Send {
    fn name(&self) -> &'static str;
    fn is_ready(&self) -> bool;
    async fn execute(&mut self) -> Result<(), JobError>;
}

#[derive(Clone, Debug)]
pub struct EmailAddresses {
    pub from: Mailbox,
    pub reply_to: Mailbox,
}
