use budgetwise_common::db::budget::{BudgetAlertCandidate, Dao as BudgetDao};
use budgetwise_common::db::transaction::Dao as TransactionDao;
use budgetwise_common::db::DbAsyncPool;
use budgetwise_common::email::templates::BudgetAlertMessage;
use budgetwise_common::email::{EmailMessage, EmailSender};
use budgetwise_common::reports::{self, BudgetUsage};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::jobs::{EmailAddresses, Job, JobError};

/// Emails users whose spending this month has crossed the alert threshold of their budget,
/// at most once per calendar month.
pub struct CheckBudgetAlertsJob {
    db_async_pool: DbAsyncPool,
    email_sender: Arc<EmailSender>,
    addresses: EmailAddresses,
    is_running: bool,
}

impl CheckBudgetAlertsJob {
    pub fn new(
        db_async_pool: DbAsyncPool,
        email_sender: Arc<EmailSender>,
        addresses: EmailAddresses,
    ) -> Self {
        Self {
            db_async_pool,
            email_sender,
            addresses,
            is_running: false,
        }
    }

    async fn check_all_budgets(&self, now: DateTime<Utc>) -> Result<(), JobError> {
        let candidates = BudgetDao::new(&self.db_async_pool)
            .get_all_budgets_for_alerts()
            .await?;

        let mut alerts_sent = 0;

        for candidate in &candidates {
            match self.check_budget(candidate, now).await {
                Ok(true) => alerts_sent += 1,
                Ok(false) => (),
                Err(e) => log::error!(
                    "Budget alert check failed for budget {}: {}",
                    candidate.budget.id,
                    e
                ),
            }
        }

        log::info!(
            "Checked {} budgets and sent {} alerts",
            candidates.len(),
            alerts_sent
        );

        Ok(())
    }

    /// Returns whether an alert was delivered. `last_alert_sent` is only updated after the
    /// email is accepted, so a failed send is retried on the next run.
    async fn check_budget(
        &self,
        candidate: &BudgetAlertCandidate,
        now: DateTime<Utc>,
    ) -> Result<bool, JobError> {
        let budget = &candidate.budget;

        let Some(account) = &candidate.default_account else {
            log::debug!("User {} has no default account; skipping budget", budget.user_id);
            return Ok(false);
        };

        if budget.amount <= Decimal::ZERO {
            log::warn!("Budget {} has a non-positive amount; skipping", budget.id);
            return Ok(false);
        }

        let total_expenses = TransactionDao::new(&self.db_async_pool)
            .sum_expenses_since(budget.user_id, account.id, reports::start_of_month(now))
            .await?;

        let Some(usage) = BudgetUsage::compute(total_expenses, budget.amount) else {
            log::warn!(
                "Usage of budget {} overflowed (expenses {}, amount {}); skipping",
                budget.id,
                total_expenses,
                budget.amount,
            );
            return Ok(false);
        };

        if !reports::should_send_budget_alert(usage.percent_used, budget.last_alert_sent, now) {
            return Ok(false);
        }

        let subject = BudgetAlertMessage::subject(&account.name);
        let message = EmailMessage {
            body: BudgetAlertMessage::generate(candidate.user_name.as_deref(), &usage),
            subject: &subject,
            from: self.addresses.from.clone(),
            reply_to: self.addresses.reply_to.clone(),
            destination: &candidate.user_email,
            is_html: true,
        };

        self.email_sender.send(message).await?;

        let recorded = BudgetDao::new(&self.db_async_pool)
            .record_alert_sent(budget.id, budget.last_alert_sent, now)
            .await?;

        if !recorded {
            log::warn!(
                "Alert time for budget {} was changed by another run before it was recorded",
                budget.id
            );
        }

        Ok(true)
    }
}

#[async_trait]
impl Job for CheckBudgetAlertsJob {
    fn name(&self) -> &'static str {
        "Check Budget Alerts"
    }

    fn is_ready(&self) -> bool {
        !self.is_running
    }

    async fn execute(&mut self) -> Result<(), JobError> {
        if self.is_running {
            return Err(JobError::NotReady);
        }

        self.is_running = true;
        let result = self.check_all_budgets(Utc::now()).await;
        self.is_running = false;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use budgetwise_common::db::budget;
    use budgetwise_common::models::transaction::TransactionType;

    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use crate::env::testing;
    use crate::jobs::tests::{email_addresses, RecordingSender};

    fn job(sender: &RecordingSender) -> CheckBudgetAlertsJob {
        CheckBudgetAlertsJob::new(
            testing::db_async_pool().clone(),
            Arc::new(Box::new(sender.clone()) as EmailSender),
            email_addresses(),
        )
    }

    async fn user_with_spending(budget_amount: Decimal, spent: Decimal) -> (Uuid, String) {
        let (user_id, email) = testing::create_user().await;
        let account = testing::create_default_account(user_id, dec!(5000)).await;

        budget::Dao::new(testing::db_async_pool())
            .upsert_budget(user_id, budget_amount)
            .await
            .unwrap();

        testing::create_transaction(&account, TransactionType::Expense, spent, Utc::now()).await;

        (user_id, email)
    }

    // Other tests share the database, so checks are run against this user's budget only
    async fn candidate_for(user_id: Uuid) -> BudgetAlertCandidate {
        BudgetDao::new(testing::db_async_pool())
            .get_all_budgets_for_alerts()
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.budget.user_id == user_id)
            .unwrap()
    }

    async fn last_alert_sent(user_id: Uuid) -> Option<DateTime<Utc>> {
        budget::Dao::new(testing::db_async_pool())
            .get_budget(user_id)
            .await
            .unwrap()
            .unwrap()
            .last_alert_sent
    }

    #[tokio::test]
    #[ignore]
    async fn test_alert_sent_once_per_month() {
        let sender = RecordingSender::default();
        let job = job(&sender);
        let (user_id, email) = user_with_spending(dec!(1000), dec!(850)).await;

        let sent = job
            .check_budget(&candidate_for(user_id).await, Utc::now())
            .await
            .unwrap();
        assert!(sent);

        let emails = sender.sent_to(&email);
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].subject, "Budget Alert for: Checking");
        assert!(emails[0].body.contains("85.0%"));
        assert!(last_alert_sent(user_id).await.is_some());

        let sent = job
            .check_budget(&candidate_for(user_id).await, Utc::now())
            .await
            .unwrap();
        assert!(!sent);
        assert_eq!(sender.sent_to(&email).len(), 1);

        testing::delete_user(user_id).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_no_alert_below_threshold() {
        let sender = RecordingSender::default();
        let (user_id, email) = user_with_spending(dec!(1000), dec!(500)).await;

        let sent = job(&sender)
            .check_budget(&candidate_for(user_id).await, Utc::now())
            .await
            .unwrap();

        assert!(!sent);
        assert!(sender.sent_to(&email).is_empty());
        assert!(last_alert_sent(user_id).await.is_none());

        testing::delete_user(user_id).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_failed_send_is_not_recorded() {
        let sender = RecordingSender::default();
        let (user_id, email) = user_with_spending(dec!(100), dec!(95)).await;

        sender
            .failing_destinations
            .lock()
            .unwrap()
            .push(email.clone());

        let result = job(&sender)
            .check_budget(&candidate_for(user_id).await, Utc::now())
            .await;

        assert!(matches!(result, Err(JobError::EmailFailure(_))));
        assert!(sender.sent_to(&email).is_empty());
        assert!(last_alert_sent(user_id).await.is_none());

        testing::delete_user(user_id).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_execute_survives_failing_budgets() {
        let sender = RecordingSender::default();
        let (user_id, email) = user_with_spending(dec!(100), dec!(95)).await;

        sender
            .failing_destinations
            .lock()
            .unwrap()
            .push(email.clone());

        let mut job = job(&sender);
        job.execute().await.unwrap();
        assert!(job.is_ready());

        testing::delete_user(user_id).await;
    }
}
