use budgetwise_common::db::transaction::Dao as TransactionDao;
use budgetwise_common::db::user::Dao as UserDao;
use budgetwise_common::db::DbAsyncPool;
use budgetwise_common::email::templates::MonthlyReportMessage;
use budgetwise_common::email::{EmailMessage, EmailSender};
use budgetwise_common::insights::{self, InsightGenerator};
use budgetwise_common::models::user::User;
use budgetwise_common::reports::{MonthlyStats, ReportMonth};

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::jobs::{EmailAddresses, Job, JobError};

/// Sends every user a summary of the previous calendar month with generated insights.
pub struct GenerateMonthlyReportsJob {
    db_async_pool: DbAsyncPool,
    email_sender: Arc<EmailSender>,
    insight_generator: Arc<InsightGenerator>,
    insight_timeout: Duration,
    addresses: EmailAddresses,
    is_running: bool,
}

impl GenerateMonthlyReportsJob {
    pub fn new(
        db_async_pool: DbAsyncPool,
        email_sender: Arc<EmailSender>,
        insight_generator: Arc<InsightGenerator>,
        insight_timeout: Duration,
        addresses: EmailAddresses,
    ) -> Self {
        Self {
            db_async_pool,
            email_sender,
            insight_generator,
            insight_timeout,
            addresses,
            is_running: false,
        }
    }

    async fn send_all_reports(&self, month: ReportMonth) -> Result<(), JobError> {
        let all_users = UserDao::new(&self.db_async_pool).get_all_users().await?;

        let mut reports_sent = 0;

        for user in &all_users {
            match self.send_report(user, month).await {
                Ok(()) => reports_sent += 1,
                Err(e) => log::error!(
                    "Failed to send {} {} report to user {}: {}",
                    month.name(),
                    month.year(),
                    user.id,
                    e
                ),
            }
        }

        log::info!(
            "Sent {} of {} monthly reports for {} {}",
            reports_sent,
            all_users.len(),
            month.name(),
            month.year(),
        );

        Ok(())
    }

    async fn send_report(&self, user: &User, month: ReportMonth) -> Result<(), JobError> {
        let month_transactions = TransactionDao::new(&self.db_async_pool)
            .get_transactions_in_range(user.id, month.start(), month.end())
            .await?;

        let stats = MonthlyStats::from_transactions(&month_transactions);

        let insights = insights::insights_or_fallback(
            &**self.insight_generator,
            &stats,
            month.name(),
            self.insight_timeout,
        )
        .await;

        let subject = MonthlyReportMessage::subject(month.name());
        let message = EmailMessage {
            body: MonthlyReportMessage::generate(
                user.name.as_deref(),
                month.name(),
                &stats,
                &insights,
            ),
            subject: &subject,
            from: self.addresses.from.clone(),
            reply_to: self.addresses.reply_to.clone(),
            destination: &user.email,
            is_html: true,
        };

        self.email_sender.send(message).await?;

        Ok(())
    }
}

#[async_trait]
impl Job for GenerateMonthlyReportsJob {
    fn name(&self) -> &'static str {
        "Generate Monthly Reports"
    }

    fn is_ready(&self) -> bool {
        !self.is_running
    }

    async fn execute(&mut self) -> Result<(), JobError> {
        if self.is_running {
            return Err(JobError::NotReady);
        }

        self.is_running = true;
        let month = ReportMonth::containing(Utc::now()).previous();
        let result = self.send_all_reports(month).await;
        self.is_running = false;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use budgetwise_common::insights::{GenerateInsights, InsightError, FALLBACK_INSIGHTS};
    use budgetwise_common::models::transaction::TransactionType;

    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    use crate::env::testing;
    use crate::jobs::tests::{email_addresses, RecordingSender};

    #[derive(Clone, Default)]
    struct RecordingGenerator {
        requests: Arc<Mutex<Vec<(MonthlyStats, String)>>>,
        fail: bool,
    }

    #[async_trait]
    impl GenerateInsights for RecordingGenerator {
        async fn generate(
            &self,
            stats: &MonthlyStats,
            month_name: &str,
        ) -> Result<Vec<String>, InsightError> {
            self.requests
                .lock()
                .unwrap()
                .push((stats.clone(), String::from(month_name)));

            if self.fail {
                return Err(InsightError::UnexpectedStatus(503));
            }

            Ok(vec![String::from("Food spending & dining out dominated the month.")])
        }
    }

    fn job(sender: &RecordingSender, generator: &RecordingGenerator) -> GenerateMonthlyReportsJob {
        GenerateMonthlyReportsJob::new(
            testing::db_async_pool().clone(),
            Arc::new(Box::new(sender.clone()) as EmailSender),
            Arc::new(Box::new(generator.clone()) as InsightGenerator),
            Duration::from_secs(5),
            email_addresses(),
        )
    }

    async fn user_with_history(month: ReportMonth) -> User {
        let (user_id, _) = testing::create_user().await;
        let account = testing::create_default_account(user_id, dec!(0)).await;

        let mid_month = month.start() + ChronoDuration::days(10);

        testing::create_transaction(&account, TransactionType::Income, dec!(500), mid_month).await;
        testing::create_transaction(&account, TransactionType::Expense, dec!(100), mid_month).await;
        testing::create_transaction(&account, TransactionType::Expense, dec!(50), month.start())
            .await;

        // Outside the month on both sides
        testing::create_transaction(
            &account,
            TransactionType::Expense,
            dec!(999),
            month.start() - ChronoDuration::seconds(1),
        )
        .await;
        testing::create_transaction(&account, TransactionType::Expense, dec!(999), month.end())
            .await;

        UserDao::new(testing::db_async_pool())
            .get_user(user_id)
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore]
    async fn test_report_covers_only_requested_month() {
        let sender = RecordingSender::default();
        let generator = RecordingGenerator::default();
        let month = ReportMonth::containing(Utc::now()).previous();
        let user = user_with_history(month).await;

        job(&sender, &generator)
            .send_report(&user, month)
            .await
            .unwrap();

        let requests = generator.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);

        let (stats, month_name) = &requests[0];
        assert_eq!(month_name, month.name());
        assert_eq!(stats.total_income, dec!(500));
        assert_eq!(stats.total_expenses, dec!(150));
        assert_eq!(stats.transaction_count, 3);

        let emails = sender.sent_to(&user.email);
        assert_eq!(emails.len(), 1);
        assert_eq!(
            emails[0].subject,
            format!("Your Monthly Financial Report - {}", month.name())
        );
        assert!(emails[0].body.contains("$500.00"));
        assert!(emails[0].body.contains("$150.00"));
        assert!(emails[0].body.contains("$350.00"));
        assert!(emails[0]
            .body
            .contains("Food spending &amp; dining out dominated the month."));

        testing::delete_user(user.id).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_failed_insights_use_fallback() {
        let sender = RecordingSender::default();
        let generator = RecordingGenerator {
            fail: true,
            ..Default::default()
        };
        let month = ReportMonth::containing(Utc::now()).previous();
        let user = user_with_history(month).await;

        job(&sender, &generator)
            .send_report(&user, month)
            .await
            .unwrap();

        let emails = sender.sent_to(&user.email);
        assert_eq!(emails.len(), 1);

        for insight in FALLBACK_INSIGHTS {
            assert!(emails[0].body.contains(insight));
        }

        testing::delete_user(user.id).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_failed_email_does_not_stop_other_reports() {
        let sender = RecordingSender::default();
        let generator = RecordingGenerator::default();
        let month = ReportMonth::containing(Utc::now()).previous();

        let failing_user = user_with_history(month).await;
        let other_user = user_with_history(month).await;

        sender
            .failing_destinations
            .lock()
            .unwrap()
            .push(failing_user.email.clone());

        job(&sender, &generator)
            .send_all_reports(month)
            .await
            .unwrap();

        assert!(sender.sent_to(&failing_user.email).is_empty());
        assert_eq!(sender.sent_to(&other_user.email).len(), 1);

        testing::delete_user(failing_user.id).await;
        testing::delete_user(other_user.id).await;
    }
}
