use budgetwise_common::db::transaction::Dao as TransactionDao;
use budgetwise_common::db::DbAsyncPool;

use async_trait::async_trait;
use chrono::Utc;

use crate::jobs::{Job, JobError};
use crate::queue::{EventSender, ProcessRecurringTransactionEvent};

/// Queues one processing event per due recurring transaction. The processing itself happens
/// in the recurring transaction worker.
pub struct TriggerRecurringTransactionsJob {
    db_async_pool: DbAsyncPool,
    event_sender: EventSender,
    is_running: bool,
}

impl TriggerRecurringTransactionsJob {
    pub fn new(db_async_pool: DbAsyncPool, event_sender: EventSender) -> Self {
        Self {
            db_async_pool,
            event_sender,
            is_running: false,
        }
    }

    async fn trigger_due_transactions(&self) -> Result<(), JobError> {
        let due_transactions = TransactionDao::new(&self.db_async_pool)
            .get_due_recurring_transactions(Utc::now())
            .await?;

        let due_count = due_transactions.len();

        for transaction in due_transactions {
            let event = ProcessRecurringTransactionEvent {
                transaction_id: transaction.id,
                user_id: transaction.user_id,
            };

            self.event_sender
                .send(event)
                .await
                .map_err(|_| JobError::QueueClosed)?;

            log::debug!("Queued {} for transaction {}", event.name(), event.transaction_id);
        }

        log::info!("Triggered {due_count} recurring transactions");

        Ok(())
    }
}

#[async_trait]
impl Job for TriggerRecurringTransactionsJob {
    fn name(&self) -> &'static str {
        "Trigger Recurring Transactions"
    }

    fn is_ready(&self) -> bool {
        !self.is_running
    }

    async fn execute(&mut self) -> Result<(), JobError> {
        if self.is_running {
            return Err(JobError::NotReady);
        }

        self.is_running = true;
        let result = self.trigger_due_transactions().await;
        self.is_running = false;

        result
    }
}
