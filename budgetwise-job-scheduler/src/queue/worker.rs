use budgetwise_common::db::transaction::{Dao as TransactionDao, RecurringProcessOutcome};
use budgetwise_common::db::DaoError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use uuid::Uuid;

use crate::queue::{EventReceiver, ProcessRecurringTransactionEvent};
use crate::throttle::{CheckAndRecordResult, KeyedThrottle};

#[async_trait]
pub trait RecurringTransactionProcessor: Send + Sync + 'static {
    async fn process(
        &self,
        transaction_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RecurringProcessOutcome, DaoError>;
}

#[async_trait]
impl RecurringTransactionProcessor for TransactionDao {
    async fn process(
        &self,
        transaction_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RecurringProcessOutcome, DaoError> {
        self.process_recurring_transaction(transaction_id, user_id, now)
            .await
    }
}

/// Drains the recurring transaction queue. At most `max_concurrency` events are processed at
/// once and each user is limited by the throttle. Events over a user's limit wait for the
/// window to reopen rather than being dropped.
pub struct RecurringTransactionWorker<P> {
    receiver: EventReceiver,
    processor: Arc<P>,
    throttle: Arc<KeyedThrottle<Uuid>>,
    max_pending: u32,
    pending: Arc<Semaphore>,
    processing: Arc<Semaphore>,
}

impl<P: RecurringTransactionProcessor> RecurringTransactionWorker<P> {
    pub fn new(
        receiver: EventReceiver,
        processor: Arc<P>,
        throttle: KeyedThrottle<Uuid>,
        max_concurrency: usize,
        max_pending: u32,
    ) -> Self {
        Self {
            receiver,
            processor,
            throttle: Arc::new(throttle),
            max_pending,
            pending: Arc::new(Semaphore::new(max_pending as usize)),
            processing: Arc::new(Semaphore::new(max_concurrency)),
        }
    }

    /// Runs until `shutdown` resolves or every sender has been dropped.
    ///
    /// When the senders are dropped, every event already in the queue is still handled. When
    /// `shutdown` resolves, queued events are dropped and events still waiting on the throttle
    /// are cancelled. Only events already being processed run to completion. Dropped events
    /// remain due, so the next trigger run enqueues them again.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        log::info!(
            "Recurring transaction worker started (limit {} per user every {} seconds)",
            self.throttle.max_per_period(),
            self.throttle.period().as_secs(),
        );

        let (cancel_sender, _) = watch::channel(false);
        tokio::pin!(shutdown);

        let interrupted = loop {
            let event = tokio::select! {
                biased;
                _ = &mut shutdown => break true,
                event = self.receiver.recv() => match event {
                    Some(event) => event,
                    None => break false,
                },
            };

            let pending_permit = tokio::select! {
                biased;
                _ = &mut shutdown => break true,
                permit = Arc::clone(&self.pending).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break false,
                },
            };

            let processor = Arc::clone(&self.processor);
            let throttle = Arc::clone(&self.throttle);
            let processing = Arc::clone(&self.processing);
            let cancelled = cancel_sender.subscribe();

            tokio::spawn(async move {
                let _pending_permit = pending_permit;

                let processing_permit = tokio::select! {
                    biased;
                    _ = wait_for_cancel(cancelled) => {
                        log::debug!(
                            "Cancelled recurring transaction {} before processing",
                            event.transaction_id,
                        );
                        return;
                    }
                    permit = async {
                        wait_for_throttle(&throttle, event.user_id).await;
                        processing.acquire().await
                    } => permit,
                };

                let Ok(_processing_permit) = processing_permit else {
                    return;
                };

                handle_event(processor.as_ref(), event).await;
            });
        };

        if interrupted {
            self.receiver.close();

            let mut dropped_count = 0;
            while self.receiver.try_recv().is_ok() {
                dropped_count += 1;
            }

            log::info!(
                "Recurring transaction worker interrupted; dropped {dropped_count} queued events"
            );

            cancel_sender.send_replace(true);
        }

        if let Err(e) = self.pending.acquire_many(self.max_pending).await {
            log::error!("Failed to wait for in-flight recurring transactions: {e}");
        }

        log::info!("Recurring transaction worker stopped");
    }
}

async fn wait_for_cancel(mut cancelled: watch::Receiver<bool>) {
    loop {
        let is_cancelled = *cancelled.borrow_and_update();
        if is_cancelled {
            return;
        }

        if cancelled.changed().await.is_err() {
            // The worker outlives every task it spawns, so this is never reached
            std::future::pending::<()>().await;
        }
    }
}

async fn wait_for_throttle(throttle: &KeyedThrottle<Uuid>, user_id: Uuid) {
    loop {
        match throttle.check_and_record(user_id, Instant::now()).await {
            CheckAndRecordResult::Allowed => return,
            CheckAndRecordResult::Blocked { count, retry_after } => {
                log::debug!(
                    "User {user_id} is over the recurring transaction limit ({count} attempts); \
                     waiting {}ms",
                    retry_after.as_millis(),
                );

                tokio::time::sleep(retry_after.max(Duration::from_millis(1))).await;
            }
        }
    }
}

async fn handle_event<P: RecurringTransactionProcessor + ?Sized>(
    processor: &P,
    event: ProcessRecurringTransactionEvent,
) {
    let result = processor
        .process(event.transaction_id, event.user_id, Utc::now())
        .await;

    match result {
        Ok(RecurringProcessOutcome::Processed {
            generated_transaction_id,
            next_recurring_date,
        }) => log::info!(
            "Processed recurring transaction {} as {}; next occurrence at {}",
            event.transaction_id,
            generated_transaction_id,
            next_recurring_date,
        ),
        Ok(RecurringProcessOutcome::NotFound) => log::warn!(
            "Recurring transaction {} for user {} no longer exists; skipping",
            event.transaction_id,
            event.user_id,
        ),
        Ok(RecurringProcessOutcome::NotDue) => log::info!(
            "Recurring transaction {} is not due; skipping",
            event.transaction_id,
        ),
        Err(e) => log::error!(
            "Failed to process recurring transaction {} for user {}: {}",
            event.transaction_id,
            event.user_id,
            e,
        ),
    }
}
