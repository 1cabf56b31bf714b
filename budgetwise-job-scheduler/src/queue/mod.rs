mod worker;

pub use worker::RecurringTransactionWorker;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const PROCESS_RECURRING_TRANSACTION_EVENT: &str = "transaction.recurring.process";

/// Asks the worker to generate the next occurrence of one recurring transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecurringTransactionEvent {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
}

impl ProcessRecurringTransactionEvent {
    pub fn name(&self) -> &'static str {
        PROCESS_RECURRING_TRANSACTION_EVENT
    }
}

pub type EventSender = mpsc::Sender<ProcessRecurringTransactionEvent>;
pub type EventReceiver = mpsc::Receiver<ProcessRecurringTransactionEvent>;

/// Senders wait when the channel is full.
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_field_names() {
        let event = ProcessRecurringTransactionEvent {
            transaction_id: Uuid::nil(),
            user_id: Uuid::from_u128(u128::MAX),
        };

        let json = serde_json::to_value(event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "transactionId": "00000000-0000-0000-0000-000000000000",
                "userId": "ffffffff-ffff-ffff-ffff-ffffffffffff",
            })
        );

        let parsed: ProcessRecurringTransactionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.name(), "transaction.recurring.process");

        let missing_user: Result<ProcessRecurringTransactionEvent, _> =
            serde_json::from_str(r#"{"transactionId": "00000000-0000-0000-0000-000000000000"}"#);
        assert!(missing_user.is_err());
    }
}
