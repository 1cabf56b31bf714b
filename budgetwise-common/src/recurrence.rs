use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecurringInterval {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurringInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurringInterval::Daily => "DAILY",
            RecurringInterval::Weekly => "WEEKLY",
            RecurringInterval::Monthly => "MONTHLY",
            RecurringInterval::Yearly => "YEARLY",
        }
    }
}

impl fmt::Display for RecurringInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecurringInterval {
    type Err = InvalidRecurringInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DAILY" => Ok(RecurringInterval::Daily),
            "WEEKLY" => Ok(RecurringInterval::Weekly),
            "MONTHLY" => Ok(RecurringInterval::Monthly),
            "YEARLY" => Ok(RecurringInterval::Yearly),
            other => Err(InvalidRecurringInterval(String::from(other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidRecurringInterval(pub String);

impl std::error::Error for InvalidRecurringInterval {}

impl fmt::Display for InvalidRecurringInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid recurring interval '{}'", self.0)
    }
}

/// Computes the next occurrence of a recurring transaction.
///
/// Month and year steps clamp to the last valid day of the target month, so Jan 31 plus one
/// month is Feb 28 (Feb 29 in a leap year) and Feb 29 plus one year is Feb 28. The time of day
/// is preserved. Returns `None` only if the result would fall outside the representable range.
pub fn next_recurring_date(
    start: DateTime<Utc>,
    interval: RecurringInterval,
) -> Option<DateTime<Utc>> {
    match interval {
        RecurringInterval::Daily => start.checked_add_days(Days::new(1)),
        RecurringInterval::Weekly => start.checked_add_days(Days::new(7)),
        RecurringInterval::Monthly => start.checked_add_months(Months::new(1)),
        RecurringInterval::Yearly => start.checked_add_months(Months::new(12)),
    }
}

/// A recurring transaction that has never been processed is always due. Otherwise it is due
/// once its next recurring date has arrived.
pub fn is_transaction_due(
    last_processed: Option<DateTime<Utc>>,
    next_recurring_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    if last_processed.is_none() {
        return true;
    }

    match next_recurring_date {
        Some(next) => next <= now,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, TimeZone};

    fn utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!("DAILY".parse(), Ok(RecurringInterval::Daily));
        assert_eq!("WEEKLY".parse(), Ok(RecurringInterval::Weekly));
        assert_eq!("MONTHLY".parse(), Ok(RecurringInterval::Monthly));
        assert_eq!("YEARLY".parse(), Ok(RecurringInterval::Yearly));

        assert_eq!(
            "monthly".parse::<RecurringInterval>(),
            Err(InvalidRecurringInterval(String::from("monthly")))
        );
        assert!("".parse::<RecurringInterval>().is_err());
        assert!("FORTNIGHTLY".parse::<RecurringInterval>().is_err());

        for interval in [
            RecurringInterval::Daily,
            RecurringInterval::Weekly,
            RecurringInterval::Monthly,
            RecurringInterval::Yearly,
        ] {
            assert_eq!(interval.as_str().parse(), Ok(interval));
        }
    }

    #[test]
    fn test_next_recurring_date_steps() {
        let start = utc(2025, 3, 14);

        assert_eq!(
            next_recurring_date(start, RecurringInterval::Daily),
            Some(utc(2025, 3, 15))
        );
        assert_eq!(
            next_recurring_date(start, RecurringInterval::Weekly),
            Some(utc(2025, 3, 21))
        );
        assert_eq!(
            next_recurring_date(start, RecurringInterval::Monthly),
            Some(utc(2025, 4, 14))
        );
        assert_eq!(
            next_recurring_date(start, RecurringInterval::Yearly),
            Some(utc(2026, 3, 14))
        );
    }

    #[test]
    fn test_next_recurring_date_crosses_boundaries() {
        assert_eq!(
            next_recurring_date(utc(2025, 12, 31), RecurringInterval::Daily),
            Some(utc(2026, 1, 1))
        );
        assert_eq!(
            next_recurring_date(utc(2024, 2, 26), RecurringInterval::Weekly),
            Some(utc(2024, 3, 4))
        );
        assert_eq!(
            next_recurring_date(utc(2025, 12, 15), RecurringInterval::Monthly),
            Some(utc(2026, 1, 15))
        );
    }

    #[test]
    fn test_monthly_rollover_clamps_to_end_of_month() {
        assert_eq!(
            next_recurring_date(utc(2025, 1, 31), RecurringInterval::Monthly),
            Some(utc(2025, 2, 28))
        );
        assert_eq!(
            next_recurring_date(utc(2024, 1, 31), RecurringInterval::Monthly),
            Some(utc(2024, 2, 29))
        );
        assert_eq!(
            next_recurring_date(utc(2025, 3, 31), RecurringInterval::Monthly),
            Some(utc(2025, 4, 30))
        );
        assert_eq!(
            next_recurring_date(utc(2024, 2, 29), RecurringInterval::Yearly),
            Some(utc(2025, 2, 28))
        );
    }

    #[test]
    fn test_next_recurring_date_is_always_later() {
        let intervals = [
            RecurringInterval::Daily,
            RecurringInterval::Weekly,
            RecurringInterval::Monthly,
            RecurringInterval::Yearly,
        ];

        let mut date = utc(2023, 1, 1);
        let end = utc(2025, 1, 1);

        while date < end {
            for interval in intervals {
                let next = next_recurring_date(date, interval).unwrap();
                assert!(next > date, "{interval} from {date} gave {next}");
            }

            date += Duration::hours(19);
        }
    }

    #[test]
    fn test_is_transaction_due() {
        let now = utc(2025, 6, 1);

        // Never processed means due, whatever the next date says
        assert!(is_transaction_due(None, None, now));
        assert!(is_transaction_due(None, Some(now + Duration::days(30)), now));

        let processed = Some(now - Duration::days(30));
        assert!(is_transaction_due(processed, Some(now), now));
        assert!(is_transaction_due(processed, Some(now - Duration::seconds(1)), now));
        assert!(!is_transaction_due(processed, Some(now + Duration::seconds(1)), now));
        assert!(!is_transaction_due(processed, None, now));
    }
}
