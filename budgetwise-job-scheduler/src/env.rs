use chrono::NaiveTime;
use lettre::message::Mailbox;
use once_cell::sync::Lazy;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Semaphore;
use zeroize::Zeroize;

pub static CONF: Lazy<Config> = Lazy::new(|| Config::from_env().expect("Failed to load config"));

const DB_USERNAME_VAR: &str = "BUDGETWISE_DB_USERNAME";
const DB_PASSWORD_VAR: &str = "BUDGETWISE_DB_PASSWORD";
const DB_HOSTNAME_VAR: &str = "BUDGETWISE_DB_HOSTNAME";
const DB_PORT_VAR: &str = "BUDGETWISE_DB_PORT";
const DB_NAME_VAR: &str = "BUDGETWISE_DB_NAME";
const DB_MAX_CONNECTIONS_VAR: &str = "BUDGETWISE_DB_MAX_CONNECTIONS";
const DB_IDLE_TIMEOUT_SECS_VAR: &str = "BUDGETWISE_DB_IDLE_TIMEOUT_SECS";

const EMAIL_ENABLED_VAR: &str = "BUDGETWISE_EMAIL_ENABLED";
const EMAIL_FROM_ADDR: &str = "BUDGETWISE_EMAIL_FROM_ADDR";
const EMAIL_REPLY_TO_ADDR: &str = "BUDGETWISE_EMAIL_REPLY_TO_ADDR";
const SMTP_ADDRESS_VAR: &str = "BUDGETWISE_SMTP_ADDRESS";
const SMTP_USERNAME_VAR: &str = "BUDGETWISE_SMTP_USERNAME";
const SMTP_PASSWORD_VAR: &str = "BUDGETWISE_SMTP_PASSWORD";
const MAX_SMTP_CONNECTIONS_VAR: &str = "BUDGETWISE_MAX_SMTP_CONNECTIONS";
const SMTP_IDLE_TIMEOUT_SECS_VAR: &str = "BUDGETWISE_SMTP_IDLE_TIMEOUT_SECS";
const SMTP_TIMEOUT_SECS_VAR: &str = "BUDGETWISE_SMTP_TIMEOUT_SECS";

const INSIGHTS_ENABLED_VAR: &str = "BUDGETWISE_INSIGHTS_ENABLED";
const GEMINI_API_KEY_VAR: &str = "BUDGETWISE_GEMINI_API_KEY";
const GEMINI_API_BASE_URL_VAR: &str = "BUDGETWISE_GEMINI_API_BASE_URL";
const GEMINI_MODEL_VAR: &str = "BUDGETWISE_GEMINI_MODEL";
const INSIGHT_TIMEOUT_SECS_VAR: &str = "BUDGETWISE_INSIGHT_TIMEOUT_SECS";

const UPDATE_FREQUENCY_SECS_VAR: &str = "BUDGETWISE_UPDATE_FREQUENCY_SECS";
const WORKER_THREADS_VAR: &str = "BUDGETWISE_WORKER_THREADS";
const MAX_BLOCKING_THREADS_VAR: &str = "BUDGETWISE_MAX_BLOCKING_THREADS";

const BUDGET_ALERT_JOB_FREQUENCY_HOURS_VAR: &str = "BUDGETWISE_BUDGET_ALERT_JOB_FREQUENCY_HOURS";
const RECURRING_TRIGGER_TIME_VAR: &str = "BUDGETWISE_RECURRING_TRIGGER_TIME";
const MONTHLY_REPORT_DAY_VAR: &str = "BUDGETWISE_MONTHLY_REPORT_DAY";
const MONTHLY_REPORT_TIME_VAR: &str = "BUDGETWISE_MONTHLY_REPORT_TIME";

const RECURRING_QUEUE_CAPACITY_VAR: &str = "BUDGETWISE_RECURRING_QUEUE_CAPACITY";
const RECURRING_MAX_CONCURRENCY_VAR: &str = "BUDGETWISE_RECURRING_MAX_CONCURRENCY";
const RECURRING_MAX_PENDING_VAR: &str = "BUDGETWISE_RECURRING_MAX_PENDING";
const RECURRING_THROTTLE_MAX_PER_USER_VAR: &str = "BUDGETWISE_RECURRING_THROTTLE_MAX_PER_USER";
const RECURRING_THROTTLE_PERIOD_SECS_VAR: &str = "BUDGETWISE_RECURRING_THROTTLE_PERIOD_SECS";

const LOG_LEVEL_VAR: &str = "BUDGETWISE_LOG_LEVEL";

const DEFAULT_GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

#[derive(Zeroize)]
pub struct ConfigInner {
    pub db_username: String,
    pub db_password: String,
    pub db_hostname: String,
    pub db_port: u16,
    pub db_name: String,
    #[zeroize(skip)]
    pub db_max_connections: u32,
    #[zeroize(skip)]
    pub db_idle_timeout: Duration,

    #[zeroize(skip)]
    pub email_enabled: bool,
    #[zeroize(skip)]
    pub email_from_address: Mailbox,
    #[zeroize(skip)]
    pub email_reply_to_address: Mailbox,
    pub smtp_address: String,
    pub smtp_username: String,
    pub smtp_password: String,
    #[zeroize(skip)]
    pub max_smtp_connections: u32,
    #[zeroize(skip)]
    pub smtp_idle_timeout: Duration,
    #[zeroize(skip)]
    pub smtp_timeout: Duration,

    #[zeroize(skip)]
    pub insights_enabled: bool,
    pub gemini_api_key: String,
    #[zeroize(skip)]
    pub gemini_api_base_url: String,
    #[zeroize(skip)]
    pub gemini_model: String,
    #[zeroize(skip)]
    pub insight_timeout: Duration,

    #[zeroize(skip)]
    pub update_frequency: Duration,
    #[zeroize(skip)]
    pub worker_threads: usize,
    #[zeroize(skip)]
    pub max_blocking_threads: usize,

    #[zeroize(skip)]
    pub budget_alert_job_frequency: Duration,
    #[zeroize(skip)]
    pub recurring_trigger_time: NaiveTime,
    #[zeroize(skip)]
    pub monthly_report_day: u32,
    #[zeroize(skip)]
    pub monthly_report_time: NaiveTime,

    #[zeroize(skip)]
    pub recurring_queue_capacity: usize,
    #[zeroize(skip)]
    pub recurring_max_concurrency: usize,
    #[zeroize(skip)]
    pub recurring_max_pending: u32,
    #[zeroize(skip)]
    pub recurring_throttle_max_per_user: u32,
    #[zeroize(skip)]
    pub recurring_throttle_period: Duration,

    #[zeroize(skip)]
    pub log_level: String,
}

pub struct Config {
    inner: UnsafeCell<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        // Safe as long as `unsafe Config::zeroize()` hasn't been called
        unsafe { &*self.inner.get() }
    }
}

// Safe to be shared across threads as long as `unsafe Config::zeroize()` hasn't been called
unsafe impl Sync for Config {}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let email_from_address: Mailbox = env_var::<String>(EMAIL_FROM_ADDR)?
            .parse()
            .map_err(|_| ConfigError::InvalidVar(EMAIL_FROM_ADDR))?;
        let email_reply_to_address: Mailbox = env_var::<String>(EMAIL_REPLY_TO_ADDR)?
            .parse()
            .map_err(|_| ConfigError::InvalidVar(EMAIL_REPLY_TO_ADDR))?;

        let email_enabled = if cfg!(test) {
            false
        } else {
            env_var(EMAIL_ENABLED_VAR)?
        };

        // SMTP settings are only needed when mail is actually sent
        let (smtp_address, smtp_username, smtp_password) = if email_enabled {
            (
                env_var(SMTP_ADDRESS_VAR)?,
                env_var(SMTP_USERNAME_VAR)?,
                env_var(SMTP_PASSWORD_VAR)?,
            )
        } else {
            (
                env_var_or(SMTP_ADDRESS_VAR, String::new()),
                env_var_or(SMTP_USERNAME_VAR, String::new()),
                env_var_or(SMTP_PASSWORD_VAR, String::new()),
            )
        };

        let insights_enabled = if cfg!(test) {
            false
        } else {
            env_var_or(INSIGHTS_ENABLED_VAR, false)
        };

        let gemini_api_key = if insights_enabled {
            env_var(GEMINI_API_KEY_VAR)?
        } else {
            env_var_or(GEMINI_API_KEY_VAR, String::new())
        };

        let monthly_report_day = env_var_or(MONTHLY_REPORT_DAY_VAR, 1);
        if !(1..=28).contains(&monthly_report_day) {
            return Err(ConfigError::invalid(MONTHLY_REPORT_DAY_VAR));
        }

        let recurring_limits = RecurringLimits {
            queue_capacity: env_var_or(RECURRING_QUEUE_CAPACITY_VAR, 1024),
            max_concurrency: env_var_or(RECURRING_MAX_CONCURRENCY_VAR, 8),
            max_pending: env_var_or(RECURRING_MAX_PENDING_VAR, 4096),
            throttle_max_per_user: env_var_or(RECURRING_THROTTLE_MAX_PER_USER_VAR, 10),
            throttle_period: Duration::from_secs(env_var_or(
                RECURRING_THROTTLE_PERIOD_SECS_VAR,
                60,
            )),
        };
        recurring_limits.validate()?;

        let inner = ConfigInner {
            db_username: env_var(DB_USERNAME_VAR)?,
            db_password: env_var(DB_PASSWORD_VAR)?,
            db_hostname: env_var(DB_HOSTNAME_VAR)?,
            db_port: env_var(DB_PORT_VAR)?,
            db_name: env_var(DB_NAME_VAR)?,
            db_max_connections: env_var_or(DB_MAX_CONNECTIONS_VAR, 16),
            db_idle_timeout: Duration::from_secs(env_var_or(DB_IDLE_TIMEOUT_SECS_VAR, 30)),

            email_enabled,
            email_from_address,
            email_reply_to_address,
            smtp_address,
            smtp_username,
            smtp_password,
            max_smtp_connections: env_var_or(MAX_SMTP_CONNECTIONS_VAR, 8),
            smtp_idle_timeout: Duration::from_secs(env_var_or(SMTP_IDLE_TIMEOUT_SECS_VAR, 60)),
            smtp_timeout: Duration::from_secs(env_var_or(SMTP_TIMEOUT_SECS_VAR, 30)),

            insights_enabled,
            gemini_api_key,
            gemini_api_base_url: env_var_or(
                GEMINI_API_BASE_URL_VAR,
                String::from(DEFAULT_GEMINI_API_BASE_URL),
            ),
            gemini_model: env_var_or(GEMINI_MODEL_VAR, String::from(DEFAULT_GEMINI_MODEL)),
            insight_timeout: Duration::from_secs(env_var_or(INSIGHT_TIMEOUT_SECS_VAR, 30)),

            update_frequency: Duration::from_secs(env_var_or(UPDATE_FREQUENCY_SECS_VAR, 30)),
            worker_threads: env_var_or(WORKER_THREADS_VAR, num_cpus::get()),
            max_blocking_threads: env_var_or(MAX_BLOCKING_THREADS_VAR, 16),

            budget_alert_job_frequency: Duration::from_secs(
                env_var_or(BUDGET_ALERT_JOB_FREQUENCY_HOURS_VAR, 6) * 3600,
            ),
            recurring_trigger_time: env_var_or(RECURRING_TRIGGER_TIME_VAR, NaiveTime::MIN),
            monthly_report_day,
            monthly_report_time: env_var_or(MONTHLY_REPORT_TIME_VAR, NaiveTime::MIN),

            recurring_queue_capacity: recurring_limits.queue_capacity,
            recurring_max_concurrency: recurring_limits.max_concurrency,
            recurring_max_pending: recurring_limits.max_pending,
            recurring_throttle_max_per_user: recurring_limits.throttle_max_per_user,
            recurring_throttle_period: recurring_limits.throttle_period,

            log_level: env_var_or(LOG_LEVEL_VAR, String::from("info")),
        };

        Ok(Config {
            inner: UnsafeCell::new(inner),
        })
    }

    pub fn db_uri(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_username, self.db_password, self.db_hostname, self.db_port, self.db_name,
        )
    }

    /// # Safety
    ///
    /// Safe only if the Config isn't being used by other threads or across an async
    /// boundary. Generally, this should only be used at the end of the main function once
    /// all threads have been joined.
    pub unsafe fn zeroize(&self) {
        unsafe {
            (*self.inner.get()).zeroize();
        }
    }
}

const MAX_RECURRING_THROTTLE_PERIOD: Duration = Duration::from_secs(366 * 24 * 3600);

struct RecurringLimits {
    queue_capacity: usize,
    max_concurrency: usize,
    max_pending: u32,
    throttle_max_per_user: u32,
    throttle_period: Duration,
}

impl RecurringLimits {
    /// Zero limits would stall the worker forever and oversized ones panic when its
    /// semaphores are created.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 || self.queue_capacity > Semaphore::MAX_PERMITS {
            return Err(ConfigError::invalid(RECURRING_QUEUE_CAPACITY_VAR));
        }

        if self.max_concurrency == 0 || self.max_concurrency > Semaphore::MAX_PERMITS {
            return Err(ConfigError::invalid(RECURRING_MAX_CONCURRENCY_VAR));
        }

        if self.max_pending == 0 || self.max_pending as usize > Semaphore::MAX_PERMITS {
            return Err(ConfigError::invalid(RECURRING_MAX_PENDING_VAR));
        }

        if self.throttle_max_per_user == 0 {
            return Err(ConfigError::invalid(RECURRING_THROTTLE_MAX_PER_USER_VAR));
        }

        if self.throttle_period.is_zero() || self.throttle_period > MAX_RECURRING_THROTTLE_PERIOD {
            return Err(ConfigError::invalid(RECURRING_THROTTLE_PERIOD_SECS_VAR));
        }

        Ok(())
    }
}

fn env_var<T: FromStr>(key: &'static str) -> Result<T, ConfigError> {
    let var = std::env::var(key).map_err(|_| ConfigError::missing(key))?;
    let var: T = var.parse().map_err(|_| ConfigError::invalid(key))?;
    Ok(var)
}

fn env_var_or<T: FromStr>(key: &'static str, default: T) -> T {
    let Ok(var) = std::env::var(key) else {
        return default;
    };

    var.parse().unwrap_or(default)
}

#[derive(Clone, Copy, Debug)]
pub enum ConfigError {
    MissingVar(&'static str),
    InvalidVar(&'static str),
}

impl ConfigError {
    fn missing(var_name: &'static str) -> Self {
        Self::MissingVar(var_name)
    }

    fn invalid(var_name: &'static str) -> Self {
        Self::InvalidVar(var_name)
    }
}

impl std::error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingVar(key) => write!(f, "Missing environment variable '{}'", key),
            Self::InvalidVar(key) => write!(f, "Environment variable '{}' is invalid", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RecurringLimits {
        RecurringLimits {
            queue_capacity: 1024,
            max_concurrency: 8,
            max_pending: 4096,
            throttle_max_per_user: 10,
            throttle_period: Duration::from_secs(60),
        }
    }

    fn rejected_var(limits: RecurringLimits) -> &'static str {
        match limits.validate() {
            Err(ConfigError::InvalidVar(key)) => key,
            Err(ConfigError::MissingVar(key)) => panic!("Unexpected missing var {key}"),
            Ok(()) => panic!("Limits should have been rejected"),
        }
    }

    #[test]
    fn test_default_recurring_limits_are_valid() {
        assert!(limits().validate().is_ok());
    }

    #[test]
    fn test_zero_recurring_limits_are_rejected() {
        assert_eq!(
            rejected_var(RecurringLimits {
                queue_capacity: 0,
                ..limits()
            }),
            RECURRING_QUEUE_CAPACITY_VAR
        );
        assert_eq!(
            rejected_var(RecurringLimits {
                max_concurrency: 0,
                ..limits()
            }),
            RECURRING_MAX_CONCURRENCY_VAR
        );
        assert_eq!(
            rejected_var(RecurringLimits {
                max_pending: 0,
                ..limits()
            }),
            RECURRING_MAX_PENDING_VAR
        );
        assert_eq!(
            rejected_var(RecurringLimits {
                throttle_max_per_user: 0,
                ..limits()
            }),
            RECURRING_THROTTLE_MAX_PER_USER_VAR
        );
        assert_eq!(
            rejected_var(RecurringLimits {
                throttle_period: Duration::ZERO,
                ..limits()
            }),
            RECURRING_THROTTLE_PERIOD_SECS_VAR
        );
    }

    #[test]
    fn test_oversized_recurring_limits_are_rejected() {
        assert_eq!(
            rejected_var(RecurringLimits {
                max_concurrency: Semaphore::MAX_PERMITS + 1,
                ..limits()
            }),
            RECURRING_MAX_CONCURRENCY_VAR
        );
        assert_eq!(
            rejected_var(RecurringLimits {
                throttle_period: MAX_RECURRING_THROTTLE_PERIOD + Duration::from_secs(1),
                ..limits()
            }),
            RECURRING_THROTTLE_PERIOD_SECS_VAR
        );

        let widest = RecurringLimits {
            max_pending: u32::try_from(Semaphore::MAX_PERMITS).unwrap_or(u32::MAX),
            throttle_period: MAX_RECURRING_THROTTLE_PERIOD,
            ..limits()
        };
        assert!(widest.validate().is_ok());
    }
}
