use budgetwise_common::db::job_registry::Dao as JobRegistryDao;
use budgetwise_common::db::DaoError;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use futures::future;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time;

use crate::jobs::Job;

/// When a job should run, evaluated in UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Schedule {
    Every(Duration),
    DailyAt(NaiveTime),
    /// `day` must be between 1 and 28 so that every month has it.
    MonthlyAt { day: u32, time: NaiveTime },
}

impl Schedule {
    /// The first scheduled instant strictly after `last_run`.
    pub fn next_run_after(&self, last_run: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Schedule::Every(frequency) => {
                let frequency = chrono::Duration::from_std(frequency).ok()?;
                last_run.checked_add_signed(frequency)
            }
            Schedule::DailyAt(time) => {
                let candidate = last_run.date_naive().and_time(time).and_utc();

                if candidate > last_run {
                    Some(candidate)
                } else {
                    candidate.checked_add_days(Days::new(1))
                }
            }
            Schedule::MonthlyAt { day, time } => {
                if !(1..=28).contains(&day) {
                    return None;
                }

                let date = last_run.date_naive();
                let candidate = NaiveDate::from_ymd_opt(date.year(), date.month(), day)?
                    .and_time(time)
                    .and_utc();

                if candidate > last_run {
                    Some(candidate)
                } else {
                    candidate.checked_add_months(Months::new(1))
                }
            }
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Every(frequency) => write!(f, "every {} seconds", frequency.as_secs()),
            Schedule::DailyAt(time) => write!(f, "daily at {time} UTC"),
            Schedule::MonthlyAt { day, time } => {
                write!(f, "monthly on day {day} at {time} UTC")
            }
        }
    }
}

/// Where the runner remembers when each job last ran, so restarts don't reset schedules.
#[async_trait]
pub trait RunRegistry: Send + Sync {
    async fn last_run(&self, job_name: &str) -> Result<Option<DateTime<Utc>>, DaoError>;
    async fn record_run(&self, job_name: &str, at: DateTime<Utc>) -> Result<(), DaoError>;
}

#[async_trait]
impl RunRegistry for JobRegistryDao {
    async fn last_run(&self, job_name: &str) -> Result<Option<DateTime<Utc>>, DaoError> {
        self.get_job_last_run_timestamp(job_name).await
    }

    async fn record_run(&self, job_name: &str, at: DateTime<Utc>) -> Result<(), DaoError> {
        self.set_job_last_run_timestamp(job_name, at).await
    }
}

struct JobContainer {
    job: Box<dyn Job>,
    schedule: Schedule,
    next_run_time: Option<DateTime<Utc>>,
}

pub struct JobRunner {
    jobs: Vec<JobContainer>,
    update_frequency: Duration,
    registry: Box<dyn RunRegistry>,
}

impl JobRunner {
    pub fn new(update_frequency: Duration, registry: Box<dyn RunRegistry>) -> Self {
        Self {
            jobs: Vec::new(),
            update_frequency,
            registry,
        }
    }

    /// A job that has never run is first scheduled relative to registration. A job whose
    /// scheduled time passed while the scheduler was down runs on the first tick.
    pub async fn register(&mut self, job: Box<dyn Job>, schedule: Schedule) {
        let job_name = job.name();

        let last_run_time = self.registry.last_run(job_name).await.unwrap_or_else(|e| {
            log::error!("Failed to get last run timestamp for job '{job_name}': {e}");
            None
        });

        let next_run_time = schedule.next_run_after(last_run_time.unwrap_or_else(Utc::now));

        match next_run_time {
            Some(next) => log::info!("Registered job \"{job_name}\" to run {schedule}, next at {next}"),
            None => log::error!(
                "Job \"{job_name}\" has an unsatisfiable schedule ({schedule}) and will not run"
            ),
        }

        self.jobs.push(JobContainer {
            job,
            schedule,
            next_run_time,
        });
    }

    /// Runs forever.
    pub async fn start(&mut self) {
        loop {
            self.run_due_jobs().await;
        }
    }

    async fn run_due_jobs(&mut self) {
        let before = Instant::now();
        let now = Utc::now();

        let mut job_names = Vec::with_capacity(self.jobs.len());
        let mut job_futures = Vec::with_capacity(self.jobs.len());

        for job_container in &mut self.jobs {
            let is_time_to_run = job_container
                .next_run_time
                .is_some_and(|next_run_time| next_run_time <= now);

            if !is_time_to_run || !job_container.job.is_ready() {
                continue;
            }

            job_container.next_run_time = job_container.schedule.next_run_after(now);

            let name = job_container.job.name();
            log::info!("Executing job \"{name}\"");
            job_names.push(name);
            job_futures.push(job_container.job.execute());
        }

        let record_run_futures = job_names
            .iter()
            .map(|name| self.registry.record_run(name, now));

        let (job_results, recording_results) = future::join(
            future::join_all(job_futures),
            future::join_all(record_run_futures),
        )
        .await;

        for (i, result) in job_results.into_iter().enumerate() {
            if let Err(e) = result {
                log::error!("Job \"{}\" failed: {}", job_names[i], e);
            } else {
                log::info!("Job \"{}\" finished successfully", job_names[i]);
            }
        }

        for (i, result) in recording_results.into_iter().enumerate() {
            if let Err(e) = result {
                log::error!("Error recording run of job \"{}\": {}", job_names[i], e);
            }
        }

        let delta = Instant::now() - before;

        if delta < self.update_frequency {
            time::sleep(self.update_frequency - delta).await;
        }
    }
}
