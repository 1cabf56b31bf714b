use budgetwise_common::db::job_registry::Dao as JobRegistryDao;
use budgetwise_common::db::transaction::Dao as TransactionDao;
use budgetwise_common::db::create_db_async_pool;
use budgetwise_common::email::senders::{MockSender, SmtpSender};
use budgetwise_common::email::EmailSender;
use budgetwise_common::insights::{
    FallbackInsightGenerator, GeminiInsightGenerator, InsightGenerator,
};

use flexi_logger::{Age, Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming, WriteMode};
use std::sync::Arc;
use tokio::sync::oneshot;
use zeroize::Zeroizing;

mod env;
mod jobs;
mod queue;
mod runner;
mod throttle;

use jobs::{
    CheckBudgetAlertsJob, EmailAddresses, GenerateMonthlyReportsJob,
    TriggerRecurringTransactionsJob,
};
use queue::RecurringTransactionWorker;
use runner::{JobRunner, Schedule};
use throttle::KeyedThrottle;

fn main() {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(env::CONF.worker_threads)
        .max_blocking_threads(env::CONF.max_blocking_threads)
        .enable_all()
        .build()
        .expect("Failed to launch asynchronous runtime")
        .block_on(async move {
            Logger::try_with_str(&env::CONF.log_level)
                .expect(
                    "Invalid log level. Options: ERROR, WARN, INFO, DEBUG, TRACE. \
                     Example: `info, my::critical::module=trace`",
                )
                .log_to_file(FileSpec::default().directory("./logs"))
                .rotate(
                    Criterion::Age(Age::Day),
                    Naming::Timestamps,
                    Cleanup::KeepLogAndCompressedFiles(60, 365),
                )
                .cleanup_in_background_thread(true)
                .duplicate_to_stdout(Duplicate::All)
                .write_mode(WriteMode::BufferAndFlush)
                .format(|writer, now, record| {
                    write!(
                        writer,
                        "{:5} | {} | {}:{} | {}",
                        record.level(),
                        now.format("%Y-%m-%dT%H:%M:%S%.6fZ"),
                        record.module_path().unwrap_or("<unknown>"),
                        record.line().unwrap_or(0),
                        record.args()
                    )
                })
                .use_utc()
                .start()
                .expect("Failed to start logger");

            let db_uri = Zeroizing::new(env::CONF.db_uri());

            let db_async_pool = create_db_async_pool(
                &db_uri,
                env::CONF.db_max_connections,
                env::CONF.db_idle_timeout,
            )
            .await
            .expect("Failed to create async DB pool");

            let email_sender: Arc<EmailSender> = if env::CONF.email_enabled {
                let smtp_sender = SmtpSender::with_credentials(
                    &env::CONF.smtp_username,
                    &env::CONF.smtp_password,
                    &env::CONF.smtp_address,
                    env::CONF.max_smtp_connections,
                    env::CONF.smtp_idle_timeout,
                    env::CONF.smtp_timeout,
                )
                .expect("Failed to create SMTP transport");

                match smtp_sender.test_connection().await {
                    Ok(true) => log::info!("Connected to SMTP relay"),
                    Ok(false) => log::warn!("SMTP relay did not accept the test connection"),
                    Err(e) => log::error!("Failed to connect to SMTP relay: {e}"),
                }

                Arc::new(Box::new(smtp_sender))
            } else {
                log::warn!("Email is disabled; messages will only be logged");
                Arc::new(Box::new(MockSender::new()))
            };

            let insight_generator: Arc<InsightGenerator> = if env::CONF.insights_enabled {
                let gemini = GeminiInsightGenerator::new(
                    &env::CONF.gemini_api_base_url,
                    &env::CONF.gemini_model,
                    &env::CONF.gemini_api_key,
                    env::CONF.insight_timeout,
                )
                .expect("Failed to create insight client");

                Arc::new(Box::new(gemini))
            } else {
                log::warn!("Insights are disabled; reports will carry the fallback insights");
                Arc::new(Box::new(FallbackInsightGenerator))
            };

            let addresses = EmailAddresses {
                from: env::CONF.email_from_address.clone(),
                reply_to: env::CONF.email_reply_to_address.clone(),
            };

            let (event_sender, event_receiver) = queue::channel(env::CONF.recurring_queue_capacity);

            let worker = RecurringTransactionWorker::new(
                event_receiver,
                Arc::new(TransactionDao::new(&db_async_pool)),
                KeyedThrottle::new(
                    env::CONF.recurring_throttle_max_per_user,
                    env::CONF.recurring_throttle_period,
                ),
                env::CONF.recurring_max_concurrency,
                env::CONF.recurring_max_pending,
            );
            let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();
            let worker_handle = tokio::spawn(worker.run(async move {
                let _ = shutdown_receiver.await;
            }));

            let mut job_runner = JobRunner::new(
                env::CONF.update_frequency,
                Box::new(JobRegistryDao::new(&db_async_pool)),
            );

            job_runner
                .register(
                    Box::new(CheckBudgetAlertsJob::new(
                        db_async_pool.clone(),
                        Arc::clone(&email_sender),
                        addresses.clone(),
                    )),
                    Schedule::Every(env::CONF.budget_alert_job_frequency),
                )
                .await;

            job_runner
                .register(
                    Box::new(TriggerRecurringTransactionsJob::new(
                        db_async_pool.clone(),
                        event_sender,
                    )),
                    Schedule::DailyAt(env::CONF.recurring_trigger_time),
                )
                .await;

            job_runner
                .register(
                    Box::new(GenerateMonthlyReportsJob::new(
                        db_async_pool.clone(),
                        Arc::clone(&email_sender),
                        insight_generator,
                        env::CONF.insight_timeout,
                        addresses,
                    )),
                    Schedule::MonthlyAt {
                        day: env::CONF.monthly_report_day,
                        time: env::CONF.monthly_report_time,
                    },
                )
                .await;

            tokio::select! {
                _ = job_runner.start() => {}
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        log::error!("Failed to listen for shutdown signal: {e}");
                    }
                }
            }

            log::info!("Shutting down");

            // The worker finishes events it is already processing and drops the rest
            let _ = shutdown_sender.send(());
            drop(job_runner);
            if let Err(e) = worker_handle.await {
                log::error!("Recurring transaction worker panicked: {e}");
            }
        });

    unsafe {
        env::CONF.zeroize();
    }
}
