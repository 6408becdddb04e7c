//! Service wiring
//!
//! `Services` assembles the ledger, transfer, issuance and report services
//! over one database handle. `Runtime` starts the background schedulers:
//! the auto-submit job on the scheduler tick and the legacy consumer on its
//! poll interval.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use domain_compliance::{
    AutoSubmitJob, ComplianceDatabase, LegacyConsumer, LegacyInbox, NotificationSink, ReferenceDataPort,
    ReportWorkflow, Scheduler, SchedulerHandle, SummaryCalculator, TaskLock,
};
use domain_ledger::{BalanceCache, IssuanceService, LedgerDatabase, LedgerService, TransferService};

use crate::config::ServiceConfig;

/// Application services shared by every caller
#[derive(Clone)]
pub struct Services {
    pub ledger: LedgerService,
    pub transfers: Arc<TransferService>,
    pub issuances: Arc<IssuanceService>,
    pub reports: Arc<ReportWorkflow>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

impl Services {
    /// Builds the services over a database that serves both ledger and
    /// compliance units of work
    pub fn new<D>(
        database: Arc<D>,
        reference: Arc<dyn ReferenceDataPort>,
        notifications: Arc<dyn NotificationSink>,
        cache: Option<Arc<dyn BalanceCache>>,
        config: &ServiceConfig,
    ) -> Self
    where
        D: LedgerDatabase + ComplianceDatabase + 'static,
    {
        let ledger = match cache {
            Some(cache) => LedgerService::new().with_cache(cache),
            None => LedgerService::new(),
        };
        let ledger_db: Arc<dyn LedgerDatabase> = database.clone();
        let compliance_db: Arc<dyn ComplianceDatabase> = database;

        let transfers = Arc::new(TransferService::new(ledger_db.clone(), ledger.clone()));
        let issuances = Arc::new(IssuanceService::new(ledger_db, ledger.clone()));
        let reports = Arc::new(ReportWorkflow::new(
            compliance_db,
            reference,
            notifications,
            ledger.clone(),
            SummaryCalculator::new(config.calculator.clone()),
        ));

        Self {
            ledger,
            transfers,
            issuances,
            reports,
        }
    }
}

/// Running background work
pub struct Runtime {
    services: Services,
    jobs: SchedulerHandle,
    consumer: SchedulerHandle,
}

impl Runtime {
    /// Starts the auto-submit scheduler and the legacy consumer loop
    pub fn start(
        services: Services,
        lock: Arc<dyn TaskLock>,
        inbox: Arc<dyn LegacyInbox>,
        config: &ServiceConfig,
    ) -> Self {
        let auto_submit = AutoSubmitJob::new(services.reports.clone(), config.scheduler.auto_submit_after_days);
        let jobs = Scheduler::new(lock.clone(), Duration::from_secs(config.scheduler.tick_interval_secs))
            .register(Arc::new(auto_submit))
            .start();

        let consumer = LegacyConsumer::new(services.reports.clone(), inbox, config.consumer.clone());
        let consumer = Scheduler::new(lock, Duration::from_millis(config.consumer.poll_interval_ms))
            .register(Arc::new(consumer))
            .start();

        info!(
            auto_submit_after_days = config.scheduler.auto_submit_after_days,
            poll_interval_ms = config.consumer.poll_interval_ms,
            "background work started"
        );
        Self {
            services,
            jobs,
            consumer,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Stops both loops, letting in-flight runs finish
    pub async fn shutdown(self) {
        self.consumer.shutdown().await;
        self.jobs.shutdown().await;
        info!("background work stopped");
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
