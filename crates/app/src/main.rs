mod audit;
mod problem;
mod registration;
mod retry_worker;
mod router;
mod telemetry;
mod verification;

use std::{net::SocketAddr, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::info;

use domain_verify_core::{DnsResolver, DomainClaimStore, EventSink, RetryPolicy};
use domain_verify_dns::{HickoryTxtResolver, ResolverSettings};
use domain_verify_storage::Database;
use domain_verify_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    info!(stage = "storage", url = %config.database_url, "database ready");

    let settings = &config.verification;
    let resolver: Arc<dyn DnsResolver> = Arc::new(HickoryTxtResolver::new(&ResolverSettings {
        nameserver: settings.dns_nameserver,
        timeout: settings.dns_timeout,
        ..ResolverSettings::default()
    })?);

    let clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> = Arc::new(Utc::now);
    let store: Arc<dyn DomainClaimStore> = Arc::new(database.claims());
    let events: Arc<dyn EventSink> = Arc::new(audit::AuditLog::new(database.audit(), clock.clone()));

    let coordinator = verification::VerificationCoordinator::new(
        store.clone(),
        resolver,
        events,
        clock.clone(),
        settings.dns_timeout,
    );
    let registrar = registration::ClaimRegistrar::new(store.clone(), clock.clone());
    let policy = RetryPolicy::new(
        settings.max_attempts,
        chrono::Duration::from_std(settings.min_interval)?,
    );

    retry_worker::RetryWorker::new(
        store.clone(),
        coordinator.clone(),
        policy,
        clock,
        settings.worker_tick,
        settings.batch_size,
    )
    .spawn();
    info!(
        stage = "scheduler",
        max_attempts = policy.max_attempts,
        tick_secs = settings.worker_tick.as_secs(),
        batch = settings.batch_size,
        "retry worker started"
    );

    let state = router::AppState::new(metrics, store, coordinator, registrar, policy);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
