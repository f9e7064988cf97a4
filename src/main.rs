//! Dunning service binary.
//!
//! Wires the stores, the engine and the scheduler from `DUNNING__*`
//! configuration, then serves the webhook and admin routes until SIGINT
//! or SIGTERM.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dunning::adapters::auth::{JwtOperatorValidator, JwtValidatorConfig};
use dunning::adapters::email::{LoggingNotificationGateway, ResendNotificationGateway};
use dunning::adapters::http::{app_router, DunningAppState};
use dunning::adapters::memory::{
    InMemoryAuditLog, InMemoryDunningRecordStore, InMemorySubscriptionStore,
    InMemoryUserDirectory,
};
use dunning::adapters::postgres::{
    self, PostgresAuditLog, PostgresDunningRecordStore, PostgresSubscriptionStore,
    PostgresUserDirectory,
};
use dunning::adapters::SystemClock;
use dunning::application::handlers::HandleGatewayWebhookHandler;
use dunning::application::{DunningEngine, Scheduler};
use dunning::config::AppConfig;
use dunning::domain::gateway::WebhookVerifier;
use dunning::ports::{
    AuditLog, Clock, DunningRecordStore, NotificationGateway, SessionValidator, SubscriptionStore,
    UserDirectory,
};

struct Stores {
    records: Arc<dyn DunningRecordStore>,
    audit: Arc<dyn AuditLog>,
    subscriptions: Arc<dyn SubscriptionStore>,
    users: Arc<dyn UserDirectory>,
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.is_production() {
        builder.json().with_current_span(true).init();
    } else {
        builder.compact().init();
    }
}

async fn build_stores(config: &AppConfig) -> Result<Stores, Box<dyn std::error::Error>> {
    let lowest_role = config.dunning.lowest_role.clone();

    let Some(db) = &config.database else {
        tracing::warn!("No database configured; using in-memory stores");
        return Ok(Stores {
            records: Arc::new(InMemoryDunningRecordStore::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
            subscriptions: Arc::new(InMemorySubscriptionStore::new()),
            users: Arc::new(InMemoryUserDirectory::new(lowest_role)),
        });
    };

    let pool = postgres::connect(
        &db.url,
        db.max_connections,
        db.min_connections,
        db.acquire_timeout(),
    )
    .await?;

    if db.run_migrations {
        postgres::run_migrations(&pool).await?;
        info!("Database migrations applied");
    }

    Ok(Stores {
        records: Arc::new(PostgresDunningRecordStore::new(pool.clone())),
        audit: Arc::new(PostgresAuditLog::new(pool.clone())),
        subscriptions: Arc::new(PostgresSubscriptionStore::new(pool.clone())),
        users: Arc::new(PostgresUserDirectory::new(pool, lowest_role)),
    })
}

fn build_notifier(
    config: &AppConfig,
    users: Arc<dyn UserDirectory>,
) -> Result<Arc<dyn NotificationGateway>, Box<dyn std::error::Error>> {
    match config.email.resend_settings() {
        Some(settings) => {
            info!(from = %settings.from, "Email notifications via Resend");
            Ok(Arc::new(ResendNotificationGateway::new(settings, users)?))
        }
        None => {
            tracing::warn!("No Resend API key configured; notifications are logged only");
            Ok(Arc::new(LoggingNotificationGateway))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_tracing(&config);
    config.validate()?;

    info!(
        environment = ?config.server.environment,
        database = config.database.is_some(),
        "Starting dunning service"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stores = build_stores(&config).await?;
    let notifications = build_notifier(&config, stores.users.clone())?;

    let engine = Arc::new(DunningEngine::new(
        stores.records.clone(),
        stores.audit.clone(),
        notifications,
        stores.subscriptions.clone(),
        stores.users.clone(),
        clock.clone(),
        config.dunning.policy()?,
    ));

    let verifier = Arc::new(
        WebhookVerifier::new(config.webhook.signing_secret.clone())
            .with_tolerance_secs(config.webhook.tolerance_secs),
    );
    let webhook_handler = Arc::new(HandleGatewayWebhookHandler::new(
        verifier,
        engine.clone(),
        clock.clone(),
    ));

    let mut jwt_config = JwtValidatorConfig::new(
        config.auth.jwt_secret.clone(),
        config.auth.operator_role.clone(),
    );
    if let Some(issuer) = &config.auth.issuer {
        jwt_config = jwt_config.with_issuer(issuer.clone());
    }
    let validator: Arc<dyn SessionValidator> = Arc::new(JwtOperatorValidator::new(jwt_config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_task = if config.scheduler.enabled {
        let scheduler = Scheduler::with_config(
            engine.clone(),
            stores.records.clone(),
            clock.clone(),
            config.scheduler.to_runtime(),
        );
        Some(tokio::spawn(async move { scheduler.run(shutdown_rx).await }))
    } else {
        tracing::warn!("Scheduler disabled; records only advance on manual retry");
        None
    };

    let state = DunningAppState {
        engine,
        records: stores.records,
        audit: stores.audit,
        users: stores.users,
        webhook_handler,
    };
    let app = app_router(state, validator, config.server.request_timeout());

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = scheduler_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Scheduler task ended abnormally");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
