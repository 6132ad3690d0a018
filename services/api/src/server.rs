use crate::cli::ServeArgs;
use crate::infra::{build_collaborators, AppState};
use crate::routes::with_wizard_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use profile_wizard::config::AppConfig;
use profile_wizard::error::AppError;
use profile_wizard::telemetry;
use profile_wizard::wizard::SessionRegistry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let collaborators = build_collaborators(&config)?;
    let registry = Arc::new(
        SessionRegistry::new(
            collaborators,
            config.drafts.clone(),
            config.verification.clone(),
        )?
        .with_idle_timeout(config.server.session_idle_timeout),
    );
    let _idle_sweeper = SessionRegistry::spawn_idle_sweeper(&registry);

    let app = with_wizard_routes(registry)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        drafts = ?config.drafts.directory,
        "profile wizard service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
