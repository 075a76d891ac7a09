use crate::cli::ServeArgs;
use crate::infra::{AppState, InMemoryCertificateDesk};
use crate::routes::with_clearance_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use clearance::config::{AppConfig, DepartmentSource};
use clearance::error::AppError;
use clearance::telemetry;
use clearance::workflows::clearance::{
    run_finalization_worker, run_reconciliation, ChannelEventPublisher, ClearanceEvent,
    DepartmentRegistry, FinalizationQueue, FinalizationService, InMemoryClearanceRepository,
    KeyedLocks, WorkflowCoordinator,
};
use std::fs::File;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

const RECONCILIATION_BATCH: usize = 100;

pub(crate) fn load_registry(source: &DepartmentSource) -> Result<DepartmentRegistry, AppError> {
    let registry = match source {
        DepartmentSource::Inline(pairs) => DepartmentRegistry::from_pairs(pairs)?,
        DepartmentSource::Csv(path) => DepartmentRegistry::from_csv_reader(File::open(path)?)?,
    };
    Ok(registry)
}

async fn dispatch_events(mut receiver: UnboundedReceiver<ClearanceEvent>) {
    while let Some(event) = receiver.recv().await {
        info!(
            event = event.name(),
            application_id = %event.application_id(),
            "clearance notification dispatched"
        );
    }
}

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

    let registry = Arc::new(load_registry(&config.workflow.departments)?);
    let repository = Arc::new(InMemoryClearanceRepository::default());
    let (publisher, event_receiver) = ChannelEventPublisher::channel();
    let events = Arc::new(publisher);
    tokio::spawn(dispatch_events(event_receiver));

    let locks = Arc::new(KeyedLocks::new());
    let finalization = Arc::new(FinalizationService::new(
        repository.clone(),
        Arc::new(InMemoryCertificateDesk::default()),
        events.clone(),
        locks.clone(),
    ));
    let (queue, finalize_receiver) = FinalizationQueue::channel();
    tokio::spawn(run_finalization_worker(
        finalization.clone(),
        finalize_receiver,
        config.workflow.finalization.clone(),
    ));
    tokio::spawn(run_reconciliation(
        finalization,
        config.workflow.sweep_interval,
        RECONCILIATION_BATCH,
    ));

    let coordinator = Arc::new(
        WorkflowCoordinator::new(repository, events, registry.clone(), Arc::new(queue))
            .with_policy(config.workflow.reapplication.clone())
            .with_locks(locks),
    );

    let app = with_clearance_routes(coordinator)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        departments = registry.len(),
        "clearance coordinator ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
