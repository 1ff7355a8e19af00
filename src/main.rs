//! Party Lookup Relayer - asynchronous party resolution for payment switch participants
//!
//! This relayer sends and answers `/parties` lookups on behalf of a participant
//! and correlates the switch's asynchronous callbacks back to the transaction
//! that started them.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod cache;
mod config;
mod directory;
mod error;
mod lookup;
mod metrics;
mod party;
mod switch;
mod workflow;

use api::AppState;
use cache::{InMemoryContextCache, TransactionContextCache};
use config::Settings;
use directory::{ParticipantDirectory, StaticDirectory};
use lookup::{
    CallbackCorrelator, ChannelOutcomeSink, DispatchWorker, LookupInitiator, LookupReceiver,
    LookupTracker, ResponseDispatcher,
};
use metrics::MetricsServer;
use switch::{HttpSwitchClient, SwitchAddress, SwitchTransport};
use workflow::{QueuedWorkflowEngine, WorkflowEngine, WorkflowGateway, WorkflowWorker};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Party Lookup Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} ({} directory entries)",
        settings.relayer.instance_id,
        settings.participants.len()
    );

    // Ports and adapters
    let directory: Arc<dyn ParticipantDirectory> =
        Arc::new(StaticDirectory::from_entries(&settings.participants)?);
    let cache = Arc::new(InMemoryContextCache::new(settings.cache.ttl()));
    let transport: Arc<dyn SwitchTransport> =
        Arc::new(HttpSwitchClient::new(settings.switch.request_timeout())?);
    let address = SwitchAddress::new(&settings.switch.base_url)?;
    let tracker = Arc::new(LookupTracker::new());

    let (workflow_engine, workflow_rx) = QueuedWorkflowEngine::new(settings.workflow.queue_capacity);
    let workflow_engine: Arc<dyn WorkflowEngine> = Arc::new(workflow_engine);
    let gateway = settings
        .workflow
        .gateway_url
        .as_deref()
        .map(|url| WorkflowGateway::new(url, settings.switch.request_timeout()))
        .transpose()?;
    info!("Adapters initialized");

    // Lookup engine
    let dispatcher = Arc::new(ResponseDispatcher::new(
        transport.clone(),
        address.clone(),
        workflow_engine.clone(),
        settings.workflow.response_message.clone(),
        tracker.clone(),
    ));
    let (sink, dispatch_rx) = ChannelOutcomeSink::new(settings.relayer.dispatch_queue_capacity);
    let correlator = Arc::new(CallbackCorrelator::new(
        cache.clone(),
        Arc::new(sink),
        tracker.clone(),
        settings.cache.read_timeout(),
        settings.cache.consume_on_correlate,
    ));
    let initiator = Arc::new(LookupInitiator::new(
        directory.clone(),
        transport,
        address,
        tracker.clone(),
    ));
    let receiver = Arc::new(LookupReceiver::new(
        directory.clone(),
        workflow_engine,
        settings.workflow.party_lookup_flow.clone(),
    ));
    info!("Lookup engine initialized");

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(server)
    } else {
        None
    };

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            receiver,
            initiator,
            correlator,
            dispatcher: dispatcher.clone(),
            cache: cache.clone(),
            directory,
            tracker: tracker.clone(),
            fsp_id: settings.relayer.fsp_id.clone(),
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Start dispatch worker
    let mut dispatch_handle = tokio::spawn(async move {
        if let Err(e) = DispatchWorker::new(dispatch_rx, dispatcher).run().await {
            error!("Dispatch worker error: {}", e);
        }
    });

    // Start workflow worker
    let workflow_handle = tokio::spawn(async move {
        if let Err(e) = WorkflowWorker::new(workflow_rx, gateway).run().await {
            error!("Workflow worker error: {}", e);
        }
    });

    // Cache sweep loop
    let sweep_handle = tokio::spawn({
        let cache = cache.clone();
        let tracker = tracker.clone();
        let interval = settings.cache.sweep_interval_secs.max(1);
        let stale_after = settings.cache.ttl();
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                let purged = cache.purge_expired().await;
                let pruned = tracker.prune(stale_after);
                if purged > 0 || pruned > 0 {
                    info!(
                        "Sweep removed {} expired contexts and {} finished or stale lookups",
                        purged, pruned
                    );
                }
            }
        }
    });

    info!("Party Lookup Relayer is running as {}", settings.relayer.fsp_id);
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Stop accepting callbacks, then let queued dispatches finish
    api_handle.abort();
    let _ = api_handle.await;
    let mut handles = vec![workflow_handle, sweep_handle];
    let drain = settings.switch.request_timeout();
    if tokio::time::timeout(drain, &mut dispatch_handle).await.is_err() {
        warn!("Dispatches still in flight after {:?}, abandoning them", drain);
        handles.push(dispatch_handle);
    }

    // Abort background tasks and wait for them to unwind
    handles.extend(metrics_handle);
    for handle in &handles {
        handle.abort();
    }
    futures::future::join_all(handles).await;

    info!(
        "Party Lookup Relayer stopped ({} contexts still cached)",
        cache.entry_count()
    );
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,party_lookup_relayer=debug,hyper=warn,reqwest=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
