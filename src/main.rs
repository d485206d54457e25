use bsv_address_monitor::{
    api, backfill, config::Config, db, intake, membership::AddressSet, state::AppState, tracker,
    webhook::WebhookDispatcher, zmq,
};

use bsv_address_monitor::explorer::WocClient;
use bsv_address_monitor::node::SvNodeClient;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting bsv-address-monitor");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };
    info!(
        "Configuration loaded: network {:?}, archive threshold {}",
        config.network, config.archive_threshold
    );

    let db = match db::Db::connect(&config).await {
        Ok(db) => db,
        Err(e) => {
            error!("Store connection failed: {}", e);
            return Err(e.into());
        }
    };
    db::ensure_indexes(&db).await?;

    let membership = Arc::new(AddressSet::new());
    membership.load_from_store(&db).await?;

    let node: Arc<dyn bsv_address_monitor::node::NodeClient> =
        Arc::new(SvNodeClient::new(&config));
    let explorer: Arc<dyn bsv_address_monitor::explorer::ExplorerClient> =
        Arc::new(WocClient::new(&config));
    let confirmation_tracker = Arc::new(tracker::ConfirmationTracker::new(
        db.clone(),
        node.clone(),
        &config,
    ));

    let state = Arc::new(AppState {
        config: config.clone(),
        db: db.clone(),
        membership: membership.clone(),
        node,
        explorer,
        tracker: confirmation_tracker.clone(),
    });

    let shutdown = CancellationToken::new();

    // Webhook dispatcher drains the durable delivery queue.
    let dispatcher_handle = if config.enable_webhooks {
        let dispatcher = Arc::new(WebhookDispatcher::new(db.clone(), &config));
        let dispatcher_shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            dispatcher.run(dispatcher_shutdown).await;
        }))
    } else {
        warn!("Webhooks disabled, dispatcher not started");
        None
    };

    // Backfill any address registered before this process existed.
    let sweep_state = state.clone();
    tokio::spawn(async move {
        backfill::run_startup_sweep(sweep_state).await;
    });

    // Realtime intake from the node's rawtx publisher.
    let rawtx_state = state.clone();
    let rawtx_shutdown = shutdown.clone();
    let rawtx_endpoint = config.zmq_rawtx.clone();
    let rawtx_handle = tokio::spawn(async move {
        zmq::run_subscriber(rawtx_endpoint, "rawtx", rawtx_shutdown, move |bytes| {
            let state = rawtx_state.clone();
            async move {
                intake::handle_raw_tx(&state, &bytes).await;
            }
        })
        .await;
    });

    // Block-hash frames drive confirmation cycles.
    let block_tracker = confirmation_tracker.clone();
    let block_shutdown = shutdown.clone();
    let block_endpoint = config.zmq_hashblock.clone();
    let hashblock_handle = tokio::spawn(async move {
        zmq::run_subscriber(block_endpoint, "hashblock", block_shutdown, move |bytes| {
            let tracker = block_tracker.clone();
            async move {
                debug!("New block hash {}", hex::encode(&bytes));
                if let Err(e) = tracker.process_new_block().await {
                    error!("Confirmation cycle failed: {}", e);
                }
            }
        })
        .await;
    });

    // Store connection loss is fatal: repeated ping failures shut the
    // process down with a non-zero exit.
    let watchdog_db = db.clone();
    let watchdog_shutdown = shutdown.clone();
    let store_watchdog = tokio::spawn(async move {
        let mut failures = 0u32;
        let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = watchdog_shutdown.cancelled() => return false,
                _ = ticker.tick() => match watchdog_db.ping().await {
                    Ok(()) => failures = 0,
                    Err(e) => {
                        failures += 1;
                        warn!("Store ping failed ({} in a row): {}", failures, e);
                        if failures >= 3 {
                            error!("Store connection lost, shutting down");
                            return true;
                        }
                    }
                }
            }
        }
    });

    let app = api::create_router(state);
    let addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("REST surface listening on {}", addr);

    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                server_shutdown.cancelled().await;
            })
            .await
        {
            error!("Server error: {}", e);
        }
    });

    let store_lost = tokio::select! {
        _ = shutdown_signal() => false,
        lost = store_watchdog => lost.unwrap_or(false),
    };

    info!("Initiating graceful shutdown sequence");
    shutdown.cancel();

    let shutdown_timeout = tokio::time::Duration::from_secs(10);
    let mut handles = vec![
        ("rest server", server_handle),
        ("rawtx listener", rawtx_handle),
        ("hashblock listener", hashblock_handle),
    ];
    if let Some(handle) = dispatcher_handle {
        handles.push(("webhook dispatcher", handle));
    }

    for (name, handle) in handles {
        tokio::select! {
            _ = tokio::time::sleep(shutdown_timeout) => {
                warn!("Shutdown of {} timed out, forcing exit", name);
            }
            _ = handle => {
                info!("{} shut down", name);
            }
        }
    }

    if store_lost {
        return Err("store connection lost".into());
    }

    info!("All components shut down, exiting");
    Ok(())
}
