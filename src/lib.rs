pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod presenter;
pub mod registry;
pub mod rpc;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::ClientConfig;
pub use error::{Result, SignalError};
pub use session::{EventQueue, EventSender, Session, SessionConfig, SessionEvent};

use crate::logger::LogPresenter;
use crate::peer::WebRtcEngine;
use crate::signaling::WebSocketTransport;
use std::sync::Arc;
use tracing::info;

/// Подключается к SFU и держит сессию до закрытия канала, SIGINT или SIGTERM
pub async fn run(config: ClientConfig) -> Result<()> {
    let (events, queue) = EventQueue::new();

    let engine = WebRtcEngine::new(&config.ice_servers, events.clone())
        .await?
        .with_sources(config.publish.clone());
    let engine = Arc::new(engine);
    info!("Connecting to SFU at {} as {:?}", config.sfu_url, config.role);
    let transport = WebSocketTransport::open(&config.sfu_url, events.clone()).await?;

    let shutdown = events.clone();
    tokio::spawn(async move {
        let signal = shutdown_signal().await;
        info!("{signal} received, leaving room");
        shutdown.close();
    });

    let session = Session::new(config.session(), transport, engine, LogPresenter::new(), queue);
    session.run().await?;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        },
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable: {e}");
            ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
