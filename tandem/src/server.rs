//! Server lifecycle
//!
//! Starts the HTTP/WebSocket listener and the session sweeper, then waits
//! for SIGINT/SIGTERM and shuts both down.

use std::sync::Arc;
use tandem_core::service::SignalingService;
use tandem_core::Config;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct TandemServer {
    config: Arc<Config>,
    signaling: SignalingService,
}

impl TandemServer {
    pub fn new(config: Config) -> Self {
        let signaling = SignalingService::new(config.session.clone());
        Self {
            config: Arc::new(config),
            signaling,
        }
    }

    /// Start all servers and wait for shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let http_handle = self.start_http_server(shutdown_rx.clone()).await?;

        let sweeper = {
            let signaling = self.signaling.clone();
            tokio::spawn(async move { signaling.run_sweeper(shutdown_rx).await })
        };

        info!("All servers started successfully");

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        // Signal all components to shut down
        let _ = shutdown_tx.send(true);
        let _ = sweeper.await;

        let stats = self.signaling.registry().stats();
        info!(
            live_sessions = stats.live_sessions,
            live_participants = stats.live_participants,
            "Tandem server stopped"
        );

        Ok(())
    }

    /// Bind the listener and serve with graceful shutdown support
    async fn start_http_server(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let http_router =
            tandem_api::create_router(Arc::clone(&self.config), self.signaling.clone());

        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;

        info!("HTTP server listening on {}", http_address);

        let handle = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, http_router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
