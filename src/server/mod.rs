//! Server lifecycle: `Created -> Running -> Draining -> Closed`.
//!
//! The root cancellation token handed to [`Server::init`] is the root of all
//! downstream cancellation. A watcher task blocks on it (or on an explicit
//! [`Server::stop`]) and moves the server to `Draining`; the serve loop then
//! stops accepting, waits for in-flight requests up to the shutdown timeout,
//! and finally closes the count store.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::{create_router, AppState};
use crate::config::ServerConfig;
use crate::contracts::{CountStore, ServerError};
use crate::metrics::MetricsRegistry;
use crate::storage::FileCountStore;
use crate::upstream::HttpUpstream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Running,
    Draining,
    Closed,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type CounterApp = AppState<FileCountStore, HttpUpstream>;

/// A counting node bound to a root cancellation token.
pub struct Server {
    config: ServerConfig,
    store: Arc<FileCountStore>,
    app: Arc<CounterApp>,
    metrics: Arc<MetricsRegistry>,
    lifecycle: Arc<watch::Sender<ServerState>>,
    stop: CancellationToken,
    started: AtomicBool,
    local_addr: OnceLock<SocketAddr>,
}

impl Server {
    /// Opens the count store, wires the handler and starts the watcher.
    ///
    /// Returns a server in the `Running` state; the listener is bound by
    /// [`Server::run`]. Must be called inside a tokio runtime.
    pub fn init(config: ServerConfig, root: CancellationToken) -> Result<Self, ServerError> {
        let (lifecycle, _) = watch::channel(ServerState::Created);
        let lifecycle = Arc::new(lifecycle);
        let metrics = Arc::new(MetricsRegistry::new());

        let upstream = match config.upstream {
            Some(ref upstream_config) => {
                let upstream =
                    HttpUpstream::new(upstream_config, Arc::clone(&metrics.upstream))
                        .map_err(|e| ServerError::Config(e.to_string()))?;
                tracing::info!(upstream = %upstream_config.url, "Clustered mode enabled");
                Some(Arc::new(upstream))
            }
            None => {
                tracing::info!("No cluster configured, running local-only");
                None
            }
        };

        let store = Arc::new(FileCountStore::open(
            config.db_file.clone(),
            Arc::clone(&metrics.persistence),
        ));

        let identity = if config.instance_name.is_empty() {
            config.listen_addr.clone()
        } else {
            format!("{} ({})", config.instance_name, config.listen_addr)
        };

        let app = Arc::new(
            AppState::new(
                Arc::clone(&store),
                upstream,
                identity,
                Arc::clone(&metrics),
                root.clone(),
            )
            .with_lifecycle(lifecycle.subscribe()),
        );

        // Running must be visible before the watcher can observe a stop.
        lifecycle.send_replace(ServerState::Running);
        let stop = root.child_token();
        tokio::spawn(watch_for_stop(stop.clone(), Arc::clone(&lifecycle)));

        Ok(Self {
            config,
            store,
            app,
            metrics,
            lifecycle,
            stop,
            started: AtomicBool::new(false),
            local_addr: OnceLock::new(),
        })
    }

    pub fn state(&self) -> ServerState {
        *self.lifecycle.borrow()
    }

    /// Receiver that observes every lifecycle transition.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.lifecycle.subscribe()
    }

    /// Bound address, once serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn store(&self) -> &Arc<FileCountStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Starts draining without cancelling the root token, so in-flight
    /// upstream calls may still complete.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Binds the configured address and serves until closed.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = match TcpListener::bind(&self.config.listen_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                tracing::error!(
                    addr = %self.config.listen_addr,
                    error = %source,
                    "Failed to bind listener"
                );
                self.close().await;
                return Err(ServerError::ListenerBindFailed {
                    addr: self.config.listen_addr.clone(),
                    source,
                });
            }
        };
        self.run_with_listener(listener).await
    }

    /// Serves on an already bound listener until closed.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), ServerError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyStarted);
        }

        let addr = listener.local_addr()?;
        let _ = self.local_addr.set(addr);
        tracing::info!(%addr, "Starting HTTP server");

        let mut accepting = self.lifecycle.subscribe();
        let serve = axum::serve(listener, create_router(Arc::clone(&self.app)))
            .with_graceful_shutdown(async move {
                let _ = accepting
                    .wait_for(|state| *state != ServerState::Running)
                    .await;
            })
            .into_future();

        let mut draining = self.lifecycle.subscribe();
        let timeout = self.config.shutdown_timeout;
        let drain_deadline = async move {
            let _ = draining
                .wait_for(|state| *state != ServerState::Running)
                .await;
            tokio::time::sleep(timeout).await;
        };

        let result = tokio::select! {
            served = serve => served.map_err(ServerError::Serve),
            _ = drain_deadline => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs_f64(),
                    "Drain timed out, closing with requests still in flight"
                );
                Ok(())
            }
        };

        if let Err(ref e) = result {
            tracing::error!(error = %e, "Server error");
        }
        self.close().await;
        result
    }

    async fn close(&self) {
        // A bind failure closes straight from Running.
        self.lifecycle.send_if_modified(|state| {
            if *state == ServerState::Running {
                *state = ServerState::Draining;
                true
            } else {
                false
            }
        });
        self.store.shutdown().await;
        self.lifecycle.send_replace(ServerState::Closed);
        tracing::info!(count = self.store.current(), "Server closed");
    }
}

/// Maps a cancellation to the `Running -> Draining` transition.
async fn watch_for_stop(stop: CancellationToken, lifecycle: Arc<watch::Sender<ServerState>>) {
    stop.cancelled().await;
    let draining = lifecycle.send_if_modified(|state| {
        if matches!(*state, ServerState::Created | ServerState::Running) {
            *state = ServerState::Draining;
            true
        } else {
            false
        }
    });
    if draining {
        tracing::info!("Stopping server");
    }
}
