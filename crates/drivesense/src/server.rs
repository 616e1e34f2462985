//! Process wiring for `drivesense serve`.
//!
//! [`Server::bind`] opens the configured backend, starts the snapshot store
//! and binds both endpoints. [`Server::run_until`] runs until the given
//! shutdown future resolves, then stops the endpoints, lets the store drain
//! its queue and reports the final counters.

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::api::{self, QueryFacade};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::listener::{Listener, ListenerStats};
use crate::storage::open_backend;
use crate::store::{SnapshotStore, StoreOptions, StoreStats};

/// Final counters from a server run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeReport {
    /// Datagram listener counters.
    pub listener: ListenerStats,
    /// Snapshot store counters.
    pub store: StoreStats,
}

/// A bound, not yet running, server.
#[derive(Debug)]
pub struct Server {
    store: SnapshotStore,
    store_task: JoinHandle<()>,
    listener: Listener,
    http: Option<(TcpListener, Router)>,
}

impl Server {
    /// Open storage, start the store and bind the endpoints.
    ///
    /// The HTTP endpoint is skipped when `http.enabled` is false or
    /// `with_http` is false.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened or either endpoint
    /// cannot be bound.
    pub async fn bind(config: &Config, with_http: bool) -> Result<Self> {
        let backend = open_backend(config)?;
        let (store, store_task) =
            SnapshotStore::start(backend, StoreOptions::from_config(config)).await;

        let listener = Listener::bind(
            config.listener_addr()?,
            config.listener.max_datagram_size,
            store.clone(),
        )
        .await?;

        let http = if with_http && config.http.enabled {
            let addr = config.http_addr()?;
            let tcp = TcpListener::bind(addr)
                .await
                .map_err(|source| Error::Bind {
                    kind: "http",
                    addr: addr.to_string(),
                    source,
                })?;
            let app = api::router(QueryFacade::new(store.clone()), &config.http.route);
            Some((tcp, app))
        } else {
            None
        };

        Ok(Self {
            store,
            store_task,
            listener,
            http,
        })
    }

    /// Address of the datagram socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn udp_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Address of the HTTP endpoint, if enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn http_addr(&self) -> Result<Option<SocketAddr>> {
        self.http
            .as_ref()
            .map(|(tcp, _)| tcp.local_addr().map_err(Error::from))
            .transpose()
    }

    /// A handle to the running store.
    #[must_use]
    pub fn store(&self) -> SnapshotStore {
        self.store.clone()
    }

    /// Serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if a serving task panicked.
    pub async fn run_until<F>(self, shutdown: F) -> Result<ServeReport>
    where
        F: Future<Output = ()>,
    {
        let (stop, stopped) = watch::channel(false);

        let listener_task = tokio::spawn(self.listener.run(stopped.clone()));

        let http_task = self.http.map(|(tcp, app)| {
            let mut stopped = stopped.clone();
            tokio::spawn(async move {
                if let Ok(addr) = tcp.local_addr() {
                    info!("Serving snapshot queries on http://{}", addr);
                }
                let result = axum::serve(tcp, app)
                    .with_graceful_shutdown(async move {
                        let _ = stopped.wait_for(|stop| *stop).await;
                    })
                    .await;
                if let Err(e) = result {
                    error!("HTTP server failed: {}", e);
                }
            })
        });

        shutdown.await;
        info!("Shutting down");
        let _ = stop.send(true);

        let listener = listener_task
            .await
            .map_err(|e| Error::internal(format!("listener task failed: {e}")))?;
        if let Some(task) = http_task {
            task.await
                .map_err(|e| Error::internal(format!("HTTP task failed: {e}")))?;
        }

        // Last handle: dropping it lets the actor finish the queue and stop.
        let store = self.store.stats();
        drop(self.store);
        self.store_task
            .await
            .map_err(|e| Error::internal(format!("store task failed: {e}")))?;

        Ok(ServeReport { listener, store })
    }
}

/// Bind and serve with `config` until Ctrl-C.
///
/// # Errors
///
/// Returns an error if binding fails or a serving task panicked.
pub async fn serve(config: &Config, with_http: bool) -> Result<ServeReport> {
    let server = Server::bind(config, with_http).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}
