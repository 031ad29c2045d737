//! TCP listener for the DEPOT server.
//!
//! [`DepotServer`] owns the socket, the connection cap, and the per-command
//! read timeout; [`serve`](DepotServer::serve) drives the command loop of
//! `server::connection` on every accepted client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::server::connection::handle_connection;
use crate::storage::FileStore;
use crate::{DepotError, Result};

/// Accepting side of the DEPOT protocol.
pub struct DepotServer {
    listener: TcpListener,
    slots: Arc<Semaphore>,
    read_timeout: Duration,
}

impl DepotServer {
    /// Bind to the configured address.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("DEPOT server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of connection slots currently free.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Accept clients forever, running the command loop against `store` on
    /// each connection.
    ///
    /// A slot must be free before the next client is accepted, so at most
    /// `max_connections` clients are served at once; excess clients queue in
    /// the accept backlog until a slot opens.
    pub async fn serve(self, store: Arc<FileStore>) -> Result<()> {
        loop {
            let permit = self
                .slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| DepotError::Io(std::io::Error::other("listener shut down")))?;

            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("failed to accept connection: {}", e);
                    continue;
                }
            };

            let store = Arc::clone(&store);
            let read_timeout = self.read_timeout;
            tokio::spawn(async move {
                handle_connection(store, stream, addr, read_timeout).await;
                drop(permit);
            });
        }
    }
}
