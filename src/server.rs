use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::handler::ServerHandler;
use crate::session;

/// TCP front end: accepts connections and runs a session task for each.
///
/// ```no_run
/// use std::sync::Arc;
/// use iridium_stomp_server::{ServerHandler, ServerOptions, StompServer};
///
/// # async fn run() -> iridium_stomp_server::Result<()> {
/// let handler = Arc::new(ServerHandler::new(ServerOptions::default()));
/// let server = StompServer::bind("127.0.0.1:61613", handler).await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug)]
pub struct StompServer {
    listener: TcpListener,
    handler: Arc<ServerHandler>,
    shutdown: CancellationToken,
}

impl StompServer {
    pub async fn bind(addr: impl ToSocketAddrs, handler: Arc<ServerHandler>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handler,
            shutdown: CancellationToken::new(),
        })
    }

    /// Bind to the `host:port` configured in the handler's options.
    pub async fn bind_configured(handler: Arc<ServerHandler>) -> Result<Self> {
        let addr = handler.options().address();
        Self::bind(addr, handler).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handler(&self) -> &Arc<ServerHandler> {
        &self.handler
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting and close every live connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Accept connections until [`StompServer::shutdown`] is called, then
    /// wait for the live sessions to wind down.
    pub async fn run(&self) -> Result<()> {
        tracing::info!(address = ?self.listener.local_addr().ok(), "stomp server listening");
        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                        }
                        let handler = self.handler.clone();
                        let shutdown = self.shutdown.clone();
                        sessions.spawn(async move {
                            if let Err(e) = session::serve_with_shutdown(stream, handler, Some(peer), shutdown).await {
                                tracing::debug!(%peer, error = %e, "session ended with error");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
                // reap finished sessions so the set does not grow unbounded
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }
        tracing::info!(sessions = sessions.len(), "stomp server shutting down");
        while sessions.join_next().await.is_some() {}
        Ok(())
    }
}
