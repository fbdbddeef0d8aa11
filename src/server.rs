//! HTTP server and graceful shutdown.
//!
//! [`Server`] is thin transport glue: it accepts connections, lets hyper
//! speak HTTP/1.1 or HTTP/2, and hands every request to
//! [`App::dispatch`](crate::App::dispatch).
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or **Ctrl-C** the server:
//! 1. Stops calling `listener.accept()`, so no new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Stops background upkeep (rate-limiter sweeps) and returns from
//!    [`Server::serve`].
//!
//! Under Kubernetes, set `terminationGracePeriodSeconds` longer than the
//! configured request timeout.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::dispatcher::App;
use crate::error::ServerError;

/// The HTTP server.
#[derive(Debug)]
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust
    /// use gantry::Server;
    ///
    /// assert!(Server::bind("0.0.0.0:3000").is_ok());
    /// assert!(Server::bind("localhost").is_err());
    /// ```
    pub fn bind(addr: &str) -> Result<Self, ServerError> {
        let addr = addr
            .parse()
            .map_err(|source| ServerError::Addr { addr: addr.to_owned(), source })?;
        Ok(Self { addr })
    }

    /// Binds all interfaces on `port`.
    pub fn port(port: u16) -> Self {
        Self { addr: SocketAddr::from(([0, 0, 0, 0], port)) }
    }

    /// Accepts connections and dispatches them through `app`.
    ///
    /// Returns only after a full graceful shutdown.
    pub async fn serve(self, app: App) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.addr).await?;

        // Every connection task holds a clone of this Arc; the route table
        // and middleware chain are never copied.
        let app = Arc::new(app);

        // Rate-limiter sweeps run for as long as these handles live.
        let background = app.spawn_background();

        info!(addr = %self.addr, "gantry listening");

        // Owns one task per open connection, so shutdown can wait on all of
        // them.
        let mut tasks = JoinSet::new();

        // `select!` polls the same shutdown future on every iteration, so it
        // has to stay put in memory: pin it on the stack.
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Arms are polled top to bottom. Shutdown comes first so a
                // signal stops the accept loop even with connections queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                // A failed accept (e.g. EMFILE) is logged; the loop keeps
                // serving.
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tasks.spawn(connection(Arc::clone(&app), stream, peer));
                    }
                    Err(e) => error!("accept error: {e}"),
                },

                // Collect finished connection tasks as we go, or the JoinSet
                // grows for the lifetime of the server.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain: no new connections, but each open one finishes its requests.
        while tasks.join_next().await.is_some() {}

        // Stop the sweepers only after the last request has been served.
        drop(background);

        info!("gantry stopped");
        Ok(())
    }
}

// ── Connections ───────────────────────────────────────────────────────────────

/// Serves one connection until the peer closes it. hyper negotiates HTTP/1.1
/// or HTTP/2; every request on it goes through `app`.
async fn connection(app: Arc<App>, stream: TcpStream, peer: SocketAddr) {
    // Called once per request on this connection, not once per connection.
    let service = service_fn(move |req| {
        let app = Arc::clone(&app);
        // `dispatch` always yields a response, so hyper never sees an error.
        async move { Ok::<_, Infallible>(app.dispatch(req, Some(peer)).await) }
    });

    // `TokioIo` bridges tokio's IO traits to hyper's. The auto builder
    // speaks whichever of HTTP/1.1 and HTTP/2 the client picks.
    let served = ConnBuilder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), service)
        .await;

    // Resets and half-closed sockets are routine; keep them out of the
    // error log.
    if let Err(e) = served {
        debug!(%peer, "connection closed with error: {e}");
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C. A signal that cannot be
/// installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
