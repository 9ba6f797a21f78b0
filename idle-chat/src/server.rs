use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::JoinSet,
};
use tracing::{debug, info, warn};

use crate::{
    cli::ServeArgs,
    hub::{Hub, HubOptions},
    session::{SessionConfig, SessionOutcome, run_session},
};

/// Matches the idle limit of the classic chat server this one is modelled on.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1000);

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub idle_timeout: Duration,
    /// Bound on each client's outbound queue. A client that falls this far
    /// behind is disconnected. `None` keeps queues unbounded.
    pub outbound_capacity: Option<usize>,
    /// Send a newcomer one `User <name> is online` line per present member.
    pub announce_roster: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            outbound_capacity: None,
            announce_roster: false,
        }
    }
}

impl ServerConfig {
    fn session(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: self.idle_timeout,
            outbound_capacity: self.outbound_capacity,
        }
    }

    fn hub(&self) -> HubOptions {
        HubOptions {
            announce_roster: self.announce_roster,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
}

impl Server {
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self { listener, config }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves, then tells every client
    /// the server is going away and stops all sessions.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, config } = self;
        let (hub, hub_task) = Hub::spawn(config.hub());
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &hub, config.session(), &mut sessions);
                }
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(err) = finished {
                        warn!(error = ?err, "session task failed");
                    }
                }
            }
        }

        info!(sessions = sessions.len(), "chat server shutting down");
        hub.shutdown();
        sessions.shutdown().await;
        if let Err(err) = hub_task.await {
            warn!(error = ?err, "hub task failed");
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

/// Binds the configured address and serves until ctrl-c.
pub async fn serve(args: &ServeArgs) -> Result<()> {
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let server = Server::new(listener, ServerConfig::from(args));
    let addr = server.local_addr()?;
    info!("chat server listening on {addr}");

    server
        .run_until_ctrl_c()
        .await
        .inspect_err(|err| warn!("chat server exited with error: {err:?}"))
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    hub: &Hub,
    config: SessionConfig,
    sessions: &mut JoinSet<()>,
) {
    match result {
        Ok((stream, peer)) => {
            debug!(%peer, "accepted connection");
            let hub = hub.clone();
            sessions.spawn(async move {
                let outcome = run_session(stream, hub, config).await;
                debug!(%peer, ?outcome, "connection finished");
                if let SessionOutcome::Rejected = outcome {
                    info!(%peer, "rejected connection with empty name");
                }
            });
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}
