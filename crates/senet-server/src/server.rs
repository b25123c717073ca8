//! TCP accept loop: admits connections and runs one [`Session`] per client.

use std::net::SocketAddr;
use std::sync::Arc;

use senet_config::Config;
use senet_match::Registry;
use senet_net::{
    ConnectionMap, ErrorCode, IdGenerator, Message, SocketConfig, configure_stream,
    create_listener, write_message,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::session::{Session, SessionSettings};

/// Configuration for [`GameServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to. Default: `0.0.0.0:65000`.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections. Default: 10.
    pub max_connections: usize,
    /// Number of match slots. Default: 5.
    pub max_matches: usize,
    /// Options applied to the listener and every accepted stream.
    pub socket: SocketConfig,
    /// Per-session timing and rules.
    pub session: SessionSettings,
}

impl ServerConfig {
    /// Build the server configuration from the loaded config file and CLI.
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr(),
            max_connections: config.network.max_connections,
            max_matches: config.matches.max_matches,
            socket: SocketConfig::default(),
            session: SessionSettings::from_config(config),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Senet server: a fixed match pool shared by every connection.
pub struct GameServer {
    config: ServerConfig,
    /// Active connection map (public for test inspection).
    pub connections: Arc<ConnectionMap>,
    /// Match pool (public for test inspection).
    pub registry: Arc<Registry>,
    settings: Arc<SessionSettings>,
    id_gen: Arc<IdGenerator>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GameServer {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            connections: Arc::new(ConnectionMap::new(config.max_connections)),
            registry: Arc::new(Registry::new(config.max_matches)),
            settings: Arc::new(config.session.clone()),
            id_gen: Arc::new(IdGenerator::new()),
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Bind to the configured address and run the accept loop.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = create_listener(self.config.bind_addr, &self.config.socket).await?;
        tracing::info!(
            "Server listening on {} ({} match slots, {} connections)",
            self.config.bind_addr,
            self.config.max_matches,
            self.config.max_connections
        );
        self.run_with_listener(listener).await
    }

    /// Run the accept loop with a pre-bound listener (useful for tests).
    pub async fn run_with_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.admit(stream, peer).await,
                        // Per-connection failures (e.g. the peer reset before
                        // accept returned) must not take the server down.
                        Err(e) => tracing::warn!("Accept failed: {e}"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Signal the server and every session to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn admit(&self, mut stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = configure_stream(&stream, &self.config.socket) {
            tracing::warn!("Could not configure socket for {peer}: {e}");
        }

        let id = self.id_gen.next_id();
        if let Err(e) = self.connections.insert(id, peer).await {
            tracing::warn!("{e}, rejecting {peer}");
            let full = Message::Error(ErrorCode::ServerFull);
            let _ = write_message(&mut stream, &full, self.settings.write_timeout).await;
            return;
        }

        tracing::info!("Accepted connection {id} from {peer}");

        let session = Session::new(
            id,
            peer,
            stream,
            Arc::clone(&self.registry),
            Arc::clone(&self.settings),
        );
        let connections = Arc::clone(&self.connections);
        let mut task_shutdown = self.shutdown_rx.clone();

        tokio::spawn(async move {
            tokio::select! {
                end = session.run() => {
                    tracing::debug!("{id}: {end:?}");
                }
                _ = task_shutdown.wait_for(|stop| *stop) => {
                    tracing::debug!("{id}: cancelled by shutdown");
                }
            }
            connections.remove(&id).await;
            tracing::info!("Connection {id} closed");
        });
    }
}
