//! WebSocket Root Chain Server
//!
//! Async WebSocket front end for the root chain.
//! Handles authentication, request routing, event fan-out and the periodic
//! finalization of due exits.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};
use uuid::Uuid;

use alloy_primitives::Address;

use crate::game::events::RootChainEvent;
use crate::network::auth::{AuthConfig, AuthError, Authenticator};
use crate::network::protocol::{
    AuthRequest, AuthResult, ClientMessage, Counters, ErrorCode, FinalizeSummary,
    ServerError, ServerMessage,
};
use crate::network::service::{RootChainService, ServiceError};
use crate::NATIVE_TOKEN;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle connections are dropped after this long.
    pub idle_timeout: Duration,
    /// How often due native-asset exits are finalized.
    pub finalize_interval: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8545)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            finalize_interval: Duration::from_secs(60),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, RootChainServerError> {
        let mut config = Self::default();

        if let Ok(bind) = std::env::var("ROOT_CHAIN_BIND") {
            config.bind_addr = bind
                .parse()
                .map_err(|e| RootChainServerError::InvalidConfig(format!("ROOT_CHAIN_BIND: {}", e)))?;
        }
        if let Ok(max) = std::env::var("ROOT_CHAIN_MAX_CONNECTIONS") {
            config.max_connections = max
                .parse()
                .map_err(|e| RootChainServerError::InvalidConfig(format!("ROOT_CHAIN_MAX_CONNECTIONS: {}", e)))?;
        }
        if let Ok(secs) = std::env::var("ROOT_CHAIN_FINALIZE_INTERVAL_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| RootChainServerError::InvalidConfig(format!("ROOT_CHAIN_FINALIZE_INTERVAL_SECS: {}", e)))?;
            config.finalize_interval = Duration::from_secs(secs.max(1));
        }

        Ok(config)
    }
}

/// Root chain server errors.
#[derive(Debug, thiserror::Error)]
pub enum RootChainServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Service error.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Configuration error.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Token verification could not be set up.
    #[error("Auth setup failed: {0}")]
    Auth(#[from] AuthError),
}

/// Connected client state.
struct ConnectedClient {
    /// Connection identifier.
    id: Uuid,
    /// Caller address (after auth).
    caller: Option<Address>,
    /// Connection time.
    connected_at: Instant,
    /// Last activity.
    last_activity: Instant,
    /// Message sender (for direct messaging to client).
    sender: mpsc::Sender<ServerMessage>,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The root chain server.
pub struct RootChainServer {
    /// Server configuration.
    config: ServerConfig,
    /// Token verifier; `None` in development mode.
    auth: Option<Arc<Authenticator>>,
    /// Shared root chain.
    service: Arc<RootChainService>,
    /// Connected clients.
    clients: Clients,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl RootChainServer {
    /// Create a new server in front of `service`.
    pub fn new(
        config: ServerConfig,
        auth: &AuthConfig,
        service: Arc<RootChainService>,
    ) -> Result<Self, RootChainServerError> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let auth = if auth.is_configured() {
            Some(Arc::new(Authenticator::new(auth)?))
        } else {
            warn!("No JWT key configured: clients may declare any address (development mode)");
            None
        };

        Ok(Self {
            config,
            auth,
            service,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        })
    }

    /// Bind and run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), RootChainServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RootChainServerError> {
        info!("Root chain server listening on {}", listener.local_addr()?);

        let finalize_service = self.service.clone();
        let finalize_interval = self.config.finalize_interval;
        let finalize_handle = tokio::spawn(async move {
            Self::run_finalize_loop(finalize_service, finalize_interval).await;
        });

        let events = self.service.subscribe();
        let event_clients = self.clients.clone();
        let event_handle = tokio::spawn(async move {
            Self::run_event_forwarder(events, event_clients).await;
        });

        let cleanup_clients = self.clients.clone();
        let idle_timeout = self.config.idle_timeout;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_clients, idle_timeout).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        finalize_handle.abort();
        event_handle.abort();
        cleanup_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let service = self.service.clone();
        let auth = self.auth.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    id: Uuid::new_v4(),
                    caller: None,
                    connected_at: Instant::now(),
                    last_activity: Instant::now(),
                    sender: msg_tx.clone(),
                });
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error(ServerError::new(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        ))).await;
                                        continue;
                                    }
                                };

                                // Update activity
                                {
                                    let mut clients = clients.write().await;
                                    if let Some(client) = clients.get_mut(&addr) {
                                        client.last_activity = Instant::now();
                                    }
                                }

                                let reply = Self::handle_client_message(
                                    addr,
                                    client_msg,
                                    &clients,
                                    &service,
                                    auth.as_deref(),
                                    &config,
                                ).await;
                                if msg_tx.send(reply).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(ServerMessage::Error(ServerError::new(
                                    ErrorCode::InvalidInput,
                                    "Binary frames are not supported, send JSON text",
                                ))).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Let queued replies drain before the writer goes away.
            drop(msg_tx);
            let removed = clients.write().await.remove(&addr);
            if let Err(e) = sender_task.await {
                debug!("Sender task for {} ended: {}", addr, e);
            }

            if let Some(client) = removed {
                info!(
                    "Client {} ({}) cleaned up after {:?}",
                    addr,
                    client.id,
                    client.connected_at.elapsed()
                );
            }
        });
    }

    /// Handle a client message and produce the direct reply.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        clients: &Clients,
        service: &RootChainService,
        auth: Option<&Authenticator>,
        config: &ServerConfig,
    ) -> ServerMessage {
        let caller = clients.read().await.get(&addr).and_then(|c| c.caller);
        let caller = match (msg.requires_auth(), caller) {
            (true, None) => {
                return ServerMessage::Error(ServerError::new(
                    ErrorCode::NotAuthenticated,
                    "Must authenticate first",
                ));
            }
            (_, caller) => caller.unwrap_or(Address::ZERO),
        };

        match msg {
            ClientMessage::Auth(request) => {
                Self::handle_auth(addr, request, clients, auth, config).await
            }
            ClientMessage::SubmitBlock { root } => {
                accepted(service.submit_block(caller, root).await)
            }
            ClientMessage::Deposit { amount } => {
                accepted(service.deposit(caller, amount).await)
            }
            ClientMessage::AddToken { token } => {
                accepted(service.add_token(caller, token).await)
            }
            ClientMessage::StartDepositExit { deposit_pos, token, amount } => {
                accepted(service.start_deposit_exit(caller, deposit_pos, token, amount).await)
            }
            ClientMessage::StartFeeExit { token, amount } => {
                accepted(service.start_fee_exit(caller, token, amount).await)
            }
            ClientMessage::StartExit(req) => {
                accepted(
                    service
                        .start_exit(caller, req.utxo_pos, &req.tx_bytes, &req.proof, &req.sigs)
                        .await,
                )
            }
            ClientMessage::ChallengeExit(req) => {
                accepted(
                    service
                        .challenge_exit(
                            caller,
                            req.challenging_pos,
                            req.exiting_input_index,
                            &req.tx_bytes,
                            &req.proof,
                            &req.sigs,
                            &req.confirmation_sig,
                        )
                        .await,
                )
            }
            ClientMessage::FinalizeExits { token } => match service.finalize_exits(token).await {
                Ok(outcome) => ServerMessage::Finalized(FinalizeSummary {
                    token,
                    processed: outcome.processed,
                    payouts: outcome.payouts,
                    more_due: outcome.more_due,
                }),
                Err(e) => ServerMessage::Error(ServerError::from(&e)),
            },
            ClientMessage::GetBlock { block_number } => ServerMessage::Block {
                block_number,
                block: service.block(block_number).await,
            },
            ClientMessage::GetExit { utxo_pos } => {
                let (exit, status) = service.exit(utxo_pos).await;
                ServerMessage::Exit { utxo_pos, exit, status }
            }
            ClientMessage::GetNextExit { token } => match service.next_exit(token).await {
                Ok(next) => ServerMessage::NextExit {
                    token,
                    utxo_pos: next.map(|(pos, _)| pos),
                    exitable_at: next.map(|(_, at)| at),
                },
                Err(e) => ServerMessage::Error(ServerError::from(&e)),
            },
            ClientMessage::GetCounters => ServerMessage::Counters(Counters {
                current_child_block: service.current_child_block().await,
                deposit_block: service.deposit_block().await,
                current_fee_exit: service.current_fee_exit().await,
            }),
            ClientMessage::Ping { timestamp } => ServerMessage::Pong {
                timestamp,
                server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
            },
        }
    }

    /// Handle authentication.
    async fn handle_auth(
        addr: SocketAddr,
        request: AuthRequest,
        clients: &Clients,
        auth: Option<&Authenticator>,
        config: &ServerConfig,
    ) -> ServerMessage {
        let result = match (auth, request.token.as_deref(), request.address) {
            (Some(auth), Some(token), _) => auth.caller(token),
            (Some(_), None, _) => Err(AuthError::MissingClaim("token".into())),
            (None, _, Some(address)) => {
                warn!("Development mode: {} declared itself as {}", addr, address);
                Ok(address)
            }
            (None, _, None) => Err(AuthError::MissingClaim("address".into())),
        };

        let address = match result {
            Ok(address) => address,
            Err(e) => {
                debug!("Authentication failed for {}: {}", addr, e);
                let code = match e {
                    AuthError::Expired => ErrorCode::TokenExpired,
                    AuthError::MissingClaim(_) => ErrorCode::AuthFailed,
                    _ => ErrorCode::InvalidToken,
                };
                return ServerMessage::Error(ServerError::new(code, e.to_string()));
            }
        };

        let mut clients = clients.write().await;
        let connection_id = clients.get_mut(&addr).map(|client| {
            client.caller = Some(address);
            client.id.to_string()
        });

        debug!("Client {} authenticated as {}", addr, address);
        ServerMessage::AuthResult(AuthResult {
            success: true,
            address: Some(address),
            connection_id,
            error: None,
            server_version: config.version.clone(),
        })
    }

    /// Periodically drain due native-asset exits.
    async fn run_finalize_loop(service: Arc<RootChainService>, every: Duration) {
        let mut interval = interval(every);

        loop {
            interval.tick().await;

            loop {
                match service.finalize_exits(NATIVE_TOKEN).await {
                    Ok(outcome) if outcome.more_due => continue,
                    Ok(_) => break,
                    Err(e) => {
                        error!("Finalize failed: {}", e);
                        break;
                    }
                }
            }
        }
    }

    /// Forward root-chain events to every connected client.
    async fn run_event_forwarder(mut events: broadcast::Receiver<RootChainEvent>, clients: Clients) {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event forwarder lagged, {} events skipped", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let senders: Vec<_> = {
                let clients = clients.read().await;
                clients.iter().map(|(addr, c)| (*addr, c.sender.clone())).collect()
            };

            for (addr, sender) in senders {
                if sender.try_send(ServerMessage::Event(event.clone())).is_err() {
                    debug!("Dropped {} event for slow client {}", event.name(), addr);
                }
            }
        }
    }

    /// Run cleanup loop.
    async fn run_cleanup_loop(clients: Clients, idle_timeout: Duration) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            let now = Instant::now();
            let to_remove: Vec<_> = {
                let clients = clients.read().await;
                clients.iter()
                    .filter(|(_, c)| now.duration_since(c.last_activity) > idle_timeout)
                    .map(|(addr, _)| *addr)
                    .collect()
            };

            for addr in to_remove {
                let mut clients = clients.write().await;
                if clients.remove(&addr).is_some() {
                    info!("Removed idle client {}", addr);
                }
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Shared root chain.
    pub fn service(&self) -> &Arc<RootChainService> {
        &self.service
    }
}

fn accepted(result: Result<RootChainEvent, ServiceError>) -> ServerMessage {
    match result {
        Ok(event) => ServerMessage::Accepted(event),
        Err(e) => ServerMessage::Error(ServerError::from(&e)),
    }
}
