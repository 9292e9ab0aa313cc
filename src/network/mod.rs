//! Network Layer
//!
//! Async service and WebSocket server around the exit game.
//! This layer owns the clock and the locks; all chain rules live in `game/`.

pub mod auth;
pub mod protocol;
pub mod server;
pub mod service;

pub use auth::{AuthConfig, AuthError, Authenticator, CallerClaims};
pub use protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};
pub use server::{RootChainServer, RootChainServerError, ServerConfig};
pub use service::{PayoutBook, RootChainService, ServiceConfig, ServiceError};
