//! Foresight Gateway - live delivery surface of the suggestion engine
//!
//! ```text
//!   POST /triggers/:id ──► SuggestionPipeline ──► SuggestionStore
//!                                  │
//!                                  ▼
//!                           BroadcastHub ◄── heartbeat task
//!                             │       │
//!                        GET /events  GET /ws
//!                           (SSE)   (WebSocket)
//! ```
//!
//! The [`BroadcastHub`] is the engine's [`LiveDispatcher`](foresight_core::LiveDispatcher):
//! every batch, rate-limit notice, error and heartbeat the engine emits is
//! fanned out to all connected clients.

#![warn(rust_2018_idioms, clippy::all)]

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod hub;
pub mod server;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use heartbeat::spawn_heartbeat;
pub use hub::{BroadcastHub, Subscription};
pub use server::{Gateway, GatewayState};

/// Gateway version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default bind host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port
pub const DEFAULT_PORT: u16 = 18789;
