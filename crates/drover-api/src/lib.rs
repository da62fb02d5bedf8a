//! Operator-facing control plane API.
//!
//! Bearer-authenticated HTTP surface for project, secret, task, and
//! directive management, worker heartbeat intake, and the project chat
//! WebSocket relay.

mod auth;
mod chat;
mod error;
mod handlers;
mod router;
mod server;
mod state;

pub use auth::{hash_token, seed_operator_token, token_valid};
pub use error::{ApiError, Result};
pub use router::build_router;
pub use server::ApiServer;
pub use state::ApiState;
