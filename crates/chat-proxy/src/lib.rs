//! WebSocket relay for the ClawChat web UI.
//!
//! The browser talks to this crate's HTTP server; `/ws` is upgraded and
//! relayed frame-for-frame to the local chat gateway. On the way out, the
//! credential in the gateway `connect` request is replaced with the one the
//! relay was configured with, so the web UI never needs to know the real
//! token.
//!
//! # Architecture
//!
//! ```text
//! Browser  <--WS-->  chat-proxy  <--WS-->  Gateway
//!                       |
//!               [token rewrite on
//!                connect requests]
//! ```
//!
//! Each upgraded connection becomes a [`RelaySession`] that dials the
//! gateway and runs two forwarding loops, one per direction, tied together by
//! a shared cancellation token. All other paths serve the bundled web UI.

pub mod assets;
pub mod listener;
pub mod origin;
pub mod relay;
pub mod rewrite;

// Re-export the primary public types at the crate root for convenience.
pub use assets::AssetError;
pub use listener::{Proxy, ProxyConfig};
pub use relay::{Direction, Frame, RelayError, RelaySession, Termination};
pub use rewrite::rewrite_connect_token;
