//! # Session Server Library
//!
//! This library provides the authoritative session server for the side-scrolling
//! multiplayer game. It accepts client connections over two channels, tracks who
//! is logged in, keeps the canonical roster of player movement states, and
//! fans events out so every client converges on the same view of the session.
//!
//! ## Core Responsibilities
//!
//! ### Session Authority
//! The server owns the mapping from transport connections to player identities.
//! A connection becomes a player only through a validated login, each
//! connection binds at most one identity, and the first accepted login wins
//! for the lifetime of the connection.
//!
//! ### Two-Channel Transport
//! Every client is reachable over two channels at once:
//! - A reliable, ordered channel for events that must not be lost
//!   (logins, join/leave announcements, late-joiner sync)
//! - An unreliable, unordered channel for high-frequency movement state,
//!   where a lost or stale datagram is simply superseded by the next one
//!
//! ### Connection Lifecycle
//! Handles the full path of a connection including:
//! - Accept, connection id assignment, and the register handshake
//! - Login screening and identity binding
//! - Late-joiner synchronization against the current roster
//! - Disconnect cleanup and departure announcements
//!
//! ## Architecture Design
//!
//! ### Shared-State Tasks
//! Each connection gets its own reader and writer task, and the two channel
//! listeners run as tasks of their own. All of them share one `Server` value
//! through an `Arc`; the registry, world, and peer table each sit behind
//! their own lock. There is no global state and no ambient singleton: every
//! handler receives the server instance it operates on.
//!
//! ### Rejection Policy
//! Invalid traffic is dropped without a reply. Login screening lives in a
//! single policy function, spoofed movement is discarded at the dispatcher,
//! and malformed frames terminate only the offending connection. Clients
//! learn nothing about why a message was ignored.
//!
//! ### Event Fan-Out
//! Join and leave events go to every other active connection on the reliable
//! channel. Movement updates are relayed on the unreliable channel to every
//! active connection except the sender, so no client is ever echoed its own
//! state.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! The connection-to-identity map:
//! - First-login-wins binding with typed rejection
//! - Identity lookup for ownership checks
//! - Roster queries used by broadcasts and late-joiner sync
//!
//! ### World Module (`world`)
//! The server-side view of the game world:
//! - Last-known position and velocity per player
//! - Spawn placement and roster snapshots for late joiners
//! - The immutable obstacle layout shared with clients
//!
//! ### Network Module (`network`)
//! Transport and dispatch:
//! - Reliable-channel accept loop and per-connection framing
//! - Datagram routing via the register handshake
//! - Message dispatch, login screening, and broadcast fan-out
//! - The tick loop, shutdown signalling, and bind-failure reporting
//!
//! ## Performance Characteristics
//!
//! The server ticks at a fixed rate (60Hz by default) and is sized for small
//! sessions, typically 2-16 players. Movement relays are fire-and-forget
//! datagrams; reliable sends go through per-connection queues so one slow
//! client never stalls the rest.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig::default();
//!
//!     // Bind both channels up front; a bind failure is fatal.
//!     let server = Arc::new(Server::bind(&config).await?);
//!
//!     // Run the main loop - this starts the channel listeners and drives
//!     // the tick clock until shutdown() is called.
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Security Considerations
//!
//! ### Identity Ownership
//! A client may only report movement for its own player. Movement claiming
//! any other identity is dropped at the dispatcher before it can touch the
//! world state.
//!
//! ### Silent Rejection
//! Malformed, duplicate, or out-of-protocol messages are logged server-side
//! and otherwise ignored, so probing clients get no feedback channel.

pub mod network;
pub mod registry;
pub mod world;
