//! # Session Client Library
//!
//! This library implements the client side of the session protocol: it
//! connects to the server on both channels, performs the register handshake
//! and login, mirrors the session roster from server events, and drives a
//! small autopilot player along the obstacle strip.
//!
//! ## Architecture Overview
//!
//! ### Two Channels, One Roster
//! Join and leave events arrive on the reliable channel; movement updates
//! arrive as datagrams. Both feed the same local roster, so the client's
//! view of the session converges on the server's no matter which channel
//! delivered an update first.
//!
//! ### Client-Owned Movement
//! The client simulates its own player locally and reports position and
//! velocity to the server. Nothing is predicted or reconciled: each player
//! is authoritative over its own movement, and remote players are drawn
//! wherever their latest update put them.
//!
//! ### Register Handshake
//! After the reliable connection opens, the server assigns a connection id.
//! The client echoes that id as its first datagram, which is how the server
//! learns where this client's movement channel lives.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! Local session state:
//! - The roster of remote players built from join/leave/movement events
//! - The locally simulated player and its strip-running physics
//! - The autopilot's hop decisions against the shared obstacle layout
//!
//! ### Network Module (`network`)
//! Connection handling:
//! - Reliable stream framing and the datagram socket
//! - Register, login, and movement reporting
//! - The main loop multiplexing both channels with the movement clock
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut client = Client::connect("127.0.0.1", 54555, 54777).await?;
//!
//!     // Registers, logs in, and runs the autopilot until the server
//!     // closes the connection.
//!     client.run("ninja").await?;
//!
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;
