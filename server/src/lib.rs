//! # Atari Go Server Library
//!
//! This library provides the authoritative server for a networked game of
//! Atari Go ("first capture wins"). Clients connect over TCP, exchange short
//! text commands, and the server owns the one shared board, enforces turn
//! order and announces the winner.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Rules
//! All game decisions are made here. A move is only ever applied by the
//! server, and after each accepted move the board is scanned for a group of
//! stones left without liberties. The team owning that group loses.
//!
//! ### Client Management
//! Handles the complete lifecycle of client connections including:
//! - Connection acceptance and identity assignment
//! - Login and display names
//! - Lobby membership and team assignment
//! - Disconnection handling and cleanup
//!
//! ### Reply Delivery
//! Replies and notifications are queued while commands are processed and
//! written out once per loop iteration, in the order they were produced.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! The server runs on one task. Each iteration waits for readiness across the
//! listener and all connections, services every ready connection, flushes the
//! outbound queue and then closes connections that are leaving. Because
//! nothing runs concurrently, no game state needs locking.
//!
//! ### Line Protocol
//! Commands are ASCII lines terminated by CRLF (`LOGIN`, `LOGOUT`, `JOIN`,
//! `LEAVE`, `MOVE row col`). Replies use the same framing (`OK`, `ERROR`,
//! `GOTJOIN`, `GOTLEAVE`, `GOTMOVE`, `GOTWINNER`). Parsing lives in the
//! `shared` crate so clients can reuse it.
//!
//! ## Module Organization
//!
//! - `ring_queue`: growable FIFO used for deferred messages and closes
//! - `board`: fixed-size grid of cells and neighbour lookups
//! - `game`: lobby, turn order and the capture check
//! - `client_manager`: registry of connected clients
//! - `connection`: transport traits, TCP and in-memory implementations
//! - `network`: the dispatcher event loop
//! - `error`: error types shared by the modules above
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // A 9x9 board accepting up to 64 connections
//!     let mut server = Server::bind("127.0.0.1:8080", ServerConfig::default()).await?;
//!
//!     // Serves clients until a fatal error occurs
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod client_manager;
pub mod connection;
pub mod error;
pub mod game;
pub mod network;
pub mod ring_queue;
