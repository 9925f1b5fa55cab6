//! Line-delimited text relay.
//!
//! Every peer connects over TCP and sends UTF-8 lines; each line is fanned out
//! to every connected peer, the sender included. Each module focuses on a
//! concrete responsibility:
//!
//! - [`registry`] tracks the live set of peers behind a single lock.
//! - [`peer`] is the per-connection handle: liveness flag, bounded outbox and
//!   the writer task that owns the socket's write half.
//! - [`handler`] runs one connection's read loop, broadcasts each line and
//!   cleans up when the stream ends.
//! - [`announce`] recognises the legacy "has joined the chat." convention and
//!   builds the welcome line.
//! - [`relay`] accepts TCP connections and spawns a handler for each.
//! - [`config`] and [`cli`] carry runtime settings and the command line.
//! - [`client`] is a small terminal front-end for trying the relay out.
//!
//! Integration tests drive a real [`relay::Relay`] over loopback TCP.

pub mod announce;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod peer;
pub mod registry;
pub mod relay;
