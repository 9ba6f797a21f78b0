//! Line-based broadcast chat server with idle eviction.
//!
//! Clients connect over TCP, answer a name prompt, and from then on every
//! line they send is relayed to everyone as `<name>: <line>`. A client that
//! stays silent for the configured idle timeout is disconnected.
//!
//! - [`hub`] owns the registry of connected clients and fans out messages
//!   from a single task, reached only through its request channel.
//! - [`session`] drives one connection: name handshake, reading lines, and
//!   the idle timer.
//! - [`outbound`] is the per-client queue and the writer task that drains it.
//! - [`server`] accepts TCP connections and coordinates shutdown.
//! - [`cli`] and [`client`] are the command-line front end.

pub mod cli;
pub mod client;
pub mod hub;
pub mod outbound;
pub mod server;
pub mod session;
