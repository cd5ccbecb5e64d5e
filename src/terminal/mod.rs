//! Browser terminal bridge.
//!
//! Upgrades an HTTP request to a WebSocket, opens an SSH shell with a pty on a
//! managed host and pumps bytes both ways while recording the session as an
//! asciinema v2 file. The submodules, leaves first:
//!
//! - `types`: hosts, credentials, sizes, audit records
//! - `error`: error taxonomy
//! - `config`: configuration resolution with environment variable support
//! - `auth`, `session`, `shell`, `client`: the SSH side
//! - `recorder`: asciinema writer and reader
//! - `storage`: collaborator traits, session registry, audit store
//! - `bridge`: per-connection WebSocket state machine
//! - `message`: human-readable texts
//! - `inventory`: JSON-file collaborators for the binary
//! - `http`: poem routes

pub mod auth;
pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod inventory;
pub mod message;
pub mod recorder;
pub mod session;
pub mod shell;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod ssh_e2e;

pub use error::TerminalError;
