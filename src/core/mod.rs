//! Core proxy module
//!
//! This module contains the per-connection pipeline:
//! - Wire protocol parsing (handshake, status, login)
//! - Admission gate and access lists
//! - Connection context and online counter
//! - Transfer strategies and the bidirectional relay
//! - Capability probing for strategy selection

pub mod access;
mod connection;
pub mod hooks;
pub mod ip_filter;
pub mod minecraft;
pub mod protocol;
mod relay;
mod server;
pub mod splice;
pub mod striped;

pub use access::{AccessLists, AccessMode, AccessPolicy, ListStore, Verdict};
pub use connection::{ConnContext, ConnectionId, OnlineCounter, OnlineGuard};
pub use protocol::DecodeResult;
pub use relay::{relay, select_strategy, FlowMode, RelayReport, Strategy};
pub use server::{resolve_target, Service, ServiceBuilder};
