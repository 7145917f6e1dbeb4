//! ZBProxy - Minecraft-aware TCP reverse proxy
//!
//! Architecture:
//! - `core/`: Per-connection pipeline (protocol, access, relay strategies)
//! - `handler`: Protocol interceptor state machine
//! - `server_runner`: Listeners, admission gate and shutdown
//! - `reload`: Access list reload triggers
//! - `config`: CLI arguments and the JSON config file

pub mod config;
pub mod core;
pub mod error;
pub mod handler;
pub mod logger;
pub mod reload;
pub mod server_runner;
