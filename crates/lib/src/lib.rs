//! OpenClaw LINE bridge core library: device identity, gateway client,
//! session keyring, command router, and the HTTP ingress server.

pub mod commands;
pub mod config;
pub mod device;
pub mod gateway;
pub mod server;
pub mod session;
