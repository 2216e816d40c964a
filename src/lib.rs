//! Real-time direct messaging for the campus portal: per-user event streams,
//! message send/history glue and a reconnecting client session.

pub mod chat;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod messages;
pub mod registry;
pub mod server;
pub mod store;
pub mod typing;
