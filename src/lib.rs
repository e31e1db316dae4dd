// Public API for integration tests and for embedding the hub

pub mod api;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod hub;
pub mod protocol;
pub mod registry;
pub mod types;
pub mod ws;
