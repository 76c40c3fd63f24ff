// Shared components
pub mod config;
pub mod error;
pub mod metrics;

// Domain layer
pub mod messenger;
pub mod sorting_station;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod tasks;
