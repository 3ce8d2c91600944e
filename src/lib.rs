pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod models;
pub mod observability;
pub mod ports;
pub mod realtime;
pub mod state;
pub mod store;
pub mod tokens;
