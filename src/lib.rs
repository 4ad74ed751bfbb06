pub mod clock;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod health;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod registry;

// Layered boundaries: ports the core depends on, and their infrastructure adapters
pub mod app;
pub mod infra;
