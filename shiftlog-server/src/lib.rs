pub mod app_context;
pub mod config;
pub mod handlers;
pub mod memory;
pub mod router;
pub mod server;
pub mod tasks;
