pub mod application;
pub mod config;
pub mod models;
pub mod state;
pub mod vulnerabilities;
pub mod watcher;
pub mod writers;
