pub mod adapters;
pub mod agent;
pub mod config;
pub mod error;
pub mod foreground;
