pub mod config;
pub mod actors;
pub mod streaming;
