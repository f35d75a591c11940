pub mod analytics;
pub mod config;
pub mod domain;
pub mod error;
pub mod export;
pub mod orchestrator;
pub mod output;
pub mod overview;
pub mod projector;
pub mod session;
