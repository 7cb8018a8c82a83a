//! Mailables, mailers and queued delivery for maglev applications.
//!
//! - [`mail`]: mailables, mailers, the mail manager and transports
//! - [`jobs`]: queue channels and workers used for queued delivery
//! - [`config`]: layered configuration loading

pub mod config;
pub mod jobs;
pub mod mail;

pub use config::EnvConfig;
