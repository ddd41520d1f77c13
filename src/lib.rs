//! # Syncline Trigger Engine
//!
//! Polls external sources on behalf of users, detects new domain events
//! (spreadsheet rows, calendar events, drive files) and forwards them as
//! webhooks with retry and automatic disabling of chronically failing triggers.

pub mod auth;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod db;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod models;
pub mod processor;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod sources;
pub mod telemetry;
pub use migration;
