//! # Publisher Library
//!
//! Article publishing pipeline with CMS provider adapters, OAuth-style handshakes and the
//! remediation verification loop, plus the HTTP surface that drives them.

pub mod auth;
pub mod collaborators;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod handshake;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod publisher;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod token_refresh;
pub mod verification;
pub use migration;
