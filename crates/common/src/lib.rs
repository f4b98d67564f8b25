//! Common utilities and shared types for pelago.
//!
//! This crate provides foundational components used across all pelago crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **Cryptography**: RSA key handling for `ActivityPub` signatures
//! - **HTTP Signatures**: Outbound request signing for federation delivery
//! - **Caching**: In-process TTL caches swept by the recurring scheduler
//! - **Metrics**: Worker and queue gauges via [`Metrics`]
//!
//! # Example
//!
//! ```no_run
//! use pelago_common::{AppResult, Config};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     println!("delivery workers: {}", config.workers.delivery);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod http_signature;
pub mod metrics;

pub use cache::TtlCache;
pub use config::Config;
pub use crypto::{RsaKeypair, generate_rsa_keypair, parse_private_key};
pub use error::{AppError, AppResult};
pub use http_signature::{calculate_digest, sign_request};
pub use metrics::{Metrics, MetricsSnapshot, get_metrics};
