//! Common utilities and shared types for jobkit.
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//!
//! # Example
//!
//! ```no_run
//! use jobkit_common::{AppResult, Config};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     println!("Serving as {}", config.server.name);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;

pub use config::{BackoffConfig, Config, PoolConfig, RedisConfig, ServerConfig};
pub use error::{AppError, AppResult, BoxError};
