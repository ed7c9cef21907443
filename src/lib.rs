//! MPU Relay Library
//!
//! Credential-isolating relay for multipart uploads to an S3-compatible
//! backend. Browsers send raw part bytes to this relay over a three-phase
//! protocol; the relay holds the backend credentials and performs the
//! multipart calls on their behalf.
//!
//! # Features
//!
//! - **Three-Phase Protocol**: start, per-part upload, complete
//! - **Credential Isolation**: backend keys never reach the client
//! - **Manifest Canonicalization**: tolerant part-list parsing, strict output
//! - **TLS with Fallback**: plain-HTTP listener when certificates are absent
//!
//! # Example
//!
//! ```no_run
//! use mpu_relay::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod protocol;
pub mod router;
pub mod s3;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
