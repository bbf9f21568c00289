//! # telelocustctl
//!
//! Client for a Telelocust server: submit a worker script, follow the run
//! until it is terminal and fetch its artifact archive.
//!
//! ```no_run
//! # async fn demo() -> Result<(), telelocustctl::ClientError> {
//! use std::time::Duration;
//! use telelocustctl::{StartRequest, TelelocustClient};
//!
//! let client = TelelocustClient::new("http://localhost:5123")?;
//! let token = client.start(&StartRequest::new("locustfile.py")).await?;
//! client.wait(&token, Duration::from_secs(1)).await?;
//! client.download(&token, "downloads/run.zip", false).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;

pub use client::{DEFAULT_SERVER_URL, StartRequest, TelelocustClient, parse_token};
pub use error::ClientError;
