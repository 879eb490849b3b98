//! Rate-limited HTTP requester for archive pages.
//!
//! This module provides the outbound side of the client: every component that
//! needs network access goes through [`Requester::fetch`], which enforces a
//! sliding-window call budget and honors server throttling signals
//! automatically.
//!
//! # Features
//!
//! - Sliding-window rate limiting (default ~30 calls per 150 s, i.e. one call
//!   every 5 seconds sustained)
//! - Automatic HTTP 429 backoff driven by the server's `Retry-After` hint,
//!   pausing *all* concurrent callers until the backoff ends
//! - Optional caller-supplied session (`reqwest::Client`) per request
//! - Structured error types with full context
//!
//! # Example
//!
//! ```no_run
//! use fanarchive::request::{Requester, RequesterConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let requester = Requester::new(RequesterConfig::default());
//! let response = requester.fetch("GET", "https://example.org/tags/Fluff", None).await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```

mod error;
mod requester;
mod window;

pub use error::RequestError;
pub use requester::{Requester, RequesterConfig, parse_retry_after};
pub use window::RateWindow;
